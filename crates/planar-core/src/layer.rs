use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{KernelError, Result};

/// Unique layer identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LayerId(pub Uuid);

impl LayerId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for LayerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for LayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for LayerId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Uuid::parse_str(s).map(LayerId)
    }
}

/// Name of the layer every document starts with.
pub const DEFAULT_LAYER_NAME: &str = "0";

/// A named, styled grouping that entities reference.
///
/// Layers own no entities; membership is derived from each entity's
/// `layer_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Layer {
    pub id: LayerId,
    pub name: String,
    pub color: Color,
    pub line_type: LineType,
    pub line_weight: f64,
    pub visible: bool,
    pub locked: bool,
    pub frozen: bool,
    pub printable: bool,
    #[serde(default)]
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

impl Layer {
    pub fn new(name: &str) -> Self {
        let now = Utc::now();
        Self {
            id: LayerId::new(),
            name: name.to_string(),
            color: Color::WHITE,
            line_type: LineType::Continuous,
            line_weight: 0.25,
            visible: true,
            locked: false,
            frozen: false,
            printable: true,
            description: String::new(),
            created_at: now,
            modified_at: now,
        }
    }

    pub fn with_color(mut self, color: Color) -> Self {
        self.color = color;
        self
    }

    pub fn with_line_type(mut self, line_type: LineType) -> Self {
        self.line_type = line_type;
        self
    }

    pub fn with_line_weight(mut self, weight: f64) -> Self {
        self.line_weight = weight;
        self
    }

    pub fn with_description(mut self, desc: &str) -> Self {
        self.description = desc.to_string();
        self
    }

    /// Entities on this layer may be modified.
    pub fn is_editable(&self) -> bool {
        !self.locked && !self.frozen
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(KernelError::validation("layer name must not be empty"));
        }
        if !self.line_weight.is_finite() || self.line_weight < 0.0 {
            return Err(KernelError::validation(format!(
                "line weight must be non-negative, got {}",
                self.line_weight
            )));
        }
        Ok(())
    }
}

/// RGBA color of a layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Default for Color {
    fn default() -> Self {
        Color::WHITE
    }
}

impl Color {
    pub const WHITE: Color = Color::rgb(255, 255, 255);

    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 255 }
    }

    pub const fn rgba(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    /// Parse `#rrggbb` or `#rrggbbaa` (the `#` is optional).
    pub fn from_hex(hex: &str) -> Result<Self> {
        let digits = hex.trim().trim_start_matches('#');
        if !(digits.len() == 6 || digits.len() == 8) || !digits.is_ascii() {
            return Err(KernelError::validation(format!("invalid color '{hex}'")));
        }
        let channel = |i: usize| {
            u8::from_str_radix(&digits[i..i + 2], 16)
                .map_err(|_| KernelError::validation(format!("invalid color '{hex}'")))
        };
        let a = if digits.len() == 8 { channel(6)? } else { 255 };
        Ok(Color::rgba(channel(0)?, channel(2)?, channel(4)?, a))
    }

    /// `#rrggbb`, with an alpha pair appended when not opaque.
    pub fn to_hex(&self) -> String {
        if self.a == 255 {
            format!("#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
        } else {
            format!("#{:02x}{:02x}{:02x}{:02x}", self.r, self.g, self.b, self.a)
        }
    }
}

/// Stroke pattern for entities drawn on a layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineType {
    #[default]
    Continuous,
    Dashed,
    Dotted,
    DashDot,
    DashDotDot,
    Center,
    Phantom,
    Hidden,
}

/// Partial update of a layer. `None` fields are left unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LayerUpdate {
    pub name: Option<String>,
    pub color: Option<Color>,
    pub line_type: Option<LineType>,
    pub line_weight: Option<f64>,
    pub visible: Option<bool>,
    pub locked: Option<bool>,
    pub frozen: Option<bool>,
    pub printable: Option<bool>,
    pub description: Option<String>,
}

impl LayerUpdate {
    pub fn rename(name: &str) -> Self {
        Self {
            name: Some(name.to_string()),
            ..Default::default()
        }
    }

    pub fn with_color(mut self, color: Color) -> Self {
        self.color = Some(color);
        self
    }

    pub fn with_visible(mut self, visible: bool) -> Self {
        self.visible = Some(visible);
        self
    }

    pub fn with_locked(mut self, locked: bool) -> Self {
        self.locked = Some(locked);
        self
    }

    pub fn with_frozen(mut self, frozen: bool) -> Self {
        self.frozen = Some(frozen);
        self
    }

    pub(crate) fn apply_to(&self, layer: &mut Layer) {
        if let Some(name) = &self.name {
            layer.name = name.clone();
        }
        if let Some(color) = self.color {
            layer.color = color;
        }
        if let Some(line_type) = self.line_type {
            layer.line_type = line_type;
        }
        if let Some(weight) = self.line_weight {
            layer.line_weight = weight;
        }
        if let Some(visible) = self.visible {
            layer.visible = visible;
        }
        if let Some(locked) = self.locked {
            layer.locked = locked;
        }
        if let Some(frozen) = self.frozen {
            layer.frozen = frozen;
        }
        if let Some(printable) = self.printable {
            layer.printable = printable;
        }
        if let Some(description) = &self.description {
            layer.description = description.clone();
        }
        layer.modified_at = Utc::now();
    }
}

/// The layer table of a document, keyed by id. Names are unique.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LayerTable {
    layers: HashMap<LayerId, Layer>,
}

impl LayerTable {
    pub fn new() -> Self {
        Self {
            layers: HashMap::new(),
        }
    }

    /// Insert or replace a layer without any checks.
    pub(crate) fn put(&mut self, layer: Layer) -> Option<Layer> {
        self.layers.insert(layer.id, layer)
    }

    pub(crate) fn take(&mut self, id: LayerId) -> Option<Layer> {
        self.layers.remove(&id)
    }

    pub fn get_layer(&self, id: LayerId) -> Option<&Layer> {
        self.layers.get(&id)
    }

    pub fn contains(&self, id: LayerId) -> bool {
        self.layers.contains_key(&id)
    }

    pub fn get_layer_by_name(&self, name: &str) -> Option<&Layer> {
        self.layers.values().find(|l| l.name == name)
    }

    /// Fails when another layer than `except` already uses `name`.
    pub(crate) fn check_name_free(&self, name: &str, except: Option<LayerId>) -> Result<()> {
        match self.get_layer_by_name(name) {
            Some(existing) if Some(existing.id) != except => Err(KernelError::validation(
                format!("layer name '{name}' is already in use"),
            )),
            _ => Ok(()),
        }
    }

    /// All layers, sorted by name.
    pub fn all_layers(&self) -> Vec<&Layer> {
        let mut layers: Vec<&Layer> = self.layers.values().collect();
        layers.sort_by(|a, b| a.name.cmp(&b.name));
        layers
    }

    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }
}
