use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::geometry::{BBox, Geometry};
use crate::layer::LayerId;

/// Unique entity identifier. Never reused within a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub Uuid);

impl EntityId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for EntityId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(EntityId)
    }
}

/// The kind tag of an entity; selects the geometry payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Line,
    Circle,
    Arc,
    Polyline,
    Rectangle,
    Polygon,
}

impl EntityKind {
    pub const ALL: [EntityKind; 6] = [
        EntityKind::Line,
        EntityKind::Circle,
        EntityKind::Arc,
        EntityKind::Polyline,
        EntityKind::Rectangle,
        EntityKind::Polygon,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Line => "line",
            EntityKind::Circle => "circle",
            EntityKind::Arc => "arc",
            EntityKind::Polyline => "polyline",
            EntityKind::Rectangle => "rectangle",
            EntityKind::Polygon => "polygon",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EntityKind::ALL
            .iter()
            .copied()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| format!("unknown entity kind '{s}'"))
    }
}

/// Free-form metadata attached to an entity. Geometry never lives here.
pub type Properties = BTreeMap<String, serde_json::Value>;

/// A drawable object owned by a document.
///
/// The geometry is private so the cached bounding box can only change
/// together with it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: EntityId,
    pub layer_id: LayerId,
    geometry: Geometry,
    pub properties: Properties,
    pub visible: bool,
    pub locked: bool,
    bbox: BBox,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

impl Entity {
    pub fn new(geometry: Geometry, layer_id: LayerId, properties: Properties) -> Self {
        let now = Utc::now();
        Self {
            id: EntityId::new(),
            layer_id,
            bbox: geometry.bbox(),
            geometry,
            properties,
            visible: true,
            locked: false,
            created_at: now,
            modified_at: now,
        }
    }

    pub fn kind(&self) -> EntityKind {
        self.geometry.kind()
    }

    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    /// Cached bounding box; always equal to `geometry().bbox()`.
    pub fn bbox(&self) -> BBox {
        self.bbox
    }

    pub fn set_geometry(&mut self, geometry: Geometry) {
        self.bbox = geometry.bbox();
        self.geometry = geometry;
        self.touch();
    }

    pub fn touch(&mut self) {
        self.modified_at = Utc::now();
    }

    /// Recompute the cached bounding box, e.g. after deserialization.
    pub(crate) fn refresh_bbox(&mut self) {
        self.bbox = self.geometry.bbox();
    }

    /// A fresh entity with a new id carrying this entity's attributes and
    /// the given geometry.
    pub fn derive(&self, geometry: Geometry) -> Entity {
        let mut e = Entity::new(geometry, self.layer_id, self.properties.clone());
        e.visible = self.visible;
        e
    }
}

/// Input for batch creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewEntity {
    pub geometry: Geometry,
    pub layer_id: LayerId,
    #[serde(default)]
    pub properties: Properties,
}

impl NewEntity {
    pub fn new(geometry: Geometry, layer_id: LayerId) -> Self {
        Self {
            geometry,
            layer_id,
            properties: Properties::new(),
        }
    }

    pub fn with_properties(mut self, properties: Properties) -> Self {
        self.properties = properties;
        self
    }
}

/// Partial update of an entity. `None` fields are left unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityUpdate {
    pub geometry: Option<Geometry>,
    pub layer_id: Option<LayerId>,
    pub properties: Option<Properties>,
    pub visible: Option<bool>,
    pub locked: Option<bool>,
}

impl EntityUpdate {
    pub fn geometry(geometry: Geometry) -> Self {
        Self {
            geometry: Some(geometry),
            ..Default::default()
        }
    }

    pub fn with_layer(mut self, layer_id: LayerId) -> Self {
        self.layer_id = Some(layer_id);
        self
    }

    pub fn with_properties(mut self, properties: Properties) -> Self {
        self.properties = Some(properties);
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

    /// True when only the visible/locked flags change.
    pub fn is_flags_only(&self) -> bool {
        self.geometry.is_none() && self.layer_id.is_none() && self.properties.is_none()
    }

    pub(crate) fn apply_to(&self, entity: &mut Entity) {
        if let Some(geometry) = &self.geometry {
            entity.set_geometry(geometry.clone());
        }
        if let Some(layer_id) = self.layer_id {
            entity.layer_id = layer_id;
        }
        if let Some(properties) = &self.properties {
            entity.properties = properties.clone();
        }
        if let Some(visible) = self.visible {
            entity.visible = visible;
        }
        if let Some(locked) = self.locked {
            entity.locked = locked;
        }
        entity.touch();
    }
}

/// Entity state before and after a mutation.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityDelta {
    pub before: Entity,
    pub after: Entity,
}
