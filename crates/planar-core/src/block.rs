//! Reusable block definitions and their insertion parameters.
//!
//! A block stores geometry relative to its base point. Inserting a block
//! places a transformed copy of that geometry into the document as ordinary
//! entities tagged with the block and insert ids, so every other operation
//! sees plain entities.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{KernelError, Result};
use crate::geometry::{BBox, Geometry, Point};
use crate::transform::Transform2D;

/// Property key holding the id of the block an entity was inserted from.
pub const BLOCK_ID_KEY: &str = "block_id";
/// Property key shared by all entities of one insertion.
pub const BLOCK_INSERT_KEY: &str = "block_insert";
/// Property key holding the resolved attribute values of an insertion.
pub const BLOCK_ATTRIBUTES_KEY: &str = "block_attributes";

/// Unique block identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlockId(pub Uuid);

impl BlockId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for BlockId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for BlockId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Uuid::parse_str(s).map(BlockId)
    }
}

// ── Attributes ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeKind {
    Text,
    Number,
    Boolean,
    Choice,
    /// A non-negative length.
    Distance,
    /// An angle in radians.
    Angle,
}

/// A named value every insertion of a block carries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeDefinition {
    pub name: String,
    pub kind: AttributeKind,
    #[serde(default)]
    pub default_value: Value,
    #[serde(default)]
    pub prompt: String,
    #[serde(default = "default_true")]
    pub required: bool,
    #[serde(default)]
    pub choices: Vec<String>,
    #[serde(default)]
    pub min_value: Option<f64>,
    #[serde(default)]
    pub max_value: Option<f64>,
    #[serde(default = "default_true")]
    pub visible: bool,
}

fn default_true() -> bool {
    true
}

impl AttributeDefinition {
    pub fn new(name: &str, kind: AttributeKind, default_value: Value) -> Self {
        Self {
            name: name.to_string(),
            kind,
            default_value,
            prompt: String::new(),
            required: true,
            choices: Vec::new(),
            min_value: None,
            max_value: None,
            visible: true,
        }
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn with_range(mut self, min: Option<f64>, max: Option<f64>) -> Self {
        self.min_value = min;
        self.max_value = max;
        self
    }

    pub fn with_choices<S: Into<String>>(mut self, choices: impl IntoIterator<Item = S>) -> Self {
        self.choices = choices.into_iter().map(Into::into).collect();
        self
    }

    /// Check `value` against the kind, range and choices. `null` is accepted
    /// only for optional attributes.
    pub fn check_value(&self, value: &Value) -> Result<()> {
        if value.is_null() {
            return if self.required {
                Err(KernelError::validation(format!("attribute '{}' is required", self.name)))
            } else {
                Ok(())
            };
        }
        let invalid = |why: &str| {
            Err(KernelError::validation(format!(
                "attribute '{}' {why}, got {value}",
                self.name
            )))
        };
        match self.kind {
            AttributeKind::Text if !value.is_string() => invalid("must be text"),
            AttributeKind::Boolean if !value.is_boolean() => invalid("must be a boolean"),
            AttributeKind::Choice => match value.as_str() {
                Some(s) if self.choices.iter().any(|c| c == s) => Ok(()),
                _ => invalid("must be one of the listed choices"),
            },
            AttributeKind::Number | AttributeKind::Distance | AttributeKind::Angle => {
                let Some(n) = value.as_f64() else {
                    return invalid("must be a number");
                };
                if self.kind == AttributeKind::Distance && n < 0.0 {
                    return invalid("must not be negative");
                }
                if self.min_value.is_some_and(|min| n < min) || self.max_value.is_some_and(|max| n > max) {
                    return invalid("is out of range");
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

// ── Blocks ───────────────────────────────────────────────────────────

/// A named, reusable group of geometry with attribute definitions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub id: BlockId,
    pub name: String,
    /// Insertion anchor, in drawing coordinates at definition time.
    pub base_point: Point,
    /// Geometry relative to `base_point`.
    geometries: Vec<Geometry>,
    #[serde(default)]
    pub attributes: BTreeMap<String, AttributeDefinition>,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_category")]
    pub category: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

fn default_category() -> String {
    "General".to_string()
}

impl Block {
    pub fn new(name: &str, base_point: Point) -> Self {
        let now = Utc::now();
        Self {
            id: BlockId::new(),
            name: name.to_string(),
            base_point,
            geometries: Vec::new(),
            attributes: BTreeMap::new(),
            description: String::new(),
            category: default_category(),
            tags: Vec::new(),
            created_at: now,
            modified_at: now,
        }
    }

    pub fn with_description(mut self, desc: &str) -> Self {
        self.description = desc.to_string();
        self
    }

    pub fn with_category(mut self, category: &str) -> Self {
        self.category = category.to_string();
        self
    }

    pub fn with_tags<S: Into<String>>(mut self, tags: impl IntoIterator<Item = S>) -> Self {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// Add geometry given in drawing coordinates; it is stored relative to
    /// the base point.
    pub fn add_geometry(&mut self, geometry: &Geometry) {
        let to_local = Transform2D::translate(-self.base_point.x, -self.base_point.y);
        self.geometries.push(to_local.apply_geometry(geometry));
        self.modified_at = Utc::now();
    }

    pub fn add_attribute(&mut self, attribute: AttributeDefinition) {
        self.attributes.insert(attribute.name.clone(), attribute);
        self.modified_at = Utc::now();
    }

    /// Geometry relative to the base point.
    pub fn geometries(&self) -> &[Geometry] {
        &self.geometries
    }

    /// Bounds of the geometry in block space.
    pub fn bbox(&self) -> Option<BBox> {
        self.geometries
            .iter()
            .map(Geometry::bbox)
            .reduce(|a, b| a.union(&b))
    }

    pub fn validate(&self, eps: f64, allow_self_intersecting: bool) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(KernelError::validation("block name must not be empty"));
        }
        if !self.base_point.is_finite() {
            return Err(KernelError::validation("block base point is not finite"));
        }
        for (i, g) in self.geometries.iter().enumerate() {
            g.validate(eps, allow_self_intersecting)
                .map_err(|e| KernelError::validation(format!("block '{}' geometry {i}: {e}", self.name)))?;
        }
        for (name, def) in &self.attributes {
            if *name != def.name {
                return Err(KernelError::validation(format!(
                    "attribute key '{name}' does not match its definition '{}'",
                    def.name
                )));
            }
            if def.kind == AttributeKind::Choice && def.choices.is_empty() {
                return Err(KernelError::validation(format!("attribute '{name}' has no choices")));
            }
            def.check_value(&def.default_value)?;
        }
        Ok(())
    }

    /// Case-insensitive match on name, description or any tag.
    pub fn matches(&self, query: &str) -> bool {
        let q = query.to_lowercase();
        self.name.to_lowercase().contains(&q)
            || self.description.to_lowercase().contains(&q)
            || self.tags.iter().any(|t| t.to_lowercase().contains(&q))
    }
}

// ── References ───────────────────────────────────────────────────────

/// Placement of one insertion of a block: scale, then rotation about the
/// base point, then translation to `insertion_point`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockReference {
    pub block_id: BlockId,
    pub insertion_point: Point,
    #[serde(default = "default_scale")]
    pub scale: f64,
    /// Counter-clockwise rotation in radians.
    #[serde(default)]
    pub rotation: f64,
    #[serde(default)]
    pub attributes: BTreeMap<String, Value>,
}

fn default_scale() -> f64 {
    1.0
}

impl BlockReference {
    pub fn new(block_id: BlockId, insertion_point: Point) -> Self {
        Self {
            block_id,
            insertion_point,
            scale: 1.0,
            rotation: 0.0,
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_scale(mut self, scale: f64) -> Self {
        self.scale = scale;
        self
    }

    pub fn with_rotation(mut self, rotation: f64) -> Self {
        self.rotation = rotation;
        self
    }

    pub fn with_attribute(mut self, name: &str, value: Value) -> Self {
        self.attributes.insert(name.to_string(), value);
        self
    }

    /// Block space to drawing space.
    pub fn transform(&self) -> Transform2D {
        Transform2D::scale(self.scale, Point::ORIGIN)
            .then(&Transform2D::rotate(self.rotation, Point::ORIGIN))
            .then(&Transform2D::translate(self.insertion_point.x, self.insertion_point.y))
    }

    /// Attribute values for this insertion: given values checked against
    /// their definitions, defaults filled in for the rest.
    pub fn resolve_attributes(&self, block: &Block) -> Result<BTreeMap<String, Value>> {
        if let Some(unknown) = self.attributes.keys().find(|k| !block.attributes.contains_key(*k)) {
            return Err(KernelError::validation(format!(
                "block '{}' has no attribute '{unknown}'",
                block.name
            )));
        }
        let mut resolved = BTreeMap::new();
        for (name, def) in &block.attributes {
            let value = self.attributes.get(name).unwrap_or(&def.default_value);
            def.check_value(value)?;
            resolved.insert(name.clone(), value.clone());
        }
        Ok(resolved)
    }
}

// ── Library ──────────────────────────────────────────────────────────

/// The block definitions of a document, keyed by id. Names are unique.
#[derive(Debug, Clone, Default)]
pub struct BlockLibrary {
    blocks: HashMap<BlockId, Block>,
}

impl BlockLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn put(&mut self, block: Block) -> Option<Block> {
        self.blocks.insert(block.id, block)
    }

    pub(crate) fn take(&mut self, id: BlockId) -> Option<Block> {
        self.blocks.remove(&id)
    }

    pub fn get(&self, id: BlockId) -> Option<&Block> {
        self.blocks.get(&id)
    }

    pub fn contains(&self, id: BlockId) -> bool {
        self.blocks.contains_key(&id)
    }

    pub fn get_by_name(&self, name: &str) -> Option<&Block> {
        self.blocks.values().find(|b| b.name == name)
    }

    /// Fails when another block than `except` already uses `name`.
    pub(crate) fn check_name_free(&self, name: &str, except: Option<BlockId>) -> Result<()> {
        match self.get_by_name(name) {
            Some(existing) if Some(existing.id) != except => Err(KernelError::validation(format!(
                "block name '{name}' is already in use"
            ))),
            _ => Ok(()),
        }
    }

    /// All blocks, sorted by name.
    pub fn all(&self) -> Vec<&Block> {
        let mut blocks: Vec<&Block> = self.blocks.values().collect();
        blocks.sort_by(|a, b| a.name.cmp(&b.name));
        blocks
    }

    pub fn in_category(&self, category: &str) -> Vec<&Block> {
        self.all().into_iter().filter(|b| b.category == category).collect()
    }

    /// Distinct categories, sorted.
    pub fn categories(&self) -> Vec<&str> {
        let set: BTreeSet<&str> = self.blocks.values().map(|b| b.category.as_str()).collect();
        set.into_iter().collect()
    }

    pub fn search(&self, query: &str) -> Vec<&Block> {
        self.all().into_iter().filter(|b| b.matches(query)).collect()
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{Circle, Line};
    use serde_json::json;
    use std::f64::consts::FRAC_PI_2;

    const EPS: f64 = 1e-9;

    fn door() -> Block {
        let mut block = Block::new("Door", Point::new(10.0, 10.0))
            .with_category("Architecture")
            .with_tags(["opening", "swing"]);
        block.add_geometry(&Geometry::Line(Line::new(Point::new(10.0, 10.0), Point::new(12.0, 10.0))));
        block.add_attribute(
            AttributeDefinition::new("width", AttributeKind::Distance, json!(0.9)).with_range(Some(0.5), Some(2.0)),
        );
        block.add_attribute(
            AttributeDefinition::new("hand", AttributeKind::Choice, json!("left")).with_choices(["left", "right"]),
        );
        block.add_attribute(AttributeDefinition::new("label", AttributeKind::Text, Value::Null).optional());
        block
    }

    #[test]
    fn test_geometry_is_stored_relative_to_base() {
        let block = door();
        let Geometry::Line(l) = &block.geometries()[0] else {
            panic!("expected a line");
        };
        assert!(l.start.approx_eq(&Point::ORIGIN, 1e-12));
        assert!(l.end.approx_eq(&Point::new(2.0, 0.0), 1e-12));
        let bb = block.bbox().unwrap();
        assert!(bb.approx_eq(&BBox::new(Point::ORIGIN, Point::new(2.0, 0.0)), 1e-12));
        block.validate(EPS, false).unwrap();
    }

    #[test]
    fn test_attribute_checks() {
        let block = door();
        let width = &block.attributes["width"];
        assert!(width.check_value(&json!(1.2)).is_ok());
        assert!(width.check_value(&json!(3.0)).is_err());
        assert!(width.check_value(&json!(-1.0)).is_err());
        assert!(width.check_value(&json!("wide")).is_err());
        assert!(width.check_value(&Value::Null).is_err());

        let hand = &block.attributes["hand"];
        assert!(hand.check_value(&json!("right")).is_ok());
        assert!(hand.check_value(&json!("up")).is_err());

        assert!(block.attributes["label"].check_value(&Value::Null).is_ok());
    }

    #[test]
    fn test_resolve_attributes_fills_defaults() {
        let block = door();
        let reference = BlockReference::new(block.id, Point::ORIGIN).with_attribute("hand", json!("right"));
        let values = reference.resolve_attributes(&block).unwrap();
        assert_eq!(values["hand"], json!("right"));
        assert_eq!(values["width"], json!(0.9));
        assert_eq!(values["label"], Value::Null);

        let unknown = reference.clone().with_attribute("colour", json!("red"));
        assert!(unknown.resolve_attributes(&block).is_err());
        let bad = reference.with_attribute("width", json!(9.0));
        assert!(bad.resolve_attributes(&block).is_err());
    }

    #[test]
    fn test_reference_transform_order() {
        let reference = BlockReference::new(BlockId::new(), Point::new(100.0, 0.0))
            .with_scale(2.0)
            .with_rotation(FRAC_PI_2);
        let p = reference.transform().apply(&Point::new(1.0, 0.0));
        assert!(p.approx_eq(&Point::new(100.0, 2.0), 1e-12));
    }

    #[test]
    fn test_invalid_blocks() {
        assert!(Block::new(" ", Point::ORIGIN).validate(EPS, false).is_err());

        let mut degenerate = Block::new("Dot", Point::ORIGIN);
        degenerate.add_geometry(&Geometry::Circle(Circle::new(Point::ORIGIN, 0.0)));
        assert!(degenerate.validate(EPS, false).is_err());

        let mut no_choices = Block::new("Tag", Point::ORIGIN);
        no_choices.add_attribute(AttributeDefinition::new("kind", AttributeKind::Choice, json!("a")));
        assert!(no_choices.validate(EPS, false).is_err());
    }

    #[test]
    fn test_library_lookup_and_search() {
        let mut library = BlockLibrary::new();
        let door = door();
        let door_id = door.id;
        library.put(door);
        library.put(Block::new("Chair", Point::ORIGIN).with_category("Furniture"));
        library.put(Block::new("Table", Point::ORIGIN).with_category("Furniture").with_description("Dining"));

        assert_eq!(library.len(), 3);
        assert_eq!(library.get_by_name("Door").unwrap().id, door_id);
        assert!(library.check_name_free("Door", None).is_err());
        assert!(library.check_name_free("Door", Some(door_id)).is_ok());
        assert_eq!(library.categories(), vec!["Architecture", "Furniture"]);

        let furniture: Vec<&str> = library.in_category("Furniture").iter().map(|b| b.name.as_str()).collect();
        assert_eq!(furniture, vec!["Chair", "Table"]);
        let found: Vec<&str> = library.search("SWING").iter().map(|b| b.name.as_str()).collect();
        assert_eq!(found, vec!["Door"]);
        assert_eq!(library.search("dining").len(), 1);

        assert!(library.take(door_id).is_some());
        assert!(!library.contains(door_id));
    }
}
