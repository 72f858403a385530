//! Canonical request/response shapes. Ids travel as strings.

use serde::{Deserialize, Serialize};

use std::collections::BTreeMap;

use planar_core::{
    AttributeDefinition, BBox, Block, BlockId, BlockReference, Color, DocumentStatistics, Entity, EntityId,
    EntityUpdate, Geometry, Layer, LayerId, LayerUpdate, LineType, Point, Properties,
};

pub(crate) fn parse_entity_id(id: &str) -> Result<EntityId, String> {
    id.parse().map_err(|e: uuid::Error| format!("invalid entity id '{id}': {e}"))
}

pub(crate) fn parse_layer_id(id: &str) -> Result<LayerId, String> {
    id.parse().map_err(|e: uuid::Error| format!("invalid layer id '{id}': {e}"))
}

pub(crate) fn parse_block_id(id: &str) -> Result<BlockId, String> {
    id.parse().map_err(|e: uuid::Error| format!("invalid block id '{id}': {e}"))
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBoxDto {
    pub min: Point,
    pub max: Point,
}

impl From<BBox> for BoundingBoxDto {
    fn from(b: BBox) -> Self {
        Self { min: b.min, max: b.max }
    }
}

impl From<BoundingBoxDto> for BBox {
    fn from(b: BoundingBoxDto) -> Self {
        BBox::from_corners(b.min, b.max)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityDto {
    pub id: String,
    pub kind: String,
    pub layer_id: String,
    pub geometry: Geometry,
    pub properties: Properties,
    pub visible: bool,
    pub locked: bool,
    pub bbox: BoundingBoxDto,
}

impl From<&Entity> for EntityDto {
    fn from(e: &Entity) -> Self {
        Self {
            id: e.id.to_string(),
            kind: e.kind().to_string(),
            layer_id: e.layer_id.to_string(),
            geometry: e.geometry().clone(),
            properties: e.properties.clone(),
            visible: e.visible,
            locked: e.locked,
            bbox: e.bbox().into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerDto {
    pub id: String,
    pub name: String,
    pub color: Color,
    pub line_type: LineType,
    pub line_weight: f64,
    pub visible: bool,
    pub locked: bool,
    pub printable: bool,
    pub frozen: bool,
}

impl From<&Layer> for LayerDto {
    fn from(l: &Layer) -> Self {
        Self {
            id: l.id.to_string(),
            name: l.name.clone(),
            color: l.color,
            line_type: l.line_type,
            line_weight: l.line_weight,
            visible: l.visible,
            locked: l.locked,
            printable: l.printable,
            frozen: l.frozen,
        }
    }
}

/// Create request for one entity. Without a layer the document's current
/// layer is used.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateEntityRequest {
    pub geometry: Geometry,
    #[serde(default)]
    pub layer_id: Option<String>,
    #[serde(default)]
    pub properties: Properties,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdateEntityRequest {
    pub geometry: Option<Geometry>,
    pub layer_id: Option<String>,
    pub properties: Option<Properties>,
    pub visible: Option<bool>,
    pub locked: Option<bool>,
}

impl TryFrom<UpdateEntityRequest> for EntityUpdate {
    type Error = String;

    fn try_from(req: UpdateEntityRequest) -> Result<Self, String> {
        Ok(EntityUpdate {
            geometry: req.geometry,
            layer_id: req.layer_id.as_deref().map(parse_layer_id).transpose()?,
            properties: req.properties,
            visible: req.visible,
            locked: req.locked,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateLayerRequest {
    pub name: String,
    /// `#RRGGBB` or `#RRGGBBAA`.
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub line_type: LineType,
    #[serde(default)]
    pub line_weight: Option<f64>,
    #[serde(default)]
    pub description: Option<String>,
}

impl TryFrom<CreateLayerRequest> for Layer {
    type Error = String;

    fn try_from(req: CreateLayerRequest) -> Result<Self, String> {
        let mut layer = Layer::new(&req.name).with_line_type(req.line_type);
        if let Some(hex) = &req.color {
            layer = layer.with_color(Color::from_hex(hex).map_err(|e| e.to_string())?);
        }
        if let Some(weight) = req.line_weight {
            layer = layer.with_line_weight(weight);
        }
        if let Some(desc) = &req.description {
            layer = layer.with_description(desc);
        }
        Ok(layer)
    }
}

pub type UpdateLayerRequest = LayerUpdate;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockDto {
    pub id: String,
    pub name: String,
    pub base_point: Point,
    pub description: String,
    pub category: String,
    pub tags: Vec<String>,
    pub geometry_count: usize,
    pub attributes: Vec<AttributeDefinition>,
    /// In block space; absent for a block without geometry.
    pub bbox: Option<BoundingBoxDto>,
}

impl From<&Block> for BlockDto {
    fn from(b: &Block) -> Self {
        Self {
            id: b.id.to_string(),
            name: b.name.clone(),
            base_point: b.base_point,
            description: b.description.clone(),
            category: b.category.clone(),
            tags: b.tags.clone(),
            geometry_count: b.geometries().len(),
            attributes: b.attributes.values().cloned().collect(),
            bbox: b.bbox().map(Into::into),
        }
    }
}

/// Define a block from existing entities, whose geometry is copied relative
/// to `base_point`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateBlockRequest {
    pub name: String,
    pub base_point: Point,
    pub entity_ids: Vec<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub attributes: Vec<AttributeDefinition>,
}

/// Insert a block. Without a layer the document's current layer is used.
/// `rotation` is in degrees.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsertBlockRequest {
    pub block_id: String,
    pub insertion_point: Point,
    #[serde(default = "unit_scale")]
    pub scale: f64,
    #[serde(default)]
    pub rotation: f64,
    #[serde(default)]
    pub layer_id: Option<String>,
    #[serde(default)]
    pub attributes: BTreeMap<String, serde_json::Value>,
}

fn unit_scale() -> f64 {
    1.0
}

impl TryFrom<&InsertBlockRequest> for BlockReference {
    type Error = String;

    fn try_from(req: &InsertBlockRequest) -> Result<Self, String> {
        let mut reference = BlockReference::new(parse_block_id(&req.block_id)?, req.insertion_point)
            .with_scale(req.scale)
            .with_rotation(req.rotation.to_radians());
        reference.attributes = req.attributes.clone();
        Ok(reference)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentInfo {
    pub id: String,
    pub name: String,
    pub entity_count: usize,
    pub layer_count: usize,
    pub current_layer: String,
    pub can_undo: bool,
    pub can_redo: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatisticsDto {
    pub entity_count: usize,
    pub layer_count: usize,
    pub by_kind: Vec<(String, usize)>,
    pub extent: Option<BoundingBoxDto>,
    pub undo_depth: usize,
    pub redo_depth: usize,
}

impl From<DocumentStatistics> for StatisticsDto {
    fn from(s: DocumentStatistics) -> Self {
        Self {
            entity_count: s.entity_count,
            layer_count: s.layer_count,
            by_kind: s.by_kind.iter().map(|(k, n)| (k.to_string(), *n)).collect(),
            extent: s.extent.map(Into::into),
            undo_depth: s.undo_depth,
            redo_depth: s.redo_depth,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use planar_core::{Circle, LayerId};

    #[test]
    fn test_entity_dto_shape() {
        let e = Entity::new(
            Geometry::Circle(Circle::new(Point::new(1.0, 2.0), 3.0)),
            LayerId::new(),
            Properties::new(),
        );
        let dto = EntityDto::from(&e);
        assert_eq!(dto.kind, "circle");
        assert_eq!(dto.id, e.id.to_string());
        let json = serde_json::to_value(&dto).unwrap();
        assert_eq!(json["geometry"]["type"], "circle");
        assert_eq!(json["bbox"]["min"]["x"], -2.0);
    }

    #[test]
    fn test_layer_request_parses_color() {
        let req: CreateLayerRequest =
            serde_json::from_str(r##"{"name": "Walls", "color": "#FF000080"}"##).unwrap();
        let layer = Layer::try_from(req).unwrap();
        assert_eq!(layer.color, Color::rgba(255, 0, 0, 128));
        assert_eq!(layer.line_type, LineType::Continuous);

        let bad = CreateLayerRequest {
            name: "X".into(),
            color: Some("nope".into()),
            line_type: LineType::Dashed,
            line_weight: None,
            description: None,
        };
        assert!(Layer::try_from(bad).is_err());
    }

    #[test]
    fn test_update_request_rejects_bad_layer_id() {
        let req = UpdateEntityRequest {
            layer_id: Some("not-a-uuid".into()),
            ..Default::default()
        };
        assert!(EntityUpdate::try_from(req).is_err());
    }
}
