use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::entity::{Entity, EntityId, EntityKind, Properties};
use crate::geometry::BBox;
use crate::layer::LayerId;

/// Criteria for [`Document::query`](crate::Document::query). Every set
/// criterion must hold; an empty filter matches everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EntityFilter {
    pub ids: Option<HashSet<EntityId>>,
    pub layers: Option<HashSet<LayerId>>,
    pub kinds: Option<HashSet<EntityKind>>,
    pub visible: Option<bool>,
    pub locked: Option<bool>,
    /// Entities whose bounding box touches this box.
    pub bbox: Option<BBox>,
    /// Property values that must be present and equal.
    pub properties: Properties,
}

impl EntityFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ids(ids: impl IntoIterator<Item = EntityId>) -> Self {
        Self {
            ids: Some(ids.into_iter().collect()),
            ..Default::default()
        }
    }

    pub fn with_layers(mut self, layers: impl IntoIterator<Item = LayerId>) -> Self {
        self.layers = Some(layers.into_iter().collect());
        self
    }

    pub fn with_kinds(mut self, kinds: impl IntoIterator<Item = EntityKind>) -> Self {
        self.kinds = Some(kinds.into_iter().collect());
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

    pub fn with_bbox(mut self, bbox: BBox) -> Self {
        self.bbox = Some(bbox);
        self
    }

    pub fn with_property(mut self, key: &str, value: serde_json::Value) -> Self {
        self.properties.insert(key.to_string(), value);
        self
    }

    pub fn matches(&self, entity: &Entity) -> bool {
        self.ids.as_ref().map_or(true, |ids| ids.contains(&entity.id))
            && self
                .layers
                .as_ref()
                .map_or(true, |layers| layers.contains(&entity.layer_id))
            && self
                .kinds
                .as_ref()
                .map_or(true, |kinds| kinds.contains(&entity.kind()))
            && self.visible.map_or(true, |v| entity.visible == v)
            && self.locked.map_or(true, |l| entity.locked == l)
            && self.bbox.map_or(true, |b| b.intersects(&entity.bbox()))
            && self
                .properties
                .iter()
                .all(|(k, v)| entity.properties.get(k) == Some(v))
    }
}

/// Summary counts of a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentStatistics {
    pub entity_count: usize,
    pub layer_count: usize,
    pub by_kind: BTreeMap<EntityKind, usize>,
    pub by_layer: HashMap<LayerId, usize>,
    pub visible_count: usize,
    pub locked_count: usize,
    pub extent: Option<BBox>,
    pub undo_depth: usize,
    pub redo_depth: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{Circle, Geometry, Line, Point};

    fn entity(geometry: Geometry, layer: LayerId) -> Entity {
        Entity::new(geometry, layer, Properties::new())
    }

    #[test]
    fn test_empty_filter_matches_all() {
        let e = entity(Geometry::Circle(Circle::new(Point::ORIGIN, 1.0)), LayerId::new());
        assert!(EntityFilter::new().matches(&e));
    }

    #[test]
    fn test_filter_criteria_combine() {
        let layer = LayerId::new();
        let mut e = entity(
            Geometry::Line(Line::new(Point::new(0.0, 0.0), Point::new(4.0, 4.0))),
            layer,
        );
        e.properties.insert("tag".into(), serde_json::json!("door"));

        let f = EntityFilter::new()
            .with_layers([layer])
            .with_kinds([EntityKind::Line])
            .with_property("tag", serde_json::json!("door"));
        assert!(f.matches(&e));

        assert!(!f.clone().with_kinds([EntityKind::Circle]).matches(&e));
        assert!(!f.clone().with_locked(true).matches(&e));
        assert!(!f
            .clone()
            .with_property("tag", serde_json::json!("window"))
            .matches(&e));

        let far = BBox::new(Point::new(10.0, 10.0), Point::new(20.0, 20.0));
        assert!(!f.clone().with_bbox(far).matches(&e));
        let near = BBox::new(Point::new(3.0, 3.0), Point::new(20.0, 20.0));
        assert!(f.with_bbox(near).matches(&e));
    }
}
