use std::collections::HashMap;
use std::fmt;

use rstar::{RTree, RTreeObject, AABB};

use crate::entity::EntityId;
use crate::geometry::{BBox, Point};

/// An entry in the R-tree spatial index: an entity id and its bounding box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpatialEntry {
    pub id: EntityId,
    pub bbox: BBox,
}

impl RTreeObject for SpatialEntry {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        to_aabb(&self.bbox)
    }
}

fn to_aabb(bbox: &BBox) -> AABB<[f64; 2]> {
    AABB::from_corners([bbox.min.x, bbox.min.y], [bbox.max.x, bbox.max.y])
}

/// Bounding-box index over the entities of a document.
///
/// `entries` mirrors the tree so an entry can be located by id; removal in
/// the tree needs the exact stored value.
pub struct SpatialIndex {
    tree: RTree<SpatialEntry>,
    entries: HashMap<EntityId, BBox>,
}

impl SpatialIndex {
    pub fn new() -> Self {
        Self {
            tree: RTree::new(),
            entries: HashMap::new(),
        }
    }

    /// Bulk-load the index from scratch.
    pub fn build(entries: impl IntoIterator<Item = (EntityId, BBox)>) -> Self {
        let entries: HashMap<EntityId, BBox> = entries.into_iter().collect();
        let items: Vec<SpatialEntry> = entries
            .iter()
            .map(|(&id, &bbox)| SpatialEntry { id, bbox })
            .collect();
        Self {
            tree: RTree::bulk_load(items),
            entries,
        }
    }

    /// Insert an entry, replacing any previous entry for the same id.
    pub fn insert(&mut self, id: EntityId, bbox: BBox) {
        if let Some(old) = self.entries.insert(id, bbox) {
            self.tree.remove(&SpatialEntry { id, bbox: old });
        }
        self.tree.insert(SpatialEntry { id, bbox });
    }

    pub fn remove(&mut self, id: EntityId) -> Option<BBox> {
        let old = self.entries.remove(&id)?;
        self.tree.remove(&SpatialEntry { id, bbox: old });
        Some(old)
    }

    /// Replace the box of an entity after its geometry changed.
    pub fn update(&mut self, id: EntityId, bbox: BBox) {
        if self.entries.get(&id) == Some(&bbox) {
            return;
        }
        self.insert(id, bbox);
    }

    pub fn get_bbox(&self, id: EntityId) -> Option<BBox> {
        self.entries.get(&id).copied()
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.entries.contains_key(&id)
    }

    /// Entries whose box contains `point`.
    pub fn query_point(&self, point: &Point) -> Vec<&SpatialEntry> {
        self.tree
            .locate_in_envelope_intersecting(&AABB::from_point([point.x, point.y]))
            .collect()
    }

    /// Entries whose box lies entirely inside `window`.
    pub fn query_window(&self, window: &BBox) -> Vec<&SpatialEntry> {
        self.tree.locate_in_envelope(&to_aabb(window)).collect()
    }

    /// Entries whose box touches `window`.
    pub fn query_crossing(&self, window: &BBox) -> Vec<&SpatialEntry> {
        self.tree
            .locate_in_envelope_intersecting(&to_aabb(window))
            .collect()
    }

    /// Lazily walk the tree, restricted to boxes touching `window` if given.
    pub fn scan<'a>(&'a self, window: Option<&BBox>) -> Box<dyn Iterator<Item = EntityId> + 'a> {
        match window {
            Some(bbox) => Box::new(
                self.tree
                    .locate_in_envelope_intersecting(&to_aabb(bbox))
                    .map(|e| e.id),
            ),
            None => Box::new(self.tree.iter().map(|e| e.id)),
        }
    }

    /// The `k` entries closest to `point` according to `distance`, nearest
    /// first.
    ///
    /// `distance` must never be smaller than the distance from `point` to the
    /// entry's box; it returns `None` for entries the caller wants to skip.
    /// The search window doubles until it holds `k` confirmed hits or covers
    /// the whole index.
    pub fn nearest_by<F>(&self, point: &Point, k: usize, mut distance: F) -> Vec<(EntityId, f64)>
    where
        F: FnMut(EntityId) -> Option<f64>,
    {
        let Some(extent) = self.extent() else {
            return Vec::new();
        };
        if k == 0 || !point.is_finite() {
            return Vec::new();
        }

        let step = (extent.max_extent() / (self.len() as f64).sqrt().max(1.0)).max(f64::EPSILON);
        let mut radius = extent.distance_to_point(point) + step;
        let mut scored: HashMap<EntityId, Option<f64>> = HashMap::new();
        loop {
            let window = BBox::new(point.translate(-radius, -radius), point.translate(radius, radius));
            for entry in self.query_crossing(&window) {
                scored
                    .entry(entry.id)
                    .or_insert_with(|| distance(entry.id));
            }

            let covers_all = window.contains_bbox(&extent);
            let mut hits: Vec<(EntityId, f64)> = scored
                .iter()
                .filter_map(|(&id, d)| d.map(|d| (id, d)))
                .filter(|&(_, d)| covers_all || d <= radius)
                .collect();
            if hits.len() >= k || covers_all {
                hits.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
                hits.truncate(k);
                return hits;
            }
            radius *= 2.0;
        }
    }

    /// Union of all boxes, read from the tree root.
    pub fn extent(&self) -> Option<BBox> {
        if self.is_empty() {
            return None;
        }
        let env = self.tree.root().envelope();
        let (lo, hi) = (env.lower(), env.upper());
        Some(BBox::new(Point::new(lo[0], lo[1]), Point::new(hi[0], hi[1])))
    }

    /// Number of entries in the index.
    pub fn len(&self) -> usize {
        self.tree.size()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.size() == 0
    }
}

impl Default for SpatialIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SpatialIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpatialIndex")
            .field("len", &self.len())
            .field("extent", &self.extent())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bb(x0: f64, y0: f64, x1: f64, y1: f64) -> BBox {
        BBox::new(Point::new(x0, y0), Point::new(x1, y1))
    }

    #[test]
    fn test_spatial_query() {
        let a = EntityId::new();
        let b = EntityId::new();
        let index = SpatialIndex::build(vec![(a, bb(0.0, 0.0, 10.0, 10.0)), (b, bb(20.0, 20.0, 30.0, 30.0))]);

        // Point inside first entry
        let results = index.query_point(&Point::new(5.0, 5.0));
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, a);

        // Point inside second entry
        let results = index.query_point(&Point::new(25.0, 25.0));
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, b);

        let crossing = index.query_crossing(&bb(5.0, 5.0, 22.0, 22.0));
        assert_eq!(crossing.len(), 2);

        let window = index.query_window(&bb(-5.0, -5.0, 22.0, 22.0));
        assert_eq!(window.len(), 1);
        assert_eq!(window[0].id, a);
    }

    #[test]
    fn test_update_replaces_entry() {
        let id = EntityId::new();
        let mut index = SpatialIndex::new();
        index.insert(id, bb(0.0, 0.0, 1.0, 1.0));
        index.update(id, bb(100.0, 100.0, 101.0, 101.0));

        assert_eq!(index.len(), 1);
        assert!(index.query_point(&Point::new(0.5, 0.5)).is_empty());
        assert_eq!(index.query_point(&Point::new(100.5, 100.5)).len(), 1);
        assert_eq!(index.get_bbox(id), Some(bb(100.0, 100.0, 101.0, 101.0)));
        assert!(index.contains(id));

        assert!(index.remove(id).is_some());
        assert!(!index.contains(id));
        assert!(index.is_empty());
        assert!(index.extent().is_none());
        assert!(index.remove(id).is_none());
    }

    #[test]
    fn test_extent_tracks_root() {
        let mut index = SpatialIndex::new();
        index.insert(EntityId::new(), bb(-3.0, 0.0, 1.0, 1.0));
        index.insert(EntityId::new(), bb(5.0, 2.0, 6.0, 9.0));
        let extent = index.extent().unwrap();
        assert!(extent.approx_eq(&bb(-3.0, 0.0, 6.0, 9.0), 1e-12));
    }

    #[test]
    fn test_nearest_by_box_distance() {
        let ids: Vec<EntityId> = (0..50).map(|_| EntityId::new()).collect();
        let boxes: HashMap<EntityId, BBox> = ids
            .iter()
            .enumerate()
            .map(|(i, &id)| {
                let x = (i as f64) * 10.0;
                (id, bb(x, 0.0, x + 1.0, 1.0))
            })
            .collect();
        let index = SpatialIndex::build(boxes.clone());
        let query = Point::new(203.0, 0.5);

        let hits = index.nearest_by(&query, 2, |id| Some(boxes[&id].distance_to_point(&query)));
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].0, ids[20]);
        assert!((hits[0].1 - 2.0).abs() < 1e-12);
        assert_eq!(hits[1].0, ids[21]);

        // Far outside the extent still finds the closest box.
        let far = Point::new(-1000.0, 0.5);
        let hits = index.nearest_by(&far, 1, |id| Some(boxes[&id].distance_to_point(&far)));
        assert_eq!(hits[0].0, ids[0]);
    }
}
