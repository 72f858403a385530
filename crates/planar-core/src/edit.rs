//! Modification operations on stored entities.
//!
//! Each operation resolves ids, runs the pure algorithm from [`crate::modify`]
//! and commits the outcome as one command, so a failure anywhere leaves the
//! document untouched.

use std::collections::HashSet;

use crate::commands::{Change, Command, CommandKind};
use crate::document::{claim, Document};
use crate::entity::{Entity, EntityId};
use crate::error::{KernelError, Result};
use crate::geometry::{Geometry, Line, Point};
use crate::modify::{self, OffsetOptions, TrimResult};
use crate::transform::Transform2D;

impl Document {
    fn line_of(&self, id: EntityId) -> Result<(Entity, Line)> {
        let entity = self.entity_or_err(id)?;
        match entity.geometry() {
            Geometry::Line(line) => Ok((entity.clone(), *line)),
            other => Err(KernelError::validation(format!(
                "entity {id} is a {}, expected a line",
                other.kind()
            ))),
        }
    }

    /// Boundary geometries for trim/extend. An empty id list means every
    /// entity whose box touches the target's box.
    fn boundary_geometries(&self, target: &Entity, boundaries: &[EntityId], reach: f64) -> Result<Vec<Geometry>> {
        if boundaries.is_empty() {
            let window = target.bbox().expand(reach + self.epsilon());
            return Ok(self
                .select_crossing(&window)
                .into_iter()
                .filter(|e| e.id != target.id)
                .map(|e| e.geometry().clone())
                .collect());
        }
        boundaries
            .iter()
            .filter(|id| **id != target.id)
            .map(|id| self.entity_or_err(*id).map(|e| e.geometry().clone()))
            .collect()
    }

    /// Cut the piece of `target` containing `click` back to the nearest
    /// boundaries. Returns the ids of the remaining pieces; a split adds a
    /// second entity on the same layer.
    pub fn trim(&mut self, target: EntityId, boundaries: &[EntityId], click: Point) -> Result<Vec<EntityId>> {
        let before = self.entity_or_err(target)?.clone();
        self.check_editable(&before)?;
        let geometries = self.boundary_geometries(&before, boundaries, 0.0)?;
        let eps = self.epsilon();

        let mut after = before.clone();
        let mut changes = Vec::with_capacity(2);
        let mut ids = vec![target];
        match modify::trim(before.geometry(), &geometries, click, eps)? {
            TrimResult::Shortened(g) => {
                after.set_geometry(g);
                changes.push(Change::modified(before, after));
            }
            TrimResult::Split(first, second) => {
                let piece = before.derive(second);
                ids.push(piece.id);
                after.set_geometry(first);
                changes.push(Change::modified(before, after));
                changes.push(Change::created(piece));
            }
        }
        self.commit(Command::new(CommandKind::Trim, "Trim", changes))?;
        Ok(ids)
    }

    /// Lengthen a line or arc to the nearest boundary within
    /// `max_distance` (the document default when `None`).
    pub fn extend(
        &mut self,
        target: EntityId,
        boundaries: &[EntityId],
        max_distance: Option<f64>,
        pick: Option<Point>,
    ) -> Result<Entity> {
        let before = self.entity_or_err(target)?.clone();
        self.check_editable(&before)?;
        let max_distance = max_distance.unwrap_or(self.settings().default_extend_distance);
        let geometries = self.boundary_geometries(&before, boundaries, max_distance)?;
        let extended = modify::extend(before.geometry(), &geometries, max_distance, pick, self.epsilon())?;

        let mut after = before.clone();
        after.set_geometry(extended);
        self.commit(Command::new(
            CommandKind::Extend,
            "Extend",
            vec![Change::modified(before, after.clone())],
        ))?;
        Ok(after)
    }

    /// Create the parallel of `source` on the side of `side_point`. The
    /// source itself is not changed.
    pub fn offset(
        &mut self,
        source: EntityId,
        distance: f64,
        side_point: Point,
        options: &OffsetOptions,
    ) -> Result<Entity> {
        let original = self.entity_or_err(source)?;
        self.check_layer_editable(original.layer_id)?;
        let geometry = modify::offset(original.geometry(), distance, side_point, options, self.epsilon())?;
        self.validate_geometry(&geometry)?;
        let created = original.derive(geometry);
        self.commit(Command::new(
            CommandKind::Offset,
            format!("Offset {}", created.kind()),
            vec![Change::created(created.clone())],
        ))?;
        Ok(created)
    }

    fn corner_lines(&self, a: EntityId, b: EntityId, trim: bool) -> Result<((Entity, Line), (Entity, Line))> {
        if a == b {
            return Err(KernelError::validation("a corner needs two different entities"));
        }
        let first = self.line_of(a)?;
        let second = self.line_of(b)?;
        if trim {
            self.check_editable(&first.0)?;
            self.check_editable(&second.0)?;
        } else {
            self.check_layer_editable(first.0.layer_id)?;
        }
        Ok((first, second))
    }

    fn commit_corner(
        &mut self,
        kind: CommandKind,
        piece: Entity,
        trimmed: Option<[(Entity, Line); 2]>,
    ) -> Result<EntityId> {
        let id = piece.id;
        let mut changes = vec![Change::created(piece)];
        for (before, line) in trimmed.into_iter().flatten() {
            let mut after = before.clone();
            after.set_geometry(Geometry::Line(line));
            changes.push(Change::modified(before, after));
        }
        self.commit(Command::new(kind, kind.as_str(), changes))?;
        Ok(id)
    }

    /// Round the corner between two lines. The arc is created on the first
    /// line's layer. With `trim` both lines end at the tangent points.
    pub fn fillet(&mut self, a: EntityId, b: EntityId, radius: f64, trim: bool) -> Result<EntityId> {
        let ((ea, la), (eb, lb)) = self.corner_lines(a, b, trim)?;
        let result = modify::fillet(&la, &lb, radius, self.epsilon())?;
        let arc = ea.derive(Geometry::Arc(result.arc));
        let trimmed = trim.then(|| [(ea, result.first), (eb, result.second)]);
        self.commit_corner(CommandKind::Fillet, arc, trimmed)
    }

    /// Bevel the corner between two lines with a new line.
    pub fn chamfer(&mut self, a: EntityId, b: EntityId, dist_a: f64, dist_b: f64, trim: bool) -> Result<EntityId> {
        let ((ea, la), (eb, lb)) = self.corner_lines(a, b, trim)?;
        let result = modify::chamfer(&la, &lb, dist_a, dist_b, self.epsilon())?;
        let bevel = ea.derive(Geometry::Line(result.line));
        let trimmed = trim.then(|| [(ea, result.first), (eb, result.second)]);
        self.commit_corner(CommandKind::Chamfer, bevel, trimmed)
    }

    /// Apply `t` to every listed entity as one undo step. Each id succeeds
    /// or fails on its own; results are in input order and hold the moved
    /// entity.
    pub fn transform_entities(&mut self, ids: &[EntityId], t: &Transform2D) -> Vec<Result<Entity>> {
        let mut seen = HashSet::with_capacity(ids.len());
        let mut changes = Vec::with_capacity(ids.len());
        let mut results: Vec<Result<Entity>> = ids
            .iter()
            .map(|id| {
                claim(&mut seen, *id)?;
                let before = self.entity_or_err(*id)?;
                self.check_editable(before)?;
                let geometry = t.apply_geometry(before.geometry()).normalized();
                self.validate_geometry(&geometry)?;
                let mut after = before.clone();
                after.set_geometry(geometry);
                changes.push(Change::modified(before.clone(), after.clone()));
                Ok(after)
            })
            .collect();
        let description = format!("Transform {} entities", changes.len());
        self.commit_batch(CommandKind::Transform, description, changes, &mut results);
        results
    }

    /// Create transformed copies of the listed entities as one undo step.
    /// Results are in input order and hold the new copies.
    pub fn copy_entities(&mut self, ids: &[EntityId], t: &Transform2D) -> Vec<Result<Entity>> {
        let mut changes = Vec::with_capacity(ids.len());
        let mut results: Vec<Result<Entity>> = ids
            .iter()
            .map(|id| {
                let source = self.entity_or_err(*id)?;
                self.check_layer_editable(source.layer_id)?;
                let geometry = t.apply_geometry(source.geometry()).normalized();
                self.validate_geometry(&geometry)?;
                let copy = source.derive(geometry);
                changes.push(Change::created(copy.clone()));
                Ok(copy)
            })
            .collect();
        let description = format!("Copy {} entities", changes.len());
        self.commit_batch(CommandKind::Copy, description, changes, &mut results);
        results
    }
}

#[cfg(test)]
mod tests {
    use crate::document::Document;
    use crate::entity::{EntityId, Properties};
    use crate::error::{GeometryError, KernelError};
    use crate::geometry::{Arc, ArcDirection, Circle, Geometry, Line, Point, Rectangle};
    use crate::modify::OffsetOptions;
    use crate::transform::Transform2D;
    use std::f64::consts::FRAC_PI_2;

    fn line(x0: f64, y0: f64, x1: f64, y1: f64) -> Geometry {
        Geometry::Line(Line::new(Point::new(x0, y0), Point::new(x1, y1)))
    }

    fn add(doc: &mut Document, g: Geometry) -> EntityId {
        let layer = doc.current_layer();
        doc.create_entity(g, layer, Properties::new()).unwrap().id
    }

    fn line_of(doc: &Document, id: EntityId) -> Line {
        match doc.get_entity(id).unwrap().geometry() {
            Geometry::Line(l) => *l,
            other => panic!("expected a line, got {other:?}"),
        }
    }

    #[test]
    fn test_trim_line_at_boundary() {
        let mut doc = Document::new("test");
        let target = add(&mut doc, line(0.0, 0.0, 10.0, 0.0));
        let boundary = add(&mut doc, line(5.0, -5.0, 5.0, 5.0));

        let ids = doc.trim(target, &[boundary], Point::new(7.0, 0.0)).unwrap();
        assert_eq!(ids, vec![target]);
        let l = line_of(&doc, target);
        assert!(l.start.approx_eq(&Point::new(0.0, 0.0), 1e-12));
        assert!(l.end.approx_eq(&Point::new(5.0, 0.0), 1e-12));
        assert_eq!(doc.indexed_bbox(target), Some(doc.get_entity(target).unwrap().bbox()));

        doc.undo().unwrap();
        assert!((line_of(&doc, target).length() - 10.0).abs() < 1e-12);
    }

    #[test]
    fn test_trim_without_intersection_leaves_target() {
        let mut doc = Document::new("test");
        let target = add(&mut doc, line(0.0, 0.0, 10.0, 0.0));
        let far = add(&mut doc, line(50.0, -5.0, 50.0, 5.0));
        let depth = doc.history().undo_depth();

        let err = doc.trim(target, &[far], Point::new(7.0, 0.0)).unwrap_err();
        assert_eq!(err, KernelError::Geometry(GeometryError::NoIntersection));
        assert!((line_of(&doc, target).length() - 10.0).abs() < 1e-12);
        assert_eq!(doc.history().undo_depth(), depth);
    }

    #[test]
    fn test_trim_interior_splits() {
        let mut doc = Document::new("test");
        let target = add(&mut doc, line(0.0, 0.0, 10.0, 0.0));
        add(&mut doc, line(3.0, -1.0, 3.0, 1.0));
        add(&mut doc, line(7.0, -1.0, 7.0, 1.0));

        // No explicit boundaries: every crossing entity is used.
        let ids = doc.trim(target, &[], Point::new(5.0, 0.0)).unwrap();
        assert_eq!(ids.len(), 2);
        assert_eq!(doc.entity_count(), 4);
        let first = line_of(&doc, ids[0]);
        let second = line_of(&doc, ids[1]);
        assert!((first.length() - 3.0).abs() < 1e-12);
        assert!((second.length() - 3.0).abs() < 1e-12);
        assert_eq!(
            doc.get_entity(ids[1]).unwrap().layer_id,
            doc.get_entity(ids[0]).unwrap().layer_id
        );

        doc.undo().unwrap();
        assert_eq!(doc.entity_count(), 3);
        doc.check_consistency().unwrap();
    }

    #[test]
    fn test_extend_to_boundary() {
        let mut doc = Document::new("test");
        let target = add(&mut doc, line(0.0, 0.0, 4.0, 0.0));
        let boundary = add(&mut doc, line(10.0, -5.0, 10.0, 5.0));

        let e = doc.extend(target, &[boundary], Some(100.0), None).unwrap();
        let Geometry::Line(l) = e.geometry() else {
            panic!("expected a line");
        };
        assert!(l.end.approx_eq(&Point::new(10.0, 0.0), 1e-12));

        let err = doc.extend(target, &[boundary], Some(1.0), None).unwrap_err();
        assert_eq!(err, KernelError::Geometry(GeometryError::NoIntersection));
    }

    #[test]
    fn test_extend_uses_default_distance() {
        let mut doc = Document::new("test");
        let target = add(&mut doc, line(0.0, 0.0, 1.0, 0.0));
        add(&mut doc, line(500.0, -5.0, 500.0, 5.0));
        let e = doc.extend(target, &[], None, Some(Point::new(1.0, 0.0))).unwrap();
        let Geometry::Line(l) = e.geometry() else {
            panic!("expected a line");
        };
        assert!((l.length() - 500.0).abs() < 1e-9);
    }

    #[test]
    fn test_offset_creates_new_entity() {
        let mut doc = Document::new("test");
        let src = add(&mut doc, Geometry::Circle(Circle::new(Point::ORIGIN, 5.0)));
        let out = doc
            .offset(src, 2.0, Point::new(10.0, 0.0), &OffsetOptions::default())
            .unwrap();
        assert_ne!(out.id, src);
        match out.geometry() {
            Geometry::Circle(c) => assert!((c.radius - 7.0).abs() < 1e-12),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(doc.entity_count(), 2);

        let err = doc
            .offset(src, 6.0, Point::new(1.0, 0.0), &OffsetOptions::default())
            .unwrap_err();
        assert!(matches!(err, KernelError::Geometry(GeometryError::Offset(_))));
        assert_eq!(doc.entity_count(), 2);
    }

    #[test]
    fn test_fillet_trim_mode() {
        let mut doc = Document::new("test");
        let a = add(&mut doc, line(0.0, 0.0, 10.0, 0.0));
        let b = add(&mut doc, line(10.0, 0.0, 10.0, 10.0));

        let arc_id = doc.fillet(a, b, 2.0, true).unwrap();
        let Geometry::Arc(arc) = doc.get_entity(arc_id).unwrap().geometry().clone() else {
            panic!("expected an arc");
        };
        assert!((arc.radius - 2.0).abs() < 1e-12);
        assert!(arc.center.approx_eq(&Point::new(8.0, 2.0), 1e-12));
        assert!((line_of(&doc, a).length() - 8.0).abs() < 1e-12);
        assert!((line_of(&doc, b).length() - 8.0).abs() < 1e-12);

        // One undo reverts the arc and both trims.
        doc.undo().unwrap();
        assert!(doc.get_entity(arc_id).is_none());
        assert!((line_of(&doc, a).length() - 10.0).abs() < 1e-12);
    }

    #[test]
    fn test_fillet_without_trim_and_failures() {
        let mut doc = Document::new("test");
        let a = add(&mut doc, line(0.0, 0.0, 10.0, 0.0));
        let b = add(&mut doc, line(10.0, 0.0, 10.0, 10.0));
        let c = add(&mut doc, line(0.0, 5.0, 10.0, 5.0));
        let circle = add(&mut doc, Geometry::Circle(Circle::new(Point::ORIGIN, 1.0)));

        doc.fillet(a, b, 2.0, false).unwrap();
        assert!((line_of(&doc, a).length() - 10.0).abs() < 1e-12);

        assert_eq!(
            doc.fillet(a, c, 1.0, true).unwrap_err(),
            KernelError::Geometry(GeometryError::Parallel)
        );
        assert!(matches!(
            doc.fillet(a, b, 50.0, true),
            Err(KernelError::Geometry(GeometryError::Infeasible { .. }))
        ));
        assert!(matches!(doc.fillet(a, circle, 1.0, true), Err(KernelError::Validation(_))));
        assert!(matches!(doc.fillet(a, a, 1.0, true), Err(KernelError::Validation(_))));
    }

    #[test]
    fn test_chamfer_trim_mode() {
        let mut doc = Document::new("test");
        let a = add(&mut doc, line(0.0, 0.0, 10.0, 0.0));
        let b = add(&mut doc, line(10.0, 0.0, 10.0, 10.0));
        let bevel = doc.chamfer(a, b, 2.0, 2.0, true).unwrap();
        let l = line_of(&doc, bevel);
        assert!((l.length() - 8.0_f64.sqrt()).abs() < 1e-12);
        assert!((line_of(&doc, a).length() - 8.0).abs() < 1e-12);
        assert!((line_of(&doc, b).length() - 8.0).abs() < 1e-12);
    }

    #[test]
    fn test_transform_and_copy() {
        let mut doc = Document::new("test");
        let l = add(&mut doc, line(0.0, 0.0, 1.0, 0.0));
        let arc = add(&mut doc, Geometry::Arc(Arc::ccw(Point::new(3.0, 0.0), 1.0, 0.0, FRAC_PI_2)));

        let moved = doc.transform_entities(&[l, arc], &Transform2D::translate(0.0, 10.0));
        assert!(moved.iter().all(|r| r.is_ok()));
        assert!(line_of(&doc, l).start.approx_eq(&Point::new(0.0, 10.0), 1e-12));
        assert_eq!(doc.history().undo_depth(), 3);

        let axis = Line::new(Point::ORIGIN, Point::new(0.0, 1.0));
        let copies = doc.copy_entities(&[arc], &Transform2D::mirror(&axis));
        assert_eq!(doc.entity_count(), 3);
        let copy = copies[0].as_ref().unwrap().id;
        let Geometry::Arc(m) = doc.get_entity(copy).unwrap().geometry().clone() else {
            panic!("expected an arc");
        };
        assert_eq!(m.direction, ArcDirection::Clockwise);

        doc.undo().unwrap();
        doc.undo().unwrap();
        assert_eq!(doc.entity_count(), 2);
        assert!(line_of(&doc, l).start.approx_eq(&Point::ORIGIN, 1e-12));
    }

    #[test]
    fn test_transform_respects_locks() {
        let mut doc = Document::new("test");
        let r = add(&mut doc, Geometry::Rectangle(Rectangle::new(0.0, 0.0, 2.0, 1.0)));
        let l = add(&mut doc, line(0.0, 0.0, 1.0, 0.0));
        doc.update_entity(l, crate::entity::EntityUpdate::default().with_locked(true))
            .unwrap();
        let missing = EntityId::new();
        let results = doc.transform_entities(&[r, l, missing], &Transform2D::translate(1.0, 1.0));
        assert!(results[0].is_ok());
        assert!(matches!(results[1], Err(KernelError::Validation(_))));
        assert!(matches!(results[2], Err(KernelError::NotFound { .. })));

        // Only the rectangle moved; the locked line kept its place.
        assert!(line_of(&doc, l).start.approx_eq(&Point::ORIGIN, 1e-12));
        let Geometry::Rectangle(moved) = doc.get_entity(r).unwrap().geometry().clone() else {
            panic!("expected a rectangle");
        };
        assert!(moved.lower_left.approx_eq(&Point::new(1.0, 1.0), 1e-12));
        doc.check_consistency().unwrap();
    }

    #[test]
    fn test_copy_reports_per_item() {
        let mut doc = Document::new("test");
        let a = add(&mut doc, line(0.0, 0.0, 1.0, 0.0));
        let depth = doc.history().undo_depth();
        let results = doc.copy_entities(&[a, EntityId::new(), a], &Transform2D::translate(0.0, 5.0));
        assert!(results[0].is_ok());
        assert!(results[1].is_err());
        assert!(results[2].is_ok());
        assert_eq!(doc.entity_count(), 3);
        assert_eq!(doc.history().undo_depth(), depth + 1);
        doc.undo().unwrap();
        assert_eq!(doc.entity_count(), 1);
    }

    #[test]
    fn test_rotated_arc_stays_normalized() {
        let mut doc = Document::new("test");
        let arc = add(&mut doc, Geometry::Arc(Arc::ccw(Point::ORIGIN, 1.0, 0.0, FRAC_PI_2)));
        let results = doc.transform_entities(&[arc], &Transform2D::rotate(-FRAC_PI_2, Point::ORIGIN));
        let Geometry::Arc(a) = results[0].as_ref().unwrap().geometry().clone() else {
            panic!("expected an arc");
        };
        assert!((0.0..std::f64::consts::TAU).contains(&a.start_angle));
        assert!((0.0..std::f64::consts::TAU).contains(&a.end_angle));
    }
}
