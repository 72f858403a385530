//! Modification engine: trim, extend, offset, fillet and chamfer.
//!
//! Everything here is a pure function of its inputs. The document resolves
//! entity ids and boundary lookups, calls into this module, and wraps the
//! returned geometry in an undoable command.

mod corner;
mod extend;
mod offset;
mod trim;

pub use corner::{chamfer, fillet, ChamferResult, FilletResult};
pub use extend::extend;
pub use offset::{offset, JoinStyle, OffsetOptions};
pub use trim::{trim, TrimResult};

use crate::geometry::{Geometry, Point, Vector};
use crate::intersect::Curve;

/// Flatten the outlines of all boundary geometries.
pub(crate) fn boundary_curves(boundaries: &[Geometry]) -> Vec<Curve> {
    boundaries.iter().flat_map(Curve::pieces).collect()
}

/// Intersection of the infinite lines `p1 + s*d1` and `p2 + u*d2`. Lines
/// meeting at less than `angle_tol` radians count as parallel.
pub(crate) fn infinite_intersection(p1: Point, d1: Vector, p2: Point, d2: Vector, angle_tol: f64) -> Option<Point> {
    let denom = d1.cross(&d2);
    let scale = d1.length() * d2.length();
    if scale == 0.0 || (denom / scale).abs() <= angle_tol.sin() {
        return None;
    }
    let s = (p2 - p1).cross(&d2) / denom;
    Some(p1 + d1 * s)
}
