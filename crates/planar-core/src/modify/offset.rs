use std::f64::consts::PI;

use serde::{Deserialize, Serialize};

use crate::error::{GeometryError, KernelError, Result};
use crate::geometry::{angular_tolerance, point_in_ring, signed_area, Arc, Circle, Geometry, Line, Point, Polygon, Polyline, Rectangle, Vector};

use super::infinite_intersection;

/// How offset edges are rejoined where they open a gap at a corner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinStyle {
    /// Extend both edges to their intersection, beveling past the limit.
    #[default]
    Miter,
    /// Connect with a tessellated arc around the original vertex.
    Round,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OffsetOptions {
    pub join: JoinStyle,
    /// Largest allowed ratio of miter length to offset distance.
    pub miter_limit: f64,
}

impl Default for OffsetOptions {
    fn default() -> Self {
        Self {
            join: JoinStyle::Miter,
            miter_limit: 4.0,
        }
    }
}

// Cap on segments per round join.
const MAX_ROUND_SEGMENTS: usize = 64;
const ROUND_STEP: f64 = PI / 16.0;

/// Build the parallel curve of `source` at `distance`, on the side of
/// `side_point`. A negative distance offsets to the opposite side.
pub fn offset(
    source: &Geometry,
    distance: f64,
    side_point: Point,
    options: &OffsetOptions,
    eps: f64,
) -> Result<Geometry> {
    if !distance.is_finite() || distance.abs() <= eps {
        return Err(KernelError::validation(format!(
            "offset distance must be non-zero, got {distance}"
        )));
    }
    match source {
        Geometry::Line(line) => offset_line(line, distance, side_point, eps),
        Geometry::Circle(circle) => {
            let radius = offset_radius(circle.center, circle.radius, distance, side_point, eps)?;
            Ok(Geometry::Circle(Circle::new(circle.center, radius)))
        }
        Geometry::Arc(arc) => {
            let radius = offset_radius(arc.center, arc.radius, distance, side_point, eps)?;
            Ok(Geometry::Arc(Arc { radius, ..*arc }))
        }
        Geometry::Rectangle(rect) => {
            let outward = outward_distance(&rect.corners(), distance, side_point);
            if options.join == JoinStyle::Miter {
                let r = Rectangle::new(
                    rect.lower_left.x - outward,
                    rect.lower_left.y - outward,
                    rect.upper_right.x + outward,
                    rect.upper_right.y + outward,
                );
                if r.width() <= eps || r.height() <= eps || -outward * 2.0 >= rect.width().min(rect.height()) {
                    return Err(GeometryError::Offset("inward offset collapses the rectangle".into()).into());
                }
                return Ok(Geometry::Rectangle(r));
            }
            let ring = offset_ring(&rect.corners(), outward, options, eps)?;
            Ok(Geometry::Polygon(Polygon::new(ring)))
        }
        Geometry::Polygon(poly) => {
            let outward = outward_distance(&poly.vertices, distance, side_point);
            let ring = offset_ring(&poly.vertices, outward, options, eps)?;
            Ok(Geometry::Polygon(Polygon::new(ring)))
        }
        Geometry::Polyline(pl) if pl.closed => {
            let outward = outward_distance(&pl.vertices, distance, side_point);
            let ring = offset_ring(&pl.vertices, outward, options, eps)?;
            Ok(Geometry::Polyline(Polyline::new(ring, true)))
        }
        Geometry::Polyline(pl) => offset_open_polyline(pl, distance, side_point, options, eps),
    }
}

fn offset_line(line: &Line, distance: f64, side_point: Point, eps: f64) -> Result<Geometry> {
    let dir = line
        .direction()
        .normalize()
        .ok_or_else(|| KernelError::validation("cannot offset a zero-length line"))?;
    let side = dir.cross(&(side_point - line.start));
    if side.abs() <= eps {
        return Err(GeometryError::Offset("side point lies on the source line".into()).into());
    }
    let shift = dir.perp() * (side.signum() * distance);
    Ok(Geometry::Line(Line::new(line.start + shift, line.end + shift)))
}

fn offset_radius(center: Point, radius: f64, distance: f64, side_point: Point, eps: f64) -> Result<f64> {
    let to_side = side_point.distance_to(&center);
    if (to_side - radius).abs() <= eps {
        return Err(GeometryError::Offset("side point lies on the source curve".into()).into());
    }
    let new_radius = if to_side > radius {
        radius + distance
    } else {
        radius - distance
    };
    if new_radius <= eps {
        return Err(GeometryError::Offset(format!(
            "offset leaves a non-positive radius ({new_radius})"
        ))
        .into());
    }
    Ok(new_radius)
}

/// Positive when the offset grows the ring.
fn outward_distance(ring: &[Point], distance: f64, side_point: Point) -> f64 {
    if point_in_ring(ring, &side_point) {
        -distance
    } else {
        distance
    }
}

/// Offset a closed ring outward by `outward` (negative shrinks it).
/// The result keeps counter-clockwise winding.
fn offset_ring(ring: &[Point], outward: f64, options: &OffsetOptions, eps: f64) -> Result<Vec<Point>> {
    let mut pts: Vec<Point> = ring.to_vec();
    if signed_area(&pts) < 0.0 {
        pts.reverse();
    }
    // For a counter-clockwise ring the outside is on the right.
    offset_chain(&pts, true, -outward, options, eps)
}

fn offset_open_polyline(
    pl: &Polyline,
    distance: f64,
    side_point: Point,
    options: &OffsetOptions,
    eps: f64,
) -> Result<Geometry> {
    let segments = pl.segments();
    let nearest = segments
        .iter()
        .min_by(|a, b| {
            a.distance_to_point(&side_point)
                .total_cmp(&b.distance_to_point(&side_point))
        })
        .ok_or_else(|| KernelError::validation("polyline has no segments"))?;
    let dir = nearest.direction();
    let side = dir.cross(&(side_point - nearest.closest_point(&side_point)));
    if side.abs() <= eps * dir.length() {
        return Err(GeometryError::Offset("side point lies on the source polyline".into()).into());
    }
    let points = offset_chain(&pl.vertices, false, side.signum() * distance, options, eps)?;
    Ok(Geometry::Polyline(Polyline::new(points, false)))
}

/// Offset a chain of vertices to its left by `left` (negative: right).
fn offset_chain(pts: &[Point], closed: bool, left: f64, options: &OffsetOptions, eps: f64) -> Result<Vec<Point>> {
    let n = pts.len();
    let min_vertices = if closed { 3 } else { 2 };
    if n < min_vertices {
        return Err(KernelError::validation("too few vertices to offset"));
    }
    let edge_count = if closed { n } else { n - 1 };
    let dirs: Vec<Vector> = (0..edge_count)
        .map(|i| {
            (pts[(i + 1) % n] - pts[i])
                .normalize()
                .ok_or_else(|| KernelError::validation("zero-length edge"))
        })
        .collect::<Result<_>>()?;
    let shift = |i: usize| dirs[i].perp() * left;
    let angle_tol = angular_tolerance(eps, left.abs());

    // Pure miter vertices, one per original vertex, used for the inversion
    // check and as the join for corners that close up.
    let core: Vec<Point> = (0..n)
        .map(|v| {
            let (prev, next) = match (closed, v) {
                (false, 0) => return pts[0] + shift(0),
                (false, v) if v == n - 1 => return pts[v] + shift(v - 1),
                (_, 0) => (edge_count - 1, 0),
                (_, v) => (v - 1, v),
            };
            infinite_intersection(pts[v] + shift(prev), dirs[prev], pts[v] + shift(next), dirs[next], angle_tol)
                .unwrap_or(pts[v] + shift(next))
        })
        .collect();

    for i in 0..edge_count {
        let a = core[i];
        let b = core[(i + 1) % n];
        if (b - a).dot(&dirs[i]) <= eps {
            return Err(GeometryError::Offset(format!(
                "offset distance {} inverts edge {i}",
                left.abs()
            ))
            .into());
        }
    }

    let mut out = Vec::with_capacity(n);
    for v in 0..n {
        let interior = closed || (v > 0 && v < n - 1);
        if !interior {
            out.push(core[v]);
            continue;
        }
        let prev = if v == 0 { edge_count - 1 } else { v - 1 };
        let next = v % edge_count;
        let turn = dirs[prev].cross(&dirs[next]);
        let opens_gap = turn * left < 0.0 && turn.abs() > angle_tol.sin();
        if !opens_gap {
            out.push(core[v]);
            continue;
        }
        let (n1, n2) = (shift(prev), shift(next));
        match options.join {
            JoinStyle::Miter => {
                if core[v].distance_to(&pts[v]) <= options.miter_limit * left.abs() {
                    out.push(core[v]);
                } else {
                    out.push(pts[v] + n1);
                    out.push(pts[v] + n2);
                }
            }
            JoinStyle::Round => {
                let sweep = n1.cross(&n2).atan2(n1.dot(&n2));
                let steps = ((sweep.abs() / ROUND_STEP).ceil() as usize).clamp(1, MAX_ROUND_SEGMENTS);
                for k in 0..=steps {
                    out.push(pts[v] + n1.rotate(sweep * k as f64 / steps as f64));
                }
            }
        }
    }
    Ok(out)
}
