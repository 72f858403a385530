//! Intersection routines.
//!
//! Every entity decomposes into [`Curve`] pieces (segments, circles, arcs).
//! The two workhorses are `line_params`, which reports where an infinite
//! line meets a bounded curve, and `circle_angles`, which does the same for
//! a full circle. Point intersections and the trim/extend engine are built on
//! top of them. Disjoint inputs produce empty results, never errors.

use std::f64::consts::PI;

use crate::error::{KernelError, Result};
use crate::geometry::{normalize_angle, Arc, BBox, Circle, Geometry, Line, Point, Vector};

/// A primitive piece of an entity's outline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Curve {
    Line(Line),
    Circle(Circle),
    Arc(Arc),
}

impl Curve {
    /// Decompose a geometry into the curves that make up its outline.
    pub fn pieces(geometry: &Geometry) -> Vec<Curve> {
        match geometry {
            Geometry::Circle(c) => vec![Curve::Circle(*c)],
            Geometry::Arc(a) => vec![Curve::Arc(*a)],
            other => other.segments().into_iter().map(Curve::Line).collect(),
        }
    }

    fn anchor(&self) -> Point {
        match self {
            Curve::Line(l) => l.start,
            Curve::Circle(c) => c.point_at_angle(0.0),
            Curve::Arc(a) => a.start_point(),
        }
    }
}

/// Parameters `t` at which the infinite line `origin + t * dir` meets `curve`.
///
/// The curve is bounded by its own extent; the line is not. Parallel and
/// coincident segments yield nothing.
pub(crate) fn line_params(origin: Point, dir: Vector, curve: &Curve, eps: f64) -> Vec<f64> {
    let len = dir.length();
    if len == 0.0 {
        return Vec::new();
    }
    match curve {
        Curve::Line(seg) => {
            let d2 = seg.direction();
            let len2 = d2.length();
            if len2 == 0.0 {
                return Vec::new();
            }
            let denom = dir.cross(&d2);
            // Treat as parallel when the directions drift apart by less than
            // eps over the longer of the two lengths.
            if denom.abs() / (len * len2) * len.max(len2) <= eps {
                return Vec::new();
            }
            let w = seg.start - origin;
            let t = w.cross(&d2) / denom;
            let u = w.cross(&dir) / denom;
            let tol = eps / len2;
            if u >= -tol && u <= 1.0 + tol {
                vec![t]
            } else {
                Vec::new()
            }
        }
        Curve::Circle(c) => circle_hits(origin, dir, c.center, c.radius, eps),
        Curve::Arc(a) => circle_hits(origin, dir, a.center, a.radius, eps)
            .into_iter()
            .filter(|t| a.contains_angle((origin + dir * *t).angle_from(&a.center), eps))
            .collect(),
    }
}

/// Parameters where an infinite line meets a full circle: 0, 1 (tangent) or 2.
fn circle_hits(origin: Point, dir: Vector, center: Point, radius: f64, eps: f64) -> Vec<f64> {
    let len2 = dir.length_squared();
    let t0 = (center - origin).dot(&dir) / len2;
    let foot = origin + dir * t0;
    let h = foot.distance_to(&center);
    if h > radius + eps {
        return Vec::new();
    }
    if (h - radius).abs() <= eps {
        return vec![t0];
    }
    let half = (radius * radius - h * h).sqrt() / len2.sqrt();
    vec![t0 - half, t0 + half]
}

/// Angles on the full circle `(center, radius)` at which it meets `curve`.
pub(crate) fn circle_angles(center: Point, radius: f64, curve: &Curve, eps: f64) -> Vec<f64> {
    match curve {
        Curve::Line(seg) => {
            let d = seg.direction();
            let len = d.length();
            if len == 0.0 {
                return Vec::new();
            }
            let tol = eps / len;
            circle_hits(seg.start, d, center, radius, eps)
                .into_iter()
                .filter(|t| *t >= -tol && *t <= 1.0 + tol)
                .map(|t| (seg.start + d * t).angle_from(&center))
                .collect()
        }
        Curve::Circle(c) => two_circle_angles(center, radius, c.center, c.radius, eps),
        Curve::Arc(a) => {
            let circle = Circle::new(center, radius);
            two_circle_angles(center, radius, a.center, a.radius, eps)
                .into_iter()
                .filter(|angle| {
                    let p = circle.point_at_angle(*angle);
                    a.contains_angle(p.angle_from(&a.center), eps)
                })
                .collect()
        }
    }
}

/// Radical-line solution for two circles, as angles on the first one.
fn two_circle_angles(c1: Point, r1: f64, c2: Point, r2: f64, eps: f64) -> Vec<f64> {
    let v = c2 - c1;
    let d = v.length();
    if d <= eps {
        // Concentric, including coincident circles.
        return Vec::new();
    }
    if d > r1 + r2 + eps || d < (r1 - r2).abs() - eps {
        return Vec::new();
    }
    let base = v.angle();
    // Signed distance from c1 to the radical line, along v.
    let a = (r1 * r1 - r2 * r2 + d * d) / (2.0 * d);
    let tangent = (d - (r1 + r2)).abs() <= eps || (d - (r1 - r2).abs()).abs() <= eps;
    if tangent {
        let angle = if a >= 0.0 { base } else { base + PI };
        return vec![normalize_angle(angle)];
    }
    let delta = (a / r1).clamp(-1.0, 1.0).acos();
    vec![normalize_angle(base - delta), normalize_angle(base + delta)]
}

/// Points where curve `a` meets curve `b`, both bounded.
pub(crate) fn curve_points(a: &Curve, b: &Curve, eps: f64) -> Vec<Point> {
    match a {
        Curve::Line(l) => {
            let len = l.length();
            if len == 0.0 {
                return Vec::new();
            }
            let tol = eps / len;
            line_params(l.start, l.direction(), b, eps)
                .into_iter()
                .filter(|t| *t >= -tol && *t <= 1.0 + tol)
                .map(|t| l.point_at(t))
                .collect()
        }
        Curve::Circle(c) => circle_angles(c.center, c.radius, b, eps)
            .into_iter()
            .map(|angle| c.point_at_angle(angle))
            .collect(),
        Curve::Arc(arc) => circle_angles(arc.center, arc.radius, b, eps)
            .into_iter()
            .filter(|angle| arc.contains_angle(*angle, eps))
            .map(|angle| arc.point_at_angle(angle))
            .collect(),
    }
}

fn dedup_points(points: Vec<Point>, eps: f64) -> Vec<Point> {
    let mut out: Vec<Point> = Vec::with_capacity(points.len());
    for p in points {
        if !out.iter().any(|q| q.approx_eq(&p, eps)) {
            out.push(p);
        }
    }
    out
}

fn check_radius(radius: f64) -> Result<()> {
    if radius > 0.0 && radius.is_finite() {
        Ok(())
    } else {
        Err(KernelError::validation(format!(
            "radius must be positive, got {radius}"
        )))
    }
}

/// Point intersection of two segments. Parallel or coincident segments have
/// none; use [`overlap_line_line`] for shared stretches.
pub fn line_line(a: &Line, b: &Line, eps: f64) -> Option<Point> {
    curve_points(&Curve::Line(*a), &Curve::Line(*b), eps)
        .into_iter()
        .next()
}

/// The shared stretch of two collinear segments, if it has positive length.
pub fn overlap_line_line(a: &Line, b: &Line, eps: f64) -> Option<Line> {
    let dir = a.direction().normalize()?;
    let off_line = |p: &Point| dir.cross(&(*p - a.start)).abs() > eps;
    if off_line(&b.start) || off_line(&b.end) {
        return None;
    }
    let (tb0, tb1) = (a.param_of(&b.start), a.param_of(&b.end));
    let lo = tb0.min(tb1).max(0.0);
    let hi = tb0.max(tb1).min(1.0);
    if (hi - lo) * a.length() <= eps {
        return None;
    }
    Some(Line::new(a.point_at(lo), a.point_at(hi)))
}

pub fn line_circle(line: &Line, circle: &Circle, eps: f64) -> Result<Vec<Point>> {
    check_radius(circle.radius)?;
    Ok(curve_points(&Curve::Line(*line), &Curve::Circle(*circle), eps))
}

pub fn line_arc(line: &Line, arc: &Arc, eps: f64) -> Result<Vec<Point>> {
    check_radius(arc.radius)?;
    Ok(curve_points(&Curve::Line(*line), &Curve::Arc(*arc), eps))
}

pub fn circle_circle(a: &Circle, b: &Circle, eps: f64) -> Result<Vec<Point>> {
    check_radius(a.radius)?;
    check_radius(b.radius)?;
    Ok(curve_points(&Curve::Circle(*a), &Curve::Circle(*b), eps))
}

pub fn circle_arc(circle: &Circle, arc: &Arc, eps: f64) -> Result<Vec<Point>> {
    check_radius(circle.radius)?;
    check_radius(arc.radius)?;
    Ok(curve_points(&Curve::Circle(*circle), &Curve::Arc(*arc), eps))
}

pub fn arc_arc(a: &Arc, b: &Arc, eps: f64) -> Result<Vec<Point>> {
    check_radius(a.radius)?;
    check_radius(b.radius)?;
    Ok(curve_points(&Curve::Arc(*a), &Curve::Arc(*b), eps))
}

/// All point intersections between two entity geometries.
pub fn intersect(a: &Geometry, b: &Geometry, eps: f64) -> Result<Vec<Point>> {
    for g in [a, b] {
        match g {
            Geometry::Circle(c) => check_radius(c.radius)?,
            Geometry::Arc(arc) => check_radius(arc.radius)?,
            _ => {}
        }
    }
    let pieces_b = Curve::pieces(b);
    let mut points = Vec::new();
    for pa in Curve::pieces(a) {
        for pb in &pieces_b {
            points.extend(curve_points(&pa, pb, eps));
        }
    }
    Ok(dedup_points(points, eps))
}

/// True when the segments share at least one point, including collinear
/// overlap and endpoint contact.
pub(crate) fn segments_touch(a: &Line, b: &Line, eps: f64) -> bool {
    line_line(a, b, eps).is_some()
        || a.distance_to_point(&b.start) <= eps
        || a.distance_to_point(&b.end) <= eps
        || b.distance_to_point(&a.start) <= eps
        || b.distance_to_point(&a.end) <= eps
}

/// True when the outline of `geometry` touches the rectangle `rect`
/// (crossing-selection semantics).
pub fn intersects_rect(geometry: &Geometry, rect: &BBox, eps: f64) -> bool {
    let bbox = geometry.bbox();
    if !bbox.intersects(rect) {
        return false;
    }
    if rect.contains_bbox(&bbox) {
        return true;
    }
    let pieces = Curve::pieces(geometry);
    if pieces.iter().any(|c| rect.contains_point(&c.anchor())) {
        return true;
    }
    let [p0, p1, p2, p3] = rect.corners();
    let edges = [
        Curve::Line(Line::new(p0, p1)),
        Curve::Line(Line::new(p1, p2)),
        Curve::Line(Line::new(p2, p3)),
        Curve::Line(Line::new(p3, p0)),
    ];
    pieces
        .iter()
        .any(|c| edges.iter().any(|e| !curve_points(c, e, eps).is_empty()))
}

impl Geometry {
    /// Crossing-selection test; see [`intersects_rect`].
    pub fn intersects_rect(&self, rect: &BBox, eps: f64) -> bool {
        intersects_rect(self, rect, eps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{ArcDirection, Polyline};
    use std::f64::consts::FRAC_PI_2;

    const EPS: f64 = 1e-9;

    fn contains(points: &[Point], p: Point) -> bool {
        points.iter().any(|q| q.approx_eq(&p, 1e-9))
    }

    #[test]
    fn test_line_line_crossing() {
        let a = Line::new(Point::new(0.0, 0.0), Point::new(10.0, 0.0));
        let b = Line::new(Point::new(5.0, -5.0), Point::new(5.0, 5.0));
        let p = line_line(&a, &b, EPS).unwrap();
        assert!(p.approx_eq(&Point::new(5.0, 0.0), 1e-12));
    }

    #[test]
    fn test_line_line_disjoint_and_parallel() {
        let a = Line::new(Point::new(0.0, 0.0), Point::new(10.0, 0.0));
        let short = Line::new(Point::new(5.0, 1.0), Point::new(5.0, 5.0));
        assert!(line_line(&a, &short, EPS).is_none());
        let parallel = Line::new(Point::new(0.0, 1.0), Point::new(10.0, 1.0));
        assert!(line_line(&a, &parallel, EPS).is_none());
    }

    #[test]
    fn test_coincident_lines_are_overlap_not_point() {
        let a = Line::new(Point::new(0.0, 0.0), Point::new(10.0, 0.0));
        let b = Line::new(Point::new(12.0, 0.0), Point::new(4.0, 0.0));
        assert!(line_line(&a, &b, EPS).is_none());
        let overlap = overlap_line_line(&a, &b, EPS).unwrap();
        assert!(overlap.start.approx_eq(&Point::new(4.0, 0.0), 1e-12));
        assert!(overlap.end.approx_eq(&Point::new(10.0, 0.0), 1e-12));

        let touching = Line::new(Point::new(10.0, 0.0), Point::new(20.0, 0.0));
        assert!(overlap_line_line(&a, &touching, EPS).is_none());
    }

    #[test]
    fn test_circle_line_scenario() {
        let circle = Circle::new(Point::ORIGIN, 5.0);
        let line = Line::new(Point::new(-10.0, 0.0), Point::new(10.0, 0.0));
        let points = line_circle(&line, &circle, EPS).unwrap();
        assert_eq!(points.len(), 2);
        assert!(contains(&points, Point::new(-5.0, 0.0)));
        assert!(contains(&points, Point::new(5.0, 0.0)));
    }

    #[test]
    fn test_line_tangent_to_circle() {
        let circle = Circle::new(Point::ORIGIN, 5.0);
        let line = Line::new(Point::new(-10.0, 5.0), Point::new(10.0, 5.0));
        let points = line_circle(&line, &circle, EPS).unwrap();
        assert_eq!(points.len(), 1);
        assert!(contains(&points, Point::new(0.0, 5.0)));

        let miss = Line::new(Point::new(-10.0, 6.0), Point::new(10.0, 6.0));
        assert!(line_circle(&miss, &circle, EPS).unwrap().is_empty());
    }

    #[test]
    fn test_circle_circle_cases() {
        let a = Circle::new(Point::ORIGIN, 5.0);

        let two = circle_circle(&a, &Circle::new(Point::new(6.0, 0.0), 5.0), EPS).unwrap();
        assert_eq!(two.len(), 2);
        assert!(contains(&two, Point::new(3.0, 4.0)));
        assert!(contains(&two, Point::new(3.0, -4.0)));

        let external = circle_circle(&a, &Circle::new(Point::new(8.0, 0.0), 3.0), EPS).unwrap();
        assert_eq!(external.len(), 1);
        assert!(contains(&external, Point::new(5.0, 0.0)));

        let internal = circle_circle(&a, &Circle::new(Point::new(-3.0, 0.0), 2.0), EPS).unwrap();
        assert_eq!(internal.len(), 1);
        assert!(contains(&internal, Point::new(-5.0, 0.0)));

        let concentric = circle_circle(&a, &Circle::new(Point::ORIGIN, 3.0), EPS).unwrap();
        assert!(concentric.is_empty());
        let coincident = circle_circle(&a, &a, EPS).unwrap();
        assert!(coincident.is_empty());
        let apart = circle_circle(&a, &Circle::new(Point::new(20.0, 0.0), 3.0), EPS).unwrap();
        assert!(apart.is_empty());
    }

    #[test]
    fn test_arc_filters_by_angular_range() {
        // Upper half of the circle, counter-clockwise from 0 to π.
        let upper = Arc::ccw(Point::ORIGIN, 5.0, 0.0, PI);
        let vertical = Line::new(Point::new(3.0, -10.0), Point::new(3.0, 10.0));
        let points = line_arc(&vertical, &upper, EPS).unwrap();
        assert_eq!(points.len(), 1);
        assert!(contains(&points, Point::new(3.0, 4.0)));

        // Clockwise from 0 to π sweeps through the lower half.
        let lower = Arc::new(Point::ORIGIN, 5.0, 0.0, PI, ArcDirection::Clockwise);
        let points = line_arc(&vertical, &lower, EPS).unwrap();
        assert_eq!(points.len(), 1);
        assert!(contains(&points, Point::new(3.0, -4.0)));
    }

    #[test]
    fn test_arc_wraparound_membership() {
        // Right half, crossing angle zero.
        let right = Arc::ccw(Point::ORIGIN, 5.0, 3.0 * FRAC_PI_2, FRAC_PI_2);
        let horizontal = Line::new(Point::new(-10.0, 0.0), Point::new(10.0, 0.0));
        let points = line_arc(&horizontal, &right, EPS).unwrap();
        assert_eq!(points.len(), 1);
        assert!(contains(&points, Point::new(5.0, 0.0)));
    }

    #[test]
    fn test_arc_arc_and_circle_arc() {
        let a = Arc::ccw(Point::ORIGIN, 5.0, 0.0, PI);
        let b = Arc::ccw(Point::new(6.0, 0.0), 5.0, 0.0, PI);
        let points = arc_arc(&a, &b, EPS).unwrap();
        assert_eq!(points.len(), 1);
        assert!(contains(&points, Point::new(3.0, 4.0)));

        let c = Circle::new(Point::new(6.0, 0.0), 5.0);
        let points = circle_arc(&c, &a, EPS).unwrap();
        assert_eq!(points.len(), 1);
    }

    #[test]
    fn test_invalid_radius_is_an_error() {
        let line = Line::new(Point::new(-1.0, 0.0), Point::new(1.0, 0.0));
        let bad = Circle::new(Point::ORIGIN, 0.0);
        assert!(matches!(
            line_circle(&line, &bad, EPS),
            Err(KernelError::Validation(_))
        ));
        let g = Geometry::Circle(Circle::new(Point::ORIGIN, -2.0));
        assert!(intersect(&Geometry::Line(line), &g, EPS).is_err());
    }

    #[test]
    fn test_polyline_vertex_hit_is_deduplicated() {
        let zigzag = Geometry::Polyline(Polyline::new(
            vec![Point::new(0.0, 0.0), Point::new(5.0, 5.0), Point::new(10.0, 0.0)],
            false,
        ));
        let horizontal = Geometry::Line(Line::new(Point::new(0.0, 5.0), Point::new(10.0, 5.0)));
        let points = intersect(&zigzag, &horizontal, EPS).unwrap();
        assert_eq!(points.len(), 1);
        assert!(contains(&points, Point::new(5.0, 5.0)));
    }

    #[test]
    fn test_intersects_rect() {
        let rect = BBox::new(Point::new(0.0, 0.0), Point::new(10.0, 10.0));
        let crossing = Geometry::Line(Line::new(Point::new(-5.0, 5.0), Point::new(5.0, 5.0)));
        assert!(intersects_rect(&crossing, &rect, EPS));
        let inside = Geometry::Circle(Circle::new(Point::new(5.0, 5.0), 1.0));
        assert!(intersects_rect(&inside, &rect, EPS));
        // Circle surrounding the rectangle: its outline never touches it.
        let around = Geometry::Circle(Circle::new(Point::new(5.0, 5.0), 20.0));
        assert!(!intersects_rect(&around, &rect, EPS));
        // Diagonal line whose bbox overlaps but which passes outside the corner.
        let near = Geometry::Line(Line::new(Point::new(8.0, 13.0), Point::new(13.0, 8.0)));
        assert!(!intersects_rect(&near, &rect, EPS));
    }
}
