use crate::error::{GeometryError, Result};
use crate::geometry::{normalize_angle, Arc, Circle, Geometry, Line, Point};
use crate::intersect::{circle_angles, line_params, Curve};

use super::boundary_curves;

/// Outcome of trimming one target.
#[derive(Debug, Clone, PartialEq)]
pub enum TrimResult {
    /// The clicked piece was at an end; the target becomes this geometry.
    Shortened(Geometry),
    /// The clicked piece was interior. The first geometry replaces the
    /// target, the second is a new entity.
    Split(Geometry, Geometry),
}

/// Remove the piece of `target` containing `click`, bounded by the nearest
/// boundary intersections on either side of it.
///
/// Intersections at the target's own endpoints are ignored. Fails with
/// `NoIntersection` when nothing crosses the target's interior.
pub fn trim(target: &Geometry, boundaries: &[Geometry], click: Point, eps: f64) -> Result<TrimResult> {
    let curves = boundary_curves(boundaries);
    match target {
        Geometry::Line(line) => trim_line(line, &curves, click, eps),
        Geometry::Arc(arc) => trim_arc(arc, &curves, click, eps),
        Geometry::Circle(circle) => trim_circle(circle, &curves, click, eps),
        other => Err(GeometryError::Unsupported {
            operation: "trim",
            kind: other.kind().as_str(),
        }
        .into()),
    }
}

/// Pick the bracket `(lo, hi)` around `tc` from sorted-or-not params in (0, 1).
fn bracket(params: &[f64], tc: f64) -> (f64, f64) {
    let lo = params.iter().copied().filter(|t| *t < tc).fold(0.0, f64::max);
    let hi = params.iter().copied().filter(|t| *t >= tc).fold(1.0, f64::min);
    (lo, hi)
}

fn split_by_bracket<F>(lo: f64, hi: f64, piece: F) -> Result<TrimResult>
where
    F: Fn(f64, f64) -> Geometry,
{
    match (lo <= 0.0, hi >= 1.0) {
        (true, true) => Err(GeometryError::NoIntersection.into()),
        (true, false) => Ok(TrimResult::Shortened(piece(hi, 1.0))),
        (false, true) => Ok(TrimResult::Shortened(piece(0.0, lo))),
        (false, false) => Ok(TrimResult::Split(piece(0.0, lo), piece(hi, 1.0))),
    }
}

fn trim_line(line: &Line, curves: &[Curve], click: Point, eps: f64) -> Result<TrimResult> {
    let len = line.length();
    let tol = eps / len;
    let params: Vec<f64> = curves
        .iter()
        .flat_map(|c| line_params(line.start, line.direction(), c, eps))
        .filter(|t| *t > tol && *t < 1.0 - tol)
        .collect();
    if params.is_empty() {
        return Err(GeometryError::NoIntersection.into());
    }
    let tc = line.param_of(&click).clamp(0.0, 1.0);
    let (lo, hi) = bracket(&params, tc);
    log::debug!("trim line at t={tc:.6}: removing [{lo:.6}, {hi:.6}]");
    split_by_bracket(lo, hi, |a, b| {
        Geometry::Line(Line::new(line.point_at(a), line.point_at(b)))
    })
}

fn sub_arc(arc: &Arc, t0: f64, t1: f64) -> Arc {
    Arc::new(
        arc.center,
        arc.radius,
        arc.angle_at(t0),
        arc.angle_at(t1),
        arc.direction,
    )
}

fn trim_arc(arc: &Arc, curves: &[Curve], click: Point, eps: f64) -> Result<TrimResult> {
    let tol = eps / arc.length();
    let params: Vec<f64> = curves
        .iter()
        .flat_map(|c| circle_angles(arc.center, arc.radius, c, eps))
        .filter(|a| arc.contains_angle(*a, eps))
        .map(|a| arc.param_of_angle(a))
        .filter(|t| *t > tol && *t < 1.0 - tol)
        .collect();
    if params.is_empty() {
        return Err(GeometryError::NoIntersection.into());
    }

    // A click off the arc's span snaps to the nearer end.
    let tc = {
        let t = arc.param_of_angle(click.angle_from(&arc.center));
        if t <= 1.0 {
            t
        } else if click.distance_to(&arc.start_point()) <= click.distance_to(&arc.end_point()) {
            0.0
        } else {
            1.0
        }
    };
    let (lo, hi) = bracket(&params, tc);
    split_by_bracket(lo, hi, |a, b| Geometry::Arc(sub_arc(arc, a, b)))
}

fn trim_circle(circle: &Circle, curves: &[Curve], click: Point, eps: f64) -> Result<TrimResult> {
    let angle_tol = eps / circle.radius;
    let mut angles: Vec<f64> = Vec::new();
    for a in curves
        .iter()
        .flat_map(|c| circle_angles(circle.center, circle.radius, c, eps))
    {
        let duplicate = angles.iter().any(|b| {
            let d = normalize_angle(a - b);
            d <= angle_tol || d >= std::f64::consts::TAU - angle_tol
        });
        if !duplicate {
            angles.push(a);
        }
    }
    if angles.len() < 2 {
        return Err(GeometryError::NoIntersection.into());
    }

    // Walk counter-clockwise from the click: the first hit ends the removed
    // piece, the last one starts it.
    let ac = click.angle_from(&circle.center);
    let offset = |a: &f64| normalize_angle(a - ac);
    let hi = angles
        .iter()
        .min_by(|a, b| offset(a).total_cmp(&offset(b)))
        .copied()
        .ok_or(GeometryError::NoIntersection)?;
    let lo = angles
        .iter()
        .max_by(|a, b| offset(a).total_cmp(&offset(b)))
        .copied()
        .ok_or(GeometryError::NoIntersection)?;
    Ok(TrimResult::Shortened(Geometry::Arc(Arc::ccw(
        circle.center,
        circle.radius,
        hi,
        lo,
    ))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::KernelError;
    use crate::geometry::{ArcDirection, Polyline};
    use std::f64::consts::{FRAC_PI_2, PI};

    const EPS: f64 = 1e-9;

    fn line(x0: f64, y0: f64, x1: f64, y1: f64) -> Geometry {
        Geometry::Line(Line::new(Point::new(x0, y0), Point::new(x1, y1)))
    }

    fn as_line(g: &Geometry) -> Line {
        match g {
            Geometry::Line(l) => *l,
            other => panic!("expected line, got {other:?}"),
        }
    }

    #[test]
    fn test_trim_line_end_piece() {
        let target = line(0.0, 0.0, 10.0, 0.0);
        let boundary = line(5.0, -5.0, 5.0, 5.0);
        let result = trim(&target, &[boundary], Point::new(7.0, 0.0), EPS).unwrap();
        let TrimResult::Shortened(g) = result else {
            panic!("expected a shortened line");
        };
        let l = as_line(&g);
        assert!(l.start.approx_eq(&Point::new(0.0, 0.0), 1e-12));
        assert!(l.end.approx_eq(&Point::new(5.0, 0.0), 1e-12));
    }

    #[test]
    fn test_trim_line_interior_piece_splits() {
        let target = line(0.0, 0.0, 10.0, 0.0);
        let boundaries = [line(3.0, -1.0, 3.0, 1.0), line(6.0, -1.0, 6.0, 1.0), line(8.0, -1.0, 8.0, 1.0)];
        let result = trim(&target, &boundaries, Point::new(4.0, 0.2), EPS).unwrap();
        let TrimResult::Split(a, b) = result else {
            panic!("expected a split");
        };
        assert!(as_line(&a).end.approx_eq(&Point::new(3.0, 0.0), 1e-12));
        assert!(as_line(&b).start.approx_eq(&Point::new(6.0, 0.0), 1e-12));
        assert!(as_line(&b).end.approx_eq(&Point::new(10.0, 0.0), 1e-12));
    }

    #[test]
    fn test_trim_without_intersection_fails() {
        let target = line(0.0, 0.0, 10.0, 0.0);
        let far = line(20.0, -1.0, 20.0, 1.0);
        let err = trim(&target, &[far], Point::new(5.0, 0.0), EPS).unwrap_err();
        assert_eq!(err, KernelError::Geometry(GeometryError::NoIntersection));

        // Touching only at the target's endpoint does not count.
        let at_end = line(10.0, -1.0, 10.0, 1.0);
        assert!(trim(&target, &[at_end], Point::new(5.0, 0.0), EPS).is_err());
    }

    #[test]
    fn test_trim_circle_becomes_arc() {
        let circle = Geometry::Circle(Circle::new(Point::ORIGIN, 5.0));
        let cutter = line(-10.0, 0.0, 10.0, 0.0);
        let result = trim(&circle, &[cutter], Point::new(0.0, 5.0), EPS).unwrap();
        let TrimResult::Shortened(Geometry::Arc(arc)) = result else {
            panic!("expected an arc");
        };
        // The upper half was clicked, so the lower half remains.
        assert!((arc.sweep() - PI).abs() < 1e-9);
        assert!(arc.mid_point().approx_eq(&Point::new(0.0, -5.0), 1e-9));
    }

    #[test]
    fn test_trim_circle_needs_two_hits() {
        let circle = Geometry::Circle(Circle::new(Point::ORIGIN, 5.0));
        let tangent = line(-10.0, 5.0, 10.0, 5.0);
        assert!(trim(&circle, &[tangent], Point::new(0.0, 5.0), EPS).is_err());
    }

    #[test]
    fn test_trim_arc_end_piece() {
        let arc = Geometry::Arc(Arc::ccw(Point::ORIGIN, 5.0, 0.0, PI));
        let cutter = line(0.0, -10.0, 0.0, 10.0);
        let result = trim(&arc, &[cutter], Point::new(-4.0, 3.0), EPS).unwrap();
        let TrimResult::Shortened(Geometry::Arc(kept)) = result else {
            panic!("expected an arc");
        };
        assert!(kept.start_angle.abs() < 1e-12);
        assert!((kept.end_angle - FRAC_PI_2).abs() < 1e-9);
        assert_eq!(kept.direction, ArcDirection::CounterClockwise);
    }

    #[test]
    fn test_trim_polyline_unsupported() {
        let pl = Geometry::Polyline(Polyline::new(
            vec![Point::new(0.0, 0.0), Point::new(5.0, 0.0), Point::new(5.0, 5.0)],
            false,
        ));
        let err = trim(&pl, &[line(2.0, -1.0, 2.0, 1.0)], Point::new(1.0, 0.0), EPS).unwrap_err();
        assert!(matches!(
            err,
            KernelError::Geometry(GeometryError::Unsupported { operation: "trim", .. })
        ));
    }
}
