use std::f64::consts::TAU;

use crate::error::{GeometryError, KernelError, Result};
use crate::geometry::{normalize_angle, Arc, Geometry, Line, Point};
use crate::intersect::{circle_angles, line_params, Curve};

use super::boundary_curves;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum End {
    Start,
    End,
}

/// Lengthen `target` along its tangent until it meets a boundary.
///
/// Only intersections with a positive extension no longer than
/// `max_distance` qualify. With a `pick` point only the end nearer to it is
/// extended; otherwise the end with the shortest extension wins.
pub fn extend(
    target: &Geometry,
    boundaries: &[Geometry],
    max_distance: f64,
    pick: Option<Point>,
    eps: f64,
) -> Result<Geometry> {
    if !(max_distance > 0.0) {
        return Err(KernelError::validation(format!(
            "max distance must be positive, got {max_distance}"
        )));
    }
    let curves = boundary_curves(boundaries);
    match target {
        Geometry::Line(line) => extend_line(line, &curves, max_distance, pick, eps),
        Geometry::Arc(arc) => extend_arc(arc, &curves, max_distance, pick, eps),
        other => Err(GeometryError::Unsupported {
            operation: "extend",
            kind: other.kind().as_str(),
        }
        .into()),
    }
}

fn ends_to_try(start: Point, end: Point, pick: Option<Point>) -> Vec<End> {
    match pick {
        Some(p) if p.distance_to(&start) < p.distance_to(&end) => vec![End::Start],
        Some(_) => vec![End::End],
        None => vec![End::Start, End::End],
    }
}

fn extend_line(
    line: &Line,
    curves: &[Curve],
    max_distance: f64,
    pick: Option<Point>,
    eps: f64,
) -> Result<Geometry> {
    let Some(dir) = line.direction().normalize() else {
        return Err(KernelError::validation("cannot extend a zero-length line"));
    };

    let mut best: Option<(End, f64)> = None;
    for end in ends_to_try(line.start, line.end, pick) {
        let (origin, d) = match end {
            End::Start => (line.start, -dir),
            End::End => (line.end, dir),
        };
        // `d` is a unit vector, so the parameter is the extension length.
        let nearest = curves
            .iter()
            .flat_map(|c| line_params(origin, d, c, eps))
            .filter(|t| *t > eps && *t <= max_distance + eps)
            .fold(f64::INFINITY, f64::min);
        if nearest.is_finite() && best.map_or(true, |(_, b)| nearest < b) {
            best = Some((end, nearest));
        }
    }

    let (end, length) = best.ok_or(GeometryError::NoIntersection)?;
    log::debug!("extend line {end:?} by {length:.6}");
    Ok(Geometry::Line(match end {
        End::Start => Line::new(line.start - dir * length, line.end),
        End::End => Line::new(line.start, line.end + dir * length),
    }))
}

fn extend_arc(
    arc: &Arc,
    curves: &[Curve],
    max_distance: f64,
    pick: Option<Point>,
    eps: f64,
) -> Result<Geometry> {
    let sign = arc.direction.sign();
    let tol = eps / arc.radius;
    // The extended arc must stay short of closing on itself.
    let room = TAU - arc.sweep() - tol;
    let angles: Vec<f64> = curves
        .iter()
        .flat_map(|c| circle_angles(arc.center, arc.radius, c, eps))
        .collect();

    let mut best: Option<(End, f64)> = None;
    for end in ends_to_try(arc.start_point(), arc.end_point(), pick) {
        let nearest = angles
            .iter()
            .map(|a| match end {
                End::End => normalize_angle((a - arc.end_angle) * sign),
                End::Start => normalize_angle((arc.start_angle - a) * sign),
            })
            .filter(|delta| *delta > tol && *delta < room)
            .filter(|delta| delta * arc.radius <= max_distance + eps)
            .fold(f64::INFINITY, f64::min);
        if nearest.is_finite() && best.map_or(true, |(_, b)| nearest < b) {
            best = Some((end, nearest));
        }
    }

    let (end, delta) = best.ok_or(GeometryError::NoIntersection)?;
    let (start_angle, end_angle) = match end {
        End::Start => (arc.start_angle - sign * delta, arc.end_angle),
        End::End => (arc.start_angle, arc.end_angle + sign * delta),
    };
    Ok(Geometry::Arc(Arc::new(
        arc.center,
        arc.radius,
        start_angle,
        end_angle,
        arc.direction,
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{ArcDirection, Circle};
    use std::f64::consts::{FRAC_PI_2, PI};

    const EPS: f64 = 1e-9;

    fn line(x0: f64, y0: f64, x1: f64, y1: f64) -> Geometry {
        Geometry::Line(Line::new(Point::new(x0, y0), Point::new(x1, y1)))
    }

    #[test]
    fn test_extend_line_to_nearest_boundary() {
        let target = line(0.0, 0.0, 5.0, 0.0);
        let boundaries = [line(12.0, -1.0, 12.0, 1.0), line(8.0, -1.0, 8.0, 1.0)];
        let Geometry::Line(l) = extend(&target, &boundaries, 100.0, None, EPS).unwrap() else {
            panic!("expected a line");
        };
        assert_eq!(l.start, Point::new(0.0, 0.0));
        assert!(l.end.approx_eq(&Point::new(8.0, 0.0), 1e-12));
    }

    #[test]
    fn test_extend_respects_max_distance_and_pick() {
        let target = line(0.0, 0.0, 5.0, 0.0);
        let boundaries = [line(-1.0, -1.0, -1.0, 1.0), line(8.0, -1.0, 8.0, 1.0)];

        // Without a pick the shorter extension (at the start) wins.
        let Geometry::Line(l) = extend(&target, &boundaries, 100.0, None, EPS).unwrap() else {
            panic!("expected a line");
        };
        assert!(l.start.approx_eq(&Point::new(-1.0, 0.0), 1e-12));

        // Picking near the end forces that end.
        let Geometry::Line(l) =
            extend(&target, &boundaries, 100.0, Some(Point::new(4.0, 0.0)), EPS).unwrap()
        else {
            panic!("expected a line");
        };
        assert!(l.end.approx_eq(&Point::new(8.0, 0.0), 1e-12));

        let err = extend(&target, &boundaries, 2.0, Some(Point::new(4.0, 0.0)), EPS).unwrap_err();
        assert_eq!(err, KernelError::Geometry(GeometryError::NoIntersection));
    }

    #[test]
    fn test_extend_ignores_boundaries_behind_the_end() {
        let target = line(0.0, 0.0, 5.0, 0.0);
        // Crosses the target's interior, not its extension.
        let crossing = line(3.0, -1.0, 3.0, 1.0);
        assert!(extend(&target, &[crossing], 100.0, Some(Point::new(5.0, 0.0)), EPS).is_err());
    }

    #[test]
    fn test_extend_arc_end() {
        let arc = Geometry::Arc(Arc::ccw(Point::ORIGIN, 5.0, 0.0, FRAC_PI_2));
        let boundary = line(-10.0, 0.0, 0.0, 0.0);
        let Geometry::Arc(a) = extend(&arc, &[boundary], 100.0, Some(Point::new(0.0, 5.0)), EPS).unwrap() else {
            panic!("expected an arc");
        };
        assert!((a.end_angle - PI).abs() < 1e-9);
        assert!(a.start_angle.abs() < 1e-12);
    }

    #[test]
    fn test_extend_clockwise_arc_start() {
        // Clockwise from 90° down to 0°; extending the start runs backwards
        // toward 180°.
        let arc = Geometry::Arc(Arc::new(Point::ORIGIN, 5.0, FRAC_PI_2, 0.0, ArcDirection::Clockwise));
        let boundary = line(-10.0, 0.0, 0.0, 0.0);
        let Geometry::Arc(a) = extend(&arc, &[boundary], 100.0, Some(Point::new(0.0, 5.0)), EPS).unwrap() else {
            panic!("expected an arc");
        };
        assert!(a.start_point().approx_eq(&Point::new(-5.0, 0.0), 1e-9));
        assert!(a.end_angle.abs() < 1e-12);
        assert!((a.sweep() - PI).abs() < 1e-9);
        assert_eq!(a.direction, ArcDirection::Clockwise);
    }

    #[test]
    fn test_extend_unsupported_kind() {
        let circle = Geometry::Circle(Circle::new(Point::ORIGIN, 1.0));
        assert!(extend(&circle, &[line(0.0, 0.0, 5.0, 0.0)], 10.0, None, EPS).is_err());
    }
}
