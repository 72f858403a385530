use std::f64::consts::PI;

use crate::error::{GeometryError, KernelError, Result};
use crate::geometry::{angular_tolerance, normalize_angle, Arc, ArcDirection, Line, Point, Vector};

use super::infinite_intersection;

/// A fillet arc plus both lines cut back to its tangent points.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilletResult {
    pub arc: Arc,
    pub first: Line,
    pub second: Line,
}

/// A chamfer segment plus both lines cut back to its ends.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChamferResult {
    pub line: Line,
    pub first: Line,
    pub second: Line,
}

/// The corner of two lines and, for each line, the arm that is kept.
struct Corner {
    point: Point,
    /// Unit direction from the corner toward the kept end of each line.
    dir_a: Vector,
    dir_b: Vector,
    /// Length of each kept arm.
    len_a: f64,
    len_b: f64,
}

impl Corner {
    fn find(a: &Line, b: &Line, eps: f64) -> Result<Self> {
        let angle_tol = angular_tolerance(eps, a.length().max(b.length()));
        let point = infinite_intersection(a.start, a.direction(), b.start, b.direction(), angle_tol)
            .ok_or(GeometryError::Parallel)?;
        let far = |l: &Line| {
            if l.start.distance_to(&point) >= l.end.distance_to(&point) {
                l.start
            } else {
                l.end
            }
        };
        let (far_a, far_b) = (far(a), far(b));
        let (len_a, len_b) = (point.distance_to(&far_a), point.distance_to(&far_b));
        let collapsed = || GeometryError::Infeasible {
            what: "corner arm length",
            value: len_a.min(len_b),
            max: eps,
        };
        let (Some(dir_a), Some(dir_b)) = ((far_a - point).normalize(), (far_b - point).normalize()) else {
            return Err(collapsed().into());
        };
        if len_a <= eps || len_b <= eps {
            return Err(collapsed().into());
        }
        Ok(Self {
            point,
            dir_a,
            dir_b,
            len_a,
            len_b,
        })
    }

    /// Interior angle between the kept arms, in `(0, π)`.
    fn angle(&self) -> f64 {
        self.dir_a.dot(&self.dir_b).clamp(-1.0, 1.0).acos()
    }

    /// The arms are collinear, either folded back or running straight on.
    fn is_degenerate(&self, eps: f64) -> bool {
        let tol = angular_tolerance(eps, self.len_a.max(self.len_b));
        let phi = self.angle();
        phi <= tol || PI - phi <= tol
    }
}

/// Replace `line`'s end nearest the corner with `p`, keeping orientation.
fn cut_to(line: &Line, corner: Point, p: Point) -> Line {
    if line.start.distance_to(&corner) >= line.end.distance_to(&corner) {
        Line::new(line.start, p)
    } else {
        Line::new(p, line.end)
    }
}

/// Round the corner between two lines with an arc of `radius`.
///
/// The corner is the intersection of the infinite extensions of `a` and
/// `b`; each line keeps the arm running toward its farther endpoint.
pub fn fillet(a: &Line, b: &Line, radius: f64, eps: f64) -> Result<FilletResult> {
    if !(radius > eps) || !radius.is_finite() {
        return Err(KernelError::validation(format!(
            "fillet radius must be positive, got {radius}"
        )));
    }
    let corner = Corner::find(a, b, eps)?;
    if corner.is_degenerate(eps) {
        return Err(GeometryError::Parallel.into());
    }
    let phi = corner.angle();

    let half_tan = (phi / 2.0).tan();
    let tangent = radius / half_tan;
    let available = corner.len_a.min(corner.len_b);
    if tangent > available + eps {
        return Err(GeometryError::Infeasible {
            what: "fillet radius",
            value: radius,
            max: available * half_tan,
        }
        .into());
    }

    let t1 = corner.point + corner.dir_a * tangent;
    let t2 = corner.point + corner.dir_b * tangent;
    let bisector = (corner.dir_a + corner.dir_b)
        .normalize()
        .ok_or(GeometryError::Parallel)?;
    let center = corner.point + bisector * (radius / (phi / 2.0).sin());

    let (s, e) = (t1.angle_from(&center), t2.angle_from(&center));
    // The fillet is the short way round, sweeping π - φ.
    let direction = if normalize_angle(e - s) <= PI {
        ArcDirection::CounterClockwise
    } else {
        ArcDirection::Clockwise
    };
    log::debug!("fillet r={radius} at ({:.6}, {:.6})", corner.point.x, corner.point.y);
    Ok(FilletResult {
        arc: Arc::new(center, radius, s, e, direction),
        first: cut_to(a, corner.point, t1),
        second: cut_to(b, corner.point, t2),
    })
}

/// Bevel the corner between two lines with a segment that starts `dist_a`
/// along `a` and ends `dist_b` along `b`, both measured from the corner.
pub fn chamfer(a: &Line, b: &Line, dist_a: f64, dist_b: f64, eps: f64) -> Result<ChamferResult> {
    for d in [dist_a, dist_b] {
        if !(d > eps) || !d.is_finite() {
            return Err(KernelError::validation(format!(
                "chamfer distance must be positive, got {d}"
            )));
        }
    }
    let corner = Corner::find(a, b, eps)?;
    if corner.is_degenerate(eps) {
        return Err(GeometryError::Parallel.into());
    }
    if dist_a > corner.len_a + eps {
        return Err(GeometryError::Infeasible {
            what: "chamfer distance",
            value: dist_a,
            max: corner.len_a,
        }
        .into());
    }
    if dist_b > corner.len_b + eps {
        return Err(GeometryError::Infeasible {
            what: "chamfer distance",
            value: dist_b,
            max: corner.len_b,
        }
        .into());
    }

    let p1 = corner.point + corner.dir_a * dist_a;
    let p2 = corner.point + corner.dir_b * dist_b;
    Ok(ChamferResult {
        line: Line::new(p1, p2),
        first: cut_to(a, corner.point, p1),
        second: cut_to(b, corner.point, p2),
    })
}
