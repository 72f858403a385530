use serde::{Deserialize, Serialize};

use crate::geometry::{Arc, Circle, Geometry, Line, Point, Polygon, Polyline, Rectangle, Vector};

/// A similarity transform (rotation, uniform scale, optional mirror, then
/// translation) as a 2x3 affine matrix.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transform2D {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
    pub tx: f64,
    pub ty: f64,
}

impl Default for Transform2D {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Transform2D {
    pub const IDENTITY: Transform2D = Transform2D {
        a: 1.0,
        b: 0.0,
        c: 0.0,
        d: 1.0,
        tx: 0.0,
        ty: 0.0,
    };

    pub fn translate(dx: f64, dy: f64) -> Self {
        Self {
            tx: dx,
            ty: dy,
            ..Self::IDENTITY
        }
    }

    /// Counter-clockwise rotation by `angle` radians about `pivot`.
    pub fn rotate(angle: f64, pivot: Point) -> Self {
        let (sin, cos) = angle.sin_cos();
        Self::about(cos, -sin, sin, cos, pivot)
    }

    /// Uniform scale by `factor` about `pivot`.
    pub fn scale(factor: f64, pivot: Point) -> Self {
        Self::about(factor, 0.0, 0.0, factor, pivot)
    }

    /// Reflection across the infinite line through `axis`.
    pub fn mirror(axis: &Line) -> Self {
        let theta = axis.direction().angle();
        let (sin2, cos2) = (2.0 * theta).sin_cos();
        Self::about(cos2, sin2, sin2, -cos2, axis.start)
    }

    /// Linear part `[a b; c d]` applied around `pivot`.
    fn about(a: f64, b: f64, c: f64, d: f64, pivot: Point) -> Self {
        Self {
            a,
            b,
            c,
            d,
            tx: pivot.x - (a * pivot.x + b * pivot.y),
            ty: pivot.y - (c * pivot.x + d * pivot.y),
        }
    }

    /// `self` followed by `next`.
    pub fn then(&self, next: &Transform2D) -> Transform2D {
        Transform2D {
            a: next.a * self.a + next.b * self.c,
            b: next.a * self.b + next.b * self.d,
            c: next.c * self.a + next.d * self.c,
            d: next.c * self.b + next.d * self.d,
            tx: next.a * self.tx + next.b * self.ty + next.tx,
            ty: next.c * self.tx + next.d * self.ty + next.ty,
        }
    }

    pub fn apply(&self, p: &Point) -> Point {
        Point::new(
            self.a * p.x + self.b * p.y + self.tx,
            self.c * p.x + self.d * p.y + self.ty,
        )
    }

    pub fn apply_vector(&self, v: &Vector) -> Vector {
        Vector::new(self.a * v.x + self.b * v.y, self.c * v.x + self.d * v.y)
    }

    pub fn determinant(&self) -> f64 {
        self.a * self.d - self.b * self.c
    }

    /// True when the transform reverses orientation.
    pub fn is_mirroring(&self) -> bool {
        self.determinant() < 0.0
    }

    pub fn scale_factor(&self) -> f64 {
        self.determinant().abs().sqrt()
    }

    /// Map a geometry. A rectangle that no longer lines up with the axes
    /// becomes a polygon; mirroring flips arc direction.
    pub fn apply_geometry(&self, geometry: &Geometry) -> Geometry {
        let map = |pts: &[Point]| pts.iter().map(|p| self.apply(p)).collect::<Vec<_>>();
        match geometry {
            Geometry::Line(l) => Geometry::Line(Line::new(self.apply(&l.start), self.apply(&l.end))),
            Geometry::Circle(c) => {
                Geometry::Circle(Circle::new(self.apply(&c.center), c.radius * self.scale_factor()))
            }
            Geometry::Arc(arc) => {
                let center = self.apply(&arc.center);
                let start = self.apply(&arc.start_point());
                let end = self.apply(&arc.end_point());
                let direction = if self.is_mirroring() {
                    arc.direction.reversed()
                } else {
                    arc.direction
                };
                Geometry::Arc(Arc::new(
                    center,
                    arc.radius * self.scale_factor(),
                    start.angle_from(&center),
                    end.angle_from(&center),
                    direction,
                ))
            }
            Geometry::Polyline(p) => Geometry::Polyline(Polyline::new(map(&p.vertices), p.closed)),
            Geometry::Polygon(p) => Geometry::Polygon(Polygon::new(map(&p.vertices))),
            Geometry::Rectangle(r) => {
                let axis_aligned = (self.b.abs() < 1e-12 && self.c.abs() < 1e-12)
                    || (self.a.abs() < 1e-12 && self.d.abs() < 1e-12);
                if axis_aligned {
                    Geometry::Rectangle(Rectangle::from_corners(
                        self.apply(&r.lower_left),
                        self.apply(&r.upper_right),
                    ))
                } else {
                    let mut corners = map(&r.corners());
                    if self.is_mirroring() {
                        corners.reverse();
                    }
                    Geometry::Polygon(Polygon::new(corners))
                }
            }
        }
    }
}
