use std::f64::consts::{FRAC_PI_2, PI, TAU};
use std::ops::{Add, Mul, Neg, Sub};

use serde::{Deserialize, Serialize};

use crate::entity::EntityKind;
use crate::error::{KernelError, Result};

/// Normalize an angle in radians into `[0, 2π)`.
pub fn normalize_angle(angle: f64) -> f64 {
    let a = angle.rem_euclid(TAU);
    if a >= TAU {
        0.0
    } else {
        a
    }
}

/// Angle subtended by a length of `eps` at distance `reach` from a vertex.
///
/// Converts a linear tolerance into the angular one used for parallel and
/// collinear tests, so both agree at the scale of the geometry involved.
pub fn angular_tolerance(eps: f64, reach: f64) -> f64 {
    (eps / reach.max(eps)).min(FRAC_PI_2)
}

/// A 2D point in drawing units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const ORIGIN: Point = Point { x: 0.0, y: 0.0 };

    /// Point at `(x, y)`.
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Euclidean distance to `other`.
    pub fn distance_to(&self, other: &Point) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }

    /// This point shifted by `(dx, dy)`.
    pub fn translate(&self, dx: f64, dy: f64) -> Self {
        Self {
            x: self.x + dx,
            y: self.y + dy,
        }
    }

    /// Linear interpolation; `t = 0` is `self`, `t = 1` is `other`.
    pub fn lerp(&self, other: &Point, t: f64) -> Point {
        Point::new(
            self.x + (other.x - self.x) * t,
            self.y + (other.y - self.y) * t,
        )
    }

    /// Point halfway to `other`.
    pub fn midpoint(&self, other: &Point) -> Point {
        self.lerp(other, 0.5)
    }

    /// Coincidence within `eps`.
    pub fn approx_eq(&self, other: &Point, eps: f64) -> bool {
        self.distance_to(other) <= eps
    }

    /// Neither coordinate is NaN or infinite.
    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }

    /// Polar angle of this point around `center`, in `[0, 2π)`.
    pub fn angle_from(&self, center: &Point) -> f64 {
        normalize_angle((self.y - center.y).atan2(self.x - center.x))
    }
}

impl Sub for Point {
    type Output = Vector;

    fn sub(self, rhs: Point) -> Vector {
        Vector::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl Add<Vector> for Point {
    type Output = Point;

    fn add(self, rhs: Vector) -> Point {
        Point::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl Sub<Vector> for Point {
    type Output = Point;

    fn sub(self, rhs: Vector) -> Point {
        Point::new(self.x - rhs.x, self.y - rhs.y)
    }
}

/// A 2D displacement.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Vector {
    pub x: f64,
    pub y: f64,
}

impl Vector {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn from_angle(angle: f64) -> Self {
        Self::new(angle.cos(), angle.sin())
    }

    pub fn length(&self) -> f64 {
        self.x.hypot(self.y)
    }

    pub fn length_squared(&self) -> f64 {
        self.x * self.x + self.y * self.y
    }

    pub fn dot(&self, other: &Vector) -> f64 {
        self.x * other.x + self.y * other.y
    }

    /// Z component of the 3D cross product; positive when `other` is
    /// counter-clockwise from `self`.
    pub fn cross(&self, other: &Vector) -> f64 {
        self.x * other.y - self.y * other.x
    }

    /// Unit vector in the same direction, or `None` for the zero vector.
    pub fn normalize(&self) -> Option<Vector> {
        let len = self.length();
        if len > 0.0 && len.is_finite() {
            Some(Vector::new(self.x / len, self.y / len))
        } else {
            None
        }
    }

    /// Left-hand perpendicular.
    pub fn perp(&self) -> Vector {
        Vector::new(-self.y, self.x)
    }

    pub fn angle(&self) -> f64 {
        normalize_angle(self.y.atan2(self.x))
    }

    pub fn rotate(&self, angle: f64) -> Vector {
        let (sin, cos) = angle.sin_cos();
        Vector::new(self.x * cos - self.y * sin, self.x * sin + self.y * cos)
    }
}

impl Add for Vector {
    type Output = Vector;

    fn add(self, rhs: Vector) -> Vector {
        Vector::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl Sub for Vector {
    type Output = Vector;

    fn sub(self, rhs: Vector) -> Vector {
        Vector::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl Mul<f64> for Vector {
    type Output = Vector;

    fn mul(self, rhs: f64) -> Vector {
        Vector::new(self.x * rhs, self.y * rhs)
    }
}

impl Neg for Vector {
    type Output = Vector;

    fn neg(self) -> Vector {
        Vector::new(-self.x, -self.y)
    }
}

/// An axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    pub min: Point,
    pub max: Point,
}

impl BBox {
    pub fn new(min: Point, max: Point) -> Self {
        Self { min, max }
    }

    /// Box spanned by two arbitrary corners.
    pub fn from_corners(a: Point, b: Point) -> Self {
        Self {
            min: Point::new(a.x.min(b.x), a.y.min(b.y)),
            max: Point::new(a.x.max(b.x), a.y.max(b.y)),
        }
    }

    pub fn from_points(points: &[Point]) -> Option<Self> {
        if points.is_empty() {
            return None;
        }
        let mut min_x = f64::MAX;
        let mut min_y = f64::MAX;
        let mut max_x = f64::MIN;
        let mut max_y = f64::MIN;
        for p in points {
            min_x = min_x.min(p.x);
            min_y = min_y.min(p.y);
            max_x = max_x.max(p.x);
            max_y = max_y.max(p.y);
        }
        Some(Self {
            min: Point::new(min_x, min_y),
            max: Point::new(max_x, max_y),
        })
    }

    pub fn width(&self) -> f64 {
        self.max.x - self.min.x
    }

    pub fn height(&self) -> f64 {
        self.max.y - self.min.y
    }

    /// The larger of width and height.
    pub fn max_extent(&self) -> f64 {
        self.width().max(self.height())
    }

    pub fn center(&self) -> Point {
        Point::new(
            (self.min.x + self.max.x) / 2.0,
            (self.min.y + self.max.y) / 2.0,
        )
    }

    pub fn contains_point(&self, p: &Point) -> bool {
        p.x >= self.min.x && p.x <= self.max.x && p.y >= self.min.y && p.y <= self.max.y
    }

    pub fn contains_bbox(&self, other: &BBox) -> bool {
        self.contains_point(&other.min) && self.contains_point(&other.max)
    }

    pub fn intersects(&self, other: &BBox) -> bool {
        self.min.x <= other.max.x
            && self.max.x >= other.min.x
            && self.min.y <= other.max.y
            && self.max.y >= other.min.y
    }

    pub fn union(&self, other: &BBox) -> Self {
        Self {
            min: Point::new(self.min.x.min(other.min.x), self.min.y.min(other.min.y)),
            max: Point::new(self.max.x.max(other.max.x), self.max.y.max(other.max.y)),
        }
    }

    pub fn expand(&self, margin: f64) -> Self {
        Self {
            min: self.min.translate(-margin, -margin),
            max: self.max.translate(margin, margin),
        }
    }

    /// Distance from `p` to the closest point of the box (zero inside).
    pub fn distance_to_point(&self, p: &Point) -> f64 {
        let dx = (self.min.x - p.x).max(0.0).max(p.x - self.max.x);
        let dy = (self.min.y - p.y).max(0.0).max(p.y - self.max.y);
        dx.hypot(dy)
    }

    pub fn approx_eq(&self, other: &BBox, eps: f64) -> bool {
        self.min.approx_eq(&other.min, eps) && self.max.approx_eq(&other.max, eps)
    }

    pub fn corners(&self) -> [Point; 4] {
        [
            self.min,
            Point::new(self.max.x, self.min.y),
            self.max,
            Point::new(self.min.x, self.max.y),
        ]
    }
}

/// A straight segment from `start` to `end`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Line {
    pub start: Point,
    pub end: Point,
}

impl Line {
    /// Segment from `start` to `end`.
    pub fn new(start: Point, end: Point) -> Self {
        Self { start, end }
    }

    /// Euclidean length of the segment.
    pub fn length(&self) -> f64 {
        self.start.distance_to(&self.end)
    }

    /// Vector from `start` to `end`, not normalized.
    pub fn direction(&self) -> Vector {
        self.end - self.start
    }

    /// Point at parameter `t`, where 0 is `start` and 1 is `end`.
    pub fn point_at(&self, t: f64) -> Point {
        self.start.lerp(&self.end, t)
    }

    /// Parameter of the orthogonal projection of `p` onto the infinite line.
    pub fn param_of(&self, p: &Point) -> f64 {
        let d = self.direction();
        let len2 = d.length_squared();
        if len2 == 0.0 {
            return 0.0;
        }
        (*p - self.start).dot(&d) / len2
    }

    /// Closest point of the segment (not the infinite line) to `p`.
    pub fn closest_point(&self, p: &Point) -> Point {
        self.point_at(self.param_of(p).clamp(0.0, 1.0))
    }

    /// Distance from `p` to the segment.
    pub fn distance_to_point(&self, p: &Point) -> f64 {
        self.closest_point(p).distance_to(p)
    }

    pub fn midpoint(&self) -> Point {
        self.start.midpoint(&self.end)
    }

    /// The same segment running from `end` to `start`.
    pub fn reversed(&self) -> Line {
        Line::new(self.end, self.start)
    }

    /// Box spanned by the two endpoints.
    pub fn bbox(&self) -> BBox {
        BBox::from_corners(self.start, self.end)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArcDirection {
    #[default]
    CounterClockwise,
    Clockwise,
}

impl ArcDirection {
    /// +1 for counter-clockwise, -1 for clockwise.
    pub fn sign(&self) -> f64 {
        match self {
            ArcDirection::CounterClockwise => 1.0,
            ArcDirection::Clockwise => -1.0,
        }
    }

    pub fn reversed(&self) -> Self {
        match self {
            ArcDirection::CounterClockwise => ArcDirection::Clockwise,
            ArcDirection::Clockwise => ArcDirection::CounterClockwise,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Circle {
    pub center: Point,
    pub radius: f64,
}

impl Circle {
    pub fn new(center: Point, radius: f64) -> Self {
        Self { center, radius }
    }

    pub fn point_at_angle(&self, angle: f64) -> Point {
        self.center + Vector::from_angle(angle) * self.radius
    }

    /// Point at parameter `t`, one full turn counter-clockwise from angle 0.
    pub fn point_at(&self, t: f64) -> Point {
        self.point_at_angle(t * TAU)
    }

    pub fn circumference(&self) -> f64 {
        TAU * self.radius
    }

    pub fn closest_point(&self, p: &Point) -> Point {
        match (*p - self.center).normalize() {
            Some(dir) => self.center + dir * self.radius,
            None => self.point_at_angle(0.0),
        }
    }

    pub fn distance_to_point(&self, p: &Point) -> f64 {
        (p.distance_to(&self.center) - self.radius).abs()
    }

    pub fn bbox(&self) -> BBox {
        BBox::new(
            self.center.translate(-self.radius, -self.radius),
            self.center.translate(self.radius, self.radius),
        )
    }
}

/// A circular arc. Angles are stored normalized to `[0, 2π)` and the arc runs
/// from `start_angle` to `end_angle` in `direction`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Arc {
    pub center: Point,
    pub radius: f64,
    pub start_angle: f64,
    pub end_angle: f64,
    #[serde(default)]
    pub direction: ArcDirection,
}

impl Arc {
    pub fn new(
        center: Point,
        radius: f64,
        start_angle: f64,
        end_angle: f64,
        direction: ArcDirection,
    ) -> Self {
        Self {
            center,
            radius,
            start_angle: normalize_angle(start_angle),
            end_angle: normalize_angle(end_angle),
            direction,
        }
    }

    pub fn ccw(center: Point, radius: f64, start_angle: f64, end_angle: f64) -> Self {
        Self::new(
            center,
            radius,
            start_angle,
            end_angle,
            ArcDirection::CounterClockwise,
        )
    }

    /// Angle swept from start to end in the arc's direction, in `[0, 2π)`.
    pub fn sweep(&self) -> f64 {
        self.angular_offset(self.end_angle)
    }

    /// How far `angle` lies past `start_angle`, measured in the arc's direction.
    pub fn angular_offset(&self, angle: f64) -> f64 {
        let raw = match self.direction {
            ArcDirection::CounterClockwise => angle - self.start_angle,
            ArcDirection::Clockwise => self.start_angle - angle,
        };
        normalize_angle(raw)
    }

    pub fn angle_at(&self, t: f64) -> f64 {
        normalize_angle(self.start_angle + self.direction.sign() * t * self.sweep())
    }

    /// Point at parameter `t`, where 0 is the start point and 1 the end point.
    pub fn point_at(&self, t: f64) -> Point {
        self.point_at_angle(self.angle_at(t))
    }

    pub fn point_at_angle(&self, angle: f64) -> Point {
        self.center + Vector::from_angle(angle) * self.radius
    }

    pub fn start_point(&self) -> Point {
        self.point_at_angle(self.start_angle)
    }

    pub fn end_point(&self) -> Point {
        self.point_at_angle(self.end_angle)
    }

    pub fn mid_point(&self) -> Point {
        self.point_at(0.5)
    }

    /// Parameter of `angle` along the arc; values above 1 lie outside it.
    pub fn param_of_angle(&self, angle: f64) -> f64 {
        let sweep = self.sweep();
        if sweep == 0.0 {
            return 0.0;
        }
        self.angular_offset(angle) / sweep
    }

    /// Membership of `angle` in the half-open range `[start, end)`, with `eps`
    /// given as a distance along the arc.
    pub fn contains_angle(&self, angle: f64, eps: f64) -> bool {
        let tol = eps / self.radius;
        let offset = self.angular_offset(angle);
        offset < self.sweep() - tol || offset > TAU - tol
    }

    /// Exact closed membership, used for extents.
    pub fn spans_angle(&self, angle: f64) -> bool {
        self.angular_offset(angle) <= self.sweep()
    }

    pub fn length(&self) -> f64 {
        self.sweep() * self.radius
    }

    pub fn reversed(&self) -> Arc {
        Arc {
            center: self.center,
            radius: self.radius,
            start_angle: self.end_angle,
            end_angle: self.start_angle,
            direction: self.direction.reversed(),
        }
    }

    pub fn to_circle(&self) -> Circle {
        Circle::new(self.center, self.radius)
    }

    pub fn closest_point(&self, p: &Point) -> Point {
        if p.approx_eq(&self.center, 0.0) {
            return self.start_point();
        }
        let angle = p.angle_from(&self.center);
        if self.spans_angle(angle) {
            return self.point_at_angle(angle);
        }
        let (s, e) = (self.start_point(), self.end_point());
        if s.distance_to(p) <= e.distance_to(p) {
            s
        } else {
            e
        }
    }

    pub fn distance_to_point(&self, p: &Point) -> f64 {
        self.closest_point(p).distance_to(p)
    }

    pub fn bbox(&self) -> BBox {
        let mut bbox = BBox::from_corners(self.start_point(), self.end_point());
        for angle in [0.0, FRAC_PI_2, PI, 3.0 * FRAC_PI_2] {
            if self.spans_angle(angle) {
                let q = self.point_at_angle(angle);
                bbox = bbox.union(&BBox::new(q, q));
            }
        }
        bbox
    }
}

/// A chain of straight segments, optionally closed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Polyline {
    pub vertices: Vec<Point>,
    #[serde(default)]
    pub closed: bool,
}

impl Polyline {
    pub fn new(vertices: Vec<Point>, closed: bool) -> Self {
        Self { vertices, closed }
    }

    pub fn segments(&self) -> Vec<Line> {
        let mut segs: Vec<Line> = self
            .vertices
            .windows(2)
            .map(|w| Line::new(w[0], w[1]))
            .collect();
        if self.closed && self.vertices.len() > 2 {
            segs.push(Line::new(self.vertices[self.vertices.len() - 1], self.vertices[0]));
        }
        segs
    }

    pub fn length(&self) -> f64 {
        self.segments().iter().map(Line::length).sum()
    }

    pub fn bbox(&self) -> Option<BBox> {
        BBox::from_points(&self.vertices)
    }
}

/// An axis-aligned rectangle defined by lower-left and upper-right corners.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rectangle {
    pub lower_left: Point,
    pub upper_right: Point,
}

impl Rectangle {
    pub fn new(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self {
            lower_left: Point::new(x1.min(x2), y1.min(y2)),
            upper_right: Point::new(x1.max(x2), y1.max(y2)),
        }
    }

    pub fn from_corners(a: Point, b: Point) -> Self {
        Self::new(a.x, a.y, b.x, b.y)
    }

    pub fn bbox(&self) -> BBox {
        BBox::new(self.lower_left, self.upper_right)
    }

    pub fn width(&self) -> f64 {
        self.upper_right.x - self.lower_left.x
    }

    pub fn height(&self) -> f64 {
        self.upper_right.y - self.lower_left.y
    }

    pub fn area(&self) -> f64 {
        self.width() * self.height()
    }

    pub fn contains_point(&self, p: &Point) -> bool {
        self.bbox().contains_point(p)
    }

    /// Corners in counter-clockwise order starting at the lower-left.
    pub fn corners(&self) -> [Point; 4] {
        self.bbox().corners()
    }

    pub fn to_polygon(&self) -> Polygon {
        Polygon::new(self.corners().to_vec())
    }
}

/// A closed polygon defined by its vertices; the closing edge is implicit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Polygon {
    pub vertices: Vec<Point>,
}

impl Polygon {
    pub fn new(vertices: Vec<Point>) -> Self {
        Self { vertices }
    }

    pub fn bbox(&self) -> Option<BBox> {
        BBox::from_points(&self.vertices)
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn segments(&self) -> Vec<Line> {
        let n = self.vertices.len();
        (0..n)
            .map(|i| Line::new(self.vertices[i], self.vertices[(i + 1) % n]))
            .collect()
    }

    /// Shoelace area; positive for counter-clockwise winding.
    pub fn signed_area(&self) -> f64 {
        signed_area(&self.vertices)
    }

    pub fn is_counter_clockwise(&self) -> bool {
        self.signed_area() > 0.0
    }

    pub fn contains_point(&self, p: &Point) -> bool {
        point_in_ring(&self.vertices, p)
    }

    /// True when two non-adjacent edges touch.
    pub fn is_self_intersecting(&self, eps: f64) -> bool {
        ring_self_intersects(&self.vertices, eps)
    }
}

pub(crate) fn signed_area(ring: &[Point]) -> f64 {
    let n = ring.len();
    if n < 3 {
        return 0.0;
    }
    let twice: f64 = (0..n)
        .map(|i| {
            let a = ring[i];
            let b = ring[(i + 1) % n];
            a.x * b.y - b.x * a.y
        })
        .sum();
    twice / 2.0
}

/// Even-odd point-in-ring test.
pub(crate) fn point_in_ring(ring: &[Point], p: &Point) -> bool {
    let n = ring.len();
    let mut inside = false;
    let mut j = n.wrapping_sub(1);
    for i in 0..n {
        let (a, b) = (ring[i], ring[j]);
        if (a.y > p.y) != (b.y > p.y) {
            let x_cross = (b.x - a.x) * (p.y - a.y) / (b.y - a.y) + a.x;
            if p.x < x_cross {
                inside = !inside;
            }
        }
        j = i;
    }
    inside
}

pub(crate) fn ring_self_intersects(ring: &[Point], eps: f64) -> bool {
    let n = ring.len();
    if n < 4 {
        return false;
    }
    let edges: Vec<Line> = (0..n)
        .map(|i| Line::new(ring[i], ring[(i + 1) % n]))
        .collect();
    for i in 0..n {
        for j in (i + 1)..n {
            let adjacent = j == i + 1 || (i == 0 && j == n - 1);
            if adjacent {
                continue;
            }
            if crate::intersect::segments_touch(&edges[i], &edges[j], eps) {
                return true;
            }
        }
    }
    false
}

/// Typed geometry payload of an entity. The variant is the entity's kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Geometry {
    Line(Line),
    Circle(Circle),
    Arc(Arc),
    Polyline(Polyline),
    Rectangle(Rectangle),
    Polygon(Polygon),
}

impl Geometry {
    pub fn kind(&self) -> EntityKind {
        match self {
            Geometry::Line(_) => EntityKind::Line,
            Geometry::Circle(_) => EntityKind::Circle,
            Geometry::Arc(_) => EntityKind::Arc,
            Geometry::Polyline(_) => EntityKind::Polyline,
            Geometry::Rectangle(_) => EntityKind::Rectangle,
            Geometry::Polygon(_) => EntityKind::Polygon,
        }
    }

    /// Tight axis-aligned bound of the geometry.
    pub fn bbox(&self) -> BBox {
        let fallback = || BBox::new(Point::ORIGIN, Point::ORIGIN);
        match self {
            Geometry::Line(l) => l.bbox(),
            Geometry::Circle(c) => c.bbox(),
            Geometry::Arc(a) => a.bbox(),
            Geometry::Polyline(p) => p.bbox().unwrap_or_else(fallback),
            Geometry::Rectangle(r) => r.bbox(),
            Geometry::Polygon(p) => p.bbox().unwrap_or_else(fallback),
        }
    }

    /// Straight edges of the segment-based kinds.
    pub fn segments(&self) -> Vec<Line> {
        match self {
            Geometry::Line(l) => vec![*l],
            Geometry::Polyline(p) => p.segments(),
            Geometry::Rectangle(r) => Polygon::new(r.corners().to_vec()).segments(),
            Geometry::Polygon(p) => p.segments(),
            Geometry::Circle(_) | Geometry::Arc(_) => Vec::new(),
        }
    }

    pub fn is_closed(&self) -> bool {
        match self {
            Geometry::Line(_) | Geometry::Arc(_) => false,
            Geometry::Polyline(p) => p.closed,
            Geometry::Circle(_) | Geometry::Rectangle(_) | Geometry::Polygon(_) => true,
        }
    }

    pub fn closest_point(&self, p: &Point) -> Point {
        match self {
            Geometry::Circle(c) => c.closest_point(p),
            Geometry::Arc(a) => a.closest_point(p),
            _ => self
                .segments()
                .iter()
                .map(|s| s.closest_point(p))
                .min_by(|a, b| a.distance_to(p).total_cmp(&b.distance_to(p)))
                .unwrap_or(*p),
        }
    }

    pub fn distance_to(&self, p: &Point) -> f64 {
        self.closest_point(p).distance_to(p)
    }

    /// Bring stored representations into canonical form; arc angles are
    /// wrapped into `[0, 2π)`. Other kinds are returned unchanged.
    pub fn normalized(self) -> Geometry {
        match self {
            Geometry::Arc(a) => Geometry::Arc(Arc::new(a.center, a.radius, a.start_angle, a.end_angle, a.direction)),
            other => other,
        }
    }

    /// Check that the geometry is well formed and not degenerate at `eps`.
    pub fn validate(&self, eps: f64, allow_self_intersecting: bool) -> Result<()> {
        let finite = |pts: &[Point]| pts.iter().all(Point::is_finite);
        match self {
            Geometry::Line(l) => {
                if !finite(&[l.start, l.end]) {
                    return Err(KernelError::validation("line has non-finite coordinates"));
                }
                if l.length() <= eps {
                    return Err(KernelError::validation("zero-length line"));
                }
            }
            Geometry::Circle(c) => {
                check_radius(&c.center, c.radius, eps)?;
            }
            Geometry::Arc(a) => {
                check_radius(&a.center, a.radius, eps)?;
                if !(a.start_angle.is_finite() && a.end_angle.is_finite()) {
                    return Err(KernelError::validation("arc has non-finite angles"));
                }
                let in_range = |angle: f64| (0.0..TAU).contains(&angle);
                if !in_range(a.start_angle) || !in_range(a.end_angle) {
                    return Err(KernelError::validation(format!(
                        "arc angles must lie in [0, 2π), got {} and {}",
                        a.start_angle, a.end_angle
                    )));
                }
                if a.length() <= eps {
                    return Err(KernelError::validation("arc has zero sweep"));
                }
            }
            Geometry::Polyline(p) => {
                if p.vertices.len() < 2 {
                    return Err(KernelError::validation("polyline needs at least 2 vertices"));
                }
                if !finite(&p.vertices) {
                    return Err(KernelError::validation("polyline has non-finite coordinates"));
                }
                if p.segments().iter().any(|s| s.length() <= eps) {
                    return Err(KernelError::validation("polyline has a zero-length segment"));
                }
                if p.closed && !allow_self_intersecting && ring_self_intersects(&p.vertices, eps) {
                    return Err(KernelError::validation("closed polyline crosses itself"));
                }
            }
            Geometry::Rectangle(r) => {
                if !finite(&[r.lower_left, r.upper_right]) {
                    return Err(KernelError::validation("rectangle has non-finite coordinates"));
                }
                if r.width() <= eps || r.height() <= eps {
                    return Err(KernelError::validation("rectangle has zero width or height"));
                }
            }
            Geometry::Polygon(p) => {
                if p.vertices.len() < 3 {
                    return Err(KernelError::validation("polygon needs at least 3 vertices"));
                }
                if !finite(&p.vertices) {
                    return Err(KernelError::validation("polygon has non-finite coordinates"));
                }
                if p.segments().iter().any(|s| s.length() <= eps) {
                    return Err(KernelError::validation("polygon has a zero-length edge"));
                }
                if p.signed_area().abs() <= eps * eps {
                    return Err(KernelError::validation("polygon vertices are collinear"));
                }
                if !allow_self_intersecting && p.is_self_intersecting(eps) {
                    return Err(KernelError::validation("polygon crosses itself"));
                }
            }
        }
        Ok(())
    }
}

fn check_radius(center: &Point, radius: f64, eps: f64) -> Result<()> {
    if !center.is_finite() || !radius.is_finite() {
        return Err(KernelError::validation("non-finite center or radius"));
    }
    if radius <= eps {
        return Err(KernelError::validation(format!(
            "radius must be positive, got {radius}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-9;

    #[test]
    fn test_point_distance() {
        let a = Point::new(0.0, 0.0);
        let b = Point::new(3.0, 4.0);
        assert!((a.distance_to(&b) - 5.0).abs() < 1e-10);
    }

    #[test]
    fn test_rect_area() {
        let r = Rectangle::new(10.0, 5.0, 0.0, 0.0);
        assert_eq!(r.lower_left, Point::new(0.0, 0.0));
        assert!((r.area() - 50.0).abs() < 1e-10);
    }

    #[test]
    fn test_bbox_intersection() {
        let a = BBox::new(Point::new(0.0, 0.0), Point::new(10.0, 10.0));
        let b = BBox::new(Point::new(5.0, 5.0), Point::new(15.0, 15.0));
        let c = BBox::new(Point::new(20.0, 20.0), Point::new(30.0, 30.0));
        assert!(a.intersects(&b));
        assert!(!a.intersects(&c));
        assert!((a.distance_to_point(&Point::new(13.0, 14.0)) - 5.0).abs() < 1e-12);
    }

    #[test]
    fn test_normalize_angle_wraps() {
        assert!((normalize_angle(-FRAC_PI_2) - 3.0 * FRAC_PI_2).abs() < 1e-12);
        assert!(normalize_angle(TAU).abs() < 1e-12);
        assert!((normalize_angle(5.0 * PI) - PI).abs() < 1e-12);
    }

    #[test]
    fn test_line_projection() {
        let l = Line::new(Point::new(0.0, 0.0), Point::new(10.0, 0.0));
        assert!((l.param_of(&Point::new(7.0, 3.0)) - 0.7).abs() < 1e-12);
        assert_eq!(l.closest_point(&Point::new(-4.0, 1.0)), Point::new(0.0, 0.0));
        assert!((l.distance_to_point(&Point::new(5.0, -2.0)) - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_arc_sweep_across_zero() {
        let arc = Arc::ccw(Point::ORIGIN, 1.0, 3.0 * FRAC_PI_2, FRAC_PI_2);
        assert!((arc.sweep() - PI).abs() < 1e-12);
        assert!(arc.contains_angle(0.0, EPS));
        assert!(!arc.contains_angle(PI, EPS));

        let cw = Arc::new(Point::ORIGIN, 1.0, FRAC_PI_2, 3.0 * FRAC_PI_2, ArcDirection::Clockwise);
        assert!((cw.sweep() - PI).abs() < 1e-12);
        assert!(cw.contains_angle(0.0, EPS));
        assert!(!cw.contains_angle(PI, EPS));
    }

    #[test]
    fn test_arc_angles_out_of_range() {
        let raw = Arc {
            center: Point::ORIGIN,
            radius: 1.0,
            start_angle: -1.0,
            end_angle: 20.0,
            direction: ArcDirection::CounterClockwise,
        };
        assert!(matches!(
            Geometry::Arc(raw).validate(EPS, false),
            Err(KernelError::Validation(_))
        ));

        let Geometry::Arc(fixed) = Geometry::Arc(raw).normalized() else {
            panic!("expected an arc");
        };
        assert!((fixed.start_angle - (TAU - 1.0)).abs() < 1e-12);
        assert!((fixed.end_angle - (20.0 - 3.0 * TAU)).abs() < 1e-12);
        assert!(Geometry::Arc(fixed).validate(EPS, false).is_ok());
    }

    #[test]
    fn test_angular_tolerance_scales_with_reach() {
        assert!((angular_tolerance(1e-9, 1.0) - 1e-9).abs() < 1e-21);
        assert!((angular_tolerance(1e-9, 1000.0) - 1e-12).abs() < 1e-24);
        assert!(angular_tolerance(1e-9, 0.0) <= FRAC_PI_2);
    }

    #[test]
    fn test_arc_half_open_membership() {
        let arc = Arc::ccw(Point::ORIGIN, 2.0, 0.0, FRAC_PI_2);
        assert!(arc.contains_angle(0.0, EPS));
        assert!(!arc.contains_angle(FRAC_PI_2, EPS));
        assert!(arc.spans_angle(FRAC_PI_2));
    }

    #[test]
    fn test_arc_bbox_includes_quadrant_points() {
        let arc = Arc::ccw(Point::new(1.0, 1.0), 2.0, FRAC_PI_2 / 2.0, PI + FRAC_PI_2 / 2.0);
        let bb = arc.bbox();
        // Spans 90° so the top quadrant point is the maximum y.
        assert!((bb.max.y - 3.0).abs() < 1e-12);
        assert!(bb.min.x < 1.0 - 1.9);
    }

    #[test]
    fn test_arc_point_at_follows_direction() {
        let cw = Arc::new(Point::ORIGIN, 1.0, 0.0, 3.0 * FRAC_PI_2, ArcDirection::Clockwise);
        let mid = cw.point_at(0.5);
        assert!(mid.approx_eq(&Point::new((-FRAC_PI_2 / 2.0).cos(), (-FRAC_PI_2 / 2.0).sin()), 1e-12));
    }

    #[test]
    fn test_polygon_area_and_containment() {
        let square = Polygon::new(vec![
            Point::new(0.0, 0.0),
            Point::new(4.0, 0.0),
            Point::new(4.0, 4.0),
            Point::new(0.0, 4.0),
        ]);
        assert!((square.signed_area() - 16.0).abs() < 1e-12);
        assert!(square.is_counter_clockwise());
        assert!(square.contains_point(&Point::new(2.0, 2.0)));
        assert!(!square.contains_point(&Point::new(5.0, 2.0)));
        assert!(!square.is_self_intersecting(EPS));

        let bowtie = Polygon::new(vec![
            Point::new(0.0, 0.0),
            Point::new(4.0, 4.0),
            Point::new(4.0, 0.0),
            Point::new(0.0, 4.0),
        ]);
        assert!(bowtie.is_self_intersecting(EPS));
    }

    #[test]
    fn test_validation_rejects_degenerate_geometry() {
        let zero_line = Geometry::Line(Line::new(Point::new(1.0, 1.0), Point::new(1.0, 1.0)));
        assert!(matches!(zero_line.validate(EPS, false), Err(KernelError::Validation(_))));

        let bad_circle = Geometry::Circle(Circle::new(Point::ORIGIN, -1.0));
        assert!(bad_circle.validate(EPS, false).is_err());

        let collinear = Geometry::Polygon(Polygon::new(vec![
            Point::new(0.0, 0.0),
            Point::new(1.0, 0.0),
            Point::new(2.0, 0.0),
        ]));
        assert!(collinear.validate(EPS, false).is_err());

        let ok = Geometry::Circle(Circle::new(Point::ORIGIN, 5.0));
        assert!(ok.validate(EPS, false).is_ok());
    }

    #[test]
    fn test_self_intersection_policy() {
        let bowtie = Geometry::Polygon(Polygon::new(vec![
            Point::new(0.0, 0.0),
            Point::new(4.0, 4.0),
            Point::new(4.0, 0.0),
            Point::new(0.0, 4.0),
        ]));
        assert!(bowtie.validate(EPS, false).is_err());
        assert!(bowtie.validate(EPS, true).is_ok());
    }

    #[test]
    fn test_geometry_closest_point() {
        let rect = Geometry::Rectangle(Rectangle::new(0.0, 0.0, 10.0, 4.0));
        let p = rect.closest_point(&Point::new(5.0, 5.0));
        assert!(p.approx_eq(&Point::new(5.0, 4.0), 1e-12));
        assert!((rect.distance_to(&Point::new(12.0, 2.0)) - 2.0).abs() < 1e-12);
    }
}
