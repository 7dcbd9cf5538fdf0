//! Geometry primitives: the four-corner quadrilateral, its centroid,
//! rotation about a pivot, and corner ordering.
//!
//! All angles are in degrees in screen space (x right, y down), so a
//! positive angle turns clockwise on screen.

use serde::{Deserialize, Serialize};

use crate::types::Point;

/// Number of corners in a quadrilateral.
pub const CORNERS: usize = 4;

/// Four corner points in insertion order.
///
/// Created as top-left, top-right, bottom-right, bottom-left, but free
/// dragging may leave the corners in any visual order. Use
/// [`Quad::ordered`] before computing a transform.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quad(pub [Point; CORNERS]);

impl Quad {
    /// Create a quadrilateral from four corners.
    #[must_use]
    pub const fn new(points: [Point; CORNERS]) -> Self {
        Self(points)
    }

    /// Build a quadrilateral from a slice, which must hold exactly four
    /// points.
    #[must_use]
    pub fn from_slice(points: &[Point]) -> Option<Self> {
        <[Point; CORNERS]>::try_from(points).ok().map(Self)
    }

    /// Axis-aligned rectangle `[left, right] x [top, bottom]`, ordered
    /// top-left, top-right, bottom-right, bottom-left.
    #[must_use]
    pub const fn rectangle(left: f64, top: f64, right: f64, bottom: f64) -> Self {
        Self([
            Point::new(left, top),
            Point::new(right, top),
            Point::new(right, bottom),
            Point::new(left, bottom),
        ])
    }

    /// The corners in insertion order.
    #[must_use]
    pub const fn points(&self) -> &[Point; CORNERS] {
        &self.0
    }

    /// Mean of the four corners.
    #[must_use]
    pub fn centroid(&self) -> Point {
        #[allow(clippy::cast_precision_loss)]
        let n = CORNERS as f64;
        let (sx, sy) = self
            .0
            .iter()
            .fold((0.0, 0.0), |(sx, sy), p| (sx + p.x, sy + p.y));
        Point::new(sx / n, sy / n)
    }

    /// Rotate every corner about `pivot` by `delta_degrees`, keeping each
    /// corner's distance from the pivot.
    #[must_use]
    pub fn rotated_about(&self, pivot: Point, delta_degrees: f64) -> Self {
        Self(self.0.map(|p| rotate_about(p, pivot, delta_degrees)))
    }

    /// Apply `f` to every corner.
    #[must_use]
    pub fn map(&self, f: impl Fn(Point) -> Point) -> Self {
        Self(self.0.map(f))
    }

    /// Unsigned area via the shoelace formula, taking corners in the
    /// order given.
    #[must_use]
    pub fn area(&self) -> f64 {
        let mut twice = 0.0;
        for i in 0..CORNERS {
            let a = self.0[i];
            let b = self.0[(i + 1) % CORNERS];
            twice += a.x.mul_add(b.y, -(b.x * a.y));
        }
        twice.abs() / 2.0
    }

    /// Canonicalize into top-left, top-right, bottom-right, bottom-left.
    ///
    /// The two corners with the smallest `y` form the top edge and the
    /// other two the bottom edge; each pair is then sorted by `x`. Ties
    /// on `y` keep insertion order.
    #[must_use]
    pub fn ordered(&self) -> OrderedQuad {
        let mut by_y = self.0;
        by_y.sort_by(|a, b| a.y.total_cmp(&b.y));
        let [a, b, c, d] = by_y;
        let (top_left, top_right) = if a.x <= b.x { (a, b) } else { (b, a) };
        let (bottom_left, bottom_right) = if c.x <= d.x { (c, d) } else { (d, c) };
        OrderedQuad {
            top_left,
            top_right,
            bottom_right,
            bottom_left,
        }
    }
}

/// A quadrilateral whose corners have been sorted into their visual
/// roles. Produced only by [`Quad::ordered`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OrderedQuad {
    /// Upper-left corner.
    pub top_left: Point,
    /// Upper-right corner.
    pub top_right: Point,
    /// Lower-right corner.
    pub bottom_right: Point,
    /// Lower-left corner.
    pub bottom_left: Point,
}

impl OrderedQuad {
    /// Corners in cyclic order starting at the top-left.
    #[must_use]
    pub const fn corners(&self) -> [Point; CORNERS] {
        [
            self.top_left,
            self.top_right,
            self.bottom_right,
            self.bottom_left,
        ]
    }

    /// Longer of the top and bottom edges.
    #[must_use]
    pub fn projected_width(&self) -> f64 {
        self.top_left
            .distance(self.top_right)
            .max(self.bottom_left.distance(self.bottom_right))
    }

    /// Longer of the left and right edges.
    #[must_use]
    pub fn projected_height(&self) -> f64 {
        self.top_left
            .distance(self.bottom_left)
            .max(self.top_right.distance(self.bottom_right))
    }

    /// Area enclosed by the corners in cyclic order.
    #[must_use]
    pub fn area(&self) -> f64 {
        Quad::new(self.corners()).area()
    }
}

/// Distance and bearing of `p` as seen from `pivot`, bearing in degrees.
#[must_use]
pub fn polar_from(pivot: Point, p: Point) -> (f64, f64) {
    let dx = p.x - pivot.x;
    let dy = p.y - pivot.y;
    (dx.hypot(dy), dy.atan2(dx).to_degrees())
}

/// The point at `radius` and `bearing_degrees` from `pivot`.
#[must_use]
pub fn from_polar(pivot: Point, radius: f64, bearing_degrees: f64) -> Point {
    let (sin, cos) = bearing_degrees.to_radians().sin_cos();
    Point::new(radius.mul_add(cos, pivot.x), radius.mul_add(sin, pivot.y))
}

/// Rotate `p` about `pivot` by `delta_degrees`.
///
/// Works in polar form (radius and bearing from the pivot) so repeated
/// rotations compound exactly the way the editor applies them.
#[must_use]
pub fn rotate_about(p: Point, pivot: Point, delta_degrees: f64) -> Point {
    let (radius, bearing) = polar_from(pivot, p);
    from_polar(pivot, radius, bearing + delta_degrees)
}

/// Clamp `p` into `[0, width] x [0, height]`. Negative or NaN bounds
/// collapse to zero.
#[must_use]
pub fn clamp_to(p: Point, width: f64, height: f64) -> Point {
    Point::new(
        p.x.max(0.0).min(width.max(0.0)),
        p.y.max(0.0).min(height.max(0.0)),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-9;

    fn assert_close(a: Point, b: Point) {
        assert!(
            (a.x - b.x).abs() < 1e-6 && (a.y - b.y).abs() < 1e-6,
            "expected {b:?}, got {a:?}"
        );
    }

    #[test]
    fn from_slice_requires_four_points() {
        let pts = [Point::new(0.0, 0.0); 3];
        assert!(Quad::from_slice(&pts).is_none());
        let pts = [Point::new(0.0, 0.0); 4];
        assert!(Quad::from_slice(&pts).is_some());
    }

    #[test]
    fn centroid_of_rectangle() {
        let q = Quad::rectangle(10.0, 20.0, 30.0, 60.0);
        assert_close(q.centroid(), Point::new(20.0, 40.0));
    }

    #[test]
    fn rectangle_area() {
        let q = Quad::rectangle(0.0, 0.0, 10.0, 5.0);
        assert!((q.area() - 50.0).abs() < EPS);
    }

    #[test]
    fn collinear_area_is_zero() {
        let q = Quad::new([
            Point::new(0.0, 0.0),
            Point::new(1.0, 1.0),
            Point::new(2.0, 2.0),
            Point::new(3.0, 3.0),
        ]);
        assert!(q.area() < EPS);
    }

    #[test]
    fn rotate_quarter_turn_clockwise_on_screen() {
        // With y pointing down, +90 degrees takes "right of pivot" to
        // "below pivot".
        let p = rotate_about(Point::new(10.0, 0.0), Point::new(0.0, 0.0), 90.0);
        assert_close(p, Point::new(0.0, 10.0));
    }

    #[test]
    fn rotation_preserves_radius_and_centroid() {
        let q = Quad::new([
            Point::new(10.0, 12.0),
            Point::new(90.0, 8.0),
            Point::new(85.0, 95.0),
            Point::new(5.0, 80.0),
        ]);
        let c = q.centroid();
        let r = q.rotated_about(c, 37.0);
        assert_close(r.centroid(), c);
        for (before, after) in q.points().iter().zip(r.points()) {
            assert!((before.distance(c) - after.distance(c)).abs() < 1e-9);
        }
    }

    #[test]
    fn ordered_sorts_shuffled_rectangle() {
        let q = Quad::new([
            Point::new(90.0, 90.0),
            Point::new(10.0, 10.0),
            Point::new(10.0, 90.0),
            Point::new(90.0, 10.0),
        ]);
        let o = q.ordered();
        assert_eq!(o.top_left, Point::new(10.0, 10.0));
        assert_eq!(o.top_right, Point::new(90.0, 10.0));
        assert_eq!(o.bottom_right, Point::new(90.0, 90.0));
        assert_eq!(o.bottom_left, Point::new(10.0, 90.0));
    }

    #[test]
    fn ordered_handles_skewed_quad_in_every_permutation() {
        let corners = [
            Point::new(100.0, 100.0),
            Point::new(900.0, 120.0),
            Point::new(880.0, 900.0),
            Point::new(120.0, 880.0),
        ];
        // All 24 permutations of four elements.
        let mut idx = [0usize, 1, 2, 3];
        let mut seen = 0;
        permute(&mut idx, 0, &mut |perm| {
            seen += 1;
            let q = Quad::new(perm.map(|i| corners[i]));
            let o = q.ordered();
            assert_eq!(o.top_left, corners[0]);
            assert_eq!(o.top_right, corners[1]);
            assert_eq!(o.bottom_right, corners[2]);
            assert_eq!(o.bottom_left, corners[3]);
            assert!(o.top_left.y <= o.bottom_left.y);
            assert!(o.top_left.x <= o.top_right.x);
            assert!(o.bottom_left.x <= o.bottom_right.x);
        });
        assert_eq!(seen, 24);
    }

    fn permute(idx: &mut [usize; 4], k: usize, f: &mut impl FnMut([usize; 4])) {
        if k == idx.len() {
            f(*idx);
            return;
        }
        for i in k..idx.len() {
            idx.swap(k, i);
            permute(idx, k + 1, f);
            idx.swap(k, i);
        }
    }

    #[test]
    fn projected_size_uses_longer_edges() {
        let o = Quad::new([
            Point::new(0.0, 0.0),
            Point::new(100.0, 0.0),
            Point::new(120.0, 50.0),
            Point::new(0.0, 50.0),
        ])
        .ordered();
        assert!((o.projected_width() - 120.0).abs() < EPS);
        assert!(o.projected_height() > 50.0);
    }

    #[test]
    fn clamp_keeps_points_in_bounds() {
        assert_eq!(
            clamp_to(Point::new(-5.0, 500.0), 100.0, 200.0),
            Point::new(0.0, 200.0)
        );
    }

    #[test]
    fn clamp_collapses_invalid_bounds() {
        let p = clamp_to(Point::new(5.0, 5.0), -1.0, f64::NAN);
        assert_eq!(p, Point::new(0.0, 0.0));
    }
}
