//! Display-space to source-space coordinate mapping.
//!
//! The crop overlay works in the pixels of the rendered image element,
//! which is usually scaled by layout. Before rectification the selection
//! is scaled onto the decoded image's native pixel grid, independently
//! per axis. This happens exactly once per rectification, in
//! [`crate::Engine::rectify_display`] or by the caller before
//! [`crate::Engine::rectify`].

use serde::{Deserialize, Serialize};

use crate::geometry::Quad;
use crate::types::{Point, Size};

/// Per-axis scale factors from display space to source space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScaleFactors {
    /// `source.width / display.width`.
    pub x: f64,
    /// `source.height / display.height`.
    pub y: f64,
}

impl ScaleFactors {
    /// No scaling: display and source share a pixel grid.
    pub const IDENTITY: Self = Self { x: 1.0, y: 1.0 };

    /// Factors taking `display` coordinates onto `source` coordinates.
    ///
    /// When either size is unavailable (zero, negative or not finite) the
    /// display is assumed to be the source and the identity is returned.
    #[must_use]
    pub fn between(display: Size, source: Size) -> Self {
        if !display.is_usable() || !source.is_usable() {
            let display_size = display;
            tracing::debug!(
                display_size = ?display_size,
                source_size = ?source,
                "image sizes unavailable, assuming display equals source"
            );
            return Self::IDENTITY;
        }
        Self {
            x: source.width / display.width,
            y: source.height / display.height,
        }
    }

    /// Factors for the opposite direction.
    #[must_use]
    pub fn inverse(self) -> Self {
        Self {
            x: 1.0 / self.x,
            y: 1.0 / self.y,
        }
    }

    /// Scale a single point.
    #[must_use]
    pub fn apply(self, p: Point) -> Point {
        Point::new(p.x * self.x, p.y * self.y)
    }
}

/// Scale `quad` from display space into source space.
#[must_use]
pub fn map_to_source_space(quad: &Quad, display: Size, source: Size) -> Quad {
    let scale = ScaleFactors::between(display, source);
    quad.map(|p| scale.apply(p))
}

/// Scale `quad` from source space back into display space.
#[must_use]
pub fn map_to_display_space(quad: &Quad, display: Size, source: Size) -> Quad {
    let scale = ScaleFactors::between(display, source).inverse();
    quad.map(|p| scale.apply(p))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scales_each_axis_independently() {
        let quad = Quad::rectangle(10.0, 10.0, 90.0, 40.0);
        let mapped = map_to_source_space(&quad, Size::new(100.0, 50.0), Size::new(400.0, 100.0));
        assert_eq!(mapped.0[0], Point::new(40.0, 20.0));
        assert_eq!(mapped.0[2], Point::new(360.0, 80.0));
    }

    #[test]
    fn unavailable_display_falls_back_to_identity() {
        let quad = Quad::rectangle(1.0, 2.0, 3.0, 4.0);
        let mapped = map_to_source_space(&quad, Size::new(0.0, 0.0), Size::new(400.0, 100.0));
        assert_eq!(mapped, quad);
        assert_eq!(
            ScaleFactors::between(Size::new(f64::NAN, 1.0), Size::new(1.0, 1.0)),
            ScaleFactors::IDENTITY
        );
    }

    #[test]
    fn round_trip_returns_original_points() {
        let quad = Quad::new([
            Point::new(12.5, 7.25),
            Point::new(301.0, 20.0),
            Point::new(280.75, 199.5),
            Point::new(3.0, 180.0),
        ]);
        let sizes = [
            (Size::new(320.0, 200.0), Size::new(4032.0, 3024.0)),
            (Size::new(333.3, 187.1), Size::new(1000.0, 1000.0)),
            (Size::new(1920.0, 1080.0), Size::new(640.0, 480.0)),
        ];
        for (display, source) in sizes {
            let there = map_to_source_space(&quad, display, source);
            let back = map_to_display_space(&there, display, source);
            for (a, b) in quad.0.iter().zip(back.0.iter()) {
                assert!((a.x - b.x).abs() < 1e-9 && (a.y - b.y).abs() < 1e-9);
            }
        }
    }

    #[test]
    fn equal_sizes_are_identity() {
        let s = ScaleFactors::between(Size::new(1000.0, 1000.0), Size::new(1000.0, 1000.0));
        assert_eq!(s, ScaleFactors::IDENTITY);
    }
}
