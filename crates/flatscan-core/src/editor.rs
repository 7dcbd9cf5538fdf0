//! Interactive quadrilateral editor.
//!
//! [`QuadEditor`] holds the four crop corners and a rotation angle over a
//! displayed image and turns pointer gestures into point updates. It
//! knows only the display size it was initialised with, never the
//! source image resolution; [`crate::mapper`] does that conversion once
//! the selection is applied.
//!
//! A gesture is `begin_drag` on a handle, any number of `update_drag`
//! calls, then `end_drag`. Only one handle is dragged at a time.

use serde::{Deserialize, Serialize};

use crate::geometry::{self, CORNERS, Quad};
use crate::types::{Point, ScanError, Size};

/// Fraction of the display trimmed from each side for the initial crop.
pub const INITIAL_INSET: f64 = 0.1;

/// How far above the midpoint of the top edge the rotate handle sits,
/// in display pixels.
pub const ROTATE_HANDLE_OFFSET: f64 = 30.0;

/// Screen bearing of the rotate handle at rest: straight up.
///
/// Pointer bearings are measured relative to this so that a pointer
/// directly above the centroid means "no rotation".
pub const ROTATE_HANDLE_BEARING: f64 = -90.0;

/// Something the user can grab.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Handle {
    /// One of the four corners, by insertion index.
    Corner(usize),
    /// The rotate handle above the top edge.
    Rotate,
}

/// What the current gesture is doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DragState {
    /// No gesture in progress.
    #[default]
    Idle,
    /// Moving a single corner.
    DraggingCorner(usize),
    /// Rotating the whole quadrilateral about its centroid.
    Rotating,
}

/// Result of a rotation step.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rotation {
    /// The rotated quadrilateral.
    pub quad: Quad,
    /// The new absolute rotation angle in degrees.
    pub angle: f64,
}

/// The initial crop for a display area: the central 80% x 80%,
/// ordered top-left, top-right, bottom-right, bottom-left.
///
/// Returns `None` while the display size is unknown (zero or not yet
/// laid out); callers retry once the image has loaded.
#[must_use]
pub fn initial_crop(display: Size) -> Option<Quad> {
    if !display.is_usable() {
        return None;
    }
    let (w, h) = (display.width, display.height);
    Some(Quad::rectangle(
        w * INITIAL_INSET,
        h * INITIAL_INSET,
        w * (1.0 - INITIAL_INSET),
        h * (1.0 - INITIAL_INSET),
    ))
}

/// Replace corner `index` with `point`, clamped to `bounds`.
///
/// # Errors
///
/// Returns [`ScanError::Validation`] if `index` is not 0..=3, `point`
/// is not finite, or `bounds` is not a positive finite size.
pub fn update_corner(quad: &Quad, index: usize, point: Point, bounds: Size) -> Result<Quad, ScanError> {
    if index >= CORNERS {
        return Err(ScanError::Validation(format!(
            "corner index {index} out of range"
        )));
    }
    if !bounds.is_usable() {
        return Err(ScanError::Validation(format!(
            "bounds {}x{} are not a positive size",
            bounds.width, bounds.height
        )));
    }
    if !point.is_finite() {
        return Err(ScanError::Validation("corner is not finite".to_owned()));
    }
    let mut points = quad.0;
    points[index] = geometry::clamp_to(point, bounds.width, bounds.height);
    Ok(Quad::new(points))
}

/// Rotation angle implied by a pointer position, relative to the rotate
/// handle's rest position above the centroid.
#[must_use]
pub fn pointer_angle(centroid: Point, pointer: Point) -> f64 {
    let (_, bearing) = geometry::polar_from(centroid, pointer);
    bearing - ROTATE_HANDLE_BEARING
}

/// Rotate `quad` so the rotate handle follows `pointer`.
///
/// The new angle is derived from the pointer; the corners are turned by
/// the difference between it and `previous_angle`, starting from their
/// current (already rotated) positions. Repeated calls therefore
/// accumulate onto the live quadrilateral rather than onto the shape it
/// had before the gesture began.
#[must_use]
pub fn rotate_to(quad: &Quad, pointer: Point, previous_angle: f64) -> Rotation {
    let centroid = quad.centroid();
    let angle = pointer_angle(centroid, pointer);
    Rotation {
        quad: quad.rotated_about(centroid, angle - previous_angle),
        angle,
    }
}

/// Where the rotate handle is drawn: above the midpoint of the first two
/// corners.
#[must_use]
pub fn rotate_handle_position(quad: &Quad) -> Point {
    let mid = quad.0[0].midpoint(quad.0[1]);
    Point::new(mid.x, mid.y - ROTATE_HANDLE_OFFSET)
}

/// Interaction state for the crop overlay.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QuadEditor {
    display: Option<Size>,
    quad: Option<Quad>,
    drag: DragState,
    angle: f64,
}

impl QuadEditor {
    /// An editor with no selection yet.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set up the initial crop for `display`.
    ///
    /// While the display size is unusable this is deferred: nothing
    /// changes and `None` is returned.
    pub fn initialize(&mut self, display: Size) -> Option<&Quad> {
        let Some(quad) = initial_crop(display) else {
            let Size { width, height } = display;
            tracing::debug!(
                width,
                height,
                "display size not available, deferring crop initialisation"
            );
            return None;
        };
        self.display = Some(display);
        self.quad = Some(quad);
        self.drag = DragState::Idle;
        self.angle = 0.0;
        self.quad.as_ref()
    }

    /// The current selection, if initialised.
    #[must_use]
    pub const fn quad(&self) -> Option<&Quad> {
        self.quad.as_ref()
    }

    /// The display size the selection lives in.
    #[must_use]
    pub const fn display(&self) -> Option<Size> {
        self.display
    }

    /// The current gesture.
    #[must_use]
    pub const fn drag_state(&self) -> DragState {
        self.drag
    }

    /// The accumulated rotation angle in degrees.
    #[must_use]
    pub const fn angle(&self) -> f64 {
        self.angle
    }

    /// Where to draw the rotate handle.
    #[must_use]
    pub fn rotate_handle(&self) -> Option<Point> {
        self.quad.as_ref().map(rotate_handle_position)
    }

    /// The handle within `radius` of `point`, preferring the rotate
    /// handle, then the nearest corner.
    #[must_use]
    pub fn handle_at(&self, point: Point, radius: f64) -> Option<Handle> {
        let quad = self.quad.as_ref()?;
        let r2 = radius * radius;
        if rotate_handle_position(quad).distance_squared(point) <= r2 {
            return Some(Handle::Rotate);
        }
        quad.0
            .iter()
            .enumerate()
            .map(|(i, p)| (i, p.distance_squared(point)))
            .filter(|&(_, d2)| d2 <= r2)
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(i, _)| Handle::Corner(i))
    }

    /// Start dragging `handle`.
    ///
    /// Ignored (returns `false`) when a gesture is already active, the
    /// editor is not initialised, or the corner index is out of range.
    pub fn begin_drag(&mut self, handle: Handle) -> bool {
        if self.drag != DragState::Idle || self.quad.is_none() {
            return false;
        }
        self.drag = match handle {
            Handle::Corner(i) if i < CORNERS => DragState::DraggingCorner(i),
            Handle::Corner(_) => return false,
            Handle::Rotate => DragState::Rotating,
        };
        true
    }

    /// Feed a pointer position for the active gesture.
    ///
    /// Returns `true` if the selection changed. Does nothing while idle.
    pub fn update_drag(&mut self, pointer: Point) -> bool {
        if !pointer.is_finite() {
            return false;
        }
        let (Some(quad), Some(display)) = (self.quad.as_mut(), self.display) else {
            return false;
        };
        match self.drag {
            DragState::Idle => false,
            DragState::DraggingCorner(i) => match update_corner(quad, i, pointer, display) {
                Ok(updated) => {
                    *quad = updated;
                    true
                }
                Err(_) => false,
            },
            DragState::Rotating => {
                let rotation = rotate_to(quad, pointer, self.angle);
                *quad = rotation.quad;
                self.angle = rotation.angle;
                true
            }
        }
    }

    /// Finish the active gesture. Always safe to call.
    pub const fn end_drag(&mut self) {
        self.drag = DragState::Idle;
    }

    /// Hand over the selection and clear the editor (crop applied).
    pub fn take(&mut self) -> Option<Quad> {
        let quad = self.quad.take();
        self.reset();
        quad
    }

    /// Discard the selection (crop cancelled).
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn assert_close(a: Point, b: Point) {
        assert!(
            (a.x - b.x).abs() < 1e-9 && (a.y - b.y).abs() < 1e-9,
            "expected {b:?}, got {a:?}"
        );
    }

    fn editor(w: f64, h: f64) -> QuadEditor {
        let mut e = QuadEditor::new();
        e.initialize(Size::new(w, h)).unwrap();
        e
    }

    #[test]
    fn initial_crop_covers_central_eighty_percent() {
        for (w, h) in [(1000.0, 1000.0), (640.0, 480.0), (33.3, 1234.5)] {
            let q = initial_crop(Size::new(w, h)).unwrap();
            assert_close(q.0[0], Point::new(0.1 * w, 0.1 * h));
            assert_close(q.0[1], Point::new(0.9 * w, 0.1 * h));
            assert_close(q.0[2], Point::new(0.9 * w, 0.9 * h));
            assert_close(q.0[3], Point::new(0.1 * w, 0.9 * h));
        }
    }

    #[test]
    fn initialisation_deferred_for_zero_size() {
        let mut e = QuadEditor::new();
        assert!(e.initialize(Size::new(0.0, 480.0)).is_none());
        assert!(e.quad().is_none());
        // Nothing to drag yet.
        assert!(!e.begin_drag(Handle::Corner(0)));
    }

    #[test]
    fn corner_drag_moves_only_that_corner() {
        let mut e = editor(200.0, 100.0);
        let before = *e.quad().unwrap();
        assert!(e.begin_drag(Handle::Corner(2)));
        assert!(e.update_drag(Point::new(150.0, 70.0)));
        let after = *e.quad().unwrap();
        assert_eq!(after.0[2], Point::new(150.0, 70.0));
        assert_eq!(after.0[0], before.0[0]);
        assert_eq!(after.0[1], before.0[1]);
        assert_eq!(after.0[3], before.0[3]);
    }

    #[test]
    fn corner_drag_is_clamped_to_display() {
        let mut e = editor(200.0, 100.0);
        e.begin_drag(Handle::Corner(0));
        e.update_drag(Point::new(-40.0, 900.0));
        assert_eq!(e.quad().unwrap().0[0], Point::new(0.0, 100.0));
    }

    #[test]
    fn begin_drag_is_noop_while_dragging() {
        let mut e = editor(200.0, 100.0);
        assert!(e.begin_drag(Handle::Corner(1)));
        assert!(!e.begin_drag(Handle::Rotate));
        assert_eq!(e.drag_state(), DragState::DraggingCorner(1));
    }

    #[test]
    fn begin_drag_rejects_bad_corner() {
        let mut e = editor(200.0, 100.0);
        assert!(!e.begin_drag(Handle::Corner(4)));
        assert_eq!(e.drag_state(), DragState::Idle);
    }

    #[test]
    fn update_while_idle_does_nothing() {
        let mut e = editor(200.0, 100.0);
        let before = *e.quad().unwrap();
        assert!(!e.update_drag(Point::new(5.0, 5.0)));
        assert_eq!(*e.quad().unwrap(), before);
    }

    #[test]
    fn end_drag_always_returns_to_idle() {
        let mut e = editor(200.0, 100.0);
        e.end_drag();
        assert_eq!(e.drag_state(), DragState::Idle);
        e.begin_drag(Handle::Rotate);
        e.end_drag();
        assert_eq!(e.drag_state(), DragState::Idle);
    }

    #[test]
    fn pointer_straight_above_centroid_means_no_rotation() {
        let c = Point::new(50.0, 50.0);
        assert!(pointer_angle(c, Point::new(50.0, 0.0)).abs() < 1e-9);
        // Pointer to the right of the centroid is a quarter turn clockwise.
        assert!((pointer_angle(c, Point::new(100.0, 50.0)) - 90.0).abs() < 1e-9);
    }

    #[test]
    fn rotation_turns_corners_about_centroid() {
        let mut e = editor(100.0, 100.0);
        e.begin_drag(Handle::Rotate);
        // Pointer due right of the centroid (50, 50): +90 degrees.
        e.update_drag(Point::new(120.0, 50.0));
        assert!((e.angle() - 90.0).abs() < 1e-9);
        let q = e.quad().unwrap();
        // Top-left (10, 10) turns clockwise onto (90, 10).
        assert!((q.0[0].x - 90.0).abs() < 1e-9);
        assert!((q.0[0].y - 10.0).abs() < 1e-9);
        assert_close(q.centroid(), Point::new(50.0, 50.0));
    }

    #[test]
    fn rotation_accumulates_deltas_onto_live_quad() {
        let quad = initial_crop(Size::new(100.0, 100.0)).unwrap();
        let c = quad.centroid();
        let first = rotate_to(&quad, Point::new(c.x + 10.0, c.y - 10.0), 0.0);
        let second = rotate_to(&first.quad, Point::new(c.x + 10.0, c.y), first.angle);
        assert!((first.angle - 45.0).abs() < 1e-9);
        assert!((second.angle - 90.0).abs() < 1e-9);
        // Two steps (45 then +45) land where a single 90 degree turn does.
        let direct = quad.rotated_about(c, 90.0);
        for (a, b) in second.quad.0.iter().zip(direct.0.iter()) {
            assert!((a.x - b.x).abs() < 1e-9 && (a.y - b.y).abs() < 1e-9);
        }
    }

    #[test]
    fn rotate_handle_sits_above_top_edge() {
        let e = editor(200.0, 100.0);
        let h = e.rotate_handle().unwrap();
        assert_close(h, Point::new(100.0, 10.0 - ROTATE_HANDLE_OFFSET));
    }

    #[test]
    fn hit_testing_prefers_rotate_then_nearest_corner() {
        let e = editor(200.0, 100.0);
        let h = e.rotate_handle().unwrap();
        assert_eq!(e.handle_at(h, 8.0), Some(Handle::Rotate));
        assert_eq!(e.handle_at(Point::new(181.0, 91.0), 8.0), Some(Handle::Corner(2)));
        assert_eq!(e.handle_at(Point::new(100.0, 50.0), 8.0), None);
    }

    #[test]
    fn update_corner_rejects_bad_index() {
        let q = Quad::rectangle(0.0, 0.0, 1.0, 1.0);
        let result = update_corner(&q, 7, Point::new(0.0, 0.0), Size::new(1.0, 1.0));
        assert!(matches!(result, Err(ScanError::Validation(_))));
    }

    #[test]
    fn update_corner_rejects_unusable_bounds() {
        let q = Quad::rectangle(0.0, 0.0, 10.0, 10.0);
        let p = Point::new(5.0, 5.0);
        for bounds in [
            Size::new(-1.0, 10.0),
            Size::new(10.0, f64::NAN),
            Size::new(0.0, 0.0),
            Size::new(f64::INFINITY, 10.0),
        ] {
            assert!(matches!(
                update_corner(&q, 0, p, bounds),
                Err(ScanError::Validation(_))
            ));
        }
        assert!(update_corner(&q, 0, Point::new(f64::NAN, 1.0), Size::new(10.0, 10.0)).is_err());
    }

    #[test]
    fn take_clears_state() {
        let mut e = editor(200.0, 100.0);
        e.begin_drag(Handle::Corner(0));
        assert!(e.take().is_some());
        assert!(e.quad().is_none());
        assert_eq!(e.drag_state(), DragState::Idle);
        assert!(e.angle().abs() < f64::EPSILON);
    }
}
