//! Crop overlay drawn over the displayed image.
//!
//! Renders the selection polygon, the four corner handles and the
//! rotate handle, and turns pointer gestures into [`QuadEditor`]
//! operations. All coordinates are in display pixels.

use std::fmt::Write;
use std::rc::Rc;

use dioxus::prelude::*;
use flatscan_core::{DragState, Point, Quad, QuadEditor, Size};

/// Hit radius around a handle, in display pixels.
const HANDLE_HIT_RADIUS: f64 = 18.0;

/// Drawn radius of a corner handle.
const CORNER_RADIUS: f64 = 8.0;

/// Drawn radius of the rotate handle.
const ROTATE_RADIUS: f64 = 10.0;

/// Fill of the corner being dragged.
const HANDLE_ACTIVE: &str = "rgb(59, 130, 246)";

/// Props for the [`CropOverlay`] component.
#[derive(Props, Clone, PartialEq)]
pub struct CropOverlayProps {
    /// URL of the image being cropped.
    image_url: String,
    /// Editor state, owned by the caller so it can apply the selection.
    editor: Signal<QuadEditor>,
    /// Fired after each gesture ends with the current selection.
    #[props(default)]
    on_change: Option<EventHandler<Quad>>,
}

/// The displayed image with an editable quadrilateral on top.
///
/// The editor is initialised with the image's rendered size once the
/// image has loaded; until then no handles are drawn.
#[component]
pub fn CropOverlay(props: CropOverlayProps) -> Element {
    let mut editor = props.editor;
    let mut image_element: Signal<Option<Rc<MountedData>>> = use_signal(|| None);

    // Measure the rendered image and set up the initial crop.
    let measure = move || async move {
        let Some(element) = image_element.peek().clone() else {
            return;
        };
        match element.get_client_rect().await {
            Ok(rect) => {
                let display = Size::new(rect.size.width, rect.size.height);
                editor.write().initialize(display);
            }
            Err(e) => {
                tracing::warn!(error = ?e, "could not measure image for crop overlay");
            }
        }
    };

    let pointer_at = |evt: &PointerEvent| {
        let p = evt.element_coordinates();
        Point::new(p.x, p.y)
    };

    let on_change = props.on_change;
    let mut finish = move || {
        if editor.peek().drag_state() == DragState::Idle {
            return;
        }
        editor.write().end_drag();
        let quad = editor.peek().quad().copied();
        if let (Some(on_change), Some(quad)) = (on_change, quad) {
            on_change.call(quad);
        }
    };

    let state = editor.read();
    let (width, height) = state
        .display()
        .map_or((0.0, 0.0), |d| (d.width, d.height));
    let quad = state.quad().copied();
    let rotate_handle = state.rotate_handle();
    let dragging = state.drag_state();
    drop(state);

    let points = quad.map(|q| polygon_points(&q)).unwrap_or_default();
    let top_mid = quad.map(|q| q.0[0].midpoint(q.0[1]));
    let corners: Vec<(usize, Point, &str)> = quad
        .map(|q| {
            q.0.iter()
                .enumerate()
                .map(|(i, p)| {
                    let fill = if dragging == DragState::DraggingCorner(i) {
                        HANDLE_ACTIVE
                    } else {
                        "white"
                    };
                    (i, *p, fill)
                })
                .collect()
        })
        .unwrap_or_default();

    let cursor = match dragging {
        DragState::Idle => "default",
        DragState::DraggingCorner(_) => "grabbing",
        DragState::Rotating => "alias",
    };

    rsx! {
        div {
            class: "relative inline-block select-none touch-none",

            img {
                src: "{props.image_url}",
                class: "block max-w-full max-h-[70vh]",
                alt: "Image to crop",
                draggable: "false",
                onmounted: move |evt| image_element.set(Some(evt.data())),
                onload: move |_| async move { measure().await },
            }

            if quad.is_some() {
                svg {
                    xmlns: "http://www.w3.org/2000/svg",
                    class: "absolute inset-0 w-full h-full pointer-events-none",
                    view_box: "0 0 {width} {height}",

                    polygon {
                        points: "{points}",
                        fill: "rgba(59, 130, 246, 0.15)",
                        stroke: "rgb(59, 130, 246)",
                        stroke_width: "2",
                    }

                    if let (Some(handle), Some(mid)) = (rotate_handle, top_mid) {
                        line {
                            x1: "{mid.x}",
                            y1: "{mid.y}",
                            x2: "{handle.x}",
                            y2: "{handle.y}",
                            stroke: "rgb(59, 130, 246)",
                            stroke_width: "1",
                        }
                        circle {
                            cx: "{handle.x}",
                            cy: "{handle.y}",
                            r: "{ROTATE_RADIUS}",
                            fill: "white",
                            stroke: "rgb(59, 130, 246)",
                            stroke_width: "2",
                        }
                    }

                    for (i, corner, fill) in corners {
                        circle {
                            key: "{i}",
                            cx: "{corner.x}",
                            cy: "{corner.y}",
                            r: "{CORNER_RADIUS}",
                            fill: "{fill}",
                            stroke: "rgb(59, 130, 246)",
                            stroke_width: "2",
                        }
                    }
                }

                // Pointer target covering the image, so element
                // coordinates are display coordinates.
                div {
                    class: "absolute inset-0",
                    style: "cursor: {cursor};",
                    onpointerdown: move |evt| {
                        let point = pointer_at(&evt);
                        let handle = editor.peek().handle_at(point, HANDLE_HIT_RADIUS);
                        if let Some(handle) = handle {
                            evt.prevent_default();
                            editor.write().begin_drag(handle);
                        }
                    },
                    onpointermove: move |evt| {
                        if editor.peek().drag_state() == DragState::Idle {
                            return;
                        }
                        let point = pointer_at(&evt);
                        editor.write().update_drag(point);
                    },
                    onpointerup: move |_| finish(),
                    onpointerleave: move |_| finish(),
                    onpointercancel: move |_| finish(),
                }
            }
        }
    }
}

/// SVG `points` attribute for a quadrilateral, in insertion order.
fn polygon_points(quad: &Quad) -> String {
    let mut points = String::new();
    for p in &quad.0 {
        let _ = write!(points, "{:.1},{:.1} ", p.x, p.y);
    }
    points.trim_end().to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn polygon_points_are_space_separated_pairs() {
        let quad = Quad::rectangle(0.0, 0.0, 10.0, 5.5);
        let points = polygon_points(&quad);
        assert_eq!(points.split(' ').count(), 4);
        assert!(points.starts_with("0.0,0.0"));
        assert!(points.contains("10.0,5.5"));
    }
}
