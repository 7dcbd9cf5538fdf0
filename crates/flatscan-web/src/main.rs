//! flatscan web front end.
//!
//! Pick or photograph a document, drag the four corners onto it,
//! rectify, then tune the enhancement and download the page. Rectify
//! and enhance jobs run in the background worker embedded at build
//! time; when it cannot start, images pass through unchanged.

use std::rc::Rc;

use dioxus::prelude::*;
use flatscan_core::{
    Encoded, EnhanceSession, EnhancementParameters, HistoryKind, HistoryRecord, HistorySink, Job,
    OutputSettings, QuadEditor, RecentHistory, RectifyConfig, ScanError,
};
use flatscan_io::components::UploadedImage;
use flatscan_io::worker::READY_TIMEOUT;
use flatscan_io::{
    CropOverlay, ImageUpload, LocalStorageHistory, ScanWorker, download, history, raster, routing,
};

const WORKER_JS: &str = include_str!(env!("WORKER_JS_PATH"));
const WORKER_WASM: &[u8] = include_bytes!(env!("WORKER_WASM_PATH"));
const APP_CSS: &str = include_str!("../assets/app.css");

fn main() {
    dioxus::launch(app);
}

/// The uploaded photo.
struct Source {
    name: String,
    bytes: Rc<[u8]>,
    url: String,
}

/// Run `job` over `source` in the worker, or hand the input back when no
/// worker could be started.
#[allow(clippy::future_not_send)] // WASM is single-threaded; Send is not needed
async fn run_job(
    worker: Option<Rc<ScanWorker>>,
    source: &[u8],
    job: Job,
) -> Result<Option<Encoded>, ScanError> {
    match worker {
        Some(worker) => worker.run_or_passthrough(source, job, READY_TIMEOUT).await,
        None => routing::passthrough(source).map(Some),
    }
}

/// Replace the shown result and its object URL.
fn show_result(
    mut result: Signal<Option<Encoded>>,
    mut preview_url: Signal<Option<String>>,
    encoded: Encoded,
) {
    if let Some(old) = preview_url.take() {
        raster::revoke_blob_url(&old);
    }
    match raster::encoded_to_blob_url(&encoded) {
        Ok(url) => preview_url.set(Some(url)),
        Err(e) => tracing::warn!(error = %e, "could not create preview URL"),
    }
    result.set(Some(encoded));
}

/// One line describing a history entry.
fn history_label(record: &HistoryRecord) -> String {
    let kind = match record.kind {
        HistoryKind::Rectify => "Rectified",
        HistoryKind::Enhance => "Enhanced",
        HistoryKind::Scan => "Scanned",
        HistoryKind::Convert => "Converted",
    };
    let meta = &record.metadata;
    format!(
        "{kind} {}x{} {}, {} KB",
        meta.dimensions.width,
        meta.dimensions.height,
        meta.format,
        meta.byte_size.div_ceil(1024)
    )
}

/// Root application component.
#[allow(clippy::too_many_lines)]
fn app() -> Element {
    let worker = use_signal(|| match ScanWorker::new(WORKER_JS, WORKER_WASM) {
        Ok(worker) => Some(Rc::new(worker)),
        Err(e) => {
            tracing::warn!(error = %e, "scan worker unavailable");
            None
        }
    });
    let mut history = use_signal(|| {
        LocalStorageHistory::load(history::STORAGE_KEY, RecentHistory::DEFAULT_CAPACITY)
            .map_err(|e| tracing::warn!(error = %e, "history disabled"))
            .ok()
    });

    let mut source = use_signal(|| Option::<Source>::None);
    let mut editor = use_signal(QuadEditor::new);
    let mut session = use_signal(|| Option::<EnhanceSession>::None);
    let mut params = use_signal(|| EnhancementParameters::NEUTRAL);
    let result = use_signal(|| Option::<Encoded>::None);
    let preview_url = use_signal(|| Option::<String>::None);
    let mut busy = use_signal(|| false);
    let mut error = use_signal(|| Option::<String>::None);

    let on_upload = move |image: UploadedImage| {
        let url = match raster::bytes_to_blob_url(&image.bytes, image.mime_type) {
            Ok(url) => url,
            Err(e) => {
                error.set(Some(format!("Could not show {}: {e}", image.name)));
                return;
            }
        };
        if let Some(old) = source.take() {
            raster::revoke_blob_url(&old.url);
        }
        editor.write().reset();
        session.set(None);
        params.set(EnhancementParameters::NEUTRAL);
        error.set(None);
        source.set(Some(Source {
            name: image.name,
            bytes: image.bytes.into(),
            url,
        }));
    };

    let rectify = move |_: MouseEvent| {
        let Some(bytes) = source.peek().as_ref().map(|s| Rc::clone(&s.bytes)) else {
            return;
        };
        let (Some(quad), Some(display)) = (editor.peek().quad().copied(), editor.peek().display())
        else {
            return;
        };
        let job = Job::Rectify {
            quad,
            display: Some(display),
            config: RectifyConfig::default(),
        };
        let worker = worker.peek().clone();
        busy.set(true);
        error.set(None);
        spawn(async move {
            let outcome = run_job(worker, &bytes, job).await;
            busy.set(false);
            match outcome {
                Ok(Some(encoded)) => {
                    editor.write().reset();
                    params.set(EnhancementParameters::NEUTRAL);
                    session.set(Some(EnhanceSession::new(
                        encoded.bytes.clone(),
                        OutputSettings::default(),
                    )));
                    show_result(result, preview_url, encoded);
                }
                Ok(None) => {}
                Err(e) => error.set(Some(e.user_message())),
            }
        });
    };

    // Every change recomputes from the rectified original; replies to
    // superseded requests come back as `None` and are ignored.
    let enhance = use_callback(move |next: EnhancementParameters| {
        params.set(next);
        let Some((original, output)) = session
            .peek()
            .as_ref()
            .map(|s| (s.original().to_vec(), *s.output()))
        else {
            return;
        };
        let worker = worker.peek().clone();
        spawn(async move {
            let job = Job::Enhance {
                params: next,
                output,
            };
            match run_job(worker, &original, job).await {
                Ok(Some(encoded)) => {
                    if let Some(s) = session.write().as_mut() {
                        s.accept(next, encoded.clone());
                    }
                    show_result(result, preview_url, encoded);
                }
                Ok(None) => {}
                Err(e) => error.set(Some(e.user_message())),
            }
        });
    });

    let save = move |_: MouseEvent| {
        let Some(encoded) = result.peek().clone() else {
            return;
        };
        let stem = source
            .peek()
            .as_ref()
            .map_or_else(String::new, |s| s.name.clone());
        if let Err(e) = download::download_encoded(&encoded, &stem) {
            error.set(Some(format!("Download failed: {e}")));
            return;
        }
        let thumbnail = raster::encoded_to_blob_url(&encoded).ok();
        let record =
            HistoryRecord::from_encoded(HistoryKind::Scan, &encoded, thumbnail, history::now_ms());
        if let Some(sink) = history.write().as_mut()
            && let Err(e) = sink.record(record)
        {
            tracing::warn!(error = %e, "could not save history");
        }
    };

    let cancel_crop = move |_: MouseEvent| {
        editor.write().reset();
        if let Some(old) = source.take() {
            raster::revoke_blob_url(&old.url);
        }
    };

    let current = params();
    let entries: Vec<(String, Option<String>)> = history
        .read()
        .as_ref()
        .map(|h| {
            h.history()
                .iter()
                .map(|r| (history_label(r), r.preview_url.clone()))
                .collect()
        })
        .unwrap_or_default();

    rsx! {
        style { dangerous_inner_html: APP_CSS }

        div { class: "app",
            header { class: "app-header",
                h1 { "flatscan" }
                p { "Turn a photo of a page into a flat, clean scan" }
            }

            main { class: "app-main",
                if let Some(ref err) = error() {
                    p { class: "app-error", "{err}" }
                }

                if busy() {
                    p { class: "app-busy", "Processing..." }
                }

                if let Some(url) = source.read().as_ref().map(|s| s.url.clone()) {
                    if session.read().is_none() {
                        section { class: "panel",
                            h2 { "Drag the corners onto the page" }
                            CropOverlay { image_url: url, editor: editor }
                            div { class: "actions",
                                button {
                                    class: "button",
                                    disabled: busy() || editor.read().quad().is_none(),
                                    onclick: rectify,
                                    "Rectify"
                                }
                                button { class: "button secondary", onclick: cancel_crop, "Cancel" }
                            }
                        }
                    }
                }

                if session.read().is_some() {
                    section { class: "panel",
                        h2 { "Adjust" }
                        if let Some(url) = preview_url() {
                            img { class: "result", src: "{url}", alt: "Rectified page" }
                        }
                        div { class: "actions",
                            button {
                                class: "button",
                                onclick: move |_| enhance.call(EnhancementParameters {
                                    denoise: params.peek().denoise,
                                    ..EnhancementParameters::AUTO
                                }),
                                "Auto enhance"
                            }
                            button {
                                class: "button secondary",
                                onclick: move |_| enhance.call(EnhancementParameters::NEUTRAL),
                                "Reset"
                            }
                        }
                        Slider {
                            label: "Brightness",
                            value: current.brightness,
                            max: EnhancementParameters::MAX_PERCENT,
                            on_change: move |v| enhance.call(EnhancementParameters {
                                brightness: v,
                                auto: false,
                                ..params()
                            }),
                        }
                        Slider {
                            label: "Contrast",
                            value: current.contrast,
                            max: EnhancementParameters::MAX_PERCENT,
                            on_change: move |v| enhance.call(EnhancementParameters {
                                contrast: v,
                                auto: false,
                                ..params()
                            }),
                        }
                        Slider {
                            label: "Saturation",
                            value: current.saturation,
                            max: EnhancementParameters::MAX_PERCENT,
                            on_change: move |v| enhance.call(EnhancementParameters {
                                saturation: v,
                                auto: false,
                                ..params()
                            }),
                        }
                        Slider {
                            label: "Sharpness",
                            value: u16::from(current.sharpness),
                            max: u16::from(EnhancementParameters::MAX_STRENGTH),
                            on_change: move |v| enhance.call(EnhancementParameters {
                                sharpness: strength(v),
                                auto: false,
                                ..params()
                            }),
                        }
                        Slider {
                            label: "Denoise",
                            value: u16::from(current.denoise),
                            max: u16::from(EnhancementParameters::MAX_STRENGTH),
                            on_change: move |v| enhance.call(EnhancementParameters {
                                denoise: strength(v),
                                ..params()
                            }),
                        }
                        div { class: "actions",
                            button {
                                class: "button",
                                disabled: result.read().is_none(),
                                onclick: save,
                                "Download"
                            }
                        }
                    }
                } else if source.read().is_none() {
                    ImageUpload { on_upload: on_upload }
                }

                if !entries.is_empty() {
                    section { class: "panel",
                        h2 { "Recent" }
                        ul { class: "history",
                            for (i, (label, thumb)) in entries.iter().enumerate() {
                                li { key: "{i}",
                                    if let Some(thumb) = thumb {
                                        img { class: "thumb", src: "{thumb}", alt: "" }
                                    }
                                    span { "{label}" }
                                }
                            }
                        }
                        button {
                            class: "button secondary",
                            onclick: move |_| {
                                if let Some(sink) = history.write().as_mut()
                                    && let Err(e) = sink.clear()
                                {
                                    tracing::warn!(error = %e, "could not clear history");
                                }
                            },
                            "Clear"
                        }
                    }
                }
            }
        }
    }
}

/// A slider value as a 0 to 100 strength.
fn strength(value: u16) -> u8 {
    u8::try_from(value.min(u16::from(EnhancementParameters::MAX_STRENGTH)))
        .unwrap_or(EnhancementParameters::MAX_STRENGTH)
}

/// A labelled range input.
#[component]
fn Slider(label: &'static str, value: u16, max: u16, on_change: EventHandler<u16>) -> Element {
    rsx! {
        label { class: "slider",
            span { "{label}" }
            input {
                r#type: "range",
                min: "0",
                max: "{max}",
                value: "{value}",
                oninput: move |evt: FormEvent| {
                    if let Ok(v) = evt.value().parse::<u16>() {
                        on_change.call(v.min(max));
                    }
                },
            }
            span { class: "slider-value", "{value}" }
        }
    }
}
