//! Image intake: file picker, camera capture and drag-and-drop.

use dioxus::html::{FileData, HasFileData};
use dioxus::prelude::*;

/// Largest accepted upload.
pub const MAX_UPLOAD_BYTES: usize = 25 * 1024 * 1024;

/// Accepted extensions and the MIME type each declares.
const ACCEPTED: &[(&str, &str)] = &[
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("png", "image/png"),
    ("webp", "image/webp"),
];

/// An image handed over by [`ImageUpload`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedImage {
    /// File name as picked, extension included.
    pub name: String,
    /// MIME type declared by the extension.
    pub mime_type: &'static str,
    /// Raw file contents.
    pub bytes: Vec<u8>,
}

/// Check a picked file's name and size before handing it on.
///
/// # Errors
///
/// Returns a message for the user when the type is not accepted or the
/// file is empty or too large.
pub fn check_upload(name: &str, size: usize) -> Result<&'static str, String> {
    let mime = name
        .rsplit_once('.')
        .and_then(|(_, ext)| {
            ACCEPTED
                .iter()
                .find(|(accepted, _)| accepted.eq_ignore_ascii_case(ext))
        })
        .map(|&(_, mime)| mime)
        .ok_or_else(|| format!("Unsupported file type: {name}"))?;
    if size == 0 {
        return Err(format!("{name} is empty"));
    }
    if size > MAX_UPLOAD_BYTES {
        return Err(format!(
            "{name} is larger than {} MB",
            MAX_UPLOAD_BYTES / (1024 * 1024)
        ));
    }
    Ok(mime)
}

/// Props for the [`ImageUpload`] component.
#[derive(Props, Clone, PartialEq)]
pub struct ImageUploadProps {
    /// Fired with each accepted image.
    on_upload: EventHandler<UploadedImage>,
}

/// Drop zone with a file picker and a camera button.
#[component]
pub fn ImageUpload(props: ImageUploadProps) -> Element {
    let mut dragging = use_signal(|| false);
    let mut error = use_signal(|| Option::<String>::None);

    let take_first = move |files: Vec<FileData>| async move {
        let Some(file) = files.first() else {
            return;
        };
        let name = file.name();
        if let Err(e) = check_upload(&name, 1) {
            error.set(Some(e));
            return;
        }
        let bytes = match file.read_bytes().await {
            Ok(bytes) => bytes.to_vec(),
            Err(e) => {
                error.set(Some(format!("Failed to read {name}: {e}")));
                return;
            }
        };
        match check_upload(&name, bytes.len()) {
            Ok(mime_type) => {
                error.set(None);
                tracing::info!(%name, bytes = bytes.len(), mime_type, "image picked");
                props.on_upload.call(UploadedImage {
                    name,
                    mime_type,
                    bytes,
                });
            }
            Err(e) => error.set(Some(e)),
        }
    };

    let zone = if dragging() {
        "upload-zone upload-zone-active"
    } else {
        "upload-zone"
    };

    rsx! {
        div {
            class: "{zone}",
            ondragover: move |evt| {
                evt.prevent_default();
                dragging.set(true);
            },
            ondragleave: move |_| dragging.set(false),
            ondrop: move |evt: DragEvent| async move {
                evt.prevent_default();
                dragging.set(false);
                take_first(evt.files()).await;
            },

            if let Some(ref err) = error() {
                p { class: "upload-error", "{err}" }
            }

            p { "Drop a photo of a document here" }

            div { class: "upload-buttons",
                label { class: "button",
                    input {
                        r#type: "file",
                        accept: ".jpg,.jpeg,.png,.webp",
                        class: "hidden",
                        onchange: move |evt: FormEvent| async move { take_first(evt.files()).await },
                    }
                    "Choose file"
                }
                label { class: "button",
                    input {
                        r#type: "file",
                        accept: "image/*",
                        "capture": "environment",
                        class: "hidden",
                        onchange: move |evt: FormEvent| async move { take_first(evt.files()).await },
                    }
                    "Take photo"
                }
            }
        }
    }
}
