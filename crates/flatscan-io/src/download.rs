//! File download via Blob URLs.
//!
//! Dioxus has no built-in file download API. This module triggers
//! downloads by creating a `Blob`, generating an object URL, and
//! programmatically clicking a temporary `<a>` element.
//!
//! All browser functions in this module require a browser environment
//! (`wasm32-unknown-unknown` target).

use flatscan_core::{Encoded, OutputFormat};
use wasm_bindgen::JsCast;
use wasm_bindgen::JsValue;

use crate::raster;

/// Errors that can occur when triggering a file download.
#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    /// A browser API call returned an error.
    #[error("browser API error: {0}")]
    JsError(String),
}

impl From<JsValue> for DownloadError {
    fn from(value: JsValue) -> Self {
        Self::JsError(format!("{value:?}"))
    }
}

impl From<raster::RasterError> for DownloadError {
    fn from(err: raster::RasterError) -> Self {
        match err {
            raster::RasterError::JsError(msg) => Self::JsError(msg),
        }
    }
}

/// Download filename for a scan named `stem` in `format`.
///
/// Any extension already on `stem` is replaced; an empty stem becomes
/// `"scan"`.
#[must_use]
pub fn output_filename(stem: &str, format: OutputFormat) -> String {
    let stem = stem
        .rsplit_once('.')
        .map_or(stem, |(base, _)| base)
        .trim();
    let stem = if stem.is_empty() { "scan" } else { stem };
    format!("{stem}.{}", format.extension())
}

/// Trigger a file download in the browser.
///
/// Creates a `Blob` from `data`, generates an object URL, and
/// programmatically clicks a temporary `<a download="filename">` element.
/// The object URL is revoked after the click.
///
/// # Errors
///
/// Returns [`DownloadError::JsError`] if any browser API call fails
/// (e.g., `Blob` creation, `URL.createObjectURL`, element creation).
pub fn trigger_download(data: &[u8], filename: &str, mime_type: &str) -> Result<(), DownloadError> {
    let window =
        web_sys::window().ok_or_else(|| DownloadError::JsError("no global window".into()))?;
    let document = window
        .document()
        .ok_or_else(|| DownloadError::JsError("no document".into()))?;

    let url = raster::bytes_to_blob_url(data, mime_type)?;

    let anchor: web_sys::HtmlAnchorElement = document
        .create_element("a")?
        .dyn_into::<web_sys::HtmlAnchorElement>()
        .map_err(|e| DownloadError::JsError(format!("failed to cast element: {e:?}")))?;

    anchor.set_href(&url);
    anchor.set_download(filename);

    let body = document
        .body()
        .ok_or_else(|| DownloadError::JsError("no document body".into()))?;
    body.append_child(&anchor)?;
    anchor.click();

    // The download is already initiated; cleanup failures are not
    // download failures.
    let _ = body.remove_child(&anchor);
    raster::revoke_blob_url(&url);

    Ok(())
}

/// Download an encoded scan as `<stem>.<ext>`.
///
/// # Errors
///
/// Same as [`trigger_download`].
pub fn download_encoded(encoded: &Encoded, stem: &str) -> Result<(), DownloadError> {
    trigger_download(
        &encoded.bytes,
        &output_filename(stem, encoded.format),
        encoded.format.mime_type(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filename_replaces_extension() {
        assert_eq!(output_filename("receipt.png", OutputFormat::Jpeg), "receipt.jpg");
        assert_eq!(output_filename("page", OutputFormat::Webp), "page.webp");
    }

    #[test]
    fn empty_stem_defaults() {
        assert_eq!(output_filename("", OutputFormat::Png), "scan.png");
        assert_eq!(output_filename(".hidden", OutputFormat::Png), "scan.png");
    }
}
