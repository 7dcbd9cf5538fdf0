//! Dioxus UI components for flatscan.

mod crop_overlay;
mod upload;

pub use crop_overlay::CropOverlay;
pub use upload::{ImageUpload, MAX_UPLOAD_BYTES, UploadedImage, check_upload};
