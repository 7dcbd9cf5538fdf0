//! flatscan-io: Browser I/O and Dioxus component library.
//!
//! Handles web worker communication, Blob URLs and downloads, the
//! `localStorage` history sink, and the crop overlay component for a
//! flatscan web front end.

pub mod components;
pub mod download;
pub mod history;
pub mod raster;
pub mod routing;
pub mod worker;

pub use components::{CropOverlay, ImageUpload};
pub use history::{HistoryError, LocalStorageHistory};
pub use routing::{Router, WorkerMessage};
pub use worker::ScanWorker;
