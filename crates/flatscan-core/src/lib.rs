//! flatscan-core: document crop, perspective rectification and tone
//! enhancement (sans-IO).
//!
//! Data flows leaf-first through:
//! quadrilateral editor (display space) -> coordinate mapper (source
//! space) -> rectification (fixed-size page) -> enhancement -> encode.
//!
//! This crate has **no I/O dependencies**: it operates on in-memory
//! byte slices and returns encoded bytes plus metadata. Browser and
//! filesystem interaction lives in `flatscan-io`, `flatscan-worker` and
//! `flatscan-cli`.
//!
//! Every intermediate raster is registered with a [`BufferLedger`] and
//! released before the producing call returns; see [`resources`].

pub mod codec;
pub mod config;
pub mod convert;
pub mod diagnostics;
pub mod editor;
pub mod engine;
pub mod enhance;
pub mod geometry;
pub mod history;
pub mod job;
pub mod mapper;
pub mod pipeline;
pub mod rectify;
pub mod resources;
pub mod session;
pub mod types;

pub use config::ScanConfig;
pub use convert::{ConversionSettings, ResizeFilter, SizeMode};
pub use diagnostics::{Clock, ScanDiagnostics, WebClock};
pub use editor::{
    DragState, Handle, QuadEditor, Rotation, initial_crop, rotate_handle_position, rotate_to,
    update_corner,
};
pub use engine::Engine;
pub use enhance::EnhancementParameters;
pub use geometry::{OrderedQuad, Quad};
pub use history::{HistoryKind, HistoryRecord, HistorySink, RecentHistory};
pub use job::{Job, JobRequest, JobResponse, Ready};
pub use mapper::{map_to_display_space, map_to_source_space};
pub use pipeline::Pipeline;
pub use rectify::RectifyConfig;
pub use resources::{BufferLedger, Tracked};
pub use session::{EnhanceSession, Generation, RequestTracker};
pub use types::{
    Dimensions, Encoded, EncodedMeta, ErrorCategory, OutputFormat, OutputSettings, Point,
    RgbImage, ScanError, Size,
};

/// Rectify the source-space `quad` of `source` onto the default
/// 595x842 page and return the JPEG intermediate.
///
/// Uses a throwaway [`Engine`]; keep an engine around to observe its
/// ledger across calls.
///
/// # Errors
///
/// See [`Engine::rectify`].
pub fn rectify(source: &[u8], quad: &Quad) -> Result<Encoded, ScanError> {
    Engine::new().rectify(source, quad, &RectifyConfig::default())
}

/// Enhance `source` with `params` and encode with the default output
/// settings (JPEG, quality 92). The result carries its byte size.
///
/// # Errors
///
/// See [`Engine::enhance`].
pub fn enhance(source: &[u8], params: &EnhancementParameters) -> Result<Encoded, ScanError> {
    Engine::new().enhance(source, params, &OutputSettings::default())
}
