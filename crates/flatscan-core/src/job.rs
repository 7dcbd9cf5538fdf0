//! Messages exchanged with a background worker.
//!
//! A request is a small JSON header ([`JobRequest`]) plus the image
//! bytes, which travel separately so they can be transferred rather
//! than copied. A reply is a [`JobResponse`] header plus, on success,
//! the encoded bytes.

use serde::{Deserialize, Serialize};

use crate::config::ScanConfig;
use crate::convert::ConversionSettings;
use crate::engine::Engine;
use crate::enhance::EnhancementParameters;
use crate::geometry::Quad;
use crate::history::HistoryKind;
use crate::rectify::RectifyConfig;
use crate::types::{Encoded, EncodedMeta, OutputSettings, ScanError, Size};

/// One unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Job {
    /// Rectify a selection and return the JPEG intermediate.
    Rectify {
        /// Selection corners.
        quad: Quad,
        /// Rendered size when `quad` is in display space.
        #[serde(default)]
        display: Option<Size>,
        /// Rectification settings.
        #[serde(default)]
        config: RectifyConfig,
    },
    /// Enhance and encode.
    Enhance {
        /// Enhancement settings.
        #[serde(default)]
        params: EnhancementParameters,
        /// Final encode settings.
        #[serde(default)]
        output: OutputSettings,
    },
    /// Rectify then enhance.
    Scan {
        /// Selection corners.
        quad: Quad,
        /// Rendered size when `quad` is in display space.
        #[serde(default)]
        display: Option<Size>,
        /// Full scan settings.
        #[serde(default)]
        config: ScanConfig,
    },
    /// Convert format and size.
    Convert {
        /// Conversion settings.
        #[serde(default)]
        settings: ConversionSettings,
    },
}

impl Job {
    /// Short name for logs.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Rectify { .. } => "rectify",
            Self::Enhance { .. } => "enhance",
            Self::Scan { .. } => "scan",
            Self::Convert { .. } => "convert",
        }
    }

    /// The history category a successful run is recorded under.
    #[must_use]
    pub const fn history_kind(&self) -> HistoryKind {
        match self {
            Self::Rectify { .. } => HistoryKind::Rectify,
            Self::Enhance { .. } => HistoryKind::Enhance,
            Self::Scan { .. } => HistoryKind::Scan,
            Self::Convert { .. } => HistoryKind::Convert,
        }
    }

    /// Run the job on `engine` over `source`.
    ///
    /// # Errors
    ///
    /// Whatever the corresponding [`Engine`] method returns.
    pub fn run(&self, engine: &Engine, source: &[u8]) -> Result<Encoded, ScanError> {
        tracing::debug!(job = self.name(), input_bytes = source.len(), "running job");
        match self {
            Self::Rectify {
                quad,
                display: Some(display),
                config,
            } => engine.rectify_display(source, quad, *display, config),
            Self::Rectify {
                quad,
                display: None,
                config,
            } => engine.rectify(source, quad, config),
            Self::Enhance { params, output } => engine.enhance(source, params, output),
            Self::Scan {
                quad,
                display,
                config,
            } => engine.scan(source, quad, *display, config),
            Self::Convert { settings } => engine.convert(source, settings),
        }
    }
}

/// Header of a request to the worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRequest {
    /// Request token, echoed back in the response.
    pub generation: u64,
    /// The work to do.
    pub job: Job,
}

/// Header of a reply from the worker.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobResponse {
    /// The job succeeded; the encoded bytes accompany this header.
    Done {
        /// Token of the request this answers.
        generation: u64,
        /// Format, size and dimensions of the accompanying bytes.
        meta: EncodedMeta,
    },
    /// The job failed.
    Failed {
        /// Token of the request this answers.
        generation: u64,
        /// What went wrong.
        error: ScanError,
    },
}

impl JobResponse {
    /// Token of the request this answers.
    #[must_use]
    pub const fn generation(&self) -> u64 {
        match self {
            Self::Done { generation, .. } | Self::Failed { generation, .. } => *generation,
        }
    }
}

/// The first message a worker posts, once it can accept jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ready {
    /// Always `true`.
    pub ready: bool,
}

impl Ready {
    /// The readiness message.
    pub const MESSAGE: Self = Self { ready: true };
}
