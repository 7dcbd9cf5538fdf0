//! Incremental pipeline: advance stage by stage, inspecting each
//! intermediate raster before continuing.
//!
//! ```rust
//! # use flatscan_core::{BufferLedger, EnhancementParameters, OutputSettings, Pipeline, Quad, RectifyConfig, ScanError};
//! # fn run(jpeg: &[u8], quad: &Quad) -> Result<(), ScanError> {
//! let ledger = BufferLedger::new();
//! let encoded = Pipeline::new(&ledger, jpeg)
//!     .decode()?
//!     .rectify(quad, &RectifyConfig::default())?
//!     .enhance(&EnhancementParameters::AUTO)
//!     .encode(&OutputSettings::default())?;
//! assert_eq!(ledger.live(), 0);
//! # Ok(())
//! # }
//! ```
//!
//! Each stage method consumes `self` and returns the next state, so
//! stages cannot be skipped or reordered. Every raster a stage holds is
//! a [`Tracked`] buffer on the caller's [`BufferLedger`]; advancing
//! releases the previous stage's raster once the next one is filled,
//! and dropping a stage (including on an error path) releases whatever
//! it holds.

use crate::codec;
use crate::enhance::{self, EnhancementParameters};
use crate::geometry::Quad;
use crate::rectify::{self, RectifyConfig};
use crate::resources::{BufferLedger, Tracked};
use crate::types::{Dimensions, Encoded, OutputFormat, OutputSettings, RgbImage, ScanError};

// ───────────────────────── Stage 0: Pending ──────────────────────────

/// Pipeline state before any processing has occurred.
#[must_use = "pipeline stages are consumed by advancing; call .decode() to continue"]
pub struct Pending<'l> {
    ledger: &'l BufferLedger,
    source: &'l [u8],
}

impl<'l> Pending<'l> {
    /// The raw source image bytes.
    #[must_use]
    pub const fn source(&self) -> &[u8] {
        self.source
    }

    /// Decode the source image to RGB and advance to [`Decoded`].
    ///
    /// # Errors
    ///
    /// Returns [`ScanError::EmptyInput`] if the source bytes are empty.
    /// Returns [`ScanError::Decode`] if the image format is
    /// unrecognized or the data is corrupt.
    pub fn decode(self) -> Result<Decoded<'l>, ScanError> {
        let image = codec::decode_rgb(self.source)?;
        tracing::debug!(
            input_bytes = self.source.len(),
            width = image.width(),
            height = image.height(),
            "decoded"
        );
        Ok(Decoded {
            ledger: self.ledger,
            image: self.ledger.track("decoded", image),
        })
    }
}

// ───────────────────────── Stage 1: Decoded ──────────────────────────

/// Pipeline state after decoding the source image.
#[must_use = "pipeline stages are consumed by advancing; call .rectify() or .enhance() to continue"]
pub struct Decoded<'l> {
    ledger: &'l BufferLedger,
    image: Tracked<'l, RgbImage>,
}

impl<'l> Decoded<'l> {
    /// The decoded RGB image.
    #[must_use]
    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    /// Native pixel size of the decoded image.
    #[must_use]
    pub fn dimensions(&self) -> Dimensions {
        Dimensions::new(self.image.width(), self.image.height())
    }

    /// Warp the selected region onto the configured target rectangle.
    ///
    /// `quad` must already be in source space. The selection and config
    /// are validated before the output raster is allocated.
    ///
    /// # Errors
    ///
    /// Returns [`ScanError::InvalidConfig`] or [`ScanError::Validation`]
    /// for unusable input, and [`ScanError::DegenerateTransform`] when
    /// no transform exists or the warped output samples all black.
    pub fn rectify(self, quad: &Quad, config: &RectifyConfig) -> Result<Rectified<'l>, ScanError> {
        config.validate()?;
        let ordered = rectify::validate_selection(quad)?;
        let projection = rectify::projection(&ordered, config.target())?;
        let mut warped = self.ledger.track(
            "warped",
            RgbImage::new(config.target_width, config.target_height),
        );
        rectify::warp(&self.image, &projection, &mut warped);
        drop(self.image);
        rectify::check_not_blank(&warped)?;
        tracing::debug!(
            width = config.target_width,
            height = config.target_height,
            "rectified"
        );
        Ok(Rectified {
            ledger: self.ledger,
            image: warped,
            intermediate_quality: config.intermediate_quality,
        })
    }

    /// Enhance the decoded image directly, without rectification.
    pub fn enhance(self, params: &EnhancementParameters) -> Enhanced<'l> {
        enhance_stage(self.ledger, self.image, params)
    }

    /// Release the ledger slot and take the decoded image.
    #[must_use]
    pub fn into_image(self) -> RgbImage {
        self.image.into_inner()
    }

    pub(crate) const fn ledger(&self) -> &'l BufferLedger {
        self.ledger
    }

    pub(crate) fn into_tracked(self) -> Tracked<'l, RgbImage> {
        self.image
    }
}

// ───────────────────────── Stage 2: Rectified ────────────────────────

/// Pipeline state after perspective rectification.
#[must_use = "pipeline stages are consumed by advancing; call .enhance() or .encode_intermediate() to continue"]
pub struct Rectified<'l> {
    ledger: &'l BufferLedger,
    image: Tracked<'l, RgbImage>,
    intermediate_quality: u8,
}

impl<'l> Rectified<'l> {
    /// The rectified image.
    #[must_use]
    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    /// Encode the rectified image as the JPEG intermediate that the
    /// enhancement stage takes as input.
    ///
    /// # Errors
    ///
    /// Returns [`ScanError::Encode`] if the encoder fails.
    pub fn encode_intermediate(self) -> Result<Encoded, ScanError> {
        let settings = OutputSettings {
            format: OutputFormat::Jpeg,
            quality: self.intermediate_quality,
        };
        codec::encode(&self.image, &settings)
    }

    /// Enhance the rectified pixels in place of a JPEG round trip.
    pub fn enhance(self, params: &EnhancementParameters) -> Enhanced<'l> {
        enhance_stage(self.ledger, self.image, params)
    }
}

// ───────────────────────── Stage 3: Enhanced ─────────────────────────

/// Pipeline state after tone and colour enhancement.
#[must_use = "pipeline stages are consumed by advancing; call .encode() to finish"]
pub struct Enhanced<'l> {
    image: Tracked<'l, RgbImage>,
}

impl Enhanced<'_> {
    /// The enhanced image.
    #[must_use]
    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    /// Encode the final image. The raster is released when this
    /// returns, whether or not encoding succeeded.
    ///
    /// # Errors
    ///
    /// Returns [`ScanError::Encode`] if the encoder fails.
    pub fn encode(self, output: &OutputSettings) -> Result<Encoded, ScanError> {
        let encoded = codec::encode(&self.image, output)?;
        tracing::debug!(
            format = %encoded.format,
            byte_size = encoded.byte_size,
            "encoded"
        );
        Ok(encoded)
    }
}

fn enhance_stage<'l>(
    ledger: &'l BufferLedger,
    image: Tracked<'l, RgbImage>,
    params: &EnhancementParameters,
) -> Enhanced<'l> {
    let adjustments = params.resolve();
    tracing::debug!(?adjustments, "enhancing");
    Enhanced {
        image: enhance::enhance_image(ledger, image, &adjustments),
    }
}

/// Entry point for the incremental pipeline.
pub struct Pipeline;

impl Pipeline {
    /// Start a pipeline over `source`, tracking buffers on `ledger`.
    ///
    /// No processing is performed until [`Pending::decode`].
    #[allow(clippy::new_ret_no_self)]
    pub const fn new<'l>(ledger: &'l BufferLedger, source: &'l [u8]) -> Pending<'l> {
        Pending { ledger, source }
    }
}
