//! The engine: one ledger, many runs.
//!
//! Each method runs one complete pipeline invocation and returns
//! freshly encoded bytes. Nothing is retained between calls except the
//! ledger's counters, which [`Engine::live_buffers`] exposes for leak
//! checks.

use tracing::instrument;

use crate::config::ScanConfig;
use crate::convert::{self, ConversionSettings};
use crate::diagnostics::{Clock, ScanDiagnostics, StageDiagnostics, StageMetrics, Stopwatch};
use crate::enhance::EnhancementParameters;
use crate::geometry::Quad;
use crate::mapper;
use crate::pipeline::Pipeline;
use crate::rectify::{self, RectifyConfig};
use crate::resources::BufferLedger;
use crate::types::{Dimensions, Encoded, OutputSettings, ScanError, Size};

/// Runs rectify, enhance, scan and convert jobs against a shared
/// [`BufferLedger`].
#[derive(Debug, Default)]
pub struct Engine {
    ledger: BufferLedger,
}

impl Engine {
    /// An engine with an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The ledger every run registers its buffers with.
    #[must_use]
    pub const fn ledger(&self) -> &BufferLedger {
        &self.ledger
    }

    /// Buffers allocated and not yet released. Zero whenever no call is
    /// in progress.
    #[must_use]
    pub fn live_buffers(&self) -> usize {
        self.ledger.live()
    }

    /// Rectify the region `quad` (in source space) of `source` and
    /// return the JPEG intermediate.
    ///
    /// The selection is validated before the source is decoded.
    ///
    /// # Errors
    ///
    /// Returns [`ScanError::Validation`] or [`ScanError::InvalidConfig`]
    /// for unusable input, codec errors for undecodable bytes, and
    /// [`ScanError::DegenerateTransform`] for a blank warp.
    #[instrument(skip_all, fields(input_bytes = source.len()))]
    pub fn rectify(
        &self,
        source: &[u8],
        quad: &Quad,
        config: &RectifyConfig,
    ) -> Result<Encoded, ScanError> {
        config.validate()?;
        rectify::validate_selection(quad)?;
        Pipeline::new(&self.ledger, source)
            .decode()?
            .rectify(quad, config)?
            .encode_intermediate()
    }

    /// Like [`rectify`](Self::rectify), with `quad` in the display space
    /// of an image element rendered at `display`. The quad is mapped to
    /// source space once, after decoding reveals the source size.
    ///
    /// # Errors
    ///
    /// As [`rectify`](Self::rectify).
    #[instrument(skip_all, fields(input_bytes = source.len()))]
    pub fn rectify_display(
        &self,
        source: &[u8],
        quad: &Quad,
        display: Size,
        config: &RectifyConfig,
    ) -> Result<Encoded, ScanError> {
        config.validate()?;
        let decoded = Pipeline::new(&self.ledger, source).decode()?;
        let source_quad = mapper::map_to_source_space(quad, display, decoded.dimensions().into());
        decoded.rectify(&source_quad, config)?.encode_intermediate()
    }

    /// Enhance `source` and encode it with `output`.
    ///
    /// Always starts from the bytes given; callers that re-run with new
    /// parameters pass the original again (see
    /// [`EnhanceSession`](crate::EnhanceSession)).
    ///
    /// # Errors
    ///
    /// Returns [`ScanError::InvalidConfig`] for out-of-range parameters
    /// and codec errors for undecodable bytes or a failed encode.
    #[instrument(skip_all, fields(input_bytes = source.len(), auto = params.auto))]
    pub fn enhance(
        &self,
        source: &[u8],
        params: &EnhancementParameters,
        output: &OutputSettings,
    ) -> Result<Encoded, ScanError> {
        params.validate()?;
        output.validate()?;
        Pipeline::new(&self.ledger, source)
            .decode()?
            .enhance(params)
            .encode(output)
    }

    /// Rectify then enhance in one strictly sequential run, without the
    /// intermediate JPEG round trip.
    ///
    /// `display` gives the size of the rendered image element when
    /// `quad` is in display space; `None` means it is already in source
    /// space.
    ///
    /// # Errors
    ///
    /// The union of [`rectify`](Self::rectify) and
    /// [`enhance`](Self::enhance) errors.
    #[instrument(skip_all, fields(input_bytes = source.len()))]
    pub fn scan(
        &self,
        source: &[u8],
        quad: &Quad,
        display: Option<Size>,
        config: &ScanConfig,
    ) -> Result<Encoded, ScanError> {
        config.validate()?;
        let decoded = Pipeline::new(&self.ledger, source).decode()?;
        let quad = match display {
            Some(display) => mapper::map_to_source_space(quad, display, decoded.dimensions().into()),
            None => *quad,
        };
        decoded
            .rectify(&quad, &config.rectify)?
            .enhance(&config.enhance)
            .encode(&config.output)
    }

    /// [`scan`](Self::scan) with per-stage timings from `clock`.
    ///
    /// # Errors
    ///
    /// As [`scan`](Self::scan).
    pub fn scan_with_diagnostics<C: Clock>(
        &self,
        source: &[u8],
        quad: &Quad,
        display: Option<Size>,
        config: &ScanConfig,
        clock: &C,
    ) -> Result<(Encoded, ScanDiagnostics), ScanError> {
        config.validate()?;
        let acquired_before = self.ledger.acquired();
        let watch = Stopwatch::start(clock);

        let (decoded, decode_time) = watch.time(|| Pipeline::new(&self.ledger, source).decode());
        let decoded = decoded?;
        let dimensions = decoded.dimensions();
        let quad = match display {
            Some(display) => mapper::map_to_source_space(quad, display, dimensions.into()),
            None => *quad,
        };
        let selection_area = quad.ordered().area();

        let (rectified, rectify_time) = watch.time(|| decoded.rectify(&quad, &config.rectify));
        let rectified = rectified?;
        let (enhanced, enhance_time) = watch.time(|| rectified.enhance(&config.enhance));
        let adjustments = config.enhance.resolve();
        let (encoded, encode_time) = watch.time(|| enhanced.encode(&config.output));
        let encoded = encoded?;

        let diagnostics = ScanDiagnostics {
            decode: StageDiagnostics {
                duration: decode_time,
                metrics: StageMetrics::Decode {
                    input_bytes: source.len(),
                    dimensions,
                },
            },
            rectify: Some(StageDiagnostics {
                duration: rectify_time,
                metrics: StageMetrics::Rectify {
                    target: config.rectify.target(),
                    selection_area,
                },
            }),
            enhance: Some(StageDiagnostics {
                duration: enhance_time,
                metrics: StageMetrics::Enhance {
                    auto: config.enhance.auto,
                    sharpened: adjustments.sharpen.is_some(),
                    denoise_radius: adjustments.denoise_radius,
                },
            }),
            resize: None,
            encode: StageDiagnostics {
                duration: encode_time,
                metrics: StageMetrics::Encode {
                    format: encoded.format,
                    quality: config.output.quality,
                    byte_size: encoded.byte_size,
                },
            },
            total_duration: watch.total(),
            buffers_acquired: self.ledger.acquired() - acquired_before,
        };
        tracing::info!(
            byte_size = encoded.byte_size,
            total_ms = diagnostics.total_duration.as_secs_f64() * 1000.0,
            "scan complete"
        );
        Ok((encoded, diagnostics))
    }

    /// Convert `source` to another format, optionally resizing and
    /// targeting a byte budget.
    ///
    /// # Errors
    ///
    /// Returns [`ScanError::InvalidConfig`] for bad settings and codec
    /// errors for undecodable bytes or a failed encode.
    #[instrument(skip_all, fields(input_bytes = source.len(), format = %settings.format))]
    pub fn convert(
        &self,
        source: &[u8],
        settings: &ConversionSettings,
    ) -> Result<Encoded, ScanError> {
        settings.validate()?;
        let decoded = Pipeline::new(&self.ledger, source).decode()?;
        let image = convert::resize(decoded, settings)?;
        convert::encode_for(&image, settings)
    }

    /// [`convert`](Self::convert) with per-stage timings from `clock`.
    /// The resize stage is reported only when the image was resized.
    ///
    /// # Errors
    ///
    /// As [`convert`](Self::convert).
    pub fn convert_with_diagnostics<C: Clock>(
        &self,
        source: &[u8],
        settings: &ConversionSettings,
        clock: &C,
    ) -> Result<(Encoded, ScanDiagnostics), ScanError> {
        settings.validate()?;
        let acquired_before = self.ledger.acquired();
        let watch = Stopwatch::start(clock);

        let (decoded, decode_time) = watch.time(|| Pipeline::new(&self.ledger, source).decode());
        let decoded = decoded?;
        let from = decoded.dimensions();
        let (image, resize_time) = watch.time(|| convert::resize(decoded, settings));
        let image = image?;
        let to = Dimensions::new(image.width(), image.height());
        let (encoded, encode_time) = watch.time(|| convert::encode_for(&image, settings));
        drop(image);
        let encoded = encoded?;

        let diagnostics = ScanDiagnostics {
            decode: StageDiagnostics {
                duration: decode_time,
                metrics: StageMetrics::Decode {
                    input_bytes: source.len(),
                    dimensions: from,
                },
            },
            rectify: None,
            enhance: None,
            resize: (to != from).then_some(StageDiagnostics {
                duration: resize_time,
                metrics: StageMetrics::Resize { from, to },
            }),
            encode: StageDiagnostics {
                duration: encode_time,
                metrics: StageMetrics::Encode {
                    format: encoded.format,
                    quality: settings.quality,
                    byte_size: encoded.byte_size,
                },
            },
            total_duration: watch.total(),
            buffers_acquired: self.ledger.acquired() - acquired_before,
        };
        tracing::info!(
            byte_size = encoded.byte_size,
            total_ms = diagnostics.total_duration.as_secs_f64() * 1000.0,
            "convert complete"
        );
        Ok((encoded, diagnostics))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::codec;
    use crate::convert::SizeMode;
    use crate::types::{OutputFormat, Point, RgbImage};

    fn source_png(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_fn(width, height, |x, y| {
            #[allow(clippy::cast_possible_truncation)]
            image::Rgb([50 + (x % 180) as u8, 50 + (y % 180) as u8, 140])
        });
        codec::encode(
            &img,
            &OutputSettings {
                format: OutputFormat::Png,
                ..OutputSettings::default()
            },
        )
        .unwrap()
        .bytes
    }

    #[test]
    fn invalid_selection_is_rejected_before_decoding() {
        let engine = Engine::new();
        let quad = Quad::new([Point::new(1.0, 1.0); 4]);
        let result = engine.rectify(b"not an image", &quad, &RectifyConfig::default());
        assert!(matches!(result, Err(ScanError::Validation(_))));
        assert_eq!(engine.ledger().acquired(), 0);
    }

    #[test]
    fn display_space_quad_is_mapped_once() {
        let engine = Engine::new();
        let bytes = source_png(400, 200);
        // Half-size display: the display quad covers the source region
        // (40, 20)..(360, 180).
        let quad = Quad::rectangle(20.0, 10.0, 180.0, 90.0);
        let config = RectifyConfig {
            target_width: 64,
            target_height: 32,
            ..RectifyConfig::default()
        };
        let via_display = engine
            .rectify_display(&bytes, &quad, Size::new(200.0, 100.0), &config)
            .unwrap();
        let source_quad = Quad::rectangle(40.0, 20.0, 360.0, 180.0);
        let direct = engine.rectify(&bytes, &source_quad, &config).unwrap();
        assert_eq!(via_display.bytes, direct.bytes);
        assert_eq!(engine.live_buffers(), 0);
    }

    #[test]
    fn enhance_rejects_bad_parameters() {
        let engine = Engine::new();
        let result = engine.enhance(
            &source_png(4, 4),
            &EnhancementParameters::manual(100, 300, 100),
            &OutputSettings::default(),
        );
        assert!(matches!(result, Err(ScanError::InvalidConfig(_))));
    }

    #[test]
    fn scan_produces_target_size() {
        let engine = Engine::new();
        let bytes = source_png(300, 300);
        let quad = Quad::rectangle(30.0, 30.0, 270.0, 270.0);
        let encoded = engine
            .scan(&bytes, &quad, None, &ScanConfig::default())
            .unwrap();
        assert_eq!(encoded.dimensions, Dimensions::new(595, 842));
        assert_eq!(engine.live_buffers(), 0);
    }

    #[test]
    fn scan_diagnostics_cover_every_stage() {
        let engine = Engine::new();
        let bytes = source_png(120, 120);
        let quad = Quad::rectangle(10.0, 10.0, 110.0, 110.0);
        let (encoded, diag) = engine
            .scan_with_diagnostics(
                &bytes,
                &quad,
                None,
                &ScanConfig::default(),
                &crate::diagnostics::WebClock,
            )
            .unwrap();
        assert!(diag.rectify.is_some() && diag.enhance.is_some());
        assert!(diag.buffers_acquired >= 2);
        assert!(matches!(
            diag.encode.metrics,
            StageMetrics::Encode { byte_size, .. } if byte_size == encoded.byte_size
        ));
        assert_eq!(engine.live_buffers(), 0);
    }

    #[test]
    fn convert_resizes_and_changes_format() {
        let engine = Engine::new();
        let settings = ConversionSettings {
            format: OutputFormat::Webp,
            width: Some(50),
            ..ConversionSettings::default()
        };
        let encoded = engine.convert(&source_png(200, 100), &settings).unwrap();
        assert_eq!(encoded.format, OutputFormat::Webp);
        assert_eq!(encoded.dimensions, Dimensions::new(50, 25));
        assert_eq!(engine.live_buffers(), 0);
        // Decoded plus resized.
        assert_eq!(engine.ledger().acquired(), 2);
    }

    #[test]
    fn convert_diagnostics_report_resize() {
        let engine = Engine::new();
        let settings = ConversionSettings {
            width: Some(40),
            ..ConversionSettings::default()
        };
        let (encoded, diag) = engine
            .convert_with_diagnostics(&source_png(80, 40), &settings, &crate::diagnostics::WebClock)
            .unwrap();
        assert_eq!(encoded.dimensions, Dimensions::new(40, 20));
        assert!(diag.rectify.is_none() && diag.enhance.is_none());
        assert_eq!(
            diag.resize.unwrap().metrics,
            StageMetrics::Resize {
                from: Dimensions::new(80, 40),
                to: Dimensions::new(40, 20),
            }
        );
        assert_eq!(diag.buffers_acquired, 2);
        assert_eq!(engine.live_buffers(), 0);

        let (_, unresized) = engine
            .convert_with_diagnostics(
                &source_png(80, 40),
                &ConversionSettings::default(),
                &crate::diagnostics::WebClock,
            )
            .unwrap();
        assert!(unresized.resize.is_none());
    }

    #[test]
    fn convert_rejects_huge_sizes_without_allocating() {
        let engine = Engine::new();
        let settings = ConversionSettings {
            width: Some(u32::MAX),
            height: Some(u32::MAX),
            keep_aspect: false,
            filter: crate::convert::ResizeFilter::Nearest,
            ..ConversionSettings::default()
        };
        let result = engine.convert(&source_png(4, 4), &settings);
        assert!(matches!(result, Err(ScanError::InvalidConfig(_))));
        assert_eq!(engine.ledger().acquired(), 0);

        let strip = ConversionSettings {
            width: Some(ConversionSettings::MAX_SIDE),
            ..ConversionSettings::default()
        };
        let result = engine.convert(&source_png(1, 64), &strip);
        assert!(matches!(result, Err(ScanError::InvalidConfig(_))));
        assert_eq!(engine.live_buffers(), 0);
    }

    #[test]
    fn convert_with_budget_fits() {
        let engine = Engine::new();
        let settings = ConversionSettings {
            size_mode: SizeMode::TargetBytes(4_000),
            ..ConversionSettings::default()
        };
        let encoded = engine.convert(&source_png(128, 128), &settings).unwrap();
        assert!(encoded.byte_size <= 4_000);
    }
}
