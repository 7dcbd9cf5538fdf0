//! Format conversion with optional resize and size targeting.
//!
//! Conversion takes any decodable image, optionally resizes it to an
//! explicit width and/or height (with or without keeping the aspect
//! ratio), and encodes it either at a fixed quality or at the highest
//! JPEG quality that fits a byte budget.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::codec;
use crate::pipeline::Decoded;
use crate::rectify::RectifyConfig;
use crate::resources::Tracked;
use crate::types::{Dimensions, Encoded, OutputFormat, OutputSettings, RgbImage, ScanError};

/// Resampling filter used when resizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResizeFilter {
    /// Nearest-neighbor: fastest, blocky artifacts.
    Nearest,
    /// Bilinear interpolation: fast, decent quality.
    #[default]
    Triangle,
    /// Bicubic (Catmull-Rom).
    CatmullRom,
    /// Lanczos with 3 lobes: slowest, sharpest.
    Lanczos3,
}

impl ResizeFilter {
    const fn to_image_filter(self) -> image::imageops::FilterType {
        match self {
            Self::Nearest => image::imageops::FilterType::Nearest,
            Self::Triangle => image::imageops::FilterType::Triangle,
            Self::CatmullRom => image::imageops::FilterType::CatmullRom,
            Self::Lanczos3 => image::imageops::FilterType::Lanczos3,
        }
    }
}

impl fmt::Display for ResizeFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nearest => write!(f, "Nearest"),
            Self::Triangle => write!(f, "Triangle"),
            Self::CatmullRom => write!(f, "CatmullRom"),
            Self::Lanczos3 => write!(f, "Lanczos3"),
        }
    }
}

/// How the output size is controlled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SizeMode {
    /// Encode once at [`ConversionSettings::quality`].
    #[default]
    Quality,
    /// Search for the highest JPEG quality whose output fits in this
    /// many bytes.
    TargetBytes(usize),
}

/// Settings for one conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversionSettings {
    /// Output container format.
    pub format: OutputFormat,
    /// Quality, 0 to 100, for [`SizeMode::Quality`].
    pub quality: u8,
    /// Quality or byte-budget mode.
    pub size_mode: SizeMode,
    /// Requested output width.
    pub width: Option<u32>,
    /// Requested output height.
    pub height: Option<u32>,
    /// Keep the source aspect ratio when resizing.
    pub keep_aspect: bool,
    /// Resampling filter.
    pub filter: ResizeFilter,
}

impl Default for ConversionSettings {
    fn default() -> Self {
        Self {
            format: OutputFormat::Jpeg,
            quality: OutputSettings::DEFAULT_QUALITY,
            size_mode: SizeMode::Quality,
            width: None,
            height: None,
            keep_aspect: true,
            filter: ResizeFilter::Triangle,
        }
    }
}

impl ConversionSettings {
    /// Largest output side a resize may produce.
    pub const MAX_SIDE: u32 = RectifyConfig::MAX_TARGET_SIDE;

    /// Reject zero or oversized sides, zero byte budgets and quality
    /// above 100.
    ///
    /// # Errors
    ///
    /// Returns [`ScanError::InvalidConfig`] naming the first bad field.
    pub fn validate(&self) -> Result<(), ScanError> {
        self.output().validate()?;
        if self.width == Some(0) || self.height == Some(0) {
            return Err(ScanError::InvalidConfig(
                "width and height must be positive".to_owned(),
            ));
        }
        if self.width.max(self.height).is_some_and(|side| side > Self::MAX_SIDE) {
            return Err(ScanError::InvalidConfig(format!(
                "width and height must be at most {}",
                Self::MAX_SIDE
            )));
        }
        if self.size_mode == SizeMode::TargetBytes(0) {
            return Err(ScanError::InvalidConfig(
                "target byte size must be positive".to_owned(),
            ));
        }
        Ok(())
    }

    /// The equivalent single-shot output settings.
    #[must_use]
    pub const fn output(&self) -> OutputSettings {
        OutputSettings {
            format: self.format,
            quality: self.quality,
        }
    }

    /// Output dimensions for a source of size `source`.
    ///
    /// With `keep_aspect`, a single given side derives the other and two
    /// given sides form a box the result fits within. Without it, a
    /// missing side keeps the source's value.
    #[must_use]
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    pub fn resolve_dimensions(&self, source: Dimensions) -> Dimensions {
        let (sw, sh) = (f64::from(source.width), f64::from(source.height));
        let scaled = |s: f64| -> Dimensions {
            Dimensions::new(
                ((sw * s).round() as u32).max(1),
                ((sh * s).round() as u32).max(1),
            )
        };
        match (self.width, self.height, self.keep_aspect) {
            (None, None, _) => source,
            (Some(w), Some(h), false) => Dimensions::new(w, h),
            (Some(w), None, false) => Dimensions::new(w, source.height),
            (None, Some(h), false) => Dimensions::new(source.width, h),
            (Some(w), None, true) => scaled(f64::from(w) / sw),
            (None, Some(h), true) => scaled(f64::from(h) / sh),
            (Some(w), Some(h), true) => scaled((f64::from(w) / sw).min(f64::from(h) / sh)),
        }
    }

    /// [`resolve_dimensions`](Self::resolve_dimensions), rejecting a
    /// resize whose result exceeds [`MAX_SIDE`](Self::MAX_SIDE) on
    /// either side. A source that needs no resize is always accepted.
    ///
    /// # Errors
    ///
    /// Returns [`ScanError::InvalidConfig`] if the resized image would be
    /// too large.
    pub fn target_dimensions(&self, source: Dimensions) -> Result<Dimensions, ScanError> {
        let to = self.resolve_dimensions(source);
        if to != source && to.width.max(to.height) > Self::MAX_SIDE {
            return Err(ScanError::InvalidConfig(format!(
                "resizing {}x{} gives {}x{}, larger than {} on a side",
                source.width,
                source.height,
                to.width,
                to.height,
                Self::MAX_SIDE
            )));
        }
        Ok(to)
    }
}

/// Resize a decoded image per `settings`, returning it tracked on the
/// same ledger. Returns the input unchanged if no resize is needed.
///
/// # Errors
///
/// As [`ConversionSettings::target_dimensions`].
pub(crate) fn resize<'l>(
    decoded: Decoded<'l>,
    settings: &ConversionSettings,
) -> Result<Tracked<'l, RgbImage>, ScanError> {
    let from = decoded.dimensions();
    let to = settings.target_dimensions(from)?;
    if to == from {
        return Ok(decoded.into_tracked());
    }
    let ledger = decoded.ledger();
    let resized = image::imageops::resize(
        decoded.image(),
        to.width,
        to.height,
        settings.filter.to_image_filter(),
    );
    tracing::debug!(?from, ?to, filter = %settings.filter, "resized");
    Ok(ledger.track("resized", resized))
}

/// Encode `img` per the settings' size mode.
///
/// # Errors
///
/// Returns [`ScanError::Encode`] if the encoder fails.
pub fn encode_for(img: &RgbImage, settings: &ConversionSettings) -> Result<Encoded, ScanError> {
    match settings.size_mode {
        SizeMode::Quality => codec::encode(img, &settings.output()),
        SizeMode::TargetBytes(budget) => encode_within(img, settings.format, budget),
    }
}

/// Encode at the highest quality whose output fits `budget` bytes.
///
/// Only JPEG has a quality knob; lossless formats are encoded once. If
/// nothing fits, the smallest attempt is returned and a warning logged.
///
/// # Errors
///
/// Returns [`ScanError::Encode`] if the encoder fails.
pub fn encode_within(
    img: &RgbImage,
    format: OutputFormat,
    budget: usize,
) -> Result<Encoded, ScanError> {
    let dimensions = Dimensions::new(img.width(), img.height());
    if !format.is_lossy() {
        let encoded = codec::encode(
            img,
            &OutputSettings {
                format,
                quality: OutputSettings::DEFAULT_QUALITY,
            },
        )?;
        if encoded.byte_size > budget {
            tracing::warn!(
                %format,
                byte_size = encoded.byte_size,
                budget,
                "lossless output exceeds byte budget"
            );
        }
        return Ok(encoded);
    }

    // Largest q in [lo, hi] with size(q) <= budget; size grows with q.
    let (mut lo, mut hi) = (1u8, 100u8);
    let mut best: Option<(u8, Vec<u8>)> = None;
    while lo <= hi {
        let mid = lo + (hi - lo) / 2;
        let bytes = codec::encode_jpeg(img, mid)?;
        if bytes.len() <= budget {
            best = Some((mid, bytes));
            lo = mid + 1;
        } else if mid == 1 {
            break;
        } else {
            hi = mid - 1;
        }
    }
    let (quality, bytes) = match best {
        Some(found) => found,
        None => {
            let bytes = codec::encode_jpeg(img, 1)?;
            tracing::warn!(
                byte_size = bytes.len(),
                budget,
                "no JPEG quality fits the byte budget, using quality 1"
            );
            (1, bytes)
        }
    };
    tracing::debug!(quality, byte_size = bytes.len(), budget, "byte budget search");
    Ok(Encoded::new(bytes, OutputFormat::Jpeg, dimensions))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn noisy(width: u32, height: u32) -> RgbImage {
        RgbImage::from_fn(width, height, |x, y| {
            #[allow(clippy::cast_possible_truncation)]
            let v = (x.wrapping_mul(2_654_435_761) ^ y.wrapping_mul(40_503)) as u8;
            image::Rgb([v, v.wrapping_mul(3), v.wrapping_add(x as u8)])
        })
    }

    fn with(width: Option<u32>, height: Option<u32>, keep_aspect: bool) -> ConversionSettings {
        ConversionSettings {
            width,
            height,
            keep_aspect,
            ..ConversionSettings::default()
        }
    }

    #[test]
    fn no_size_keeps_source() {
        let src = Dimensions::new(400, 300);
        assert_eq!(with(None, None, true).resolve_dimensions(src), src);
    }

    #[test]
    fn aspect_lock_derives_missing_side() {
        let src = Dimensions::new(400, 300);
        assert_eq!(
            with(Some(200), None, true).resolve_dimensions(src),
            Dimensions::new(200, 150)
        );
        assert_eq!(
            with(None, Some(600), true).resolve_dimensions(src),
            Dimensions::new(800, 600)
        );
    }

    #[test]
    fn aspect_lock_fits_within_box() {
        let src = Dimensions::new(400, 300);
        assert_eq!(
            with(Some(100), Some(100), true).resolve_dimensions(src),
            Dimensions::new(100, 75)
        );
    }

    #[test]
    fn unlocked_uses_given_sides() {
        let src = Dimensions::new(400, 300);
        assert_eq!(
            with(Some(100), Some(100), false).resolve_dimensions(src),
            Dimensions::new(100, 100)
        );
        assert_eq!(
            with(Some(50), None, false).resolve_dimensions(src),
            Dimensions::new(50, 300)
        );
    }

    #[test]
    fn tiny_scale_never_reaches_zero() {
        let src = Dimensions::new(1000, 10);
        assert_eq!(
            with(Some(10), None, true).resolve_dimensions(src),
            Dimensions::new(10, 1)
        );
    }

    #[test]
    fn validate_rejects_zero_sizes() {
        assert!(with(Some(0), None, true).validate().is_err());
        let budget = ConversionSettings {
            size_mode: SizeMode::TargetBytes(0),
            ..ConversionSettings::default()
        };
        assert!(budget.validate().is_err());
        assert!(ConversionSettings::default().validate().is_ok());
    }

    #[test]
    fn validate_rejects_oversized_sides() {
        let side = ConversionSettings::MAX_SIDE;
        assert!(with(Some(side), None, true).validate().is_ok());
        assert!(matches!(
            with(Some(side + 1), None, true).validate(),
            Err(ScanError::InvalidConfig(_))
        ));
        assert!(with(Some(u32::MAX), Some(u32::MAX), false).validate().is_err());
    }

    #[test]
    fn aspect_lock_cannot_blow_up_the_other_side() {
        // A 1-pixel-wide strip scaled to the maximum width would be
        // 1000 times taller than allowed.
        let src = Dimensions::new(1, 1000);
        let settings = with(Some(ConversionSettings::MAX_SIDE), None, true);
        assert!(settings.validate().is_ok());
        assert!(matches!(
            settings.target_dimensions(src),
            Err(ScanError::InvalidConfig(_))
        ));
        let large = Dimensions::new(20_000, 20_000);
        assert_eq!(with(None, None, true).target_dimensions(large).unwrap(), large);
    }

    #[test]
    fn byte_budget_is_respected() {
        let img = noisy(64, 64);
        let max = codec::encode_jpeg(&img, 100).unwrap().len();
        let min = codec::encode_jpeg(&img, 1).unwrap().len();
        let budget = min + (max - min) / 2;
        let encoded = encode_within(&img, OutputFormat::Jpeg, budget).unwrap();
        assert!(encoded.byte_size <= budget);
        assert_eq!(encoded.format, OutputFormat::Jpeg);
    }

    #[test]
    fn impossible_budget_falls_back_to_lowest_quality() {
        let img = noisy(32, 32);
        let encoded = encode_within(&img, OutputFormat::Jpeg, 1).unwrap();
        assert_eq!(encoded.bytes, codec::encode_jpeg(&img, 1).unwrap());
    }

    #[test]
    fn lossless_budget_encodes_once() {
        let img = noisy(16, 16);
        let encoded = encode_within(&img, OutputFormat::Png, 1).unwrap();
        assert_eq!(encoded.format, OutputFormat::Png);
        assert_eq!(codec::decode_rgb(&encoded.bytes).unwrap(), img);
    }

    #[test]
    fn size_mode_serializes_snake_case() {
        let json = serde_json::to_string(&SizeMode::TargetBytes(5000)).unwrap();
        assert_eq!(json, r#"{"target_bytes":5000}"#);
    }
}
