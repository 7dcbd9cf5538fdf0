//! Shared types for the flatscan core.

use serde::{Deserialize, Serialize};

/// Re-export `RgbImage` so downstream crates can reference decoded
/// pixel data without depending on `image` directly.
pub use image::RgbImage;

/// A 2D point.
///
/// Whether a point lives in display space (pixels of the rendered image
/// element) or source space (native pixel grid of the decoded image) is
/// a property of where it came from; the two are only ever converted via
/// [`crate::mapper`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    /// Horizontal position (pixels from left edge).
    pub x: f64,
    /// Vertical position (pixels from top edge).
    pub y: f64,
}

impl Point {
    /// Create a new point.
    #[must_use]
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Squared Euclidean distance to another point.
    ///
    /// Avoids the square root for comparison purposes.
    #[must_use]
    pub fn distance_squared(self, other: Self) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        dx.mul_add(dx, dy * dy)
    }

    /// Euclidean distance to another point.
    #[must_use]
    pub fn distance(self, other: Self) -> f64 {
        self.distance_squared(other).sqrt()
    }

    /// Midpoint between this point and `other`.
    #[must_use]
    pub fn midpoint(self, other: Self) -> Self {
        Self::new(f64::midpoint(self.x, other.x), f64::midpoint(self.y, other.y))
    }

    /// `true` when both coordinates are finite.
    #[must_use]
    pub const fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

/// A width/height pair in floating point pixels.
///
/// Used for display sizes, which come from layout and are rarely whole
/// numbers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Size {
    /// Width in pixels.
    pub width: f64,
    /// Height in pixels.
    pub height: f64,
}

impl Size {
    /// Create a new size.
    #[must_use]
    pub const fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    /// `true` when both sides are finite and strictly positive.
    #[must_use]
    pub fn is_usable(self) -> bool {
        self.width.is_finite() && self.height.is_finite() && self.width > 0.0 && self.height > 0.0
    }
}

impl From<Dimensions> for Size {
    fn from(d: Dimensions) -> Self {
        Self::new(f64::from(d.width), f64::from(d.height))
    }
}

/// Image dimensions in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Dimensions {
    /// Create new dimensions.
    #[must_use]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Total pixel count.
    #[must_use]
    pub const fn pixel_count(self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

/// Encoded output formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Lossy JPEG; honours the quality setting.
    #[default]
    Jpeg,
    /// Lossless PNG; quality is ignored.
    Png,
    /// Lossless WebP; quality is ignored.
    Webp,
}

impl OutputFormat {
    /// MIME type for Blob construction and downloads.
    #[must_use]
    pub const fn mime_type(self) -> &'static str {
        match self {
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
            Self::Webp => "image/webp",
        }
    }

    /// Conventional file extension, without the dot.
    #[must_use]
    pub const fn extension(self) -> &'static str {
        match self {
            Self::Jpeg => "jpg",
            Self::Png => "png",
            Self::Webp => "webp",
        }
    }

    /// Whether the encoder uses the quality setting.
    #[must_use]
    pub const fn is_lossy(self) -> bool {
        matches!(self, Self::Jpeg)
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.extension())
    }
}

/// Format and quality for a final encode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputSettings {
    /// Output container format.
    pub format: OutputFormat,
    /// Quality, 0 to 100. Mapped onto the encoder's native scale.
    pub quality: u8,
}

impl OutputSettings {
    /// Default encode quality.
    pub const DEFAULT_QUALITY: u8 = 92;

    /// Reject qualities above 100.
    ///
    /// # Errors
    ///
    /// Returns [`ScanError::InvalidConfig`] when `quality > 100`.
    pub fn validate(&self) -> Result<(), ScanError> {
        if self.quality > 100 {
            return Err(ScanError::InvalidConfig(format!(
                "quality must be within 0..=100, got {}",
                self.quality
            )));
        }
        Ok(())
    }
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            format: OutputFormat::Jpeg,
            quality: Self::DEFAULT_QUALITY,
        }
    }
}

/// An encoded image plus the metadata callers display alongside it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Encoded {
    /// Encoded file bytes.
    pub bytes: Vec<u8>,
    /// Format the bytes are in.
    pub format: OutputFormat,
    /// Pixel dimensions of the encoded image.
    pub dimensions: Dimensions,
    /// Size of `bytes`, reported for size feedback in the UI.
    pub byte_size: usize,
}

impl Encoded {
    /// Wrap encoded bytes, recording their length.
    #[must_use]
    pub fn new(bytes: Vec<u8>, format: OutputFormat, dimensions: Dimensions) -> Self {
        let byte_size = bytes.len();
        Self {
            bytes,
            format,
            dimensions,
            byte_size,
        }
    }

    /// Split off the metadata, leaving the bytes to be moved separately
    /// (e.g. transferred to or from a worker).
    #[must_use]
    pub fn into_parts(self) -> (Vec<u8>, EncodedMeta) {
        let meta = EncodedMeta {
            format: self.format,
            dimensions: self.dimensions,
            byte_size: self.byte_size,
        };
        (self.bytes, meta)
    }

    /// Reassemble from bytes and metadata.
    #[must_use]
    pub const fn from_parts(bytes: Vec<u8>, meta: EncodedMeta) -> Self {
        Self {
            bytes,
            format: meta.format,
            dimensions: meta.dimensions,
            byte_size: meta.byte_size,
        }
    }
}

/// The non-byte part of [`Encoded`], small enough to send as JSON.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodedMeta {
    /// Format of the accompanying bytes.
    pub format: OutputFormat,
    /// Pixel dimensions.
    pub dimensions: Dimensions,
    /// Length of the accompanying bytes.
    pub byte_size: usize,
}

/// User-facing error category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCategory {
    /// Bad selection, bad parameters, or input the codec refuses up front.
    Validation,
    /// The transform produced an all-black sample grid.
    DegenerateTransform,
    /// Decoding or encoding failed.
    Codec,
    /// A background run exceeded its time budget.
    ResourceTimeout,
    /// The processing module has not finished initialising.
    LibraryNotReady,
}

/// Errors that can occur while editing, rectifying, enhancing or
/// converting an image.
///
/// Uses custom `Serialize`/`Deserialize` because `image::ImageError`
/// does not implement serde traits. The `Decode` variant is serialized
/// as its `Display` string.
#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    /// The input image bytes were empty.
    #[error("input image data is empty")]
    EmptyInput,

    /// Failed to decode the input image.
    #[error("failed to decode image: {0}")]
    Decode(#[from] image::ImageError),

    /// Failed to encode the output image.
    #[error("failed to encode image: {0}")]
    Encode(String),

    /// The crop selection cannot be rectified.
    #[error("invalid crop selection: {0}")]
    Validation(String),

    /// The perspective transform collapsed the output.
    #[error("cropping failed: {0}")]
    DegenerateTransform(String),

    /// A background run took longer than allowed.
    #[error("processing timed out after {seconds} s")]
    ResourceTimeout {
        /// The budget that was exceeded.
        seconds: u64,
    },

    /// The processing module is not initialised yet.
    #[error("image processing is still loading")]
    LibraryNotReady,

    /// A settings value is out of range or could not be parsed.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl ScanError {
    /// Which user-facing category this error belongs to.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::Validation(_) | Self::InvalidConfig(_) => ErrorCategory::Validation,
            Self::DegenerateTransform(_) => ErrorCategory::DegenerateTransform,
            Self::EmptyInput | Self::Decode(_) | Self::Encode(_) => ErrorCategory::Codec,
            Self::ResourceTimeout { .. } => ErrorCategory::ResourceTimeout,
            Self::LibraryNotReady => ErrorCategory::LibraryNotReady,
        }
    }

    /// A short sentence suitable for showing to the user.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self.category() {
            ErrorCategory::Validation => format!("Please adjust the selection: {self}."),
            ErrorCategory::DegenerateTransform => {
                "Cropping failed. Try dragging the corners onto the document edges.".to_owned()
            }
            ErrorCategory::Codec => format!("The image could not be processed: {self}."),
            ErrorCategory::ResourceTimeout => {
                "Processing took too long and was stopped. Please try again.".to_owned()
            }
            ErrorCategory::LibraryNotReady => {
                "Image processing is still loading. Please wait a moment and retry.".to_owned()
            }
        }
    }
}

/// Serde-compatible proxy for `ScanError`.
///
/// `image::ImageError` does not implement serde, so the `Decode` variant
/// stores its `Display` string instead.
#[derive(Serialize, Deserialize)]
enum ScanErrorProxy {
    EmptyInput,
    Decode(String),
    Encode(String),
    Validation(String),
    DegenerateTransform(String),
    ResourceTimeout { seconds: u64 },
    LibraryNotReady,
    InvalidConfig(String),
}

impl Serialize for ScanError {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let proxy = match self {
            Self::EmptyInput => ScanErrorProxy::EmptyInput,
            Self::Decode(e) => ScanErrorProxy::Decode(e.to_string()),
            Self::Encode(s) => ScanErrorProxy::Encode(s.clone()),
            Self::Validation(s) => ScanErrorProxy::Validation(s.clone()),
            Self::DegenerateTransform(s) => ScanErrorProxy::DegenerateTransform(s.clone()),
            Self::ResourceTimeout { seconds } => ScanErrorProxy::ResourceTimeout {
                seconds: *seconds,
            },
            Self::LibraryNotReady => ScanErrorProxy::LibraryNotReady,
            Self::InvalidConfig(s) => ScanErrorProxy::InvalidConfig(s.clone()),
        };
        proxy.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ScanError {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let proxy = ScanErrorProxy::deserialize(deserializer)?;
        Ok(match proxy {
            ScanErrorProxy::EmptyInput => Self::EmptyInput,
            // The typed image error cannot be rebuilt; keep the message
            // under the codec category.
            ScanErrorProxy::Decode(msg) => Self::Encode(format!("decode error: {msg}")),
            ScanErrorProxy::Encode(s) => Self::Encode(s),
            ScanErrorProxy::Validation(s) => Self::Validation(s),
            ScanErrorProxy::DegenerateTransform(s) => Self::DegenerateTransform(s),
            ScanErrorProxy::ResourceTimeout { seconds } => Self::ResourceTimeout { seconds },
            ScanErrorProxy::LibraryNotReady => Self::LibraryNotReady,
            ScanErrorProxy::InvalidConfig(s) => Self::InvalidConfig(s),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn point_distance() {
        let a = Point::new(0.0, 0.0);
        let b = Point::new(3.0, 4.0);
        assert!((a.distance(b) - 5.0).abs() < f64::EPSILON);
        assert!((a.distance_squared(b) - 25.0).abs() < f64::EPSILON);
    }

    #[test]
    fn point_midpoint() {
        let m = Point::new(2.0, 10.0).midpoint(Point::new(4.0, 20.0));
        assert_eq!(m, Point::new(3.0, 15.0));
    }

    #[test]
    fn size_usable() {
        assert!(Size::new(10.0, 5.0).is_usable());
        assert!(!Size::new(0.0, 5.0).is_usable());
        assert!(!Size::new(10.0, f64::NAN).is_usable());
    }

    #[test]
    fn output_format_serializes_lowercase() {
        let json = serde_json::to_string(&OutputFormat::Webp).unwrap();
        assert_eq!(json, "\"webp\"");
    }

    #[test]
    fn output_settings_reject_quality_over_100() {
        let settings = OutputSettings {
            quality: 101,
            ..OutputSettings::default()
        };
        assert!(matches!(
            settings.validate(),
            Err(ScanError::InvalidConfig(_))
        ));
    }

    #[test]
    fn output_settings_missing_fields_take_defaults() {
        let settings: OutputSettings = serde_json::from_str(r#"{"format":"png"}"#).unwrap();
        assert_eq!(settings.format, OutputFormat::Png);
        assert_eq!(settings.quality, OutputSettings::DEFAULT_QUALITY);
    }

    #[test]
    fn encoded_records_byte_size() {
        let encoded = Encoded::new(vec![1, 2, 3], OutputFormat::Png, Dimensions::new(1, 1));
        assert_eq!(encoded.byte_size, 3);
        let (bytes, meta) = encoded.clone().into_parts();
        assert_eq!(Encoded::from_parts(bytes, meta), encoded);
    }

    #[test]
    fn error_categories() {
        assert_eq!(
            ScanError::Validation("x".into()).category(),
            ErrorCategory::Validation
        );
        assert_eq!(ScanError::EmptyInput.category(), ErrorCategory::Codec);
        assert_eq!(
            ScanError::ResourceTimeout { seconds: 30 }.category(),
            ErrorCategory::ResourceTimeout
        );
        assert_eq!(
            ScanError::LibraryNotReady.category(),
            ErrorCategory::LibraryNotReady
        );
    }

    #[test]
    fn error_user_messages_are_nonempty() {
        let errors = [
            ScanError::EmptyInput,
            ScanError::DegenerateTransform("all black".into()),
            ScanError::ResourceTimeout { seconds: 30 },
            ScanError::LibraryNotReady,
        ];
        for e in &errors {
            assert!(!e.user_message().is_empty());
        }
    }

    #[test]
    fn error_serde_round_trip() {
        let err = ScanError::ResourceTimeout { seconds: 30 };
        let json = serde_json::to_string(&err).unwrap();
        let back: ScanError = serde_json::from_str(&json).unwrap();
        assert!(matches!(back, ScanError::ResourceTimeout { seconds: 30 }));
    }

    #[test]
    fn decode_error_deserializes_as_codec() {
        let decode = image::load_from_memory(&[0xFF, 0x00]).unwrap_err();
        let json = serde_json::to_string(&ScanError::Decode(decode)).unwrap();
        let back: ScanError = serde_json::from_str(&json).unwrap();
        assert_eq!(back.category(), ErrorCategory::Codec);
    }
}
