//! Image decoding and encoding.
//!
//! Accepts raw image bytes (PNG, JPEG, BMP, WebP) and produces RGB
//! pixel data, and encodes RGB pixel data back to JPEG, PNG or WebP.
//! Alpha is dropped on decode: every stage after it works on three
//! channels.

use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::codecs::webp::WebPEncoder;
use std::io::Cursor;

use image::{DynamicImage, ExtendedColorType, ImageEncoder, ImageFormat, ImageReader, RgbImage};

use crate::types::{Dimensions, Encoded, OutputFormat, OutputSettings, ScanError};

/// JPEG quality used for the rectified intermediate handed to the
/// enhancement stage.
pub const INTERMEDIATE_JPEG_QUALITY: u8 = 100;

/// Decode raw image bytes.
///
/// # Errors
///
/// Returns [`ScanError::EmptyInput`] if `bytes` is empty.
/// Returns [`ScanError::Decode`] if the format is unrecognized or the
/// data is corrupt.
pub fn decode(bytes: &[u8]) -> Result<DynamicImage, ScanError> {
    if bytes.is_empty() {
        return Err(ScanError::EmptyInput);
    }
    Ok(image::load_from_memory(bytes)?)
}

/// Decode raw image bytes and convert to 8-bit RGB, dropping alpha.
///
/// # Errors
///
/// Same as [`decode`].
#[must_use = "returns the decoded image"]
pub fn decode_rgb(bytes: &[u8]) -> Result<RgbImage, ScanError> {
    let img = decode(bytes)?;
    Ok(match img {
        DynamicImage::ImageRgb8(rgb) => rgb,
        other => other.to_rgb8(),
    })
}

/// Wrap already-encoded bytes without decoding their pixels.
///
/// Only the header is read, to learn the format and dimensions. Used
/// when a result must be returned but no processing could run.
///
/// # Errors
///
/// Returns [`ScanError::EmptyInput`] if `bytes` is empty.
/// Returns [`ScanError::Decode`] if the header cannot be read.
/// Returns [`ScanError::Validation`] if the format is not one of the
/// output formats.
pub fn wrap_undecoded(bytes: Vec<u8>) -> Result<Encoded, ScanError> {
    if bytes.is_empty() {
        return Err(ScanError::EmptyInput);
    }
    let reader = ImageReader::new(Cursor::new(bytes.as_slice()))
        .with_guessed_format()
        .map_err(image::ImageError::IoError)?;
    let format = match reader.format() {
        Some(ImageFormat::Jpeg) => OutputFormat::Jpeg,
        Some(ImageFormat::Png) => OutputFormat::Png,
        Some(ImageFormat::WebP) => OutputFormat::Webp,
        other => {
            return Err(ScanError::Validation(format!(
                "cannot pass through {other:?} input"
            )));
        }
    };
    let (width, height) = reader.into_dimensions()?;
    Ok(Encoded::new(bytes, format, Dimensions::new(width, height)))
}

/// Encode `img` with the given format and quality.
///
/// Quality is only meaningful for JPEG, where `0..=100` is clamped onto
/// the encoder's `1..=100` scale. PNG and WebP are encoded losslessly.
///
/// # Errors
///
/// Returns [`ScanError::Encode`] if the encoder rejects the image.
pub fn encode(img: &RgbImage, settings: &OutputSettings) -> Result<Encoded, ScanError> {
    let bytes = match settings.format {
        OutputFormat::Jpeg => encode_jpeg(img, settings.quality)?,
        format @ (OutputFormat::Png | OutputFormat::Webp) => {
            if settings.quality != OutputSettings::DEFAULT_QUALITY {
                tracing::debug!(%format, quality = settings.quality, "lossless format ignores quality");
            }
            encode_lossless(img, format)?
        }
    };
    Ok(Encoded::new(
        bytes,
        settings.format,
        Dimensions::new(img.width(), img.height()),
    ))
}

/// Encode `img` as JPEG at `quality` (clamped to `1..=100`).
///
/// # Errors
///
/// Returns [`ScanError::Encode`] if the encoder rejects the image.
pub fn encode_jpeg(img: &RgbImage, quality: u8) -> Result<Vec<u8>, ScanError> {
    let mut buf = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut buf, quality.clamp(1, 100));
    encoder
        .write_image(
            img.as_raw(),
            img.width(),
            img.height(),
            ExtendedColorType::Rgb8,
        )
        .map_err(|e| ScanError::Encode(e.to_string()))?;
    Ok(buf)
}

fn encode_lossless(img: &RgbImage, format: OutputFormat) -> Result<Vec<u8>, ScanError> {
    let mut buf = Vec::new();
    let result = match format {
        OutputFormat::Webp => WebPEncoder::new_lossless(&mut buf).write_image(
            img.as_raw(),
            img.width(),
            img.height(),
            ExtendedColorType::Rgb8,
        ),
        OutputFormat::Png | OutputFormat::Jpeg => PngEncoder::new(&mut buf).write_image(
            img.as_raw(),
            img.width(),
            img.height(),
            ExtendedColorType::Rgb8,
        ),
    };
    result.map_err(|e| ScanError::Encode(e.to_string()))?;
    Ok(buf)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn gradient(width: u32, height: u32) -> RgbImage {
        RgbImage::from_fn(width, height, |x, y| {
            #[allow(clippy::cast_possible_truncation)]
            image::Rgb([(x * 255 / width) as u8, (y * 255 / height) as u8, 128])
        })
    }

    #[test]
    fn empty_input_returns_error() {
        assert!(matches!(decode(&[]), Err(ScanError::EmptyInput)));
    }

    #[test]
    fn corrupt_bytes_returns_decode_error() {
        let result = decode_rgb(&[0xFF, 0xFE, 0x00, 0x01]);
        assert!(matches!(result, Err(ScanError::Decode(_))));
    }

    #[test]
    fn rgba_png_decodes_without_alpha() {
        let img = image::RgbaImage::from_fn(3, 2, |_, _| image::Rgba([10, 20, 30, 0]));
        let mut buf = Vec::new();
        PngEncoder::new(&mut buf)
            .write_image(img.as_raw(), 3, 2, ExtendedColorType::Rgba8)
            .unwrap();
        let rgb = decode_rgb(&buf).unwrap();
        assert_eq!(rgb.dimensions(), (3, 2));
        assert_eq!(rgb.get_pixel(0, 0), &image::Rgb([10, 20, 30]));
    }

    #[test]
    fn png_round_trip_is_lossless() {
        let img = gradient(16, 9);
        let settings = OutputSettings {
            format: OutputFormat::Png,
            ..OutputSettings::default()
        };
        let encoded = encode(&img, &settings).unwrap();
        assert_eq!(encoded.byte_size, encoded.bytes.len());
        assert_eq!(encoded.dimensions, Dimensions::new(16, 9));
        assert_eq!(decode_rgb(&encoded.bytes).unwrap(), img);
    }

    #[test]
    fn webp_round_trip_is_lossless() {
        let img = gradient(8, 8);
        let settings = OutputSettings {
            format: OutputFormat::Webp,
            quality: 10,
        };
        let encoded = encode(&img, &settings).unwrap();
        assert_eq!(decode_rgb(&encoded.bytes).unwrap(), img);
    }

    #[test]
    fn wrap_undecoded_reads_header_only() {
        let img = gradient(12, 7);
        let jpeg = encode_jpeg(&img, 80).unwrap();
        let wrapped = wrap_undecoded(jpeg.clone()).unwrap();
        assert_eq!(wrapped.format, OutputFormat::Jpeg);
        assert_eq!(wrapped.dimensions, Dimensions::new(12, 7));
        assert_eq!(wrapped.bytes, jpeg);
    }

    #[test]
    fn wrap_undecoded_rejects_bmp() {
        let mut buf = Vec::new();
        gradient(4, 4)
            .write_to(&mut Cursor::new(&mut buf), ImageFormat::Bmp)
            .unwrap();
        assert!(matches!(wrap_undecoded(buf), Err(ScanError::Validation(_))));
        assert!(matches!(wrap_undecoded(Vec::new()), Err(ScanError::EmptyInput)));
    }

    #[test]
    fn jpeg_quality_changes_size() {
        let img = gradient(64, 64);
        let low = encode_jpeg(&img, 5).unwrap();
        let high = encode_jpeg(&img, 100).unwrap();
        assert!(low.len() < high.len());
    }

    #[test]
    fn jpeg_quality_zero_is_clamped() {
        let img = gradient(8, 8);
        let zero = encode_jpeg(&img, 0).unwrap();
        let one = encode_jpeg(&img, 1).unwrap();
        assert_eq!(zero, one);
    }
}
