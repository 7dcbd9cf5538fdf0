//! Perspective rectification: warp a four-corner region of the source
//! image onto a fixed-size rectangle.
//!
//! The selection is validated before any raster is allocated. After the
//! warp, a sparse sample grid guards against transforms that collapsed
//! the output to black.

use image::{Rgb, RgbImage};
use imageproc::geometric_transformations::{Interpolation, Projection, warp_into};
use serde::{Deserialize, Serialize};

use crate::geometry::{OrderedQuad, Quad};
use crate::types::{Dimensions, ScanError};

/// Sample points per axis for the all-black check.
pub const SAMPLE_GRID: u32 = 10;

/// Smallest projected edge length, in source pixels, a selection may
/// have.
pub const MIN_EXTENT: f64 = 1.0;

/// Smallest enclosed area, in square source pixels, a selection may
/// have.
pub const MIN_AREA: f64 = 1.0;

/// Pixel written where the warp samples outside the source image.
const OUTSIDE: Rgb<u8> = Rgb([0, 0, 0]);

/// Rectification settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RectifyConfig {
    /// Output width in pixels.
    pub target_width: u32,
    /// Output height in pixels.
    pub target_height: u32,
    /// JPEG quality of the intermediate handed to enhancement.
    pub intermediate_quality: u8,
}

impl RectifyConfig {
    /// Default output width (portrait page).
    pub const DEFAULT_TARGET_WIDTH: u32 = 595;
    /// Default output height (portrait page).
    pub const DEFAULT_TARGET_HEIGHT: u32 = 842;
    /// Largest accepted output side.
    pub const MAX_TARGET_SIDE: u32 = 16_384;

    /// Output dimensions.
    #[must_use]
    pub const fn target(&self) -> Dimensions {
        Dimensions::new(self.target_width, self.target_height)
    }

    /// Reject empty or oversized targets and quality above 100.
    ///
    /// # Errors
    ///
    /// Returns [`ScanError::InvalidConfig`] describing the first bad
    /// field.
    pub fn validate(&self) -> Result<(), ScanError> {
        for (name, side) in [
            ("target_width", self.target_width),
            ("target_height", self.target_height),
        ] {
            if side == 0 || side > Self::MAX_TARGET_SIDE {
                return Err(ScanError::InvalidConfig(format!(
                    "{name} must be within 1..={}, got {side}",
                    Self::MAX_TARGET_SIDE
                )));
            }
        }
        if self.intermediate_quality > 100 {
            return Err(ScanError::InvalidConfig(format!(
                "intermediate_quality must be within 0..=100, got {}",
                self.intermediate_quality
            )));
        }
        Ok(())
    }
}

impl Default for RectifyConfig {
    fn default() -> Self {
        Self {
            target_width: Self::DEFAULT_TARGET_WIDTH,
            target_height: Self::DEFAULT_TARGET_HEIGHT,
            intermediate_quality: crate::codec::INTERMEDIATE_JPEG_QUALITY,
        }
    }
}

/// Order the selection and reject geometry that cannot be warped.
///
/// # Errors
///
/// Returns [`ScanError::Validation`] when a corner is not finite, when
/// the projected width or height is below [`MIN_EXTENT`], or when the
/// ordered corners enclose less than [`MIN_AREA`] (collinear or
/// coincident points).
pub fn validate_selection(quad: &Quad) -> Result<OrderedQuad, ScanError> {
    if !quad.points().iter().all(|p| p.is_finite()) {
        return Err(ScanError::Validation(
            "corner coordinates must be finite".to_owned(),
        ));
    }
    let ordered = quad.ordered();
    let width = ordered.projected_width();
    let height = ordered.projected_height();
    if width < MIN_EXTENT || height < MIN_EXTENT {
        return Err(ScanError::Validation(format!(
            "selection is too small ({width:.1} x {height:.1} px)"
        )));
    }
    let area = ordered.area();
    if area < MIN_AREA {
        return Err(ScanError::Validation(format!(
            "corners are collinear or coincident (area {area:.2} px²)"
        )));
    }
    Ok(ordered)
}

/// Homography taking the ordered corners onto `[0, w] x [0, h]`.
///
/// # Errors
///
/// Returns [`ScanError::DegenerateTransform`] when no projective
/// transform exists for the corners.
#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
pub fn projection(ordered: &OrderedQuad, target: Dimensions) -> Result<Projection, ScanError> {
    let src = ordered.corners().map(|p| (p.x as f32, p.y as f32));
    let (w, h) = (target.width as f32, target.height as f32);
    let dst = [(0.0, 0.0), (w, 0.0), (w, h), (0.0, h)];
    Projection::from_control_points(src, dst).ok_or_else(|| {
        ScanError::DegenerateTransform("no perspective transform maps these corners".to_owned())
    })
}

/// Resample `source` through `projection` into `out`, filling pixels
/// outside the source with black.
pub fn warp(source: &RgbImage, projection: &Projection, out: &mut RgbImage) {
    warp_into(source, projection, Interpolation::Bilinear, OUTSIDE, out);
}

/// `true` when every sample on a [`SAMPLE_GRID`] x [`SAMPLE_GRID`] grid of
/// cell centres is exactly black.
#[must_use]
pub fn samples_all_black(img: &RgbImage) -> bool {
    let (w, h) = img.dimensions();
    if w == 0 || h == 0 {
        return true;
    }
    (0..SAMPLE_GRID).all(|j| {
        let y = ((2 * j + 1) * h / (2 * SAMPLE_GRID)).min(h - 1);
        (0..SAMPLE_GRID).all(|i| {
            let x = ((2 * i + 1) * w / (2 * SAMPLE_GRID)).min(w - 1);
            img.get_pixel(x, y).0 == [0, 0, 0]
        })
    })
}

/// Fail with [`ScanError::DegenerateTransform`] if the sample grid is
/// all black.
///
/// # Errors
///
/// See above.
pub fn check_not_blank(img: &RgbImage) -> Result<(), ScanError> {
    if samples_all_black(img) {
        tracing::warn!(
            width = img.width(),
            height = img.height(),
            "rectified output sampled all black"
        );
        return Err(ScanError::DegenerateTransform(
            "the rectified image is entirely black".to_owned(),
        ));
    }
    Ok(())
}

/// Rectify a decoded image without buffer tracking.
///
/// Prefer [`crate::Engine::rectify`], which tracks every intermediate.
///
/// # Errors
///
/// Propagates the errors of [`validate_selection`], [`projection`] and
/// [`check_not_blank`], plus [`ScanError::InvalidConfig`] for a bad
/// config.
pub fn rectify_image(
    source: &RgbImage,
    quad: &Quad,
    config: &RectifyConfig,
) -> Result<RgbImage, ScanError> {
    config.validate()?;
    let ordered = validate_selection(quad)?;
    let projection = projection(&ordered, config.target())?;
    let mut out = RgbImage::new(config.target_width, config.target_height);
    warp(source, &projection, &mut out);
    check_not_blank(&out)?;
    Ok(out)
}
