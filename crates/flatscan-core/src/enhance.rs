//! Tone and colour enhancement.
//!
//! Steps, in order: gamma (auto mode only), contrast and brightness
//! about a midpoint of 128, HSV saturation, 3x3 sharpening, median
//! denoise. Every step that would be a no-op for the resolved
//! parameters is skipped, so the neutral parameter set leaves pixels
//! untouched.

use image::{Rgb, RgbImage};
use imageproc::filter::filter_clamped;
use serde::{Deserialize, Serialize};

use crate::resources::{BufferLedger, Tracked};
use crate::types::ScanError;

/// Midpoint contrast is applied around.
pub const CONTRAST_MIDPOINT: f64 = 128.0;

/// Brightness offset per percentage point away from 100 in manual mode.
pub const BRIGHTNESS_DAMPING: f64 = 0.5;

/// Fixed presets used when [`EnhancementParameters::auto`] is set.
pub mod auto {
    /// Gamma applied before contrast.
    pub const GAMMA: f64 = 1.2;
    /// Contrast factor.
    pub const CONTRAST: f64 = 1.4;
    /// Brightness offset in 8-bit levels.
    pub const BRIGHTNESS: f64 = 20.0;
    /// Saturation factor.
    pub const SATURATION: f64 = 1.3;
    /// Centre weight of the sharpening kernel; edges are -1.
    pub const SHARPEN_CENTER: f32 = 5.0;
}

/// User-facing enhancement settings.
///
/// Brightness, contrast and saturation are percentages in `0..=200`
/// with 100 as neutral. Sharpness and denoise are strengths in
/// `0..=100` with 0 as off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnhancementParameters {
    /// Brightness percentage.
    pub brightness: u16,
    /// Contrast percentage.
    pub contrast: u16,
    /// Saturation percentage.
    pub saturation: u16,
    /// Sharpening strength; 0 disables sharpening in manual mode.
    pub sharpness: u8,
    /// Denoise strength; 0 disables denoising.
    pub denoise: u8,
    /// Replace the brightness, contrast, saturation and sharpness
    /// settings with the fixed [`auto`] presets.
    pub auto: bool,
}

impl EnhancementParameters {
    /// Neutral brightness, contrast and saturation.
    pub const NEUTRAL_PERCENT: u16 = 100;
    /// Upper bound for brightness, contrast and saturation.
    pub const MAX_PERCENT: u16 = 200;
    /// Upper bound for sharpness and denoise.
    pub const MAX_STRENGTH: u8 = 100;

    /// The identity parameter set.
    pub const NEUTRAL: Self = Self {
        brightness: Self::NEUTRAL_PERCENT,
        contrast: Self::NEUTRAL_PERCENT,
        saturation: Self::NEUTRAL_PERCENT,
        sharpness: 0,
        denoise: 0,
        auto: false,
    };

    /// The one-click preset.
    pub const AUTO: Self = Self {
        auto: true,
        ..Self::NEUTRAL
    };

    /// Manual settings for the three tone sliders.
    #[must_use]
    pub const fn manual(brightness: u16, contrast: u16, saturation: u16) -> Self {
        Self {
            brightness,
            contrast,
            saturation,
            ..Self::NEUTRAL
        }
    }

    /// Reject out-of-range values.
    ///
    /// # Errors
    ///
    /// Returns [`ScanError::InvalidConfig`] naming the first bad field.
    pub fn validate(&self) -> Result<(), ScanError> {
        for (name, value) in [
            ("brightness", self.brightness),
            ("contrast", self.contrast),
            ("saturation", self.saturation),
        ] {
            if value > Self::MAX_PERCENT {
                return Err(ScanError::InvalidConfig(format!(
                    "{name} must be within 0..={}, got {value}",
                    Self::MAX_PERCENT
                )));
            }
        }
        for (name, value) in [("sharpness", self.sharpness), ("denoise", self.denoise)] {
            if value > Self::MAX_STRENGTH {
                return Err(ScanError::InvalidConfig(format!(
                    "{name} must be within 0..={}, got {value}",
                    Self::MAX_STRENGTH
                )));
            }
        }
        Ok(())
    }

    /// Resolve the settings into concrete per-step values.
    #[must_use]
    pub fn resolve(&self) -> Adjustments {
        let denoise_radius = match self.denoise {
            0 => None,
            1..=49 => Some(1),
            _ => Some(2),
        };
        if self.auto {
            return Adjustments {
                gamma: Some(auto::GAMMA),
                contrast: auto::CONTRAST,
                brightness: auto::BRIGHTNESS,
                saturation: auto::SATURATION,
                sharpen: Some(Kernel::cross(auto::SHARPEN_CENTER)),
                denoise_radius,
            };
        }
        let sharpen = (self.sharpness > 0).then(|| {
            let amount = f32::from(self.sharpness) / 100.0 * 0.5;
            Kernel::cross(4.0f32.mul_add(amount, 1.0))
        });
        Adjustments {
            gamma: None,
            contrast: f64::from(self.contrast) / 100.0,
            brightness: (f64::from(self.brightness) - 100.0) * BRIGHTNESS_DAMPING,
            saturation: f64::from(self.saturation) / 100.0,
            sharpen,
            denoise_radius,
        }
    }
}

impl Default for EnhancementParameters {
    fn default() -> Self {
        Self::NEUTRAL
    }
}

/// Concrete per-step values derived from [`EnhancementParameters`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Adjustments {
    /// Gamma correction, if any.
    pub gamma: Option<f64>,
    /// Contrast factor about [`CONTRAST_MIDPOINT`].
    pub contrast: f64,
    /// Brightness offset in 8-bit levels.
    pub brightness: f64,
    /// Saturation factor.
    pub saturation: f64,
    /// Sharpening kernel, if any.
    pub sharpen: Option<Kernel>,
    /// Median filter radius, if any.
    pub denoise_radius: Option<u32>,
}

/// A 3x3 convolution kernel, row-major.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Kernel(pub [f32; 9]);

impl Kernel {
    /// Sharpening cross: `center` in the middle, `(1 - center) / 4` on
    /// the four edge neighbours, zero on the diagonals. Sums to one.
    #[must_use]
    pub fn cross(center: f32) -> Self {
        let edge = (1.0 - center) / 4.0;
        Self([0.0, edge, 0.0, edge, center, edge, 0.0, edge, 0.0])
    }

    /// Sum of all weights.
    #[must_use]
    pub fn sum(&self) -> f32 {
        self.0.iter().sum()
    }
}

/// Run every enhancement step on `image`, registering each new buffer
/// with `ledger`.
///
/// The input is consumed; steps that allocate release the previous
/// buffer as soon as the next one is filled.
#[allow(clippy::float_cmp)]
pub fn enhance_image<'l>(
    ledger: &'l BufferLedger,
    mut image: Tracked<'l, RgbImage>,
    adjustments: &Adjustments,
) -> Tracked<'l, RgbImage> {
    if let Some(gamma) = adjustments.gamma {
        apply_lut(&mut image, &gamma_lut(gamma));
    }
    if adjustments.contrast != 1.0 || adjustments.brightness != 0.0 {
        apply_lut(
            &mut image,
            &contrast_brightness_lut(adjustments.contrast, adjustments.brightness),
        );
    }
    if adjustments.saturation != 1.0 {
        apply_saturation(&mut image, adjustments.saturation);
    }
    if let Some(kernel) = adjustments.sharpen {
        image = ledger.track("sharpened", sharpen(&image, &kernel));
    }
    if let Some(radius) = adjustments.denoise_radius {
        image = ledger.track(
            "denoised",
            imageproc::filter::median_filter(&*image, radius, radius),
        );
    }
    image
}

/// Lookup table for `255 * (v / 255)^(1 / gamma)`.
#[must_use]
pub fn gamma_lut(gamma: f64) -> [u8; 256] {
    let inv = 1.0 / gamma;
    lut(|v| 255.0 * (v / 255.0).powf(inv))
}

/// Lookup table for `(v - 128) * contrast + 128 + brightness`.
#[must_use]
pub fn contrast_brightness_lut(contrast: f64, brightness: f64) -> [u8; 256] {
    lut(|v| (v - CONTRAST_MIDPOINT).mul_add(contrast, CONTRAST_MIDPOINT + brightness))
}

fn lut(f: impl Fn(f64) -> f64) -> [u8; 256] {
    let mut table = [0u8; 256];
    for (i, slot) in table.iter_mut().enumerate() {
        #[allow(clippy::cast_precision_loss)]
        let v = f(i as f64);
        *slot = clamp_u8(v);
    }
    table
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn clamp_u8(v: f64) -> u8 {
    v.round().clamp(0.0, 255.0) as u8
}

/// Map every channel of every pixel through `table`.
pub fn apply_lut(image: &mut RgbImage, table: &[u8; 256]) {
    for p in image.pixels_mut() {
        p.0 = p.0.map(|c| table[usize::from(c)]);
    }
}

/// Scale HSV saturation by `factor`, clamping to full saturation.
pub fn apply_saturation(image: &mut RgbImage, factor: f64) {
    for p in image.pixels_mut() {
        let (h, s, v) = rgb_to_hsv(*p);
        *p = hsv_to_rgb(h, (s * factor).clamp(0.0, 1.0), v);
    }
}

/// Hue in degrees `[0, 360)`, saturation and value in `[0, 1]`.
#[must_use]
#[allow(clippy::float_cmp)]
pub fn rgb_to_hsv(p: Rgb<u8>) -> (f64, f64, f64) {
    let [r, g, b] = p.0.map(|c| f64::from(c) / 255.0);
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;
    let hue = if delta == 0.0 {
        0.0
    } else if max == r {
        60.0 * ((g - b) / delta).rem_euclid(6.0)
    } else if max == g {
        60.0 * ((b - r) / delta + 2.0)
    } else {
        60.0 * ((r - g) / delta + 4.0)
    };
    let sat = if max == 0.0 { 0.0 } else { delta / max };
    (hue, sat, max)
}

/// Inverse of [`rgb_to_hsv`], rounded to 8 bits.
#[must_use]
pub fn hsv_to_rgb(h: f64, s: f64, v: f64) -> Rgb<u8> {
    let c = v * s;
    let x = c * (1.0 - ((h / 60.0).rem_euclid(2.0) - 1.0).abs());
    let m = v - c;
    let (r, g, b) = match h {
        h if h < 60.0 => (c, x, 0.0),
        h if h < 120.0 => (x, c, 0.0),
        h if h < 180.0 => (0.0, c, x),
        h if h < 240.0 => (0.0, x, c),
        h if h < 300.0 => (x, 0.0, c),
        _ => (c, 0.0, x),
    };
    Rgb([r, g, b].map(|ch| clamp_u8((ch + m) * 255.0)))
}

/// Correlate `image` with a 3x3 `kernel`, repeating edge pixels at the
/// borders and clamping each channel to `0..=255`.
#[must_use]
pub fn sharpen(image: &RgbImage, kernel: &Kernel) -> RgbImage {
    filter_clamped(image, imageproc::kernel::Kernel::new(&kernel.0, 3, 3))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use super::*;

    fn colourful(width: u32, height: u32) -> RgbImage {
        RgbImage::from_fn(width, height, |x, y| {
            #[allow(clippy::cast_possible_truncation)]
            Rgb([(x * 13 % 256) as u8, (y * 29 % 256) as u8, ((x + y) * 7 % 256) as u8])
        })
    }

    fn run(image: RgbImage, params: &EnhancementParameters) -> RgbImage {
        let ledger = BufferLedger::new();
        let out = enhance_image(&ledger, ledger.track("input", image), &params.resolve());
        let out = out.into_inner();
        assert_eq!(ledger.live(), 0);
        out
    }

    #[test]
    fn defaults_are_neutral() {
        assert_eq!(EnhancementParameters::default(), EnhancementParameters::NEUTRAL);
        let adj = EnhancementParameters::NEUTRAL.resolve();
        assert_eq!(adj.contrast, 1.0);
        assert_eq!(adj.brightness, 0.0);
        assert_eq!(adj.saturation, 1.0);
        assert!(adj.gamma.is_none() && adj.sharpen.is_none() && adj.denoise_radius.is_none());
    }

    #[test]
    fn neutral_is_identity() {
        let img = colourful(31, 17);
        assert_eq!(run(img.clone(), &EnhancementParameters::NEUTRAL), img);
    }

    #[test]
    fn manual_mapping_uses_damped_brightness() {
        let adj = EnhancementParameters::manual(120, 110, 90).resolve();
        assert!((adj.brightness - 10.0).abs() < 1e-12);
        assert!((adj.contrast - 1.1).abs() < 1e-12);
        assert!((adj.saturation - 0.9).abs() < 1e-12);
    }

    #[test]
    fn auto_overrides_sliders() {
        let params = EnhancementParameters {
            brightness: 0,
            contrast: 0,
            ..EnhancementParameters::AUTO
        };
        let adj = params.resolve();
        assert_eq!(adj.gamma, Some(auto::GAMMA));
        assert_eq!(adj.contrast, auto::CONTRAST);
        assert_eq!(adj.brightness, auto::BRIGHTNESS);
        assert_eq!(adj.saturation, auto::SATURATION);
        assert_eq!(adj.sharpen, Some(Kernel::cross(5.0)));
    }

    #[test]
    fn validate_rejects_out_of_range() {
        let bad = EnhancementParameters::manual(201, 100, 100);
        assert!(matches!(bad.validate(), Err(ScanError::InvalidConfig(_))));
        let bad = EnhancementParameters {
            denoise: 101,
            ..EnhancementParameters::NEUTRAL
        };
        assert!(bad.validate().is_err());
        assert!(EnhancementParameters::manual(0, 200, 0).validate().is_ok());
    }

    #[test]
    fn gamma_lut_brightens_midtones_and_keeps_ends() {
        let table = gamma_lut(1.2);
        assert_eq!(table[0], 0);
        assert_eq!(table[255], 255);
        assert!(table[128] > 128);
    }

    #[test]
    fn contrast_brightness_lut_matches_formula() {
        let table = contrast_brightness_lut(1.4, 20.0);
        // (100 - 128) * 1.4 + 148 = 108.8
        assert_eq!(table[100], 109);
        assert_eq!(table[0], 0);
        assert_eq!(table[250], 255);
    }

    #[test]
    fn zero_saturation_gives_grey() {
        let mut img = colourful(8, 8);
        apply_saturation(&mut img, 0.0);
        for p in img.pixels() {
            assert_eq!(p.0[0], p.0[1]);
            assert_eq!(p.0[1], p.0[2]);
        }
    }

    #[test]
    fn hsv_round_trip() {
        for p in colourful(16, 16).pixels() {
            let (h, s, v) = rgb_to_hsv(*p);
            assert_eq!(hsv_to_rgb(h, s, v), *p);
        }
    }

    #[test]
    fn sharpen_kernels_sum_to_one() {
        assert!((Kernel::cross(5.0).sum() - 1.0).abs() < 1e-6);
        let adj = EnhancementParameters {
            sharpness: 100,
            ..EnhancementParameters::NEUTRAL
        }
        .resolve();
        let kernel = adj.sharpen.unwrap();
        assert!((kernel.0[4] - 3.0).abs() < 1e-6);
        assert!(kernel.0[1] < 0.0);
        assert!((kernel.sum() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn sharpen_leaves_flat_regions_alone() {
        let flat = RgbImage::from_pixel(9, 9, Rgb([77, 88, 99]));
        assert_eq!(sharpen(&flat, &Kernel::cross(5.0)), flat);
    }

    #[test]
    fn sharpen_repeats_border_pixels() {
        let single = RgbImage::from_pixel(1, 1, Rgb([10, 200, 255]));
        assert_eq!(sharpen(&single, &Kernel::cross(5.0)), single);
    }

    #[test]
    fn sharpen_increases_edge_contrast() {
        let img = RgbImage::from_fn(10, 10, |x, _| {
            if x < 5 { Rgb([100, 100, 100]) } else { Rgb([150, 150, 150]) }
        });
        let out = sharpen(&img, &Kernel::cross(5.0));
        assert!(out.get_pixel(4, 5).0[0] < 100);
        assert!(out.get_pixel(5, 5).0[0] > 150);
    }

    #[test]
    fn denoise_removes_isolated_speck() {
        let mut img = RgbImage::from_pixel(9, 9, Rgb([50, 50, 50]));
        img.put_pixel(4, 4, Rgb([255, 255, 255]));
        let params = EnhancementParameters {
            denoise: 10,
            ..EnhancementParameters::NEUTRAL
        };
        let out = run(img, &params);
        assert_eq!(out.get_pixel(4, 4), &Rgb([50, 50, 50]));
    }

    #[test]
    fn enhancement_releases_scratch_buffers() {
        let ledger = BufferLedger::new();
        let params = EnhancementParameters {
            sharpness: 40,
            denoise: 60,
            ..EnhancementParameters::AUTO
        };
        let out = enhance_image(
            &ledger,
            ledger.track("input", colourful(12, 12)),
            &params.resolve(),
        );
        assert_eq!(ledger.live(), 1);
        drop(out);
        assert_eq!(ledger.live(), 0);
        assert_eq!(ledger.acquired(), 3);
    }
}
