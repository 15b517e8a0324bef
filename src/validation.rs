//! Frame validation utilities for test pattern verification.
//!
//! These check that delivered images contain known test patterns, which is
//! how the integration tests prove row order and channel order end to end.

use crate::config::FrameSize;
use crate::convert::VideoImage;
use crate::error::{CaptureError, Result};

/// 100% color bars, left to right: White, Yellow, Cyan, Green, Magenta, Red,
/// Blue, Black.
pub const COLOR_BARS: [(u8, u8, u8); 8] = [
    (255, 255, 255),
    (255, 255, 0),
    (0, 255, 255),
    (0, 255, 0),
    (255, 0, 255),
    (255, 0, 0),
    (0, 0, 255),
    (0, 0, 0),
];

/// Per-channel tolerance for color matching.
const COLOR_TOLERANCE: u8 = 24;

/// Minimum luminance rise across a gradient.
const MIN_GRADIENT_RISE: f32 = 50.0;

/// Validates that an image contains 100% color bars.
///
/// Samples the center of each of the eight vertical stripes, in the upper and
/// lower quarter of the image. A vertically flipped image still passes; use a
/// row-sensitive pattern to check orientation.
///
/// # Errors
///
/// Returns `PatternMismatch` if a sample is out of bounds or any bar differs
/// from the expected color by more than the tolerance on some channel.
pub fn validate_color_bars(image: &VideoImage) -> Result<()> {
    let bar_width = image.width() / 8;
    let rows = [image.height() / 4, image.height() * 3 / 4];

    for (bar_idx, expected) in COLOR_BARS.iter().enumerate() {
        #[allow(clippy::cast_possible_truncation)]
        let x = (bar_idx as u32 * bar_width) + (bar_width / 2);

        for y in rows {
            let actual = sample(image, x, y)?;
            if !colors_match(actual, *expected, COLOR_TOLERANCE) {
                return Err(mismatch(format!(
                    "color bar {bar_idx} at ({x}, {y}): expected RGB{expected:?}, got RGB{actual:?}"
                )));
            }
        }
    }

    Ok(())
}

/// Validates that an image contains a horizontal dark-to-light gradient.
///
/// Luminance along the center row must not drop by more than one step from
/// one sample to the next and must rise by at least 50 overall.
///
/// # Errors
///
/// Returns `PatternMismatch` if the gradient is not monotonic or the image is
/// close to a solid color.
pub fn validate_gradient(image: &VideoImage) -> Result<()> {
    let center_y = image.height() / 2;
    let step = (image.width() / 64).max(1) as usize;

    let mut first: Option<f32> = None;
    let mut prev: Option<f32> = None;

    for x in (0..image.width()).step_by(step) {
        let value = luminance(sample(image, x, center_y)?);
        if let Some(prev) = prev {
            if value < prev - 1.0 {
                return Err(mismatch(format!(
                    "gradient not increasing at x={x}: luminance {value} < previous {prev}"
                )));
            }
        }
        first.get_or_insert(value);
        prev = Some(value);
    }

    let rise = match (first, prev) {
        (Some(first), Some(last)) => last - first,
        _ => 0.0,
    };
    if rise < MIN_GRADIENT_RISE {
        return Err(mismatch(format!(
            "insufficient luminance change for gradient: {rise} (need {MIN_GRADIENT_RISE})"
        )));
    }

    Ok(())
}

/// Validates that each row of an image carries its own index, counted from
/// the top, in every channel.
///
/// # Errors
///
/// Returns `PatternMismatch` on the first row that does not match, which is
/// what an upside-down image produces.
pub fn validate_row_order(image: &VideoImage) -> Result<()> {
    let x = image.width() / 2;
    for y in 0..image.height() {
        #[allow(clippy::cast_possible_truncation)]
        let level = (y % 256) as u8;
        let actual = sample(image, x, y)?;
        if actual != (level, level, level) {
            return Err(mismatch(format!(
                "row {y} carries RGB{actual:?}, expected level {level}"
            )));
        }
    }
    Ok(())
}

/// Validates image dimensions.
///
/// # Errors
///
/// Returns `PatternMismatch` if the image size differs from `expected`.
pub fn validate_frame_size(image: &VideoImage, expected: FrameSize) -> Result<()> {
    let actual = FrameSize::new(image.width(), image.height());
    if actual != expected {
        return Err(mismatch(format!(
            "expected {}x{}, got {}x{}",
            expected.width, expected.height, actual.width, actual.height
        )));
    }
    Ok(())
}

fn sample(image: &VideoImage, x: u32, y: u32) -> Result<(u8, u8, u8)> {
    image
        .pixel_at(x, y)
        .ok_or_else(|| mismatch(format!("failed to get pixel at ({x}, {y})")))
}

// Rec. 601 luma
fn luminance((r, g, b): (u8, u8, u8)) -> f32 {
    0.114f32.mul_add(
        f32::from(b),
        0.587f32.mul_add(f32::from(g), 0.299 * f32::from(r)),
    )
}

const fn mismatch(reason: String) -> CaptureError {
    CaptureError::PatternMismatch { reason }
}

/// Whether all three channels are within `tolerance`.
fn colors_match(actual: (u8, u8, u8), expected: (u8, u8, u8), tolerance: u8) -> bool {
    let (ar, ag, ab) = actual;
    let (er, eg, eb) = expected;

    ar.abs_diff(er) <= tolerance && ag.abs_diff(eg) <= tolerance && ab.abs_diff(eb) <= tolerance
}
