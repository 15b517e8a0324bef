//! Conversion of raw sample buffers into delivered images.
//!
//! Graph-style backends hand out DIB-layout buffers: the first row in memory
//! is the bottom row of the picture. Delivered images are always top-down.

use crate::error::{CaptureError, Result};
use crate::traits::{RowOrder, StreamFormat};

/// Bytes per pixel of delivered images.
pub const BYTES_PER_PIXEL: usize = 3;

/// A top-down 24-bit image handed to frame subscribers.
///
/// Pixels are stored in B,G,R byte order, rows `stride` bytes apart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoImage {
    width: u32,
    height: u32,
    stride: usize,
    data: Vec<u8>,
}

impl VideoImage {
    /// Image width in pixels.
    pub const fn width(&self) -> u32 {
        self.width
    }

    /// Image height in pixels.
    pub const fn height(&self) -> u32 {
        self.height
    }

    /// Bytes per row.
    pub const fn stride(&self) -> usize {
        self.stride
    }

    /// Raw pixel data, `stride * height` bytes.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Consume the image and return its pixel data.
    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    /// Row `y`, counted from the top, including stride padding.
    pub fn row(&self, y: u32) -> Option<&[u8]> {
        if y >= self.height {
            return None;
        }
        let start = y as usize * self.stride;
        self.data.get(start..start + self.stride)
    }

    /// RGB values of the pixel at `(x, y)`, or `None` when out of bounds.
    pub fn pixel_at(&self, x: u32, y: u32) -> Option<(u8, u8, u8)> {
        if x >= self.width {
            return None;
        }
        let offset = x as usize * BYTES_PER_PIXEL;
        let px = self.row(y)?.get(offset..offset + BYTES_PER_PIXEL)?;
        match *px {
            [b, g, r] => Some((r, g, b)),
            _ => None,
        }
    }
}

/// Convert a raw buffer according to the negotiated stream format.
pub fn convert(buffer: &[u8], format: &StreamFormat) -> Result<VideoImage> {
    match format.row_order {
        RowOrder::BottomUp => flip_bottom_up(buffer, format.width, format.height, format.stride),
        RowOrder::TopDown => copy_top_down(buffer, format.width, format.height, format.stride),
    }
}

/// Build a top-down image from a bottom-up buffer.
///
/// Source row `y` lands in destination row `height - 1 - y`; each row copies
/// exactly `stride` bytes.
pub fn flip_bottom_up(buffer: &[u8], width: u32, height: u32, stride: usize) -> Result<VideoImage> {
    let len = check_geometry(buffer, width, height, stride)?;
    let mut data = vec![0u8; len];

    for (src, dst) in buffer
        .chunks_exact(stride)
        .take(height as usize)
        .zip(data.chunks_exact_mut(stride).rev())
    {
        dst.copy_from_slice(src);
    }

    Ok(VideoImage {
        width,
        height,
        stride,
        data,
    })
}

/// Build an image from a buffer that is already top-down.
pub fn copy_top_down(buffer: &[u8], width: u32, height: u32, stride: usize) -> Result<VideoImage> {
    let len = check_geometry(buffer, width, height, stride)?;
    let data = buffer
        .get(..len)
        .map(<[u8]>::to_vec)
        .ok_or_else(|| conversion_failure(format!("buffer shorter than {len} bytes")))?;

    Ok(VideoImage {
        width,
        height,
        stride,
        data,
    })
}

fn check_geometry(buffer: &[u8], width: u32, height: u32, stride: usize) -> Result<usize> {
    if width == 0 || height == 0 {
        return Err(conversion_failure(format!(
            "invalid frame size {width}x{height}"
        )));
    }
    if stride < width as usize * BYTES_PER_PIXEL {
        return Err(conversion_failure(format!(
            "stride {stride} too small for width {width}"
        )));
    }
    let len = stride * height as usize;
    if buffer.len() < len {
        return Err(conversion_failure(format!(
            "buffer has {} bytes, expected {len}",
            buffer.len()
        )));
    }
    Ok(len)
}

const fn conversion_failure(reason: String) -> CaptureError {
    CaptureError::CallbackConversionFailure { reason }
}
