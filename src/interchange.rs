//! Conversion between platform bitmaps and [`RgbImage`].
//!
//! Platform image types reach the core as a raw byte buffer with a width, a height, a row
//! stride and a [`PixelLayout`]. Alpha is dropped on the way in and written as opaque on the
//! way out.

use image::{Rgb, RgbImage};
use serde::{Deserialize, Serialize};

use crate::error::InterchangeError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelLayout {
    Rgb8,
    Rgba8,
    Bgra8,
    Gray8,
}

impl PixelLayout {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelLayout::Rgb8 => 3,
            PixelLayout::Rgba8 | PixelLayout::Bgra8 => 4,
            PixelLayout::Gray8 => 1,
        }
    }

    fn to_rgb(self, px: &[u8]) -> Rgb<u8> {
        match self {
            PixelLayout::Rgb8 | PixelLayout::Rgba8 => Rgb([px[0], px[1], px[2]]),
            PixelLayout::Bgra8 => Rgb([px[2], px[1], px[0]]),
            PixelLayout::Gray8 => Rgb([px[0]; 3]),
        }
    }

    fn write_rgb(self, Rgb([r, g, b]): Rgb<u8>, out: &mut Vec<u8>) {
        match self {
            PixelLayout::Rgb8 => out.extend_from_slice(&[r, g, b]),
            PixelLayout::Rgba8 => out.extend_from_slice(&[r, g, b, 255]),
            PixelLayout::Bgra8 => out.extend_from_slice(&[b, g, r, 255]),
            // ITU-R BT.709 luma, as `image` computes it
            PixelLayout::Gray8 => {
                let luma = 0.2126 * r as f32 + 0.7152 * g as f32 + 0.0722 * b as f32;
                out.push(luma.round().min(255.0) as u8)
            }
        }
    }
}

/// Copy a raw bitmap into an [`RgbImage`]. `stride` is the byte distance between rows.
pub fn to_rgb_image(
    data: &[u8],
    width: u32,
    height: u32,
    stride: usize,
    layout: PixelLayout,
) -> Result<RgbImage, InterchangeError> {
    let bpp = layout.bytes_per_pixel();
    let row = (width as usize)
        .checked_mul(bpp)
        .ok_or(InterchangeError::InvalidStride { stride, row: usize::MAX })?;
    if stride < row {
        return Err(InterchangeError::InvalidStride { stride, row });
    }

    // the last row needs no padding
    let expected = match height {
        0 => Some(0),
        _ => stride
            .checked_mul(height as usize - 1)
            .and_then(|padded| padded.checked_add(row)),
    }
    .ok_or(InterchangeError::BufferTooShort {
        expected: usize::MAX,
        actual: data.len(),
    })?;
    if data.len() < expected {
        return Err(InterchangeError::BufferTooShort {
            expected,
            actual: data.len(),
        });
    }

    Ok(RgbImage::from_fn(width, height, |x, y| {
        let offset = y as usize * stride + x as usize * bpp;
        layout.to_rgb(&data[offset..offset + bpp])
    }))
}

/// Tightly packed bitmap of `image` in `layout`
pub fn from_rgb_image(image: &RgbImage, layout: PixelLayout) -> Vec<u8> {
    let pixels = image.width() as usize * image.height() as usize;
    let mut out = Vec::with_capacity(pixels * layout.bytes_per_pixel());
    for pixel in image.pixels() {
        layout.write_rgb(*pixel, &mut out);
    }
    out
}
