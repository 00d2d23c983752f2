use image::{Rgb, RgbImage};

use crate::{diminish::masker::Mask, error::CompositeError};

/// Blend the aligned source over the target: `target * (1 - mask) + source * mask` per channel.
///
/// All three inputs must share the target's dimensions. Mask weights outside `[0, 1]` are
/// clamped and non-finite weights keep the target pixel.
pub fn composite(
    aligned_source: &RgbImage,
    target: &RgbImage,
    mask: &Mask,
) -> Result<RgbImage, CompositeError> {
    let dims = target.dimensions();
    if aligned_source.dimensions() != dims || mask.dimensions() != dims {
        return Err(CompositeError::DimensionMismatch {
            target: dims,
            source_dims: aligned_source.dimensions(),
            mask: mask.dimensions(),
        });
    }

    Ok(RgbImage::from_fn(dims.0, dims.1, |x, y| {
        let weight = mask.get_pixel(x, y).0[0];
        let weight = if weight.is_finite() { weight.clamp(0.0, 1.0) } else { 0.0 };
        let source = aligned_source.get_pixel(x, y).0;
        let kept = target.get_pixel(x, y).0;

        let mut blended = [0u8; 3];
        for c in 0..3 {
            let value = kept[c] as f32 * (1.0 - weight) + source[c] as f32 * weight;
            blended[c] = value.round().clamp(0.0, 255.0) as u8;
        }
        Rgb(blended)
    }))
}
