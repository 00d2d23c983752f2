use image::{GrayImage, ImageBuffer, Luma, RgbImage};
use imageproc::{distance_transform::Norm, filter::gaussian_blur_f32, morphology};
use serde::{Deserialize, Serialize};

use crate::{diminish::detector::DetectionRegion, error::MaskError};

/// Per-pixel replacement weight in `[0, 1]`: 0 keeps the target pixel, 1 takes the aligned source
pub type Mask = ImageBuffer<Luma<f32>, Vec<f32>>;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct MaskConfig {
    /// Largest per-channel difference still considered unchanged.
    /// Default: 40
    pub diff_threshold: u8,

    /// Opening radius (L-infinity) removing isolated changed pixels. 0 disables.
    /// Default: 2
    pub open_radius: u8,

    /// Closing radius (L-infinity) filling small holes. 0 disables.
    /// Default: 2
    pub close_radius: u8,

    /// Standard deviation of the edge feathering blur (pixels). 0 keeps hard edges.
    /// Default: 1.5
    pub feather_sigma: f32,
}

impl Default for MaskConfig {
    fn default() -> Self {
        Self {
            diff_threshold: 40,
            open_radius: 2,
            close_radius: 2,
            feather_sigma: 1.5,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct DifferenceMasker {
    config: MaskConfig,
}

impl DifferenceMasker {
    pub fn new(config: MaskConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &MaskConfig {
        &self.config
    }

    /// Mask of the pixels where `aligned_source` and `target` differ.
    ///
    /// `valid` marks the pixels covered by the alignment warp (non-zero); everything else stays 0.
    pub fn compute_mask(
        &self,
        aligned_source: &RgbImage,
        target: &RgbImage,
        valid: Option<&GrayImage>,
    ) -> Result<Mask, MaskError> {
        check_dimensions(aligned_source.dimensions(), target.dimensions())?;
        if let Some(valid) = valid {
            check_dimensions(valid.dimensions(), target.dimensions())?;
        }

        let mut binary = self.changed_pixels(aligned_source, target);
        if self.config.open_radius > 0 {
            binary = morphology::open(&binary, Norm::LInf, self.config.open_radius);
        }
        if self.config.close_radius > 0 {
            binary = morphology::close(&binary, Norm::LInf, self.config.close_radius);
        }

        let mut mask = Mask::from_fn(binary.width(), binary.height(), |x, y| {
            let covered = valid.map_or(true, |v| v.get_pixel(x, y).0[0] > 0);
            Luma([if covered && binary.get_pixel(x, y).0[0] > 0 { 1.0 } else { 0.0 }])
        });

        if self.config.feather_sigma > 0.0 {
            mask = feather(&mask, self.config.feather_sigma);
            // the blur bleeds into uncovered pixels
            if let Some(valid) = valid {
                for (weight, coverage) in mask.pixels_mut().zip(valid.pixels()) {
                    if coverage.0[0] == 0 {
                        weight.0[0] = 0.0;
                    }
                }
            }
        }

        Ok(mask)
    }

    /// 255 where any channel differs by more than the threshold
    fn changed_pixels(&self, source: &RgbImage, target: &RgbImage) -> GrayImage {
        let threshold = self.config.diff_threshold;
        GrayImage::from_fn(target.width(), target.height(), |x, y| {
            let a = source.get_pixel(x, y).0;
            let b = target.get_pixel(x, y).0;
            let diff = a.iter().zip(b.iter()).map(|(&a, &b)| a.abs_diff(b)).max().unwrap_or(0);
            Luma([if diff > threshold { 255 } else { 0 }])
        })
    }
}

/// Force a zero weight inside every region
pub fn suppress(mask: &mut Mask, regions: &[DetectionRegion]) {
    let (width, height) = mask.dimensions();
    for region in regions {
        let rect = region.rect;
        let left = rect.left().clamp(0, width as i32) as u32;
        let top = rect.top().clamp(0, height as i32) as u32;
        let right = (rect.right() + 1).clamp(0, width as i32) as u32;
        let bottom = (rect.bottom() + 1).clamp(0, height as i32) as u32;
        for y in top..bottom {
            for x in left..right {
                mask.put_pixel(x, y, Luma([0.0]));
            }
        }
    }
}

fn check_dimensions(source_dims: (u32, u32), target_dims: (u32, u32)) -> Result<(), MaskError> {
    if source_dims != target_dims {
        return Err(MaskError::DimensionMismatch {
            source_dims,
            target_dims,
        });
    }
    Ok(())
}

/// Gaussian edge ramp, rescaled so the interior of a region stays at 1
fn feather(mask: &Mask, sigma: f32) -> Mask {
    // the kernel is truncated and not normalised, a constant image measures its gain
    let unit = Mask::from_pixel(1, 1, Luma([1.0]));
    let gain = gaussian_blur_f32(&unit, sigma).get_pixel(0, 0).0[0];
    let mut blurred = gaussian_blur_f32(mask, sigma);
    blurred
        .pixels_mut()
        .for_each(|p| p.0[0] = (p.0[0] / gain).clamp(0.0, 1.0));
    blurred
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diminish::detector::SubjectCategory;
    use crate::test_support::textured_rgb;
    use image::Rgb;
    use imageproc::{drawing::draw_filled_rect_mut, rect::Rect};

    fn square_pair() -> (RgbImage, RgbImage) {
        let background = RgbImage::from_pixel(100, 100, Rgb([40, 120, 200]));
        let mut occupied = background.clone();
        draw_filled_rect_mut(&mut occupied, Rect::at(40, 40).of_size(10, 10), Rgb([255, 0, 0]));
        (background, occupied)
    }

    #[test]
    fn identical_images_give_empty_mask() {
        let image = textured_rgb(80, 60, 9);
        let mask = DifferenceMasker::default().compute_mask(&image, &image, None).unwrap();
        assert!(mask.pixels().all(|p| p.0[0] == 0.0));
    }

    #[test]
    fn changed_square_is_masked_with_soft_edge() {
        let (source, target) = square_pair();
        let mask = DifferenceMasker::default().compute_mask(&source, &target, None).unwrap();

        assert!(mask.get_pixel(44, 44).0[0] > 0.99);
        assert!(mask.get_pixel(10, 10).0[0] == 0.0);
        assert!(mask.get_pixel(60, 60).0[0] == 0.0);
        let edge = mask.get_pixel(40, 45).0[0];
        assert!(edge > 0.2 && edge < 0.9, "edge weight {}", edge);
    }

    #[test]
    fn isolated_noise_is_opened_away() {
        let source = RgbImage::from_pixel(50, 50, Rgb([100, 100, 100]));
        let mut target = source.clone();
        target.put_pixel(25, 25, Rgb([255, 255, 255]));
        let mask = DifferenceMasker::default().compute_mask(&source, &target, None).unwrap();
        assert!(mask.pixels().all(|p| p.0[0] == 0.0));
    }

    #[test]
    fn closing_fills_small_holes() {
        let source = RgbImage::from_pixel(60, 60, Rgb([100, 100, 100]));
        let mut target = source.clone();
        draw_filled_rect_mut(&mut target, Rect::at(20, 20).of_size(20, 20), Rgb([250, 20, 20]));
        // a 2x2 patch inside the object that happens to match the background
        draw_filled_rect_mut(&mut target, Rect::at(29, 29).of_size(2, 2), Rgb([100, 100, 100]));

        let hard_edges = MaskConfig {
            feather_sigma: 0.0,
            ..Default::default()
        };
        let mask = DifferenceMasker::new(hard_edges.clone())
            .compute_mask(&source, &target, None)
            .unwrap();
        assert_eq!(mask.get_pixel(29, 29).0[0], 1.0);
        assert_eq!(mask.get_pixel(30, 30).0[0], 1.0);
        assert_eq!(mask.get_pixel(10, 10).0[0], 0.0);

        let unclosed = DifferenceMasker::new(MaskConfig {
            close_radius: 0,
            ..hard_edges
        })
        .compute_mask(&source, &target, None)
        .unwrap();
        assert_eq!(unclosed.get_pixel(29, 29).0[0], 0.0);
        assert_eq!(unclosed.get_pixel(25, 25).0[0], 1.0);
    }

    #[test]
    fn uncovered_pixels_are_never_replaced() {
        let (source, target) = square_pair();
        let mut valid = GrayImage::from_pixel(100, 100, Luma([255]));
        for y in 0..100 {
            for x in 0..45 {
                valid.put_pixel(x, y, Luma([0]));
            }
        }
        let mask = DifferenceMasker::default()
            .compute_mask(&source, &target, Some(&valid))
            .unwrap();
        assert_eq!(mask.get_pixel(42, 44).0[0], 0.0);
        assert!(mask.get_pixel(47, 44).0[0] > 0.5);
    }

    #[test]
    fn mismatched_dimensions_fail() {
        let a = RgbImage::new(10, 10);
        let b = RgbImage::new(10, 12);
        assert_eq!(
            DifferenceMasker::default().compute_mask(&a, &b, None),
            Err(MaskError::DimensionMismatch {
                source_dims: (10, 10),
                target_dims: (10, 12)
            })
        );
    }

    #[test]
    fn suppress_clears_region_only() {
        let mut mask = Mask::from_pixel(20, 20, Luma([1.0]));
        let region = DetectionRegion {
            rect: Rect::at(-5, 2).of_size(10, 3),
            confidence: 1.0,
            category: SubjectCategory::Face,
        };
        suppress(&mut mask, &[region]);
        assert_eq!(mask.get_pixel(0, 2).0[0], 0.0);
        assert_eq!(mask.get_pixel(4, 4).0[0], 0.0);
        assert_eq!(mask.get_pixel(5, 4).0[0], 1.0);
        assert_eq!(mask.get_pixel(0, 5).0[0], 1.0);
    }
}
