//! Debug drawing of detections and feature correspondences

use image::{imageops, Rgb, RgbImage};
use imageproc::drawing;
use once_cell::sync::Lazy;

use crate::{
    algorithms::homography::Correspondence,
    diminish::detector::{DetectionRegion, SubjectCategory},
};

static RED: Lazy<Rgb<u8>> = Lazy::new(|| Rgb([255, 0, 0]));
static GREEN: Lazy<Rgb<u8>> = Lazy::new(|| Rgb([0, 255, 0]));
static BLUE: Lazy<Rgb<u8>> = Lazy::new(|| Rgb([0, 0, 255]));

/// Copy of `image` with a box around every region, green for faces and blue for objects
pub fn draw_detections(image: &RgbImage, regions: &[DetectionRegion]) -> RgbImage {
    let mut canvas = image.clone();
    for region in regions {
        let color = match region.category {
            SubjectCategory::Face => *GREEN,
            SubjectCategory::Object => *BLUE,
        };
        drawing::draw_hollow_rect_mut(&mut canvas, region.rect, color);
    }
    canvas
}

/// `source` and `target` side by side with every correspondence joined by a line
pub fn draw_matches(source: &RgbImage, target: &RgbImage, matches: &[Correspondence]) -> RgbImage {
    let offset = source.width();
    let mut canvas = RgbImage::new(offset + target.width(), source.height().max(target.height()));
    imageops::replace(&mut canvas, source, 0, 0);
    imageops::replace(&mut canvas, target, offset as i64, 0);

    for (from, to) in matches {
        let a = (from.x as f32, from.y as f32);
        let b = (to.x as f32 + offset as f32, to.y as f32);

        drawing::draw_hollow_circle_mut(&mut canvas, (a.0 as i32, a.1 as i32), 2, *RED);
        drawing::draw_hollow_circle_mut(&mut canvas, (b.0 as i32, b.1 as i32), 2, *GREEN);
        // draw line connecting source to target features
        drawing::draw_line_segment_mut(&mut canvas, a, b, *BLUE);
    }
    canvas
}

#[cfg(test)]
mod tests {
    use super::*;
    use imageproc::rect::Rect;
    use nalgebra::Point2;

    #[test]
    fn detection_boxes_are_outlined() {
        let image = RgbImage::new(20, 20);
        let region = DetectionRegion {
            rect: Rect::at(2, 3).of_size(5, 5),
            confidence: 0.9,
            category: SubjectCategory::Face,
        };
        let out = draw_detections(&image, &[region]);
        assert_eq!(out.get_pixel(2, 3), &*GREEN);
        assert_eq!(out.get_pixel(4, 5), &Rgb([0, 0, 0]));
        assert_eq!(image.get_pixel(2, 3), &Rgb([0, 0, 0]));
    }

    #[test]
    fn matches_span_both_images() {
        let source = RgbImage::from_pixel(10, 8, Rgb([50, 50, 50]));
        let target = RgbImage::from_pixel(12, 10, Rgb([90, 90, 90]));
        let out = draw_matches(&source, &target, &[(Point2::new(5.0, 4.0), Point2::new(5.0, 4.0))]);

        assert_eq!(out.dimensions(), (22, 10));
        assert_eq!(out.get_pixel(0, 0), &Rgb([50, 50, 50]));
        assert_eq!(out.get_pixel(21, 9), &Rgb([90, 90, 90]));
        assert_eq!(out.get_pixel(10, 4), &*BLUE);
    }
}
