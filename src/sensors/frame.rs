use std::sync::Arc;

use image::{ImageBuffer, Luma, RgbImage};

use crate::algorithms::camera::CameraIntrinsics;

/// Metric depth in metres per pixel
pub type DepthImage = ImageBuffer<Luma<f32>, Vec<f32>>;

/// Canonical marker for pixels where the sensor has no depth reading
pub const INVALID_DEPTH: f32 = f32::NAN;

/// A single depth frame. Pixels are shared, so clones never copy the buffer.
#[derive(Clone, Debug)]
pub struct DepthFrame {
    pub timestamp: f64,
    pub intrinsics: Option<CameraIntrinsics>,
    depth: Arc<DepthImage>,
}

impl DepthFrame {
    pub fn new(timestamp: f64, depth: DepthImage, intrinsics: Option<CameraIntrinsics>) -> Self {
        Self {
            timestamp,
            intrinsics,
            depth: Arc::new(depth),
        }
    }

    pub fn image(&self) -> &DepthImage {
        &self.depth
    }

    pub fn width(&self) -> u32 {
        self.depth.width()
    }

    pub fn height(&self) -> u32 {
        self.depth.height()
    }

    /// Depth at a pixel, `None` outside the frame or where the reading is invalid
    pub fn depth_at(&self, x: u32, y: u32) -> Option<f32> {
        if x >= self.width() || y >= self.height() {
            return None;
        }
        let depth = self.depth.get_pixel(x, y).0[0];
        is_valid_depth(depth).then_some(depth)
    }

    /// Shared identity of the underlying buffer
    pub fn shares_pixels_with(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.depth, &other.depth)
    }
}

pub fn is_valid_depth(depth: f32) -> bool {
    depth.is_finite() && depth > 0.0
}

/// A single color frame. Pixels are shared, so clones never copy the buffer.
#[derive(Clone, Debug)]
pub struct ColorFrame {
    pub timestamp: f64,
    pub intrinsics: Option<CameraIntrinsics>,
    color: Arc<RgbImage>,
}

impl ColorFrame {
    pub fn new(timestamp: f64, color: RgbImage, intrinsics: Option<CameraIntrinsics>) -> Self {
        Self {
            timestamp,
            intrinsics,
            color: Arc::new(color),
        }
    }

    pub fn image(&self) -> &RgbImage {
        &self.color
    }

    pub fn width(&self) -> u32 {
        self.color.width()
    }

    pub fn height(&self) -> u32 {
        self.color.height()
    }

    pub fn shares_pixels_with(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.color, &other.color)
    }
}

/// Depth and color frames captured close enough in time to be fused
#[derive(Clone, Debug)]
pub struct FramePair {
    pub depth: DepthFrame,
    pub color: ColorFrame,
}

impl FramePair {
    /// Pairs the frames when their timestamps are at most `max_skew` seconds apart
    pub fn new(depth: DepthFrame, color: ColorFrame, max_skew: f64) -> Option<Self> {
        ((depth.timestamp - color.timestamp).abs() <= max_skew).then_some(Self { depth, color })
    }

    pub fn skew(&self) -> f64 {
        (self.depth.timestamp - self.color.timestamp).abs()
    }

    /// Fusion time of the pair, the later of the two captures
    pub fn timestamp(&self) -> f64 {
        self.depth.timestamp.max(self.color.timestamp)
    }

    /// Intrinsics used to register the pair. The color stream's calibration wins
    /// since keypoints are detected on the color image.
    pub fn intrinsics(&self) -> Option<CameraIntrinsics> {
        self.color.intrinsics.or(self.depth.intrinsics)
    }

    /// Depth looked up at a color pixel, accounting for a depth stream of a different resolution
    pub fn depth_at_color_pixel(&self, x: u32, y: u32) -> Option<f32> {
        let dx = (x as u64 * self.depth.width() as u64 / self.color.width().max(1) as u64) as u32;
        let dy = (y as u64 * self.depth.height() as u64 / self.color.height().max(1) as u64) as u32;
        self.depth.depth_at(dx, dy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn depth(timestamp: f64) -> DepthFrame {
        DepthFrame::new(timestamp, DepthImage::from_pixel(4, 4, Luma([1.5])), None)
    }

    fn color(timestamp: f64) -> ColorFrame {
        ColorFrame::new(timestamp, RgbImage::new(8, 8), None)
    }

    #[test]
    fn pairs_respect_skew() {
        assert!(FramePair::new(depth(1.0), color(1.01), 0.02).is_some());
        assert!(FramePair::new(depth(1.0), color(1.05), 0.02).is_none());
    }

    #[test]
    fn invalid_depth_is_filtered() {
        let mut image = DepthImage::from_pixel(2, 2, Luma([2.0]));
        image.put_pixel(0, 0, Luma([INVALID_DEPTH]));
        image.put_pixel(1, 0, Luma([0.0]));
        let frame = DepthFrame::new(0.0, image, None);
        assert_eq!(frame.depth_at(0, 0), None);
        assert_eq!(frame.depth_at(1, 0), None);
        assert_eq!(frame.depth_at(1, 1), Some(2.0));
        assert_eq!(frame.depth_at(5, 5), None);
    }

    #[test]
    fn color_pixels_map_onto_smaller_depth() {
        let pair = FramePair::new(depth(0.0), color(0.0), 0.0).unwrap();
        assert_eq!(pair.depth_at_color_pixel(7, 7), Some(1.5));
    }

    #[test]
    fn clones_share_pixels() {
        let frame = color(0.0);
        assert!(frame.clone().shares_pixels_with(&frame));
    }
}
