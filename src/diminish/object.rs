use image::{GrayImage, Luma, RgbImage};
use imageproc::{
    rect::Rect,
    region_labelling::{connected_components, Connectivity},
};
use serde::{Deserialize, Serialize};

use crate::{
    diminish::detector::{DetectionRegion, SubjectCategory, SubjectDetector},
    error::DetectionError,
};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ObjectConfig {
    /// Color marking the objects to protect.
    /// Default: [255, 0, 0]
    pub key_color: [u8; 3],

    /// Largest per-channel distance from the key color still counted as a match.
    /// Default: 40
    pub tolerance: u8,

    /// Smallest connected blob reported (pixels).
    /// Default: 25
    pub min_area: u32,
}

impl Default for ObjectConfig {
    fn default() -> Self {
        Self {
            key_color: [255, 0, 0],
            tolerance: 40,
            min_area: 25,
        }
    }
}

/// Color keyed object detection: blobs of pixels close to a key color
#[derive(Clone, Debug, Default)]
pub struct ObjectDetector {
    config: ObjectConfig,
}

impl ObjectDetector {
    pub fn new(config: ObjectConfig) -> Self {
        Self { config }
    }

    fn key_mask(&self, image: &RgbImage) -> GrayImage {
        let key = self.config.key_color;
        GrayImage::from_fn(image.width(), image.height(), |x, y| {
            let pixel = image.get_pixel(x, y).0;
            let close = pixel
                .iter()
                .zip(key.iter())
                .all(|(&p, &k)| p.abs_diff(k) <= self.config.tolerance);
            Luma([if close { 255 } else { 0 }])
        })
    }
}

/// Bounding box accumulator of one labelled component
struct Blob {
    min: (u32, u32),
    max: (u32, u32),
    area: u32,
}

impl SubjectDetector for ObjectDetector {
    fn category(&self) -> SubjectCategory {
        SubjectCategory::Object
    }

    fn detect(&self, image: &RgbImage) -> Result<Vec<DetectionRegion>, DetectionError> {
        let labels = connected_components(&self.key_mask(image), Connectivity::Eight, Luma([0u8]));

        let mut blobs: Vec<Option<Blob>> = Vec::new();
        for (x, y, label) in labels.enumerate_pixels() {
            let label = label.0[0] as usize;
            if label == 0 {
                continue;
            }
            if blobs.len() < label {
                blobs.resize_with(label, || None);
            }
            let blob = blobs[label - 1].get_or_insert_with(|| Blob {
                min: (x, y),
                max: (x, y),
                area: 0,
            });
            blob.min = (blob.min.0.min(x), blob.min.1.min(y));
            blob.max = (blob.max.0.max(x), blob.max.1.max(y));
            blob.area += 1;
        }

        let regions: Vec<_> = blobs
            .into_iter()
            .flatten()
            .filter(|blob| blob.area >= self.config.min_area)
            .map(|blob| {
                let width = blob.max.0 - blob.min.0 + 1;
                let height = blob.max.1 - blob.min.1 + 1;
                DetectionRegion {
                    rect: Rect::at(blob.min.0 as i32, blob.min.1 as i32).of_size(width, height),
                    // how much of the box the blob fills
                    confidence: blob.area as f32 / (width * height) as f32,
                    category: SubjectCategory::Object,
                }
            })
            .collect();

        log::debug!("{} object(s) detected", regions.len());
        Ok(regions)
    }
}
