use image::RgbImage;
use imageproc::rect::Rect;

use crate::error::DetectionError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SubjectCategory {
    Face,
    Object,
}

/// Image area that must never be replaced by the composite
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DetectionRegion {
    pub rect: Rect,
    /// In `[0, 1]`
    pub confidence: f32,
    pub category: SubjectCategory,
}

/// A detector protecting some class of subject (people, selected objects) from being erased.
///
/// Implementations hold no per-image state; anything loaded once (a cascade model) is
/// shared by every call.
pub trait SubjectDetector: Send + Sync {
    fn category(&self) -> SubjectCategory;

    fn detect(&self, image: &RgbImage) -> Result<Vec<DetectionRegion>, DetectionError>;
}

impl<D: SubjectDetector + ?Sized> SubjectDetector for Box<D> {
    fn category(&self) -> SubjectCategory {
        (**self).category()
    }

    fn detect(&self, image: &RgbImage) -> Result<Vec<DetectionRegion>, DetectionError> {
        (**self).detect(image)
    }
}
