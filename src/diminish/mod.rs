//! Diminished reality: remove an object from a photograph using a second, object-free
//! photograph taken from the same viewpoint.
//!
//! ```plain
//! source ──align──> aligned source ──┐
//!                                    ├─ difference mask ─ suppress subjects ─ composite ─> output
//! target ────────────────────────────┘
//! ```

pub mod aligner;
pub mod compositor;
pub mod detector;
pub mod face;
pub mod masker;
pub mod object;

use image::RgbImage;
use serde::{Deserialize, Serialize};

pub use aligner::{AlignerConfig, AlignmentTransform, ImageAligner};
pub use compositor::composite;
pub use detector::{DetectionRegion, SubjectCategory, SubjectDetector};
pub use face::{FaceConfig, FaceDetector, HaarCascade};
pub use masker::{DifferenceMasker, Mask, MaskConfig};
pub use object::{ObjectConfig, ObjectDetector};

use crate::{
    config::Config,
    error::{AlignmentError, DetectionError, DiminishError},
};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DiminishConfig {
    /// Use the identity transform when one of the images has too little texture to register
    /// and both have the same size. Both photographs come from the same viewpoint, so
    /// untextured scenes still line up. Textured images that fail to match always abort.
    /// Default: true
    pub identity_fallback: bool,
}

impl Default for DiminishConfig {
    fn default() -> Self {
        Self { identity_fallback: true }
    }
}

/// Everything a diminish call produced
#[derive(Clone, Debug)]
pub struct Diminished {
    pub image: RgbImage,
    pub mask: Mask,
    pub transform: AlignmentTransform,
    pub subjects: Vec<DetectionRegion>,
}

/// The align, mask, detect, composite pipeline.
///
/// Calls share nothing but the detectors' loaded models, so one instance can serve
/// concurrent callers.
pub struct Diminisher {
    config: DiminishConfig,
    aligner: ImageAligner,
    masker: DifferenceMasker,
    detectors: Vec<Box<dyn SubjectDetector>>,
}

impl Default for Diminisher {
    fn default() -> Self {
        Self::new(DiminishConfig::default(), ImageAligner::default(), DifferenceMasker::default())
    }
}

impl Diminisher {
    pub fn new(config: DiminishConfig, aligner: ImageAligner, masker: DifferenceMasker) -> Self {
        Self {
            config,
            aligner,
            masker,
            detectors: Vec::new(),
        }
    }

    /// Pipeline as configured. A face detector is installed when a cascade model is
    /// configured, an object detector when the `object` section is present.
    pub fn from_config(config: &Config) -> Result<Self, DetectionError> {
        let mut diminisher = Self::new(
            config.diminish.clone(),
            ImageAligner::new(config.aligner.clone()),
            DifferenceMasker::new(config.mask.clone()),
        );
        if config.face.model.is_some() {
            diminisher = diminisher.with_detector(FaceDetector::new(config.face.clone())?);
        }
        if let Some(object) = &config.object {
            diminisher = diminisher.with_detector(ObjectDetector::new(object.clone()));
        }
        Ok(diminisher)
    }

    pub fn with_detector(mut self, detector: impl SubjectDetector + 'static) -> Self {
        self.detectors.push(Box::new(detector));
        self
    }

    /// Run every installed detector on `image`
    pub fn detect_subjects(
        &self,
        image: &RgbImage,
    ) -> Result<Vec<DetectionRegion>, DetectionError> {
        let mut regions = Vec::new();
        for detector in &self.detectors {
            regions.extend(detector.detect(image)?);
        }
        Ok(regions)
    }

    /// `target` with the pixels that differ from `source` replaced by `source`
    pub fn diminish(
        &self,
        source: &RgbImage,
        target: &RgbImage,
    ) -> Result<RgbImage, DiminishError> {
        self.run(source, target).map(|diminished| diminished.image)
    }

    pub fn run(&self, source: &RgbImage, target: &RgbImage) -> Result<Diminished, DiminishError> {
        let transform = match self.aligner.align(source, target) {
            Ok(transform) => transform,
            Err(AlignmentError::Featureless {
                source_features,
                target_features,
                required,
            }) if self.config.identity_fallback && source.dimensions() == target.dimensions() => {
                log::debug!(
                    "{} and {} keypoints (need {}), assuming identical viewpoints",
                    source_features,
                    target_features,
                    required
                );
                AlignmentTransform::identity()
            }
            Err(e) => {
                log::warn!("diminish aborted: {}", e);
                return Err(e.into());
            }
        };

        let (aligned, valid) = transform.warp(source, target.width(), target.height())?;
        let mut mask = self.masker.compute_mask(&aligned, target, Some(&valid))?;

        // a subject in either capture must survive
        let mut subjects = self.detect_subjects(target)?;
        subjects.extend(self.detect_subjects(&aligned)?);
        masker::suppress(&mut mask, &subjects);

        let image = composite(&aligned, target, &mask)?;
        Ok(Diminished {
            image,
            mask,
            transform,
            subjects,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::textured_rgb;
    use image::Rgb;
    use imageproc::{drawing::draw_filled_rect_mut, rect::Rect};

    fn captures() -> (RgbImage, RgbImage) {
        let clean = RgbImage::from_pixel(100, 100, Rgb([40, 120, 200]));
        let mut occupied = clean.clone();
        draw_filled_rect_mut(&mut occupied, Rect::at(40, 40).of_size(10, 10), Rgb([255, 0, 0]));
        (clean, occupied)
    }

    #[test]
    fn object_is_removed_from_flat_scene() {
        let (clean, occupied) = captures();
        let diminished = Diminisher::default().run(&clean, &occupied).unwrap();

        assert!(diminished.transform.is_identity());
        assert!(diminished.subjects.is_empty());
        assert_eq!(diminished.image.get_pixel(45, 45), &Rgb([40, 120, 200]));
        assert_eq!(diminished.image.get_pixel(5, 5), occupied.get_pixel(5, 5));
    }

    #[test]
    fn detected_subjects_are_kept() {
        let (clean, occupied) = captures();
        let diminisher = Diminisher::default().with_detector(ObjectDetector::default());

        let diminished = diminisher.run(&clean, &occupied).unwrap();
        assert_eq!(diminished.subjects.len(), 1);
        assert_eq!(diminished.image, occupied);
    }

    #[test]
    fn without_fallback_flat_scenes_fail() {
        let (clean, occupied) = captures();
        let diminisher = Diminisher::new(
            DiminishConfig { identity_fallback: false },
            ImageAligner::default(),
            DifferenceMasker::default(),
        );
        assert!(matches!(
            diminisher.diminish(&clean, &occupied),
            Err(DiminishError::Alignment(AlignmentError::Featureless { .. }))
        ));
    }

    #[test]
    fn unrelated_captures_abort() {
        let source = textured_rgb(200, 150, 1);
        let target = textured_rgb(200, 150, 99);
        let result = Diminisher::default().run(&source, &target);
        assert!(
            matches!(result, Err(DiminishError::Alignment(_))),
            "{:?}",
            result.map(|d| d.transform)
        );
    }

    #[test]
    fn textured_identical_images_are_untouched() {
        let image = textured_rgb(120, 90, 17);
        let out = Diminisher::default().diminish(&image, &image).unwrap();
        assert_eq!(out, image);
    }
}
