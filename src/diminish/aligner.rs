use arrsac::Arrsac;
use image::{imageops::grayscale, GrayImage, Luma, Rgb, RgbImage};
use imageproc::geometric_transformations::{warp_into, Interpolation, Projection};
use nalgebra::Point2;
use rand::{rngs::StdRng, SeedableRng};
use sample_consensus::Consensus;
use serde::{Deserialize, Serialize};

use crate::{
    algorithms::{
        features::{match_features, FeatureParams, SizedFeature},
        homography::{Correspondence, Homography, HomographyEstimator},
    },
    error::AlignmentError,
};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AlignerConfig {
    /// FAST corner threshold.
    /// Default: 20
    pub fast_threshold: u8,

    /// Strongest corners described per image.
    /// Default: 1000
    pub max_features: usize,

    /// Minimum one-to-one matches needed before fitting.
    /// Default: 12
    pub min_matches: usize,

    /// Transfer error below which a match counts as an inlier (pixels).
    /// Default: 3.0
    pub inlier_threshold: f64,

    /// Minimum share of matches agreeing with the fitted homography.
    /// Default: 0.3
    pub min_inlier_ratio: f64,

    /// Maximum RMS transfer error of the refined fit over its inliers (pixels).
    /// Default: 2.0
    pub max_residual: f64,

    /// Seed for the consensus sampler.
    /// Default: 42
    pub seed: u64,
}

impl Default for AlignerConfig {
    fn default() -> Self {
        Self {
            fast_threshold: 20,
            max_features: 1000,
            min_matches: 12,
            inlier_threshold: 3.0,
            min_inlier_ratio: 0.3,
            max_residual: 2.0,
            seed: 42,
        }
    }
}

/// Homography taking source pixel coordinates onto the target image it was estimated against
#[derive(Clone, Debug, PartialEq)]
pub struct AlignmentTransform {
    pub homography: Homography,
    pub matches: usize,
    pub inliers: usize,
    /// RMS transfer error over the inliers (pixels)
    pub residual: f64,
}

impl AlignmentTransform {
    pub fn identity() -> Self {
        Self {
            homography: Homography::identity(),
            matches: 0,
            inliers: 0,
            residual: 0.0,
        }
    }

    /// Exactly the identity matrix, as produced by [`AlignmentTransform::identity`]
    pub fn is_identity(&self) -> bool {
        self.homography.0 == Homography::identity().0
    }

    pub fn map_point(&self, point: &Point2<f64>) -> Option<Point2<f64>> {
        self.homography.transform_point(point)
    }

    /// Resample `source` into a `width` x `height` target grid.
    ///
    /// Returns the aligned image and a validity mask that is 255 where the warped source covers
    /// the target pixel and 0 elsewhere.
    pub fn warp(
        &self,
        source: &RgbImage,
        width: u32,
        height: u32,
    ) -> Result<(RgbImage, GrayImage), AlignmentError> {
        if self.is_identity() && source.dimensions() == (width, height) {
            return Ok((source.clone(), GrayImage::from_pixel(width, height, Luma([255]))));
        }

        let matrix: Vec<f32> = self
            .homography
            .0
            .transpose()
            .iter()
            .map(|&v| v as f32)
            .collect();
        let mut transform = [0f32; 9];
        transform.copy_from_slice(&matrix);
        let projection = Projection::from_matrix(transform).ok_or(AlignmentError::Degenerate)?;

        let mut aligned = RgbImage::new(width, height);
        warp_into(source, &projection, Interpolation::Bilinear, Rgb([0, 0, 0]), &mut aligned);

        // warp a blank canvas the same way; partially covered pixels come out between 0 and 255
        let coverage = GrayImage::from_pixel(source.width(), source.height(), Luma([255]));
        let mut valid = GrayImage::new(width, height);
        warp_into(&coverage, &projection, Interpolation::Bilinear, Luma([0]), &mut valid);
        valid.pixels_mut().for_each(|p| p.0[0] = if p.0[0] > 127 { 255 } else { 0 });

        Ok((aligned, valid))
    }
}

/// Feature based registration of two photographs of the same scene
#[derive(Clone, Debug, Default)]
pub struct ImageAligner {
    config: AlignerConfig,
}

impl ImageAligner {
    pub fn new(config: AlignerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AlignerConfig {
        &self.config
    }

    fn feature_params(&self) -> FeatureParams {
        FeatureParams {
            fast_threshold: self.config.fast_threshold,
            max_features: self.config.max_features,
            ..Default::default()
        }
    }

    /// Matched keypoints as `(source, target)` pixel pairs
    pub fn correspondences(&self, source: &RgbImage, target: &RgbImage) -> Vec<Correspondence> {
        let params = self.feature_params();
        let source_features = SizedFeature::detect(&grayscale(source), &params);
        let target_features = SizedFeature::detect(&grayscale(target), &params);
        Self::match_points(&source_features, &target_features, &params)
    }

    fn match_points(
        source_features: &[SizedFeature],
        target_features: &[SizedFeature],
        params: &FeatureParams,
    ) -> Vec<Correspondence> {
        let to_point = |f: &SizedFeature| Point2::new(f.keypoint.x as f64, f.keypoint.y as f64);
        match_features(source_features, target_features, params)
            .into_iter()
            .map(|(s, t)| (to_point(&source_features[s]), to_point(&target_features[t])))
            .collect()
    }

    /// Estimate the homography mapping `source` onto `target`.
    ///
    /// Fails with [`AlignmentError::Featureless`] when either image yields fewer keypoints than
    /// `min_matches`, and with [`AlignmentError::InsufficientFeatures`] when both are textured
    /// but too few keypoints match.
    pub fn align(
        &self,
        source: &RgbImage,
        target: &RgbImage,
    ) -> Result<AlignmentTransform, AlignmentError> {
        let params = self.feature_params();
        let source_features = SizedFeature::detect(&grayscale(source), &params);
        let target_features = SizedFeature::detect(&grayscale(target), &params);

        let required = self.config.min_matches;
        if source_features.len() < required || target_features.len() < required {
            return Err(AlignmentError::Featureless {
                source_features: source_features.len(),
                target_features: target_features.len(),
                required,
            });
        }

        let matches = Self::match_points(&source_features, &target_features, &params);
        self.estimate(&matches)
    }

    /// Fit and validate a homography over matched `(source, target)` points
    pub fn estimate(
        &self,
        matches: &[Correspondence],
    ) -> Result<AlignmentTransform, AlignmentError> {
        if matches.len() < self.config.min_matches {
            return Err(AlignmentError::InsufficientFeatures {
                found: matches.len(),
                required: self.config.min_matches,
            });
        }

        // ARRSAC (Adaptive Real-Time Random Sample Consensus) over 4-point DLT samples
        let rng = StdRng::seed_from_u64(self.config.seed);
        let (_, inliers) = Arrsac::new(self.config.inlier_threshold, rng)
            .model_inliers(&HomographyEstimator, matches.iter())
            .ok_or(AlignmentError::NoConsensus)?;

        let ratio = inliers.len() as f64 / matches.len() as f64;
        if ratio < self.config.min_inlier_ratio {
            return Err(AlignmentError::LowInlierRatio {
                ratio,
                required: self.config.min_inlier_ratio,
            });
        }

        let homography = Homography::from_correspondences(inliers.iter().map(|&i| &matches[i]))
            .ok_or(AlignmentError::Degenerate)?;
        homography.inverse().ok_or(AlignmentError::Degenerate)?;

        let residual = (inliers
            .iter()
            .map(|&i| homography.transfer_error(&matches[i]).powi(2))
            .sum::<f64>()
            / inliers.len() as f64)
            .sqrt();
        if !(residual <= self.config.max_residual) {
            return Err(AlignmentError::ResidualTooLarge {
                residual,
                tolerance: self.config.max_residual,
            });
        }

        log::debug!(
            "aligned with {} of {} matches, rms residual {:.3}px",
            inliers.len(),
            matches.len(),
            residual
        );

        Ok(AlignmentTransform {
            homography,
            matches: matches.len(),
            inliers: inliers.len(),
            residual,
        })
    }
}
