use arrsac::Arrsac;
use image::imageops::grayscale;
use nalgebra::{Point2, Point3};
use rand::{rngs::StdRng, SeedableRng};
use sample_consensus::Consensus;
use serde::{Deserialize, Serialize};

use crate::{
    algorithms::{
        camera::CameraIntrinsics,
        features::{match_features, FeatureParams, SizedFeature},
        rigid::{PointPair, RigidTransform, RigidTransformEstimator},
    },
    error::PoseError,
    sensors::FramePair,
    slam::tracker::{Pose, PoseTracker},
};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct OdometryConfig {
    /// FAST corner threshold on the color image.
    /// Default: 25
    pub fast_threshold: u8,

    /// Strongest corners described per frame.
    /// Default: 500
    pub max_features: usize,

    /// Minimum 3D-3D correspondences needed to accept a motion.
    /// Default: 12
    pub min_correspondences: usize,

    /// Consensus inlier distance (metres).
    /// Default: 0.03
    pub inlier_threshold: f64,

    /// Depth readings outside [min_depth, max_depth] are not used (metres).
    /// Default: 0.3 / 5.0
    pub min_depth: f32,
    pub max_depth: f32,

    /// Seed for the consensus sampler, so runs are reproducible.
    /// Default: 7
    pub seed: u64,
}

impl Default for OdometryConfig {
    fn default() -> Self {
        Self {
            fast_threshold: 25,
            max_features: 500,
            min_correspondences: 12,
            inlier_threshold: 0.03,
            min_depth: 0.3,
            max_depth: 5.0,
            seed: 7,
        }
    }
}

/// Last successfully tracked frame, the reference for the next one
struct Reference {
    features: Vec<SizedFeature>,
    /// Camera-frame point per feature, `None` where depth was missing
    points: Vec<Option<Point3<f64>>>,
    pose: Pose,
}

/// Frame-to-frame RGB-D visual odometry.
///
/// Keypoints on the color image are matched against the previously tracked frame, lifted to 3D
/// with the depth frame and the frame's intrinsics, and the rigid motion between the two point
/// sets is found with ARRSAC over a Kabsch estimator.
pub struct RgbdOdometry {
    config: OdometryConfig,
    initialized: bool,
    reference: Option<Reference>,
}

impl RgbdOdometry {
    pub fn new(config: OdometryConfig) -> Self {
        Self {
            config,
            initialized: false,
            reference: None,
        }
    }

    fn feature_params(&self) -> FeatureParams {
        FeatureParams {
            fast_threshold: self.config.fast_threshold,
            max_features: self.config.max_features,
            ..Default::default()
        }
    }

    fn lift(
        &self,
        pair: &FramePair,
        intrinsics: &CameraIntrinsics,
        feature: &SizedFeature,
    ) -> Option<Point3<f64>> {
        let (x, y) = (feature.keypoint.x, feature.keypoint.y);
        pair.depth_at_color_pixel(x, y)
            .filter(|d| (self.config.min_depth..=self.config.max_depth).contains(d))
            .map(|d| intrinsics.unproject(Point2::new(x as f64, y as f64), d as f64))
    }
}

impl Default for RgbdOdometry {
    fn default() -> Self {
        Self::new(OdometryConfig::default())
    }
}

impl PoseTracker for RgbdOdometry {
    fn initialize(&mut self, intrinsics: &CameraIntrinsics) -> Result<(), String> {
        if intrinsics.fx <= 0.0 || intrinsics.fy <= 0.0 {
            return Err(format!("invalid focal length ({}, {})", intrinsics.fx, intrinsics.fy));
        }
        self.initialized = true;
        self.reference = None;
        Ok(())
    }

    fn track(&mut self, pair: &FramePair) -> Result<Pose, PoseError> {
        if !self.initialized {
            return Err(PoseError::NotInitialized);
        }

        let intrinsics = pair.intrinsics().ok_or(PoseError::MissingIntrinsics)?;
        let (width, height) = pair.color.image().dimensions();
        let intrinsics = if (intrinsics.width, intrinsics.height) == (width, height) {
            intrinsics
        } else {
            intrinsics.scaled_to(width, height)
        };

        let params = self.feature_params();
        let features = SizedFeature::detect(&grayscale(pair.color.image()), &params);
        if features.len() < self.config.min_correspondences {
            return Err(PoseError::InsufficientFeatures {
                found: features.len(),
                required: self.config.min_correspondences,
            });
        }
        let points: Vec<_> = features.iter().map(|f| self.lift(pair, &intrinsics, f)).collect();

        let Some(reference) = &self.reference else {
            // first frame anchors the world frame
            log::debug!("odometry anchored with {} features", features.len());
            let pose = Pose::identity();
            self.reference = Some(Reference { features, points, pose });
            return Ok(pose);
        };

        let pairs: Vec<PointPair> = match_features(&features, &reference.features, &params)
            .into_iter()
            .filter_map(|(current, previous)| Some((reference.points[previous]?, points[current]?)))
            .collect();

        if pairs.len() < self.config.min_correspondences {
            return Err(PoseError::InsufficientCorrespondences {
                found: pairs.len(),
                required: self.config.min_correspondences,
            });
        }

        // ARRSAC (Adaptive Real-Time Random Sample Consensus) over minimal 3-point samples
        let rng = StdRng::seed_from_u64(self.config.seed);
        let (_, inliers) = Arrsac::new(self.config.inlier_threshold, rng)
            .model_inliers(&RigidTransformEstimator, pairs.iter())
            .ok_or(PoseError::NoConsensus)?;

        if inliers.len() < self.config.min_correspondences {
            return Err(PoseError::NoConsensus);
        }

        // refine on every inlier
        let motion = RigidTransform::from_pairs(inliers.iter().map(|&i| &pairs[i]))
            .ok_or(PoseError::NoConsensus)?;
        let pose = reference.pose * motion.0;

        log::trace!(
            "odometry: {} correspondences, {} inliers, t = {:?}",
            pairs.len(),
            inliers.len(),
            pose.translation.vector
        );

        self.reference = Some(Reference { features, points, pose });
        Ok(pose)
    }

    fn reset(&mut self) {
        self.reference = None;
    }

    fn release(&mut self) {
        self.reference = None;
        self.initialized = false;
    }
}
