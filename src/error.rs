//! Error types for the capture and diminish pipelines

use thiserror::Error;

use crate::slam::TrackerState;

/// Errors surfaced by the SLAM session
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SlamError {
    /// Fatal to the session. Requires `clear()` followed by `setup()`.
    #[error("Initialization failed: {0}")]
    Initialization(String),

    /// Recoverable. The session stays in `Lost` until a pair relocalizes or it is reset.
    #[error("Tracking lost")]
    TrackingLost,

    #[error("Session not ready: {0:?}")]
    NotReady(TrackerState),
}

/// Per-frame pose estimation failures reported by a tracker
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PoseError {
    #[error("Frame carries no camera intrinsics")]
    MissingIntrinsics,

    #[error("Too few features: {found} (need {required})")]
    InsufficientFeatures { found: usize, required: usize },

    #[error("Too few correspondences with valid depth: {found} (need {required})")]
    InsufficientCorrespondences { found: usize, required: usize },

    #[error("No consistent motion found")]
    NoConsensus,

    #[error("Tracker not initialized")]
    NotInitialized,
}

/// Failures while registering two images
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AlignmentError {
    /// One of the images has too little texture to register at all
    #[error(
        "Too few keypoints: source {source_features}, target {target_features} (need {required})"
    )]
    Featureless {
        source_features: usize,
        target_features: usize,
        required: usize,
    },

    #[error("Too few feature matches: {found} (need {required})")]
    InsufficientFeatures { found: usize, required: usize },

    #[error("No homography reached consensus")]
    NoConsensus,

    #[error("Inlier ratio {ratio:.3} below {required:.3}")]
    LowInlierRatio { ratio: f64, required: f64 },

    #[error("Residual error {residual:.3}px exceeds {tolerance:.3}px")]
    ResidualTooLarge { residual: f64, tolerance: f64 },

    #[error("Estimated transform is not invertible")]
    Degenerate,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MaskError {
    #[error("Image dimensions differ: {source_dims:?} vs {target_dims:?}")]
    DimensionMismatch {
        source_dims: (u32, u32),
        target_dims: (u32, u32),
    },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CompositeError {
    #[error("Dimension mismatch: target {target:?}, source {source_dims:?}, mask {mask:?}")]
    DimensionMismatch {
        target: (u32, u32),
        source_dims: (u32, u32),
        mask: (u32, u32),
    },
}

#[derive(Error, Debug)]
pub enum DetectionError {
    #[error("Failed to read cascade model: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse cascade model: {0}")]
    Parse(String),

    #[error("Invalid cascade model: {0}")]
    InvalidModel(String),
}

/// Any failure of a single diminish call. No partial image accompanies it.
#[derive(Error, Debug)]
pub enum DiminishError {
    #[error(transparent)]
    Alignment(#[from] AlignmentError),

    #[error(transparent)]
    Mask(#[from] MaskError),

    #[error(transparent)]
    Detection(#[from] DetectionError),

    #[error(transparent)]
    Composite(#[from] CompositeError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum InterchangeError {
    #[error("Buffer too short: expected {expected}, got {actual}")]
    BufferTooShort { expected: usize, actual: usize },

    #[error("Row stride {stride} smaller than row width {row}")]
    InvalidStride { stride: usize, row: usize },
}
