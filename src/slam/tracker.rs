//! Capability interfaces for the tracking and mapping engines driven by [`SlamSession`].
//!
//! [`SlamSession`]: crate::slam::SlamSession

use nalgebra::Isometry3;

use crate::{
    algorithms::camera::CameraIntrinsics,
    error::PoseError,
    sensors::FramePair,
    slam::mesh::Mesh,
};

/// World-from-camera pose of the sensor
pub type Pose = Isometry3<f64>;

/// Tracking states
#[repr(u8)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum TrackerState {
    #[default]
    Uninitialized = 0,
    Ready = 1,
    Tracking = 2,
    Lost = 3,
    Resetting = 4,
}

impl TrackerState {
    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Ready,
            2 => Self::Tracking,
            3 => Self::Lost,
            4 => Self::Resetting,
            _ => Self::Uninitialized,
        }
    }
}

/// Estimates the sensor pose for each fused frame pair.
pub trait PoseTracker: Send {
    /// Acquire resources for a sensor with the given nominal calibration
    fn initialize(&mut self, intrinsics: &CameraIntrinsics) -> Result<(), String>;

    /// Estimate the pose at which `pair` was captured
    fn track(&mut self, pair: &FramePair) -> Result<Pose, PoseError>;

    /// Forget pose history; the next tracked pair becomes the new origin
    fn reset(&mut self);

    /// Drop every resource acquired by `initialize`
    fn release(&mut self);
}

/// Integrates posed frame pairs into a [`Mesh`].
pub trait Mapper: Send {
    fn initialize(&mut self, intrinsics: &CameraIntrinsics) -> Result<(), String>;

    fn integrate(&mut self, pose: &Pose, pair: &FramePair);

    fn mesh(&self) -> &Mesh;

    /// Discard the accumulated reconstruction, keeping allocated resources
    fn clear_mesh(&mut self);

    fn release(&mut self);
}

impl<T: PoseTracker + ?Sized> PoseTracker for Box<T> {
    fn initialize(&mut self, intrinsics: &CameraIntrinsics) -> Result<(), String> {
        (**self).initialize(intrinsics)
    }

    fn track(&mut self, pair: &FramePair) -> Result<Pose, PoseError> {
        (**self).track(pair)
    }

    fn reset(&mut self) {
        (**self).reset()
    }

    fn release(&mut self) {
        (**self).release()
    }
}

impl<T: Mapper + ?Sized> Mapper for Box<T> {
    fn initialize(&mut self, intrinsics: &CameraIntrinsics) -> Result<(), String> {
        (**self).initialize(intrinsics)
    }

    fn integrate(&mut self, pose: &Pose, pair: &FramePair) {
        (**self).integrate(pose, pair)
    }

    fn mesh(&self) -> &Mesh {
        (**self).mesh()
    }

    fn clear_mesh(&mut self) {
        (**self).clear_mesh()
    }

    fn release(&mut self) {
        (**self).release()
    }
}
