//! Room scanning and diminished reality.
//!
//! Two independent pipelines live here:
//!
//! * [`slam`]: depth and color frames from a capture callback are paired by timestamp and
//!   fused by a [`slam::SlamSession`] that owns a pose tracker and a volumetric mapper.
//! * [`diminish`]: two photographs of the same viewpoint, one with and one without an
//!   object, are registered, differenced and composited so the object disappears.

pub mod algorithms;
pub mod config;
pub mod diminish;
pub mod error;
pub mod interchange;
pub mod overlay;
pub mod sensors;
pub mod slam;

pub use config::Config;
pub use diminish::{Diminished, Diminisher};
pub use error::{
    AlignmentError, CompositeError, ConfigError, DetectionError, DiminishError, InterchangeError,
    MaskError, PoseError, SlamError,
};
