//! Frame types delivered by the depth and color streams of the sensor

pub mod frame;

pub use frame::{ColorFrame, DepthFrame, DepthImage, FramePair, INVALID_DEPTH};
