//! Collection of general or specific algorithms shared by the odometry
//! and the image registration code

pub mod brief;
pub mod camera;
pub mod features;
pub mod homography;
pub mod rigid;
