//! Real-time sensor fusion: frame pairing, tracker/mapper lifecycle and the capture worker

pub mod mapper;
pub mod mesh;
pub mod odometry;
pub mod pipeline;
pub mod scheduler;
pub mod session;
pub mod tracker;

pub use mapper::{MapperConfig, VoxelMapper};
pub use mesh::{Mesh, Vertex};
pub use odometry::{OdometryConfig, RgbdOdometry};
pub use pipeline::{FramePipeline, PipelineConfig, PipelineStatsSnapshot};
pub use scheduler::{FrameScheduler, SchedulerConfig, SchedulerStats};
pub use session::{FrameOutcome, SessionConfig, SlamSession};
pub use tracker::{Mapper, Pose, PoseTracker, TrackerState};
