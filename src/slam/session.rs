//! Lifecycle of the tracker and mapper behind a capture session.
//!
//! ```plain
//!  Uninitialized --setup--> Ready --pair ok--> Tracking
//!        ^                    ^                  |  ^
//!        |                    |     N failures   v  | relocalized
//!      clear            reset(keep_mesh)  <----- Lost
//! ```
//!
//! Every operation takes the session lock, so `process_frame_pair`, `reset` and `clear`
//! never interleave: a reset or clear requested while a pair is being fused waits for
//! that pair to finish. The current state is mirrored into an atomic so it can be read
//! without waiting on the lock.

use std::sync::atomic::{AtomicU8, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::{
    algorithms::camera::CameraIntrinsics,
    error::{PoseError, SlamError},
    sensors::FramePair,
    slam::{
        mesh::Mesh,
        tracker::{Mapper, Pose, PoseTracker, TrackerState},
    },
};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Nominal calibration of the sensor. Setup fails without it.
    pub intrinsics: Option<CameraIntrinsics>,

    /// Consecutive pose failures tolerated before the session is `Lost`.
    /// Default: 3
    pub failure_threshold: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            intrinsics: None,
            failure_threshold: 3,
        }
    }
}

/// What happened to a frame pair handed to [`SlamSession::process_frame_pair`]
#[derive(Clone, Debug, PartialEq)]
pub enum FrameOutcome {
    /// Pose estimated and the pair integrated into the mesh
    Tracked(Pose),
    /// Pose estimation failed; still below the failure threshold
    PoseFailed { consecutive: u32, error: PoseError },
    /// This failure reached the threshold; the session is now `Lost`
    Lost(PoseError),
    /// Tracking was reacquired from `Lost`; the pair itself was not integrated
    Relocalized(Pose),
}

struct SessionInner<T, M> {
    tracker: T,
    mapper: M,
    state: TrackerState,
    consecutive_failures: u32,
    pose: Option<Pose>,
    /// Set by a failed setup; only `clear()` lifts it
    poisoned: bool,
}

/// SLAM session controller owning a [`PoseTracker`] and a [`Mapper`]
pub struct SlamSession<T, M> {
    config: SessionConfig,
    inner: Mutex<SessionInner<T, M>>,
    state: AtomicU8,
}

impl<T: PoseTracker, M: Mapper> SlamSession<T, M> {
    pub fn new(config: SessionConfig, tracker: T, mapper: M) -> Self {
        Self {
            config,
            inner: Mutex::new(SessionInner {
                tracker,
                mapper,
                state: TrackerState::Uninitialized,
                consecutive_failures: 0,
                pose: None,
                poisoned: false,
            }),
            state: AtomicU8::new(TrackerState::Uninitialized as u8),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Current state, without waiting for an in-flight operation
    pub fn state(&self) -> TrackerState {
        TrackerState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn transition(&self, inner: &mut SessionInner<T, M>, next: TrackerState) {
        if inner.state != next {
            log::info!("SLAM session: {:?} -> {:?}", inner.state, next);
        }
        inner.state = next;
        self.state.store(next as u8, Ordering::Release);
    }

    /// Allocate tracker and mapper resources: `Uninitialized | Resetting -> Ready`.
    ///
    /// Calling it on a session that is already set up does nothing.
    pub fn setup(&self) -> Result<(), SlamError> {
        let mut inner = self.inner.lock();

        match inner.state {
            TrackerState::Uninitialized | TrackerState::Resetting => {}
            state => {
                log::debug!("setup ignored, session already {:?}", state);
                return Ok(());
            }
        }

        if inner.poisoned {
            return Err(SlamError::Initialization(
                "previous setup failed, clear() the session first".into(),
            ));
        }

        let result = self.allocate(&mut inner);
        match &result {
            Ok(()) => self.transition(&mut inner, TrackerState::Ready),
            Err(e) => {
                log::warn!("SLAM setup failed: {}", e);
                inner.poisoned = true;
                inner.tracker.release();
                inner.mapper.release();
                self.transition(&mut inner, TrackerState::Uninitialized);
            }
        }
        result
    }

    fn allocate(&self, inner: &mut SessionInner<T, M>) -> Result<(), SlamError> {
        let intrinsics = self
            .config
            .intrinsics
            .ok_or_else(|| SlamError::Initialization("camera intrinsics unavailable".into()))?;

        inner
            .tracker
            .initialize(&intrinsics)
            .map_err(|e| SlamError::Initialization(format!("tracker: {e}")))?;
        inner
            .mapper
            .initialize(&intrinsics)
            .map_err(|e| SlamError::Initialization(format!("mapper: {e}")))?;

        inner.consecutive_failures = 0;
        inner.pose = None;
        Ok(())
    }

    /// Track a fused pair and integrate it into the mesh.
    ///
    /// Pose failures are reported through [`FrameOutcome`] rather than as errors, so the
    /// capture loop keeps running. Only calls made while `Lost` that fail to relocalize
    /// return [`SlamError::TrackingLost`].
    pub fn process_frame_pair(&self, pair: &FramePair) -> Result<FrameOutcome, SlamError> {
        let mut inner = self.inner.lock();
        let inner = &mut *inner;

        match inner.state {
            TrackerState::Ready | TrackerState::Tracking => {}
            TrackerState::Lost => {
                // relocalization attempt only, the mesh is left untouched
                return match inner.tracker.track(pair) {
                    Ok(pose) => {
                        inner.consecutive_failures = 0;
                        inner.pose = Some(pose);
                        self.transition(inner, TrackerState::Tracking);
                        Ok(FrameOutcome::Relocalized(pose))
                    }
                    Err(e) => {
                        log::trace!("still lost: {}", e);
                        Err(SlamError::TrackingLost)
                    }
                };
            }
            state => return Err(SlamError::NotReady(state)),
        }

        match inner.tracker.track(pair) {
            Ok(pose) => {
                inner.consecutive_failures = 0;
                inner.pose = Some(pose);
                inner.mapper.integrate(&pose, pair);
                self.transition(inner, TrackerState::Tracking);
                Ok(FrameOutcome::Tracked(pose))
            }
            Err(error) => {
                inner.consecutive_failures += 1;
                log::debug!(
                    "pose estimation failed ({}/{}): {}",
                    inner.consecutive_failures,
                    self.config.failure_threshold,
                    error
                );
                if inner.consecutive_failures >= self.config.failure_threshold {
                    self.transition(inner, TrackerState::Lost);
                    Ok(FrameOutcome::Lost(error))
                } else {
                    Ok(FrameOutcome::PoseFailed {
                        consecutive: inner.consecutive_failures,
                        error,
                    })
                }
            }
        }
    }

    /// Restart tracking. Pose history is always dropped, the mesh only when `keep_mesh` is false.
    ///
    /// Ends in `Ready`, or stays `Uninitialized` on a session that was never set up.
    pub fn reset(&self, keep_mesh: bool) {
        let mut inner = self.inner.lock();
        let inner = &mut *inner;

        if inner.state == TrackerState::Uninitialized {
            inner.tracker.reset();
            if !keep_mesh {
                inner.mapper.clear_mesh();
            }
            return;
        }

        self.transition(inner, TrackerState::Resetting);
        inner.tracker.reset();
        inner.consecutive_failures = 0;
        inner.pose = None;
        if !keep_mesh {
            inner.mapper.clear_mesh();
        }
        log::debug!("SLAM reset (keep_mesh = {})", keep_mesh);
        self.transition(inner, TrackerState::Ready);
    }

    /// Release tracker, mapper and mesh. Idempotent.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        let inner = &mut *inner;

        inner.tracker.release();
        inner.mapper.release();
        inner.consecutive_failures = 0;
        inner.pose = None;
        inner.poisoned = false;
        self.transition(inner, TrackerState::Uninitialized);
    }

    /// Consistent copy of the reconstruction, taken between integrations
    pub fn mesh_snapshot(&self) -> Mesh {
        self.inner.lock().mapper.mesh().clone()
    }

    /// Most recent world-from-camera pose, cleared by reset and clear
    pub fn pose(&self) -> Option<Pose> {
        self.inner.lock().pose
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.inner.lock().consecutive_failures
    }
}
