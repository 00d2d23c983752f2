//! Capture-side entry point of the SLAM pipeline.
//!
//! Capture callbacks only enqueue frames into a bounded channel and return. A single
//! worker thread pairs frames with the [`FrameScheduler`] and feeds each pair to the
//! [`SlamSession`]. When the channel is full the oldest queued frame is evicted, so the
//! sensor driver never stalls on a slow tracker.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender, TrySendError};
use serde::{Deserialize, Serialize};

use crate::{
    error::SlamError,
    sensors::{ColorFrame, DepthFrame},
    slam::{
        scheduler::FrameScheduler,
        session::{FrameOutcome, SlamSession},
        tracker::{Mapper, PoseTracker},
        SchedulerConfig,
    },
};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Capture events queued ahead of the worker before the oldest is evicted.
    /// Default: 16
    pub queue_capacity: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self { queue_capacity: 16 }
    }
}

enum CaptureEvent {
    Depth(DepthFrame),
    Color(ColorFrame),
}

/// Counters updated by the capture callbacks and the worker
#[derive(Debug, Default)]
pub struct PipelineStats {
    pub frames_received: AtomicU64,
    pub frames_dropped: AtomicU64,
    pub pairs_processed: AtomicU64,
    pub pose_failures: AtomicU64,
    pub tracking_lost: AtomicU64,
}

impl PipelineStats {
    pub fn snapshot(&self) -> PipelineStatsSnapshot {
        PipelineStatsSnapshot {
            frames_received: self.frames_received.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            pairs_processed: self.pairs_processed.load(Ordering::Relaxed),
            pose_failures: self.pose_failures.load(Ordering::Relaxed),
            tracking_lost: self.tracking_lost.load(Ordering::Relaxed),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PipelineStatsSnapshot {
    pub frames_received: u64,
    pub frames_dropped: u64,
    pub pairs_processed: u64,
    pub pose_failures: u64,
    pub tracking_lost: u64,
}

/// Worker thread hosting the frame scheduler and driving a [`SlamSession`]
pub struct FramePipeline<T, M> {
    session: Arc<SlamSession<T, M>>,
    stats: Arc<PipelineStats>,
    tx: Option<Sender<CaptureEvent>>,
    /// Used by the capture side to evict the oldest event when the queue is full
    rx: Receiver<CaptureEvent>,
    handle: Option<JoinHandle<()>>,
}

impl<T, M> FramePipeline<T, M>
where
    T: PoseTracker + 'static,
    M: Mapper + 'static,
{
    /// Spawn the worker. Fails only if the OS refuses to create the thread.
    pub fn spawn(
        config: PipelineConfig,
        scheduler_config: SchedulerConfig,
        session: Arc<SlamSession<T, M>>,
    ) -> std::io::Result<Self> {
        let (tx, rx) = crossbeam_channel::bounded(config.queue_capacity.max(1));
        let stats = Arc::new(PipelineStats::default());

        let handle = {
            let rx = rx.clone();
            let session = session.clone();
            let stats = stats.clone();
            thread::Builder::new()
                .name("slam-worker".into())
                .spawn(move || {
                    run_worker(rx, FrameScheduler::new(scheduler_config), session, stats)
                })?
        };

        Ok(Self {
            session,
            stats,
            tx: Some(tx),
            rx,
            handle: Some(handle),
        })
    }

    /// Capture callback for the depth stream. Never blocks.
    pub fn on_depth_frame(&self, frame: DepthFrame) {
        self.enqueue(CaptureEvent::Depth(frame));
    }

    /// Capture callback for the color stream. Never blocks.
    pub fn on_color_frame(&self, frame: ColorFrame) {
        self.enqueue(CaptureEvent::Color(frame));
    }

    fn enqueue(&self, event: CaptureEvent) {
        let Some(tx) = &self.tx else {
            return;
        };
        self.stats.frames_received.fetch_add(1, Ordering::Relaxed);

        let mut event = event;
        loop {
            match tx.try_send(event) {
                Ok(()) => return,
                Err(TrySendError::Full(rejected)) => {
                    // drop-oldest: make room and retry with the new frame
                    if self.rx.try_recv().is_ok() {
                        self.stats.frames_dropped.fetch_add(1, Ordering::Relaxed);
                        log::trace!("capture queue full, dropped oldest frame");
                    }
                    event = rejected;
                }
                Err(TrySendError::Disconnected(_)) => {
                    log::warn!("frame pipeline worker is gone, frame discarded");
                    return;
                }
            }
        }
    }

    pub fn session(&self) -> &Arc<SlamSession<T, M>> {
        &self.session
    }

    pub fn stats(&self) -> PipelineStatsSnapshot {
        self.stats.snapshot()
    }

    /// Stop accepting frames, let the worker drain the queue and join it
    pub fn shutdown(self) {
        drop(self);
    }
}

impl<T, M> FramePipeline<T, M> {
    fn stop(&mut self) {
        // closing the sender ends the worker loop once the queue is empty
        self.tx.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::warn!("frame pipeline worker panicked");
            }
        }
    }
}

impl<T, M> Drop for FramePipeline<T, M> {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_worker<T: PoseTracker, M: Mapper>(
    rx: Receiver<CaptureEvent>,
    mut scheduler: FrameScheduler,
    session: Arc<SlamSession<T, M>>,
    stats: Arc<PipelineStats>,
) {
    log::info!("frame pipeline worker started");

    // `iter` ends once every sender is dropped and the queue is drained
    for event in rx.iter() {
        let mut next = match event {
            CaptureEvent::Depth(depth) => scheduler.submit_depth(depth),
            CaptureEvent::Color(color) => scheduler.submit_color(color),
        };

        while let Some(pair) = next {
            stats.pairs_processed.fetch_add(1, Ordering::Relaxed);
            match session.process_frame_pair(&pair) {
                Ok(FrameOutcome::Tracked(_)) | Ok(FrameOutcome::Relocalized(_)) => {}
                Ok(FrameOutcome::PoseFailed { .. }) => {
                    stats.pose_failures.fetch_add(1, Ordering::Relaxed);
                }
                Ok(FrameOutcome::Lost(error)) => {
                    stats.pose_failures.fetch_add(1, Ordering::Relaxed);
                    stats.tracking_lost.fetch_add(1, Ordering::Relaxed);
                    log::warn!("tracking lost at t={:.3}: {}", pair.timestamp(), error);
                }
                Err(SlamError::TrackingLost) => {
                    stats.pose_failures.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => log::debug!("pair at t={:.3} not processed: {}", pair.timestamp(), e),
            }
            next = scheduler.take_ready();
        }
    }

    let scheduler_stats = scheduler.stats();
    log::info!(
        "frame pipeline worker stopped ({} pairs, {} overflow drops, {} stale drops)",
        scheduler_stats.paired,
        scheduler_stats.dropped_overflow,
        scheduler_stats.dropped_stale
    );
}
