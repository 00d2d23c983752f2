//! Timestamp pairing of depth and color frames.
//!
//! The scheduler keeps one small queue per stream. A new frame is matched against the
//! closest frame of the opposite stream within `max_skew`; unmatched frames wait until
//! they are either matched, pushed out by newer frames (drop-oldest) or fall behind the
//! retention window. Submission never blocks.
//!
//! A frame that arrives further behind the newest timestamp than the retention window
//! restarts pairing: the sensor clock was reset, or an earlier frame carried a bogus
//! timestamp. Buffered frames are dropped and the window re-anchors on the new frame.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::sensors::{ColorFrame, DepthFrame, FramePair};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Largest accepted |depth - color| timestamp difference (seconds).
    /// Default: 0.016 (half a frame at 30 Hz)
    pub max_skew: f64,

    /// Frames buffered per stream before the oldest is dropped.
    /// Default: 8
    pub capacity: usize,

    /// Unmatched frames older than this, relative to the newest frame seen, are purged (seconds).
    /// Default: 0.5
    pub retention: f64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_skew: 0.016,
            capacity: 8,
            retention: 0.5,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub paired: u64,
    pub dropped_overflow: u64,
    pub dropped_stale: u64,
}

pub struct FrameScheduler {
    config: SchedulerConfig,
    depth_queue: VecDeque<DepthFrame>,
    color_queue: VecDeque<ColorFrame>,
    /// Pairs produced but not yet handed out
    ready: VecDeque<FramePair>,
    newest_timestamp: f64,
    stats: SchedulerStats,
}

/// Index of the queued frame closest in time to `timestamp`, if within `max_skew`
fn closest<T>(
    queue: &VecDeque<T>,
    timestamp: f64,
    max_skew: f64,
    time_of: impl Fn(&T) -> f64,
) -> Option<usize> {
    queue
        .iter()
        .enumerate()
        .map(|(i, frame)| (i, (time_of(frame) - timestamp).abs()))
        .filter(|&(_, skew)| skew <= max_skew)
        .min_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(i, _)| i)
}

impl FrameScheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            depth_queue: VecDeque::with_capacity(config.capacity + 1),
            color_queue: VecDeque::with_capacity(config.capacity + 1),
            ready: VecDeque::new(),
            newest_timestamp: f64::NEG_INFINITY,
            stats: SchedulerStats::default(),
            config,
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn stats(&self) -> SchedulerStats {
        self.stats
    }

    /// Frames currently waiting for a partner: `(depth, color)`
    pub fn pending(&self) -> (usize, usize) {
        (self.depth_queue.len(), self.color_queue.len())
    }

    /// Offer a depth frame, a color frame or both. Returns a matched pair when one is available.
    ///
    /// A call that completes two pairs hands out the first and keeps the second for the
    /// next call (or [`FrameScheduler::take_ready`]).
    pub fn submit(
        &mut self,
        depth: Option<DepthFrame>,
        color: Option<ColorFrame>,
    ) -> Option<FramePair> {
        let latest = depth
            .iter()
            .map(|d| d.timestamp)
            .chain(color.iter().map(|c| c.timestamp))
            .fold(f64::NEG_INFINITY, f64::max);
        if latest < self.newest_timestamp - self.config.retention {
            self.restart(latest);
        } else {
            self.newest_timestamp = self.newest_timestamp.max(latest);
        }
        self.purge_stale();

        match (depth, color) {
            (Some(depth), Some(color)) => {
                if (depth.timestamp - color.timestamp).abs() <= self.config.max_skew {
                    self.emit(FramePair { depth, color });
                } else {
                    self.offer_depth(depth);
                    self.offer_color(color);
                }
            }
            (Some(depth), None) => self.offer_depth(depth),
            (None, Some(color)) => self.offer_color(color),
            (None, None) => {}
        }

        self.ready.pop_front()
    }

    pub fn submit_depth(&mut self, depth: DepthFrame) -> Option<FramePair> {
        self.submit(Some(depth), None)
    }

    pub fn submit_color(&mut self, color: ColorFrame) -> Option<FramePair> {
        self.submit(None, Some(color))
    }

    /// Hand out a pair completed by an earlier call, if any
    pub fn take_ready(&mut self) -> Option<FramePair> {
        self.ready.pop_front()
    }

    /// Drop every buffered frame and pending pair
    pub fn clear(&mut self) {
        self.depth_queue.clear();
        self.color_queue.clear();
        self.ready.clear();
        self.newest_timestamp = f64::NEG_INFINITY;
    }

    fn offer_depth(&mut self, depth: DepthFrame) {
        match closest(&self.color_queue, depth.timestamp, self.config.max_skew, |c| c.timestamp) {
            Some(index) => {
                if let Some(color) = self.color_queue.remove(index) {
                    self.emit(FramePair { depth, color });
                }
            }
            None => {
                self.depth_queue.push_back(depth);
                if self.depth_queue.len() > self.config.capacity {
                    self.depth_queue.pop_front();
                    self.stats.dropped_overflow += 1;
                    log::trace!("depth queue full, dropped oldest frame");
                }
            }
        }
    }

    fn offer_color(&mut self, color: ColorFrame) {
        match closest(&self.depth_queue, color.timestamp, self.config.max_skew, |d| d.timestamp) {
            Some(index) => {
                if let Some(depth) = self.depth_queue.remove(index) {
                    self.emit(FramePair { depth, color });
                }
            }
            None => {
                self.color_queue.push_back(color);
                if self.color_queue.len() > self.config.capacity {
                    self.color_queue.pop_front();
                    self.stats.dropped_overflow += 1;
                    log::trace!("color queue full, dropped oldest frame");
                }
            }
        }
    }

    fn restart(&mut self, timestamp: f64) {
        let dropped = self.depth_queue.len() + self.color_queue.len();
        log::warn!(
            "frame timestamp jumped back from {:.3}s to {:.3}s, restarting pairing",
            self.newest_timestamp,
            timestamp
        );
        self.depth_queue.clear();
        self.color_queue.clear();
        self.stats.dropped_stale += dropped as u64;
        self.newest_timestamp = timestamp;
    }

    fn emit(&mut self, pair: FramePair) {
        self.stats.paired += 1;
        self.ready.push_back(pair);
    }

    fn purge_stale(&mut self) {
        let horizon = self.newest_timestamp - self.config.retention;
        let before = self.depth_queue.len() + self.color_queue.len();
        self.depth_queue.retain(|d| d.timestamp >= horizon);
        self.color_queue.retain(|c| c.timestamp >= horizon);
        let purged = before - (self.depth_queue.len() + self.color_queue.len());
        if purged > 0 {
            self.stats.dropped_stale += purged as u64;
            log::trace!("purged {} stale frames", purged);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensors::DepthImage;
    use image::{Luma, RgbImage};

    fn depth(timestamp: f64) -> DepthFrame {
        DepthFrame::new(timestamp, DepthImage::from_pixel(2, 2, Luma([1.0])), None)
    }

    fn color(timestamp: f64) -> ColorFrame {
        ColorFrame::new(timestamp, RgbImage::new(2, 2), None)
    }

    fn scheduler() -> FrameScheduler {
        FrameScheduler::new(SchedulerConfig {
            max_skew: 0.01,
            capacity: 4,
            retention: 1.0,
        })
    }

    #[test]
    fn pairs_closest_frame_within_skew() {
        let mut scheduler = scheduler();
        assert!(scheduler.submit_color(color(1.000)).is_none());
        assert!(scheduler.submit_color(color(1.008)).is_none());
        let pair = scheduler.submit_depth(depth(1.007)).unwrap();
        assert_eq!(pair.color.timestamp, 1.008);
        assert_eq!(scheduler.pending(), (0, 1));
    }

    #[test]
    fn frames_outside_skew_are_buffered() {
        let mut scheduler = scheduler();
        assert!(scheduler.submit_depth(depth(1.0)).is_none());
        assert!(scheduler.submit_color(color(1.05)).is_none());
        assert_eq!(scheduler.pending(), (1, 1));
    }

    #[test]
    fn simultaneous_submission_pairs_directly() {
        let mut scheduler = scheduler();
        let pair = scheduler.submit(Some(depth(2.0)), Some(color(2.005))).unwrap();
        assert!(pair.skew() <= 0.01);
        assert_eq!(scheduler.pending(), (0, 0));
    }

    #[test]
    fn second_pair_is_held_for_next_call() {
        let mut scheduler = scheduler();
        scheduler.submit_color(color(1.0));
        scheduler.submit_depth(depth(2.0));
        // depth 1.0 matches color 1.0, color 2.0 matches depth 2.0
        let first = scheduler.submit(Some(depth(1.0)), Some(color(2.0))).unwrap();
        let second = scheduler.take_ready().unwrap();
        assert_eq!(first.depth.timestamp, 1.0);
        assert_eq!(second.color.timestamp, 2.0);
        assert!(scheduler.take_ready().is_none());
    }

    #[test]
    fn overflow_drops_oldest() {
        let mut scheduler = scheduler();
        for i in 0..6 {
            scheduler.submit_depth(depth(i as f64 * 0.1));
        }
        assert_eq!(scheduler.pending(), (4, 0));
        assert_eq!(scheduler.stats().dropped_overflow, 2);
        // the two oldest are gone
        assert!(scheduler.submit_color(color(0.0)).is_none());
        assert!(scheduler.submit_color(color(0.2)).is_some());
    }

    #[test]
    fn stale_frames_are_purged() {
        let mut scheduler = scheduler();
        scheduler.submit_depth(depth(0.0));
        scheduler.submit_color(color(5.0));
        assert_eq!(scheduler.pending(), (0, 1));
        assert_eq!(scheduler.stats().dropped_stale, 1);
    }

    #[test]
    fn clock_restart_resumes_pairing() {
        let mut scheduler = scheduler();
        // one frame far in the future, then a normal stream starting from zero
        assert!(scheduler.submit_depth(depth(1000.0)).is_none());

        let mut pairs = 0;
        for i in 0..30 {
            let t = i as f64 / 30.0;
            scheduler.submit_depth(depth(t));
            pairs += scheduler.submit_color(color(t + 0.002)).into_iter().count();
        }

        assert_eq!(pairs, 30);
        assert_eq!(scheduler.stats().paired, 30);
        assert_eq!(scheduler.stats().dropped_stale, 1);
        assert_eq!(scheduler.pending(), (0, 0));
    }

    #[test]
    fn small_reordering_is_not_a_restart() {
        let mut scheduler = scheduler();
        scheduler.submit_color(color(2.0));
        scheduler.submit_depth(depth(2.5));
        // behind the newest frame, but inside the retention window
        let pair = scheduler.submit_depth(depth(2.005)).unwrap();
        assert_eq!(pair.color.timestamp, 2.0);
        assert_eq!(scheduler.pending(), (1, 0));
        assert_eq!(scheduler.stats().dropped_stale, 0);
    }

    #[test]
    fn every_frame_is_paired_at_most_once() {
        let mut scheduler = FrameScheduler::new(SchedulerConfig {
            max_skew: 0.004,
            capacity: 8,
            retention: 1.0,
        });
        let mut pairs = Vec::new();
        // interleaved streams at 30 Hz with a small jitter on the color side
        for i in 0..50 {
            let t = i as f64 / 30.0;
            let jitter = if i % 3 == 0 { 0.003 } else { -0.002 };
            if i % 2 == 0 {
                pairs.extend(scheduler.submit_depth(depth(t)));
                pairs.extend(scheduler.submit_color(color(t + jitter)));
            } else {
                pairs.extend(scheduler.submit_color(color(t + jitter)));
                pairs.extend(scheduler.submit_depth(depth(t)));
            }
        }
        pairs.extend(std::iter::from_fn(|| scheduler.take_ready()));

        assert_eq!(pairs.len(), 50);
        for (i, pair) in pairs.iter().enumerate() {
            assert!(pair.skew() <= 0.004);
            for other in &pairs[i + 1..] {
                assert!(!pair.depth.shares_pixels_with(&other.depth));
                assert!(!pair.color.shares_pixels_with(&other.color));
            }
        }
    }
}
