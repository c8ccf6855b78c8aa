//! Video playback statistics tracking

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Tracks decode/presentation statistics
pub struct VideoStats {
    /// Frames handed to the compositor
    pub(super) frames_presented: u64,

    /// Frames overwritten before the compositor consumed them
    pub(super) frames_dropped: Arc<AtomicU64>,

    /// Frame rate from the negotiated caps
    pub(super) detected_fps: Option<f64>,

    last_stats_log: Instant,
}

impl VideoStats {
    pub fn new() -> Self {
        Self {
            frames_presented: 0,
            frames_dropped: Arc::new(AtomicU64::new(0)),
            detected_fps: None,
            last_stats_log: Instant::now(),
        }
    }

    /// Clone of the dropped-frame counter for the appsink callbacks
    pub fn frames_dropped_handle(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.frames_dropped)
    }

    pub fn increment_presented(&mut self) {
        self.frames_presented += 1;
    }

    pub fn record_fps(&mut self, fps: Option<f64>) {
        if self.detected_fps.is_none()
            && let Some(fps) = fps
        {
            log::info!("Detected video FPS: {:.2}", fps);
            self.detected_fps = Some(fps);
        }
    }

    /// Current drop rate as percentage
    pub fn drop_rate(&self) -> f64 {
        let dropped = self.frames_dropped.load(Ordering::Relaxed);
        let total = self.frames_presented + dropped;
        if total == 0 {
            0.0
        } else {
            (dropped as f64 / total as f64) * 100.0
        }
    }

    /// Log statistics if `interval` has elapsed since the last report
    pub fn maybe_log_stats(&mut self, interval: Duration) {
        if self.last_stats_log.elapsed() < interval {
            return;
        }

        let dropped = self.frames_dropped.load(Ordering::Relaxed);
        log::info!(
            "Video stats ({:.2} fps): {} presented, {} dropped of {} total ({:.1}% drop rate)",
            self.detected_fps.unwrap_or(0.0),
            self.frames_presented,
            dropped,
            self.frames_presented + dropped,
            self.drop_rate()
        );

        self.last_stats_log = Instant::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drop_rate() {
        let mut stats = VideoStats::new();
        assert_eq!(stats.drop_rate(), 0.0);

        for _ in 0..3 {
            stats.increment_presented();
        }
        stats.frames_dropped_handle().fetch_add(1, Ordering::Relaxed);
        assert_eq!(stats.drop_rate(), 25.0);
    }

    #[test]
    fn test_first_detected_fps_sticks() {
        let mut stats = VideoStats::new();
        stats.record_fps(None);
        stats.record_fps(Some(24.0));
        stats.record_fps(Some(60.0));
        assert_eq!(stats.detected_fps, Some(24.0));
    }
}
