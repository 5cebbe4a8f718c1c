//! Clock and timing utilities for export loops.
//!
//! The live capture loop is keyed to wall-clock time measured from the
//! moment capture starts. This module provides:
//! - The capture clock itself
//! - A frame pacer that never draws faster than the target rate
//! - Timing drift checks between requested and achieved output

use std::time::{Duration, Instant};

/// Monotonic clock anchored to the start of a capture.
#[derive(Debug, Clone, Copy)]
pub struct CaptureClock {
    epoch: Instant,
}

impl CaptureClock {
    /// Create a new clock anchored to now.
    pub fn start() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }

    /// Create a clock from a known epoch.
    pub fn from_epoch(epoch: Instant) -> Self {
        Self { epoch }
    }

    /// Time elapsed at `now`, saturating at zero for instants before the epoch.
    pub fn elapsed_at(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.epoch)
    }

    /// Seconds elapsed since capture start.
    pub fn elapsed_secs(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64()
    }

    /// The underlying epoch instant.
    pub fn epoch(&self) -> Instant {
        self.epoch
    }
}

/// Frame pacing for redraws driven by a faster animation clock.
///
/// A frame is due once at least one frame interval has elapsed since the
/// last draw. Late ticks are not compensated, so under load frames are
/// dropped rather than drawn in bursts.
#[derive(Debug)]
pub struct FramePacer {
    interval: Duration,
    last_draw: Option<Duration>,
    frames_drawn: u64,
}

impl FramePacer {
    /// Create a pacer targeting the given frame rate.
    pub fn new(fps: f64) -> Self {
        let fps = if fps.is_finite() && fps > 0.0 { fps } else { 1.0 };
        Self {
            interval: Duration::try_from_secs_f64(1.0 / fps).unwrap_or(Duration::MAX),
            last_draw: None,
            frames_drawn: 0,
        }
    }

    /// Check whether a frame is due at `elapsed` and record the draw if so.
    /// The first call always returns true.
    pub fn should_draw(&mut self, elapsed: Duration) -> bool {
        let due = match self.last_draw {
            None => true,
            Some(last) => elapsed >= last.saturating_add(self.interval),
        };
        if due {
            self.last_draw = Some(elapsed);
            self.frames_drawn += 1;
        }
        due
    }

    /// Target interval between frames.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Frames drawn so far.
    pub fn frames_drawn(&self) -> u64 {
        self.frames_drawn
    }
}

/// Comparison between the requested and the achieved output timing.
#[derive(Debug, Clone, Copy)]
pub struct TimingDrift {
    pub requested_fps: f64,
    pub achieved_fps: f64,
    pub requested_duration_secs: f64,
    pub achieved_duration_secs: f64,
}

impl TimingDrift {
    pub fn fps_delta(&self) -> f64 {
        self.achieved_fps - self.requested_fps
    }

    pub fn duration_delta_secs(&self) -> f64 {
        self.achieved_duration_secs - self.requested_duration_secs
    }

    /// Whether either axis drifted beyond its tolerance.
    pub fn exceeds(&self, fps_tolerance: f64, duration_tolerance_secs: f64) -> bool {
        self.fps_delta().abs() > fps_tolerance
            || self.duration_delta_secs().abs() > duration_tolerance_secs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_elapsed() {
        let clock = CaptureClock::start();
        assert!(clock.elapsed_secs() < 1.0);
        let before = clock.epoch() - Duration::from_millis(5);
        assert_eq!(clock.elapsed_at(before), Duration::ZERO);
    }

    #[test]
    fn test_frame_pacer() {
        let mut pacer = FramePacer::new(60.0);
        assert!(pacer.should_draw(Duration::ZERO)); // first frame always draws
        assert!(!pacer.should_draw(Duration::from_millis(1)));
        assert!(pacer.should_draw(Duration::from_millis(17)));
        assert_eq!(pacer.frames_drawn(), 2);
    }

    #[test]
    fn test_frame_pacer_drops_instead_of_bursting() {
        let mut pacer = FramePacer::new(10.0);
        assert!(pacer.should_draw(Duration::ZERO));
        // A stall of 350ms yields one frame, not three catch-up frames.
        assert!(pacer.should_draw(Duration::from_millis(350)));
        assert!(!pacer.should_draw(Duration::from_millis(360)));
        assert!(pacer.should_draw(Duration::from_millis(450)));
    }

    #[test]
    fn test_frame_pacer_rejects_invalid_rate() {
        let pacer = FramePacer::new(0.0);
        assert_eq!(pacer.interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_frame_pacer_with_vanishing_rate() {
        let mut pacer = FramePacer::new(1e-300);
        assert_eq!(pacer.interval(), Duration::MAX);
        assert!(pacer.should_draw(Duration::from_secs(1)));
        assert!(!pacer.should_draw(Duration::from_secs(3600)));
        assert_eq!(pacer.frames_drawn(), 1);
    }

    #[test]
    fn test_timing_drift() {
        let drift = TimingDrift {
            requested_fps: 30.0,
            achieved_fps: 29.97,
            requested_duration_secs: 3.0,
            achieved_duration_secs: 3.6,
        };
        assert!((drift.duration_delta_secs() - 0.6).abs() < 1e-9);
        assert!(drift.exceeds(0.5, 0.25));
        assert!(!drift.exceeds(0.5, 1.0));
    }
}
