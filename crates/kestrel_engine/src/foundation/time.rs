//! Frame timing and pacing utilities

use std::time::{Duration, Instant};

/// Paces the frame loop against a fixed budget derived from a maximum FPS.
///
/// A frame that finishes under budget idles away the remainder and reports
/// the full budget as its duration; a frame that overruns reports its real
/// duration and is not delayed further.
pub struct FrameLimiter {
    budget: Duration,
}

impl FrameLimiter {
    /// Derive the per-frame budget from a maximum frames-per-second value.
    /// Millisecond resolution with integer division (60 fps → 16 ms).
    pub fn from_max_fps(max_fps: u32) -> Self {
        let fps = u64::from(max_fps.max(1));
        Self {
            budget: Duration::from_millis(1000 / fps),
        }
    }

    /// The minimum duration of one frame
    pub fn budget(&self) -> Duration {
        self.budget
    }

    /// Split a frame's measured work time into an optional idle wait and the
    /// duration the frame reports to the host.
    pub fn pace(&self, elapsed: Duration) -> (Option<Duration>, Duration) {
        if elapsed < self.budget {
            (Some(self.budget - elapsed), self.budget)
        } else {
            (None, elapsed)
        }
    }

    /// Sleep away the remainder of the budget for a frame started at
    /// `frame_start`, returning the reported frame duration.
    pub fn wait(&self, frame_start: Instant) -> Duration {
        let (idle, reported) = self.pace(frame_start.elapsed());
        if let Some(idle) = idle {
            std::thread::sleep(idle);
        }
        reported
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn budget_from_max_fps_uses_integer_milliseconds() {
        assert_eq!(
            FrameLimiter::from_max_fps(60).budget(),
            Duration::from_millis(16)
        );
        assert_eq!(
            FrameLimiter::from_max_fps(30).budget(),
            Duration::from_millis(33)
        );
    }

    #[test]
    fn fast_frame_waits_and_reports_the_budget() {
        let limiter = FrameLimiter::from_max_fps(60);
        let (idle, reported) = limiter.pace(Duration::from_millis(5));
        assert_eq!(idle, Some(Duration::from_millis(11)));
        assert_eq!(reported, Duration::from_millis(16));
    }

    #[test]
    fn slow_frame_is_not_delayed() {
        let limiter = FrameLimiter::from_max_fps(60);
        let (idle, reported) = limiter.pace(Duration::from_millis(30));
        assert_eq!(idle, None);
        assert_eq!(reported, Duration::from_millis(30));
    }

    #[test]
    fn zero_fps_is_clamped() {
        assert_eq!(
            FrameLimiter::from_max_fps(0).budget(),
            Duration::from_millis(1000)
        );
    }
}
