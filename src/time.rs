//! Frame timing for the driver loop.
//!
//! The physics step uses the fixed time step from
//! [`PhysicsConstants`](crate::kernel::PhysicsConstants); wall-clock timing
//! here only feeds frame-rate reporting.

use std::time::{Duration, Instant};

/// Frame counter with a periodically refreshed frame rate.
#[derive(Debug)]
pub struct FrameClock {
    last_frame: Instant,
    delta_secs: f32,
    frame_count: u64,
    fps: f32,
    fps_frame_count: u64,
    fps_update_time: Instant,
    fps_update_interval: Duration,
}

impl FrameClock {
    pub fn new() -> Self {
        Self::with_interval(Duration::from_millis(500))
    }

    /// A clock that recomputes the frame rate every `interval`.
    pub fn with_interval(interval: Duration) -> Self {
        let now = Instant::now();
        Self {
            last_frame: now,
            delta_secs: 0.0,
            frame_count: 0,
            fps: 0.0,
            fps_frame_count: 0,
            fps_update_time: now,
            fps_update_interval: interval,
        }
    }

    /// Advance by one frame. Returns `true` when the frame rate was refreshed.
    pub fn tick(&mut self) -> bool {
        let now = Instant::now();
        self.delta_secs = now.duration_since(self.last_frame).as_secs_f32();
        self.last_frame = now;
        self.frame_count += 1;

        let since = now.duration_since(self.fps_update_time);
        if since < self.fps_update_interval {
            return false;
        }
        let frames = self.frame_count - self.fps_frame_count;
        self.fps = frames as f32 / since.as_secs_f32();
        self.fps_frame_count = self.frame_count;
        self.fps_update_time = now;
        true
    }

    /// Seconds between the last two ticks.
    #[inline]
    pub fn delta(&self) -> f32 {
        self.delta_secs
    }

    #[inline]
    pub fn frame(&self) -> u64 {
        self.frame_count
    }

    #[inline]
    pub fn fps(&self) -> f32 {
        self.fps
    }
}

impl Default for FrameClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_clock_new() {
        let clock = FrameClock::new();
        assert_eq!(clock.frame(), 0);
        assert_eq!(clock.fps(), 0.0);
    }

    #[test]
    fn test_tick_counts_frames() {
        let mut clock = FrameClock::new();
        thread::sleep(Duration::from_millis(5));
        clock.tick();
        clock.tick();
        assert_eq!(clock.frame(), 2);
        assert!(clock.delta() >= 0.0);
    }

    #[test]
    fn test_fps_refresh() {
        let mut clock = FrameClock::with_interval(Duration::from_millis(10));
        assert!(!clock.tick());
        thread::sleep(Duration::from_millis(20));
        assert!(clock.tick());
        assert!(clock.fps() > 0.0);
    }
}
