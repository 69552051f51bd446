//! Frame timing

use std::time::{Duration, Instant};

/// Longest frame time handed to the scene, so a stall does not fling the camera
pub const MAX_FRAME_TIME: Duration = Duration::from_millis(250);

/// Time tracking across frames
#[derive(Debug, Clone)]
pub struct Time {
    start: Instant,
    last_frame: Instant,
    delta: Duration,
    frame_count: u64,
}

impl Time {
    #[must_use]
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            start: now,
            last_frame: now,
            delta: Duration::ZERO,
            frame_count: 0,
        }
    }

    /// Start a new frame
    pub fn update(&mut self) {
        let now = Instant::now();
        self.tick(now.duration_since(self.last_frame));
        self.last_frame = now;
    }

    fn tick(&mut self, elapsed: Duration) {
        self.delta = elapsed.min(MAX_FRAME_TIME);
        self.frame_count += 1;
    }

    /// Duration of the last frame
    #[must_use]
    pub fn delta(&self) -> Duration {
        self.delta
    }

    #[must_use]
    pub fn delta_seconds(&self) -> f32 {
        self.delta.as_secs_f32()
    }

    /// Seconds since the engine started
    #[must_use]
    pub fn elapsed_seconds(&self) -> f32 {
        self.start.elapsed().as_secs_f32()
    }

    #[must_use]
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }
}

impl Default for Time {
    fn default() -> Self {
        Self::new()
    }
}
