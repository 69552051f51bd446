//! Frame statistics and the frame-time window title

use std::collections::VecDeque;
use std::time::Duration;

/// Seconds between window title refreshes
pub const TITLE_INTERVAL: f32 = 0.5;

/// Frame statistics tracker
#[derive(Debug)]
pub struct FrameStats {
    /// Frame time history for averaging
    frame_times: VecDeque<Duration>,
    /// Maximum samples to keep
    max_samples: usize,
    fps: f32,
    avg_frame_time_ms: f32,
    min_frame_time_ms: f32,
    max_frame_time_ms: f32,
    total_frames: u64,
}

impl FrameStats {
    #[must_use]
    pub fn new() -> Self {
        Self {
            frame_times: VecDeque::with_capacity(120),
            max_samples: 120,
            fps: 0.0,
            avg_frame_time_ms: 0.0,
            min_frame_time_ms: 0.0,
            max_frame_time_ms: 0.0,
            total_frames: 0,
        }
    }

    /// Record a frame with the given delta time
    pub fn record_frame(&mut self, delta: Duration) {
        self.total_frames += 1;

        if self.frame_times.len() >= self.max_samples {
            self.frame_times.pop_front();
        }
        self.frame_times.push_back(delta);

        self.update_stats();
    }

    fn update_stats(&mut self) {
        if self.frame_times.is_empty() {
            return;
        }

        let mut total = Duration::ZERO;
        let mut min = Duration::MAX;
        let mut max = Duration::ZERO;

        for &dt in &self.frame_times {
            total += dt;
            min = min.min(dt);
            max = max.max(dt);
        }

        let count = self.frame_times.len() as f32;
        let total_secs = total.as_secs_f32();

        if total_secs > 0.0 {
            self.avg_frame_time_ms = (total_secs / count) * 1000.0;
            self.fps = count / total_secs;
        } else {
            self.avg_frame_time_ms = 0.0;
            self.fps = 0.0;
        }

        self.min_frame_time_ms = min.as_secs_f32() * 1000.0;
        self.max_frame_time_ms = max.as_secs_f32() * 1000.0;
    }

    #[must_use]
    pub fn fps(&self) -> f32 {
        self.fps
    }

    #[must_use]
    pub fn avg_frame_time_ms(&self) -> f32 {
        self.avg_frame_time_ms
    }

    #[must_use]
    pub fn min_frame_time_ms(&self) -> f32 {
        self.min_frame_time_ms
    }

    #[must_use]
    pub fn max_frame_time_ms(&self) -> f32 {
        self.max_frame_time_ms
    }

    #[must_use]
    pub fn total_frames(&self) -> u64 {
        self.total_frames
    }

    /// Get a formatted stats string
    #[must_use]
    pub fn format_stats(&self) -> String {
        format!(
            "FPS: {:.1} | Frame: {:.2}ms (min: {:.2}, max: {:.2})",
            self.fps, self.avg_frame_time_ms, self.min_frame_time_ms, self.max_frame_time_ms
        )
    }
}

impl Default for FrameStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Averages frame times and produces a new window title every [`TITLE_INTERVAL`]
#[derive(Debug, Clone)]
pub struct TitleCounter {
    base: String,
    elapsed: f32,
    frames: u32,
}

impl TitleCounter {
    #[must_use]
    pub fn new(base: impl Into<String>) -> Self {
        Self {
            base: base.into(),
            elapsed: 0.0,
            frames: 0,
        }
    }

    #[must_use]
    pub fn base(&self) -> &str {
        &self.base
    }

    /// Count a frame. Returns the title to show once the interval has passed.
    pub fn tick(&mut self, frame_time: f32) -> Option<String> {
        self.elapsed += frame_time;
        self.frames += 1;
        if self.elapsed < TITLE_INTERVAL {
            return None;
        }

        let average = self.elapsed / self.frames as f32;
        self.elapsed = 0.0;
        self.frames = 0;
        Some(format_title(&self.base, average))
    }
}

/// `"<base> - Frame Time: 16.67ms, FPS: 60"`
#[must_use]
pub fn format_title(base: &str, average_frame_time: f32) -> String {
    let fps = if average_frame_time > 0.0 {
        (1.0 / average_frame_time).round()
    } else {
        0.0
    };
    format!(
        "{} - Frame Time: {:.2}ms, FPS: {}",
        base,
        average_frame_time * 1000.0,
        fps as u32
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_title_format() {
        assert_eq!(
            format_title("umbra", 1.0 / 60.0),
            "umbra - Frame Time: 16.67ms, FPS: 60"
        );
        assert_eq!(format_title("umbra", 0.0), "umbra - Frame Time: 0.00ms, FPS: 0");
    }

    #[test]
    fn test_title_waits_for_interval() {
        let mut counter = TitleCounter::new("demo");
        assert!(counter.tick(0.2).is_none());
        assert!(counter.tick(0.2).is_none());
        let title = counter.tick(0.2).unwrap();
        assert!(title.starts_with("demo - Frame Time: 200.00ms"));
        assert!(counter.tick(0.1).is_none());
    }

    #[test]
    fn test_frame_stats_average() {
        let mut stats = FrameStats::new();
        stats.record_frame(Duration::from_millis(10));
        stats.record_frame(Duration::from_millis(30));
        assert_eq!(stats.total_frames(), 2);
        assert!((stats.avg_frame_time_ms() - 20.0).abs() < 0.01);
        assert!((stats.fps() - 50.0).abs() < 0.1);
        assert!((stats.min_frame_time_ms() - 10.0).abs() < 0.01);
    }
}
