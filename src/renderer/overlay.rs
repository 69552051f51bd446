//! Screen-space overlay drawn after the main pass

/// Filled rectangle in pixels, origin at the top left
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct OverlayRect {
    pub position: [f32; 2],
    pub size: [f32; 2],
    pub colour: [f32; 4],
}

impl OverlayRect {
    #[must_use]
    pub fn new(position: [f32; 2], size: [f32; 2], colour: [f32; 4]) -> Self {
        Self {
            position,
            size,
            colour,
        }
    }
}

/// Hook called once per frame after the main draw
pub trait Overlay {
    /// Rectangles to draw this frame. `total_time` is seconds since the scene started.
    fn render(&mut self, total_time: f32, viewport: (u32, u32)) -> Vec<OverlayRect>;
}

/// Seconds the start-up caution banner stays up
pub const CAUTION_DURATION: f32 = 15.0;

/// Warning banner shown at the top of the screen for the first seconds of a run
#[derive(Debug, Clone)]
pub struct CautionBanner {
    text: String,
    duration: f32,
    logged: bool,
}

impl CautionBanner {
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            duration: CAUTION_DURATION,
            logged: false,
        }
    }

    #[must_use]
    pub fn with_duration(mut self, seconds: f32) -> Self {
        self.duration = seconds;
        self
    }

    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }
}

impl Default for CautionBanner {
    fn default() -> Self {
        Self::new("CAUTION: flashing lights. Press Escape to quit.")
    }
}

impl Overlay for CautionBanner {
    fn render(&mut self, total_time: f32, viewport: (u32, u32)) -> Vec<OverlayRect> {
        if total_time >= self.duration {
            return Vec::new();
        }
        if !self.logged {
            log::warn!("{}", self.text);
            self.logged = true;
        }

        let (width, _) = viewport;
        let width = width as f32;
        let banner_width = (width * 0.6).max(1.0);
        let left = (width - banner_width) * 0.5;
        let fade = ((self.duration - total_time) / 2.0).clamp(0.0, 1.0);

        vec![
            OverlayRect::new([left, 16.0], [banner_width, 40.0], [0.05, 0.05, 0.05, 0.8 * fade]),
            OverlayRect::new([left, 16.0], [banner_width, 4.0], [1.0, 0.8, 0.0, fade]),
            OverlayRect::new([left, 52.0], [banner_width, 4.0], [1.0, 0.8, 0.0, fade]),
        ]
    }
}

/// Overlay that draws nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOverlay;

impl Overlay for NoOverlay {
    fn render(&mut self, _total_time: f32, _viewport: (u32, u32)) -> Vec<OverlayRect> {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_banner_expires() {
        let mut banner = CautionBanner::default();
        assert_eq!(banner.render(0.0, (800, 600)).len(), 3);
        assert_eq!(banner.render(14.9, (800, 600)).len(), 3);
        assert!(banner.render(CAUTION_DURATION, (800, 600)).is_empty());
    }

    #[test]
    fn test_banner_is_centred() {
        let mut banner = CautionBanner::new("x").with_duration(1.0);
        let rects = banner.render(0.0, (1000, 500));
        let back = rects[0];
        assert_eq!(back.position[0] + back.size[0] / 2.0, 500.0);
    }

    #[test]
    fn test_rect_layout_is_packed() {
        assert_eq!(std::mem::size_of::<OverlayRect>(), 32);
    }
}
