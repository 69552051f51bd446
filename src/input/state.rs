//! Keyboard and mouse state
//!
//! Fed from winit window events and cleared once per frame, so "hit" queries
//! report a key only on the frame it went down.

use glam::Vec2;
use rustc_hash::FxHashSet;
use winit::event::ElementState;
use winit::keyboard::KeyCode;

/// Input state for the current frame
#[derive(Debug, Default)]
pub struct Input {
    held_keys: FxHashSet<KeyCode>,
    hit_keys: FxHashSet<KeyCode>,
    released_keys: FxHashSet<KeyCode>,
    mouse_position: Vec2,
    /// Accumulated relative motion this frame
    mouse_delta: Vec2,
}

impl Input {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear the per-frame state. Call after the frame has consumed its input.
    pub fn end_frame(&mut self) {
        self.hit_keys.clear();
        self.released_keys.clear();
        self.mouse_delta = Vec2::ZERO;
    }

    pub fn process_keyboard(&mut self, key: KeyCode, state: ElementState) {
        match state {
            ElementState::Pressed => {
                if self.held_keys.insert(key) {
                    self.hit_keys.insert(key);
                }
            }
            ElementState::Released => {
                self.held_keys.remove(&key);
                self.released_keys.insert(key);
            }
        }
    }

    pub fn process_mouse_motion(&mut self, position: Vec2) {
        self.mouse_position = position;
    }

    /// Raw device motion, used for mouse look
    pub fn process_mouse_delta(&mut self, delta: Vec2) {
        self.mouse_delta += delta;
    }

    /// Key is down this frame
    #[must_use]
    pub fn key_held(&self, key: KeyCode) -> bool {
        self.held_keys.contains(&key)
    }

    /// Key went down this frame
    #[must_use]
    pub fn key_hit(&self, key: KeyCode) -> bool {
        self.hit_keys.contains(&key)
    }

    #[must_use]
    pub fn key_released(&self, key: KeyCode) -> bool {
        self.released_keys.contains(&key)
    }

    #[must_use]
    pub fn mouse_position(&self) -> Vec2 {
        self.mouse_position
    }

    #[must_use]
    pub fn mouse_delta(&self) -> Vec2 {
        self.mouse_delta
    }

    /// Forget every held key, e.g. when the window loses focus
    pub fn release_all(&mut self) {
        self.released_keys.extend(self.held_keys.drain());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_only_on_first_frame() {
        let mut input = Input::new();
        input.process_keyboard(KeyCode::KeyM, ElementState::Pressed);
        assert!(input.key_hit(KeyCode::KeyM));
        assert!(input.key_held(KeyCode::KeyM));

        input.end_frame();
        // Key repeat delivers another press while held
        input.process_keyboard(KeyCode::KeyM, ElementState::Pressed);
        assert!(!input.key_hit(KeyCode::KeyM));
        assert!(input.key_held(KeyCode::KeyM));
    }

    #[test]
    fn test_release() {
        let mut input = Input::new();
        input.process_keyboard(KeyCode::KeyW, ElementState::Pressed);
        input.process_keyboard(KeyCode::KeyW, ElementState::Released);
        assert!(!input.key_held(KeyCode::KeyW));
        assert!(input.key_released(KeyCode::KeyW));
    }

    #[test]
    fn test_mouse_delta_accumulates_until_frame_end() {
        let mut input = Input::new();
        input.process_mouse_delta(Vec2::new(2.0, 1.0));
        input.process_mouse_delta(Vec2::new(3.0, -4.0));
        assert_eq!(input.mouse_delta(), Vec2::new(5.0, -3.0));
        input.end_frame();
        assert_eq!(input.mouse_delta(), Vec2::ZERO);
    }

    #[test]
    fn test_release_all() {
        let mut input = Input::new();
        input.process_keyboard(KeyCode::ArrowUp, ElementState::Pressed);
        input.release_all();
        assert!(!input.key_held(KeyCode::ArrowUp));
        assert!(input.key_released(KeyCode::ArrowUp));
    }
}
