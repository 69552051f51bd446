//! Euler-angle camera
//!
//! The camera's world matrix uses the same rotate Z, X, Y then translate order
//! as models. The view matrix is its inverse and the projection is
//! parameterised by horizontal field of view.

use glam::{Mat4, Vec2, Vec3};
use winit::keyboard::KeyCode;

use super::math::{compose_world_matrix, perspective_fov_x};
use crate::input::Input;

/// Radians per second for keyboard turning
pub const ROTATION_SPEED: f32 = 1.0;
/// Units per second for keyboard movement, before the run factor
pub const MOVEMENT_SPEED: f32 = 15.0;

/// Keys used by [`Camera::control`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CameraKeys {
    pub turn_up: KeyCode,
    pub turn_down: KeyCode,
    pub turn_left: KeyCode,
    pub turn_right: KeyCode,
    pub forward: KeyCode,
    pub backward: KeyCode,
    pub left: KeyCode,
    pub right: KeyCode,
    /// Toggles mouse look
    pub mouse_look: KeyCode,
}

impl Default for CameraKeys {
    fn default() -> Self {
        Self {
            turn_up: KeyCode::ArrowUp,
            turn_down: KeyCode::ArrowDown,
            turn_left: KeyCode::ArrowLeft,
            turn_right: KeyCode::ArrowRight,
            forward: KeyCode::KeyW,
            backward: KeyCode::KeyS,
            left: KeyCode::KeyA,
            right: KeyCode::KeyD,
            mouse_look: KeyCode::KeyM,
        }
    }
}

/// Perspective camera placed by position and Euler rotation
#[derive(Debug, Clone, PartialEq)]
pub struct Camera {
    pub position: Vec3,
    /// Euler angles in radians
    pub rotation: Vec3,
    /// Horizontal field of view in radians
    pub fov_x: f32,
    /// Width over height
    pub aspect_ratio: f32,
    pub near_clip: f32,
    pub far_clip: f32,
    /// Multiplier applied to keyboard movement
    pub run_factor: f32,
    mouse_look: bool,
}

impl Camera {
    #[must_use]
    pub fn new(position: Vec3, rotation: Vec3) -> Self {
        Self {
            position,
            rotation,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_clip(mut self, near: f32, far: f32) -> Self {
        self.near_clip = near;
        self.far_clip = far;
        self
    }

    #[must_use]
    pub fn with_fov_x(mut self, fov_x: f32) -> Self {
        self.fov_x = fov_x;
        self
    }

    pub fn set_aspect(&mut self, width: u32, height: u32) {
        self.aspect_ratio = width as f32 / height.max(1) as f32;
    }

    #[must_use]
    pub fn world_matrix(&self) -> Mat4 {
        compose_world_matrix(self.position, self.rotation, Vec3::ONE)
    }

    #[must_use]
    pub fn view_matrix(&self) -> Mat4 {
        self.world_matrix().inverse()
    }

    #[must_use]
    pub fn projection_matrix(&self) -> Mat4 {
        perspective_fov_x(self.aspect_ratio, self.fov_x, self.near_clip, self.far_clip)
    }

    #[must_use]
    pub fn view_projection_matrix(&self) -> Mat4 {
        self.projection_matrix() * self.view_matrix()
    }

    /// Local X axis in world space
    #[must_use]
    pub fn right(&self) -> Vec3 {
        self.world_matrix().x_axis.truncate()
    }

    /// Local Z axis in world space
    #[must_use]
    pub fn forward(&self) -> Vec3 {
        self.world_matrix().z_axis.truncate()
    }

    #[must_use]
    pub fn mouse_look(&self) -> bool {
        self.mouse_look
    }

    /// Keyboard and mouse-look control, scaled by frame time
    pub fn control(&mut self, frame_time: f32, input: &Input, keys: &CameraKeys) {
        if input.key_hit(keys.mouse_look) {
            self.mouse_look = !self.mouse_look;
            log::debug!("Mouse look {}", if self.mouse_look { "on" } else { "off" });
        }

        let turn = ROTATION_SPEED * frame_time;
        if self.mouse_look {
            let delta: Vec2 = input.mouse_delta();
            if delta.x != 0.0 {
                self.rotation.y += delta.x.signum() * turn * 2.0;
            }
            if delta.y != 0.0 {
                self.rotation.x += delta.y.signum() * turn * 2.0;
            }
        }

        if input.key_held(keys.turn_down) {
            self.rotation.x += turn;
        }
        if input.key_held(keys.turn_up) {
            self.rotation.x -= turn;
        }
        if input.key_held(keys.turn_right) {
            self.rotation.y += turn;
        }
        if input.key_held(keys.turn_left) {
            self.rotation.y -= turn;
        }

        let step = MOVEMENT_SPEED * frame_time * self.run_factor;
        let right = self.right();
        let forward = self.forward();
        if input.key_held(keys.right) {
            self.position += right * step;
        }
        if input.key_held(keys.left) {
            self.position -= right * step;
        }
        if input.key_held(keys.forward) {
            self.position += forward * step;
        }
        if input.key_held(keys.backward) {
            self.position -= forward * step;
        }
    }
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Vec3::ZERO,
            fov_x: std::f32::consts::FRAC_PI_3,
            aspect_ratio: 4.0 / 3.0,
            near_clip: 0.1,
            far_clip: 10_000.0,
            run_factor: 10.0,
            mouse_look: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use winit::event::ElementState;

    #[test]
    fn test_view_is_inverse_world() {
        let camera = Camera::new(Vec3::new(0.0, 50.0, -100.0), Vec3::new(0.5, 0.2, 0.0));
        let product = camera.view_matrix() * camera.world_matrix();
        assert!(product.abs_diff_eq(Mat4::IDENTITY, 1e-4));
    }

    #[test]
    fn test_pitched_camera_looks_down() {
        let camera = Camera::new(Vec3::ZERO, Vec3::new(30f32.to_radians(), 0.0, 0.0));
        let forward = camera.forward();
        assert!(forward.y < 0.0);
        assert!(forward.z > 0.0);
    }

    #[test]
    fn test_forward_key_moves_along_facing() {
        let mut camera = Camera::new(Vec3::ZERO, Vec3::new(0.0, std::f32::consts::FRAC_PI_2, 0.0));
        camera.run_factor = 1.0;
        let mut input = Input::new();
        input.process_keyboard(KeyCode::KeyW, ElementState::Pressed);

        camera.control(1.0, &input, &CameraKeys::default());
        assert!((camera.position - Vec3::new(MOVEMENT_SPEED, 0.0, 0.0)).length() < 1e-3);
    }

    #[test]
    fn test_turn_keys() {
        let mut camera = Camera::default();
        let mut input = Input::new();
        input.process_keyboard(KeyCode::ArrowRight, ElementState::Pressed);
        input.process_keyboard(KeyCode::ArrowDown, ElementState::Pressed);

        camera.control(0.5, &input, &CameraKeys::default());
        assert!((camera.rotation.y - 0.5).abs() < 1e-6);
        assert!((camera.rotation.x - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_mouse_look_toggle() {
        let mut camera = Camera::default();
        let mut input = Input::new();
        input.process_keyboard(KeyCode::KeyM, ElementState::Pressed);
        camera.control(0.016, &input, &CameraKeys::default());
        assert!(camera.mouse_look());

        input.end_frame();
        input.process_mouse_delta(Vec2::new(4.0, 0.0));
        camera.control(0.5, &input, &CameraKeys::default());
        assert!(camera.rotation.y > 0.0);
        assert_eq!(camera.rotation.x, 0.0);
    }
}
