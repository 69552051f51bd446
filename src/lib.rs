//! A real-time 3D renderer built on wgpu
//!
//! This crate provides:
//! - An ordered, multi-pass frame: shadow depth passes, then the lit camera pass
//! - Spot, directional and point lights, with cube shadow maps for point lights
//! - Models with Euler transforms, look-at orientation and four blend modes
//! - JSON and RON scene files
//! - A windowed wgpu backend and a headless backend for tests

pub mod assets;
pub mod core;
pub mod input;
pub mod renderer;

// Re-exports for convenience
pub use glam;
pub use wgpu;
pub use winit;

/// Prelude module for common imports
pub mod prelude {
    pub use crate::core::{
        Application, Engine, EngineConfig, EngineContext, EngineError, SceneDescription,
    };
    pub use crate::input::Input;
    pub use crate::renderer::{
        BlendMode, Camera, LightDesc, LightId, LightKind, Mesh, Model, ModelId, RenderBackend,
        Scene, SceneConfig, ShadowConfig, ShadowTechnique,
    };
    pub use glam::{Mat4, Vec2, Vec3, Vec4};
    pub use winit::keyboard::KeyCode;
}
