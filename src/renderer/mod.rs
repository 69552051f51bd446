//! Rendering module
//!
//! Scene, lights and models record ordered commands. A [`RenderBackend`]
//! replays them: [`WgpuBackend`] on a window, [`HeadlessBackend`] in memory.

pub mod backend;
pub mod camera;
pub mod commands;
pub mod constants;
mod context;
pub mod headless;
pub mod import;
pub mod lights;
pub mod math;
pub mod mesh;
pub mod model;
pub mod overlay;
pub mod scene;
pub mod shaders;
pub mod shadow;
pub mod states;
pub mod texture;

pub use backend::{
    GeometryHandle, RenderBackend, RenderError, ShaderHandle, ShadowTargetHandle, TextureHandle,
};
pub use camera::{Camera, CameraKeys};
pub use commands::{CommandList, RenderCommand, ShaderPair};
pub use constants::{ConstantStore, FrameConstants, MAX_LIGHTS, ModelConstants};
pub use context::WgpuBackend;
pub use headless::HeadlessBackend;
pub use lights::{Light, LightDesc, LightError, LightId, LightKind};
pub use mesh::{Mesh, MeshData, MeshError, Vertex};
pub use model::{Model, ModelId, TextureSlot};
pub use overlay::{CautionBanner, Overlay, OverlayRect};
pub use scene::{Scene, SceneConfig};
pub use shadow::{ShadowConfig, ShadowTechnique};
pub use states::{BlendMode, BlendState, DepthState, RasterState, SamplerKind, StateRegistry};
pub use texture::TextureError;
