//! Boundary between the scene and the graphics device
//!
//! Everything above this trait records [`CommandList`]s and holds opaque handles.
//! The windowed wgpu implementation lives in `context`, and a windowless one in
//! `headless`.

use std::fmt;

use super::commands::CommandList;
use super::mesh::Vertex;
use super::shaders::ShaderSource;
use super::shadow::ShadowTargetKind;
use super::states::StateRegistry;

macro_rules! handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub(crate) u32);

        impl $name {
            /// Raw index assigned by the backend
            #[must_use]
            pub fn index(self) -> usize {
                self.0 as usize
            }
        }
    };
}

handle!(
    /// Compiled shader stage
    ShaderHandle
);
handle!(
    /// Uploaded vertex and index buffers of one sub-mesh
    GeometryHandle
);
handle!(
    /// Sampled colour texture
    TextureHandle
);
handle!(
    /// Depth-only render target owned by a light
    ShadowTargetHandle
);

/// Errors from GPU resource creation and submission
#[derive(Debug, Clone, PartialEq)]
pub enum RenderError {
    /// No suitable adapter was found
    NoAdapter,
    /// Device request failed
    Device(String),
    /// A buffer, texture, view or state could not be created
    ResourceCreation { resource: String, reason: String },
    /// Shader source could not be found or compiled
    ShaderLoad { name: String, reason: String },
    /// A handle that was never created, or already released
    MissingHandle { kind: &'static str, index: usize },
    /// Swap chain surface could not be acquired
    Surface(String),
}

impl fmt::Display for RenderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoAdapter => write!(f, "Failed to find a suitable GPU adapter"),
            Self::Device(e) => write!(f, "Failed to create device: {e}"),
            Self::ResourceCreation { resource, reason } => {
                write!(f, "Failed to create {resource}: {reason}")
            }
            Self::ShaderLoad { name, reason } => {
                write!(f, "Failed to load shader '{name}': {reason}")
            }
            Self::MissingHandle { kind, index } => write!(f, "Unknown {kind} handle {index}"),
            Self::Surface(e) => write!(f, "Surface error: {e}"),
        }
    }
}

impl std::error::Error for RenderError {}

/// Operations the scene needs from a graphics device.
///
/// Creation calls can fail and are only made during setup. `submit` replays a
/// frame and only fails when the presentation surface is unusable.
pub trait RenderBackend {
    /// Compile one shader stage
    fn create_shader(&mut self, source: &ShaderSource) -> Result<ShaderHandle, RenderError>;

    /// Create the sampler objects for every named state
    fn create_states(&mut self, registry: &StateRegistry) -> Result<(), RenderError>;

    fn upload_geometry(
        &mut self,
        label: &str,
        vertices: &[Vertex],
        indices: &[u32],
    ) -> Result<GeometryHandle, RenderError>;

    /// Create a sampled texture from tightly packed RGBA8 pixels
    fn create_texture(
        &mut self,
        label: &str,
        width: u32,
        height: u32,
        rgba: &[u8],
    ) -> Result<TextureHandle, RenderError>;

    /// 1x1 white texture bound wherever a real texture is missing
    fn placeholder_texture(&self) -> TextureHandle;

    fn create_shadow_target(
        &mut self,
        kind: ShadowTargetKind,
        resolution: u32,
    ) -> Result<ShadowTargetHandle, RenderError>;

    fn release_geometry(&mut self, geometry: GeometryHandle);
    fn release_texture(&mut self, texture: TextureHandle);
    fn release_shadow_target(&mut self, target: ShadowTargetHandle);

    /// Current back buffer size in pixels
    fn viewport_size(&self) -> (u32, u32);

    /// Execute a recorded frame in order
    fn submit(&mut self, commands: &CommandList) -> Result<(), RenderError>;

    /// Update the window caption, where there is one
    fn set_title(&mut self, _title: &str) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = RenderError::ResourceCreation {
            resource: "shadow map".into(),
            reason: "out of memory".into(),
        };
        assert_eq!(err.to_string(), "Failed to create shadow map: out of memory");

        let err = RenderError::MissingHandle {
            kind: "texture",
            index: 7,
        };
        assert_eq!(err.to_string(), "Unknown texture handle 7");
    }

    #[test]
    fn test_handle_index() {
        assert_eq!(TextureHandle(9).index(), 9);
        assert!(GeometryHandle(1) < GeometryHandle(2));
    }
}
