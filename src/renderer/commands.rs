//! Ordered render commands
//!
//! The scene, its lights and its models record work into a [`CommandList`] in
//! exactly the order the GPU must see it. A backend then replays the list. State
//! set by one command stays in effect until a later command replaces it.

use super::backend::{GeometryHandle, ShaderHandle, ShadowTargetHandle, TextureHandle};
use super::constants::{FrameConstants, ModelConstants};
use super::overlay::OverlayRect;
use super::shadow::CubeFace;
use super::states::{BlendState, DepthState, RasterState, SamplerKind};

/// Texture slot used for the base colour map
pub const SLOT_DIFFUSE: u32 = 0;
/// Texture slot used for the secondary (normal) map
pub const SLOT_SECONDARY: u32 = 1;
/// Texture slot the 2D shadow map is bound to
pub const SLOT_SHADOW: u32 = 2;
/// Texture slot used for the tertiary (height) map
pub const SLOT_TERTIARY: u32 = 3;
/// Texture slot the point light shadow cube is bound to
pub const SLOT_SHADOW_CUBE: u32 = 4;

/// Vertex shader plus optional pixel shader
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShaderPair {
    pub vertex: ShaderHandle,
    pub pixel: Option<ShaderHandle>,
}

impl ShaderPair {
    #[must_use]
    pub fn new(vertex: ShaderHandle, pixel: ShaderHandle) -> Self {
        Self {
            vertex,
            pixel: Some(pixel),
        }
    }

    /// Vertex stage only, no colour output
    #[must_use]
    pub fn depth_only(vertex: ShaderHandle) -> Self {
        Self {
            vertex,
            pixel: None,
        }
    }
}

/// Resource bound to a texture slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureBinding {
    Texture(TextureHandle),
    Shadow(ShadowTargetHandle),
}

/// Viewport rectangle in pixels
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub min_depth: f32,
    pub max_depth: f32,
}

impl Viewport {
    /// Full-target viewport with the standard depth range
    #[must_use]
    pub fn sized(width: f32, height: f32) -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width,
            height,
            min_depth: 0.0,
            max_depth: 1.0,
        }
    }
}

/// A single recorded GPU operation
#[derive(Debug, Clone, PartialEq)]
pub enum RenderCommand {
    /// Make a shadow target (or one of its cube faces) the only target and clear it
    BeginDepthPass {
        target: ShadowTargetHandle,
        face: Option<CubeFace>,
        clear_depth: f32,
    },
    /// Make the back buffer and main depth buffer the targets and clear both
    BeginMainPass {
        clear_colour: [f32; 4],
        clear_depth: f32,
    },
    SetViewport(Viewport),
    SetShaders(ShaderPair),
    /// Keep the current vertex shader but write no colour
    DisablePixelShader,
    SetRasterState(RasterState),
    SetBlendState(BlendState),
    SetDepthState(DepthState),
    SetSampler {
        slot: u32,
        kind: SamplerKind,
    },
    BindTexture {
        slot: u32,
        binding: TextureBinding,
    },
    UnbindTexture {
        slot: u32,
    },
    UploadFrameConstants(Box<FrameConstants>),
    UploadModelConstants(Box<ModelConstants>),
    Draw {
        geometry: GeometryHandle,
    },
    DrawOverlay(Vec<OverlayRect>),
    Present,
}

impl RenderCommand {
    #[must_use]
    pub fn is_draw(&self) -> bool {
        matches!(self, Self::Draw { .. })
    }
}

/// Commands recorded for one frame
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommandList {
    commands: Vec<RenderCommand>,
}

impl CommandList {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, command: RenderCommand) {
        self.commands.push(command);
    }

    pub fn clear(&mut self) {
        self.commands.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, RenderCommand> {
        self.commands.iter()
    }

    #[must_use]
    pub fn as_slice(&self) -> &[RenderCommand] {
        &self.commands
    }

    /// Number of draw commands
    #[must_use]
    pub fn draw_count(&self) -> usize {
        self.commands.iter().filter(|c| c.is_draw()).count()
    }

    /// Index of the first command matching `predicate`
    pub fn position(&self, predicate: impl FnMut(&RenderCommand) -> bool) -> Option<usize> {
        self.commands.iter().position(predicate)
    }

    /// The frame constants most recently uploaded before `index`
    #[must_use]
    pub fn frame_constants_before(&self, index: usize) -> Option<&FrameConstants> {
        self.commands[..index.min(self.commands.len())]
            .iter()
            .rev()
            .find_map(|command| match command {
                RenderCommand::UploadFrameConstants(constants) => Some(constants.as_ref()),
                _ => None,
            })
    }
}

impl<'a> IntoIterator for &'a CommandList {
    type Item = &'a RenderCommand;
    type IntoIter = std::slice::Iter<'a, RenderCommand>;

    fn into_iter(self) -> Self::IntoIter {
        self.commands.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_constants_before_finds_latest_upload() {
        let mut list = CommandList::new();
        let mut first = FrameConstants::default();
        first.light_count = 1;
        let mut second = FrameConstants::default();
        second.light_count = 2;

        list.push(RenderCommand::UploadFrameConstants(Box::new(first)));
        list.push(RenderCommand::Present);
        list.push(RenderCommand::UploadFrameConstants(Box::new(second)));
        list.push(RenderCommand::Present);

        assert_eq!(list.frame_constants_before(2).map(|c| c.light_count), Some(1));
        assert_eq!(list.frame_constants_before(4).map(|c| c.light_count), Some(2));
        assert!(list.frame_constants_before(0).is_none());
    }

    #[test]
    fn test_draw_count() {
        let mut list = CommandList::new();
        list.push(RenderCommand::Draw {
            geometry: GeometryHandle(3),
        });
        list.push(RenderCommand::DisablePixelShader);
        list.push(RenderCommand::Draw {
            geometry: GeometryHandle(3),
        });
        assert_eq!(list.draw_count(), 2);
        assert_eq!(list.len(), 3);
    }
}
