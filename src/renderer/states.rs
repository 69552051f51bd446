//! Fixed set of raster, blend, depth and sampler configurations
//!
//! Every draw selects its pipeline state from these named values. The registry
//! builds the wgpu descriptors once per scene and they never change afterwards.

use std::fmt;

/// Depth format shared by the main depth buffer and shadow maps
pub const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;

/// Face culling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RasterState {
    #[default]
    CullBack,
    CullFront,
    CullNone,
}

/// Output merger blending
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BlendState {
    #[default]
    NoBlend,
    Additive,
    Multiplicative,
    /// Source-over using source alpha
    AlphaBlend,
}

/// Depth test and write behaviour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DepthState {
    /// Less-than test with writes
    #[default]
    ReadWrite,
    /// Test without writing, for blended draws
    ReadOnly,
    Disabled,
}

/// Texture sampling filters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SamplerKind {
    Point,
    Trilinear,
    #[default]
    Anisotropic4x,
}

/// Blend tag carried by each model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Serialize, serde::Deserialize)]
pub enum BlendMode {
    #[default]
    None,
    Additive,
    Multiplicative,
    AlphaBlend,
}

/// Raster, blend and depth state selected together for one draw
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct StateTriple {
    pub blend: BlendState,
    pub depth: DepthState,
    pub raster: RasterState,
}

impl BlendMode {
    pub const ALL: [BlendMode; 4] = [
        BlendMode::None,
        BlendMode::Additive,
        BlendMode::Multiplicative,
        BlendMode::AlphaBlend,
    ];

    /// States bound for a model with this tag.
    ///
    /// Opaque models write depth; every blended mode only tests it.
    #[must_use]
    pub fn states(self) -> StateTriple {
        let blend = match self {
            BlendMode::None => {
                return StateTriple {
                    blend: BlendState::NoBlend,
                    depth: DepthState::ReadWrite,
                    raster: RasterState::CullBack,
                };
            }
            BlendMode::Additive => BlendState::Additive,
            BlendMode::Multiplicative => BlendState::Multiplicative,
            BlendMode::AlphaBlend => BlendState::AlphaBlend,
        };
        StateTriple {
            blend,
            depth: DepthState::ReadOnly,
            raster: RasterState::CullBack,
        }
    }
}

impl RasterState {
    pub const ALL: [RasterState; 3] = [Self::CullBack, Self::CullFront, Self::CullNone];

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::CullBack => "cull back",
            Self::CullFront => "cull front",
            Self::CullNone => "cull none",
        }
    }

    /// Triangle list with clockwise front faces
    #[must_use]
    pub fn primitive_state(self) -> wgpu::PrimitiveState {
        wgpu::PrimitiveState {
            topology: wgpu::PrimitiveTopology::TriangleList,
            strip_index_format: None,
            front_face: wgpu::FrontFace::Cw,
            cull_mode: match self {
                Self::CullBack => Some(wgpu::Face::Back),
                Self::CullFront => Some(wgpu::Face::Front),
                Self::CullNone => None,
            },
            polygon_mode: wgpu::PolygonMode::Fill,
            unclipped_depth: false,
            conservative: false,
        }
    }
}

impl BlendState {
    pub const ALL: [BlendState; 4] = [
        Self::NoBlend,
        Self::Additive,
        Self::Multiplicative,
        Self::AlphaBlend,
    ];

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::NoBlend => "no blend",
            Self::Additive => "additive blend",
            Self::Multiplicative => "multiplicative blend",
            Self::AlphaBlend => "alpha blend",
        }
    }

    /// Colour target blending, `None` for opaque writes
    #[must_use]
    pub fn wgpu_blend(self) -> Option<wgpu::BlendState> {
        let colour = match self {
            Self::NoBlend => return None,
            Self::Additive => wgpu::BlendComponent {
                src_factor: wgpu::BlendFactor::One,
                dst_factor: wgpu::BlendFactor::One,
                operation: wgpu::BlendOperation::Add,
            },
            Self::Multiplicative => wgpu::BlendComponent {
                src_factor: wgpu::BlendFactor::One,
                dst_factor: wgpu::BlendFactor::Src,
                operation: wgpu::BlendOperation::Add,
            },
            Self::AlphaBlend => wgpu::BlendComponent {
                src_factor: wgpu::BlendFactor::SrcAlpha,
                dst_factor: wgpu::BlendFactor::OneMinusSrcAlpha,
                operation: wgpu::BlendOperation::Add,
            },
        };
        Some(wgpu::BlendState {
            color: colour,
            alpha: wgpu::BlendComponent::REPLACE,
        })
    }
}

impl DepthState {
    pub const ALL: [DepthState; 3] = [Self::ReadWrite, Self::ReadOnly, Self::Disabled];

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::ReadWrite => "depth read write",
            Self::ReadOnly => "depth read only",
            Self::Disabled => "depth disabled",
        }
    }

    #[must_use]
    pub fn depth_stencil(self) -> wgpu::DepthStencilState {
        let (depth_write_enabled, depth_compare) = match self {
            Self::ReadWrite => (true, wgpu::CompareFunction::Less),
            Self::ReadOnly => (false, wgpu::CompareFunction::Less),
            Self::Disabled => (false, wgpu::CompareFunction::Always),
        };
        wgpu::DepthStencilState {
            format: DEPTH_FORMAT,
            depth_write_enabled,
            depth_compare,
            stencil: wgpu::StencilState::default(),
            bias: wgpu::DepthBiasState::default(),
        }
    }
}

impl SamplerKind {
    pub const ALL: [SamplerKind; 3] = [Self::Point, Self::Trilinear, Self::Anisotropic4x];

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Point => "point",
            Self::Trilinear => "trilinear",
            Self::Anisotropic4x => "anisotropic 4x",
        }
    }

    #[must_use]
    pub fn descriptor(self) -> wgpu::SamplerDescriptor<'static> {
        let (filter, anisotropy_clamp) = match self {
            Self::Point => (wgpu::FilterMode::Nearest, 1),
            Self::Trilinear => (wgpu::FilterMode::Linear, 1),
            Self::Anisotropic4x => (wgpu::FilterMode::Linear, 4),
        };
        wgpu::SamplerDescriptor {
            label: Some(self.name()),
            address_mode_u: wgpu::AddressMode::Repeat,
            address_mode_v: wgpu::AddressMode::Repeat,
            address_mode_w: wgpu::AddressMode::Repeat,
            mag_filter: filter,
            min_filter: filter,
            mipmap_filter: filter,
            anisotropy_clamp,
            ..Default::default()
        }
    }
}

/// Comparison sampler used to read shadow maps
#[must_use]
pub fn shadow_sampler_descriptor() -> wgpu::SamplerDescriptor<'static> {
    wgpu::SamplerDescriptor {
        label: Some("shadow compare"),
        address_mode_u: wgpu::AddressMode::ClampToEdge,
        address_mode_v: wgpu::AddressMode::ClampToEdge,
        address_mode_w: wgpu::AddressMode::ClampToEdge,
        mag_filter: wgpu::FilterMode::Linear,
        min_filter: wgpu::FilterMode::Linear,
        mipmap_filter: wgpu::FilterMode::Nearest,
        compare: Some(wgpu::CompareFunction::LessEqual),
        ..Default::default()
    }
}

/// Pre-built descriptor tables for every named state
pub struct StateRegistry {
    raster: [wgpu::PrimitiveState; 3],
    blend: [Option<wgpu::BlendState>; 4],
    depth: [wgpu::DepthStencilState; 3],
    samplers: [wgpu::SamplerDescriptor<'static>; 3],
    shadow_sampler: wgpu::SamplerDescriptor<'static>,
}

impl StateRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            raster: RasterState::ALL.map(RasterState::primitive_state),
            blend: BlendState::ALL.map(BlendState::wgpu_blend),
            depth: DepthState::ALL.map(DepthState::depth_stencil),
            samplers: SamplerKind::ALL.map(SamplerKind::descriptor),
            shadow_sampler: shadow_sampler_descriptor(),
        }
    }

    #[must_use]
    pub fn raster(&self, state: RasterState) -> &wgpu::PrimitiveState {
        &self.raster[state as usize]
    }

    #[must_use]
    pub fn blend(&self, state: BlendState) -> Option<wgpu::BlendState> {
        self.blend[state as usize]
    }

    #[must_use]
    pub fn depth(&self, state: DepthState) -> &wgpu::DepthStencilState {
        &self.depth[state as usize]
    }

    #[must_use]
    pub fn sampler(&self, kind: SamplerKind) -> &wgpu::SamplerDescriptor<'static> {
        &self.samplers[kind as usize]
    }

    #[must_use]
    pub fn shadow_sampler(&self) -> &wgpu::SamplerDescriptor<'static> {
        &self.shadow_sampler
    }

    /// Look a blend state up by its display name
    #[must_use]
    pub fn blend_by_name(name: &str) -> Option<BlendState> {
        BlendState::ALL.into_iter().find(|state| state.name() == name)
    }
}

impl Default for StateRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for StateRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateRegistry")
            .field("raster", &RasterState::ALL.len())
            .field("blend", &BlendState::ALL.len())
            .field("depth", &DepthState::ALL.len())
            .field("samplers", &SamplerKind::ALL.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opaque_writes_depth() {
        let states = BlendMode::None.states();
        assert_eq!(states.blend, BlendState::NoBlend);
        assert_eq!(states.depth, DepthState::ReadWrite);
        assert_eq!(states.raster, RasterState::CullBack);
    }

    #[test]
    fn test_blended_modes_are_read_only() {
        for mode in [BlendMode::Additive, BlendMode::Multiplicative, BlendMode::AlphaBlend] {
            let states = mode.states();
            assert_eq!(states.depth, DepthState::ReadOnly, "{mode:?}");
            assert_eq!(states.raster, RasterState::CullBack);
            assert_ne!(states.blend, BlendState::NoBlend);
        }
    }

    #[test]
    fn test_blend_factors() {
        let additive = BlendState::Additive.wgpu_blend().unwrap();
        assert_eq!(additive.color.src_factor, wgpu::BlendFactor::One);
        assert_eq!(additive.color.dst_factor, wgpu::BlendFactor::One);

        let multiply = BlendState::Multiplicative.wgpu_blend().unwrap();
        assert_eq!(multiply.color.dst_factor, wgpu::BlendFactor::Src);

        assert!(BlendState::NoBlend.wgpu_blend().is_none());
    }

    #[test]
    fn test_registry_lookup() {
        let registry = StateRegistry::new();
        assert!(!registry.depth(DepthState::ReadOnly).depth_write_enabled);
        assert!(registry.depth(DepthState::ReadWrite).depth_write_enabled);
        assert_eq!(registry.raster(RasterState::CullNone).cull_mode, None);
        assert_eq!(registry.sampler(SamplerKind::Anisotropic4x).anisotropy_clamp, 4);
        assert_eq!(
            StateRegistry::blend_by_name("additive blend"),
            Some(BlendState::Additive)
        );
        assert!(registry.shadow_sampler().compare.is_some());
    }
}
