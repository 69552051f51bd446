//! wgpu implementation of the render backend
//!
//! Recorded commands are replayed in two steps. The first walks the list,
//! tracking bound state, and plans render passes: it stages constant uploads
//! into dynamic-offset uniform rings and creates any pipeline or texture bind
//! group a draw needs. The second writes the staged constants and encodes the
//! planned passes into a single command buffer.

use std::num::NonZeroU64;
use std::sync::Arc;

use rustc_hash::FxHashMap;
use wgpu::util::DeviceExt;
use winit::window::Window;

use super::backend::{
    GeometryHandle, RenderBackend, RenderError, ShaderHandle, ShadowTargetHandle, TextureHandle,
};
use super::commands::{
    CommandList, RenderCommand, SLOT_SHADOW, SLOT_SHADOW_CUBE, ShaderPair, TextureBinding,
    Viewport,
};
use super::constants::{FrameConstants, ModelConstants};
use super::mesh::Vertex;
use super::overlay::OverlayRect;
use super::shaders::{self, ShaderSource, ShaderStage};
use super::shadow::{CubeFace, ShadowTargetKind};
use super::states::{
    BlendState, DEPTH_FORMAT, DepthState, RasterState, SamplerKind, StateRegistry,
};
use crate::assets::MediaFolders;

/// Texture slots in the material bind group, in binding order
const TEXTURE_SLOTS: usize = 5;
const FILTER_SAMPLER_BINDING: u32 = 5;
const COMPARE_SAMPLER_BINDING: u32 = 6;

/// Initial number of constant blocks each uniform ring holds
const INITIAL_FRAME_BLOCKS: u64 = 16;
const INITIAL_MODEL_BLOCKS: u64 = 256;

struct CompiledShader {
    module: wgpu::ShaderModule,
    entry_point: String,
    stage: ShaderStage,
}

struct GpuGeometry {
    vertex_buffer: wgpu::Buffer,
    index_buffer: wgpu::Buffer,
    index_count: u32,
}

struct GpuTexture {
    _texture: wgpu::Texture,
    view: wgpu::TextureView,
}

struct GpuShadowTarget {
    _texture: wgpu::Texture,
    kind: ShadowTargetKind,
    /// One attachment view per layer
    layer_views: Vec<wgpu::TextureView>,
    /// D2 or Cube view for sampling
    sample_view: wgpu::TextureView,
}

/// Uniform buffer holding many constant blocks, bound with a dynamic offset
struct UniformRing {
    label: &'static str,
    buffer: wgpu::Buffer,
    bind_group: wgpu::BindGroup,
    block_size: u64,
    stride: u64,
    capacity: u64,
}

impl UniformRing {
    fn new(
        device: &wgpu::Device,
        layout: &wgpu::BindGroupLayout,
        label: &'static str,
        block_size: u64,
        capacity: u64,
    ) -> Self {
        let alignment = u64::from(device.limits().min_uniform_buffer_offset_alignment);
        let stride = block_size.div_ceil(alignment) * alignment;
        let (buffer, bind_group) = Self::allocate(device, layout, label, block_size, stride * capacity);
        Self {
            label,
            buffer,
            bind_group,
            block_size,
            stride,
            capacity,
        }
    }

    fn allocate(
        device: &wgpu::Device,
        layout: &wgpu::BindGroupLayout,
        label: &str,
        block_size: u64,
        size: u64,
    ) -> (wgpu::Buffer, wgpu::BindGroup) {
        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(label),
            layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                    buffer: &buffer,
                    offset: 0,
                    size: NonZeroU64::new(block_size),
                }),
            }],
        });
        (buffer, bind_group)
    }

    /// Grow until `blocks` fit
    fn reserve(&mut self, device: &wgpu::Device, layout: &wgpu::BindGroupLayout, blocks: u64) {
        if blocks <= self.capacity {
            return;
        }
        let capacity = blocks.next_power_of_two();
        let (buffer, bind_group) =
            Self::allocate(device, layout, self.label, self.block_size, self.stride * capacity);
        log::debug!("Grew {} to {} blocks", self.label, capacity);
        self.buffer = buffer;
        self.bind_group = bind_group;
        self.capacity = capacity;
    }
}

/// Bytes for a ring, one aligned block per upload
struct StagedBlocks {
    bytes: Vec<u8>,
    stride: usize,
    count: u32,
}

impl StagedBlocks {
    fn new(stride: u64) -> Self {
        Self {
            bytes: Vec::new(),
            stride: stride as usize,
            count: 0,
        }
    }

    /// Append a block and return its dynamic offset
    fn push(&mut self, block: &[u8]) -> u32 {
        let offset = self.bytes.len();
        self.bytes.extend_from_slice(block);
        self.bytes.resize(offset + self.stride, 0);
        self.count += 1;
        offset as u32
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum PassKind {
    Depth,
    Main,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct PipelineKey {
    shaders: ShaderPair,
    blend: BlendState,
    depth: DepthState,
    raster: RasterState,
    pass: PassKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct TextureSetKey {
    slots: [Option<TextureBinding>; TEXTURE_SLOTS],
    sampler: SamplerKind,
}

enum PassTarget {
    Shadow {
        target: u32,
        layer: usize,
        clear_depth: f32,
    },
    Main {
        clear_colour: [f32; 4],
        clear_depth: f32,
    },
}

enum PlannedDraw {
    Mesh {
        pipeline: PipelineKey,
        frame_offset: u32,
        model_offset: u32,
        textures: Option<TextureSetKey>,
        geometry: u32,
        viewport: Option<Viewport>,
    },
    Overlay {
        frame_offset: u32,
        buffer: usize,
        count: u32,
    },
}

struct PlannedPass {
    target: PassTarget,
    draws: Vec<PlannedDraw>,
}

/// State carried between commands while planning
struct Bound {
    shaders: Option<ShaderPair>,
    blend: BlendState,
    depth: DepthState,
    raster: RasterState,
    sampler: SamplerKind,
    slots: [Option<TextureBinding>; TEXTURE_SLOTS],
    frame_offset: Option<u32>,
    model_offset: Option<u32>,
    viewport: Option<Viewport>,
}

impl Default for Bound {
    fn default() -> Self {
        Self {
            shaders: None,
            blend: BlendState::NoBlend,
            depth: DepthState::ReadWrite,
            raster: RasterState::CullBack,
            sampler: SamplerKind::default(),
            slots: [None; TEXTURE_SLOTS],
            frame_offset: None,
            model_offset: None,
            viewport: None,
        }
    }
}

/// Descriptor tables copied out of the state registry
struct PipelineStates {
    raster: [wgpu::PrimitiveState; 3],
    blend: [Option<wgpu::BlendState>; 4],
    depth: [wgpu::DepthStencilState; 3],
}

/// Windowed backend on top of wgpu
pub struct WgpuBackend {
    window: Arc<Window>,
    surface: wgpu::Surface<'static>,
    device: wgpu::Device,
    queue: wgpu::Queue,
    config: wgpu::SurfaceConfiguration,
    size: (u32, u32),
    depth_texture: wgpu::Texture,
    depth_view: wgpu::TextureView,

    frame_layout: wgpu::BindGroupLayout,
    model_layout: wgpu::BindGroupLayout,
    texture_layout: wgpu::BindGroupLayout,
    depth_pipeline_layout: wgpu::PipelineLayout,
    main_pipeline_layout: wgpu::PipelineLayout,
    frame_ring: UniformRing,
    model_ring: UniformRing,
    ui_pipeline: wgpu::RenderPipeline,

    next_handle: u32,
    shaders: FxHashMap<u32, CompiledShader>,
    geometry: FxHashMap<u32, GpuGeometry>,
    textures: FxHashMap<u32, GpuTexture>,
    shadow_targets: FxHashMap<u32, GpuShadowTarget>,
    placeholder: TextureHandle,
    empty_shadow_map: GpuShadowTarget,
    empty_shadow_cube: GpuShadowTarget,

    states: Option<PipelineStates>,
    samplers: FxHashMap<SamplerKind, wgpu::Sampler>,
    shadow_sampler: Option<wgpu::Sampler>,
    pipelines: FxHashMap<PipelineKey, wgpu::RenderPipeline>,
    texture_sets: FxHashMap<TextureSetKey, wgpu::BindGroup>,
}

impl WgpuBackend {
    /// Create the device, swap chain and shared layouts for `window`
    pub async fn new(window: Arc<Window>, vsync: bool) -> Result<Self, RenderError> {
        let size = window.inner_size();
        let size = (size.width.max(1), size.height.max(1));

        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let surface = instance
            .create_surface(Arc::clone(&window))
            .map_err(|e| RenderError::Surface(e.to_string()))?;

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await
            .ok_or(RenderError::NoAdapter)?;

        log::info!("Using GPU: {:?}", adapter.get_info().name);

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("umbra device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::default(),
                    memory_hints: Default::default(),
                },
                None,
            )
            .await
            .map_err(|e| RenderError::Device(e.to_string()))?;

        let surface_caps = surface.get_capabilities(&adapter);
        let surface_format = surface_caps
            .formats
            .iter()
            .find(|f| f.is_srgb())
            .copied()
            .or_else(|| surface_caps.formats.first().copied())
            .ok_or_else(|| RenderError::Surface("surface reports no formats".into()))?;

        let present_mode = if vsync {
            wgpu::PresentMode::AutoVsync
        } else {
            wgpu::PresentMode::AutoNoVsync
        };

        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: surface_format,
            width: size.0,
            height: size.1,
            present_mode,
            alpha_mode: surface_caps
                .alpha_modes
                .first()
                .copied()
                .unwrap_or(wgpu::CompositeAlphaMode::Auto),
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&device, &config);

        let (depth_texture, depth_view) = Self::create_depth_texture(&device, size.0, size.1);

        let frame_layout = uniform_layout(
            &device,
            "frame constants layout",
            std::mem::size_of::<FrameConstants>() as u64,
            wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
        );
        let model_layout = uniform_layout(
            &device,
            "model constants layout",
            std::mem::size_of::<ModelConstants>() as u64,
            wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
        );
        let texture_layout = texture_layout(&device);

        let depth_pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("depth pipeline layout"),
            bind_group_layouts: &[&frame_layout, &model_layout],
            push_constant_ranges: &[],
        });
        let main_pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("main pipeline layout"),
            bind_group_layouts: &[&frame_layout, &model_layout, &texture_layout],
            push_constant_ranges: &[],
        });

        let frame_ring = UniformRing::new(
            &device,
            &frame_layout,
            "frame constants",
            std::mem::size_of::<FrameConstants>() as u64,
            INITIAL_FRAME_BLOCKS,
        );
        let model_ring = UniformRing::new(
            &device,
            &model_layout,
            "model constants",
            std::mem::size_of::<ModelConstants>() as u64,
            INITIAL_MODEL_BLOCKS,
        );

        let ui_pipeline = Self::create_ui_pipeline(&device, &frame_layout, config.format)?;

        let empty_shadow_map = create_shadow_texture(&device, ShadowTargetKind::Flat, 1, "empty shadow map");
        let empty_shadow_cube =
            create_shadow_texture(&device, ShadowTargetKind::Cube, 1, "empty shadow cube");
        clear_shadow_layers(&device, &queue, &[&empty_shadow_map, &empty_shadow_cube]);

        let mut backend = Self {
            window,
            surface,
            device,
            queue,
            config,
            size,
            depth_texture,
            depth_view,
            frame_layout,
            model_layout,
            texture_layout,
            depth_pipeline_layout,
            main_pipeline_layout,
            frame_ring,
            model_ring,
            ui_pipeline,
            next_handle: 0,
            shaders: FxHashMap::default(),
            geometry: FxHashMap::default(),
            textures: FxHashMap::default(),
            shadow_targets: FxHashMap::default(),
            placeholder: TextureHandle(0),
            empty_shadow_map,
            empty_shadow_cube,
            states: None,
            samplers: FxHashMap::default(),
            shadow_sampler: None,
            pipelines: FxHashMap::default(),
            texture_sets: FxHashMap::default(),
        };
        backend.placeholder = backend.create_texture("placeholder", 1, 1, &[255, 255, 255, 255])?;

        Ok(backend)
    }

    fn create_depth_texture(
        device: &wgpu::Device,
        width: u32,
        height: u32,
    ) -> (wgpu::Texture, wgpu::TextureView) {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("main depth buffer"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: DEPTH_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            view_formats: &[],
        });

        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());

        (texture, view)
    }

    fn create_ui_pipeline(
        device: &wgpu::Device,
        frame_layout: &wgpu::BindGroupLayout,
        format: wgpu::TextureFormat,
    ) -> Result<wgpu::RenderPipeline, RenderError> {
        let media = MediaFolders::new();
        let vertex = shaders::resolve("ui_vs", ShaderStage::Vertex, &media)?;
        let pixel = shaders::resolve("ui_ps", ShaderStage::Pixel, &media)?;
        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("ui shader"),
            source: wgpu::ShaderSource::Wgsl(vertex.wgsl.clone()),
        });

        let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("ui pipeline layout"),
            bind_group_layouts: &[frame_layout],
            push_constant_ranges: &[],
        });

        Ok(device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("ui pipeline"),
            layout: Some(&layout),
            vertex: wgpu::VertexState {
                module: &module,
                entry_point: Some(vertex.entry_point.as_str()),
                buffers: &[wgpu::VertexBufferLayout {
                    array_stride: std::mem::size_of::<OverlayRect>() as u64,
                    step_mode: wgpu::VertexStepMode::Instance,
                    attributes: &wgpu::vertex_attr_array![
                        0 => Float32x2, // position
                        1 => Float32x2, // size
                        2 => Float32x4, // colour
                    ],
                }],
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &module,
                entry_point: Some(pixel.entry_point.as_str()),
                targets: &[Some(wgpu::ColorTargetState {
                    format,
                    blend: Some(wgpu::BlendState::ALPHA_BLENDING),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: Default::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                ..Default::default()
            },
            depth_stencil: Some(DepthState::Disabled.depth_stencil()),
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        }))
    }

    /// Resize the swap chain and main depth buffer
    pub fn resize(&mut self, width: u32, height: u32) {
        if width > 0 && height > 0 {
            self.size = (width, height);
            self.config.width = width;
            self.config.height = height;
            self.surface.configure(&self.device, &self.config);

            let (depth_texture, depth_view) =
                Self::create_depth_texture(&self.device, width, height);
            self.depth_texture = depth_texture;
            self.depth_view = depth_view;

            log::debug!("Resized to {}x{}", width, height);
        }
    }

    #[must_use]
    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    #[must_use]
    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    #[must_use]
    pub fn window(&self) -> &Window {
        &self.window
    }

    fn allocate(&mut self) -> u32 {
        self.next_handle += 1;
        self.next_handle
    }

    /// Run `create` inside validation and out-of-memory error scopes
    fn checked<T>(&self, create: impl FnOnce(&wgpu::Device) -> T) -> Result<T, String> {
        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let value = create(&self.device);
        let validation = pollster::block_on(self.device.pop_error_scope());
        let memory = pollster::block_on(self.device.pop_error_scope());
        match validation.or(memory) {
            Some(error) => Err(error.to_string()),
            None => Ok(value),
        }
    }

    fn pipeline(&mut self, key: PipelineKey) -> Result<(), RenderError> {
        if self.pipelines.contains_key(&key) {
            return Ok(());
        }
        let states = self.states.as_ref().ok_or_else(|| RenderError::ResourceCreation {
            resource: "pipeline".into(),
            reason: "states have not been created".into(),
        })?;
        let vertex = self.shaders.get(&key.shaders.vertex.0).ok_or(RenderError::MissingHandle {
            kind: "shader",
            index: key.shaders.vertex.index(),
        })?;
        if vertex.stage != ShaderStage::Vertex {
            return Err(RenderError::ShaderLoad {
                name: format!("shader {}", key.shaders.vertex.index()),
                reason: "bound as a vertex shader".into(),
            });
        }

        let pixel = match (key.pass, key.shaders.pixel) {
            (PassKind::Main, Some(pixel)) => {
                Some(self.shaders.get(&pixel.0).ok_or(RenderError::MissingHandle {
                    kind: "shader",
                    index: pixel.index(),
                })?)
            }
            _ => None,
        };

        let blend = states.blend[key.blend as usize];
        let targets = [Some(wgpu::ColorTargetState {
            format: self.config.format,
            blend,
            write_mask: wgpu::ColorWrites::ALL,
        })];
        let layout = match key.pass {
            PassKind::Depth => &self.depth_pipeline_layout,
            PassKind::Main => &self.main_pipeline_layout,
        };
        let primitive = states.raster[key.raster as usize];
        let depth_stencil = states.depth[key.depth as usize].clone();
        let vertex_buffers = [Vertex::layout()];

        let pipeline = self
            .checked(|device| {
                device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                    label: Some("scene pipeline"),
                    layout: Some(layout),
                    vertex: wgpu::VertexState {
                        module: &vertex.module,
                        entry_point: Some(vertex.entry_point.as_str()),
                        buffers: &vertex_buffers,
                        compilation_options: Default::default(),
                    },
                    fragment: pixel.map(|pixel| wgpu::FragmentState {
                        module: &pixel.module,
                        entry_point: Some(pixel.entry_point.as_str()),
                        targets: &targets,
                        compilation_options: Default::default(),
                    }),
                    primitive,
                    depth_stencil: Some(depth_stencil),
                    multisample: wgpu::MultisampleState::default(),
                    multiview: None,
                    cache: None,
                })
            })
            .map_err(|reason| RenderError::ResourceCreation {
                resource: format!("{:?} pipeline", key.pass),
                reason,
            })?;

        log::debug!(
            "Created pipeline {:?}/{:?}/{:?} for {:?} pass",
            key.blend,
            key.depth,
            key.raster,
            key.pass
        );
        self.pipelines.insert(key, pipeline);
        Ok(())
    }

    fn texture_set(&mut self, key: TextureSetKey) -> Result<(), RenderError> {
        if self.texture_sets.contains_key(&key) {
            return Ok(());
        }
        let filter = self.samplers.get(&key.sampler);
        let (Some(filter), Some(compare)) = (filter, self.shadow_sampler.as_ref()) else {
            return Err(RenderError::ResourceCreation {
                resource: "texture bind group".into(),
                reason: "samplers have not been created".into(),
            });
        };

        let Some(placeholder) = self.textures.get(&self.placeholder.0).map(|t| &t.view) else {
            return Err(RenderError::MissingHandle {
                kind: "texture",
                index: self.placeholder.index(),
            });
        };
        let mut views: [&wgpu::TextureView; TEXTURE_SLOTS] = [placeholder; TEXTURE_SLOTS];
        views[SLOT_SHADOW as usize] = &self.empty_shadow_map.sample_view;
        views[SLOT_SHADOW_CUBE as usize] = &self.empty_shadow_cube.sample_view;

        for (slot, binding) in key.slots.iter().enumerate() {
            let expected = match slot as u32 {
                SLOT_SHADOW => Some(ShadowTargetKind::Flat),
                SLOT_SHADOW_CUBE => Some(ShadowTargetKind::Cube),
                _ => None,
            };
            match (binding, expected) {
                (Some(TextureBinding::Texture(texture)), None) => {
                    if let Some(texture) = self.textures.get(&texture.0) {
                        views[slot] = &texture.view;
                    }
                }
                (Some(TextureBinding::Shadow(target)), Some(kind)) => {
                    match self.shadow_targets.get(&target.0) {
                        Some(target) if target.kind == kind => views[slot] = &target.sample_view,
                        _ => {}
                    }
                }
                (Some(other), _) => {
                    log::warn!("Ignoring {:?} bound to texture slot {}", other, slot);
                }
                (None, _) => {}
            }
        }

        let mut entries: Vec<wgpu::BindGroupEntry> = views
            .iter()
            .enumerate()
            .map(|(slot, view)| wgpu::BindGroupEntry {
                binding: slot as u32,
                resource: wgpu::BindingResource::TextureView(view),
            })
            .collect();
        entries.push(wgpu::BindGroupEntry {
            binding: FILTER_SAMPLER_BINDING,
            resource: wgpu::BindingResource::Sampler(filter),
        });
        entries.push(wgpu::BindGroupEntry {
            binding: COMPARE_SAMPLER_BINDING,
            resource: wgpu::BindingResource::Sampler(compare),
        });

        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("texture set"),
            layout: &self.texture_layout,
            entries: &entries,
        });
        self.texture_sets.insert(key, bind_group);
        Ok(())
    }

    /// Walk the command list and plan the passes it describes
    fn plan(
        &mut self,
        commands: &CommandList,
        frames: &mut StagedBlocks,
        models: &mut StagedBlocks,
        overlays: &mut Vec<wgpu::Buffer>,
    ) -> (Vec<PlannedPass>, bool) {
        let mut passes: Vec<PlannedPass> = Vec::new();
        let mut bound = Bound::default();
        let mut present = false;

        for command in commands {
            match command {
                RenderCommand::BeginDepthPass {
                    target,
                    face,
                    clear_depth,
                } => {
                    passes.push(PlannedPass {
                        target: PassTarget::Shadow {
                            target: target.0,
                            layer: face.map_or(0, CubeFace::layer) as usize,
                            clear_depth: *clear_depth,
                        },
                        draws: Vec::new(),
                    });
                    bound.viewport = None;
                }
                RenderCommand::BeginMainPass {
                    clear_colour,
                    clear_depth,
                } => {
                    passes.push(PlannedPass {
                        target: PassTarget::Main {
                            clear_colour: *clear_colour,
                            clear_depth: *clear_depth,
                        },
                        draws: Vec::new(),
                    });
                    bound.viewport = None;
                }
                RenderCommand::SetViewport(viewport) => bound.viewport = Some(*viewport),
                RenderCommand::SetShaders(pair) => bound.shaders = Some(*pair),
                RenderCommand::DisablePixelShader => {
                    if let Some(pair) = bound.shaders.as_mut() {
                        pair.pixel = None;
                    }
                }
                RenderCommand::SetRasterState(state) => bound.raster = *state,
                RenderCommand::SetBlendState(state) => bound.blend = *state,
                RenderCommand::SetDepthState(state) => bound.depth = *state,
                RenderCommand::SetSampler { kind, .. } => bound.sampler = *kind,
                RenderCommand::BindTexture { slot, binding } => {
                    if let Some(entry) = bound.slots.get_mut(*slot as usize) {
                        *entry = Some(*binding);
                    }
                }
                RenderCommand::UnbindTexture { slot } => {
                    if let Some(entry) = bound.slots.get_mut(*slot as usize) {
                        *entry = None;
                    }
                }
                RenderCommand::UploadFrameConstants(constants) => {
                    bound.frame_offset = Some(frames.push(bytemuck::bytes_of(constants.as_ref())));
                }
                RenderCommand::UploadModelConstants(constants) => {
                    bound.model_offset = Some(models.push(bytemuck::bytes_of(constants.as_ref())));
                }
                RenderCommand::Draw { geometry } => {
                    let Some(pass) = passes.last_mut() else {
                        log::warn!("Draw recorded outside a pass");
                        continue;
                    };
                    let Some(shaders) = bound.shaders else {
                        log::warn!("Draw recorded with no shaders bound");
                        continue;
                    };
                    let kind = match pass.target {
                        PassTarget::Shadow { .. } => PassKind::Depth,
                        PassTarget::Main { .. } => PassKind::Main,
                    };
                    if kind == PassKind::Main && shaders.pixel.is_none() {
                        continue;
                    }

                    let pipeline = PipelineKey {
                        shaders,
                        blend: bound.blend,
                        depth: bound.depth,
                        raster: bound.raster,
                        pass: kind,
                    };
                    let textures = (kind == PassKind::Main).then_some(TextureSetKey {
                        slots: bound.slots,
                        sampler: bound.sampler,
                    });
                    let prepared = self.pipeline(pipeline).and_then(|()| match textures {
                        Some(key) => self.texture_set(key),
                        None => Ok(()),
                    });
                    if let Err(e) = prepared {
                        log::warn!("Skipping draw: {e}");
                        continue;
                    }

                    let frame_offset = *bound
                        .frame_offset
                        .get_or_insert_with(|| frames.push(bytemuck::bytes_of(&FrameConstants::default())));
                    let model_offset = *bound.model_offset.get_or_insert_with(|| {
                        models.push(bytemuck::bytes_of(&ModelConstants::default()))
                    });
                    pass.draws.push(PlannedDraw::Mesh {
                        pipeline,
                        frame_offset,
                        model_offset,
                        textures,
                        geometry: geometry.0,
                        viewport: bound.viewport,
                    });
                }
                RenderCommand::DrawOverlay(rects) => {
                    let Some(pass) = passes.last_mut() else {
                        continue;
                    };
                    if rects.is_empty() || !matches!(pass.target, PassTarget::Main { .. }) {
                        continue;
                    }
                    let buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                        label: Some("overlay rects"),
                        contents: bytemuck::cast_slice(rects),
                        usage: wgpu::BufferUsages::VERTEX,
                    });
                    overlays.push(buffer);
                    let frame_offset = *bound
                        .frame_offset
                        .get_or_insert_with(|| frames.push(bytemuck::bytes_of(&FrameConstants::default())));
                    pass.draws.push(PlannedDraw::Overlay {
                        frame_offset,
                        buffer: overlays.len() - 1,
                        count: rects.len() as u32,
                    });
                }
                RenderCommand::Present => present = true,
            }
        }

        (passes, present)
    }

    fn encode(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        passes: &[PlannedPass],
        surface_view: Option<&wgpu::TextureView>,
        overlays: &[wgpu::Buffer],
    ) {
        for planned in passes {
            let (colour_view, depth_view, colour_load, depth_clear) = match planned.target {
                PassTarget::Shadow {
                    target,
                    layer,
                    clear_depth,
                } => {
                    let Some(view) = self
                        .shadow_targets
                        .get(&target)
                        .and_then(|t| t.layer_views.get(layer))
                    else {
                        continue;
                    };
                    (None, view, None, clear_depth)
                }
                PassTarget::Main {
                    clear_colour,
                    clear_depth,
                } => {
                    let Some(view) = surface_view else {
                        continue;
                    };
                    let [r, g, b, a] = clear_colour.map(f64::from);
                    (
                        Some(view),
                        &self.depth_view,
                        Some(wgpu::Color { r, g, b, a }),
                        clear_depth,
                    )
                }
            };

            let colour_attachments = [colour_view.map(|view| wgpu::RenderPassColorAttachment {
                view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(colour_load.unwrap_or(wgpu::Color::BLACK)),
                    store: wgpu::StoreOp::Store,
                },
            })];

            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some(if colour_view.is_some() { "main pass" } else { "shadow pass" }),
                color_attachments: &colour_attachments[..usize::from(colour_view.is_some())],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: depth_view,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(depth_clear),
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }),
                timestamp_writes: None,
                occlusion_query_set: None,
            });

            let mut current_viewport: Option<Viewport> = None;
            for draw in &planned.draws {
                match draw {
                    PlannedDraw::Mesh {
                        pipeline,
                        frame_offset,
                        model_offset,
                        textures,
                        geometry,
                        viewport,
                    } => {
                        let (Some(pipeline), Some(geometry)) =
                            (self.pipelines.get(pipeline), self.geometry.get(geometry))
                        else {
                            continue;
                        };
                        if *viewport != current_viewport {
                            if let Some(v) = viewport {
                                render_pass
                                    .set_viewport(v.x, v.y, v.width, v.height, v.min_depth, v.max_depth);
                            }
                            current_viewport = *viewport;
                        }
                        render_pass.set_pipeline(pipeline);
                        render_pass.set_bind_group(0, &self.frame_ring.bind_group, &[*frame_offset]);
                        render_pass.set_bind_group(1, &self.model_ring.bind_group, &[*model_offset]);
                        if let Some(set) = textures.and_then(|key| self.texture_sets.get(&key)) {
                            render_pass.set_bind_group(2, set, &[]);
                        }
                        render_pass.set_vertex_buffer(0, geometry.vertex_buffer.slice(..));
                        render_pass
                            .set_index_buffer(geometry.index_buffer.slice(..), wgpu::IndexFormat::Uint32);
                        render_pass.draw_indexed(0..geometry.index_count, 0, 0..1);
                    }
                    PlannedDraw::Overlay {
                        frame_offset,
                        buffer,
                        count,
                    } => {
                        render_pass.set_pipeline(&self.ui_pipeline);
                        render_pass.set_bind_group(0, &self.frame_ring.bind_group, &[*frame_offset]);
                        render_pass.set_vertex_buffer(0, overlays[*buffer].slice(..));
                        // 6 vertices per rect instance
                        render_pass.draw(0..6, 0..*count);
                    }
                }
            }
        }
    }
}

impl RenderBackend for WgpuBackend {
    fn create_shader(&mut self, source: &ShaderSource) -> Result<ShaderHandle, RenderError> {
        let module = self
            .checked(|device| {
                device.create_shader_module(wgpu::ShaderModuleDescriptor {
                    label: Some(&source.name),
                    source: wgpu::ShaderSource::Wgsl(source.wgsl.clone()),
                })
            })
            .map_err(|reason| RenderError::ShaderLoad {
                name: source.name.clone(),
                reason,
            })?;

        let handle = self.allocate();
        self.shaders.insert(
            handle,
            CompiledShader {
                module,
                entry_point: source.entry_point.clone(),
                stage: source.stage,
            },
        );
        log::debug!("Compiled shader '{}'", source.name);
        Ok(ShaderHandle(handle))
    }

    fn create_states(&mut self, registry: &StateRegistry) -> Result<(), RenderError> {
        let mut samplers = FxHashMap::default();
        for kind in SamplerKind::ALL {
            let sampler = self
                .checked(|device| device.create_sampler(registry.sampler(kind)))
                .map_err(|reason| RenderError::ResourceCreation {
                    resource: format!("{} sampler", kind.name()),
                    reason,
                })?;
            samplers.insert(kind, sampler);
        }
        let shadow_sampler = self
            .checked(|device| device.create_sampler(registry.shadow_sampler()))
            .map_err(|reason| RenderError::ResourceCreation {
                resource: "shadow sampler".into(),
                reason,
            })?;

        self.samplers = samplers;
        self.shadow_sampler = Some(shadow_sampler);
        self.states = Some(PipelineStates {
            raster: RasterState::ALL.map(|state| *registry.raster(state)),
            blend: BlendState::ALL.map(|state| registry.blend(state)),
            depth: DepthState::ALL.map(|state| registry.depth(state).clone()),
        });
        self.pipelines.clear();
        self.texture_sets.clear();
        Ok(())
    }

    fn upload_geometry(
        &mut self,
        label: &str,
        vertices: &[Vertex],
        indices: &[u32],
    ) -> Result<GeometryHandle, RenderError> {
        if vertices.is_empty() || indices.is_empty() {
            return Err(RenderError::ResourceCreation {
                resource: format!("geometry '{label}'"),
                reason: "no vertices or indices".into(),
            });
        }

        let (vertex_buffer, index_buffer) = self
            .checked(|device| {
                let vertex_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some(label),
                    contents: bytemuck::cast_slice(vertices),
                    usage: wgpu::BufferUsages::VERTEX,
                });
                let index_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some(label),
                    contents: bytemuck::cast_slice(indices),
                    usage: wgpu::BufferUsages::INDEX,
                });
                (vertex_buffer, index_buffer)
            })
            .map_err(|reason| RenderError::ResourceCreation {
                resource: format!("geometry '{label}'"),
                reason,
            })?;

        let handle = self.allocate();
        self.geometry.insert(
            handle,
            GpuGeometry {
                vertex_buffer,
                index_buffer,
                index_count: indices.len() as u32,
            },
        );
        Ok(GeometryHandle(handle))
    }

    fn create_texture(
        &mut self,
        label: &str,
        width: u32,
        height: u32,
        rgba: &[u8],
    ) -> Result<TextureHandle, RenderError> {
        if rgba.len() != (width * height * 4) as usize {
            return Err(RenderError::ResourceCreation {
                resource: format!("texture '{label}'"),
                reason: format!("expected {} bytes, got {}", width * height * 4, rgba.len()),
            });
        }

        let size = wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        };
        let texture = self
            .checked(|device| {
                device.create_texture(&wgpu::TextureDescriptor {
                    label: Some(label),
                    size,
                    mip_level_count: 1,
                    sample_count: 1,
                    dimension: wgpu::TextureDimension::D2,
                    format: wgpu::TextureFormat::Rgba8UnormSrgb,
                    usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
                    view_formats: &[],
                })
            })
            .map_err(|reason| RenderError::ResourceCreation {
                resource: format!("texture '{label}'"),
                reason,
            })?;

        self.queue.write_texture(
            wgpu::ImageCopyTexture {
                texture: &texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            rgba,
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(4 * width),
                rows_per_image: Some(height),
            },
            size,
        );

        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let handle = self.allocate();
        self.textures.insert(
            handle,
            GpuTexture {
                _texture: texture,
                view,
            },
        );
        Ok(TextureHandle(handle))
    }

    fn placeholder_texture(&self) -> TextureHandle {
        self.placeholder
    }

    fn create_shadow_target(
        &mut self,
        kind: ShadowTargetKind,
        resolution: u32,
    ) -> Result<ShadowTargetHandle, RenderError> {
        let target = self
            .checked(|device| create_shadow_texture(device, kind, resolution, "shadow map"))
            .map_err(|reason| RenderError::ResourceCreation {
                resource: format!("{kind:?} shadow map"),
                reason,
            })?;
        let handle = self.allocate();
        self.shadow_targets.insert(handle, target);
        log::debug!("Created {:?} shadow map {}x{}", kind, resolution, resolution);
        Ok(ShadowTargetHandle(handle))
    }

    fn release_geometry(&mut self, geometry: GeometryHandle) {
        self.geometry.remove(&geometry.0);
    }

    fn release_texture(&mut self, texture: TextureHandle) {
        if texture != self.placeholder && self.textures.remove(&texture.0).is_some() {
            self.texture_sets.clear();
        }
    }

    fn release_shadow_target(&mut self, target: ShadowTargetHandle) {
        if self.shadow_targets.remove(&target.0).is_some() {
            self.texture_sets.clear();
        }
    }

    fn viewport_size(&self) -> (u32, u32) {
        self.size
    }

    fn submit(&mut self, commands: &CommandList) -> Result<(), RenderError> {
        let mut frames = StagedBlocks::new(self.frame_ring.stride);
        let mut models = StagedBlocks::new(self.model_ring.stride);
        let mut overlays = Vec::new();
        let (passes, present) = self.plan(commands, &mut frames, &mut models, &mut overlays);

        self.frame_ring
            .reserve(&self.device, &self.frame_layout, u64::from(frames.count));
        self.model_ring
            .reserve(&self.device, &self.model_layout, u64::from(models.count));
        if !frames.bytes.is_empty() {
            self.queue.write_buffer(&self.frame_ring.buffer, 0, &frames.bytes);
        }
        if !models.bytes.is_empty() {
            self.queue.write_buffer(&self.model_ring.buffer, 0, &models.bytes);
        }

        let needs_surface = passes
            .iter()
            .any(|pass| matches!(pass.target, PassTarget::Main { .. }));
        let output = if needs_surface {
            match self.surface.get_current_texture() {
                Ok(output) => Some(output),
                Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                    log::warn!("Surface lost, reconfiguring");
                    self.surface.configure(&self.device, &self.config);
                    return Ok(());
                }
                Err(wgpu::SurfaceError::Timeout) => {
                    log::warn!("Timed out acquiring the next frame");
                    return Ok(());
                }
                Err(e) => return Err(RenderError::Surface(e.to_string())),
            }
        } else {
            None
        };
        let surface_view = output
            .as_ref()
            .map(|output| output.texture.create_view(&wgpu::TextureViewDescriptor::default()));

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("frame encoder"),
            });
        self.encode(&mut encoder, &passes, surface_view.as_ref(), &overlays);
        self.queue.submit(std::iter::once(encoder.finish()));

        if let Some(output) = output {
            if present {
                output.present();
            }
        }
        Ok(())
    }

    fn set_title(&mut self, title: &str) {
        self.window.set_title(title);
    }
}

fn uniform_layout(
    device: &wgpu::Device,
    label: &str,
    size: u64,
    visibility: wgpu::ShaderStages,
) -> wgpu::BindGroupLayout {
    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some(label),
        entries: &[wgpu::BindGroupLayoutEntry {
            binding: 0,
            visibility,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: true,
                min_binding_size: NonZeroU64::new(size),
            },
            count: None,
        }],
    })
}

fn texture_layout(device: &wgpu::Device) -> wgpu::BindGroupLayout {
    let colour = |binding: u32| wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::FRAGMENT,
        ty: wgpu::BindingType::Texture {
            sample_type: wgpu::TextureSampleType::Float { filterable: true },
            view_dimension: wgpu::TextureViewDimension::D2,
            multisampled: false,
        },
        count: None,
    };
    let depth = |binding: u32, view_dimension| wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::FRAGMENT,
        ty: wgpu::BindingType::Texture {
            sample_type: wgpu::TextureSampleType::Depth,
            view_dimension,
            multisampled: false,
        },
        count: None,
    };

    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("texture set layout"),
        entries: &[
            colour(0),
            colour(1),
            depth(SLOT_SHADOW, wgpu::TextureViewDimension::D2),
            colour(3),
            depth(SLOT_SHADOW_CUBE, wgpu::TextureViewDimension::Cube),
            wgpu::BindGroupLayoutEntry {
                binding: FILTER_SAMPLER_BINDING,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                count: None,
            },
            wgpu::BindGroupLayoutEntry {
                binding: COMPARE_SAMPLER_BINDING,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Comparison),
                count: None,
            },
        ],
    })
}

fn create_shadow_texture(
    device: &wgpu::Device,
    kind: ShadowTargetKind,
    resolution: u32,
    label: &str,
) -> GpuShadowTarget {
    let layers = kind.layers();
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some(label),
        size: wgpu::Extent3d {
            width: resolution,
            height: resolution,
            depth_or_array_layers: layers,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: DEPTH_FORMAT,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING,
        view_formats: &[],
    });

    let layer_views = (0..layers)
        .map(|layer| {
            texture.create_view(&wgpu::TextureViewDescriptor {
                label: Some(label),
                dimension: Some(wgpu::TextureViewDimension::D2),
                base_array_layer: layer,
                array_layer_count: Some(1),
                ..Default::default()
            })
        })
        .collect();

    let sample_view = texture.create_view(&wgpu::TextureViewDescriptor {
        label: Some(label),
        dimension: Some(match kind {
            ShadowTargetKind::Flat => wgpu::TextureViewDimension::D2,
            ShadowTargetKind::Cube => wgpu::TextureViewDimension::Cube,
        }),
        array_layer_count: Some(layers),
        ..Default::default()
    });

    GpuShadowTarget {
        _texture: texture,
        kind,
        layer_views,
        sample_view,
    }
}

/// Clear every layer of the given shadow targets to far depth
fn clear_shadow_layers(device: &wgpu::Device, queue: &wgpu::Queue, targets: &[&GpuShadowTarget]) {
    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("clear shadow maps"),
    });
    for view in targets.iter().flat_map(|target| target.layer_views.iter()) {
        encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("clear shadow map"),
            color_attachments: &[],
            depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                view,
                depth_ops: Some(wgpu::Operations {
                    load: wgpu::LoadOp::Clear(1.0),
                    store: wgpu::StoreOp::Store,
                }),
                stencil_ops: None,
            }),
            timestamp_writes: None,
            occlusion_query_set: None,
        });
    }
    queue.submit(std::iter::once(encoder.finish()));
}
