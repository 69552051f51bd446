//! Windowless backend
//!
//! Keeps every submitted frame for inspection and rasterises depth passes on
//! the CPU, so shadow depth written by a frame can be read back without a GPU.
//! Colour passes are recorded but not shaded.

use glam::{Mat4, Vec2, Vec3, Vec4};
use rustc_hash::FxHashMap;

use super::backend::{
    GeometryHandle, RenderBackend, RenderError, ShaderHandle, ShadowTargetHandle, TextureHandle,
};
use super::commands::{CommandList, RenderCommand};
use super::mesh::Vertex;
use super::shaders::ShaderSource;
use super::shadow::{CubeFace, ShadowTargetKind};
use super::states::{RasterState, StateRegistry};

struct Geometry {
    positions: Vec<Vec3>,
    indices: Vec<u32>,
}

struct DepthTarget {
    kind: ShadowTargetKind,
    resolution: u32,
    /// One depth buffer per layer, row-major
    layers: Vec<Vec<f32>>,
}

/// Backend that records frames and rasterises shadow depth in software
pub struct HeadlessBackend {
    size: (u32, u32),
    next_handle: u32,
    shaders: FxHashMap<u32, String>,
    geometry: FxHashMap<u32, Geometry>,
    textures: FxHashMap<u32, (u32, u32)>,
    shadow_targets: FxHashMap<u32, DepthTarget>,
    placeholder: TextureHandle,
    states_created: bool,
    fail_shadow_targets: bool,
    fail_states: bool,
    frames: Vec<CommandList>,
    titles: Vec<String>,
}

impl HeadlessBackend {
    #[must_use]
    pub fn new(width: u32, height: u32) -> Self {
        let mut backend = Self {
            size: (width.max(1), height.max(1)),
            next_handle: 0,
            shaders: FxHashMap::default(),
            geometry: FxHashMap::default(),
            textures: FxHashMap::default(),
            shadow_targets: FxHashMap::default(),
            placeholder: TextureHandle(0),
            states_created: false,
            fail_shadow_targets: false,
            fail_states: false,
            frames: Vec::new(),
            titles: Vec::new(),
        };
        let placeholder = backend.allocate();
        backend.textures.insert(placeholder, (1, 1));
        backend.placeholder = TextureHandle(placeholder);
        backend
    }

    fn allocate(&mut self) -> u32 {
        self.next_handle += 1;
        self.next_handle
    }

    /// Make every later shadow target creation fail
    pub fn fail_shadow_targets(&mut self, fail: bool) {
        self.fail_shadow_targets = fail;
    }

    /// Make state creation fail
    pub fn fail_states(&mut self, fail: bool) {
        self.fail_states = fail;
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        self.size = (width.max(1), height.max(1));
    }

    /// Every frame submitted so far
    #[must_use]
    pub fn frames(&self) -> &[CommandList] {
        &self.frames
    }

    #[must_use]
    pub fn last_frame(&self) -> Option<&CommandList> {
        self.frames.last()
    }

    /// Window titles set so far
    #[must_use]
    pub fn titles(&self) -> &[String] {
        &self.titles
    }

    #[must_use]
    pub fn states_created(&self) -> bool {
        self.states_created
    }

    /// Name a shader was created with
    #[must_use]
    pub fn shader_name(&self, shader: ShaderHandle) -> Option<&str> {
        self.shaders.get(&shader.0).map(String::as_str)
    }

    #[must_use]
    pub fn geometry_count(&self) -> usize {
        self.geometry.len()
    }

    /// Live textures, including the placeholder
    #[must_use]
    pub fn texture_count(&self) -> usize {
        self.textures.len()
    }

    #[must_use]
    pub fn shadow_target_count(&self) -> usize {
        self.shadow_targets.len()
    }

    /// Depth stored in a shadow target. `face` selects the cube layer.
    #[must_use]
    pub fn shadow_depth(
        &self,
        target: ShadowTargetHandle,
        face: Option<CubeFace>,
        x: u32,
        y: u32,
    ) -> Option<f32> {
        let target = self.shadow_targets.get(&target.0)?;
        let layer = face.map_or(0, CubeFace::layer) as usize;
        if x >= target.resolution || y >= target.resolution {
            return None;
        }
        target
            .layers
            .get(layer)?
            .get((y * target.resolution + x) as usize)
            .copied()
    }

    /// Smallest depth anywhere in a shadow target layer
    #[must_use]
    pub fn min_shadow_depth(&self, target: ShadowTargetHandle, face: Option<CubeFace>) -> Option<f32> {
        let target = self.shadow_targets.get(&target.0)?;
        let layer = face.map_or(0, CubeFace::layer) as usize;
        target.layers.get(layer)?.iter().copied().reduce(f32::min)
    }

    fn replay(&mut self, commands: &CommandList) -> Result<(), RenderError> {
        let mut view_projection = Mat4::IDENTITY;
        let mut world = Mat4::IDENTITY;
        let mut raster = RasterState::CullBack;
        let mut depth_target: Option<(u32, usize)> = None;

        for command in commands {
            match command {
                RenderCommand::BeginDepthPass {
                    target,
                    face,
                    clear_depth,
                } => {
                    let layer = face.map_or(0, CubeFace::layer) as usize;
                    let buffer = self
                        .shadow_targets
                        .get_mut(&target.0)
                        .and_then(|t| t.layers.get_mut(layer))
                        .ok_or(RenderError::MissingHandle {
                            kind: "shadow target",
                            index: target.index(),
                        })?;
                    buffer.fill(*clear_depth);
                    depth_target = Some((target.0, layer));
                }
                RenderCommand::BeginMainPass { .. } => depth_target = None,
                RenderCommand::UploadFrameConstants(constants) => {
                    view_projection = constants.view_projection();
                }
                RenderCommand::UploadModelConstants(constants) => world = constants.world(),
                RenderCommand::SetRasterState(state) => raster = *state,
                RenderCommand::Draw { geometry } => {
                    let mesh = self.geometry.get(&geometry.0).ok_or(RenderError::MissingHandle {
                        kind: "geometry",
                        index: geometry.index(),
                    })?;
                    let Some((target, layer)) = depth_target else {
                        continue;
                    };
                    if let Some(target) = self.shadow_targets.get_mut(&target) {
                        let resolution = target.resolution;
                        rasterise_depth(
                            mesh,
                            &(view_projection * world),
                            raster,
                            resolution,
                            &mut target.layers[layer],
                        );
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }
}

impl RenderBackend for HeadlessBackend {
    fn create_shader(&mut self, source: &ShaderSource) -> Result<ShaderHandle, RenderError> {
        let handle = self.allocate();
        self.shaders.insert(handle, source.name.clone());
        Ok(ShaderHandle(handle))
    }

    fn create_states(&mut self, _registry: &StateRegistry) -> Result<(), RenderError> {
        if self.fail_states {
            return Err(RenderError::ResourceCreation {
                resource: "sampler states".into(),
                reason: "creation disabled".into(),
            });
        }
        self.states_created = true;
        Ok(())
    }

    fn upload_geometry(
        &mut self,
        _label: &str,
        vertices: &[Vertex],
        indices: &[u32],
    ) -> Result<GeometryHandle, RenderError> {
        let handle = self.allocate();
        self.geometry.insert(
            handle,
            Geometry {
                positions: vertices.iter().map(|v| Vec3::from(v.position)).collect(),
                indices: indices.to_vec(),
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
        let handle = self.allocate();
        self.textures.insert(handle, (width, height));
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
        if self.fail_shadow_targets || resolution == 0 {
            return Err(RenderError::ResourceCreation {
                resource: "shadow depth buffer".into(),
                reason: format!("cannot create {resolution}x{resolution} target"),
            });
        }
        let handle = self.allocate();
        let texels = (resolution * resolution) as usize;
        self.shadow_targets.insert(
            handle,
            DepthTarget {
                kind,
                resolution,
                layers: vec![vec![1.0; texels]; kind.layers() as usize],
            },
        );
        Ok(ShadowTargetHandle(handle))
    }

    fn release_geometry(&mut self, geometry: GeometryHandle) {
        self.geometry.remove(&geometry.0);
    }

    fn release_texture(&mut self, texture: TextureHandle) {
        if texture != self.placeholder {
            self.textures.remove(&texture.0);
        }
    }

    fn release_shadow_target(&mut self, target: ShadowTargetHandle) {
        self.shadow_targets.remove(&target.0);
    }

    fn viewport_size(&self) -> (u32, u32) {
        self.size
    }

    fn submit(&mut self, commands: &CommandList) -> Result<(), RenderError> {
        self.replay(commands)?;
        self.frames.push(commands.clone());
        Ok(())
    }

    fn set_title(&mut self, title: &str) {
        self.titles.push(title.to_string());
    }
}

impl std::fmt::Debug for HeadlessBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeadlessBackend")
            .field("size", &self.size)
            .field("geometry", &self.geometry.len())
            .field("textures", &self.textures.len())
            .field(
                "shadow_targets",
                &self
                    .shadow_targets
                    .values()
                    .map(|t| (t.kind, t.resolution))
                    .collect::<Vec<_>>(),
            )
            .field("frames", &self.frames.len())
            .finish()
    }
}

/// Write the depth of every covered texel centre, keeping the nearest
fn rasterise_depth(
    mesh: &Geometry,
    transform: &Mat4,
    raster: RasterState,
    resolution: u32,
    depth: &mut [f32],
) {
    let size = resolution as f32;
    for triangle in mesh.indices.chunks_exact(3) {
        let corners = [0, 1, 2].map(|i| mesh.positions.get(triangle[i] as usize).copied());
        let [Some(a), Some(b), Some(c)] = corners else {
            continue;
        };
        let clip: [Vec4; 3] = [a, b, c].map(|p| *transform * p.extend(1.0));
        // No near-plane clipping: triangles crossing behind the viewer are skipped
        if clip.iter().any(|c| c.w <= 0.0) {
            continue;
        }
        let ndc = clip.map(|c| c.truncate() / c.w);

        // Clockwise in y-up device space is a front face
        let area = (ndc[1].x - ndc[0].x) * (ndc[2].y - ndc[0].y)
            - (ndc[1].y - ndc[0].y) * (ndc[2].x - ndc[0].x);
        let culled = match raster {
            RasterState::CullBack => area >= 0.0,
            RasterState::CullFront => area <= 0.0,
            RasterState::CullNone => area == 0.0,
        };
        if culled {
            continue;
        }

        let screen = ndc.map(|p| Vec2::new((p.x * 0.5 + 0.5) * size, (0.5 - p.y * 0.5) * size));
        let min = screen[0].min(screen[1]).min(screen[2]).floor().max(Vec2::ZERO);
        let max = screen[0]
            .max(screen[1])
            .max(screen[2])
            .ceil()
            .min(Vec2::splat(size));

        let edge = |a: Vec2, b: Vec2, p: Vec2| (b.x - a.x) * (p.y - a.y) - (b.y - a.y) * (p.x - a.x);
        let total = edge(screen[0], screen[1], screen[2]);

        for y in min.y as u32..max.y as u32 {
            for x in min.x as u32..max.x as u32 {
                let p = Vec2::new(x as f32 + 0.5, y as f32 + 0.5);
                let w0 = edge(screen[1], screen[2], p) / total;
                let w1 = edge(screen[2], screen[0], p) / total;
                let w2 = edge(screen[0], screen[1], p) / total;
                if w0 < 0.0 || w1 < 0.0 || w2 < 0.0 {
                    continue;
                }
                let z = w0 * ndc[0].z + w1 * ndc[1].z + w2 * ndc[2].z;
                if !(0.0..=1.0).contains(&z) {
                    continue;
                }
                let texel = &mut depth[(y * resolution + x) as usize];
                if z < *texel {
                    *texel = z;
                }
            }
        }
    }
}
