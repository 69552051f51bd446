//! Scene orchestration
//!
//! [`Scene`] owns the camera, the state registry, the frame constants and the
//! model and light arenas. [`Scene::render_scene`] records one frame in a fixed
//! order and hands it to the backend:
//!
//! 1. walk the model arena in insertion order
//! 2. take the input state the engine has already pumped
//! 3. update the camera fields of the frame constants
//! 4. clear the shadow light's depth target and set up its pass (six passes for a point light)
//! 5. draw every shadow-casting model into it without colour output
//! 6. write each light's contribution into the frame constants, in slot order
//! 7. switch to the back buffer and main depth buffer and clear both
//! 8. set the main viewport and bind the shadow map for shading
//! 9. draw every model from the camera with the state triple of its blend mode
//! 10. run camera control and refresh the frame-time title
//! 11. unbind the shadow map
//! 12. present

use glam::{Mat4, Vec3};

use crate::assets::{AssetCache, AssetHandle, MediaFolders};
use crate::core::debug::TitleCounter;
use crate::input::Input;

use super::backend::{RenderBackend, RenderError};
use super::camera::{Camera, CameraKeys};
use super::commands::{
    CommandList, RenderCommand, SLOT_DIFFUSE, SLOT_SHADOW, SLOT_SHADOW_CUBE, ShaderPair,
    TextureBinding, Viewport,
};
use super::constants::{ConstantStore, FrameConstants};
use super::import::load_gltf;
use super::lights::{Light, LightArena, LightDesc, LightError, LightId};
use super::mesh::{Mesh, MeshData, MeshError};
use super::model::{Model, ModelId, RenderPass, TextureSlot};
use super::overlay::{CautionBanner, Overlay};
use super::shaders::{self, ShaderStage};
use super::shadow::{
    CubeFace, ShadowConfig, ShadowTargetKind, ShadowTechnique, cube_face_projection,
};
use super::states::{BlendMode, BlendState, DepthState, RasterState, SamplerKind, StateRegistry};

/// Models further than this from the camera are skipped, outside the always-render prefix
pub const DEFAULT_RENDER_DISTANCE: f32 = 400.0;

/// Number of models at the front of the arena drawn regardless of distance
pub const DEFAULT_ALWAYS_RENDER: usize = 15;

/// Scene-wide render settings
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct SceneConfig {
    /// Base of the frame-time window title
    pub title: String,
    pub background_colour: [f32; 4],
    pub render_distance: f32,
    pub always_render: usize,
    pub shadow: ShadowConfig,
    /// Height map UV shift while parallax is on
    pub parallax_depth: f32,
    /// Clamp the camera to this height after control, if set
    pub camera_height_lock: Option<f32>,
    /// Show the start-up caution banner
    pub caution_banner: bool,
}

impl Default for SceneConfig {
    fn default() -> Self {
        Self {
            title: String::from("umbra"),
            background_colour: [0.2, 0.2, 0.3, 1.0],
            render_distance: DEFAULT_RENDER_DISTANCE,
            always_render: DEFAULT_ALWAYS_RENDER,
            shadow: ShadowConfig::default(),
            parallax_depth: 0.08,
            camera_height_lock: None,
            caution_banner: true,
        }
    }
}

/// Shader pairs every scene loads at start-up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StandardShaders {
    /// Lit, textured and shadowed
    pub main: ShaderPair,
    /// Position transform only, no pixel stage
    pub depth_only: ShaderPair,
    /// Flat tinted texture used for light proxies
    pub light_model: ShaderPair,
}

impl StandardShaders {
    fn load(backend: &mut dyn RenderBackend, media: &MediaFolders) -> Result<Self, RenderError> {
        let mut compile = |name: &str, stage| -> Result<_, RenderError> {
            let source = shaders::resolve(name, stage, media)?;
            backend.create_shader(&source)
        };

        Ok(Self {
            main: ShaderPair::new(
                compile("main_vs", ShaderStage::Vertex)?,
                compile("main_ps", ShaderStage::Pixel)?,
            ),
            depth_only: ShaderPair::depth_only(compile("depth_only_vs", ShaderStage::Vertex)?),
            light_model: ShaderPair::new(
                compile("light_model_vs", ShaderStage::Vertex)?,
                compile("light_model_ps", ShaderStage::Pixel)?,
            ),
        })
    }
}

pub struct Scene {
    camera: Camera,
    camera_keys: CameraKeys,
    states: StateRegistry,
    frame: ConstantStore<FrameConstants>,
    models: Vec<Model>,
    lights: LightArena,
    shadow_light: LightId,
    config: SceneConfig,
    media: MediaFolders,
    meshes: AssetCache<Mesh>,
    shaders: StandardShaders,
    sampler: SamplerKind,
    parallax: bool,
    overlay: Box<dyn Overlay>,
    commands: CommandList,
    title: TitleCounter,
    total_time: f32,
}

impl Scene {
    /// Create the GPU states and standard shaders.
    ///
    /// Fails if the backend cannot create either, in which case nothing can be drawn.
    pub fn new(
        config: SceneConfig,
        media: MediaFolders,
        backend: &mut dyn RenderBackend,
    ) -> Result<Self, RenderError> {
        let states = StateRegistry::new();
        backend.create_states(&states)?;
        let shaders = StandardShaders::load(backend, &media)?;

        let mut camera = Camera::default();
        let (width, height) = backend.viewport_size();
        camera.set_aspect(width, height);

        let overlay: Box<dyn Overlay> = if config.caution_banner {
            Box::new(CautionBanner::default())
        } else {
            Box::new(super::overlay::NoOverlay)
        };

        log::info!("Scene '{}' initialised", config.title);

        Ok(Self {
            camera,
            camera_keys: CameraKeys::default(),
            states,
            frame: ConstantStore::default(),
            models: Vec::new(),
            lights: LightArena::new(),
            shadow_light: LightId(0),
            title: TitleCounter::new(config.title.clone()),
            config,
            media,
            meshes: AssetCache::new(),
            shaders,
            sampler: SamplerKind::default(),
            parallax: true,
            overlay,
            commands: CommandList::new(),
            total_time: 0.0,
        })
    }

    #[must_use]
    pub fn camera(&self) -> &Camera {
        &self.camera
    }

    pub fn camera_mut(&mut self) -> &mut Camera {
        &mut self.camera
    }

    pub fn set_camera_keys(&mut self, keys: CameraKeys) {
        self.camera_keys = keys;
    }

    #[must_use]
    pub fn states(&self) -> &StateRegistry {
        &self.states
    }

    #[must_use]
    pub fn config(&self) -> &SceneConfig {
        &self.config
    }

    #[must_use]
    pub fn shaders(&self) -> StandardShaders {
        self.shaders
    }

    #[must_use]
    pub fn media(&self) -> &MediaFolders {
        &self.media
    }

    pub fn media_mut(&mut self) -> &mut MediaFolders {
        &mut self.media
    }

    /// Current CPU copy of the frame constants
    #[must_use]
    pub fn frame_constants(&self) -> FrameConstants {
        self.frame.get()
    }

    /// Bytes of the last frame constants pushed
    #[must_use]
    pub fn pushed_frame_constants(&self) -> FrameConstants {
        self.frame.readback()
    }

    pub fn set_day_night(&mut self, amount: f32) {
        let mut frame = self.frame.get();
        frame.day_night_cycle = amount;
        self.frame.set(frame);
    }

    pub fn set_blend_amount(&mut self, amount: f32) {
        let mut frame = self.frame.get();
        frame.blend_amount = amount;
        self.frame.set(frame);
    }

    /// Filter used for model textures in the main pass
    pub fn set_sampler(&mut self, sampler: SamplerKind) {
        self.sampler = sampler;
    }

    #[must_use]
    pub fn sampler(&self) -> SamplerKind {
        self.sampler
    }

    /// Filtering for shadow lookups from the next frame on
    pub fn set_shadow_technique(&mut self, technique: ShadowTechnique) {
        if self.config.shadow.technique != technique {
            log::info!("Shadow technique set to {technique:?}");
        }
        self.config.shadow.technique = technique;
    }

    /// Turn height map parallax on or off
    pub fn set_parallax(&mut self, enabled: bool) {
        self.parallax = enabled;
    }

    #[must_use]
    pub fn parallax(&self) -> bool {
        self.parallax
    }

    pub fn set_overlay(&mut self, overlay: Box<dyn Overlay>) {
        self.overlay = overlay;
    }

    /// Seconds rendered so far
    #[must_use]
    pub fn total_time(&self) -> f32 {
        self.total_time
    }

    /// Load a mesh once per name: `primitive:<shape>` or a glTF file in the media folders
    pub fn load_mesh(
        &mut self,
        name: &str,
        backend: &mut dyn RenderBackend,
    ) -> Result<AssetHandle<Mesh>, MeshError> {
        let media = &self.media;
        self.meshes.get_or_try_load(name, || {
            let data = match MeshData::primitive(name) {
                Some(data) => data,
                None => {
                    let path = media
                        .resolve(name)
                        .ok_or_else(|| MeshError::NotFound(name.to_string()))?;
                    load_gltf(path)?
                }
            };
            Mesh::upload(data, backend)
        })
    }

    /// Add a model to the end of the arena
    pub fn add_model(&mut self, model: Model) -> ModelId {
        self.models.push(model);
        ModelId(self.models.len() - 1)
    }

    /// Load `mesh_name` and place a model of it using the main shaders.
    ///
    /// The mesh's default diffuse texture is bound when it has one.
    pub fn create_model(
        &mut self,
        mesh_name: &str,
        backend: &mut dyn RenderBackend,
    ) -> Result<ModelId, MeshError> {
        let mesh = self.load_mesh(mesh_name, backend)?;
        let diffuse = mesh.get().default_diffuse_texture().map(str::to_owned);
        let mut model = Model::new(mesh, self.shaders.main);
        if let Some(texture) = diffuse {
            model.set_skin(&texture, &self.media, backend);
        }
        Ok(self.add_model(model))
    }

    #[must_use]
    pub fn model(&self, id: ModelId) -> Option<&Model> {
        self.models.get(id.0)
    }

    pub fn model_mut(&mut self, id: ModelId) -> Option<&mut Model> {
        self.models.get_mut(id.0)
    }

    /// Every model in draw order
    #[must_use]
    pub fn models(&self) -> &[Model] {
        &self.models
    }

    /// Create a light with a proxy model of `mesh` at `position`.
    ///
    /// The proxy is drawn with the light model shaders and additive blending,
    /// tinted with the light colour, and never casts shadows. If the light
    /// cannot be created the proxy is removed again.
    pub fn add_light(
        &mut self,
        desc: LightDesc,
        mesh: AssetHandle<Mesh>,
        position: Vec3,
        backend: &mut dyn RenderBackend,
    ) -> Result<LightId, LightError> {
        let mut model = Model::new(mesh, self.shaders.light_model)
            .with_position(position)
            .with_blend_mode(BlendMode::Additive);
        model.set_casts_shadows(false);
        model.set_tint(desc.colour);
        let model_id = self.add_model(model);

        match self.lights.create(desc, model_id, backend, &self.config.shadow) {
            Ok(id) => {
                log::info!("Added {:?} light in slot {}", desc.kind, id.slot());
                Ok(id)
            }
            Err(e) => {
                self.models.pop();
                Err(e)
            }
        }
    }

    #[must_use]
    pub fn light(&self, id: LightId) -> Option<&Light> {
        self.lights.get(id)
    }

    pub fn light_mut(&mut self, id: LightId) -> Option<&mut Light> {
        self.lights.get_mut(id)
    }

    #[must_use]
    pub fn lights(&self) -> &LightArena {
        &self.lights
    }

    /// The proxy model that places a light
    pub fn light_model_mut(&mut self, id: LightId) -> Option<&mut Model> {
        let model = self.lights.get(id)?.model();
        self.models.get_mut(model.0)
    }

    /// Choose which light renders shadows. Only one light does.
    pub fn set_shadow_light(&mut self, id: LightId) {
        self.shadow_light = id;
    }

    #[must_use]
    pub fn shadow_light(&self) -> LightId {
        self.shadow_light
    }

    /// Commands recorded for the last frame
    #[must_use]
    pub fn last_commands(&self) -> &CommandList {
        &self.commands
    }

    fn light_world(&self, light: &Light) -> Mat4 {
        self.models
            .get(light.model().0)
            .map_or(Mat4::IDENTITY, Model::world_matrix)
    }

    /// Record and submit one frame
    pub fn render_scene(
        &mut self,
        frame_time: f32,
        input: &Input,
        backend: &mut dyn RenderBackend,
    ) -> Result<(), RenderError> {
        self.commands.clear();
        let viewport_size = backend.viewport_size();
        self.camera.set_aspect(viewport_size.0, viewport_size.1);

        let mut frame = self.frame.get();
        frame.camera_position = self.camera.position.to_array();
        frame.viewport_size = [viewport_size.0 as f32, viewport_size.1 as f32];
        frame.shadow_technique = self.config.shadow.technique as u32;
        frame.shadow_bias = self.config.shadow.bias;
        frame.shadow_light_slot = self.shadow_light.slot() as u32;
        frame.parallax_depth = if self.parallax {
            self.config.parallax_depth
        } else {
            0.0
        };
        self.frame.set(frame);

        self.render_shadow_pass();
        self.render_light_contributions();

        self.commands.push(RenderCommand::BeginMainPass {
            clear_colour: self.config.background_colour,
            clear_depth: 1.0,
        });
        self.commands.push(RenderCommand::SetViewport(Viewport::sized(
            viewport_size.0 as f32,
            viewport_size.1 as f32,
        )));
        let shadow_slot = self.bind_shadow_map();

        self.render_from_camera();

        let rects = self.overlay.render(self.total_time, viewport_size);
        if !rects.is_empty() {
            self.commands.push(RenderCommand::DrawOverlay(rects));
        }

        self.update_scene(frame_time, input, backend);

        if let Some(slot) = shadow_slot {
            self.commands.push(RenderCommand::UnbindTexture { slot });
        }
        self.commands.push(RenderCommand::Present);
        self.total_time += frame_time;

        backend.submit(&self.commands)
    }

    /// Replace the frame constants and record the upload
    fn upload_frame(&mut self, frame: FrameConstants) {
        self.frame.set(frame);
        let pushed = self.frame.push();
        self.commands
            .push(RenderCommand::UploadFrameConstants(Box::new(pushed)));
    }

    fn render_shadow_pass(&mut self) {
        let Some(light) = self.lights.get(self.shadow_light) else {
            return;
        };
        let shadow = *light.shadow_map();
        let light_world = self.light_world(light);

        match shadow.kind {
            ShadowTargetKind::Flat => {
                let view = light.shadow_view(&light_world);
                let projection = light.shadow_projection(&self.config.shadow);
                self.commands.push(RenderCommand::BeginDepthPass {
                    target: shadow.target,
                    face: None,
                    clear_depth: 1.0,
                });
                self.render_depth_from(light_world, view, projection, shadow.resolution);
            }
            ShadowTargetKind::Cube => {
                let position = light_world.w_axis.truncate();
                let projection = cube_face_projection(&self.config.shadow);
                for face in CubeFace::ALL {
                    self.commands.push(RenderCommand::BeginDepthPass {
                        target: shadow.target,
                        face: Some(face),
                        clear_depth: 1.0,
                    });
                    self.render_depth_from(
                        light_world,
                        face.view(position),
                        projection,
                        shadow.resolution,
                    );
                }
            }
        }
    }

    /// Draw every shadow caster into the current depth pass
    fn render_depth_from(
        &mut self,
        light_world: Mat4,
        view: Mat4,
        projection: Mat4,
        resolution: u32,
    ) {
        let resolution = resolution as f32;
        self.commands
            .push(RenderCommand::SetViewport(Viewport::sized(resolution, resolution)));

        let mut frame = self.frame.get();
        frame.set_camera(light_world, view, projection);
        self.upload_frame(frame);

        self.commands.push(RenderCommand::SetShaders(self.shaders.depth_only));
        self.commands.push(RenderCommand::SetRasterState(RasterState::CullBack));
        self.commands.push(RenderCommand::SetBlendState(BlendState::NoBlend));
        self.commands.push(RenderCommand::SetDepthState(DepthState::ReadWrite));

        for (index, model) in self.models.iter_mut().enumerate() {
            if index == 0 {
                self.commands.push(RenderCommand::DisablePixelShader);
            }
            if model.casts_shadows() {
                model.render(&mut self.commands, RenderPass::Depth);
            }
        }
    }

    fn render_light_contributions(&mut self) {
        let mut frame = self.frame.get();
        let count = self.lights.len();
        for light in self.lights.iter() {
            let light_world = self
                .models
                .get(light.model().0)
                .map_or(Mat4::IDENTITY, Model::world_matrix);
            light.render_light(&mut frame, &light_world, count, &self.config.shadow);

            if let Some(model) = self.models.get_mut(light.model().0) {
                model.set_tint(light.colour());
            }
        }

        // The cube matrices must match the depth cube bound for shading
        if let Some(light) = self.lights.get(self.shadow_light) {
            let light_world = self.light_world(light);
            light.render_cube_shadow(&mut frame, &light_world, &self.config.shadow);
        }
        self.frame.set(frame);
    }

    /// Bind the shadow light's map at its slot, returning the slot used
    fn bind_shadow_map(&mut self) -> Option<u32> {
        let shadow = *self.lights.get(self.shadow_light)?.shadow_map();
        let slot = match shadow.kind {
            ShadowTargetKind::Flat => SLOT_SHADOW,
            ShadowTargetKind::Cube => SLOT_SHADOW_CUBE,
        };
        self.commands.push(RenderCommand::BindTexture {
            slot,
            binding: TextureBinding::Shadow(shadow.target),
        });
        Some(slot)
    }

    fn render_from_camera(&mut self) {
        let mut frame = self.frame.get();
        frame.set_camera(
            self.camera.world_matrix(),
            self.camera.view_matrix(),
            self.camera.projection_matrix(),
        );
        self.upload_frame(frame);

        self.commands.push(RenderCommand::SetSampler {
            slot: SLOT_DIFFUSE,
            kind: self.sampler,
        });
        self.commands.push(RenderCommand::SetBlendState(BlendState::NoBlend));
        self.commands.push(RenderCommand::SetDepthState(DepthState::ReadWrite));
        self.commands.push(RenderCommand::SetRasterState(RasterState::CullBack));

        let camera_position = self.camera.position;
        for (index, model) in self.models.iter_mut().enumerate() {
            if index >= self.config.always_render
                && model.position().distance(camera_position) >= self.config.render_distance
            {
                continue;
            }

            // Clear slots the previous model bound so its textures do not leak
            for slot in TextureSlot::ALL {
                if model.texture(slot).is_none() {
                    self.commands.push(RenderCommand::UnbindTexture {
                        slot: slot.binding(),
                    });
                }
            }

            let states = model.blend_mode().states();
            self.commands.push(RenderCommand::SetBlendState(states.blend));
            self.commands.push(RenderCommand::SetDepthState(states.depth));
            self.commands.push(RenderCommand::SetRasterState(states.raster));
            model.render(&mut self.commands, RenderPass::Main);
        }
    }

    fn update_scene(&mut self, frame_time: f32, input: &Input, backend: &mut dyn RenderBackend) {
        self.camera.control(frame_time, input, &self.camera_keys);
        if let Some(height) = self.config.camera_height_lock {
            self.camera.position.y = height;
        }

        if let Some(title) = self.title.tick(frame_time) {
            backend.set_title(&title);
        }
    }

    /// Remove models and lights added after the arenas held `models` and
    /// `lights` entries, releasing the textures and shadow targets they own.
    /// Loaded meshes stay cached.
    pub fn truncate(&mut self, models: usize, lights: usize, backend: &mut dyn RenderBackend) {
        if models < self.models.len() {
            for model in &mut self.models[models..] {
                model.release(backend);
            }
            self.models.truncate(models);
        }
        self.lights.truncate(lights, backend);
    }

    /// Release every GPU resource the scene created
    pub fn release(&mut self, backend: &mut dyn RenderBackend) {
        for model in &mut self.models {
            model.release(backend);
        }
        self.models.clear();
        self.lights.release_all(backend);
        for (_, mesh) in self.meshes.drain() {
            mesh.get().release(backend);
        }
        log::debug!("Scene '{}' released", self.config.title);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec4;

    use crate::renderer::headless::HeadlessBackend;
    use crate::renderer::lights::LightKind;
    use crate::renderer::shadow::cube_view_projections;

    fn scene(backend: &mut HeadlessBackend) -> Scene {
        let config = SceneConfig {
            caution_banner: false,
            shadow: ShadowConfig::default().with_resolution(64),
            ..SceneConfig::default()
        };
        Scene::new(config, MediaFolders::new(), backend).unwrap()
    }

    fn main_pass_start(commands: &CommandList) -> usize {
        commands
            .position(|c| matches!(c, RenderCommand::BeginMainPass { .. }))
            .unwrap()
    }

    #[test]
    fn test_state_creation_failure_aborts_scene() {
        let mut backend = HeadlessBackend::new(320, 240);
        backend.fail_states(true);
        let result = Scene::new(SceneConfig::default(), MediaFolders::new(), &mut backend);
        assert!(result.is_err());
    }

    #[test]
    fn test_one_blend_state_per_draw() {
        let mut backend = HeadlessBackend::new(320, 240);
        let mut scene = scene(&mut backend);
        for mode in BlendMode::ALL {
            let id = scene.create_model("primitive:cube", &mut backend).unwrap();
            scene.model_mut(id).unwrap().set_blend_mode(mode);
        }

        scene.render_scene(0.016, &Input::new(), &mut backend).unwrap();
        let commands = backend.last_frame().unwrap();
        let main = &commands.as_slice()[main_pass_start(commands)..];

        // Each draw is preceded by exactly one blend state since the previous draw
        let mut bound = Vec::new();
        let mut since_draw: Vec<BlendState> = Vec::new();
        let mut first = true;
        for command in main {
            match command {
                RenderCommand::SetBlendState(state) => since_draw.push(*state),
                RenderCommand::Draw { .. } => {
                    // The pass default precedes the first model's own state
                    let expected_sets = if first { 2 } else { 1 };
                    assert_eq!(since_draw.len(), expected_sets);
                    bound.push(*since_draw.last().unwrap());
                    since_draw.clear();
                    first = false;
                }
                _ => {}
            }
        }

        let expected: Vec<BlendState> = BlendMode::ALL
            .iter()
            .map(|mode| mode.states().blend)
            .collect();
        assert_eq!(bound, expected);
    }

    #[test]
    fn test_blend_dispatch_binds_exactly_one_state() {
        let mut backend = HeadlessBackend::new(320, 240);
        let mut scene = scene(&mut backend);
        let a = scene.create_model("primitive:cube", &mut backend).unwrap();
        let b = scene.create_model("primitive:cube", &mut backend).unwrap();
        scene.model_mut(a).unwrap().set_blend_mode(BlendMode::Additive);
        scene.model_mut(b).unwrap().set_blend_mode(BlendMode::AlphaBlend);

        scene.render_scene(0.016, &Input::new(), &mut backend).unwrap();
        let commands = backend.last_frame().unwrap();
        let slice = &commands.as_slice()[main_pass_start(commands)..];

        let draws: Vec<usize> = slice
            .iter()
            .enumerate()
            .filter(|(_, c)| c.is_draw())
            .map(|(i, _)| i)
            .collect();
        assert_eq!(draws.len(), 2);

        // Between the two draws exactly one blend state is set
        let between = slice[draws[0] + 1..draws[1]]
            .iter()
            .filter(|c| matches!(c, RenderCommand::SetBlendState(_)))
            .count();
        assert_eq!(between, 1);
        assert!(slice[..draws[1]]
            .iter()
            .rev()
            .find_map(|c| match c {
                RenderCommand::SetBlendState(s) => Some(*s == BlendState::AlphaBlend),
                _ => None,
            })
            .unwrap());
    }

    #[test]
    fn test_spot_shadow_pass_writes_depth() {
        let mut backend = HeadlessBackend::new(320, 240);
        let mut scene = scene(&mut backend);

        let caster = scene.create_model("primitive:cube", &mut backend).unwrap();
        scene.model_mut(caster).unwrap().set_scale(4.0);

        let proxy = scene.load_mesh("primitive:sphere", &mut backend).unwrap();
        let light = scene
            .add_light(
                LightDesc::new(LightKind::Spot),
                proxy,
                Vec3::new(0.0, 20.0, 0.0),
                &mut backend,
            )
            .unwrap();
        scene
            .light_model_mut(light)
            .unwrap()
            .set_rotation(Vec3::new(90f32.to_radians(), 0.0, 0.0));

        scene.render_scene(0.016, &Input::new(), &mut backend).unwrap();

        let target = scene.light(light).unwrap().shadow_map().target;
        let depth = backend.min_shadow_depth(target, None).unwrap();
        assert!(depth < 1.0, "shadow map left at far depth");
        assert!(depth > 0.0);

        // The shadow pass runs before the shadow map is bound for shading
        let commands = backend.last_frame().unwrap();
        let bind = commands
            .position(|c| {
                matches!(
                    c,
                    RenderCommand::BindTexture {
                        binding: TextureBinding::Shadow(_),
                        ..
                    }
                )
            })
            .unwrap();
        let depth_pass = commands
            .position(|c| matches!(c, RenderCommand::BeginDepthPass { .. }))
            .unwrap();
        assert!(depth_pass < bind);
    }

    #[test]
    fn test_point_light_renders_every_cube_face() {
        let mut backend = HeadlessBackend::new(320, 240);
        let mut scene = scene(&mut backend);

        let caster = scene.create_model("primitive:cube", &mut backend).unwrap();
        scene.model_mut(caster).unwrap().set_scale(4.0);
        let proxy = scene.load_mesh("primitive:sphere", &mut backend).unwrap();
        let light = scene
            .add_light(
                LightDesc::new(LightKind::Point),
                proxy,
                Vec3::new(0.0, 10.0, 0.0),
                &mut backend,
            )
            .unwrap();

        scene.render_scene(0.016, &Input::new(), &mut backend).unwrap();
        let commands = backend.last_frame().unwrap();
        let faces: Vec<CubeFace> = commands
            .iter()
            .filter_map(|c| match c {
                RenderCommand::BeginDepthPass { face, .. } => *face,
                _ => None,
            })
            .collect();
        assert_eq!(faces, CubeFace::ALL.to_vec());

        let target = scene.light(light).unwrap().shadow_map().target;
        let below = backend.min_shadow_depth(target, Some(CubeFace::NegativeY)).unwrap();
        let above = backend.min_shadow_depth(target, Some(CubeFace::PositiveY)).unwrap();
        assert!(below < 1.0);
        assert_eq!(above, 1.0);

        // The main pass binds the cube at its own slot
        assert!(commands.iter().any(|c| matches!(
            c,
            RenderCommand::BindTexture { slot: SLOT_SHADOW_CUBE, binding: TextureBinding::Shadow(_) }
        )));
    }

    #[test]
    fn test_cube_matrices_follow_shadow_light() {
        let mut backend = HeadlessBackend::new(320, 240);
        let mut scene = scene(&mut backend);
        let proxy = scene.load_mesh("primitive:sphere", &mut backend).unwrap();

        let near = Vec3::new(0.0, 10.0, 0.0);
        let first = scene
            .add_light(LightDesc::new(LightKind::Point), proxy.clone(), near, &mut backend)
            .unwrap();
        scene
            .add_light(
                LightDesc::new(LightKind::Point),
                proxy,
                Vec3::new(50.0, 10.0, 0.0),
                &mut backend,
            )
            .unwrap();
        scene.set_shadow_light(first);

        scene.render_scene(0.016, &Input::new(), &mut backend).unwrap();

        let expected = cube_view_projections(near, &scene.config().shadow);
        let pushed = scene.pushed_frame_constants();
        for (written, face) in pushed.cube_view_projections.iter().zip(expected.iter()) {
            assert_eq!(*written, face.to_cols_array_2d());
        }
        assert_eq!(pushed.shadow_light_slot, 0);
    }

    #[test]
    fn test_end_to_end_scenario() {
        let mut backend = HeadlessBackend::new(1280, 720);
        let mut scene = scene(&mut backend);
        *scene.camera_mut() =
            Camera::new(Vec3::new(0.0, 50.0, -100.0), Vec3::new(30f32.to_radians(), 0.0, 0.0));

        let proxy = scene.load_mesh("primitive:sphere", &mut backend).unwrap();
        scene
            .add_light(
                LightDesc::new(LightKind::Directional).with_strength(0.1),
                proxy.clone(),
                Vec3::new(0.0, 100.0, 0.0),
                &mut backend,
            )
            .unwrap();
        scene
            .add_light(
                LightDesc::new(LightKind::Point).with_strength(10.0),
                proxy,
                Vec3::new(4.5, 22.0, 0.0),
                &mut backend,
            )
            .unwrap();
        scene.create_model("primitive:plane", &mut backend).unwrap();

        scene.render_scene(0.016, &Input::new(), &mut backend).unwrap();
        let commands = backend.last_frame().unwrap();

        let main = main_pass_start(commands);
        match &commands.as_slice()[main] {
            RenderCommand::BeginMainPass { clear_colour, .. } => {
                assert_eq!(*clear_colour, [0.2, 0.2, 0.3, 1.0]);
            }
            other => panic!("unexpected {other:?}"),
        }
        let first_main_draw = commands.as_slice()[main..]
            .iter()
            .position(RenderCommand::is_draw)
            .unwrap();
        assert!(first_main_draw > 0);

        let frame = commands.frame_constants_before(main + first_main_draw).unwrap();
        assert_eq!(frame.light_count, 2);
        assert_eq!(scene.pushed_frame_constants().light_count, 2);
        assert!(matches!(commands.as_slice().last(), Some(RenderCommand::Present)));
    }

    #[test]
    fn test_shadow_technique_switches_between_frames() {
        let mut backend = HeadlessBackend::new(320, 240);
        let mut scene = scene(&mut backend);

        scene.set_shadow_technique(ShadowTechnique::ZBuffer);
        scene.render_scene(0.016, &Input::new(), &mut backend).unwrap();
        assert_eq!(
            scene.pushed_frame_constants().shadow_technique,
            ShadowTechnique::ZBuffer as u32
        );

        scene.set_shadow_technique(ShadowTechnique::Pcf);
        scene.render_scene(0.016, &Input::new(), &mut backend).unwrap();
        assert_eq!(
            scene.pushed_frame_constants().shadow_technique,
            ShadowTechnique::Pcf as u32
        );
    }

    #[test]
    fn test_parallax_toggle_zeroes_depth() {
        let mut backend = HeadlessBackend::new(320, 240);
        let mut scene = scene(&mut backend);

        scene.render_scene(0.016, &Input::new(), &mut backend).unwrap();
        assert_eq!(scene.pushed_frame_constants().parallax_depth, 0.08);

        scene.set_parallax(false);
        scene.render_scene(0.016, &Input::new(), &mut backend).unwrap();
        assert_eq!(scene.pushed_frame_constants().parallax_depth, 0.0);
    }

    #[test]
    fn test_runtime_lighting_controls_reach_main_pass() {
        let mut backend = HeadlessBackend::new(320, 240);
        let mut scene = scene(&mut backend);
        scene.create_model("primitive:cube", &mut backend).unwrap();

        scene.set_day_night(0.25);
        scene.set_blend_amount(0.5);
        scene.set_sampler(SamplerKind::Point);
        scene.render_scene(0.016, &Input::new(), &mut backend).unwrap();

        let pushed = scene.pushed_frame_constants();
        assert_eq!(pushed.day_night_cycle, 0.25);
        assert_eq!(pushed.blend_amount, 0.5);

        let commands = backend.last_frame().unwrap();
        let main = &commands.as_slice()[main_pass_start(commands)..];
        assert!(main.contains(&RenderCommand::SetSampler {
            slot: SLOT_DIFFUSE,
            kind: SamplerKind::Point,
        }));
    }

    #[test]
    fn test_render_distance_keeps_prefix() {
        let mut backend = HeadlessBackend::new(320, 240);
        let mut scene = scene(&mut backend);
        let far = Vec3::new(0.0, 0.0, 5000.0);
        for _ in 0..DEFAULT_ALWAYS_RENDER + 3 {
            let id = scene.create_model("primitive:cube", &mut backend).unwrap();
            scene.model_mut(id).unwrap().set_position(far);
        }

        scene.render_scene(0.016, &Input::new(), &mut backend).unwrap();
        let commands = backend.last_frame().unwrap();
        let main_draws = commands.as_slice()[main_pass_start(commands)..]
            .iter()
            .filter(|c| c.is_draw())
            .count();
        assert_eq!(main_draws, DEFAULT_ALWAYS_RENDER);
    }

    #[test]
    fn test_failed_light_removes_proxy() {
        let mut backend = HeadlessBackend::new(320, 240);
        let mut scene = scene(&mut backend);
        let proxy = scene.load_mesh("primitive:sphere", &mut backend).unwrap();
        backend.fail_shadow_targets(true);

        let result =
            scene.add_light(LightDesc::new(LightKind::Spot), proxy, Vec3::ZERO, &mut backend);
        assert!(matches!(result, Err(LightError::ShadowTarget(_))));
        assert!(scene.models().is_empty());
    }

    #[test]
    fn test_light_proxy_takes_light_colour() {
        let mut backend = HeadlessBackend::new(320, 240);
        let mut scene = scene(&mut backend);
        let proxy = scene.load_mesh("primitive:sphere", &mut backend).unwrap();
        let light = scene
            .add_light(LightDesc::new(LightKind::Point), proxy, Vec3::ZERO, &mut backend)
            .unwrap();
        let red = Vec4::new(1.0, 0.0, 0.0, 1.0);
        scene.light_mut(light).unwrap().set_colour(red);

        scene.render_scene(0.016, &Input::new(), &mut backend).unwrap();
        let model = scene.light(light).unwrap().model();
        assert_eq!(scene.model(model).unwrap().tint(), red);
        assert_eq!(scene.model(model).unwrap().blend_mode(), BlendMode::Additive);
    }

    #[test]
    fn test_mesh_cache_reuses_geometry() {
        let mut backend = HeadlessBackend::new(320, 240);
        let mut scene = scene(&mut backend);
        scene.create_model("primitive:cube", &mut backend).unwrap();
        let uploaded = backend.geometry_count();
        scene.create_model("primitive:cube", &mut backend).unwrap();
        assert_eq!(backend.geometry_count(), uploaded);

        scene.release(&mut backend);
        assert_eq!(backend.geometry_count(), 0);
    }

    #[test]
    fn test_title_updates_after_interval() {
        let mut backend = HeadlessBackend::new(320, 240);
        let mut scene = scene(&mut backend);
        for _ in 0..4 {
            scene.render_scene(0.2, &Input::new(), &mut backend).unwrap();
        }
        assert_eq!(backend.titles().len(), 1);
        assert!(backend.titles()[0].starts_with("umbra - Frame Time: 200.00ms"));
    }
}
