//! Dynamic lights
//!
//! Lights are a closed set of kinds sharing one struct. Each light holds a slot
//! in the frame constant light arrays, a proxy model whose transform places it,
//! and a private shadow target: a 2D depth map for spot and directional lights,
//! a depth cube for point lights.

use std::fmt;
use std::str::FromStr;

use glam::{Mat4, Vec3, Vec4};

use super::backend::{RenderBackend, RenderError};
use super::constants::{FrameConstants, MAX_LIGHTS};
use super::math::{facing, inverse_affine, perspective_fov_x};
use super::model::ModelId;
use super::shadow::{ShadowConfig, ShadowMap, ShadowTargetKind, cube_view_projections};

/// Kind of light, also packed into the colour alpha for the shaders
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Serialize, serde::Deserialize)]
#[repr(u32)]
pub enum LightKind {
    #[default]
    Point = 0,
    Spot = 1,
    Directional = 2,
}

impl LightKind {
    /// Value written to the colour alpha channel
    #[must_use]
    pub fn tag(self) -> f32 {
        self as u32 as f32
    }

    /// Depth target shape needed by this kind
    #[must_use]
    pub fn shadow_target(self) -> ShadowTargetKind {
        match self {
            Self::Point => ShadowTargetKind::Cube,
            Self::Spot | Self::Directional => ShadowTargetKind::Flat,
        }
    }
}

impl FromStr for LightKind {
    type Err = LightError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Point" => Ok(Self::Point),
            "Spot" => Ok(Self::Spot),
            "Directional" => Ok(Self::Directional),
            other => Err(LightError::UnknownKind(other.to_string())),
        }
    }
}

/// Errors from light creation
#[derive(Debug, Clone, PartialEq)]
pub enum LightError {
    /// Every slot in the light arrays is taken
    TooManyLights { max: usize },
    /// The shadow depth target could not be created
    ShadowTarget(RenderError),
    UnknownKind(String),
}

impl fmt::Display for LightError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooManyLights { max } => write!(f, "Max lights reached. Max= {max}"),
            Self::ShadowTarget(e) => write!(f, "Depth buffer not created for shadow: {e}"),
            Self::UnknownKind(kind) => write!(f, "Unknown light type '{kind}'"),
        }
    }
}

impl std::error::Error for LightError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::ShadowTarget(e) => Some(e),
            _ => None,
        }
    }
}

/// Index of a light in its arena, equal to its slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LightId(pub(crate) usize);

impl LightId {
    #[must_use]
    pub fn slot(self) -> usize {
        self.0
    }
}

/// Light parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LightDesc {
    pub kind: LightKind,
    pub colour: Vec4,
    pub strength: f32,
    pub specular_power: f32,
    pub ambient_colour: Vec3,
    /// Full cone angle in degrees
    pub cone_angle: f32,
}

impl LightDesc {
    #[must_use]
    pub fn new(kind: LightKind) -> Self {
        Self {
            kind,
            colour: Vec4::ONE,
            strength: 1.0,
            specular_power: 256.0,
            ambient_colour: Vec3::new(0.2, 0.2, 0.3),
            cone_angle: 90.0,
        }
    }

    #[must_use]
    pub fn with_colour(mut self, colour: Vec4) -> Self {
        self.colour = colour;
        self
    }

    #[must_use]
    pub fn with_strength(mut self, strength: f32) -> Self {
        self.strength = strength;
        self
    }

    #[must_use]
    pub fn with_specular_power(mut self, power: f32) -> Self {
        self.specular_power = power;
        self
    }

    #[must_use]
    pub fn with_ambient(mut self, ambient: Vec3) -> Self {
        self.ambient_colour = ambient;
        self
    }

    #[must_use]
    pub fn with_cone_angle(mut self, degrees: f32) -> Self {
        self.cone_angle = degrees;
        self
    }
}

/// A light placed in the scene
#[derive(Debug, Clone, PartialEq)]
pub struct Light {
    desc: LightDesc,
    slot: usize,
    model: ModelId,
    shadow: ShadowMap,
}

impl Light {
    #[must_use]
    pub fn kind(&self) -> LightKind {
        self.desc.kind
    }

    #[must_use]
    pub fn slot(&self) -> usize {
        self.slot
    }

    /// Handle for looking this light up again in its arena
    #[must_use]
    pub fn id(&self) -> LightId {
        LightId(self.slot)
    }

    /// Proxy model whose transform places the light
    #[must_use]
    pub fn model(&self) -> ModelId {
        self.model
    }

    #[must_use]
    pub fn shadow_map(&self) -> &ShadowMap {
        &self.shadow
    }

    #[must_use]
    pub fn colour(&self) -> Vec4 {
        self.desc.colour
    }

    #[must_use]
    pub fn strength(&self) -> f32 {
        self.desc.strength
    }

    #[must_use]
    pub fn specular_power(&self) -> f32 {
        self.desc.specular_power
    }

    #[must_use]
    pub fn ambient_colour(&self) -> Vec3 {
        self.desc.ambient_colour
    }

    /// Full cone angle in degrees
    #[must_use]
    pub fn cone_angle(&self) -> f32 {
        self.desc.cone_angle
    }

    pub fn set_colour(&mut self, colour: Vec4) {
        self.desc.colour = colour;
    }

    pub fn set_strength(&mut self, strength: f32) {
        self.desc.strength = strength;
    }

    pub fn set_specular_power(&mut self, power: f32) {
        self.desc.specular_power = power;
    }

    pub fn set_ambient_colour(&mut self, ambient: Vec3) {
        self.desc.ambient_colour = ambient;
    }

    pub fn set_cone_angle(&mut self, degrees: f32) {
        self.desc.cone_angle = degrees;
    }

    /// View matrix for rendering from the light: the inverse of its model's world matrix
    #[must_use]
    pub fn shadow_view(&self, light_world: &Mat4) -> Mat4 {
        inverse_affine(light_world)
    }

    /// Square projection covering the light's cone
    #[must_use]
    pub fn shadow_projection(&self, config: &ShadowConfig) -> Mat4 {
        perspective_fov_x(1.0, self.desc.cone_angle.to_radians(), config.near, config.far)
    }

    /// Write this light's slot of the frame constant light arrays.
    ///
    /// Ambient colour and specular power are shared fields, so the last light
    /// to run wins.
    pub fn render_light(
        &self,
        frame: &mut FrameConstants,
        light_world: &Mat4,
        light_count: usize,
        config: &ShadowConfig,
    ) {
        let mut colour = self.desc.colour * self.desc.strength;
        colour.w = self.desc.kind.tag();

        let half_cone_cos = (self.desc.cone_angle.to_radians() / 2.0).cos();
        let position = light_world.w_axis.truncate();

        frame.light_count = light_count as u32;
        frame.set_light(
            self.slot,
            position,
            colour,
            facing(light_world).extend(half_cone_cos),
            self.shadow_view(light_world),
            self.shadow_projection(config),
        );
        frame.ambient_colour = self.desc.ambient_colour.to_array();
        frame.specular_power = self.desc.specular_power;
    }

    /// Write the cube face matrices the main pass uses to read this light's
    /// depth cube. Only the shadow-casting light calls this; other kinds leave
    /// the frame untouched.
    pub fn render_cube_shadow(
        &self,
        frame: &mut FrameConstants,
        light_world: &Mat4,
        config: &ShadowConfig,
    ) {
        if self.desc.kind != LightKind::Point {
            return;
        }
        let faces = cube_view_projections(light_world.w_axis.truncate(), config);
        for (target, face) in frame.cube_view_projections.iter_mut().zip(faces.iter()) {
            *target = face.to_cols_array_2d();
        }
    }
}

/// Scene-owned lights indexed by slot
#[derive(Debug, Default)]
pub struct LightArena {
    lights: Vec<Light>,
}

impl LightArena {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a light in the next free slot along with its shadow target.
    ///
    /// Fails once [`MAX_LIGHTS`] lights exist, or if the backend cannot create
    /// the depth target.
    pub fn create(
        &mut self,
        desc: LightDesc,
        model: ModelId,
        backend: &mut dyn RenderBackend,
        config: &ShadowConfig,
    ) -> Result<LightId, LightError> {
        let slot = self.lights.len();
        if slot >= MAX_LIGHTS {
            return Err(LightError::TooManyLights { max: MAX_LIGHTS });
        }

        let kind = desc.kind.shadow_target();
        let target = backend
            .create_shadow_target(kind, config.resolution)
            .map_err(LightError::ShadowTarget)?;

        log::debug!("Created {:?} light in slot {}", desc.kind, slot);

        self.lights.push(Light {
            desc,
            slot,
            model,
            shadow: ShadowMap {
                target,
                kind,
                resolution: config.resolution,
            },
        });
        Ok(LightId(slot))
    }

    #[must_use]
    pub fn get(&self, id: LightId) -> Option<&Light> {
        self.lights.get(id.0)
    }

    pub fn get_mut(&mut self, id: LightId) -> Option<&mut Light> {
        self.lights.get_mut(id.0)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lights.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lights.is_empty()
    }

    /// Lights in slot order
    pub fn iter(&self) -> std::slice::Iter<'_, Light> {
        self.lights.iter()
    }

    /// Drop lights from slot `len` on and release their shadow targets
    pub fn truncate(&mut self, len: usize, backend: &mut dyn RenderBackend) {
        if len >= self.lights.len() {
            return;
        }
        for light in self.lights.drain(len..) {
            backend.release_shadow_target(light.shadow.target);
        }
    }

    /// Drop every light and release its shadow target
    pub fn release_all(&mut self, backend: &mut dyn RenderBackend) {
        for light in self.lights.drain(..) {
            backend.release_shadow_target(light.shadow.target);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::headless::HeadlessBackend;
    use crate::renderer::math::compose_world_matrix;

    fn arena_with(count: usize, backend: &mut HeadlessBackend) -> (LightArena, Vec<LightId>) {
        let mut arena = LightArena::new();
        let config = ShadowConfig::default().with_resolution(16);
        let ids = (0..count)
            .map(|i| {
                let kind = if i % 2 == 0 { LightKind::Spot } else { LightKind::Point };
                arena
                    .create(LightDesc::new(kind), ModelId(i), backend, &config)
                    .unwrap()
            })
            .collect();
        (arena, ids)
    }

    #[test]
    fn test_slots_are_unique_and_dense() {
        let mut backend = HeadlessBackend::new(8, 8);
        for count in [1, 5, MAX_LIGHTS] {
            let (arena, ids) = arena_with(count, &mut backend);
            let slots: Vec<usize> = ids.iter().map(|id| id.slot()).collect();
            assert_eq!(slots, (0..count).collect::<Vec<_>>());
            let found: Vec<LightId> = arena.iter().map(Light::id).collect();
            assert_eq!(found, ids);
        }
    }

    #[test]
    fn test_light_past_max_fails() {
        let mut backend = HeadlessBackend::new(8, 8);
        let (mut arena, _) = arena_with(MAX_LIGHTS, &mut backend);

        let err = arena
            .create(
                LightDesc::new(LightKind::Directional),
                ModelId(99),
                &mut backend,
                &ShadowConfig::default(),
            )
            .unwrap_err();
        assert_eq!(err, LightError::TooManyLights { max: MAX_LIGHTS });
        assert_eq!(arena.len(), MAX_LIGHTS);
    }

    #[test]
    fn test_shadow_target_failure_is_fatal() {
        let mut backend = HeadlessBackend::new(8, 8);
        backend.fail_shadow_targets(true);
        let mut arena = LightArena::new();

        let err = arena
            .create(
                LightDesc::new(LightKind::Spot),
                ModelId(0),
                &mut backend,
                &ShadowConfig::default(),
            )
            .unwrap_err();
        assert!(matches!(err, LightError::ShadowTarget(_)));
        assert!(arena.is_empty());
    }

    #[test]
    fn test_point_lights_get_cube_targets() {
        let mut backend = HeadlessBackend::new(8, 8);
        let (arena, ids) = arena_with(2, &mut backend);
        let spot = arena.get(ids[0]).unwrap();
        let point = arena.get(ids[1]).unwrap();
        assert_eq!(spot.shadow_map().kind, ShadowTargetKind::Flat);
        assert_eq!(point.shadow_map().kind, ShadowTargetKind::Cube);
        assert_ne!(spot.shadow_map().target, point.shadow_map().target);
    }

    #[test]
    fn test_render_light_packs_slot() {
        let mut backend = HeadlessBackend::new(8, 8);
        let mut arena = LightArena::new();
        let config = ShadowConfig::default();
        let desc = LightDesc::new(LightKind::Spot)
            .with_colour(Vec4::new(1.0, 0.5, 0.25, 1.0))
            .with_strength(4.0)
            .with_cone_angle(60.0)
            .with_specular_power(64.0)
            .with_ambient(Vec3::splat(0.1));
        let id = arena.create(desc, ModelId(0), &mut backend, &config).unwrap();
        let light = arena.get(id).unwrap();

        let world = compose_world_matrix(Vec3::new(1.0, 2.0, 3.0), Vec3::ZERO, Vec3::ONE);
        let mut frame = FrameConstants::default();
        light.render_light(&mut frame, &world, 1, &config);

        assert_eq!(frame.light_count, 1);
        assert_eq!(frame.light_colours[0], [4.0, 2.0, 1.0, LightKind::Spot.tag()]);
        assert_eq!(frame.light_positions[0], [1.0, 2.0, 3.0, 1.0]);
        let facing = frame.light_facings[0];
        assert_eq!(&facing[..3], &[0.0, 0.0, 1.0]);
        assert!((facing[3] - 30f32.to_radians().cos()).abs() < 1e-6);
        assert_eq!(frame.specular_power, 64.0);
        assert_eq!(frame.ambient_colour, [0.1, 0.1, 0.1]);
        assert_eq!(
            Mat4::from_cols_array_2d(&frame.light_view_matrices[0]),
            world.inverse()
        );
    }

    #[test]
    fn test_ambient_last_writer_wins() {
        let mut backend = HeadlessBackend::new(8, 8);
        let mut arena = LightArena::new();
        let config = ShadowConfig::default();
        for ambient in [0.1, 0.7] {
            arena
                .create(
                    LightDesc::new(LightKind::Directional).with_ambient(Vec3::splat(ambient)),
                    ModelId(0),
                    &mut backend,
                    &config,
                )
                .unwrap();
        }

        let mut frame = FrameConstants::default();
        for light in arena.iter() {
            light.render_light(&mut frame, &Mat4::IDENTITY, arena.len(), &config);
        }
        assert_eq!(frame.ambient_colour, [0.7, 0.7, 0.7]);
        assert_eq!(frame.light_count, 2);
    }

    #[test]
    fn test_point_light_writes_cube_faces() {
        let mut backend = HeadlessBackend::new(8, 8);
        let mut arena = LightArena::new();
        let config = ShadowConfig::default();
        let id = arena
            .create(LightDesc::new(LightKind::Point), ModelId(0), &mut backend, &config)
            .unwrap();

        let world = Mat4::from_translation(Vec3::new(4.5, 22.0, 0.0));
        let mut frame = FrameConstants::default();
        let light = arena.get(id).unwrap();
        light.render_light(&mut frame, &world, 1, &config);
        assert_eq!(frame.cube_view_projections, FrameConstants::default().cube_view_projections);

        light.render_cube_shadow(&mut frame, &world, &config);
        let expected = cube_view_projections(Vec3::new(4.5, 22.0, 0.0), &config);
        for (written, face) in frame.cube_view_projections.iter().zip(expected.iter()) {
            assert_eq!(*written, face.to_cols_array_2d());
        }
        assert_eq!(frame.light_colours[0][3], 0.0);
    }

    #[test]
    fn test_cube_shadow_ignores_flat_lights() {
        let mut backend = HeadlessBackend::new(8, 8);
        let mut arena = LightArena::new();
        let config = ShadowConfig::default();
        let id = arena
            .create(LightDesc::new(LightKind::Spot), ModelId(0), &mut backend, &config)
            .unwrap();

        let mut frame = FrameConstants::default();
        let world = Mat4::from_translation(Vec3::new(1.0, 2.0, 3.0));
        arena.get(id).unwrap().render_cube_shadow(&mut frame, &world, &config);
        assert_eq!(frame, FrameConstants::default());
    }

    #[test]
    fn test_kind_parsing() {
        assert_eq!("Directional".parse::<LightKind>(), Ok(LightKind::Directional));
        assert_eq!("Spot".parse::<LightKind>(), Ok(LightKind::Spot));
        assert!(matches!(
            "Area".parse::<LightKind>(),
            Err(LightError::UnknownKind(_))
        ));
    }
}
