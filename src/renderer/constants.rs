//! Per-frame and per-draw constant blocks
//!
//! Both structs are mirrored byte for byte into GPU uniform buffers. Updates are
//! whole-struct only: callers read the current value, change the fields they own,
//! then write the whole value back and push it.

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3, Vec4};

/// Size of the light arrays in [`FrameConstants`]
pub const MAX_LIGHTS: usize = 20;

/// Size of the bone palette in [`ModelConstants`]
pub const MAX_BONES: usize = 64;

/// Number of faces captured for a point light shadow cube
pub const CUBE_FACES: usize = 6;

type GpuMatrix = [[f32; 4]; 4];

const IDENTITY: GpuMatrix = [
    [1.0, 0.0, 0.0, 0.0],
    [0.0, 1.0, 0.0, 0.0],
    [0.0, 0.0, 1.0, 0.0],
    [0.0, 0.0, 0.0, 1.0],
];

/// Camera, lighting and shadow data shared by every draw in a frame
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct FrameConstants {
    /// World to camera space
    pub view_matrix: GpuMatrix,
    /// Camera to clip space, FOV measured along x
    pub projection_matrix: GpuMatrix,
    /// `projection_matrix * view_matrix`
    pub view_projection_matrix: GpuMatrix,
    /// Camera world matrix
    pub camera_matrix: GpuMatrix,

    /// Added to every lit pixel before the lights, scaled by `day_night_cycle`
    pub ambient_colour: [f32; 3],
    /// Shininess exponent for the specular highlight
    pub specular_power: f32,

    pub camera_position: [f32; 3],
    /// 0 = night, 1 = midday
    pub day_night_cycle: f32,

    /// Lights written this frame. Slots at or past it are ignored when shading.
    pub light_count: u32,
    /// See [`crate::renderer::shadow::ShadowTechnique`]
    pub shadow_technique: u32,
    /// UV shift at the lowest point of a height map. 0 turns parallax off.
    pub parallax_depth: f32,
    /// Multiplies the output alpha of the main shader
    pub blend_amount: f32,

    /// Back buffer size in pixels
    pub viewport_size: [f32; 2],
    /// Light slot whose shadow map is bound for shading
    pub shadow_light_slot: u32,
    /// Subtracted from the receiver depth before the shadow comparison
    pub shadow_bias: f32,

    /// xyz = world position
    pub light_positions: [[f32; 4]; MAX_LIGHTS],
    /// rgb = colour * strength, w = light kind tag
    pub light_colours: [[f32; 4]; MAX_LIGHTS],
    /// xyz = facing, w = cosine of half the cone angle
    pub light_facings: [[f32; 4]; MAX_LIGHTS],
    /// World to light space, used for flat shadow lookups
    pub light_view_matrices: [GpuMatrix; MAX_LIGHTS],
    pub light_projection_matrices: [GpuMatrix; MAX_LIGHTS],

    /// View-projection per cube face for the shadow-casting point light
    pub cube_view_projections: [GpuMatrix; CUBE_FACES],
}

impl Default for FrameConstants {
    fn default() -> Self {
        let mut constants = Self::zeroed();
        constants.view_matrix = IDENTITY;
        constants.projection_matrix = IDENTITY;
        constants.view_projection_matrix = IDENTITY;
        constants.camera_matrix = IDENTITY;
        constants.ambient_colour = [0.2, 0.2, 0.3];
        constants.specular_power = 256.0;
        constants.day_night_cycle = 1.0;
        constants.parallax_depth = 0.08;
        constants.blend_amount = 1.0;
        constants.shadow_bias = 0.0005;
        constants
    }
}

impl FrameConstants {
    /// Store the camera matrices and derive the combined view-projection
    pub fn set_camera(&mut self, world: Mat4, view: Mat4, projection: Mat4) {
        self.camera_matrix = world.to_cols_array_2d();
        self.view_matrix = view.to_cols_array_2d();
        self.projection_matrix = projection.to_cols_array_2d();
        self.view_projection_matrix = (projection * view).to_cols_array_2d();
    }

    /// View-projection as a `Mat4`
    #[must_use]
    pub fn view_projection(&self) -> Mat4 {
        Mat4::from_cols_array_2d(&self.view_projection_matrix)
    }

    /// Write the light array entries for one slot
    pub fn set_light(
        &mut self,
        slot: usize,
        position: Vec3,
        colour: Vec4,
        facing: Vec4,
        view: Mat4,
        projection: Mat4,
    ) {
        self.light_positions[slot] = position.extend(1.0).to_array();
        self.light_colours[slot] = colour.to_array();
        self.light_facings[slot] = facing.to_array();
        self.light_view_matrices[slot] = view.to_cols_array_2d();
        self.light_projection_matrices[slot] = projection.to_cols_array_2d();
    }
}

/// Per-draw data: world transform, tint, surface maps and bone palette
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct ModelConstants {
    /// Object to world space for this node
    pub world_matrix: GpuMatrix,
    /// rgb tint, a = alpha multiplier
    pub object_colour: [f32; 4],
    /// x = 1 with a normal map bound, y = 1 with a height map bound
    pub surface_maps: [f32; 4],
    /// Reserved for skinned meshes
    pub bone_matrices: [GpuMatrix; MAX_BONES],
}

impl Default for ModelConstants {
    fn default() -> Self {
        let mut constants = Self::zeroed();
        constants.world_matrix = IDENTITY;
        constants.object_colour = [1.0; 4];
        constants
    }
}

impl ModelConstants {
    /// Constants for a draw with the given world matrix and tint
    #[must_use]
    pub fn new(world: Mat4, tint: Vec4) -> Self {
        Self {
            world_matrix: world.to_cols_array_2d(),
            object_colour: tint.to_array(),
            ..Self::default()
        }
    }

    /// Flag which surface maps the main shader may sample
    #[must_use]
    pub fn with_surface_maps(mut self, normal_map: bool, height_map: bool) -> Self {
        let flag = |present: bool| if present { 1.0 } else { 0.0 };
        self.surface_maps = [flag(normal_map), flag(height_map), 0.0, 0.0];
        self
    }

    /// The same constants placed at another world matrix
    #[must_use]
    pub fn at(&self, world: Mat4) -> Self {
        Self {
            world_matrix: world.to_cols_array_2d(),
            ..*self
        }
    }

    #[must_use]
    pub fn world(&self) -> Mat4 {
        Mat4::from_cols_array_2d(&self.world_matrix)
    }
}

/// CPU copy of a constant block plus the bytes last pushed for the GPU.
///
/// `push` always copies the entire struct, so no bytes from an earlier value
/// can survive a push.
#[derive(Debug, Clone)]
pub struct ConstantStore<T: Pod> {
    value: T,
    mirror: Vec<u8>,
    pushes: u64,
}

impl<T: Pod + Default> Default for ConstantStore<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: Pod> ConstantStore<T> {
    #[must_use]
    pub fn new(value: T) -> Self {
        Self {
            value,
            mirror: bytemuck::bytes_of(&value).to_vec(),
            pushes: 0,
        }
    }

    /// Replace the whole CPU-side value
    pub fn set(&mut self, value: T) {
        self.value = value;
    }

    /// Copy of the current CPU-side value
    #[must_use]
    pub fn get(&self) -> T {
        self.value
    }

    /// Copy the whole CPU value into the GPU mirror and return it for upload
    pub fn push(&mut self) -> T {
        self.mirror.clear();
        self.mirror.extend_from_slice(bytemuck::bytes_of(&self.value));
        self.pushes += 1;
        self.value
    }

    /// Bytes of the mirror as last pushed
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.mirror
    }

    /// Decode the mirror back into a struct
    #[must_use]
    pub fn readback(&self) -> T {
        bytemuck::pod_read_unaligned(&self.mirror)
    }

    /// Overwrite the mirror with a byte pattern without touching the CPU value
    pub fn fill_mirror(&mut self, byte: u8) {
        self.mirror.iter_mut().for_each(|b| *b = byte);
    }

    /// Number of pushes since creation
    #[must_use]
    pub fn push_count(&self) -> u64 {
        self.pushes
    }

    /// Byte size of one block
    #[must_use]
    pub const fn size() -> usize {
        std::mem::size_of::<T>()
    }
}
