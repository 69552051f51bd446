//! Placed mesh instances
//!
//! A model positions a shared [`Mesh`] in the world and carries everything bound
//! for its draws: shaders, up to three textures, a blend mode and a tint.

use glam::{Mat4, Vec3, Vec4};

use super::backend::{RenderBackend, TextureHandle};
use super::commands::{
    CommandList, RenderCommand, SLOT_DIFFUSE, SLOT_SECONDARY, SLOT_TERTIARY, ShaderPair,
    TextureBinding,
};
use super::constants::ModelConstants;
use super::math::{compose_world_matrix, decompose_world_matrix, look_at_matrix};
use super::mesh::Mesh;
use super::states::BlendMode;
use super::texture::load_texture_or_placeholder;
use crate::assets::{AssetHandle, MediaFolders};

/// Index of a model in its scene
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModelId(pub(crate) usize);

impl ModelId {
    #[must_use]
    pub fn index(self) -> usize {
        self.0
    }
}

/// Which pass a model is being drawn in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderPass {
    /// Depth only, using whatever shaders the pass bound
    Depth,
    /// Colour pass with the model's own shaders and textures
    Main,
}

/// Texture slots a model can fill
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureSlot {
    Diffuse,
    Secondary,
    Tertiary,
}

impl TextureSlot {
    pub const ALL: [TextureSlot; 3] = [Self::Diffuse, Self::Secondary, Self::Tertiary];

    /// Shader binding slot
    #[must_use]
    pub fn binding(self) -> u32 {
        match self {
            Self::Diffuse => SLOT_DIFFUSE,
            Self::Secondary => SLOT_SECONDARY,
            Self::Tertiary => SLOT_TERTIARY,
        }
    }

    fn index(self) -> usize {
        match self {
            Self::Diffuse => 0,
            Self::Secondary => 1,
            Self::Tertiary => 2,
        }
    }
}

/// One placed instance of a mesh
#[derive(Debug, Clone)]
pub struct Model {
    mesh: AssetHandle<Mesh>,
    position: Vec3,
    /// Euler angles in radians
    rotation: Vec3,
    scale: Vec3,
    /// Orientation frozen by a look-at, replacing `rotation` while set
    look_at: Option<Mat4>,
    /// Per-node matrices; entry 0 is rebuilt from the transform every draw
    matrices: Vec<Mat4>,
    textures: [Option<TextureHandle>; 3],
    /// Slots holding the placeholder after a failed load
    placeholder_slots: [bool; 3],
    /// Textures this model loaded itself and must release
    owned_textures: Vec<TextureHandle>,
    shaders: ShaderPair,
    blend_mode: BlendMode,
    tint: Vec4,
    casts_shadows: bool,
}

impl Model {
    #[must_use]
    pub fn new(mesh: AssetHandle<Mesh>, shaders: ShaderPair) -> Self {
        let matrices = mesh.default_matrices();
        Self {
            mesh,
            position: Vec3::ZERO,
            rotation: Vec3::ZERO,
            scale: Vec3::ONE,
            look_at: None,
            matrices,
            textures: [None; 3],
            placeholder_slots: [false; 3],
            owned_textures: Vec::new(),
            shaders,
            blend_mode: BlendMode::None,
            tint: Vec4::ONE,
            casts_shadows: true,
        }
    }

    #[must_use]
    pub fn with_position(mut self, position: Vec3) -> Self {
        self.position = position;
        self
    }

    #[must_use]
    pub fn with_rotation(mut self, rotation: Vec3) -> Self {
        self.rotation = rotation;
        self
    }

    #[must_use]
    pub fn with_scale(mut self, scale: Vec3) -> Self {
        self.scale = scale;
        self
    }

    #[must_use]
    pub fn with_blend_mode(mut self, blend_mode: BlendMode) -> Self {
        self.blend_mode = blend_mode;
        self
    }

    #[must_use]
    pub fn mesh(&self) -> &AssetHandle<Mesh> {
        &self.mesh
    }

    #[must_use]
    pub fn position(&self) -> Vec3 {
        self.position
    }

    pub fn set_position(&mut self, position: Vec3) {
        self.position = position;
    }

    #[must_use]
    pub fn rotation(&self) -> Vec3 {
        self.rotation
    }

    pub fn set_rotation(&mut self, rotation: Vec3) {
        self.rotation = rotation;
    }

    #[must_use]
    pub fn scale(&self) -> Vec3 {
        self.scale
    }

    pub fn set_scale(&mut self, scale: f32) {
        self.scale = Vec3::splat(scale);
    }

    pub fn set_scale_xyz(&mut self, scale: Vec3) {
        self.scale = scale;
    }

    pub fn move_x(&mut self, amount: f32) {
        self.position.x += amount;
    }

    pub fn move_y(&mut self, amount: f32) {
        self.position.y += amount;
    }

    pub fn move_z(&mut self, amount: f32) {
        self.position.z += amount;
    }

    /// Move along the model's own X axis
    pub fn move_local_x(&mut self, amount: f32) {
        let axis = self.world_matrix().x_axis.truncate().normalize_or_zero();
        self.position += axis * amount;
    }

    pub fn move_local_y(&mut self, amount: f32) {
        let axis = self.world_matrix().y_axis.truncate().normalize_or_zero();
        self.position += axis * amount;
    }

    pub fn move_local_z(&mut self, amount: f32) {
        let axis = self.world_matrix().z_axis.truncate().normalize_or_zero();
        self.position += axis * amount;
    }

    pub fn rotate_x(&mut self, angle: f32) {
        self.rotation.x += angle;
    }

    pub fn rotate_y(&mut self, angle: f32) {
        self.rotation.y += angle;
    }

    pub fn rotate_z(&mut self, angle: f32) {
        self.rotation.z += angle;
    }

    /// Current world matrix.
    ///
    /// Built from position, rotation and scale, unless a look-at has frozen the
    /// orientation, in which case rotation is ignored but position and scale
    /// still apply.
    #[must_use]
    pub fn world_matrix(&self) -> Mat4 {
        match self.look_at {
            Some(orientation) => {
                Mat4::from_translation(self.position) * orientation * Mat4::from_scale(self.scale)
            }
            None => compose_world_matrix(self.position, self.rotation, self.scale),
        }
    }

    /// Replace the transform with one decomposed from an arbitrary affine matrix.
    ///
    /// Clears any frozen look-at orientation.
    pub fn set_matrix(&mut self, matrix: &Mat4) {
        let decomposed = decompose_world_matrix(matrix);
        self.position = decomposed.position;
        self.rotation = decomposed.rotation;
        self.scale = decomposed.scale;
        self.look_at = None;
    }

    /// Freeze the orientation to face `target`
    pub fn look_at(&mut self, target: Vec3) {
        let mut basis = look_at_matrix(self.position, target);
        basis.w_axis = Vec4::W;
        self.look_at = Some(basis);
    }

    /// Face the camera's position
    pub fn look_at_camera(&mut self, camera_position: Vec3) {
        self.look_at(camera_position);
    }

    /// Return to the position, rotation and scale transform
    pub fn clear_look_at(&mut self) {
        self.look_at = None;
    }

    #[must_use]
    pub fn has_look_at(&self) -> bool {
        self.look_at.is_some()
    }

    /// Relative matrix of a mesh node
    #[must_use]
    pub fn node_matrix(&self, node: usize) -> Option<Mat4> {
        self.matrices.get(node).copied()
    }

    /// Pose a mesh node relative to its parent. Node 0 always follows the model's transform.
    pub fn set_node_matrix(&mut self, node: usize, matrix: Mat4) {
        if node == 0 {
            return;
        }
        if let Some(slot) = self.matrices.get_mut(node) {
            *slot = matrix;
        }
    }

    #[must_use]
    pub fn shaders(&self) -> ShaderPair {
        self.shaders
    }

    pub fn set_shaders(&mut self, shaders: ShaderPair) {
        self.shaders = shaders;
    }

    #[must_use]
    pub fn blend_mode(&self) -> BlendMode {
        self.blend_mode
    }

    pub fn set_blend_mode(&mut self, blend_mode: BlendMode) {
        self.blend_mode = blend_mode;
    }

    #[must_use]
    pub fn tint(&self) -> Vec4 {
        self.tint
    }

    pub fn set_tint(&mut self, tint: Vec4) {
        self.tint = tint;
    }

    /// Whether the model is drawn into shadow maps
    #[must_use]
    pub fn casts_shadows(&self) -> bool {
        self.casts_shadows
    }

    pub fn set_casts_shadows(&mut self, casts_shadows: bool) {
        self.casts_shadows = casts_shadows;
    }

    #[must_use]
    pub fn texture(&self, slot: TextureSlot) -> Option<TextureHandle> {
        self.textures[slot.index()]
    }

    /// Bind an already created texture. The model does not take ownership.
    pub fn set_texture(&mut self, slot: TextureSlot, texture: Option<TextureHandle>) {
        self.textures[slot.index()] = texture;
        self.placeholder_slots[slot.index()] = false;
    }

    /// Whether a real texture, not the placeholder, fills `slot`
    #[must_use]
    pub fn has_texture(&self, slot: TextureSlot) -> bool {
        self.textures[slot.index()].is_some() && !self.placeholder_slots[slot.index()]
    }

    /// Load the base colour texture, falling back to the placeholder on failure
    pub fn set_skin(&mut self, name: &str, media: &MediaFolders, backend: &mut dyn RenderBackend) {
        self.load_slot(TextureSlot::Diffuse, name, media, backend);
    }

    /// Load the normal map, falling back to the placeholder on failure
    pub fn add_secondary_texture(
        &mut self,
        name: &str,
        media: &MediaFolders,
        backend: &mut dyn RenderBackend,
    ) {
        self.load_slot(TextureSlot::Secondary, name, media, backend);
    }

    /// Load the height map, falling back to the placeholder on failure
    pub fn add_tertiary_texture(
        &mut self,
        name: &str,
        media: &MediaFolders,
        backend: &mut dyn RenderBackend,
    ) {
        self.load_slot(TextureSlot::Tertiary, name, media, backend);
    }

    fn load_slot(
        &mut self,
        slot: TextureSlot,
        name: &str,
        media: &MediaFolders,
        backend: &mut dyn RenderBackend,
    ) {
        let handle = load_texture_or_placeholder(name, media, backend);
        let placeholder = handle == backend.placeholder_texture();
        if !placeholder {
            self.owned_textures.push(handle);
        }
        self.textures[slot.index()] = Some(handle);
        self.placeholder_slots[slot.index()] = placeholder;
    }

    /// Record this model's draws.
    ///
    /// In the main pass the model's shaders and any bound textures are set
    /// first. In the depth pass only geometry and transforms are recorded so
    /// the pass's own depth-only shaders stay bound.
    pub fn render(&mut self, commands: &mut CommandList, pass: RenderPass) {
        if pass == RenderPass::Main {
            commands.push(RenderCommand::SetShaders(self.shaders));
            for slot in TextureSlot::ALL {
                if let Some(texture) = self.textures[slot.index()] {
                    commands.push(RenderCommand::BindTexture {
                        slot: slot.binding(),
                        binding: TextureBinding::Texture(texture),
                    });
                }
            }
        }

        let world = self.world_matrix();
        match self.matrices.first_mut() {
            Some(root) => *root = world,
            None => self.matrices.push(world),
        }
        let base = ModelConstants::new(world, self.tint).with_surface_maps(
            self.has_texture(TextureSlot::Secondary),
            self.has_texture(TextureSlot::Tertiary),
        );
        self.mesh.render(&self.matrices, &base, commands);
    }

    /// Release textures this model loaded
    pub fn release(&mut self, backend: &mut dyn RenderBackend) {
        for texture in self.owned_textures.drain(..) {
            backend.release_texture(texture);
        }
        self.textures = [None; 3];
        self.placeholder_slots = [false; 3];
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::backend::ShaderHandle;
    use crate::renderer::headless::HeadlessBackend;
    use crate::renderer::mesh::MeshData;

    fn cube_model(backend: &mut HeadlessBackend) -> Model {
        let mesh = Mesh::upload(MeshData::cube(), backend).unwrap();
        Model::new(
            AssetHandle::new(mesh),
            ShaderPair::new(ShaderHandle(1), ShaderHandle(2)),
        )
    }

    fn uploaded_worlds(commands: &CommandList) -> Vec<Mat4> {
        commands
            .iter()
            .filter_map(|c| match c {
                RenderCommand::UploadModelConstants(m) => Some(m.world()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_world_matrix_from_transform() {
        let mut backend = HeadlessBackend::new(8, 8);
        let model = cube_model(&mut backend)
            .with_position(Vec3::new(1.0, 2.0, 3.0))
            .with_rotation(Vec3::new(0.1, 0.2, 0.3))
            .with_scale(Vec3::new(2.0, 1.0, 0.5));

        let expected = compose_world_matrix(
            Vec3::new(1.0, 2.0, 3.0),
            Vec3::new(0.1, 0.2, 0.3),
            Vec3::new(2.0, 1.0, 0.5),
        );
        assert_eq!(model.world_matrix(), expected);
    }

    #[test]
    fn test_set_matrix_round_trip() {
        let mut backend = HeadlessBackend::new(8, 8);
        let mut model = cube_model(&mut backend);
        let original = compose_world_matrix(
            Vec3::new(-4.0, 7.0, 2.5),
            Vec3::new(0.4, -1.1, 0.7),
            Vec3::new(1.5, 2.0, 3.0),
        );

        model.set_matrix(&original);
        assert!(model.world_matrix().abs_diff_eq(original, 1e-4));
    }

    #[test]
    fn test_look_at_ignores_rotation_keeps_scale() {
        let mut backend = HeadlessBackend::new(8, 8);
        let mut model = cube_model(&mut backend)
            .with_rotation(Vec3::new(1.0, 2.0, 3.0))
            .with_scale(Vec3::splat(2.0));

        model.look_at(Vec3::new(0.0, 0.0, 10.0));
        assert!(model.has_look_at());

        let world = model.world_matrix();
        assert!(world.z_axis.truncate().abs_diff_eq(Vec3::new(0.0, 0.0, 2.0), 1e-5));
        assert!(world.x_axis.truncate().abs_diff_eq(Vec3::new(2.0, 0.0, 0.0), 1e-5));

        model.rotate_y(1.0);
        assert_eq!(model.world_matrix(), world);

        model.clear_look_at();
        assert_ne!(model.world_matrix(), world);
    }

    #[test]
    fn test_look_at_follows_position() {
        let mut backend = HeadlessBackend::new(8, 8);
        let mut model = cube_model(&mut backend);
        model.look_at_camera(Vec3::new(10.0, 0.0, 0.0));
        model.move_y(5.0);
        assert_eq!(model.world_matrix().w_axis.truncate(), Vec3::new(0.0, 5.0, 0.0));
    }

    #[test]
    fn test_main_pass_binds_shaders_and_textures() {
        let mut backend = HeadlessBackend::new(8, 8);
        let mut model = cube_model(&mut backend);
        let texture = backend.create_texture("t", 1, 1, &[0, 0, 0, 255]).unwrap();
        model.set_texture(TextureSlot::Tertiary, Some(texture));

        let mut commands = CommandList::new();
        model.render(&mut commands, RenderPass::Main);

        assert_eq!(
            commands.as_slice()[0],
            RenderCommand::SetShaders(ShaderPair::new(ShaderHandle(1), ShaderHandle(2)))
        );
        assert_eq!(
            commands.as_slice()[1],
            RenderCommand::BindTexture {
                slot: SLOT_TERTIARY,
                binding: TextureBinding::Texture(texture),
            }
        );
        assert_eq!(commands.draw_count(), 1);
    }

    #[test]
    fn test_depth_pass_keeps_pass_shaders() {
        let mut backend = HeadlessBackend::new(8, 8);
        let mut model = cube_model(&mut backend).with_position(Vec3::new(0.0, 3.0, 0.0));
        model.set_texture(TextureSlot::Diffuse, Some(backend.placeholder_texture()));

        let mut commands = CommandList::new();
        model.render(&mut commands, RenderPass::Depth);

        assert!(!commands.iter().any(|c| matches!(
            c,
            RenderCommand::SetShaders(_) | RenderCommand::BindTexture { .. }
        )));
        assert_eq!(uploaded_worlds(&commands), vec![model.world_matrix()]);
    }

    #[test]
    fn test_missing_texture_binds_placeholder() {
        let mut backend = HeadlessBackend::new(8, 8);
        let mut model = cube_model(&mut backend);
        let media = MediaFolders::new();

        model.add_secondary_texture("no_such_normal.png", &media, &mut backend);
        assert_eq!(
            model.texture(TextureSlot::Secondary),
            Some(backend.placeholder_texture())
        );

        model.release(&mut backend);
        assert_eq!(model.texture(TextureSlot::Secondary), None);
    }

    #[test]
    fn test_surface_maps_flag_only_real_textures() {
        let mut backend = HeadlessBackend::new(8, 8);
        let mut model = cube_model(&mut backend);
        let media = MediaFolders::new();
        let height = backend.create_texture("height", 1, 1, &[128, 128, 128, 255]).unwrap();

        // A failed normal map load leaves the flat normal in use
        model.add_secondary_texture("no_such_normal.png", &media, &mut backend);
        model.set_texture(TextureSlot::Tertiary, Some(height));
        assert!(!model.has_texture(TextureSlot::Secondary));

        let mut commands = CommandList::new();
        model.render(&mut commands, RenderPass::Main);
        let surface_maps: Vec<[f32; 4]> = commands
            .iter()
            .filter_map(|c| match c {
                RenderCommand::UploadModelConstants(m) => Some(m.surface_maps),
                _ => None,
            })
            .collect();
        assert_eq!(surface_maps, vec![[0.0, 1.0, 0.0, 0.0]]);
    }

    #[test]
    fn test_local_movement_follows_rotation() {
        let mut backend = HeadlessBackend::new(8, 8);
        let mut model =
            cube_model(&mut backend).with_rotation(Vec3::new(0.0, std::f32::consts::FRAC_PI_2, 0.0));
        model.move_local_z(3.0);
        assert!(model.position().abs_diff_eq(Vec3::new(3.0, 0.0, 0.0), 1e-5));
    }
}
