//! Shadow mapping
//!
//! Each light owns one depth-only shadow target. Spot and directional lights
//! render into a single 2D depth texture, point lights into the six layers of a
//! depth cube, one pass per face.

use glam::{Mat4, Vec3};

use super::constants::CUBE_FACES;

/// Shadow map configuration
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ShadowConfig {
    /// Shadow map resolution (width and height)
    pub resolution: u32,
    /// Near plane for light projections
    pub near: f32,
    /// Far plane for spot and directional projections
    pub far: f32,
    /// Far plane for point light cube faces
    pub cube_far: f32,
    /// Depth bias applied when comparing against the map
    pub bias: f32,
    /// Filtering used when shading, switchable at runtime
    pub technique: ShadowTechnique,
}

impl Default for ShadowConfig {
    fn default() -> Self {
        Self {
            resolution: 1024,
            near: 0.1,
            far: 10_000.0,
            cube_far: 1000.0,
            bias: 0.0005,
            technique: ShadowTechnique::Pcf,
        }
    }
}

impl ShadowConfig {
    #[must_use]
    pub fn with_resolution(mut self, resolution: u32) -> Self {
        self.resolution = resolution;
        self
    }

    #[must_use]
    pub fn with_technique(mut self, technique: ShadowTechnique) -> Self {
        self.technique = technique;
        self
    }

    #[must_use]
    pub fn with_bias(mut self, bias: f32) -> Self {
        self.bias = bias;
        self
    }
}

/// How the shading pass filters shadow map lookups
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[repr(u32)]
pub enum ShadowTechnique {
    /// Single comparison per pixel
    ZBuffer = 0,
    /// Percentage-closer filtering over a 3x3 kernel
    #[default]
    Pcf = 1,
}

/// Shape of a light's depth target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShadowTargetKind {
    /// Single 2D depth texture
    Flat,
    /// Six-layer depth cube
    Cube,
}

impl ShadowTargetKind {
    /// Number of depth layers the target holds
    #[must_use]
    pub fn layers(self) -> u32 {
        match self {
            Self::Flat => 1,
            Self::Cube => CUBE_FACES as u32,
        }
    }
}

/// One face of a point light shadow cube, in array layer order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CubeFace {
    /// Looks along +X
    PositiveX = 0,
    NegativeX = 1,
    PositiveY = 2,
    NegativeY = 3,
    PositiveZ = 4,
    NegativeZ = 5,
}

impl CubeFace {
    pub const ALL: [CubeFace; CUBE_FACES] = [
        Self::PositiveX,
        Self::NegativeX,
        Self::PositiveY,
        Self::NegativeY,
        Self::PositiveZ,
        Self::NegativeZ,
    ];

    /// Array layer of this face in the cube texture
    #[must_use]
    pub fn layer(self) -> u32 {
        self as u32
    }

    /// Axis the face camera looks along
    #[must_use]
    pub fn direction(self) -> Vec3 {
        match self {
            Self::PositiveX => Vec3::X,
            Self::NegativeX => Vec3::NEG_X,
            Self::PositiveY => Vec3::Y,
            Self::NegativeY => Vec3::NEG_Y,
            Self::PositiveZ => Vec3::Z,
            Self::NegativeZ => Vec3::NEG_Z,
        }
    }

    /// Up vector for the face camera. The Y faces cannot use world up.
    #[must_use]
    pub fn up(self) -> Vec3 {
        match self {
            Self::PositiveY => Vec3::NEG_Z,
            Self::NegativeY => Vec3::Z,
            _ => Vec3::Y,
        }
    }

    /// View matrix looking out of this face from `position`
    #[must_use]
    pub fn view(self, position: Vec3) -> Mat4 {
        Mat4::look_at_lh(position, position + self.direction(), self.up())
    }
}

/// 90 degree square projection shared by every cube face
#[must_use]
pub fn cube_face_projection(config: &ShadowConfig) -> Mat4 {
    Mat4::perspective_lh(std::f32::consts::FRAC_PI_2, 1.0, config.near, config.cube_far)
}

/// View-projection for all six faces around a point light
#[must_use]
pub fn cube_view_projections(position: Vec3, config: &ShadowConfig) -> [Mat4; CUBE_FACES] {
    let projection = cube_face_projection(config);
    CubeFace::ALL.map(|face| projection * face.view(position))
}

/// A light's shadow depth target as created by the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShadowMap {
    /// Backend depth texture, bound for shading through `TextureBinding::Shadow`
    pub target: super::backend::ShadowTargetHandle,
    /// Flat for spot and directional lights, cube for point lights
    pub kind: ShadowTargetKind,
    /// Width and height of each layer in texels
    pub resolution: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec4;

    #[test]
    fn test_face_layers_follow_cube_order() {
        let layers: Vec<u32> = CubeFace::ALL.iter().map(|f| f.layer()).collect();
        assert_eq!(layers, vec![0, 1, 2, 3, 4, 5]);
        assert_eq!(ShadowTargetKind::Cube.layers(), 6);
        assert_eq!(ShadowTargetKind::Flat.layers(), 1);
    }

    #[test]
    fn test_face_looks_down_its_axis() {
        let light = Vec3::new(4.5, 22.0, 0.0);
        let config = ShadowConfig::default();
        let vps = cube_view_projections(light, &config);

        for (face, vp) in CubeFace::ALL.iter().zip(vps.iter()) {
            let ahead = light + face.direction() * 10.0;
            let clip = *vp * ahead.extend(1.0);
            let ndc = clip.truncate() / clip.w;
            assert!(clip.w > 0.0, "{face:?} point is behind the camera");
            assert!(ndc.x.abs() < 1e-4 && ndc.y.abs() < 1e-4, "{face:?} off centre: {ndc}");
            assert!(ndc.z > 0.0 && ndc.z < 1.0);
        }
    }

    #[test]
    fn test_point_behind_face_is_clipped() {
        let vp = cube_view_projections(Vec3::ZERO, &ShadowConfig::default())[0];
        let clip = vp * Vec4::new(-5.0, 0.0, 0.0, 1.0);
        assert!(clip.w < 0.0);
    }

    #[test]
    fn test_y_faces_use_z_up() {
        assert_eq!(CubeFace::PositiveY.up(), Vec3::NEG_Z);
        assert_eq!(CubeFace::NegativeY.up(), Vec3::Z);
        assert_eq!(CubeFace::PositiveZ.up(), Vec3::Y);
    }
}
