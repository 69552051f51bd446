//! Scene description files
//!
//! A scene file lists models and lights. JSON is the primary format, with the
//! same structure accepted as RON when the file ends in `.ron`.

use std::fs;
use std::path::Path;

use glam::{Vec3, Vec4};
use serde::{Deserialize, Serialize};

use crate::renderer::lights::{LightDesc, LightError, LightKind};
use crate::renderer::{RenderBackend, Scene};

/// One placed model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelRecord {
    pub mesh_file_name: String,
    pub position: [f32; 3],
    /// Euler angles in radians
    #[serde(default)]
    pub rotation: [f32; 3],
    #[serde(default = "unit_scale")]
    pub scale: f32,
}

/// One light and its proxy model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LightRecord {
    pub mesh_file_name: String,
    /// The fourth component is carried for compatibility and ignored
    pub position: [f32; 4],
    pub ambient_colour: [f32; 3],
    pub light_colour: [f32; 4],
    pub light_strength: f32,
    pub specular_power: f32,
    /// Full cone angle in degrees
    pub cone_angle: f32,
    /// "Directional", "Point" or "Spot"
    pub light_type: String,
    #[serde(default = "unit_scale")]
    pub model_scale: f32,
}

fn unit_scale() -> f32 {
    1.0
}

/// A serializable scene of models and lights
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SceneDescription {
    #[serde(default)]
    pub models: Vec<ModelRecord>,
    #[serde(default)]
    pub lights: Vec<LightRecord>,
}

/// What a load added to the scene
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadSummary {
    pub models: usize,
    pub lights: usize,
}

impl SceneDescription {
    /// Load from a `.ron` or JSON file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or deserialization fails
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SceneError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| SceneError::IoError(e.to_string()))?;
        if path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("ron")) {
            Self::from_ron(&content)
        } else {
            Self::from_json(&content)
        }
    }

    pub fn from_json(content: &str) -> Result<Self, SceneError> {
        serde_json::from_str(content).map_err(|e| SceneError::DeserializeError(e.to_string()))
    }

    pub fn from_ron(content: &str) -> Result<Self, SceneError> {
        ron::from_str(content).map_err(|e| SceneError::DeserializeError(e.to_string()))
    }

    /// Save the scene to a JSON file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or serialization fails
    pub fn save_json(&self, path: impl AsRef<Path>) -> Result<(), SceneError> {
        let json_string = serde_json::to_string_pretty(self)
            .map_err(|e| SceneError::SerializeError(e.to_string()))?;
        fs::write(path, json_string).map_err(|e| SceneError::IoError(e.to_string()))?;
        Ok(())
    }

    /// Save the scene to a RON file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or serialization fails
    pub fn save_ron(&self, path: impl AsRef<Path>) -> Result<(), SceneError> {
        let ron_string = ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())
            .map_err(|e| SceneError::SerializeError(e.to_string()))?;
        fs::write(path, ron_string).map_err(|e| SceneError::IoError(e.to_string()))?;
        Ok(())
    }

    /// Create every model, then every light, in file order.
    ///
    /// Meshes named more than once are loaded once. The first failure stops the
    /// load and removes every model and light this call had added, so the scene
    /// is left as it was apart from cached meshes.
    pub fn apply(
        &self,
        scene: &mut Scene,
        backend: &mut dyn RenderBackend,
    ) -> Result<LoadSummary, SceneError> {
        let models_before = scene.models().len();
        let lights_before = scene.lights().len();
        let mut summary = LoadSummary::default();

        if let Err(e) = self.create_records(scene, backend, &mut summary) {
            log::warn!(
                "Scene load failed after {} models and {} lights, rolling back: {}",
                summary.models,
                summary.lights,
                e
            );
            scene.truncate(models_before, lights_before, backend);
            return Err(e);
        }

        log::info!(
            "Loaded scene: {} models, {} lights",
            summary.models,
            summary.lights
        );
        Ok(summary)
    }

    fn create_records(
        &self,
        scene: &mut Scene,
        backend: &mut dyn RenderBackend,
        summary: &mut LoadSummary,
    ) -> Result<(), SceneError> {
        for record in &self.models {
            let id = scene
                .create_model(&record.mesh_file_name, backend)
                .map_err(|e| SceneError::Mesh {
                    name: record.mesh_file_name.clone(),
                    reason: e.to_string(),
                })?;
            if let Some(model) = scene.model_mut(id) {
                model.set_position(Vec3::from(record.position));
                model.set_rotation(Vec3::from(record.rotation));
                model.set_scale(record.scale);
            }
            summary.models += 1;
        }

        for record in &self.lights {
            let kind: LightKind = record
                .light_type
                .parse()
                .map_err(|_| SceneError::UnknownLightType(record.light_type.clone()))?;
            let mesh = scene
                .load_mesh(&record.mesh_file_name, backend)
                .map_err(|e| SceneError::Mesh {
                    name: record.mesh_file_name.clone(),
                    reason: e.to_string(),
                })?;

            let desc = LightDesc::new(kind)
                .with_colour(Vec4::from(record.light_colour))
                .with_strength(record.light_strength)
                .with_specular_power(record.specular_power)
                .with_ambient(Vec3::from(record.ambient_colour))
                .with_cone_angle(record.cone_angle);
            let position = Vec4::from(record.position).truncate();
            let id = scene
                .add_light(desc, mesh, position, backend)
                .map_err(SceneError::Light)?;
            if let Some(model) = scene.light_model_mut(id) {
                model.set_scale(record.model_scale);
            }
            summary.lights += 1;
        }
        Ok(())
    }
}

/// Errors that can occur during scene operations
#[derive(Debug, Clone, PartialEq)]
pub enum SceneError {
    IoError(String),
    SerializeError(String),
    DeserializeError(String),
    /// `lightType` is not one of the known kinds
    UnknownLightType(String),
    /// A mesh could not be loaded
    Mesh { name: String, reason: String },
    Light(LightError),
}

impl std::fmt::Display for SceneError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::IoError(e) => write!(f, "IO error: {e}"),
            Self::SerializeError(e) => write!(f, "Serialization error: {e}"),
            Self::DeserializeError(e) => write!(f, "Deserialization error: {e}"),
            Self::UnknownLightType(kind) => write!(f, "Unknown light type '{kind}'"),
            Self::Mesh { name, reason } => write!(f, "Failed to load mesh '{name}': {reason}"),
            Self::Light(e) => write!(f, "Failed to create light: {e}"),
        }
    }
}

impl std::error::Error for SceneError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Light(e) => Some(e),
            _ => None,
        }
    }
}
