//! Shader lookup by name
//!
//! The built-in WGSL programs are compiled into the binary. Any other name is
//! resolved to `<name>.wgsl` in the media folders, with `vs_main` or `fs_main`
//! as the entry point depending on the stage.

use std::borrow::Cow;

use crate::assets::MediaFolders;

use super::backend::RenderError;

/// Pipeline stage a shader runs in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Pixel,
}

impl ShaderStage {
    /// Entry point used for shaders loaded from disk
    #[must_use]
    pub fn default_entry_point(self) -> &'static str {
        match self {
            Self::Vertex => "vs_main",
            Self::Pixel => "fs_main",
        }
    }
}

/// WGSL source plus the entry point for one stage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderSource {
    pub name: String,
    pub stage: ShaderStage,
    pub wgsl: Cow<'static, str>,
    pub entry_point: String,
}

// Every built-in shares the constant block declarations in common.wgsl
const MAIN_WGSL: &str = concat!(include_str!("common.wgsl"), include_str!("main.wgsl"));
const DEPTH_WGSL: &str = concat!(include_str!("common.wgsl"), include_str!("depth.wgsl"));
const LIGHT_MODEL_WGSL: &str =
    concat!(include_str!("common.wgsl"), include_str!("light_model.wgsl"));
const UI_WGSL: &str = concat!(include_str!("common.wgsl"), include_str!("ui.wgsl"));

/// Built-in shaders: name, stage, source, entry point
const BUILTIN: &[(&str, ShaderStage, &str, &str)] = &[
    ("main_vs", ShaderStage::Vertex, MAIN_WGSL, "vs_main"),
    ("main_ps", ShaderStage::Pixel, MAIN_WGSL, "fs_main"),
    ("depth_only_vs", ShaderStage::Vertex, DEPTH_WGSL, "vs_depth"),
    ("light_model_vs", ShaderStage::Vertex, LIGHT_MODEL_WGSL, "vs_main"),
    ("light_model_ps", ShaderStage::Pixel, LIGHT_MODEL_WGSL, "fs_main"),
    ("ui_vs", ShaderStage::Vertex, UI_WGSL, "vs_ui"),
    ("ui_ps", ShaderStage::Pixel, UI_WGSL, "fs_ui"),
];

/// Resolve a shader name to its source
pub fn resolve(
    name: &str,
    stage: ShaderStage,
    media: &MediaFolders,
) -> Result<ShaderSource, RenderError> {
    if let Some((_, builtin_stage, wgsl, entry)) =
        BUILTIN.iter().find(|(builtin, ..)| *builtin == name)
    {
        if *builtin_stage != stage {
            return Err(RenderError::ShaderLoad {
                name: name.to_string(),
                reason: format!("built-in shader is a {builtin_stage:?} stage"),
            });
        }
        return Ok(ShaderSource {
            name: name.to_string(),
            stage,
            wgsl: Cow::Borrowed(*wgsl),
            entry_point: (*entry).to_string(),
        });
    }

    let file_name = format!("{name}.wgsl");
    let path = media.resolve(&file_name).ok_or_else(|| RenderError::ShaderLoad {
        name: name.to_string(),
        reason: format!("'{file_name}' not found in media folders"),
    })?;
    let wgsl = std::fs::read_to_string(&path).map_err(|e| RenderError::ShaderLoad {
        name: name.to_string(),
        reason: e.to_string(),
    })?;

    log::debug!("Loaded shader '{}' from {}", name, path.display());

    Ok(ShaderSource {
        name: name.to_string(),
        stage,
        wgsl: Cow::Owned(wgsl),
        entry_point: stage.default_entry_point().to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_lookup() {
        let media = MediaFolders::new();
        let source = resolve("depth_only_vs", ShaderStage::Vertex, &media).unwrap();
        assert_eq!(source.entry_point, "vs_depth");
        assert!(source.wgsl.contains("fn vs_depth"));

        let pixel = resolve("main_ps", ShaderStage::Pixel, &media).unwrap();
        assert!(pixel.wgsl.contains("fn fs_main"));
    }

    #[test]
    fn test_main_shader_reads_surface_maps() {
        let media = MediaFolders::new();
        let pixel = resolve("main_ps", ShaderStage::Pixel, &media).unwrap();
        for used in [
            "textureSample(normal_map",
            "textureSample(height_map",
            "frame.parallax_depth",
            "model.surface_maps",
        ] {
            assert!(pixel.wgsl.contains(used), "main shader never uses {used}");
        }
    }

    #[test]
    fn test_stage_mismatch_is_an_error() {
        let media = MediaFolders::new();
        assert!(matches!(
            resolve("main_vs", ShaderStage::Pixel, &media),
            Err(RenderError::ShaderLoad { .. })
        ));
    }

    #[test]
    fn test_unknown_shader_reports_name() {
        let media = MediaFolders::new();
        let err = resolve("no_such_shader", ShaderStage::Vertex, &media).unwrap_err();
        assert!(err.to_string().contains("no_such_shader"));
    }

    #[test]
    fn test_shader_from_media_folder() {
        let dir = std::env::temp_dir().join(format!("umbra_shader_test_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("glow_ps.wgsl"), "@fragment fn fs_main() {}").unwrap();

        let mut media = MediaFolders::new();
        media.add(&dir);
        let source = resolve("glow_ps", ShaderStage::Pixel, &media).unwrap();
        assert_eq!(source.entry_point, "fs_main");
        assert!(matches!(source.wgsl, Cow::Owned(_)));

        std::fs::remove_dir_all(&dir).ok();
    }
}
