//! Texture loading
//!
//! Files are decoded on the CPU into RGBA8 and then handed to the backend.
//! `.dds` files go through a content-sniffing reader since the container can
//! hold several pixel formats. Everything else is decoded by extension.

use std::path::Path;

use image::GenericImageView;

use super::backend::{RenderBackend, RenderError, TextureHandle};
use crate::assets::MediaFolders;

/// Extension routed to the container-aware loader
pub const CONTAINER_EXTENSION: &str = "dds";

/// Decoded RGBA8 pixels
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureImage {
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
}

impl TextureImage {
    /// Decode a texture file, choosing the loader by extension
    pub fn load(path: impl AsRef<Path>) -> Result<Self, TextureError> {
        let path = path.as_ref();
        let is_container = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case(CONTAINER_EXTENSION));

        let img = if is_container {
            image::ImageReader::open(path)
                .map_err(|e| TextureError::Io(e.to_string()))?
                .with_guessed_format()
                .map_err(|e| TextureError::Io(e.to_string()))?
                .decode()
                .map_err(|e| TextureError::Decode(e.to_string()))?
        } else {
            image::open(path).map_err(|e| match e {
                image::ImageError::IoError(io) => TextureError::Io(io.to_string()),
                other => TextureError::Decode(other.to_string()),
            })?
        };

        Ok(Self::from_image(&img))
    }

    /// Decode an in-memory encoded image
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, TextureError> {
        let img =
            image::load_from_memory(bytes).map_err(|e| TextureError::Decode(e.to_string()))?;
        Ok(Self::from_image(&img))
    }

    #[must_use]
    pub fn from_image(img: &image::DynamicImage) -> Self {
        let (width, height) = img.dimensions();
        Self {
            width,
            height,
            rgba: img.to_rgba8().into_raw(),
        }
    }

    /// Single-colour image
    #[must_use]
    pub fn solid(colour: [u8; 4]) -> Self {
        Self {
            width: 1,
            height: 1,
            rgba: colour.to_vec(),
        }
    }

    /// Upload to the backend
    pub fn upload(
        &self,
        label: &str,
        backend: &mut dyn RenderBackend,
    ) -> Result<TextureHandle, TextureError> {
        backend
            .create_texture(label, self.width, self.height, &self.rgba)
            .map_err(TextureError::Upload)
    }
}

/// Resolve `name` in the media folders, decode it and upload it
pub fn load_texture(
    name: &str,
    media: &MediaFolders,
    backend: &mut dyn RenderBackend,
) -> Result<TextureHandle, TextureError> {
    let path = media
        .resolve(name)
        .ok_or_else(|| TextureError::NotFound(name.to_string()))?;
    let image = TextureImage::load(&path)?;
    log::debug!("Loaded texture '{}' ({}x{})", name, image.width, image.height);
    image.upload(name, backend)
}

/// Like [`load_texture`] but falls back to the placeholder with a warning
pub fn load_texture_or_placeholder(
    name: &str,
    media: &MediaFolders,
    backend: &mut dyn RenderBackend,
) -> TextureHandle {
    match load_texture(name, media, backend) {
        Ok(handle) => handle,
        Err(e) => {
            log::warn!("Texture '{}' unavailable, using placeholder: {}", name, e);
            backend.placeholder_texture()
        }
    }
}

/// Errors that can occur during texture loading
#[derive(Debug, Clone, PartialEq)]
pub enum TextureError {
    /// File not found in any media folder
    NotFound(String),
    /// IO error reading file
    Io(String),
    /// Error decoding image data
    Decode(String),
    /// Backend rejected the texture
    Upload(RenderError),
}

impl std::fmt::Display for TextureError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound(name) => write!(f, "Texture not found: {name}"),
            Self::Io(e) => write!(f, "IO error: {e}"),
            Self::Decode(e) => write!(f, "Decode error: {e}"),
            Self::Upload(e) => write!(f, "Upload error: {e}"),
        }
    }
}

impl std::error::Error for TextureError {}
