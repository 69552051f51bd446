//! Media folder search path
//!
//! Mesh, texture and shader file names are resolved against the registered
//! folders in registration order, then as a plain path.

use std::path::{Path, PathBuf};

/// Ordered list of folders searched for media files
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MediaFolders {
    folders: Vec<PathBuf>,
}

impl MediaFolders {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a folder. Registering the same folder twice has no effect.
    pub fn add(&mut self, folder: impl AsRef<Path>) {
        let folder = folder.as_ref().to_path_buf();
        if !self.folders.contains(&folder) {
            log::debug!("Added media folder {}", folder.display());
            self.folders.push(folder);
        }
    }

    /// Unregister a folder, returning whether it was registered
    pub fn remove(&mut self, folder: impl AsRef<Path>) -> bool {
        let folder = folder.as_ref();
        let before = self.folders.len();
        self.folders.retain(|f| f != folder);
        self.folders.len() != before
    }

    /// First existing match for `file_name`
    #[must_use]
    pub fn resolve(&self, file_name: impl AsRef<Path>) -> Option<PathBuf> {
        let file_name = file_name.as_ref();
        self.folders
            .iter()
            .map(|folder| folder.join(file_name))
            .find(|candidate| candidate.is_file())
            .or_else(|| file_name.is_file().then(|| file_name.to_path_buf()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Path> {
        self.folders.iter().map(PathBuf::as_path)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.folders.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.folders.is_empty()
    }
}
