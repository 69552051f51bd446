//! Shared asset handles
//!
//! A handle keeps its asset alive. Cloning a handle shares the asset, so many
//! models can draw the same uploaded mesh.

use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_ASSET_ID: AtomicU64 = AtomicU64::new(1);

fn next_id() -> u64 {
    NEXT_ASSET_ID.fetch_add(1, Ordering::Relaxed)
}

/// A strong, cheaply clonable reference to an asset of type `T`
#[derive(Debug)]
pub struct AssetHandle<T> {
    id: u64,
    inner: Arc<T>,
}

impl<T> AssetHandle<T> {
    #[must_use]
    pub fn new(value: T) -> Self {
        Self {
            id: next_id(),
            inner: Arc::new(value),
        }
    }

    /// Process-unique identifier of the asset
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    #[must_use]
    pub fn get(&self) -> &T {
        &self.inner
    }

    /// Number of live handles to this asset
    #[must_use]
    pub fn strong_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }
}

impl<T> Clone for AssetHandle<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> PartialEq for AssetHandle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<T> Eq for AssetHandle<T> {}

impl<T> Hash for AssetHandle<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl<T> std::ops::Deref for AssetHandle<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clone_shares_asset() {
        let a = AssetHandle::new(String::from("cube"));
        let b = a.clone();
        assert_eq!(a, b);
        assert_eq!(a.strong_count(), 2);
        assert_eq!(b.get(), "cube");
    }

    #[test]
    fn test_ids_are_unique() {
        let a = AssetHandle::new(1);
        let b = AssetHandle::new(1);
        assert_ne!(a, b);
        assert_ne!(a.id(), b.id());
    }
}
