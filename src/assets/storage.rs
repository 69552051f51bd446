//! Name-keyed asset cache
//!
//! Assets are loaded once per source name. Later requests for the same name
//! get a handle to the already loaded value.

use rustc_hash::FxHashMap;

use super::handle::AssetHandle;

/// Cache of loaded assets keyed by the name they were requested with
pub struct AssetCache<T> {
    entries: FxHashMap<String, AssetHandle<T>>,
}

impl<T> AssetCache<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: FxHashMap::default(),
        }
    }

    /// Return the cached asset for `name`, loading it with `load` on first use.
    ///
    /// A failed load caches nothing, so the next request retries.
    pub fn get_or_try_load<E>(
        &mut self,
        name: &str,
        load: impl FnOnce() -> Result<T, E>,
    ) -> Result<AssetHandle<T>, E> {
        if let Some(handle) = self.entries.get(name) {
            log::debug!("Reusing cached asset '{}'", name);
            return Ok(handle.clone());
        }

        let handle = AssetHandle::new(load()?);
        self.entries.insert(name.to_string(), handle.clone());
        Ok(handle)
    }

    /// Insert an asset under `name`, replacing any previous entry
    pub fn insert(&mut self, name: impl Into<String>, asset: T) -> AssetHandle<T> {
        let handle = AssetHandle::new(asset);
        self.entries.insert(name.into(), handle.clone());
        handle
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<AssetHandle<T>> {
        self.entries.get(name).cloned()
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<AssetHandle<T>> {
        self.entries.remove(name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove every entry and hand back the handles
    pub fn drain(&mut self) -> impl Iterator<Item = (String, AssetHandle<T>)> + '_ {
        self.entries.drain()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &AssetHandle<T>)> {
        self.entries.iter().map(|(name, handle)| (name.as_str(), handle))
    }
}

impl<T> Default for AssetCache<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_request_reuses_asset() {
        let mut cache = AssetCache::<i32>::new();
        let mut loads = 0;

        let first = cache
            .get_or_try_load("plane.gltf", || {
                loads += 1;
                Ok::<_, ()>(42)
            })
            .unwrap();
        let second = cache
            .get_or_try_load("plane.gltf", || {
                loads += 1;
                Ok::<_, ()>(100)
            })
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(*second, 42);
        assert_eq!(loads, 1);
    }

    #[test]
    fn test_failed_load_is_not_cached() {
        let mut cache = AssetCache::<i32>::new();
        assert!(cache.get_or_try_load("bad", || Err("missing")).is_err());
        assert!(!cache.contains("bad"));

        let handle = cache.get_or_try_load("bad", || Ok::<_, &str>(7)).unwrap();
        assert_eq!(*handle, 7);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_drain_empties_cache() {
        let mut cache = AssetCache::new();
        cache.insert("a", 1);
        cache.insert("b", 2);
        let drained: Vec<_> = cache.drain().collect();
        assert_eq!(drained.len(), 2);
        assert!(cache.is_empty());
    }
}
