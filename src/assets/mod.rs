//! Asset management
//!
//! Media folder lookup and name-keyed caching of loaded assets.

mod handle;
mod media;
mod storage;

pub use handle::AssetHandle;
pub use media::MediaFolders;
pub use storage::AssetCache;
