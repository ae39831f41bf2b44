//! Directory cache for build tools
//!
//! Resolves path strings to cached file system objects, serving repeated
//! lookups of the same path from memory and enumerating each directory at
//! most once per generation:
//! - Cache: object arena, path hash indexes, generation counters
//! - Walker: component-by-component resolution of drive-rooted paths
//! - Native layer: pluggable OS backend (Win32, `std::fs`, in-memory mock)
//! - Config: TOML settings for flags, limits and the portable backend
//! - SharedCache: the cache behind a lock for multi-threaded callers

mod arena;
mod cache;
mod config;
mod error;
mod hash_index;
mod lookup;
mod name;
pub mod native;
mod object;
pub mod path;
mod roots;
mod shared;
mod walk;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use arena::ObjId;
pub use cache::{
    Cache, CacheFlags, CacheOptions, CacheStats, DEFAULT_LARGE_DIR_THRESHOLD, GENERATION_START,
    MISSING_GENERATION_START,
};
pub use config::{CacheConfig, CacheSection, NativeSection};
pub use error::{CacheError, LookupError, Result};
pub use name::{fold_name, names_equal};
pub use native::{NativeFs, StdFs};
#[cfg(windows)]
pub use native::Win32Fs;
pub use object::{ObjFlags, ObjKind, ObjStat, Object, UserDataKey, GEN_IGNORE};
pub use shared::SharedCache;
