//! The cache container: object arena, path hash indexes and generations

use crate::arena::{Arena, ObjId};
use crate::error::{CacheError, Result};
use crate::hash_index::PathHashIndex;
use crate::name::name_hash;
use crate::native::{NativeFs, VolumeInfo};
use crate::object::{DirData, ObjFlags, ObjKind, Object, UserDataKey, GEN_IGNORE};
use crate::path::DEFAULT_MAX_PATH_LEN;
use encoding_rs::Encoding;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::HashMap;

/// First value of the main generation counter
pub const GENERATION_START: u32 = 1;

/// First value of the missing generation counter, disjoint from the main range
pub const MISSING_GENERATION_START: u32 = 0x8000_0000;

/// Default children count above which a directory gets a name index
pub const DEFAULT_LARGE_DIR_THRESHOLD: usize = 64;

/// Negative result caching switches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheFlags {
    /// Create Missing nodes for components that do not exist
    pub cache_missing_objects: bool,
    /// Memoize failed lookups in the path hash index
    pub cache_missing_paths: bool,
}

impl Default for CacheFlags {
    fn default() -> Self {
        Self {
            cache_missing_objects: true,
            cache_missing_paths: true,
        }
    }
}

/// Tuning knobs for a cache instance
#[derive(Debug, Clone)]
pub struct CacheOptions {
    pub flags: CacheFlags,
    pub large_dir_threshold: usize,
    pub max_path_len: usize,
    /// Code page used to decode narrow (ANSI) lookup strings
    pub ansi_encoding: &'static Encoding,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            flags: CacheFlags::default(),
            large_dir_threshold: DEFAULT_LARGE_DIR_THRESHOLD,
            max_path_len: DEFAULT_MAX_PATH_LEN,
            ansi_encoding: encoding_rs::WINDOWS_1252,
        }
    }
}

/// Lookup statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub lookups: u64,
    pub hash_hits: u64,
    pub hash_refreshes: u64,
    pub walk_hits: u64,
    pub walk_misses: u64,
    pub slow_path_lookups: u64,
    pub populations: u64,
    pub objects_created: u64,
    pub objects_freed: u64,
    pub live_objects: usize,
    pub narrow_entries: usize,
    pub wide_entries: usize,
}

/// In-memory mirror of the directory hierarchy
///
/// The cache owns a synthetic root directory whose children are the drive
/// roots seen so far. It is a single mutable value with no internal
/// locking; see [`crate::SharedCache`] for use from several threads.
pub struct Cache<F: NativeFs> {
    pub(crate) native: F,
    pub(crate) objects: Arena<Object<F::Handle>>,
    pub(crate) root: ObjId,
    pub(crate) narrow: PathHashIndex<u8>,
    pub(crate) wide: PathHashIndex<u16>,
    pub(crate) generation: u32,
    pub(crate) missing_generation: u32,
    pub(crate) options: CacheOptions,
    pub(crate) stats: CacheStats,
}

impl<F: NativeFs> Cache<F> {
    /// Create an empty cache over a native file system layer
    pub fn create(native: F, flags: CacheFlags) -> Self {
        Self::with_options(
            native,
            CacheOptions {
                flags,
                ..CacheOptions::default()
            },
        )
    }

    pub fn with_options(native: F, options: CacheOptions) -> Self {
        let mut objects = Arena::new();
        let mut root = Object::new(ObjKind::Directory, "", None, None, ObjFlags::NONE, GEN_IGNORE);
        if let Some(dir) = root.dir.as_mut() {
            // Never enumerated; drive roots are linked in by the root resolver
            dir.populated = true;
            dir.enum_generation = GEN_IGNORE;
        }
        let root = objects.insert(root);

        tracing::debug!(
            "Cache created (missing objects: {}, missing paths: {})",
            options.flags.cache_missing_objects,
            options.flags.cache_missing_paths
        );

        Self {
            native,
            objects,
            root,
            narrow: PathHashIndex::new(),
            wide: PathHashIndex::new(),
            generation: GENERATION_START,
            missing_generation: MISSING_GENERATION_START,
            options,
            stats: CacheStats {
                objects_created: 1,
                ..CacheStats::default()
            },
        }
    }

    /// The native layer this cache talks to
    pub fn native(&self) -> &F {
        &self.native
    }

    pub fn flags(&self) -> CacheFlags {
        self.options.flags
    }

    pub fn options(&self) -> &CacheOptions {
        &self.options
    }

    /// The synthetic root (parent of all drive roots)
    pub fn root(&self) -> ObjId {
        self.root
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }

    pub fn missing_generation(&self) -> u32 {
        self.missing_generation
    }

    /// Invalidate every confirmed object and positive path hash entry
    pub fn bump_generation(&mut self) -> u32 {
        self.generation += 1;
        if self.generation >= MISSING_GENERATION_START {
            self.generation = GENERATION_START;
        }
        tracing::debug!("Generation bumped to {}", self.generation);
        self.generation
    }

    /// Invalidate every Missing node and negative path hash entry
    pub fn bump_missing_generation(&mut self) -> u32 {
        self.missing_generation += 1;
        if self.missing_generation == GEN_IGNORE {
            self.missing_generation = MISSING_GENERATION_START;
        }
        tracing::debug!("Missing generation bumped to {}", self.missing_generation);
        self.missing_generation
    }

    /// Snapshot of the statistics counters
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            live_objects: self.objects.len(),
            narrow_entries: self.narrow.len(),
            wide_entries: self.wide.len(),
            ..self.stats.clone()
        }
    }

    pub fn object(&self, id: ObjId) -> Option<&Object<F::Handle>> {
        self.objects.get(id)
    }

    /// Does the handle still refer to a live object?
    pub fn is_live(&self, id: ObjId) -> bool {
        self.objects.contains(id)
    }

    pub fn kind(&self, id: ObjId) -> Option<ObjKind> {
        self.objects.get(id).map(Object::kind)
    }

    /// Children of a directory, in enumeration order
    pub fn children(&self, dir: ObjId) -> &[ObjId] {
        self.objects
            .get(dir)
            .and_then(|o| o.dir.as_ref())
            .map(|d| d.children.as_slice())
            .unwrap_or_default()
    }

    /// Volume information recorded for a drive root
    pub fn volume_info(&self, drive: ObjId) -> Option<&VolumeInfo> {
        self.objects
            .get(drive)
            .and_then(|o| o.dir.as_ref())
            .and_then(|d| d.volume.as_ref())
    }

    /// Take an additional reference
    pub fn retain(&mut self, id: ObjId) -> Result<ObjId> {
        let obj = self.objects.get_mut(id).ok_or(CacheError::StaleObject)?;
        obj.refs += 1;
        Ok(id)
    }

    /// Drop a reference, destroying the object when none remain
    ///
    /// The synthetic root is owned by the cache and is never released.
    pub fn release(&mut self, id: ObjId) -> u32 {
        let Some(obj) = self.objects.get_mut(id) else {
            tracing::error!("Release of stale object {}", id);
            return 0;
        };
        if id == self.root {
            tracing::warn!("Ignoring release of the root object");
            return obj.refs;
        }
        debug_assert!(obj.refs > 0);

        obj.refs = obj.refs.saturating_sub(1);
        let refs = obj.refs;
        if refs == 0 {
            self.destroy(id);
        }
        refs
    }

    fn destroy(&mut self, id: ObjId) {
        let mut pending = vec![id];
        while let Some(id) = pending.pop() {
            let Some(mut obj) = self.objects.remove(id) else {
                continue;
            };
            self.stats.objects_freed += 1;

            // Closes the native handle when `dir` goes out of scope
            if let Some(dir) = obj.dir.take() {
                for child in dir.children {
                    if let Some(c) = self.objects.get_mut(child) {
                        c.refs -= 1;
                        if c.refs == 0 {
                            pending.push(child);
                        }
                    }
                }
            }
            // User data destructors run here
            drop(obj);
        }
    }

    /// Release the children of a directory that stopped being one
    pub(crate) fn release_dir_data(&mut self, dir: DirData<F::Handle>) {
        for child in dir.children {
            self.release(child);
        }
    }

    /// Attach typed user data. Returns `None` if the key is in use or the
    /// object is gone.
    pub fn add_user_data<T: Any + Send>(
        &mut self,
        id: ObjId,
        key: UserDataKey,
        value: T,
    ) -> Option<&mut T> {
        self.objects.get_mut(id)?.add_user_data(key, value)
    }

    pub fn user_data<T: Any>(&self, id: ObjId, key: UserDataKey) -> Option<&T> {
        self.objects.get(id)?.user_data(key)
    }

    pub fn user_data_mut<T: Any>(&mut self, id: ObjId, key: UserDataKey) -> Option<&mut T> {
        self.objects.get_mut(id)?.user_data_mut(key)
    }

    /// Remove (and drop) a user data entry
    pub fn remove_user_data(&mut self, id: ObjId, key: UserDataKey) -> bool {
        self.objects
            .get_mut(id)
            .is_some_and(|o| o.remove_user_data(key))
    }

    /// Full path, rebuilt from the parent chain
    pub fn full_path(&self, id: ObjId, separator: char) -> Result<String> {
        self.build_path(id, separator, false)
    }

    /// Full path, failing if it would not fit in `capacity` bytes
    pub fn full_path_with_limit(&self, id: ObjId, separator: char, capacity: usize) -> Result<String> {
        let path = self.full_path(id, separator)?;
        if path.len() > capacity {
            return Err(CacheError::BufferTooSmall { needed: path.len() });
        }
        Ok(path)
    }

    /// Full path spelled with 8.3 aliases where an object has one
    pub fn short_full_path(&self, id: ObjId, separator: char) -> Result<String> {
        self.build_path(id, separator, true)
    }

    fn build_path(&self, id: ObjId, separator: char, short: bool) -> Result<String> {
        let mut chain = Vec::new();
        let mut cur = id;
        loop {
            let obj = self.objects.get(cur).ok_or(CacheError::StaleObject)?;
            let Some(parent) = obj.parent else {
                break;
            };
            let name = if short {
                obj.short_name().unwrap_or(obj.name())
            } else {
                obj.name()
            };
            chain.push(name);
            cur = parent;
        }

        let mut path = String::with_capacity(chain.iter().map(|n| n.len() + 1).sum());
        for (i, name) in chain.iter().rev().enumerate() {
            if i > 0 {
                path.push(separator);
            }
            path.push_str(name);
        }
        if chain.len() == 1 {
            // Drive root: `C:` alone would be drive relative
            path.push(separator);
        }
        Ok(path)
    }

    /// Close every cached directory handle; contents stay cached
    pub fn close_directory_handles(&mut self) -> usize {
        let mut closed = 0;
        for obj in self.objects.values_mut() {
            if let Some(handle) = obj.dir.as_mut().and_then(|d| d.handle.take()) {
                drop(handle);
                closed += 1;
            }
        }
        tracing::debug!("Closed {} directory handles", closed);
        closed
    }

    /// Create a child object and link it into `parent`
    pub(crate) fn create_child(
        &mut self,
        parent: ObjId,
        kind: ObjKind,
        name: &str,
        short_name: Option<&str>,
        generation: u32,
    ) -> Option<ObjId> {
        let flags = self.objects.get(parent)?.flags.inherited();
        let id = self
            .objects
            .insert(Object::new(kind, name, short_name, Some(parent), flags, generation));
        self.stats.objects_created += 1;

        let dir = self.objects.get_mut(parent)?.dir.as_mut()?;
        dir.children.push(id);
        if let Some(index) = dir.index.as_mut() {
            index.entry(name_hash(name)).or_default().push(id);
            if let Some(short) = short_name {
                index.entry(name_hash(short)).or_default().push(id);
            }
        }
        Some(id)
    }

    /// Rebuild (or drop) the name index of a directory after enumeration
    pub(crate) fn rebuild_child_index(&mut self, dir: ObjId) {
        let children = self.children(dir).to_vec();
        let index = if children.len() > self.options.large_dir_threshold {
            let mut index: HashMap<u64, Vec<ObjId>> = HashMap::with_capacity(children.len());
            for child in children {
                let Some(obj) = self.objects.get(child) else {
                    continue;
                };
                index.entry(name_hash(obj.name())).or_default().push(child);
                if let Some(short) = obj.short_name() {
                    index.entry(name_hash(short)).or_default().push(child);
                }
            }
            Some(index)
        } else {
            None
        };

        if let Some(d) = self.objects.get_mut(dir).and_then(|o| o.dir.as_mut()) {
            d.index = index;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockFs;

    fn cache() -> Cache<MockFs> {
        let fs = MockFs::new();
        fs.add_volume('C', "NTFS");
        fs.add_file("C:\\src\\main.c", 100);
        Cache::create(fs, CacheFlags::default())
    }

    #[test]
    fn test_create() {
        let cache = cache();
        assert_eq!(cache.generation(), GENERATION_START);
        assert_eq!(cache.missing_generation(), MISSING_GENERATION_START);

        let root = cache.object(cache.root()).unwrap();
        assert!(root.is_dir());
        assert!(root.parent().is_none());
        assert_eq!(root.generation(), GEN_IGNORE);
        assert_eq!(cache.stats().live_objects, 1);
    }

    #[test]
    fn test_generation_ranges_stay_disjoint() {
        let mut cache = cache();
        cache.generation = MISSING_GENERATION_START - 1;
        assert_eq!(cache.bump_generation(), GENERATION_START);

        cache.missing_generation = GEN_IGNORE - 1;
        assert_eq!(cache.bump_missing_generation(), MISSING_GENERATION_START);
    }

    #[test]
    fn test_full_path_round_trip() {
        let mut cache = cache();
        let id = cache.lookup("C:\\src\\main.c").unwrap();

        assert_eq!(cache.full_path(id, '\\').unwrap(), "C:\\src\\main.c");
        assert_eq!(cache.full_path(id, '/').unwrap(), "C:/src/main.c");

        let drive = cache.lookup("c:\\").unwrap();
        assert_eq!(cache.full_path(drive, '\\').unwrap(), "C:\\");
        assert_eq!(cache.full_path(cache.root(), '\\').unwrap(), "");
    }

    #[test]
    fn test_full_path_buffer_too_small() {
        let mut cache = cache();
        let id = cache.lookup("C:\\src\\main.c").unwrap();

        assert!(cache.full_path_with_limit(id, '\\', 13).is_ok());
        match cache.full_path_with_limit(id, '\\', 12) {
            Err(CacheError::BufferTooSmall { needed }) => assert_eq!(needed, 13),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_short_full_path() {
        let fs = MockFs::new();
        fs.add_volume('C', "NTFS");
        fs.add_dir("C:\\Program Files");
        fs.add_file_with_short_name("C:\\Program Files\\LongDocument.txt", "LONGDO~1.TXT");
        let mut cache = Cache::create(fs, CacheFlags::default());

        let id = cache.lookup("C:\\Program Files\\longdo~1.txt").unwrap();
        assert_eq!(
            cache.full_path(id, '\\').unwrap(),
            "C:\\Program Files\\LongDocument.txt"
        );
        assert_eq!(
            cache.short_full_path(id, '\\').unwrap(),
            "C:\\Program Files\\LONGDO~1.TXT"
        );
    }

    #[test]
    fn test_retain_release_discipline() {
        let mut cache = cache();
        let id = cache.lookup("C:\\src\\main.c").unwrap();
        let before = cache.object(id).unwrap().refcount();

        cache.retain(id).unwrap();
        assert_eq!(cache.object(id).unwrap().refcount(), before + 1);
        assert_eq!(cache.release(id), before);
        assert_eq!(cache.release(id), before - 1);
        // Still linked into its parent
        assert!(cache.object(id).is_some());
    }

    #[test]
    fn test_releasing_directory_releases_children_once() {
        let mut cache = cache();
        let src = cache.lookup("C:\\src").unwrap();
        let file = cache.lookup("C:\\src\\main.c").unwrap();
        assert_eq!(cache.object(file).unwrap().refcount(), 2);

        // Detach `src` from its parent the way a refresh would
        let drive = cache.object(src).unwrap().parent().unwrap();
        if let Some(d) = cache.objects.get_mut(drive).and_then(|o| o.dir.as_mut()) {
            d.children.retain(|&c| c != src);
        }
        let live = cache.stats().live_objects;

        assert_eq!(cache.release(src), 1);
        assert_eq!(cache.release(src), 0);
        assert!(cache.object(src).is_none());
        // The child survives on the caller's reference alone
        assert_eq!(cache.object(file).unwrap().refcount(), 1);
        assert_eq!(cache.stats().live_objects, live - 1);

        assert_eq!(cache.release(file), 0);
        assert!(cache.object(file).is_none());
        assert_eq!(cache.release(file), 0);
    }

    #[test]
    fn test_root_is_never_released() {
        let mut cache = cache();
        let root = cache.root();
        let refs = cache.object(root).unwrap().refcount();

        assert_eq!(cache.release(root), refs);
        assert_eq!(cache.release(root), refs);
        assert!(cache.is_live(root));

        // Drives still resolve under the root
        let id = cache.lookup("C:\\src\\main.c").unwrap();
        assert_eq!(cache.kind(id), Some(ObjKind::File));
    }

    #[test]
    fn test_user_data_on_objects() {
        let mut cache = cache();
        let id = cache.lookup("C:\\src\\main.c").unwrap();

        *cache.add_user_data(id, 1, 0u64).unwrap() = 5;
        assert!(cache.add_user_data(id, 1, 0u64).is_none());
        assert_eq!(cache.user_data::<u64>(id, 1), Some(&5));
        *cache.user_data_mut::<u64>(id, 1).unwrap() += 1;
        assert_eq!(cache.user_data::<u64>(id, 1), Some(&6));
        assert!(cache.remove_user_data(id, 1));
        assert!(cache.user_data::<u64>(id, 1).is_none());
    }

    #[test]
    fn test_close_directory_handles_keeps_contents() {
        let mut cache = cache();
        let id = cache.lookup("C:\\src\\main.c").unwrap();
        assert!(cache.close_directory_handles() >= 2);
        assert_eq!(cache.close_directory_handles(), 0);
        assert_eq!(cache.lookup("C:\\src\\main.c").unwrap(), id);
    }
}
