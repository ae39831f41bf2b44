//! Absolute path walker and directory population
//!
//! The walker descends from a drive root one component at a time,
//! (re-)enumerating directories whose contents are missing or stale.

use crate::arena::ObjId;
use crate::cache::Cache;
use crate::error::LookupError;
use crate::name::{fold_name, name_hash};
use crate::native::{DirEntryInfo, Enumeration, NativeFs};
use crate::object::{ObjFlags, ObjKind, ObjStat, GEN_IGNORE};
use crate::path::{classify, components, has_dot_components, PathRoot};
use std::collections::HashMap;

impl<F: NativeFs> Cache<F> {
    /// Resolve a drive-rooted, dot-free path. The result is not retained.
    pub(crate) fn lookup_absolute(&mut self, path: &str) -> Result<ObjId, LookupError> {
        let PathRoot::Drive { letter, rest } = classify(path) else {
            return Err(match classify(path) {
                PathRoot::Unc => LookupError::Unsupported,
                _ => LookupError::InternalError,
            });
        };
        debug_assert!(!has_dot_components(rest));

        let mut dir = self.resolve_drive(letter)?;
        let mut comps = components(rest).peekable();
        if comps.peek().is_some() && self.is_missing(dir) {
            return Err(LookupError::PathCompNotFound);
        }

        for comp in comps {
            self.ensure_populated(dir, false)?;

            let mut found = self.find_child(dir, comp.name);
            if let Some(child) = found {
                if self.is_stale_missing(child) {
                    // Confirm the absence before trusting it again
                    self.ensure_populated(dir, true)?;
                    found = self.find_child(dir, comp.name);
                }
            }
            if found.is_none() && self.options.flags.cache_missing_objects {
                found = self.create_missing(dir, comp.name);
            }

            let kind = found.and_then(|id| self.kind(id));
            if comp.is_last {
                return match (found, kind) {
                    (Some(id), Some(ObjKind::Directory | ObjKind::Missing)) => Ok(id),
                    (Some(_), Some(_)) if comp.trailing_separators > 0 => Err(LookupError::NotDir),
                    (Some(id), Some(_)) => Ok(id),
                    _ => Err(LookupError::NotFound),
                };
            }

            match (found, kind) {
                (Some(id), Some(ObjKind::Directory)) => dir = id,
                (Some(_), Some(ObjKind::Missing)) | (None, _) => {
                    return Err(LookupError::PathCompNotFound)
                }
                (Some(_), _) => return Err(LookupError::PathCompNotDir),
            }
        }

        Ok(dir)
    }

    pub(crate) fn is_missing(&self, id: ObjId) -> bool {
        self.objects.get(id).is_some_and(|o| o.is_missing())
    }

    /// Missing node whose absence was confirmed before the last missing
    /// generation bump
    pub(crate) fn is_stale_missing(&self, id: ObjId) -> bool {
        self.objects.get(id).is_some_and(|o| {
            o.is_missing() && o.generation != GEN_IGNORE && o.generation != self.missing_generation
        })
    }

    fn needs_population(&self, dir: ObjId) -> bool {
        self.objects
            .get(dir)
            .and_then(|o| o.dir.as_ref())
            .is_some_and(|d| {
                !d.populated
                    || (d.enum_generation != GEN_IGNORE && d.enum_generation != self.generation)
            })
    }

    /// Make sure a directory's children reflect an enumeration taken at the
    /// current generation. `force` re-enumerates even when fresh.
    pub(crate) fn ensure_populated(&mut self, dir: ObjId, force: bool) -> Result<(), LookupError> {
        let obj = self.objects.get(dir).ok_or(LookupError::InternalError)?;
        let d = obj.dir.as_ref().ok_or(LookupError::NotDir)?;
        if d.enum_generation == GEN_IGNORE && d.populated {
            // The synthetic root
            return Ok(());
        }
        if !force && !self.needs_population(dir) {
            return Ok(());
        }
        self.populate(dir)
    }

    /// Public form of [`Cache::ensure_populated`] for collaborators
    pub fn ensure_directory_populated(&mut self, dir: ObjId) -> bool {
        match self.ensure_populated(dir, false) {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!("Population of {} failed: {}", dir, e);
                false
            }
        }
    }

    fn populate(&mut self, dir: ObjId) -> Result<(), LookupError> {
        let path = self
            .full_path(dir, '\\')
            .map_err(|_| LookupError::InternalError)?;

        let cached = self
            .objects
            .get_mut(dir)
            .and_then(|o| o.dir.as_mut())
            .and_then(|d| d.handle.take());
        let mut handle = match cached {
            Some(handle) => handle,
            None => self.native.open_directory(&path).map_err(|e| {
                tracing::debug!("Cannot open {}: {}", path, e);
                self.mark_unpopulated(dir);
                LookupError::DirOpenError
            })?,
        };

        // Collect everything before touching the tree so a failure mid-way
        // leaves the old children intact
        let mut entries = Vec::new();
        let mut restart = true;
        loop {
            match self.native.enumerate(&mut handle, restart, &mut entries) {
                Ok(Enumeration::More) => restart = false,
                Ok(Enumeration::Done) => break,
                Err(e) => {
                    tracing::warn!("Enumeration of {} failed: {}", path, e);
                    self.mark_unpopulated(dir);
                    return Err(LookupError::DirReadError);
                }
            }
        }

        tracing::debug!("Populated {} ({} entries)", path, entries.len());
        self.apply_enumeration(dir, entries);
        self.stats.populations += 1;

        if let Some(d) = self.objects.get_mut(dir).and_then(|o| o.dir.as_mut()) {
            d.handle = Some(handle);
        }
        Ok(())
    }

    fn mark_unpopulated(&mut self, dir: ObjId) {
        if let Some(d) = self.objects.get_mut(dir).and_then(|o| o.dir.as_mut()) {
            d.populated = false;
        }
    }

    /// Merge a complete enumeration into the directory's children
    fn apply_enumeration(&mut self, dir: ObjId, entries: Vec<DirEntryInfo>) {
        let generation = self.generation;
        let missing_generation = self.missing_generation;

        let mut existing: HashMap<String, ObjId> = self
            .children(dir)
            .iter()
            .filter_map(|&c| {
                let obj = self.objects.get(c)?;
                Some((fold_name(obj.name()).into_owned(), c))
            })
            .collect();

        for info in entries.iter().filter(|e| !e.is_dot_entry()) {
            let kind = ObjKind::from(info.kind);

            // A Missing node created under the 8.3 alias is the same entry
            let primary = existing.remove(fold_name(&info.name).as_ref());
            let alias = info
                .short_name
                .as_deref()
                .and_then(|short| existing.remove(fold_name(short).as_ref()));
            let (found, duplicate) = match (primary, alias) {
                (Some(primary), alias) => (Some(primary), alias),
                (None, alias) => (alias, None),
            };
            if let Some(duplicate) = duplicate {
                self.unlink_child(dir, duplicate);
            }

            let Some(child) = found else {
                if let Some(child) =
                    self.create_child(dir, kind, &info.name, info.short_name.as_deref(), generation)
                {
                    if let Some(obj) = self.objects.get_mut(child) {
                        obj.stat = Some(ObjStat::from(info));
                    }
                }
                continue;
            };

            let Some(obj) = self.objects.get_mut(child) else {
                continue;
            };
            if *obj.name != *info.name {
                obj.name = info.name.as_str().into();
            }
            obj.short_name = info.short_name.as_deref().map(Into::into);
            obj.stat = Some(ObjStat::from(info));
            obj.generation = generation;
            if let Some(old) = obj.set_kind(kind) {
                self.release_dir_data(old);
            }
        }

        // Whatever was not reported is gone
        let keep_missing = self.options.flags.cache_missing_objects;
        for (_, child) in existing {
            if !keep_missing {
                self.unlink_child(dir, child);
                continue;
            }
            let Some(obj) = self.objects.get_mut(child) else {
                continue;
            };
            obj.generation = missing_generation;
            obj.stat = None;
            obj.short_name = None;
            if let Some(old) = obj.set_kind(ObjKind::Missing) {
                tracing::debug!("Directory {} vanished", obj.name());
                self.release_dir_data(old);
            }
        }

        if let Some(d) = self.objects.get_mut(dir).and_then(|o| o.dir.as_mut()) {
            d.populated = true;
            d.enum_generation = generation;
        }
        self.rebuild_child_index(dir);
    }

    /// Drop a child from its directory. Callers still holding it see a
    /// detached Missing object.
    fn unlink_child(&mut self, dir: ObjId, child: ObjId) {
        if let Some(d) = self.objects.get_mut(dir).and_then(|o| o.dir.as_mut()) {
            d.children.retain(|&c| c != child);
        }
        let missing_generation = self.missing_generation;
        if let Some(obj) = self.objects.get_mut(child) {
            tracing::trace!("Unlinking {}", obj.name());
            obj.flags = obj.flags | ObjFlags::DETACHED;
            obj.generation = missing_generation;
            obj.stat = None;
            if let Some(old) = obj.set_kind(ObjKind::Missing) {
                self.release_dir_data(old);
            }
        }
        self.release(child);
    }

    /// Find a child by primary or short name, ignoring case
    pub(crate) fn find_child(&self, dir: ObjId, name: &str) -> Option<ObjId> {
        let d = self.objects.get(dir)?.dir.as_ref()?;
        let matches = |id: &ObjId| self.objects.get(*id).is_some_and(|o| o.matches_name(name));

        match d.index.as_ref() {
            Some(index) => index.get(&name_hash(name))?.iter().copied().find(|id| matches(id)),
            None => d.children.iter().copied().find(|id| matches(id)),
        }
    }

    fn create_missing(&mut self, dir: ObjId, name: &str) -> Option<ObjId> {
        let generation = self.missing_generation;
        self.create_child(dir, ObjKind::Missing, name, None, generation)
    }
}

#[cfg(test)]
mod tests {
    use crate::cache::{Cache, CacheFlags, CacheOptions};
    use crate::error::LookupError;
    use crate::object::{ObjFlags, ObjKind};
    use crate::testing::MockFs;

    fn mock() -> MockFs {
        let fs = MockFs::new();
        fs.add_volume('C', "NTFS");
        fs.add_file("C:\\src\\main.c", 10);
        fs.add_file("C:\\src\\util.h", 20);
        fs.add_dir("C:\\src\\lib");
        fs
    }

    fn no_negative_caching() -> CacheFlags {
        CacheFlags {
            cache_missing_objects: false,
            cache_missing_paths: false,
        }
    }

    #[test]
    fn test_walk_creates_objects_lazily() {
        let mut cache = Cache::create(mock(), CacheFlags::default());
        let id = cache.lookup_absolute("C:\\src\\main.c").unwrap();

        let obj = cache.object(id).unwrap();
        assert_eq!(obj.kind(), ObjKind::File);
        assert_eq!(obj.name(), "main.c");
        assert_eq!(obj.stat().map(|s| s.size), Some(10));

        // Only the directories on the path were enumerated
        assert_eq!(cache.native().populations("C:\\"), 1);
        assert_eq!(cache.native().populations("C:\\src"), 1);
        assert_eq!(cache.native().populations("C:\\src\\lib"), 0);
    }

    #[test]
    fn test_walk_errors() {
        let mut cache = Cache::create(mock(), no_negative_caching());

        assert_eq!(cache.lookup_absolute("C:\\nope"), Err(LookupError::NotFound));
        assert_eq!(
            cache.lookup_absolute("C:\\nope\\x.c"),
            Err(LookupError::PathCompNotFound)
        );
        assert_eq!(
            cache.lookup_absolute("C:\\src\\main.c\\x"),
            Err(LookupError::PathCompNotDir)
        );
        assert_eq!(
            cache.lookup_absolute("C:\\src\\main.c\\"),
            Err(LookupError::NotDir)
        );
        assert!(cache.lookup_absolute("C:\\src\\lib\\").is_ok());
        assert_eq!(
            cache.lookup_absolute("\\\\server\\share\\x"),
            Err(LookupError::Unsupported)
        );
    }

    #[test]
    fn test_missing_intermediate_component() {
        let mut cache = Cache::create(mock(), CacheFlags::default());
        let missing = cache.lookup_absolute("C:\\gone").unwrap();
        assert_eq!(cache.kind(missing), Some(ObjKind::Missing));

        assert_eq!(
            cache.lookup_absolute("C:\\gone\\deeper\\x.c"),
            Err(LookupError::PathCompNotFound)
        );
        // The missing node is not enumerated
        assert_eq!(cache.native().populations("C:\\gone"), 0);
    }

    #[test]
    fn test_multi_call_enumeration() {
        let fs = mock();
        for i in 0..10 {
            fs.add_file(&format!("C:\\big\\f{}.o", i), 0);
        }
        fs.set_batch_size(3);
        let mut cache = Cache::create(fs, CacheFlags::default());

        assert!(cache.lookup_absolute("C:\\big\\f9.o").is_ok());
        let big = cache.lookup_absolute("C:\\big").unwrap();
        assert_eq!(cache.object(big).unwrap().child_count(), 10);
        assert_eq!(cache.native().populations("C:\\big"), 1);
    }

    #[test]
    fn test_large_directory_index() {
        let fs = mock();
        for i in 0..40 {
            fs.add_file(&format!("C:\\gen\\Obj{:02}.obj", i), 0);
        }
        let options = CacheOptions {
            large_dir_threshold: 16,
            ..CacheOptions::default()
        };
        let mut cache = Cache::with_options(fs, options);

        let a = cache.lookup_absolute("C:\\gen\\obj07.OBJ").unwrap();
        assert_eq!(cache.object(a).unwrap().name(), "Obj07.obj");

        // Missing children are added to the index too
        let m1 = cache.lookup_absolute("C:\\gen\\none.obj").unwrap();
        let m2 = cache.lookup_absolute("C:\\gen\\NONE.OBJ").unwrap();
        assert_eq!(m1, m2);
        let gen = cache.lookup_absolute("C:\\gen").unwrap();
        assert_eq!(cache.object(gen).unwrap().child_count(), 41);
    }

    #[test]
    fn test_enumeration_failure_keeps_tree() {
        let mut cache = Cache::create(mock(), CacheFlags::default());
        let src = cache.lookup_absolute("C:\\src").unwrap();
        let main = cache.lookup_absolute("C:\\src\\main.c").unwrap();

        cache.native().fail_enumerate("C:\\src", true);
        cache.bump_generation();
        assert_eq!(
            cache.lookup_absolute("C:\\src\\main.c"),
            Err(LookupError::DirReadError)
        );
        assert!(!cache.object(src).unwrap().is_populated());
        assert!(cache.object(main).is_some());

        // A later retry re-attempts the enumeration
        cache.native().fail_enumerate("C:\\src", false);
        assert_eq!(cache.lookup_absolute("C:\\src\\main.c"), Ok(main));
        assert!(cache.object(src).unwrap().is_populated());
    }

    #[test]
    fn test_refresh_updates_in_place() {
        let mut cache = Cache::create(mock(), CacheFlags::default());
        let main = cache.lookup_absolute("C:\\src\\main.c").unwrap();
        let lib = cache.lookup_absolute("C:\\src\\lib").unwrap();
        let _ = cache.lookup_absolute("C:\\src\\lib\\inner.c");
        let lib_children = cache.object(lib).unwrap().child_count();
        assert_eq!(lib_children, 1);

        cache.native().remove("C:\\src\\main.c");
        cache.native().remove("C:\\src\\lib");
        cache.native().add_file("C:\\src\\new.c", 1);
        cache.bump_generation();

        let new = cache.lookup_absolute("C:\\src\\new.c").unwrap();
        assert_eq!(cache.kind(new), Some(ObjKind::File));
        // Same handles, now marked missing
        assert_eq!(cache.kind(main), Some(ObjKind::Missing));
        assert_eq!(cache.kind(lib), Some(ObjKind::Missing));
        assert_eq!(cache.object(lib).unwrap().child_count(), 0);
    }

    #[test]
    fn test_missing_then_created() {
        let mut cache = Cache::create(mock(), CacheFlags::default());
        let id = cache.lookup_absolute("C:\\src\\later.c").unwrap();
        assert_eq!(cache.kind(id), Some(ObjKind::Missing));

        cache.native().add_file("C:\\src\\LATER.c", 5);
        cache.bump_missing_generation();

        // The parent is still fresh, but the stale missing node forces a re-read
        assert_eq!(cache.lookup_absolute("C:\\src\\later.c"), Ok(id));
        let obj = cache.object(id).unwrap();
        assert_eq!(obj.kind(), ObjKind::File);
        assert_eq!(obj.name(), "LATER.c");
        assert_eq!(cache.native().populations("C:\\src"), 2);
    }

    #[test]
    fn test_ensure_directory_populated() {
        let mut cache = Cache::create(mock(), CacheFlags::default());
        let src = cache.lookup_absolute("C:\\src\\lib").unwrap();
        let src = cache.object(src).unwrap().parent().unwrap();
        assert!(cache.ensure_directory_populated(src));
        assert_eq!(cache.object(src).unwrap().child_count(), 3);

        let main = cache.lookup_absolute("C:\\src\\main.c").unwrap();
        assert!(!cache.ensure_directory_populated(main));
    }

    #[test]
    fn test_open_failure_is_retried() {
        let mut cache = Cache::create(mock(), CacheFlags::default());
        cache.native().fail_open("C:\\src", true);

        assert_eq!(
            cache.lookup_absolute("C:\\src\\main.c"),
            Err(LookupError::DirOpenError)
        );
        let src = cache.lookup_absolute("C:\\src").unwrap();
        assert!(!cache.object(src).unwrap().is_populated());
        assert_eq!(cache.native().populations("C:\\src"), 0);

        cache.native().fail_open("C:\\src", false);
        let main = cache.lookup_absolute("C:\\src\\main.c").unwrap();
        assert_eq!(cache.kind(main), Some(ObjKind::File));
        assert!(cache.object(src).unwrap().is_populated());
    }

    #[test]
    fn test_refresh_reuses_directory_handles() {
        let mut cache = Cache::create(mock(), CacheFlags::default());
        cache.lookup_absolute("C:\\src\\main.c").unwrap();
        let opens = cache.native().open_calls();
        assert_eq!(opens, 2);

        cache.bump_generation();
        cache.lookup_absolute("C:\\src\\main.c").unwrap();
        assert_eq!(cache.native().open_calls(), opens);
        assert_eq!(cache.native().populations("C:\\"), 2);
        assert_eq!(cache.native().populations("C:\\src"), 2);

        // Closed handles are reopened on the next refresh
        cache.close_directory_handles();
        cache.bump_generation();
        cache.lookup_absolute("C:\\src\\main.c").unwrap();
        assert_eq!(cache.native().open_calls(), opens + 2);
    }

    #[test]
    fn test_missing_alias_becomes_the_real_entry() {
        let mut cache = Cache::create(mock(), CacheFlags::default());
        let short = cache.lookup_absolute("C:\\src\\LONGDO~1.TXT").unwrap();
        assert_eq!(cache.kind(short), Some(ObjKind::Missing));

        cache
            .native()
            .add_file_with_short_name("C:\\src\\LongDocument.txt", "LONGDO~1.TXT");
        cache.bump_generation();
        cache.bump_missing_generation();

        let long = cache.lookup_absolute("C:\\src\\LongDocument.txt").unwrap();
        assert_eq!(long, short);
        assert_eq!(cache.lookup_absolute("C:\\src\\longdo~1.txt"), Ok(long));

        let obj = cache.object(long).unwrap();
        assert_eq!(obj.kind(), ObjKind::File);
        assert_eq!(obj.name(), "LongDocument.txt");
        assert_eq!(obj.short_name(), Some("LONGDO~1.TXT"));
    }

    #[test]
    fn test_alias_duplicate_is_unlinked() {
        let mut cache = Cache::create(mock(), CacheFlags::default());
        let long = cache.lookup("C:\\src\\LongDocument.txt").unwrap();
        let short = cache.lookup("C:\\src\\LONGDO~1.TXT").unwrap();
        assert_ne!(long, short);

        cache
            .native()
            .add_file_with_short_name("C:\\src\\LongDocument.txt", "LONGDO~1.TXT");
        cache.bump_generation();
        cache.bump_missing_generation();

        let by_short = cache.lookup("C:\\src\\LONGDO~1.TXT").unwrap();
        let by_long = cache.lookup("C:\\src\\LongDocument.txt").unwrap();
        assert_eq!(by_short, long);
        assert_eq!(by_long, long);
        assert_eq!(cache.kind(long), Some(ObjKind::File));

        // The caller's reference keeps the alias node alive, outside the tree
        let alias = cache.object(short).unwrap();
        assert_eq!(alias.kind(), ObjKind::Missing);
        assert!(alias.flags().contains(ObjFlags::DETACHED));
        let src = cache.lookup_absolute("C:\\src").unwrap();
        assert_eq!(cache.object(src).unwrap().child_count(), 4);

        assert_eq!(cache.release(short), 0);
        assert!(cache.object(short).is_none());
    }

    #[test]
    fn test_vanished_entries_without_missing_nodes() {
        let mut cache = Cache::create(mock(), no_negative_caching());
        let held = cache.lookup("C:\\src\\main.c").unwrap();
        assert_eq!(cache.kind(held), Some(ObjKind::File));

        cache.native().remove("C:\\src\\main.c");
        cache.native().remove("C:\\src\\lib");
        cache.bump_generation();

        // Same answers as for paths that never existed
        assert_eq!(cache.lookup("C:\\src\\main.c"), Err(LookupError::NotFound));
        assert_eq!(cache.lookup("C:\\src\\never.c"), Err(LookupError::NotFound));
        assert_eq!(
            cache.lookup("C:\\src\\lib\\x.c"),
            Err(LookupError::PathCompNotFound)
        );

        let obj = cache.object(held).unwrap();
        assert_eq!(obj.kind(), ObjKind::Missing);
        assert!(obj.flags().contains(ObjFlags::DETACHED));
        let src = cache.lookup_absolute("C:\\src").unwrap();
        assert_eq!(cache.object(src).unwrap().child_count(), 1);

        assert_eq!(cache.release(held), 0);
        assert!(cache.object(held).is_none());
    }

    #[test]
    fn test_expanding_case_mappings_do_not_match() {
        let fs = mock();
        fs.add_file("C:\\d\\STRASSE.h", 1);
        fs.add_file("C:\\d\\straße.c", 2);
        let mut cache = Cache::create(fs, CacheFlags::default());

        assert_eq!(
            cache.lookup_no_missing("C:\\d\\straße.h"),
            Err(LookupError::NotFound)
        );
        let c = cache.lookup_no_missing("C:\\d\\STRAßE.C").unwrap();
        assert_eq!(cache.object(c).unwrap().name(), "straße.c");
        assert_eq!(
            cache.lookup_no_missing("C:\\d\\STRASSE.C"),
            Err(LookupError::NotFound)
        );
    }
}
