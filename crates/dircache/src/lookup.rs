//! Public lookup entry points
//!
//! Every lookup consults the path hash index for the literal string first.
//! Misses and stale entries go to the absolute walker, or through the
//! native canonicalizer first when the path is relative or has dot
//! components. The outcome is memoized under the literal string.

use crate::arena::ObjId;
use crate::cache::Cache;
use crate::error::LookupError;
use crate::hash_index::PathHashIndex;
use crate::native::NativeFs;
use crate::object::{ObjFlags, GEN_IGNORE};
use crate::path::{classify, has_dot_components, is_walkable, PathRoot};

/// Length in UTF-16 code units, the unit `max_path_len` is counted in
fn utf16_len(path: &str) -> usize {
    // Fast path: ASCII is one unit per byte
    if path.is_ascii() {
        path.len()
    } else {
        path.encode_utf16().count()
    }
}

impl<F: NativeFs> Cache<F> {
    /// Look up a path. On success the object is retained once on behalf of
    /// the caller, who must [`Cache::release`] it.
    ///
    /// A path that does not exist comes back as an object of kind
    /// [`crate::ObjKind::Missing`] when Missing nodes are enabled; use
    /// [`Cache::lookup_no_missing`] to get `NotFound` instead.
    pub fn lookup(&mut self, path: &str) -> Result<ObjId, LookupError> {
        self.stats.lookups += 1;
        if utf16_len(path) > self.options.max_path_len {
            return Err(LookupError::PathTooLong);
        }

        let units = path.as_bytes();
        let hash = PathHashIndex::<u8>::hash(units);
        let cached = self.narrow.get(hash, units).map(|e| (e.generation, e.result));

        let result = match cached {
            Some((generation, result)) if self.is_entry_fresh(generation, result) => {
                self.stats.hash_hits += 1;
                tracing::trace!("Hash hit: {}", path);
                result
            }
            stale => {
                if stale.is_some() {
                    self.stats.hash_refreshes += 1;
                }
                let result = self.resolve(path);
                match self.entry_generation(result) {
                    Some(generation) => self.narrow.insert(hash, units, generation, result),
                    None => {
                        self.narrow.remove(hash, units);
                    }
                }
                result
            }
        };
        self.hand_out(result)
    }

    /// Wide (UTF-16) variant of [`Cache::lookup`] with its own hash index
    pub fn lookup_wide(&mut self, path: &[u16]) -> Result<ObjId, LookupError> {
        self.stats.lookups += 1;
        if path.len() > self.options.max_path_len {
            return Err(LookupError::PathTooLong);
        }

        let hash = PathHashIndex::<u16>::hash(path);
        let cached = self.wide.get(hash, path).map(|e| (e.generation, e.result));

        let result = match cached {
            Some((generation, result)) if self.is_entry_fresh(generation, result) => {
                self.stats.hash_hits += 1;
                result
            }
            stale => {
                if stale.is_some() {
                    self.stats.hash_refreshes += 1;
                }
                let result = String::from_utf16(path)
                    .map_err(|_| LookupError::TextConversionError)
                    .and_then(|utf8| self.resolve(&utf8));
                match self.entry_generation(result) {
                    Some(generation) => self.wide.insert(hash, path, generation, result),
                    None => {
                        self.wide.remove(hash, path);
                    }
                }
                result
            }
        };
        self.hand_out(result)
    }

    /// Narrow variant taking bytes in the configured ANSI code page
    pub fn lookup_ansi(&mut self, path: &[u8]) -> Result<ObjId, LookupError> {
        let (utf8, _, had_errors) = self.options.ansi_encoding.decode(path);
        if had_errors {
            tracing::debug!(
                "Path is not valid {}: {:?}",
                self.options.ansi_encoding.name(),
                path
            );
            return Err(LookupError::TextConversionError);
        }
        self.lookup(&utf8)
    }

    /// Like [`Cache::lookup`], but a Missing result is reported as `NotFound`
    pub fn lookup_no_missing(&mut self, path: &str) -> Result<ObjId, LookupError> {
        let id = self.lookup(path)?;
        self.reject_missing(id)
    }

    /// Like [`Cache::lookup_wide`], but a Missing result is reported as `NotFound`
    pub fn lookup_wide_no_missing(&mut self, path: &[u16]) -> Result<ObjId, LookupError> {
        let id = self.lookup_wide(path)?;
        self.reject_missing(id)
    }

    fn reject_missing(&mut self, id: ObjId) -> Result<ObjId, LookupError> {
        if self.is_missing(id) {
            self.release(id);
            return Err(LookupError::NotFound);
        }
        Ok(id)
    }

    fn hand_out(&mut self, result: Result<ObjId, LookupError>) -> Result<ObjId, LookupError> {
        let id = result?;
        let obj = self.objects.get_mut(id).ok_or(LookupError::InternalError)?;
        obj.refs += 1;
        Ok(id)
    }

    /// Resolve a literal path without the hash index
    fn resolve(&mut self, path: &str) -> Result<ObjId, LookupError> {
        let result = match classify(path) {
            PathRoot::Unc => Err(LookupError::Unsupported),
            PathRoot::Drive { .. } if !has_dot_components(path) => self.lookup_absolute(path),
            _ => self.lookup_slow(path),
        };

        match result {
            Ok(_) => self.stats.walk_hits += 1,
            Err(_) => self.stats.walk_misses += 1,
        }
        result
    }

    /// Relative paths and paths with dot components
    fn lookup_slow(&mut self, path: &str) -> Result<ObjId, LookupError> {
        self.stats.slow_path_lookups += 1;

        let canonical = self.native.canonicalize(path).map_err(|e| {
            tracing::debug!("Cannot canonicalize {}: {}", path, e);
            if utf16_len(path) > self.options.max_path_len {
                LookupError::PathTooLong
            } else {
                LookupError::InternalError
            }
        })?;
        if utf16_len(&canonical) > self.options.max_path_len {
            return Err(LookupError::PathTooLong);
        }
        if !is_walkable(&canonical) {
            return Err(match classify(&canonical) {
                PathRoot::Unc => LookupError::Unsupported,
                _ => LookupError::InternalError,
            });
        }

        tracing::trace!("Canonicalized {} -> {}", path, canonical);
        self.lookup_absolute(&canonical)
    }

    fn is_entry_fresh(&self, generation: u32, result: Result<ObjId, LookupError>) -> bool {
        let negative = match result {
            Ok(id) => match self.objects.get(id) {
                Some(obj) if obj.flags.contains(ObjFlags::DETACHED) => return false,
                Some(obj) => obj.is_missing(),
                None => return false,
            },
            Err(_) => true,
        };

        generation == GEN_IGNORE
            || generation
                == if negative {
                    self.missing_generation
                } else {
                    self.generation
                }
    }

    /// Stamp for a new hash entry, or `None` if the result must not be memoized
    fn entry_generation(&self, result: Result<ObjId, LookupError>) -> Option<u32> {
        match result {
            Ok(id) => {
                let obj = self.objects.get(id)?;
                Some(if obj.generation == GEN_IGNORE {
                    GEN_IGNORE
                } else if obj.is_missing() {
                    self.missing_generation
                } else {
                    self.generation
                })
            }
            Err(LookupError::Unsupported) => Some(GEN_IGNORE),
            Err(e) if self.options.flags.cache_missing_paths && e.is_negative_result() => {
                Some(self.missing_generation)
            }
            Err(_) => None,
        }
    }
}
