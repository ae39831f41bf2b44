//! Thread-safe wrapper: one cache behind one lock

use crate::arena::ObjId;
use crate::cache::{Cache, CacheStats};
use crate::error::LookupError;
use crate::native::NativeFs;
use parking_lot::{Mutex, MutexGuard};
use std::sync::Arc;

/// Cache shared between threads
///
/// Every operation takes the lock for its whole duration, including any
/// blocking directory enumeration it triggers.
pub struct SharedCache<F: NativeFs> {
    inner: Arc<Mutex<Cache<F>>>,
}

impl<F: NativeFs> Clone for SharedCache<F> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<F: NativeFs> SharedCache<F> {
    pub fn new(cache: Cache<F>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(cache)),
        }
    }

    /// Exclusive access for a sequence of operations
    pub fn lock(&self) -> MutexGuard<'_, Cache<F>> {
        self.inner.lock()
    }

    pub fn lookup(&self, path: &str) -> Result<ObjId, LookupError> {
        self.inner.lock().lookup(path)
    }

    pub fn lookup_wide(&self, path: &[u16]) -> Result<ObjId, LookupError> {
        self.inner.lock().lookup_wide(path)
    }

    pub fn lookup_no_missing(&self, path: &str) -> Result<ObjId, LookupError> {
        self.inner.lock().lookup_no_missing(path)
    }

    pub fn release(&self, id: ObjId) -> u32 {
        self.inner.lock().release(id)
    }

    pub fn bump_generation(&self) -> u32 {
        self.inner.lock().bump_generation()
    }

    pub fn bump_missing_generation(&self) -> u32 {
        self.inner.lock().bump_missing_generation()
    }

    pub fn stats(&self) -> CacheStats {
        self.inner.lock().stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheFlags;
    use crate::native::StdFs;
    use crate::object::ObjKind;
    use std::fs;
    use std::thread;
    use tempfile::TempDir;

    #[test]
    fn test_lookups_from_many_threads() {
        let dir = TempDir::new().unwrap();
        for i in 0..8 {
            fs::write(dir.path().join(format!("unit{}.c", i)), b"").unwrap();
        }
        let fs = StdFs::new().with_drive('W', dir.path());
        let shared = SharedCache::new(Cache::create(fs, CacheFlags::default()));

        let workers: Vec<_> = (0..4)
            .map(|_| {
                let shared = shared.clone();
                thread::spawn(move || {
                    for i in 0..8 {
                        let id = shared.lookup(&format!("W:\\unit{}.c", i)).unwrap();
                        shared.release(id);
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        let stats = shared.stats();
        assert_eq!(stats.lookups, 32);
        assert_eq!(stats.narrow_entries, 8);
        assert_eq!(stats.hash_hits, 24);

        let cache = shared.lock();
        let drive = cache.children(cache.root())[0];
        assert_eq!(cache.kind(drive), Some(ObjKind::Directory));
        assert_eq!(cache.children(drive).len(), 8);
    }
}
