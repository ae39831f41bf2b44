//! Path hash index: literal query string -> memoized lookup result
//!
//! Keys are the exact code units the caller passed in, unnormalized, so
//! `C:\foo` and `c:/FOO` get separate entries that resolve to the same
//! object. The index exists once per string encoding (narrow and wide).

use crate::arena::ObjId;
use crate::error::LookupError;
use std::collections::HashMap;
use xxhash_rust::xxh3::{xxh3_64, Xxh3};

/// A code unit a path can be spelled in
pub trait PathUnit: Copy + Eq + 'static {
    fn hash_units(units: &[Self]) -> u64;
}

impl PathUnit for u8 {
    fn hash_units(units: &[u8]) -> u64 {
        xxh3_64(units)
    }
}

impl PathUnit for u16 {
    fn hash_units(units: &[u16]) -> u64 {
        let mut hasher = Xxh3::new();
        let mut buf = [0u8; 128];
        for chunk in units.chunks(buf.len() / 2) {
            for (i, unit) in chunk.iter().enumerate() {
                buf[i * 2..i * 2 + 2].copy_from_slice(&unit.to_le_bytes());
            }
            hasher.update(&buf[..chunk.len() * 2]);
        }
        hasher.digest()
    }
}

/// One memoized lookup
pub(crate) struct PathHashEntry<U> {
    path: Box<[U]>,
    pub generation: u32,
    pub result: Result<ObjId, LookupError>,
}

pub(crate) struct PathHashIndex<U> {
    buckets: HashMap<u64, Vec<PathHashEntry<U>>>,
    len: usize,
}

impl<U: PathUnit> PathHashIndex<U> {
    pub fn new() -> Self {
        Self {
            buckets: HashMap::new(),
            len: 0,
        }
    }

    pub fn hash(units: &[U]) -> u64 {
        U::hash_units(units)
    }

    pub fn get(&self, hash: u64, units: &[U]) -> Option<&PathHashEntry<U>> {
        self.buckets
            .get(&hash)?
            .iter()
            .find(|e| e.path.len() == units.len() && *e.path == *units)
    }

    /// Insert or overwrite the entry for `units`
    pub fn insert(
        &mut self,
        hash: u64,
        units: &[U],
        generation: u32,
        result: Result<ObjId, LookupError>,
    ) {
        let chain = self.buckets.entry(hash).or_default();
        if let Some(entry) = chain
            .iter_mut()
            .find(|e| e.path.len() == units.len() && *e.path == *units)
        {
            entry.generation = generation;
            entry.result = result;
            return;
        }

        chain.push(PathHashEntry {
            path: units.into(),
            generation,
            result,
        });
        self.len += 1;
    }

    pub fn remove(&mut self, hash: u64, units: &[U]) -> bool {
        let Some(chain) = self.buckets.get_mut(&hash) else {
            return false;
        };
        let Some(pos) = chain
            .iter()
            .position(|e| e.path.len() == units.len() && *e.path == *units)
        else {
            return false;
        };

        chain.swap_remove(pos);
        if chain.is_empty() {
            self.buckets.remove(&hash);
        }
        self.len -= 1;
        true
    }

    pub fn len(&self) -> usize {
        self.len
    }
}
