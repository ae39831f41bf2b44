//! Slot arena holding every cache object
//!
//! Handles are `(index, version)` pairs. Freeing a slot bumps its version,
//! so a handle that outlived its object never aliases the slot's next tenant.

use serde::{Deserialize, Serialize};

/// Handle to an object in the cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjId {
    index: u32,
    version: u32,
}

impl ObjId {
    /// Slot index, stable for the lifetime of the object
    pub fn index(&self) -> u32 {
        self.index
    }
}

impl std::fmt::Display for ObjId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}v{}", self.index, self.version)
    }
}

struct Slot<T> {
    version: u32,
    value: Option<T>,
}

pub(crate) struct Arena<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
    live: usize,
}

impl<T> Arena<T> {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            live: 0,
        }
    }

    pub fn insert(&mut self, value: T) -> ObjId {
        self.live += 1;

        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.value = Some(value);
            return ObjId {
                index,
                version: slot.version,
            };
        }

        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            version: 0,
            value: Some(value),
        });
        ObjId { index, version: 0 }
    }

    pub fn remove(&mut self, id: ObjId) -> Option<T> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.version != id.version {
            return None;
        }

        let value = slot.value.take()?;
        slot.version = slot.version.wrapping_add(1);
        self.free.push(id.index);
        self.live -= 1;
        Some(value)
    }

    pub fn get(&self, id: ObjId) -> Option<&T> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.version == id.version)
            .and_then(|slot| slot.value.as_ref())
    }

    pub fn get_mut(&mut self, id: ObjId) -> Option<&mut T> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.version == id.version)
            .and_then(|slot| slot.value.as_mut())
    }

    pub fn contains(&self, id: ObjId) -> bool {
        self.get(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.live
    }

    /// Iterate over all live values
    pub fn values_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.slots.iter_mut().filter_map(|slot| slot.value.as_mut())
    }
}
