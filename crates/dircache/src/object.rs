//! Cache objects: one node per file system entry

use crate::arena::ObjId;
use crate::name::names_equal;
use crate::native::{DirEntryInfo, EntryKind, VolumeInfo};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::HashMap;
use std::ops::BitOr;

/// Generation stamp that never goes stale
pub const GEN_IGNORE: u32 = u32::MAX;

/// Object type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObjKind {
    Directory,
    File,
    Other,
    /// Confirmed absent at the time of the object's generation stamp
    Missing,
}

impl From<EntryKind> for ObjKind {
    fn from(kind: EntryKind) -> Self {
        match kind {
            EntryKind::Directory => ObjKind::Directory,
            EntryKind::File => ObjKind::File,
            EntryKind::Other => ObjKind::Other,
        }
    }
}

/// Object flags, inherited from the parent directory on creation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash, Serialize, Deserialize)]
pub struct ObjFlags(u32);

impl ObjFlags {
    pub const NONE: ObjFlags = ObjFlags(0);
    /// Directory mtimes on this volume change when children come and go
    pub const NTFS_LIKE: ObjFlags = ObjFlags(0x1);
    /// Set on drive root directories only, never inherited
    pub const DRIVE_ROOT: ObjFlags = ObjFlags(0x2);
    /// Unlinked from its parent; only caller references keep it alive
    pub const DETACHED: ObjFlags = ObjFlags(0x4);

    const INHERITED: u32 = Self::NTFS_LIKE.0;

    pub fn contains(self, other: ObjFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn bits(self) -> u32 {
        self.0
    }

    /// Flags a child created under a directory with these flags starts with
    pub fn inherited(self) -> ObjFlags {
        ObjFlags(self.0 & Self::INHERITED)
    }
}

impl BitOr for ObjFlags {
    type Output = ObjFlags;

    fn bitor(self, rhs: ObjFlags) -> ObjFlags {
        ObjFlags(self.0 | rhs.0)
    }
}

/// Stat information captured during directory enumeration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjStat {
    pub size: u64,
    pub attributes: u32,
    pub created: Option<DateTime<Utc>>,
    pub modified: Option<DateTime<Utc>>,
    pub accessed: Option<DateTime<Utc>>,
}

impl From<&DirEntryInfo> for ObjStat {
    fn from(info: &DirEntryInfo) -> Self {
        Self {
            size: info.size,
            attributes: info.attributes,
            created: info.created,
            modified: info.modified,
            accessed: info.accessed,
        }
    }
}

/// Key identifying one user data entry on an object
pub type UserDataKey = u32;

struct UserDataEntry {
    key: UserDataKey,
    value: Box<dyn Any + Send>,
}

/// Directory-only state
pub(crate) struct DirData<H> {
    pub children: Vec<ObjId>,
    /// Folded name hash -> children, for large directories
    pub index: Option<HashMap<u64, Vec<ObjId>>>,
    pub handle: Option<H>,
    pub populated: bool,
    /// Generation the children were last enumerated at
    pub enum_generation: u32,
    /// Set on drive roots
    pub volume: Option<VolumeInfo>,
}

impl<H> DirData<H> {
    fn new() -> Self {
        Self {
            children: Vec::new(),
            index: None,
            handle: None,
            populated: false,
            enum_generation: 0,
            volume: None,
        }
    }
}

/// One cached file system entry
pub struct Object<H> {
    pub(crate) kind: ObjKind,
    pub(crate) refs: u32,
    pub(crate) generation: u32,
    pub(crate) flags: ObjFlags,
    pub(crate) name: Box<str>,
    pub(crate) short_name: Option<Box<str>>,
    pub(crate) parent: Option<ObjId>,
    pub(crate) stat: Option<ObjStat>,
    user_data: Vec<UserDataEntry>,
    pub(crate) dir: Option<DirData<H>>,
}

impl<H> Object<H> {
    pub(crate) fn new(
        kind: ObjKind,
        name: &str,
        short_name: Option<&str>,
        parent: Option<ObjId>,
        flags: ObjFlags,
        generation: u32,
    ) -> Self {
        Self {
            kind,
            refs: 1,
            generation,
            flags,
            name: name.into(),
            short_name: short_name.map(Into::into),
            parent,
            stat: None,
            user_data: Vec::new(),
            dir: (kind == ObjKind::Directory).then(DirData::new),
        }
    }

    pub fn kind(&self) -> ObjKind {
        self.kind
    }

    pub fn is_dir(&self) -> bool {
        self.kind == ObjKind::Directory
    }

    pub fn is_missing(&self) -> bool {
        self.kind == ObjKind::Missing
    }

    /// Current reference count
    pub fn refcount(&self) -> u32 {
        self.refs
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }

    pub fn flags(&self) -> ObjFlags {
        self.flags
    }

    /// Case-preserved primary name (`C:` for drive roots, empty for the root)
    pub fn name(&self) -> &str {
        &self.name
    }

    /// 8.3 alias, if the file system reported one
    pub fn short_name(&self) -> Option<&str> {
        self.short_name.as_deref()
    }

    pub fn parent(&self) -> Option<ObjId> {
        self.parent
    }

    pub fn stat(&self) -> Option<&ObjStat> {
        self.stat.as_ref()
    }

    /// Has the directory been enumerated? Always false for non-directories.
    pub fn is_populated(&self) -> bool {
        self.dir.as_ref().is_some_and(|d| d.populated)
    }

    pub fn child_count(&self) -> usize {
        self.dir.as_ref().map_or(0, |d| d.children.len())
    }

    /// Does `name` match the primary or short name, ignoring case?
    pub fn matches_name(&self, name: &str) -> bool {
        names_equal(&self.name, name)
            || self
                .short_name
                .as_deref()
                .is_some_and(|short| names_equal(short, name))
    }

    /// Change the type. Returns the directory state when leaving `Directory`
    /// so the caller can release the children.
    pub(crate) fn set_kind(&mut self, kind: ObjKind) -> Option<DirData<H>> {
        if self.kind == kind {
            return None;
        }
        self.kind = kind;
        if kind == ObjKind::Directory {
            self.dir = Some(DirData::new());
            None
        } else {
            self.dir.take()
        }
    }

    pub(crate) fn add_user_data<T: Any + Send>(
        &mut self,
        key: UserDataKey,
        value: T,
    ) -> Option<&mut T> {
        if self.user_data.iter().any(|e| e.key == key) {
            return None;
        }
        self.user_data.push(UserDataEntry {
            key,
            value: Box::new(value),
        });
        self.user_data
            .last_mut()
            .and_then(|e| e.value.downcast_mut::<T>())
    }

    pub(crate) fn user_data<T: Any>(&self, key: UserDataKey) -> Option<&T> {
        self.user_data
            .iter()
            .find(|e| e.key == key)
            .and_then(|e| e.value.downcast_ref::<T>())
    }

    pub(crate) fn user_data_mut<T: Any>(&mut self, key: UserDataKey) -> Option<&mut T> {
        self.user_data
            .iter_mut()
            .find(|e| e.key == key)
            .and_then(|e| e.value.downcast_mut::<T>())
    }

    pub(crate) fn remove_user_data(&mut self, key: UserDataKey) -> bool {
        let before = self.user_data.len();
        self.user_data.retain(|e| e.key != key);
        self.user_data.len() != before
    }
}

impl<H> std::fmt::Debug for Object<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Object")
            .field("kind", &self.kind)
            .field("name", &self.name)
            .field("short_name", &self.short_name)
            .field("refs", &self.refs)
            .field("generation", &self.generation)
            .field("flags", &self.flags)
            .field("parent", &self.parent)
            .field("populated", &self.is_populated())
            .field("children", &self.child_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type TestObject = Object<()>;

    #[test]
    fn test_flags() {
        let flags = ObjFlags::NTFS_LIKE | ObjFlags::DRIVE_ROOT;
        assert!(flags.contains(ObjFlags::NTFS_LIKE));
        assert!(flags.contains(ObjFlags::DRIVE_ROOT));
        assert_eq!(flags.inherited(), ObjFlags::NTFS_LIKE);
        assert!(!ObjFlags::NONE.contains(ObjFlags::NTFS_LIKE));
    }

    #[test]
    fn test_name_matching() {
        let obj = TestObject::new(ObjKind::File, "LongFileName.txt", Some("LONGFI~1.TXT"), None, ObjFlags::NONE, 1);
        assert!(obj.matches_name("longfilename.TXT"));
        assert!(obj.matches_name("longfi~1.txt"));
        assert!(!obj.matches_name("LongFileName"));
    }

    #[test]
    fn test_kind_transitions() {
        let mut obj = TestObject::new(ObjKind::Directory, "src", None, None, ObjFlags::NONE, 1);
        assert!(obj.dir.is_some());

        let dir = obj.set_kind(ObjKind::Missing);
        assert!(dir.is_some());
        assert!(obj.dir.is_none());
        assert!(!obj.is_populated());

        assert!(obj.set_kind(ObjKind::Directory).is_none());
        assert!(obj.is_dir());
        assert!(!obj.is_populated());
    }

    #[test]
    fn test_user_data() {
        let mut obj = TestObject::new(ObjKind::File, "a.c", None, None, ObjFlags::NONE, 1);

        let slot = obj.add_user_data(7, vec![0u8; 4]).unwrap();
        slot[0] = 42;
        assert!(obj.add_user_data(7, 1u32).is_none());

        assert_eq!(obj.user_data::<Vec<u8>>(7).map(|v| v[0]), Some(42));
        assert!(obj.user_data::<u32>(7).is_none());
        assert!(obj.user_data::<Vec<u8>>(8).is_none());

        assert!(obj.remove_user_data(7));
        assert!(!obj.remove_user_data(7));
    }

    #[test]
    fn test_user_data_dropped_with_object() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        struct Tracker(Arc<AtomicUsize>);
        impl Drop for Tracker {
            fn drop(&mut self) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let drops = Arc::new(AtomicUsize::new(0));
        let mut obj = TestObject::new(ObjKind::File, "a.c", None, None, ObjFlags::NONE, 1);
        obj.add_user_data(1, Tracker(drops.clone()));
        drop(obj);
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }
}
