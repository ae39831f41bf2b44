//! Boundary to the operating system's file system layer
//!
//! The cache never touches the file system directly. It opens, enumerates
//! and queries directories through a [`NativeFs`] backend:
//! - [`StdFs`]: portable backend on top of `std::fs`
//! - `Win32Fs`: Windows backend using handle-based directory enumeration
//! - `MockFs` (tests): scripted in-memory tree with call counters

mod std_fs;
#[cfg(windows)]
mod win32;

pub use std_fs::{StdDirHandle, StdFs, DEFAULT_BATCH_SIZE};
#[cfg(windows)]
pub use win32::{Win32DirHandle, Win32Fs};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io;

pub const FILE_ATTRIBUTE_READONLY: u32 = 0x0000_0001;
pub const FILE_ATTRIBUTE_HIDDEN: u32 = 0x0000_0002;
pub const FILE_ATTRIBUTE_DIRECTORY: u32 = 0x0000_0010;
pub const FILE_ATTRIBUTE_DEVICE: u32 = 0x0000_0040;
pub const FILE_ATTRIBUTE_NORMAL: u32 = 0x0000_0080;
pub const FILE_ATTRIBUTE_REPARSE_POINT: u32 = 0x0000_0400;

/// What the OS says an entry is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryKind {
    Directory,
    File,
    Other,
}

impl EntryKind {
    /// Classify from Win32 file attributes
    pub fn from_attributes(attributes: u32) -> Self {
        if attributes & FILE_ATTRIBUTE_DIRECTORY != 0 {
            EntryKind::Directory
        } else if attributes & FILE_ATTRIBUTE_DEVICE != 0 {
            EntryKind::Other
        } else {
            EntryKind::File
        }
    }
}

/// One directory entry as reported by the OS
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntryInfo {
    pub name: String,
    /// 8.3 alias, when the file system keeps one and it differs from `name`
    pub short_name: Option<String>,
    pub kind: EntryKind,
    pub size: u64,
    pub attributes: u32,
    pub created: Option<DateTime<Utc>>,
    pub modified: Option<DateTime<Utc>>,
    pub accessed: Option<DateTime<Utc>>,
}

impl DirEntryInfo {
    pub fn new(name: impl Into<String>, kind: EntryKind) -> Self {
        let attributes = match kind {
            EntryKind::Directory => FILE_ATTRIBUTE_DIRECTORY,
            EntryKind::File => FILE_ATTRIBUTE_NORMAL,
            EntryKind::Other => FILE_ATTRIBUTE_DEVICE,
        };
        Self {
            name: name.into(),
            short_name: None,
            kind,
            size: 0,
            attributes,
            created: None,
            modified: None,
            accessed: None,
        }
    }

    /// Is this the `.` or `..` pseudo entry?
    pub fn is_dot_entry(&self) -> bool {
        self.name == "." || self.name == ".."
    }
}

/// Progress of a multi-call directory enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enumeration {
    /// More entries remain; call again without restarting
    More,
    /// End of directory reached
    Done,
}

/// Drive type as reported for a volume root
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DriveKind {
    Unknown,
    Removable,
    Fixed,
    Remote,
    CdRom,
    RamDisk,
}

/// Volume information for a drive root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeInfo {
    pub device_id: u64,
    pub fs_name: String,
    pub drive_kind: DriveKind,
}

impl VolumeInfo {
    /// Does the directory modification time on this volume change when
    /// children are added or removed?
    pub fn is_ntfs_like(&self) -> bool {
        self.fs_name.eq_ignore_ascii_case("NTFS") || self.fs_name.eq_ignore_ascii_case("ReFS")
    }
}

/// Native file system layer consumed by the cache
///
/// Every call blocks until the OS answers. Paths are absolute, drive rooted
/// and use `\` separators.
pub trait NativeFs {
    /// Open directory handle, closed on drop
    type Handle;

    /// Open a directory for enumeration
    fn open_directory(&self, path: &str) -> io::Result<Self::Handle>;

    /// Append the next batch of entries to `out`
    ///
    /// `restart` rewinds the enumeration to the first entry. Callers keep
    /// calling (without `restart`) until [`Enumeration::Done`].
    fn enumerate(
        &self,
        handle: &mut Self::Handle,
        restart: bool,
        out: &mut Vec<DirEntryInfo>,
    ) -> io::Result<Enumeration>;

    /// Query the volume a (root) directory handle lives on
    fn query_volume(&self, handle: &Self::Handle) -> io::Result<VolumeInfo>;

    /// Make a path absolute and resolve its `.` and `..` components
    fn canonicalize(&self, path: &str) -> io::Result<String>;
}

/// Convert a Win32 FILETIME (100ns ticks since 1601) to UTC
pub fn filetime_to_utc(ticks: i64) -> Option<DateTime<Utc>> {
    const TICKS_PER_SEC: i64 = 10_000_000;
    const SECS_1601_TO_1970: i64 = 11_644_473_600;

    if ticks <= 0 {
        return None;
    }
    let secs = ticks / TICKS_PER_SEC - SECS_1601_TO_1970;
    let nanos = (ticks % TICKS_PER_SEC) as u32 * 100;
    DateTime::from_timestamp(secs, nanos)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_from_attributes() {
        assert_eq!(
            EntryKind::from_attributes(FILE_ATTRIBUTE_DIRECTORY | FILE_ATTRIBUTE_HIDDEN),
            EntryKind::Directory
        );
        assert_eq!(
            EntryKind::from_attributes(FILE_ATTRIBUTE_DIRECTORY | FILE_ATTRIBUTE_REPARSE_POINT),
            EntryKind::Directory
        );
        assert_eq!(EntryKind::from_attributes(FILE_ATTRIBUTE_DEVICE), EntryKind::Other);
        assert_eq!(EntryKind::from_attributes(FILE_ATTRIBUTE_READONLY), EntryKind::File);
    }

    #[test]
    fn test_filetime_conversion() {
        // 2000-01-01T00:00:00Z
        let t = filetime_to_utc(125_911_584_000_000_000).unwrap();
        assert_eq!(t.timestamp(), 946_684_800);
        assert_eq!(filetime_to_utc(0), None);
    }

    #[test]
    fn test_ntfs_like() {
        let vol = VolumeInfo {
            device_id: 1,
            fs_name: "ntfs".into(),
            drive_kind: DriveKind::Fixed,
        };
        assert!(vol.is_ntfs_like());
        let fat = VolumeInfo {
            fs_name: "FAT32".into(),
            ..vol
        };
        assert!(!fat.is_ntfs_like());
    }
}
