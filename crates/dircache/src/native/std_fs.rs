//! Portable backend on top of `std::fs`
//!
//! Drive letters are mapped onto host directories, so the cache can mirror
//! a Windows-shaped namespace on any platform. On Windows an unmapped drive
//! letter falls through to the real drive.

use super::{
    DirEntryInfo, DriveKind, EntryKind, Enumeration, NativeFs, VolumeInfo,
    FILE_ATTRIBUTE_DIRECTORY, FILE_ATTRIBUTE_HIDDEN, FILE_ATTRIBUTE_NORMAL,
    FILE_ATTRIBUTE_READONLY, FILE_ATTRIBUTE_REPARSE_POINT,
};
use crate::path::{classify, components, lexical_absolute, PathRoot};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fs::{self, Metadata, ReadDir};
use std::io;
use std::path::{Path, PathBuf};

/// Entries returned per `enumerate` call
pub const DEFAULT_BATCH_SIZE: usize = 256;

/// Open directory on the host file system
#[derive(Debug)]
pub struct StdDirHandle {
    path: PathBuf,
    iter: Option<ReadDir>,
}

impl StdDirHandle {
    /// Host directory behind the handle
    pub fn host_path(&self) -> &Path {
        &self.path
    }
}

/// `std::fs` backed native layer
#[derive(Debug, Clone)]
pub struct StdFs {
    drives: HashMap<char, PathBuf>,
    working_dir: String,
    batch_size: usize,
}

impl Default for StdFs {
    fn default() -> Self {
        Self::new()
    }
}

impl StdFs {
    pub fn new() -> Self {
        Self {
            drives: HashMap::new(),
            working_dir: default_working_dir(),
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    /// Serve drive `letter` from a host directory
    pub fn with_drive(mut self, letter: char, root: impl Into<PathBuf>) -> Self {
        self.drives.insert(letter.to_ascii_uppercase(), root.into());
        self
    }

    /// Drive-rooted directory relative paths are resolved against
    pub fn with_working_dir(mut self, cwd: impl Into<String>) -> Self {
        self.working_dir = cwd.into();
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn working_dir(&self) -> &str {
        &self.working_dir
    }

    /// Translate a drive-rooted path into a host path
    pub fn host_path(&self, path: &str) -> io::Result<PathBuf> {
        let PathRoot::Drive { letter, rest } = classify(path) else {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("not a drive rooted path: {}", path),
            ));
        };

        let mut host = match self.drives.get(&letter) {
            Some(root) => root.clone(),
            None if cfg!(windows) => PathBuf::from(format!("{}:\\", letter)),
            None => {
                return Err(io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("drive {}: is not mapped", letter),
                ))
            }
        };
        for comp in components(rest) {
            host.push(comp.name);
        }
        Ok(host)
    }
}

fn default_working_dir() -> String {
    if cfg!(windows) {
        if let Some(cwd) = std::env::current_dir()
            .ok()
            .and_then(|p| p.to_str().map(str::to_string))
        {
            return cwd;
        }
    }
    "C:\\".to_string()
}

impl NativeFs for StdFs {
    type Handle = StdDirHandle;

    fn open_directory(&self, path: &str) -> io::Result<StdDirHandle> {
        let host = self.host_path(path)?;
        if !fs::metadata(&host)?.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                format!("not a directory: {}", host.display()),
            ));
        }
        Ok(StdDirHandle {
            path: host,
            iter: None,
        })
    }

    fn enumerate(
        &self,
        handle: &mut StdDirHandle,
        restart: bool,
        out: &mut Vec<DirEntryInfo>,
    ) -> io::Result<Enumeration> {
        if restart {
            handle.iter = Some(fs::read_dir(&handle.path)?);
        }
        let Some(iter) = handle.iter.as_mut() else {
            return Ok(Enumeration::Done);
        };

        for _ in 0..self.batch_size {
            let Some(entry) = iter.next() else {
                handle.iter = None;
                return Ok(Enumeration::Done);
            };
            let entry = entry?;

            let name = match entry.file_name().into_string() {
                Ok(name) => name,
                Err(raw) => {
                    tracing::warn!("Skipping non-Unicode name {:?} in {}", raw, handle.path.display());
                    continue;
                }
            };
            let is_link = entry.file_type().is_ok_and(|t| t.is_symlink());
            // Follow links; a dangling one is reported as an "other" entry
            let info = match fs::metadata(entry.path()) {
                Ok(meta) => entry_info(name, &meta, is_link),
                Err(_) => {
                    let mut info = DirEntryInfo::new(name, EntryKind::Other);
                    info.attributes |= FILE_ATTRIBUTE_REPARSE_POINT;
                    info
                }
            };
            out.push(info);
        }
        Ok(Enumeration::More)
    }

    fn query_volume(&self, handle: &StdDirHandle) -> io::Result<VolumeInfo> {
        let meta = fs::metadata(&handle.path)?;
        Ok(VolumeInfo {
            device_id: device_id(&meta),
            fs_name: "host".to_string(),
            drive_kind: DriveKind::Fixed,
        })
    }

    fn canonicalize(&self, path: &str) -> io::Result<String> {
        lexical_absolute(path, &self.working_dir).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("cannot make {} absolute against {}", path, self.working_dir),
            )
        })
    }
}

fn entry_info(name: String, meta: &Metadata, is_link: bool) -> DirEntryInfo {
    let kind = if meta.is_dir() {
        EntryKind::Directory
    } else if meta.is_file() {
        EntryKind::File
    } else {
        EntryKind::Other
    };

    let mut attributes = if meta.is_dir() {
        FILE_ATTRIBUTE_DIRECTORY
    } else {
        FILE_ATTRIBUTE_NORMAL
    };
    if meta.permissions().readonly() {
        attributes |= FILE_ATTRIBUTE_READONLY;
    }
    if name.starts_with('.') {
        attributes |= FILE_ATTRIBUTE_HIDDEN;
    }
    if is_link {
        attributes |= FILE_ATTRIBUTE_REPARSE_POINT;
    }

    let mut info = DirEntryInfo::new(name, kind);
    info.attributes = attributes;
    info.size = if meta.is_dir() { 0 } else { meta.len() };
    info.created = meta.created().ok().map(DateTime::<Utc>::from);
    info.modified = meta.modified().ok().map(DateTime::<Utc>::from);
    info.accessed = meta.accessed().ok().map(DateTime::<Utc>::from);
    info
}

#[cfg(unix)]
fn device_id(meta: &Metadata) -> u64 {
    use std::os::unix::fs::MetadataExt;
    meta.dev()
}

#[cfg(not(unix))]
fn device_id(_meta: &Metadata) -> u64 {
    0
}
