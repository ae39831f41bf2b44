//! Scripted in-memory native layer for tests
//!
//! Models a set of drives with directory trees. Every native call is counted
//! so tests can assert how often the cache actually went to the "OS".

use crate::name::fold_name;
use crate::native::{
    DirEntryInfo, DriveKind, EntryKind, Enumeration, NativeFs, VolumeInfo,
};
use crate::path::{classify, lexical_absolute, PathRoot};
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::io;

#[derive(Default)]
struct MockState {
    /// Folded directory path (`C:`, `C:\SRC`) -> entries
    dirs: HashMap<String, Vec<DirEntryInfo>>,
    volumes: HashMap<char, VolumeInfo>,
    fail_open: HashSet<String>,
    fail_enumerate: HashSet<String>,
    /// Restarted enumerations per folded directory path
    populations: HashMap<String, usize>,
}

/// Open directory in the mock tree
#[derive(Debug)]
pub struct MockHandle {
    key: String,
    pos: usize,
}

/// In-memory [`NativeFs`] with call counters
pub struct MockFs {
    state: RefCell<MockState>,
    working_dir: RefCell<String>,
    batch_size: Cell<usize>,
    open_calls: Cell<usize>,
    enumerate_calls: Cell<usize>,
    volume_queries: Cell<usize>,
    canonicalize_calls: Cell<usize>,
}

fn dir_key(path: &str) -> String {
    let trimmed = path.trim_end_matches(['\\', '/']);
    fold_name(&trimmed.replace('/', "\\")).into_owned()
}

fn split_parent(path: &str) -> Option<(&str, &str)> {
    let trimmed = path.trim_end_matches(['\\', '/']);
    let pos = trimmed.rfind(['\\', '/'])?;
    Some((&trimmed[..pos], &trimmed[pos + 1..]))
}

impl MockFs {
    pub fn new() -> Self {
        Self {
            state: RefCell::new(MockState::default()),
            working_dir: RefCell::new("C:\\".to_string()),
            batch_size: Cell::new(usize::MAX),
            open_calls: Cell::new(0),
            enumerate_calls: Cell::new(0),
            volume_queries: Cell::new(0),
            canonicalize_calls: Cell::new(0),
        }
    }

    /// Add a drive with an empty root directory
    pub fn add_volume(&self, letter: char, fs_name: &str) -> &Self {
        let letter = letter.to_ascii_uppercase();
        let mut state = self.state.borrow_mut();
        state.volumes.insert(
            letter,
            VolumeInfo {
                device_id: letter as u64,
                fs_name: fs_name.to_string(),
                drive_kind: DriveKind::Fixed,
            },
        );
        state.dirs.entry(format!("{}:", letter)).or_default();
        self
    }

    /// Add a directory, creating missing parents
    pub fn add_dir(&self, path: &str) -> &Self {
        self.add_entry(path, DirEntryInfo::new(String::new(), EntryKind::Directory));
        self
    }

    /// Add a file, creating missing parents
    pub fn add_file(&self, path: &str, size: u64) -> &Self {
        let mut info = DirEntryInfo::new(String::new(), EntryKind::File);
        info.size = size;
        self.add_entry(path, info);
        self
    }

    /// Add a file that also has an 8.3 alias
    pub fn add_file_with_short_name(&self, path: &str, short_name: &str) -> &Self {
        let mut info = DirEntryInfo::new(String::new(), EntryKind::File);
        info.short_name = Some(short_name.to_string());
        self.add_entry(path, info);
        self
    }

    fn add_entry(&self, path: &str, mut info: DirEntryInfo) {
        let Some((parent, name)) = split_parent(path) else {
            return;
        };
        if !parent.ends_with(':') {
            self.add_dir(parent);
        }

        info.name = name.to_string();
        let is_dir = info.kind == EntryKind::Directory;
        let mut state = self.state.borrow_mut();
        let entries = state.dirs.entry(dir_key(parent)).or_default();
        if let Some(existing) = entries.iter_mut().find(|e| fold_name(&e.name) == fold_name(name)) {
            if existing.kind == info.kind {
                return;
            }
            *existing = info;
        } else {
            entries.push(info);
        }
        if is_dir {
            state.dirs.entry(dir_key(path)).or_default();
        }
    }

    /// Remove an entry (and, for directories, everything below it)
    pub fn remove(&self, path: &str) {
        let Some((parent, name)) = split_parent(path) else {
            return;
        };
        let mut state = self.state.borrow_mut();
        if let Some(entries) = state.dirs.get_mut(&dir_key(parent)) {
            entries.retain(|e| fold_name(&e.name) != fold_name(name));
        }
        let key = dir_key(path);
        let prefix = format!("{}\\", key);
        state
            .dirs
            .retain(|k, _| *k != key && !k.starts_with(&prefix));
    }

    pub fn set_working_dir(&self, cwd: &str) {
        *self.working_dir.borrow_mut() = cwd.to_string();
    }

    /// Limit the number of entries returned per enumerate call
    pub fn set_batch_size(&self, batch: usize) {
        self.batch_size.set(batch.max(1));
    }

    pub fn fail_open(&self, path: &str, fail: bool) {
        let key = dir_key(path);
        let mut state = self.state.borrow_mut();
        if fail {
            state.fail_open.insert(key);
        } else {
            state.fail_open.remove(&key);
        }
    }

    pub fn fail_enumerate(&self, path: &str, fail: bool) {
        let key = dir_key(path);
        let mut state = self.state.borrow_mut();
        if fail {
            state.fail_enumerate.insert(key);
        } else {
            state.fail_enumerate.remove(&key);
        }
    }

    pub fn open_calls(&self) -> usize {
        self.open_calls.get()
    }

    pub fn enumerate_calls(&self) -> usize {
        self.enumerate_calls.get()
    }

    pub fn volume_queries(&self) -> usize {
        self.volume_queries.get()
    }

    pub fn canonicalize_calls(&self) -> usize {
        self.canonicalize_calls.get()
    }

    /// How many times the directory was (re-)enumerated from the start
    pub fn populations(&self, path: &str) -> usize {
        self.state
            .borrow()
            .populations
            .get(&dir_key(path))
            .copied()
            .unwrap_or(0)
    }
}

impl Default for MockFs {
    fn default() -> Self {
        Self::new()
    }
}

impl NativeFs for MockFs {
    type Handle = MockHandle;

    fn open_directory(&self, path: &str) -> io::Result<MockHandle> {
        self.open_calls.set(self.open_calls.get() + 1);

        let key = dir_key(path);
        let state = self.state.borrow();
        if state.fail_open.contains(&key) {
            return Err(io::Error::new(io::ErrorKind::PermissionDenied, "mock open failure"));
        }
        if !state.dirs.contains_key(&key) {
            return Err(io::Error::new(io::ErrorKind::NotFound, path.to_string()));
        }
        Ok(MockHandle { key, pos: 0 })
    }

    fn enumerate(
        &self,
        handle: &mut MockHandle,
        restart: bool,
        out: &mut Vec<DirEntryInfo>,
    ) -> io::Result<Enumeration> {
        self.enumerate_calls.set(self.enumerate_calls.get() + 1);

        let mut state = self.state.borrow_mut();
        if state.fail_enumerate.contains(&handle.key) {
            return Err(io::Error::new(io::ErrorKind::Other, "mock enumeration failure"));
        }
        if restart {
            handle.pos = 0;
            *state.populations.entry(handle.key.clone()).or_default() += 1;
        }

        let entries = state
            .dirs
            .get(&handle.key)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "directory deleted"))?;
        let end = handle.pos.saturating_add(self.batch_size.get()).min(entries.len());
        out.extend_from_slice(&entries[handle.pos.min(end)..end]);
        handle.pos = end;

        if end >= entries.len() {
            Ok(Enumeration::Done)
        } else {
            Ok(Enumeration::More)
        }
    }

    fn query_volume(&self, handle: &MockHandle) -> io::Result<VolumeInfo> {
        self.volume_queries.set(self.volume_queries.get() + 1);

        let letter = handle.key.chars().next().unwrap_or('?');
        self.state
            .borrow()
            .volumes
            .get(&letter)
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no such volume"))
    }

    fn canonicalize(&self, path: &str) -> io::Result<String> {
        self.canonicalize_calls.set(self.canonicalize_calls.get() + 1);

        if let PathRoot::Unc = classify(path) {
            return Ok(path.to_string());
        }
        lexical_absolute(path, &self.working_dir.borrow())
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, path.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(fs: &MockFs, path: &str) -> Vec<String> {
        let mut handle = fs.open_directory(path).unwrap();
        let mut out = Vec::new();
        while fs.enumerate(&mut handle, out.is_empty(), &mut out).unwrap() == Enumeration::More {}
        out.into_iter().map(|e| e.name).collect()
    }

    #[test]
    fn test_tree_building() {
        let fs = MockFs::new();
        fs.add_volume('c', "NTFS");
        fs.add_file("C:\\src\\lib\\a.c", 10);
        fs.add_file("C:\\src\\b.c", 20);

        assert_eq!(names(&fs, "C:\\"), vec!["src"]);
        assert_eq!(names(&fs, "c:\\SRC"), vec!["lib", "b.c"]);
        assert_eq!(names(&fs, "C:\\src\\lib\\"), vec!["a.c"]);
        assert!(fs.open_directory("C:\\nope").is_err());
    }

    #[test]
    fn test_batched_enumeration() {
        let fs = MockFs::new();
        fs.add_volume('C', "NTFS");
        for i in 0..5 {
            fs.add_file(&format!("C:\\d\\f{}", i), 0);
        }
        fs.set_batch_size(2);

        let mut handle = fs.open_directory("C:\\d").unwrap();
        let mut out = Vec::new();
        assert_eq!(fs.enumerate(&mut handle, true, &mut out).unwrap(), Enumeration::More);
        assert_eq!(fs.enumerate(&mut handle, false, &mut out).unwrap(), Enumeration::More);
        assert_eq!(fs.enumerate(&mut handle, false, &mut out).unwrap(), Enumeration::Done);
        assert_eq!(out.len(), 5);
        assert_eq!(fs.populations("C:\\d"), 1);
    }

    #[test]
    fn test_remove_subtree() {
        let fs = MockFs::new();
        fs.add_volume('C', "NTFS");
        fs.add_file("C:\\a\\b\\c.txt", 1);
        fs.remove("C:\\a\\b");

        assert!(names(&fs, "C:\\a").is_empty());
        assert!(fs.open_directory("C:\\a\\b").is_err());
    }
}
