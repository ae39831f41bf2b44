//! Windows backend: handle-based directory enumeration
//!
//! Directories are opened once with backup semantics and enumerated with
//! `GetFileInformationByHandleEx`, which returns many entries (short names
//! included) per call and can rewind without reopening the handle.

use super::{filetime_to_utc, DirEntryInfo, DriveKind, EntryKind, Enumeration, NativeFs, VolumeInfo};
use std::ffi::c_void;
use std::io;
use std::mem;
use windows::core::HSTRING;
use windows::Win32::Foundation::{CloseHandle, ERROR_MORE_DATA, ERROR_NO_MORE_FILES, HANDLE};
use windows::Win32::Storage::FileSystem::{
    CreateFileW, FileIdBothDirectoryInfo, FileIdBothDirectoryRestartInfo, GetDriveTypeW,
    GetFileInformationByHandleEx, GetFullPathNameW, GetVolumeInformationByHandleW,
    FILE_FLAG_BACKUP_SEMANTICS, FILE_ID_BOTH_DIR_INFO, FILE_LIST_DIRECTORY, FILE_SHARE_DELETE,
    FILE_SHARE_READ, FILE_SHARE_WRITE, OPEN_EXISTING,
};

/// Initial enumeration buffer, in bytes
const ENUM_BUFFER_SIZE: usize = 64 * 1024;

// GetDriveTypeW results
const DRIVE_REMOVABLE: u32 = 2;
const DRIVE_FIXED: u32 = 3;
const DRIVE_REMOTE: u32 = 4;
const DRIVE_CDROM: u32 = 5;
const DRIVE_RAMDISK: u32 = 6;

/// Open directory handle, closed on drop
#[derive(Debug)]
pub struct Win32DirHandle {
    handle: HANDLE,
    path: String,
    /// 8-byte aligned scratch buffer for directory records
    buffer: Vec<u64>,
}

impl Drop for Win32DirHandle {
    fn drop(&mut self) {
        // SAFETY: the handle was returned by CreateFileW and is closed only here
        if let Err(e) = unsafe { CloseHandle(self.handle) } {
            tracing::warn!("CloseHandle failed for {}: {}", self.path, e);
        }
    }
}

/// Native layer on top of the Win32 API
#[derive(Debug, Clone, Copy, Default)]
pub struct Win32Fs;

impl Win32Fs {
    pub fn new() -> Self {
        Self
    }
}

fn to_io(e: windows::core::Error) -> io::Error {
    io::Error::from_raw_os_error((e.code().0 & 0xFFFF) as i32)
}

impl NativeFs for Win32Fs {
    type Handle = Win32DirHandle;

    fn open_directory(&self, path: &str) -> io::Result<Win32DirHandle> {
        let wide = HSTRING::from(path);
        // SAFETY: `wide` is NUL terminated and outlives the call
        let handle = unsafe {
            CreateFileW(
                &wide,
                FILE_LIST_DIRECTORY.0,
                FILE_SHARE_READ | FILE_SHARE_WRITE | FILE_SHARE_DELETE,
                None,
                OPEN_EXISTING,
                FILE_FLAG_BACKUP_SEMANTICS,
                HANDLE::default(),
            )
        }
        .map_err(to_io)?;

        Ok(Win32DirHandle {
            handle,
            path: path.to_string(),
            buffer: vec![0u64; ENUM_BUFFER_SIZE / mem::size_of::<u64>()],
        })
    }

    fn enumerate(
        &self,
        handle: &mut Win32DirHandle,
        restart: bool,
        out: &mut Vec<DirEntryInfo>,
    ) -> io::Result<Enumeration> {
        let class = if restart {
            FileIdBothDirectoryRestartInfo
        } else {
            FileIdBothDirectoryInfo
        };

        loop {
            let size = handle.buffer.len() * mem::size_of::<u64>();
            // SAFETY: the buffer is writable for `size` bytes
            let result = unsafe {
                GetFileInformationByHandleEx(
                    handle.handle,
                    class,
                    handle.buffer.as_mut_ptr() as *mut c_void,
                    size as u32,
                )
            };
            match result {
                Ok(()) => break,
                Err(e) if e.code() == ERROR_NO_MORE_FILES.to_hresult() => {
                    return Ok(Enumeration::Done)
                }
                Err(e) if e.code() == ERROR_MORE_DATA.to_hresult() => {
                    // A single record did not fit
                    let grown = handle.buffer.len() * 2;
                    handle.buffer.resize(grown, 0);
                }
                Err(e) => return Err(to_io(e)),
            }
        }

        // SAFETY: the OS filled the buffer with a chain of FILE_ID_BOTH_DIR_INFO
        // records linked by NextEntryOffset
        unsafe { parse_records(handle.buffer.as_ptr() as *const u8, out) };
        Ok(Enumeration::More)
    }

    fn query_volume(&self, handle: &Win32DirHandle) -> io::Result<VolumeInfo> {
        let mut serial = 0u32;
        let mut fs_name = [0u16; 64];
        // SAFETY: all out pointers are valid for the duration of the call
        unsafe {
            GetVolumeInformationByHandleW(
                handle.handle,
                None,
                Some(&mut serial),
                None,
                None,
                Some(&mut fs_name),
            )
        }
        .map_err(to_io)?;

        let len = fs_name.iter().position(|&c| c == 0).unwrap_or(fs_name.len());
        let root = HSTRING::from(handle.path.as_str());
        // SAFETY: `root` is NUL terminated
        let drive_kind = match unsafe { GetDriveTypeW(&root) } {
            DRIVE_REMOVABLE => DriveKind::Removable,
            DRIVE_FIXED => DriveKind::Fixed,
            DRIVE_REMOTE => DriveKind::Remote,
            DRIVE_CDROM => DriveKind::CdRom,
            DRIVE_RAMDISK => DriveKind::RamDisk,
            _ => DriveKind::Unknown,
        };

        Ok(VolumeInfo {
            device_id: u64::from(serial),
            fs_name: String::from_utf16_lossy(&fs_name[..len]),
            drive_kind,
        })
    }

    fn canonicalize(&self, path: &str) -> io::Result<String> {
        let wide = HSTRING::from(path);
        let mut buffer = vec![0u16; 260];
        loop {
            // SAFETY: `buffer` is writable for its full length
            let len = unsafe { GetFullPathNameW(&wide, Some(buffer.as_mut_slice()), None) } as usize;
            if len == 0 {
                return Err(io::Error::last_os_error());
            }
            if len < buffer.len() {
                return String::from_utf16(&buffer[..len])
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e));
            }
            // `len` includes the terminator when the buffer was too small
            buffer.resize(len, 0);
        }
    }
}

/// Walk a buffer of directory records, appending one entry per record
unsafe fn parse_records(base: *const u8, out: &mut Vec<DirEntryInfo>) {
    let mut offset = 0usize;
    loop {
        let record = base.add(offset) as *const FILE_ID_BOTH_DIR_INFO;
        let info = &*record;

        let name_ptr = std::ptr::addr_of!((*record).FileName) as *const u16;
        let name_len = info.FileNameLength as usize / mem::size_of::<u16>();
        let name = String::from_utf16_lossy(std::slice::from_raw_parts(name_ptr, name_len));

        let short_len = (info.ShortNameLength as u8 as usize) / mem::size_of::<u16>();
        let short_name = (short_len > 0)
            .then(|| String::from_utf16_lossy(&info.ShortName[..short_len.min(info.ShortName.len())]))
            .filter(|short| !short.eq_ignore_ascii_case(&name));

        let mut entry = DirEntryInfo::new(name, EntryKind::from_attributes(info.FileAttributes));
        entry.short_name = short_name;
        entry.attributes = info.FileAttributes;
        entry.size = info.EndOfFile.max(0) as u64;
        entry.created = filetime_to_utc(info.CreationTime);
        entry.modified = filetime_to_utc(info.LastWriteTime);
        entry.accessed = filetime_to_utc(info.LastAccessTime);
        out.push(entry);

        if info.NextEntryOffset == 0 {
            break;
        }
        offset += info.NextEntryOffset as usize;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_enumerate_temp_dir() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("a file with a long name.txt"), b"abc").unwrap();

        let native = Win32Fs::new();
        let path = dir.path().to_str().unwrap();
        let mut handle = native.open_directory(path).unwrap();
        let mut out = Vec::new();
        let mut restart = true;
        while native.enumerate(&mut handle, restart, &mut out).unwrap() == Enumeration::More {
            restart = false;
        }

        let names: Vec<_> = out.iter().filter(|e| !e.is_dot_entry()).map(|e| e.name.as_str()).collect();
        assert_eq!(names.len(), 2);
        let file = out.iter().find(|e| e.name.ends_with(".txt")).unwrap();
        assert_eq!(file.kind, EntryKind::File);
        assert_eq!(file.size, 3);
        let sub = out.iter().find(|e| e.name == "sub").unwrap();
        assert_eq!(sub.kind, EntryKind::Directory);
    }

    #[test]
    fn test_canonicalize() {
        let native = Win32Fs::new();
        assert_eq!(native.canonicalize("C:\\a\\..\\b\\.\\c").unwrap(), "C:\\b\\c");
    }

    #[test]
    fn test_open_missing_directory_fails() {
        let native = Win32Fs::new();
        assert!(native.open_directory("C:\\surely\\not\\here\\x").is_err());
    }
}
