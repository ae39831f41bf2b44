//! Drive root resolution
//!
//! The synthetic root cannot be enumerated, so drive roots are discovered
//! one at a time: the first lookup under `X:\` opens the volume root and
//! links a directory named `X:` into the root.

use crate::arena::ObjId;
use crate::cache::Cache;
use crate::error::LookupError;
use crate::native::NativeFs;
use crate::object::{ObjFlags, ObjKind, GEN_IGNORE};

impl<F: NativeFs> Cache<F> {
    pub(crate) fn resolve_drive(&mut self, letter: char) -> Result<ObjId, LookupError> {
        let name = format!("{}:", letter.to_ascii_uppercase());

        // A handful of drives at most; a linear scan is fine
        let known = self.find_child(self.root, &name);
        if let Some(id) = known {
            if !self.is_stale_missing(id) {
                return Ok(id);
            }
        }

        let path = format!("{}\\", name);
        let handle = match self.native.open_directory(&path) {
            Ok(handle) => handle,
            Err(e) => {
                tracing::debug!("Cannot open drive {}: {}", path, e);
                if !self.options.flags.cache_missing_objects {
                    return Err(LookupError::DirOpenError);
                }

                let missing_generation = self.missing_generation;
                return match known {
                    Some(id) => {
                        if let Some(obj) = self.objects.get_mut(id) {
                            obj.generation = missing_generation;
                        }
                        Ok(id)
                    }
                    None => self
                        .create_child(self.root, ObjKind::Missing, &name, None, missing_generation)
                        .ok_or(LookupError::InternalError),
                };
            }
        };

        let mut flags = ObjFlags::DRIVE_ROOT;
        let volume = match self.native.query_volume(&handle) {
            Ok(volume) => {
                if volume.is_ntfs_like() {
                    flags = flags | ObjFlags::NTFS_LIKE;
                }
                tracing::info!(
                    "Drive {} ({}, device {:#x}, {:?})",
                    name,
                    volume.fs_name,
                    volume.device_id,
                    volume.drive_kind
                );
                Some(volume)
            }
            Err(e) => {
                tracing::warn!("Volume query for {} failed: {}", path, e);
                None
            }
        };

        let id = match known {
            Some(id) => {
                // A drive that was missing and has appeared since
                if let Some(obj) = self.objects.get_mut(id) {
                    obj.set_kind(ObjKind::Directory);
                    obj.generation = GEN_IGNORE;
                }
                id
            }
            None => self
                .create_child(self.root, ObjKind::Directory, &name, None, GEN_IGNORE)
                .ok_or(LookupError::InternalError)?,
        };

        let obj = self.objects.get_mut(id).ok_or(LookupError::InternalError)?;
        obj.flags = flags;
        let dir = obj.dir.as_mut().ok_or(LookupError::InternalError)?;
        dir.handle = Some(handle);
        dir.volume = volume;
        Ok(id)
    }
}
