//! Storage substrate (C3): the directory standing in for the SD card, plus
//! free/used space accounting.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{CoreError, CoreResult};

/// Total/used byte counts for the storage root.
#[derive(Debug, Clone, Copy)]
pub struct SpaceStats {
    pub total_bytes: u64,
    pub used_bytes: u64,
}

impl SpaceStats {
    pub fn free_bytes(&self) -> u64 {
        self.total_bytes.saturating_sub(self.used_bytes)
    }
}

/// The storage root the logger writes into. In production this is the SD
/// card mount point; in tests it is a `tempfile` temp directory.
pub struct Storage {
    root: PathBuf,
    /// Virtual capacity used when the platform can't report real free space
    /// (e.g. non-Linux hosts, or a capacity intentionally capped for tests).
    virtual_capacity_bytes: Option<u64>,
}

impl Storage {
    pub fn open(root: impl Into<PathBuf>) -> CoreResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| {
            CoreError::StorageUnavailable(format!("cannot create root {}: {e}", root.display()))
        })?;
        fs::create_dir_all(root.join("meta")).map_err(|e| {
            CoreError::StorageUnavailable(format!("cannot create meta dir: {e}"))
        })?;
        Ok(Self {
            root,
            virtual_capacity_bytes: None,
        })
    }

    /// Caps the reported total capacity, useful for exercising low-space /
    /// reclamation behavior deterministically in tests.
    pub fn with_virtual_capacity(mut self, bytes: u64) -> Self {
        self.virtual_capacity_bytes = Some(bytes);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn resolve(&self, rel_path: &str) -> PathBuf {
        self.root.join(rel_path.trim_start_matches('/'))
    }

    pub fn exists(&self, rel_path: &str) -> bool {
        self.resolve(rel_path).exists()
    }

    pub fn remove(&self, rel_path: &str) -> CoreResult<()> {
        let path = self.resolve(rel_path);
        fs::remove_file(&path)
            .map_err(|e| CoreError::StorageUnavailable(format!("remove {}: {e}", path.display())))
    }

    /// List file names directly under the storage root (non-recursive,
    /// skipping the `meta` directory).
    pub fn list_root_files(&self) -> CoreResult<Vec<String>> {
        let mut out = Vec::new();
        let entries = fs::read_dir(&self.root)
            .map_err(|e| CoreError::StorageUnavailable(format!("list_dir: {e}")))?;
        for entry in entries {
            let entry = entry.map_err(|e| CoreError::StorageUnavailable(e.to_string()))?;
            if entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
                if let Some(name) = entry.file_name().to_str() {
                    out.push(name.to_string());
                }
            }
        }
        Ok(out)
    }

    /// Best-effort space accounting: real `statvfs` stats on Linux when no
    /// virtual capacity override is set, otherwise the sum of file sizes
    /// under the root against the configured virtual capacity.
    pub fn space_stats(&self) -> CoreResult<SpaceStats> {
        if let Some(total) = self.virtual_capacity_bytes {
            let used = self.used_bytes_on_disk()?;
            return Ok(SpaceStats {
                total_bytes: total,
                used_bytes: used,
            });
        }
        self.statvfs_stats()
    }

    fn used_bytes_on_disk(&self) -> CoreResult<u64> {
        let mut used = 0u64;
        for name in self.list_root_files()? {
            if let Ok(meta) = fs::metadata(self.root.join(&name)) {
                used += meta.len();
            }
        }
        Ok(used)
    }

    #[cfg(target_os = "linux")]
    fn statvfs_stats(&self) -> CoreResult<SpaceStats> {
        use std::ffi::CString;
        use std::mem::MaybeUninit;

        let c_path = CString::new(self.root.to_string_lossy().as_bytes())
            .map_err(|e| CoreError::StorageUnavailable(e.to_string()))?;
        unsafe {
            let mut stat = MaybeUninit::<libc::statvfs>::uninit();
            let rc = libc::statvfs(c_path.as_ptr(), stat.as_mut_ptr());
            if rc != 0 {
                return Err(CoreError::StorageUnavailable(
                    "statvfs failed".to_string(),
                ));
            }
            let stat = stat.assume_init();
            let block_size = stat.f_frsize as u64;
            let total = stat.f_blocks as u64 * block_size;
            let free = stat.f_bavail as u64 * block_size;
            Ok(SpaceStats {
                total_bytes: total,
                used_bytes: total.saturating_sub(free),
            })
        }
    }

    #[cfg(not(target_os = "linux"))]
    fn statvfs_stats(&self) -> CoreResult<SpaceStats> {
        // No portable accounting available; report a generous default so
        // reclamation logic has something sane to work against in dev.
        let used = self.used_bytes_on_disk()?;
        Ok(SpaceStats {
            total_bytes: used + 1024 * 1024 * 1024,
            used_bytes: used,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_creates_root_and_meta_dir() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::open(dir.path()).unwrap();
        assert!(storage.resolve("meta").is_dir());
    }

    #[test]
    fn resolve_strips_leading_slash() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::open(dir.path()).unwrap();
        assert_eq!(storage.resolve("/foo.sav"), storage.root().join("foo.sav"));
    }

    #[test]
    fn virtual_capacity_tracks_file_sizes() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::open(dir.path())
            .unwrap()
            .with_virtual_capacity(1000);
        fs::write(storage.resolve("a.sav"), vec![0u8; 400]).unwrap();
        let stats = storage.space_stats().unwrap();
        assert_eq!(stats.total_bytes, 1000);
        assert_eq!(stats.used_bytes, 400);
        assert_eq!(stats.free_bytes(), 600);
    }

    #[test]
    fn remove_deletes_file() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::open(dir.path()).unwrap();
        fs::write(storage.resolve("x.sav"), b"hi").unwrap();
        assert!(storage.exists("x.sav"));
        storage.remove("x.sav").unwrap();
        assert!(!storage.exists("x.sav"));
    }

    #[test]
    fn list_root_files_skips_meta_dir() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::open(dir.path()).unwrap();
        fs::write(storage.resolve("one.sav"), b"a").unwrap();
        let files = storage.list_root_files().unwrap();
        assert_eq!(files, vec!["one.sav".to_string()]);
    }
}
