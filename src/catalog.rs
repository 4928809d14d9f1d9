//! Status catalog (C8): the persisted index of log files and their
//! lifecycle flags, mirrored to `/meta/file_status.json`.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::storage::Storage;

pub const MAX_ENTRIES: usize = 128;

pub const FLAG_DOWNLOADED: u8 = 0x1;
pub const FLAG_UPLOADED: u8 = 0x2;
pub const FLAG_ACTIVE: u8 = 0x4;

const CATALOG_PATH: &str = "meta/file_status.json";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusEntry {
    pub path: String,
    pub bus_id: u8,
    pub start_ms: u64,
    pub end_ms: u64,
    pub size_bytes: u64,
    pub crc32: u32,
    pub flags: u8,
}

impl StatusEntry {
    pub fn is_active(&self) -> bool {
        self.flags & FLAG_ACTIVE != 0
    }

    pub fn is_exported(&self) -> bool {
        self.flags & (FLAG_DOWNLOADED | FLAG_UPLOADED) != 0
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct CatalogFile {
    version: u32,
    files: Vec<StatusEntry>,
}

/// In-memory table mirrored to disk on every mutating call. Matches the
/// original firmware's full-rewrite persistence: there is no incremental
/// append format, so a crash mid-write leaves either the old or the new
/// file intact, never a torn hybrid.
pub struct Catalog {
    storage: Arc<Storage>,
    entries: Mutex<Vec<StatusEntry>>,
}

impl Catalog {
    pub fn load(storage: Arc<Storage>) -> Self {
        let entries = Self::read_from_disk(&storage).unwrap_or_default();
        let catalog = Self {
            storage,
            entries: Mutex::new(entries),
        };
        catalog.save();
        catalog
    }

    fn read_from_disk(storage: &Storage) -> Option<Vec<StatusEntry>> {
        let path = storage.resolve(CATALOG_PATH);
        let bytes = std::fs::read(path).ok()?;
        let parsed: CatalogFile = serde_json::from_slice(&bytes).ok()?;
        Some(parsed.files)
    }

    fn save(&self) {
        let entries = self.entries.lock();
        let file = CatalogFile {
            version: 1,
            files: entries.clone(),
        };
        if let Ok(bytes) = serde_json::to_vec_pretty(&file) {
            let path = self.storage.resolve(CATALOG_PATH);
            let _ = std::fs::write(path, bytes);
        }
    }

    pub fn entries(&self) -> Vec<StatusEntry> {
        self.entries.lock().clone()
    }

    pub fn find(&self, path: &str) -> Option<StatusEntry> {
        self.entries.lock().iter().find(|e| e.path == path).cloned()
    }

    /// Register a newly-opened log file as Active.
    pub fn register(&self, path: &str, bus_id: u8, start_ms: u64) {
        let mut entries = self.entries.lock();
        if entries.len() >= MAX_ENTRIES {
            entries.remove(0);
        }
        entries.push(StatusEntry {
            path: path.to_string(),
            bus_id,
            start_ms,
            end_ms: 0,
            size_bytes: 0,
            crc32: 0,
            flags: FLAG_ACTIVE,
        });
        drop(entries);
        self.save();
    }

    /// Clear Active and record the final size/crc/end time for `path`.
    pub fn finalize(&self, path: &str, end_ms: u64, size_bytes: u64, crc32: u32) {
        {
            let mut entries = self.entries.lock();
            if let Some(entry) = entries.iter_mut().find(|e| e.path == path) {
                entry.end_ms = end_ms;
                entry.size_bytes = size_bytes;
                entry.crc32 = crc32;
                entry.flags &= !FLAG_ACTIVE;
            }
        }
        self.save();
    }

    pub fn set_flag(&self, path: &str, flag: u8) -> bool {
        let found = {
            let mut entries = self.entries.lock();
            match entries.iter_mut().find(|e| e.path == path) {
                Some(entry) => {
                    entry.flags |= flag;
                    true
                }
                None => false,
            }
        };
        if found {
            self.save();
        }
        found
    }

    pub fn mark_downloaded(&self, path: &str) -> bool {
        self.set_flag(path, FLAG_DOWNLOADED)
    }

    pub fn mark_uploaded(&self, path: &str) -> bool {
        self.set_flag(path, FLAG_UPLOADED)
    }

    pub fn remove(&self, path: &str) {
        {
            let mut entries = self.entries.lock();
            entries.retain(|e| e.path != path);
        }
        self.save();
    }
}
