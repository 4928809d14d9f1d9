//! File manager (C7): naming, preallocation, rotation, checksumming, and
//! finalization of one bus's log file.

use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::sync::Arc;

use crate::catalog::Catalog;
use crate::crc32::Crc32;
use crate::error::{CoreError, CoreResult};
use crate::frame::header_line;
use crate::storage::Storage;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileState {
    Idle,
    Opening,
    Active,
    Closing,
    Error,
}

fn build_log_path(start_ms: u64, bus_id: u8, name: &str) -> String {
    format!(
        "/log_{}_bus{}_{}.sav",
        start_ms,
        bus_id as u32 + 1,
        crate::config::sanitize_name(name, bus_id as usize)
    )
}

/// One bus's open log file plus its accumulated stats.
pub struct LogFile {
    bus_id: u8,
    bus_name: String,
    storage: Arc<Storage>,
    catalog: Arc<Catalog>,
    max_file_bytes: u64,
    state: FileState,
    path: Option<String>,
    handle: Option<File>,
    start_ms: u64,
    bytes_written: u64,
    crc: Crc32,
    coalesce: Vec<u8>,
    pub reopen_attempts: u64,
    pub write_failures: u64,
}

const COALESCE_LIMIT: usize = 2048;

impl LogFile {
    pub fn new(
        bus_id: u8,
        bus_name: String,
        storage: Arc<Storage>,
        catalog: Arc<Catalog>,
        max_file_bytes: u64,
    ) -> Self {
        Self {
            bus_id,
            bus_name,
            storage,
            catalog,
            max_file_bytes,
            state: FileState::Idle,
            path: None,
            handle: None,
            start_ms: 0,
            bytes_written: 0,
            crc: Crc32::new(),
            coalesce: Vec::with_capacity(COALESCE_LIMIT),
            reopen_attempts: 0,
            write_failures: 0,
        }
    }

    pub fn state(&self) -> FileState {
        self.state
    }

    /// Force the file into `Error`, for callers that exhaust their own
    /// retry budget (e.g. a reopen-then-write retry that still fails).
    pub fn mark_error(&mut self) {
        self.state = FileState::Error;
    }

    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Open a new log file at `start_ms`, preallocating `max_file_bytes` and
    /// writing the header line. If the previous file was left in `Error`,
    /// its catalog entry is finalized with whatever was durably written so
    /// it doesn't stay marked Active forever.
    pub fn open(&mut self, start_ms: u64) -> CoreResult<()> {
        if self.state == FileState::Error {
            if let Some(old_path) = self.path.take() {
                self.catalog
                    .finalize(&old_path, start_ms, self.bytes_written, self.crc.finalize());
            }
        }
        self.state = FileState::Opening;
        let path = build_log_path(start_ms, self.bus_id, &self.bus_name);
        let full_path = self.storage.resolve(&path);

        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&full_path)
            .map_err(|e| {
                self.state = FileState::Error;
                CoreError::FileIoOpenFailed {
                    path: path.clone(),
                    source: e,
                }
            })?;

        if self.max_file_bytes > 0 {
            preallocate(&mut file, self.max_file_bytes)?;
        }

        self.crc = Crc32::new();
        self.bytes_written = 0;
        self.coalesce.clear();

        let header = header_line(self.bus_id);
        file.write_all(header.as_bytes()).map_err(|e| {
            self.state = FileState::Error;
            CoreError::FileIoOpenFailed {
                path: path.clone(),
                source: e,
            }
        })?;
        self.crc.update(header.as_bytes());
        self.bytes_written += header.len() as u64;

        self.handle = Some(file);
        self.path = Some(path.clone());
        self.start_ms = start_ms;
        self.state = FileState::Active;

        self.catalog.register(&path, self.bus_id, start_ms);
        Ok(())
    }

    /// Rotate to a new file if `next_len` more bytes would exceed the
    /// configured maximum.
    pub fn rotate_if_needed(&mut self, next_len: usize, now_ms: u64) -> CoreResult<()> {
        if self.max_file_bytes == 0 {
            return Ok(());
        }
        let projected = self.bytes_written + self.coalesce.len() as u64 + next_len as u64;
        if projected > self.max_file_bytes {
            self.close(now_ms)?;
            self.open(now_ms)?;
        }
        Ok(())
    }

    /// Append `data` through the write-coalescing buffer, folding it into
    /// the running CRC immediately (the CRC covers bytes handed to the
    /// storage layer, not bytes actually flushed to disk at any instant).
    pub fn write(&mut self, data: &[u8]) -> CoreResult<()> {
        self.crc.update(data);
        self.coalesce.extend_from_slice(data);
        self.bytes_written += data.len() as u64;
        if self.coalesce.len() >= COALESCE_LIMIT {
            self.flush_coalesce()?;
        }
        Ok(())
    }

    fn flush_coalesce(&mut self) -> CoreResult<()> {
        if self.coalesce.is_empty() {
            return Ok(());
        }
        let path = self.path.clone().unwrap_or_default();
        let handle = self
            .handle
            .as_mut()
            .ok_or_else(|| CoreError::StorageUnavailable("no open file handle".into()))?;
        let requested = self.coalesce.len();
        let wrote = handle.write(&self.coalesce).map_err(|e| {
            CoreError::FileIoOpenFailed { path: path.clone(), source: e }
        })?;
        if wrote != requested {
            self.write_failures += 1;
            self.coalesce.drain(..wrote);
            return Err(CoreError::FileIoShortWrite {
                path,
                wrote,
                requested,
            });
        }
        self.coalesce.clear();
        Ok(())
    }

    /// Flush, close, finalize the catalog entry, and return to Idle.
    pub fn close(&mut self, now_ms: u64) -> CoreResult<()> {
        if self.state != FileState::Active {
            return Ok(());
        }
        self.state = FileState::Closing;
        self.flush_coalesce()?;
        if let Some(handle) = self.handle.as_mut() {
            let _ = handle.flush();
        }
        self.handle = None;

        if let Some(path) = self.path.clone() {
            self.catalog
                .finalize(&path, now_ms, self.bytes_written, self.crc.finalize());
        }
        self.state = FileState::Idle;
        Ok(())
    }

    /// Flush+close the current handle and reopen it for append at the
    /// current `bytes_written` offset, without touching the catalog entry.
    pub fn reopen(&mut self) -> CoreResult<()> {
        self.reopen_attempts += 1;
        let path = match &self.path {
            Some(p) => p.clone(),
            None => return Ok(()),
        };
        let full_path = self.storage.resolve(&path);
        self.handle = None;
        let mut file = OpenOptions::new()
            .write(true)
            .open(&full_path)
            .map_err(|e| {
                self.state = FileState::Error;
                CoreError::FileIoOpenFailed { path: path.clone(), source: e }
            })?;
        file.seek(SeekFrom::Start(self.bytes_written)).map_err(|e| {
            self.state = FileState::Error;
            CoreError::FileIoOpenFailed { path: path.clone(), source: e }
        })?;
        self.handle = Some(file);
        self.state = FileState::Active;
        Ok(())
    }
}

/// Reserve `size` bytes without truncating: seek to `size - 1`, write one
/// zero byte, flush, seek back to start. Matches the original firmware's
/// filesystem preallocation trick exactly.
fn preallocate(file: &mut File, size: u64) -> CoreResult<()> {
    let err = |e: std::io::Error| CoreError::FileIoOpenFailed {
        path: "<preallocate>".to_string(),
        source: e,
    };
    file.seek(SeekFrom::Start(size - 1)).map_err(err)?;
    file.write_all(&[0u8]).map_err(err)?;
    file.flush().map_err(err)?;
    file.seek(SeekFrom::Start(0)).map_err(err)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> (tempfile::TempDir, Arc<Storage>, Arc<Catalog>) {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(Storage::open(dir.path()).unwrap());
        let catalog = Arc::new(Catalog::load(storage.clone()));
        (dir, storage, catalog)
    }

    #[test]
    fn open_writes_header_and_registers_active() {
        let (_dir, storage, catalog) = fixture();
        let mut log = LogFile::new(0, "can1".into(), storage.clone(), catalog.clone(), 0);
        log.open(1000).unwrap();
        assert_eq!(log.state(), FileState::Active);
        let entry = catalog.find(log.path().unwrap()).unwrap();
        assert!(entry.is_active());
        assert_eq!(log.bytes_written(), header_line(0).len() as u64);
    }

    #[test]
    fn preallocation_reserves_without_truncating() {
        let (_dir, storage, catalog) = fixture();
        let mut log = LogFile::new(0, "can1".into(), storage.clone(), catalog, 4096);
        log.open(1).unwrap();
        let meta = std::fs::metadata(storage.resolve(log.path().unwrap())).unwrap();
        assert_eq!(meta.len(), 4096);
    }

    #[test]
    fn close_finalizes_catalog_with_crc_and_size() {
        let (_dir, _storage, catalog) = fixture();
        let storage = _storage;
        let mut log = LogFile::new(0, "can1".into(), storage, catalog.clone(), 0);
        log.open(1).unwrap();
        log.write(b"12345.000000 1R11 00000001 00 00 00 00 00 00 00 00\n").unwrap();
        let path = log.path().unwrap().to_string();
        log.close(2).unwrap();

        let entry = catalog.find(&path).unwrap();
        assert!(!entry.is_active());
        assert_eq!(entry.size_bytes, log.bytes_written());
        assert_ne!(entry.crc32, 0);
    }

    #[test]
    fn reopening_after_error_finalizes_the_stale_entry() {
        let (_dir, storage, catalog) = fixture();
        let mut log = LogFile::new(0, "can1".into(), storage, catalog.clone(), 0);
        log.open(1).unwrap();
        let stale_path = log.path().unwrap().to_string();
        log.mark_error();

        log.open(2).unwrap();
        assert_ne!(log.path().unwrap(), stale_path);

        let stale_entry = catalog.find(&stale_path).unwrap();
        assert!(!stale_entry.is_active());
        let fresh_entry = catalog.find(log.path().unwrap()).unwrap();
        assert!(fresh_entry.is_active());
    }

    #[test]
    fn rotate_if_needed_opens_new_file_when_over_budget() {
        let (_dir, storage, catalog) = fixture();
        let mut log = LogFile::new(0, "can1".into(), storage, catalog, 64);
        log.open(1).unwrap();
        let first_path = log.path().unwrap().to_string();
        log.write(b"0123456789012345678901234567890123456789").unwrap(); // 40 bytes
        log.rotate_if_needed(40, 2).unwrap(); // would exceed 64 -> rotate
        let second_path = log.path().unwrap().to_string();
        assert_ne!(first_path, second_path);
    }

    #[test]
    fn build_log_path_is_one_based_bus_and_sav_suffix() {
        let p = build_log_path(1234, 0, "can1");
        assert_eq!(p, "/log_1234_bus1_can1.sav");
        assert!(p.ends_with(".sav"));
    }

    #[test]
    fn build_log_path_sanitizes_empty_name_with_bus_index() {
        let p = build_log_path(1234, 2, "");
        assert_eq!(p, "/log_1234_bus3_can2.sav");
    }
}
