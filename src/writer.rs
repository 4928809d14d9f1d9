//! Log writer task (C10): drains ready blocks from every active bus and
//! writes them through that bus's [`LogFile`], reopening once on a short
//! write before marking the file errored for the pass. A bus whose file
//! is `Error`d gets a fresh `open()` attempt on the next pump or on an
//! explicit `start()`, so a transient I/O failure doesn't strand it.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{error, warn};

use crate::logblock::BlockBuffer;
use crate::logfile::LogFile;
use crate::time::TimeSource;

/// One bus's writer-side state: the shared ingest buffer plus the
/// exclusively-owned open log file.
pub struct BusWriter {
    pub bus_id: u8,
    pub buffer: Arc<BlockBuffer>,
    pub log: Mutex<LogFile>,
    pub enabled: AtomicBool,
    pub bytes_flushed: AtomicU64,
    pub frames_flushed: AtomicU64,
}

impl BusWriter {
    pub fn new(bus_id: u8, buffer: Arc<BlockBuffer>, log: LogFile) -> Self {
        Self {
            bus_id,
            buffer,
            log: Mutex::new(log),
            enabled: AtomicBool::new(false),
            bytes_flushed: AtomicU64::new(0),
            frames_flushed: AtomicU64::new(0),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Open (if needed, or re-open after a prior failure) then drain every
    /// ready block through the file.
    fn pump(&self, time: &TimeSource) {
        if !self.is_enabled() {
            return;
        }
        let mut log = self.log.lock();
        if matches!(
            log.state(),
            crate::logfile::FileState::Idle | crate::logfile::FileState::Error
        ) {
            if let Err(e) = log.open(time.now_ms()) {
                error!(bus = self.bus_id, error = %e, "failed to open log file");
                return;
            }
        }
        self.drain_ready_blocks(&mut log, time);
    }

    /// Drain every Ready block through `log`, regardless of whether this
    /// bus is currently enabled. Used both by the normal pump loop and by
    /// `stop()`'s final drain of a freshly-flushed partial block.
    fn drain_ready_blocks(&self, log: &mut LogFile, time: &TimeSource) {
        while let Some(ready) = self.buffer.acquire_ready() {
            let now_ms = time.now_ms();
            if let Err(e) = log.rotate_if_needed(ready.bytes.len(), now_ms) {
                warn!(bus = self.bus_id, error = %e, "rotation failed, dropping block");
                self.buffer.release(ready.index);
                continue;
            }

            match log.write(&ready.bytes) {
                Ok(()) => {
                    self.bytes_flushed
                        .fetch_add(ready.bytes.len() as u64, Ordering::Relaxed);
                    self.frames_flushed
                        .fetch_add(ready.frames as u64, Ordering::Relaxed);
                }
                Err(e) => {
                    warn!(bus = self.bus_id, error = %e, "write failed, attempting reopen");
                    match log.reopen() {
                        Ok(()) => match log.write(&ready.bytes) {
                            Ok(()) => {
                                self.bytes_flushed
                                    .fetch_add(ready.bytes.len() as u64, Ordering::Relaxed);
                                self.frames_flushed
                                    .fetch_add(ready.frames as u64, Ordering::Relaxed);
                            }
                            Err(e2) => {
                                error!(
                                    bus = self.bus_id,
                                    error = %e2,
                                    "retry write after reopen failed, marking file errored"
                                );
                                log.mark_error();
                            }
                        },
                        Err(e2) => {
                            error!(bus = self.bus_id, error = %e2, "reopen failed, file errored");
                        }
                    }
                }
            }
            self.buffer.release(ready.index);
        }
    }

    pub fn start(&self, time: &TimeSource) {
        self.enabled.store(true, Ordering::Relaxed);
        let mut log = self.log.lock();
        if matches!(
            log.state(),
            crate::logfile::FileState::Idle | crate::logfile::FileState::Error
        ) {
            let _ = log.open(time.now_ms());
        }
    }

    pub fn stop(&self, time: &TimeSource) {
        self.enabled.store(false, Ordering::Relaxed);
        self.buffer.flush_active();
        self.pump(time);
        let mut log = self.log.lock();
        let _ = log.close(time.now_ms());
    }

    pub fn close_active_file(&self, time: &TimeSource) {
        let mut log = self.log.lock();
        let was_active = log.state() == crate::logfile::FileState::Active;
        let _ = log.close(time.now_ms());
        if was_active && self.is_enabled() {
            let _ = log.open(time.now_ms());
        }
    }
}

/// Owns every bus's [`BusWriter`] and runs the shared writer loop.
pub struct Writer {
    buses: Vec<Arc<BusWriter>>,
    time: Arc<TimeSource>,
}

impl Writer {
    pub fn new(buses: Vec<Arc<BusWriter>>, time: Arc<TimeSource>) -> Self {
        Self { buses, time }
    }

    pub fn bus(&self, bus_id: u8) -> Option<&Arc<BusWriter>> {
        self.buses.iter().find(|b| b.bus_id == bus_id)
    }

    pub fn buses(&self) -> &[Arc<BusWriter>] {
        &self.buses
    }

    pub fn start_all(&self) {
        for bus in &self.buses {
            bus.start(&self.time);
        }
    }

    pub fn stop_all(&self) {
        for bus in &self.buses {
            bus.stop(&self.time);
        }
    }

    /// One pass over every bus. Exposed separately from [`Self::run`] so
    /// tests can drive the loop deterministically without a background
    /// thread.
    pub fn pump_once(&self) {
        for bus in &self.buses {
            bus.pump(&self.time);
        }
    }

    /// Runs the writer loop on the calling thread until `stop` is set,
    /// yielding one tick between passes.
    pub fn run(&self, stop: Arc<AtomicBool>) {
        while !stop.load(Ordering::Relaxed) {
            self.pump_once();
            thread::sleep(Duration::from_millis(1));
        }
    }
}
