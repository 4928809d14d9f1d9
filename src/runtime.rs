//! Top-level runtime: owns every subsystem handle and wires C2/C3/C5-C11
//! together, the way `worker::Worker` owns an engine/target/distribution
//! stack in the teacher this port is built from.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::{Mutex, RwLock};
use tracing::{info, warn};

use crate::can::{run_rx_task, CanController, MockController};
use crate::catalog::Catalog;
use crate::config::{Config, ConfigStore};
use crate::error::CoreResult;
use crate::logblock::BlockBuffer;
use crate::logfile::LogFile;
use crate::net::{SimulatedRadio, Supervisor};
use crate::stats::{CanBusStats, StorageStats, WriterStats};
use crate::storage::Storage;
use crate::time::TimeSource;
use crate::writer::{BusWriter, Writer};

pub struct RuntimeOptions {
    pub storage_root: std::path::PathBuf,
    pub config_path: std::path::PathBuf,
    pub virtual_capacity_bytes: Option<u64>,
}

/// Owns the whole pipeline: storage, catalog, per-bus buffers/files, the
/// writer task, and the Wi-Fi supervisor. REST handlers (C12) borrow an
/// `Arc<Runtime>` and call straight into it.
pub struct Runtime {
    pub time: Arc<TimeSource>,
    pub storage: Arc<Storage>,
    pub catalog: Arc<Catalog>,
    pub config: RwLock<Arc<Config>>,
    config_store: ConfigStore,
    pub writer: Arc<Writer>,
    pub supervisor: Arc<Supervisor<SimulatedRadio>>,
    rx_stop: Mutex<Vec<Arc<AtomicBool>>>,
    rx_handles: Mutex<Vec<JoinHandle<()>>>,
    writer_stop: Arc<AtomicBool>,
    writer_handle: Mutex<Option<JoinHandle<()>>>,
    wifi_stop: Arc<AtomicBool>,
    wifi_handle: Mutex<Option<JoinHandle<()>>>,
}

/// How often the Wi-Fi supervisor is ticked while logging is running.
const WIFI_TICK_INTERVAL: std::time::Duration = std::time::Duration::from_millis(500);

/// RX tasks are pinned to core 0 at the highest priority to avoid drops;
/// the writer task runs on core 1 at lower priority, exactly as the
/// original firmware pins `rx_task`/`log_task` with `xTaskCreatePinnedToCore`.
const RX_TASK_CORE: usize = 0;
const WRITER_TASK_CORE: usize = 1;

impl Runtime {
    pub fn new(opts: RuntimeOptions) -> CoreResult<Arc<Self>> {
        let storage = Arc::new(if let Some(cap) = opts.virtual_capacity_bytes {
            Storage::open(&opts.storage_root)?.with_virtual_capacity(cap)
        } else {
            Storage::open(&opts.storage_root)?
        });
        let catalog = Arc::new(Catalog::load(storage.clone()));

        let config_store = ConfigStore::new(opts.config_path);
        let config = config_store.load()?;
        let time = Arc::new(TimeSource::with_manual_epoch(config.global.manual_epoch));

        let buses: Vec<Arc<BusWriter>> = config
            .buses
            .iter()
            .enumerate()
            .map(|(i, bus_cfg)| {
                let buffer = Arc::new(BlockBuffer::new(crate::logblock::DEFAULT_BLOCK_SIZE));
                let log = LogFile::new(
                    i as u8,
                    bus_cfg.name.clone(),
                    storage.clone(),
                    catalog.clone(),
                    config.global.max_file_bytes,
                );
                Arc::new(BusWriter::new(i as u8, buffer, log))
            })
            .collect();

        let writer = Arc::new(Writer::new(buses, time.clone()));
        let supervisor = Arc::new(Supervisor::new(SimulatedRadio::new()));

        Ok(Arc::new(Self {
            time,
            storage,
            catalog,
            config: RwLock::new(Arc::new(config)),
            config_store,
            writer,
            supervisor,
            rx_stop: Mutex::new(Vec::new()),
            rx_handles: Mutex::new(Vec::new()),
            writer_stop: Arc::new(AtomicBool::new(false)),
            writer_handle: Mutex::new(None),
            wifi_stop: Arc::new(AtomicBool::new(false)),
            wifi_handle: Mutex::new(None),
        }))
    }

    pub fn config_snapshot(&self) -> Arc<Config> {
        self.config.read().clone()
    }

    pub fn apply_config(&self, new_config: Config) -> CoreResult<()> {
        let saved = self.config_store.save(&new_config)?;
        *self.config.write() = Arc::new(saved);
        Ok(())
    }

    /// Start RX tasks for every enabled bus plus the shared writer task.
    pub fn start_logging(self: &Arc<Self>) {
        self.writer.start_all();

        let config = self.config_snapshot();
        let mut stops = self.rx_stop.lock();
        let mut handles = self.rx_handles.lock();
        for (i, bus_cfg) in config.buses.iter().enumerate() {
            if !bus_cfg.enabled || !bus_cfg.logging {
                continue;
            }
            let Some(bus_writer) = self.writer.bus(i as u8) else {
                continue;
            };
            let controller: Box<dyn CanController> = Box::new(MockController::empty());
            let buffer = bus_writer.buffer.clone();
            let time = self.time.clone();
            let stop = Arc::new(AtomicBool::new(false));
            stops.push(stop.clone());

            let bus_id = i as u8;
            handles.push(thread::spawn(move || {
                crate::worker::pin_to_performance_core(RX_TASK_CORE);
                run_rx_task(bus_id, controller, buffer, time, stop);
            }));
        }
        drop(stops);
        drop(handles);

        self.writer_stop.store(false, Ordering::Relaxed);
        let writer = self.writer.clone();
        let writer_stop = self.writer_stop.clone();
        *self.writer_handle.lock() = Some(thread::spawn(move || {
            crate::worker::pin_to_performance_core(WRITER_TASK_CORE);
            writer.run(writer_stop);
        }));

        self.wifi_stop.store(false, Ordering::Relaxed);
        let supervisor = self.supervisor.clone();
        let wifi_stop = self.wifi_stop.clone();
        let this = self.clone();
        *self.wifi_handle.lock() = Some(thread::spawn(move || {
            while !wifi_stop.load(Ordering::Relaxed) {
                let config = this.config_snapshot();
                if config.global.wifi_sta_enabled {
                    let creds = &config.global.wifi[..config.global.wifi_count as usize];
                    if let Err(e) = supervisor.tick(creds) {
                        warn!(error = %e, "wifi supervisor tick failed");
                    }
                }
                thread::sleep(WIFI_TICK_INTERVAL);
            }
        }));

        info!("logging started");
    }

    pub fn stop_logging(&self) {
        for stop in self.rx_stop.lock().drain(..) {
            stop.store(true, Ordering::Relaxed);
        }
        for handle in self.rx_handles.lock().drain(..) {
            let _ = handle.join();
        }
        self.writer_stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.writer_handle.lock().take() {
            let _ = handle.join();
        }
        self.wifi_stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.wifi_handle.lock().take() {
            let _ = handle.join();
        }
        self.writer.stop_all();
        info!("logging stopped");
    }

    pub fn close_active_files(&self) {
        for bus in self.writer.buses() {
            bus.close_active_file(&self.time);
        }
    }

    pub fn can_stats(&self) -> Vec<CanBusStats> {
        self.writer.buses().iter().map(|b| CanBusStats::sample(b)).collect()
    }

    pub fn writer_stats(&self) -> Vec<WriterStats> {
        self.writer.buses().iter().map(|b| WriterStats::sample(b)).collect()
    }

    pub fn storage_stats(&self) -> CoreResult<StorageStats> {
        let stats = self.storage.space_stats()?;
        Ok(StorageStats {
            total_bytes: stats.total_bytes,
            used_bytes: stats.used_bytes,
            free_bytes: stats.free_bytes(),
        })
    }

    pub fn set_wall_seconds(&self, epoch_s: u64) {
        self.time.set_wall_seconds(epoch_s);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts(dir: &tempfile::TempDir) -> RuntimeOptions {
        RuntimeOptions {
            storage_root: dir.path().to_path_buf(),
            config_path: dir.path().join("config.bin"),
            virtual_capacity_bytes: Some(10 * 1024 * 1024),
        }
    }

    #[test]
    fn new_runtime_loads_default_config_and_one_bus_per_entry() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = Runtime::new(opts(&dir)).unwrap();
        assert_eq!(runtime.writer.buses().len(), crate::config::MAX_BUSES);
        assert!(runtime.config_snapshot().buses[0].enabled);
    }

    #[test]
    fn start_then_stop_logging_closes_active_file() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = Runtime::new(opts(&dir)).unwrap();
        runtime.start_logging();
        thread::sleep(std::time::Duration::from_millis(20));
        runtime.stop_logging();

        let bus0 = runtime.writer.bus(0).unwrap();
        assert_eq!(bus0.log.lock().state(), crate::logfile::FileState::Idle);
    }

    #[test]
    fn apply_config_persists_and_is_visible_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = Runtime::new(opts(&dir)).unwrap();
        let mut cfg = (*runtime.config_snapshot()).clone();
        cfg.global.api_token = "xyz".into();
        runtime.apply_config(cfg).unwrap();
        assert_eq!(runtime.config_snapshot().global.api_token, "xyz");
    }
}
