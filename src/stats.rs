//! Snapshot types exposed by the REST status endpoints: per-bus CAN
//! counters, writer throughput, and storage usage, each assembled from the
//! live subsystem state the moment a caller asks.

use serde::Serialize;

use crate::writer::BusWriter;

#[derive(Debug, Clone, Serialize)]
pub struct CanBusStats {
    pub bus: u8,
    pub drops: u64,
    pub high_water_bytes: usize,
    pub enabled: bool,
}

impl CanBusStats {
    pub fn sample(bus: &BusWriter) -> Self {
        Self {
            bus: bus.bus_id,
            drops: bus.buffer.drops() as u64,
            high_water_bytes: bus.buffer.high_water_bytes(),
            enabled: bus.is_enabled(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct WriterStats {
    pub bus: u8,
    pub bytes_flushed: u64,
    pub frames_flushed: u64,
    pub reopen_attempts: u64,
    pub write_failures: u64,
}

impl WriterStats {
    pub fn sample(bus: &BusWriter) -> Self {
        let log = bus.log.lock();
        Self {
            bus: bus.bus_id,
            bytes_flushed: bus.bytes_flushed.load(std::sync::atomic::Ordering::Relaxed),
            frames_flushed: bus.frames_flushed.load(std::sync::atomic::Ordering::Relaxed),
            reopen_attempts: log.reopen_attempts,
            write_failures: log.write_failures,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StorageStats {
    pub total_bytes: u64,
    pub used_bytes: u64,
    pub free_bytes: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;
    use crate::logblock::BlockBuffer;
    use crate::logfile::LogFile;
    use crate::storage::Storage;
    use std::sync::Arc;

    #[test]
    fn can_bus_stats_reflects_buffer_counters() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(Storage::open(dir.path()).unwrap());
        let catalog = Arc::new(Catalog::load(storage.clone()));
        let buffer = Arc::new(BlockBuffer::new(4));
        let log = LogFile::new(0, "can1".into(), storage, catalog, 0);
        let bus = BusWriter::new(0, buffer.clone(), log);

        buffer.produce(b"ab");
        buffer.produce(b"cd"); // fills block -> ready
        buffer.produce(b"ef"); // fills second block -> ready
        buffer.produce(b"xx"); // dropped, both blocks busy

        let stats = CanBusStats::sample(&bus);
        assert_eq!(stats.drops, 1);
        assert_eq!(stats.bus, 0);
    }
}
