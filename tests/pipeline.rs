//! End-to-end ingest -> block buffer -> writer -> file manager -> catalog,
//! driven with synthetic frames instead of a real CAN controller.

use std::sync::Arc;
use std::time::Duration;

use canlogger::catalog::Catalog;
use canlogger::frame::Frame;
use canlogger::logblock::BlockBuffer;
use canlogger::logfile::LogFile;
use canlogger::storage::Storage;
use canlogger::time::TimeSource;
use canlogger::writer::{BusWriter, Writer};

#[test]
fn frames_round_trip_into_a_finalized_log_file() {
    let dir = tempfile::tempdir().unwrap();
    let storage = Arc::new(Storage::open(dir.path()).unwrap());
    let catalog = Arc::new(Catalog::load(storage.clone()));
    let time = Arc::new(TimeSource::new());

    let buffer = Arc::new(BlockBuffer::new(8192));
    let log = LogFile::new(0, "can1".into(), storage.clone(), catalog.clone(), 0);
    let bus = Arc::new(BusWriter::new(0, buffer.clone(), log));

    bus.start(&time);

    for i in 0..50u32 {
        let frame = Frame::new(time.now_us(), 0x100 + i, false, 8, [1, 2, 3, 4, 5, 6, 7, 8]);
        let line = canlogger::frame::format_line(0, &frame);
        buffer.produce(line.as_bytes());
    }

    let writer = Writer::new(vec![bus.clone()], time.clone());
    writer.pump_once();
    std::thread::sleep(Duration::from_millis(5));
    writer.pump_once();

    bus.stop(&time);

    let entries = catalog.entries();
    assert_eq!(entries.len(), 1);
    let entry = &entries[0];
    assert!(!entry.is_active());
    assert!(entry.size_bytes > 0);

    let on_disk = std::fs::read(storage.resolve(&entry.path)).unwrap();
    assert_eq!(on_disk.len() as u64, entry.size_bytes);
    assert_eq!(canlogger::crc32::crc32(&on_disk), entry.crc32);
}

#[test]
fn reclamation_deletes_exported_file_before_unexported() {
    let dir = tempfile::tempdir().unwrap();
    let storage = Arc::new(
        Storage::open(dir.path())
            .unwrap()
            .with_virtual_capacity(1000),
    );
    let catalog = Arc::new(Catalog::load(storage.clone()));

    std::fs::write(storage.resolve("old.sav"), vec![0u8; 400]).unwrap();
    catalog.register("/old.sav", 0, 1);
    catalog.finalize("/old.sav", 2, 400, 1);
    catalog.mark_downloaded("/old.sav");

    std::fs::write(storage.resolve("newer.sav"), vec![0u8; 400]).unwrap();
    catalog.register("/newer.sav", 0, 100);
    catalog.finalize("/newer.sav", 101, 400, 1);

    let freed = canlogger::reclaim::ensure_space(&storage, &catalog, 700);
    assert!(freed);
    assert!(!storage.exists("old.sav"));
    assert!(storage.exists("newer.sav"));
}
