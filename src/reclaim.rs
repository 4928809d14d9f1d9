//! Reclamation (C9): free-space enforcement by deleting non-active,
//! preferably already-exported log files.

use std::sync::Arc;

use tracing::info;

use crate::catalog::Catalog;
use crate::storage::Storage;

const MAX_ITERATIONS: usize = 64;

/// Matches `log_<digits>_bus<digit>...sav`, the same substring checks the
/// original firmware's orphan scanner used.
fn looks_like_log_file(name: &str) -> bool {
    name.starts_with("log_") && name.contains("_bus") && name.ends_with(".sav")
}

fn leading_number(name: &str) -> Option<u64> {
    let rest = name.strip_prefix("log_")?;
    let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        None
    } else {
        digits.parse().ok()
    }
}

/// Free at least `min_free` bytes, deleting non-Active catalog entries first
/// (exported files before unexported, oldest `start_ms` breaking ties), then
/// falling back to an orphan-filename scan of the storage root. Bounded at
/// [`MAX_ITERATIONS`] passes. Returns `true` iff `min_free` bytes are free
/// when it returns.
pub fn ensure_space(storage: &Arc<Storage>, catalog: &Arc<Catalog>, min_free: u64) -> bool {
    for _ in 0..MAX_ITERATIONS {
        let stats = match storage.space_stats() {
            Ok(s) => s,
            Err(_) => return false,
        };
        if stats.free_bytes() >= min_free {
            return true;
        }

        if let Some(victim) = pick_catalog_victim(catalog) {
            info!(path = %victim, "reclaiming catalog entry");
            let _ = storage.remove(&victim);
            catalog.remove(&victim);
            continue;
        }

        if let Some(orphan) = pick_orphan_victim(storage) {
            info!(path = %orphan, "reclaiming orphan file");
            let _ = storage.remove(&orphan);
            continue;
        }

        // Nothing left to delete.
        return storage
            .space_stats()
            .map(|s| s.free_bytes() >= min_free)
            .unwrap_or(false);
    }

    storage
        .space_stats()
        .map(|s| s.free_bytes() >= min_free)
        .unwrap_or(false)
}

fn pick_catalog_victim(catalog: &Arc<Catalog>) -> Option<String> {
    catalog
        .entries()
        .into_iter()
        .filter(|e| !e.is_active())
        .min_by_key(|e| (priority_key(e.is_exported()), e.start_ms))
        .map(|e| e.path)
}

fn priority_key(exported: bool) -> u8 {
    if exported {
        0
    } else {
        1
    }
}

fn pick_orphan_victim(storage: &Arc<Storage>) -> Option<String> {
    let files = storage.list_root_files().ok()?;
    files
        .into_iter()
        .filter(|name| looks_like_log_file(name))
        .filter_map(|name| leading_number(&name).map(|n| (n, name)))
        .min_by_key(|(n, _)| *n)
        .map(|(_, name)| name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;
    use std::fs;

    fn setup(virtual_capacity: u64) -> (tempfile::TempDir, Arc<Storage>, Arc<Catalog>) {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(
            Storage::open(dir.path())
                .unwrap()
                .with_virtual_capacity(virtual_capacity),
        );
        let catalog = Arc::new(Catalog::load(storage.clone()));
        (dir, storage, catalog)
    }

    #[test]
    fn looks_like_log_file_matches_expected_pattern() {
        assert!(looks_like_log_file("log_123_bus1_can1.sav"));
        assert!(!looks_like_log_file("notes.txt"));
        assert!(!looks_like_log_file("log_123.sav"));
    }

    #[test]
    fn prefers_exported_victim_over_unexported() {
        let (_dir, storage, catalog) = setup(1000);
        fs::write(storage.resolve("a.sav"), vec![0u8; 100]).unwrap();
        fs::write(storage.resolve("b.sav"), vec![0u8; 100]).unwrap();
        catalog.register("/a.sav", 0, 10);
        catalog.finalize("/a.sav", 20, 100, 1);
        catalog.register("/b.sav", 0, 5); // older, but not exported
        catalog.finalize("/b.sav", 20, 100, 1);
        catalog.mark_downloaded("/a.sav");

        let victim = pick_catalog_victim(&catalog).unwrap();
        assert_eq!(victim, "/a.sav");
    }

    #[test]
    fn skips_active_entries() {
        let (_dir, storage, catalog) = setup(1000);
        fs::write(storage.resolve("active.sav"), vec![0u8; 50]).unwrap();
        catalog.register("/active.sav", 0, 1); // stays Active
        assert!(pick_catalog_victim(&catalog).is_none());
    }

    #[test]
    fn ensure_space_frees_bytes_via_catalog_then_orphans() {
        let (_dir, storage, catalog) = setup(150);
        fs::write(storage.resolve("tracked.sav"), vec![0u8; 100]).unwrap();
        catalog.register("/tracked.sav", 0, 1);
        catalog.finalize("/tracked.sav", 2, 100, 1);

        fs::write(storage.resolve("log_5_bus1_can1.sav"), vec![0u8; 40]).unwrap();

        let ok = ensure_space(&storage, &catalog, 120);
        assert!(ok);
        assert!(!storage.exists("tracked.sav") || !storage.exists("log_5_bus1_can1.sav"));
    }
}
