//! Configuration store (C2): versioned settings with forward migration.
//!
//! Persistence is a single opaque binary blob (`config.bin`) standing in for
//! the original NVS partition. The store picks its decode path by comparing
//! the blob's exact byte length against each historical layout in
//! [`migrate`], exactly like the firmware it was ported from.

pub mod cli;
pub mod migrate;

use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

pub const CONFIG_MAGIC: u32 = 0x4341_4742; // "CAGB"
pub const CONFIG_VERSION: u16 = 4;
pub const MAX_BUSES: usize = 6;
pub const MAX_WIFI: usize = 3;

/// One bus's persisted settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BusConfig {
    pub enabled: bool,
    pub bitrate: u32,
    /// Reserved for a future TX path; never consulted by the ingest
    /// pipeline today (see DESIGN.md's Open Questions).
    pub read_only: bool,
    pub logging: bool,
    pub name: String,
}

impl fmt::Display for BusConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (enabled={}, {} bps, logging={})",
            self.name, self.enabled, self.bitrate, self.logging
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct WifiCred {
    pub ssid: String,
    pub password: String,
}

/// Process-wide settings shared by every bus.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GlobalConfig {
    pub max_file_bytes: u64,
    pub low_space_bytes: u64,
    pub wifi: [WifiCred; MAX_WIFI],
    pub wifi_count: u8,
    pub wifi_sta_enabled: bool,
    /// Carried for a future upload collaborator; never dialed out to by this
    /// port (the legacy uploader is out of scope).
    pub upload_url: String,
    pub influx_url: String,
    pub influx_token: String,
    pub api_token: String,
    pub can_time_sync: bool,
    pub manual_epoch: u64,
    pub dbc_name: String,
}

impl fmt::Display for GlobalConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "max_file_bytes={}, low_space_bytes={}, wifi_count={}, api_token={}",
            self.max_file_bytes,
            self.low_space_bytes,
            self.wifi_count,
            if self.api_token.is_empty() { "(none)" } else { "(set)" }
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub buses: [BusConfig; MAX_BUSES],
    pub global: GlobalConfig,
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "global: {}", self.global)?;
        for (i, bus) in self.buses.iter().enumerate() {
            writeln!(f, "  bus {i}: {bus}")?;
        }
        Ok(())
    }
}

/// Allowed characters in a sanitized bus name.
fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

/// Sanitize a user-supplied bus name: disallowed characters are dropped,
/// spaces become underscores, and an empty result falls back to `can<N>`.
pub fn sanitize_name(raw: &str, bus_index: usize) -> String {
    let mapped: String = raw
        .chars()
        .map(|c| if c == ' ' { '_' } else { c })
        .filter(|&c| is_name_char(c))
        .collect();
    if mapped.is_empty() {
        format_default_bus_name(bus_index)
    } else {
        mapped
    }
}

pub fn format_default_bus_name(bus_index: usize) -> String {
    format!("can{bus_index}")
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bitrate: 500_000,
            read_only: false,
            logging: false,
            name: String::new(),
        }
    }
}

impl Config {
    /// Zero-then-apply-defaults, matching the original firmware's
    /// `apply_defaults()`: bus 0 enabled at 500 kbit/s with logging on,
    /// every other bus disabled.
    pub fn defaults() -> Self {
        let mut buses: [BusConfig; MAX_BUSES] = std::array::from_fn(|i| BusConfig {
            name: format_default_bus_name(i),
            ..BusConfig::default()
        });
        buses[0].enabled = true;
        buses[0].logging = true;

        Config {
            buses,
            global: GlobalConfig {
                max_file_bytes: 64 * 1024 * 1024,
                low_space_bytes: 32 * 1024 * 1024,
                wifi: std::array::from_fn(|_| WifiCred::default()),
                wifi_count: 0,
                wifi_sta_enabled: true,
                upload_url: String::new(),
                influx_url: String::new(),
                influx_token: String::new(),
                api_token: String::new(),
                can_time_sync: false,
                manual_epoch: 0,
                dbc_name: String::new(),
            },
        }
    }

    /// Sanitize every bus name in place, the same way the original firmware
    /// does at config-write time rather than leaving stray characters or
    /// empty names to reach the filesystem unsanitized.
    pub fn sanitize_names(&mut self) {
        for (i, bus) in self.buses.iter_mut().enumerate() {
            bus.name = sanitize_name(&bus.name, i);
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.global.wifi_count as usize > MAX_WIFI {
            return Err(format!("wifi_count {} exceeds max {}", self.global.wifi_count, MAX_WIFI));
        }
        for bus in &self.buses {
            if bus.bitrate == 0 && bus.enabled {
                return Err(format!("bus {} enabled with zero bitrate", bus.name));
            }
        }
        Ok(())
    }

    fn to_bytes(&self) -> Vec<u8> {
        let json = serde_json::to_vec(self).expect("Config always serializes");
        let mut out = Vec::with_capacity(4 + 2 + 4 + json.len());
        out.extend_from_slice(&CONFIG_MAGIC.to_le_bytes());
        out.extend_from_slice(&CONFIG_VERSION.to_le_bytes());
        out.extend_from_slice(&(json.len() as u32).to_le_bytes());
        out.extend_from_slice(&json);
        out
    }

    fn from_current_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < 10 {
            return None;
        }
        let magic = u32::from_le_bytes(bytes[0..4].try_into().ok()?);
        let version = u16::from_le_bytes(bytes[4..6].try_into().ok()?);
        if magic != CONFIG_MAGIC || version != CONFIG_VERSION {
            return None;
        }
        let len = u32::from_le_bytes(bytes[6..10].try_into().ok()?) as usize;
        let payload = bytes.get(10..10 + len)?;
        serde_json::from_slice(payload).ok()
    }

    /// Decode `bytes` by trying the current layout, then every historical
    /// layout newest-first, migrating forward on the first match.
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if let Some(cfg) = Self::from_current_bytes(bytes) {
            return Some(cfg);
        }
        if let Some(v3) = migrate::ConfigV3::decode(bytes) {
            return Some(v3.into_current());
        }
        if let Some(v2) = migrate::ConfigV2::decode(bytes) {
            return Some(v2.into_current());
        }
        if let Some(v1) = migrate::ConfigV1::decode(bytes) {
            return Some(v1.into_current());
        }
        None
    }
}

/// Loads/saves [`Config`] as a single binary blob on the storage root.
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Load the config, migrating and persisting it back if it was an older
    /// layout. Any failure to read or decode falls back to defaults, which
    /// are then saved so the next boot starts from a clean current-version
    /// blob (mirrors `load_from_nvs`'s fallback-to-defaults behavior).
    pub fn load(&self) -> CoreResult<Config> {
        match std::fs::read(&self.path) {
            Ok(bytes) => match Config::decode(&bytes) {
                Some(cfg) => self.save(&cfg),
                None => self.save(&Config::defaults()),
            },
            Err(_) => self.save(&Config::defaults()),
        }
    }

    /// Sanitize every bus name, validate, and persist `cfg` as the current
    /// binary layout. Returns the sanitized config actually written, so
    /// callers that hold a snapshot of the config stay in sync with disk.
    pub fn save(&self, cfg: &Config) -> CoreResult<Config> {
        let mut cfg = cfg.clone();
        cfg.sanitize_names();
        cfg.validate().map_err(CoreError::ConfigInvalid)?;
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| CoreError::StorageUnavailable(e.to_string()))?;
        }
        let bytes = cfg.to_bytes();
        let mut file = std::fs::File::create(&self.path)
            .map_err(|e| CoreError::StorageUnavailable(e.to_string()))?;
        file.write_all(&bytes)
            .map_err(|e| CoreError::StorageUnavailable(e.to_string()))?;
        Ok(cfg)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
