//! Historical on-disk configuration layouts and forward migration into the
//! current [`super::Config`].
//!
//! The store picks a layout by exact byte length, exactly like the firmware
//! this was ported from: there is no wire-format version negotiation, only
//! "does this blob happen to be the size version N used to encode."

use super::{BusConfig, Config, GlobalConfig, WifiCred, CONFIG_MAGIC, MAX_BUSES};

/// V1: the earliest on-disk layout. No low-space threshold, no API token,
/// no Wi-Fi credentials, no time-sync fields.
#[derive(Debug, Clone)]
pub struct GlobalConfigV1 {
    pub max_file_bytes: u64,
}

#[derive(Debug, Clone)]
pub struct BusConfigV1 {
    pub enabled: bool,
    pub bitrate: u32,
}

#[derive(Debug, Clone)]
pub struct ConfigV1 {
    pub buses: [BusConfigV1; MAX_BUSES],
    pub global: GlobalConfigV1,
}

const V1_LEN: usize = 4 + 2 + MAX_BUSES * (1 + 4) + 8;

impl ConfigV1 {
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != V1_LEN {
            return None;
        }
        let mut pos = 0;
        let magic = read_u32(bytes, &mut pos);
        let version = read_u16(bytes, &mut pos);
        if magic != CONFIG_MAGIC || version != 1 {
            return None;
        }
        let mut buses = Vec::with_capacity(MAX_BUSES);
        for _ in 0..MAX_BUSES {
            let enabled = read_u8(bytes, &mut pos) != 0;
            let bitrate = read_u32(bytes, &mut pos);
            buses.push(BusConfigV1 { enabled, bitrate });
        }
        let max_file_bytes = read_u64(bytes, &mut pos);
        Some(ConfigV1 {
            buses: buses.try_into().ok()?,
            global: GlobalConfigV1 { max_file_bytes },
        })
    }

    pub fn into_current(self) -> Config {
        let mut cfg = Config::defaults();
        for (i, bus) in self.buses.into_iter().enumerate() {
            cfg.buses[i].enabled = bus.enabled;
            cfg.buses[i].bitrate = bus.bitrate;
        }
        cfg.global.max_file_bytes = self.global.max_file_bytes;
        cfg
    }
}

/// V2 adds the low-space reclamation threshold.
#[derive(Debug, Clone)]
pub struct GlobalConfigV2 {
    pub max_file_bytes: u64,
    pub low_space_bytes: u64,
}

#[derive(Debug, Clone)]
pub struct ConfigV2 {
    pub buses: [BusConfigV1; MAX_BUSES],
    pub global: GlobalConfigV2,
}

const V2_LEN: usize = 4 + 2 + MAX_BUSES * (1 + 4) + 8 + 8;

impl ConfigV2 {
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != V2_LEN {
            return None;
        }
        let mut pos = 0;
        let magic = read_u32(bytes, &mut pos);
        let version = read_u16(bytes, &mut pos);
        if magic != CONFIG_MAGIC || version != 2 {
            return None;
        }
        let mut buses = Vec::with_capacity(MAX_BUSES);
        for _ in 0..MAX_BUSES {
            let enabled = read_u8(bytes, &mut pos) != 0;
            let bitrate = read_u32(bytes, &mut pos);
            buses.push(BusConfigV1 { enabled, bitrate });
        }
        let max_file_bytes = read_u64(bytes, &mut pos);
        let low_space_bytes = read_u64(bytes, &mut pos);
        Some(ConfigV2 {
            buses: buses.try_into().ok()?,
            global: GlobalConfigV2 {
                max_file_bytes,
                low_space_bytes,
            },
        })
    }

    pub fn into_current(self) -> Config {
        let mut cfg = Config::defaults();
        for (i, bus) in self.buses.into_iter().enumerate() {
            cfg.buses[i].enabled = bus.enabled;
            cfg.buses[i].bitrate = bus.bitrate;
        }
        cfg.global.max_file_bytes = self.global.max_file_bytes;
        cfg.global.low_space_bytes = self.global.low_space_bytes;
        cfg
    }
}

/// V3 adds per-bus name/read_only/logging flags, a single Wi-Fi credential,
/// and the API token.
#[derive(Debug, Clone)]
pub struct BusConfigV3 {
    pub enabled: bool,
    pub bitrate: u32,
    pub read_only: bool,
    pub logging: bool,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct GlobalConfigV3 {
    pub max_file_bytes: u64,
    pub low_space_bytes: u64,
    pub wifi: WifiCred,
    pub api_token: String,
}

#[derive(Debug, Clone)]
pub struct ConfigV3 {
    pub buses: [BusConfigV3; MAX_BUSES],
    pub global: GlobalConfigV3,
}

const NAME_LEN: usize = 16;
const SSID_LEN: usize = 32;
const PASS_LEN: usize = 64;
const TOKEN_LEN: usize = 32;

const V3_BUS_LEN: usize = 1 + 4 + 1 + 1 + NAME_LEN;
const V3_LEN: usize = 4 + 2 + MAX_BUSES * V3_BUS_LEN + 8 + 8 + SSID_LEN + PASS_LEN + TOKEN_LEN;

impl ConfigV3 {
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != V3_LEN {
            return None;
        }
        let mut pos = 0;
        let magic = read_u32(bytes, &mut pos);
        let version = read_u16(bytes, &mut pos);
        if magic != CONFIG_MAGIC || version != 3 {
            return None;
        }
        let mut buses = Vec::with_capacity(MAX_BUSES);
        for _ in 0..MAX_BUSES {
            let enabled = read_u8(bytes, &mut pos) != 0;
            let bitrate = read_u32(bytes, &mut pos);
            let read_only = read_u8(bytes, &mut pos) != 0;
            let logging = read_u8(bytes, &mut pos) != 0;
            let name = read_str(bytes, &mut pos, NAME_LEN);
            buses.push(BusConfigV3 {
                enabled,
                bitrate,
                read_only,
                logging,
                name,
            });
        }
        let max_file_bytes = read_u64(bytes, &mut pos);
        let low_space_bytes = read_u64(bytes, &mut pos);
        let ssid = read_str(bytes, &mut pos, SSID_LEN);
        let password = read_str(bytes, &mut pos, PASS_LEN);
        let api_token = read_str(bytes, &mut pos, TOKEN_LEN);
        Some(ConfigV3 {
            buses: buses.try_into().ok()?,
            global: GlobalConfigV3 {
                max_file_bytes,
                low_space_bytes,
                wifi: WifiCred { ssid, password },
                api_token,
            },
        })
    }

    pub fn into_current(self) -> Config {
        let mut cfg = Config::defaults();
        for (i, bus) in self.buses.into_iter().enumerate() {
            cfg.buses[i] = BusConfig {
                enabled: bus.enabled,
                bitrate: bus.bitrate,
                read_only: bus.read_only,
                logging: bus.logging,
                name: bus.name,
            };
        }
        cfg.global.max_file_bytes = self.global.max_file_bytes;
        cfg.global.low_space_bytes = self.global.low_space_bytes;
        if !self.global.wifi.ssid.is_empty() {
            cfg.global.wifi[0] = self.global.wifi;
            cfg.global.wifi_count = 1;
        }
        cfg.global.api_token = self.global.api_token;
        cfg
    }
}

fn read_u8(bytes: &[u8], pos: &mut usize) -> u8 {
    let v = bytes[*pos];
    *pos += 1;
    v
}

fn read_u16(bytes: &[u8], pos: &mut usize) -> u16 {
    let v = u16::from_le_bytes(bytes[*pos..*pos + 2].try_into().unwrap());
    *pos += 2;
    v
}

fn read_u32(bytes: &[u8], pos: &mut usize) -> u32 {
    let v = u32::from_le_bytes(bytes[*pos..*pos + 4].try_into().unwrap());
    *pos += 4;
    v
}

fn read_u64(bytes: &[u8], pos: &mut usize) -> u64 {
    let v = u64::from_le_bytes(bytes[*pos..*pos + 8].try_into().unwrap());
    *pos += 8;
    v
}

fn read_str(bytes: &[u8], pos: &mut usize, len: usize) -> String {
    let slice = &bytes[*pos..*pos + len];
    *pos += len;
    let end = slice.iter().position(|&b| b == 0).unwrap_or(len);
    String::from_utf8_lossy(&slice[..end]).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_v1(buses: &[BusConfigV1; MAX_BUSES], max_file_bytes: u64) -> Vec<u8> {
        let mut out = Vec::with_capacity(V1_LEN);
        out.extend_from_slice(&CONFIG_MAGIC.to_le_bytes());
        out.extend_from_slice(&1u16.to_le_bytes());
        for bus in buses {
            out.push(bus.enabled as u8);
            out.extend_from_slice(&bus.bitrate.to_le_bytes());
        }
        out.extend_from_slice(&max_file_bytes.to_le_bytes());
        out
    }

    #[test]
    fn v1_round_trip_and_migration_fills_defaults() {
        let buses: [BusConfigV1; MAX_BUSES] =
            std::array::from_fn(|i| BusConfigV1 { enabled: i == 0, bitrate: 250_000 });
        let bytes = encode_v1(&buses, 1_000_000);
        assert_eq!(bytes.len(), V1_LEN);

        let decoded = ConfigV1::decode(&bytes).expect("should decode as v1");
        let current = decoded.into_current();
        assert!(current.buses[0].enabled);
        assert_eq!(current.buses[0].bitrate, 250_000);
        assert_eq!(current.global.max_file_bytes, 1_000_000);
        // fields absent from v1 fall back to defaults
        assert_eq!(current.global.low_space_bytes, Config::defaults().global.low_space_bytes);
    }

    #[test]
    fn wrong_length_does_not_decode_as_v1() {
        let bytes = vec![0u8; V1_LEN - 1];
        assert!(ConfigV1::decode(&bytes).is_none());
    }

    #[test]
    fn mismatched_magic_rejected() {
        let buses: [BusConfigV1; MAX_BUSES] = std::array::from_fn(|_| BusConfigV1 {
            enabled: false,
            bitrate: 0,
        });
        let mut bytes = encode_v1(&buses, 0);
        bytes[0] ^= 0xFF;
        assert!(ConfigV1::decode(&bytes).is_none());
    }
}
