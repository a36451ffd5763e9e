//! Mining configuration.

use serde::Deserialize;
use std::time::Duration;
use tendermill_types::Address;

/// Configuration parameters of mining.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct MinerConfig {
    /// Payout address for locally produced blocks.
    #[serde(deserialize_with = "de_address")]
    pub etherbase: Address,

    /// Opaque bytes placed in the header, at most 32.
    #[serde(deserialize_with = "de_hex_bytes")]
    pub extra_data: Vec<u8>,

    /// Target gas floor for produced blocks.
    pub gas_floor: u64,

    /// Target gas ceiling for produced blocks.
    pub gas_ceil: u64,

    /// Minimum gas price when selecting transactions.
    pub gas_price: u64,

    /// Minimum interval between pending-block reassemblies.
    #[serde(deserialize_with = "de_millis")]
    pub recommit: Duration,

    /// Endpoints notified of new work packages (proof-of-work engines only).
    pub notify: Vec<String>,

    /// Notify with pending block headers instead of work packages.
    pub notify_full: bool,

    /// Disable remote sealing-solution verification (proof-of-work only).
    pub noverify: bool,
}

impl Default for MinerConfig {
    fn default() -> Self {
        Self {
            etherbase: Address::ZERO,
            extra_data: Vec::new(),
            gas_floor: 8_000_000,
            gas_ceil: 30_000_000,
            gas_price: 1,
            recommit: Duration::from_secs(3),
            notify: Vec::new(),
            notify_full: false,
            noverify: false,
        }
    }
}

fn strip_0x(s: &str) -> &str {
    s.strip_prefix("0x").unwrap_or(s)
}

fn de_address<'de, D>(deserializer: D) -> Result<Address, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    let bytes = hex::decode(strip_0x(&s)).map_err(serde::de::Error::custom)?;
    if bytes.len() != 20 {
        return Err(serde::de::Error::custom(format!(
            "address must be 20 bytes, got {}",
            bytes.len()
        )));
    }
    let mut arr = [0u8; 20];
    arr.copy_from_slice(&bytes);
    Ok(Address(arr))
}

fn de_hex_bytes<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    hex::decode(strip_0x(&s)).map_err(serde::de::Error::custom)
}

fn de_millis<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let ms = u64::deserialize(deserializer)?;
    Ok(Duration::from_millis(ms))
}
