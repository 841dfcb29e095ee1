//! Configuration (design §6): two structured documents, deserialized from
//! TOML, loaded before C1–C7 are constructed. Validation of cross-field
//! invariants happens once here rather than scattered through the
//! component constructors.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;

use crate::classifier::ClassifierRanges;
use crate::diag::did::{DidKind, DidOperation, DidSpec, DidWriteValue};
use crate::error::ConfigError;

/// UI detail and CAN interface parameters shared across every group
/// (design §6 "Function config").
#[derive(Debug, Clone, Deserialize)]
pub struct FunctionConfig {
    pub interface: String,
    pub arbitration_bitrate: u32,
    pub data_bitrate: u32,
    pub fd_enabled: bool,
    pub tx_retry_count: u32,
    pub tx_retry_interval_ms: u64,
    pub dark_current: f64,
    pub log_level: String,
    pub log_path: Option<String>,
    pub group_count: u32,
    pub slots_per_group: u16,
    pub slot_refresh_interval_ms: u64,
    pub non_recoverable_status: Vec<i8>,
    pub alarm_delay_secs: u64,
    pub channel_remap: bool,
}

impl FunctionConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Io { path: path.display().to_string(), source: e.to_string() })?;
        toml::from_str(&text).map_err(|e| ConfigError::Parse(e.to_string()))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RangeConfig {
    pub min: f64,
    pub max: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TxMessageConfig {
    pub id: u32,
    pub fd: bool,
    pub interval_ms: u64,
    /// Round-robin payload list for `PeriodicSwitchMsg*` (design §4.7).
    /// Hex strings, e.g. `"0102030405060708"`.
    pub payloads: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DidEntryConfig {
    pub id: String,
    pub size: usize,
    #[serde(rename = "type")]
    pub kind: String,
    pub operation: String,
    #[serde(default)]
    pub padding: u8,
    /// Value written on every unattended pending/periodic pass, for
    /// `operation = "write"` DIDs: hex for `type = "bytes"`, literal text
    /// for `type = "string"`. A write DID with no configured value is
    /// skipped (with a warning) rather than written as zeros.
    #[serde(default)]
    pub value: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DiagnosticConfig {
    pub phy_tx: Option<u16>,
    pub phy_rx: Option<u16>,
    pub request_timeout_ms: u64,
    pub dids: Vec<DidEntryConfig>,
    pub periodic_interval_secs: u64,
    pub periodic_rediag_interval_secs: u64,
}

/// Per-project voltage/current ranges, TX/RX message IDs, and the
/// diagnostic section (design §6 "Project config").
#[derive(Debug, Clone, Deserialize)]
pub struct ProjectConfig {
    pub name: String,
    pub voltage_range: RangeConfig,
    pub current_range: RangeConfig,
    pub aging_hours_default: f64,
    pub dbc_path: String,
    pub dll_path: Option<String>,
    pub id_of_tx_msg1: Option<TxMessageConfig>,
    pub id_of_tx_msg2: Option<TxMessageConfig>,
    pub id_of_rx_msg1: Option<u32>,
    pub id_of_rx_msg2: Option<u32>,
    pub diagnostic: DiagnosticConfig,
}

impl ProjectConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Io { path: path.display().to_string(), source: e.to_string() })?;
        toml::from_str(&text).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn classifier_ranges(&self, dark_current: f64) -> ClassifierRanges {
        ClassifierRanges {
            voltage_min: self.voltage_range.min,
            voltage_max: self.voltage_range.max,
            current_min: self.current_range.min,
            current_max: self.current_range.max,
            dark_current,
        }
    }

    /// Validates and converts the DID table, failing with a category-4
    /// configuration error on the first malformed entry (design §7).
    pub fn did_specs(&self) -> Result<Vec<DidSpec>, ConfigError> {
        self.diagnostic.dids.iter().map(did_spec_from_config).collect()
    }
}

fn did_spec_from_config(entry: &DidEntryConfig) -> Result<DidSpec, ConfigError> {
    let id = u16::from_str_radix(entry.id.trim_start_matches("0x"), 16)
        .map_err(|_| ConfigError::InvalidValue { field: "diagnostic.dids[].id", reason: format!("{:?} is not a hex DID", entry.id) })?;
    let kind = match entry.kind.as_str() {
        "bytes" => DidKind::Bytes,
        "string" => DidKind::String,
        other => return Err(ConfigError::InvalidValue { field: "diagnostic.dids[].type", reason: format!("unknown DID type {other:?}") }),
    };
    let operation = match entry.operation.as_str() {
        "read" => DidOperation::Read,
        "write" => DidOperation::Write,
        other => return Err(ConfigError::InvalidValue { field: "diagnostic.dids[].operation", reason: format!("unknown operation {other:?}") }),
    };
    let value = entry.value.as_ref().map(|v| match kind {
        DidKind::Bytes => DidWriteValue::HexString(v.clone()),
        DidKind::String => DidWriteValue::Str(v.clone()),
    });
    Ok(DidSpec { id, size: entry.size, kind, operation, padding: entry.padding, value })
}

/// Decodes a `payloads` hex-string entry into raw bytes (design §6 TX
/// periodic-switching payload lists).
pub fn decode_payload(hex: &str) -> Result<Vec<u8>, ConfigError> {
    let hex = hex.trim_start_matches("0x");
    if hex.len() % 2 != 0 {
        return Err(ConfigError::InvalidValue { field: "payloads[]", reason: format!("{hex:?} has odd length") });
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&hex[i..i + 2], 16).map_err(|_| ConfigError::InvalidValue { field: "payloads[]", reason: format!("{hex:?} is not valid hex") }))
        .collect()
}

/// The top-level document naming every project this binary can run
/// (`--project` selects one by name, design §6 "CLI / operator surface").
#[derive(Debug, Clone, Deserialize)]
pub struct ProjectsDocument {
    pub project: BTreeMap<String, ProjectConfig>,
}

impl ProjectsDocument {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Io { path: path.display().to_string(), source: e.to_string() })?;
        toml::from_str(&text).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn project(&self, name: &str) -> Result<&ProjectConfig, ConfigError> {
        self.project.get(name).ok_or_else(|| ConfigError::UnknownProject(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn did_spec_parses_hex_id_and_enums() {
        let entry = DidEntryConfig { id: "0xF190".into(), size: 2, kind: "bytes".into(), operation: "read".into(), padding: 0, value: None };
        let spec = did_spec_from_config(&entry).unwrap();
        assert_eq!(spec.id, 0xF190);
        assert_eq!(spec.kind, DidKind::Bytes);
        assert_eq!(spec.operation, DidOperation::Read);
    }

    #[test]
    fn did_spec_rejects_unknown_type() {
        let entry = DidEntryConfig { id: "0x0001".into(), size: 1, kind: "bogus".into(), operation: "read".into(), padding: 0, value: None };
        assert!(did_spec_from_config(&entry).is_err());
    }

    #[test]
    fn decode_payload_parses_hex_bytes() {
        assert_eq!(decode_payload("0102FF").unwrap(), vec![0x01, 0x02, 0xFF]);
    }

    #[test]
    fn decode_payload_rejects_odd_length() {
        assert!(decode_payload("010").is_err());
    }
}
