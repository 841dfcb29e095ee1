//! Data-identifier (DID) table and value codec.
//!
//! Mirrors the project config's `DidConfig` shape (`size`, `type`,
//! `Operation`, `Padding`) from the design's §6 external interfaces.

use crate::error::UdsError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DidKind {
    Bytes,
    String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DidOperation {
    Read,
    Write,
}

/// Static configuration of one DID: fixed byte length, type tag,
/// default-direction operation, the pad byte used when the encoded write
/// payload is shorter than `size`, and — for `Operation::Write` DIDs — the
/// configured value written on an unattended pending/periodic pass. A
/// write DID with no configured value is skipped (with a warning) rather
/// than written as zeros.
#[derive(Debug, Clone)]
pub struct DidSpec {
    pub id: u16,
    pub size: usize,
    pub kind: DidKind,
    pub operation: DidOperation,
    pub padding: u8,
    pub value: Option<DidWriteValue>,
}

/// A decoded DID value, produced by a read.
#[derive(Debug, Clone, PartialEq)]
pub enum DidValue {
    /// `bytes` DIDs decode to a lowercase hex string (design §4.6).
    Hex(String),
    /// `string` DIDs decode to UTF-8 with whitespace stripped.
    Str(String),
    /// Anything else passes through as raw bytes.
    Raw(Vec<u8>),
}

/// Input to a DID write: bytes (hex string, byte sequence, or integer) or
/// a UTF-8 string, per the design's write-payload-encoding rules.
#[derive(Debug, Clone)]
pub enum DidWriteValue {
    Bytes(Vec<u8>),
    HexString(String),
    Integer(u64),
    Str(String),
}

/// Formats a DID as the 4-hex-digit uppercase key used in result maps
/// (`"F190"`), matching scenario S4.
pub fn did_key(id: u16) -> String {
    format!("{:04X}", id)
}

/// Decodes a raw response payload for `spec` per the design's read
/// semantics: `string` -> UTF-8 with whitespace stripped, `bytes` -> hex
/// string, else pass-through.
pub fn decode_value(spec: &DidSpec, raw: &[u8]) -> DidValue {
    match spec.kind {
        DidKind::String => match std::str::from_utf8(raw) {
            Ok(s) => DidValue::Str(s.trim().to_string()),
            Err(_) => DidValue::Raw(raw.to_vec()),
        },
        DidKind::Bytes => DidValue::Hex(hex_encode(raw)),
    }
}

/// Encodes `value` for a write to `spec`, right-padding or truncating to
/// `spec.size` with `spec.padding`.
pub fn encode_value(spec: &DidSpec, value: &DidWriteValue) -> Result<Vec<u8>, UdsError> {
    let mut raw = match (spec.kind, value) {
        (DidKind::Bytes, DidWriteValue::Bytes(b)) => b.clone(),
        (DidKind::Bytes, DidWriteValue::HexString(s)) => {
            hex_decode(s).ok_or_else(|| UdsError::DidLengthMismatch { did: spec.id, expected: spec.size, actual: 0 })?
        }
        (DidKind::Bytes, DidWriteValue::Integer(n)) => {
            let bytes = n.to_be_bytes();
            let start = bytes.len().saturating_sub(spec.size.max(1));
            bytes[start..].to_vec()
        }
        (DidKind::Bytes, DidWriteValue::Str(s)) => s.as_bytes().to_vec(),
        (DidKind::String, DidWriteValue::Str(s)) => s.as_bytes().to_vec(),
        (DidKind::String, DidWriteValue::Bytes(b)) => b.clone(),
        (DidKind::String, DidWriteValue::HexString(s)) => s.as_bytes().to_vec(),
        (DidKind::String, DidWriteValue::Integer(n)) => n.to_string().into_bytes(),
    };
    raw.resize(spec.size, spec.padding);
    raw.truncate(spec.size);
    Ok(raw)
}

fn hex_encode(data: &[u8]) -> String {
    data.iter().map(|b| format!("{:02x}", b)).collect()
}

fn hex_decode(s: &str) -> Option<Vec<u8>> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    if s.len() % 2 != 0 {
        return None;
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_roundtrip() {
        assert_eq!(hex_decode(&hex_encode(&[0x12, 0x34])).unwrap(), vec![0x12, 0x34]);
    }

    #[test]
    fn s4_bytes_did_decodes_to_hex() {
        let spec = DidSpec { id: 0xF190, size: 2, kind: DidKind::Bytes, operation: DidOperation::Read, padding: 0, value: None };
        let value = decode_value(&spec, &[0x12, 0x34]);
        assert_eq!(value, DidValue::Hex("1234".to_string()));
    }

    #[test]
    fn string_value_strips_whitespace() {
        let spec = DidSpec { id: 0xF18C, size: 8, kind: DidKind::String, operation: DidOperation::Read, padding: 0x20, value: None };
        let value = decode_value(&spec, b"ABC12   ");
        assert_eq!(value, DidValue::Str("ABC12".to_string()));
    }

    #[test]
    fn write_value_pads_and_truncates() {
        let spec = DidSpec { id: 0x0001, size: 4, kind: DidKind::Bytes, operation: DidOperation::Write, padding: 0xAA, value: None };
        let encoded = encode_value(&spec, &DidWriteValue::Bytes(vec![1, 2])).unwrap();
        assert_eq!(encoded, vec![1, 2, 0xAA, 0xAA]);
        let truncated = encode_value(&spec, &DidWriteValue::Bytes(vec![1, 2, 3, 4, 5])).unwrap();
        assert_eq!(truncated, vec![1, 2, 3, 4]);
    }

    #[test]
    fn write_string_value_is_utf8_encoded_then_padded() {
        let spec = DidSpec { id: 0x0002, size: 6, kind: DidKind::String, operation: DidOperation::Write, padding: b' ', value: None };
        let encoded = encode_value(&spec, &DidWriteValue::Str("AB".into())).unwrap();
        assert_eq!(encoded, b"AB    ");
    }
}
