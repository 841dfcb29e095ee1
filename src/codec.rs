//! Frame Codec (C2): a read-only signal-database abstraction.
//!
//! Resolves messages by name or numeric frame ID and encodes/decodes CAN
//! payloads against a signal layout (name, bit position, scale, offset,
//! min/max). The real `.dbc` file parser is an external collaborator (see
//! design §6); this module only defines the contract and ships an
//! in-memory implementation built from a `Vec<MessageDef>`.

use std::collections::BTreeMap;

use crate::error::CodecError;

/// A decoded signal value. Raw signals in a DBC are always numeric; we keep
/// them as `f64` post scale/offset, matching the Python reference's use of
/// floats throughout `RxParser.py`/`Sending.py`.
pub type SignalMap = BTreeMap<String, f64>;

/// Layout of a single signal within a message's payload.
#[derive(Debug, Clone)]
pub struct SignalDef {
    pub name: String,
    /// Bit offset of the signal's least significant bit within the payload.
    pub start_bit: u32,
    pub length: u32,
    pub scale: f64,
    pub offset: f64,
    pub min: f64,
    pub max: f64,
    pub big_endian: bool,
}

impl SignalDef {
    fn raw_from_physical(&self, physical: f64) -> i64 {
        (((physical - self.offset) / self.scale).round()) as i64
    }

    fn physical_from_raw(&self, raw: i64) -> f64 {
        raw as f64 * self.scale + self.offset
    }
}

/// Definition of one CAN message: its frame ID and signal layout.
#[derive(Debug, Clone)]
pub struct MessageDef {
    pub name: String,
    pub id: u32,
    pub extended: bool,
    pub dlc: usize,
    pub signals: Vec<SignalDef>,
}

/// A read-only signal database shared, immutably, across groups.
///
/// Implementations are expected to be cheap to clone (e.g. an `Arc` around
/// the underlying table) since the same database instance backs every
/// group's [`crate::bus::BusManager`].
pub trait SignalDatabase: Send + Sync {
    fn message_by_id(&self, id: u32) -> Option<&MessageDef>;
    fn message_by_name(&self, name: &str) -> Option<&MessageDef>;

    /// Encodes `signals` against the named message. Missing signals default
    /// to zero; unknown signal names are rejected.
    fn encode(&self, name_or_id: MessageRef<'_>, signals: &SignalMap) -> Result<Vec<u8>, CodecError> {
        let msg = self.resolve(name_or_id)?;
        let mut bytes = vec![0u8; msg.dlc];
        for sig in &msg.signals {
            let physical = signals.get(&sig.name).copied().unwrap_or(0.0);
            write_signal(&mut bytes, sig, physical);
        }
        for key in signals.keys() {
            if !msg.signals.iter().any(|s| &s.name == key) {
                return Err(CodecError::UnknownSignal {
                    message: msg.name.clone(),
                    signal: key.clone(),
                });
            }
        }
        Ok(bytes)
    }

    /// Decodes `data` against the message. Extra/missing signals never
    /// error: a signal whose bits lie outside `data` is simply omitted.
    fn decode(&self, name_or_id: MessageRef<'_>, data: &[u8]) -> Result<SignalMap, CodecError> {
        let msg = self.resolve(name_or_id)?;
        let mut out = SignalMap::new();
        for sig in &msg.signals {
            if let Some(physical) = read_signal(data, sig) {
                out.insert(sig.name.clone(), physical);
            }
        }
        Ok(out)
    }

    fn resolve(&self, name_or_id: MessageRef<'_>) -> Result<&MessageDef, CodecError> {
        match name_or_id {
            MessageRef::Id(id) => self
                .message_by_id(id)
                .ok_or(CodecError::UnknownMessage(id)),
            MessageRef::Name(name) => self
                .message_by_name(name)
                .ok_or_else(|| CodecError::UnknownMessageName(name.to_string())),
        }
    }
}

/// Either a symbolic message name or a numeric frame ID, as the design's
/// `encode_and_send(name_or_id, ...)` accepts both.
#[derive(Debug, Clone, Copy)]
pub enum MessageRef<'a> {
    Id(u32),
    Name(&'a str),
}

impl<'a> From<u32> for MessageRef<'a> {
    fn from(id: u32) -> Self {
        MessageRef::Id(id)
    }
}

impl<'a> From<&'a str> for MessageRef<'a> {
    fn from(name: &'a str) -> Self {
        MessageRef::Name(name)
    }
}

fn write_signal(bytes: &mut [u8], sig: &SignalDef, physical: f64) {
    let raw = sig.raw_from_physical(physical.clamp(sig.min, sig.max));
    let mask: u64 = if sig.length >= 64 { u64::MAX } else { (1u64 << sig.length) - 1 };
    let raw = (raw as u64) & mask;
    for bit in 0..sig.length {
        let value_bit = (raw >> bit) & 1;
        let abs_bit = if sig.big_endian {
            sig.start_bit.saturating_sub(bit)
        } else {
            sig.start_bit + bit
        };
        let byte_idx = (abs_bit / 8) as usize;
        let bit_idx = (abs_bit % 8) as usize;
        if byte_idx < bytes.len() && value_bit == 1 {
            bytes[byte_idx] |= 1 << bit_idx;
        }
    }
}

fn read_signal(data: &[u8], sig: &SignalDef) -> Option<f64> {
    let mut raw: u64 = 0;
    for bit in 0..sig.length {
        let abs_bit = if sig.big_endian {
            sig.start_bit.saturating_sub(bit)
        } else {
            sig.start_bit + bit
        };
        let byte_idx = (abs_bit / 8) as usize;
        let bit_idx = (abs_bit % 8) as usize;
        let byte = *data.get(byte_idx)?;
        let value_bit = ((byte >> bit_idx) & 1) as u64;
        raw |= value_bit << bit;
    }
    Some(sig.physical_from_raw(raw as i64))
}

/// In-memory [`SignalDatabase`] built from a flat list of message
/// definitions; the concrete stand-in the core ships in place of a real
/// `.dbc` parser.
#[derive(Debug, Clone, Default)]
pub struct StaticSignalDatabase {
    by_id: BTreeMap<u32, usize>,
    by_name: BTreeMap<String, usize>,
    messages: Vec<MessageDef>,
}

impl StaticSignalDatabase {
    pub fn new(messages: Vec<MessageDef>) -> Self {
        let mut by_id = BTreeMap::new();
        let mut by_name = BTreeMap::new();
        for (i, m) in messages.iter().enumerate() {
            by_id.insert(m.id, i);
            by_name.insert(m.name.clone(), i);
        }
        Self { by_id, by_name, messages }
    }
}

impl SignalDatabase for StaticSignalDatabase {
    fn message_by_id(&self, id: u32) -> Option<&MessageDef> {
        self.by_id.get(&id).map(|&i| &self.messages[i])
    }

    fn message_by_name(&self, name: &str) -> Option<&MessageDef> {
        self.by_name.get(name).map(|&i| &self.messages[i])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn db() -> StaticSignalDatabase {
        StaticSignalDatabase::new(vec![MessageDef {
            name: "TxMsg1".into(),
            id: 0x200,
            extended: false,
            dlc: 8,
            signals: vec![
                SignalDef {
                    name: "Enable".into(),
                    start_bit: 0,
                    length: 8,
                    scale: 1.0,
                    offset: 0.0,
                    min: 0.0,
                    max: 255.0,
                    big_endian: false,
                },
                SignalDef {
                    name: "Setpoint".into(),
                    start_bit: 8,
                    length: 16,
                    scale: 0.1,
                    offset: 0.0,
                    min: 0.0,
                    max: 6553.5,
                    big_endian: false,
                },
            ],
        }])
    }

    #[test]
    fn round_trip_contains_encoded_signals() {
        let db = db();
        let mut signals = SignalMap::new();
        signals.insert("Enable".to_string(), 1.0);
        signals.insert("Setpoint".to_string(), 12.4);
        let bytes = db.encode(MessageRef::Name("TxMsg1"), &signals).unwrap();
        let decoded = db.decode(MessageRef::Id(0x200), &bytes).unwrap();
        assert_eq!(decoded.get("Enable"), Some(&1.0));
        assert!((decoded.get("Setpoint").unwrap() - 12.4).abs() < 1e-9);
    }

    #[test]
    fn missing_signals_default_to_zero() {
        let db = db();
        let signals = SignalMap::new();
        let bytes = db.encode(MessageRef::Name("TxMsg1"), &signals).unwrap();
        assert_eq!(bytes, vec![0u8; 8]);
    }

    #[test]
    fn unknown_signal_name_is_rejected() {
        let db = db();
        let mut signals = SignalMap::new();
        signals.insert("Bogus".to_string(), 1.0);
        assert!(db.encode(MessageRef::Name("TxMsg1"), &signals).is_err());
    }

    #[test]
    fn unknown_message_errors() {
        let db = db();
        assert!(matches!(
            db.decode(MessageRef::Id(0xDEAD), &[0u8; 8]),
            Err(CodecError::UnknownMessage(0xDEAD))
        ));
    }
}
