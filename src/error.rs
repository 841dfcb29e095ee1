//! Error taxonomy.
//!
//! Matches the five categories of the design: transport, protocol, codec,
//! configuration and invariant-violation errors. Categories 1-3 never
//! unwind past the engine; they land in per-slot state. Category 4 aborts
//! group start. Category 5 is a programming error, surfaced as an `Err`
//! rather than a panic at every public API boundary that takes a slot index.

use thiserror::Error;

/// Transport-level failure: CAN send/receive, or an ISO-TP timeout.
/// Always per-slot or per-frame; never fatal.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("CAN driver rejected the frame: {0}")]
    Io(String),
    #[error("bus interface is not open")]
    NotOpen,
    #[error("periodic task not found for id {0:#x}")]
    PeriodicTaskNotFound(u32),
    #[error("ISO-TP request to 0x{txid:03x}/0x{rxid:03x} timed out after {timeout_ms}ms")]
    IsoTpTimeout { txid: u32, rxid: u32, timeout_ms: u64 },
    #[error("ISO-TP transport error: {0}")]
    IsoTp(String),
}

/// UDS protocol-level failure: negative response or malformed response shape.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum UdsError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("ECU returned negative response, NRC=0x{nrc:02x} for service 0x{service:02x}")]
    NegativeResponse { service: u8, nrc: u8 },
    #[error("unexpected response shape for service 0x{service:02x}")]
    UnexpectedResponseShape { service: u8 },
    #[error("security access denied: {0}")]
    SecurityAccessDenied(String),
    #[error("DID 0x{0:04x} is not configured")]
    UnknownDid(u16),
    #[error("DID 0x{did:04x} value does not fit the configured length {expected}, got {actual}")]
    DidLengthMismatch { did: u16, expected: usize, actual: usize },
}

/// Codec-level failure: DBC decode error on an inbound frame, or a DID
/// payload shape mismatch. Always logged and swallowed; the previous value
/// is retained.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("no message definition for id {0:#x}")]
    UnknownMessage(u32),
    #[error("no message definition named {0:?}")]
    UnknownMessageName(String),
    #[error("unknown signal {signal:?} for message {message:?}")]
    UnknownSignal { message: String, signal: String },
    #[error("payload too short: need {need} bytes, got {got}")]
    PayloadTooShort { need: usize, got: usize },
    #[error("signal {0:?} value is not valid UTF-8")]
    InvalidUtf8(String),
}

/// Configuration error: a mandatory field was missing or invalid at
/// construction time. Fatal at startup; prevents a group from entering
/// `running`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing mandatory field {0}")]
    MissingField(&'static str),
    #[error("field {field} has invalid value: {reason}")]
    InvalidValue { field: &'static str, reason: String },
    #[error("project {0:?} is not defined")]
    UnknownProject(String),
    #[error("failed to parse configuration: {0}")]
    Parse(String),
    #[error("failed to read configuration file {path:?}: {source}")]
    Io { path: String, source: String },
}

/// A slot index was outside `[1, N]` for the group, or some other
/// caller-supplied invariant was violated. Returned rather than panicking,
/// per the design's boundary-behaviour requirements.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum SlotError {
    #[error("slot {slot} is out of range [1, {max}]")]
    OutOfRange { slot: u16, max: u16 },
    #[error("slot index 0 is reserved")]
    ReservedIndex,
}

/// Power-supply driver failure.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PowerSupplyError {
    #[error("power supply command failed: {0}")]
    CommandFailed(String),
}

/// Security-access (seed/key) callback failure.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SecurityAccessError {
    #[error("seed/key algorithm failed: {0}")]
    AlgorithmFailed(String),
}

/// Umbrella error returned by [`crate::core::Core`] construction and
/// lifecycle operations.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Slot(#[from] SlotError),
    #[error("group is not in the expected state: {0}")]
    InvalidState(String),
}
