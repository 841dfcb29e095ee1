//! Multi-Slot Diagnostic Engine (C6): DID table, per-slot ISO-TP/UDS stack
//! abstraction, and the engine that runs pending and periodic diagnostics
//! across every slot of a group.

pub mod did;
pub mod engine;
pub mod transport;

pub use did::{DidKind, DidOperation, DidSpec, DidValue, DidWriteValue};
pub use engine::{MultiSlotDiagEngine, PendingRunResult, PeriodicDids, PeriodicSnapshot};
pub use transport::{DiagStack, DiagStackFactory};
