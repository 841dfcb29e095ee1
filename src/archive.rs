//! Archive (external collaborator): the time-indexed persistence layer the
//! group controller feeds from its 1 Hz poll loop. The core never opens a
//! database; it only calls this trait (design §6).

use std::collections::BTreeMap;

use crate::classifier::SlotRecord;
use crate::codec::SignalMap;
use crate::diag::DidValue;
use crate::slot::SlotId;

/// Opaque handle to one open history table, e.g. one aging run.
pub type TableHandle = u64;

/// Per-slot merge of status, decoded app frames and diagnostic results
/// (design §6 "Records are the per-slot merge of ...").
#[derive(Debug, Clone)]
pub struct SlotRecordMerge {
    pub slot: SlotId,
    pub status: Option<SlotRecord>,
    pub app_rx1: Option<SignalMap>,
    pub app_rx2: Option<SignalMap>,
    pub diag_result: Option<BTreeMap<String, DidValue>>,
    pub diag_periodic: Option<BTreeMap<String, DidValue>>,
}

/// Per-group summary written on group stop (design §4.7 "summary-end").
#[derive(Debug, Clone, Default)]
pub struct GroupSummary {
    pub total: usize,
    pub good: usize,
    pub bad: usize,
    pub pass_rate: f64,
    pub max_temperature: i32,
}

/// Persistence layer the group controller drives. Implementations own the
/// actual storage engine (SQLite in the original system); the core treats
/// it as an opaque sink reachable only through this trait.
pub trait Archive: Send + Sync {
    fn begin_table(&self, project: &str) -> TableHandle;
    fn append(&self, table: TableHandle, record: &SlotRecordMerge);
    fn finalize(&self, table: TableHandle, summary: &GroupSummary);
    fn close(&self);
}

/// No-op archive for configurations that don't need persistence, and for
/// tests that only care about in-memory state.
pub struct NullArchive;

impl Archive for NullArchive {
    fn begin_table(&self, _project: &str) -> TableHandle {
        0
    }
    fn append(&self, _table: TableHandle, _record: &SlotRecordMerge) {}
    fn finalize(&self, _table: TableHandle, _summary: &GroupSummary) {}
    fn close(&self) {}
}
