//! Multi-Slot UDS/ISO-TP Diagnostic Engine (C6): one-shot "pending"
//! diagnostics and periodic polling with back-off on failure, serialized
//! behind a single mutex to match the shared-relay hardware constraint
//! (design §4.6, §5).

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::dispatch::get_phy_addr;
use crate::diag::did::{decode_value, did_key, encode_value, DidOperation, DidSpec, DidValue, DidWriteValue};
use crate::diag::transport::{service, DiagStack, DiagStackFactory, EXTENDED_SESSION, SECURITY_LEVEL};
use crate::error::{SlotError, UdsError};
use crate::security::SecurityAlgorithm;
use crate::slot::{normalize_slots, SlotId, SlotTable};

/// Either representation accepted by `configure_periodic` (design §4.6,
/// §9 open question): a flat list (each DID's configured `Operation`
/// decides read vs write) or a mapping forcing write-mode with per-slot
/// rotation through the value list.
#[derive(Debug, Clone)]
pub enum PeriodicDids {
    List(Vec<u16>),
    Map(BTreeMap<u16, Vec<DidWriteValue>>),
}

/// Result of [`MultiSlotDiagEngine::run_pending_once`].
#[derive(Debug, Clone, Default)]
pub struct PendingRunResult {
    pub ok: Vec<u16>,
    pub fail: BTreeMap<u16, String>,
    pub pending: Vec<u16>,
}

/// Snapshot returned by [`MultiSlotDiagEngine::periodic_snapshot`].
#[derive(Debug, Clone, Default)]
pub struct PeriodicSnapshot {
    pub slots: Vec<u16>,
    pub data: BTreeMap<u16, BTreeMap<String, DidValue>>,
    pub error: BTreeMap<u16, String>,
}

struct EngineState {
    pending_slots: Vec<SlotId>,
    results: SlotTable<BTreeMap<String, DidValue>>,

    periodic_slots: Vec<SlotId>,
    periodic_interval: Duration,
    rediag_interval: Duration,
    periodic_read_dids: Vec<u16>,
    periodic_write_plan: BTreeMap<u16, Vec<DidWriteValue>>,
    periodic_write_idx: HashMap<(u16, u16), usize>,
    periodic_next_due: HashMap<u16, Instant>,
    periodic_last: SlotTable<BTreeMap<String, DidValue>>,
    periodic_last_error: SlotTable<String>,

    stacks: SlotTable<Box<dyn DiagStack>>,
}

/// The engine itself. Construct once per group via [`MultiSlotDiagEngine::build`],
/// which pre-creates every slot's [`DiagStack`] (design invariant 5); a
/// stack-creation error fails the whole engine start (design §4.6,
/// category-4 configuration error).
pub struct MultiSlotDiagEngine {
    max_slots: u16,
    channel_remap: bool,
    dids: HashMap<u16, DidSpec>,
    /// DID ids in configuration order, since `dids`'s `HashMap` iteration
    /// order is not stable and [`Self::pending_dids`] must preserve it
    /// (design §4.6 "perform ... in the order given").
    dids_order: Vec<u16>,
    security_algo: SecurityAlgorithm,
    request_timeout: Duration,
    state: Mutex<EngineState>,
}

impl MultiSlotDiagEngine {
    pub fn build(
        max_slots: u16,
        channel_remap: bool,
        dids: Vec<DidSpec>,
        security_algo: SecurityAlgorithm,
        request_timeout: Duration,
        factory: &dyn DiagStackFactory,
    ) -> Result<Self, UdsError> {
        let mut stacks = SlotTable::new(max_slots);
        for raw in 1..=max_slots {
            let slot = SlotId::new(raw, max_slots).unwrap();
            let addr = get_phy_addr(slot, channel_remap);
            let stack = factory.create(addr.phy_tx, addr.phy_rx)?;
            stacks.set(slot, stack);
        }

        let state = EngineState {
            pending_slots: Vec::new(),
            results: SlotTable::new(max_slots),
            periodic_slots: Vec::new(),
            periodic_interval: Duration::from_secs(10),
            rediag_interval: Duration::from_secs(1),
            periodic_read_dids: Vec::new(),
            periodic_write_plan: BTreeMap::new(),
            periodic_write_idx: HashMap::new(),
            periodic_next_due: HashMap::new(),
            periodic_last: SlotTable::new(max_slots),
            periodic_last_error: SlotTable::new(max_slots),
            stacks,
        };

        let dids_order = dids.iter().map(|d| d.id).collect();
        Ok(Self {
            max_slots,
            channel_remap,
            dids: dids.into_iter().map(|d| (d.id, d)).collect(),
            dids_order,
            security_algo,
            request_timeout,
            state: Mutex::new(state),
        })
    }

    fn spec(&self, did: u16) -> Result<&DidSpec, UdsError> {
        self.dids.get(&did).ok_or(UdsError::UnknownDid(did))
    }

    fn phy(&self, slot: SlotId) -> (u16, u16) {
        let addr = get_phy_addr(slot, self.channel_remap);
        (addr.phy_tx, addr.phy_rx)
    }

    /// Performs reads then writes (in the given order) against one slot's
    /// pre-created stack, re-applying its address immediately before every
    /// transaction. Returns the merged result map for the reads only (the
    /// writes do not produce a value, matching the Python original which
    /// reports `None` for write DIDs in the merged map).
    fn transact(
        &self,
        state: &mut EngineState,
        slot: SlotId,
        reads: &[u16],
        writes: &[(u16, DidWriteValue)],
    ) -> Result<BTreeMap<String, DidValue>, String> {
        let (txid, rxid) = self.phy(slot);
        let stack = state.stacks.get_mut(slot).expect("stack pre-created for every slot");

        let mut merged = BTreeMap::new();
        for &did in reads {
            let spec = self.spec(did).map_err(|e| e.to_string())?;
            stack.set_address(txid, rxid);
            let raw = stack.read_data_by_identifier(did, self.request_timeout).map_err(|e| e.to_string())?;
            merged.insert(did_key(did), decode_value(spec, &raw));
        }

        if !writes.is_empty() {
            stack.set_address(txid, rxid);
            stack
                .diagnostic_session_control(EXTENDED_SESSION, self.request_timeout)
                .map_err(|e| e.to_string())?;

            stack.set_address(txid, rxid);
            let seed = stack
                .security_access_request_seed(SECURITY_LEVEL, self.request_timeout)
                .map_err(|e| e.to_string())?;
            let key = (self.security_algo)(&seed).map_err(|e| e.to_string())?;

            stack.set_address(txid, rxid);
            stack
                .security_access_send_key(SECURITY_LEVEL, &key, self.request_timeout)
                .map_err(|e| e.to_string())?;

            for (did, value) in writes {
                let spec = self.spec(*did).map_err(|e| e.to_string())?;
                let payload = encode_value(spec, value).map_err(|e| e.to_string())?;
                stack.set_address(txid, rxid);
                stack
                    .write_data_by_identifier(*did, &payload, self.request_timeout)
                    .map_err(|e| e.to_string())?;
            }
        }

        Ok(merged)
    }

    // --- pending (one-shot) flow -------------------------------------

    pub fn set_pending_slots(&self, slots: &[u16]) -> Result<(), SlotError> {
        let ids = normalize_slots(slots, self.max_slots)?;
        self.state.lock().unwrap().pending_slots = ids;
        Ok(())
    }

    pub fn add_pending_slots(&self, slots: &[u16]) -> Result<(), SlotError> {
        let mut state = self.state.lock().unwrap();
        let mut combined: Vec<u16> = state.pending_slots.iter().map(|s| s.get()).collect();
        combined.extend_from_slice(slots);
        state.pending_slots = normalize_slots(&combined, self.max_slots)?;
        Ok(())
    }

    fn partition_dids(&self, dids: &[u16]) -> (Vec<u16>, Vec<(u16, DidWriteValue)>) {
        let mut reads = Vec::new();
        let mut writes = Vec::new();
        for &did in dids {
            match self.dids.get(&did) {
                Some(spec) if spec.operation == DidOperation::Write => match &spec.value {
                    Some(value) => writes.push((did, value.clone())),
                    None => tracing::warn!(did = format!("{did:04X}"), "write DID has no configured value, skipped"),
                },
                _ => reads.push(did),
            }
        }
        (reads, writes)
    }

    /// Runs one attempt at every pending slot. On success the slot's merged
    /// result replaces `results[slot]` and it is removed from
    /// `pending_slots`; on failure the slot's error is recorded and it
    /// remains pending (design §4.6, scenario S4).
    pub fn run_pending_once(&self, dids: &[u16]) -> PendingRunResult {
        let (reads, writes) = self.partition_dids(dids);
        let mut state = self.state.lock().unwrap();
        let slots = state.pending_slots.clone();

        let mut result = PendingRunResult::default();
        let mut still_pending = Vec::new();

        for slot in slots {
            match self.transact(&mut state, slot, &reads, &writes) {
                Ok(merged) => {
                    state.results.set(slot, merged);
                    result.ok.push(slot.get());
                }
                Err(err) => {
                    result.fail.insert(slot.get(), err);
                    still_pending.push(slot);
                }
            }
        }

        state.pending_slots = still_pending.clone();
        result.pending = still_pending.into_iter().map(SlotId::get).collect();
        result
    }

    pub fn results(&self, slot: SlotId) -> Option<BTreeMap<String, DidValue>> {
        self.state.lock().unwrap().results.get(slot).cloned()
    }

    pub fn has_pending_slots(&self) -> bool {
        !self.state.lock().unwrap().pending_slots.is_empty()
    }

    /// Every DID this engine was built with, in the order the project
    /// configured them — what the periodic "Diagnostic" job re-runs against
    /// the pending set (design §4.7).
    pub fn pending_dids(&self) -> Vec<u16> {
        self.dids_order.clone()
    }

    // --- periodic flow -------------------------------------------------

    pub fn configure_periodic(&self, interval: Duration, rediag_interval: Duration, dids: PeriodicDids) {
        let mut state = self.state.lock().unwrap();
        state.periodic_interval = interval;
        state.rediag_interval = rediag_interval;
        state.periodic_write_idx.clear();
        match dids {
            PeriodicDids::List(list) => {
                state.periodic_read_dids = list;
                state.periodic_write_plan.clear();
            }
            PeriodicDids::Map(map) => {
                state.periodic_read_dids.clear();
                state.periodic_write_plan = map;
            }
        }
    }

    /// Seeds `next_due = now` for every newly listed slot so it fires
    /// immediately (design §4.6).
    pub fn set_periodic_slots(&self, slots: &[u16]) -> Result<(), SlotError> {
        let ids = normalize_slots(slots, self.max_slots)?;
        let mut state = self.state.lock().unwrap();
        let now = Instant::now();
        for id in &ids {
            state.periodic_next_due.entry(id.get()).or_insert(now);
        }
        state.periodic_slots = ids;
        Ok(())
    }

    fn next_write_value(state: &mut EngineState, slot: u16, did: u16, values: &[DidWriteValue]) -> DidWriteValue {
        let idx_entry = state.periodic_write_idx.entry((slot, did)).or_insert(0);
        let idx = *idx_entry % values.len().max(1);
        *idx_entry = (*idx_entry + 1) % values.len().max(1);
        values[idx].clone()
    }

    /// Runs one tick: every periodic slot whose `next_due <= now` performs
    /// its configured reads/writes; success advances `next_due` by
    /// `interval` and clears the slot's error, failure advances it by the
    /// shorter `rediag_interval` and records the error (design §4.6,
    /// scenario S5).
    pub fn periodic_tick(&self) {
        let mut state = self.state.lock().unwrap();
        let now = Instant::now();
        let slots = state.periodic_slots.clone();
        let interval = state.periodic_interval;
        let rediag = state.rediag_interval;
        let read_dids = state.periodic_read_dids.clone();
        let write_plan = state.periodic_write_plan.clone();

        for slot in slots {
            let due = *state.periodic_next_due.get(&slot.get()).unwrap_or(&now);
            if due > now {
                continue;
            }

            let mut reads = Vec::new();
            let mut writes = Vec::new();
            for &did in &read_dids {
                match self.dids.get(&did) {
                    Some(spec) if spec.operation == DidOperation::Write => match &spec.value {
                        Some(value) => writes.push((did, value.clone())),
                        None => tracing::warn!(did = format!("{did:04X}"), "write DID has no configured value, skipped"),
                    },
                    _ => reads.push(did),
                }
            }
            for (did, values) in &write_plan {
                let value = Self::next_write_value(&mut state, slot.get(), *did, values);
                writes.push((*did, value));
            }

            match self.transact(&mut state, slot, &reads, &writes) {
                Ok(merged) => {
                    state.periodic_last.set(slot, merged);
                    state.periodic_last_error.clear(slot);
                    state.periodic_next_due.insert(slot.get(), now + interval);
                }
                Err(err) => {
                    state.periodic_last_error.set(slot, err);
                    state.periodic_next_due.insert(slot.get(), now + rediag);
                }
            }
        }
    }

    pub fn periodic_snapshot(&self) -> PeriodicSnapshot {
        let state = self.state.lock().unwrap();
        let mut snapshot = PeriodicSnapshot { slots: state.periodic_slots.iter().map(|s| s.get()).collect(), ..Default::default() };
        for (slot, data) in state.periodic_last.iter() {
            snapshot.data.insert(slot.get(), data.clone());
        }
        for (slot, err) in state.periodic_last_error.iter() {
            snapshot.error.insert(slot.get(), err.clone());
        }
        snapshot
    }

    /// Best-effort shutdown: drops every slot's stack. Transactions already
    /// holding the mutex complete first since this also locks `state`.
    pub fn shutdown(&self) {
        let mut state = self.state.lock().unwrap();
        state.stacks = SlotTable::new(self.max_slots);
    }
}
