//! Bus Manager (C1): owns one CAN-FD interface, serializes sends, hosts the
//! single receive dispatch loop, and offers periodic-send task handles.
//!
//! Transport is abstracted behind [`CanTransport`] so the manager can be
//! driven by an in-memory loopback in tests without real hardware; the
//! `socketcan-transport` feature adds a Linux SocketCAN-backed
//! implementation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::codec::{MessageRef, SignalDatabase, SignalMap};
use crate::error::TransportError;

/// A CAN(-FD) frame as seen at the wire boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanFrame {
    pub id: u32,
    pub extended: bool,
    pub fd: bool,
    pub data: Vec<u8>,
    /// Driver timestamp in seconds; semantics (absolute vs relative-to-open)
    /// are the transport's — see [`crate::classifier`] for normalization.
    pub timestamp: f64,
}

impl CanFrame {
    pub fn new(id: u32, data: impl Into<Vec<u8>>) -> Self {
        Self {
            id,
            extended: false,
            fd: false,
            data: data.into(),
            timestamp: 0.0,
        }
    }
}

/// Fixed configuration for opening one CAN-FD interface.
#[derive(Debug, Clone)]
pub struct BusConfig {
    pub interface: String,
    pub arbitration_bitrate: u32,
    pub data_bitrate: u32,
    pub fd_enabled: bool,
    pub receive_own_messages: bool,
}

/// A callback attached to the single inbound dispatch loop. Must not block
/// longer than the inter-frame time (design §5).
pub type Listener = Box<dyn FnMut(&CanFrame) + Send>;

/// Transport-level operations a CAN interface must support. Implementations
/// own the actual driver handle; [`BusManager`] only orchestrates.
pub trait CanTransport: Send {
    fn open(&mut self, config: &BusConfig) -> Result<(), TransportError>;
    fn send(&mut self, frame: &CanFrame) -> Result<(), TransportError>;
    /// Blocks for up to `timeout` waiting for the next inbound frame.
    fn recv_timeout(&mut self, timeout: Duration) -> Result<Option<CanFrame>, TransportError>;
    fn start_periodic(&mut self, frame: CanFrame, period: Duration) -> Result<u64, TransportError>;
    fn modify_periodic(&mut self, task_id: u64, frame: CanFrame) -> Result<(), TransportError>;
    fn stop_periodic(&mut self, task_id: u64) -> Result<(), TransportError>;
    fn close(&mut self) -> Result<(), TransportError>;
}

/// An in-memory loopback transport: every sent frame is immediately queued
/// for `recv_timeout`, matching `receive_own_messages = true` hardware
/// behaviour. Periodic tasks are tracked but never actually spun by a
/// background thread; tests drive them explicitly via [`TestTransport::fire_periodic`].
#[derive(Default)]
pub struct TestTransport {
    open: bool,
    inbound: std::collections::VecDeque<CanFrame>,
    sent: Vec<CanFrame>,
    periodic: HashMap<u64, CanFrame>,
    next_task_id: u64,
}

impl TestTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pushes a frame as if it arrived from the wire.
    pub fn inject(&mut self, frame: CanFrame) {
        self.inbound.push_back(frame);
    }

    pub fn sent_frames(&self) -> &[CanFrame] {
        &self.sent
    }

    pub fn periodic_frame(&self, task_id: u64) -> Option<&CanFrame> {
        self.periodic.get(&task_id)
    }
}

impl CanTransport for TestTransport {
    fn open(&mut self, _config: &BusConfig) -> Result<(), TransportError> {
        self.open = true;
        Ok(())
    }

    fn send(&mut self, frame: &CanFrame) -> Result<(), TransportError> {
        if !self.open {
            return Err(TransportError::NotOpen);
        }
        self.sent.push(frame.clone());
        Ok(())
    }

    fn recv_timeout(&mut self, _timeout: Duration) -> Result<Option<CanFrame>, TransportError> {
        if !self.open {
            return Err(TransportError::NotOpen);
        }
        Ok(self.inbound.pop_front())
    }

    fn start_periodic(&mut self, frame: CanFrame, _period: Duration) -> Result<u64, TransportError> {
        let id = self.next_task_id;
        self.next_task_id += 1;
        self.periodic.insert(id, frame);
        Ok(id)
    }

    fn modify_periodic(&mut self, task_id: u64, frame: CanFrame) -> Result<(), TransportError> {
        if !self.periodic.contains_key(&task_id) {
            return Err(TransportError::PeriodicTaskNotFound(task_id as u32));
        }
        self.periodic.insert(task_id, frame);
        Ok(())
    }

    fn stop_periodic(&mut self, task_id: u64) -> Result<(), TransportError> {
        self.periodic
            .remove(&task_id)
            .map(|_| ())
            .ok_or(TransportError::PeriodicTaskNotFound(task_id as u32))
    }

    fn close(&mut self) -> Result<(), TransportError> {
        self.open = false;
        self.periodic.clear();
        Ok(())
    }
}

/// Handle to a driver-backed cyclic transmitter.
#[derive(Clone)]
pub struct TaskHandle {
    id: u64,
    transport: Arc<Mutex<dyn CanTransport>>,
}

impl TaskHandle {
    /// Atomically swaps the payload carried by this task, under the same
    /// arbitration ID it was created with.
    pub fn modify(&self, data: Vec<u8>, id_override: Option<u32>, fd: bool) -> Result<(), TransportError> {
        let mut t = self.transport.lock().unwrap();
        let mut frame = CanFrame::new(0, data);
        frame.fd = fd;
        if let Some(id) = id_override {
            frame.id = id;
        }
        t.modify_periodic(self.id, frame)
    }

    pub fn stop(&self) -> Result<(), TransportError> {
        self.transport.lock().unwrap().stop_periodic(self.id)
    }
}

/// The two project-configured "logical" TX message IDs eligible for the
/// CH1/CH2 echo-ID remap (design §4.1 "TX remap").
#[derive(Debug, Clone, Copy)]
pub struct TxRemapIds {
    pub id_of_tx_msg1: u32,
    pub id_of_tx_msg2: u32,
}

/// Owns one CAN-FD interface and the signal database used by the
/// convenience `encode_and_send`.
pub struct BusManager {
    transport: Arc<Mutex<dyn CanTransport>>,
    db: Arc<dyn SignalDatabase>,
    listeners: Mutex<Vec<Listener>>,
    remap: Option<TxRemapIds>,
    next_listener_epoch: AtomicU32,
}

impl BusManager {
    pub fn new(
        transport: Arc<Mutex<dyn CanTransport>>,
        config: &BusConfig,
        db: Arc<dyn SignalDatabase>,
        remap: Option<TxRemapIds>,
    ) -> Result<Self, TransportError> {
        transport.lock().unwrap().open(config)?;
        Ok(Self {
            transport,
            db,
            listeners: Mutex::new(Vec::new()),
            remap,
            next_listener_epoch: AtomicU32::new(0),
        })
    }

    pub fn send(&self, frame: &CanFrame) -> Result<(), TransportError> {
        self.transport.lock().unwrap().send(frame)
    }

    /// Composes [`crate::codec`] encoding with [`Self::send`]. Missing
    /// signals default to zero; unknown signal names for the resolved
    /// message are dropped, not an error — C2's own `encode` still rejects
    /// them (design §4.2), but this convenience path strips anything it
    /// doesn't recognize before handing the rest to it (design §4.1).
    pub fn encode_and_send(
        &self,
        name_or_id: MessageRef<'_>,
        signals: &SignalMap,
        id_override: u32,
        fd: bool,
    ) -> Result<(), TransportError> {
        let msg = self.db.resolve(name_or_id).map_err(|e| TransportError::Io(e.to_string()))?;
        let known: SignalMap = signals.iter().filter(|(name, _)| msg.signals.iter().any(|s| &s.name == *name)).map(|(k, v)| (k.clone(), *v)).collect();
        let data = self
            .db
            .encode(name_or_id, &known)
            .map_err(|e| TransportError::Io(e.to_string()))?;
        let mut frame = CanFrame::new(id_override, data);
        frame.fd = fd;
        self.send(&frame)
    }

    pub fn start_periodic(&self, frame: CanFrame, period: Duration) -> Result<TaskHandle, TransportError> {
        let id = self.transport.lock().unwrap().start_periodic(frame, period)?;
        Ok(TaskHandle { id, transport: Arc::clone(&self.transport) })
    }

    /// Runs the inbound dispatch loop once: reads a single frame (if any
    /// arrived within `timeout`) and fans it out to every registered
    /// listener in registration order. The caller (typically a dedicated
    /// thread owned by the group) loops this.
    pub fn poll_once(&self, timeout: Duration) -> Result<bool, TransportError> {
        let frame = self.transport.lock().unwrap().recv_timeout(timeout)?;
        let Some(frame) = frame else { return Ok(false) };
        let mut listeners = self.listeners.lock().unwrap();
        for listener in listeners.iter_mut() {
            listener(&frame);
        }
        Ok(true)
    }

    /// Attaches a listener to the dispatch loop. Multiple listeners fan out
    /// in registration order.
    pub fn register_listener(&self, listener: Listener) {
        self.listeners.lock().unwrap().push(listener);
        self.next_listener_epoch.fetch_add(1, Ordering::Relaxed);
    }

    /// Applies the TX-remap rule (design §4.1) to a pair of periodic task
    /// handles: if `id` matches one of the two configured logical TX IDs,
    /// rewrites to the matching per-channel echo ID (7/8 or 9/10) before
    /// modifying each task; otherwise applies the same payload under the
    /// original ID to both (backwards compatibility).
    pub fn modify_periodic_pair(
        &self,
        tasks: [&TaskHandle; 2],
        id: u32,
        data: Vec<u8>,
        fd: bool,
    ) -> Result<(), TransportError> {
        let [ch1, ch2] = tasks;
        if let Some(remap) = self.remap {
            if id == remap.id_of_tx_msg1 {
                ch1.modify(data.clone(), Some(7), fd)?;
                return ch2.modify(data, Some(9), fd);
            }
            if id == remap.id_of_tx_msg2 {
                ch1.modify(data.clone(), Some(8), fd)?;
                return ch2.modify(data, Some(10), fd);
            }
        }
        ch1.modify(data.clone(), Some(id), fd)?;
        ch2.modify(data, Some(id), fd)
    }

    pub fn shutdown(&self) -> Result<(), TransportError> {
        self.listeners.lock().unwrap().clear();
        self.transport.lock().unwrap().close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{MessageDef, SignalDef, StaticSignalDatabase};

    fn manager_with_remap() -> (BusManager, Arc<Mutex<TestTransport>>) {
        let transport = Arc::new(Mutex::new(TestTransport::new()));
        let db: Arc<dyn SignalDatabase> = Arc::new(StaticSignalDatabase::new(vec![]));
        let cfg = BusConfig {
            interface: "vcan0".into(),
            arbitration_bitrate: 500_000,
            data_bitrate: 2_000_000,
            fd_enabled: true,
            receive_own_messages: true,
        };
        let remap = TxRemapIds { id_of_tx_msg1: 0x200, id_of_tx_msg2: 0x201 };
        let mgr = BusManager::new(transport.clone() as Arc<Mutex<dyn CanTransport>>, &cfg, db, Some(remap)).unwrap();
        (mgr, transport)
    }

    #[test]
    fn tx_remap_rewrites_ids_for_msg1() {
        // S6: IdOfTxMsg1 = 0x200 modifies task1 with ID 7, task2 with ID 9.
        let (mgr, transport) = manager_with_remap();
        let t1 = mgr.start_periodic(CanFrame::new(7, vec![0; 8]), Duration::from_millis(100)).unwrap();
        let t2 = mgr.start_periodic(CanFrame::new(9, vec![0; 8]), Duration::from_millis(100)).unwrap();
        mgr.modify_periodic_pair([&t1, &t2], 0x200, vec![1, 2, 3], false).unwrap();

        let t = transport.lock().unwrap();
        assert_eq!(t.periodic_frame(0).unwrap().id, 7);
        assert_eq!(t.periodic_frame(1).unwrap().id, 9);
        assert_eq!(t.periodic_frame(0).unwrap().data, vec![1, 2, 3]);
        assert_eq!(t.periodic_frame(1).unwrap().data, vec![1, 2, 3]);
    }

    #[test]
    fn unremapped_id_applies_to_both_channels_unchanged() {
        let (mgr, transport) = manager_with_remap();
        let t1 = mgr.start_periodic(CanFrame::new(0x300, vec![0; 8]), Duration::from_millis(100)).unwrap();
        let t2 = mgr.start_periodic(CanFrame::new(0x300, vec![0; 8]), Duration::from_millis(100)).unwrap();
        mgr.modify_periodic_pair([&t1, &t2], 0x300, vec![9], false).unwrap();

        let t = transport.lock().unwrap();
        assert_eq!(t.periodic_frame(0).unwrap().id, 0x300);
        assert_eq!(t.periodic_frame(1).unwrap().id, 0x300);
    }

    #[test]
    fn listeners_fan_out_in_registration_order() {
        let (mgr, transport) = manager_with_remap();
        let order = Arc::new(Mutex::new(Vec::new()));
        let o1 = order.clone();
        mgr.register_listener(Box::new(move |_| o1.lock().unwrap().push(1)));
        let o2 = order.clone();
        mgr.register_listener(Box::new(move |_| o2.lock().unwrap().push(2)));

        transport.lock().unwrap().inject(CanFrame::new(0x11, vec![0; 8]));
        assert!(mgr.poll_once(Duration::from_millis(10)).unwrap());
        assert_eq!(*order.lock().unwrap(), vec![1, 2]);
    }

    #[test]
    fn encode_and_send_drops_unknown_signals_instead_of_erroring() {
        let transport = Arc::new(Mutex::new(TestTransport::new()));
        let db: Arc<dyn SignalDatabase> = Arc::new(StaticSignalDatabase::new(vec![MessageDef {
            name: "TxMsg1".into(),
            id: 0x200,
            extended: false,
            dlc: 8,
            signals: vec![SignalDef { name: "Enable".into(), start_bit: 0, length: 8, scale: 1.0, offset: 0.0, min: 0.0, max: 255.0, big_endian: false }],
        }]));
        let cfg = BusConfig {
            interface: "vcan0".into(),
            arbitration_bitrate: 500_000,
            data_bitrate: 2_000_000,
            fd_enabled: true,
            receive_own_messages: true,
        };
        let mgr = BusManager::new(transport as Arc<Mutex<dyn CanTransport>>, &cfg, db, None).unwrap();

        let mut signals = SignalMap::new();
        signals.insert("Enable".to_string(), 1.0);
        signals.insert("Bogus".to_string(), 42.0);
        let result = mgr.encode_and_send(MessageRef::Name("TxMsg1"), &signals, 0x200, false);
        assert!(result.is_ok(), "an unknown signal name must be dropped, not fail the send");
    }
}
