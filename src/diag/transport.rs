//! Per-slot ISO-TP + UDS client abstraction.
//!
//! One [`DiagStack`] is created per slot for the process lifetime of a
//! group run (design invariant 5) by a [`DiagStackFactory`]. The engine
//! re-applies the slot's `(txid, rxid)` address immediately before every
//! transaction — a correctness-critical step even though the stack was
//! created with the same pair, since a single physical relay forwards all
//! slot traffic through shared wiring (design §4.6).

use std::time::Duration;

use crate::error::UdsError;

/// UDS service identifiers the engine issues (ISO 14229).
pub mod service {
    pub const DIAGNOSTIC_SESSION_CONTROL: u8 = 0x10;
    pub const SECURITY_ACCESS: u8 = 0x27;
    pub const READ_DATA_BY_IDENTIFIER: u8 = 0x22;
    pub const WRITE_DATA_BY_IDENTIFIER: u8 = 0x2E;
}

/// Extended diagnostic session, used before `SecurityAccess`/writes.
pub const EXTENDED_SESSION: u8 = 0x03;
/// Security access level used by the write flow (design §4.6).
pub const SECURITY_LEVEL: u8 = 1;

/// One slot's dedicated ISO-TP + UDS client.
pub trait DiagStack: Send {
    /// Re-points the stack at `(txid, rxid)`. Must be called before every
    /// transaction (design §4.6 "address update before every request").
    fn set_address(&mut self, txid: u16, rxid: u16);

    fn diagnostic_session_control(&mut self, session: u8, timeout: Duration) -> Result<(), UdsError>;
    fn security_access_request_seed(&mut self, level: u8, timeout: Duration) -> Result<Vec<u8>, UdsError>;
    fn security_access_send_key(&mut self, level: u8, key: &[u8], timeout: Duration) -> Result<(), UdsError>;
    fn read_data_by_identifier(&mut self, did: u16, timeout: Duration) -> Result<Vec<u8>, UdsError>;
    fn write_data_by_identifier(&mut self, did: u16, payload: &[u8], timeout: Duration) -> Result<(), UdsError>;
}

/// Creates one [`DiagStack`] bound to `(phy_tx, phy_rx)`. Implementations
/// back this with a real ISO-TP socket stack in production and an
/// in-memory mock in tests.
pub trait DiagStackFactory: Send + Sync {
    fn create(&self, phy_tx: u16, phy_rx: u16) -> Result<Box<dyn DiagStack>, UdsError>;
}

/// A scriptable mock transport for unit/integration tests (scenarios
/// S4/S5). Each `(did, op)` can be given a canned response or a fixed
/// number of failures before succeeding.
pub mod mock {
    use super::*;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    pub struct MockScript {
        /// DID -> queue of responses (Ok bytes or Err), consumed in order;
        /// the last entry repeats once exhausted.
        pub read_responses: HashMap<u16, Vec<Result<Vec<u8>, UdsError>>>,
        pub write_responses: HashMap<u16, Vec<Result<(), UdsError>>>,
        pub session_control_ok: bool,
        pub security_seed: Vec<u8>,
        pub security_access_ok: bool,
    }

    impl MockScript {
        pub fn new() -> Self {
            Self { session_control_ok: true, security_access_ok: true, ..Default::default() }
        }
    }

    pub struct MockStack {
        script: Arc<Mutex<MockScript>>,
        txid: u16,
        rxid: u16,
        pub calls: Arc<Mutex<Vec<String>>>,
    }

    impl DiagStack for MockStack {
        fn set_address(&mut self, txid: u16, rxid: u16) {
            self.txid = txid;
            self.rxid = rxid;
            self.calls.lock().unwrap().push(format!("set_address({txid:#x},{rxid:#x})"));
        }

        fn diagnostic_session_control(&mut self, session: u8, _timeout: Duration) -> Result<(), UdsError> {
            self.calls.lock().unwrap().push(format!("session_control({session:#x})"));
            if self.script.lock().unwrap().session_control_ok {
                Ok(())
            } else {
                Err(UdsError::NegativeResponse { service: service::DIAGNOSTIC_SESSION_CONTROL, nrc: 0x22 })
            }
        }

        fn security_access_request_seed(&mut self, level: u8, _timeout: Duration) -> Result<Vec<u8>, UdsError> {
            self.calls.lock().unwrap().push(format!("request_seed({level})"));
            Ok(self.script.lock().unwrap().security_seed.clone())
        }

        fn security_access_send_key(&mut self, level: u8, _key: &[u8], _timeout: Duration) -> Result<(), UdsError> {
            self.calls.lock().unwrap().push(format!("send_key({level})"));
            if self.script.lock().unwrap().security_access_ok {
                Ok(())
            } else {
                Err(UdsError::SecurityAccessDenied("mock denied".into()))
            }
        }

        fn read_data_by_identifier(&mut self, did: u16, _timeout: Duration) -> Result<Vec<u8>, UdsError> {
            self.calls.lock().unwrap().push(format!("read({did:#06x})"));
            let mut script = self.script.lock().unwrap();
            next_scripted(&mut script.read_responses, did)
        }

        fn write_data_by_identifier(&mut self, did: u16, _payload: &[u8], _timeout: Duration) -> Result<(), UdsError> {
            self.calls.lock().unwrap().push(format!("write({did:#06x})"));
            let mut script = self.script.lock().unwrap();
            next_scripted(&mut script.write_responses, did)
        }
    }

    fn next_scripted<T: Clone>(map: &mut HashMap<u16, Vec<Result<T, UdsError>>>, key: u16) -> Result<T, UdsError> {
        match map.get_mut(&key) {
            Some(queue) if queue.len() > 1 => queue.remove(0),
            Some(queue) => queue[0].clone(),
            None => Err(UdsError::UnknownDid(key)),
        }
    }

    pub struct MockStackFactory {
        pub script: Arc<Mutex<MockScript>>,
    }

    impl MockStackFactory {
        pub fn new(script: MockScript) -> Self {
            Self { script: Arc::new(Mutex::new(script)) }
        }
    }

    impl DiagStackFactory for MockStackFactory {
        fn create(&self, phy_tx: u16, phy_rx: u16) -> Result<Box<dyn DiagStack>, UdsError> {
            Ok(Box::new(MockStack {
                script: Arc::clone(&self.script),
                txid: phy_tx,
                rxid: phy_rx,
                calls: Arc::new(Mutex::new(Vec::new())),
            }))
        }
    }
}
