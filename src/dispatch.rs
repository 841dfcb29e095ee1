//! Receive Dispatcher (C3): classifies every inbound frame by arbitration
//! ID into one of a fixed set of logical per-slot streams and routes it to
//! the right handler.
//!
//! CAN ID layout (design §3): `slave = id / 10`, `offset = id mod 10`.
//! Offsets 1-5 belong to CH1 (status, diag-rx, diag-tx, app-rx1, app-rx2),
//! 6-10 to CH2 (same order). IDs 0-10 are reserved broadcast/control
//! frames and are never routed. An id whose offset is not in `1..=10`
//! is dropped (design invariant 3).

use crate::codec::{MessageRef, SignalDatabase, SignalMap};
use crate::error::SlotError;
use crate::slot::SlotId;

/// Arbitration IDs 0-10 are reserved for broadcast/control frames
/// (output-enable, address configuration, TX echoes); never routed.
pub const MAX_RESERVED_ID: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Ch1,
    Ch2,
}

impl Channel {
    fn swapped(self) -> Self {
        match self {
            Channel::Ch1 => Channel::Ch2,
            Channel::Ch2 => Channel::Ch1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Status,
    DiagRx,
    DiagTx,
    AppRx1,
    AppRx2,
}

/// A fully classified, shell-channel-adjusted stream key for one inbound
/// frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamKey {
    pub channel: Channel,
    pub stream: Stream,
    /// Base station (largest odd integer identifying the slot pair).
    pub base_station: u16,
}

/// Classifies `id` into `(mcu_channel, stream, base_station)`. Returns
/// `None` for reserved control IDs (`0..=10`) or an offset outside
/// `1..=10` (design invariant 3: silently dropped).
///
/// This is the MCU-channel view; callers wanting the shell-channel view
/// (as seen by the operator, possibly swapped) should use [`classify`].
fn classify_mcu(id: u32) -> Option<(Channel, Stream, u16)> {
    if id <= MAX_RESERVED_ID as u32 {
        return None;
    }
    let slave = (id / 10) as u16;
    let offset = id % 10;
    let (channel, sub) = if (1..=5).contains(&offset) {
        (Channel::Ch1, offset)
    } else if (6..=10).contains(&offset) {
        (Channel::Ch2, offset - 5)
    } else {
        return None;
    };
    let stream = match sub {
        1 => Stream::Status,
        2 => Stream::DiagRx,
        3 => Stream::DiagTx,
        4 => Stream::AppRx1,
        5 => Stream::AppRx2,
        _ => return None,
    };
    let base_station = 2 * slave - 1;
    Some((channel, stream, base_station))
}

/// Classifies `id` into a shell-channel-adjusted [`StreamKey`], swapping
/// CH1/CH2 when `channel_remap` is enabled (design §4.3 step 2). Returns
/// `None` for reserved/unrecognized IDs.
pub fn classify(id: u32, channel_remap: bool) -> Option<StreamKey> {
    let (channel, stream, base_station) = classify_mcu(id)?;
    let channel = if channel_remap { channel.swapped() } else { channel };
    Some(StreamKey { channel, stream, base_station })
}

/// Computes the shell-view slot (design §3, `get_slot_id`) for `id`
/// against group size `max`. CH1 maps to the base station itself, CH2 to
/// `base_station + 1`.
pub fn get_slot_id(id: u32, max: u16, channel_remap: bool) -> Result<SlotId, SlotError> {
    let key = classify(id, channel_remap).ok_or(SlotError::OutOfRange { slot: 0, max })?;
    let slot = match key.channel {
        Channel::Ch1 => key.base_station,
        Channel::Ch2 => key.base_station + 1,
    };
    SlotId::new(slot, max)
}

/// Physical ISO-TP addressing for a slot (design §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhyAddr {
    pub phy_addr: u16,
    pub phy_tx: u16,
    pub phy_rx: u16,
}

/// Computes `phy_addr`/`phy_tx`/`phy_rx` for `slot` (a shell-view slot
/// number). `channel_remap` swaps the shell channel back to the MCU
/// channel before the wire-address arithmetic, since MCU-side addressing
/// never changes with the remap flag.
pub fn get_phy_addr(slot: SlotId, channel_remap: bool) -> PhyAddr {
    let slot = slot.get();
    let base_station = if slot % 2 == 1 { slot } else { slot - 1 };
    let shell_is_ch1 = slot == base_station;
    let mcu_is_ch1 = if channel_remap { !shell_is_ch1 } else { shell_is_ch1 };
    let phy_addr = base_station * 10 + if mcu_is_ch1 { 1 } else { 6 };
    PhyAddr { phy_addr, phy_tx: phy_addr + 2, phy_rx: phy_addr + 1 }
}

/// Destination for a `*_STATUS` frame, decoupled from [`crate::classifier`]
/// so this module stays a pure router.
pub trait StatusSink {
    fn on_status_frame(&self, slot: SlotId, data: &[u8], timestamp: f64);
}

/// Destination for a decoded `*_APP_RX1`/`*_APP_RX2` frame.
pub trait AppSink {
    fn on_app_frame(&self, slot: SlotId, signals: SignalMap);
}

/// Maintains the last decoded signal map per slot for one application-frame
/// stream (design §3 per-slot state: "last decoded app-rx1/app-rx2 signal
/// maps"). Implements [`AppSink`] so it wires directly into [`RxDispatcher`];
/// one instance covers APP_RX1, a second, separate instance covers APP_RX2.
pub struct AppFrameTable {
    table: std::sync::Mutex<crate::slot::SlotTable<SignalMap>>,
}

impl AppFrameTable {
    pub fn new(max_slots: u16) -> Self {
        Self { table: std::sync::Mutex::new(crate::slot::SlotTable::new(max_slots)) }
    }

    /// The most recently decoded signal map for `slot`, if any has arrived.
    pub fn record(&self, slot: SlotId) -> Option<SignalMap> {
        self.table.lock().unwrap().get(slot).cloned()
    }

    /// Every populated slot's last signal map, ascending slot order.
    pub fn snapshot(&self) -> Vec<(SlotId, SignalMap)> {
        self.table.lock().unwrap().iter().map(|(id, m)| (id, m.clone())).collect()
    }
}

impl AppSink for AppFrameTable {
    fn on_app_frame(&self, slot: SlotId, signals: SignalMap) {
        self.table.lock().unwrap().set(slot, signals);
    }
}

/// Wires [`classify`]/[`get_slot_id`] to the status classifier and the two
/// optional application-frame sinks (design §4.3). Registered as a single
/// listener on [`crate::bus::BusManager`].
pub struct RxDispatcher {
    max_slots: u16,
    channel_remap: bool,
    id_of_rx_msg1: Option<u32>,
    id_of_rx_msg2: Option<u32>,
    db: std::sync::Arc<dyn SignalDatabase>,
    status_sink: std::sync::Arc<dyn StatusSink + Send + Sync>,
    app_rx1_sink: Option<std::sync::Arc<dyn AppSink + Send + Sync>>,
    app_rx2_sink: Option<std::sync::Arc<dyn AppSink + Send + Sync>>,
}

impl RxDispatcher {
    pub fn new(
        max_slots: u16,
        channel_remap: bool,
        id_of_rx_msg1: Option<u32>,
        id_of_rx_msg2: Option<u32>,
        db: std::sync::Arc<dyn SignalDatabase>,
        status_sink: std::sync::Arc<dyn StatusSink + Send + Sync>,
        app_rx1_sink: Option<std::sync::Arc<dyn AppSink + Send + Sync>>,
        app_rx2_sink: Option<std::sync::Arc<dyn AppSink + Send + Sync>>,
    ) -> Self {
        Self {
            max_slots,
            channel_remap,
            id_of_rx_msg1,
            id_of_rx_msg2,
            db,
            status_sink,
            app_rx1_sink,
            app_rx2_sink,
        }
    }

    /// Routes one inbound frame. `*_DIAG_*` streams are not consumed here:
    /// the ISO-TP stacks of C6 are attached directly to C1 and receive
    /// those frames independently (design §4.3 step 3).
    pub fn on_frame(&self, id: u32, data: &[u8], timestamp: f64) {
        let Some(key) = classify(id, self.channel_remap) else { return };
        let slot = match key.channel {
            Channel::Ch1 => key.base_station,
            Channel::Ch2 => key.base_station + 1,
        };
        let Ok(slot) = SlotId::new(slot, self.max_slots) else { return };

        match key.stream {
            Stream::Status => self.status_sink.on_status_frame(slot, data, timestamp),
            Stream::AppRx1 => {
                if let (Some(sink), Some(rx_id)) = (&self.app_rx1_sink, self.id_of_rx_msg1) {
                    match self.db.decode(MessageRef::Id(rx_id), data) {
                        Ok(signals) => sink.on_app_frame(slot, signals),
                        Err(e) => tracing::warn!(slot = slot.get(), error = %e, "DBC decode failed for app-rx1 frame"),
                    }
                }
            }
            Stream::AppRx2 => {
                if let (Some(sink), Some(rx_id)) = (&self.app_rx2_sink, self.id_of_rx_msg2) {
                    match self.db.decode(MessageRef::Id(rx_id), data) {
                        Ok(signals) => sink.on_app_frame(slot, signals),
                        Err(e) => tracing::warn!(slot = slot.get(), error = %e, "DBC decode failed for app-rx2 frame"),
                    }
                }
            }
            Stream::DiagRx | Stream::DiagTx => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn s1_status_classification_roundtrip() {
        // ID=11 -> slave=1, offset=1 -> CH1 status, base_station=1, slot=1.
        let key = classify(11, false).unwrap();
        assert_eq!(key.channel, Channel::Ch1);
        assert_eq!(key.stream, Stream::Status);
        assert_eq!(get_slot_id(11, 80, false).unwrap().get(), 1);
    }

    #[test]
    fn s2_can_id_to_slot() {
        assert_eq!(get_slot_id(21, 80, false).unwrap().get(), 3);
        assert_eq!(get_slot_id(26, 80, false).unwrap().get(), 4);
        // With channel_remap the same two IDs yield the swapped slots.
        assert_eq!(get_slot_id(21, 80, true).unwrap().get(), 4);
        assert_eq!(get_slot_id(26, 80, true).unwrap().get(), 3);
    }

    #[test]
    fn s3_physical_address_for_slot() {
        let addr7 = get_phy_addr(SlotId::new(7, 80).unwrap(), false);
        assert_eq!(addr7, PhyAddr { phy_addr: 71, phy_tx: 73, phy_rx: 72 });
        let addr8 = get_phy_addr(SlotId::new(8, 80).unwrap(), false);
        assert_eq!(addr8, PhyAddr { phy_addr: 76, phy_tx: 78, phy_rx: 77 });
    }

    #[test]
    fn reserved_control_ids_are_dropped() {
        for id in 0..=MAX_RESERVED_ID {
            assert!(classify(id, false).is_none());
        }
    }

    #[test]
    fn offset_zero_is_dropped() {
        // id=20 -> slave=2, offset=0: not in 1..=10, silently dropped.
        assert!(classify(20, false).is_none());
    }

    #[test]
    fn app_frame_table_keeps_the_last_decoded_signals() {
        let table = AppFrameTable::new(80);
        let slot = SlotId::new(5, 80).unwrap();
        assert!(table.record(slot).is_none());

        let mut signals = SignalMap::new();
        signals.insert("Foo".to_string(), 1.0);
        table.on_app_frame(slot, signals.clone());
        assert_eq!(table.record(slot), Some(signals));

        let mut newer = SignalMap::new();
        newer.insert("Foo".to_string(), 2.0);
        table.on_app_frame(slot, newer.clone());
        assert_eq!(table.record(slot), Some(newer), "a fresh decode replaces the previous value");
    }
}
