//! Slot-Status Classifier (C4): maps `(voltage, current)` into an ordinal
//! status code, normalizes driver timestamps, and maintains the per-slot
//! status table.

use std::time::{SystemTime, UNIX_EPOCH};

use crate::dispatch::StatusSink;
use crate::slot::{SlotId, SlotTable};

/// Voltage/current ranges and the dark-current threshold a project
/// configures (design §4.4, §6 project config).
#[derive(Debug, Clone, Copy)]
pub struct ClassifierRanges {
    pub voltage_min: f64,
    pub voltage_max: f64,
    pub current_min: f64,
    pub current_max: f64,
    pub dark_current: f64,
}

/// Decoded `d[6]` resistor configuration (design §4.4): `0 -> 9999, 1 ->
/// 120, 2 -> 240, 3 -> -1`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResistorInfo {
    pub main_can: i32,
    pub can_1: i32,
    pub can_2: i32,
}

fn map_resistor_code(code: u8) -> i32 {
    match code & 0x03 {
        0 => 9999,
        1 => 120,
        2 => 240,
        _ => -1,
    }
}

impl ResistorInfo {
    fn from_byte(byte: u8) -> Self {
        Self {
            main_can: map_resistor_code(byte >> 4),
            can_1: map_resistor_code(byte >> 2),
            can_2: map_resistor_code(byte),
        }
    }
}

/// Eight named single-bit flags unpacked from `d[5]` (design §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CardInfo {
    pub slave_configured: bool,
    pub output_open: bool,
    pub current_status: bool,
    pub voltage_status: bool,
    pub can_status: bool,
    pub reserved: [bool; 3],
}

impl CardInfo {
    fn from_byte(byte: u8) -> Self {
        let bit = |n: u32| (byte >> n) & 1 == 1;
        Self {
            slave_configured: bit(0),
            output_open: bit(1),
            current_status: bit(2),
            voltage_status: bit(3),
            can_status: bit(4),
            reserved: [bit(5), bit(6), bit(7)],
        }
    }
}

/// The per-slot record produced on every status frame.
#[derive(Debug, Clone, PartialEq)]
pub struct SlotRecord {
    pub timestamp: f64,
    pub status: i8,
    pub voltage: f64,
    pub current: f64,
    pub card_info: CardInfo,
    pub temperature: i32,
    pub resistor_info: ResistorInfo,
}

/// Deterministic status classification table (design §4.4). `-5` board
/// lost, `-4` no unit plugged (dark current), `1` nominal, the rest
/// encode which of voltage/current is out of range and in which direction.
pub fn classify_status(voltage: f64, current: f64, ranges: &ClassifierRanges) -> i8 {
    if voltage <= 0.0 && current <= 0.0 {
        return -5;
    }
    if current <= ranges.dark_current {
        return -4;
    }
    if ranges.voltage_min <= voltage && voltage <= ranges.voltage_max {
        if ranges.current_min <= current && current <= ranges.current_max {
            1
        } else if current < ranges.current_min {
            -1
        } else {
            2
        }
    } else if voltage < ranges.voltage_min {
        if current < ranges.current_min {
            -3
        } else {
            -2
        }
    } else if current < ranges.current_min {
        3
    } else {
        4
    }
}

fn wall_now() -> f64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs_f64()
}

/// Normalizes driver timestamps that may be absolute (>= 1e9) or relative
/// to bus-open (< 1e9). On the first relative timestamp observed, computes
/// `offset = wall_now - ts` and adds it to every subsequent relative
/// timestamp. Non-positive or non-finite timestamps fall back to wall
/// clock (design §4.4).
pub struct TimestampNormalizer {
    offset: Option<f64>,
}

impl TimestampNormalizer {
    pub fn new() -> Self {
        Self { offset: None }
    }

    pub fn normalize(&mut self, ts: f64) -> f64 {
        if !ts.is_finite() || ts <= 0.0 {
            return wall_now();
        }
        if ts >= 1_000_000_000.0 {
            return ts;
        }
        let offset = *self.offset.get_or_insert_with(|| wall_now() - ts);
        ts + offset
    }
}

impl Default for TimestampNormalizer {
    fn default() -> Self {
        Self::new()
    }
}

/// Maintains the per-slot status table for one group and implements
/// [`StatusSink`] so it can be wired directly to [`crate::dispatch::RxDispatcher`].
pub struct SlotStatusClassifier {
    ranges: ClassifierRanges,
    table: std::sync::Mutex<SlotTable<SlotRecord>>,
    ts: std::sync::Mutex<TimestampNormalizer>,
}

impl SlotStatusClassifier {
    pub fn new(max_slots: u16, ranges: ClassifierRanges) -> Self {
        Self {
            ranges,
            table: std::sync::Mutex::new(SlotTable::new(max_slots)),
            ts: std::sync::Mutex::new(TimestampNormalizer::new()),
        }
    }

    pub fn record(&self, slot: SlotId) -> Option<SlotRecord> {
        self.table.lock().unwrap().get(slot).cloned()
    }

    pub fn decode_and_store(&self, slot: SlotId, d: &[u8], raw_timestamp: f64) {
        if d.len() < 8 {
            tracing::warn!(slot = slot.get(), len = d.len(), "status frame too short, dropped");
            return;
        }
        let voltage = d[1] as f64 * 0.1;
        let current = be_u24(&d[2..5]) as f64 * 0.001;
        let status = classify_status(voltage, current, &self.ranges);
        let timestamp = self.ts.lock().unwrap().normalize(raw_timestamp);
        let record = SlotRecord {
            timestamp,
            status,
            voltage,
            current,
            card_info: CardInfo::from_byte(d[5]),
            temperature: d[7] as i32 - 40,
            resistor_info: ResistorInfo::from_byte(d[6]),
        };
        self.table.lock().unwrap().set(slot, record);
    }

    /// Snapshot of every populated slot, ascending slot order.
    pub fn snapshot(&self) -> Vec<(SlotId, SlotRecord)> {
        self.table.lock().unwrap().iter().map(|(id, r)| (id, r.clone())).collect()
    }
}

impl StatusSink for SlotStatusClassifier {
    fn on_status_frame(&self, slot: SlotId, data: &[u8], timestamp: f64) {
        self.decode_and_store(slot, data, timestamp);
    }
}

fn be_u24(bytes: &[u8]) -> u32 {
    ((bytes[0] as u32) << 16) | ((bytes[1] as u32) << 8) | bytes[2] as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ranges() -> ClassifierRanges {
        ClassifierRanges { voltage_min: 11.0, voltage_max: 14.0, current_min: 0.400, current_max: 1.000, dark_current: 0.002 }
    }

    #[test]
    fn s1_nominal_classification() {
        // ID=11 data [FF,7C,00,01,F4,07,11,5A]: V=12.4, I=0.500A.
        let status = classify_status(12.4, 0.500, &ranges());
        assert_eq!(status, 1);
    }

    #[test]
    fn s1_current_below_range() {
        let r = ClassifierRanges { current_min: 0.600, ..ranges() };
        let status = classify_status(12.4, 0.500, &r);
        assert_eq!(status, -1);
    }

    #[test]
    fn board_lost_takes_priority() {
        assert_eq!(classify_status(0.0, 0.0, &ranges()), -5);
        assert_eq!(classify_status(-1.0, -1.0, &ranges()), -5);
    }

    #[test]
    fn dark_current_before_range_checks() {
        assert_eq!(classify_status(12.0, 0.001, &ranges()), -4);
    }

    #[test]
    fn decode_status_frame_matches_s1() {
        let classifier = SlotStatusClassifier::new(80, ranges());
        let slot = SlotId::new(1, 80).unwrap();
        let data = [0xFF, 0x7C, 0x00, 0x01, 0xF4, 0x07, 0x11, 0x5A];
        classifier.decode_and_store(slot, &data, 0.0);
        let record = classifier.record(slot).unwrap();
        assert_eq!(record.voltage, 12.4);
        assert!((record.current - 0.500).abs() < 1e-9);
        assert_eq!(record.status, 1);
        assert_eq!(record.temperature, 0x5A as i32 - 40);
    }

    #[test]
    fn resistor_mapping() {
        let info = ResistorInfo::from_byte(0b0001_1011);
        assert_eq!(info, ResistorInfo { main_can: 120, can_1: 240, can_2: -1 });
    }

    #[test]
    fn timestamp_normalization_offsets_relative_timestamps() {
        let mut norm = TimestampNormalizer::new();
        let first = norm.normalize(10.0);
        assert!(first > 1_000_000_000.0);
        let second = norm.normalize(11.0);
        assert!((second - first - 1.0).abs() < 1e-6);
    }

    #[test]
    fn absolute_timestamps_pass_through() {
        let mut norm = TimestampNormalizer::new();
        assert_eq!(norm.normalize(2_000_000_000.0), 2_000_000_000.0);
    }

    #[test]
    fn non_positive_timestamp_falls_back_to_wall_clock() {
        let mut norm = TimestampNormalizer::new();
        assert!(norm.normalize(-1.0) > 1_000_000_000.0);
        assert!(norm.normalize(f64::NAN) > 1_000_000_000.0);
    }
}
