//! Report Codec: logical events to fixed-width report bytes.
//!
//! Every encoder here is pure. The byte layout of each report must agree
//! with the collection `descriptor::report_map` declares for it; the
//! startup check in `descriptor::verify_layout` enforces that.

use crate::error::EncodingRangeError;

pub const KEYBOARD_REPORT_LEN: usize = 8;
pub const CONSUMER_REPORT_LEN: usize = 2;
pub const BATTERY_REPORT_LEN: usize = 1;

/// Keycode slots in a boot-compatible keyboard report.
pub const KEYBOARD_SLOTS: usize = 6;

/// Which physical semantic a report carries. The kind is never written into
/// the report bytes; it only selects the characteristic the report goes out on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ReportKind {
    Keyboard,
    Consumer,
    Battery,
}

impl ReportKind {
    pub const fn len(self) -> usize {
        match self {
            ReportKind::Keyboard => KEYBOARD_REPORT_LEN,
            ReportKind::Consumer => CONSUMER_REPORT_LEN,
            ReportKind::Battery => BATTERY_REPORT_LEN,
        }
    }
}

/// Consumer page (0x0C) usages used by the named actions.
pub mod consumer {
    pub const VOLUME_UP: u16 = 0x00E9;
    pub const VOLUME_DOWN: u16 = 0x00EA;
    pub const MUTE: u16 = 0x00E2;
    pub const PLAY_PAUSE: u16 = 0x00CD;
    pub const NEXT_TRACK: u16 = 0x00B5;
    pub const PREV_TRACK: u16 = 0x00B6;

    /// Highest usage the consumer collection declares.
    pub const USAGE_MAX: u16 = 0x028C;
}

/// An encoded report, tagged with the kind it was built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Report {
    Keyboard([u8; KEYBOARD_REPORT_LEN]),
    Consumer([u8; CONSUMER_REPORT_LEN]),
    Battery([u8; BATTERY_REPORT_LEN]),
}

impl Report {
    /// The all-zero report of the given kind's width.
    pub const fn neutral(kind: ReportKind) -> Self {
        match kind {
            ReportKind::Keyboard => Report::Keyboard([0; KEYBOARD_REPORT_LEN]),
            ReportKind::Consumer => Report::Consumer([0; CONSUMER_REPORT_LEN]),
            ReportKind::Battery => Report::Battery([0; BATTERY_REPORT_LEN]),
        }
    }

    pub const fn kind(&self) -> ReportKind {
        match self {
            Report::Keyboard(_) => ReportKind::Keyboard,
            Report::Consumer(_) => ReportKind::Consumer,
            Report::Battery(_) => ReportKind::Battery,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Report::Keyboard(b) => b,
            Report::Consumer(b) => b,
            Report::Battery(b) => b,
        }
    }
}

/// Byte 0 modifier bits, byte 1 reserved, bytes 2..8 keycode slots.
pub fn encode_keyboard(modifier: u8, keycodes: [u8; KEYBOARD_SLOTS]) -> [u8; KEYBOARD_REPORT_LEN] {
    let mut out = [0u8; KEYBOARD_REPORT_LEN];
    out[0] = modifier;
    out[1] = 0x00; // reserved
    out[2..].copy_from_slice(&keycodes);
    out
}

/// Keyboard report holding the given usages in order; anything past six
/// slots is dropped, unused slots stay zero.
pub fn keyboard_report(modifier: u8, usages: &[u8]) -> Report {
    let mut slots = [0u8; KEYBOARD_SLOTS];
    for (slot, &usage) in slots.iter_mut().zip(usages) {
        *slot = usage;
    }
    Report::Keyboard(encode_keyboard(modifier, slots))
}

pub fn encode_consumer(usage: u16) -> [u8; CONSUMER_REPORT_LEN] {
    usage.to_le_bytes()
}

pub fn encode_battery(percent: u8) -> Result<[u8; BATTERY_REPORT_LEN], EncodingRangeError> {
    if percent > 100 {
        return Err(EncodingRangeError {
            field: "battery level",
            value: percent.into(),
            max: 100,
        });
    }
    Ok([percent])
}
