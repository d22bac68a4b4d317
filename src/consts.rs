// Common constants for HID over GATT profile and device identity

pub const UUID_HID_SERVICE: u16 = 0x1812;
pub const UUID_BAS_SERVICE: u16 = 0x180F;
pub const UUID_DIS_SERVICE: u16 = 0x180A;

pub const UUID_HID_INFO: u16 = 0x2A4A;
pub const UUID_HID_CONTROL_POINT: u16 = 0x2A4C;
pub const UUID_HID_PROTOCOL_MODE: u16 = 0x2A4E;
pub const UUID_HID_REPORT_MAP: u16 = 0x2A4B;
pub const UUID_HID_REPORT: u16 = 0x2A4D;

pub const UUID_BATTERY_LEVEL: u16 = 0x2A19;
pub const UUID_MFG_NAME: u16 = 0x2A29;
pub const UUID_MODEL_NUM: u16 = 0x2A24;
pub const UUID_PNP_ID: u16 = 0x2A50;

pub const UUID_REPORT_REF_DESC: u16 = 0x2908; // [report_id, report_type]

pub const PERIPHERAL_APPEARANCE: u16 = 0x03C1; // keyboard

// bcdHID=0x0101, country=0, flags=normally connectable
pub const HID_INFO: [u8; 4] = [0x01, 0x01, 0x00, 0x02];
pub const PROTOCOL_MODE_REPORT: u8 = 0x01;

/// Largest attribute value ATT allows.
pub const ATT_MAX_VALUE_LEN: usize = 512;

/// Legacy advertising payload limit.
pub const ADV_MAX_LEN: usize = 31;
