//! BLE HID keyboard, consumer-control and battery peripheral.
//!
//! The report descriptor, GATT schema and report codec are built from one
//! capability set, so the bytes a peer is told to expect and the bytes that
//! get notified cannot drift apart.

pub mod advertise;
pub mod ble;
pub mod config;
pub mod console;
pub mod consts;
pub mod descriptor;
pub mod device;
pub mod error;
pub mod gatt;
pub mod hid;
pub mod host_power;
pub mod input;
pub mod keymap;
pub mod sim;
pub mod transmit;
