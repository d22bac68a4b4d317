//! Error types shared across the crate.
//!
//! Startup errors (`DescriptorError`, `RegistrationError`, `AdvertisementError`)
//! are fatal. Everything reachable from a single input event folds into
//! `TransmitError`, which the owner loop logs and moves past.

use thiserror::Error;

use crate::gatt::Attr;
use crate::hid::ReportKind;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DescriptorError {
    #[error("collection opened at depth {0} was never closed")]
    UnclosedCollection(usize),
    #[error("end collection without a matching collection")]
    UnbalancedEnd,
    #[error("report id 0 is reserved")]
    ReservedReportId,
    #[error("report id {0} is declared by more than one collection")]
    DuplicateReportId(u8),
    #[error("descriptor is {0} bytes, larger than an attribute value can hold")]
    TooLong(usize),
    #[error("descriptor declares {declared} bytes for {kind:?} report {id}, codec writes {encoded}")]
    LayoutMismatch {
        kind: ReportKind,
        id: u8,
        declared: usize,
        encoded: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistrationError {
    #[error("service {service:#06x} declares characteristic {uuid:#06x} more than once")]
    DuplicateUuid { service: u16, uuid: u16 },
    #[error("attribute {uuid:#06x} capacity {len} exceeds the ATT maximum")]
    ValueTooLong { uuid: u16, len: usize },
    #[error("attribute {uuid:#06x} has an unsupported flag combination {flags:?}")]
    UnsupportedFlags { uuid: u16, flags: crate::gatt::Flags },
    #[error("host stack returned {got} handles for {expected} attributes")]
    HandleCountMismatch { expected: usize, got: usize },
    #[error("attribute {0:?} is not part of the registered tree")]
    Unresolved(Attr),
    #[error("host stack rejected the service tree: {0}")]
    Rejected(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HostError {
    #[error("unknown attribute handle {0}")]
    UnknownHandle(u16),
    #[error("value of {len} bytes exceeds attribute capacity {max}")]
    ValueTooLong { len: usize, max: usize },
    #[error("no subscriber for attribute handle {0}")]
    NotSubscribed(u16),
    #[error("host stack error: {0}")]
    Backend(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("unsupported input character {0:?}")]
pub struct UnsupportedInput(pub char);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("{field} value {value} is outside 0..={max}")]
pub struct EncodingRangeError {
    pub field: &'static str,
    pub value: u32,
    pub max: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransmitError {
    #[error("no peer connected")]
    NotConnected,
    #[error("{0:?} reports were not declared at startup")]
    Unsupported(ReportKind),
    #[error(transparent)]
    Notify(#[from] HostError),
    #[error(transparent)]
    Encoding(#[from] EncodingRangeError),
    #[error(transparent)]
    Input(#[from] UnsupportedInput),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdvertisementError {
    #[error("advertising payload would be {0} bytes, limit is 31")]
    TooLong(usize),
    #[error("local name must not be empty")]
    EmptyName,
}

/// Anything that stops the device from coming up.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("report descriptor: {0}")]
    Descriptor(#[from] DescriptorError),
    #[error("service registration: {0}")]
    Registration(#[from] RegistrationError),
    #[error("advertising payload: {0}")]
    Advertisement(#[from] AdvertisementError),
    #[error("writing static attribute: {0}")]
    Host(#[from] HostError),
    #[error("initial battery level: {0}")]
    Battery(#[from] EncodingRangeError),
}
