//! In-memory host stack.
//!
//! Assigns ATT-style handles (service and characteristic declarations take
//! a handle each, notifiable characteristics get a CCCD), keeps resting
//! values, and records every call so tests can assert on the exact
//! sequence. `--simulate` runs the device against it.

use std::collections::BTreeMap;

use crate::advertise::Advertisement;
use crate::error::{HostError, RegistrationError};
use crate::gatt::{AttrHandle, ConnHandle, Flags, HostEvent, HostStack, ServiceTree};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostCall {
    Register { attributes: usize },
    Write { handle: AttrHandle, value: Vec<u8> },
    Notify { conn: ConnHandle, handle: AttrHandle, value: Vec<u8> },
    Advertise { interval_us: u32, payload: Vec<u8> },
}

#[derive(Debug)]
struct Slot {
    max_len: usize,
    value: Vec<u8>,
}

#[derive(Debug, Default)]
pub struct SimHost {
    calls: Vec<HostCall>,
    slots: BTreeMap<AttrHandle, Slot>,
    fail_notify: bool,
    reject: Option<RegistrationError>,
}

impl SimHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every notify returns a backend error, like a stack under backpressure.
    pub fn failing_notifies(mut self) -> Self {
        self.fail_notify = true;
        self
    }

    /// Registration fails with `err`.
    pub fn rejecting(mut self, err: RegistrationError) -> Self {
        self.reject = Some(err);
        self
    }

    pub fn calls(&self) -> &[HostCall] {
        &self.calls
    }

    pub fn clear_calls(&mut self) {
        self.calls.clear();
    }

    pub fn notifies(&self) -> Vec<(AttrHandle, Vec<u8>)> {
        self.calls
            .iter()
            .filter_map(|c| match c {
                HostCall::Notify { handle, value, .. } => Some((*handle, value.clone())),
                _ => None,
            })
            .collect()
    }

    pub fn value(&self, handle: AttrHandle) -> Option<&[u8]> {
        self.slots.get(&handle).map(|s| s.value.as_slice())
    }
}

impl HostStack for SimHost {
    type Event = HostEvent;

    async fn register_services(
        &mut self,
        tree: &ServiceTree,
    ) -> Result<Vec<AttrHandle>, RegistrationError> {
        if let Some(err) = self.reject.clone() {
            return Err(err);
        }
        let mut next = 1u16;
        let mut handles = Vec::new();
        for svc in &tree.services {
            next += 1; // service declaration
            for ch in &svc.characteristics {
                next += 1; // characteristic declaration
                let value = AttrHandle(next);
                next += 1;
                self.slots.insert(value, Slot { max_len: ch.max_len, value: Vec::new() });
                handles.push(value);
                if ch.flags.contains(Flags::NOTIFY) {
                    next += 1; // CCCD
                }
                for d in &ch.descriptors {
                    let handle = AttrHandle(next);
                    next += 1;
                    self.slots.insert(handle, Slot { max_len: d.max_len, value: Vec::new() });
                    handles.push(handle);
                }
            }
        }
        self.calls.push(HostCall::Register { attributes: handles.len() });
        Ok(handles)
    }

    async fn write_attribute(&mut self, handle: AttrHandle, value: &[u8]) -> Result<(), HostError> {
        let slot = self
            .slots
            .get_mut(&handle)
            .ok_or(HostError::UnknownHandle(handle.0))?;
        if value.len() > slot.max_len {
            return Err(HostError::ValueTooLong {
                len: value.len(),
                max: slot.max_len,
            });
        }
        slot.value = value.to_vec();
        self.calls.push(HostCall::Write {
            handle,
            value: value.to_vec(),
        });
        Ok(())
    }

    async fn notify(
        &mut self,
        conn: ConnHandle,
        handle: AttrHandle,
        value: &[u8],
    ) -> Result<(), HostError> {
        self.calls.push(HostCall::Notify {
            conn,
            handle,
            value: value.to_vec(),
        });
        tracing::info!(%conn, %handle, ?value, "Notify");
        if self.fail_notify {
            return Err(HostError::Backend("notify queue full".into()));
        }
        if !self.slots.contains_key(&handle) {
            return Err(HostError::UnknownHandle(handle.0));
        }
        Ok(())
    }

    async fn set_advertisement(
        &mut self,
        interval_us: u32,
        payload: &Advertisement,
    ) -> Result<(), HostError> {
        tracing::info!(%interval_us, name = ?payload.local_name(), "Advertising");
        self.calls.push(HostCall::Advertise {
            interval_us,
            payload: payload.as_bytes().to_vec(),
        });
        Ok(())
    }

    async fn translate(&mut self, event: HostEvent) -> HostEvent {
        event
    }
}
