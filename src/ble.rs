//! `HostStack` over the OS Bluetooth adapter via `ble-peripheral-rust`.
//!
//! The backend addresses characteristics by UUID and takes static values
//! when a service is added, so this adapter keeps its own attribute table:
//! handles index into it, resting values live in it, and services are handed
//! to the backend when advertising first starts. Dynamic attributes (anything
//! notifiable or writable) are served from the table through read requests.

use std::collections::BTreeSet;

use tokio::sync::mpsc;
use uuid::Uuid;

use ble_peripheral_rust::{
    Peripheral, PeripheralImpl,
    gatt::{
        characteristic::Characteristic,
        descriptor::Descriptor,
        peripheral_event::{
            PeripheralEvent, ReadRequestResponse, RequestResponse, WriteRequestResponse,
        },
        properties::{AttributePermission, CharacteristicProperty},
        service::Service,
    },
    uuid::ShortUuid,
};

use crate::advertise::Advertisement;
use crate::error::{HostError, RegistrationError};
use crate::gatt::{AttrHandle, ConnHandle, Flags, HostEvent, HostStack, ServiceTree};

// Codes carried by `HostEvent::Other`
pub const EVT_POWER: u16 = 0x01;
pub const EVT_SUBSCRIPTION: u16 = 0x02;
pub const EVT_READ: u16 = 0x03;
pub const EVT_WRITE: u16 = 0x04;

#[derive(Debug)]
struct Slot {
    uuid: Uuid,
    flags: Flags,
    is_descriptor: bool,
    max_len: usize,
    value: Vec<u8>,
}

impl Slot {
    fn is_writable(&self) -> bool {
        self.flags.contains(Flags::WRITE) || self.flags.contains(Flags::WRITE_NO_RESPONSE)
    }

    fn is_dynamic(&self) -> bool {
        !self.is_descriptor && (self.flags.contains(Flags::NOTIFY) || self.is_writable())
    }
}

fn slots_for(tree: &ServiceTree) -> Vec<Slot> {
    tree.attributes()
        .map(|a| Slot {
            uuid: Uuid::from_short(a.uuid),
            flags: a.flags,
            is_descriptor: a.is_descriptor,
            max_len: a.max_len,
            value: Vec::new(),
        })
        .collect()
}

/// Slot a read or write request for `uuid` is served from. Requests carry
/// only the UUID, so a write goes to the first writable characteristic with
/// it (the LED output report, not the keyboard input report) and a read to
/// the first readable one.
fn request_slot(slots: &[Slot], uuid: Uuid, write: bool) -> Option<usize> {
    slots.iter().position(|s| {
        !s.is_descriptor
            && s.uuid == uuid
            && if write {
                s.is_writable()
            } else {
                s.flags.contains(Flags::READ)
            }
    })
}

#[derive(Debug, Clone)]
struct AdvertisingParams {
    name: String,
    services: Vec<Uuid>,
    appearance: Option<u16>,
}

pub struct PeripheralHost {
    peripheral: Peripheral,
    tree: Option<ServiceTree>,
    slots: Vec<Slot>,
    committed: bool,
    advertising: Option<AdvertisingParams>,
    is_advertising: bool,
    subscribed: BTreeSet<Uuid>,
    conn: Option<ConnHandle>,
    next_conn: u16,
}

fn host_err(e: impl std::fmt::Display) -> HostError {
    HostError::Backend(format!("{e:#}"))
}

fn properties(flags: Flags) -> Vec<CharacteristicProperty> {
    let mut props = Vec::new();
    if flags.contains(Flags::READ) {
        props.push(CharacteristicProperty::Read);
    }
    if flags.contains(Flags::WRITE) {
        props.push(CharacteristicProperty::Write);
    }
    if flags.contains(Flags::WRITE_NO_RESPONSE) {
        props.push(CharacteristicProperty::WriteWithoutResponse);
    }
    // hosts only accept HID input reports over an encrypted link
    if flags.contains(Flags::NOTIFY) {
        props.push(CharacteristicProperty::NotifyEncryptionRequired);
    }
    props
}

fn permissions(flags: Flags) -> Vec<AttributePermission> {
    let mut perms = Vec::new();
    if flags.contains(Flags::READ) {
        perms.push(AttributePermission::Readable);
    }
    if flags.contains(Flags::WRITE) || flags.contains(Flags::WRITE_NO_RESPONSE) {
        perms.push(AttributePermission::Writeable);
    }
    perms
}

impl PeripheralHost {
    /// Opens the adapter and waits, with backoff, until it is powered.
    pub async fn new(evt_tx: mpsc::Sender<PeripheralEvent>) -> Result<Self, HostError> {
        let mut peripheral = Peripheral::new(evt_tx).await.map_err(host_err)?;

        let mut delay_ms = 50u64;
        while !peripheral.is_powered().await.map_err(host_err)? {
            tokio::time::sleep(std::time::Duration::from_millis(delay_ms)).await;
            delay_ms = (delay_ms * 2).min(1000);
        }
        tracing::info!("Adapter powered");

        Ok(Self {
            peripheral,
            tree: None,
            slots: Vec::new(),
            committed: false,
            advertising: None,
            is_advertising: false,
            subscribed: BTreeSet::new(),
            conn: None,
            next_conn: 1,
        })
    }

    fn slot(&self, handle: AttrHandle) -> Result<&Slot, HostError> {
        (handle.0 as usize)
            .checked_sub(1)
            .and_then(|i| self.slots.get(i))
            .ok_or(HostError::UnknownHandle(handle.0))
    }

    fn slot_mut(&mut self, handle: AttrHandle) -> Result<&mut Slot, HostError> {
        (handle.0 as usize)
            .checked_sub(1)
            .and_then(|i| self.slots.get_mut(i))
            .ok_or(HostError::UnknownHandle(handle.0))
    }

    fn characteristic_value(&self, uuid: Uuid) -> Vec<u8> {
        request_slot(&self.slots, uuid, false)
            .map(|i| self.slots[i].value.clone())
            .unwrap_or_default()
    }

    /// Backend services built from the registered tree and current values.
    /// Slots line up with `ServiceTree::attributes`, so walking the tree in
    /// the same order pairs each node with its slot.
    fn backend_services(&self, tree: &ServiceTree) -> Vec<Service> {
        let mut slots = self.slots.iter();
        let mut services = Vec::new();
        for svc in &tree.services {
            let mut characteristics = Vec::new();
            for ch in &svc.characteristics {
                let value = slots
                    .next()
                    .filter(|s| !s.is_dynamic())
                    .map(|s| s.value.clone());
                let mut descriptors = Vec::new();
                for d in &ch.descriptors {
                    descriptors.push(Descriptor {
                        uuid: Uuid::from_short(d.uuid),
                        value: slots.next().map(|s| s.value.clone()),
                        ..Default::default()
                    });
                }
                characteristics.push(Characteristic {
                    uuid: Uuid::from_short(ch.uuid),
                    properties: properties(ch.flags),
                    permissions: permissions(ch.flags),
                    value,
                    descriptors,
                    ..Default::default()
                });
            }
            services.push(Service {
                uuid: Uuid::from_short(svc.uuid),
                primary: true,
                characteristics,
            });
        }
        services
    }

    async fn commit(&mut self) -> Result<(), HostError> {
        if self.committed {
            return Ok(());
        }
        let Some(tree) = &self.tree else {
            return Ok(());
        };
        let services = self.backend_services(tree);
        for service in &services {
            self.peripheral.add_service(service).await.map_err(host_err)?;
        }
        self.committed = true;
        tracing::info!(slots = self.slots.len(), "Services committed to adapter");
        Ok(())
    }

    async fn start_advertising(&mut self) -> Result<(), HostError> {
        let Some(params) = self.advertising.clone() else {
            return Ok(());
        };
        self.peripheral
            .start_advertising(&params.name, &params.services, params.appearance)
            .await
            .map_err(host_err)?;
        self.is_advertising = true;
        Ok(())
    }
}

impl HostStack for PeripheralHost {
    type Event = PeripheralEvent;

    async fn register_services(
        &mut self,
        tree: &ServiceTree,
    ) -> Result<Vec<AttrHandle>, RegistrationError> {
        if self.tree.is_some() {
            return Err(RegistrationError::Rejected("services already registered".into()));
        }
        // update_characteristic takes a UUID, so two notifiable
        // characteristics sharing one would alias each other
        if let Some((service, uuid)) = tree.first_notify_duplicate() {
            return Err(RegistrationError::DuplicateUuid { service, uuid });
        }
        self.slots = slots_for(tree);
        self.tree = Some(tree.clone());
        Ok((1..=self.slots.len() as u16).map(AttrHandle).collect())
    }

    async fn write_attribute(&mut self, handle: AttrHandle, value: &[u8]) -> Result<(), HostError> {
        let committed = self.committed;
        let slot = self.slot_mut(handle)?;
        if value.len() > slot.max_len {
            return Err(HostError::ValueTooLong {
                len: value.len(),
                max: slot.max_len,
            });
        }
        if committed && !slot.is_dynamic() {
            tracing::warn!(%handle, "Static value changed after commit, peers keep the old one");
        }
        slot.value = value.to_vec();
        Ok(())
    }

    async fn notify(
        &mut self,
        conn: ConnHandle,
        handle: AttrHandle,
        value: &[u8],
    ) -> Result<(), HostError> {
        if self.conn != Some(conn) {
            return Err(HostError::Backend(format!("stale connection {conn}")));
        }
        let slot = self.slot(handle)?;
        if !self.subscribed.contains(&slot.uuid) {
            return Err(HostError::NotSubscribed(handle.0));
        }
        let uuid = slot.uuid;
        self.peripheral
            .update_characteristic(uuid, value.to_vec().into())
            .await
            .map_err(host_err)?;
        self.slot_mut(handle)?.value = value.to_vec();
        Ok(())
    }

    async fn set_advertisement(
        &mut self,
        interval_us: u32,
        payload: &Advertisement,
    ) -> Result<(), HostError> {
        self.commit().await?;
        let name = payload
            .local_name()
            .ok_or_else(|| HostError::Backend("advertising payload has no local name".into()))?;
        self.advertising = Some(AdvertisingParams {
            name: name.to_owned(),
            services: payload.services_16().into_iter().map(Uuid::from_short).collect(),
            appearance: payload.appearance(),
        });
        // the adapter picks its own interval
        tracing::debug!(%interval_us, payload = ?payload.as_bytes(), "Advertising payload");
        self.start_advertising().await
    }

    async fn translate(&mut self, event: PeripheralEvent) -> HostEvent {
        match event {
            PeripheralEvent::StateUpdate { is_powered } => {
                tracing::info!(%is_powered, "Adapter powered");
                if is_powered && !self.is_advertising {
                    if let Err(e) = self.start_advertising().await {
                        tracing::error!(error = %e, "advertise start error");
                    }
                } else if !is_powered {
                    if self.is_advertising {
                        if let Err(e) = self.peripheral.stop_advertising().await {
                            tracing::error!(error = %format!("{e:#}"), "advertise stop error");
                        }
                    }
                    self.is_advertising = false;
                    self.subscribed.clear();
                    if self.conn.take().is_some() {
                        return HostEvent::Disconnected;
                    }
                }
                HostEvent::Other {
                    code: EVT_POWER,
                    data: vec![is_powered as u8],
                }
            }
            PeripheralEvent::CharacteristicSubscriptionUpdate {
                request,
                subscribed,
            } => {
                tracing::debug!(%subscribed, ?request, "Subscription update");
                if subscribed {
                    self.subscribed.insert(request.characteristic);
                } else {
                    self.subscribed.remove(&request.characteristic);
                }
                // the backend has no link events; the first subscription
                // stands in for connect and the last unsubscribe for disconnect
                match (self.conn, self.subscribed.is_empty()) {
                    (None, false) => {
                        let conn = ConnHandle(self.next_conn);
                        self.next_conn = self.next_conn.wrapping_add(1);
                        self.conn = Some(conn);
                        HostEvent::Connected(conn)
                    }
                    (Some(_), true) => {
                        self.conn = None;
                        HostEvent::Disconnected
                    }
                    _ => HostEvent::Other {
                        code: EVT_SUBSCRIPTION,
                        data: vec![subscribed as u8],
                    },
                }
            }
            PeripheralEvent::ReadRequest {
                request,
                offset,
                responder,
            } => {
                tracing::debug!(?request, %offset, "ReadRequest");
                let value = self.characteristic_value(request.characteristic);
                let start = (offset as usize).min(value.len());
                let _ = responder.send(ReadRequestResponse {
                    value: value[start..].to_vec().into(),
                    response: RequestResponse::Success,
                });
                HostEvent::Other {
                    code: EVT_READ,
                    data: value,
                }
            }
            PeripheralEvent::WriteRequest {
                request,
                offset,
                value,
                responder,
            } => {
                tracing::debug!(?request, %offset, ?value, "WriteRequest");
                let value = value.to_vec();
                match request_slot(&self.slots, request.characteristic, true) {
                    Some(i) if value.len() <= self.slots[i].max_len => {
                        self.slots[i].value = value.clone();
                    }
                    Some(_) => tracing::warn!(len = value.len(), "Write longer than attribute, ignored"),
                    None => tracing::warn!(?request, "Write to non-writable characteristic"),
                }
                let _ = responder.send(WriteRequestResponse {
                    response: RequestResponse::Success,
                });
                HostEvent::Other {
                    code: EVT_WRITE,
                    data: value,
                }
            }
        }
    }
}
