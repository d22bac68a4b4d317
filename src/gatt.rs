//! GATT schema and session.
//!
//! `build_schema` declares the service tree for a set of capabilities. The
//! tree's traversal order is the contract with the host stack: registration
//! returns one handle per characteristic value and descriptor in that order,
//! and `Session::register` zips the two into a [`HandleMap`] exactly once.

use std::collections::BTreeMap;
use std::fmt;
use std::ops::BitOr;

use crate::advertise::Advertisement;
use crate::consts::*;
use crate::error::{HostError, RegistrationError};

/// Characteristic/descriptor access flags.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Flags(u8);

impl Flags {
    pub const READ: Flags = Flags(1 << 0);
    pub const WRITE: Flags = Flags(1 << 1);
    pub const NOTIFY: Flags = Flags(1 << 2);
    pub const WRITE_NO_RESPONSE: Flags = Flags(1 << 3);

    pub const fn contains(self, other: Flags) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for Flags {
    type Output = Flags;

    fn bitor(self, rhs: Flags) -> Flags {
        Flags(self.0 | rhs.0)
    }
}

impl fmt::Debug for Flags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = [
            (Flags::READ, "READ"),
            (Flags::WRITE, "WRITE"),
            (Flags::NOTIFY, "NOTIFY"),
            (Flags::WRITE_NO_RESPONSE, "WRITE_NO_RESPONSE"),
        ];
        let set: Vec<_> = names
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect();
        write!(f, "Flags({})", set.join(" | "))
    }
}

/// Symbolic names for every attribute the schema can declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Attr {
    HidInfo,
    ReportMap,
    ControlPoint,
    ProtocolMode,
    KeyboardInput,
    KeyboardInputRef,
    KeyboardOutput,
    KeyboardOutputRef,
    ConsumerInput,
    ConsumerInputRef,
    BatteryLevel,
    ManufacturerName,
    ModelNumber,
    PnpId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, clap::ValueEnum)]
pub enum Capability {
    Keyboard,
    Consumer,
    Battery,
    DeviceInfo,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub keyboard: bool,
    pub consumer: bool,
    pub battery: bool,
    pub device_info: bool,
}

impl Capabilities {
    pub fn all() -> Self {
        Self {
            keyboard: true,
            consumer: true,
            battery: true,
            device_info: true,
        }
    }

    pub fn has_hid(&self) -> bool {
        self.keyboard || self.consumer
    }
}

impl FromIterator<Capability> for Capabilities {
    fn from_iter<I: IntoIterator<Item = Capability>>(iter: I) -> Self {
        let mut caps = Capabilities::default();
        for cap in iter {
            match cap {
                Capability::Keyboard => caps.keyboard = true,
                Capability::Consumer => caps.consumer = true,
                Capability::Battery => caps.battery = true,
                Capability::DeviceInfo => caps.device_info = true,
            }
        }
        caps
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptorNode {
    pub name: Attr,
    pub uuid: u16,
    pub flags: Flags,
    pub max_len: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacteristicNode {
    pub name: Attr,
    pub uuid: u16,
    pub flags: Flags,
    pub max_len: usize,
    pub descriptors: Vec<DescriptorNode>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceNode {
    pub uuid: u16,
    pub characteristics: Vec<CharacteristicNode>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceTree {
    pub services: Vec<ServiceNode>,
}

/// One registrable attribute as seen in traversal order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttrInfo {
    pub name: Attr,
    pub uuid: u16,
    pub flags: Flags,
    pub max_len: usize,
    pub service: u16,
    pub is_descriptor: bool,
}

impl ServiceTree {
    /// Characteristics and their descriptors, depth first.
    pub fn attributes(&self) -> impl Iterator<Item = AttrInfo> + '_ {
        self.services.iter().flat_map(|svc| {
            svc.characteristics.iter().flat_map(move |ch| {
                let own = AttrInfo {
                    name: ch.name,
                    uuid: ch.uuid,
                    flags: ch.flags,
                    max_len: ch.max_len,
                    service: svc.uuid,
                    is_descriptor: false,
                };
                std::iter::once(own).chain(ch.descriptors.iter().map(move |d| AttrInfo {
                    name: d.name,
                    uuid: d.uuid,
                    flags: d.flags,
                    max_len: d.max_len,
                    service: svc.uuid,
                    is_descriptor: true,
                }))
            })
        })
    }

    /// First UUID shared by two notifiable characteristics of one service,
    /// as `(service, uuid)`.
    pub fn first_notify_duplicate(&self) -> Option<(u16, u16)> {
        self.services.iter().find_map(|svc| {
            let notifying: Vec<&CharacteristicNode> = svc
                .characteristics
                .iter()
                .filter(|ch| ch.flags.contains(Flags::NOTIFY))
                .collect();
            notifying.iter().enumerate().find_map(|(i, ch)| {
                notifying[..i]
                    .iter()
                    .any(|prev| prev.uuid == ch.uuid)
                    .then_some((svc.uuid, ch.uuid))
            })
        })
    }

    /// Structural checks every host stack would apply. Repeated
    /// characteristic UUIDs are accepted only when each copy carries a
    /// Report Reference, which is what tells HID reports apart.
    pub fn validate(&self) -> Result<(), RegistrationError> {
        for svc in &self.services {
            for (i, ch) in svc.characteristics.iter().enumerate() {
                let has_ref = |c: &CharacteristicNode| {
                    c.descriptors.iter().any(|d| d.uuid == UUID_REPORT_REF_DESC)
                };
                let clash = svc.characteristics[..i]
                    .iter()
                    .any(|prev| prev.uuid == ch.uuid && !(has_ref(prev) && has_ref(ch)));
                if clash {
                    return Err(RegistrationError::DuplicateUuid {
                        service: svc.uuid,
                        uuid: ch.uuid,
                    });
                }
                if ch.flags.is_empty() {
                    return Err(RegistrationError::UnsupportedFlags {
                        uuid: ch.uuid,
                        flags: ch.flags,
                    });
                }
                for (j, d) in ch.descriptors.iter().enumerate() {
                    if ch.descriptors[..j].iter().any(|prev| prev.uuid == d.uuid) {
                        return Err(RegistrationError::DuplicateUuid {
                            service: svc.uuid,
                            uuid: d.uuid,
                        });
                    }
                    if d.flags.is_empty()
                        || d.flags.contains(Flags::NOTIFY)
                        || d.flags.contains(Flags::WRITE_NO_RESPONSE)
                    {
                        return Err(RegistrationError::UnsupportedFlags {
                            uuid: d.uuid,
                            flags: d.flags,
                        });
                    }
                }
            }
        }
        for attr in self.attributes() {
            if attr.max_len > ATT_MAX_VALUE_LEN {
                return Err(RegistrationError::ValueTooLong {
                    uuid: attr.uuid,
                    len: attr.max_len,
                });
            }
        }
        Ok(())
    }
}

fn characteristic(name: Attr, uuid: u16, flags: Flags, max_len: usize) -> CharacteristicNode {
    CharacteristicNode {
        name,
        uuid,
        flags,
        max_len,
        descriptors: Vec::new(),
    }
}

fn report(name: Attr, flags: Flags, max_len: usize, reference: Attr) -> CharacteristicNode {
    CharacteristicNode {
        descriptors: vec![DescriptorNode {
            name: reference,
            uuid: UUID_REPORT_REF_DESC,
            flags: Flags::READ,
            max_len: 2,
        }],
        ..characteristic(name, UUID_HID_REPORT, flags, max_len)
    }
}

/// Declares the service tree. Each capability only appends nodes after
/// those of the capabilities before it (keyboard, consumer, battery, device
/// info), so adding one never moves an earlier handle.
pub fn build_schema(caps: Capabilities) -> ServiceTree {
    let mut services = Vec::new();

    if caps.has_hid() {
        let mut chars = vec![
            characteristic(Attr::HidInfo, UUID_HID_INFO, Flags::READ, HID_INFO.len()),
            characteristic(Attr::ReportMap, UUID_HID_REPORT_MAP, Flags::READ, ATT_MAX_VALUE_LEN),
            characteristic(Attr::ControlPoint, UUID_HID_CONTROL_POINT, Flags::WRITE_NO_RESPONSE, 1),
            characteristic(
                Attr::ProtocolMode,
                UUID_HID_PROTOCOL_MODE,
                Flags::READ | Flags::WRITE_NO_RESPONSE,
                1,
            ),
        ];
        if caps.keyboard {
            chars.push(report(
                Attr::KeyboardInput,
                Flags::READ | Flags::NOTIFY,
                crate::hid::KEYBOARD_REPORT_LEN,
                Attr::KeyboardInputRef,
            ));
            chars.push(report(
                Attr::KeyboardOutput,
                Flags::READ | Flags::WRITE | Flags::WRITE_NO_RESPONSE,
                1,
                Attr::KeyboardOutputRef,
            ));
        }
        if caps.consumer {
            chars.push(report(
                Attr::ConsumerInput,
                Flags::READ | Flags::NOTIFY,
                crate::hid::CONSUMER_REPORT_LEN,
                Attr::ConsumerInputRef,
            ));
        }
        services.push(ServiceNode {
            uuid: UUID_HID_SERVICE,
            characteristics: chars,
        });
    }

    if caps.battery {
        services.push(ServiceNode {
            uuid: UUID_BAS_SERVICE,
            characteristics: vec![characteristic(
                Attr::BatteryLevel,
                UUID_BATTERY_LEVEL,
                Flags::READ | Flags::NOTIFY,
                crate::hid::BATTERY_REPORT_LEN,
            )],
        });
    }

    if caps.device_info {
        services.push(ServiceNode {
            uuid: UUID_DIS_SERVICE,
            characteristics: vec![
                characteristic(Attr::ManufacturerName, UUID_MFG_NAME, Flags::READ, 64),
                characteristic(Attr::ModelNumber, UUID_MODEL_NUM, Flags::READ, 64),
                characteristic(Attr::PnpId, UUID_PNP_ID, Flags::READ, 7),
            ],
        });
    }

    ServiceTree { services }
}

/// Opaque attribute handle assigned by the host stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AttrHandle(pub u16);

impl fmt::Display for AttrHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#06x}", self.0)
    }
}

/// Opaque connection identifier assigned by the host stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnHandle(pub u16);

impl fmt::Display for ConnHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

/// Symbolic name to handle resolution, fixed at registration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HandleMap(BTreeMap<Attr, AttrHandle>);

impl HandleMap {
    pub fn get(&self, attr: Attr) -> Option<AttrHandle> {
        self.0.get(&attr).copied()
    }

    pub fn resolve(&self, attr: Attr) -> Result<AttrHandle, RegistrationError> {
        self.get(attr).ok_or(RegistrationError::Unresolved(attr))
    }

    pub fn iter(&self) -> impl Iterator<Item = (Attr, AttrHandle)> + '_ {
        self.0.iter().map(|(a, h)| (*a, *h))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Connection-level events, as the session sees them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostEvent {
    Connected(ConnHandle),
    Disconnected,
    /// Anything else the stack reports, kept for diagnostics.
    Other { code: u16, data: Vec<u8> },
}

/// Change in link state produced by [`Session::on_event`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Link {
    Up(ConnHandle),
    Down,
}

/// The narrow surface of a BLE host stack this crate drives.
#[allow(async_fn_in_trait)]
pub trait HostStack {
    /// Raw event type the stack delivers on its event channel.
    type Event;

    /// Registers the tree; returns one handle per [`ServiceTree::attributes`]
    /// entry, in the same order.
    async fn register_services(
        &mut self,
        tree: &ServiceTree,
    ) -> Result<Vec<AttrHandle>, RegistrationError>;

    /// Sets an attribute's resting value.
    async fn write_attribute(&mut self, handle: AttrHandle, value: &[u8]) -> Result<(), HostError>;

    async fn notify(
        &mut self,
        conn: ConnHandle,
        handle: AttrHandle,
        value: &[u8],
    ) -> Result<(), HostError>;

    async fn set_advertisement(
        &mut self,
        interval_us: u32,
        payload: &Advertisement,
    ) -> Result<(), HostError>;

    /// Converts a raw event into a session event. Stack housekeeping (read
    /// responses, re-advertising) happens here; nothing is swallowed.
    async fn translate(&mut self, event: Self::Event) -> HostEvent;
}

/// Registered handles plus the single connection slot.
#[derive(Debug)]
pub struct Session {
    handles: HandleMap,
    connection: Option<ConnHandle>,
}

impl Session {
    pub async fn register<H: HostStack>(
        host: &mut H,
        tree: &ServiceTree,
    ) -> Result<Session, RegistrationError> {
        tree.validate()?;
        let handles = host.register_services(tree).await?;
        let names: Vec<Attr> = tree.attributes().map(|a| a.name).collect();
        if handles.len() != names.len() {
            return Err(RegistrationError::HandleCountMismatch {
                expected: names.len(),
                got: handles.len(),
            });
        }
        let handles = HandleMap(names.into_iter().zip(handles).collect());
        tracing::info!(attributes = handles.len(), "Services registered");
        for (attr, handle) in handles.iter() {
            tracing::debug!(?attr, %handle, "Handle");
        }
        Ok(Session {
            handles,
            connection: None,
        })
    }

    pub fn handles(&self) -> &HandleMap {
        &self.handles
    }

    pub fn connection(&self) -> Option<ConnHandle> {
        self.connection
    }

    pub fn on_connect(&mut self, conn: ConnHandle) {
        if let Some(prev) = self.connection.replace(conn) {
            tracing::warn!(%prev, %conn, "Connect while already connected, replacing peer");
        }
    }

    pub fn on_disconnect(&mut self) {
        self.connection = None;
    }

    pub fn on_event(&mut self, event: HostEvent) -> Option<Link> {
        match event {
            HostEvent::Connected(conn) => {
                self.on_connect(conn);
                tracing::info!(%conn, "Connected");
                Some(Link::Up(conn))
            }
            HostEvent::Disconnected => {
                self.on_disconnect();
                tracing::info!("Disconnected");
                Some(Link::Down)
            }
            HostEvent::Other { code, data } => {
                tracing::debug!(%code, ?data, "Host event");
                None
            }
        }
    }

    pub async fn write_static<H: HostStack>(
        &self,
        host: &mut H,
        handle: AttrHandle,
        value: &[u8],
    ) -> Result<(), HostError> {
        tracing::trace!(%handle, len = value.len(), "Write static");
        host.write_attribute(handle, value).await
    }
}

/// PnP ID characteristic value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PnpId {
    /// 0x01 = Bluetooth SIG, 0x02 = USB Implementer's Forum
    pub vendor_id_source: u8,
    pub vendor_id: u16,
    pub product_id: u16,
    pub product_version: u16,
}

impl PnpId {
    pub fn encode(&self) -> [u8; 7] {
        let mut out = [0u8; 7];
        out[0] = self.vendor_id_source;
        out[1..3].copy_from_slice(&self.vendor_id.to_le_bytes());
        out[3..5].copy_from_slice(&self.product_id.to_le_bytes());
        out[5..7].copy_from_slice(&self.product_version.to_le_bytes());
        out
    }
}

/// Report Reference descriptor value.
pub fn report_reference(report_id: u8, report_type: ReportType) -> [u8; 2] {
    [report_id, report_type as u8]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ReportType {
    Input = 1,
    Output = 2,
    Feature = 3,
}
