//! Startup sequence and the owner loop.
//!
//! One task owns the host stack, the session and the debouncer. It selects
//! over host events, the poll ticker and console commands; each input edge
//! runs its whole transmit chain before the next tick is taken.

use std::time::Duration;

use tokio::select;
use tokio::sync::mpsc;
use tokio::time::{self, MissedTickBehavior};

use crate::advertise::create_advertisement_data;
use crate::console::AppCmd;
use crate::consts::*;
use crate::descriptor::{ReportIds, report_map};
use crate::error::StartupError;
use crate::gatt::{
    Attr, Capabilities, HostStack, Link, PnpId, ReportType, Session, build_schema,
    report_reference,
};
use crate::hid::encode_battery;
use crate::host_power;
use crate::input::{Debouncer, InputSource};
use crate::keymap::ButtonAction;
use crate::transmit::{StrPolicy, Transmitter};

#[derive(Debug, Clone)]
pub struct DeviceSettings {
    /// GAP name; the advertised local name is built from this same value.
    pub name: String,
    pub capabilities: Capabilities,
    pub adv_interval_us: u32,
    pub battery: u8,
    pub manufacturer: String,
    pub model: String,
    pub pnp: PnpId,
}

#[derive(Debug, Clone)]
pub struct LoopOptions {
    pub poll: Duration,
    pub str_policy: StrPolicy,
    /// Typed once, on the first connection.
    pub type_on_connect: Option<String>,
    /// Period for mirroring the host's own battery level, if enabled.
    pub host_battery: Option<Duration>,
}

pub struct Device<H: HostStack> {
    host: H,
    session: Session,
    tx: Transmitter,
    report_ids: ReportIds,
}

impl<H: HostStack> Device<H> {
    /// Builds the descriptor and schema, registers, writes every resting
    /// value, then advertises. Any failure here is fatal.
    pub async fn start(mut host: H, settings: &DeviceSettings) -> Result<Self, StartupError> {
        let caps = settings.capabilities;
        let report_ids = ReportIds::assign(caps.keyboard, caps.consumer);
        let map = caps.has_hid().then(|| report_map(report_ids)).transpose()?;
        let battery = encode_battery(settings.battery)?;

        let tree = build_schema(caps);
        let adv_services: Vec<u16> = tree.services.first().map(|s| s.uuid).into_iter().collect();
        let adv = create_advertisement_data(&settings.name, &adv_services, PERIPHERAL_APPEARANCE)?;

        let session = Session::register(&mut host, &tree).await?;

        let mut statics: Vec<(Attr, Vec<u8>)> = Vec::new();
        if let Some(map) = &map {
            tracing::info!(len = map.len(), "Report map");
            statics.push((Attr::HidInfo, HID_INFO.to_vec()));
            statics.push((Attr::ReportMap, map.as_bytes().to_vec()));
            statics.push((Attr::ProtocolMode, vec![PROTOCOL_MODE_REPORT]));
        }
        if let Some(id) = report_ids.keyboard {
            statics.push((Attr::KeyboardInputRef, report_reference(id, ReportType::Input).to_vec()));
            statics.push((Attr::KeyboardOutputRef, report_reference(id, ReportType::Output).to_vec()));
        }
        if let Some(id) = report_ids.consumer {
            statics.push((Attr::ConsumerInputRef, report_reference(id, ReportType::Input).to_vec()));
        }
        if caps.battery {
            statics.push((Attr::BatteryLevel, battery.to_vec()));
        }
        if caps.device_info {
            statics.push((Attr::ManufacturerName, settings.manufacturer.as_bytes().to_vec()));
            statics.push((Attr::ModelNumber, settings.model.as_bytes().to_vec()));
            statics.push((Attr::PnpId, settings.pnp.encode().to_vec()));
        }
        for (attr, value) in statics {
            let handle = session.handles().resolve(attr)?;
            session.write_static(&mut host, handle, &value).await?;
        }

        host.set_advertisement(settings.adv_interval_us, &adv).await?;
        tracing::info!(name = %settings.name, "Advertising");

        let tx = Transmitter::new(session.handles());
        Ok(Self {
            host,
            session,
            tx,
            report_ids,
        })
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn report_ids(&self) -> ReportIds {
        self.report_ids
    }

    pub async fn handle_event(&mut self, raw: H::Event) -> Option<Link> {
        let event = self.host.translate(raw).await;
        self.session.on_event(event)
    }

    /// Polls every channel once and performs what fired. Failures are logged
    /// and the input event is dropped.
    pub async fn poll_inputs(
        &mut self,
        debouncer: &mut Debouncer<ButtonAction>,
        input: &mut impl InputSource,
    ) {
        for action in debouncer.poll(input) {
            if let Err(e) = self.tx.perform(&mut self.host, &self.session, action).await {
                tracing::warn!(error = %e, ?action, "Action dropped");
            }
        }
    }

    pub async fn handle_command(&mut self, cmd: AppCmd, policy: StrPolicy) {
        let (host, session, tx) = (&mut self.host, &self.session, &self.tx);
        let result = match cmd {
            AppCmd::Type(text) => tx
                .send_str(host, session, &text, policy)
                .await
                .map(|sent| tracing::info!(%sent, "Typed")),
            AppCmd::Key(key) => tx.send_key(host, session, key).await,
            AppCmd::Media(usage) => tx.send_media(host, session, usage).await,
            AppCmd::Action(action) => tx.perform(host, session, action).await,
            AppCmd::Battery(level) => tx.set_battery(host, session, level).await,
            AppCmd::Exit => Ok(()),
        };
        if let Err(e) = result {
            tracing::warn!(error = %e, "Command dropped");
        }
    }

    /// Runs until the event channel closes or `Exit` arrives, then hands the
    /// device back.
    pub async fn run(
        mut self,
        mut events: mpsc::Receiver<H::Event>,
        mut commands: mpsc::Receiver<AppCmd>,
        mut input: impl InputSource,
        mut debouncer: Debouncer<ButtonAction>,
        opts: LoopOptions,
    ) -> Self {
        let poll = if opts.poll.is_zero() {
            tracing::warn!("Zero poll interval, using 1 ms");
            Duration::from_millis(1)
        } else {
            opts.poll
        };
        let mut ticker = time::interval(poll);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let battery_period = opts.host_battery.filter(|p| !p.is_zero());
        if opts.host_battery.is_some() && battery_period.is_none() {
            tracing::warn!("Zero host battery period, mirroring disabled");
        }
        let mirror_battery = battery_period.is_some();
        let mut battery_ticker = time::interval(battery_period.unwrap_or(Duration::from_secs(60)));
        battery_ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut pending_text = opts.type_on_connect;
        let mut last_battery: Option<u8> = None;
        let mut commands_open = true;

        tracing::info!(?poll, channels = debouncer.len(), "Owner loop started");
        loop {
            select! {
                ev = events.recv() => {
                    let Some(raw) = ev else { break };
                    if let Some(Link::Up(_)) = self.handle_event(raw).await {
                        if let Some(text) = pending_text.take() {
                            self.handle_command(AppCmd::Type(text), opts.str_policy).await;
                        }
                    }
                }
                _ = ticker.tick() => {
                    self.poll_inputs(&mut debouncer, &mut input).await;
                }
                _ = battery_ticker.tick(), if mirror_battery => {
                    match host_power::get_battery_percent() {
                        Some(level) if last_battery != Some(level) => {
                            last_battery = Some(level);
                            self.handle_command(AppCmd::Battery(level), opts.str_policy).await;
                        }
                        Some(_) => {}
                        None => tracing::debug!("Host battery unavailable"),
                    }
                }
                cmd = commands.recv(), if commands_open => {
                    match cmd {
                        Some(AppCmd::Exit) => break,
                        Some(cmd) => self.handle_command(cmd, opts.str_policy).await,
                        None => commands_open = false,
                    }
                }
            }
        }
        tracing::info!("Owner loop stopped");
        self
    }
}
