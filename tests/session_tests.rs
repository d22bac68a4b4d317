use bluekey::console::AppCmd;
use bluekey::consts::UUID_HID_SERVICE;
use bluekey::device::{Device, DeviceSettings};
use bluekey::error::{RegistrationError, StartupError, TransmitError, UnsupportedInput};
use bluekey::gatt::{
    Attr, AttrHandle, Capabilities, ConnHandle, HostEvent, Link, PnpId, Session, build_schema,
};
use bluekey::hid::{Report, ReportKind, encode_consumer};
use bluekey::input::{DebouncePolicy, Debouncer, InputSource};
use bluekey::keymap::ButtonAction;
use bluekey::sim::{HostCall, SimHost};
use bluekey::transmit::{StrPolicy, Transmitter};

fn settings(capabilities: Capabilities) -> DeviceSettings {
    DeviceSettings {
        name: "BlueKey".into(),
        capabilities,
        adv_interval_us: 100_000,
        battery: 80,
        manufacturer: "Acme".into(),
        model: "K1".into(),
        pnp: PnpId {
            vendor_id_source: 0x02,
            vendor_id: 0x1209,
            product_id: 0x0001,
            product_version: 0x0100,
        },
    }
}

async fn started(capabilities: Capabilities) -> Device<SimHost> {
    Device::start(SimHost::new(), &settings(capabilities)).await.unwrap()
}

async fn connected(capabilities: Capabilities) -> Device<SimHost> {
    let mut device = started(capabilities).await;
    let link = device.handle_event(HostEvent::Connected(ConnHandle(1))).await;
    assert_eq!(link, Some(Link::Up(ConnHandle(1))));
    device.host_mut().clear_calls();
    device
}

fn keyboard_only() -> Capabilities {
    Capabilities {
        keyboard: true,
        ..Default::default()
    }
}

fn handle(device: &Device<SimHost>, attr: Attr) -> AttrHandle {
    device.session().handles().get(attr).unwrap()
}

/// Per-channel levels, one entry per poll.
struct Script {
    levels: Vec<Vec<bool>>,
    tick: usize,
}

impl Script {
    fn new(levels: Vec<Vec<bool>>) -> Self {
        Self { levels, tick: 0 }
    }

    fn advance(&mut self) {
        self.tick += 1;
    }
}

impl InputSource for Script {
    fn is_active(&mut self, channel: usize) -> bool {
        self.levels
            .get(channel)
            .and_then(|l| l.get(self.tick))
            .copied()
            .unwrap_or(false)
    }
}

#[tokio::test]
async fn startup_writes_resting_values_then_advertises() {
    let device = started(Capabilities::all()).await;
    let host = device.host();

    assert!(matches!(host.calls().first(), Some(HostCall::Register { .. })));
    assert!(matches!(host.calls().last(), Some(HostCall::Advertise { interval_us: 100_000, .. })));

    assert_eq!(host.value(handle(&device, Attr::HidInfo)), Some(&[0x01, 0x01, 0x00, 0x02][..]));
    assert_eq!(host.value(handle(&device, Attr::ProtocolMode)), Some(&[0x01][..]));
    assert_eq!(host.value(handle(&device, Attr::KeyboardInputRef)), Some(&[1, 1][..]));
    assert_eq!(host.value(handle(&device, Attr::KeyboardOutputRef)), Some(&[1, 2][..]));
    assert_eq!(host.value(handle(&device, Attr::ConsumerInputRef)), Some(&[2, 1][..]));
    assert_eq!(host.value(handle(&device, Attr::BatteryLevel)), Some(&[80][..]));
    assert_eq!(host.value(handle(&device, Attr::ManufacturerName)), Some(&b"Acme"[..]));
    assert_eq!(
        host.value(handle(&device, Attr::PnpId)),
        Some(&[0x02, 0x09, 0x12, 0x01, 0x00, 0x00, 0x01][..])
    );

    let map = host.value(handle(&device, Attr::ReportMap)).unwrap();
    assert_eq!(&map[..4], &[0x05, 0x01, 0x09, 0x06]);
    assert_eq!(map.last(), Some(&0xC0));
}

#[tokio::test]
async fn advertised_name_matches_gap_name() {
    let device = started(Capabilities::all()).await;
    let Some(HostCall::Advertise { payload, .. }) = device.host().calls().last() else {
        panic!("no advertisement");
    };
    assert!(payload.len() <= 31);
    let adv = bluekey::advertise::create_advertisement_data("BlueKey", &[UUID_HID_SERVICE], 0x03C1)
        .unwrap();
    assert_eq!(payload.as_slice(), adv.as_bytes());
    assert_eq!(adv.local_name(), Some("BlueKey"));
    assert_eq!(adv.services_16(), vec![UUID_HID_SERVICE]);
}

#[tokio::test]
async fn too_long_name_fails_startup() {
    let mut s = settings(Capabilities::all());
    s.name = "A name that cannot possibly fit".into();
    let err = Device::start(SimHost::new(), &s).await.err().unwrap();
    assert!(matches!(err, StartupError::Advertisement(_)));
}

#[tokio::test]
async fn rejected_registration_is_fatal() {
    let host = SimHost::new().rejecting(RegistrationError::Rejected("no room".into()));
    let err = Device::start(host, &settings(Capabilities::all())).await.err().unwrap();
    assert!(matches!(err, StartupError::Registration(RegistrationError::Rejected(_))));
}

#[tokio::test]
async fn out_of_range_battery_fails_before_registration() {
    let mut s = settings(Capabilities::all());
    s.battery = 150;
    let err = Device::start(SimHost::new(), &s).await.err().unwrap();
    assert!(matches!(err, StartupError::Battery(_)));
}

#[tokio::test]
async fn send_str_types_each_character_as_a_pulse() {
    let mut device = connected(keyboard_only()).await;
    let kb = handle(&device, Attr::KeyboardInput);

    device.handle_command(AppCmd::Type("Hi".into()), StrPolicy::Abort).await;

    assert_eq!(
        device.host().notifies(),
        vec![
            (kb, vec![0x02, 0, 0x0B, 0, 0, 0, 0, 0]),
            (kb, vec![0; 8]),
            (kb, vec![0x00, 0, 0x0C, 0, 0, 0, 0, 0]),
            (kb, vec![0; 8]),
        ]
    );
}

#[tokio::test]
async fn press_and_release_needs_a_connection() {
    let mut device = started(Capabilities::all()).await;
    let mut host = SimHost::new();
    let session = Session::register(&mut host, &build_schema(Capabilities::all())).await.unwrap();
    let tx = Transmitter::new(session.handles());
    host.clear_calls();

    let err = tx
        .press_and_release(&mut host, &session, Report::neutral(ReportKind::Keyboard))
        .await
        .unwrap_err();
    assert_eq!(err, TransmitError::NotConnected);
    assert!(host.calls().is_empty());

    // the device drops the command the same way
    device.host_mut().clear_calls();
    device.handle_command(AppCmd::Action(ButtonAction::VolumeUp), StrPolicy::Abort).await;
    assert!(device.host().calls().is_empty());
}

#[tokio::test]
async fn every_pulse_is_exactly_two_notifies_on_one_handle() {
    let mut device = connected(Capabilities::all()).await;
    let consumer = handle(&device, Attr::ConsumerInput);

    device.handle_command(AppCmd::Media(0xE9), StrPolicy::Abort).await;
    assert_eq!(
        device.host().notifies(),
        vec![(consumer, encode_consumer(0xE9).to_vec()), (consumer, vec![0, 0])]
    );

    device.host_mut().clear_calls();
    device.handle_command(AppCmd::Action(ButtonAction::Screenshot), StrPolicy::Abort).await;
    let notifies = device.host().notifies();
    assert_eq!(notifies.len(), 2);
    assert_eq!(notifies[0].0, notifies[1].0);
    assert_eq!(notifies[0].1.len(), notifies[1].1.len());
    assert_eq!(notifies[0].1[2], 0x46);
}

#[tokio::test]
async fn release_is_sent_even_when_press_fails() {
    let mut host = SimHost::new().failing_notifies();
    let mut session = Session::register(&mut host, &build_schema(keyboard_only())).await.unwrap();
    session.on_connect(ConnHandle(3));
    let tx = Transmitter::new(session.handles());
    host.clear_calls();

    let err = tx
        .send_char(&mut host, &session, 'a')
        .await
        .unwrap_err();
    assert!(matches!(err, TransmitError::Notify(_)));
    assert_eq!(host.notifies().len(), 2);
    assert_eq!(host.notifies()[1].1, vec![0; 8]);
}

#[tokio::test]
async fn send_str_policies() {
    let mut host = SimHost::new();
    let mut session = Session::register(&mut host, &build_schema(keyboard_only())).await.unwrap();
    session.on_connect(ConnHandle(1));
    let tx = Transmitter::new(session.handles());
    host.clear_calls();

    let err = tx
        .send_str(&mut host, &session, "ab1c", StrPolicy::Abort)
        .await
        .unwrap_err();
    assert_eq!(err, TransmitError::Input(UnsupportedInput('1')));
    assert!(host.calls().is_empty());

    let sent = tx
        .send_str(&mut host, &session, "ab1c", StrPolicy::SkipUnsupported)
        .await
        .unwrap();
    assert_eq!(sent, 3);
    assert_eq!(host.notifies().len(), 6);

    host.clear_calls();
    assert_eq!(tx.send_str(&mut host, &session, "", StrPolicy::Abort).await, Ok(0));
    assert!(host.calls().is_empty());
}

#[tokio::test]
async fn transport_error_stops_the_string() {
    let mut host = SimHost::new().failing_notifies();
    let mut session = Session::register(&mut host, &build_schema(keyboard_only())).await.unwrap();
    session.on_connect(ConnHandle(1));
    let tx = Transmitter::new(session.handles());
    host.clear_calls();

    let result = tx.send_str(&mut host, &session, "abc", StrPolicy::SkipUnsupported).await;
    assert!(matches!(result, Err(TransmitError::Notify(_))));
    assert_eq!(host.notifies().len(), 2);
}

#[tokio::test]
async fn undeclared_report_kind_is_unsupported() {
    let mut host = SimHost::new();
    let mut session = Session::register(&mut host, &build_schema(keyboard_only())).await.unwrap();
    session.on_connect(ConnHandle(1));
    let tx = Transmitter::new(session.handles());
    host.clear_calls();

    let err = tx.send_media(&mut host, &session, 0xE9).await.unwrap_err();
    assert_eq!(err, TransmitError::Unsupported(ReportKind::Consumer));
    let err = tx.set_battery(&mut host, &session, 50).await.unwrap_err();
    assert_eq!(err, TransmitError::Unsupported(ReportKind::Battery));
    assert!(host.calls().is_empty());
}

#[tokio::test]
async fn battery_level_updates() {
    let mut device = started(Capabilities::all()).await;
    let battery = handle(&device, Attr::BatteryLevel);
    device.host_mut().clear_calls();

    // not connected: resting value only
    device.handle_command(AppCmd::Battery(42), StrPolicy::Abort).await;
    assert_eq!(device.host().value(battery), Some(&[42][..]));
    assert!(device.host().notifies().is_empty());

    device.handle_event(HostEvent::Connected(ConnHandle(9))).await;
    device.host_mut().clear_calls();
    device.handle_command(AppCmd::Battery(41), StrPolicy::Abort).await;
    assert_eq!(device.host().notifies(), vec![(battery, vec![41])]);

    // out of range: nothing reaches the host
    device.host_mut().clear_calls();
    device.handle_command(AppCmd::Battery(101), StrPolicy::Abort).await;
    assert!(device.host().calls().is_empty());
    assert_eq!(device.host().value(battery), Some(&[41][..]));
}

#[tokio::test]
async fn disconnect_clears_the_connection() {
    let mut device = connected(Capabilities::all()).await;
    assert_eq!(device.handle_event(HostEvent::Disconnected).await, Some(Link::Down));
    assert_eq!(device.session().connection(), None);

    let other = HostEvent::Other {
        code: 7,
        data: vec![1],
    };
    assert_eq!(device.handle_event(other).await, None);

    device.handle_command(AppCmd::Type("a".into()), StrPolicy::Abort).await;
    assert!(device.host().notifies().is_empty());
}

#[tokio::test]
async fn adding_capabilities_never_moves_earlier_handles() {
    let order = [
        Capabilities { keyboard: true, ..Default::default() },
        Capabilities { keyboard: true, consumer: true, ..Default::default() },
        Capabilities { keyboard: true, consumer: true, battery: true, ..Default::default() },
        Capabilities::all(),
    ];
    let mut previous: Option<Vec<(Attr, AttrHandle)>> = None;
    for caps in order {
        let mut host = SimHost::new();
        let session = Session::register(&mut host, &build_schema(caps)).await.unwrap();
        let current: Vec<(Attr, AttrHandle)> = session.handles().iter().collect();
        if let Some(prev) = &previous {
            for (attr, h) in prev {
                assert_eq!(session.handles().get(*attr), Some(*h), "{attr:?} moved");
            }
        }
        previous = Some(current);
    }
}

#[tokio::test]
async fn debounced_buttons_drive_transmissions() {
    let mut device = connected(Capabilities::all()).await;
    let kb = handle(&device, Attr::KeyboardInput);
    let consumer = handle(&device, Attr::ConsumerInput);

    let mut debouncer = Debouncer::new(
        [ButtonAction::Screenshot, ButtonAction::VolumeUp],
        DebouncePolicy { release_samples: 2 },
    );
    // channel 0 bounces inside the release window: one press
    // channel 1 is pressed twice with a full release in between
    let mut input = Script::new(vec![
        vec![true, false, true, true, false, false, false],
        vec![true, false, false, true, true, false, false],
    ]);
    for _ in 0..7 {
        device.poll_inputs(&mut debouncer, &mut input).await;
        input.advance();
    }

    let notifies = device.host().notifies();
    let kb_presses = notifies.iter().filter(|(h, v)| *h == kb && v[2] == 0x46).count();
    let vol_presses = notifies
        .iter()
        .filter(|(h, v)| *h == consumer && v == &vec![0xE9, 0x00])
        .count();
    assert_eq!(kb_presses, 1);
    assert_eq!(vol_presses, 2);
    assert_eq!(notifies.len(), 6);
}

#[tokio::test]
async fn type_on_connect_runs_through_owner_loop() {
    use bluekey::device::LoopOptions;
    use std::time::Duration;
    use tokio::sync::mpsc;

    let device = started(keyboard_only()).await;
    let kb = handle(&device, Attr::KeyboardInput);
    let (evt_tx, evt_rx) = mpsc::channel(8);
    let (cmd_tx, cmd_rx) = mpsc::channel(8);
    let debouncer = Debouncer::new(Vec::<ButtonAction>::new(), DebouncePolicy::default());
    let opts = LoopOptions {
        poll: Duration::from_millis(5),
        str_policy: StrPolicy::Abort,
        type_on_connect: Some("ok".into()),
        host_battery: None,
    };

    evt_tx.send(HostEvent::Connected(ConnHandle(1))).await.unwrap();
    drop(evt_tx);
    drop(cmd_tx);

    let device = device
        .run(evt_rx, cmd_rx, Script::new(Vec::new()), debouncer, opts)
        .await;

    assert_eq!(
        device.host().notifies(),
        vec![
            (kb, vec![0, 0, 0x12, 0, 0, 0, 0, 0]),
            (kb, vec![0; 8]),
            (kb, vec![0, 0, 0x0E, 0, 0, 0, 0, 0]),
            (kb, vec![0; 8]),
        ]
    );
}

#[test]
fn schema_declares_reports_in_capability_order() {
    let tree = build_schema(Capabilities::all());
    tree.validate().unwrap();
    let names: Vec<Attr> = tree.attributes().map(|a| a.name).collect();
    assert_eq!(
        names,
        vec![
            Attr::HidInfo,
            Attr::ReportMap,
            Attr::ControlPoint,
            Attr::ProtocolMode,
            Attr::KeyboardInput,
            Attr::KeyboardInputRef,
            Attr::KeyboardOutput,
            Attr::KeyboardOutputRef,
            Attr::ConsumerInput,
            Attr::ConsumerInputRef,
            Attr::BatteryLevel,
            Attr::ManufacturerName,
            Attr::ModelNumber,
            Attr::PnpId,
        ]
    );
    assert!(build_schema(Capabilities::default()).services.is_empty());
}

#[test]
fn shared_report_uuid_needs_report_references() {
    // both input reports notify on 0x2A4D
    let tree = build_schema(Capabilities::all());
    assert_eq!(tree.first_notify_duplicate(), Some((0x1812, 0x2A4D)));
    // input and LED output share the UUID, only one notifies
    assert_eq!(build_schema(keyboard_only()).first_notify_duplicate(), None);

    let mut stripped = build_schema(keyboard_only());
    for ch in &mut stripped.services[0].characteristics {
        ch.descriptors.clear();
    }
    assert_eq!(
        stripped.validate(),
        Err(RegistrationError::DuplicateUuid {
            service: 0x1812,
            uuid: 0x2A4D
        })
    );
}

#[tokio::test]
async fn zero_periods_do_not_stop_the_owner_loop() {
    use bluekey::device::LoopOptions;
    use std::time::Duration;
    use tokio::sync::mpsc;

    let device = started(keyboard_only()).await;
    let (evt_tx, evt_rx) = mpsc::channel(8);
    let (cmd_tx, cmd_rx) = mpsc::channel(8);
    let opts = LoopOptions {
        poll: Duration::ZERO,
        str_policy: StrPolicy::Abort,
        type_on_connect: None,
        host_battery: Some(Duration::ZERO),
    };

    evt_tx.send(HostEvent::Connected(ConnHandle(1))).await.unwrap();
    drop(evt_tx);
    drop(cmd_tx);

    let debouncer = Debouncer::new(Vec::<ButtonAction>::new(), DebouncePolicy::default());
    let device = device
        .run(evt_rx, cmd_rx, Script::new(Vec::new()), debouncer, opts)
        .await;
    assert_eq!(device.session().connection(), Some(ConnHandle(1)));
}
