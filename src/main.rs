use clap::Parser;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use bluekey::ble::PeripheralHost;
use bluekey::config::Config;
use bluekey::console::{Levels, console_task};
use bluekey::device::{Device, DeviceSettings};
use bluekey::gatt::{HostEvent, HostStack};
use bluekey::input::Debouncer;
use bluekey::sim::SimHost;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = Config::parse();
    tracing::debug!(?config, "Config");

    let levels = Levels::new(config.buttons.len());
    let (cmd_tx, cmd_rx) = mpsc::channel(32);

    if config.simulate {
        let (evt_tx, evt_rx) = mpsc::channel::<HostEvent>(256);
        tokio::spawn(console_task(levels.clone(), cmd_tx, Some(evt_tx)));
        let settings = config.device_settings();
        run(SimHost::new(), &settings, evt_rx, cmd_rx, levels, &config).await
    } else {
        let (evt_tx, evt_rx) = mpsc::channel(256);
        let mut settings = config.device_settings();
        if config.capabilities.is_empty() {
            // the adapter notifies by UUID and cannot tell two input reports apart
            settings.capabilities.consumer = false;
            tracing::info!("Consumer control left out, pass --capability to force it");
        }
        let host = PeripheralHost::new(evt_tx).await?;
        tokio::spawn(console_task(levels.clone(), cmd_tx, None));
        run(host, &settings, evt_rx, cmd_rx, levels, &config).await
    }
}

async fn run<H: HostStack>(
    host: H,
    settings: &DeviceSettings,
    events: mpsc::Receiver<H::Event>,
    commands: mpsc::Receiver<bluekey::console::AppCmd>,
    levels: Levels,
    config: &Config,
) -> anyhow::Result<()> {
    let device = Device::start(host, settings).await?;
    let debouncer = Debouncer::new(config.buttons.clone(), config.debounce_policy());
    device
        .run(events, commands, levels, debouncer, config.loop_options())
        .await;
    Ok(())
}
