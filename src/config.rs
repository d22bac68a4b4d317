use std::time::Duration;

use clap::Parser;

use crate::device::{DeviceSettings, LoopOptions};
use crate::gatt::{Capabilities, Capability, PnpId};
use crate::input::DebouncePolicy;
use crate::keymap::ButtonAction;
use crate::transmit::StrPolicy;

/// BLE HID keyboard / media-key peripheral.
#[derive(Debug, Clone, Parser)]
#[command(version, about)]
pub struct Config {
    /// GAP device name, also the advertised local name
    #[arg(long, default_value = "BlueKey")]
    pub name: String,

    /// Services to expose (repeatable); all of them when omitted
    #[arg(long = "capability", value_enum)]
    pub capabilities: Vec<Capability>,

    /// Action bound to each input channel, in channel order (repeatable)
    #[arg(long = "button", value_enum, default_values_t = [ButtonAction::Screenshot, ButtonAction::VolumeUp])]
    pub buttons: Vec<ButtonAction>,

    /// Input poll interval in milliseconds
    #[arg(long, default_value_t = 10, value_parser = clap::value_parser!(u64).range(1..))]
    pub poll_ms: u64,

    /// Inactive time before a pressed channel counts as released
    #[arg(long, default_value_t = 20)]
    pub debounce_ms: u64,

    /// Advertising interval in microseconds
    #[arg(long, default_value_t = 100_000)]
    pub adv_interval_us: u32,

    /// What to do with characters that have no key mapping
    #[arg(long, value_enum, default_value_t = StrPolicy::Abort)]
    pub str_policy: StrPolicy,

    /// Text typed once the first peer connects
    #[arg(long = "type")]
    pub type_text: Option<String>,

    /// Initial battery level in percent
    #[arg(long, default_value_t = 100, value_parser = clap::value_parser!(u8).range(0..=100))]
    pub battery: u8,

    /// Mirror the host's own battery level every N seconds
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    pub host_battery_secs: Option<u64>,

    #[arg(long, default_value = "BlueKey")]
    pub manufacturer: String,

    #[arg(long, default_value = "BlueKey-1")]
    pub model: String,

    /// PnP vendor id (USB-IF assigned)
    #[arg(long, default_value_t = 0x1209)]
    pub vendor_id: u16,

    #[arg(long, default_value_t = 0x0001)]
    pub product_id: u16,

    #[arg(long, default_value_t = 0x0100)]
    pub product_version: u16,

    /// Run against the in-memory host stack instead of the adapter
    #[arg(long)]
    pub simulate: bool,
}

impl Config {
    pub fn capabilities(&self) -> Capabilities {
        if self.capabilities.is_empty() {
            Capabilities::all()
        } else {
            self.capabilities.iter().copied().collect()
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_ms)
    }

    pub fn debounce_policy(&self) -> DebouncePolicy {
        DebouncePolicy::from_timing(self.poll_interval(), Duration::from_millis(self.debounce_ms))
    }

    pub fn device_settings(&self) -> DeviceSettings {
        DeviceSettings {
            name: self.name.clone(),
            capabilities: self.capabilities(),
            adv_interval_us: self.adv_interval_us,
            battery: self.battery,
            manufacturer: self.manufacturer.clone(),
            model: self.model.clone(),
            pnp: PnpId {
                vendor_id_source: 0x02,
                vendor_id: self.vendor_id,
                product_id: self.product_id,
                product_version: self.product_version,
            },
        }
    }

    pub fn loop_options(&self) -> LoopOptions {
        LoopOptions {
            poll: self.poll_interval(),
            str_policy: self.str_policy,
            type_on_connect: self.type_text.clone(),
            host_battery: self.host_battery_secs.map(Duration::from_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = Config::parse_from(["bluekey"]);
        assert_eq!(config.capabilities(), Capabilities::all());
        assert_eq!(config.buttons, vec![ButtonAction::Screenshot, ButtonAction::VolumeUp]);
        assert_eq!(config.debounce_policy().release_samples, 2);
        assert_eq!(config.device_settings().pnp.vendor_id_source, 0x02);
    }

    #[test]
    fn capability_subset() {
        let config =
            Config::parse_from(["bluekey", "--capability", "keyboard", "--capability", "battery"]);
        let caps = config.capabilities();
        assert!(caps.keyboard && caps.battery);
        assert!(!caps.consumer && !caps.device_info);
    }

    #[test]
    fn rejects_out_of_range_battery() {
        assert!(Config::try_parse_from(["bluekey", "--battery", "101"]).is_err());
    }

    #[test]
    fn rejects_zero_periods() {
        assert!(Config::try_parse_from(["bluekey", "--host-battery-secs", "0"]).is_err());
        assert!(Config::try_parse_from(["bluekey", "--poll-ms", "0"]).is_err());

        let config = Config::parse_from(["bluekey", "--host-battery-secs", "30"]);
        assert_eq!(config.loop_options().host_battery, Some(Duration::from_secs(30)));
    }
}
