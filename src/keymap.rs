//! Keycode Mapper: characters and named actions to keyboard usages.

use crate::error::UnsupportedInput;

pub const MOD_LCTRL: u8 = 1 << 0;
pub const MOD_LSHIFT: u8 = 1 << 1;
pub const MOD_LALT: u8 = 1 << 2;
pub const MOD_LGUI: u8 = 1 << 3;
pub const MOD_RCTRL: u8 = 1 << 4;
pub const MOD_RSHIFT: u8 = 1 << 5;
pub const MOD_RALT: u8 = 1 << 6;
pub const MOD_RGUI: u8 = 1 << 7;

pub const USAGE_A: u8 = 0x04;
pub const USAGE_SPACE: u8 = 0x2C;
pub const USAGE_PRINT_SCREEN: u8 = 0x46;

/// A keyboard usage together with the modifier bits it needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Key {
    pub modifier: u8,
    pub usage: u8,
}

impl Key {
    pub const fn new(modifier: u8, usage: u8) -> Self {
        Self { modifier, usage }
    }
}

/// Maps space and ASCII letters per the HID keyboard usage table.
pub fn char_to_key(c: char) -> Result<Key, UnsupportedInput> {
    match c {
        ' ' => Ok(Key::new(0, USAGE_SPACE)),
        'a'..='z' => Ok(Key::new(0, USAGE_A + (c as u8 - b'a'))),
        'A'..='Z' => Ok(Key::new(MOD_LSHIFT, USAGE_A + (c as u8 - b'A'))),
        _ => Err(UnsupportedInput(c)),
    }
}

pub fn keyboard_usage_to_modifier(usage: u8) -> Option<u8> {
    match usage {
        0xE0 => Some(MOD_LCTRL),
        0xE1 => Some(MOD_LSHIFT),
        0xE2 => Some(MOD_LALT),
        0xE3 => Some(MOD_LGUI),
        0xE4 => Some(MOD_RCTRL),
        0xE5 => Some(MOD_RSHIFT),
        0xE6 => Some(MOD_RALT),
        0xE7 => Some(MOD_RGUI),
        _ => None,
    }
}

/// What a named action sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pulse {
    Key(Key),
    Media(u16),
}

/// Actions a physical button can be bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ButtonAction {
    Screenshot,
    VolumeUp,
    VolumeDown,
    Mute,
    PlayPause,
    NextTrack,
    PrevTrack,
}

impl ButtonAction {
    pub fn pulse(self) -> Pulse {
        use crate::hid::consumer;
        match self {
            ButtonAction::Screenshot => Pulse::Key(Key::new(0, USAGE_PRINT_SCREEN)),
            ButtonAction::VolumeUp => Pulse::Media(consumer::VOLUME_UP),
            ButtonAction::VolumeDown => Pulse::Media(consumer::VOLUME_DOWN),
            ButtonAction::Mute => Pulse::Media(consumer::MUTE),
            ButtonAction::PlayPause => Pulse::Media(consumer::PLAY_PAUSE),
            ButtonAction::NextTrack => Pulse::Media(consumer::NEXT_TRACK),
            ButtonAction::PrevTrack => Pulse::Media(consumer::PREV_TRACK),
        }
    }
}
