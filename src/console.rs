//! Line-oriented stdin control.
//!
//! `press N` / `release N` drive the sampled level of input channel N, which
//! the owner loop polls like a GPIO pin. Everything else becomes a one-shot
//! [`AppCmd`]. With a simulated host, `connect` and `disconnect` are fed to
//! the host event channel.

use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use clap::ValueEnum;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use crate::gatt::{ConnHandle, HostEvent};
use crate::input::InputSource;
use crate::keymap::{ButtonAction, Key, keyboard_usage_to_modifier};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppCmd {
    Type(String),
    Key(Key),
    Media(u16),
    Action(ButtonAction),
    Battery(u8),
    Exit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Line {
    Press(usize),
    Release(usize),
    Connect(ConnHandle),
    Disconnect,
    Cmd(AppCmd),
}

/// Channel levels shared between the console task and the poll loop.
#[derive(Debug, Clone)]
pub struct Levels(Arc<[AtomicBool]>);

impl Levels {
    pub fn new(channels: usize) -> Self {
        Self((0..channels).map(|_| AtomicBool::new(false)).collect())
    }

    /// Returns false if `channel` does not exist.
    pub fn set(&self, channel: usize, active: bool) -> bool {
        match self.0.get(channel) {
            Some(level) => {
                level.store(active, Ordering::Relaxed);
                true
            }
            None => false,
        }
    }
}

impl InputSource for Levels {
    fn is_active(&mut self, channel: usize) -> bool {
        self.0
            .get(channel)
            .is_some_and(|level| level.load(Ordering::Relaxed))
    }
}

fn parse_hex(s: &str) -> Result<u16, String> {
    let digits = s.trim_start_matches("0x");
    u16::from_str_radix(digits, 16).map_err(|e| format!("bad hex {s:?}: {e}"))
}

fn parse_num<T: FromStr>(s: Option<&str>, what: &str) -> Result<T, String> {
    s.and_then(|s| s.parse().ok())
        .ok_or_else(|| format!("expected {what}"))
}

/// `e1+04` is Left Shift + A; modifier usages fold into the modifier byte,
/// the first other usage becomes the key.
fn parse_chord(s: &str) -> Result<Key, String> {
    let mut key = Key::new(0, 0);
    for part in s.split('+') {
        let usage = u8::try_from(parse_hex(part)?).map_err(|_| format!("usage {part} > 0xff"))?;
        match keyboard_usage_to_modifier(usage) {
            Some(bit) => key.modifier |= bit,
            None if key.usage == 0 => key.usage = usage,
            None => return Err("only one non-modifier key per chord".into()),
        }
    }
    Ok(key)
}

pub fn parse_line(line: &str) -> Result<Line, String> {
    let line = line.trim();
    let (word, rest) = line.split_once(' ').unwrap_or((line, ""));
    let mut args = rest.split_whitespace();
    match word {
        "press" | "p" => Ok(Line::Press(parse_num(args.next(), "channel number")?)),
        "release" | "r" => Ok(Line::Release(parse_num(args.next(), "channel number")?)),
        "connect" => {
            let conn = args.next().map(|s| parse_num(Some(s), "handle")).transpose()?;
            Ok(Line::Connect(ConnHandle(conn.unwrap_or(0))))
        }
        "disconnect" => Ok(Line::Disconnect),
        "type" => Ok(Line::Cmd(AppCmd::Type(rest.to_owned()))),
        "key" => Ok(Line::Cmd(AppCmd::Key(parse_chord(
            args.next().ok_or("expected usage")?,
        )?))),
        "media" => Ok(Line::Cmd(AppCmd::Media(parse_hex(
            args.next().ok_or("expected usage")?,
        )?))),
        "action" => {
            let name = args.next().ok_or("expected action name")?;
            ButtonAction::from_str(name, true).map(|a| Line::Cmd(AppCmd::Action(a)))
        }
        "battery" => Ok(Line::Cmd(AppCmd::Battery(parse_num(args.next(), "percent")?))),
        "quit" | "exit" => Ok(Line::Cmd(AppCmd::Exit)),
        other => Err(format!("unknown command {other:?}")),
    }
}

pub async fn console_task(
    levels: Levels,
    cmd_tx: mpsc::Sender<AppCmd>,
    sim_events: Option<mpsc::Sender<HostEvent>>,
) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                tracing::error!(error = %e, "stdin read error");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        let parsed = match parse_line(&line) {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::warn!(%e, "Ignoring console line");
                continue;
            }
        };
        tracing::trace!(?parsed, "Console");
        match parsed {
            Line::Press(ch) => set_level(&levels, ch, true),
            Line::Release(ch) => set_level(&levels, ch, false),
            Line::Connect(conn) => forward(&sim_events, HostEvent::Connected(conn)).await,
            Line::Disconnect => forward(&sim_events, HostEvent::Disconnected).await,
            Line::Cmd(cmd) => {
                let exit = cmd == AppCmd::Exit;
                if cmd_tx.send(cmd).await.is_err() || exit {
                    break;
                }
            }
        }
    }
}

fn set_level(levels: &Levels, channel: usize, active: bool) {
    if !levels.set(channel, active) {
        tracing::warn!(channel, "No such input channel");
    }
}

async fn forward(sim_events: &Option<mpsc::Sender<HostEvent>>, event: HostEvent) {
    match sim_events {
        Some(tx) => {
            let _ = tx.send(event).await;
        }
        None => tracing::warn!(?event, "Connection events come from the adapter, ignoring"),
    }
}
