//! Report Transmitter: press-and-release pulses over the session.

use crate::error::{TransmitError, UnsupportedInput};
use crate::gatt::{Attr, AttrHandle, HandleMap, HostStack, Session};
use crate::hid::{Report, ReportKind, encode_battery, encode_consumer, keyboard_report};
use crate::keymap::{ButtonAction, Key, Pulse, char_to_key};

/// What `send_str` does with a character the keymap cannot produce.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum StrPolicy {
    /// Reject the whole string before anything is sent.
    #[default]
    Abort,
    /// Log and skip the character, send the rest.
    #[value(name = "skip")]
    SkipUnsupported,
}

/// Report characteristic handles, resolved once at construction.
#[derive(Debug, Clone, Copy)]
pub struct Transmitter {
    keyboard: Option<AttrHandle>,
    consumer: Option<AttrHandle>,
    battery: Option<AttrHandle>,
}

impl Transmitter {
    pub fn new(handles: &HandleMap) -> Self {
        Self {
            keyboard: handles.get(Attr::KeyboardInput),
            consumer: handles.get(Attr::ConsumerInput),
            battery: handles.get(Attr::BatteryLevel),
        }
    }

    fn handle_for(&self, kind: ReportKind) -> Result<AttrHandle, TransmitError> {
        match kind {
            ReportKind::Keyboard => self.keyboard,
            ReportKind::Consumer => self.consumer,
            ReportKind::Battery => self.battery,
        }
        .ok_or(TransmitError::Unsupported(kind))
    }

    /// Notifies `report`, then the neutral report of the same kind, through
    /// the same handle. Both notifies go out even if the first fails, so a
    /// host never sees a press without its release; the first failure is
    /// returned.
    pub async fn press_and_release<H: HostStack>(
        &self,
        host: &mut H,
        session: &Session,
        report: Report,
    ) -> Result<(), TransmitError> {
        let conn = session.connection().ok_or(TransmitError::NotConnected)?;
        let kind = report.kind();
        let handle = self.handle_for(kind)?;
        let neutral = Report::neutral(kind);

        tracing::trace!(?kind, %handle, bytes = ?report.as_bytes(), "TX press");
        let pressed = host.notify(conn, handle, report.as_bytes()).await;
        tracing::trace!(?kind, %handle, "TX release");
        let released = host.notify(conn, handle, neutral.as_bytes()).await;

        pressed?;
        released?;
        Ok(())
    }

    pub async fn send_key<H: HostStack>(
        &self,
        host: &mut H,
        session: &Session,
        key: Key,
    ) -> Result<(), TransmitError> {
        self.press_and_release(host, session, keyboard_report(key.modifier, &[key.usage]))
            .await
    }

    pub async fn send_media<H: HostStack>(
        &self,
        host: &mut H,
        session: &Session,
        usage: u16,
    ) -> Result<(), TransmitError> {
        self.press_and_release(host, session, Report::Consumer(encode_consumer(usage)))
            .await
    }

    pub async fn send_char<H: HostStack>(
        &self,
        host: &mut H,
        session: &Session,
        c: char,
    ) -> Result<(), TransmitError> {
        let key = char_to_key(c)?;
        self.send_key(host, session, key).await
    }

    /// Types `text` one pulse per character, in order. Returns how many
    /// characters were sent. Transport errors stop the string under either
    /// policy.
    pub async fn send_str<H: HostStack>(
        &self,
        host: &mut H,
        session: &Session,
        text: &str,
        policy: StrPolicy,
    ) -> Result<usize, TransmitError> {
        let keys: Vec<Result<Key, UnsupportedInput>> = text.chars().map(char_to_key).collect();
        if policy == StrPolicy::Abort {
            if let Some(Err(err)) = keys.iter().find(|k| k.is_err()) {
                return Err((*err).into());
            }
        }

        let mut sent = 0;
        for key in keys {
            match key {
                Ok(key) => {
                    self.send_key(host, session, key).await?;
                    sent += 1;
                }
                Err(UnsupportedInput(c)) => {
                    tracing::warn!(?c, "Skipping unsupported character");
                }
            }
        }
        Ok(sent)
    }

    pub async fn perform<H: HostStack>(
        &self,
        host: &mut H,
        session: &Session,
        action: ButtonAction,
    ) -> Result<(), TransmitError> {
        tracing::debug!(?action, "Perform");
        match action.pulse() {
            Pulse::Key(key) => self.send_key(host, session, key).await,
            Pulse::Media(usage) => self.send_media(host, session, usage).await,
        }
    }

    /// Battery is a level, not a pulse: the resting value is always updated
    /// and a connected peer is notified once.
    pub async fn set_battery<H: HostStack>(
        &self,
        host: &mut H,
        session: &Session,
        percent: u8,
    ) -> Result<(), TransmitError> {
        let value = encode_battery(percent)?;
        let handle = self.handle_for(ReportKind::Battery)?;
        session.write_static(host, handle, &value).await?;
        if let Some(conn) = session.connection() {
            host.notify(conn, handle, &value).await?;
        }
        tracing::info!(%percent, "Battery set");
        Ok(())
    }
}
