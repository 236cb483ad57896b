//! Command Dispatch
//!
//! Turns user intent and phone-state changes into command frames. The
//! service owns one [`CommandDispatcher`] and writes whatever it returns.

use crate::domain::settings::DispatchSettings;
use crate::infrastructure::bluetooth::protocol::{self, CommandFrame};
use chrono::{Datelike, Timelike};
use tracing::debug;

/// Placeholder "number" the band shows for a new text message
pub const SMS_ALERT_MARKER: &str = "xyz";

/// Phone state as reported by the host telephony stack
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TelephonyEvent {
    Ringing(Option<String>),
    OffHook(Option<String>),
    Idle(Option<String>),
    /// A text message arrived; sender and body are not forwarded
    SmsReceived,
}

/// Requests accepted by the companion service
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    StartScan,
    StopScan,
    Connect(String),
    Disconnect,
    /// Push the host clock to the band
    SyncTime,
    CallEvent {
        ringing: bool,
        number: Option<String>,
    },
    Telephony(TelephonyEvent),
    /// One-off read of the sensor characteristic
    Read,
    Shutdown,
}

pub struct CommandDispatcher {
    settings: DispatchSettings,
}

impl CommandDispatcher {
    pub fn new(settings: DispatchSettings) -> Self {
        Self { settings }
    }

    pub fn time_sync<T: Datelike + Timelike>(&self, now: &T) -> CommandFrame {
        protocol::encode_time_sync(now)
    }

    pub fn call_event(&self, ringing: bool, number: Option<&str>) -> CommandFrame {
        protocol::encode_call_event(ringing, number)
    }

    /// Ringing maps to an enabled call event, an SMS to an enabled call
    /// event carrying [`SMS_ALERT_MARKER`], and every other state clears it.
    /// Returns `None` when call alerts are switched off.
    pub fn telephony(&self, event: &TelephonyEvent) -> Option<CommandFrame> {
        if !self.settings.call_alerts_enabled {
            debug!("Call alerts disabled, ignoring {:?}", event);
            return None;
        }

        let frame = match event {
            TelephonyEvent::Ringing(number) => self.call_event(true, number.as_deref()),
            TelephonyEvent::OffHook(number) | TelephonyEvent::Idle(number) => {
                self.call_event(false, number.as_deref())
            }
            TelephonyEvent::SmsReceived => self.call_event(true, Some(SMS_ALERT_MARKER)),
        };
        Some(frame)
    }

    pub fn sync_time_on_ready(&self) -> bool {
        self.settings.sync_time_on_ready
    }
}
