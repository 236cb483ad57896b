use crate::infrastructure::bluetooth::protocol::{CommandKind, FrameError, SensorReading};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A peripheral seen during a scan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeripheralHandle {
    /// Transport specific identifier (MAC address, WinRT address, ...)
    pub id: String,
    pub name: String,
    /// RSSI in dBm at the time the device was first seen
    pub signal_strength: i16,
}

impl PeripheralHandle {
    pub fn new(id: impl Into<String>, name: impl Into<String>, signal_strength: i16) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            signal_strength,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
    ServicesReady,
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::ServicesReady => "ready",
        };
        f.write_str(s)
    }
}

/// Why a session ended up in `Disconnected`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DisconnectCause {
    UserRequested,
    ConnectFailed,
    EnumerationFailed,
    LinkLost,
    WatchdogTimeout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    Idle,
    Scanning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanStopReason {
    Requested,
    WindowElapsed,
}

/// Latest decoded reading plus the moment it was decoded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadingSnapshot {
    pub reading: SensorReading,
    pub received_at: DateTime<Local>,
}

/// Everything the controller reports to the outside world
#[derive(Debug, Clone)]
pub enum AppEvent {
    LinkState {
        state: LinkState,
        cause: Option<DisconnectCause>,
    },
    ScanStarted,
    ScanStopped(ScanStopReason),
    DeviceFound(PeripheralHandle),
    Reading(ReadingSnapshot),
    ReadingCleared,
    FrameRejected(FrameError),
    FrameSent(CommandKind),
    TransportError(String),
    LogMessage(StatusMessage),
}

#[derive(Debug, Clone)]
pub struct StatusMessage {
    pub message: String,
    pub severity: MessageSeverity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageSeverity {
    Info,
    Success,
    Warning,
    Error,
}
