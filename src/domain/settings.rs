use crate::domain::link::LinkConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSettings {
    #[serde(default = "default_level")]
    pub level: String, // "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_false")]
    pub file_logging_enabled: bool,
    #[serde(default = "default_true")]
    pub console_logging_enabled: bool,
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    #[serde(default = "default_prefix")]
    pub file_name_prefix: String,
    #[serde(default = "default_false")]
    pub show_file_line: bool,
    #[serde(default = "default_false")]
    pub show_thread_ids: bool,
    #[serde(default = "default_true")]
    pub show_target: bool,
    #[serde(default = "default_true")]
    pub ansi_colors: bool,
    #[serde(default = "default_rotation")]
    pub rotation: String, // "daily", "hourly", "minutely", "never"
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_level(),
            file_logging_enabled: default_false(),
            console_logging_enabled: default_true(),
            log_dir: default_log_dir(),
            file_name_prefix: default_prefix(),
            show_file_line: default_false(),
            show_thread_ids: default_false(),
            show_target: default_true(),
            ansi_colors: default_true(),
            rotation: default_rotation(),
        }
    }
}

/// Knobs for what the command surface forwards to the band
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchSettings {
    /// Forward ringing/idle phone state as call-event frames
    #[serde(default = "default_true")]
    pub call_alerts_enabled: bool,
    /// Send a time-sync frame as soon as services are ready
    #[serde(default = "default_false")]
    pub sync_time_on_ready: bool,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            call_alerts_enabled: default_true(),
            sync_time_on_ready: default_false(),
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}
fn default_true() -> bool {
    true
}
fn default_false() -> bool {
    false
}
fn default_log_dir() -> String {
    "logs".to_string()
}
fn default_prefix() -> String {
    "band_companion".to_string()
}
fn default_rotation() -> String {
    "daily".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    // Discovery
    #[serde(default = "default_device_name_prefix")]
    pub device_name_prefix: String,
    #[serde(default = "default_scan_window_ms")]
    pub scan_window_ms: u64,

    // Link supervision
    #[serde(default = "default_watchdog_timeout_ms")]
    pub watchdog_timeout_ms: u64,
    #[serde(default = "default_watchdog_tick_ms")]
    pub watchdog_tick_ms: u64,
    /// 0 disables polling reads
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_true")]
    pub read_on_ready: bool,

    #[serde(default)]
    pub dispatch: DispatchSettings,

    #[serde(default)]
    pub known_addresses: Vec<String>,
    #[serde(default)]
    pub last_connected_address: Option<String>,

    // Logging Settings
    #[serde(default)]
    pub log_settings: LogSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            device_name_prefix: default_device_name_prefix(),
            scan_window_ms: default_scan_window_ms(),
            watchdog_timeout_ms: default_watchdog_timeout_ms(),
            watchdog_tick_ms: default_watchdog_tick_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            read_on_ready: default_true(),
            dispatch: DispatchSettings::default(),
            known_addresses: Vec::new(),
            last_connected_address: None,
            log_settings: LogSettings::default(),
        }
    }
}

impl Settings {
    pub fn scan_window(&self) -> Duration {
        Duration::from_millis(self.scan_window_ms)
    }

    pub fn watchdog_tick(&self) -> Duration {
        // a zero period would make tokio::time::interval panic
        Duration::from_millis(self.watchdog_tick_ms.max(1))
    }

    pub fn poll_interval(&self) -> Option<Duration> {
        (self.poll_interval_ms > 0).then(|| Duration::from_millis(self.poll_interval_ms))
    }

    pub fn link_config(&self) -> LinkConfig {
        LinkConfig {
            watchdog_timeout: Duration::from_millis(self.watchdog_timeout_ms),
            read_on_ready: self.read_on_ready,
        }
    }
}

fn default_device_name_prefix() -> String {
    "BLE".to_string()
}
fn default_scan_window_ms() -> u64 {
    10_000
}
fn default_watchdog_timeout_ms() -> u64 {
    15_000
}
fn default_watchdog_tick_ms() -> u64 {
    1_000
}
fn default_poll_interval_ms() -> u64 {
    1_000
}

pub struct SettingsService {
    settings: Settings,
    settings_path: PathBuf,
}

impl SettingsService {
    pub fn new() -> anyhow::Result<Self> {
        let settings_path = Self::get_settings_path()?;
        Ok(Self::with_path(settings_path))
    }

    /// Load from an explicit file; a missing or unreadable file yields defaults
    pub fn with_path(settings_path: PathBuf) -> Self {
        let settings = match Self::load_from_file(&settings_path) {
            Ok(settings) => settings,
            Err(e) => {
                tracing::debug!(
                    "Using default settings ({}): {}",
                    settings_path.display(),
                    e
                );
                Settings::default()
            }
        };

        Self {
            settings,
            settings_path,
        }
    }

    fn get_settings_path() -> anyhow::Result<PathBuf> {
        let mut path = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        path.push("BandCompanion");
        path.push("settings.json");
        Ok(path)
    }

    pub fn load_from_file(path: &Path) -> anyhow::Result<Settings> {
        let contents = fs::read_to_string(path)?;
        let settings = serde_json::from_str(&contents)?;
        Ok(settings)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        if let Some(dir) = self.settings_path.parent() {
            fs::create_dir_all(dir)?;
        }
        let json = serde_json::to_string_pretty(&self.settings)?;
        fs::write(&self.settings_path, json)?;
        Ok(())
    }

    pub fn get(&self) -> &Settings {
        &self.settings
    }

    pub fn get_mut(&mut self) -> &mut Settings {
        &mut self.settings
    }

    pub fn path(&self) -> &Path {
        &self.settings_path
    }

    /// Record a successful connection and persist it
    pub fn remember_address(&mut self, address: &str) -> anyhow::Result<()> {
        if !self.settings.known_addresses.iter().any(|a| a == address) {
            self.settings.known_addresses.push(address.to_string());
        }
        self.settings.last_connected_address = Some(address.to_string());
        self.save()
    }
}
