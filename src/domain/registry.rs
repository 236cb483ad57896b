use crate::domain::models::PeripheralHandle;
use tracing::debug;

/// Peripherals found during the current scan session, in discovery order
#[derive(Debug, Clone)]
pub struct DeviceRegistry {
    name_prefix: String,
    devices: Vec<PeripheralHandle>,
}

impl DeviceRegistry {
    pub fn new(name_prefix: impl Into<String>) -> Self {
        Self {
            name_prefix: name_prefix.into(),
            devices: Vec::new(),
        }
    }

    /// Returns `true` when the peripheral was stored
    ///
    /// Devices whose name lacks the prefix are dropped, and so are devices
    /// already present: the first-seen record (and its signal strength) wins.
    pub fn add(&mut self, peripheral: PeripheralHandle) -> bool {
        if !peripheral.name.starts_with(&self.name_prefix) {
            return false;
        }
        if self.devices.iter().any(|d| d.id == peripheral.id) {
            return false;
        }

        debug!(
            "Registered {} ({}) at {} dBm",
            peripheral.name, peripheral.id, peripheral.signal_strength
        );
        self.devices.push(peripheral);
        true
    }

    pub fn clear(&mut self) {
        self.devices.clear();
    }

    pub fn list(&self) -> &[PeripheralHandle] {
        &self.devices
    }

    pub fn get(&self, id: &str) -> Option<&PeripheralHandle> {
        self.devices.iter().find(|d| d.id == id)
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn name_prefix(&self) -> &str {
        &self.name_prefix
    }
}
