//! WinRT Transport
//!
//! Real BLE transport on Windows. Advertisements, connection status changes
//! and characteristic notifications are forwarded into the service queue
//! from the WinRT callback threads.
//!
//! The band exposes no well-known UUIDs, so characteristics are picked by
//! property: the first one that can notify carries sensor frames and the
//! first writable one takes command frames.
//!
//! Opening the device and enumerating services run on spawned tasks that
//! report back through the queue, so neither call holds up the service loop.

use crate::domain::models::PeripheralHandle;
use crate::infrastructure::bluetooth::service::EventQueue;
use crate::infrastructure::bluetooth::transport::{
    PeripheralLink, PeripheralTransport, TransportError, TransportEvent,
};
use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use windows::Devices::Bluetooth::Advertisement::{
    BluetoothLEAdvertisementReceivedEventArgs, BluetoothLEAdvertisementWatcher,
    BluetoothLEScanningMode,
};
use windows::Devices::Bluetooth::GenericAttributeProfile::{
    GattCharacteristic, GattCharacteristicProperties,
    GattClientCharacteristicConfigurationDescriptorValue, GattCommunicationStatus, GattSession,
    GattValueChangedEventArgs,
};
use windows::Devices::Bluetooth::{BluetoothConnectionStatus, BluetoothLEDevice};
use windows::Foundation::TypedEventHandler;
use windows::Storage::Streams::{DataReader, DataWriter, IBuffer};

/// Format a 48-bit Bluetooth address as `AA:BB:CC:DD:EE:FF`
pub fn format_address(address: u64) -> String {
    let bytes = address.to_be_bytes();
    bytes[2..]
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(":")
}

/// Parse `AA:BB:CC:DD:EE:FF`, `AA-BB-...` or bare hex into a 48-bit address
pub fn parse_address(address: &str) -> Result<u64, TransportError> {
    let hex: String = address
        .trim()
        .trim_start_matches("0x")
        .chars()
        .filter(|c| *c != ':' && *c != '-')
        .collect();

    if hex.is_empty() || hex.len() > 12 {
        return Err(TransportError::InvalidAddress(address.to_string()));
    }
    u64::from_str_radix(&hex, 16).map_err(|_| TransportError::InvalidAddress(address.to_string()))
}

fn winrt_err(e: windows::core::Error) -> TransportError {
    TransportError::Gatt(e.message().to_string())
}

fn read_buffer(buffer: &IBuffer) -> windows::core::Result<Vec<u8>> {
    let reader = DataReader::FromBuffer(buffer)?;
    let length = reader.UnconsumedBufferLength()? as usize;
    let mut bytes = vec![0u8; length];
    reader.ReadBytes(&mut bytes)?;
    Ok(bytes)
}

pub struct WinRtTransport {
    queue: EventQueue,
    watcher: Option<BluetoothLEAdvertisementWatcher>,
}

impl WinRtTransport {
    pub fn new(queue: EventQueue) -> Self {
        Self {
            queue,
            watcher: None,
        }
    }
}

#[async_trait]
impl PeripheralTransport for WinRtTransport {
    type Link = WinRtLink;

    async fn start_discovery(&mut self) -> Result<(), TransportError> {
        self.stop_discovery().await?;
        info!("Starting BLE advertisement watcher");

        let watcher = BluetoothLEAdvertisementWatcher::new().map_err(|_| TransportError::Unavailable)?;
        watcher
            .SetScanningMode(BluetoothLEScanningMode::Active)
            .map_err(winrt_err)?;

        let queue = self.queue.clone();
        let handler = TypedEventHandler::new(
            move |_: windows::core::Ref<BluetoothLEAdvertisementWatcher>,
                  args: windows::core::Ref<BluetoothLEAdvertisementReceivedEventArgs>| {
                if let Some(args) = args.as_ref() {
                    let name = args.Advertisement()?.LocalName()?.to_string();
                    // the registry filters by name, nameless adverts are useless
                    if !name.is_empty() {
                        let peripheral = PeripheralHandle::new(
                            format_address(args.BluetoothAddress()?),
                            name,
                            args.RawSignalStrengthInDBm()?,
                        );
                        queue.transport(TransportEvent::DeviceDiscovered(peripheral));
                    }
                }
                Ok(())
            },
        );

        watcher.Received(&handler).map_err(winrt_err)?;
        watcher.Start().map_err(winrt_err)?;
        self.watcher = Some(watcher);
        Ok(())
    }

    async fn stop_discovery(&mut self) -> Result<(), TransportError> {
        if let Some(watcher) = self.watcher.take() {
            info!("Stopping BLE advertisement watcher");
            watcher.Stop().map_err(winrt_err)?;
        }
        Ok(())
    }

    async fn connect(&mut self, address: &str) -> Result<WinRtLink, TransportError> {
        let raw = parse_address(address)?;
        info!("Opening BLE device {:#X}", raw);

        let handles = Arc::new(Mutex::new(GattHandles::default()));
        let queue = self.queue.clone();
        let shared = handles.clone();
        let opener = tokio::spawn(async move {
            if let Err(e) = open_device(raw, &shared, &queue).await {
                warn!("Could not open BLE device: {}", e);
                queue.transport(TransportEvent::LinkDown);
            }
        });

        Ok(WinRtLink {
            queue: self.queue.clone(),
            handles,
            tasks: vec![opener],
        })
    }
}

impl Drop for WinRtTransport {
    fn drop(&mut self) {
        if let Some(watcher) = self.watcher.take() {
            let _ = watcher.Stop();
        }
    }
}

/// WinRT objects owned by one link, filled in by its background tasks
#[derive(Default)]
struct GattHandles {
    device: Option<BluetoothLEDevice>,
    session: Option<GattSession>,
    data: Option<GattCharacteristic>,
    command: Option<GattCharacteristic>,
}

fn lock(handles: &Mutex<GattHandles>) -> Result<MutexGuard<'_, GattHandles>, TransportError> {
    handles
        .lock()
        .map_err(|_| TransportError::Io("link handles poisoned".to_string()))
}

/// Open the device and its GATT session, then report `LinkUp` if already connected
async fn open_device(
    raw: u64,
    handles: &Mutex<GattHandles>,
    queue: &EventQueue,
) -> Result<(), TransportError> {
    let device = BluetoothLEDevice::FromBluetoothAddressAsync(raw)
        .map_err(winrt_err)?
        .await
        .map_err(|e| TransportError::ConnectFailed(e.message().to_string()))?;

    let status_queue = queue.clone();
    let status_handler =
        TypedEventHandler::new(move |dev: windows::core::Ref<BluetoothLEDevice>, _| {
            if let Some(dev) = dev.as_ref() {
                let event = match dev.ConnectionStatus()? {
                    BluetoothConnectionStatus::Connected => TransportEvent::LinkUp,
                    _ => TransportEvent::LinkDown,
                };
                status_queue.transport(event);
            }
            Ok(())
        });
    device
        .ConnectionStatusChanged(&status_handler)
        .map_err(winrt_err)?;

    // A maintained GATT session is what actually brings the link up
    let device_id = device.BluetoothDeviceId().map_err(winrt_err)?;
    let session = match GattSession::FromDeviceIdAsync(&device_id)
        .map_err(winrt_err)?
        .await
    {
        Ok(session) => {
            let _ = session.SetMaintainConnection(true);
            Some(session)
        }
        Err(e) => {
            warn!("Could not create GATT session: {}", e.message());
            None
        }
    };

    let connected =
        device.ConnectionStatus().map_err(winrt_err)? == BluetoothConnectionStatus::Connected;
    {
        let mut guard = lock(handles)?;
        guard.device = Some(device);
        guard.session = session;
    }
    if connected {
        queue.transport(TransportEvent::LinkUp);
    }
    Ok(())
}

/// Pick the data and command characteristics and hook up notifications
///
/// Returns `true` when both were found.
async fn enumerate(
    device: BluetoothLEDevice,
    handles: &Mutex<GattHandles>,
    queue: &EventQueue,
) -> windows::core::Result<bool> {
    let services = device.GetGattServicesAsync()?.await?;
    if services.Status()? != GattCommunicationStatus::Success {
        warn!("Failed to get GATT services: {:?}", services.Status()?);
        return Ok(false);
    }

    let mut data: Option<GattCharacteristic> = None;
    let mut command: Option<GattCharacteristic> = None;

    let services = services.Services()?;
    for i in 0..services.Size()? {
        let service = services.GetAt(i)?;
        let chars = service.GetCharacteristicsAsync()?.await?;
        if chars.Status()? != GattCommunicationStatus::Success {
            continue;
        }

        let chars = chars.Characteristics()?;
        for j in 0..chars.Size()? {
            let c = chars.GetAt(j)?;
            let props = c.CharacteristicProperties()?;

            if data.is_none() && props.contains(GattCharacteristicProperties::Notify) {
                debug!("Data characteristic: {:?}", c.Uuid()?);
                data = Some(c.clone());
            }
            if command.is_none()
                && (props.contains(GattCharacteristicProperties::Write)
                    || props.contains(GattCharacteristicProperties::WriteWithoutResponse))
            {
                debug!("Command characteristic: {:?}", c.Uuid()?);
                command = Some(c);
            }
        }
    }

    let Some(data) = data else {
        return Ok(false);
    };

    let value_queue = queue.clone();
    let handler = TypedEventHandler::new(
        move |_: windows::core::Ref<GattCharacteristic>,
              args: windows::core::Ref<GattValueChangedEventArgs>| {
            if let Some(args) = args.as_ref() {
                let bytes = read_buffer(&args.CharacteristicValue()?)?;
                value_queue.transport(TransportEvent::DataAvailable(bytes));
            }
            Ok(())
        },
    );
    data.ValueChanged(&handler)?;

    let ok = command.is_some();
    if let Ok(mut guard) = handles.lock() {
        guard.data = Some(data);
        guard.command = command;
    }
    Ok(ok)
}

pub struct WinRtLink {
    queue: EventQueue,
    handles: Arc<Mutex<GattHandles>>,
    tasks: Vec<JoinHandle<()>>,
}

impl WinRtLink {
    fn data(&self) -> Result<GattCharacteristic, TransportError> {
        lock(&self.handles)?
            .data
            .clone()
            .ok_or(TransportError::NotConnected)
    }
}

#[async_trait]
impl PeripheralLink for WinRtLink {
    async fn discover_services(&mut self) -> Result<(), TransportError> {
        let device = lock(&self.handles)?
            .device
            .clone()
            .ok_or(TransportError::NotConnected)?;

        let queue = self.queue.clone();
        let handles = self.handles.clone();
        self.tasks.push(tokio::spawn(async move {
            let ok = match enumerate(device, &handles, &queue).await {
                Ok(ok) => ok,
                Err(e) => {
                    warn!("Service enumeration failed: {}", e.message());
                    false
                }
            };
            queue.transport(TransportEvent::ServicesDiscovered { ok });
        }));
        Ok(())
    }

    async fn write_frame(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        let command = lock(&self.handles)?
            .command
            .clone()
            .ok_or(TransportError::NotConnected)?;

        let writer = DataWriter::new().map_err(winrt_err)?;
        writer.WriteBytes(frame).map_err(winrt_err)?;
        let buffer = writer.DetachBuffer().map_err(winrt_err)?;

        let status = command
            .WriteValueAsync(&buffer)
            .map_err(winrt_err)?
            .await
            .map_err(|e| TransportError::Io(e.message().to_string()))?;
        if status != GattCommunicationStatus::Success {
            return Err(TransportError::Gatt(format!("write returned {:?}", status)));
        }
        Ok(())
    }

    async fn read_frame(&mut self) -> Result<Vec<u8>, TransportError> {
        let data = self.data()?;

        let result = data
            .ReadValueAsync()
            .map_err(winrt_err)?
            .await
            .map_err(|e| TransportError::Io(e.message().to_string()))?;
        let status = result.Status().map_err(winrt_err)?;
        if status != GattCommunicationStatus::Success {
            return Err(TransportError::Gatt(format!("read returned {:?}", status)));
        }
        read_buffer(&result.Value().map_err(winrt_err)?).map_err(winrt_err)
    }

    async fn set_notify(&mut self, enabled: bool) -> Result<(), TransportError> {
        let data = self.data()?;
        let value = if enabled {
            GattClientCharacteristicConfigurationDescriptorValue::Notify
        } else {
            GattClientCharacteristicConfigurationDescriptorValue::None
        };

        let status = data
            .WriteClientCharacteristicConfigurationDescriptorAsync(value)
            .map_err(winrt_err)?
            .await
            .map_err(winrt_err)?;
        if status != GattCommunicationStatus::Success {
            return Err(TransportError::Gatt(format!(
                "notification subscription returned {:?}",
                status
            )));
        }
        info!("Notifications {}", if enabled { "enabled" } else { "disabled" });
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        for task in self.tasks.drain(..) {
            task.abort();
        }

        let (session, device) = {
            let mut guard = lock(&self.handles)?;
            guard.data = None;
            guard.command = None;
            (guard.session.take(), guard.device.take())
        };
        if let Some(session) = session {
            let _ = session.Close();
        }
        if let Some(device) = device {
            info!("Closing BLE device");
            device.Close().map_err(winrt_err)?;
        }
        Ok(())
    }
}
