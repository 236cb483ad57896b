//! Simulated Band
//!
//! In-process stand-in for a real adapter. It advertises a couple of bands,
//! comes up shortly after a connect request and produces plausible sensor
//! frames, all through the same service queue a radio transport would use.

use crate::domain::models::PeripheralHandle;
use crate::infrastructure::bluetooth::protocol::{self, COMMAND_FRAME_LEN};
use crate::infrastructure::bluetooth::service::EventQueue;
use crate::infrastructure::bluetooth::transport::{
    PeripheralLink, PeripheralTransport, TransportError, TransportEvent,
};
use async_trait::async_trait;
use chrono::{Datelike, Local, Timelike};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Timings used by the simulated band
#[derive(Debug, Clone)]
pub struct SimulationConfig {
    pub advertise_interval: Duration,
    pub connect_delay: Duration,
    pub discovery_delay: Duration,
    pub notify_interval: Duration,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            advertise_interval: Duration::from_millis(300),
            connect_delay: Duration::from_millis(500),
            discovery_delay: Duration::from_millis(200),
            notify_interval: Duration::from_secs(2),
        }
    }
}

/// Peripherals the simulated adapter advertises, in order
pub fn simulated_peripherals() -> Vec<PeripheralHandle> {
    vec![
        PeripheralHandle::new("C0:FF:EE:00:00:01", "BLE-Band", -58),
        PeripheralHandle::new("C0:FF:EE:00:00:02", "BLE-Band Pro", -71),
        PeripheralHandle::new("12:34:56:78:9A:BC", "Headphones", -40),
        // same band again, louder
        PeripheralHandle::new("C0:FF:EE:00:00:01", "BLE-Band", -45),
    ]
}

pub struct SimulatedTransport {
    queue: EventQueue,
    config: SimulationConfig,
    advertiser: Option<JoinHandle<()>>,
}

impl SimulatedTransport {
    pub fn new(queue: EventQueue) -> Self {
        Self::with_config(queue, SimulationConfig::default())
    }

    pub fn with_config(queue: EventQueue, config: SimulationConfig) -> Self {
        Self {
            queue,
            config,
            advertiser: None,
        }
    }
}

#[async_trait]
impl PeripheralTransport for SimulatedTransport {
    type Link = SimulatedLink;

    async fn start_discovery(&mut self) -> Result<(), TransportError> {
        self.stop_discovery().await?;
        info!("Simulated adapter advertising");

        let queue = self.queue.clone();
        let interval = self.config.advertise_interval;
        self.advertiser = Some(tokio::spawn(async move {
            for peripheral in simulated_peripherals() {
                tokio::time::sleep(interval).await;
                if !queue.transport(TransportEvent::DeviceDiscovered(peripheral)) {
                    break;
                }
            }
        }));
        Ok(())
    }

    async fn stop_discovery(&mut self) -> Result<(), TransportError> {
        if let Some(advertiser) = self.advertiser.take() {
            advertiser.abort();
        }
        Ok(())
    }

    async fn connect(&mut self, address: &str) -> Result<SimulatedLink, TransportError> {
        if !address.contains(':') {
            return Err(TransportError::InvalidAddress(address.to_string()));
        }

        let queue = self.queue.clone();
        let delay = self.config.connect_delay;
        let pending = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.transport(TransportEvent::LinkUp);
        });

        Ok(SimulatedLink {
            queue: self.queue.clone(),
            config: self.config.clone(),
            address: address.to_string(),
            tasks: vec![pending],
            notifier: None,
            samples: 0,
        })
    }
}

impl Drop for SimulatedTransport {
    fn drop(&mut self) {
        if let Some(advertiser) = self.advertiser.take() {
            advertiser.abort();
        }
    }
}

pub struct SimulatedLink {
    queue: EventQueue,
    config: SimulationConfig,
    address: String,
    tasks: Vec<JoinHandle<()>>,
    notifier: Option<JoinHandle<()>>,
    samples: u32,
}

impl SimulatedLink {
    fn next_frame(&mut self) -> Vec<u8> {
        self.samples = self.samples.wrapping_add(1);
        sample_frame(self.samples)
    }
}

#[async_trait]
impl PeripheralLink for SimulatedLink {
    async fn discover_services(&mut self) -> Result<(), TransportError> {
        let queue = self.queue.clone();
        let delay = self.config.discovery_delay;
        self.tasks.push(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.transport(TransportEvent::ServicesDiscovered { ok: true });
        }));
        Ok(())
    }

    async fn write_frame(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        if frame.len() != COMMAND_FRAME_LEN {
            return Err(TransportError::Io(format!(
                "command frame must be {} bytes, got {}",
                COMMAND_FRAME_LEN,
                frame.len()
            )));
        }
        info!("{} <- {}", self.address, protocol::to_hex(frame));
        Ok(())
    }

    async fn read_frame(&mut self) -> Result<Vec<u8>, TransportError> {
        Ok(self.next_frame())
    }

    async fn set_notify(&mut self, enabled: bool) -> Result<(), TransportError> {
        if let Some(notifier) = self.notifier.take() {
            notifier.abort();
        }
        if !enabled {
            return Ok(());
        }

        let queue = self.queue.clone();
        let period = self.config.notify_interval;
        // notifications count down from a separate sample stream
        let mut sample = u32::MAX / 2;
        self.notifier = Some(tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            loop {
                ticker.tick().await;
                sample = sample.wrapping_add(1);
                if !queue.transport(TransportEvent::DataAvailable(sample_frame(sample))) {
                    break;
                }
            }
        }));
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        debug!("Closing simulated link to {}", self.address);
        if let Some(notifier) = self.notifier.take() {
            notifier.abort();
        }
        for task in self.tasks.drain(..) {
            task.abort();
        }
        Ok(())
    }
}

/// Build a sensor frame for sample number `n`, stamped with the local time
pub fn sample_frame(n: u32) -> Vec<u8> {
    let now = Local::now();
    let steps = n.wrapping_mul(7) & 0x00FF_FFFF;
    let year = (now.year() - 2000).clamp(0, 255) as u8;

    let mut frame = vec![0u8; COMMAND_FRAME_LEN];
    frame[0] = 62 + (n % 25) as u8;
    frame[1] = 112 + (n % 15) as u8;
    frame[2] = 72 + (n % 10) as u8;
    frame[3] = (steps >> 16) as u8;
    frame[4] = (steps >> 8) as u8;
    frame[5] = steps as u8;
    frame[6] = year;
    frame[7] = now.month() as u8;
    frame[8] = now.day() as u8;
    frame[9] = now.hour() as u8;
    frame[10] = now.minute() as u8;
    frame[11] = now.second() as u8;
    frame
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::bluetooth::service::{event_queue, ServiceEvent};

    fn transport_events(rx: &mut tokio::sync::mpsc::UnboundedReceiver<ServiceEvent>) -> Vec<TransportEvent> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let ServiceEvent::Transport(e) = event {
                out.push(e);
            }
        }
        out
    }

    #[test]
    fn test_sample_frames_decode() {
        for n in [0, 1, 24, 1_000_000] {
            let reading = protocol::decode_sensor_frame(&sample_frame(n)).unwrap();
            assert!(reading.heart_rate_present());
            assert_eq!(reading.steps, n.wrapping_mul(7) & 0x00FF_FFFF);
            assert!(reading.timestamp.to_datetime().is_some());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_discovery_advertises_until_stopped() {
        let (queue, mut rx) = event_queue();
        let mut transport = SimulatedTransport::new(queue);

        transport.start_discovery().await.unwrap();
        tokio::time::sleep(Duration::from_millis(650)).await;
        transport.stop_discovery().await.unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;

        let found = transport_events(&mut rx);
        assert_eq!(found.len(), 2);
        assert_eq!(
            found[0],
            TransportEvent::DeviceDiscovered(simulated_peripherals()[0].clone())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_then_enumerate() {
        let (queue, mut rx) = event_queue();
        let mut transport = SimulatedTransport::new(queue);

        assert!(matches!(
            transport.connect("nonsense").await,
            Err(TransportError::InvalidAddress(_))
        ));

        let mut link = transport.connect("C0:FF:EE:00:00:01").await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(transport_events(&mut rx), vec![TransportEvent::LinkUp]);

        link.discover_services().await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(
            transport_events(&mut rx),
            vec![TransportEvent::ServicesDiscovered { ok: true }]
        );

        assert!(link.write_frame(&[0u8; 5]).await.is_err());
        link.write_frame(&[0u8; 20]).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_stops_notifications() {
        let (queue, mut rx) = event_queue();
        let mut transport = SimulatedTransport::new(queue);
        let mut link = transport.connect("C0:FF:EE:00:00:01").await.unwrap();

        link.set_notify(true).await.unwrap();
        tokio::time::sleep(Duration::from_millis(4_500)).await;
        let data = transport_events(&mut rx)
            .into_iter()
            .filter(|e| matches!(e, TransportEvent::DataAvailable(_)))
            .count();
        assert_eq!(data, 2);

        link.close().await.unwrap();
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(transport_events(&mut rx).is_empty());
    }
}
