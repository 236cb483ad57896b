use crate::domain::models::{PeripheralHandle, ScanState};
use crate::domain::registry::DeviceRegistry;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Default discovery window
pub const DEFAULT_SCAN_WINDOW: Duration = Duration::from_secs(10);

/// Bookkeeping for one running discovery window
#[derive(Debug, Clone, Copy)]
pub struct ScanSession {
    pub deadline: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// Idle -> Scanning; the caller must start discovery and arm the timer
    Started { generation: u64 },
    /// Already scanning; only the timer has to be re-armed
    Rearmed { generation: u64 },
}

impl StartOutcome {
    pub fn generation(self) -> u64 {
        match self {
            Self::Started { generation } | Self::Rearmed { generation } => generation,
        }
    }
}

/// Idle/Scanning state plus the one-shot window
///
/// Each arm bumps `generation`; a timeout carrying an older generation was
/// cancelled and is ignored.
#[derive(Debug)]
pub struct ScanController {
    window: Duration,
    session: Option<ScanSession>,
    generation: u64,
}

impl ScanController {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            session: None,
            generation: 0,
        }
    }

    pub fn start(&mut self, now: Instant, registry: &mut DeviceRegistry) -> StartOutcome {
        self.generation += 1;
        let deadline = now + self.window;

        match self.session.as_mut() {
            Some(session) => {
                session.deadline = deadline;
                debug!("Scan window re-armed (generation {})", self.generation);
                StartOutcome::Rearmed {
                    generation: self.generation,
                }
            }
            None => {
                registry.clear();
                self.session = Some(ScanSession { deadline });
                info!(
                    "Scan started, window {:?}, name prefix {:?}",
                    self.window,
                    registry.name_prefix()
                );
                StartOutcome::Started {
                    generation: self.generation,
                }
            }
        }
    }

    /// Returns `true` if a scan was actually running
    pub fn stop(&mut self) -> bool {
        match self.session.take() {
            Some(_) => {
                // invalidate any timeout still in flight
                self.generation += 1;
                info!("Scan stopped");
                true
            }
            None => false,
        }
    }

    /// Timer expiry; returns `true` when this timeout ended the scan
    pub fn on_timeout(&mut self, generation: u64) -> bool {
        if generation != self.generation || self.session.is_none() {
            debug!("Ignoring stale scan timeout (generation {})", generation);
            return false;
        }
        self.stop()
    }

    /// Forward a discovery into the registry; dropped while idle
    pub fn on_discovered(
        &mut self,
        peripheral: PeripheralHandle,
        registry: &mut DeviceRegistry,
    ) -> bool {
        if self.session.is_none() {
            return false;
        }
        registry.add(peripheral)
    }

    pub fn state(&self) -> ScanState {
        if self.session.is_some() {
            ScanState::Scanning
        } else {
            ScanState::Idle
        }
    }

    pub fn is_scanning(&self) -> bool {
        self.session.is_some()
    }

    pub fn session(&self) -> Option<&ScanSession> {
        self.session.as_ref()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn window(&self) -> Duration {
        self.window
    }
}

impl Default for ScanController {
    fn default() -> Self {
        Self::new(DEFAULT_SCAN_WINDOW)
    }
}
