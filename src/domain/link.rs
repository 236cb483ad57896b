//! Link State Machine
//!
//! One connection session at a time:
//!
//! ```text
//! Disconnected --connect--> Connecting --LinkUp--> Connected --services ok--> ServicesReady
//!       ^                        |                     |                          |
//!       +------ LinkDown / disconnect() / watchdog ----+---- services failed -----+
//! ```
//!
//! The session (and with it the transport link handle) only exists in the
//! active states, so every path back to `Disconnected` has to go through
//! [`LinkStateMachine::teardown`], which closes the handle.
//!
//! Every transport await is bounded by the watchdog timeout; a connect or
//! enumeration request that never returns still ends in `Disconnected` with
//! `WatchdogTimeout`.

use crate::domain::models::{DisconnectCause, LinkState};
use crate::infrastructure::bluetooth::transport::{
    PeripheralLink, PeripheralTransport, TransportError, TransportEvent,
};
use std::future::Future;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

/// How long a session may sit in Connecting/Connected before it is killed
pub const DEFAULT_WATCHDOG_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone)]
pub struct LinkConfig {
    pub watchdog_timeout: Duration,
    /// Issue a single read as soon as services are ready
    pub read_on_ready: bool,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            watchdog_timeout: DEFAULT_WATCHDOG_TIMEOUT,
            read_on_ready: true,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LinkError {
    #[error("no transport available")]
    NoTransport,

    #[error("peripheral address is empty")]
    EmptyAddress,

    #[error("a session is already {0}")]
    Busy(LinkState),

    #[error("link is {0}, services are not ready")]
    NotReady(LinkState),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Something the caller has to act on after driving the machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkOutput {
    StateChanged {
        state: LinkState,
        cause: Option<DisconnectCause>,
    },
    /// Frame bytes to hand to the reading aggregator
    Data(Vec<u8>),
    /// A best-effort transport call failed; state is unchanged
    TransportFailure(TransportError),
}

/// The single active connection context
#[derive(Debug)]
pub struct LinkSession<L> {
    address: String,
    entered_at: Instant,
    link: L,
}

impl<L> LinkSession<L> {
    pub fn address(&self) -> &str {
        &self.address
    }

    /// When the current state was entered
    pub fn entered_at(&self) -> Instant {
        self.entered_at
    }
}

#[derive(Debug)]
enum Phase<L> {
    Disconnected,
    Connecting(LinkSession<L>),
    Connected(LinkSession<L>),
    ServicesReady(LinkSession<L>),
}

impl<L> Phase<L> {
    fn state(&self) -> LinkState {
        match self {
            Self::Disconnected => LinkState::Disconnected,
            Self::Connecting(_) => LinkState::Connecting,
            Self::Connected(_) => LinkState::Connected,
            Self::ServicesReady(_) => LinkState::ServicesReady,
        }
    }

    fn session(&self) -> Option<&LinkSession<L>> {
        match self {
            Self::Disconnected => None,
            Self::Connecting(s) | Self::Connected(s) | Self::ServicesReady(s) => Some(s),
        }
    }
}

pub struct LinkStateMachine<L> {
    config: LinkConfig,
    phase: Phase<L>,
    last_transition: Option<Instant>,
}

impl<L: PeripheralLink> LinkStateMachine<L> {
    pub fn new(config: LinkConfig) -> Self {
        Self {
            config,
            phase: Phase::Disconnected,
            last_transition: None,
        }
    }

    pub fn state(&self) -> LinkState {
        self.phase.state()
    }

    pub fn session(&self) -> Option<&LinkSession<L>> {
        self.phase.session()
    }

    /// When the machine last changed state, including into `Disconnected`
    pub fn last_transition(&self) -> Option<Instant> {
        self.last_transition
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    /// Start a new session
    ///
    /// Refused without any transition when there is no transport, the
    /// address is blank, or a session is already active. A transport that
    /// fails to open the link is reported as a `ConnectFailed` disconnect.
    pub async fn connect<T>(
        &mut self,
        transport: Option<&mut T>,
        address: &str,
        now: Instant,
    ) -> Result<Vec<LinkOutput>, LinkError>
    where
        T: PeripheralTransport<Link = L>,
    {
        if !matches!(self.phase, Phase::Disconnected) {
            return Err(LinkError::Busy(self.state()));
        }
        let transport = transport.ok_or(LinkError::NoTransport)?;
        let address = address.trim();
        if address.is_empty() {
            return Err(LinkError::EmptyAddress);
        }

        info!("Connecting to {}", address);
        let budget = self.config.watchdog_timeout;
        match bounded(budget, "connect", transport.connect(address)).await {
            Ok(link) => {
                self.phase = Phase::Connecting(LinkSession {
                    address: address.to_string(),
                    entered_at: now,
                    link,
                });
                self.last_transition = Some(now);
                Ok(vec![changed(LinkState::Connecting, None)])
            }
            Err(TransportError::TimedOut(_)) => {
                warn!("Watchdog: connect to {} did not return within {:?}", address, budget);
                self.last_transition = Some(now + budget);
                Ok(vec![changed(
                    LinkState::Disconnected,
                    Some(DisconnectCause::WatchdogTimeout),
                )])
            }
            Err(e) => {
                warn!("Connect to {} failed: {}", address, e);
                self.last_transition = Some(now);
                Ok(vec![changed(
                    LinkState::Disconnected,
                    Some(DisconnectCause::ConnectFailed),
                )])
            }
        }
    }

    /// Feed a transport event into the machine
    pub async fn on_event(&mut self, event: &TransportEvent, now: Instant) -> Vec<LinkOutput> {
        let mut out = Vec::new();
        match event {
            TransportEvent::LinkUp => self.on_link_up(now, &mut out).await,
            TransportEvent::LinkDown => {
                if let Some(session) = self.take_session() {
                    info!("Link to {} lost", session.address);
                    self.teardown(session, DisconnectCause::LinkLost, now, &mut out)
                        .await;
                }
            }
            TransportEvent::ServicesDiscovered { ok } => {
                self.on_services_discovered(*ok, now, &mut out).await
            }
            TransportEvent::DataAvailable(bytes) => {
                if matches!(self.phase, Phase::ServicesReady(_)) {
                    out.push(LinkOutput::Data(bytes.clone()));
                } else {
                    debug!("Dropping {} data bytes while {}", bytes.len(), self.state());
                }
            }
            TransportEvent::DeviceDiscovered(_) => {}
        }
        out
    }

    /// Explicit user disconnect; a no-op when nothing is connected
    pub async fn disconnect(&mut self, now: Instant) -> Vec<LinkOutput> {
        let mut out = Vec::new();
        if let Some(session) = self.take_session() {
            info!("Disconnecting from {}", session.address);
            self.teardown(session, DisconnectCause::UserRequested, now, &mut out)
                .await;
        }
        out
    }

    /// Periodic watchdog check
    pub async fn on_tick(&mut self, now: Instant) -> Vec<LinkOutput> {
        let mut out = Vec::new();
        let stuck = match &self.phase {
            Phase::Connecting(s) | Phase::Connected(s) => {
                now.saturating_duration_since(s.entered_at) > self.config.watchdog_timeout
            }
            Phase::Disconnected | Phase::ServicesReady(_) => false,
        };

        if stuck {
            let state = self.state();
            if let Some(session) = self.take_session() {
                warn!(
                    "Watchdog: {} stuck {} for more than {:?}, forcing disconnect",
                    session.address, state, self.config.watchdog_timeout
                );
                self.teardown(session, DisconnectCause::WatchdogTimeout, now, &mut out)
                    .await;
            }
        }
        out
    }

    pub async fn write_frame(&mut self, frame: &[u8]) -> Result<(), LinkError> {
        match &mut self.phase {
            Phase::ServicesReady(session) => Ok(bounded(
                self.config.watchdog_timeout,
                "write",
                session.link.write_frame(frame),
            )
            .await?),
            other => Err(LinkError::NotReady(other.state())),
        }
    }

    pub async fn read_frame(&mut self) -> Result<Vec<u8>, LinkError> {
        match &mut self.phase {
            Phase::ServicesReady(session) => Ok(bounded(
                self.config.watchdog_timeout,
                "read",
                session.link.read_frame(),
            )
            .await?),
            other => Err(LinkError::NotReady(other.state())),
        }
    }

    async fn on_link_up(&mut self, now: Instant, out: &mut Vec<LinkOutput>) {
        match std::mem::replace(&mut self.phase, Phase::Disconnected) {
            Phase::Connecting(mut session) => {
                info!("Link to {} is up, enumerating services", session.address);
                session.entered_at = now;
                self.last_transition = Some(now);
                out.push(changed(LinkState::Connected, None));

                let budget = self.config.watchdog_timeout;
                match bounded(budget, "service discovery request", session.link.discover_services())
                    .await
                {
                    Ok(()) => self.phase = Phase::Connected(session),
                    Err(TransportError::TimedOut(_)) => {
                        warn!(
                            "Watchdog: service discovery request on {} did not return within {:?}",
                            session.address, budget
                        );
                        self.teardown(session, DisconnectCause::WatchdogTimeout, now + budget, out)
                            .await;
                    }
                    Err(e) => {
                        warn!("Service discovery request failed: {}", e);
                        self.teardown(session, DisconnectCause::EnumerationFailed, now, out)
                            .await;
                    }
                }
            }
            other => {
                debug!("Ignoring LinkUp while {}", other.state());
                self.phase = other;
            }
        }
    }

    async fn on_services_discovered(&mut self, ok: bool, now: Instant, out: &mut Vec<LinkOutput>) {
        match std::mem::replace(&mut self.phase, Phase::Disconnected) {
            Phase::Connected(session) if !ok => {
                warn!("Service discovery on {} failed", session.address);
                self.teardown(session, DisconnectCause::EnumerationFailed, now, out)
                    .await;
            }
            Phase::Connected(mut session) => {
                info!("Services ready on {}", session.address);
                session.entered_at = now;
                self.last_transition = Some(now);
                out.push(changed(LinkState::ServicesReady, None));

                let budget = self.config.watchdog_timeout;
                if let Err(e) = bounded(budget, "notify subscription", session.link.set_notify(true)).await {
                    warn!("Could not enable notifications: {}", e);
                    out.push(LinkOutput::TransportFailure(e));
                }
                if self.config.read_on_ready {
                    match bounded(budget, "initial read", session.link.read_frame()).await {
                        Ok(bytes) => out.push(LinkOutput::Data(bytes)),
                        Err(e) => {
                            warn!("Initial read failed: {}", e);
                            out.push(LinkOutput::TransportFailure(e));
                        }
                    }
                }
                self.phase = Phase::ServicesReady(session);
            }
            other => {
                debug!("Ignoring ServicesDiscovered({}) while {}", ok, other.state());
                self.phase = other;
            }
        }
    }

    fn take_session(&mut self) -> Option<LinkSession<L>> {
        match std::mem::replace(&mut self.phase, Phase::Disconnected) {
            Phase::Disconnected => None,
            Phase::Connecting(s) | Phase::Connected(s) | Phase::ServicesReady(s) => Some(s),
        }
    }

    /// Release the handle and report the disconnect; consumes the session
    async fn teardown(
        &mut self,
        mut session: LinkSession<L>,
        cause: DisconnectCause,
        now: Instant,
        out: &mut Vec<LinkOutput>,
    ) {
        let budget = self.config.watchdog_timeout;
        if let Err(e) = bounded(budget, "close", session.link.close()).await {
            warn!("Closing link to {} failed: {}", session.address, e);
        }
        self.phase = Phase::Disconnected;
        self.last_transition = Some(now);
        out.push(changed(LinkState::Disconnected, Some(cause)));
    }
}

/// Await a transport call for at most `budget`
async fn bounded<T, F>(budget: Duration, op: &'static str, call: F) -> Result<T, TransportError>
where
    F: Future<Output = Result<T, TransportError>>,
{
    tokio::time::timeout(budget, call)
        .await
        .unwrap_or(Err(TransportError::TimedOut(op)))
}

fn changed(state: LinkState, cause: Option<DisconnectCause>) -> LinkOutput {
    LinkOutput::StateChanged { state, cause }
}
