//! Companion Service
//!
//! Main loop that owns the scan controller, link state machine and reading
//! aggregator. Transport callbacks, user commands and timer firings are all
//! funnelled through one queue and handled strictly one at a time.

use crate::domain::link::{LinkError, LinkOutput, LinkStateMachine};
use crate::domain::models::{
    AppEvent, LinkState, MessageSeverity, ScanStopReason, StatusMessage,
};
use crate::domain::readings::ReadingAggregator;
use crate::domain::registry::DeviceRegistry;
use crate::domain::scan::{ScanController, StartOutcome};
use crate::domain::settings::Settings;
use crate::infrastructure::bluetooth::dispatch::{Command, CommandDispatcher, TelephonyEvent};
use crate::infrastructure::bluetooth::protocol::CommandFrame;
use crate::infrastructure::bluetooth::transport::{PeripheralTransport, TransportEvent};
use chrono::Local;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Everything the service loop reacts to
#[derive(Debug, Clone)]
pub enum ServiceEvent {
    Transport(TransportEvent),
    Command(Command),
    ScanTimeout { generation: u64 },
    WatchdogTick,
    PollTick,
}

/// Cloneable handle for posting onto the service queue
#[derive(Debug, Clone)]
pub struct EventQueue {
    tx: mpsc::UnboundedSender<ServiceEvent>,
}

/// Create the queue; the receiver goes to [`CompanionService::new`]
pub fn event_queue() -> (EventQueue, mpsc::UnboundedReceiver<ServiceEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EventQueue { tx }, rx)
}

impl EventQueue {
    /// Returns `false` once the service has stopped
    pub fn post(&self, event: ServiceEvent) -> bool {
        self.tx.send(event).is_ok()
    }

    pub fn transport(&self, event: TransportEvent) -> bool {
        self.post(ServiceEvent::Transport(event))
    }

    pub fn command(&self, command: Command) -> bool {
        self.post(ServiceEvent::Command(command))
    }

    pub fn start_scan(&self) -> bool {
        self.command(Command::StartScan)
    }

    pub fn stop_scan(&self) -> bool {
        self.command(Command::StopScan)
    }

    pub fn connect(&self, address: impl Into<String>) -> bool {
        self.command(Command::Connect(address.into()))
    }

    pub fn disconnect(&self) -> bool {
        self.command(Command::Disconnect)
    }

    pub fn sync_time(&self) -> bool {
        self.command(Command::SyncTime)
    }

    pub fn telephony(&self, event: TelephonyEvent) -> bool {
        self.command(Command::Telephony(event))
    }

    pub fn shutdown(&self) -> bool {
        self.command(Command::Shutdown)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Main service coordinating scan, link and readings
pub struct CompanionService<T: PeripheralTransport> {
    transport: Option<T>,
    registry: DeviceRegistry,
    scan: ScanController,
    link: LinkStateMachine<T::Link>,
    readings: ReadingAggregator,
    dispatcher: CommandDispatcher,
    watchdog_tick: Duration,
    poll_interval: Option<Duration>,
    queue: EventQueue,
    events: mpsc::UnboundedReceiver<ServiceEvent>,
    event_sender: mpsc::UnboundedSender<AppEvent>,
    scan_timer: Option<JoinHandle<()>>,
    tickers: Vec<JoinHandle<()>>,
}

impl<T: PeripheralTransport> CompanionService<T> {
    /// Create a new service
    ///
    /// `transport` is `None` when the host has no usable adapter; connect
    /// and scan requests are then refused.
    pub fn new(
        transport: Option<T>,
        settings: &Settings,
        queue: EventQueue,
        events: mpsc::UnboundedReceiver<ServiceEvent>,
        event_sender: mpsc::UnboundedSender<AppEvent>,
    ) -> Self {
        Self {
            transport,
            registry: DeviceRegistry::new(settings.device_name_prefix.clone()),
            scan: ScanController::new(settings.scan_window()),
            link: LinkStateMachine::new(settings.link_config()),
            readings: ReadingAggregator::new(),
            dispatcher: CommandDispatcher::new(settings.dispatch.clone()),
            watchdog_tick: settings.watchdog_tick(),
            poll_interval: settings.poll_interval(),
            queue,
            events,
            event_sender,
            scan_timer: None,
            tickers: Vec::new(),
        }
    }

    /// Run until `Command::Shutdown` or until every queue handle is gone
    pub async fn run(mut self) {
        info!("Companion service started");
        self.tickers.push(spawn_ticker(
            self.queue.clone(),
            self.watchdog_tick,
            || ServiceEvent::WatchdogTick,
        ));
        if let Some(period) = self.poll_interval {
            self.tickers
                .push(spawn_ticker(self.queue.clone(), period, || ServiceEvent::PollTick));
        }

        while let Some(event) = self.events.recv().await {
            if !self.handle(event).await {
                break;
            }
        }

        self.shutdown().await;
        info!("Companion service stopped");
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    pub fn link_state(&self) -> LinkState {
        self.link.state()
    }

    pub fn readings(&self) -> &ReadingAggregator {
        &self.readings
    }

    /// Handle one queued event; returns `false` when the loop should end
    pub async fn handle(&mut self, event: ServiceEvent) -> bool {
        let now = now();
        match event {
            ServiceEvent::Transport(TransportEvent::DeviceDiscovered(peripheral)) => {
                if self
                    .scan
                    .on_discovered(peripheral.clone(), &mut self.registry)
                {
                    info!("Found {} ({})", peripheral.name, peripheral.id);
                    self.emit(AppEvent::DeviceFound(peripheral));
                }
            }
            ServiceEvent::Transport(event) => {
                let outputs = self.link.on_event(&event, now).await;
                self.apply(outputs).await;
            }
            ServiceEvent::ScanTimeout { generation } => {
                if self.scan.on_timeout(generation) {
                    self.scan_timer = None;
                    self.stop_discovery().await;
                    self.emit(AppEvent::ScanStopped(ScanStopReason::WindowElapsed));
                }
            }
            ServiceEvent::WatchdogTick => {
                let outputs = self.link.on_tick(now).await;
                self.apply(outputs).await;
            }
            ServiceEvent::PollTick => {
                if self.link.state() == LinkState::ServicesReady {
                    self.read_once().await;
                }
            }
            ServiceEvent::Command(command) => return self.handle_command(command, now).await,
        }
        true
    }

    async fn handle_command(&mut self, command: Command, now: Instant) -> bool {
        debug!("Command: {:?}", command);
        match command {
            Command::StartScan => self.start_scan(now).await,
            Command::StopScan => {
                if self.scan.stop() {
                    self.cancel_scan_timer();
                    self.stop_discovery().await;
                    self.emit(AppEvent::ScanStopped(ScanStopReason::Requested));
                }
            }
            Command::Connect(address) => {
                match self.link.connect(self.transport.as_mut(), &address, now).await {
                    Ok(outputs) => self.apply(outputs).await,
                    Err(e) => self.reject("Connect", e),
                }
            }
            Command::Disconnect => {
                let outputs = self.link.disconnect(now).await;
                self.apply(outputs).await;
            }
            Command::SyncTime => {
                let frame = self.dispatcher.time_sync(&Local::now());
                self.send_frame(frame).await;
            }
            Command::CallEvent { ringing, number } => {
                let frame = self.dispatcher.call_event(ringing, number.as_deref());
                self.send_frame(frame).await;
            }
            Command::Telephony(event) => {
                if self.link.state() != LinkState::ServicesReady {
                    debug!("Link not ready, dropping {:?}", event);
                    self.log(MessageSeverity::Warning, "Band not ready, phone event dropped");
                } else if let Some(frame) = self.dispatcher.telephony(&event) {
                    self.send_frame(frame).await;
                }
            }
            Command::Read => self.read_once().await,
            Command::Shutdown => return false,
        }
        true
    }

    async fn start_scan(&mut self, now: Instant) {
        if self.transport.is_none() {
            self.log(MessageSeverity::Error, "Scan rejected: no transport available");
            return;
        }

        let outcome = self.scan.start(now, &mut self.registry);
        if let (StartOutcome::Started { .. }, Some(transport)) = (outcome, self.transport.as_mut()) {
            if let Err(e) = transport.start_discovery().await {
                error!("Failed to start discovery: {}", e);
                self.scan.stop();
                self.emit(AppEvent::TransportError(e.to_string()));
                return;
            }
            self.emit(AppEvent::ScanStarted);
        }
        self.arm_scan_timer(outcome.generation());
    }

    async fn stop_discovery(&mut self) {
        if let Some(transport) = self.transport.as_mut() {
            if let Err(e) = transport.stop_discovery().await {
                warn!("Failed to stop discovery: {}", e);
                self.emit(AppEvent::TransportError(e.to_string()));
            }
        }
    }

    fn arm_scan_timer(&mut self, generation: u64) {
        self.cancel_scan_timer();
        let queue = self.queue.clone();
        let window = self.scan.window();
        self.scan_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(window).await;
            queue.post(ServiceEvent::ScanTimeout { generation });
        }));
    }

    fn cancel_scan_timer(&mut self) {
        if let Some(timer) = self.scan_timer.take() {
            timer.abort();
        }
    }

    async fn apply(&mut self, outputs: Vec<LinkOutput>) {
        let mut became_ready = false;

        for output in outputs {
            match output {
                LinkOutput::StateChanged { state, cause } => {
                    info!("Link state: {} ({:?})", state, cause);
                    self.emit(AppEvent::LinkState { state, cause });
                    match state {
                        LinkState::Connecting => self.log(MessageSeverity::Info, "Connecting..."),
                        LinkState::ServicesReady => self.log(MessageSeverity::Success, "Band ready"),
                        LinkState::Connected | LinkState::Disconnected => {}
                    }
                    if self.readings.on_link_state(state) {
                        self.emit(AppEvent::ReadingCleared);
                    }
                    became_ready = state == LinkState::ServicesReady;
                }
                LinkOutput::Data(bytes) => self.ingest(&bytes),
                LinkOutput::TransportFailure(e) => {
                    self.emit(AppEvent::TransportError(e.to_string()))
                }
            }
        }

        if became_ready && self.dispatcher.sync_time_on_ready() {
            let frame = self.dispatcher.time_sync(&Local::now());
            self.send_frame(frame).await;
        }
    }

    fn ingest(&mut self, bytes: &[u8]) {
        match self.readings.ingest(bytes, Local::now()) {
            Ok(snapshot) => {
                let snapshot = snapshot.clone();
                self.emit(AppEvent::Reading(snapshot));
            }
            Err(e) => {
                warn!("Rejected frame: {}", e);
                self.emit(AppEvent::FrameRejected(e));
            }
        }
    }

    async fn read_once(&mut self) {
        match self.link.read_frame().await {
            Ok(bytes) => self.ingest(&bytes),
            Err(LinkError::NotReady(state)) => debug!("Skipping read while {}", state),
            Err(e) => {
                warn!("Read failed: {}", e);
                self.emit(AppEvent::TransportError(e.to_string()));
            }
        }
    }

    async fn send_frame(&mut self, frame: CommandFrame) {
        match self.link.write_frame(frame.as_bytes()).await {
            Ok(()) => {
                debug!("Sent {:?}", frame);
                self.emit(AppEvent::FrameSent(frame.kind()));
            }
            Err(e @ LinkError::NotReady(_)) => self.reject("Write", e),
            Err(e) => {
                warn!("Write failed: {}", e);
                self.emit(AppEvent::TransportError(e.to_string()));
            }
        }
    }

    async fn shutdown(&mut self) {
        for ticker in self.tickers.drain(..) {
            ticker.abort();
        }
        if self.scan.stop() {
            self.cancel_scan_timer();
            self.stop_discovery().await;
            self.emit(AppEvent::ScanStopped(ScanStopReason::Requested));
        }
        let outputs = self.link.disconnect(now()).await;
        self.apply(outputs).await;
    }

    fn reject(&self, what: &str, error: LinkError) {
        warn!("{} rejected: {}", what, error);
        self.log(
            MessageSeverity::Error,
            &format!("{} rejected: {}", what, error),
        );
    }

    fn log(&self, severity: MessageSeverity, message: &str) {
        self.emit(AppEvent::LogMessage(StatusMessage {
            message: message.to_string(),
            severity,
        }));
    }

    fn emit(&self, event: AppEvent) {
        let _ = self.event_sender.send(event);
    }
}

impl<T: PeripheralTransport> Drop for CompanionService<T> {
    fn drop(&mut self) {
        self.cancel_scan_timer();
        for ticker in self.tickers.drain(..) {
            ticker.abort();
        }
    }
}

/// Post `make()` onto the queue every `period`, starting one period from now
fn spawn_ticker(
    queue: EventQueue,
    period: Duration,
    make: fn() -> ServiceEvent,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            if !queue.post(make()) {
                break;
            }
        }
    })
}

fn now() -> Instant {
    // tokio's clock so paused-time tests stay consistent
    tokio::time::Instant::now().into_std()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{DisconnectCause, PeripheralHandle};
    use crate::infrastructure::bluetooth::protocol::{CommandKind, FrameError};
    use crate::infrastructure::bluetooth::transport::fake::FakeTransport;
    use tokio::time::sleep;

    struct Harness {
        queue: EventQueue,
        app_events: mpsc::UnboundedReceiver<AppEvent>,
        transport: FakeTransport,
        task: JoinHandle<()>,
    }

    impl Harness {
        fn start(settings: Settings, transport: Option<FakeTransport>) -> Self {
            let fake = transport.clone().unwrap_or_default();
            let (queue, events) = event_queue();
            let (app_tx, app_events) = mpsc::unbounded_channel();
            let service = CompanionService::new(transport, &settings, queue.clone(), events, app_tx);
            let task = tokio::spawn(service.run());
            Self {
                queue,
                app_events,
                transport: fake,
                task,
            }
        }

        fn drain(&mut self) -> Vec<AppEvent> {
            let mut out = Vec::new();
            while let Ok(event) = self.app_events.try_recv() {
                out.push(event);
            }
            out
        }

        async fn settle(&mut self) -> Vec<AppEvent> {
            sleep(Duration::from_millis(10)).await;
            self.drain()
        }

        async fn make_ready(&mut self) {
            self.queue.connect("AA:BB");
            self.queue.transport(TransportEvent::LinkUp);
            self.queue
                .transport(TransportEvent::ServicesDiscovered { ok: true });
            self.settle().await;
        }
    }

    fn quiet_settings() -> Settings {
        Settings {
            poll_interval_ms: 0,
            read_on_ready: false,
            ..Settings::default()
        }
    }

    fn sensor_frame(heart_rate: u8) -> Vec<u8> {
        let mut f = vec![0u8; 20];
        f[..12].copy_from_slice(&[heart_rate, 120, 80, 0x00, 0x03, 0xE8, 24, 5, 1, 8, 30, 0]);
        f
    }

    fn scan_stops(events: &[AppEvent]) -> Vec<ScanStopReason> {
        events
            .iter()
            .filter_map(|e| match e {
                AppEvent::ScanStopped(reason) => Some(*reason),
                _ => None,
            })
            .collect()
    }

    fn link_states(events: &[AppEvent]) -> Vec<(LinkState, Option<DisconnectCause>)> {
        events
            .iter()
            .filter_map(|e| match e {
                AppEvent::LinkState { state, cause } => Some((*state, *cause)),
                _ => None,
            })
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_scan_window_restarts_and_expires() {
        let mut h = Harness::start(quiet_settings(), Some(FakeTransport::new()));

        h.queue.start_scan();
        let events = h.settle().await;
        assert!(events.iter().any(|e| matches!(e, AppEvent::ScanStarted)));

        sleep(Duration::from_secs(4)).await;
        h.queue.start_scan();
        h.settle().await;

        // 13s after the first start, 9s after the restart
        sleep(Duration::from_secs(9)).await;
        assert!(scan_stops(&h.drain()).is_empty());

        sleep(Duration::from_secs(2)).await;
        assert_eq!(scan_stops(&h.drain()), vec![ScanStopReason::WindowElapsed]);

        let calls = h.transport.calls();
        assert_eq!(calls.discovery_starts, 1);
        assert_eq!(calls.discovery_stops, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_discoveries_only_while_scanning() {
        let mut h = Harness::start(quiet_settings(), Some(FakeTransport::new()));
        let band = PeripheralHandle::new("01", "BLE-Band", -60);

        h.queue
            .transport(TransportEvent::DeviceDiscovered(band.clone()));
        h.queue.start_scan();
        h.queue
            .transport(TransportEvent::DeviceDiscovered(band.clone()));
        h.queue.transport(TransportEvent::DeviceDiscovered(
            PeripheralHandle::new("01", "BLE-Band", -20),
        ));
        h.queue.stop_scan();
        h.queue
            .transport(TransportEvent::DeviceDiscovered(PeripheralHandle::new(
                "02", "BLE-Other", -50,
            )));

        let events = h.settle().await;
        let found: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                AppEvent::DeviceFound(p) => Some(p.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(found, vec![band]);
        assert_eq!(scan_stops(&events), vec![ScanStopReason::Requested]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_watchdog_forces_disconnect() {
        let mut h = Harness::start(quiet_settings(), Some(FakeTransport::new()));

        h.queue.connect("AA:BB");
        assert_eq!(
            link_states(&h.settle().await),
            vec![(LinkState::Connecting, None)]
        );

        sleep(Duration::from_millis(15_500)).await;
        assert!(link_states(&h.drain()).is_empty());

        sleep(Duration::from_secs(1)).await;
        assert_eq!(
            link_states(&h.drain()),
            vec![(
                LinkState::Disconnected,
                Some(DisconnectCause::WatchdogTimeout)
            )]
        );

        sleep(Duration::from_secs(5)).await;
        assert_eq!(h.transport.calls().closes, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_enumeration_does_not_freeze_loop() {
        let transport = FakeTransport::new();
        transport.behaviour().stall_discover = true;
        let mut h = Harness::start(quiet_settings(), Some(transport));

        h.queue.connect("AA:BB");
        h.queue.transport(TransportEvent::LinkUp);
        sleep(Duration::from_secs(30)).await;

        assert_eq!(
            link_states(&h.drain()),
            vec![
                (LinkState::Connecting, None),
                (LinkState::Connected, None),
                (
                    LinkState::Disconnected,
                    Some(DisconnectCause::WatchdogTimeout)
                ),
            ]
        );
        assert_eq!(h.transport.calls().closes, 1);

        // loop still serves requests afterwards
        h.transport.behaviour().stall_discover = false;
        h.queue.connect("AA:BB");
        assert_eq!(
            link_states(&h.settle().await),
            vec![(LinkState::Connecting, None)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_sms_alert_forwarded_when_ready() {
        let mut h = Harness::start(quiet_settings(), Some(FakeTransport::new()));

        h.queue.telephony(TelephonyEvent::SmsReceived);
        let events = h.settle().await;
        assert!(h.transport.calls().writes.is_empty());
        assert!(events.iter().any(|e| matches!(
            e,
            AppEvent::LogMessage(StatusMessage {
                severity: MessageSeverity::Warning,
                ..
            })
        )));

        h.make_ready().await;
        h.queue.telephony(TelephonyEvent::SmsReceived);
        h.settle().await;

        let writes = h.transport.calls().writes.clone();
        assert_eq!(writes.len(), 1);
        assert_eq!(&writes[0][..6], &[0x01, 1, 3, b'x', b'y', b'z']);
        assert!(writes[0][6..].iter().all(|b| *b == 0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sms_alert_respects_disabled_alerts() {
        let mut settings = quiet_settings();
        settings.dispatch.call_alerts_enabled = false;
        let mut h = Harness::start(settings, Some(FakeTransport::new()));

        h.make_ready().await;
        h.queue.telephony(TelephonyEvent::SmsReceived);
        h.settle().await;

        assert!(h.transport.calls().writes.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_readings_flow_and_reset() {
        let transport = FakeTransport::new();
        transport.behaviour().read_payload = sensor_frame(72);
        let settings = Settings {
            poll_interval_ms: 0,
            ..Settings::default()
        };
        let mut h = Harness::start(settings, Some(transport));

        h.queue.connect("AA:BB");
        h.queue.transport(TransportEvent::LinkUp);
        h.queue
            .transport(TransportEvent::ServicesDiscovered { ok: true });
        h.queue
            .transport(TransportEvent::DataAvailable(vec![1, 2, 3]));
        h.queue
            .transport(TransportEvent::DataAvailable(sensor_frame(0)));
        h.queue.transport(TransportEvent::LinkDown);

        let events = h.settle().await;
        let readings: Vec<u8> = events
            .iter()
            .filter_map(|e| match e {
                AppEvent::Reading(s) => Some(s.reading.heart_rate),
                _ => None,
            })
            .collect();
        assert_eq!(readings, vec![72, 0]);
        assert!(events
            .iter()
            .any(|e| matches!(e, AppEvent::FrameRejected(FrameError::TooShort { len: 3 }))));
        assert!(matches!(events.last(), Some(AppEvent::ReadingCleared)));
        assert_eq!(
            link_states(&events).last(),
            Some(&(LinkState::Disconnected, Some(DisconnectCause::LinkLost)))
        );
        assert_eq!(h.transport.calls().notify, vec![true]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_polling_reads_while_ready() {
        let transport = FakeTransport::new();
        transport.behaviour().read_payload = sensor_frame(65);
        let settings = Settings {
            poll_interval_ms: 1_000,
            read_on_ready: false,
            ..Settings::default()
        };
        let mut h = Harness::start(settings, Some(transport));

        sleep(Duration::from_millis(2_500)).await;
        assert_eq!(h.transport.calls().reads, 0);

        h.make_ready().await;
        sleep(Duration::from_secs(3)).await;
        assert!(h.transport.calls().reads >= 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_telephony_and_time_sync_writes() {
        let mut h = Harness::start(quiet_settings(), Some(FakeTransport::new()));

        // not ready yet: nothing written
        h.queue
            .telephony(TelephonyEvent::Ringing(Some("5551234".into())));
        h.settle().await;
        assert!(h.transport.calls().writes.is_empty());

        h.make_ready().await;
        h.queue
            .telephony(TelephonyEvent::Ringing(Some("5551234".into())));
        h.queue.telephony(TelephonyEvent::Idle(None));
        h.queue.sync_time();
        let events = h.settle().await;

        let writes = h.transport.calls().writes.clone();
        assert_eq!(writes.len(), 3);
        assert!(writes.iter().all(|w| w.len() == 20));
        assert_eq!(&writes[0][..3], &[0x01, 1, 7]);
        assert_eq!(&writes[1][..3], &[0x01, 0, 0]);
        assert_eq!(writes[2][0], 0x00);

        let sent: Vec<CommandKind> = events
            .iter()
            .filter_map(|e| match e {
                AppEvent::FrameSent(kind) => Some(*kind),
                _ => None,
            })
            .collect();
        assert_eq!(
            sent,
            vec![
                CommandKind::CallEvent,
                CommandKind::CallEvent,
                CommandKind::TimeSync
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_sync_time_on_ready() {
        let mut settings = quiet_settings();
        settings.dispatch.sync_time_on_ready = true;
        let mut h = Harness::start(settings, Some(FakeTransport::new()));

        h.make_ready().await;

        let writes = h.transport.calls().writes.clone();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0][0], 0x00);
    }

    #[tokio::test(start_paused = true)]
    async fn test_without_transport_requests_are_refused() {
        let mut h = Harness::start(quiet_settings(), None);

        h.queue.connect("AA:BB");
        h.queue.start_scan();
        let events = h.settle().await;

        assert!(link_states(&events).is_empty());
        let errors = events
            .iter()
            .filter(|e| {
                matches!(
                    e,
                    AppEvent::LogMessage(StatusMessage {
                        severity: MessageSeverity::Error,
                        ..
                    })
                )
            })
            .count();
        assert_eq!(errors, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_releases_link() {
        let mut h = Harness::start(quiet_settings(), Some(FakeTransport::new()));
        h.make_ready().await;

        h.queue.shutdown();
        let task = h.task;
        task.await.unwrap();

        assert_eq!(h.transport.calls().closes, 1);
        assert!(h.queue.is_closed());
    }
}
