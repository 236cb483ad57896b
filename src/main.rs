mod cli;

use anyhow::{anyhow, Context, Result};
use band_companion::domain::models::{AppEvent, DisconnectCause, LinkState, MessageSeverity};
use band_companion::domain::settings::SettingsService;
use band_companion::infrastructure::bluetooth::protocol;
use band_companion::infrastructure::bluetooth::service::{
    event_queue, CompanionService, EventQueue, ServiceEvent,
};
use band_companion::infrastructure::bluetooth::simulated::SimulatedTransport;
use band_companion::infrastructure::bluetooth::transport::PeripheralTransport;
use band_companion::infrastructure::logging::init_logger;
use chrono::Local;
use clap::Parser;
use cli::{Cli, Commands, EncodeFrame};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// What the event loop in [`drive`] is waiting for
enum Session {
    Scan,
    Connect { address: String, sync_time: bool },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut settings = match &cli.config {
        Some(path) => SettingsService::with_path(path.clone()),
        None => SettingsService::new()?,
    };
    let _log_guard = init_logger(&settings.get().log_settings, cli.log_level.as_deref())?;
    info!("Starting Band Companion");
    info!("Settings: {}", settings.path().display());

    match cli.cmd {
        Commands::Decode { hex } => decode(&hex),
        Commands::Encode { frame } => {
            encode(frame);
            Ok(())
        }
        Commands::Scan { seconds } => {
            if let Some(secs) = seconds {
                settings.get_mut().scan_window_ms = secs.saturating_mul(1_000);
            }
            run(cli.simulate, &mut settings, Session::Scan, None).await
        }
        Commands::Connect {
            address,
            sync_time,
            seconds,
        } => {
            let address = address
                .or_else(|| settings.get().last_connected_address.clone())
                .ok_or_else(|| anyhow!("no address given and no previously connected band"))?;
            let session = Session::Connect { address, sync_time };
            run(
                cli.simulate,
                &mut settings,
                session,
                seconds.map(Duration::from_secs),
            )
            .await
        }
    }
}

fn decode(hex: &str) -> Result<()> {
    let bytes = protocol::parse_hex(hex).ok_or_else(|| anyhow!("not a hex string: {}", hex))?;
    let reading = protocol::decode_sensor_frame(&bytes)?;

    println!("{}", reading);
    println!("  heart rate : {:?}", reading.heart_rate_bpm());
    println!("  blood press: {:?}", reading.blood_pressure());
    println!("  steps      : {}", reading.steps);
    Ok(())
}

fn encode(frame: EncodeFrame) {
    let frame = match frame {
        EncodeFrame::Time => protocol::encode_time_sync(&Local::now()),
        EncodeFrame::Call { number, ended } => {
            protocol::encode_call_event(!ended, number.as_deref())
        }
    };
    println!("{}", frame.to_hex());
}

/// Pick a transport and hand over to [`drive`]
async fn run(
    simulate: bool,
    settings: &mut SettingsService,
    session: Session,
    limit: Option<Duration>,
) -> Result<()> {
    let (queue, events) = event_queue();

    if simulate {
        info!("Using simulated band");
        let transport = SimulatedTransport::new(queue.clone());
        return drive(Some(transport), queue, events, settings, session, limit).await;
    }

    #[cfg(windows)]
    {
        let transport =
            band_companion::infrastructure::bluetooth::winrt::WinRtTransport::new(queue.clone());
        drive(Some(transport), queue, events, settings, session, limit).await
    }

    #[cfg(not(windows))]
    {
        warn!("No Bluetooth transport on this platform, pass --simulate to use a simulated band");
        drive(None::<SimulatedTransport>, queue, events, settings, session, limit).await
    }
}

/// Run the service until the session is over, Ctrl-C, or `limit` elapses
async fn drive<T>(
    transport: Option<T>,
    queue: EventQueue,
    events: mpsc::UnboundedReceiver<ServiceEvent>,
    settings: &mut SettingsService,
    session: Session,
    limit: Option<Duration>,
) -> Result<()>
where
    T: PeripheralTransport + 'static,
    T::Link: 'static,
{
    let (app_tx, mut app_rx) = mpsc::unbounded_channel();
    let service = CompanionService::new(transport, settings.get(), queue.clone(), events, app_tx);
    let service = tokio::spawn(service.run());

    match &session {
        Session::Scan => queue.start_scan(),
        Session::Connect { address, .. } => queue.connect(address.clone()),
    };

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let deadline = tokio::time::sleep(limit.unwrap_or(Duration::MAX));
    tokio::pin!(deadline);

    let mut outcome = Ok(());
    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("Interrupted");
                break;
            }
            _ = &mut deadline, if limit.is_some() => {
                info!("Time limit reached");
                break;
            }
            event = app_rx.recv() => {
                let Some(event) = event else { break };
                match on_event(event, &session, &queue, settings) {
                    Flow::Continue => {}
                    Flow::Done => break,
                    Flow::Failed(e) => {
                        outcome = Err(e);
                        break;
                    }
                }
            }
        }
    }

    queue.shutdown();
    // drain until the service drops its sender
    while let Some(event) = app_rx.recv().await {
        on_event(event, &session, &queue, settings);
    }
    service.await.context("service task failed")?;
    outcome
}

enum Flow {
    Continue,
    Done,
    Failed(anyhow::Error),
}

fn on_event(
    event: AppEvent,
    session: &Session,
    queue: &EventQueue,
    settings: &mut SettingsService,
) -> Flow {
    match event {
        AppEvent::DeviceFound(p) => {
            println!("{:<20} {:<24} {:>4} dBm", p.id, p.name, p.signal_strength);
        }
        AppEvent::ScanStarted => info!("Scanning..."),
        AppEvent::ScanStopped(reason) => {
            info!("Scan finished ({:?})", reason);
            if let Session::Scan = session {
                return Flow::Done;
            }
        }
        AppEvent::LinkState { state, cause } => {
            info!("Link {}", state);
            match (state, cause, session) {
                (LinkState::ServicesReady, _, Session::Connect { address, sync_time }) => {
                    if let Err(e) = settings.remember_address(address) {
                        warn!("Could not save settings: {}", e);
                    }
                    if *sync_time {
                        queue.sync_time();
                    }
                }
                (LinkState::Disconnected, Some(DisconnectCause::UserRequested), _) => {
                    return Flow::Done
                }
                (LinkState::Disconnected, Some(cause), _) => {
                    return Flow::Failed(anyhow!("disconnected: {:?}", cause))
                }
                _ => {}
            }
        }
        AppEvent::Reading(snapshot) => {
            println!(
                "[{}] {}",
                snapshot.received_at.format("%H:%M:%S"),
                snapshot.reading
            );
        }
        AppEvent::ReadingCleared => {}
        AppEvent::FrameRejected(e) => warn!("{}", e),
        AppEvent::FrameSent(kind) => info!("Sent {:?}", kind),
        AppEvent::TransportError(message) => error!("Transport: {}", message),
        AppEvent::LogMessage(msg) => match msg.severity {
            MessageSeverity::Error => {
                error!("{}", msg.message);
                return Flow::Failed(anyhow!(msg.message));
            }
            MessageSeverity::Warning => warn!("{}", msg.message),
            MessageSeverity::Info | MessageSeverity::Success => info!("{}", msg.message),
        },
    }
    Flow::Continue
}
