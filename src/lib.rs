pub mod channels;
pub mod config;
pub mod echonet;
pub mod hexed;
pub mod options;
pub mod prelude;
pub mod repository;
pub mod session;
pub mod skstack;
pub mod telemetry;

const CARGO_PKG_VERSION: &str = env!("CARGO_PKG_VERSION");

use crate::prelude::*;

use std::sync::{Arc, Mutex};

use tokio_serial::SerialPortBuilderExt;

use crate::repository::TelemetryRepository;
use crate::session::{MeterSession, SessionStats};
use crate::telemetry::Telemetry;

fn init_logging(level: &str) {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {} {}] {}",
                chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.3f"),
                record.level(),
                record.module_path().unwrap_or(""),
                record.args()
            )
        })
        .write_style(env_logger::WriteStyle::Never)
        .try_init();
}

/// Main application entry point: wires the serial modem, the session
/// task, and the telemetry client together, then waits for shutdown.
pub async fn app(mut shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
    let options = Options::new();
    let config_file = options.config_file.clone();

    init_logging("info");
    info!("starting routeb-bridge {} with config file: {}", CARGO_PKG_VERSION, config_file);

    let config = ConfigWrapper::new(options.config_file).unwrap_or_else(|err| {
        error!("Failed to load config: {:?}", err);
        std::process::exit(255);
    });
    init_logging(&config.loglevel());

    info!("Initializing channels...");
    let channels = Channels::new();
    let repository = TelemetryRepository::new();
    let shared_stats = Arc::new(Mutex::new(SessionStats::default()));

    info!("  Creating telemetry client...");
    let telemetry = Telemetry::new(config.clone(), channels.clone(), shared_stats.clone());
    let telemetry_clone = telemetry.clone();
    let telemetry_handle = tokio::spawn(async move {
        if let Err(e) = telemetry_clone.start().await {
            error!("Telemetry task failed: {}", e);
        }
    });

    info!(
        "  Opening serial port {} at {} baud...",
        config.serial().port(),
        config.serial().baud()
    );
    let stream = tokio_serial::new(config.serial().port(), config.serial().baud())
        .open_native_async()
        .map_err(|e| anyhow!("cannot open {}: {}", config.serial().port(), e))?;

    info!("  Creating meter session...");
    let mut session = MeterSession::new(
        stream,
        config.clone(),
        channels.clone(),
        repository.clone(),
        shared_stats.clone(),
    );
    let mut session_handle = tokio::spawn(async move { session.start().await });

    if let Some(runtime) = options.runtime {
        let channels = channels.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_secs(runtime)).await;
            info!("runtime limit of {}s reached, shutting down", runtime);
            let _ = channels.to_session.send(session::ChannelData::Shutdown);
            let _ = channels.to_telemetry.send(telemetry::ChannelData::Shutdown);
        });
    }

    info!("Waiting for shutdown signal...");
    let session_result = tokio::select! {
        _ = shutdown_rx.recv() => {
            info!("Shutdown signal received, stopping components...");
            let _ = channels.to_session.send(session::ChannelData::Shutdown);
            let _ = telemetry.stop().await;
            session_handle.await
        }
        result = &mut session_handle => {
            let _ = telemetry.stop().await;
            result
        }
    };

    if let Err(e) = telemetry_handle.await {
        error!("Error waiting for telemetry task: {}", e);
    }

    if let Ok(stats) = shared_stats.lock() {
        stats.print_summary();
    }

    match session_result {
        Ok(Ok(())) => {
            info!("Application shutdown complete");
            Ok(())
        }
        Ok(Err(e)) => Err(e),
        Err(e) => Err(anyhow!("session task panicked: {}", e)),
    }
}
