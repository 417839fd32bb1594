use clap::Parser;
use k2bridge_core::{BridgeConfig, Modality};
use k2bridge_server::{BridgeError, BridgeService, SimulatedDevice};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const LOG_LEVEL_ENV: &str = "K2BRIDGE_LOG_LEVEL";

#[derive(Parser, Debug)]
#[command(name = "k2bridge")]
#[command(about = "Streams color, depth, infrared, body, face and audio data to TCP subscribers", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file (JSON, TOML or YAML)
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Log filter (error, warn, info, debug, trace or a full directive)
    #[arg(long)]
    log_level: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,

    /// Address every channel binds to
    #[arg(long)]
    bind_address: Option<String>,

    #[arg(long)]
    color_port: Option<u16>,

    #[arg(long)]
    depth_port: Option<u16>,

    #[arg(long)]
    infrared_port: Option<u16>,

    #[arg(long)]
    body_port: Option<u16>,

    #[arg(long)]
    audio_port: Option<u16>,

    #[arg(long)]
    face_port: Option<u16>,

    /// Disable speech recognition
    #[arg(long)]
    no_speech: bool,

    /// Simulate a missing device
    #[arg(long, hide = true)]
    unplugged: bool,

    /// Print the effective configuration and exit
    #[arg(long)]
    print_config: bool,
}

impl Cli {
    fn apply(&self, config: &mut BridgeConfig) {
        let ports = [
            (Modality::Color, self.color_port),
            (Modality::Depth, self.depth_port),
            (Modality::Infrared, self.infrared_port),
            (Modality::Body, self.body_port),
            (Modality::Audio, self.audio_port),
            (Modality::Face, self.face_port),
        ];
        for (modality, port) in ports {
            if let Some(port) = port {
                config.ports.set_port(modality, port);
            }
        }
        if let Some(address) = &self.bind_address {
            config.ports.bind_address = address.clone();
        }
        if let Some(level) = &self.log_level {
            config.logging.level = level.clone();
        }
        if self.log_json {
            config.logging.json = true;
        }
        if self.no_speech {
            config.speech.enabled = false;
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("k2bridge: {}", e);
            return ExitCode::from(e.exit_code());
        }
    };

    if cli.print_config {
        match serde_json::to_string_pretty(&config) {
            Ok(json) => {
                println!("{}", json);
                return ExitCode::SUCCESS;
            }
            Err(e) => {
                eprintln!("k2bridge: {}", e);
                return ExitCode::FAILURE;
            }
        }
    }

    let level_pinned = cli.log_level.is_some() || std::env::var_os(LOG_LEVEL_ENV).is_some();
    init_logging(&config, level_pinned);

    match run(cli, config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            let code = e.downcast_ref::<BridgeError>().map(BridgeError::exit_code).unwrap_or(1);
            ExitCode::from(code)
        }
    }
}

/// File, then `K2BRIDGE_*` environment, then command line flags.
fn load_config(cli: &Cli) -> Result<BridgeConfig, BridgeError> {
    let mut config = match &cli.config {
        Some(path) => {
            let mut config = BridgeConfig::from_file(path)?;
            config.apply_env(|key| std::env::var(key).ok());
            config
        }
        None => BridgeConfig::from_env(),
    };
    cli.apply(&mut config);
    Ok(config)
}

/// `RUST_LOG` only replaces a level that came from the config file or defaults.
fn log_directive(configured: &str, level_pinned: bool, rust_log: Option<String>) -> String {
    match rust_log {
        Some(directive) if !level_pinned && !directive.trim().is_empty() => directive,
        _ => configured.to_string(),
    }
}

fn init_logging(config: &BridgeConfig, level_pinned: bool) {
    let directive = log_directive(&config.logging.level, level_pinned, std::env::var(EnvFilter::DEFAULT_ENV).ok());
    let filter = EnvFilter::try_new(&directive).unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false);

    if config.logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn run(cli: Cli, config: BridgeConfig) -> anyhow::Result<()> {
    info!("Starting k2bridge {}", env!("CARGO_PKG_VERSION"));

    let format = config.audio.format();
    let device = if cli.unplugged {
        SimulatedDevice::unplugged(config.simulation.clone(), format)
    } else {
        SimulatedDevice::new(config.simulation.clone(), format)
    };

    let mut service = BridgeService::start(Arc::new(device), &config).await?;
    for modality in Modality::ALL {
        if let Some(address) = service.local_addr(modality) {
            info!("  {:<8} -> {}", modality.name(), address);
        }
    }

    let outcome = tokio::select! {
        _ = wait_for_shutdown() => Ok(()),
        result = service.wait() => result,
    };

    let report = service.stop().await;
    for (label, stats) in &report.handlers {
        info!(
            "{}: {} ticks, {} packets, {} skipped, {} failed",
            label, stats.ticks, stats.packets, stats.skipped, stats.failed
        );
    }

    if let Err(e) = &outcome {
        warn!("Bridge stopped early: {}", e);
    }
    outcome.map_err(Into::into)
}

/// Wait for shutdown signal
async fn wait_for_shutdown() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
