//! `insteond` - runs the gateway engine, timers and the UDP command server.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};

use insteon_gateway::config::Config;
use insteon_gateway::registry::MemoryRegistry;
use insteon_gateway::remote::RemoteServer;
use insteon_gateway::scheduler::Scheduler;
use insteon_gateway::transport::open_serial;
use insteon_gateway::Modem;

#[derive(Parser, Debug)]
#[command(name = "insteond", version, about = "Insteon PLM gateway daemon")]
struct Args {
    /// TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Serial port of the gateway (overrides the config file).
    #[arg(short, long)]
    port: Option<String>,

    /// JSON device file (overrides the config file).
    #[arg(short, long)]
    devices: Option<PathBuf>,

    /// Disable the UDP command server.
    #[arg(long, default_value_t = false)]
    no_remote: bool,

    /// Debug logging, including every frame sent and received.
    #[arg(short, long, default_value_t = false)]
    verbose: bool,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_tracing(args.verbose);

    if let Err(e) = run(args).await {
        eprintln!("insteond: {e:#}");
        std::process::exit(1);
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn load_config(args: &Args) -> anyhow::Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => Config::default(),
    };
    config.apply_env().context("applying INSTEON_* overrides")?;

    if let Some(port) = &args.port {
        config.serial.port = Some(port.clone());
    }
    if let Some(devices) = &args.devices {
        config.devices.file = Some(devices.clone());
    }
    if args.no_remote {
        config.remote.enabled = false;
    }
    Ok(config)
}

async fn run(args: Args) -> anyhow::Result<()> {
    let config = load_config(&args)?;

    let registry = Arc::new(match &config.devices.file {
        Some(path) => MemoryRegistry::load(path)
            .with_context(|| format!("loading devices {}", path.display()))?,
        None => {
            warn!("No device file; names and the state mirror are unavailable");
            MemoryRegistry::default()
        }
    });
    info!("{} devices registered", insteon_gateway::DeviceRegistry::len(registry.as_ref()));

    let port = open_serial(&config.serial_settings()?)?;
    let modem = Modem::builder()
        .config(config.modem_config())
        .registry(registry.clone())
        .build(port);

    match modem.gateway_info().await {
        Ok(gw) => info!(
            "Gateway {} (category {:02X}.{:02X}, firmware {:02X})",
            gw.address, gw.category, gw.subcategory, gw.firmware
        ),
        Err(e) => warn!("Gateway did not identify itself: {}", e),
    }

    let mut scheduler = Scheduler::new(modem.clone());
    if let Some(location) = config.location()? {
        scheduler = scheduler.with_location(location);
    }
    let scheduler = Arc::new(scheduler);

    for spec in &config.timers {
        match spec.install(&modem, &scheduler) {
            Ok(id) => info!("Installed {} from config", id),
            Err(e) => warn!("Skipping timer {:?}: {}", spec, e),
        }
    }
    if let Some(secs) = config.scheduler.auto_update_secs {
        scheduler
            .start_auto_update(Duration::from_secs(secs))
            .context("starting auto update")?;
    }

    match config.remote_config() {
        Some(remote) => {
            let server = RemoteServer::bind(&remote, modem.clone(), scheduler.clone()).await?;
            server.run(shutdown_signal()).await?;
        }
        None => shutdown_signal().await,
    }

    info!("Shutting down");
    scheduler.shutdown();
    modem.shutdown().await;

    if config.devices.save_on_exit {
        if let Some(path) = &config.devices.file {
            registry
                .save(path)
                .with_context(|| format!("saving devices {}", path.display()))?;
            info!("Saved device levels to {}", path.display());
        }
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Cannot listen for ctrl-c: {}", e);
        std::future::pending::<()>().await;
    }
}
