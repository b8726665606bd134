// ABOUTME: Runs every configured ESME and SMSC connection until Ctrl-C
// ABOUTME: Can write a sample configuration to get started

use argh::FromArgs;
use smpp_sim::cache::InMemoryMessageCache;
use smpp_sim::config::SimulatorConfig;
use smpp_sim::registry::ProviderRegistry;
use smpp_sim::simulator::Simulator;
use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{Level, error, info};
use tracing_subscriber::FmtSubscriber;

/// SMPP ESME/SMSC simulator
#[derive(FromArgs)]
struct CliArgs {
    /// whether or not to enable debugging
    #[argh(switch, short = 'd')]
    debugging: bool,

    /// path of the TOML configuration (default: simulator.toml)
    #[argh(option, short = 'c')]
    config: Option<PathBuf>,

    /// write a sample configuration to the config path and exit
    #[argh(switch)]
    write_default: bool,

    /// capacity of the in-memory message cache (default: 10000)
    #[argh(option)]
    cache_capacity: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let cli_args: CliArgs = argh::from_env();

    let level = if cli_args.debugging { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let path = cli_args
        .config
        .unwrap_or_else(|| PathBuf::from("simulator.toml"));

    if cli_args.write_default {
        SimulatorConfig::write_default(&path)?;
        println!("Wrote sample configuration to {}", path.display());
        return Ok(());
    }

    let config = SimulatorConfig::load(&path).map_err(|err| {
        eprintln!("Could not load {}: {err}", path.display());
        err
    })?;

    let cache = Arc::new(InMemoryMessageCache::with_capacity(
        cli_args.cache_capacity.unwrap_or(10_000),
    ));
    let simulator = Simulator::new(config, cache, ProviderRegistry::new());

    let report = simulator.start().await;
    for key in &report.started {
        info!(manager = %key, "started");
    }
    for (key, reason) in &report.failed {
        error!(manager = %key, %reason, "failed to start");
    }

    info!("running, press Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;

    info!("shutting down");
    simulator.stop().await;
    Ok(())
}
