#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;

use riskwatch::core::config::ConfigManager;
use riskwatch::core::monitor::SiteMonitor;

#[derive(Parser)]
#[command(name = "riskwatch")]
#[command(about = "Fuses site signals into a live risk score and alert stream", long_about = None)]
struct Cli {
    /// Directory holding settings.json
    #[arg(long, default_value = ".")]
    config_dir: PathBuf,
    /// Use synthetic data for every category
    #[arg(long)]
    synthetic: bool,
    /// Print the effective settings and exit
    #[arg(long)]
    print_config: bool,
    /// Log filter used when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&cli.log_level))
        .init();

    let manager = ConfigManager::new(cli.config_dir);
    let mut settings = manager.load();
    settings.apply_env_overrides();
    if cli.synthetic {
        settings.force_synthetic();
    }

    if cli.print_config {
        println!("{}", serde_json::to_string_pretty(&settings)?);
        return Ok(());
    }

    log::info!(
        "Monitoring {} ({}, {}) from {}",
        settings.site.name,
        settings.site.latitude,
        settings.site.longitude,
        manager.path().display()
    );

    let monitor = SiteMonitor::new(settings).context("invalid configuration")?;
    let mut subscription = monitor.subscribe();
    let handle = monitor
        .spawn()
        .context("aggregation loop already running")?;

    loop {
        tokio::select! {
            event = subscription.recv() => {
                let Some(event) = event else { break };
                match serde_json::to_string(&event) {
                    Ok(line) => println!("{line}"),
                    Err(e) => log::error!("Could not serialize event: {}", e),
                }
            }
            signal = tokio::signal::ctrl_c() => {
                signal.context("failed to listen for ctrl-c")?;
                log::info!("Shutting down");
                break;
            }
        }
    }

    monitor.unsubscribe(subscription.id);
    monitor.shutdown();
    handle.await.context("aggregation loop panicked")?;
    Ok(())
}
