//! openHASP bridge
//!
//! Main entry point: load the configuration, connect to the broker and run
//! until interrupted.

use anyhow::{Context, Result};
use clap::Parser;
use hasp_config::BridgeConfig;
use hasp_server::{mqtt, Bridge, RestoreStateStore, RumqttPublisher};
use rumqttc::{Event, Packet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Wait between reconnect attempts after a broker error
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Parser)]
#[command(name = "openhasp-bridge", version, about = "Keep openHASP plates in sync with Home Assistant")]
struct Cli {
    /// Configuration directory (holds secrets.yaml and .storage/)
    #[arg(short, long, env = "OPENHASP_CONFIG", default_value = ".")]
    config: PathBuf,

    /// Configuration file, relative to the configuration directory
    #[arg(short, long, default_value = "configuration.yaml")]
    file: PathBuf,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!(version = env!("CARGO_PKG_VERSION"), "Starting openHASP bridge");

    let config = BridgeConfig::load(cli.config.clone(), &cli.file)
        .with_context(|| format!("loading {}", cli.config.join(&cli.file).display()))?;

    let (client, mut eventloop) = mqtt::connect(&config.mqtt);
    let publisher = Arc::new(RumqttPublisher::new(client));
    let store = Arc::new(RestoreStateStore::new(&cli.config));
    let bridge = Bridge::start(&config, publisher.clone(), store);
    let subscriptions = bridge.subscriptions();

    info!(plates = ?bridge.plate_names(), "openHASP bridge is running");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down...");
                break;
            }
            event = eventloop.poll() => match event {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    info!(topics = subscriptions.len(), "Connected to MQTT broker");
                    // Sessions are clean, so every reconnect subscribes again
                    if let Err(err) = publisher.subscribe_all(&subscriptions) {
                        error!(%err, "Cannot subscribe");
                    }
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    bridge.dispatch(&publish.topic, &publish.payload);
                }
                Ok(event) => debug!(?event, "MQTT event"),
                Err(err) => {
                    error!(%err, "MQTT connection error, retrying in {:?}", RECONNECT_DELAY);
                    tokio::time::sleep(RECONNECT_DELAY).await;
                }
            }
        }
    }

    // Runners may still be publishing; keep the event loop draining them
    let shutdown = bridge.shutdown();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            event = eventloop.poll() => if let Err(err) = event {
                debug!(%err, "MQTT connection error during shutdown");
                tokio::time::sleep(RECONNECT_DELAY).await;
            },
        }
    }
    Ok(())
}
