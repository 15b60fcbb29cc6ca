//! EnvSense agent: samples a BME680 and publishes readings over MQTT.
//!
//! Usage: `es-agent [CONFIG.toml]`. Without a path every setting takes its
//! default; `MQTT_HOST`, `MQTT_PORT` and `MQTT_TOPIC_BASE` override either.

use std::sync::Arc;

use tokio::signal::unix::{SignalKind, signal};
use tracing_subscriber::EnvFilter;

use es_agent::config::AgentConfig;
use es_agent::sampling::SamplingLoop;
use es_mqtt_channel::{ConnectionManager, ConnectionState, MqttTransport};
use es_sensor::IioSensor;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "es-agent starting");

    // ── Load config ─────────────────────────────────────────────
    let config_path = std::env::args().nth(1);
    let config = AgentConfig::load(config_path.as_deref())?;
    tracing::info!(
        host = %config.mqtt.broker_host,
        port = config.mqtt.broker_port,
        topic_base = %config.topic_base,
        "config loaded"
    );

    // ── Sensor + MQTT ───────────────────────────────────────────
    let sensor = IioSensor::new(config.sensor.clone());
    let transport = Arc::new(MqttTransport::new(&config.mqtt));
    let state = Arc::new(ConnectionState::new(config.endpoint(), config.retry.policy()));
    let manager = ConnectionManager::new(transport, state, config.mqtt.connect_timeout());

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    let mut sampling = SamplingLoop::new(
        &manager,
        &sensor,
        config.topic_base.clone(),
        config.sample_interval(),
    );

    tokio::select! {
        () = async {
            manager.connect().await;
            sampling.run().await;
        } => {
            tracing::error!("sampling loop exited unexpectedly");
        }
        _ = sigint.recv() => {
            tracing::info!("received SIGINT, shutting down");
        }
        _ = sigterm.recv() => {
            tracing::info!("received SIGTERM, shutting down");
        }
    }

    manager.shutdown().await;
    tracing::info!("es-agent stopped");
    Ok(())
}
