//! # skysense-server
//!
//! Backend of the SkySense weather station.
//!
//! This binary provides:
//! - **Ingestion poller** that fetches the station's real-time report every
//!   few seconds, converts it to metric units and keeps the latest reading
//! - **Sensor channel** (`/ws/sensor`) pushing every new reading to viewers,
//!   optionally republished to an MQTT topic
//! - **Chat channel** (`/ws/chat`) between clients and admins, with every
//!   message stored before it is delivered
//! - **REST API** (axum) for accounts, sensor history and chat history
//! - **Hourly snapshot** of the latest reading into SQLite

mod api;
mod auth;
mod broadcast;
mod chat;
mod config;
mod error;
mod gateway;
mod ingest;
mod registry;
mod telemetry;
mod ws;

use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use skysense_store::Database;

use crate::api::AppState;
use crate::auth::Authenticator;
use crate::broadcast::SensorBroadcaster;
use crate::config::ServerConfig;
use crate::gateway::Gateway;
use crate::ingest::{EcowittClient, Poller};
use crate::telemetry::TelemetrySink;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,skysense_server=debug")),
        )
        .init();

    info!("Starting SkySense server v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");

    // -----------------------------------------------------------------------
    // 3. Initialize subsystems
    // -----------------------------------------------------------------------
    let db = Database::open_at(&config.database_path)
        .with_context(|| format!("opening database at {}", config.database_path.display()))?;
    let gateway = Gateway::new(db);

    let auth = Authenticator::from_config(&config).context("loading token signing key")?;

    let app_state = AppState::new(gateway.clone(), auth, config.clone());

    let broadcaster = SensorBroadcaster::new(app_state.sensor_sessions.clone(), telemetry_sink(&config));

    // -----------------------------------------------------------------------
    // 4. Spawn background tasks
    // -----------------------------------------------------------------------
    if config.ecowitt.is_configured() {
        let client = EcowittClient::new(&config.ecowitt, config.fetch_timeout)
            .context("building device API client")?;
        let poller = Poller::new(client, app_state.latest.clone(), broadcaster);
        tokio::spawn(poller.run(config.poll_interval));
    } else {
        warn!("ECOWITT_APP_KEY / ECOWITT_API_KEY / ECOWITT_MAC not set, ingestion disabled");
    }

    tokio::spawn(ingest::run_persist_loop(
        gateway,
        app_state.latest.clone(),
        config.persist_interval,
    ));

    // -----------------------------------------------------------------------
    // 5. Run the HTTP + WebSocket server (blocks until shutdown)
    // -----------------------------------------------------------------------
    tokio::select! {
        result = api::serve(app_state, config.http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}

#[cfg(feature = "mqtt")]
fn telemetry_sink(config: &ServerConfig) -> Option<Arc<dyn TelemetrySink>> {
    let broker = config.mqtt_broker.as_deref()?;
    match telemetry::MqttPublisher::start(broker, &config.mqtt_topic) {
        Ok(publisher) => {
            info!(broker, topic = %config.mqtt_topic, "Republishing readings over MQTT");
            Some(Arc::new(publisher))
        }
        Err(e) => {
            warn!(broker, error = %e, "MQTT client unavailable, readings not republished");
            None
        }
    }
}

#[cfg(not(feature = "mqtt"))]
fn telemetry_sink(config: &ServerConfig) -> Option<Arc<dyn TelemetrySink>> {
    if config.mqtt_broker.is_some() {
        info!("Built without the `mqtt` feature, readings not republished");
    }
    None
}
