//! Polling of the weather station's cloud API.
//!
//! Every cycle fetches the device's real-time report, converts it to metric
//! units, replaces the latest-reading slot and pushes the result to live
//! sensor sessions. A separate slower job snapshots the slot into the
//! database.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::{interval, interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use skysense_shared::constants::MM_PER_INCH;
use skysense_shared::protocol::SensorReading;
use skysense_store::NewReading;

use crate::broadcast::SensorBroadcaster;
use crate::config::EcowittConfig;
use crate::error::ServerError;
use crate::gateway::Gateway;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("device API error {code}: {msg}")]
    Api { code: i64, msg: String },

    #[error("report carries no device data")]
    NoData,

    #[error("malformed device data: {0}")]
    Malformed(#[from] serde_json::Error),
}

// ---------------------------------------------------------------------------
// Device report
// ---------------------------------------------------------------------------

/// Envelope returned by the real-time endpoint. `data` is an object when the
/// device reported and an empty array when it did not.
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceReport {
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub msg: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl DeviceReport {
    pub fn into_data(self) -> Result<DeviceData, IngestError> {
        if self.code != 0 {
            return Err(IngestError::Api {
                code: self.code,
                msg: self.msg,
            });
        }
        match self.data {
            value @ serde_json::Value::Object(_) => Ok(serde_json::from_value(value)?),
            _ => Err(IngestError::NoData),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeviceData {
    pub outdoor: Option<Outdoor>,
    pub wind: Option<Wind>,
    pub rainfall: Option<Rainfall>,
    pub solar_and_uvi: Option<SolarAndUvi>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Outdoor {
    pub temperature: Option<Measurement>,
    pub humidity: Option<Measurement>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Wind {
    pub wind_speed: Option<Measurement>,
    pub wind_direction: Option<Measurement>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Rainfall {
    pub rain_rate: Option<Measurement>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SolarAndUvi {
    pub solar: Option<Measurement>,
}

/// One measurement as reported, e.g. `{"time": "...", "unit": "℉", "value": "71.6"}`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Measurement {
    #[serde(default)]
    pub value: serde_json::Value,
}

impl Measurement {
    /// The numeric value; the API sends numbers as strings.
    pub fn number(&self) -> Option<f64> {
        let n = match &self.value {
            serde_json::Value::String(s) => s.trim().parse::<f64>().ok()?,
            serde_json::Value::Number(n) => n.as_f64()?,
            _ => return None,
        };
        n.is_finite().then_some(n)
    }
}

fn value(m: &Option<Measurement>) -> Option<f64> {
    m.as_ref().and_then(Measurement::number)
}

pub fn fahrenheit_to_celsius(f: f64) -> f64 {
    (f - 32.0) * 5.0 / 9.0
}

pub fn inches_to_mm(inches: f64) -> f64 {
    inches * MM_PER_INCH
}

/// Convert a device report to a metric [`SensorReading`] stamped `now_ms`.
/// Missing or unparsable fields stay `None`.
pub fn normalize(data: &DeviceData, now_ms: i64) -> SensorReading {
    let outdoor = data.outdoor.as_ref();
    let wind = data.wind.as_ref();

    SensorReading {
        temperature: outdoor
            .and_then(|o| value(&o.temperature))
            .map(fahrenheit_to_celsius),
        humidity: outdoor.and_then(|o| value(&o.humidity)),
        wind_speed: wind.and_then(|w| value(&w.wind_speed)),
        wind_direction: wind.and_then(|w| value(&w.wind_direction)),
        rain_rate: data
            .rainfall
            .as_ref()
            .and_then(|r| value(&r.rain_rate))
            .map(inches_to_mm),
        light: data.solar_and_uvi.as_ref().and_then(|s| value(&s.solar)),
        timestamp: now_ms,
    }
}

// ---------------------------------------------------------------------------
// Sources
// ---------------------------------------------------------------------------

/// Anything that can produce one device report per call.
pub trait ReadingSource: Send + Sync {
    fn fetch(&self) -> impl Future<Output = Result<DeviceData, IngestError>> + Send;
}

/// Client for the Ecowitt real-time endpoint.
pub struct EcowittClient {
    http: reqwest::Client,
    url: String,
    params: Vec<(&'static str, String)>,
}

impl EcowittClient {
    pub fn new(config: &EcowittConfig, timeout: Duration) -> Result<Self, IngestError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            url: config.url.clone(),
            params: vec![
                ("application_key", config.application_key.clone()),
                ("api_key", config.api_key.clone()),
                ("mac", config.mac.clone()),
                ("call_back", "all".to_string()),
            ],
        })
    }
}

impl ReadingSource for EcowittClient {
    async fn fetch(&self) -> Result<DeviceData, IngestError> {
        let report: DeviceReport = self
            .http
            .get(&self.url)
            .query(&self.params)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        report.into_data()
    }
}

// ---------------------------------------------------------------------------
// Latest reading
// ---------------------------------------------------------------------------

/// Single-slot holder of the most recent reading. Writers replace the whole
/// value; readers always see either the previous or the new reading.
#[derive(Clone)]
pub struct LatestReading {
    tx: Arc<watch::Sender<Option<SensorReading>>>,
}

impl LatestReading {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    /// Store `reading`, returning the one it replaced.
    pub fn replace(&self, reading: SensorReading) -> Option<SensorReading> {
        self.tx.send_replace(Some(reading))
    }

    pub fn get(&self) -> Option<SensorReading> {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<SensorReading>> {
        self.tx.subscribe()
    }
}

impl Default for LatestReading {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Poller
// ---------------------------------------------------------------------------

pub struct Poller<S> {
    source: S,
    latest: LatestReading,
    broadcaster: SensorBroadcaster,
}

impl<S: ReadingSource> Poller<S> {
    pub fn new(source: S, latest: LatestReading, broadcaster: SensorBroadcaster) -> Self {
        Self {
            source,
            latest,
            broadcaster,
        }
    }

    /// One fetch, normalize, store and broadcast pass. A failed fetch leaves
    /// the slot untouched and returns `None`.
    pub async fn run_cycle(&self) -> Option<SensorReading> {
        let data = match self.source.fetch().await {
            Ok(data) => data,
            Err(IngestError::NoData) => {
                debug!("Device report empty, skipping cycle");
                return None;
            }
            Err(e) => {
                warn!(error = %e, "Device fetch failed");
                return None;
            }
        };

        let reading = normalize(&data, Utc::now().timestamp_millis());
        self.latest.replace(reading.clone());

        let reached = self.broadcaster.publish(&reading).await;
        debug!(
            reached,
            temperature = ?reading.temperature,
            humidity = ?reading.humidity,
            "Reading broadcast"
        );

        Some(reading)
    }

    /// Poll forever. Ticks missed while a slow fetch was in flight are
    /// skipped rather than replayed.
    pub async fn run(self, period: Duration) {
        info!(?period, "Ingestion poller started");
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            self.run_cycle().await;
        }
    }
}

// ---------------------------------------------------------------------------
// Periodic persistence
// ---------------------------------------------------------------------------

/// Write whatever the slot currently holds. Returns the new row id, or
/// `None` when nothing has been ingested yet.
pub async fn persist_latest(
    gateway: &Gateway,
    latest: &LatestReading,
) -> Result<Option<i64>, ServerError> {
    let Some(reading) = latest.get() else {
        return Ok(None);
    };

    let id = gateway.insert_reading(NewReading::from(&reading)).await?;
    Ok(Some(id))
}

/// Snapshot the slot every `period`, first after one full period.
pub async fn run_persist_loop(gateway: Gateway, latest: LatestReading, period: Duration) {
    info!(?period, "Reading persistence job started");
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;
        match persist_latest(&gateway, &latest).await {
            Ok(Some(id)) => info!(id, "Latest reading persisted"),
            Ok(None) => debug!("No reading yet, nothing persisted"),
            Err(e) => warn!(error = %e, "Failed to persist latest reading"),
        }
    }
}
