//! JSON wire protocol for the two real-time channels.
//!
//! The sensor channel is push-only: the server sends a [`SensorReading`]
//! whenever a new one is ingested. The chat channel is bidirectional: clients
//! send [`ClientFrame`]s and receive [`ServerEvent`]s.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SkySenseError;
use crate::types::{MessageId, Role, ThreadId, UserId};

// ---------------------------------------------------------------------------
// Sensor channel
// ---------------------------------------------------------------------------

/// A normalized snapshot of the weather station.
///
/// Every measurement is optional: a field the device did not report stays
/// `None` (serialized as `null`) instead of being folded into a zero reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SensorReading {
    /// Outdoor temperature in degrees Celsius.
    pub temperature: Option<f64>,
    /// Relative humidity in percent.
    pub humidity: Option<f64>,
    /// Wind speed as reported by the device.
    pub wind_speed: Option<f64>,
    /// Wind direction in degrees.
    pub wind_direction: Option<f64>,
    /// Rain rate in mm/h.
    pub rain_rate: Option<f64>,
    /// Solar irradiance as reported by the device.
    pub light: Option<f64>,
    /// Milliseconds since the Unix epoch at which the reading was produced.
    pub timestamp: i64,
}

impl SensorReading {
    /// Serialize to the JSON text pushed on the sensor channel and
    /// republished to the telemetry topic.
    pub fn to_json(&self) -> Result<String, SkySenseError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn produced_at(&self) -> Option<DateTime<Utc>> {
        DateTime::<Utc>::from_timestamp_millis(self.timestamp)
    }
}

// ---------------------------------------------------------------------------
// Chat channel: client -> server
// ---------------------------------------------------------------------------

/// Frames a chat client may send.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    SendMessage {
        #[serde(rename = "threadId")]
        thread_id: i64,
        message: String,
        #[serde(rename = "receiverId")]
        receiver_id: i64,
    },
}

// ---------------------------------------------------------------------------
// Chat channel: server -> client
// ---------------------------------------------------------------------------

/// A persisted chat message as embedded in a `new_message` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageView {
    pub id: MessageId,
    pub thread_id: ThreadId,
    pub sender_id: UserId,
    pub sender_role: Role,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

/// Events the server pushes on the chat channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Sent once, right after the connection authenticated.
    Hello {
        #[serde(rename = "userId")]
        user_id: UserId,
        role: Role,
    },

    /// Sent only to the connection whose frame was rejected.
    Error { message: String },

    /// Sent to every live session of both parties once the message is stored.
    NewMessage {
        #[serde(rename = "threadId")]
        thread_id: ThreadId,
        message: MessageView,
    },
}

impl ServerEvent {
    pub fn error(message: impl Into<String>) -> Self {
        ServerEvent::Error {
            message: message.into(),
        }
    }

    pub fn to_json(&self) -> Result<String, SkySenseError> {
        Ok(serde_json::to_string(self)?)
    }
}
