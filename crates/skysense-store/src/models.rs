//! Domain model structs persisted in the SkySense database.
//!
//! Every struct that leaves the store derives `Serialize` so that the HTTP
//! layer can return it as JSON without an intermediate DTO.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use skysense_shared::protocol::{MessageView, SensorReading};
use skysense_shared::types::{MessageId, Role, ThreadId, UserId, UserStatus};

// ---------------------------------------------------------------------------
// Sensor readings
// ---------------------------------------------------------------------------

/// Measurements to append to `data_sensor`. The row timestamp is assigned at
/// write time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewReading {
    pub wind_speed: Option<f64>,
    pub temperature: Option<f64>,
    pub wind_direction: Option<f64>,
    pub humidity: Option<f64>,
    pub light: Option<f64>,
    pub rain_rate: Option<f64>,
}

impl From<&SensorReading> for NewReading {
    fn from(reading: &SensorReading) -> Self {
        Self {
            wind_speed: reading.wind_speed,
            temperature: reading.temperature,
            wind_direction: reading.wind_direction,
            humidity: reading.humidity,
            light: reading.light,
            rain_rate: reading.rain_rate,
        }
    }
}

/// A row of `data_sensor`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredReading {
    pub id: i64,
    pub wind_speed: Option<f64>,
    pub temperature: Option<f64>,
    pub wind_direction: Option<f64>,
    pub humidity: Option<f64>,
    pub light: Option<f64>,
    pub rain_rate: Option<f64>,
    pub created_at: DateTime<Utc>,
}

/// Per-day statistics over `data_sensor`. Absent measurements do not take
/// part in the aggregates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyAggregate {
    /// Calendar day (UTC), `YYYY-MM-DD`.
    pub day: String,
    pub avg_wind_speed: Option<f64>,
    pub max_wind_speed: Option<f64>,
    pub min_wind_speed: Option<f64>,
    pub avg_temperature: Option<f64>,
    pub max_temperature: Option<f64>,
    pub min_temperature: Option<f64>,
    pub avg_humidity: Option<f64>,
    pub max_humidity: Option<f64>,
    pub min_humidity: Option<f64>,
    pub avg_light: Option<f64>,
    pub max_light: Option<f64>,
    pub min_light: Option<f64>,
}

/// Inclusive time window over reading timestamps. `None` leaves that side
/// open.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ReadingFilter {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub limit: u32,
    pub offset: u32,
}

impl Default for Page {
    fn default() -> Self {
        Self {
            limit: skysense_shared::constants::DEFAULT_PAGE_LIMIT,
            offset: 0,
        }
    }
}

// ---------------------------------------------------------------------------
// Users
// ---------------------------------------------------------------------------

/// A full `users` row. The password hash never leaves the process.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct User {
    pub id: UserId,
    pub name: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub role: Role,
    pub status: UserStatus,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn summary(&self) -> UserSummary {
        UserSummary {
            id: self.id,
            name: self.name.clone(),
            email: self.email.clone(),
            role: self.role,
            status: self.status,
            created_at: self.created_at,
        }
    }
}

/// Public projection of a user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserSummary {
    pub id: UserId,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub status: UserStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub role: Role,
    pub status: UserStatus,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct UserFilter {
    pub status: Option<UserStatus>,
    pub role: Option<Role>,
}

/// Partial update of a user's profile fields. `None` leaves the column as is.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserUpdate {
    pub name: Option<String>,
    pub email: Option<String>,
    pub role: Option<Role>,
    pub status: Option<UserStatus>,
}

impl UserUpdate {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.email.is_none() && self.role.is_none() && self.status.is_none()
    }
}

// ---------------------------------------------------------------------------
// Chat
// ---------------------------------------------------------------------------

/// The conversation between one client and one admin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatThread {
    pub id: ThreadId,
    pub client_id: UserId,
    pub admin_id: UserId,
    pub updated_at: DateTime<Utc>,
}

impl ChatThread {
    pub fn has_participant(&self, user: UserId) -> bool {
        self.client_id == user || self.admin_id == user
    }

    /// The other side of the conversation, or `None` if `user` is not in it.
    pub fn counterpart(&self, user: UserId) -> Option<UserId> {
        if user == self.client_id {
            Some(self.admin_id)
        } else if user == self.admin_id {
            Some(self.client_id)
        } else {
            None
        }
    }
}

/// A thread as listed in an admin's inbox.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadSummary {
    pub id: ThreadId,
    pub client_id: UserId,
    pub client_name: String,
    pub client_email: String,
    pub updated_at: DateTime<Utc>,
    pub last_message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: MessageId,
    pub thread_id: ThreadId,
    pub sender_id: UserId,
    pub sender_role: Role,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

impl From<ChatMessage> for MessageView {
    fn from(m: ChatMessage) -> Self {
        MessageView {
            id: m.id,
            thread_id: m.thread_id,
            sender_id: m.sender_id,
            sender_role: m.sender_role,
            message: m.message,
            created_at: m.created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewMessage {
    pub thread_id: ThreadId,
    pub sender_id: UserId,
    pub sender_role: Role,
    pub message: String,
}
