//! v001 -- Initial schema creation.
//!
//! Creates the four core tables: `users`, `data_sensor`, `chat_threads` and
//! `chat_messages`.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Users
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS users (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    name          TEXT NOT NULL,
    email         TEXT NOT NULL UNIQUE,
    password_hash TEXT NOT NULL,               -- argon2 PHC string
    role          TEXT NOT NULL DEFAULT 'client',   -- client | admin
    status        TEXT NOT NULL DEFAULT 'pending',  -- pending | approved | rejected
    created_at    TEXT NOT NULL                -- RFC-3339 UTC
);

CREATE INDEX IF NOT EXISTS idx_users_role_status ON users(role, status);

-- ----------------------------------------------------------------
-- Raw sensor readings
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS data_sensor (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    wind_speed  REAL,
    temperature REAL,                          -- degrees Celsius
    wind_degree REAL,
    humidity    REAL,
    ldr         REAL,                          -- light
    rain_rate   REAL,                          -- mm/h
    timestamp   TEXT NOT NULL                  -- RFC-3339 UTC, write time
);

CREATE INDEX IF NOT EXISTS idx_data_sensor_ts ON data_sensor(timestamp DESC);

-- ----------------------------------------------------------------
-- Chat threads: one per (client, admin) pair.  No foreign key to
-- users: history outlives the accounts that wrote it.
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS chat_threads (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    client_id  INTEGER NOT NULL,
    admin_id   INTEGER NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_chat_threads_pair
    ON chat_threads(client_id, admin_id);

CREATE INDEX IF NOT EXISTS idx_chat_threads_admin
    ON chat_threads(admin_id, updated_at DESC);

-- ----------------------------------------------------------------
-- Chat messages (append-only, ordered by id)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS chat_messages (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    thread_id   INTEGER NOT NULL,
    sender_id   INTEGER NOT NULL,
    sender_role TEXT NOT NULL,
    message     TEXT NOT NULL,
    created_at  TEXT NOT NULL,

    FOREIGN KEY (thread_id) REFERENCES chat_threads(id) ON DELETE RESTRICT
);

CREATE INDEX IF NOT EXISTS idx_chat_messages_thread
    ON chat_messages(thread_id, id DESC);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
