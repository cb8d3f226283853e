//! # skysense-store
//!
//! Relational storage for SkySense, backed by SQLite.
//!
//! The crate exposes a synchronous `Database` handle that wraps a
//! `rusqlite::Connection` and provides typed helpers for sensor readings,
//! user accounts and the client/admin chat. Callers on an async runtime are
//! expected to run these on a blocking worker.

pub mod chat;
pub mod database;
pub mod migrations;
pub mod models;
pub mod readings;
pub mod users;

mod error;

pub use database::Database;
pub use error::StoreError;
pub use models::*;
