//! # skysense-shared
//!
//! Types shared between the SkySense store and server: identity and role
//! types, the JSON wire protocol of the real-time channels, signed session
//! tokens, and protocol constants.

pub mod constants;
pub mod error;
pub mod protocol;
pub mod token;
pub mod types;

pub use error::{SkySenseError, TokenError};
