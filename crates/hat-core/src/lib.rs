//! Foundational low-level utilities shared across sorting-hat crates.
//!
//! Provides time helpers used by token expiry and marker TTL math, plus text
//! helpers for bounded error messages and secret redaction in logs.

pub mod text_utils;
pub mod time_utils;

pub use text_utils::{redact_secret, truncate_for_error};
pub use time_utils::{
    current_unix_timestamp_ms, current_unix_timestamp_secs_f64, is_expired_unix_ms,
};
