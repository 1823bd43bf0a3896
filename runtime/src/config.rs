//! Runtime configuration, loaded from the process environment.
//!
//! Mirrors the teacher binary's own `main.rs`: plain environment
//! variables with documented defaults, loaded via `dotenvy` if a `.env`
//! file is present. No config-parsing crate is introduced — none is
//! needed for a handful of scalar settings.

use std::time::Duration;

/// Default commands-topic name.
pub const DEFAULT_COMMANDS_TOPIC: &str = "commands";
/// Default events-topic name.
pub const DEFAULT_EVENTS_TOPIC: &str = "events";
/// Default synchronous-create deadline, milliseconds.
pub const DEFAULT_SYNC_TIMEOUT_MS: u64 = 5000;
/// Default sliding-buffer capacity for `streamCommands`/`streamEvents`
/// when no explicit capacity is requested.
pub const DEFAULT_STREAM_BUFFER_SIZE: usize = 10;

/// Runtime configuration for [`crate::commander::Commander`].
///
/// Broker connection parameters (`REDPANDA_BROKERS`) and index
/// connection parameters (`DATABASE_URL`) are read directly by the
/// `cqrsbus-redpanda`/`cqrsbus-postgres` adapter crates, not by this
/// struct — `Commander` only needs the two topic names, the default
/// synchronous deadline, and the default stream capacity.
#[derive(Clone, Debug)]
pub struct Config {
    /// Broker topic commands are appended to. `COMMANDS_TOPIC`.
    pub commands_topic: String,
    /// Broker topic events are appended to. `EVENTS_TOPIC`.
    pub events_topic: String,
    /// Default deadline for a synchronous create. `SYNC_TIMEOUT_MS`.
    pub sync_timeout: Duration,
    /// Default sliding-buffer capacity for un-capacitied streams.
    /// `STREAM_BUFFER_SIZE`.
    pub stream_buffer_size: usize,
}

impl Config {
    /// Load configuration from the process environment, applying a
    /// `.env` file if present, falling back to the documented default
    /// for any variable that is unset or fails to parse.
    #[must_use]
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();
        Self {
            commands_topic: env_or("COMMANDS_TOPIC", DEFAULT_COMMANDS_TOPIC),
            events_topic: env_or("EVENTS_TOPIC", DEFAULT_EVENTS_TOPIC),
            sync_timeout: Duration::from_millis(env_parsed_or(
                "SYNC_TIMEOUT_MS",
                DEFAULT_SYNC_TIMEOUT_MS,
            )),
            stream_buffer_size: env_parsed_or("STREAM_BUFFER_SIZE", DEFAULT_STREAM_BUFFER_SIZE),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            commands_topic: DEFAULT_COMMANDS_TOPIC.to_string(),
            events_topic: DEFAULT_EVENTS_TOPIC.to_string(),
            sync_timeout: Duration::from_millis(DEFAULT_SYNC_TIMEOUT_MS),
            stream_buffer_size: DEFAULT_STREAM_BUFFER_SIZE,
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parsed_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}

/// Initialize `tracing` with an `EnvFilter` (`RUST_LOG`, default
/// `"info"`) and a plain `fmt` layer. Safe to call once at process
/// startup; matches the teacher's `init_tracing()` free function.
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_documented_defaults() {
        let config = Config::default();
        assert_eq!(config.commands_topic, "commands");
        assert_eq!(config.events_topic, "events");
        assert_eq!(config.sync_timeout, Duration::from_millis(5000));
        assert_eq!(config.stream_buffer_size, 10);
    }

    #[test]
    fn env_parsed_or_falls_back_on_missing_or_invalid() {
        assert_eq!(env_parsed_or::<u64>("CQRSBUS_TEST_DOES_NOT_EXIST", 42), 42);
    }
}
