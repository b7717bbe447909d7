//! Configuration for the event-streaming server.
//!
//! Configuration is layered, later sources overriding earlier ones:
//! 1. Default configuration (embedded in binary)
//! 2. User-specified configuration file
//! 3. Environment variables (prefixed with `OPTISTREAM_`)
//!
//! # Environment Variables
//!
//! - `OPTISTREAM_BIND_HOST` - Interface for the subscribe and reply endpoints
//! - `OPTISTREAM_SIGNAL_ENDPOINT` - Local-only shutdown signal address
//! - `OPTISTREAM_STOP_TIMEOUT_MS` - How long `stop()` waits for acknowledgement

use crate::error::{Result, StreamError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

const DEFAULT_CONFIG: &str = include_str!("../config/default.toml");

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "OPTISTREAM";

/// The signal endpoint is local to the server's ZMQ context.
const SIGNAL_SCHEME: &str = "inproc://";

/// Server configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Interface the subscribe and reply endpoints bind on (ports are ephemeral)
    #[serde(default = "default_bind_host")]
    pub bind_host: String,
    /// Local-only base address of the shutdown signal endpoint; each run appends its number
    #[serde(default = "default_signal_endpoint")]
    pub signal_endpoint: String,
    /// Linger applied to every endpoint on close
    #[serde(default = "default_linger_ms")]
    pub linger_ms: i32,
    /// Send timeout for echoes and acknowledgements
    #[serde(default = "default_send_timeout_ms")]
    pub send_timeout_ms: i32,
    /// How long `stop()` waits for the acknowledgement
    #[serde(default = "default_stop_timeout_ms")]
    pub stop_timeout_ms: i32,
    /// High water mark for queued notifications on the subscribe endpoint
    #[serde(default = "default_receive_hwm")]
    pub receive_hwm: i32,
    /// ZMQ context IO threads
    #[serde(default = "default_io_threads")]
    pub io_threads: i32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_host: default_bind_host(),
            signal_endpoint: default_signal_endpoint(),
            linger_ms: default_linger_ms(),
            send_timeout_ms: default_send_timeout_ms(),
            stop_timeout_ms: default_stop_timeout_ms(),
            receive_hwm: default_receive_hwm(),
            io_threads: default_io_threads(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from all sources.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder().add_source(config::File::from_str(
            DEFAULT_CONFIG,
            config::FileFormat::Toml,
        ));

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }

        builder = builder.add_source(config::Environment::with_prefix(ENV_PREFIX));

        let config: ServerConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the server cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.bind_host.trim().is_empty() {
            return Err(invalid("bind_host must not be empty"));
        }
        if self.signal_endpoint.trim().is_empty() {
            return Err(invalid("signal_endpoint must not be empty"));
        }
        if !self.signal_endpoint.starts_with(SIGNAL_SCHEME) {
            return Err(invalid("signal_endpoint must be an inproc:// address"));
        }
        if self.stop_timeout_ms <= 0 {
            return Err(invalid("stop_timeout_ms must be positive"));
        }
        if self.linger_ms < 0 {
            return Err(invalid("linger_ms must not be negative"));
        }
        if self.send_timeout_ms < 0 {
            return Err(invalid("send_timeout_ms must not be negative"));
        }
        if self.io_threads < 1 {
            return Err(invalid("io_threads must be at least 1"));
        }
        Ok(())
    }

    /// Wildcard TCP endpoint for an ephemeral port on `bind_host`.
    pub fn ephemeral_endpoint(&self) -> String {
        format!("tcp://{}:*", self.bind_host)
    }

    /// Signal address bound by run number `generation`.
    ///
    /// A server thread outliving an unacknowledged stop keeps its own address,
    /// so the next run can still bind.
    pub fn run_signal_endpoint(&self, generation: u32) -> String {
        format!("{}/{}", self.signal_endpoint.trim_end_matches('/'), generation)
    }

    /// `stop_timeout_ms` as a duration.
    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms.max(0) as u64)
    }
}

fn invalid(message: &str) -> StreamError {
    StreamError::Config(config::ConfigError::Message(message.to_string()))
}

fn default_bind_host() -> String {
    "127.0.0.1".to_string()
}

fn default_signal_endpoint() -> String {
    "inproc://optistream/signal".to_string()
}

fn default_linger_ms() -> i32 {
    250
}

fn default_send_timeout_ms() -> i32 {
    1000
}

fn default_stop_timeout_ms() -> i32 {
    1000
}

fn default_receive_hwm() -> i32 {
    1000
}

fn default_io_threads() -> i32 {
    1
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_embedded_defaults_match_default_impl() {
        let embedded: ServerConfig = config::Config::builder()
            .add_source(config::File::from_str(DEFAULT_CONFIG, config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();
        assert_eq!(embedded, ServerConfig::default());
    }

    #[test]
    fn test_user_file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "bind_host = \"0.0.0.0\"\nstop_timeout_ms = 250").unwrap();

        let config = ServerConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.bind_host, "0.0.0.0");
        assert_eq!(config.stop_timeout_ms, 250);
        assert_eq!(config.signal_endpoint, "inproc://optistream/signal");
        assert_eq!(config.stop_timeout(), Duration::from_millis(250));
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "io_threads = 0").unwrap();
        assert!(matches!(
            ServerConfig::load(Some(file.path())),
            Err(StreamError::Config(_))
        ));

        let config = ServerConfig {
            bind_host: " ".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = ServerConfig {
            signal_endpoint: "tcp://127.0.0.1:5555".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_run_signal_endpoint_is_per_run() {
        let config = ServerConfig::default();
        assert_eq!(config.run_signal_endpoint(1), "inproc://optistream/signal/1");
        assert_ne!(config.run_signal_endpoint(1), config.run_signal_endpoint(2));
    }

    #[test]
    fn test_ephemeral_endpoint() {
        assert_eq!(ServerConfig::default().ephemeral_endpoint(), "tcp://127.0.0.1:*");
    }
}
