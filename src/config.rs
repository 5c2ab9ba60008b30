//! Command-line configuration for the signaling server.
//!
//! Every option can also be given through an environment variable.

use std::time::Duration;

use thiserror::Error;

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_PING_INTERVAL_SECS: u64 = 30;
pub const DEFAULT_PONG_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be greater than zero")]
    ZeroDuration(&'static str),
}

/// CLI arguments for the signaling server.
#[derive(clap::Parser, Debug, Clone)]
#[command(version, about = "Two-peer WebSocket signaling relay")]
pub struct Cli {
    /// Host to bind to.
    #[arg(long, default_value = DEFAULT_HOST, env = "DUET_HOST")]
    pub host: String,

    /// WebSocket port.
    #[arg(short, long, default_value_t = DEFAULT_PORT, env = "DUET_PORT")]
    pub port: u16,

    /// Seconds between keepalive pings.
    #[arg(long, default_value_t = DEFAULT_PING_INTERVAL_SECS)]
    pub ping_interval: u64,

    /// Seconds to wait for a pong before dropping the connection.
    #[arg(long, default_value_t = DEFAULT_PONG_TIMEOUT_SECS)]
    pub pong_timeout: u64,

    /// Log level filter, used when `RUST_LOG` is not set.
    #[arg(long, default_value = "info", env = "DUET_LOG")]
    pub log_level: String,
}

/// Keepalive timing for a single connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Keepalive {
    pub ping_interval: Duration,
    pub pong_timeout: Duration,
}

impl Default for Keepalive {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(DEFAULT_PING_INTERVAL_SECS),
            pong_timeout: Duration::from_secs(DEFAULT_PONG_TIMEOUT_SECS),
        }
    }
}

/// Fully resolved server configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub keepalive: Keepalive,
    pub log_level: String,
}

impl ServerConfig {
    pub fn from_cli(cli: &Cli) -> Result<Self, ConfigError> {
        if cli.ping_interval == 0 {
            return Err(ConfigError::ZeroDuration("ping interval"));
        }
        if cli.pong_timeout == 0 {
            return Err(ConfigError::ZeroDuration("pong timeout"));
        }

        Ok(Self {
            host: cli.host.clone(),
            port: cli.port,
            keepalive: Keepalive {
                ping_interval: Duration::from_secs(cli.ping_interval),
                pong_timeout: Duration::from_secs(cli.pong_timeout),
            },
            log_level: cli.log_level.clone(),
        })
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Public URL clients connect to
    pub fn ws_url(&self) -> String {
        format!("ws://{}", self.bind_addr())
    }
}
