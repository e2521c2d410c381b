//! Relay configuration loaded from environment variables.
//!
//! Follows 12-factor style: all settings come from environment variables
//! (or a `.env` file via `dotenvy`). Unset or unparsable numeric values fall
//! back to their defaults.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;

use crate::domain::QueuePolicy;

/// Default bind address.
const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8765";

/// Bytes allowed per frame on top of the UTF-8 payload fields for the JSON
/// envelope and escapes.
const FRAME_OVERHEAD_BYTES: usize = 1_024;

/// Top-level relay configuration.
///
/// Loaded once at startup via [`RelayConfig::from_env`].
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Socket address to bind the HTTP server to.
    pub listen_addr: SocketAddr,

    /// Maximum number of events buffered per session.
    pub queue_capacity: usize,

    /// Queue length at or below which a draining session recovers.
    pub queue_low_water_mark: usize,

    /// How long a session may stay in `Draining` before it is evicted.
    pub drain_timeout: Duration,

    /// Period of the stalled-session reaper.
    pub reaper_interval: Duration,

    /// Minimum spacing between relayed typing events per sender.
    pub typing_debounce: Duration,

    /// Maximum handle length in characters.
    pub max_handle_len: usize,

    /// Maximum chat message length in characters.
    pub max_message_len: usize,

    /// Directory served at `/` for the browser client, if any.
    pub static_dir: Option<PathBuf>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 8765)),
            queue_capacity: 256,
            queue_low_water_mark: 128,
            drain_timeout: Duration::from_millis(5_000),
            reaper_interval: Duration::from_millis(500),
            typing_debounce: Duration::from_millis(1_000),
            max_handle_len: 64,
            max_message_len: 4_096,
            static_dir: None,
        }
    }
}

impl RelayConfig {
    /// Loads configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv().ok()` to optionally load a `.env` file.
    ///
    /// # Errors
    ///
    /// Returns an error if `LISTEN_ADDR` is set but cannot be parsed as
    /// a [`SocketAddr`].
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let listen_addr = parse_listen_addr(
            &std::env::var("LISTEN_ADDR").unwrap_or_else(|_| DEFAULT_LISTEN_ADDR.to_string()),
        )?;

        let defaults = Self::default();
        let queue_capacity = parse_env("QUEUE_CAPACITY", defaults.queue_capacity);
        let queue_low_water_mark = parse_env("QUEUE_LOW_WATER_MARK", queue_capacity / 2);

        Ok(Self {
            listen_addr,
            queue_capacity,
            queue_low_water_mark,
            drain_timeout: parse_env_millis("DRAIN_TIMEOUT_MS", defaults.drain_timeout),
            reaper_interval: parse_env_millis("REAPER_INTERVAL_MS", defaults.reaper_interval),
            typing_debounce: parse_env_millis("TYPING_DEBOUNCE_MS", defaults.typing_debounce),
            max_handle_len: parse_env("MAX_HANDLE_LEN", defaults.max_handle_len),
            max_message_len: parse_env("MAX_MESSAGE_LEN", defaults.max_message_len),
            static_dir: std::env::var_os("STATIC_DIR").map(PathBuf::from),
        })
    }

    /// Queue bounds derived from this configuration.
    #[must_use]
    pub fn queue_policy(&self) -> QueuePolicy {
        QueuePolicy::new(self.queue_capacity, self.queue_low_water_mark)
    }

    /// Largest WebSocket message accepted from a client, in bytes.
    ///
    /// Covers a maximal handle and message body at four bytes per
    /// character plus the JSON envelope.
    #[must_use]
    pub fn max_frame_bytes(&self) -> usize {
        self.max_handle_len
            .saturating_add(self.max_message_len)
            .saturating_mul(4)
            .saturating_add(FRAME_OVERHEAD_BYTES)
    }
}

fn parse_listen_addr(raw: &str) -> anyhow::Result<SocketAddr> {
    raw.parse()
        .with_context(|| format!("LISTEN_ADDR {raw:?} is not a socket address"))
}

/// Parses an environment variable as `T`, returning `default` on missing
/// or invalid values.
fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Parses an environment variable holding milliseconds. Zero is treated
/// as invalid.
fn parse_env_millis(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .filter(|ms| *ms > 0)
        .map_or(default, Duration::from_millis)
}
