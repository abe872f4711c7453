//! Client configuration loaded from environment variables.
//!
//! Follows 12-factor style: all settings come from environment variables
//! (or a `.env` file via `dotenvy`).
//!
//! | Variable                  | Default                  |
//! |---------------------------|--------------------------|
//! | `SERVER_URL`              | `https://localhost:8443` |
//! | `API_VERSION`             | `2`                      |
//! | `HEARTBEAT_INTERVAL_MS`   | `30000`                  |
//! | `HEARTBEAT_TIMEOUT_MS`    | `90000` (`0` disables)   |
//! | `REQUEST_TIMEOUT_MS`      | `10000`                  |
//! | `ATTACH_REQUEST_ID`       | `true`                   |
//! | `AUTHENTICATE_ON_CONNECT` | `true`                   |
//! | `RECONNECT_ENABLED`       | `false`                  |
//! | `RECONNECT_BASE_DELAY_MS` | `1000`                   |
//! | `RECONNECT_MAX_DELAY_MS`  | `30000`                  |
//! | `RECONNECT_MAX_ATTEMPTS`  | `10`                     |
//! | `EVENT_BUS_CAPACITY`      | `1024`                   |
//! | `NONCE_SOURCE`            | `clock` (or `counter`)   |
//! | `CLIENT_PRIVATE_KEY`      | unset (generate)         |
//! | `EXPOSE_PRIVATE_KEY`      | `false`                  |
//! | `LOG_JSON`                | `false`                  |

use std::sync::Arc;
use std::time::Duration;

use crate::error::ClientError;
use crate::protocol::{CanonicalScheme, NonceSource};
use crate::service::DispatchOptions;
use crate::ws::{ConnectionSettings, ExponentialBackoff, NoReconnect, ReconnectPolicy};

/// Top-level client configuration.
///
/// Loaded once at startup via [`ClientConfig::from_env`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server address, `http(s)://host:port`.
    pub server_url: String,

    /// Protocol version stamped on every envelope.
    pub api_version: u32,

    /// Interval between heartbeat PINGs.
    pub heartbeat_interval: Duration,

    /// Drop a silent link after this long; `None` disables the watchdog.
    pub heartbeat_timeout: Option<Duration>,

    /// How long a request waits for ACK or ERR.
    pub request_timeout: Duration,

    /// Attach a `requestId` to outbound envelopes.
    pub attach_request_id: bool,

    /// Send AUTH every time the link reaches Connected, reconnects included.
    pub authenticate_on_connect: bool,

    /// Retry lost links with exponential backoff.
    pub reconnect_enabled: bool,

    /// First reconnect delay.
    pub reconnect_base_delay: Duration,

    /// Upper bound for a reconnect delay.
    pub reconnect_max_delay: Duration,

    /// Reconnect attempts before giving up.
    pub reconnect_max_attempts: u32,

    /// Capacity of the EventBus broadcast channel.
    pub event_bus_capacity: usize,

    /// Where nonces come from.
    pub nonce_source: NonceSource,

    /// Existing identity to load instead of generating one.
    pub private_key: Option<String>,

    /// Print the private key at startup (diagnostics only).
    pub expose_private_key: bool,

    /// Emit logs as JSON lines.
    pub log_json: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: "https://localhost:8443".to_string(),
            api_version: CanonicalScheme::CURRENT.api_version(),
            heartbeat_interval: Duration::from_millis(30_000),
            heartbeat_timeout: Some(Duration::from_millis(90_000)),
            request_timeout: Duration::from_millis(10_000),
            attach_request_id: true,
            authenticate_on_connect: true,
            reconnect_enabled: false,
            reconnect_base_delay: Duration::from_millis(1_000),
            reconnect_max_delay: Duration::from_millis(30_000),
            reconnect_max_attempts: 10,
            event_bus_capacity: 1024,
            nonce_source: NonceSource::WallClock,
            private_key: None,
            expose_private_key: false,
            log_json: false,
        }
    }
}

impl ClientConfig {
    /// Loads configuration from environment variables.
    ///
    /// Falls back to defaults when a variable is not set.
    /// Calls `dotenvy::dotenv().ok()` to optionally load a `.env` file.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Config`] if `API_VERSION` names no known
    /// scheme, `NONCE_SOURCE` is unrecognised, or the heartbeat interval is
    /// zero.
    pub fn from_env() -> Result<Self, ClientError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration through an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// See [`ClientConfig::from_env`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ClientError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let env = Env(lookup);

        let api_version = env.parse("API_VERSION", defaults.api_version);
        CanonicalScheme::for_api_version(api_version)
            .map_err(|e| ClientError::Config(format!("API_VERSION: {e}")))?;

        let heartbeat_interval_ms = env.parse("HEARTBEAT_INTERVAL_MS", 30_000u64);
        if heartbeat_interval_ms == 0 {
            return Err(ClientError::Config(
                "HEARTBEAT_INTERVAL_MS must be positive".to_string(),
            ));
        }
        let heartbeat_timeout_ms = env.parse("HEARTBEAT_TIMEOUT_MS", 90_000u64);

        let nonce_source = match env.get("NONCE_SOURCE") {
            Some(raw) => raw
                .parse::<NonceSource>()
                .map_err(|e| ClientError::Config(format!("NONCE_SOURCE: {e}")))?,
            None => defaults.nonce_source,
        };

        Ok(Self {
            server_url: env.get("SERVER_URL").unwrap_or(defaults.server_url),
            api_version,
            heartbeat_interval: Duration::from_millis(heartbeat_interval_ms),
            heartbeat_timeout: (heartbeat_timeout_ms > 0)
                .then(|| Duration::from_millis(heartbeat_timeout_ms)),
            request_timeout: Duration::from_millis(env.parse("REQUEST_TIMEOUT_MS", 10_000)),
            attach_request_id: env.parse_bool("ATTACH_REQUEST_ID", defaults.attach_request_id),
            authenticate_on_connect: env
                .parse_bool("AUTHENTICATE_ON_CONNECT", defaults.authenticate_on_connect),
            reconnect_enabled: env.parse_bool("RECONNECT_ENABLED", defaults.reconnect_enabled),
            reconnect_base_delay: Duration::from_millis(env.parse("RECONNECT_BASE_DELAY_MS", 1_000)),
            reconnect_max_delay: Duration::from_millis(env.parse("RECONNECT_MAX_DELAY_MS", 30_000)),
            reconnect_max_attempts: env
                .parse("RECONNECT_MAX_ATTEMPTS", defaults.reconnect_max_attempts),
            event_bus_capacity: env.parse("EVENT_BUS_CAPACITY", defaults.event_bus_capacity),
            nonce_source,
            private_key: env.get("CLIENT_PRIVATE_KEY").filter(|k| !k.trim().is_empty()),
            expose_private_key: env.parse_bool("EXPOSE_PRIVATE_KEY", defaults.expose_private_key),
            log_json: env.parse_bool("LOG_JSON", defaults.log_json),
        })
    }

    /// The reconnect policy these settings describe.
    #[must_use]
    pub fn reconnect_policy(&self) -> Arc<dyn ReconnectPolicy> {
        if self.reconnect_enabled {
            Arc::new(ExponentialBackoff::new(
                self.reconnect_base_delay,
                self.reconnect_max_delay,
                self.reconnect_max_attempts,
            ))
        } else {
            Arc::new(NoReconnect)
        }
    }

    /// Connection manager settings.
    #[must_use]
    pub fn connection_settings(&self) -> ConnectionSettings {
        ConnectionSettings {
            heartbeat_interval: self.heartbeat_interval,
            heartbeat_timeout: self.heartbeat_timeout,
            reconnect: self.reconnect_policy(),
        }
    }

    /// Dispatcher settings.
    #[must_use]
    pub fn dispatch_options(&self) -> DispatchOptions {
        DispatchOptions {
            attach_request_id: self.attach_request_id,
            request_timeout: self.request_timeout,
        }
    }
}

struct Env<F>(F);

impl<F: Fn(&str) -> Option<String>> Env<F> {
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key)
    }

    /// Parses a variable as `T`, returning `default` on missing or invalid
    /// values.
    fn parse<T: std::str::FromStr>(&self, key: &str, default: T) -> T {
        self.get(key)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }

    /// Parses a variable as a boolean. Accepts `"true"`, `"1"`, `"false"`,
    /// `"0"` (case-insensitive). Returns `default` otherwise.
    fn parse_bool(&self, key: &str, default: bool) -> bool {
        match self.get(key).map(|v| v.trim().to_ascii_lowercase()).as_deref() {
            Some("true" | "1") => true,
            Some("false" | "0") => false,
            _ => default,
        }
    }
}
