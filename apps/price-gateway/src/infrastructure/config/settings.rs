//! Gateway Configuration Settings
//!
//! Configuration types for the price gateway, loaded from environment
//! variables. Invalid numeric values fall back to their defaults; zero ports
//! and a zero chunk size are rejected.

use std::time::Duration;

use crate::application::services::{BatchConfig, SessionConfig};

/// Default MQTT broker host.
pub const DEFAULT_BROKER_HOST: &str = "datafeed-lts-krx.dnse.com.vn";

/// Default token refresh endpoint.
pub const DEFAULT_AUTH_URL: &str = "https://api.dnse.com.vn/user-service/api/auth";

/// Account secret exchanged for fresh broker credentials.
#[derive(Clone)]
pub struct AccountSecret {
    username: String,
    password: String,
}

impl AccountSecret {
    /// Create a new account secret.
    #[must_use]
    pub const fn new(username: String, password: String) -> Self {
        Self { username, password }
    }

    /// Get the username.
    #[must_use]
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Get the password.
    #[must_use]
    pub fn password(&self) -> &str {
        &self.password
    }
}

impl std::fmt::Debug for AccountSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountSecret")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// Listener port settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSettings {
    /// WebSocket listener port.
    pub wss_port: u16,
    /// Health check HTTP port.
    pub health_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            wss_port: 8080,
            health_port: 8082,
        }
    }
}

/// Upstream MQTT broker settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerSettings {
    /// Broker host name.
    pub host: String,
    /// Broker port.
    pub port: u16,
    /// WebSocket path on the broker.
    pub path: String,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            host: DEFAULT_BROKER_HOST.to_string(),
            port: 443,
            path: "/wss".to_string(),
        }
    }
}

impl BrokerSettings {
    /// Secure WebSocket URL of the broker.
    #[must_use]
    pub fn url(&self) -> String {
        format!("wss://{}:{}{}", self.host, self.port, self.path)
    }
}

/// Token refresh settings.
#[derive(Debug, Clone)]
pub struct AuthSettings {
    /// Auth endpoint URL.
    pub url: String,
    /// Account secret; refresh is disabled without one.
    pub account: Option<AccountSecret>,
    /// Account record that receives refreshed tokens.
    pub target_user_id: Option<String>,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            url: DEFAULT_AUTH_URL.to_string(),
            account: None,
            target_user_id: None,
        }
    }
}

impl AuthSettings {
    /// Whether automatic token refresh is possible.
    #[must_use]
    pub const fn refresh_enabled(&self) -> bool {
        self.account.is_some()
    }
}

/// Complete gateway configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Listener ports.
    pub server: ServerSettings,
    /// Upstream broker.
    pub broker: BrokerSettings,
    /// Token refresh.
    pub auth: AuthSettings,
    /// Session deadlines.
    pub session: SessionConfig,
    /// Batch chunking.
    pub batch: BatchConfig,
    /// Interval between statistics log lines.
    pub stats_interval: Duration,
    /// Verbose per-session logging.
    pub debug: bool,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            server: ServerSettings::default(),
            broker: BrokerSettings::default(),
            auth: AuthSettings::default(),
            session: SessionConfig::default(),
            batch: BatchConfig::default(),
            stats_interval: Duration::from_secs(60),
            debug: false,
        }
    }
}

impl GatewayConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a port or the batch chunk size is zero.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if a port or the batch chunk size is zero.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let env = EnvReader { lookup: &lookup };

        let server = ServerSettings {
            wss_port: env.nonzero_u16("WSS_PORT", defaults.server.wss_port)?,
            health_port: env.nonzero_u16("GATEWAY_HEALTH_PORT", defaults.server.health_port)?,
        };

        let broker = BrokerSettings {
            host: env.string("BROKER_HOST").unwrap_or(defaults.broker.host),
            port: env.nonzero_u16("BROKER_PORT", defaults.broker.port)?,
            path: env.string("BROKER_PATH").unwrap_or(defaults.broker.path),
        };

        let account = match (env.string("DNSE_USERNAME"), env.string("DNSE_PASSWORD")) {
            (Some(username), Some(password)) => Some(AccountSecret::new(username, password)),
            _ => None,
        };
        let auth = AuthSettings {
            url: env.string("DNSE_AUTH_URL").unwrap_or(defaults.auth.url),
            account,
            target_user_id: env.string("TARGET_USER_ID"),
        };

        let session = SessionConfig {
            ack_timeout: env.duration_secs("SESSION_ACK_TIMEOUT_SECS", defaults.session.ack_timeout),
            data_timeout: env
                .duration_secs("SESSION_DATA_TIMEOUT_SECS", defaults.session.data_timeout),
        };

        let chunk_size = env.parse("BATCH_CHUNK_SIZE", defaults.batch.chunk_size);
        if chunk_size == 0 {
            return Err(ConfigError::ZeroValue("BATCH_CHUNK_SIZE".to_string()));
        }
        let batch = BatchConfig {
            chunk_size,
            pacing: env.duration_millis("BATCH_PACING_MS", defaults.batch.pacing),
        };

        Ok(Self {
            server,
            broker,
            auth,
            session,
            batch,
            stats_interval: env.duration_secs("STATS_INTERVAL_SECS", defaults.stats_interval),
            debug: env.flag("DEBUG"),
        })
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A value that must be positive was zero.
    #[error("environment variable {0} must be greater than zero")]
    ZeroValue(String),
}

struct EnvReader<'a, F> {
    lookup: &'a F,
}

impl<F> EnvReader<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    /// Non-empty value of `key`.
    fn string(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse<T: std::str::FromStr>(&self, key: &str, default: T) -> T {
        self.string(key)
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    }

    fn nonzero_u16(&self, key: &str, default: u16) -> Result<u16, ConfigError> {
        match self.parse(key, default) {
            0 => Err(ConfigError::ZeroValue(key.to_string())),
            port => Ok(port),
        }
    }

    fn duration_secs(&self, key: &str, default: Duration) -> Duration {
        self.string(key)
            .and_then(|v| v.parse::<u64>().ok())
            .map_or(default, Duration::from_secs)
    }

    fn duration_millis(&self, key: &str, default: Duration) -> Duration {
        self.string(key)
            .and_then(|v| v.parse::<u64>().ok())
            .map_or(default, Duration::from_millis)
    }

    fn flag(&self, key: &str) -> bool {
        self.string(key)
            .is_some_and(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"))
    }
}
