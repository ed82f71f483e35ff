//! Server configuration, read from environment variables.
//!
//! Every setting has a default, so an empty environment yields a working
//! server on `0.0.0.0:3001`. A variable that is set but unparsable is an
//! error rather than silently falling back.

use std::env;
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use speedtype_race::{RaceConfig, RaceError};
use speedtype_transport::OriginPolicy;
use tracing::{info, warn};

/// Errors raised while loading [`ServerConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A variable is set but does not parse.
    #[error("invalid {key} value {value:?}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },

    /// The values parse but the resulting race settings are inconsistent.
    #[error(transparent)]
    Race(#[from] RaceError),
}

/// Everything the server binary needs to start.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub origins: OriginPolicy,
    pub race: RaceConfig,
    /// A connection silent for this long is closed.
    pub idle_timeout: Duration,
    /// How often the server pings each client. Must be shorter than
    /// `idle_timeout` so a client that only reads stays connected.
    pub ping_interval: Duration,
    /// How long a peer may take to complete the WebSocket upgrade.
    pub handshake_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3001,
            origins: OriginPolicy::Any,
            race: RaceConfig::default(),
            idle_timeout: Duration::from_secs(60),
            ping_interval: Duration::from_secs(25),
            handshake_timeout: Duration::from_secs(10),
        }
    }
}

impl ServerConfig {
    /// Loads the configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Loads the configuration through `lookup`, which maps a variable
    /// name to its value.
    pub fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let race_defaults = defaults.race.clone();

        let origins = match lookup("ALLOWED_ORIGINS") {
            Some(list) => OriginPolicy::from_list(&list),
            None => {
                warn!("ALLOWED_ORIGINS not set, accepting connections from any origin");
                OriginPolicy::Any
            }
        };

        let race = RaceConfig {
            min_players: try_load(&lookup, "MIN_PLAYERS", race_defaults.min_players)?,
            max_players: try_load(&lookup, "MAX_PLAYERS", race_defaults.max_players)?,
            countdown: secs(&lookup, "COUNTDOWN_SECS", race_defaults.countdown)?,
            race_timeout: secs(
                &lookup,
                "RACE_TIMEOUT_SECS",
                race_defaults.race_timeout,
            )?,
            grace_period: secs(&lookup, "ROOM_GRACE_SECS", race_defaults.grace_period)?,
            broadcast_rate_hz: try_load(
                &lookup,
                "BROADCAST_RATE_HZ",
                race_defaults.broadcast_rate_hz,
            )?,
            allow_rejoin: try_load(
                &lookup,
                "ALLOW_REJOIN",
                race_defaults.allow_rejoin,
            )?,
        };
        race.validate()?;

        let idle_timeout = secs(&lookup, "IDLE_TIMEOUT_SECS", defaults.idle_timeout)?;
        if idle_timeout.is_zero() {
            return Err(ConfigError::Invalid {
                key: "IDLE_TIMEOUT_SECS",
                value: "0".into(),
                reason: "must be at least one second".into(),
            });
        }
        let ping_interval =
            secs(&lookup, "PING_INTERVAL_SECS", defaults.ping_interval)?;
        if ping_interval.is_zero() || ping_interval >= idle_timeout {
            return Err(ConfigError::Invalid {
                key: "PING_INTERVAL_SECS",
                value: ping_interval.as_secs().to_string(),
                reason: "must be at least one second and below IDLE_TIMEOUT_SECS"
                    .into(),
            });
        }
        let handshake_timeout = secs(
            &lookup,
            "HANDSHAKE_TIMEOUT_SECS",
            defaults.handshake_timeout,
        )?;
        if handshake_timeout.is_zero() {
            return Err(ConfigError::Invalid {
                key: "HANDSHAKE_TIMEOUT_SECS",
                value: "0".into(),
                reason: "must be at least one second".into(),
            });
        }

        Ok(Self {
            host: try_load(&lookup, "BIND_HOST", defaults.host)?,
            port: try_load(&lookup, "PORT", defaults.port)?,
            origins,
            race,
            idle_timeout,
            ping_interval,
            handshake_timeout,
        })
    }

    /// `host:port` for binding the listener.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn try_load<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T: FromStr + Display,
    T::Err: Display,
{
    let Some(raw) = lookup(key) else {
        info!("{key} not set, using default: {default}");
        return Ok(default);
    };
    raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
        key,
        value: raw.clone(),
        reason: e.to_string(),
    })
}

fn secs(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: Duration,
) -> Result<Duration, ConfigError> {
    try_load(lookup, key, default.as_secs()).map(Duration::from_secs)
}
