//! Gateway listener settings, read from the process environment.

use std::time::Duration;

use thiserror::Error;

/// Error for an environment variable that is set but unusable.
#[derive(Debug, Error)]
#[error("invalid {name}: {reason}")]
pub struct ConfigError {
    name: &'static str,
    reason: String,
}

/// HTTP listener settings for the gateway.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Socket address the API and agent routes share.
    pub listen_addr: String,
    /// Allowed CORS origins. `*` allows any.
    pub cors_origins: Vec<String>,
    /// Largest accepted request body. Agent reports are the biggest payload.
    pub max_body_bytes: usize,
    /// Per-request deadline. Must cover a full create saga, dispatch included.
    pub request_timeout_seconds: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".to_string(),
            cors_origins: vec!["*".to_string()],
            max_body_bytes: 256 * 1024,
            request_timeout_seconds: 60,
        }
    }
}

impl GatewayConfig {
    /// Read `LISTEN_ADDR`, `CORS_ORIGINS`, `MAX_BODY_BYTES` and
    /// `REQUEST_TIMEOUT_SECONDS`, keeping defaults for unset variables.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if a numeric variable does not parse or is zero.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Like [`GatewayConfig::from_env`], with variables supplied by `lookup`.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if a numeric variable does not parse or is zero.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(addr) = lookup("LISTEN_ADDR") {
            config.listen_addr = addr;
        }
        if let Some(origins) = lookup("CORS_ORIGINS") {
            config.cors_origins = origins
                .split(',')
                .map(str::trim)
                .filter(|o| !o.is_empty())
                .map(ToString::to_string)
                .collect();
        }
        if let Some(raw) = lookup("MAX_BODY_BYTES") {
            config.max_body_bytes = positive("MAX_BODY_BYTES", &raw)?;
        }
        if let Some(raw) = lookup("REQUEST_TIMEOUT_SECONDS") {
            config.request_timeout_seconds = positive("REQUEST_TIMEOUT_SECONDS", &raw)?;
        }

        Ok(config)
    }

    /// The per-request deadline.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }
}

fn positive<T>(name: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr + Default + PartialEq,
    T::Err: std::fmt::Display,
{
    let value: T = raw.trim().parse().map_err(|e: T::Err| ConfigError {
        name,
        reason: e.to_string(),
    })?;
    if value == T::default() {
        return Err(ConfigError {
            name,
            reason: "must be greater than zero".to_string(),
        });
    }
    Ok(value)
}
