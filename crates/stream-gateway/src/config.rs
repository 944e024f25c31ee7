//! Stream Gateway configuration.
//!
//! Configuration is loaded from environment variables. Signing keys and the
//! directory service key are held as `SecretString` and redacted in Debug
//! output.

use common::jwt::{DEFAULT_CLOCK_SKEW, MAX_CLOCK_SKEW, MIN_HMAC_SECRET_BYTES};
use common::secret::{ExposeSecret, SecretString};
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Default HTTP bind address.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:3001";

/// Default externally visible base URL used to build delivery URLs.
pub const DEFAULT_PUBLIC_BASE_URL: &str = "http://localhost:3001";

/// Default root directory for transcoder output.
pub const DEFAULT_OUTPUT_ROOT: &str = "./hls-streams";

/// Default transcoder executable.
pub const DEFAULT_TRANSCODER_BIN: &str = "ffmpeg";

/// Default capability lifetime (1 hour).
pub const DEFAULT_CAPABILITY_TTL_SECONDS: u64 = 3600;

/// Upper bound for capability lifetime (24 hours).
pub const MAX_CAPABILITY_TTL_SECONDS: u64 = 86_400;

/// Default time a transcoder has to produce its first manifest.
pub const DEFAULT_STARTUP_TIMEOUT_MS: u64 = 5000;

/// Upper bound for the startup deadline. Must stay below the router's
/// request timeout so a slow start is reported as a startup error.
pub const MAX_STARTUP_TIMEOUT_MS: u64 = 20_000;

/// Default time between SIGTERM and SIGKILL.
pub const DEFAULT_KILL_GRACE_MS: u64 = 3000;

/// Upper bound for the SIGTERM grace period.
pub const MAX_KILL_GRACE_MS: u64 = 30_000;

/// Stream Gateway configuration.
#[derive(Clone)]
pub struct Config {
    /// Server bind address (default: "0.0.0.0:3001").
    pub bind_address: String,

    /// Base URL embedded in delivery URLs, without a trailing slash.
    pub public_base_url: String,

    /// Root of the per-session output directories.
    pub output_root: PathBuf,

    /// Transcoder executable name or path.
    pub transcoder_bin: String,

    /// Symmetric key for signing stream capabilities.
    pub streaming_secret: SecretString,

    /// Symmetric key for verifying principal tokens on the control API.
    pub auth_jwt_secret: SecretString,

    /// Base URL of the ownership directory REST API.
    pub directory_url: String,

    /// Service key presented to the ownership directory.
    pub directory_service_key: SecretString,

    /// Lifetime of issued capabilities in seconds.
    pub capability_ttl_seconds: u64,

    /// Startup verification deadline in milliseconds.
    pub startup_timeout_ms: u64,

    /// Grace period between SIGTERM and SIGKILL in milliseconds.
    pub kill_grace_ms: u64,

    /// JWT clock skew tolerance in seconds for `iat` validation.
    pub jwt_clock_skew_seconds: i64,
}

impl Config {
    /// Capability lifetime as a `Duration`.
    #[must_use]
    pub fn capability_ttl(&self) -> Duration {
        Duration::from_secs(self.capability_ttl_seconds)
    }

    /// Startup verification deadline as a `Duration`.
    #[must_use]
    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }

    /// SIGTERM grace period as a `Duration`.
    #[must_use]
    pub fn kill_grace(&self) -> Duration {
        Duration::from_millis(self.kill_grace_ms)
    }

    /// Clock skew tolerance as a `Duration`.
    #[must_use]
    pub fn jwt_clock_skew(&self) -> Duration {
        Duration::from_secs(self.jwt_clock_skew_seconds.unsigned_abs())
    }
}

/// Custom Debug implementation that redacts sensitive fields.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("bind_address", &self.bind_address)
            .field("public_base_url", &self.public_base_url)
            .field("output_root", &self.output_root)
            .field("transcoder_bin", &self.transcoder_bin)
            .field("streaming_secret", &"[REDACTED]")
            .field("auth_jwt_secret", &"[REDACTED]")
            .field("directory_url", &self.directory_url)
            .field("directory_service_key", &"[REDACTED]")
            .field("capability_ttl_seconds", &self.capability_ttl_seconds)
            .field("startup_timeout_ms", &self.startup_timeout_ms)
            .field("kill_grace_ms", &self.kill_grace_ms)
            .field("jwt_clock_skew_seconds", &self.jwt_clock_skew_seconds)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid secret configuration: {0}")]
    InvalidSecret(String),

    #[error("Invalid URL configuration: {0}")]
    InvalidUrl(String),

    #[error("Invalid duration configuration: {0}")]
    InvalidDuration(String),

    #[error("Invalid JWT clock skew configuration: {0}")]
    InvalidJwtClockSkew(String),
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let streaming_secret = required_secret(vars, "STREAMING_SECRET_KEY")?;
        let auth_jwt_secret = required_secret(vars, "AUTH_JWT_SECRET")?;

        let directory_url = http_url(&required(vars, "DIRECTORY_URL")?, "DIRECTORY_URL")?;

        let directory_service_key = required(vars, "DIRECTORY_SERVICE_KEY")?;
        if directory_service_key.trim().is_empty() {
            return Err(ConfigError::InvalidSecret(
                "DIRECTORY_SERVICE_KEY must not be empty".to_string(),
            ));
        }

        let bind_address = vars
            .get("BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());

        let public_base_url = http_url(
            vars.get("PUBLIC_BASE_URL")
                .map_or(DEFAULT_PUBLIC_BASE_URL, String::as_str),
            "PUBLIC_BASE_URL",
        )?;

        let output_root = PathBuf::from(
            vars.get("HLS_OUTPUT_DIR")
                .map_or(DEFAULT_OUTPUT_ROOT, String::as_str),
        );

        let transcoder_bin = vars
            .get("TRANSCODER_BIN")
            .filter(|bin| !bin.trim().is_empty())
            .cloned()
            .unwrap_or_else(|| DEFAULT_TRANSCODER_BIN.to_string());

        let capability_ttl_seconds = bounded_positive(
            vars,
            "CAPABILITY_TTL_SECONDS",
            DEFAULT_CAPABILITY_TTL_SECONDS,
            MAX_CAPABILITY_TTL_SECONDS,
        )?;

        let startup_timeout_ms = bounded_positive(
            vars,
            "STARTUP_TIMEOUT_MS",
            DEFAULT_STARTUP_TIMEOUT_MS,
            MAX_STARTUP_TIMEOUT_MS,
        )?;

        let kill_grace_ms = bounded_positive(
            vars,
            "TRANSCODER_KILL_GRACE_MS",
            DEFAULT_KILL_GRACE_MS,
            MAX_KILL_GRACE_MS,
        )?;

        // Safe casts: both clock skew bounds are at most 600 seconds
        #[allow(clippy::cast_possible_wrap)]
        let jwt_clock_skew_seconds = if let Some(value_str) = vars.get("JWT_CLOCK_SKEW_SECONDS") {
            let value: i64 = value_str.parse().map_err(|e| {
                ConfigError::InvalidJwtClockSkew(format!(
                    "JWT_CLOCK_SKEW_SECONDS must be a valid integer, got '{value_str}': {e}"
                ))
            })?;

            if value <= 0 {
                return Err(ConfigError::InvalidJwtClockSkew(format!(
                    "JWT_CLOCK_SKEW_SECONDS must be positive, got {value}"
                )));
            }

            if value > MAX_CLOCK_SKEW.as_secs() as i64 {
                return Err(ConfigError::InvalidJwtClockSkew(format!(
                    "JWT_CLOCK_SKEW_SECONDS must not exceed {} seconds, got {value}",
                    MAX_CLOCK_SKEW.as_secs()
                )));
            }

            value
        } else {
            DEFAULT_CLOCK_SKEW.as_secs() as i64
        };

        Ok(Config {
            bind_address,
            public_base_url,
            output_root,
            transcoder_bin,
            streaming_secret,
            auth_jwt_secret,
            directory_url,
            directory_service_key: SecretString::from(directory_service_key),
            capability_ttl_seconds,
            startup_timeout_ms,
            kill_grace_ms,
            jwt_clock_skew_seconds,
        })
    }
}

fn required(vars: &HashMap<String, String>, key: &str) -> Result<String, ConfigError> {
    vars.get(key)
        .cloned()
        .ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))
}

fn required_secret(vars: &HashMap<String, String>, key: &str) -> Result<SecretString, ConfigError> {
    let secret = SecretString::from(required(vars, key)?);
    let len = secret.expose_secret().len();
    if len < MIN_HMAC_SECRET_BYTES {
        return Err(ConfigError::InvalidSecret(format!(
            "{key} must be at least {MIN_HMAC_SECRET_BYTES} bytes, got {len}"
        )));
    }
    Ok(secret)
}

/// Parses an http(s) URL and returns it without a trailing slash.
fn http_url(value: &str, key: &str) -> Result<String, ConfigError> {
    let parsed = url::Url::parse(value)
        .map_err(|e| ConfigError::InvalidUrl(format!("{key} is not a valid URL: {e}")))?;

    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(ConfigError::InvalidUrl(format!(
            "{key} must use http or https, got '{}'",
            parsed.scheme()
        )));
    }

    Ok(value.trim_end_matches('/').to_string())
}

fn bounded_positive(
    vars: &HashMap<String, String>,
    key: &str,
    default: u64,
    max: u64,
) -> Result<u64, ConfigError> {
    let Some(value_str) = vars.get(key) else {
        return Ok(default);
    };

    let value: u64 = value_str.parse().map_err(|e| {
        ConfigError::InvalidDuration(format!(
            "{key} must be a valid positive integer, got '{value_str}': {e}"
        ))
    })?;

    if value == 0 {
        return Err(ConfigError::InvalidDuration(format!(
            "{key} must be greater than 0"
        )));
    }

    if value > max {
        return Err(ConfigError::InvalidDuration(format!(
            "{key} must not exceed {max}, got {value}"
        )));
    }

    Ok(value)
}
