//! Admin configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Required
//! - `LABELS_DATABASE_URL` - `PostgreSQL` connection string (falls back to `DATABASE_URL`)
//! - `SHOPIFY_STORE` - Shopify store domain (e.g., your-store.myshopify.com)
//! - `SHOPIFY_ACCESS_TOKEN` - Admin API access token used for metafield writes
//!
//! ## Optional
//! - `LABELS_HOST` - Bind address (default: 127.0.0.1)
//! - `LABELS_PORT` - Listen port (default: 3002)
//! - `SHOPIFY_API_VERSION` - API version (default: 2023-01)
//! - `SHOPIFY_API_BASE_URL` - Override the API origin (default: `https://{SHOPIFY_STORE}`)
//! - `LABELS_METAFIELD_KEY` - `labels` or `product_labels` (default: labels)
//! - `LABELS_SYNC_TIMEOUT_SECS` - Per-request timeout for metafield writes (default: 10)
//! - `LABELS_SYNC_MAX_ATTEMPTS` - Push attempts before giving up (default: 3)
//! - `LABELS_SYNC_INITIAL_BACKOFF_MS` - First retry delay (default: 200)
//! - `SENTRY_DSN` - Sentry error tracking DSN
//! - `SENTRY_ENVIRONMENT` - Sentry environment name
//! - `SENTRY_SAMPLE_RATE` - Error sample rate (default: 1.0)
//! - `SENTRY_TRACES_SAMPLE_RATE` - Traces sample rate (default: 1.0)

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;
use thiserror::Error;
use url::Url;

use product_labels_core::MetafieldKey;

const MIN_ENTROPY_BITS_PER_CHAR: f64 = 3.3;
const DEFAULT_API_VERSION: &str = "2023-01";

/// Blocklist of common placeholder patterns (case-insensitive)
const PLACEHOLDER_PATTERNS: &[&str] = &[
    "your-",
    "changeme",
    "replace",
    "placeholder",
    "example",
    "secret",
    "password",
    "xxx",
    "todo",
    "fixme",
    "insert",
    "enter-",
    "put-your",
    "add-your",
];

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
    #[error("Insecure secret in {0}: {1}")]
    InsecureSecret(String, String),
}

/// Admin application configuration.
#[derive(Debug, Clone)]
pub struct AdminConfig {
    /// `PostgreSQL` database connection URL (contains password)
    pub database_url: SecretString,
    /// IP address to bind the server to
    pub host: IpAddr,
    /// Port to listen on
    pub port: u16,
    /// Shopify metafield sync configuration
    pub shopify: ShopifySyncConfig,
    /// Sentry DSN for error tracking
    pub sentry_dsn: Option<String>,
    /// Sentry environment (e.g., "development", "staging", "production")
    pub sentry_environment: Option<String>,
    /// Sentry error sample rate (0.0 to 1.0)
    pub sentry_sample_rate: f32,
    /// Sentry traces sample rate for performance monitoring (0.0 to 1.0)
    pub sentry_traces_sample_rate: f32,
}

/// Shopify metafield sync configuration.
///
/// Passed explicitly to the sync client; nothing below the config layer
/// reads the process environment. Implements `Debug` manually to redact the
/// access token.
#[derive(Clone)]
pub struct ShopifySyncConfig {
    /// Shopify store domain (e.g., your-store.myshopify.com)
    pub store: String,
    /// Origin requests are sent to
    pub base_url: Url,
    /// Shopify API version (e.g., 2023-01)
    pub api_version: String,
    /// Admin API access token (HIGH PRIVILEGE)
    pub access_token: SecretString,
    /// Metafield key the snapshot is written under
    pub metafield_key: MetafieldKey,
    /// Per-request timeout
    pub request_timeout: Duration,
    /// Total push attempts per sync, including the first
    pub max_attempts: u32,
    /// Delay before the first retry
    pub initial_backoff: Duration,
}

impl std::fmt::Debug for ShopifySyncConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShopifySyncConfig")
            .field("store", &self.store)
            .field("base_url", &self.base_url.as_str())
            .field("api_version", &self.api_version)
            .field("access_token", &"[REDACTED]")
            .field("metafield_key", &self.metafield_key)
            .field("request_timeout", &self.request_timeout)
            .field("max_attempts", &self.max_attempts)
            .field("initial_backoff", &self.initial_backoff)
            .finish()
    }
}

impl AdminConfig {
    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv()` to load from `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required variables are missing, invalid, or
    /// if secrets fail validation (placeholder detection, entropy check).
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let database_url = get_database_url("LABELS_DATABASE_URL")?;
        let host = parse_env_or_default::<IpAddr>("LABELS_HOST", "127.0.0.1")?;
        let port = parse_env_or_default::<u16>("LABELS_PORT", "3002")?;
        let shopify = ShopifySyncConfig::from_env()?;
        let sentry_dsn = get_optional_env("SENTRY_DSN");
        let sentry_environment = get_optional_env("SENTRY_ENVIRONMENT");
        let sentry_sample_rate = get_optional_env("SENTRY_SAMPLE_RATE")
            .and_then(|s| s.parse().ok())
            .unwrap_or(1.0);
        let sentry_traces_sample_rate = get_optional_env("SENTRY_TRACES_SAMPLE_RATE")
            .and_then(|s| s.parse().ok())
            .unwrap_or(1.0);

        Ok(Self {
            database_url,
            host,
            port,
            shopify,
            sentry_dsn,
            sentry_environment,
            sentry_sample_rate,
            sentry_traces_sample_rate,
        })
    }

    /// Returns the socket address for binding the server.
    #[must_use]
    pub const fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

impl ShopifySyncConfig {
    /// Sync configuration with default version, key, timeout and retry budget.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if `store` does not form a valid URL.
    pub fn new(store: impl Into<String>, access_token: SecretString) -> Result<Self, ConfigError> {
        let store = store.into();
        let base_url = default_base_url(&store)?;
        Ok(Self {
            store,
            base_url,
            api_version: DEFAULT_API_VERSION.to_string(),
            access_token,
            metafield_key: MetafieldKey::default(),
            request_timeout: Duration::from_secs(10),
            max_attempts: 3,
            initial_backoff: Duration::from_millis(200),
        })
    }

    /// Load the sync section from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` for missing store/token, a weak token, or
    /// unparseable optional values.
    pub fn from_env() -> Result<Self, ConfigError> {
        let store = get_required_env("SHOPIFY_STORE")?;
        let access_token = get_validated_secret("SHOPIFY_ACCESS_TOKEN")?;

        let base_url = match get_optional_env("SHOPIFY_API_BASE_URL") {
            Some(raw) => Url::parse(&raw).map_err(|e| {
                ConfigError::InvalidEnvVar("SHOPIFY_API_BASE_URL".to_string(), e.to_string())
            })?,
            None => default_base_url(&store)?,
        };

        let max_attempts = parse_env_or_default::<u32>("LABELS_SYNC_MAX_ATTEMPTS", "3")?;
        if max_attempts == 0 {
            return Err(ConfigError::InvalidEnvVar(
                "LABELS_SYNC_MAX_ATTEMPTS".to_string(),
                "must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            store,
            base_url,
            api_version: get_env_or_default("SHOPIFY_API_VERSION", DEFAULT_API_VERSION),
            access_token,
            metafield_key: parse_env_or_default::<MetafieldKey>("LABELS_METAFIELD_KEY", "labels")?,
            request_timeout: Duration::from_secs(parse_env_or_default::<u64>(
                "LABELS_SYNC_TIMEOUT_SECS",
                "10",
            )?),
            max_attempts,
            initial_backoff: Duration::from_millis(parse_env_or_default::<u64>(
                "LABELS_SYNC_INITIAL_BACKOFF_MS",
                "200",
            )?),
        })
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// `https://{store}`, the origin Shopify serves a store's Admin API on.
fn default_base_url(store: &str) -> Result<Url, ConfigError> {
    Url::parse(&format!("https://{store}"))
        .map_err(|e| ConfigError::InvalidEnvVar("SHOPIFY_STORE".to_string(), e.to_string()))
}

/// Get a required environment variable.
fn get_required_env(key: &str) -> Result<String, ConfigError> {
    std::env::var(key).map_err(|_| ConfigError::MissingEnvVar(key.to_string()))
}

/// Get database URL with fallback to generic `DATABASE_URL` (used by Fly.io postgres attach).
fn get_database_url(primary_key: &str) -> Result<SecretString, ConfigError> {
    if let Ok(value) = std::env::var(primary_key) {
        return Ok(SecretString::from(value));
    }
    if let Ok(value) = std::env::var("DATABASE_URL") {
        return Ok(SecretString::from(value));
    }
    Err(ConfigError::MissingEnvVar(primary_key.to_string()))
}

/// Get an optional environment variable.
fn get_optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

/// Get an environment variable with a default value.
fn get_env_or_default(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Parse an environment variable, falling back to `default` when unset.
fn parse_env_or_default<T>(key: &str, default: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    get_env_or_default(key, default)
        .parse::<T>()
        .map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))
}

/// Calculate Shannon entropy in bits per character.
fn shannon_entropy(s: &str) -> f64 {
    if s.is_empty() {
        return 0.0;
    }

    let mut freq: HashMap<char, usize> = HashMap::new();
    for c in s.chars() {
        *freq.entry(c).or_insert(0) += 1;
    }

    #[allow(clippy::cast_precision_loss)] // String length will never exceed f64 precision
    let len = s.len() as f64;
    freq.values()
        .map(|&count| {
            #[allow(clippy::cast_precision_loss)] // Character count will never exceed f64 precision
            let p = count as f64 / len;
            -p * p.log2()
        })
        .sum()
}

/// Validate that a secret is not a placeholder and has sufficient entropy.
fn validate_secret_strength(secret: &str, var_name: &str) -> Result<(), ConfigError> {
    let lower = secret.to_lowercase();

    for pattern in PLACEHOLDER_PATTERNS {
        if lower.contains(pattern) {
            return Err(ConfigError::InsecureSecret(
                var_name.to_string(),
                format!("appears to be a placeholder (contains '{pattern}')"),
            ));
        }
    }

    let entropy = shannon_entropy(secret);
    if entropy < MIN_ENTROPY_BITS_PER_CHAR {
        return Err(ConfigError::InsecureSecret(
            var_name.to_string(),
            format!(
                "entropy too low ({entropy:.2} bits/char, need >= {MIN_ENTROPY_BITS_PER_CHAR:.1}). Use the token issued by Shopify."
            ),
        ));
    }

    Ok(())
}

/// Load and validate a secret from environment.
fn get_validated_secret(key: &str) -> Result<SecretString, ConfigError> {
    let value = get_required_env(key)?;
    validate_secret_strength(&value, key)?;
    Ok(SecretString::from(value))
}
