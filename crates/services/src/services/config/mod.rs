use std::{env, time::Duration};

use thiserror::Error;
use tracing::warn;

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 8000;
const DEFAULT_DATABASE_URL: &str = "sqlite://tasks.db?mode=rwc";
const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 10;
const DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS: u64 = 5;
const DEFAULT_STORAGE_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_CACHE_TTL_SECS: u64 = 3_600;
const DEFAULT_CACHE_TIMEOUT_MS: u64 = 500;
const DEFAULT_AUTH_LEEWAY_SECS: u64 = 30;
const DEFAULT_AUTH_JWKS_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_MAX_PAGE_SIZE: u64 = 100;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error(
        "no token verification key configured; set AUTH_JWKS_URL, AUTH_PUBLIC_KEY_PEM or AUTH_JWT_SECRET"
    )]
    MissingAuthKey,
    #[error("Validation error: {0}")]
    ValidationError(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl LogFormat {
    /// Reads `LOG_FORMAT` alone, so logging can start before the rest of the
    /// configuration is parsed and its warnings have somewhere to go.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::parse(env::var("LOG_FORMAT").ok().as_deref())
    }

    pub fn parse(raw: Option<&str>) -> Result<Self, ConfigError> {
        match raw.map(str::trim).filter(|value| !value.is_empty()) {
            None | Some("text") => Ok(LogFormat::Text),
            Some("json") => Ok(LogFormat::Json),
            Some(other) => Err(ConfigError::ValidationError(format!(
                "LOG_FORMAT must be 'text' or 'json', got '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub connect_timeout: Duration,
    /// Upper bound on a single storage operation, transaction included.
    pub operation_timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Redis URL. Without one an in-process cache is used.
    pub url: Option<String>,
    pub key_prefix: String,
    pub ttl: Option<Duration>,
    pub timeout: Duration,
}

#[derive(Clone, PartialEq, Eq)]
pub enum AuthKeySource {
    Jwks { url: String },
    PublicKeyPem(String),
    Secret(String),
}

impl std::fmt::Debug for AuthKeySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthKeySource::Jwks { url } => f.debug_struct("Jwks").field("url", url).finish(),
            AuthKeySource::PublicKeyPem(_) => f.write_str("PublicKeyPem(..)"),
            AuthKeySource::Secret(_) => f.write_str("Secret(<redacted>)"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthConfig {
    pub key_source: AuthKeySource,
    pub audience: Option<String>,
    pub issuer: Option<String>,
    pub leeway: Duration,
    pub jwks_timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub cache: CacheConfig,
    pub auth: AuthConfig,
    pub max_page_size: u64,
    pub log_format: LogFormat,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_with(|name| env::var(name).ok())
    }

    pub fn from_env_with<F>(get_env: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            get_env(name)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let server = ServerConfig {
            host: get("HOST").unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port: read_env_parsed("PORT", DEFAULT_PORT, &get),
        };

        let database = DatabaseConfig {
            url: get("DATABASE_URL").unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string()),
            max_connections: normalize_max(
                read_env_parsed(
                    "DATABASE_MAX_CONNECTIONS",
                    DEFAULT_DATABASE_MAX_CONNECTIONS,
                    &get,
                ),
                "DATABASE_MAX_CONNECTIONS",
            ),
            connect_timeout: Duration::from_secs(read_env_parsed(
                "DATABASE_CONNECT_TIMEOUT_SECS",
                DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
                &get,
            )),
            operation_timeout: read_env_millis(
                "STORAGE_TIMEOUT_MS",
                DEFAULT_STORAGE_TIMEOUT_MS,
                &get,
            ),
        };

        let cache_ttl_secs = read_env_parsed("CACHE_TTL_SECS", DEFAULT_CACHE_TTL_SECS, &get);
        let cache = CacheConfig {
            url: get("CACHE_URL"),
            key_prefix: get_env("CACHE_KEY_PREFIX").unwrap_or_default(),
            ttl: (cache_ttl_secs > 0).then(|| Duration::from_secs(cache_ttl_secs)),
            timeout: read_env_millis("CACHE_TIMEOUT_MS", DEFAULT_CACHE_TIMEOUT_MS, &get),
        };

        let key_source = if let Some(url) = get("AUTH_JWKS_URL") {
            AuthKeySource::Jwks { url }
        } else if let Some(pem) = get("AUTH_PUBLIC_KEY_PEM") {
            AuthKeySource::PublicKeyPem(normalize_pem(&pem))
        } else if let Some(secret) = get("AUTH_JWT_SECRET") {
            AuthKeySource::Secret(secret)
        } else {
            return Err(ConfigError::MissingAuthKey);
        };

        let auth = AuthConfig {
            key_source,
            audience: get("AUTH_AUDIENCE"),
            issuer: get("AUTH_ISSUER"),
            leeway: Duration::from_secs(read_env_parsed(
                "AUTH_LEEWAY_SECS",
                DEFAULT_AUTH_LEEWAY_SECS,
                &get,
            )),
            jwks_timeout: read_env_millis(
                "AUTH_JWKS_TIMEOUT_MS",
                DEFAULT_AUTH_JWKS_TIMEOUT_MS,
                &get,
            ),
        };

        let max_page_size = normalize_max(
            read_env_parsed("MAX_PAGE_SIZE", DEFAULT_MAX_PAGE_SIZE, &get),
            "MAX_PAGE_SIZE",
        );

        let log_format = LogFormat::parse(get("LOG_FORMAT").as_deref())?;

        Ok(Self {
            server,
            database,
            cache,
            auth,
            max_page_size,
            log_format,
        })
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

fn read_env_parsed<T, F>(name: &str, default: T, get_env: &F) -> T
where
    T: std::str::FromStr + std::fmt::Display,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match get_env(name) {
        Some(value) => match value.parse::<T>() {
            Ok(parsed) => parsed,
            Err(err) => {
                warn!("Invalid {name}='{value}': {err}. Using default {default}.");
                default
            }
        },
        None => default,
    }
}

fn read_env_millis<F>(name: &str, default_ms: u64, get_env: &F) -> Duration
where
    F: Fn(&str) -> Option<String>,
{
    let millis = read_env_parsed(name, default_ms, get_env);
    if millis == 0 {
        warn!("{name} set to 0. Using default {default_ms}ms.");
        return Duration::from_millis(default_ms);
    }
    Duration::from_millis(millis)
}

fn normalize_max<T>(value: T, name: &str) -> T
where
    T: PartialEq + From<u8>,
{
    if value == T::from(0) {
        warn!("{name} set to 0. Using minimum value 1.");
        T::from(1)
    } else {
        value
    }
}

/// Accepts a PEM with literal `\n` escapes or the bare base64 body that
/// identity providers publish as a realm "public key".
fn normalize_pem(raw: &str) -> String {
    let unescaped = raw.replace("\\n", "\n");
    if unescaped.contains("-----BEGIN") {
        return unescaped;
    }
    format!("-----BEGIN PUBLIC KEY-----\n{unescaped}\n-----END PUBLIC KEY-----\n")
}
