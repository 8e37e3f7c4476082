//! Application configuration.

use config::{Config as ConfigLoader, ConfigError, Environment, File};
use serde::Deserialize;

/// Top-level configuration, loaded from `config.toml` and
/// `FOUNDRCARD__SECTION__KEY` environment overrides.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    pub google: GoogleConfig,
    pub jwt: JwtConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub cors: CorsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Google OAuth settings. The certs URL is configurable so tests can
/// point the verifier at a local mock.
#[derive(Debug, Clone, Deserialize)]
pub struct GoogleConfig {
    /// OAuth client ID; the expected `aud` claim of incoming ID tokens.
    pub client_id: String,
    #[serde(default = "default_certs_url")]
    pub certs_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    /// HS256 signing secret for issued session tokens.
    pub secret: String,
    #[serde(default = "default_jwt_issuer")]
    pub issuer: String,
    #[serde(default = "default_access_lifetime")]
    pub access_lifetime_secs: u64,
    #[serde(default = "default_refresh_lifetime")]
    pub refresh_lifetime_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_url")]
    pub url: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// TTL for reconciled user cache entries.
    #[serde(default = "default_user_ttl")]
    pub user_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            user_ttl_secs: default_user_ttl(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CorsConfig {
    #[serde(default = "default_cors_origins")]
    pub origins: String,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            origins: default_cors_origins(),
        }
    }
}

// Default values
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_certs_url() -> String {
    "https://www.googleapis.com/oauth2/v3/certs".to_string()
}
fn default_jwt_issuer() -> String {
    "foundrcard".to_string()
}
fn default_access_lifetime() -> u64 {
    1800
}
fn default_refresh_lifetime() -> u64 {
    604_800
}
fn default_database_url() -> String {
    "sqlite:./data/foundrcard.db".to_string()
}
fn default_user_ttl() -> u64 {
    300
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_cors_origins() -> String {
    "*".to_string()
}

impl Config {
    /// Load configuration from file and environment variables.
    ///
    /// Sources, in order of precedence:
    /// 1. Environment variables (FOUNDRCARD__SECTION__KEY format)
    /// 2. config.toml file (if present)
    /// 3. Built-in defaults
    pub fn load() -> Result<Self, ConfigError> {
        let config = ConfigLoader::builder()
            .add_source(File::with_name("config").required(false))
            .add_source(
                Environment::with_prefix("FOUNDRCARD")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }
}
