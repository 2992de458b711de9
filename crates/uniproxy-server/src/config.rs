use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use config::{Config, File};
use serde::{Deserialize, Serialize};
use uniproxy_core::RateLimitPolicy;

const DEFAULT_CONFIG_FILE: &str = "uniproxy.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub environment: Environment,
    /// Origins allowed by the CORS policy. The first entry is also the
    /// fallback origin echoed to requests from unlisted origins.
    #[serde(default = "default_allowed_origins")]
    pub allowed_origins: Vec<String>,
    /// Base URL of the upstream Universalis API.
    #[serde(default = "default_universalis_api_base")]
    pub universalis_api_base: String,
    #[serde(default = "default_rate_limit_requests")]
    pub rate_limit_requests: u32,
    #[serde(default = "default_rate_limit_window_seconds")]
    pub rate_limit_window_seconds: u64,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub cache: CacheSettings,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            environment: Environment::default(),
            allowed_origins: default_allowed_origins(),
            universalis_api_base: default_universalis_api_base(),
            rate_limit_requests: default_rate_limit_requests(),
            rate_limit_window_seconds: default_rate_limit_window_seconds(),
            server: ServerConfig::default(),
            cache: CacheSettings::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from an optional TOML file plus flat environment
    /// keys (`ENVIRONMENT`, `ALLOWED_ORIGINS`, `UNIVERSALIS_API_BASE`,
    /// `RATE_LIMIT_REQUESTS`, `RATE_LIMIT_WINDOW_SECONDS`) and nested ones
    /// (`SERVER__PORT`, `CACHE__REDIS__URL`).
    pub fn load(path: Option<&str>) -> Result<Self, String> {
        let file = PathBuf::from(path.unwrap_or(DEFAULT_CONFIG_FILE));
        let mut builder = Config::builder();
        if file.exists() {
            builder = builder.add_source(File::from(file));
        }
        let cfg: AppConfig = builder
            .add_source(env_source())
            .build()
            .and_then(|raw| raw.try_deserialize())
            .map_err(|e| format!("configuration error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.server.port == 0 {
            return Err("server.port must be > 0".into());
        }
        if self.rate_limit_requests == 0 {
            return Err("rate_limit_requests must be > 0".into());
        }
        if self.rate_limit_window_seconds == 0 {
            return Err("rate_limit_window_seconds must be > 0".into());
        }
        if url::Url::parse(&self.universalis_api_base).is_err() {
            return Err(format!(
                "universalis_api_base is not a valid URL: {}",
                self.universalis_api_base
            ));
        }
        if self.environment == Environment::Production && self.allowed_origins.is_empty() {
            return Err("allowed_origins must not be empty in production".into());
        }
        if self.cache.redis.enabled && self.cache.redis.url.is_empty() {
            return Err("cache.redis.url is required when the slow tier is enabled".into());
        }
        Ok(())
    }

    pub fn addr(&self) -> SocketAddr {
        use std::net::{IpAddr, Ipv4Addr};
        let host: IpAddr = self
            .server
            .host
            .parse()
            .unwrap_or(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)));
        SocketAddr::from((host, self.server.port))
    }

    pub fn rate_limit_policy(&self) -> RateLimitPolicy {
        RateLimitPolicy {
            max_requests: self.rate_limit_requests,
            window: Duration::from_secs(self.rate_limit_window_seconds),
        }
    }
}

/// Deployment environment. Development relaxes CORS for local frontends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Production,
    #[default]
    Development,
}

impl Environment {
    pub fn is_development(&self) -> bool {
        matches!(self, Self::Development)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Production => "production",
            Self::Development => "development",
        }
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_allowed_origins() -> Vec<String> {
    vec!["http://localhost:5173".into()]
}
fn default_universalis_api_base() -> String {
    "https://universalis.app".into()
}
fn default_rate_limit_requests() -> u32 {
    60
}
fn default_rate_limit_window_seconds() -> u64 {
    60
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".into()
}
fn default_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CacheSettings {
    #[serde(default)]
    pub redis: RedisConfig,
}

/// Slow-tier configuration. Disabled by default: the proxy then runs on the
/// edge tier alone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_redis_url")]
    pub url: String,
    #[serde(default = "default_redis_pool_size")]
    pub pool_size: usize,
    #[serde(default = "default_redis_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_redis_url() -> String {
    "redis://localhost:6379".into()
}
fn default_redis_pool_size() -> usize {
    8
}
fn default_redis_timeout_ms() -> u64 {
    5000
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: default_redis_url(),
            pool_size: default_redis_pool_size(),
            timeout_ms: default_redis_timeout_ms(),
        }
    }
}

/// Environment-variable source: flat keys for the top-level fields, `__`
/// between nested sections, commas splitting the origin list.
fn env_source() -> config::Environment {
    config::Environment::default()
        .try_parsing(true)
        .separator("__")
        .list_separator(",")
        .with_list_parse_key("allowed_origins")
}

/// Process-wide development flag, set once at startup from the loaded
/// configuration. The error renderer reads it to decide whether 500 bodies
/// carry raw error text; a single flag avoids threading the whole config
/// into `IntoResponse`.
static DEVELOPMENT_MODE: AtomicBool = AtomicBool::new(true);

pub fn set_development_mode(enabled: bool) {
    DEVELOPMENT_MODE.store(enabled, Ordering::Relaxed);
}

pub fn development_mode() -> bool {
    DEVELOPMENT_MODE.load(Ordering::Relaxed)
}
