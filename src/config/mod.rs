//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::path::PathBuf;
use std::str::FromStr;

use clap::{Args, Parser, ValueHint, builder::BoolishValueParser};
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::cache::{CacheConfig, ProviderParseError};

const LOCAL_CONFIG_BASENAME: &str = "scorta";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 3000;
const DEFAULT_KEY_FORMAT: &str = "URI";
const DEFAULT_MEMORY_CAPACITY: usize = 200;
const DEFAULT_BODY_LIMIT_BYTES: usize = 8 * 1024 * 1024;
const DEFAULT_ASSET_ROOT: &str = "assets";
const DEFAULT_EXPIRES_MINUTES: u64 = 7 * 24 * 60;

/// Command-line arguments for the scorta binary.
#[derive(Debug, Parser)]
#[command(name = "scorta", version, about = "Scorta response cache server")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "SCORTA_CONFIG_FILE", value_name = "PATH", value_hint = ValueHint::FilePath)]
    pub config_file: Option<PathBuf>,

    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    /// Override the listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the listener port.
    #[arg(long = "server-port", value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,

    /// Override the cache provider (memory|redis|redis-pool|memcached).
    #[arg(long = "cache-provider", value_name = "PROVIDER")]
    pub cache_provider: Option<String>,

    /// Override the remote cache host.
    #[arg(long = "cache-host", value_name = "HOST")]
    pub cache_host: Option<String>,

    /// Override the remote cache port.
    #[arg(long = "cache-port", value_name = "PORT")]
    pub cache_port: Option<u16>,

    /// Override the entry time-to-live in seconds.
    #[arg(long = "cache-reload-seconds", value_name = "SECONDS")]
    pub cache_reload_seconds: Option<i64>,

    /// Override the periodic full-reset window in seconds.
    #[arg(long = "cache-reset-seconds", value_name = "SECONDS")]
    pub cache_reset_seconds: Option<i64>,

    /// Override the cache key format selector list.
    #[arg(long = "cache-key-format", value_name = "FORMAT")]
    pub cache_key_format: Option<String>,

    /// Override the asset root directory.
    #[arg(long = "assets-root", value_name = "PATH", value_hint = ValueHint::DirPath)]
    pub assets_root: Option<PathBuf>,
}

/// Raised when settings cannot be loaded or do not validate.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to load configuration")]
    Load(#[from] config::ConfigError),
    #[error(transparent)]
    Provider(#[from] ProviderParseError),
    #[error("unrecognized log level `{0}`")]
    LogLevel(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

/// Validated cache-filter settings; `config` feeds the backend factory.
#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub config: CacheConfig,
    pub key_format: String,
    pub body_limit_bytes: usize,
    pub flush_on_start: bool,
}

#[derive(Debug, Clone)]
pub struct AssetSettings {
    pub root: PathBuf,
    /// Path extensions the filter engages for; empty accepts every path.
    pub accepted_extensions: Vec<String>,
    /// User-agent substrings excluded from caching.
    pub denied_user_agents: Vec<String>,
    /// Query-string substrings excluded from caching.
    pub denied_query_markers: Vec<String>,
    /// Content-type prefixes eligible for storage; empty accepts any type.
    pub accepted_mimes: Vec<String>,
    /// Client-cache lifetime used for Expires/Cache-Control headers.
    pub expires_minutes: u64,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub cache: CacheSettings,
    pub assets: AssetSettings,
}

impl Settings {
    /// Load settings with file → environment → CLI precedence.
    pub fn load(args: &CliArgs) -> Result<Self, SettingsError> {
        let mut builder =
            Config::builder().add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));
        if let Some(path) = &args.config_file {
            builder = builder.add_source(File::from(path.clone()));
        }
        builder = builder.add_source(Environment::with_prefix("SCORTA").separator("__"));

        let raw: RawSettings = builder.build()?.try_deserialize()?;
        Self::from_raw(raw, &args.overrides)
    }

    fn from_raw(raw: RawSettings, overrides: &ServeOverrides) -> Result<Self, SettingsError> {
        let level_name = overrides
            .log_level
            .clone()
            .unwrap_or(raw.logging.level);
        let level = LevelFilter::from_str(&level_name)
            .map_err(|_| SettingsError::LogLevel(level_name.clone()))?;
        let json = overrides.log_json.unwrap_or(raw.logging.json);

        let provider_name = overrides
            .cache_provider
            .clone()
            .unwrap_or(raw.cache.provider);
        let provider = provider_name.parse()?;

        let cache_config = CacheConfig {
            provider,
            hostname: overrides.cache_host.clone().or(raw.cache.host),
            port: overrides.cache_port.or(raw.cache.port),
            reload_time: overrides
                .cache_reload_seconds
                .unwrap_or(raw.cache.reload_time_seconds),
            reset_time: overrides
                .cache_reset_seconds
                .unwrap_or(raw.cache.reset_time_seconds),
            memory_capacity: raw.cache.memory_capacity,
        };

        Ok(Self {
            server: ServerSettings {
                host: overrides.server_host.clone().unwrap_or(raw.server.host),
                port: overrides.server_port.unwrap_or(raw.server.port),
            },
            logging: LoggingSettings {
                level,
                format: if json {
                    LogFormat::Json
                } else {
                    LogFormat::Compact
                },
            },
            cache: CacheSettings {
                config: cache_config,
                key_format: overrides
                    .cache_key_format
                    .clone()
                    .unwrap_or(raw.cache.key_format),
                body_limit_bytes: raw.cache.body_limit_bytes,
                flush_on_start: raw.cache.flush_on_start,
            },
            assets: AssetSettings {
                root: overrides.assets_root.clone().unwrap_or(raw.assets.root),
                accepted_extensions: raw.assets.accepted_extensions,
                denied_user_agents: raw.assets.denied_user_agents,
                denied_query_markers: raw.assets.denied_query_markers,
                accepted_mimes: raw.assets.accepted_mimes,
                expires_minutes: raw.assets.expires_minutes,
            },
        })
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawSettings {
    server: RawServer,
    logging: RawLogging,
    cache: RawCache,
    assets: RawAssets,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct RawServer {
    host: String,
    port: u16,
}

impl Default for RawServer {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct RawLogging {
    level: String,
    json: bool,
}

impl Default for RawLogging {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct RawCache {
    provider: String,
    host: Option<String>,
    port: Option<u16>,
    reload_time_seconds: i64,
    reset_time_seconds: i64,
    key_format: String,
    memory_capacity: usize,
    body_limit_bytes: usize,
    flush_on_start: bool,
}

impl Default for RawCache {
    fn default() -> Self {
        Self {
            provider: "memory".to_string(),
            host: None,
            port: None,
            reload_time_seconds: 0,
            reset_time_seconds: 0,
            key_format: DEFAULT_KEY_FORMAT.to_string(),
            memory_capacity: DEFAULT_MEMORY_CAPACITY,
            body_limit_bytes: DEFAULT_BODY_LIMIT_BYTES,
            flush_on_start: false,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct RawAssets {
    root: PathBuf,
    accepted_extensions: Vec<String>,
    denied_user_agents: Vec<String>,
    denied_query_markers: Vec<String>,
    accepted_mimes: Vec<String>,
    expires_minutes: u64,
}

impl Default for RawAssets {
    fn default() -> Self {
        Self {
            root: PathBuf::from(DEFAULT_ASSET_ROOT),
            accepted_extensions: ["js", "css", "json", "svg", "map", "html"]
                .map(str::to_string)
                .to_vec(),
            denied_user_agents: Vec::new(),
            denied_query_markers: Vec::new(),
            accepted_mimes: [
                "text/css",
                "text/javascript",
                "application/javascript",
                "application/x-javascript",
                "application/json",
                "text/html",
                "image/svg+xml",
            ]
            .map(str::to_string)
            .to_vec(),
            expires_minutes: DEFAULT_EXPIRES_MINUTES,
        }
    }
}
