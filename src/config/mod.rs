//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{
    net::SocketAddr,
    num::{NonZeroU32, NonZeroUsize},
    path::PathBuf,
    str::FromStr,
    time::Duration,
};

use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::cache::SharedBackendKind;
use crate::identity::{CookieSettings, SecurityMode};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "modreel";
const ENV_PREFIX: &str = "MODREEL";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 3000;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 8;
const DEFAULT_FALLBACK_CAPACITY: usize = 10_000;
const DEFAULT_ENTITY_TTL_SECS: u64 = 300;
const DEFAULT_COOKIE_NAME: &str = "modreel_visitor";
const DEFAULT_COOKIE_PATH: &str = "/";
const DEFAULT_FINGERPRINT_BUCKET_SECS: u32 = 60;
const DEFAULT_REPORT_MAX_HITS: u32 = 5;
const DEFAULT_REPORT_BUCKET_SECS: u32 = 60;

/// Command-line arguments for the modreel binary.
#[derive(Debug, Parser)]
#[command(name = "modreel", version, about = "Mod video showcase service")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "MODREEL_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the HTTP service.
    Serve(Box<ServeArgs>),
    /// Apply pending database migrations and exit.
    #[command(name = "migrate")]
    Migrate(DatabaseOverride),
}

#[derive(Debug, Args, Default, Clone)]
pub struct DatabaseOverride {
    /// Override the database connection URL.
    #[arg(long = "database-url", value_name = "URL")]
    pub database_url: Option<String>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
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

    /// Override the graceful shutdown timeout.
    #[arg(long = "server-graceful-shutdown-seconds", value_name = "SECONDS")]
    pub server_graceful_shutdown_seconds: Option<u64>,

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

    /// Override the database connection URL.
    #[arg(long = "database-url", value_name = "URL")]
    pub database_url: Option<String>,

    /// Override the database pool size.
    #[arg(long = "database-max-connections", value_name = "COUNT")]
    pub database_max_connections: Option<u32>,

    /// Select the shared cache backend (memory|none).
    #[arg(long = "cache-shared-backend", value_name = "KIND")]
    pub cache_shared_backend: Option<String>,

    /// Select the identity mode (strict|reduced).
    #[arg(long = "identity-security-mode", value_name = "MODE")]
    pub identity_security_mode: Option<String>,

    /// Override the report rate limit ceiling per bucket.
    #[arg(long = "rate-limit-report-max-hits", value_name = "COUNT")]
    pub rate_limit_report_max_hits: Option<u32>,
}

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub database: DatabaseSettings,
    pub cache: CacheSettings,
    pub identity: IdentitySettings,
    pub fingerprint: FingerprintSettings,
    pub rate_limit: RateLimitSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
    pub graceful_shutdown: Duration,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct DatabaseSettings {
    pub url: Option<String>,
    pub max_connections: NonZeroU32,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub shared_backend: SharedBackendKind,
    pub fallback_capacity: usize,
    pub entity_ttl_seconds: u64,
}

#[derive(Debug, Clone)]
pub struct IdentitySettings {
    pub security_mode: SecurityMode,
    pub cookie: CookieSettings,
}

#[derive(Clone)]
pub struct FingerprintSettings {
    pub site_secret: Option<String>,
    pub bucket_seconds: NonZeroU32,
}

impl std::fmt::Debug for FingerprintSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FingerprintSettings")
            .field("site_secret", &self.site_secret.as_ref().map(|_| "<redacted>"))
            .field("bucket_seconds", &self.bucket_seconds)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct RateLimitSettings {
    pub report_max_hits: NonZeroU32,
    pub report_bucket_seconds: NonZeroU32,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    load_with_environment(
        cli,
        Environment::with_prefix(ENV_PREFIX)
            .separator("__")
            .try_parsing(true),
    )
}

fn load_with_environment(cli: &CliArgs, environment: Environment) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(environment);

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::Migrate(database)) => raw.apply_database_override(database),
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    database: RawDatabaseSettings,
    cache: RawCacheSettings,
    identity: RawIdentitySettings,
    fingerprint: RawFingerprintSettings,
    rate_limit: RawRateLimitSettings,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.server_port {
            self.server.port = Some(port);
        }
        if let Some(seconds) = overrides.server_graceful_shutdown_seconds {
            self.server.graceful_shutdown_seconds = Some(seconds);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(url) = overrides.database_url.as_ref() {
            self.database.url = Some(url.clone());
        }
        if let Some(max) = overrides.database_max_connections {
            self.database.max_connections = Some(max);
        }
        if let Some(kind) = overrides.cache_shared_backend.as_ref() {
            self.cache.shared_backend = Some(kind.clone());
        }
        if let Some(mode) = overrides.identity_security_mode.as_ref() {
            self.identity.security_mode = Some(mode.clone());
        }
        if let Some(max) = overrides.rate_limit_report_max_hits {
            self.rate_limit.report_max_hits = Some(max);
        }
    }

    fn apply_database_override(&mut self, overrides: &DatabaseOverride) {
        if let Some(url) = overrides.database_url.as_ref() {
            self.database.url = Some(url.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            database,
            cache,
            identity,
            fingerprint,
            rate_limit,
        } = raw;

        Ok(Self {
            server: build_server_settings(server)?,
            logging: build_logging_settings(logging)?,
            database: build_database_settings(database)?,
            cache: build_cache_settings(cache)?,
            identity: build_identity_settings(identity)?,
            fingerprint: build_fingerprint_settings(fingerprint)?,
            rate_limit: build_rate_limit_settings(rate_limit)?,
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());
    let port = server.port.unwrap_or(DEFAULT_PORT);
    if port == 0 {
        return Err(LoadError::invalid(
            "server.port",
            "port must be greater than zero",
        ));
    }
    let addr = parse_socket_addr(&host, port)
        .map_err(|reason| LoadError::invalid("server.addr", reason))?;

    let graceful_secs = server
        .graceful_shutdown_seconds
        .unwrap_or(DEFAULT_GRACEFUL_SHUTDOWN_SECS);
    if graceful_secs == 0 {
        return Err(LoadError::invalid(
            "server.graceful_shutdown_seconds",
            "must be greater than zero",
        ));
    }

    Ok(ServerSettings {
        addr,
        graceful_shutdown: Duration::from_secs(graceful_secs),
    })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_database_settings(database: RawDatabaseSettings) -> Result<DatabaseSettings, LoadError> {
    let url = non_blank(database.url);
    let max_connections = non_zero_u32(
        database
            .max_connections
            .unwrap_or(DEFAULT_DB_MAX_CONNECTIONS)
            .into(),
        "database.max_connections",
    )?;

    Ok(DatabaseSettings {
        url,
        max_connections,
    })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let shared_backend = match non_blank(cache.shared_backend) {
        None => SharedBackendKind::default(),
        Some(kind) => match kind.to_ascii_lowercase().as_str() {
            "memory" => SharedBackendKind::Memory,
            "none" => SharedBackendKind::None,
            other => {
                return Err(LoadError::invalid(
                    "cache.shared_backend",
                    format!("unknown backend `{other}`, expected `memory` or `none`"),
                ));
            }
        },
    };

    let capacity = cache.fallback_capacity.unwrap_or(DEFAULT_FALLBACK_CAPACITY);
    let fallback_capacity = NonZeroUsize::new(capacity)
        .ok_or_else(|| LoadError::invalid("cache.fallback_capacity", "must be greater than zero"))?
        .get();

    Ok(CacheSettings {
        shared_backend,
        fallback_capacity,
        entity_ttl_seconds: cache.entity_ttl_seconds.unwrap_or(DEFAULT_ENTITY_TTL_SECS),
    })
}

fn build_identity_settings(identity: RawIdentitySettings) -> Result<IdentitySettings, LoadError> {
    let security_mode = match non_blank(identity.security_mode) {
        None => SecurityMode::default(),
        Some(mode) => match mode.to_ascii_lowercase().as_str() {
            "strict" => SecurityMode::Strict,
            "reduced" => SecurityMode::Reduced,
            other => {
                return Err(LoadError::invalid(
                    "identity.security_mode",
                    format!("unknown mode `{other}`, expected `strict` or `reduced`"),
                ));
            }
        },
    };

    let name = non_blank(identity.cookie_name).unwrap_or_else(|| DEFAULT_COOKIE_NAME.to_string());
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(LoadError::invalid(
            "identity.cookie_name",
            "only ASCII letters, digits, `_` and `-` are allowed",
        ));
    }

    let path = non_blank(identity.cookie_path).unwrap_or_else(|| DEFAULT_COOKIE_PATH.to_string());
    let alt_path = non_blank(identity.alt_cookie_path);
    for (key, value) in [
        ("identity.cookie_path", Some(&path)),
        ("identity.alt_cookie_path", alt_path.as_ref()),
    ] {
        if let Some(value) = value
            && !value.starts_with('/')
        {
            return Err(LoadError::invalid(key, "must start with `/`"));
        }
    }

    Ok(IdentitySettings {
        security_mode,
        cookie: CookieSettings {
            name,
            path,
            alt_path,
            domain: non_blank(identity.cookie_domain),
            secure: identity.cookie_secure.unwrap_or(false),
        },
    })
}

fn build_fingerprint_settings(
    fingerprint: RawFingerprintSettings,
) -> Result<FingerprintSettings, LoadError> {
    let bucket_seconds = non_zero_u32(
        fingerprint
            .bucket_seconds
            .unwrap_or(DEFAULT_FINGERPRINT_BUCKET_SECS.into()),
        "fingerprint.bucket_seconds",
    )?;

    Ok(FingerprintSettings {
        site_secret: non_blank(fingerprint.site_secret),
        bucket_seconds,
    })
}

fn build_rate_limit_settings(
    rate_limit: RawRateLimitSettings,
) -> Result<RateLimitSettings, LoadError> {
    let report_max_hits = non_zero_u32(
        rate_limit
            .report_max_hits
            .unwrap_or(DEFAULT_REPORT_MAX_HITS)
            .into(),
        "rate_limit.report_max_hits",
    )?;
    let report_bucket_seconds = non_zero_u32(
        rate_limit
            .report_bucket_seconds
            .unwrap_or(DEFAULT_REPORT_BUCKET_SECS.into()),
        "rate_limit.report_bucket_seconds",
    )?;

    Ok(RateLimitSettings {
        report_max_hits,
        report_bucket_seconds,
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
    graceful_shutdown_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawDatabaseSettings {
    url: Option<String>,
    max_connections: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    shared_backend: Option<String>,
    fallback_capacity: Option<usize>,
    entity_ttl_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawIdentitySettings {
    security_mode: Option<String>,
    cookie_name: Option<String>,
    cookie_path: Option<String>,
    alt_cookie_path: Option<String>,
    cookie_domain: Option<String>,
    cookie_secure: Option<bool>,
}

#[derive(Clone, Deserialize, Default)]
#[serde(default)]
struct RawFingerprintSettings {
    site_secret: Option<String>,
    bucket_seconds: Option<u64>,
}

impl std::fmt::Debug for RawFingerprintSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawFingerprintSettings")
            .field("site_secret", &self.site_secret.as_ref().map(|_| "<redacted>"))
            .field("bucket_seconds", &self.bucket_seconds)
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawRateLimitSettings {
    report_max_hits: Option<u32>,
    report_bucket_seconds: Option<u64>,
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    })
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

fn non_zero_u32(value: u64, key: &'static str) -> Result<NonZeroU32, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    let value_u32: u32 = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for u32"))?;
    NonZeroU32::new(value_u32).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[cfg(test)]
mod tests;
