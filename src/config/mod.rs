//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::num::NonZeroU64;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};
use config::{Config, Environment, File};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "ossatura";
const ENV_PREFIX: &str = "OSSATURA";

const DEFAULT_CACHE_DIRECTORY: &str = "storage/cache";
const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";
const DEFAULT_TTL_SECS: u64 = 3600;
const DEFAULT_QUERY_TTL_SECS: u64 = 1800;
const DEFAULT_CONFIG_TTL_SECS: u64 = 7200;
const DEFAULT_IMAGE_CACHE_DIRECTORY: &str = "public/cache/images";
const DEFAULT_PUBLIC_ROOT: &str = "public";
const DEFAULT_VARIANT_TTL_SECS: u64 = 86_400;
const DEFAULT_WEBP_QUALITY: u8 = 80;
const DEFAULT_JPEG_QUALITY: u8 = 85;
const DEFAULT_MEMORY_LIMIT_BYTES: u64 = 256 * 1024 * 1024;
const DEFAULT_LATEST_TTL_SECS: u64 = 3600;
const DEFAULT_HISTORY_TTL_SECS: u64 = 86_400;
const DEFAULT_CLEANUP_MAX_AGE_SECS: u64 = 604_800;

/// Command-line arguments for the Ossatura maintenance binary.
#[derive(Debug, Parser)]
#[command(name = "ossatura", version, about = "Ossatura runtime services maintenance")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "OSSATURA_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(flatten)]
    pub overrides: RuntimeOverrides,

    #[command(subcommand)]
    pub command: MaintenanceCommand,
}

#[derive(Debug, Subcommand, Clone)]
pub enum MaintenanceCommand {
    /// Delete derivative image files older than the given age.
    #[command(name = "cleanup-images")]
    CleanupImages(CleanupImagesArgs),
    /// Drop every entry in the cache backend.
    #[command(name = "cache-clear")]
    CacheClear,
    /// Print the latest performance report, optionally with history.
    #[command(name = "perf-report")]
    PerfReport(PerfReportArgs),
}

#[derive(Debug, Args, Clone)]
pub struct CleanupImagesArgs {
    /// Maximum derivative age to keep, in seconds.
    #[arg(long = "max-age-seconds", default_value_t = DEFAULT_CLEANUP_MAX_AGE_SECS)]
    pub max_age_seconds: u64,
}

#[derive(Debug, Args, Clone, Default)]
pub struct PerfReportArgs {
    /// Also print the rolling history list.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub history: bool,
}

#[derive(Debug, Args, Default, Clone)]
pub struct RuntimeOverrides {
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

    /// Override the cache backend (redis|filesystem|memory).
    #[arg(long = "cache-backend", value_name = "KIND")]
    pub cache_backend: Option<String>,

    /// Override the redis connection URL.
    #[arg(long = "cache-redis-url", value_name = "URL")]
    pub cache_redis_url: Option<String>,

    /// Override the filesystem cache directory.
    #[arg(long = "cache-directory", value_name = "PATH")]
    pub cache_directory: Option<PathBuf>,

    /// Override the derivative image cache directory.
    #[arg(long = "images-cache-directory", value_name = "PATH")]
    pub images_cache_directory: Option<PathBuf>,

    /// Override the public base URL for derivative links.
    #[arg(long = "images-base-url", value_name = "URL")]
    pub images_base_url: Option<String>,
}

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub cache: CacheSettings,
    pub images: ImageSettings,
    pub performance: PerformanceSettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub backend: BackendKind,
    pub redis_url: String,
    pub directory: PathBuf,
    pub default_ttl: Duration,
    pub query_ttl: Duration,
    pub config_ttl: Duration,
}

/// Which backend the runtime context tries first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Redis,
    Filesystem,
    Memory,
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "redis" => Ok(Self::Redis),
            "filesystem" | "file" => Ok(Self::Filesystem),
            "memory" => Ok(Self::Memory),
            other => Err(format!("unknown backend `{other}`")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ImageSettings {
    pub enable_webp: bool,
    pub cache_directory: PathBuf,
    pub public_root: PathBuf,
    pub base_url: String,
    pub webp_quality: u8,
    pub jpeg_quality: u8,
    pub variant_ttl: Duration,
}

#[derive(Debug, Clone)]
pub struct PerformanceSettings {
    pub memory_limit_bytes: NonZeroU64,
    pub latest_ttl: Duration,
    pub history_ttl: Duration,
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

/// Settings plus the merged raw tree for dotted-path lookups.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub settings: Settings,
    pub tree: Value,
}

impl LoadedConfig {
    /// All-defaults configuration with an empty lookup tree; for embedders
    /// and tests that configure programmatically.
    pub fn defaults() -> Self {
        Self {
            settings: Settings::defaults(),
            tree: Value::Object(serde_json::Map::new()),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<LoadedConfig, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let merged = builder.build()?;
    let tree: Value = merged.clone().try_deserialize()?;
    let mut raw: RawSettings = merged.try_deserialize()?;
    raw.apply_overrides(&cli.overrides);

    let settings = Settings::from_raw(raw)?;
    Ok(LoadedConfig { settings, tree })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    cache: RawCacheSettings,
    images: RawImageSettings,
    performance: RawPerformanceSettings,
    logging: RawLoggingSettings,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    backend: Option<String>,
    redis_url: Option<String>,
    directory: Option<PathBuf>,
    default_ttl_seconds: Option<u64>,
    query_ttl_seconds: Option<u64>,
    config_ttl_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawImageSettings {
    enable_webp: Option<bool>,
    cache_directory: Option<PathBuf>,
    public_root: Option<PathBuf>,
    base_url: Option<String>,
    webp_quality: Option<u8>,
    jpeg_quality: Option<u8>,
    variant_ttl_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawPerformanceSettings {
    memory_limit_bytes: Option<u64>,
    latest_ttl_seconds: Option<u64>,
    history_ttl_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

impl RawSettings {
    fn apply_overrides(&mut self, overrides: &RuntimeOverrides) {
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(backend) = overrides.cache_backend.as_ref() {
            self.cache.backend = Some(backend.clone());
        }
        if let Some(url) = overrides.cache_redis_url.as_ref() {
            self.cache.redis_url = Some(url.clone());
        }
        if let Some(directory) = overrides.cache_directory.as_ref() {
            self.cache.directory = Some(directory.clone());
        }
        if let Some(directory) = overrides.images_cache_directory.as_ref() {
            self.images.cache_directory = Some(directory.clone());
        }
        if let Some(url) = overrides.images_base_url.as_ref() {
            self.images.base_url = Some(url.clone());
        }
    }
}

impl Settings {
    /// Every default, with no file or environment input.
    pub fn defaults() -> Self {
        Self {
            cache: CacheSettings {
                backend: BackendKind::Filesystem,
                redis_url: DEFAULT_REDIS_URL.to_string(),
                directory: PathBuf::from(DEFAULT_CACHE_DIRECTORY),
                default_ttl: Duration::from_secs(DEFAULT_TTL_SECS),
                query_ttl: Duration::from_secs(DEFAULT_QUERY_TTL_SECS),
                config_ttl: Duration::from_secs(DEFAULT_CONFIG_TTL_SECS),
            },
            images: ImageSettings {
                enable_webp: true,
                cache_directory: PathBuf::from(DEFAULT_IMAGE_CACHE_DIRECTORY),
                public_root: PathBuf::from(DEFAULT_PUBLIC_ROOT),
                base_url: String::new(),
                webp_quality: DEFAULT_WEBP_QUALITY,
                jpeg_quality: DEFAULT_JPEG_QUALITY,
                variant_ttl: Duration::from_secs(DEFAULT_VARIANT_TTL_SECS),
            },
            performance: PerformanceSettings {
                memory_limit_bytes: NonZeroU64::new(DEFAULT_MEMORY_LIMIT_BYTES)
                    .unwrap_or(NonZeroU64::MIN),
                latest_ttl: Duration::from_secs(DEFAULT_LATEST_TTL_SECS),
                history_ttl: Duration::from_secs(DEFAULT_HISTORY_TTL_SECS),
            },
            logging: LoggingSettings {
                level: LevelFilter::INFO,
                format: LogFormat::Compact,
            },
        }
    }

    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            cache,
            images,
            performance,
            logging,
        } = raw;

        Ok(Self {
            cache: build_cache_settings(cache)?,
            images: build_image_settings(images)?,
            performance: build_performance_settings(performance)?,
            logging: build_logging_settings(logging)?,
        })
    }
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let backend = match cache.backend {
        Some(value) => value
            .parse::<BackendKind>()
            .map_err(|reason| LoadError::invalid("cache.backend", reason))?,
        None => BackendKind::Filesystem,
    };

    Ok(CacheSettings {
        backend,
        redis_url: cache
            .redis_url
            .unwrap_or_else(|| DEFAULT_REDIS_URL.to_string()),
        directory: cache
            .directory
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CACHE_DIRECTORY)),
        default_ttl: ttl_seconds(
            cache.default_ttl_seconds,
            DEFAULT_TTL_SECS,
            "cache.default_ttl_seconds",
        )?,
        query_ttl: ttl_seconds(
            cache.query_ttl_seconds,
            DEFAULT_QUERY_TTL_SECS,
            "cache.query_ttl_seconds",
        )?,
        config_ttl: ttl_seconds(
            cache.config_ttl_seconds,
            DEFAULT_CONFIG_TTL_SECS,
            "cache.config_ttl_seconds",
        )?,
    })
}

fn build_image_settings(images: RawImageSettings) -> Result<ImageSettings, LoadError> {
    Ok(ImageSettings {
        enable_webp: images.enable_webp.unwrap_or(true),
        cache_directory: images
            .cache_directory
            .unwrap_or_else(|| PathBuf::from(DEFAULT_IMAGE_CACHE_DIRECTORY)),
        public_root: images
            .public_root
            .unwrap_or_else(|| PathBuf::from(DEFAULT_PUBLIC_ROOT)),
        base_url: images.base_url.unwrap_or_default(),
        webp_quality: quality(
            images.webp_quality,
            DEFAULT_WEBP_QUALITY,
            "images.webp_quality",
        )?,
        jpeg_quality: quality(
            images.jpeg_quality,
            DEFAULT_JPEG_QUALITY,
            "images.jpeg_quality",
        )?,
        variant_ttl: ttl_seconds(
            images.variant_ttl_seconds,
            DEFAULT_VARIANT_TTL_SECS,
            "images.variant_ttl_seconds",
        )?,
    })
}

fn build_performance_settings(
    performance: RawPerformanceSettings,
) -> Result<PerformanceSettings, LoadError> {
    let memory_limit = performance
        .memory_limit_bytes
        .unwrap_or(DEFAULT_MEMORY_LIMIT_BYTES);
    let memory_limit_bytes = NonZeroU64::new(memory_limit).ok_or_else(|| {
        LoadError::invalid(
            "performance.memory_limit_bytes",
            "must be greater than zero",
        )
    })?;

    Ok(PerformanceSettings {
        memory_limit_bytes,
        latest_ttl: ttl_seconds(
            performance.latest_ttl_seconds,
            DEFAULT_LATEST_TTL_SECS,
            "performance.latest_ttl_seconds",
        )?,
        history_ttl: ttl_seconds(
            performance.history_ttl_seconds,
            DEFAULT_HISTORY_TTL_SECS,
            "performance.history_ttl_seconds",
        )?,
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

fn ttl_seconds(value: Option<u64>, default: u64, key: &'static str) -> Result<Duration, LoadError> {
    let seconds = value.unwrap_or(default);
    if seconds == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    Ok(Duration::from_secs(seconds))
}

fn quality(value: Option<u8>, default: u8, key: &'static str) -> Result<u8, LoadError> {
    let quality = value.unwrap_or(default);
    if quality == 0 || quality > 100 {
        return Err(LoadError::invalid(key, "must be between 1 and 100"));
    }
    Ok(quality)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_defaults_resolve_to_documented_values() {
        let settings = Settings::from_raw(RawSettings::default()).expect("defaults resolve");

        assert_eq!(settings.cache.backend, BackendKind::Filesystem);
        assert_eq!(settings.cache.default_ttl, Duration::from_secs(3600));
        assert_eq!(settings.cache.query_ttl, Duration::from_secs(1800));
        assert_eq!(settings.cache.config_ttl, Duration::from_secs(7200));
        assert!(settings.images.enable_webp);
        assert_eq!(settings.images.webp_quality, 80);
        assert_eq!(settings.images.jpeg_quality, 85);
        assert_eq!(settings.images.variant_ttl, Duration::from_secs(86_400));
        assert_eq!(settings.performance.latest_ttl, Duration::from_secs(3600));
        assert_eq!(
            settings.performance.history_ttl,
            Duration::from_secs(86_400)
        );
    }

    #[test]
    fn backend_kind_parses_known_names() {
        assert_eq!("redis".parse::<BackendKind>(), Ok(BackendKind::Redis));
        assert_eq!("FILE".parse::<BackendKind>(), Ok(BackendKind::Filesystem));
        assert_eq!(
            "filesystem".parse::<BackendKind>(),
            Ok(BackendKind::Filesystem)
        );
        assert_eq!("memory".parse::<BackendKind>(), Ok(BackendKind::Memory));
        assert!("mongodb".parse::<BackendKind>().is_err());
    }

    #[test]
    fn zero_ttl_is_rejected() {
        let raw = RawSettings {
            cache: RawCacheSettings {
                default_ttl_seconds: Some(0),
                ..Default::default()
            },
            ..Default::default()
        };

        assert!(matches!(
            Settings::from_raw(raw),
            Err(LoadError::Invalid { key, .. }) if key == "cache.default_ttl_seconds"
        ));
    }

    #[test]
    fn out_of_range_quality_is_rejected() {
        let raw = RawSettings {
            images: RawImageSettings {
                jpeg_quality: Some(101),
                ..Default::default()
            },
            ..Default::default()
        };

        assert!(matches!(
            Settings::from_raw(raw),
            Err(LoadError::Invalid { key, .. }) if key == "images.jpeg_quality"
        ));
    }

    #[test]
    fn overrides_take_precedence_over_raw_values() {
        let mut raw = RawSettings {
            cache: RawCacheSettings {
                backend: Some("redis".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };

        let overrides = RuntimeOverrides {
            cache_backend: Some("memory".to_string()),
            images_base_url: Some("https://cdn.example.com".to_string()),
            ..Default::default()
        };
        raw.apply_overrides(&overrides);

        let settings = Settings::from_raw(raw).expect("settings resolve");
        assert_eq!(settings.cache.backend, BackendKind::Memory);
        assert_eq!(settings.images.base_url, "https://cdn.example.com");
    }
}
