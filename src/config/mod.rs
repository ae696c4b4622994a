//! Configuration layer: typed settings with layered precedence (file → env → CLI).

mod cli;

use std::{num::NonZeroUsize, path::PathBuf, str::FromStr, time::Duration};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::application::articles::ArticleCacheOptions;
use crate::application::catalog::CatalogCacheOptions;
use crate::auth::RefreshSettings;
use crate::cache::{CacheLimits, CacheOptions};
use crate::infra::http::NotifyPolicy;

pub use cli::{
    ArticleIdArgs, ArticlesArgs, ArticlesCommand, CacheArgs, CacheCommand, CatalogArgs,
    CatalogCommand, CliArgs, Command, GlobalOverrides, LimitArgs, ListArgs, LoginArgs,
    ReactionArgs,
};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "nebula";
const ENV_PREFIX: &str = "NEBULA";
const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8080/api/client";
const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_REFRESH_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_RENEWAL_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_MAX_QUEUE_SIZE: usize = 50;
const DEFAULT_REFRESH_THRESHOLD_SECS: u64 = 300;
const DEFAULT_PROACTIVE_INTERVAL_SECS: u64 = 60;
const DEFAULT_ERROR_DEDUPE_WINDOW_MS: u64 = 1_000;
const DEFAULT_STORAGE_DIR: &str = ".nebula";

/// Fully-resolved client settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub api: ApiSettings,
    pub auth: AuthSettings,
    pub notifications: NotificationSettings,
    pub cache: CacheSettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone)]
pub struct ApiSettings {
    pub base_url: String,
    pub request_timeout: Duration,
    pub notify_policy: NotifyPolicy,
}

#[derive(Debug, Clone)]
pub struct AuthSettings {
    pub refresh_timeout: Duration,
    pub renewal_timeout: Duration,
    pub max_queue_size: NonZeroUsize,
    pub refresh_threshold: Duration,
    pub proactive_interval: Duration,
}

impl AuthSettings {
    pub fn refresh_settings(&self) -> RefreshSettings {
        RefreshSettings {
            refresh_timeout: self.refresh_timeout,
            renewal_timeout: self.renewal_timeout,
            max_queue_size: self.max_queue_size.get(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NotificationSettings {
    pub error_dedupe_window: Duration,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub storage_dir: PathBuf,
    pub articles: ArticleCacheOptions,
    pub catalog: CatalogCacheOptions,
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

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;
    raw.apply_overrides(&cli.overrides);

    Settings::from_raw(raw)
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    api: RawApiSettings,
    auth: RawAuthSettings,
    notifications: RawNotificationSettings,
    cache: RawCacheSettings,
    logging: RawLoggingSettings,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawApiSettings {
    base_url: Option<String>,
    request_timeout_ms: Option<u64>,
    notify_policy: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawAuthSettings {
    refresh_timeout_ms: Option<u64>,
    renewal_timeout_ms: Option<u64>,
    max_queue_size: Option<usize>,
    refresh_threshold_secs: Option<u64>,
    proactive_interval_secs: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawNotificationSettings {
    error_dedupe_window_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    storage_dir: Option<PathBuf>,
    article_list: Option<CacheLimits>,
    article_detail: Option<CacheLimits>,
    hot_articles: Option<CacheLimits>,
    recommended_articles: Option<CacheLimits>,
    banners: Option<CacheLimits>,
    categories: Option<CacheLimits>,
    tags: Option<CacheLimits>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

impl RawSettings {
    fn apply_overrides(&mut self, overrides: &GlobalOverrides) {
        if let Some(url) = overrides.api_base_url.as_ref() {
            self.api.base_url = Some(url.clone());
        }
        if let Some(timeout) = overrides.api_request_timeout_ms {
            self.api.request_timeout_ms = Some(timeout);
        }
        if let Some(dir) = overrides.cache_storage_dir.as_ref() {
            self.cache.storage_dir = Some(dir.clone());
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            api,
            auth,
            notifications,
            cache,
            logging,
        } = raw;

        let api = build_api_settings(api)?;
        let auth = build_auth_settings(auth)?;
        let notifications = build_notification_settings(notifications)?;
        let cache = build_cache_settings(cache)?;
        let logging = build_logging_settings(logging)?;

        Ok(Self {
            api,
            auth,
            notifications,
            cache,
            logging,
        })
    }
}

fn build_api_settings(api: RawApiSettings) -> Result<ApiSettings, LoadError> {
    let base_url = api
        .base_url
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
    url::Url::parse(&base_url)
        .map_err(|err| LoadError::invalid("api.base_url", format!("failed to parse: {err}")))?;

    let request_timeout = positive_millis(
        api.request_timeout_ms.unwrap_or(DEFAULT_REQUEST_TIMEOUT_MS),
        "api.request_timeout_ms",
    )?;

    let notify_policy = match api.notify_policy.as_deref().map(str::trim) {
        None | Some("always") => NotifyPolicy::Always,
        Some("opt_in") => NotifyPolicy::OptIn,
        Some(other) => {
            return Err(LoadError::invalid(
                "api.notify_policy",
                format!("expected `always` or `opt_in`, got `{other}`"),
            ));
        }
    };

    Ok(ApiSettings {
        base_url,
        request_timeout,
        notify_policy,
    })
}

fn build_auth_settings(auth: RawAuthSettings) -> Result<AuthSettings, LoadError> {
    let refresh_timeout = positive_millis(
        auth.refresh_timeout_ms.unwrap_or(DEFAULT_REFRESH_TIMEOUT_MS),
        "auth.refresh_timeout_ms",
    )?;
    let renewal_timeout = positive_millis(
        auth.renewal_timeout_ms.unwrap_or(DEFAULT_RENEWAL_TIMEOUT_MS),
        "auth.renewal_timeout_ms",
    )?;
    let max_queue_size = NonZeroUsize::new(auth.max_queue_size.unwrap_or(DEFAULT_MAX_QUEUE_SIZE))
        .ok_or_else(|| LoadError::invalid("auth.max_queue_size", "must be greater than zero"))?;
    let refresh_threshold = positive_secs(
        auth.refresh_threshold_secs
            .unwrap_or(DEFAULT_REFRESH_THRESHOLD_SECS),
        "auth.refresh_threshold_secs",
    )?;
    let proactive_interval = positive_secs(
        auth.proactive_interval_secs
            .unwrap_or(DEFAULT_PROACTIVE_INTERVAL_SECS),
        "auth.proactive_interval_secs",
    )?;

    Ok(AuthSettings {
        refresh_timeout,
        renewal_timeout,
        max_queue_size,
        refresh_threshold,
        proactive_interval,
    })
}

fn build_notification_settings(
    notifications: RawNotificationSettings,
) -> Result<NotificationSettings, LoadError> {
    let error_dedupe_window = positive_millis(
        notifications
            .error_dedupe_window_ms
            .unwrap_or(DEFAULT_ERROR_DEDUPE_WINDOW_MS),
        "notifications.error_dedupe_window_ms",
    )?;
    Ok(NotificationSettings {
        error_dedupe_window,
    })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let storage_dir = cache
        .storage_dir
        .unwrap_or_else(|| PathBuf::from(DEFAULT_STORAGE_DIR));

    let articles = ArticleCacheOptions {
        list: cache_options(
            CacheOptions::article_list(),
            cache.article_list.as_ref(),
            "cache.article_list",
        )?,
        detail: cache_options(
            CacheOptions::article_detail(),
            cache.article_detail.as_ref(),
            "cache.article_detail",
        )?,
        hot: cache_options(
            CacheOptions::hot_articles(),
            cache.hot_articles.as_ref(),
            "cache.hot_articles",
        )?,
        recommended: cache_options(
            CacheOptions::recommended_articles(),
            cache.recommended_articles.as_ref(),
            "cache.recommended_articles",
        )?,
    };

    let catalog = CatalogCacheOptions {
        banners: cache_options(CacheOptions::banners(), cache.banners.as_ref(), "cache.banners")?,
        categories: cache_options(
            CacheOptions::categories(),
            cache.categories.as_ref(),
            "cache.categories",
        )?,
        tags: cache_options(CacheOptions::tags(), cache.tags.as_ref(), "cache.tags")?,
    };

    Ok(CacheSettings {
        storage_dir,
        articles,
        catalog,
    })
}

fn cache_options(
    defaults: CacheOptions,
    limits: Option<&CacheLimits>,
    key: &'static str,
) -> Result<CacheOptions, LoadError> {
    if let Some(limits) = limits {
        if limits.ttl_secs == Some(0) {
            return Err(LoadError::invalid(key, "ttl_secs must be greater than zero"));
        }
        if limits.max_size == Some(0) {
            return Err(LoadError::invalid(key, "max_size must be greater than zero"));
        }
    }
    Ok(defaults.with_override(limits))
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

fn positive_millis(value: u64, key: &'static str) -> Result<Duration, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    Ok(Duration::from_millis(value))
}

fn positive_secs(value: u64, key: &'static str) -> Result<Duration, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    Ok(Duration::from_secs(value))
}
