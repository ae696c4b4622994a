//! Per-instance cache options.
//!
//! Each cache owns a storage slot, a time-to-live and an entry ceiling. The
//! defaults below mirror the reading client's stores; `nebula.toml` can
//! override any of them under `[cache.<name>]`.

use std::num::NonZeroUsize;
use std::time::Duration;

use serde::Deserialize;

/// Prefix applied to every cache storage slot.
pub const STORAGE_KEY_PREFIX: &str = "nebula:";

const FIVE_MINUTES: Duration = Duration::from_secs(5 * 60);
const TEN_MINUTES: Duration = Duration::from_secs(10 * 60);
const THIRTY_MINUTES: Duration = Duration::from_secs(30 * 60);

const DEFAULT_TTL: Duration = FIVE_MINUTES;
const DEFAULT_MAX_SIZE: usize = 50;

/// Options for one `CacheManager` instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheOptions {
    /// Durable slot holding this cache's snapshot.
    pub storage_key: String,
    /// Age after which an entry is treated as absent.
    pub ttl: Duration,
    /// Entry-count ceiling, enforced after every write.
    pub max_size: NonZeroUsize,
}

impl CacheOptions {
    pub fn new(name: &str, ttl: Duration, max_size: usize) -> Self {
        Self {
            storage_key: format!("{STORAGE_KEY_PREFIX}{name}"),
            ttl,
            max_size: NonZeroUsize::new(max_size).unwrap_or(NonZeroUsize::MIN),
        }
    }

    /// Apply a configured override on top of these defaults.
    pub fn with_override(mut self, limits: Option<&CacheLimits>) -> Self {
        if let Some(limits) = limits {
            if let Some(secs) = limits.ttl_secs {
                self.ttl = Duration::from_secs(secs);
            }
            if let Some(size) = limits.max_size {
                self.max_size = NonZeroUsize::new(size).unwrap_or(NonZeroUsize::MIN);
            }
        }
        self
    }

    pub fn article_list() -> Self {
        Self::new("articleList", FIVE_MINUTES, 10)
    }

    pub fn article_detail() -> Self {
        Self::new("articleDetail", TEN_MINUTES, 20)
    }

    pub fn hot_articles() -> Self {
        Self::new("hotArticles", TEN_MINUTES, 5)
    }

    pub fn recommended_articles() -> Self {
        Self::new("recommendArticles", TEN_MINUTES, 5)
    }

    pub fn banners() -> Self {
        Self::new("banner", THIRTY_MINUTES, 5)
    }

    pub fn categories() -> Self {
        Self::new("category", THIRTY_MINUTES, 5)
    }

    pub fn tags() -> Self {
        Self::new("tag", THIRTY_MINUTES, 5)
    }
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self::new("cache", DEFAULT_TTL, DEFAULT_MAX_SIZE)
    }
}

/// Raw `[cache.<name>]` table from configuration.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CacheLimits {
    pub ttl_secs: Option<u64>,
    pub max_size: Option<usize>,
}
