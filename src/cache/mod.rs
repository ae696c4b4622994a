//! Response caches.
//!
//! Each cache instance owns a table of canonical key → time-stamped entry,
//! bounded by a TTL and an entry ceiling, and snapshotted to a durable
//! key-value store after every mutation:
//!
//! - **keys**: canonical, order-independent encoding of query keys
//! - **store**: the `CacheManager` itself
//! - **fetch**: cache-first loading on top of a `CacheManager`
//!
//! Limits are configured per instance in `nebula.toml`:
//!
//! ```toml
//! [cache.article_list]
//! ttl_secs = 300
//! max_size = 10
//! ```

mod config;
mod fetch;
mod keys;
mod store;

pub use config::{CacheLimits, CacheOptions, STORAGE_KEY_PREFIX};
pub use fetch::{FetchThroughCache, Loader, fetch_through};
pub use keys::{KeyError, Unordered, encode, encode_key};
pub use store::{CacheEntry, CacheManager, CacheStats};

pub(crate) use store::{METRIC_CACHE_EVICT, METRIC_CACHE_HIT, METRIC_CACHE_MISS};
