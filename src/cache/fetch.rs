//! Cache-first fetching.

use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;

use super::store::CacheManager;

/// Return the cached value for `key`, or await `fetcher` and cache its result.
///
/// `force_refresh` skips the lookup. A fetcher error leaves the cache untouched.
pub async fn fetch_through<K, T, E, Fut>(
    cache: &CacheManager<T>,
    key: &K,
    force_refresh: bool,
    fetcher: impl FnOnce() -> Fut,
) -> Result<T, E>
where
    K: Serialize + ?Sized,
    T: Serialize + DeserializeOwned + Clone + Send + Sync,
    Fut: Future<Output = Result<T, E>>,
{
    if !force_refresh && let Some(cached) = cache.get(key) {
        return Ok(cached);
    }

    let fresh = fetcher().await?;
    cache.set(key, fresh.clone());
    Ok(fresh)
}

/// Produces the value for a key on a cache miss.
#[async_trait]
pub trait Loader<K: ?Sized + Sync, T>: Send + Sync {
    type Error;

    async fn load(&self, key: &K) -> Result<T, Self::Error>;
}

/// A cache bound to the loader that fills it.
pub struct FetchThroughCache<K: ?Sized, T, L> {
    cache: Arc<CacheManager<T>>,
    loader: L,
    _key: PhantomData<fn(&K)>,
}

impl<K, T, L> FetchThroughCache<K, T, L>
where
    K: Serialize + Sync + ?Sized,
    T: Serialize + DeserializeOwned + Clone + Send + Sync,
    L: Loader<K, T>,
{
    pub fn new(cache: Arc<CacheManager<T>>, loader: L) -> Self {
        Self {
            cache,
            loader,
            _key: PhantomData,
        }
    }

    pub fn cache(&self) -> &CacheManager<T> {
        &self.cache
    }

    pub async fn fetch(&self, key: &K, force_refresh: bool) -> Result<T, L::Error> {
        fetch_through(self.cache.as_ref(), key, force_refresh, || self.loader.load(key)).await
    }
}
