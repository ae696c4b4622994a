//! Banner, category and tag lists, each cached for half an hour.

use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::cache::{CacheManager, CacheOptions, CacheStats, FetchThroughCache, Loader};
use crate::domain::catalog::{Banner, Category, Tag};
use crate::infra::http::{ApiError, RequestDescriptor, RequestPipeline};
use crate::infra::storage::KvStore;
use crate::util::clock::Clock;

const BANNER_KEY: &str = "bannerList";
const CATEGORY_KEY: &str = "categoryList";
const TAG_KEY: &str = "tagList";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogCacheOptions {
    pub banners: CacheOptions,
    pub categories: CacheOptions,
    pub tags: CacheOptions,
}

impl Default for CatalogCacheOptions {
    fn default() -> Self {
        Self {
            banners: CacheOptions::banners(),
            categories: CacheOptions::categories(),
            tags: CacheOptions::tags(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CatalogCacheStats {
    pub banner: CacheStats,
    pub category: CacheStats,
    pub tag: CacheStats,
}

/// Fills a catalog cache from one list endpoint.
struct CatalogLoader<T> {
    pipeline: Arc<RequestPipeline>,
    path: &'static str,
    _item: PhantomData<fn() -> T>,
}

#[async_trait]
impl<T> Loader<str, Vec<T>> for CatalogLoader<T>
where
    T: DeserializeOwned + Send + 'static,
{
    type Error = ApiError;

    async fn load(&self, _key: &str) -> Result<Vec<T>, ApiError> {
        let items: Option<Vec<T>> = self
            .pipeline
            .execute_as(RequestDescriptor::get(self.path))
            .await?;
        Ok(items.unwrap_or_default())
    }
}

type CatalogList<T> = FetchThroughCache<str, Vec<T>, CatalogLoader<T>>;

fn catalog_list<T>(
    pipeline: &Arc<RequestPipeline>,
    path: &'static str,
    options: CacheOptions,
    storage: Arc<dyn KvStore>,
    clock: Arc<dyn Clock>,
) -> CatalogList<T>
where
    T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    FetchThroughCache::new(
        Arc::new(CacheManager::new(options, storage, clock)),
        CatalogLoader {
            pipeline: Arc::clone(pipeline),
            path,
            _item: PhantomData,
        },
    )
}

pub struct CatalogStore {
    banners: CatalogList<Banner>,
    categories: CatalogList<Category>,
    tags: CatalogList<Tag>,
}

impl CatalogStore {
    pub fn new(
        pipeline: Arc<RequestPipeline>,
        storage: Arc<dyn KvStore>,
        clock: Arc<dyn Clock>,
        options: CatalogCacheOptions,
    ) -> Self {
        Self {
            banners: catalog_list(
                &pipeline,
                "/banner/list",
                options.banners,
                Arc::clone(&storage),
                Arc::clone(&clock),
            ),
            categories: catalog_list(
                &pipeline,
                "/category/list",
                options.categories,
                Arc::clone(&storage),
                Arc::clone(&clock),
            ),
            tags: catalog_list(&pipeline, "/tag/list", options.tags, storage, clock),
        }
    }

    pub async fn fetch_banners(&self, use_cache: bool) -> Result<Vec<Banner>, ApiError> {
        self.banners.fetch(BANNER_KEY, !use_cache).await
    }

    pub async fn fetch_categories(&self, use_cache: bool) -> Result<Vec<Category>, ApiError> {
        self.categories.fetch(CATEGORY_KEY, !use_cache).await
    }

    pub async fn fetch_tags(&self, use_cache: bool) -> Result<Vec<Tag>, ApiError> {
        self.tags.fetch(TAG_KEY, !use_cache).await
    }

    pub fn clear_all_cache(&self) {
        self.banners.cache().clear();
        self.categories.cache().clear();
        self.tags.cache().clear();
    }

    pub fn clear_expired_cache(&self) -> usize {
        self.banners.cache().clear_expired()
            + self.categories.cache().clear_expired()
            + self.tags.cache().clear_expired()
    }

    pub fn cache_stats(&self) -> CatalogCacheStats {
        CatalogCacheStats {
            banner: self.banners.cache().get_stats(),
            category: self.categories.cache().get_stats(),
            tag: self.tags.cache().get_stats(),
        }
    }
}
