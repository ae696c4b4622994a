//! Article store: four response caches kept consistent under optimistic
//! like/favorite toggles.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::cache::{CacheManager, CacheOptions, CacheStats, fetch_through};
use crate::domain::article::{Article, ArticleId, ArticlePage, ArticleQuery, update_records};
use crate::infra::http::{ApiError, RequestDescriptor, RequestPipeline};
use crate::infra::storage::KvStore;
use crate::util::clock::Clock;
use crate::util::lock::mutex_lock;

const SOURCE: &str = "application::articles";

/// Durable slot for the per-article like/favorite flags.
pub const ARTICLE_FLAGS_SLOT: &str = "article-store";

/// Options for the four article caches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArticleCacheOptions {
    pub list: CacheOptions,
    pub detail: CacheOptions,
    pub hot: CacheOptions,
    pub recommended: CacheOptions,
}

impl Default for ArticleCacheOptions {
    fn default() -> Self {
        Self {
            list: CacheOptions::article_list(),
            detail: CacheOptions::article_detail(),
            hot: CacheOptions::hot_articles(),
            recommended: CacheOptions::recommended_articles(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArticleCacheStats {
    pub list: CacheStats,
    pub detail: CacheStats,
    pub hot: CacheStats,
    pub recommend: CacheStats,
}

/// What the current user has liked and favorited, keyed by article.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ArticleFlags {
    #[serde(default)]
    liked_articles: BTreeMap<ArticleId, bool>,
    #[serde(default)]
    favorite_articles: BTreeMap<ArticleId, bool>,
}

#[derive(Debug, Clone, Copy)]
enum Reaction {
    Like,
    Favorite,
}

impl Reaction {
    fn path(self, id: ArticleId) -> String {
        match self {
            Self::Like => format!("/article/like/{id}"),
            Self::Favorite => format!("/article/collect/{id}"),
        }
    }

    fn flags(self, flags: &mut ArticleFlags) -> &mut BTreeMap<ArticleId, bool> {
        match self {
            Self::Like => &mut flags.liked_articles,
            Self::Favorite => &mut flags.favorite_articles,
        }
    }

    fn apply(self, article: &Article, state: bool) -> Article {
        match self {
            Self::Like => article.with_like(state),
            Self::Favorite => article.with_favorite(state),
        }
    }
}

pub struct ArticleStore {
    pipeline: Arc<RequestPipeline>,
    storage: Arc<dyn KvStore>,
    list: CacheManager<ArticlePage>,
    detail: CacheManager<Article>,
    hot: CacheManager<Vec<Article>>,
    recommended: CacheManager<Vec<Article>>,
    flags: Mutex<ArticleFlags>,
}

impl ArticleStore {
    pub fn new(
        pipeline: Arc<RequestPipeline>,
        storage: Arc<dyn KvStore>,
        clock: Arc<dyn Clock>,
        options: ArticleCacheOptions,
    ) -> Self {
        let flags = load_flags(storage.as_ref());
        Self {
            list: CacheManager::new(options.list, Arc::clone(&storage), Arc::clone(&clock)),
            detail: CacheManager::new(options.detail, Arc::clone(&storage), Arc::clone(&clock)),
            hot: CacheManager::new(options.hot, Arc::clone(&storage), Arc::clone(&clock)),
            recommended: CacheManager::new(options.recommended, Arc::clone(&storage), clock),
            pipeline,
            storage,
            flags: Mutex::new(flags),
        }
    }

    pub async fn fetch_article_list(
        &self,
        query: &ArticleQuery,
        use_cache: bool,
    ) -> Result<ArticlePage, ApiError> {
        fetch_through(&self.list, query, !use_cache, || {
            let request = query
                .to_pairs()
                .into_iter()
                .fold(RequestDescriptor::get("/article/list"), |request, (name, value)| {
                    request.query(name, value)
                });
            self.pipeline.execute_as(request)
        })
        .await
    }

    pub async fn fetch_article_detail(
        &self,
        id: ArticleId,
        use_cache: bool,
    ) -> Result<Article, ApiError> {
        fetch_through(&self.detail, &id, !use_cache, || {
            self.pipeline
                .execute_as(RequestDescriptor::get(format!("/article/{id}")))
        })
        .await
    }

    pub async fn fetch_hot_articles(
        &self,
        limit: u32,
        use_cache: bool,
    ) -> Result<Vec<Article>, ApiError> {
        let key = format!("hotArticles_{limit}");
        fetch_through(&self.hot, &key, !use_cache, || {
            self.fetch_article_array(RequestDescriptor::get("/article/hot").query("limit", limit))
        })
        .await
    }

    pub async fn fetch_recommended_articles(
        &self,
        limit: u32,
        use_cache: bool,
    ) -> Result<Vec<Article>, ApiError> {
        let key = format!("recommendArticles_{limit}");
        fetch_through(&self.recommended, &key, !use_cache, || {
            self.fetch_article_array(
                RequestDescriptor::get("/article/recommend").query("limit", limit),
            )
        })
        .await
    }

    /// A missing `data` field means an empty list.
    async fn fetch_article_array(
        &self,
        request: RequestDescriptor,
    ) -> Result<Vec<Article>, ApiError> {
        let articles: Option<Vec<Article>> = self.pipeline.execute_as(request).await?;
        Ok(articles.unwrap_or_default())
    }

    /// Apply `update` to every cached projection of article `id`.
    ///
    /// Entries that do not contain the article are left as they are.
    /// Timestamps are not touched, so an update never extends freshness.
    pub fn update_cached_article<F>(&self, id: ArticleId, update: F) -> usize
    where
        F: Fn(&Article) -> Article,
    {
        let detail = self
            .detail
            .update_all(|article, _| (article.id == id).then(|| update(article)));

        let list = self.list.update_all(|page, _| {
            update_records(&page.records, id, &update).map(|records| ArticlePage {
                records,
                ..page.clone()
            })
        });

        let hot = self
            .hot
            .update_all(|records, _| update_records(records, id, &update));
        let recommended = self
            .recommended
            .update_all(|records, _| update_records(records, id, &update));

        let touched = detail + list + hot + recommended;
        debug!(article = id, touched, "Propagated article update across caches");
        touched
    }

    /// Flip the like flag, optimistically, and confirm with the server.
    ///
    /// Returns the new state. On failure every cache and the flag are rolled
    /// back and the error is returned.
    pub async fn toggle_like(&self, id: ArticleId) -> Result<bool, ApiError> {
        self.toggle(Reaction::Like, id).await
    }

    /// Flip the favorite flag, optimistically, and confirm with the server.
    pub async fn toggle_favorite(&self, id: ArticleId) -> Result<bool, ApiError> {
        self.toggle(Reaction::Favorite, id).await
    }

    async fn toggle(&self, reaction: Reaction, id: ArticleId) -> Result<bool, ApiError> {
        let original = self.swap_flag(reaction, id, None);
        let next = !original;
        self.update_cached_article(id, |article| reaction.apply(article, next));

        match self
            .pipeline
            .execute(RequestDescriptor::post(reaction.path(id)))
            .await
        {
            Ok(_) => Ok(next),
            Err(err) => {
                warn!(article = id, ?reaction, error = %err, "Reaction failed; rolling back");
                self.swap_flag(reaction, id, Some(original));
                self.update_cached_article(id, |article| reaction.apply(article, original));
                Err(err)
            }
        }
    }

    /// Set the flag to `state`, or flip it when `state` is `None`.
    /// Returns the previous value.
    fn swap_flag(&self, reaction: Reaction, id: ArticleId, state: Option<bool>) -> bool {
        let mut flags = mutex_lock(&self.flags, SOURCE, "swap_flag");
        let slot = reaction.flags(&mut flags);
        let previous = slot.get(&id).copied().unwrap_or(false);
        slot.insert(id, state.unwrap_or(!previous));
        save_flags(self.storage.as_ref(), &flags);
        previous
    }

    pub fn is_liked(&self, id: ArticleId) -> bool {
        mutex_lock(&self.flags, SOURCE, "is_liked")
            .liked_articles
            .get(&id)
            .copied()
            .unwrap_or(false)
    }

    pub fn is_favorited(&self, id: ArticleId) -> bool {
        mutex_lock(&self.flags, SOURCE, "is_favorited")
            .favorite_articles
            .get(&id)
            .copied()
            .unwrap_or(false)
    }

    pub fn clear_all_cache(&self) {
        self.list.clear();
        self.detail.clear();
        self.hot.clear();
        self.recommended.clear();
    }

    pub fn clear_expired_cache(&self) -> usize {
        self.list.clear_expired()
            + self.detail.clear_expired()
            + self.hot.clear_expired()
            + self.recommended.clear_expired()
    }

    pub fn cache_stats(&self) -> ArticleCacheStats {
        ArticleCacheStats {
            list: self.list.get_stats(),
            detail: self.detail.get_stats(),
            hot: self.hot.get_stats(),
            recommend: self.recommended.get_stats(),
        }
    }
}

fn load_flags(storage: &dyn KvStore) -> ArticleFlags {
    storage
        .load(ARTICLE_FLAGS_SLOT)
        .and_then(|raw| match serde_json::from_str(&raw) {
            Ok(flags) => Some(flags),
            Err(err) => {
                warn!(error = %err, "Discarding unreadable article flags");
                None
            }
        })
        .unwrap_or_default()
}

fn save_flags(storage: &dyn KvStore, flags: &ArticleFlags) {
    match serde_json::to_string(flags) {
        Ok(raw) => {
            if let Err(err) = storage.save(ARTICLE_FLAGS_SLOT, &raw) {
                warn!(error = %err, "Article flags save failed");
            }
        }
        Err(err) => warn!(error = %err, "Article flags encode failed"),
    }
}
