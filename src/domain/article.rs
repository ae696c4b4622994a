//! Article projections as served by the reading API.
//!
//! Only the fields the client reasons about are typed; everything else the
//! server sends is carried through `extra` untouched so cached copies stay
//! faithful to the response.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub type ArticleId = i64;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Article {
    pub id: ArticleId,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub like_count: i64,
    #[serde(default)]
    pub collect_count: i64,
    #[serde(default)]
    pub is_liked: bool,
    #[serde(default)]
    pub is_collected: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Article {
    pub fn new(id: ArticleId, title: impl Into<String>) -> Self {
        Self {
            id,
            title: title.into(),
            like_count: 0,
            collect_count: 0,
            is_liked: false,
            is_collected: false,
            extra: Map::new(),
        }
    }

    /// Copy with the like flag set and the count moved by one in its direction.
    pub fn with_like(&self, liked: bool) -> Self {
        Self {
            like_count: self.like_count + if liked { 1 } else { -1 },
            is_liked: liked,
            ..self.clone()
        }
    }

    /// Copy with the favorite flag set and the count moved by one in its direction.
    pub fn with_favorite(&self, favorited: bool) -> Self {
        Self {
            collect_count: self.collect_count + if favorited { 1 } else { -1 },
            is_collected: favorited,
            ..self.clone()
        }
    }
}

/// One page of the article list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArticlePage {
    #[serde(default)]
    pub records: Vec<Article>,
    #[serde(default)]
    pub total: u64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Filters for the article list. Doubles as the list cache key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArticleQuery {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keyword: Option<String>,
}

impl ArticleQuery {
    /// Query-string pairs in wire naming.
    pub fn to_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        if let Some(page) = self.page {
            pairs.push(("page", page.to_string()));
        }
        if let Some(size) = self.size {
            pairs.push(("size", size.to_string()));
        }
        if let Some(category) = self.category_id {
            pairs.push(("categoryId", category.to_string()));
        }
        if let Some(tag) = self.tag_id {
            pairs.push(("tagId", tag.to_string()));
        }
        if let Some(keyword) = self.keyword.as_deref().map(str::trim)
            && !keyword.is_empty()
        {
            pairs.push(("keyword", keyword.to_string()));
        }
        pairs
    }
}

/// Apply `update` to the records matching `id`.
///
/// Returns `None` when no record matched, so callers can leave the entry alone.
pub fn update_records<F>(records: &[Article], id: ArticleId, update: F) -> Option<Vec<Article>>
where
    F: Fn(&Article) -> Article,
{
    if !records.iter().any(|article| article.id == id) {
        return None;
    }
    Some(
        records
            .iter()
            .map(|article| {
                if article.id == id {
                    update(article)
                } else {
                    article.clone()
                }
            })
            .collect(),
    )
}
