//! End-to-end tests: the wired client talking to a mock API server.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use futures::future::join_all;
use httpmock::MockServer;
use nebula_client::application::context::ClientContext;
use nebula_client::auth::{Credential, RENEWAL_PATH};
use nebula_client::config::{self, CliArgs};
use nebula_client::domain::article::ArticleQuery;
use nebula_client::infra::http::{ApiError, HttpTransport, Transport};
use nebula_client::infra::storage::{KvStore, MemoryStore};
use nebula_client::util::clock::{Clock, ManualClock};

const START_MILLIS: i64 = 1_700_000_000_000;

fn context(server: &MockServer) -> ClientContext {
    context_with(server, Arc::new(MemoryStore::new()))
}

fn context_with(server: &MockServer, storage: Arc<dyn KvStore>) -> ClientContext {
    let base_url = server.base_url();
    let args = CliArgs::parse_from([
        "nebula-client",
        "--api-base-url",
        base_url.as_str(),
        "cache",
        "stats",
    ]);
    let settings = config::load(&args).expect("settings");
    let transport: Arc<dyn Transport> = Arc::new(
        HttpTransport::new(&settings.api.base_url, settings.api.request_timeout)
            .expect("transport"),
    );
    let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(START_MILLIS));
    ClientContext::assemble(settings, storage, transport, clock)
}

fn sign_in(ctx: &ClientContext, token: &str) {
    let credential = Credential::from_lifetime(token, 3600, ctx.clock.now());
    ctx.credentials().set(credential);
}

fn article_body(id: i64, likes: i64) -> String {
    format!(
        r#"{{"code":200,"data":{{"id":{id},"title":"Article {id}","likeCount":{likes},"isLiked":false}}}}"#
    )
}

#[tokio::test]
async fn detail_is_served_from_cache_after_first_fetch() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method("GET").path("/article/1");
        then.status(200)
            .header("content-type", "application/json")
            .body(article_body(1, 3));
    });

    let ctx = context(&server);
    let first = ctx
        .articles
        .fetch_article_detail(1, true)
        .await
        .expect("first fetch");
    let second = ctx
        .articles
        .fetch_article_detail(1, true)
        .await
        .expect("cached fetch");

    assert_eq!(first, second);
    assert_eq!(second.like_count, 3);
    mock.assert();
}

#[tokio::test]
async fn list_query_is_sent_in_wire_naming() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method("GET")
            .path("/article/list")
            .query_param("page", "2")
            .query_param("categoryId", "7");
        then.status(200)
            .header("content-type", "application/json")
            .body(r#"{"code":200,"data":{"records":[{"id":4,"title":"T"}],"total":1}}"#);
    });

    let ctx = context(&server);
    let query = ArticleQuery {
        page: Some(2),
        category_id: Some(7),
        ..Default::default()
    };
    let page = ctx
        .articles
        .fetch_article_list(&query, true)
        .await
        .expect("list");

    assert_eq!(page.total, 1);
    assert_eq!(page.records[0].id, 4);
    mock.assert();
}

#[tokio::test]
async fn raw_token_is_attached_without_scheme() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method("GET")
            .path("/tag/list")
            .header("authorization", "T1");
        then.status(200)
            .header("content-type", "application/json")
            .body(r#"{"code":200,"data":[{"id":1,"name":"rust"}]}"#);
    });

    let ctx = context(&server);
    sign_in(&ctx, "T1");
    let tags = ctx.catalog.fetch_tags(false).await.expect("tags");

    assert_eq!(tags[0].name, "rust");
    mock.assert();
}

#[tokio::test]
async fn expired_token_is_renewed_and_call_retried() {
    let server = MockServer::start();
    let stale = server.mock(|when, then| {
        when.method("GET")
            .path("/article/1")
            .header("authorization", "T1");
        then.status(200)
            .header("content-type", "application/json")
            .body(r#"{"code":401,"message":"token expired"}"#);
    });
    let renewal = server.mock(|when, then| {
        when.method("POST")
            .path(RENEWAL_PATH)
            .header("authorization", "T1");
        then.status(200)
            .header("content-type", "application/json")
            .body(r#"{"code":200,"data":{"token":"T2","expiresIn":3600}}"#);
    });
    let fresh = server.mock(|when, then| {
        when.method("GET")
            .path("/article/1")
            .header("authorization", "T2");
        then.status(200)
            .header("content-type", "application/json")
            .body(article_body(1, 9));
    });

    let ctx = context(&server);
    sign_in(&ctx, "T1");
    let article = ctx
        .articles
        .fetch_article_detail(1, false)
        .await
        .expect("retried fetch");

    assert_eq!(article.like_count, 9);
    assert_eq!(ctx.credentials().token().as_deref(), Some("T2"));
    stale.assert();
    renewal.assert();
    fresh.assert();
}

#[tokio::test]
async fn http_401_status_also_triggers_renewal() {
    let server = MockServer::start();
    let stale = server.mock(|when, then| {
        when.method("GET")
            .path("/banner/list")
            .header("authorization", "T1");
        then.status(401).body("unauthorized");
    });
    let renewal = server.mock(|when, then| {
        when.method("POST").path(RENEWAL_PATH);
        then.status(200)
            .header("content-type", "application/json")
            .body(r#"{"code":200,"data":{"token":"T2","expiresIn":3600}}"#);
    });
    let fresh = server.mock(|when, then| {
        when.method("GET")
            .path("/banner/list")
            .header("authorization", "T2");
        then.status(200)
            .header("content-type", "application/json")
            .body(r#"{"code":200,"data":[]}"#);
    });

    let ctx = context(&server);
    sign_in(&ctx, "T1");
    let banners = ctx.catalog.fetch_banners(false).await.expect("banners");

    assert!(banners.is_empty());
    stale.assert();
    renewal.assert();
    fresh.assert();
}

#[tokio::test]
async fn second_expiry_ends_the_session() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method("GET").path("/article/1");
        then.status(200)
            .header("content-type", "application/json")
            .body(r#"{"code":401}"#);
    });
    let renewal = server.mock(|when, then| {
        when.method("POST").path(RENEWAL_PATH);
        then.status(200)
            .header("content-type", "application/json")
            .body(r#"{"code":200,"data":{"token":"T2","expiresIn":3600}}"#);
    });

    let ctx = context(&server);
    sign_in(&ctx, "T1");
    let err = ctx
        .articles
        .fetch_article_detail(1, false)
        .await
        .expect_err("session should end");

    assert!(matches!(err, ApiError::SessionExpired));
    assert!(ctx.credentials().current().is_none());
    renewal.assert();
}

#[tokio::test]
async fn rejected_renewal_clears_credentials() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method("GET").path("/article/1");
        then.status(200)
            .header("content-type", "application/json")
            .body(r#"{"code":401}"#);
    });
    server.mock(|when, then| {
        when.method("POST").path(RENEWAL_PATH);
        then.status(200)
            .header("content-type", "application/json")
            .body(r#"{"code":401,"message":"refresh token expired"}"#);
    });

    let ctx = context(&server);
    sign_in(&ctx, "T1");
    let err = ctx
        .articles
        .fetch_article_detail(1, false)
        .await
        .expect_err("renewal rejected");

    assert!(matches!(err, ApiError::Refresh(_) | ApiError::SessionExpired));
    assert!(ctx.credentials().current().is_none());
    assert!(!ctx.refresh().is_refreshing());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_expiries_share_one_renewal() {
    let server = MockServer::start();
    let ids: Vec<i64> = (1..=5).collect();
    let mut fresh = Vec::new();
    for &id in &ids {
        server.mock(|when, then| {
            when.method("GET")
                .path(format!("/article/{id}"))
                .header("authorization", "T1");
            then.status(200)
                .header("content-type", "application/json")
                .body(r#"{"code":401}"#);
        });
        fresh.push(server.mock(|when, then| {
            when.method("GET")
                .path(format!("/article/{id}"))
                .header("authorization", "T2");
            then.status(200)
                .header("content-type", "application/json")
                .body(article_body(id, 0));
        }));
    }
    let renewal = server.mock(|when, then| {
        when.method("POST").path(RENEWAL_PATH);
        then.status(200)
            .delay(Duration::from_millis(200))
            .header("content-type", "application/json")
            .body(r#"{"code":200,"data":{"token":"T2","expiresIn":3600}}"#);
    });

    let ctx = context(&server);
    sign_in(&ctx, "T1");
    let results = join_all(
        ids.iter()
            .map(|&id| ctx.articles.fetch_article_detail(id, false)),
    )
    .await;

    for (result, id) in results.into_iter().zip(ids) {
        assert_eq!(result.expect("renewed fetch").id, id);
    }
    renewal.assert();
    for mock in fresh {
        mock.assert();
    }
    assert_eq!(ctx.refresh().waiting(), 0);
}

#[tokio::test]
async fn failed_like_rolls_back_cached_article() {
    let server = MockServer::start();
    let detail = server.mock(|when, then| {
        when.method("GET").path("/article/1");
        then.status(200)
            .header("content-type", "application/json")
            .body(article_body(1, 3));
    });
    let like = server.mock(|when, then| {
        when.method("POST").path("/article/like/1");
        then.status(500)
            .header("content-type", "application/json")
            .body(r#"{"code":500,"message":"boom"}"#);
    });

    let ctx = context(&server);
    ctx.articles
        .fetch_article_detail(1, true)
        .await
        .expect("detail");

    let err = ctx.articles.toggle_like(1).await.expect_err("like fails");
    assert!(matches!(err, ApiError::Transport(_)));
    assert!(!ctx.articles.is_liked(1));

    let cached = ctx
        .articles
        .fetch_article_detail(1, true)
        .await
        .expect("cached detail");
    assert_eq!(cached.like_count, 3);
    assert!(!cached.is_liked);
    detail.assert();
    like.assert();
}

#[tokio::test]
async fn successful_like_updates_every_cached_copy() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method("GET").path("/article/1");
        then.status(200)
            .header("content-type", "application/json")
            .body(article_body(1, 3));
    });
    server.mock(|when, then| {
        when.method("GET").path("/article/hot");
        then.status(200)
            .header("content-type", "application/json")
            .body(r#"{"code":200,"data":[{"id":1,"likeCount":3},{"id":2,"likeCount":8}]}"#);
    });
    server.mock(|when, then| {
        when.method("POST").path("/article/like/1");
        then.status(200)
            .header("content-type", "application/json")
            .body(r#"{"code":200}"#);
    });

    let ctx = context(&server);
    ctx.articles.fetch_article_detail(1, true).await.expect("detail");
    ctx.articles.fetch_hot_articles(5, true).await.expect("hot");

    assert!(ctx.articles.toggle_like(1).await.expect("like"));

    let detail = ctx.articles.fetch_article_detail(1, true).await.expect("detail");
    let hot = ctx.articles.fetch_hot_articles(5, true).await.expect("hot");
    assert_eq!(detail.like_count, 4);
    assert!(detail.is_liked);
    assert_eq!(hot[0].like_count, 4);
    assert_eq!(hot[1].like_count, 8);
}

#[tokio::test]
async fn caches_survive_a_new_session_on_the_same_storage() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method("GET").path("/category/list");
        then.status(200)
            .header("content-type", "application/json")
            .body(r#"{"code":200,"data":[{"id":1,"name":"news"}]}"#);
    });

    let storage: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
    let first = context_with(&server, Arc::clone(&storage));
    first.catalog.fetch_categories(true).await.expect("categories");
    drop(first);

    let second = context_with(&server, storage);
    let categories = second
        .catalog
        .fetch_categories(true)
        .await
        .expect("restored categories");

    assert_eq!(categories[0].name, "news");
    mock.assert();
}

#[tokio::test]
async fn proactive_refresh_renews_ahead_of_expiry() {
    let server = MockServer::start();
    let renewal = server.mock(|when, then| {
        when.method("POST")
            .path(RENEWAL_PATH)
            .header("authorization", "T1");
        then.status(200)
            .header("content-type", "application/json")
            .body(r#"{"code":200,"data":{"token":"T2","expiresIn":3600}}"#);
    });

    let ctx = context(&server);
    // One minute left is inside the default five-minute threshold.
    let credential = Credential::from_lifetime("T1", 60, ctx.clock.now());
    ctx.credentials().set(credential);

    let handle = ctx.spawn_proactive_refresh();
    for _ in 0..100 {
        if ctx.credentials().token().as_deref() == Some("T2") {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    handle.abort();

    assert_eq!(ctx.credentials().token().as_deref(), Some("T2"));
    renewal.assert();
}

#[tokio::test]
async fn one_shot_renewal_only_inside_threshold() {
    let server = MockServer::start();
    let renewal = server.mock(|when, then| {
        when.method("POST")
            .path(RENEWAL_PATH)
            .header("authorization", "T1");
        then.status(200)
            .header("content-type", "application/json")
            .body(r#"{"code":200,"data":{"token":"T2","expiresIn":3600}}"#);
    });

    let ctx = context(&server);
    sign_in(&ctx, "T1");
    assert!(!ctx.renew_if_expiring().await);
    assert_eq!(ctx.credentials().token().as_deref(), Some("T1"));

    let credential = Credential::from_lifetime("T1", 60, ctx.clock.now());
    ctx.credentials().set(credential);
    assert!(ctx.renew_if_expiring().await);
    assert_eq!(ctx.credentials().token().as_deref(), Some("T2"));
    renewal.assert();
}
