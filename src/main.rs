use std::process;

use nebula_client::{
    application::{
        context::ClientContext,
        error::{AppError, ErrorReport},
    },
    auth::Credential,
    config::{
        self, ArticlesCommand, CacheCommand, CatalogArgs, CatalogCommand, Command, ListArgs,
        LoginArgs,
    },
    domain::article::ArticleQuery,
    infra::telemetry,
};
use serde::Serialize;
use serde_json::json;
use tracing::{Dispatch, Level, dispatcher, error, info};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        eprintln!("{}", error.presentation_message());
        process::exit(error.exit_code());
    }
}

fn report_application_error(error: &AppError) {
    let report = ErrorReport::from_error("nebula-client", error);
    if dispatcher::has_been_set() {
        error!(source = report.source, chain = ?report.messages, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(source = report.source, chain = ?report.messages, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()?;

    telemetry::init(&settings.logging)?;

    let ctx = ClientContext::from_settings(settings)?;

    match cli_args.command {
        Command::Articles(args) => {
            ctx.renew_if_expiring().await;
            run_articles(&ctx, args.command).await
        }
        Command::Catalog(args) => {
            ctx.renew_if_expiring().await;
            run_catalog(&ctx, args).await
        }
        Command::Login(args) => run_login(&ctx, &args),
        Command::Logout => {
            ctx.credentials().clear();
            info!("credential removed");
            print_json(&json!({ "loggedIn": false }))
        }
        Command::Cache(args) => run_cache(&ctx, args.command),
    }
}

async fn run_articles(ctx: &ClientContext, command: ArticlesCommand) -> Result<(), AppError> {
    let store = &ctx.articles;
    match command {
        ArticlesCommand::List(args) => {
            let use_cache = !args.no_cache;
            let page = store
                .fetch_article_list(&list_query(args), use_cache)
                .await?;
            print_json(&page)
        }
        ArticlesCommand::Get(args) => {
            let article = store.fetch_article_detail(args.id, !args.no_cache).await?;
            print_json(&article)
        }
        ArticlesCommand::Hot(args) => {
            let articles = store.fetch_hot_articles(args.limit, !args.no_cache).await?;
            print_json(&articles)
        }
        ArticlesCommand::Recommended(args) => {
            let articles = store
                .fetch_recommended_articles(args.limit, !args.no_cache)
                .await?;
            print_json(&articles)
        }
        ArticlesCommand::Like(args) => {
            let liked = store.toggle_like(args.id).await?;
            print_json(&json!({ "id": args.id, "liked": liked }))
        }
        ArticlesCommand::Favorite(args) => {
            let favorited = store.toggle_favorite(args.id).await?;
            print_json(&json!({ "id": args.id, "favorited": favorited }))
        }
    }
}

fn list_query(args: ListArgs) -> ArticleQuery {
    ArticleQuery {
        page: args.page,
        size: args.size,
        category_id: args.category,
        tag_id: args.tag,
        keyword: args.keyword,
    }
}

async fn run_catalog(ctx: &ClientContext, args: CatalogArgs) -> Result<(), AppError> {
    let use_cache = !args.no_cache;
    let store = &ctx.catalog;
    match args.command {
        CatalogCommand::Banners => print_json(&store.fetch_banners(use_cache).await?),
        CatalogCommand::Categories => print_json(&store.fetch_categories(use_cache).await?),
        CatalogCommand::Tags => print_json(&store.fetch_tags(use_cache).await?),
    }
}

fn run_login(ctx: &ClientContext, args: &LoginArgs) -> Result<(), AppError> {
    let token = args.token.trim();
    if token.is_empty() {
        return Err(AppError::validation("token must not be empty"));
    }
    if args.expires_in <= 0 {
        return Err(AppError::validation("--expires-in must be positive"));
    }

    let credential = Credential::from_lifetime(token, args.expires_in, ctx.clock.now());
    let expires_at = credential.expires_at;
    ctx.credentials().set(credential);
    info!(%expires_at, "credential stored");
    print_json(&json!({ "loggedIn": true, "expiresAt": expires_at.to_string() }))
}

fn run_cache(ctx: &ClientContext, command: CacheCommand) -> Result<(), AppError> {
    match command {
        CacheCommand::Stats => print_json(&json!({
            "articles": ctx.articles.cache_stats(),
            "catalog": ctx.catalog.cache_stats(),
        })),
        CacheCommand::Clear => {
            ctx.articles.clear_all_cache();
            ctx.catalog.clear_all_cache();
            print_json(&json!({ "cleared": true }))
        }
        CacheCommand::PurgeExpired => {
            let removed = ctx.articles.clear_expired_cache() + ctx.catalog.clear_expired_cache();
            print_json(&json!({ "removed": removed }))
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<(), AppError> {
    let out = serde_json::to_string_pretty(value)
        .map_err(|err| AppError::unexpected(format!("failed to render output: {err}")))?;
    println!("{out}");
    Ok(())
}
