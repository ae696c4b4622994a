use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};

/// Command-line arguments for the nebula-client binary.
#[derive(Debug, Parser)]
#[command(
    name = "nebula-client",
    version,
    about = "Command-line client for the Nebula blog API"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "NEBULA_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(flatten)]
    pub overrides: GlobalOverrides,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Args, Default, Clone)]
pub struct GlobalOverrides {
    /// Override the API base URL.
    #[arg(long = "api-base-url", value_name = "URL", global = true)]
    pub api_base_url: Option<String>,

    /// Override the per-request timeout.
    #[arg(long = "api-request-timeout-ms", value_name = "MILLIS", global = true)]
    pub api_request_timeout_ms: Option<u64>,

    /// Override the directory holding cache snapshots and the credential.
    #[arg(long = "cache-storage-dir", value_name = "PATH", global = true)]
    pub cache_storage_dir: Option<PathBuf>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL", global = true)]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new(),
        global = true
    )]
    pub log_json: Option<bool>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Read and react to articles.
    Articles(ArticlesArgs),
    /// Read banners, categories and tags.
    Catalog(CatalogArgs),
    /// Store a credential obtained elsewhere.
    Login(LoginArgs),
    /// Forget the stored credential.
    Logout,
    /// Inspect or reset the local response caches.
    Cache(CacheArgs),
}

#[derive(Debug, Args, Clone)]
pub struct ArticlesArgs {
    #[command(subcommand)]
    pub command: ArticlesCommand,
}

#[derive(Debug, Subcommand, Clone)]
pub enum ArticlesCommand {
    /// List articles.
    List(ListArgs),
    /// Show one article.
    Get(ArticleIdArgs),
    /// Show the hottest articles.
    Hot(LimitArgs),
    /// Show recommended articles.
    Recommended(LimitArgs),
    /// Toggle the like on an article.
    Like(ReactionArgs),
    /// Toggle the favorite on an article.
    Favorite(ReactionArgs),
}

#[derive(Debug, Args, Clone, Default)]
pub struct ListArgs {
    #[arg(long, value_name = "N")]
    pub page: Option<u32>,

    #[arg(long, value_name = "N")]
    pub size: Option<u32>,

    /// Filter by category id.
    #[arg(long, value_name = "ID")]
    pub category: Option<i64>,

    /// Filter by tag id.
    #[arg(long, value_name = "ID")]
    pub tag: Option<i64>,

    #[arg(long, value_name = "TEXT")]
    pub keyword: Option<String>,

    /// Skip the local cache and fetch from the server.
    #[arg(long = "no-cache", action = clap::ArgAction::SetTrue)]
    pub no_cache: bool,
}

#[derive(Debug, Args, Clone)]
pub struct ArticleIdArgs {
    #[arg(value_name = "ID")]
    pub id: i64,

    /// Skip the local cache and fetch from the server.
    #[arg(long = "no-cache", action = clap::ArgAction::SetTrue)]
    pub no_cache: bool,
}

#[derive(Debug, Args, Clone)]
pub struct LimitArgs {
    #[arg(long, default_value_t = 5, value_name = "N")]
    pub limit: u32,

    /// Skip the local cache and fetch from the server.
    #[arg(long = "no-cache", action = clap::ArgAction::SetTrue)]
    pub no_cache: bool,
}

#[derive(Debug, Args, Clone)]
pub struct ReactionArgs {
    #[arg(value_name = "ID")]
    pub id: i64,
}

#[derive(Debug, Args, Clone)]
pub struct CatalogArgs {
    #[command(subcommand)]
    pub command: CatalogCommand,

    /// Skip the local cache and fetch from the server.
    #[arg(long = "no-cache", action = clap::ArgAction::SetTrue, global = true)]
    pub no_cache: bool,
}

#[derive(Debug, Subcommand, Clone, Copy)]
pub enum CatalogCommand {
    Banners,
    Categories,
    Tags,
}

#[derive(Debug, Args, Clone)]
pub struct LoginArgs {
    /// Credential issued by the server.
    #[arg(long, env = "NEBULA_TOKEN", value_name = "TOKEN")]
    pub token: String,

    /// Lifetime of the credential in seconds.
    #[arg(long = "expires-in", value_name = "SECONDS")]
    pub expires_in: i64,
}

#[derive(Debug, Args, Clone)]
pub struct CacheArgs {
    #[command(subcommand)]
    pub command: CacheCommand,
}

#[derive(Debug, Subcommand, Clone, Copy)]
pub enum CacheCommand {
    /// Print entry counts for every cache.
    Stats,
    /// Drop every cached response.
    Clear,
    /// Drop only stale cached responses.
    #[command(name = "purge-expired")]
    PurgeExpired,
}
