use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Runtime settings for every subcommand.
///
/// Values come from `SPIDER_*` environment variables (a `.env` file is
/// honoured) and fall back to the defaults below. CLI flags override
/// individual fields after loading.
#[derive(Debug, Clone)]
pub struct Config {
    pub db_path: PathBuf,
    pub bind_addr: SocketAddr,
    pub max_connections: u32,
    pub query_timeout: Duration,
    pub request_timeout: Duration,
    pub max_concurrent_requests: usize,
    pub raw_query_enabled: bool,
    pub static_dir: Option<PathBuf>,
    pub stopwords_path: Option<PathBuf>,
    pub search: SearchConfig,
    pub crawl: CrawlConfig,
}

#[derive(Debug, Clone)]
pub struct SearchConfig {
    /// Number of results returned in one response; `total_results` is not capped.
    pub result_limit: usize,
    pub title_boost: f64,
}

#[derive(Debug, Clone)]
pub struct CrawlConfig {
    pub max_pages: usize,
    pub max_depth: Option<usize>,
    pub concurrency: usize,
    pub fetch_timeout: Duration,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            result_limit: 50,
            title_boost: 3.0,
        }
    }
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            max_pages: 300,
            max_depth: None,
            concurrency: 8,
            fetch_timeout: Duration::from_secs(15),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("spider.db"),
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 3001)),
            max_connections: 8,
            query_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            max_concurrent_requests: 64,
            raw_query_enabled: true,
            static_dir: None,
            stopwords_path: None,
            search: SearchConfig::default(),
            crawl: CrawlConfig::default(),
        }
    }
}

impl Config {
    /// Loads `.env` (if present) and reads the process environment.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from an arbitrary key lookup. Missing keys keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Config::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        Ok(Config {
            db_path: get("SPIDER_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.db_path),
            bind_addr: parse_or(get("SPIDER_BIND_ADDR"), "SPIDER_BIND_ADDR", defaults.bind_addr)?,
            max_connections: parse_or(
                get("SPIDER_MAX_CONNECTIONS"),
                "SPIDER_MAX_CONNECTIONS",
                defaults.max_connections,
            )?,
            query_timeout: secs_or(
                get("SPIDER_QUERY_TIMEOUT_SECS"),
                "SPIDER_QUERY_TIMEOUT_SECS",
                defaults.query_timeout,
            )?,
            request_timeout: secs_or(
                get("SPIDER_REQUEST_TIMEOUT_SECS"),
                "SPIDER_REQUEST_TIMEOUT_SECS",
                defaults.request_timeout,
            )?,
            max_concurrent_requests: parse_or(
                get("SPIDER_MAX_CONCURRENT_REQUESTS"),
                "SPIDER_MAX_CONCURRENT_REQUESTS",
                defaults.max_concurrent_requests,
            )?,
            raw_query_enabled: parse_or(
                get("SPIDER_RAW_QUERY_ENABLED"),
                "SPIDER_RAW_QUERY_ENABLED",
                defaults.raw_query_enabled,
            )?,
            static_dir: get("SPIDER_STATIC_DIR").map(PathBuf::from),
            stopwords_path: get("SPIDER_STOPWORDS_PATH").map(PathBuf::from),
            search: SearchConfig {
                result_limit: parse_or(
                    get("SPIDER_RESULT_LIMIT"),
                    "SPIDER_RESULT_LIMIT",
                    defaults.search.result_limit,
                )?,
                title_boost: parse_or(
                    get("SPIDER_TITLE_BOOST"),
                    "SPIDER_TITLE_BOOST",
                    defaults.search.title_boost,
                )?,
            },
            crawl: CrawlConfig {
                max_pages: parse_or(
                    get("SPIDER_CRAWL_MAX_PAGES"),
                    "SPIDER_CRAWL_MAX_PAGES",
                    defaults.crawl.max_pages,
                )?,
                max_depth: get("SPIDER_CRAWL_MAX_DEPTH")
                    .map(|v| parse_value::<usize>(&v, "SPIDER_CRAWL_MAX_DEPTH"))
                    .transpose()?,
                concurrency: parse_or(
                    get("SPIDER_CRAWL_CONCURRENCY"),
                    "SPIDER_CRAWL_CONCURRENCY",
                    defaults.crawl.concurrency,
                )?,
                fetch_timeout: secs_or(
                    get("SPIDER_CRAWL_FETCH_TIMEOUT_SECS"),
                    "SPIDER_CRAWL_FETCH_TIMEOUT_SECS",
                    defaults.crawl.fetch_timeout,
                )?,
            },
        })
    }
}

fn parse_value<T>(raw: &str, key: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    raw.trim()
        .parse::<T>()
        .with_context(|| format!("invalid value for {key}: {raw:?}"))
}

fn parse_or<T>(raw: Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match raw {
        Some(v) => parse_value(&v, key),
        None => Ok(default),
    }
}

fn secs_or(raw: Option<String>, key: &str, default: Duration) -> Result<Duration> {
    Ok(raw
        .map(|v| parse_value::<u64>(&v, key))
        .transpose()?
        .map(Duration::from_secs)
        .unwrap_or(default))
}
