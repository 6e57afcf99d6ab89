use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use spider_search::analyzer::{TextAnalyzer, default_stop_words, load_stop_words};
use spider_search::api::{AppState, create_router};
use spider_search::catalog::Catalog;
use spider_search::client::{LinkList, SearchClient, SearchSession, ViewState};
use spider_search::config::Config;
use spider_search::crawler::crawl_and_index;
use spider_search::db::Database;
use spider_search::inspect;
use spider_search::query_engine::QueryEngine;

#[derive(Parser, Debug)]
#[command(name = "spider-search", version, about = "Crawl, index and search a small corner of the web")]
struct Cli {
    /// SQLite database file (overrides SPIDER_DB_PATH)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Stop-word list, one word per line (overrides SPIDER_STOPWORDS_PATH)
    #[arg(long, global = true)]
    stopwords: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the relay service
    Serve {
        #[arg(long)]
        bind: Option<SocketAddr>,
        /// Directory with a built client bundle
        #[arg(long)]
        static_dir: Option<PathBuf>,
        /// Turn off POST /api/query
        #[arg(long)]
        no_raw_query: bool,
    },
    /// Crawl from a seed url and index what was fetched
    Crawl {
        seed: String,
        #[arg(long)]
        max_pages: Option<usize>,
        #[arg(long)]
        max_depth: Option<usize>,
        #[arg(long)]
        concurrency: Option<usize>,
    },
    /// Query a running relay service
    Search {
        query: String,
        #[arg(long, default_value = "http://127.0.0.1:3001")]
        server: String,
        /// Show every parent and child link
        #[arg(long)]
        expand_all: bool,
    },
    /// Print every table's schema and a few sample rows
    Inspect,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber, RUST_LOG overrides the default level
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("failed to install tracing subscriber")?;

    // Bridge log crate -> tracing (so log::info! etc. work)
    tracing_log::LogTracer::init().context("failed to install log bridge")?;

    let cli = Cli::parse();
    let mut config = Config::from_env()?;
    if let Some(db) = cli.db {
        config.db_path = db;
    }
    if let Some(path) = cli.stopwords {
        config.stopwords_path = Some(path);
    }

    match cli.command {
        Command::Serve {
            bind,
            static_dir,
            no_raw_query,
        } => {
            if let Some(bind) = bind {
                config.bind_addr = bind;
            }
            if static_dir.is_some() {
                config.static_dir = static_dir;
            }
            if no_raw_query {
                config.raw_query_enabled = false;
            }
            serve(config).await
        }
        Command::Crawl {
            seed,
            max_pages,
            max_depth,
            concurrency,
        } => {
            if let Some(max_pages) = max_pages {
                config.crawl.max_pages = max_pages;
            }
            if max_depth.is_some() {
                config.crawl.max_depth = max_depth;
            }
            if let Some(concurrency) = concurrency {
                config.crawl.concurrency = concurrency;
            }
            crawl(config, &seed).await
        }
        Command::Search {
            query,
            server,
            expand_all,
        } => search(&server, &query, expand_all).await,
        Command::Inspect => inspect_db(config).await,
    }
}

fn build_analyzer(config: &Config) -> Result<Arc<TextAnalyzer>> {
    let stop_words = match &config.stopwords_path {
        Some(path) => load_stop_words(path)?,
        None => default_stop_words(),
    };
    Ok(Arc::new(TextAnalyzer::standard(stop_words)))
}

async fn serve(config: Config) -> Result<()> {
    let db = Database::from_config(&config)
        .await
        .context("could not connect to the data store")?;
    let analyzer = build_analyzer(&config)?;
    let engine = QueryEngine::build(db.clone(), analyzer, config.search.clone())
        .await
        .context("failed to build the search index")?;

    let app = create_router(AppState::new(Arc::new(engine)), &config);
    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;
    log::info!("Relay service listening on http://{}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    db.close().await;
    log::info!("Database connection closed");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("failed to listen for ctrl-c: {e}");
        std::future::pending::<()>().await;
    }
    log::info!("shutting down");
}

async fn crawl(config: Config, seed: &str) -> Result<()> {
    let db = Database::from_config(&config).await?;
    let analyzer = build_analyzer(&config)?;

    let (crawled, indexed) = crawl_and_index(&db, analyzer, &config.crawl, seed).await?;
    println!(
        "fetched {} pages ({} failed), indexed {} ({} failed)",
        crawled.pages_fetched, crawled.pages_failed, indexed.pages_indexed, indexed.pages_failed
    );

    db.close().await;
    Ok(())
}

async fn search(server: &str, query: &str, expand_all: bool) -> Result<()> {
    let mut session = SearchSession::new(SearchClient::new(server)?);
    session.submit(query).await;

    if expand_all {
        if let ViewState::Results(response) = session.state().clone() {
            for result in &response.results {
                session.expansion_mut().toggle(result.id, LinkList::Parent);
                session.expansion_mut().toggle(result.id, LinkList::Child);
            }
        }
    }

    println!("{}", session.render());
    if let ViewState::Error(_) = session.state() {
        std::process::exit(1);
    }
    Ok(())
}

async fn inspect_db(config: Config) -> Result<()> {
    let db = Database::from_config(&config).await?;
    println!("Connected to the SQLite database.");

    let reports = inspect::collect(&Catalog::new(&db)).await?;
    print!("{}", inspect::render(&reports)?);

    db.close().await;
    println!("\nDatabase connection closed.");
    Ok(())
}
