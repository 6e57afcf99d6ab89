use anyhow::{Context, Result, anyhow};
use chrono::DateTime;
use dashmap::DashSet;
use futures::StreamExt;
use futures::stream::FuturesUnordered;
use reqwest::Url;
use reqwest::header::{CONTENT_TYPE, LAST_MODIFIED};
use scraper::{Html, Selector};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::analyzer::{HTMLTagFilter, TextAnalyzer};
use crate::config::CrawlConfig;
use crate::data_models::CrawledPage;
use crate::db::{Database, PageRepo};
use crate::indexer::{IndexStats, Indexer};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CrawlSummary {
    pub pages_fetched: usize,
    pub pages_failed: usize,
}

/// Breadth-first crawler.
///
/// Every successfully fetched page is sent down `fetched_tx`; the crawl ends
/// when `max_pages` pages were fetched or the frontier runs dry.
pub struct Crawler {
    visited_urls: DashSet<String>,
    max_pages: usize,
    max_depth: Option<usize>,
    concurrency: usize,
    client: reqwest::Client,
    fetched_tx: mpsc::UnboundedSender<CrawledPage>,
}

impl Crawler {
    pub fn new(config: &CrawlConfig, fetched_tx: mpsc::UnboundedSender<CrawledPage>) -> Result<Crawler> {
        let client = reqwest::Client::builder()
            .timeout(config.fetch_timeout)
            .user_agent(concat!("spider-search/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build http client")?;

        Ok(Crawler {
            visited_urls: DashSet::new(),
            max_pages: config.max_pages,
            max_depth: config.max_depth,
            concurrency: config.concurrency.max(1),
            client,
            fetched_tx,
        })
    }

    pub async fn crawl(&self, starting_url: &str) -> Result<CrawlSummary> {
        let seed = normalize(Url::parse(starting_url).context("invalid seed url")?);
        let mut queue: VecDeque<(Url, usize)> = VecDeque::from([(seed, 0)]);
        let mut in_flight = FuturesUnordered::new();
        let mut summary = CrawlSummary::default();

        loop {
            while in_flight.len() < self.concurrency
                && summary.pages_fetched + in_flight.len() < self.max_pages
            {
                let Some((url, depth)) = queue.pop_front() else {
                    break;
                };
                if !self.visited_urls.insert(url.to_string()) {
                    continue;
                }
                log::info!("crawling url: {url}");
                in_flight.push(self.crawl_url(url, depth));
            }

            let Some((url, depth, result)) = in_flight.next().await else {
                break;
            };

            match result {
                Ok(page) => {
                    summary.pages_fetched += 1;
                    if self.max_depth.is_none_or(|max| depth < max) {
                        for link in &page.outgoing_links {
                            if self.visited_urls.contains(link) {
                                continue;
                            }
                            if let Ok(next) = Url::parse(link) {
                                queue.push_back((next, depth + 1));
                            }
                        }
                    }
                    self.fetched_tx
                        .send(page)
                        .map_err(|_| anyhow!("indexer stopped before the crawl finished"))?;
                }
                Err(e) => {
                    summary.pages_failed += 1;
                    log::error!("error fetching page {url}, error: {:#}", e);
                }
            }
        }

        log::info!(
            "Done! Fetched {} pages ({} failures)",
            summary.pages_fetched,
            summary.pages_failed
        );
        Ok(summary)
    }

    async fn crawl_url(&self, url: Url, depth: usize) -> (Url, usize, Result<CrawledPage>) {
        let result = self.fetch_page(&url).await;
        (url, depth, result)
    }

    async fn fetch_page(&self, url: &Url) -> Result<CrawledPage> {
        let res = self.client.get(url.clone()).send().await?.error_for_status()?;

        if let Some(content_type) = res.headers().get(CONTENT_TYPE).and_then(|v| v.to_str().ok()) {
            if !content_type.contains("html") {
                return Err(anyhow!("skipping non-html content ({content_type})"));
            }
        }

        let last_modified = res
            .headers()
            .get(LAST_MODIFIED)
            .and_then(|v| v.to_str().ok())
            .map(normalize_last_modified);
        let base = res.url().clone();
        let html = res.text().await?;

        let (title, content, links) = parse_html(&base, &html)?;
        let self_url = normalize(url.clone()).to_string();
        let outgoing_links = links.into_iter().filter(|l| *l != self_url).collect();

        Ok(CrawledPage::new(
            url.to_string(),
            title,
            content,
            last_modified,
            html.len() as i64,
            outgoing_links,
        ))
    }
}

/// Extracts the title, readable text and unique http(s) links of a page.
/// Links are resolved against `base`, stripped of fragments, and keep
/// document order.
pub fn parse_html(base: &Url, html: &str) -> Result<(String, String, Vec<String>)> {
    let extracted = HTMLTagFilter::extract(html)?;

    let document = Html::parse_document(html);
    let href_selector =
        Selector::parse("a[href]").map_err(|e| anyhow!("invalid selector: {e}"))?;

    let mut seen = HashSet::new();
    let mut links = Vec::new();
    for element in document.select(&href_selector) {
        let Some(href) = element.value().attr("href") else {
            continue;
        };
        let Ok(resolved) = base.join(href.trim()) else {
            continue;
        };
        if resolved.scheme() != "http" && resolved.scheme() != "https" {
            continue;
        }
        let resolved = normalize(resolved).to_string();
        if seen.insert(resolved.clone()) {
            links.push(resolved);
        }
    }

    Ok((extracted.title.trim().to_string(), extracted.body.trim().to_string(), links))
}

fn normalize(mut url: Url) -> Url {
    url.set_fragment(None);
    url
}

/// HTTP dates become RFC 3339; anything unparseable is kept verbatim.
pub fn normalize_last_modified(raw: &str) -> String {
    match DateTime::parse_from_rfc2822(raw.trim()) {
        Ok(dt) => dt.to_rfc3339(),
        Err(_) => raw.trim().to_string(),
    }
}

/// Crawls from `seed` and indexes every fetched page into `db`.
pub async fn crawl_and_index(
    db: &Database,
    analyzer: Arc<TextAnalyzer>,
    config: &CrawlConfig,
    seed: &str,
) -> Result<(CrawlSummary, IndexStats)> {
    let (fetched_tx, fetched_rx) = mpsc::unbounded_channel();
    let indexer = Arc::new(Indexer::new(Arc::new(PageRepo::new(db)), analyzer));
    let indexing = indexer.spawn(fetched_rx);

    let crawler = Crawler::new(config, fetched_tx)?;
    let crawled = crawler.crawl(seed).await;
    // dropping the crawler closes the channel so the indexer can finish
    drop(crawler);

    let stats = indexing.await.context("indexer task panicked")?;
    Ok((crawled?, stats))
}
