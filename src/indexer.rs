use anyhow::Result;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::analyzer::{TextAnalyzer, TextToken};
use crate::data_models::{CrawledPage, Field};
use crate::db::{PageRepo, TermPositions};

/// Per-run counters reported once the page stream is drained.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct IndexStats {
    pub pages_indexed: usize,
    pub pages_failed: usize,
}

/// Turns crawled pages into rows of the keyword and position tables.
///
/// For each field (title, body) the analyzed token stream is inverted into
/// `term -> positions`; the frequency stored for a term is the number of
/// its positions.
pub struct Indexer {
    pages_repo: Arc<PageRepo>,
    text_analyzer: Arc<TextAnalyzer>,
}

impl Indexer {
    pub fn new(pages_repo: Arc<PageRepo>, text_analyzer: Arc<TextAnalyzer>) -> Self {
        Self {
            pages_repo,
            text_analyzer,
        }
    }

    /// Groups token positions by term. Positions keep their stream order.
    pub fn invert(tokens: Vec<TextToken>) -> TermPositions {
        let mut dict = TermPositions::new();
        for token in tokens {
            dict.entry(token.term).or_insert_with(Vec::new).push(token.pos);
        }
        dict
    }

    pub async fn index_page(&self, page: &CrawledPage) -> Result<i64> {
        let title_terms = Self::invert(self.text_analyzer.analyze(&page.title));
        let body_terms = Self::invert(self.text_analyzer.analyze(&page.content));

        let crawled_at = Utc::now().to_rfc3339();
        let page_id = self
            .pages_repo
            .store_indexed_page(
                page,
                &crawled_at,
                &[(Field::Title, &title_terms), (Field::Body, &body_terms)],
            )
            .await?;

        log::debug!(
            "indexed {} as page {} ({} title terms, {} body terms, {} links)",
            page.url,
            page_id,
            title_terms.len(),
            body_terms.len(),
            page.outgoing_links.len()
        );
        Ok(page_id)
    }

    /// Consumes pages until every sender is dropped, then reports what was written.
    pub fn spawn(self: Arc<Self>, mut page_rx: mpsc::UnboundedReceiver<CrawledPage>) -> JoinHandle<IndexStats> {
        tokio::spawn(async move {
            let mut stats = IndexStats::default();
            while let Some(page) = page_rx.recv().await {
                match self.index_page(&page).await {
                    Ok(id) => {
                        stats.pages_indexed += 1;
                        log::info!("indexed page {id}: {}", page.url);
                    }
                    Err(e) => {
                        stats.pages_failed += 1;
                        log::error!("error indexing {}, error: {:#}", page.url, e);
                    }
                }
            }
            log::info!(
                "Indexing complete: {} pages written, {} failed",
                stats.pages_indexed,
                stats.pages_failed
            );
            stats
        })
    }
}
