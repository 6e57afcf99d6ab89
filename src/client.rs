use reqwest::Url;
use serde_json::{Value, json};
use std::collections::HashSet;
use std::fmt::Write;
use thiserror::Error;

use crate::api::models::SearchResponse;
use crate::data_models::SearchResult;

/// Link lists longer than this are collapsed until expanded.
pub const COLLAPSED_LINKS: usize = 5;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ClientError {
    #[error("Please enter a search query")]
    EmptyQuery,

    #[error("Failed to execute search. Make sure the server is running.")]
    Network,

    #[error("Search error: {0}")]
    Server(String),
}

/// Talks to the relay's `/api/search` endpoint.
#[derive(Debug, Clone)]
pub struct SearchClient {
    http: reqwest::Client,
    search_url: Url,
}

impl SearchClient {
    pub fn new(server: &str) -> anyhow::Result<Self> {
        let base = Url::parse(server)?;
        let search_url = base.join("/api/search")?;
        Ok(Self {
            http: reqwest::Client::new(),
            search_url,
        })
    }

    /// Blank queries are rejected here, before any request is made.
    pub async fn search(&self, query: &str) -> Result<SearchResponse, ClientError> {
        if query.trim().is_empty() {
            return Err(ClientError::EmptyQuery);
        }

        let res = self
            .http
            .post(self.search_url.clone())
            .json(&json!({ "query": query }))
            .send()
            .await
            .map_err(network_error)?;

        if !res.status().is_success() {
            return Err(network_error(format!("server responded with {}", res.status())));
        }

        let body: Value = res
            .json()
            .await
            .map_err(network_error)?;
        if let Some(message) = body.get("error") {
            let message = message.as_str().map(str::to_string).unwrap_or_else(|| message.to_string());
            return Err(ClientError::Server(message));
        }

        serde_json::from_value(body).map_err(|e| network_error(format!("malformed response: {e}")))
    }
}

/// The user sees a fixed message; the cause only goes to the debug log.
fn network_error(detail: impl std::fmt::Display) -> ClientError {
    log::debug!("search request failed: {detail}");
    ClientError::Network
}

#[derive(Debug, Clone, PartialEq)]
pub enum ViewState {
    Idle,
    Searching,
    Results(SearchResponse),
    Empty { query: String },
    Error(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkList {
    Parent,
    Child,
}

/// Which link lists are expanded, per result id and per list.
#[derive(Debug, Default, Clone)]
pub struct LinkExpansion {
    expanded: HashSet<(i64, LinkList)>,
}

impl LinkExpansion {
    pub fn toggle(&mut self, result_id: i64, list: LinkList) {
        if !self.expanded.remove(&(result_id, list)) {
            self.expanded.insert((result_id, list));
        }
    }

    pub fn is_expanded(&self, result_id: i64, list: LinkList) -> bool {
        self.expanded.contains(&(result_id, list))
    }

    pub fn visible_links<'a>(&self, result_id: i64, list: LinkList, links: &'a [String]) -> &'a [String] {
        if self.is_expanded(result_id, list) || links.len() <= COLLAPSED_LINKS {
            links
        } else {
            &links[..COLLAPSED_LINKS]
        }
    }

    pub fn clear(&mut self) {
        self.expanded.clear();
    }
}

/// One search box worth of state: the current view plus link expansion.
#[derive(Debug)]
pub struct SearchSession {
    client: SearchClient,
    state: ViewState,
    expansion: LinkExpansion,
}

impl SearchSession {
    pub fn new(client: SearchClient) -> Self {
        Self {
            client,
            state: ViewState::Idle,
            expansion: LinkExpansion::default(),
        }
    }

    pub fn state(&self) -> &ViewState {
        &self.state
    }

    pub fn expansion(&self) -> &LinkExpansion {
        &self.expansion
    }

    pub fn expansion_mut(&mut self) -> &mut LinkExpansion {
        &mut self.expansion
    }

    pub async fn submit(&mut self, query: &str) -> &ViewState {
        if query.trim().is_empty() {
            self.state = ViewState::Error(ClientError::EmptyQuery.to_string());
            return &self.state;
        }

        // previous results and expansion go away before the request is sent
        self.expansion.clear();
        self.state = ViewState::Searching;

        self.state = match self.client.search(query).await {
            Ok(response) if response.results.is_empty() => ViewState::Empty {
                query: response.query,
            },
            Ok(response) => ViewState::Results(response),
            Err(e) => ViewState::Error(e.to_string()),
        };
        &self.state
    }

    pub fn render(&self) -> String {
        render(&self.state, &self.expansion)
    }
}

/// "Showing top N of M results" when the response was truncated,
/// "Found M results" otherwise. `None` for an empty result set.
pub fn count_message(response: &SearchResponse) -> Option<String> {
    let shown = response.results.len();
    if shown == 0 {
        return None;
    }
    if response.total_results > shown {
        Some(format!("Showing top {} of {} results", shown, response.total_results))
    } else {
        Some(format!("Found {} results", response.total_results))
    }
}

pub fn render(state: &ViewState, expansion: &LinkExpansion) -> String {
    match state {
        ViewState::Idle => String::new(),
        ViewState::Searching => "Searching...".to_string(),
        ViewState::Error(message) => message.clone(),
        ViewState::Empty { query } => format!("No results found for \"{query}\""),
        ViewState::Results(response) => {
            let mut out = String::new();
            if let Some(message) = count_message(response) {
                let _ = writeln!(out, "{message}\n");
            }
            for (rank, result) in response.results.iter().enumerate() {
                render_result(&mut out, rank + 1, result, expansion);
            }
            out
        }
    }
}

fn render_result(out: &mut String, rank: usize, result: &SearchResult, expansion: &LinkExpansion) {
    let _ = writeln!(out, "{rank}. {} (score {:.4})", result.title, result.score);
    let _ = writeln!(out, "   {}", result.url);
    let _ = writeln!(
        out,
        "   last modified: {}, size: {} bytes",
        result.last_modified.as_deref().unwrap_or("unknown"),
        result.size
    );
    if !result.keywords.is_empty() {
        let keywords: Vec<String> = result
            .keywords
            .iter()
            .map(|k| format!("{} {}", k.word, k.frequency))
            .collect();
        let _ = writeln!(out, "   keywords: {}", keywords.join("; "));
    }
    let _ = writeln!(out, "   {}", result.snippet);

    for (list, label, links) in [
        (LinkList::Parent, "parent links", &result.parent_links),
        (LinkList::Child, "child links", &result.child_links),
    ] {
        if links.is_empty() {
            continue;
        }
        let _ = writeln!(out, "   {label} ({}):", links.len());
        let visible = expansion.visible_links(result.id, list, links);
        for link in visible {
            let _ = writeln!(out, "     - {link}");
        }
        if visible.len() < links.len() {
            let _ = writeln!(out, "     ... {} more", links.len() - visible.len());
        }
    }
    out.push('\n');
}
