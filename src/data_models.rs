use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Serialize, Deserialize, FromRow, Debug, Clone)]
pub struct Page {
    pub id: i64,
    pub url: String,
    pub title: Option<String>,
    pub content: Option<String>,
    pub last_modified: Option<String>,
    pub size: Option<i64>,
    pub crawled_at: Option<String>,
}

/// A fetched page on its way from the crawler to the indexer.
#[derive(Debug, Clone)]
pub struct CrawledPage {
    pub url: String,
    pub title: String,
    pub content: String,
    pub last_modified: Option<String>,
    pub size: i64,
    pub outgoing_links: Vec<String>,
}

impl CrawledPage {
    pub fn new(
        url: String,
        title: String,
        content: String,
        last_modified: Option<String>,
        size: i64,
        outgoing_links: Vec<String>,
    ) -> CrawledPage {
        CrawledPage {
            url,
            title,
            content,
            last_modified,
            size,
            outgoing_links,
        }
    }
}

/// Which part of a page a keyword or position was taken from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Title,
    Body,
}

impl Field {
    pub const ALL: [Field; 2] = [Field::Title, Field::Body];

    pub fn keywords_table(self) -> &'static str {
        match self {
            Field::Title => "title_keywords",
            Field::Body => "body_keywords",
        }
    }

    pub fn positions_table(self) -> &'static str {
        match self {
            Field::Title => "title_positions",
            Field::Body => "body_positions",
        }
    }
}

#[derive(Serialize, Deserialize, FromRow, Debug, Clone, PartialEq, Eq)]
pub struct Keyword {
    pub word: String,
    pub frequency: i64,
}

#[derive(Serialize, Deserialize, FromRow, Debug, Clone, PartialEq, Eq)]
pub struct TableDescriptor {
    pub name: String,
}

/// One row of `PRAGMA table_info`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ColumnDescriptor {
    pub cid: i64,
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: String,
    pub notnull: bool,
    pub dflt_value: Option<String>,
    pub pk: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SearchResult {
    pub id: i64,
    pub score: f64,
    pub title: String,
    pub url: String,
    pub snippet: String,
    pub last_modified: Option<String>,
    pub size: i64,
    pub keywords: Vec<Keyword>,
    pub parent_links: Vec<String>,
    pub child_links: Vec<String>,
}
