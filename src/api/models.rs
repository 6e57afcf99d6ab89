use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::data_models::{ColumnDescriptor, SearchResult, TableDescriptor};

#[derive(Debug, Deserialize)]
pub struct SearchRequest {
    #[serde(default)]
    pub query: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct SearchResponse {
    pub results: Vec<SearchResult>,
    pub query: String,
    pub total_results: usize,
}

#[derive(Debug, Deserialize)]
pub struct QueryRequest {
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub params: Vec<Value>,
}

#[derive(Debug, Serialize)]
pub struct TablesResponse {
    pub tables: Vec<TableDescriptor>,
}

#[derive(Debug, Serialize)]
pub struct RowsResponse {
    pub data: Vec<Value>,
}

#[derive(Debug, Serialize)]
pub struct SchemaResponse {
    pub schema: Vec<ColumnDescriptor>,
}
