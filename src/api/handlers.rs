use axum::Json;
use axum::extract::{Path, State};
use std::time::Instant;

use crate::error::RelayError;

use super::AppState;
use super::models::{
    QueryRequest, RowsResponse, SchemaResponse, SearchRequest, SearchResponse, TablesResponse,
};

pub async fn tables_handler(State(state): State<AppState>) -> Result<Json<TablesResponse>, RelayError> {
    let tables = state.catalog.list_tables().await?;
    Ok(Json(TablesResponse { tables }))
}

pub async fn table_rows_handler(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<RowsResponse>, RelayError> {
    let data = state.catalog.table_rows(&name).await?;
    Ok(Json(RowsResponse { data }))
}

pub async fn table_schema_handler(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<SchemaResponse>, RelayError> {
    let schema = state.catalog.table_schema(&name).await?;
    Ok(Json(SchemaResponse { schema }))
}

pub async fn query_handler(
    State(state): State<AppState>,
    Json(request): Json<QueryRequest>,
) -> Result<Json<RowsResponse>, RelayError> {
    let sql = request
        .query
        .filter(|q| !q.trim().is_empty())
        .ok_or_else(|| RelayError::Validation("Query is required".to_string()))?;

    let data = state.catalog.run_read_query(&sql, &request.params).await?;
    Ok(Json(RowsResponse { data }))
}

pub async fn search_handler(
    State(state): State<AppState>,
    Json(request): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, RelayError> {
    let start = Instant::now();

    let query = request
        .query
        .filter(|q| !q.trim().is_empty())
        .ok_or_else(|| RelayError::Validation("Search query is required".to_string()))?;

    let outcome = state.engine.search(&query).await?;

    log::info!(
        "search {:?}: {} results ({} returned) in {}ms",
        query,
        outcome.total_results,
        outcome.results.len(),
        start.elapsed().as_millis()
    );

    Ok(Json(SearchResponse {
        results: outcome.results,
        query,
        total_results: outcome.total_results,
    }))
}
