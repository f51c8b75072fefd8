use std::collections::HashMap;
use std::net::SocketAddr;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};

use crate::agent::Outcome;
use crate::error::{BridgeError, Result};
use crate::runtime::QueryRuntime;

/// Exposes a [`QueryRuntime`] over HTTP.
///
/// `GET /query?query=...` answers with `{"query", "result"}`; a missing query
/// yields 400 and any processing failure 500.
pub fn router(runtime: QueryRuntime) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/query", get(handle_query))
        .with_state(runtime)
}

pub async fn serve(runtime: QueryRuntime, addr: SocketAddr) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "listening for queries");
    axum::serve(listener, router(runtime).into_make_service()).await?;
    Ok(())
}

async fn handle_query(
    State(runtime): State<QueryRuntime>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let query = params.get("query").map(String::as_str).unwrap_or_default();
    let (status, body) = envelope(query, runtime.answer(query).await);
    (status, Json(body)).into_response()
}

/// Maps the result of answering `query` to a status code and JSON body.
pub fn envelope(query: &str, result: Result<Outcome>) -> (StatusCode, Value) {
    match result {
        Ok(outcome) => (
            StatusCode::OK,
            json!({
                "query": query,
                "result": outcome.text(),
            }),
        ),
        Err(BridgeError::MissingQuery) => (
            StatusCode::BAD_REQUEST,
            json!({
                "message": "Missing query parameter",
                "usage": "Add a query parameter to your request",
            }),
        ),
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            json!({
                "message": "Error processing query",
                "error": err.to_string(),
            }),
        ),
    }
}
