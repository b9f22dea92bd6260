//! HTTP surface of the relay.
//!
//! Endpoints:
//! - `POST /messages?message_type=<kind>&content=<text>`: publish a message
//! - `GET /messages?limit=<n>`: most recently processed records
//! - `GET /health`: liveness
//! - `GET /`: greeting

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::bus::MessagePublisher;
use crate::message::MessageKind;
use crate::storage::{MessageRecord, RecordStore};

/// Records returned by `GET /messages` when no limit is given.
pub const DEFAULT_LIST_LIMIT: u64 = 50;
/// Upper bound on `limit`.
pub const MAX_LIST_LIMIT: u64 = 1000;

/// Shared state for axum handlers.
#[derive(Clone)]
pub struct ApiState {
    publisher: Arc<dyn MessagePublisher>,
    store: Arc<dyn RecordStore>,
}

impl ApiState {
    pub fn new(publisher: Arc<dyn MessagePublisher>, store: Arc<dyn RecordStore>) -> Self {
        Self { publisher, store }
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }
}

/// Build the axum router (separated for testing).
pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/messages", get(list_messages).post(publish_message))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ============================================================================
// Handlers
// ============================================================================

async fn root() -> Json<Value> {
    Json(json!({"message": "Hello World"}))
}

async fn health() -> StatusCode {
    StatusCode::OK
}

#[derive(Debug, Deserialize)]
struct PublishParams {
    message_type: MessageKind,
    content: Option<String>,
}

#[derive(Debug, Serialize)]
struct PublishResponse {
    status: &'static str,
}

async fn publish_message(
    State(state): State<ApiState>,
    Query(params): Query<PublishParams>,
) -> (StatusCode, Json<PublishResponse>) {
    let published = state
        .publisher
        .publish(params.message_type, params.content.as_deref())
        .await;

    if published {
        info!(kind = %params.message_type, "Message accepted");
        (StatusCode::OK, Json(PublishResponse { status: "success" }))
    } else {
        // Cause is in the publisher's log; the caller only sees the outcome
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(PublishResponse { status: "failure" }),
        )
    }
}

#[derive(Debug, Deserialize)]
struct ListParams {
    limit: Option<u64>,
}

async fn list_messages(
    State(state): State<ApiState>,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<MessageRecord>>, StatusCode> {
    let limit = params
        .limit
        .unwrap_or(DEFAULT_LIST_LIMIT)
        .min(MAX_LIST_LIMIT);

    state.store.recent(limit).await.map(Json).map_err(|e| {
        error!(error = %e, "Failed to list messages");
        StatusCode::INTERNAL_SERVER_ERROR
    })
}
