use axum::{
    extract::Json,
    http::header::CONTENT_TYPE,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};

use super::{core::METRICS_TEXT_CONTENT_TYPE, metrics::render_metrics, store::StoredMessage};

#[derive(Debug, Serialize)]
pub(crate) struct ApiError {
    pub(crate) error: &'static str,
}

#[derive(Debug, Serialize)]
pub(crate) struct HealthResponse {
    pub(crate) status: &'static str,
}

pub(crate) async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

pub(crate) async fn metrics() -> Response {
    (
        [(CONTENT_TYPE, METRICS_TEXT_CONTENT_TYPE)],
        render_metrics(),
    )
        .into_response()
}

#[derive(Debug, Deserialize)]
pub(crate) struct ChatAuthQuery {
    pub(crate) access_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct HistoryQuery {
    pub(crate) offset: Option<usize>,
}

#[derive(Debug, Serialize)]
pub(crate) struct MessageResponse {
    pub(crate) id: i64,
    pub(crate) sender_id: i64,
    pub(crate) receiver_id: i64,
    pub(crate) content: String,
    pub(crate) created_at_unix: i64,
}

impl From<StoredMessage> for MessageResponse {
    fn from(message: StoredMessage) -> Self {
        Self {
            id: message.id,
            sender_id: message.sender_id.get(),
            receiver_id: message.receiver_id.get(),
            content: message.content,
            created_at_unix: message.created_at_unix,
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct HistoryResponse {
    pub(crate) messages: Vec<MessageResponse>,
    /// Offset of the next older page, absent when this page was not full.
    pub(crate) next_offset: Option<usize>,
}

#[derive(Debug, Serialize)]
pub(crate) struct OnlineUserResponse {
    pub(crate) id: i64,
    pub(crate) display_name: String,
}
