use axum::{
    extract::{rejection::QueryRejection, Json, Path, Query, State},
    http::HeaderMap,
};
use courier_core::UserId;

use crate::server::{
    auth::authenticate,
    core::{AppState, HISTORY_PAGE_SIZE},
    errors::ApiFailure,
    metrics::record_store_failure,
    types::{HistoryQuery, HistoryResponse, MessageResponse},
};

pub(crate) async fn get_history(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(other_user_id): Path<String>,
    query: Result<Query<HistoryQuery>, QueryRejection>,
) -> Result<Json<HistoryResponse>, ApiFailure> {
    let auth = authenticate(&state, &headers)?;
    let other_user_id =
        UserId::try_from(other_user_id.as_str()).map_err(|_| ApiFailure::InvalidRequest)?;
    let Query(query) = query.map_err(|_| ApiFailure::InvalidRequest)?;
    let offset = query.offset.unwrap_or(0);

    let page = state
        .store
        .paginated_history(auth.user_id, other_user_id, offset, HISTORY_PAGE_SIZE)
        .await
        .map_err(|error| {
            record_store_failure("history");
            tracing::warn!(
                event = "messages.history",
                outcome = "store_failed",
                user_id = %auth.user_id,
                other_user_id = %other_user_id,
                offset,
                %error,
            );
            ApiFailure::from(error)
        })?;

    let next_offset = if page.len() == HISTORY_PAGE_SIZE {
        offset.checked_add(HISTORY_PAGE_SIZE)
    } else {
        None
    };
    Ok(Json(HistoryResponse {
        messages: page.into_iter().map(MessageResponse::from).collect(),
        next_offset,
    }))
}
