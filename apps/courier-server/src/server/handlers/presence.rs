use axum::{
    extract::{Json, State},
    http::HeaderMap,
};

use crate::server::{
    auth::authenticate,
    core::AppState,
    errors::ApiFailure,
    types::OnlineUserResponse,
};

pub(crate) async fn list_online_users(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<OnlineUserResponse>>, ApiFailure> {
    authenticate(&state, &headers)?;
    let users = state
        .registry
        .online_users()
        .into_iter()
        .map(|(user_id, display_name)| OnlineUserResponse {
            id: user_id.get(),
            display_name: display_name.as_str().to_owned(),
        })
        .collect();
    Ok(Json(users))
}
