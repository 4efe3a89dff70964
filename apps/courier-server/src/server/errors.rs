use axum::{http::StatusCode, response::IntoResponse, Json};

use super::{metrics::record_auth_failure, types::ApiError};

#[derive(Debug)]
pub(crate) enum ApiFailure {
    InvalidRequest,
    Unauthorized,
    StorageUnavailable,
}

impl std::fmt::Display for ApiFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

impl IntoResponse for ApiFailure {
    fn into_response(self) -> axum::response::Response {
        if matches!(self, Self::Unauthorized) {
            record_auth_failure("unauthorized");
        }

        let (status, error) = match self {
            Self::InvalidRequest => (StatusCode::BAD_REQUEST, "invalid_request"),
            Self::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized"),
            Self::StorageUnavailable => (StatusCode::SERVICE_UNAVAILABLE, "storage_unavailable"),
        };
        (status, Json(ApiError { error })).into_response()
    }
}

/// Failure of the durable message log.
#[derive(Debug, thiserror::Error)]
pub(crate) enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("stored message row is invalid: {0}")]
    InvalidRow(&'static str),
    #[error("pagination window is out of range")]
    InvalidWindow,
}

impl From<StoreError> for ApiFailure {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::InvalidWindow => Self::InvalidRequest,
            StoreError::Database(_) | StoreError::InvalidRow(_) => Self::StorageUnavailable,
        }
    }
}

pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .json()
        .with_env_filter(filter)
        .with_current_span(true)
        .with_span_list(true)
        .init();
}
