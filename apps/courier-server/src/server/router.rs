use std::{sync::Arc, time::Duration};

use anyhow::anyhow;
use axum::{
    extract::DefaultBodyLimit,
    http::{HeaderName, StatusCode},
    routing::get,
    Router,
};
use tower::ServiceBuilder;
use tower_governor::{
    governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor, GovernorLayer,
};
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use super::{
    auth::IdentityResolver,
    core::{AppConfig, AppState},
    handlers::{messages::get_history, presence::list_online_users},
    session::chat_ws,
    types::{health, metrics},
};

/// Build the axum router with global security middleware.
///
/// Chat credentials are verified with PASETO tokens keyed by
/// [`AppConfig::identity_key`].
///
/// # Errors
/// Returns an error if configured limits are invalid or no identity key is set.
pub fn build_router(config: &AppConfig) -> anyhow::Result<Router> {
    build(config, None)
}

/// Like [`build_router`], with a caller-supplied credential resolver in place
/// of the built-in token verifier.
///
/// # Errors
/// Returns an error if configured limits are invalid.
pub fn build_router_with_resolver(
    config: &AppConfig,
    resolver: Arc<dyn IdentityResolver>,
) -> anyhow::Result<Router> {
    build(config, Some(resolver))
}

fn build(
    config: &AppConfig,
    resolver: Option<Arc<dyn IdentityResolver>>,
) -> anyhow::Result<Router> {
    validate_config(config)?;

    let governor_config = Arc::new(
        GovernorConfigBuilder::default()
            .period(Duration::from_secs(60))
            .burst_size(config.rate_limit_requests_per_minute)
            .key_extractor(SmartIpKeyExtractor)
            .finish()
            .ok_or_else(|| anyhow!("invalid governor configuration"))?,
    );
    let app_state = AppState::new(config, resolver)?;
    let request_id_header = HeaderName::from_static("x-request-id");
    let governor_layer = GovernorLayer::new(governor_config);

    Ok(Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/chat/ws", get(chat_ws))
        .route("/messages/{other_user_id}", get(get_history))
        .route("/users/online", get(list_online_users))
        .with_state(app_state)
        .layer(DefaultBodyLimit::max(config.max_body_bytes))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(SetRequestIdLayer::new(
                    request_id_header.clone(),
                    MakeRequestUuid,
                ))
                .layer(PropagateRequestIdLayer::new(request_id_header))
                .layer(TimeoutLayer::with_status_code(
                    StatusCode::REQUEST_TIMEOUT,
                    config.request_timeout,
                ))
                .layer(governor_layer),
        ))
}

fn validate_config(config: &AppConfig) -> anyhow::Result<()> {
    if config.max_chat_frame_bytes == 0
        || config.max_chat_frame_bytes > courier_protocol::MAX_FRAME_BYTES
    {
        return Err(anyhow!(
            "chat frame limit must be between 1 and the protocol max of {} bytes",
            courier_protocol::MAX_FRAME_BYTES
        ));
    }
    if config.chat_outbound_queue == 0 {
        return Err(anyhow!("chat outbound queue must hold at least 1 frame"));
    }
    if config.chat_ingress_frames_per_window == 0 || config.chat_ingress_window.is_zero() {
        return Err(anyhow!(
            "chat ingress limit must allow at least 1 frame per non-empty window"
        ));
    }
    if config.chat_ping_interval.is_zero() {
        return Err(anyhow!("chat ping interval must be at least 1 second"));
    }
    if config.rate_limit_requests_per_minute == 0 {
        return Err(anyhow!(
            "rate limit must be at least 1 request per minute"
        ));
    }
    Ok(())
}
