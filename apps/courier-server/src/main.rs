#![forbid(unsafe_code)]

use std::net::SocketAddr;

use courier_server::{build_router, decode_identity_key, init_tracing, AppConfig};
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let identity_key = std::env::var("COURIER_IDENTITY_KEY")
        .map_err(|_| anyhow::anyhow!("COURIER_IDENTITY_KEY is required for runtime"))?;
    let identity_key = decode_identity_key(&identity_key)?;
    let chat_outbound_queue = std::env::var("COURIER_OUTBOUND_QUEUE").map_or_else(
        |_| Ok(AppConfig::default().chat_outbound_queue),
        |value| {
            value
                .parse::<usize>()
                .map_err(|e| anyhow::anyhow!("invalid COURIER_OUTBOUND_QUEUE value {value:?}: {e}"))
        },
    )?;
    let replaced_session_policy = std::env::var("COURIER_REPLACED_SESSION_POLICY").map_or_else(
        |_| Ok(AppConfig::default().replaced_session_policy),
        |value| value.parse(),
    )?;
    let database_url = std::env::var("COURIER_DATABASE_URL").ok();
    if database_url.is_none() {
        tracing::warn!("COURIER_DATABASE_URL is unset, messages are kept in memory only");
    }

    let app_config = AppConfig {
        identity_key: Some(identity_key),
        chat_outbound_queue,
        replaced_session_policy,
        database_url,
        ..AppConfig::default()
    };
    let app = build_router(&app_config)?;
    let addr = std::env::var("COURIER_BIND_ADDR")
        .unwrap_or_else(|_| String::from("0.0.0.0:3000"))
        .parse::<SocketAddr>()
        .map_err(|e| anyhow::anyhow!("invalid COURIER_BIND_ADDR: {e}"))?;
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "courier-server listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}
