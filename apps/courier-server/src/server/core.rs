use std::{str::FromStr, sync::Arc, time::Duration};

use anyhow::anyhow;
use sqlx::postgres::PgPoolOptions;

use super::{
    auth::{IdentityResolver, IdentityTokens},
    registry::ConnectionRegistry,
    routing::MessageRouter,
    store::MessageStore,
};

pub const DEFAULT_JSON_BODY_LIMIT_BYTES: usize = 1_048_576;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_RATE_LIMIT_REQUESTS_PER_MINUTE: u32 = 120;
pub const DEFAULT_CHAT_INGRESS_FRAMES_PER_WINDOW: u32 = 20;
pub const DEFAULT_CHAT_INGRESS_WINDOW_SECS: u64 = 10;
pub const DEFAULT_CHAT_OUTBOUND_QUEUE: usize = 256;
pub const DEFAULT_MAX_CHAT_FRAME_BYTES: usize = courier_protocol::MAX_FRAME_BYTES;
pub const DEFAULT_CHAT_PING_INTERVAL_SECS: u64 = 30;
pub const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 10;
pub const DEFAULT_DATABASE_ACQUIRE_TIMEOUT_SECS: u64 = 5;
pub const IDENTITY_TOKEN_TTL_SECS: u64 = 15 * 60;
/// Fixed page size of conversation history.
pub const HISTORY_PAGE_SIZE: usize = 10;
pub(crate) const SESSION_REPLACED_CLOSE_CODE: u16 = 4000;
pub(crate) const SLOW_CONSUMER_CLOSE_CODE: u16 = 1008;
pub(crate) const METRICS_TEXT_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// What happens to a live connection when the same user connects again.
///
/// Either way the registry only ever points at the newest connection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ReplacedSessionPolicy {
    /// Send the displaced connection a `session_replaced` close frame.
    #[default]
    Close,
    /// Leave the displaced connection open but unreachable. It keeps its
    /// socket until the client disconnects, and its teardown leaves the
    /// newer registry entry alone.
    Orphan,
}

impl ReplacedSessionPolicy {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Close => "close",
            Self::Orphan => "orphan",
        }
    }
}

impl FromStr for ReplacedSessionPolicy {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "close" => Ok(Self::Close),
            "orphan" => Ok(Self::Orphan),
            other => Err(anyhow!(
                "unknown replaced session policy {other:?}, expected close or orphan"
            )),
        }
    }
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub max_body_bytes: usize,
    pub request_timeout: Duration,
    pub rate_limit_requests_per_minute: u32,
    pub chat_ingress_frames_per_window: u32,
    pub chat_ingress_window: Duration,
    pub chat_outbound_queue: usize,
    pub max_chat_frame_bytes: usize,
    pub chat_ping_interval: Duration,
    pub replaced_session_policy: ReplacedSessionPolicy,
    pub identity_key: Option<[u8; 32]>,
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub database_acquire_timeout: Duration,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            max_body_bytes: DEFAULT_JSON_BODY_LIMIT_BYTES,
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            rate_limit_requests_per_minute: DEFAULT_RATE_LIMIT_REQUESTS_PER_MINUTE,
            chat_ingress_frames_per_window: DEFAULT_CHAT_INGRESS_FRAMES_PER_WINDOW,
            chat_ingress_window: Duration::from_secs(DEFAULT_CHAT_INGRESS_WINDOW_SECS),
            chat_outbound_queue: DEFAULT_CHAT_OUTBOUND_QUEUE,
            max_chat_frame_bytes: DEFAULT_MAX_CHAT_FRAME_BYTES,
            chat_ping_interval: Duration::from_secs(DEFAULT_CHAT_PING_INTERVAL_SECS),
            replaced_session_policy: ReplacedSessionPolicy::default(),
            identity_key: None,
            database_url: None,
            database_max_connections: DEFAULT_DATABASE_MAX_CONNECTIONS,
            database_acquire_timeout: Duration::from_secs(DEFAULT_DATABASE_ACQUIRE_TIMEOUT_SECS),
        }
    }
}

#[derive(Clone, Debug)]
pub(crate) struct RuntimeConfig {
    pub(crate) chat_ingress_frames_per_window: u32,
    pub(crate) chat_ingress_window: Duration,
    pub(crate) chat_outbound_queue: usize,
    pub(crate) max_chat_frame_bytes: usize,
    pub(crate) chat_ping_interval: Duration,
    pub(crate) replaced_session_policy: ReplacedSessionPolicy,
}

impl RuntimeConfig {
    fn from_config(config: &AppConfig) -> Self {
        Self {
            chat_ingress_frames_per_window: config.chat_ingress_frames_per_window,
            chat_ingress_window: config.chat_ingress_window,
            chat_outbound_queue: config.chat_outbound_queue,
            max_chat_frame_bytes: config.max_chat_frame_bytes,
            chat_ping_interval: config.chat_ping_interval,
            replaced_session_policy: config.replaced_session_policy,
        }
    }
}

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) store: MessageStore,
    pub(crate) registry: ConnectionRegistry,
    pub(crate) router: MessageRouter,
    pub(crate) identity: Arc<dyn IdentityResolver>,
    pub(crate) runtime: Arc<RuntimeConfig>,
}

impl AppState {
    pub(crate) fn new(
        config: &AppConfig,
        identity: Option<Arc<dyn IdentityResolver>>,
    ) -> anyhow::Result<Self> {
        let identity = match identity {
            Some(resolver) => resolver,
            None => {
                let key = config
                    .identity_key
                    .as_ref()
                    .ok_or_else(|| anyhow!("identity key is required to verify chat credentials"))?;
                Arc::new(IdentityTokens::from_key_bytes(key)?)
            }
        };
        let store = if let Some(database_url) = &config.database_url {
            let pool = PgPoolOptions::new()
                .max_connections(config.database_max_connections)
                .acquire_timeout(config.database_acquire_timeout)
                .connect_lazy(database_url)
                .map_err(|e| anyhow!("postgres pool init failed: {e}"))?;
            MessageStore::postgres(pool)
        } else {
            MessageStore::in_memory()
        };
        let registry = ConnectionRegistry::default();

        Ok(Self {
            store,
            router: MessageRouter::new(registry.clone()),
            registry,
            identity,
            runtime: Arc::new(RuntimeConfig::from_config(config)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{AppConfig, AppState, ReplacedSessionPolicy};

    #[test]
    fn replaced_session_policy_parses_known_values() {
        assert_eq!(
            "close".parse::<ReplacedSessionPolicy>().unwrap(),
            ReplacedSessionPolicy::Close
        );
        assert_eq!(
            "orphan".parse::<ReplacedSessionPolicy>().unwrap(),
            ReplacedSessionPolicy::Orphan
        );
        assert!("evict".parse::<ReplacedSessionPolicy>().is_err());
    }

    #[test]
    fn state_requires_identity_key_without_custom_resolver() {
        assert!(AppState::new(&AppConfig::default(), None).is_err());
        let config = AppConfig {
            identity_key: Some([3; 32]),
            ..AppConfig::default()
        };
        assert!(AppState::new(&config, None).is_ok());
    }
}
