pub(crate) mod auth;
pub(crate) mod core;
pub(crate) mod db;
pub(crate) mod errors;
pub(crate) mod handlers;
pub(crate) mod metrics;
pub(crate) mod registry;
pub(crate) mod router;
pub(crate) mod routing;
pub(crate) mod session;
pub(crate) mod store;
pub(crate) mod types;

pub use auth::{
    decode_identity_key, IdentityError, IdentityResolver, IdentityTokens, VerifiedIdentity,
};
pub use self::core::{
    AppConfig, ReplacedSessionPolicy, DEFAULT_CHAT_INGRESS_FRAMES_PER_WINDOW,
    DEFAULT_CHAT_INGRESS_WINDOW_SECS, DEFAULT_CHAT_OUTBOUND_QUEUE,
    DEFAULT_CHAT_PING_INTERVAL_SECS, DEFAULT_DATABASE_ACQUIRE_TIMEOUT_SECS,
    DEFAULT_DATABASE_MAX_CONNECTIONS, DEFAULT_JSON_BODY_LIMIT_BYTES,
    DEFAULT_MAX_CHAT_FRAME_BYTES, DEFAULT_RATE_LIMIT_REQUESTS_PER_MINUTE,
    DEFAULT_REQUEST_TIMEOUT_SECS, HISTORY_PAGE_SIZE, IDENTITY_TOKEN_TTL_SECS,
};
pub use errors::init_tracing;
pub use router::{build_router, build_router_with_resolver};
