#![forbid(unsafe_code)]

mod server;

pub use server::{
    build_router, build_router_with_resolver, decode_identity_key, init_tracing, AppConfig,
    IdentityError, IdentityResolver, IdentityTokens, ReplacedSessionPolicy, VerifiedIdentity,
    DEFAULT_CHAT_INGRESS_FRAMES_PER_WINDOW, DEFAULT_CHAT_INGRESS_WINDOW_SECS,
    DEFAULT_CHAT_OUTBOUND_QUEUE, DEFAULT_CHAT_PING_INTERVAL_SECS,
    DEFAULT_DATABASE_ACQUIRE_TIMEOUT_SECS, DEFAULT_DATABASE_MAX_CONNECTIONS,
    DEFAULT_JSON_BODY_LIMIT_BYTES, DEFAULT_MAX_CHAT_FRAME_BYTES,
    DEFAULT_RATE_LIMIT_REQUESTS_PER_MINUTE, DEFAULT_REQUEST_TIMEOUT_SECS, HISTORY_PAGE_SIZE,
    IDENTITY_TOKEN_TTL_SECS,
};
