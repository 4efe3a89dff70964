#![forbid(unsafe_code)]

use courier_core::{DomainError, MessageContent, UserId};
use serde::{Deserialize, Serialize};

/// Maximum allowed chat frame bytes.
pub const MAX_FRAME_BYTES: usize = 16 * 1024;

/// Client-to-server frame: a direct message addressed to one user.
///
/// The sender is never taken from the wire. It is stamped server-side from the
/// authenticated session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundFrame {
    pub receiver_id: UserId,
    pub content: MessageContent,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawInboundFrame {
    receiver_id: i64,
    content: String,
}

/// Server-to-client frame for a persisted direct message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OutboundFrame {
    pub id: i64,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub content: String,
    pub created_at_unix: i64,
    pub sender_display_name: String,
}

/// Parse and validate an inbound frame at the network boundary.
///
/// # Errors
/// Returns [`ProtocolError`] if the payload exceeds limits, is malformed JSON,
/// names an invalid receiver, or carries empty or oversized content.
pub fn parse_inbound_frame(input: &[u8]) -> Result<InboundFrame, ProtocolError> {
    if input.len() > MAX_FRAME_BYTES {
        return Err(ProtocolError::OversizedPayload {
            max: MAX_FRAME_BYTES,
            actual: input.len(),
        });
    }

    let raw: RawInboundFrame = serde_json::from_slice(input)?;
    let receiver_id = UserId::try_from(raw.receiver_id)?;
    let content = MessageContent::try_from(raw.content)?;
    Ok(InboundFrame {
        receiver_id,
        content,
    })
}

/// Serialize an outbound frame into a text payload.
///
/// # Errors
/// Returns [`ProtocolError::InvalidJson`] if serialization fails.
pub fn encode_outbound_frame(frame: &OutboundFrame) -> Result<String, ProtocolError> {
    Ok(serde_json::to_string(frame)?)
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("payload exceeds max size: max={max} bytes actual={actual} bytes")]
    OversizedPayload { max: usize, actual: usize },
    #[error("invalid json payload")]
    InvalidJson,
    #[error("invalid receiver id")]
    InvalidReceiver,
    #[error("invalid message content")]
    InvalidContent,
}

impl ProtocolError {
    /// Stable label used for metrics and disconnect reasons.
    #[must_use]
    pub const fn reason(&self) -> &'static str {
        match self {
            Self::OversizedPayload { .. } => "oversized_payload",
            Self::InvalidJson => "invalid_json",
            Self::InvalidReceiver => "invalid_receiver",
            Self::InvalidContent => "invalid_content",
        }
    }
}

impl From<serde_json::Error> for ProtocolError {
    fn from(_: serde_json::Error) -> Self {
        Self::InvalidJson
    }
}

impl From<DomainError> for ProtocolError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::InvalidUserId => Self::InvalidReceiver,
            DomainError::InvalidDisplayName | DomainError::InvalidMessageContent => {
                Self::InvalidContent
            }
        }
    }
}
