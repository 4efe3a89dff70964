#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

/// Maximum message body size in bytes.
pub const MAX_MESSAGE_CONTENT_BYTES: usize = 2000;
/// Maximum display name length in characters.
pub const MAX_DISPLAY_NAME_CHARS: usize = 64;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("user id is invalid")]
    InvalidUserId,
    #[error("display name is invalid")]
    InvalidDisplayName,
    #[error("message content is invalid")]
    InvalidMessageContent,
}

/// Numeric identity of a forum user, as issued by the account service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct UserId(i64);

impl UserId {
    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl TryFrom<i64> for UserId {
    type Error = DomainError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        if value <= 0 {
            return Err(DomainError::InvalidUserId);
        }
        Ok(Self(value))
    }
}

impl TryFrom<&str> for UserId {
    type Error = DomainError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let parsed = value
            .parse::<i64>()
            .map_err(|_| DomainError::InvalidUserId)?;
        Self::try_from(parsed)
    }
}

impl From<UserId> for i64 {
    fn from(value: UserId) -> Self {
        value.0
    }
}

impl core::fmt::Display for UserId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Human-readable name shown next to a user's messages.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DisplayName(String);

impl DisplayName {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for DisplayName {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        validate_display_name(&value)?;
        Ok(Self(value))
    }
}

impl From<DisplayName> for String {
    fn from(value: DisplayName) -> Self {
        value.0
    }
}

/// Validated body of a direct message.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MessageContent(String);

impl MessageContent {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl TryFrom<String> for MessageContent {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if value.is_empty() || value.len() > MAX_MESSAGE_CONTENT_BYTES {
            return Err(DomainError::InvalidMessageContent);
        }
        Ok(Self(value))
    }
}

impl From<MessageContent> for String {
    fn from(value: MessageContent) -> Self {
        value.0
    }
}

fn validate_display_name(value: &str) -> Result<(), DomainError> {
    let len = value.chars().count();
    if len == 0 || len > MAX_DISPLAY_NAME_CHARS {
        return Err(DomainError::InvalidDisplayName);
    }
    if value.trim() != value || value.chars().any(char::is_control) {
        return Err(DomainError::InvalidDisplayName);
    }
    Ok(())
}
