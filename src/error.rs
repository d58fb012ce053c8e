//! Crate-wide error type and its mapping onto the wire error taxonomy (spec §7).

use thiserror::Error;

/// Error code ranges emitted in `Error(0x91)` frames.
pub mod code {
    pub const PROTOCOL_INVALID_FORMAT: u16 = 1000;
    pub const AUTH_REQUIRED: u16 = 2000;
    pub const AUTH_BANNED: u16 = 2001;
    pub const PERMISSION_DENIED: u16 = 3000;
    pub const NOT_FOUND_CHANNEL: u16 = 4000;
    pub const NOT_FOUND_MESSAGE: u16 = 4001;
    pub const NOT_FOUND_THREAD: u16 = 4002;
    pub const NOT_FOUND_SUBCHANNEL: u16 = 4003;
    pub const NOT_FOUND_USER: u16 = 4004;
    pub const RATE_MESSAGE: u16 = 5001;
    pub const CAP_CONNECTIONS_PER_IP: u16 = 5002;
    pub const CAP_THREAD_SUBSCRIPTIONS: u16 = 5004;
    pub const CAP_CHANNEL_SUBSCRIPTIONS: u16 = 5005;
    pub const VALIDATION_INVALID_INPUT: u16 = 6000;
    pub const VALIDATION_NICKNAME: u16 = 6001;
    pub const VALIDATION_LENGTH: u16 = 6002;
    pub const SERVER_INTERNAL: u16 = 9000;
    pub const SERVER_DATABASE: u16 = 9001;
}

/// Application-wide error type.
///
/// Every variant knows its own wire error code so a dispatcher handler can
/// turn any `Result<_, ServerError>` directly into an `Error(0x91)` frame.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("authentication required")]
    AuthRequired,

    #[error("banned: {0}")]
    Banned(String),

    #[error("permission denied: {0}")]
    Forbidden(String),

    #[error("channel not found")]
    ChannelNotFound,

    #[error("message not found")]
    MessageNotFound,

    #[error("thread not found")]
    ThreadNotFound,

    #[error("subchannel not found")]
    SubchannelNotFound,

    #[error("user not found")]
    UserNotFound,

    #[error("message rate exceeded")]
    RateLimited,

    #[error("too many connections from this address")]
    ConnectionCapExceeded,

    #[error("thread subscription cap exceeded")]
    ThreadSubscriptionCapExceeded,

    #[error("channel subscription cap exceeded")]
    ChannelSubscriptionCapExceeded,

    #[error("invalid input: {0}")]
    Validation(String),

    #[error("invalid nickname length")]
    InvalidNickname,

    #[error("invalid content length")]
    InvalidContentLength,

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ServerError {
    /// The wire error code this variant is reported to the offending session as.
    pub fn wire_code(&self) -> u16 {
        use code::*;
        match self {
            Self::Protocol(_) => PROTOCOL_INVALID_FORMAT,
            Self::AuthRequired => AUTH_REQUIRED,
            Self::Banned(_) => AUTH_BANNED,
            Self::Forbidden(_) => PERMISSION_DENIED,
            Self::ChannelNotFound => NOT_FOUND_CHANNEL,
            Self::MessageNotFound => NOT_FOUND_MESSAGE,
            Self::ThreadNotFound => NOT_FOUND_THREAD,
            Self::SubchannelNotFound => NOT_FOUND_SUBCHANNEL,
            Self::UserNotFound => NOT_FOUND_USER,
            Self::RateLimited => RATE_MESSAGE,
            Self::ConnectionCapExceeded => CAP_CONNECTIONS_PER_IP,
            Self::ThreadSubscriptionCapExceeded => CAP_THREAD_SUBSCRIPTIONS,
            Self::ChannelSubscriptionCapExceeded => CAP_CHANNEL_SUBSCRIPTIONS,
            Self::Validation(_) => VALIDATION_INVALID_INPUT,
            Self::InvalidNickname => VALIDATION_NICKNAME,
            Self::InvalidContentLength => VALIDATION_LENGTH,
            Self::Internal(_) => SERVER_INTERNAL,
            Self::Database(_) => SERVER_DATABASE,
            Self::Io(_) => SERVER_INTERNAL,
        }
    }

    /// Human-readable message sent alongside the code in an `Error` frame.
    pub fn wire_message(&self) -> String {
        match self {
            // Database/internal details are never leaked to the wire.
            Self::Database(e) => {
                tracing::error!(error = %e, "database error surfaced to client as 9001");
                "internal server error".to_string()
            }
            Self::Internal(e) => {
                tracing::error!(error = %e, "internal error surfaced to client as 9000");
                "internal server error".to_string()
            }
            Self::Io(e) => {
                tracing::error!(error = %e, "io error surfaced to client as 9000");
                "internal server error".to_string()
            }
            other => other.to_string(),
        }
    }
}

pub type ServerResult<T> = Result<T, ServerError>;
