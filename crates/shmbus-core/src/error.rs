//! Shared error type across shmbus crates.

use thiserror::Error;

/// Client-facing error codes (stable API).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientCode {
    /// Invalid input / malformed envelope.
    BadRequest,
    /// Channel does not exist.
    ChannelNotFound,
    /// Shared memory is not enabled on the broker.
    SharedMemoryDisabled,
    /// Payload does not fit the target buffer or frame.
    PayloadTooLarge,
    /// Shared memory mutex could not be acquired in time.
    LockTimeout,
    /// Shared memory could not be created, opened or removed.
    SharedMemoryFailed,
    /// Unsupported config or layout version.
    UnsupportedVersion,
    /// Internal broker error.
    Internal,
}

impl ClientCode {
    /// String representation used in error responses.
    pub fn as_str(self) -> &'static str {
        match self {
            ClientCode::BadRequest => "BAD_REQUEST",
            ClientCode::ChannelNotFound => "CHANNEL_NOT_FOUND",
            ClientCode::SharedMemoryDisabled => "SHM_DISABLED",
            ClientCode::PayloadTooLarge => "PAYLOAD_TOO_LARGE",
            ClientCode::LockTimeout => "LOCK_TIMEOUT",
            ClientCode::SharedMemoryFailed => "SHM_FAILED",
            ClientCode::UnsupportedVersion => "UNSUPPORTED_VERSION",
            ClientCode::Internal => "INTERNAL",
        }
    }
}

/// Shared result type.
pub type Result<T> = std::result::Result<T, BrokerError>;

/// Unified error type used by core and broker.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("decode failed: {0}")]
    Decode(String),
    #[error("encode failed: {0}")]
    Encode(String),
    #[error("transport: {0}")]
    Transport(#[from] std::io::Error),
    #[error("channel not found: {0}")]
    ChannelNotFound(String),
    #[error("shared memory is not enabled")]
    SharedMemoryDisabled,
    #[error("payload too large: {size} bytes exceeds capacity {capacity}")]
    PayloadTooLarge { size: usize, capacity: usize },
    #[error("timed out waiting for shared memory lock")]
    LockTimeout,
    #[error("shared memory: {0}")]
    SharedMemory(String),
    #[error("unsupported version")]
    UnsupportedVersion,
    #[error("internal: {0}")]
    Internal(String),
}

impl BrokerError {
    /// Map internal error to a stable client-facing code.
    pub fn client_code(&self) -> ClientCode {
        match self {
            BrokerError::BadRequest(_) | BrokerError::Decode(_) => ClientCode::BadRequest,
            BrokerError::ChannelNotFound(_) => ClientCode::ChannelNotFound,
            BrokerError::SharedMemoryDisabled => ClientCode::SharedMemoryDisabled,
            BrokerError::PayloadTooLarge { .. } => ClientCode::PayloadTooLarge,
            BrokerError::LockTimeout => ClientCode::LockTimeout,
            BrokerError::SharedMemory(_) => ClientCode::SharedMemoryFailed,
            BrokerError::UnsupportedVersion => ClientCode::UnsupportedVersion,
            BrokerError::Encode(_) | BrokerError::Transport(_) | BrokerError::Internal(_) => {
                ClientCode::Internal
            }
        }
    }

    /// Whether the error ends the connection instead of producing an error response.
    pub fn is_fatal_for_connection(&self) -> bool {
        matches!(self, BrokerError::Decode(_) | BrokerError::Transport(_))
    }
}
