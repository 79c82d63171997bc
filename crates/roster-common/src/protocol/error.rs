use roster_store::StoreError;
use thiserror::Error;

use crate::host::DecodeError;

#[derive(Debug, Error)]
pub enum RosterError {
    #[error("host record decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("request timeout after {0}ms")]
    Timeout(u64),

    #[error("message too large: {size} bytes (max {max} bytes)")]
    MessageTooLarge { size: usize, max: usize },

    #[error("no ready endpoint")]
    NoReadyEndpoint,

    #[error("unauthorized")]
    Unauthorized,

    #[error("invalid settings: {0}")]
    InvalidSettings(String),

    #[error("registration conflict at {0}")]
    RegistrationConflict(String),

    #[error("service error: {0}")]
    Service(String),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RosterError {
    /// Whether a failed call may succeed if repeated against another (or the
    /// same) endpoint.
    ///
    /// Transport-level faults are retryable. `NoReadyEndpoint` is not: the
    /// caller's RPC fails fast and retry policy, if any, lives above the
    /// core. Decode, settings, and service errors are permanent.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RosterError::Connection(_)
                | RosterError::Timeout(_)
                | RosterError::Io(_)
                | RosterError::Store(StoreError::Transient(_))
        )
    }
}

pub type Result<T> = std::result::Result<T, RosterError>;
