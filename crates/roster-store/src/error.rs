use thiserror::Error;

/// Failures surfaced by a coordination-store client.
///
/// The split matters to callers: `NodeExists`/`NoNode` are answers, not
/// faults (a registration conflict, a stale-node cleanup finding nothing),
/// `SessionLost` signals that every ephemeral owned by the session is gone
/// and the owner must re-register, and `Transient` covers disconnects and
/// timeouts the client retries internally.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("node already exists: {0}")]
    NodeExists(String),

    #[error("no node: {0}")]
    NoNode(String),

    #[error("coordination session lost")]
    SessionLost,

    #[error("transient store failure: {0}")]
    Transient(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;
