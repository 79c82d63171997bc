use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedReceiver;

use crate::error::Result;

/// One child of a watched directory node: its name (the last path segment)
/// and its current payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildNode {
    pub name: String,
    pub data: Vec<u8>,
}

/// A change to the child set of a watched directory node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChildEvent {
    /// A child appeared under the watched path.
    Added { name: String, data: Vec<u8> },
    /// An existing child's payload was rewritten.
    Updated { name: String, data: Vec<u8> },
    /// A child was deleted (explicitly or by session expiry).
    Removed { name: String },
}

impl ChildEvent {
    /// The child name the event refers to.
    pub fn name(&self) -> &str {
        match self {
            ChildEvent::Added { name, .. }
            | ChildEvent::Updated { name, .. }
            | ChildEvent::Removed { name } => name,
        }
    }
}

/// A live subscription to the children of one directory node.
///
/// `children` is the full child set at the moment the watch was established;
/// `events` delivers every change after that point, in order. When the
/// stream ends (session loss, client shutdown) the consumer re-establishes
/// the watch and diffs the fresh `children` against its own state - that is
/// how the full child set is re-delivered across reconnections.
pub struct ChildWatch {
    pub children: Vec<ChildNode>,
    pub events: UnboundedReceiver<ChildEvent>,
}

/// The contract Roster requires from the external coordination store.
///
/// This is intentionally narrow: create/read/write/delete of nodes under a
/// discovery path, plus a restartable child watch. Implementations own all
/// retry and timeout policy for transient faults; callers only ever observe
/// the variants of [`crate::StoreError`].
///
/// Every method may suspend on I/O - this trait is the only place in the
/// workspace allowed to do so against the store.
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    /// Idempotently creates `path` and any missing interior nodes.
    async fn ensure_path(&self, path: &str) -> Result<()>;

    /// Creates a node bound to the current session; it is deleted
    /// automatically when the session ends.
    ///
    /// Fails with `NodeExists` if the path is already taken and
    /// `SessionLost` if the client has no live session.
    async fn create_ephemeral(&self, path: &str, data: &[u8]) -> Result<()>;

    /// Unconditionally replaces the payload of an existing node.
    async fn set_data(&self, path: &str, data: &[u8]) -> Result<()>;

    /// Deletes a node. `NoNode` is returned as-is; callers decide whether
    /// that is an error (it is not during stale-registration cleanup).
    async fn delete(&self, path: &str) -> Result<()>;

    /// Point read of a node's payload.
    async fn get_data(&self, path: &str) -> Result<Vec<u8>>;

    /// Subscribes to the child set of `path`. See [`ChildWatch`] for the
    /// replay-on-reconnect contract.
    async fn watch_children(&self, path: &str) -> Result<ChildWatch>;

    /// Closes the client. Ephemerals owned by its session vanish and every
    /// subsequent operation fails with `SessionLost`.
    async fn shutdown(&self);
}
