//! Registration of a server's ephemeral node under the discovery path.

use roster_common::host::Host;
use roster_common::protocol::error::{Result, RosterError};
use roster_store::{CoordinationStore, StoreError};
use tracing::info;

/// Creates the server's registration node, returning its full path.
///
/// A stale node at the same key (a crashed predecessor whose session has
/// not yet expired) is deleted best-effort; `NoNode` there is the normal
/// case. If creation still collides the key is genuinely owned by someone
/// else and startup fails with `RegistrationConflict`.
pub(crate) async fn register(
    store: &dyn CoordinationStore,
    discovery_path: &str,
    host: &Host,
) -> Result<String> {
    store.ensure_path(discovery_path).await?;

    let node_path = format!("{}/{}", discovery_path, host.node_name());
    match store.delete(&node_path).await {
        Ok(()) => info!(node = %node_path, "removed stale registration"),
        Err(StoreError::NoNode(_)) => {}
        Err(e) => return Err(e.into()),
    }

    match store.create_ephemeral(&node_path, &host.to_bytes()).await {
        Ok(()) => Ok(node_path),
        Err(StoreError::NodeExists(_)) => Err(RosterError::RegistrationConflict(node_path)),
        Err(e) => Err(e.into()),
    }
}
