//! Client-side membership mirror.
//!
//! A single watcher task keeps an in-memory map of live hosts consistent
//! with the discovery directory: child events are applied in delivery
//! order, undecodable payloads are dropped (the node is treated as absent
//! until valid bytes arrive), and when the watch stream ends - session
//! loss, ensemble restart - the mirror resubscribes and diffs the freshly
//! delivered child set against its own state.
//!
//! Readers take consistent snapshots under a read lock; the version channel
//! ticks after every applied change so the channel can reconcile its
//! subchannel set.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use roster_common::host::Host;
use roster_store::{ChildEvent, ChildNode, CoordinationStore};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Delay before retrying a failed watch subscription.
const RESUBSCRIBE_BACKOFF: Duration = Duration::from_millis(500);

type HostMap = Arc<RwLock<HashMap<String, Host>>>;

pub struct MembershipMirror {
    hosts: HostMap,
    version_rx: watch::Receiver<u64>,
    task: JoinHandle<()>,
}

impl MembershipMirror {
    /// Spawns the watcher against `discovery_path`.
    pub fn start(store: Arc<dyn CoordinationStore>, discovery_path: String) -> Self {
        let hosts: HostMap = Arc::new(RwLock::new(HashMap::new()));
        let (version_tx, version_rx) = watch::channel(0u64);
        let task = tokio::spawn(watch_loop(
            store,
            discovery_path,
            Arc::clone(&hosts),
            version_tx,
        ));

        Self {
            hosts,
            version_rx,
            task,
        }
    }

    /// A consistent snapshot of the live host set.
    pub fn snapshot(&self) -> Vec<Host> {
        self.hosts
            .read()
            .expect("mirror lock poisoned")
            .values()
            .cloned()
            .collect()
    }

    /// Versioned snapshot handle: the value ticks after every membership
    /// change.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.version_rx.clone()
    }

    pub fn len(&self) -> usize {
        self.hosts.read().expect("mirror lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Shared handle to the underlying host map, for the channel's
    /// subchannel reconciler.
    pub(crate) fn hosts_handle(&self) -> HostMap {
        Arc::clone(&self.hosts)
    }

    /// Stops the watcher and empties the mirror; pickers over it report no
    /// ready endpoint from this point on.
    pub fn shutdown(&self) {
        self.task.abort();
        self.hosts.write().expect("mirror lock poisoned").clear();
    }
}

async fn watch_loop(
    store: Arc<dyn CoordinationStore>,
    discovery_path: String,
    hosts: HostMap,
    version_tx: watch::Sender<u64>,
) {
    loop {
        match store.watch_children(&discovery_path).await {
            Ok(mut child_watch) => {
                resync(&hosts, child_watch.children);
                bump(&version_tx);

                while let Some(event) = child_watch.events.recv().await {
                    apply_event(&hosts, event);
                    bump(&version_tx);
                }

                debug!(path = %discovery_path, "membership watch stream ended, resubscribing");
            }
            Err(e) => {
                warn!(path = %discovery_path, error = %e, "failed to establish membership watch");
                tokio::time::sleep(RESUBSCRIBE_BACKOFF).await;
            }
        }
    }
}

/// Diffs a freshly delivered full child set against the mirror: entries
/// missing from the replay are removed, everything present is upserted.
fn resync(hosts: &HostMap, children: Vec<ChildNode>) {
    let incoming: HashSet<&str> = children.iter().map(|child| child.name.as_str()).collect();
    let mut map = hosts.write().expect("mirror lock poisoned");
    map.retain(|name, _| incoming.contains(name.as_str()));

    for child in &children {
        upsert(&mut map, &child.name, &child.data);
    }
}

fn apply_event(hosts: &HostMap, event: ChildEvent) {
    let mut map = hosts.write().expect("mirror lock poisoned");
    match event {
        ChildEvent::Added { name, data } | ChildEvent::Updated { name, data } => {
            upsert(&mut map, &name, &data);
        }
        ChildEvent::Removed { name } => {
            map.remove(&name);
        }
    }
}

/// Inserts or replaces one entry. An undecodable payload drops the entry:
/// the node is treated as absent until a later event supplies valid bytes.
fn upsert(map: &mut HashMap<String, Host>, name: &str, data: &[u8]) {
    match Host::from_bytes(data) {
        Ok(host) => {
            map.insert(name.to_string(), host);
        }
        Err(e) => {
            warn!(node = %name, error = %e, "dropping undecodable host record");
            map.remove(name);
        }
    }
}

fn bump(version_tx: &watch::Sender<u64>) {
    version_tx.send_modify(|version| *version += 1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use roster_common::host::HostMetadata;
    use roster_store::MemoryEnsemble;

    const PATH: &str = "/grpc/mirror_test";

    async fn wait_for<F: Fn() -> bool>(condition: F) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached within timeout");
    }

    async fn fixture() -> (MemoryEnsemble, MembershipMirror) {
        let ensemble = MemoryEnsemble::new();
        ensemble.ensure_path(PATH).await.unwrap();
        let mirror = MembershipMirror::start(Arc::new(ensemble.client()), PATH.to_string());
        (ensemble, mirror)
    }

    fn node(path_name: &str) -> String {
        format!("{}/{}", PATH, path_name)
    }

    #[tokio::test]
    async fn test_mirror_tracks_adds_updates_and_removes() {
        let (ensemble, mirror) = fixture().await;

        let host = Host::new("10.0.0.1", 9000);
        ensemble
            .create_ephemeral(&node("10.0.0.1:9000"), &host.to_bytes())
            .await
            .unwrap();
        wait_for(|| mirror.len() == 1).await;

        let updated = Host::with_metadata(
            "10.0.0.1",
            9000,
            HostMetadata {
                load: 33,
                quarantined: false,
            },
        );
        ensemble
            .set_data(&node("10.0.0.1:9000"), &updated.to_bytes())
            .await
            .unwrap();
        wait_for(|| mirror.snapshot().first().map(|h| h.metadata.load) == Some(33)).await;

        ensemble.delete(&node("10.0.0.1:9000")).await.unwrap();
        wait_for(|| mirror.is_empty()).await;
        mirror.shutdown();
    }

    #[tokio::test]
    async fn test_preexisting_children_are_mirrored() {
        let ensemble = MemoryEnsemble::new();
        ensemble.ensure_path(PATH).await.unwrap();
        for port in [1, 2, 3] {
            let host = Host::new("h", port);
            ensemble
                .create_ephemeral(&node(&host.node_name()), &host.to_bytes())
                .await
                .unwrap();
        }

        let mirror = MembershipMirror::start(Arc::new(ensemble.client()), PATH.to_string());
        wait_for(|| mirror.len() == 3).await;
        mirror.shutdown();
    }

    #[tokio::test]
    async fn test_undecodable_payload_treated_as_absent() {
        let (ensemble, mirror) = fixture().await;

        let host = Host::new("10.0.0.1", 9000);
        ensemble
            .create_ephemeral(&node("10.0.0.1:9000"), &host.to_bytes())
            .await
            .unwrap();
        wait_for(|| mirror.len() == 1).await;

        // Garbage replaces the record: the entry disappears.
        ensemble
            .set_data(&node("10.0.0.1:9000"), b"corrupt")
            .await
            .unwrap();
        wait_for(|| mirror.is_empty()).await;

        // Valid bytes bring it back.
        ensemble
            .set_data(&node("10.0.0.1:9000"), &host.to_bytes())
            .await
            .unwrap();
        wait_for(|| mirror.len() == 1).await;
        mirror.shutdown();
    }

    #[tokio::test]
    async fn test_remove_then_add_yields_present_entry() {
        let (ensemble, mirror) = fixture().await;
        let host = Host::new("10.0.0.1", 9000);
        let path = node("10.0.0.1:9000");

        ensemble.create_ephemeral(&path, &host.to_bytes()).await.unwrap();
        wait_for(|| mirror.len() == 1).await;

        ensemble.delete(&path).await.unwrap();
        ensemble.create_ephemeral(&path, &host.to_bytes()).await.unwrap();
        wait_for(|| mirror.len() == 1).await;
        mirror.shutdown();
    }

    #[tokio::test]
    async fn test_resubscribe_after_session_loss_diffs_membership() {
        let ensemble = MemoryEnsemble::new();
        ensemble.ensure_path(PATH).await.unwrap();

        let server_a = ensemble.client();
        let server_b = ensemble.client();
        server_a
            .create_ephemeral(&node("a:1"), &Host::new("a", 1).to_bytes())
            .await
            .unwrap();
        server_b
            .create_ephemeral(&node("b:2"), &Host::new("b", 2).to_bytes())
            .await
            .unwrap();

        let mirror_client = ensemble.client();
        let mirror = MembershipMirror::start(Arc::new(mirror_client.clone()), PATH.to_string());
        wait_for(|| mirror.len() == 2).await;

        // Kill the mirror's own session: its watch stream ends. While it is
        // down, server A disappears.
        mirror_client.expire_session();
        server_a.expire_session();

        // After resubscribing, the mirror converges on the surviving set.
        wait_for(|| mirror.snapshot().iter().all(|h| h.address == "b")).await;
        wait_for(|| mirror.len() == 1).await;
        mirror.shutdown();
    }

    #[tokio::test]
    async fn test_version_ticks_on_changes() {
        let (ensemble, mirror) = fixture().await;
        let mut version = mirror.subscribe();
        let initial = *version.borrow_and_update();

        ensemble
            .create_ephemeral(&node("a:1"), &Host::new("a", 1).to_bytes())
            .await
            .unwrap();
        version.changed().await.unwrap();
        assert!(*version.borrow() > initial);
        mirror.shutdown();
    }

    #[tokio::test]
    async fn test_shutdown_empties_mirror() {
        let (ensemble, mirror) = fixture().await;
        ensemble
            .create_ephemeral(&node("a:1"), &Host::new("a", 1).to_bytes())
            .await
            .unwrap();
        wait_for(|| mirror.len() == 1).await;

        mirror.shutdown();
        assert!(mirror.is_empty());
    }
}
