use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc::{self, UnboundedSender};
use tracing::debug;

use crate::adapter::{ChildEvent, ChildNode, ChildWatch, CoordinationStore};
use crate::error::{Result, StoreError};

/// In-process coordination ensemble with real session semantics.
///
/// One `MemoryEnsemble::new()` call creates the shared tree; [`client`]
/// hands out independent client handles over it, each with its own session.
/// Ephemeral nodes are tagged with the creating handle's session and vanish
/// when that session ends - through [`shutdown`], or through the
/// [`expire_session`] test hook which simulates a server-side expiry and
/// rotates the handle onto a fresh session, the way a real ensemble client
/// survives expiry by reconnecting.
///
/// Cloning a handle shares its session (clones are the same logical client).
///
/// [`client`]: MemoryEnsemble::client
/// [`shutdown`]: CoordinationStore::shutdown
/// [`expire_session`]: MemoryEnsemble::expire_session
#[derive(Clone)]
pub struct MemoryEnsemble {
    shared: Arc<Mutex<Shared>>,
    session: Arc<AtomicU64>,
    stopped: Arc<AtomicBool>,
}

struct Shared {
    next_session: u64,
    /// Interior (directory) nodes created by `ensure_path`.
    paths: HashSet<String>,
    /// Data nodes by full path. BTreeMap keeps child listings deterministic.
    nodes: BTreeMap<String, NodeRecord>,
    watchers: Vec<Watcher>,
}

struct NodeRecord {
    data: Vec<u8>,
    /// Owning session for ephemeral nodes.
    owner: Option<u64>,
}

struct Watcher {
    parent: String,
    session: u64,
    tx: UnboundedSender<ChildEvent>,
}

impl MemoryEnsemble {
    pub fn new() -> Self {
        let shared = Arc::new(Mutex::new(Shared {
            next_session: 1,
            paths: HashSet::new(),
            nodes: BTreeMap::new(),
            watchers: Vec::new(),
        }));
        let session = {
            let mut s = shared.lock().expect("ensemble lock poisoned");
            s.allocate_session()
        };
        Self {
            shared,
            session: Arc::new(AtomicU64::new(session)),
            stopped: Arc::new(AtomicBool::new(false)),
        }
    }

    /// A new client handle over the same tree, with its own session.
    pub fn client(&self) -> Self {
        let session = {
            let mut s = self.shared.lock().expect("ensemble lock poisoned");
            s.allocate_session()
        };
        Self {
            shared: Arc::clone(&self.shared),
            session: Arc::new(AtomicU64::new(session)),
            stopped: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Test hook: expire this handle's session server-side.
    ///
    /// Every ephemeral it owns is deleted (watchers of other sessions see
    /// `Removed`), its watch streams end, and the handle rotates onto a
    /// fresh session so subsequent operations succeed again.
    pub fn expire_session(&self) {
        let mut s = self.shared.lock().expect("ensemble lock poisoned");
        let old = self.session.load(Ordering::SeqCst);
        s.end_session(old);
        let fresh = s.allocate_session();
        self.session.store(fresh, Ordering::SeqCst);
        debug!(old_session = old, new_session = fresh, "expired ensemble session");
    }

    /// Whether this handle has reached its terminal stopped state.
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    fn check_live(&self) -> Result<()> {
        if self.is_stopped() {
            return Err(StoreError::SessionLost);
        }
        Ok(())
    }
}

impl Default for MemoryEnsemble {
    fn default() -> Self {
        Self::new()
    }
}

impl Shared {
    fn allocate_session(&mut self) -> u64 {
        let id = self.next_session;
        self.next_session += 1;
        id
    }

    /// Drops a session: its watches end, its ephemerals are deleted, and
    /// surviving watchers are told about the deletions.
    fn end_session(&mut self, session: u64) {
        self.watchers.retain(|w| w.session != session);

        let doomed: Vec<String> = self
            .nodes
            .iter()
            .filter(|(_, rec)| rec.owner == Some(session))
            .map(|(path, _)| path.clone())
            .collect();
        for path in doomed {
            self.nodes.remove(&path);
            if let Some((parent, name)) = parent_and_name(&path) {
                let event = ChildEvent::Removed {
                    name: name.to_string(),
                };
                self.notify(parent, &event);
            }
        }
    }

    fn notify(&mut self, parent: &str, event: &ChildEvent) {
        // A failed send means the receiver is gone; drop the watcher.
        self.watchers
            .retain(|w| w.parent != parent || w.tx.send(event.clone()).is_ok());
    }

    fn children_of(&self, parent: &str) -> Vec<ChildNode> {
        self.nodes
            .iter()
            .filter(|(path, _)| parent_and_name(path).map(|(p, _)| p) == Some(parent))
            .map(|(path, rec)| ChildNode {
                name: parent_and_name(path)
                    .map(|(_, n)| n.to_string())
                    .unwrap_or_default(),
                data: rec.data.clone(),
            })
            .collect()
    }
}

fn parent_and_name(path: &str) -> Option<(&str, &str)> {
    path.rsplit_once('/').filter(|(parent, _)| !parent.is_empty())
}

#[async_trait]
impl CoordinationStore for MemoryEnsemble {
    async fn ensure_path(&self, path: &str) -> Result<()> {
        self.check_live()?;
        let mut s = self.shared.lock().expect("ensemble lock poisoned");
        let mut prefix = String::new();
        for segment in path.split('/').filter(|seg| !seg.is_empty()) {
            prefix.push('/');
            prefix.push_str(segment);
            s.paths.insert(prefix.clone());
        }
        Ok(())
    }

    async fn create_ephemeral(&self, path: &str, data: &[u8]) -> Result<()> {
        self.check_live()?;
        let mut s = self.shared.lock().expect("ensemble lock poisoned");
        let (parent, name) =
            parent_and_name(path).ok_or_else(|| StoreError::NoNode(path.to_string()))?;
        if !s.paths.contains(parent) {
            return Err(StoreError::NoNode(parent.to_string()));
        }
        if s.nodes.contains_key(path) {
            return Err(StoreError::NodeExists(path.to_string()));
        }
        s.nodes.insert(
            path.to_string(),
            NodeRecord {
                data: data.to_vec(),
                owner: Some(self.session.load(Ordering::SeqCst)),
            },
        );
        let event = ChildEvent::Added {
            name: name.to_string(),
            data: data.to_vec(),
        };
        s.notify(parent, &event);
        Ok(())
    }

    async fn set_data(&self, path: &str, data: &[u8]) -> Result<()> {
        self.check_live()?;
        let mut s = self.shared.lock().expect("ensemble lock poisoned");
        match s.nodes.get_mut(path) {
            Some(rec) => rec.data = data.to_vec(),
            None => return Err(StoreError::NoNode(path.to_string())),
        }
        if let Some((parent, name)) = parent_and_name(path) {
            let event = ChildEvent::Updated {
                name: name.to_string(),
                data: data.to_vec(),
            };
            s.notify(parent, &event);
        }
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        self.check_live()?;
        let mut s = self.shared.lock().expect("ensemble lock poisoned");
        if s.nodes.remove(path).is_none() {
            return Err(StoreError::NoNode(path.to_string()));
        }
        if let Some((parent, name)) = parent_and_name(path) {
            let event = ChildEvent::Removed {
                name: name.to_string(),
            };
            s.notify(parent, &event);
        }
        Ok(())
    }

    async fn get_data(&self, path: &str) -> Result<Vec<u8>> {
        self.check_live()?;
        let s = self.shared.lock().expect("ensemble lock poisoned");
        s.nodes
            .get(path)
            .map(|rec| rec.data.clone())
            .ok_or_else(|| StoreError::NoNode(path.to_string()))
    }

    async fn watch_children(&self, path: &str) -> Result<ChildWatch> {
        self.check_live()?;
        let mut s = self.shared.lock().expect("ensemble lock poisoned");
        let (tx, rx) = mpsc::unbounded_channel();
        let children = s.children_of(path);
        s.watchers.push(Watcher {
            parent: path.to_string(),
            session: self.session.load(Ordering::SeqCst),
            tx,
        });
        Ok(ChildWatch {
            children,
            events: rx,
        })
    }

    async fn shutdown(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut s = self.shared.lock().expect("ensemble lock poisoned");
        s.end_session(self.session.load(Ordering::SeqCst));
    }
}
