//! Debounced load publication.
//!
//! The publisher turns a bursty stream of load samples into at most one
//! store write per quiet window: as long as samples keep arriving with
//! gaps shorter than the window, publication is deferred and the latest
//! value wins; once the queue has been quiet for a full window, that value
//! is written into the server's registration node.

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use roster_common::host::{Host, HostMetadata};
use roster_store::{CoordinationStore, StoreError};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::load::QuarantineFlag;

pub(crate) struct LoadPublisher {
    pub address: String,
    pub port: u16,
    pub node_path: String,
    pub store: Arc<dyn CoordinationStore>,
    pub quarantine: QuarantineFlag,
    /// Last load successfully written; the quarantine controller preserves
    /// it in its own writes.
    pub last_load: Arc<AtomicI32>,
    pub interval: Duration,
    /// Signals the server's supervisor that the registration node is gone
    /// and must be re-created.
    pub resync_tx: UnboundedSender<()>,
}

impl LoadPublisher {
    /// Runs until cancelled or the sample queue closes. Safe to abort at
    /// any suspension point: `set_data` is atomic on a single node, so no
    /// partial payload can be left behind.
    pub(crate) fn spawn(self, samples: UnboundedReceiver<i32>) -> JoinHandle<()> {
        tokio::spawn(self.run(samples))
    }

    async fn run(self, mut samples: UnboundedReceiver<i32>) {
        loop {
            let Some(mut latest) = samples.recv().await else {
                return;
            };

            // Absorb the burst: each arrival inside the window restarts it.
            loop {
                match tokio::time::timeout(self.interval, samples.recv()).await {
                    Ok(Some(sample)) => latest = sample,
                    // Queue closed mid-burst; the pending value is discarded.
                    Ok(None) => return,
                    // Quiet for a full window.
                    Err(_) => break,
                }
            }

            self.publish(latest).await;
        }
    }

    async fn publish(&self, load: i32) {
        if self.quarantine.is_set() {
            debug!(load, "quarantined, skipping load publication");
            return;
        }

        let host = Host::with_metadata(
            self.address.clone(),
            self.port,
            HostMetadata {
                load,
                quarantined: false,
            },
        );

        // Best-effort: any failure is logged and the next emitted value
        // tries again.
        match self.store.set_data(&self.node_path, &host.to_bytes()).await {
            Ok(()) => {
                self.last_load.store(load, Ordering::SeqCst);
                debug!(load, node = %self.node_path, "published load");
            }
            Err(e @ (StoreError::NoNode(_) | StoreError::SessionLost)) => {
                warn!(error = %e, node = %self.node_path, "registration node gone, requesting re-registration");
                let _ = self.resync_tx.send(());
            }
            Err(e) => {
                warn!(error = %e, node = %self.node_path, "failed to publish load");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use roster_store::{ChildWatch, MemoryEnsemble, Result as StoreResult};
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::mpsc;

    /// Delegating store that counts `set_data` calls.
    struct CountingStore {
        inner: MemoryEnsemble,
        writes: AtomicUsize,
    }

    impl CountingStore {
        fn new(inner: MemoryEnsemble) -> Arc<Self> {
            Arc::new(Self {
                inner,
                writes: AtomicUsize::new(0),
            })
        }

        fn writes(&self) -> usize {
            self.writes.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl CoordinationStore for CountingStore {
        async fn ensure_path(&self, path: &str) -> StoreResult<()> {
            self.inner.ensure_path(path).await
        }
        async fn create_ephemeral(&self, path: &str, data: &[u8]) -> StoreResult<()> {
            self.inner.create_ephemeral(path, data).await
        }
        async fn set_data(&self, path: &str, data: &[u8]) -> StoreResult<()> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            self.inner.set_data(path, data).await
        }
        async fn delete(&self, path: &str) -> StoreResult<()> {
            self.inner.delete(path).await
        }
        async fn get_data(&self, path: &str) -> StoreResult<Vec<u8>> {
            self.inner.get_data(path).await
        }
        async fn watch_children(&self, path: &str) -> StoreResult<ChildWatch> {
            self.inner.watch_children(path).await
        }
        async fn shutdown(&self) {
            self.inner.shutdown().await
        }
    }

    struct Fixture {
        store: Arc<CountingStore>,
        ensemble: MemoryEnsemble,
        quarantine: QuarantineFlag,
        last_load: Arc<AtomicI32>,
        samples_tx: mpsc::UnboundedSender<i32>,
        handle: JoinHandle<()>,
    }

    async fn start_publisher(interval: Duration) -> Fixture {
        let ensemble = MemoryEnsemble::new();
        ensemble.ensure_path("/disc").await.unwrap();
        ensemble
            .create_ephemeral("/disc/10.0.0.1:9000", &Host::new("10.0.0.1", 9000).to_bytes())
            .await
            .unwrap();

        let store = CountingStore::new(ensemble.clone());
        let quarantine = QuarantineFlag::new();
        let last_load = Arc::new(AtomicI32::new(0));
        let (samples_tx, samples_rx) = mpsc::unbounded_channel();
        let (resync_tx, _resync_rx) = mpsc::unbounded_channel();

        let publisher = LoadPublisher {
            address: "10.0.0.1".to_string(),
            port: 9000,
            node_path: "/disc/10.0.0.1:9000".to_string(),
            store: store.clone(),
            quarantine: quarantine.clone(),
            last_load: last_load.clone(),
            interval,
            resync_tx,
        };
        let handle = publisher.spawn(samples_rx);

        Fixture {
            store,
            ensemble,
            quarantine,
            last_load,
            samples_tx,
            handle,
        }
    }

    async fn stored_host(ensemble: &MemoryEnsemble) -> Host {
        let bytes = ensemble.get_data("/disc/10.0.0.1:9000").await.unwrap();
        Host::from_bytes(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_burst_collapses_to_one_write_with_last_value() {
        let fx = start_publisher(Duration::from_millis(40)).await;

        for sample in [1, 2, 3, 4, 5] {
            fx.samples_tx.send(sample).unwrap();
        }
        tokio::time::sleep(Duration::from_millis(150)).await;

        assert_eq!(fx.store.writes(), 1);
        assert_eq!(stored_host(&fx.ensemble).await.metadata.load, 5);
        assert_eq!(fx.last_load.load(Ordering::SeqCst), 5);
        fx.handle.abort();
    }

    #[tokio::test]
    async fn test_separated_samples_each_publish() {
        let fx = start_publisher(Duration::from_millis(20)).await;

        fx.samples_tx.send(10).unwrap();
        tokio::time::sleep(Duration::from_millis(80)).await;
        fx.samples_tx.send(20).unwrap();
        tokio::time::sleep(Duration::from_millis(80)).await;

        assert_eq!(fx.store.writes(), 2);
        assert_eq!(stored_host(&fx.ensemble).await.metadata.load, 20);
        fx.handle.abort();
    }

    #[tokio::test]
    async fn test_quarantine_suppresses_writes() {
        let fx = start_publisher(Duration::from_millis(20)).await;

        fx.quarantine.swap(true);
        fx.samples_tx.send(42).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(fx.store.writes(), 0);
        assert_eq!(stored_host(&fx.ensemble).await.metadata.load, 0);

        // Released: the next sample publishes again.
        fx.quarantine.swap(false);
        fx.samples_tx.send(7).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(fx.store.writes(), 1);
        assert_eq!(stored_host(&fx.ensemble).await.metadata.load, 7);
        fx.handle.abort();
    }

    #[tokio::test]
    async fn test_missing_node_requests_resync() {
        let ensemble = MemoryEnsemble::new();
        ensemble.ensure_path("/disc").await.unwrap();
        // No registration node exists.
        let store = CountingStore::new(ensemble.clone());
        let (samples_tx, samples_rx) = mpsc::unbounded_channel();
        let (resync_tx, mut resync_rx) = mpsc::unbounded_channel();

        let publisher = LoadPublisher {
            address: "10.0.0.1".to_string(),
            port: 9000,
            node_path: "/disc/10.0.0.1:9000".to_string(),
            store,
            quarantine: QuarantineFlag::new(),
            last_load: Arc::new(AtomicI32::new(0)),
            interval: Duration::from_millis(10),
            resync_tx,
        };
        let handle = publisher.spawn(samples_rx);

        samples_tx.send(3).unwrap();
        assert!(resync_rx.recv().await.is_some());
        handle.abort();
    }

    #[tokio::test]
    async fn test_queue_close_discards_pending_value() {
        let fx = start_publisher(Duration::from_millis(50)).await;

        fx.samples_tx.send(99).unwrap();
        drop(fx.samples_tx);
        tokio::time::sleep(Duration::from_millis(120)).await;

        // The publisher exited without flushing the pending sample.
        assert!(fx.handle.is_finished());
        assert_eq!(fx.store.writes(), 0);
    }
}
