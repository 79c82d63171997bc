//! Quarantine state transitions.
//!
//! Entering or leaving quarantine flips the shared flag first, then writes
//! the new state into the registration node. The flag flip is the ordering
//! fence: once `enter` returns, every load sample the publisher emits
//! afterwards observes the flag as set and is suppressed, so the store
//! keeps advertising the last load written before quarantine began.

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use roster_common::host::{Host, HostMetadata};
use roster_common::protocol::error::Result;
use roster_store::CoordinationStore;
use tracing::info;

use crate::load::QuarantineFlag;

pub(crate) struct QuarantineController {
    pub address: String,
    pub port: u16,
    pub node_path: String,
    pub store: Arc<dyn CoordinationStore>,
    pub flag: QuarantineFlag,
    pub last_load: Arc<AtomicI32>,
}

impl QuarantineController {
    pub(crate) async fn enter(&self) -> Result<()> {
        self.transition(true).await
    }

    pub(crate) async fn exit(&self) -> Result<()> {
        self.transition(false).await
    }

    /// Concurrent transitions serialize on the atomic flag; the last writer
    /// wins both in memory and in the store.
    async fn transition(&self, quarantined: bool) -> Result<()> {
        let previous = self.flag.swap(quarantined);
        if previous != quarantined {
            info!(quarantined, node = %self.node_path, "quarantine state changed");
        }

        let host = Host::with_metadata(
            self.address.clone(),
            self.port,
            HostMetadata {
                load: self.last_load.load(Ordering::SeqCst),
                quarantined,
            },
        );
        self.store.set_data(&self.node_path, &host.to_bytes()).await?;
        Ok(())
    }
}
