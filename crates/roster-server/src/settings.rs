use std::sync::Arc;
use std::time::Duration;

use roster_common::auth::AuthConfig;
use roster_common::protocol::error::{Result, RosterError};
use roster_common::transport::{TlsMaterial, DEFAULT_MAX_MESSAGE_SIZE};
use roster_store::CoordinationStore;

use crate::load::{LoadQueue, QuarantineFlag};
use crate::service::RpcService;

/// Default debounce window for load publication.
pub const DEFAULT_LOAD_UPDATE_INTERVAL: Duration = Duration::from_millis(100);

/// Configuration for [`crate::RosterServer::start`].
///
/// The queue and quarantine flag are handles: callers may keep clones to
/// feed load samples or observe quarantine from outside the server. The
/// server takes ownership of the coordination client and closes it on
/// shutdown (which is what deletes the ephemeral registration), so hand
/// each server its own client handle.
pub struct ServerSettings {
    pub discovery_path: String,
    pub address: String,
    /// Port to bind; 0 binds an ephemeral port and the resolved port
    /// becomes part of the host identity.
    pub port: u16,
    pub services: Vec<Arc<dyn RpcService>>,
    pub tls: Option<TlsMaterial>,
    pub auth: AuthConfig,
    /// Bound on concurrently executing RPCs; `None` is unbounded.
    pub worker_threads: Option<usize>,
    pub load_update_interval: Duration,
    pub max_message_size: usize,
    pub queue: LoadQueue,
    pub quarantined: QuarantineFlag,
    pub store: Arc<dyn CoordinationStore>,
}

impl ServerSettings {
    pub fn new(
        discovery_path: impl Into<String>,
        address: impl Into<String>,
        port: u16,
        store: Arc<dyn CoordinationStore>,
    ) -> Self {
        Self {
            discovery_path: discovery_path.into(),
            address: address.into(),
            port,
            services: Vec::new(),
            tls: None,
            auth: AuthConfig::disabled(),
            worker_threads: None,
            load_update_interval: DEFAULT_LOAD_UPDATE_INTERVAL,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            queue: LoadQueue::new(),
            quarantined: QuarantineFlag::new(),
            store,
        }
    }

    pub fn add_service(mut self, service: Arc<dyn RpcService>) -> Self {
        self.services.push(service);
        self
    }

    pub fn with_tls(mut self, tls: TlsMaterial) -> Self {
        self.tls = Some(tls);
        self
    }

    pub fn with_auth(mut self, auth: AuthConfig) -> Self {
        self.auth = auth;
        self
    }

    pub fn with_worker_threads(mut self, workers: usize) -> Self {
        self.worker_threads = Some(workers);
        self
    }

    pub fn with_load_update_interval(mut self, interval: Duration) -> Self {
        self.load_update_interval = interval;
        self
    }

    pub fn with_max_message_size(mut self, max: usize) -> Self {
        self.max_message_size = max;
        self
    }

    pub fn with_queue(mut self, queue: LoadQueue) -> Self {
        self.queue = queue;
        self
    }

    pub fn with_quarantine_flag(mut self, flag: QuarantineFlag) -> Self {
        self.quarantined = flag;
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.services.is_empty() {
            return Err(RosterError::InvalidSettings(
                "a server needs at least one service".to_string(),
            ));
        }
        if self.address.is_empty() {
            return Err(RosterError::InvalidSettings(
                "server address must not be empty".to_string(),
            ));
        }
        if !self.discovery_path.starts_with('/') {
            return Err(RosterError::InvalidSettings(format!(
                "discovery path must be absolute, got '{}'",
                self.discovery_path
            )));
        }
        if self.worker_threads == Some(0) {
            return Err(RosterError::InvalidSettings(
                "worker_threads must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
