//! Server lifecycle: bind, register, publish, serve, shut down.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use roster_common::auth::AuthConfig;
use roster_common::host::{Host, HostMetadata};
use roster_common::protocol::error::Result;
use roster_common::protocol::{Request, Response};
use roster_common::transport::RpcListener;
use roster_store::CoordinationStore;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::load::{LoadQueue, QuarantineFlag};
use crate::publisher::LoadPublisher;
use crate::quarantine::QuarantineController;
use crate::registration::register;
use crate::service::RpcService;
use crate::settings::ServerSettings;

/// A running Roster server: an RPC listener registered under a discovery
/// path, with a debounced load publisher keeping the registration node
/// fresh.
///
/// The handle is the only owner of the background tasks; they hold value
/// copies of the host identity, node path, and store handle, never a
/// reference back to the server.
pub struct RosterServer {
    host: Host,
    node_path: String,
    queue: LoadQueue,
    controller: QuarantineController,
    store: Arc<dyn CoordinationStore>,
    shutdown_tx: watch::Sender<bool>,
    acceptor: JoinHandle<()>,
    publisher: JoinHandle<()>,
    supervisor: JoinHandle<()>,
}

impl RosterServer {
    /// Starts a server:
    ///
    /// 1. binds the RPC listener (resolving the concrete port when 0 was
    ///    requested),
    /// 2. registers the ephemeral host node (load 0, not quarantined),
    ///    deleting any stale node at the same key first,
    /// 3. spawns the accept loop and the load publisher.
    pub async fn start(settings: ServerSettings) -> Result<Self> {
        settings.validate()?;
        let samples = settings.queue.take_receiver().ok_or_else(|| {
            roster_common::RosterError::InvalidSettings(
                "load queue is already consumed by another server".to_string(),
            )
        })?;

        let bind_addr = format!("{}:{}", settings.address, settings.port);
        let listener =
            RpcListener::bind(&bind_addr, settings.tls.as_ref(), settings.max_message_size).await?;
        let port = listener.local_addr()?.port();
        let host = Host::new(settings.address.clone(), port);

        let node_path = register(settings.store.as_ref(), &settings.discovery_path, &host).await?;
        info!(node = %node_path, "server registered");

        let registry: Arc<HashMap<String, Arc<dyn RpcService>>> = Arc::new(
            settings
                .services
                .iter()
                .map(|service| (service.name().to_string(), Arc::clone(service)))
                .collect(),
        );
        let auth = settings.auth.clone();
        let handler = move |request: Request| {
            let registry = Arc::clone(&registry);
            let auth = auth.clone();
            async move { dispatch(&registry, &auth, request).await }
        };

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let rpc_limit = settings
            .worker_threads
            .map(|workers| Arc::new(Semaphore::new(workers)));
        let acceptor = tokio::spawn(listener.serve(handler, shutdown_rx, rpc_limit));

        let last_load = Arc::new(AtomicI32::new(0));
        let (resync_tx, resync_rx) = mpsc::unbounded_channel();
        let publisher = LoadPublisher {
            address: host.address.clone(),
            port: host.port,
            node_path: node_path.clone(),
            store: Arc::clone(&settings.store),
            quarantine: settings.quarantined.clone(),
            last_load: Arc::clone(&last_load),
            interval: settings.load_update_interval,
            resync_tx,
        }
        .spawn(samples);

        let supervisor = tokio::spawn(resync_loop(
            Arc::clone(&settings.store),
            settings.discovery_path.clone(),
            host.clone(),
            settings.quarantined.clone(),
            Arc::clone(&last_load),
            resync_rx,
        ));

        let controller = QuarantineController {
            address: host.address.clone(),
            port: host.port,
            node_path: node_path.clone(),
            store: Arc::clone(&settings.store),
            flag: settings.quarantined.clone(),
            last_load,
        };

        Ok(Self {
            host,
            node_path,
            queue: settings.queue,
            controller,
            store: settings.store,
            shutdown_tx,
            acceptor,
            publisher,
            supervisor,
        })
    }

    /// The resolved host identity (concrete port included).
    pub fn host(&self) -> &Host {
        &self.host
    }

    /// Full path of this server's registration node.
    pub fn node_path(&self) -> &str {
        &self.node_path
    }

    /// Enqueues a load sample for debounced publication.
    pub fn assign_load(&self, load: i32) {
        self.queue.push(load);
    }

    /// Marks this server as quarantined: the registration node advertises
    /// the state immediately and load publication pauses until
    /// [`exit_quarantine`](Self::exit_quarantine).
    pub async fn enter_quarantine(&self) -> Result<()> {
        self.controller.enter().await
    }

    pub async fn exit_quarantine(&self) -> Result<()> {
        self.controller.exit().await
    }

    /// Graceful shutdown: cancels the publisher (pending debounced values
    /// are discarded), stops accepting, waits for in-flight RPCs, then
    /// closes the coordination client - which is what makes the ephemeral
    /// registration disappear.
    pub async fn shutdown(self) {
        self.publisher.abort();
        self.supervisor.abort();

        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.acceptor.await {
            if !e.is_cancelled() {
                warn!(error = %e, "accept loop ended abnormally");
            }
        }

        self.store.shutdown().await;
        info!(node = %self.node_path, "server shut down");
    }
}

async fn dispatch(
    registry: &HashMap<String, Arc<dyn RpcService>>,
    auth: &AuthConfig,
    request: Request,
) -> Response {
    let id = request.id;

    if !auth.validate_token(request.auth_token.as_deref()) {
        warn!(method = %request.method, "rejected unauthenticated request");
        return Response::error(id, "unauthorized");
    }

    let Some((service_name, method)) = request.target() else {
        return Response::error(
            id,
            format!("invalid method '{}', expected \"Service/method\"", request.method),
        );
    };
    let Some(service) = registry.get(service_name) else {
        return Response::error(id, format!("unknown service '{}'", service_name));
    };

    let method = method.to_string();
    match service.call(&method, request.args).await {
        Ok(result) => Response::success(id, result),
        Err(e) => Response::error(id, e.to_string()),
    }
}

/// Re-creates the registration node when the publisher reports it gone
/// (session expiry). The fresh payload carries the last published load and
/// the live quarantine flag.
async fn resync_loop(
    store: Arc<dyn CoordinationStore>,
    discovery_path: String,
    identity: Host,
    quarantine: QuarantineFlag,
    last_load: Arc<AtomicI32>,
    mut resync_rx: UnboundedReceiver<()>,
) {
    while resync_rx.recv().await.is_some() {
        let host = Host::with_metadata(
            identity.address.clone(),
            identity.port,
            HostMetadata {
                load: last_load.load(Ordering::SeqCst),
                quarantined: quarantine.is_set(),
            },
        );
        match register(store.as_ref(), &discovery_path, &host).await {
            Ok(path) => info!(node = %path, "re-registered after session loss"),
            Err(e) => warn!(error = %e, "re-registration failed"),
        }
        // Collapse signals that piled up while we were re-registering.
        while resync_rx.try_recv().is_ok() {}
    }
}
