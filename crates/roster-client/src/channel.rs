//! Client channel lifecycle: mirror, picker, and subchannel wiring.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use roster_common::host::Host;
use roster_common::protocol::error::{Result, RosterError};
use roster_common::protocol::Request;
use roster_common::transport::{RpcTransport, TlsMaterial};
use roster_store::CoordinationStore;
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_rustls::TlsConnector;
use tracing::{debug, info};

use crate::mirror::MembershipMirror;
use crate::picker::WeightedPicker;
use crate::settings::{ChannelSettings, LbPolicy, RetryConfig};
use crate::subchannel::Subchannel;

type SubchannelMap = Arc<RwLock<HashMap<String, Arc<Subchannel>>>>;

/// A client channel over a discovery path.
///
/// The channel mirrors the registration directory, keeps one lazily
/// connected subchannel per live host, and routes every
/// [`call`](Self::call) through the weighted picker against the freshest
/// membership snapshot. Transient transport failures are retried with
/// exponential backoff; `NoReadyEndpoint` is returned to the caller
/// immediately.
pub struct RosterChannel {
    mirror: MembershipMirror,
    picker: WeightedPicker,
    subchannels: SubchannelMap,
    reconciler: JoinHandle<()>,
    transport: RpcTransport,
    tls: Option<TlsConnector>,
    auth_token: Option<String>,
    retry: RetryConfig,
    store: Arc<dyn CoordinationStore>,
    owns_store: bool,
}

impl RosterChannel {
    /// Builds a channel against `settings.service_discovery_path`.
    pub async fn of(settings: ChannelSettings) -> Result<Self> {
        settings.validate()?;
        let LbPolicy::RoundRobinWeighted = settings.lb_policy;

        let tls = settings.tls.as_ref().map(TlsMaterial::connector).transpose()?;
        let transport = RpcTransport::new(settings.max_message_size);

        let mirror = MembershipMirror::start(
            Arc::clone(&settings.store),
            settings.service_discovery_path.clone(),
        );

        let subchannels: SubchannelMap = Arc::new(RwLock::new(HashMap::new()));
        let reconciler = tokio::spawn(reconcile_loop(
            mirror.subscribe(),
            mirror_snapshot_fn(&mirror),
            Arc::clone(&subchannels),
            transport.clone(),
            tls.clone(),
        ));

        info!(path = %settings.service_discovery_path, "channel started");
        Ok(Self {
            mirror,
            picker: WeightedPicker::new(),
            subchannels,
            reconciler,
            transport,
            tls,
            auth_token: settings.auth_token,
            retry: settings.retry,
            store: settings.store,
            owns_store: settings.owns_store,
        })
    }

    /// Issues one RPC; `method` addresses a server service as
    /// `"Service/method"`.
    pub async fn call(&self, method: impl Into<String>, args: Value) -> Result<Value> {
        let method = method.into();
        let mut last_error = None;

        for attempt in 1..=self.retry.max_attempts {
            if attempt > 1 {
                debug!(attempt, method = %method, "retrying RPC call");
            }

            match self.try_call(&method, args.clone()).await {
                Ok(result) => return Ok(result),
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => {
                    last_error = Some(e);
                    if attempt < self.retry.max_attempts {
                        tokio::time::sleep(self.retry.calculate_delay(attempt)).await;
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            RosterError::Connection("all retry attempts exhausted".to_string())
        }))
    }

    async fn try_call(&self, method: &str, args: Value) -> Result<Value> {
        // Always pick from the latest snapshot; nothing is cached across
        // RPCs.
        let snapshot = self.mirror.snapshot();
        let host = self.picker.pick(&snapshot)?;
        let subchannel = self.subchannel_for(&host);

        let mut request = Request::new(method, args);
        if let Some(token) = &self.auth_token {
            request = request.with_auth_token(token);
        }

        let response = subchannel.call(&request).await?;
        if response.success {
            response.result.ok_or_else(|| {
                RosterError::Service("missing result in success response".to_string())
            })
        } else {
            Err(RosterError::Service(
                response
                    .error
                    .unwrap_or_else(|| "unknown error".to_string()),
            ))
        }
    }

    /// Looks up the picked host's subchannel, creating it when the
    /// reconciler has not caught up with the snapshot yet.
    fn subchannel_for(&self, host: &Host) -> Arc<Subchannel> {
        let name = host.node_name();
        if let Some(subchannel) = self
            .subchannels
            .read()
            .expect("subchannel lock poisoned")
            .get(&name)
        {
            return Arc::clone(subchannel);
        }

        let mut map = self.subchannels.write().expect("subchannel lock poisoned");
        Arc::clone(map.entry(name).or_insert_with(|| {
            Arc::new(Subchannel::new(host, self.transport.clone(), self.tls.clone()))
        }))
    }

    /// Tears down the mirror and all subchannels; in-flight RPCs finish on
    /// their own `Arc` handles. When the settings marked the store client
    /// as channel-owned it is closed as well.
    pub async fn shutdown(self) {
        self.reconciler.abort();
        self.mirror.shutdown();

        let drained: Vec<_> = self
            .subchannels
            .write()
            .expect("subchannel lock poisoned")
            .drain()
            .collect();
        for (_, subchannel) in drained {
            subchannel.close();
        }

        if self.owns_store {
            self.store.shutdown().await;
        }
        info!("channel shut down");
    }
}

/// Snapshot accessor the reconciler can own without borrowing the mirror.
fn mirror_snapshot_fn(mirror: &MembershipMirror) -> impl Fn() -> Vec<Host> + Send + 'static {
    let hosts = mirror.hosts_handle();
    move || {
        hosts
            .read()
            .expect("mirror lock poisoned")
            .values()
            .cloned()
            .collect()
    }
}

/// Keeps one subchannel per mirrored host: creates entries for new hosts
/// (connections stay lazy) and closes entries whose host left.
async fn reconcile_loop(
    mut version_rx: tokio::sync::watch::Receiver<u64>,
    snapshot: impl Fn() -> Vec<Host> + Send + 'static,
    subchannels: SubchannelMap,
    transport: RpcTransport,
    tls: Option<TlsConnector>,
) {
    loop {
        let hosts = snapshot();
        let live: HashSet<String> = hosts.iter().map(Host::node_name).collect();

        {
            let mut map = subchannels.write().expect("subchannel lock poisoned");
            let stale: Vec<String> = map
                .keys()
                .filter(|name| !live.contains(*name))
                .cloned()
                .collect();
            for name in stale {
                if let Some(subchannel) = map.remove(&name) {
                    subchannel.close();
                    debug!(endpoint = %name, "removed subchannel for departed host");
                }
            }
            for host in &hosts {
                map.entry(host.node_name()).or_insert_with(|| {
                    Arc::new(Subchannel::new(host, transport.clone(), tls.clone()))
                });
            }
        }

        if version_rx.changed().await.is_err() {
            return;
        }
    }
}
