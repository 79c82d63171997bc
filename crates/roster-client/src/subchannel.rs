use std::sync::atomic::{AtomicBool, Ordering};

use roster_common::host::Host;
use roster_common::protocol::error::{Result, RosterError};
use roster_common::protocol::{Request, Response};
use roster_common::transport::tls::server_name;
use roster_common::transport::{AsyncStream, RpcTransport};
use tokio::sync::Mutex;
use tokio_rustls::TlsConnector;
use tracing::debug;

/// One client-side connection slot to a single server endpoint.
///
/// The connection is established lazily on the first RPC and reused across
/// requests; a transport failure drops it and the next call reconnects.
/// `close` marks the subchannel for removal without interrupting a call in
/// flight - the caller still holds its `Arc` and the connection lock, and
/// only future calls are refused.
pub(crate) struct Subchannel {
    address: String,
    port: u16,
    transport: RpcTransport,
    tls: Option<TlsConnector>,
    conn: Mutex<Option<Box<dyn AsyncStream>>>,
    closed: AtomicBool,
}

impl Subchannel {
    pub(crate) fn new(host: &Host, transport: RpcTransport, tls: Option<TlsConnector>) -> Self {
        Self {
            address: host.address.clone(),
            port: host.port,
            transport,
            tls,
            conn: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    pub(crate) async fn call(&self, request: &Request) -> Result<Response> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(RosterError::Connection(format!(
                "subchannel to {}:{} is shut down",
                self.address, self.port
            )));
        }

        let mut conn = self.conn.lock().await;
        let mut stream = match conn.take() {
            Some(stream) => stream,
            None => self.connect().await?,
        };

        match self.transport.send_request(&mut stream, request).await {
            Ok(response) => {
                *conn = Some(stream);
                Ok(response)
            }
            // The stream state is unknown after a failure; drop it and let
            // the next call reconnect.
            Err(e) => Err(e),
        }
    }

    async fn connect(&self) -> Result<Box<dyn AsyncStream>> {
        let addr = format!("{}:{}", self.address, self.port);
        let tcp = self.transport.connect(&addr).await?;
        debug!(endpoint = %addr, "subchannel connected");

        match &self.tls {
            Some(connector) => {
                let name = server_name(&self.address)?;
                let tls_stream = connector.connect(name, tcp).await.map_err(|e| {
                    RosterError::Connection(format!("TLS handshake with {} failed: {}", addr, e))
                })?;
                Ok(Box::new(tls_stream))
            }
            None => Ok(Box::new(tcp)),
        }
    }

    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        debug!(endpoint = %format_args!("{}:{}", self.address, self.port), "subchannel closed");
    }
}
