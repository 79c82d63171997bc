use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::protocol::error::{Result, RosterError};
use crate::protocol::{Request, Response};
use crate::transport::codec::JsonCodec;
use crate::transport::tcp::{AsyncStream, RpcTransport};
use crate::transport::tls::TlsMaterial;
use tokio_rustls::TlsAcceptor;

/// Async RPC listener.
///
/// Accepts connections and spawns one task per connection; each connection
/// serves multiple requests (keep-alive) until the peer closes or shutdown
/// is signalled. TLS material, when present, wraps every accepted stream
/// before any frame is read.
pub struct RpcListener {
    listener: TcpListener,
    tls: Option<TlsAcceptor>,
    transport: RpcTransport,
}

impl RpcListener {
    /// Binds to `bind_addr`, building the TLS acceptor up front so bad
    /// material fails startup rather than the first connection.
    pub async fn bind(
        bind_addr: &str,
        tls: Option<&TlsMaterial>,
        max_message_size: usize,
    ) -> Result<Self> {
        let listener = TcpListener::bind(bind_addr).await.map_err(|e| {
            RosterError::Connection(format!("failed to bind to {}: {}", bind_addr, e))
        })?;
        let tls = tls.map(TlsMaterial::acceptor).transpose()?;

        Ok(Self {
            listener,
            tls,
            transport: RpcTransport::new(max_message_size),
        })
    }

    /// The actual bound address (relevant when binding port 0).
    pub fn local_addr(&self) -> Result<std::net::SocketAddr> {
        self.listener
            .local_addr()
            .map_err(|e| RosterError::Connection(format!("failed to get local addr: {}", e)))
    }

    /// Accept loop. Returns once `shutdown` flips to true and every
    /// in-flight connection has wound down.
    ///
    /// `rpc_limit`, when present, bounds the number of concurrently
    /// executing requests across all connections.
    pub async fn serve<F, Fut>(
        self,
        handler: F,
        shutdown: watch::Receiver<bool>,
        rpc_limit: Option<Arc<Semaphore>>,
    ) where
        F: Fn(Request) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Response> + Send + 'static,
    {
        let handler = Arc::new(handler);
        let mut connections = JoinSet::new();
        let mut accept_shutdown = shutdown.clone();

        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, peer_addr)) => {
                            debug!(peer = %peer_addr, "connection established");
                            self.spawn_connection(
                                &mut connections,
                                stream,
                                handler.clone(),
                                shutdown.clone(),
                                rpc_limit.clone(),
                            );
                        }
                        Err(e) => warn!(error = %e, "failed to accept connection"),
                    }
                }
                changed = accept_shutdown.changed() => {
                    if changed.is_err() || *accept_shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        // Stop accepting, then let in-flight connections finish; each one
        // observes the same shutdown signal between requests.
        drop(self.listener);
        while connections.join_next().await.is_some() {}
    }

    fn spawn_connection<F, Fut>(
        &self,
        connections: &mut JoinSet<()>,
        stream: TcpStream,
        handler: Arc<F>,
        shutdown: watch::Receiver<bool>,
        rpc_limit: Option<Arc<Semaphore>>,
    ) where
        F: Fn(Request) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Response> + Send + 'static,
    {
        let transport = self.transport.clone();
        match &self.tls {
            Some(acceptor) => {
                let acceptor = acceptor.clone();
                connections.spawn(async move {
                    match acceptor.accept(stream).await {
                        Ok(tls_stream) => {
                            if let Err(e) =
                                handle_connection(tls_stream, handler, transport, shutdown, rpc_limit)
                                    .await
                            {
                                debug!(error = %e, "connection closed with error");
                            }
                        }
                        Err(e) => warn!(error = %e, "TLS handshake failed"),
                    }
                });
            }
            None => {
                connections.spawn(async move {
                    if let Err(e) =
                        handle_connection(stream, handler, transport, shutdown, rpc_limit).await
                    {
                        debug!(error = %e, "connection closed with error");
                    }
                });
            }
        }
    }
}

/// Serves requests on one connection until the peer closes it or shutdown
/// is signalled between frames.
async fn handle_connection<S, F, Fut>(
    mut stream: S,
    handler: Arc<F>,
    transport: RpcTransport,
    mut shutdown: watch::Receiver<bool>,
    rpc_limit: Option<Arc<Semaphore>>,
) -> Result<()>
where
    S: AsyncStream,
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Response> + Send + 'static,
{
    loop {
        let frame = tokio::select! {
            received = transport.receive_message(&mut stream) => received,
            _ = shutdown.changed() => return Ok(()),
        };

        let buf = match frame {
            Ok(buf) => buf,
            Err(RosterError::Io(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                // Peer closed between frames.
                return Ok(());
            }
            Err(e @ RosterError::MessageTooLarge { .. }) => {
                // Tell the peer why before hanging up; the stream position
                // is unrecoverable past an oversize prefix.
                let rejection = Response::error(0, e.to_string());
                let _ = send_response(&mut stream, &rejection).await;
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        let request = match JsonCodec::decode_request(&buf) {
            Ok(request) => request,
            Err(e) => {
                debug!(error = %e, "failed to decode request");
                let rejection = Response::error(0, e.to_string());
                send_response(&mut stream, &rejection).await?;
                continue;
            }
        };

        // Worker-pool bound: hold a permit for the duration of the call.
        let _permit = match &rpc_limit {
            Some(semaphore) => semaphore.acquire().await.ok(),
            None => None,
        };

        let response = handler(request).await;
        send_response(&mut stream, &response).await?;
    }
}

/// Writes a response frame directly, without consulting the size limit:
/// responses are server-authored, and in particular the oversize rejection
/// must go out even when the limit is tiny. Clients still enforce their own
/// receive limit.
async fn send_response<S: AsyncStream>(stream: &mut S, response: &Response) -> Result<()> {
    use tokio::io::AsyncWriteExt;

    let encoded = JsonCodec::encode_response(response)?;
    let len = encoded.len() as u32;
    stream
        .write_all(&len.to_be_bytes())
        .await
        .map_err(|e| crate::transport::tcp::map_io_error(e, "writing response length"))?;
    stream
        .write_all(&encoded)
        .await
        .map_err(|e| crate::transport::tcp::map_io_error(e, "writing response data"))?;
    stream
        .flush()
        .await
        .map_err(|e| crate::transport::tcp::map_io_error(e, "flushing response"))?;
    Ok(())
}
