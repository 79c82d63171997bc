use std::net::ToSocketAddrs;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::protocol::error::{Result, RosterError};
use crate::protocol::{Request, Response};
use crate::transport::codec::JsonCodec;

/// Default cap on a single RPC frame (4 MiB).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 4 * 1024 * 1024;

/// Timeout applied to in-flight requests when the request itself carries
/// none.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Any bidirectional byte stream the transport can run over - a plain
/// `TcpStream` or a TLS-wrapped one.
pub trait AsyncStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> AsyncStream for T {}

/// Async RPC transport.
///
/// # Wire Protocol
///
/// Messages are sent with a 4-byte length prefix (big-endian u32) followed
/// by the JSON-encoded data:
///
/// ```text
/// [4-byte length] [JSON data]
/// ```
///
/// The frame size cap is enforced on both send and receive so neither side
/// allocates unbounded buffers for a misbehaving peer.
#[derive(Debug, Clone)]
pub struct RpcTransport {
    max_message_size: usize,
}

impl RpcTransport {
    pub fn new(max_message_size: usize) -> Self {
        Self { max_message_size }
    }

    pub fn max_message_size(&self) -> usize {
        self.max_message_size
    }

    /// Connects to a remote endpoint, trying each resolved address until one
    /// succeeds.
    pub async fn connect(&self, addr: &str) -> Result<TcpStream> {
        let socket_addrs = addr
            .to_socket_addrs()
            .map_err(|e| RosterError::Connection(format!("invalid address '{}': {}", addr, e)))?;

        let mut last_err = None;
        for socket_addr in socket_addrs {
            match TcpStream::connect(&socket_addr).await {
                Ok(stream) => return Ok(stream),
                Err(e) => last_err = Some(e),
            }
        }

        Err(RosterError::Connection(format!(
            "failed to connect to {}: {}",
            addr,
            last_err
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no addresses resolved".to_string())
        )))
    }

    /// Sends a request and waits for the matching response.
    pub async fn send_request<S: AsyncStream>(
        &self,
        stream: &mut S,
        request: &Request,
    ) -> Result<Response> {
        let encoded = JsonCodec::encode_request(request)?;
        self.send_message(stream, &encoded).await?;

        let timeout = Duration::from_millis(
            request
                .timeout_ms
                .unwrap_or(DEFAULT_TIMEOUT.as_millis() as u64),
        );
        let response_data = tokio::time::timeout(timeout, self.receive_message(stream))
            .await
            .map_err(|_| RosterError::Timeout(timeout.as_millis() as u64))??;

        JsonCodec::decode_response(&response_data)
    }

    /// Sends one length-prefixed frame.
    pub async fn send_message<S: AsyncStream>(&self, stream: &mut S, data: &[u8]) -> Result<()> {
        if data.len() > self.max_message_size {
            return Err(RosterError::MessageTooLarge {
                size: data.len(),
                max: self.max_message_size,
            });
        }

        let len = data.len() as u32;
        stream
            .write_all(&len.to_be_bytes())
            .await
            .map_err(|e| map_io_error(e, "writing length prefix"))?;
        stream
            .write_all(data)
            .await
            .map_err(|e| map_io_error(e, "writing data"))?;
        stream
            .flush()
            .await
            .map_err(|e| map_io_error(e, "flushing stream"))?;

        Ok(())
    }

    /// Receives one length-prefixed frame.
    pub async fn receive_message<S: AsyncStream>(&self, stream: &mut S) -> Result<Vec<u8>> {
        let mut len_buf = [0u8; 4];
        stream
            .read_exact(&mut len_buf)
            .await
            .map_err(|e| map_io_error(e, "reading length prefix"))?;

        let len = u32::from_be_bytes(len_buf) as usize;
        if len > self.max_message_size {
            return Err(RosterError::MessageTooLarge {
                size: len,
                max: self.max_message_size,
            });
        }

        let mut buf = vec![0u8; len];
        stream
            .read_exact(&mut buf)
            .await
            .map_err(|e| map_io_error(e, "reading data"))?;

        Ok(buf)
    }
}

impl Default for RpcTransport {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_MESSAGE_SIZE)
    }
}

/// Map IO errors to the transport error variants.
///
/// Timeouts/would-block become `Timeout`, dropped peers become
/// `Connection`, everything else stays `Io`.
pub(crate) fn map_io_error(err: std::io::Error, context: &str) -> RosterError {
    match err.kind() {
        std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => {
            RosterError::Timeout(DEFAULT_TIMEOUT.as_millis() as u64)
        }
        std::io::ErrorKind::ConnectionReset
        | std::io::ErrorKind::ConnectionAborted
        | std::io::ErrorKind::NotConnected => {
            RosterError::Connection(format!("{}: connection lost", context))
        }
        _ => RosterError::Io(err),
    }
}
