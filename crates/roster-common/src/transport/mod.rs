//! Transport layer: length-prefixed JSON frames over TCP, with optional
//! TLS/mTLS wrapping.
//!
//! The frame size cap is configurable per endpoint and enforced on both
//! directions; see [`tcp::DEFAULT_MAX_MESSAGE_SIZE`].

pub mod codec;
pub mod tcp;
pub mod tcp_server;
pub mod tls;

pub use codec::JsonCodec;
pub use tcp::{AsyncStream, RpcTransport, DEFAULT_MAX_MESSAGE_SIZE};
pub use tcp_server::RpcListener;
pub use tls::TlsMaterial;
