//! Roster Common Types and Transport
//!
//! Shared infrastructure for the Roster service-discovery and
//! load-balancing plane:
//!
//! - **Host codec**: the membership record each server publishes into its
//!   registration node ([`host`])
//! - **Protocol layer**: RPC request/response types and the workspace-wide
//!   error taxonomy ([`protocol`])
//! - **Transport layer**: length-prefixed JSON frames over TCP with
//!   optional TLS/mTLS, and the keep-alive RPC listener ([`transport`])
//! - **Auth**: opaque bearer-token validation ([`auth`])
//!
//! Servers and channels in the sibling crates are built entirely from these
//! pieces plus the coordination-store adapter in `roster-store`.

pub mod auth;
pub mod host;
pub mod protocol;
pub mod transport;

pub use auth::AuthConfig;
pub use host::{DecodeError, Host, HostMetadata, CURRENT_VERSION};
pub use protocol::{Request, Response, Result, RosterError};
pub use transport::{RpcListener, RpcTransport, TlsMaterial, DEFAULT_MAX_MESSAGE_SIZE};
