//! RPC request type and unique ID generation.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

/// Unique identifier for an RPC request.
pub type RequestId = u64;

/// RPC method arguments (JSON value).
pub type RpcArgs = serde_json::Value;

static REQUEST_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// An RPC request routed to one member of the discovery pool.
///
/// `method` names the target as `"Service/method"`, matching the server-side
/// registry. The optional `auth_token` is carried in-band because the wire
/// protocol has no header channel.
///
/// # Example
///
/// ```
/// use roster_common::protocol::Request;
/// use serde_json::json;
///
/// let request = Request::new("Echo/echo", json!({"text": "hi"}))
///     .with_timeout(5000);
/// assert_eq!(request.method, "Echo/echo");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Request {
    /// Unique request identifier
    pub id: RequestId,
    /// Target as "Service/method"
    pub method: String,
    /// Method arguments
    pub args: RpcArgs,
    /// Optional timeout in milliseconds
    pub timeout_ms: Option<u64>,
    /// Optional bearer token validated by the server
    pub auth_token: Option<String>,
}

impl Request {
    pub fn new(method: impl Into<String>, args: RpcArgs) -> Self {
        Request {
            id: generate_request_id(),
            method: method.into(),
            args,
            timeout_ms: None,
            auth_token: None,
        }
    }

    pub fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    /// Splits `method` into its `(service, method)` halves.
    pub fn target(&self) -> Option<(&str, &str)> {
        self.method.split_once('/')
    }
}

/// Generates a unique request ID.
///
/// Upper 32 bits: seconds since the UNIX epoch (valid until 2106).
/// Lower 32 bits: an atomic counter. Unique across restarts and within the
/// same runtime.
fn generate_request_id() -> RequestId {
    let timestamp = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);

    // Relaxed is enough: we need uniqueness, not synchronization.
    let counter = REQUEST_ID_COUNTER.fetch_add(1, Ordering::Relaxed);

    (timestamp << 32) | (counter & 0xFFFFFFFF)
}
