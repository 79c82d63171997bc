use async_trait::async_trait;
use roster_common::protocol::error::Result;
use serde_json::Value;

/// An RPC service hosted by a [`crate::RosterServer`].
///
/// Requests address a service as `"<name>/<method>"`; the server's registry
/// routes on `name` and hands the method half to `call`. Unknown methods
/// should return a `Service` error.
#[async_trait]
pub trait RpcService: Send + Sync {
    /// Registry key for this service.
    fn name(&self) -> &str;

    /// Executes one method call.
    async fn call(&self, method: &str, args: Value) -> Result<Value>;
}
