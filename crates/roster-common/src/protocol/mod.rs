//! Roster protocol definitions.
//!
//! Request/response types for the RPC plane, plus the error taxonomy shared
//! by every crate in the workspace. Errors are classified as retryable
//! (transport faults, timeouts) or permanent; `NoReadyEndpoint` in
//! particular is permanent so that an RPC against an empty or fully
//! quarantined pool fails fast.

pub mod error;
pub mod requests;
pub mod responses;

pub use error::{Result, RosterError};
pub use requests::{Request, RequestId, RpcArgs};
pub use responses::{Response, RpcResult};
