//! Roster Server
//!
//! Server side of the Roster discovery plane. A [`RosterServer`]:
//!
//! - binds the RPC listener and dispatches requests to registered
//!   [`RpcService`]s,
//! - owns one ephemeral registration node under the discovery path,
//! - runs the debounced load publisher that folds bursts of
//!   [`assign_load`](RosterServer::assign_load) samples into at most one
//!   store write per update interval,
//! - advertises quarantine transitions through the same node.
//!
//! Load publication is best-effort by design: a failed write is logged and
//! the next sample repairs the node, and a vanished node (session expiry)
//! triggers re-registration.

pub mod load;
pub mod service;
pub mod settings;

mod publisher;
mod quarantine;
mod registration;
mod server;

pub use load::{LoadQueue, QuarantineFlag};
pub use server::RosterServer;
pub use service::RpcService;
pub use settings::{ServerSettings, DEFAULT_LOAD_UPDATE_INTERVAL};
