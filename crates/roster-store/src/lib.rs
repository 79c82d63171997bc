//! Roster Coordination-Store Adapter
//!
//! This crate defines the narrow contract Roster requires from a
//! hierarchical coordination store (a ZooKeeper-shaped ensemble): idempotent
//! path creation, session-bound ephemeral nodes, point reads/writes, and a
//! restartable child watch that re-delivers the full child set whenever the
//! watch has to be re-established.
//!
//! # Components
//!
//! - [`CoordinationStore`] - the adapter trait; the only place Roster
//!   suspends on store I/O
//! - [`ChildEvent`] / [`ChildWatch`] - the watch surface consumed by the
//!   client-side membership mirror
//! - [`MemoryEnsemble`] - an in-process implementation with real session
//!   semantics, used by tests and local development
//!
//! Production deployments plug a real ensemble client in behind
//! [`CoordinationStore`]; nothing else in the workspace knows which one.

pub mod adapter;
pub mod error;
pub mod memory;

pub use adapter::{ChildEvent, ChildNode, ChildWatch, CoordinationStore};
pub use error::{Result, StoreError};
pub use memory::MemoryEnsemble;
