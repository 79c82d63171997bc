//! Roster Client
//!
//! Client side of the Roster discovery plane. A [`RosterChannel`]:
//!
//! - subscribes to the discovery path and mirrors the live host set through
//!   session loss and reconnects ([`MembershipMirror`]),
//! - routes every RPC to the least-loaded non-quarantined endpoint, with
//!   deterministic round-robin among equally loaded hosts
//!   ([`WeightedPicker`]),
//! - maintains one lazily connected subchannel per live host, shutting
//!   subchannels down after their host leaves the pool.
//!
//! Load values observed by the picker may be stale by up to one server-side
//! update interval plus store propagation delay; the design accepts that
//! staleness instead of probing servers synchronously.

pub mod channel;
pub mod mirror;
pub mod picker;
pub mod settings;

mod subchannel;

pub use channel::RosterChannel;
pub use mirror::MembershipMirror;
pub use picker::WeightedPicker;
pub use settings::{ChannelSettings, LbPolicy, RetryConfig};
