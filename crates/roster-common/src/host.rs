//! Host records - the unit of membership under a discovery path.
//!
//! Every registered server owns one ephemeral node named
//! `"<address>:<port>"` whose payload is the serialized [`Host`]. The
//! encoding is self-describing JSON carrying a schema `version` so an old
//! reader can reject records written by a newer schema instead of
//! misreading them.

use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Current host record schema version.
pub const CURRENT_VERSION: i32 = 0;

/// Failure to decode a host record from stored bytes.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed host record: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("unsupported host record version {0}")]
    UnsupportedVersion(i32),
}

/// Mutable per-host routing metadata published alongside the identity.
///
/// `load` is a scalar advertised by the server; lower means less busy.
/// Quarantined hosts stay registered but must receive no new RPCs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostMetadata {
    pub load: i32,
    pub quarantined: bool,
}

impl Default for HostMetadata {
    fn default() -> Self {
        Self {
            load: 0,
            quarantined: false,
        }
    }
}

/// A registered server endpoint.
///
/// Identity is `(address, port)` - that pair drives `Eq`/`Hash` and names
/// the registration node. `version` and `metadata` are mutable and excluded
/// from identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Host {
    pub version: i32,
    pub address: String,
    pub port: u16,
    pub metadata: HostMetadata,
}

impl Host {
    /// A host at the current schema version with default metadata
    /// (load 0, not quarantined).
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self {
            version: CURRENT_VERSION,
            address: address.into(),
            port,
            metadata: HostMetadata::default(),
        }
    }

    pub fn with_metadata(address: impl Into<String>, port: u16, metadata: HostMetadata) -> Self {
        Self {
            version: CURRENT_VERSION,
            address: address.into(),
            port,
            metadata,
        }
    }

    /// The registration node name for this host: `"<address>:<port>"`.
    pub fn node_name(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }

    /// Serializes the host record. Total: every host has an encoding.
    pub fn to_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("host record serialization is infallible")
    }

    /// Deserializes a host record, rejecting malformed bytes and records
    /// written by a schema newer than this reader understands.
    pub fn from_bytes(data: &[u8]) -> Result<Self, DecodeError> {
        let host: Host = serde_json::from_slice(data)?;
        if host.version > CURRENT_VERSION {
            return Err(DecodeError::UnsupportedVersion(host.version));
        }
        Ok(host)
    }

    /// Whether two records are byte-for-byte the same observation, not just
    /// the same endpoint. `Eq` compares identity only.
    pub fn same_record(&self, other: &Host) -> bool {
        self.version == other.version
            && self.address == other.address
            && self.port == other.port
            && self.metadata == other.metadata
    }
}

impl PartialEq for Host {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address && self.port == other.port
    }
}

impl Eq for Host {}

impl Hash for Host {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.address.hash(state);
        self.port.hash(state);
    }
}
