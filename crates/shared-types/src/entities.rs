//! # Core Domain Entities
//!
//! Topology types supplied by the capability registry.
//!
//! ## Clusters
//!
//! - **Identity**: `PeerId` (doubles as the ed25519 verification key)
//! - **Topology**: `DonInfo`, `RemoteCapabilityInfo`

use crate::TypesError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Length of a peer identifier in bytes.
pub const PEER_ID_LENGTH: usize = 32;

/// Numeric DON identifier as assigned by the capability registry.
pub type DonId = u32;

// =============================================================================
// CLUSTER A: IDENTITY
// =============================================================================

/// A 32-byte node identity.
///
/// The same bytes are the node's network address and its ed25519 public key,
/// so no separate key distribution exists in this layer.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub struct PeerId(pub [u8; PEER_ID_LENGTH]);

impl PeerId {
    /// Build a peer ID from a raw slice, checking its length.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, TypesError> {
        let arr: [u8; PEER_ID_LENGTH] =
            bytes
                .try_into()
                .map_err(|_| TypesError::InvalidPeerIdLength {
                    expected: PEER_ID_LENGTH,
                    actual: bytes.len(),
                })?;
        Ok(Self(arr))
    }

    /// Raw bytes.
    pub fn as_bytes(&self) -> &[u8; PEER_ID_LENGTH] {
        &self.0
    }

    /// Owned copy of the raw bytes, as carried inside a message body.
    pub fn to_vec(&self) -> Vec<u8> {
        self.0.to_vec()
    }
}

impl From<[u8; PEER_ID_LENGTH]> for PeerId {
    fn from(bytes: [u8; PEER_ID_LENGTH]) -> Self {
        Self(bytes)
    }
}

impl TryFrom<&[u8]> for PeerId {
    type Error = TypesError;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        Self::from_slice(bytes)
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerId({}..)", hex::encode(&self.0[..4]))
    }
}

// =============================================================================
// CLUSTER B: TOPOLOGY
// =============================================================================

/// A set of nodes collectively operating a workflow or a capability.
///
/// Read-only to this layer; supplied by the registry at engine construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DonInfo {
    /// Registry-assigned identifier.
    pub id: DonId,
    /// Ordered, unique members.
    pub members: Vec<PeerId>,
    /// Maximum number of faulty members tolerated.
    pub f: u8,
    /// DON-wide seed used only for transmission scheduling.
    pub shared_secret: [u8; 16],
}

impl DonInfo {
    /// Create a DON, rejecting empty or duplicated member lists.
    pub fn new(
        id: DonId,
        members: Vec<PeerId>,
        f: u8,
        shared_secret: [u8; 16],
    ) -> Result<Self, TypesError> {
        if members.is_empty() {
            return Err(TypesError::InvalidDon {
                don_id: id,
                reason: "no members".to_string(),
            });
        }

        let unique: HashSet<&PeerId> = members.iter().collect();
        if unique.len() != members.len() {
            return Err(TypesError::InvalidDon {
                don_id: id,
                reason: "duplicate members".to_string(),
            });
        }

        Ok(Self {
            id,
            members,
            f,
            shared_secret,
        })
    }

    /// Whether `peer` is a member of this DON.
    #[must_use]
    pub fn contains(&self, peer: &PeerId) -> bool {
        self.members.contains(peer)
    }

    /// Number of members.
    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Whether the DON has no members.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// `F+1`: the smallest set guaranteed to contain an honest member.
    #[must_use]
    pub fn f_plus_one(&self) -> usize {
        usize::from(self.f) + 1
    }

    /// `2F+1`: the registration quorum.
    #[must_use]
    pub fn two_f_plus_one(&self) -> usize {
        2 * usize::from(self.f) + 1
    }
}

/// Kind of capability being proxied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CapabilityType {
    /// Event source.
    Trigger,
    /// Action sink with a single response.
    Target,
}

/// A capability hosted by a remote DON.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCapabilityInfo {
    /// Capability identifier, e.g. `write_chain@1.0.0`.
    pub id: String,
    /// Trigger or target.
    pub capability_type: CapabilityType,
    /// DON hosting the capability.
    pub don: DonInfo,
}
