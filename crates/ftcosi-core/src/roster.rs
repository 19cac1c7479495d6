//! The roster: the ordered, immutable list of participants for a round.
//!
//! Roster order is significant — it is the index space that [`crate::tree`]
//! partitions and that [`crate::mask::Mask`] bits are positions into. Once
//! built, a roster never changes shape; a new round with different
//! membership gets a new roster.

use std::sync::Arc;

use thiserror::Error;

use crate::crypto::PublicKey;

/// Stable identifier for a roster member, independent of its position.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u64);

/// Where to reach a member over the transport.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Address(pub String);

#[derive(Clone, Debug)]
pub struct RosterMember {
    pub id: NodeId,
    pub public: PublicKey,
    pub address: Address,
}

#[derive(Debug, Error)]
pub enum RosterError {
    #[error("roster must have at least one member")]
    Empty,
    #[error("duplicate node id {0:?} in roster")]
    DuplicateId(NodeId),
}

/// An ordered, immutable set of participants. Position 0 is always the root.
#[derive(Clone, Debug)]
pub struct Roster {
    members: Arc<[RosterMember]>,
}

impl Roster {
    pub fn new(members: Vec<RosterMember>) -> Result<Self, RosterError> {
        if members.is_empty() {
            return Err(RosterError::Empty);
        }
        for (i, m) in members.iter().enumerate() {
            if members[..i].iter().any(|other| other.id == m.id) {
                return Err(RosterError::DuplicateId(m.id));
            }
        }
        Ok(Self { members: members.into() })
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn member(&self, index: usize) -> Option<&RosterMember> {
        self.members.get(index)
    }

    pub fn index_of(&self, id: NodeId) -> Option<usize> {
        self.members.iter().position(|m| m.id == id)
    }

    /// Public keys in roster order, cheaply shareable with [`Mask::new`].
    pub fn publics(&self) -> Arc<[PublicKey]> {
        self.members.iter().map(|m| m.public.clone()).collect::<Vec<_>>().into()
    }

    pub fn root(&self) -> &RosterMember {
        &self.members[0]
    }

    pub fn iter(&self) -> impl Iterator<Item = &RosterMember> {
        self.members.iter()
    }
}
