//! Member identity and epoch.
//!
//! The member id and epoch are always read and written together: a heartbeat
//! built from a new id with an old epoch (or the reverse) would be rejected
//! by the coordinator as fenced.

use parking_lot::RwLock;

use crate::types::MemberEpoch;

/// An immutable snapshot of a member's identity.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Generation {
    pub member_id: String,
    pub epoch: MemberEpoch,
}

/// Concurrent holder of the current member id and epoch.
///
/// Readers never observe a torn pair. Before the first join the id is empty
/// and the epoch is zero.
#[derive(Debug, Default)]
pub struct MemberGeneration {
    current: RwLock<Generation>,
}

impl MemberGeneration {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically replace both the id and the epoch.
    pub fn store(&self, member_id: impl Into<String>, epoch: MemberEpoch) {
        let mut current = self.current.write();
        current.member_id = member_id.into();
        current.epoch = epoch;
    }

    /// Replace only the epoch.
    pub fn store_epoch(&self, epoch: MemberEpoch) {
        self.current.write().epoch = epoch;
    }

    /// Read the id and epoch together.
    pub fn load(&self) -> (String, MemberEpoch) {
        let current = self.current.read();
        (current.member_id.clone(), current.epoch)
    }

    pub fn snapshot(&self) -> Generation {
        self.current.read().clone()
    }

    pub fn member_id(&self) -> String {
        self.current.read().member_id.clone()
    }

    pub fn epoch(&self) -> MemberEpoch {
        self.current.read().epoch
    }
}
