//! Type-safe wrappers for group protocol primitives.
//!
//! These newtypes keep member epochs and topic ids from being mixed up
//! with the plain integers and strings that surround them in requests.

use std::fmt;

use base64::Engine as _;
use base64::engine::general_purpose::{URL_SAFE, URL_SAFE_NO_PAD};
use uuid::Uuid;

use crate::constants::{JOIN_EPOCH, LEAVE_EPOCH, LEAVE_STATIC_EPOCH};

/// A consumer group member epoch.
///
/// Member epochs are server-issued 32-bit counters identifying a membership
/// generation. A mismatch between the client's epoch and the coordinator's
/// invalidates the membership.
///
/// # Special Values
///
/// - `0` (`JOIN`): the member is (re)joining and is not yet confirmed.
/// - `-1` (`LEAVE`): a dynamic member is leaving the group.
/// - `-2` (`LEAVE_STATIC`): a member with a durable instance id is leaving.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct MemberEpoch(pub i32);

impl MemberEpoch {
    /// Epoch sent on the initial (or re-)join heartbeat.
    pub const JOIN: Self = MemberEpoch(JOIN_EPOCH);

    /// Epoch sent when a dynamic member leaves.
    pub const LEAVE: Self = MemberEpoch(LEAVE_EPOCH);

    /// Epoch sent when a static member leaves.
    pub const LEAVE_STATIC: Self = MemberEpoch(LEAVE_STATIC_EPOCH);

    /// Create a new epoch from a raw value.
    #[inline]
    pub const fn new(value: i32) -> Self {
        MemberEpoch(value)
    }

    /// Get the raw i32 value.
    #[inline]
    pub const fn value(self) -> i32 {
        self.0
    }

    /// Check if this epoch marks a joining member.
    #[inline]
    pub const fn is_joining(self) -> bool {
        self.0 == JOIN_EPOCH
    }

    /// Check if this epoch marks a departing member (either leave sentinel).
    #[inline]
    pub const fn is_leaving(self) -> bool {
        self.0 == LEAVE_EPOCH || self.0 == LEAVE_STATIC_EPOCH
    }
}

impl From<i32> for MemberEpoch {
    fn from(value: i32) -> Self {
        MemberEpoch(value)
    }
}

impl From<MemberEpoch> for i32 {
    fn from(epoch: MemberEpoch) -> Self {
        epoch.0
    }
}

impl fmt::Display for MemberEpoch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A topic identifier as assigned by the cluster.
///
/// Heartbeat responses reference assigned topics by id rather than by name;
/// ids are resolved through the [`TopicDirectory`](crate::group::TopicDirectory).
/// Displays as unpadded URL-safe base64, the way brokers print topic ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct TopicId(pub Uuid);

impl TopicId {
    /// The all-zero id, which never names a real topic.
    pub const ZERO: Self = TopicId(Uuid::nil());

    /// Create a topic id from its 16 raw bytes.
    #[inline]
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        TopicId(Uuid::from_bytes(bytes))
    }

    /// Generate a random topic id.
    pub fn random() -> Self {
        TopicId(Uuid::new_v4())
    }

    /// Get the raw bytes.
    #[inline]
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }

    /// Check if this is the all-zero id.
    #[inline]
    pub fn is_zero(&self) -> bool {
        self.0.is_nil()
    }
}

impl From<Uuid> for TopicId {
    fn from(value: Uuid) -> Self {
        TopicId(value)
    }
}

impl fmt::Display for TopicId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&URL_SAFE_NO_PAD.encode(self.as_bytes()))
    }
}

/// Generate a client-side member id.
///
/// Newer coordinators expect the client to pick its own member id: 16 random
/// bytes, URL-safe base64 encoded so the id can be embedded in URLs.
pub fn generate_member_id() -> String {
    URL_SAFE.encode(Uuid::new_v4().as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_member_epoch_sentinels() {
        assert!(MemberEpoch::JOIN.is_joining());
        assert!(!MemberEpoch::JOIN.is_leaving());
        assert!(MemberEpoch::LEAVE.is_leaving());
        assert!(MemberEpoch::LEAVE_STATIC.is_leaving());
        assert!(!MemberEpoch::new(7).is_joining());
        assert!(!MemberEpoch::new(7).is_leaving());
    }

    #[test]
    fn test_member_epoch_conversions() {
        let epoch: MemberEpoch = 42.into();
        assert_eq!(epoch.value(), 42);
        assert_eq!(i32::from(epoch), 42);
        assert_eq!(epoch.to_string(), "42");
    }

    #[test]
    fn test_topic_id_display_is_unpadded_base64() {
        let id = TopicId::from_bytes([0xff; 16]);
        let shown = id.to_string();
        assert_eq!(shown.len(), 22);
        assert!(!shown.contains('='));
        assert!(!shown.contains('/'));
    }

    #[test]
    fn test_topic_id_zero() {
        assert!(TopicId::ZERO.is_zero());
        assert!(!TopicId::random().is_zero());
        assert_eq!(TopicId::default(), TopicId::ZERO);
    }

    #[test]
    fn test_generate_member_id_shape() {
        let a = generate_member_id();
        let b = generate_member_id();
        assert_eq!(a.len(), 24);
        assert_ne!(a, b);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric() || "-_=".contains(c)));
    }
}
