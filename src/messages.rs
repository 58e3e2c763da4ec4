//! ConsumerGroupHeartbeat request and response messages.
//!
//! These mirror the fields of the wire messages that group membership reads
//! and writes. Encoding is the transport's business.
//!
//! Optional request fields follow the protocol's differential convention:
//! `None` means "unchanged since the previous heartbeat" and is omitted on the
//! wire, while `Some` of an empty collection is an explicit empty value.

use std::time::Duration;

use crate::constants::REBALANCE_TIMEOUT_UNCHANGED;
use crate::error::GroupError;
use crate::types::{MemberEpoch, TopicId};

/// Partitions of one topic, referenced by id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicPartitions {
    pub topic_id: TopicId,
    pub partitions: Vec<i32>,
}

impl TopicPartitions {
    pub fn new(topic_id: TopicId, partitions: impl IntoIterator<Item = i32>) -> Self {
        Self {
            topic_id,
            partitions: partitions.into_iter().collect(),
        }
    }
}

/// A ConsumerGroupHeartbeat request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartbeatRequest {
    pub group_id: String,
    pub member_id: String,
    pub member_epoch: MemberEpoch,
    /// Durable instance id; only sent when joining or leaving.
    pub instance_id: Option<String>,
    pub rack_id: Option<String>,
    /// `-1` when unchanged.
    pub rebalance_timeout_ms: i32,
    pub subscribed_topic_names: Option<Vec<String>>,
    pub subscribed_topic_regex: Option<String>,
    pub server_assignor: Option<String>,
    /// Partitions the member currently owns.
    pub topic_partitions: Option<Vec<TopicPartitions>>,
}

impl Default for HeartbeatRequest {
    fn default() -> Self {
        Self {
            group_id: String::new(),
            member_id: String::new(),
            member_epoch: MemberEpoch::JOIN,
            instance_id: None,
            rack_id: None,
            rebalance_timeout_ms: REBALANCE_TIMEOUT_UNCHANGED,
            subscribed_topic_names: None,
            subscribed_topic_regex: None,
            server_assignor: None,
            topic_partitions: None,
        }
    }
}

impl HeartbeatRequest {
    /// A departure heartbeat carrying only identity fields.
    pub fn leave(
        group_id: impl Into<String>,
        member_id: impl Into<String>,
        instance_id: Option<String>,
    ) -> Self {
        let member_epoch = if instance_id.is_some() {
            MemberEpoch::LEAVE_STATIC
        } else {
            MemberEpoch::LEAVE
        };
        Self {
            group_id: group_id.into(),
            member_id: member_id.into(),
            member_epoch,
            instance_id,
            ..Default::default()
        }
    }

    pub fn is_join(&self) -> bool {
        self.member_epoch.is_joining()
    }

    pub fn is_leave(&self) -> bool {
        self.member_epoch.is_leaving()
    }
}

/// The assignment block of a heartbeat response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseAssignment {
    pub topic_partitions: Vec<TopicPartitions>,
}

/// A ConsumerGroupHeartbeat response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeartbeatResponse {
    pub throttle_time_ms: i32,
    pub error_code: i16,
    pub error_message: Option<String>,
    /// Set when the coordinator assigned or confirmed the member id.
    pub member_id: Option<String>,
    pub member_epoch: MemberEpoch,
    pub heartbeat_interval_ms: i32,
    /// `None` means "no change"; `Some` is the complete new assignment.
    pub assignment: Option<ResponseAssignment>,
}

impl HeartbeatResponse {
    /// A successful response with no assignment change.
    pub fn ok(member_epoch: MemberEpoch, heartbeat_interval_ms: i32) -> Self {
        Self {
            member_epoch,
            heartbeat_interval_ms,
            ..Default::default()
        }
    }

    /// A response carrying only an error.
    pub fn error(error_code: i16, error_message: Option<String>) -> Self {
        Self {
            error_code,
            error_message,
            ..Default::default()
        }
    }

    pub fn with_member_id(mut self, member_id: impl Into<String>) -> Self {
        self.member_id = Some(member_id.into());
        self
    }

    pub fn with_assignment(mut self, topic_partitions: Vec<TopicPartitions>) -> Self {
        self.assignment = Some(ResponseAssignment { topic_partitions });
        self
    }

    /// The classified error, if the response carries one.
    pub fn group_error(&self) -> Option<GroupError> {
        GroupError::from_response(self.error_code, self.error_message.clone())
    }

    /// The interval the coordinator asks the member to heartbeat at.
    pub fn heartbeat_interval(&self) -> Option<Duration> {
        u64::try_from(self.heartbeat_interval_ms)
            .ok()
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }
}
