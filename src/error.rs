//! Crate & protocol level errors.
//!
//! # Error Hierarchy
//!
//! ## Transport Layer
//!
//! - [`TransportError`]: the request never produced a coordinator response
//!   (I/O failure, deadline, disconnect, cancellation)
//!
//! ## Protocol Layer
//!
//! - [`KafkaCode`]: wire protocol error codes carried in heartbeat responses
//! - [`GroupError`]: classified group membership failures
//!
//! ## Classification
//!
//! A non-zero response code is turned into a [`GroupError`] with
//! [`GroupError::from_response`]. The categories drive the lifecycle:
//!
//! | Category | Meaning |
//! |----------|---------|
//! | `Transport` | no response; retried by the rejoin loop |
//! | `UnsupportedVersion` | coordinator lacks the heartbeat protocol |
//! | `MembershipInvalidated` | unknown member id or fenced epoch |
//! | `Retriable` | coordinator moving or loading |
//! | `Fatal` | anything else |
//!
//! Every category except `Transport` counts as a protocol-level answer,
//! which is what confirms that the coordinator speaks the protocol at all.

use std::{io, result};

use num_derive::FromPrimitive;
use num_traits::FromPrimitive as _;
use thiserror::Error as ThisError;

pub type Result<T> = result::Result<T, GroupError>;

/// Failures to obtain a response at all.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
pub enum TransportError {
    /// An error in the network.
    #[error("IO error: {0:?}")]
    Io(io::ErrorKind),

    /// The request deadline elapsed before a response arrived.
    #[error("request timed out")]
    Timeout,

    /// The connection to the coordinator closed.
    #[error("connection closed: {0}")]
    Disconnected(String),

    /// The request was abandoned because the caller is shutting down.
    #[error("request cancelled")]
    Cancelled,
}

impl From<io::Error> for TransportError {
    fn from(e: io::Error) -> Self {
        TransportError::Io(e.kind())
    }
}

/// Group membership errors.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
pub enum GroupError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// The coordinator does not implement the heartbeat-driven protocol.
    #[error("coordinator does not support consumer group heartbeats: {message}")]
    UnsupportedVersion { message: String },

    /// The coordinator no longer recognizes this membership.
    #[error("membership invalidated ({code:?}): {message}")]
    MembershipInvalidated { code: KafkaCode, message: String },

    /// The coordinator is temporarily unable to serve the group.
    #[error("retriable group error ({code:?}): {message}")]
    Retriable { code: KafkaCode, message: String },

    /// Any other error code.
    #[error("group error ({code:?}, raw {raw}): {message}")]
    Fatal {
        code: KafkaCode,
        raw: i16,
        message: String,
    },

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

impl GroupError {
    /// Classify a response error code.
    ///
    /// Returns `None` for a zero code. A missing server message is replaced
    /// by the code's name so logs always carry something readable.
    pub fn from_response(code: i16, message: Option<String>) -> Option<GroupError> {
        if code == 0 {
            return None;
        }
        let kafka_code = KafkaCode::from_code(code);
        let message = message
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| format!("{kafka_code:?}"));

        Some(match kafka_code {
            KafkaCode::UnsupportedVersion => GroupError::UnsupportedVersion { message },
            KafkaCode::UnknownMemberId | KafkaCode::FencedMemberEpoch => {
                GroupError::MembershipInvalidated {
                    code: kafka_code,
                    message,
                }
            }
            KafkaCode::GroupCoordinatorNotAvailable
            | KafkaCode::NotCoordinatorForGroup
            | KafkaCode::GroupLoadInProgress
            | KafkaCode::RequestTimedOut => GroupError::Retriable {
                code: kafka_code,
                message,
            },
            _ => GroupError::Fatal {
                code: kafka_code,
                raw: code,
                message,
            },
        })
    }

    /// True if the coordinator answered, as opposed to the request failing.
    pub fn is_protocol_level(&self) -> bool {
        !matches!(self, GroupError::Transport(_) | GroupError::Config(_))
    }

    /// True if the coordinator rejected the heartbeat API version.
    pub fn is_unsupported_version(&self) -> bool {
        matches!(self, GroupError::UnsupportedVersion { .. })
    }

    /// True if the current member id / epoch can no longer be used.
    pub fn requires_rejoin(&self) -> bool {
        matches!(self, GroupError::MembershipInvalidated { .. })
    }

    /// True for errors that are expected to clear up on their own.
    pub fn is_retriable(&self) -> bool {
        matches!(self, GroupError::Transport(_) | GroupError::Retriable { .. })
    }

    /// The Kafka error code behind this error, if any.
    pub fn code(&self) -> Option<KafkaCode> {
        match self {
            GroupError::UnsupportedVersion { .. } => Some(KafkaCode::UnsupportedVersion),
            GroupError::MembershipInvalidated { code, .. }
            | GroupError::Retriable { code, .. }
            | GroupError::Fatal { code, .. } => Some(*code),
            GroupError::Transport(_) | GroupError::Config(_) => None,
        }
    }

    /// Short label used for metrics.
    pub(crate) fn kind(&self) -> &'static str {
        match self {
            GroupError::Transport(_) => "transport",
            GroupError::UnsupportedVersion { .. } => "unsupported_version",
            GroupError::MembershipInvalidated { .. } => "membership_invalidated",
            GroupError::Retriable { .. } => "retriable",
            GroupError::Fatal { .. } => "fatal",
            GroupError::Config(_) => "config",
        }
    }
}

/// Error codes reported by a remote Kafka coordinator that matter to
/// group membership.
/// See also [Kafka Errors](http://kafka.apache.org/protocol.html)
#[derive(Debug, Copy, Clone, PartialEq, Eq, FromPrimitive, Default)]
pub enum KafkaCode {
    /// An unexpected server error, or a code this crate does not know.
    Unknown = -1,
    #[default]
    None = 0,
    /// The request exceeded the user-specified time limit.
    RequestTimedOut = 7,
    /// Group metadata is still being loaded by the coordinator.
    GroupLoadInProgress = 14,
    /// The group coordinator is not active.
    GroupCoordinatorNotAvailable = 15,
    /// The broker is not the coordinator for this group.
    NotCoordinatorForGroup = 16,
    /// The member id is not part of the group.
    UnknownMemberId = 25,
    /// The coordinator has begun rebalancing the group.
    RebalanceInProgress = 27,
    /// The client is not authorized to access the group.
    GroupAuthorizationFailed = 30,
    /// The version of API is not supported.
    UnsupportedVersion = 35,
    /// The request was malformed.
    InvalidRequest = 42,
    /// The group has reached its maximum size.
    GroupMaxSizeReached = 81,
    /// Another member with the same instance id was registered.
    FencedInstanceId = 82,
    /// A topic id in the request is unknown to the broker.
    UnknownTopicId = 100,
    /// The member epoch is fenced by the coordinator.
    FencedMemberEpoch = 110,
    /// The instance id is still used by another member.
    UnreleasedInstanceId = 111,
    /// The requested server-side assignor is not available.
    UnsupportedAssignor = 112,
    /// The member epoch is stale.
    StaleMemberEpoch = 113,
}

impl KafkaCode {
    /// Map a raw code, collapsing unrecognized values into `Unknown`.
    pub fn from_code(code: i16) -> KafkaCode {
        KafkaCode::from_i16(code).unwrap_or(KafkaCode::Unknown)
    }
}
