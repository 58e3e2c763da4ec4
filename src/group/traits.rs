//! Collaborator traits for group membership.
//!
//! Group membership drives three external pieces it does not own:
//!
//! - [`GroupTransport`]: delivers heartbeats to the group coordinator
//! - [`TopicDirectory`]: maps topic ids to names using client metadata
//! - [`PartitionConsumer`]: starts and stops consumption of partitions
//!
//! In-memory implementations live in [`crate::testing`] (feature
//! `test-utilities`).
//!
//! # Example: Custom Transport
//!
//! ```text
//! use groupbeat::group::GroupTransport;
//! use async_trait::async_trait;
//!
//! struct BrokerTransport { conn: Connection }
//!
//! #[async_trait]
//! impl GroupTransport for BrokerTransport {
//!     async fn consumer_group_heartbeat(&self, request, deadline) -> ... {
//!         // encode, send to the coordinator, decode the response
//!     }
//! }
//! ```

use async_trait::async_trait;
use tokio::time::Instant;

use crate::error::TransportError;
use crate::messages::{HeartbeatRequest, HeartbeatResponse};
use crate::types::TopicId;

/// Sends ConsumerGroupHeartbeat requests to the group coordinator.
#[async_trait]
pub trait GroupTransport: Send + Sync {
    /// Send one heartbeat and wait for its response.
    ///
    /// Implementations must give up with [`TransportError::Timeout`] once
    /// `deadline` passes. A response carrying an error code is still `Ok`.
    async fn consumer_group_heartbeat(
        &self,
        request: HeartbeatRequest,
        deadline: Instant,
    ) -> Result<HeartbeatResponse, TransportError>;
}

/// Topic id/name lookups against the client's metadata cache.
pub trait TopicDirectory: Send + Sync {
    /// Name of the topic with this id, if metadata knows it.
    fn resolve_topic_id(&self, id: TopicId) -> Option<String>;

    /// Id of the named topic, if metadata knows it.
    fn topic_id(&self, name: &str) -> Option<TopicId>;

    /// Ask for a metadata refresh as soon as possible.
    ///
    /// Must not block; the refresh happens in the background.
    fn trigger_metadata_refresh(&self, reason: &str);
}

/// The consuming side that owns fetch sessions for assigned partitions.
#[async_trait]
pub trait PartitionConsumer: Send + Sync {
    /// Stop consuming these partitions. Called before any `acquire` of the
    /// same reconciliation.
    async fn revoke(&self, topic: &str, partitions: &[i32]);

    /// Start consuming these partitions.
    async fn acquire(&self, topic: &str, partitions: &[i32]);
}
