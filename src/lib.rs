//! # Groupbeat
//! Consumer group membership for Kafka-compatible clients, using the
//! heartbeat-driven group protocol (`ConsumerGroupHeartbeat`).
//!
//! A member joins a group, keeps its membership alive with periodic
//! heartbeats, applies the partition assignments the coordinator computes,
//! rejoins after losing its membership, and leaves on shutdown. If the
//! coordinator turns out not to support the protocol, the member reports it
//! so the client can fall back to the classic join/sync protocol.
//!
//! # Goals
//! - Small, testable pieces: request building is separate from scheduling
//! - Leverage best in class libraries such as [Tokio](https://tokio.rs/) and
//!   [tracing](https://docs.rs/tracing)
//! - Plug into any client through three traits instead of owning the network
//!
//! ## Getting started
//! ```toml
//! groupbeat = "0.1"
//! ```
//!
//! ### Managing a membership
//! Implement [`GroupTransport`](group::GroupTransport) to deliver heartbeats,
//! [`TopicDirectory`](group::TopicDirectory) to resolve topic ids, and
//! [`PartitionConsumer`](group::PartitionConsumer) to start and stop
//! consuming partitions. Then hand them to a [`GroupManager`](group::GroupManager):
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use groupbeat::prelude::*;
//!
//! async fn consume(
//!     transport: Arc<dyn GroupTransport>,
//!     topics: Arc<dyn TopicDirectory>,
//!     consumer: Arc<dyn PartitionConsumer>,
//! ) -> groupbeat::error::Result<()> {
//!     let manager = GroupManager::new(
//!         GroupConfig::from_env()?,
//!         Arc::new(Subscription::topics(["orders"])),
//!         transport,
//!         topics,
//!         consumer,
//!     )?;
//!     manager.start_managing()?;
//!
//!     let feed = manager.assignments();
//!     while let Some(update) = feed.next().await {
//!         println!("epoch {}: {}", update.epoch, update.assignment);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Resources
//! - [Kafka Protocol Spec](https://kafka.apache.org/protocol.html)
//! - [KIP-848: The Next Generation of the Consumer Rebalance Protocol](https://cwiki.apache.org/confluence/display/KAFKA/KIP-848%3A+The+Next+Generation+of+the+Consumer+Rebalance+Protocol)

#![forbid(unsafe_code)]

pub mod config;
pub mod constants;
pub mod error;
pub mod group;
pub mod messages;
pub mod metrics;
pub mod retry;
pub mod ring;
pub mod telemetry;
pub mod types;

#[cfg(any(test, feature = "test-utilities"))]
pub mod testing;

pub mod prelude {
    //! Main exports for embedding group membership.

    pub use crate::config::{Capabilities, GroupConfig, ServerAssignor};
    pub use crate::error::{GroupError, KafkaCode, TransportError};
    pub use crate::group::{
        Assignment, AssignmentFeed, AssignmentUpdate, GroupManager, GroupTransport, ManageExit,
        MemberState, PartitionConsumer, ProtocolSupport, Subscription, TopicDirectory,
    };
    pub use crate::messages::{HeartbeatRequest, HeartbeatResponse, TopicPartitions};
    pub use crate::ring::Ring;
    pub use crate::types::{MemberEpoch, TopicId};
}
