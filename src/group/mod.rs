//! Consumer group membership over the heartbeat-driven group protocol.
//!
//! # Architecture
//!
//! ```text
//!                ┌──────────────────────────────┐
//!                │         GroupManager         │  join / heartbeat / rejoin / leave
//!                └──────┬──────────────┬────────┘
//!                       │              │
//!             ┌─────────▼───────┐  ┌───▼──────────────┐
//!             │ HeartbeatEngine │  │ AssignmentFeed   │──► application
//!             └──┬─────┬─────┬──┘  └──────────────────┘
//!                │     │     │
//!   MemberGeneration   │   AssignmentTracker
//!                 Subscription
//! ```
//!
//! Collaborators outside this crate plug in through [`GroupTransport`],
//! [`TopicDirectory`] and [`PartitionConsumer`].

mod assignment;
mod engine;
mod feed;
mod lifecycle;
mod membership;
mod subscription;
mod traits;

pub use assignment::{Assignment, AssignmentDelta, AssignmentTracker};
pub use engine::{HeartbeatEngine, HeartbeatOutcome};
pub use feed::{AssignmentFeed, AssignmentUpdate};
pub use lifecycle::{GroupManager, ManageExit, MemberState, ProtocolSupport};
pub use membership::{Generation, MemberGeneration};
pub use subscription::Subscription;
pub use traits::{GroupTransport, PartitionConsumer, TopicDirectory};
