//! Centralized protocol and configuration constants.
//!
//! Having the group-membership defaults in one place makes it easier to:
//!
//! - Understand the protocol constraints
//! - Update values consistently
//! - Keep `GroupConfig` defaults and `from_env` fallbacks in sync
//!
//! # Categories
//!
//! - **Protocol Constants**: epoch sentinels and server-side assignor names
//! - **Timing Constants**: heartbeat, rebalance and leave timeouts
//! - **Backoff Constants**: rejoin backoff bounds
//! - **Buffer Constants**: bounded ring sizing

// =============================================================================
// Protocol Constants (ConsumerGroupHeartbeat)
// =============================================================================

/// Member epoch sent while joining (or rejoining) a group.
pub const JOIN_EPOCH: i32 = 0;

/// Member epoch sent when a dynamic member leaves the group.
pub const LEAVE_EPOCH: i32 = -1;

/// Member epoch sent when a static member (durable instance id) leaves the group.
pub const LEAVE_STATIC_EPOCH: i32 = -2;

/// Rebalance timeout value meaning "unchanged since the previous request".
pub const REBALANCE_TIMEOUT_UNCHANGED: i32 = -1;

/// Server-side assignor that spreads partitions uniformly (sticky).
pub const UNIFORM_ASSIGNOR: &str = "uniform";

/// Server-side assignor that assigns contiguous partition ranges.
pub const RANGE_ASSIGNOR: &str = "range";

// =============================================================================
// Timing Constants
// =============================================================================

/// Default rebalance timeout (60 seconds).
///
/// Upper bound the coordinator waits for a member to revoke partitions
/// during a reassignment before fencing it.
pub const DEFAULT_REBALANCE_TIMEOUT_MS: u64 = 60_000;

/// Default heartbeat interval (3 seconds).
///
/// Used until the coordinator dictates an interval.
pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 3_000;

/// Default deadline for a single heartbeat round trip (30 seconds).
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;

/// Default deadline for the best-effort leave heartbeat (5 seconds).
pub const DEFAULT_LEAVE_TIMEOUT_MS: u64 = 5_000;

// =============================================================================
// Backoff Constants
// =============================================================================

/// Initial delay before rejoining after a failed session.
pub const REJOIN_BACKOFF_MIN_MS: u64 = 100;

/// Maximum delay before rejoining after repeated failures (excluding jitter).
pub const REJOIN_BACKOFF_MAX_MS: u64 = 10_000;

/// Number of exponential steps after which the rejoin delay stays at the maximum.
pub const REJOIN_BACKOFF_MAX_STEPS: usize = 16;

// =============================================================================
// Buffer Constants
// =============================================================================

/// Number of inline slots in a [`Ring`](crate::ring::Ring) before spilling
/// into the overflow queue.
pub const RING_INLINE_CAPACITY: usize = 2;

/// Overflow capacity below which the ring never bothers shrinking while
/// it still holds items. A fully drained overflow is always released.
pub const RING_OVERFLOW_SHRINK_FLOOR: usize = 16;

/// Most assignment updates an unread feed holds before discarding the oldest.
pub const FEED_CAPACITY: usize = 8;
