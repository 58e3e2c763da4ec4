//! Backoff policies for group membership.
//!
//! # Available Policies
//!
//! | Policy | Min Delay | Max Delay | Steps | Use Case |
//! |--------|-----------|-----------|-------|----------|
//! | `rejoin_policy` | 100ms | 10s | 16 | Waiting before rejoining after a failed session |
//!
//! The policy includes jitter so a fleet of members that lost their
//! coordinator at the same moment does not rejoin in lockstep.
//!
//! # Example
//!
//! ```rust,no_run
//! use groupbeat::retry;
//!
//! // Delay before the third consecutive rejoin attempt.
//! let delay = retry::rejoin_backoff(3);
//! assert!(delay >= std::time::Duration::from_millis(400));
//! ```

use std::time::Duration;

use backon::{BackoffBuilder, ExponentialBuilder};

use crate::constants::{REJOIN_BACKOFF_MAX_MS, REJOIN_BACKOFF_MAX_STEPS, REJOIN_BACKOFF_MIN_MS};

/// Policy for rejoining a group after a failed membership session.
///
/// Characteristics:
/// - Short initial delay (100ms) so a single fencing recovers quickly
/// - Long max delay (10s) so an unreachable coordinator is not hammered
/// - Includes jitter
pub fn rejoin_policy() -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(REJOIN_BACKOFF_MIN_MS))
        .with_max_delay(Duration::from_millis(REJOIN_BACKOFF_MAX_MS))
        .with_max_times(REJOIN_BACKOFF_MAX_STEPS)
        .with_jitter()
}

/// Delay before the next rejoin, given how many sessions in a row failed.
///
/// Grows exponentially with `consecutive_failures` and stays at the maximum
/// once the policy's steps are used up. `0` is treated like `1`.
pub fn rejoin_backoff(consecutive_failures: u32) -> Duration {
    let step = usize::try_from(consecutive_failures)
        .unwrap_or(usize::MAX)
        .clamp(1, REJOIN_BACKOFF_MAX_STEPS);
    rejoin_policy()
        .build()
        .nth(step - 1)
        .unwrap_or(Duration::from_millis(REJOIN_BACKOFF_MAX_MS))
}
