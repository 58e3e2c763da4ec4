//! Property tests for assignment arithmetic and change detection.

use std::collections::BTreeSet;

use groupbeat::group::{Assignment, AssignmentTracker};
use proptest::prelude::*;

const TOPICS: &[&str] = &["orders", "payments", "refunds", "audit"];

fn assignment() -> impl Strategy<Value = Vec<(String, Vec<i32>)>> {
    proptest::collection::vec(
        (
            proptest::sample::select(TOPICS).prop_map(str::to_string),
            proptest::collection::vec(0i32..16, 0..6),
        ),
        0..6,
    )
}

fn pairs(assignment: &Assignment) -> BTreeSet<(String, i32)> {
    assignment
        .iter()
        .flat_map(|(topic, parts)| parts.iter().map(move |p| (topic.to_string(), *p)))
        .collect()
}

proptest! {
    /// Listing order and duplicates from the coordinator never matter.
    #[test]
    fn prop_order_insensitive(entries in assignment()) {
        let forward: Assignment = entries.clone().into_iter().collect();
        let reversed: Assignment = entries
            .into_iter()
            .rev()
            .map(|(topic, mut parts)| {
                parts.reverse();
                parts.extend(parts.clone());
                (topic, parts)
            })
            .collect();
        prop_assert_eq!(forward, reversed);
    }

    /// Revoking then adding the delta moves the applied partitions exactly to
    /// the target partitions.
    #[test]
    fn prop_delta_reaches_target(target in assignment(), applied in assignment()) {
        let target: Assignment = target.into_iter().collect();
        let applied: Assignment = applied.into_iter().collect();
        let delta = target.diff_against(&applied);

        let mut owned = pairs(&applied);
        for pair in pairs(&delta.revoked) {
            prop_assert!(owned.remove(&pair));
        }
        for pair in pairs(&delta.added) {
            prop_assert!(owned.insert(pair));
        }
        prop_assert_eq!(owned, pairs(&target));
    }

    /// Revoked and added never overlap, and an assignment diffed against
    /// itself is a no-op.
    #[test]
    fn prop_delta_disjoint(target in assignment(), applied in assignment()) {
        let target: Assignment = target.into_iter().collect();
        let applied: Assignment = applied.into_iter().collect();
        let delta = target.diff_against(&applied);

        prop_assert!(pairs(&delta.revoked).is_disjoint(&pairs(&delta.added)));
        prop_assert!(target.diff_against(&target).is_empty());
    }

    /// The tracker reports a change exactly when the assignments differ, with
    /// an untracked state equal to the empty assignment.
    #[test]
    fn prop_tracker_differs(current in assignment(), candidate in assignment()) {
        let current: Assignment = current.into_iter().collect();
        let candidate: Assignment = candidate.into_iter().collect();

        let tracker = AssignmentTracker::new();
        prop_assert_eq!(tracker.differs(&candidate), !candidate.is_empty());

        tracker.store(Some(current.clone()));
        prop_assert_eq!(tracker.differs(&candidate), current != candidate);
        prop_assert!(!tracker.differs(&current));
    }
}
