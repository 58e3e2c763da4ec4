//! Partition assignments and the tracker holding the current one.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use parking_lot::RwLock;

/// A mapping of topic name to assigned partitions.
///
/// Partitions are kept sorted and de-duplicated, so two assignments compare
/// equal regardless of the order the coordinator listed them in. A topic may
/// be present with no partitions; that is distinct from the topic being
/// absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Assignment {
    topics: BTreeMap<String, BTreeSet<i32>>,
}

impl Assignment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add partitions for a topic, merging with any already present.
    pub fn insert<I>(&mut self, topic: impl Into<String>, partitions: I)
    where
        I: IntoIterator<Item = i32>,
    {
        self.topics
            .entry(topic.into())
            .or_default()
            .extend(partitions);
    }

    /// True if no topic is present.
    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }

    pub fn topic_count(&self) -> usize {
        self.topics.len()
    }

    pub fn partition_count(&self) -> usize {
        self.topics.values().map(BTreeSet::len).sum()
    }

    pub fn partitions(&self, topic: &str) -> Option<&BTreeSet<i32>> {
        self.topics.get(topic)
    }

    pub fn contains(&self, topic: &str, partition: i32) -> bool {
        self.topics
            .get(topic)
            .is_some_and(|partitions| partitions.contains(&partition))
    }

    /// Iterate topics in name order with their sorted partitions.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &BTreeSet<i32>)> {
        self.topics.iter().map(|(topic, parts)| (topic.as_str(), parts))
    }

    /// Iterate topics in name order with their partitions as a sorted vector.
    pub fn to_sorted_vecs(&self) -> Vec<(String, Vec<i32>)> {
        self.topics
            .iter()
            .map(|(topic, parts)| (topic.clone(), parts.iter().copied().collect()))
            .collect()
    }

    /// Compute what must change to go from `applied` to `self`.
    pub fn diff_against(&self, applied: &Assignment) -> AssignmentDelta {
        AssignmentDelta {
            revoked: applied.minus(self),
            added: self.minus(applied),
        }
    }

    fn minus(&self, other: &Assignment) -> Assignment {
        let mut out = Assignment::new();
        for (topic, parts) in &self.topics {
            let remaining: BTreeSet<i32> = match other.topics.get(topic) {
                Some(theirs) => parts.difference(theirs).copied().collect(),
                None => parts.clone(),
            };
            if !remaining.is_empty() {
                out.topics.insert(topic.clone(), remaining);
            }
        }
        out
    }
}

impl<S, I> FromIterator<(S, I)> for Assignment
where
    S: Into<String>,
    I: IntoIterator<Item = i32>,
{
    fn from_iter<T: IntoIterator<Item = (S, I)>>(iter: T) -> Self {
        let mut assignment = Assignment::new();
        for (topic, partitions) in iter {
            assignment.insert(topic, partitions);
        }
        assignment
    }
}

impl fmt::Display for Assignment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (topic, parts)) in self.topics.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{topic}: {:?}", parts.iter().collect::<Vec<_>>())?;
        }
        f.write_str("}")
    }
}

/// Partitions to give up and to take on when moving between assignments.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssignmentDelta {
    pub revoked: Assignment,
    pub added: Assignment,
}

impl AssignmentDelta {
    pub fn is_empty(&self) -> bool {
        self.revoked.is_empty() && self.added.is_empty()
    }
}

/// Holder of the assignment the member currently believes it owns.
///
/// "Nothing tracked" (`None`) and "tracking an empty assignment" are kept
/// distinct for the join check, but compare equal when deciding whether a
/// new assignment is a change.
#[derive(Debug, Default)]
pub struct AssignmentTracker {
    current: RwLock<Option<Assignment>>,
}

impl AssignmentTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clone of the tracked assignment, `None` if nothing is tracked.
    pub fn read(&self) -> Option<Assignment> {
        self.current.read().clone()
    }

    /// Clone of the tracked assignment; empty if nothing is tracked.
    pub fn snapshot_clone(&self) -> Assignment {
        self.current.read().clone().unwrap_or_default()
    }

    pub fn store(&self, assignment: Option<Assignment>) {
        *self.current.write() = assignment;
    }

    pub fn clear(&self) {
        self.store(None);
    }

    /// True if an assignment (even an empty one) is tracked.
    pub fn is_tracking(&self) -> bool {
        self.current.read().is_some()
    }

    /// True if any topic is tracked.
    pub fn is_tracking_anything(&self) -> bool {
        self.current.read().as_ref().is_some_and(|a| !a.is_empty())
    }

    /// True if `candidate` differs from what is tracked.
    pub fn differs(&self, candidate: &Assignment) -> bool {
        match &*self.current.read() {
            Some(current) => current != candidate,
            None => !candidate.is_empty(),
        }
    }
}
