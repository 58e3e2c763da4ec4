//! Topic subscription: an explicit topic list or a regular expression.

use std::collections::BTreeSet;

use parking_lot::RwLock;
use regex::Regex;
use tracing::debug;

use crate::error::{GroupError, Result};

/// The set of topics a member wants to consume.
///
/// In explicit mode topics are added and removed directly. In pattern mode
/// the set is derived from the topics the client sees in metadata: every
/// observed topic matching the expression is subscribed. The coordinator is
/// also sent the expression itself.
#[derive(Debug)]
pub struct Subscription {
    pattern: Option<Regex>,
    topics: RwLock<BTreeSet<String>>,
}

impl Subscription {
    /// Subscribe to an explicit list of topics.
    pub fn topics<I, S>(topics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            pattern: None,
            topics: RwLock::new(topics.into_iter().map(Into::into).collect()),
        }
    }

    /// Subscribe to every topic matching `expr`.
    pub fn pattern(expr: &str) -> Result<Self> {
        let pattern = Regex::new(expr)
            .map_err(|e| GroupError::Config(format!("invalid topic pattern {expr:?}: {e}")))?;
        Ok(Self {
            pattern: Some(pattern),
            topics: RwLock::new(BTreeSet::new()),
        })
    }

    pub fn is_pattern(&self) -> bool {
        self.pattern.is_some()
    }

    /// The subscription expression, in pattern mode.
    pub fn pattern_source(&self) -> Option<&str> {
        self.pattern.as_ref().map(Regex::as_str)
    }

    /// Add topics to an explicit subscription.
    pub fn add_topics<I, S>(&self, topics: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ensure_explicit("add topics to")?;
        self.topics.write().extend(topics.into_iter().map(Into::into));
        Ok(())
    }

    /// Remove topics from an explicit subscription.
    pub fn purge_topics<I, S>(&self, topics: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.ensure_explicit("purge topics from")?;
        let mut current = self.topics.write();
        for topic in topics {
            current.remove(topic.as_ref());
        }
        Ok(())
    }

    /// Feed the full list of topics currently known from metadata.
    ///
    /// In pattern mode the subscribed set becomes every matching name;
    /// returns true if that changed the set. Explicit subscriptions ignore
    /// observations.
    pub fn observe_topics<I, S>(&self, known: I) -> bool
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let Some(pattern) = &self.pattern else {
            return false;
        };
        let matched: BTreeSet<String> = known
            .into_iter()
            .filter(|name| pattern.is_match(name.as_ref()))
            .map(|name| name.as_ref().to_string())
            .collect();

        let mut current = self.topics.write();
        if *current == matched {
            return false;
        }
        debug!(
            pattern = pattern.as_str(),
            matched = matched.len(),
            "Topic pattern matched a new set of topics"
        );
        *current = matched;
        true
    }

    /// Sorted list of currently subscribed topic names.
    pub fn snapshot(&self) -> Vec<String> {
        self.topics.read().iter().cloned().collect()
    }

    fn ensure_explicit(&self, action: &str) -> Result<()> {
        match &self.pattern {
            Some(pattern) => Err(GroupError::Config(format!(
                "cannot {action} a pattern subscription ({})",
                pattern.as_str()
            ))),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_topics_sorted_and_deduplicated() {
        let sub = Subscription::topics(["b", "a", "b"]);
        assert_eq!(sub.snapshot(), vec!["a", "b"]);
        assert!(!sub.is_pattern());
        assert_eq!(sub.pattern_source(), None);
    }

    #[test]
    fn test_add_and_purge() {
        let sub = Subscription::topics(["a"]);
        sub.add_topics(["c", "b"]).unwrap();
        assert_eq!(sub.snapshot(), vec!["a", "b", "c"]);
        sub.purge_topics(["a", "missing"]).unwrap();
        assert_eq!(sub.snapshot(), vec!["b", "c"]);
    }

    #[test]
    fn test_explicit_ignores_observations() {
        let sub = Subscription::topics(["a"]);
        assert!(!sub.observe_topics(["a", "b"]));
        assert_eq!(sub.snapshot(), vec!["a"]);
    }

    #[test]
    fn test_pattern_observes_matching_topics() {
        let sub = Subscription::pattern("^orders-.*").unwrap();
        assert!(sub.is_pattern());
        assert_eq!(sub.pattern_source(), Some("^orders-.*"));
        assert!(sub.snapshot().is_empty());

        assert!(sub.observe_topics(["orders-eu", "payments", "orders-us"]));
        assert_eq!(sub.snapshot(), vec!["orders-eu", "orders-us"]);

        assert!(!sub.observe_topics(["orders-us", "orders-eu"]));
        assert!(sub.observe_topics(["orders-us"]));
        assert_eq!(sub.snapshot(), vec!["orders-us"]);
    }

    #[test]
    fn test_pattern_rejects_direct_edits() {
        let sub = Subscription::pattern("x.*").unwrap();
        assert!(matches!(sub.add_topics(["x1"]), Err(GroupError::Config(_))));
        assert!(matches!(
            sub.purge_topics(["x1"]),
            Err(GroupError::Config(_))
        ));
    }

    #[test]
    fn test_invalid_pattern() {
        let err = Subscription::pattern("(").unwrap_err();
        assert!(matches!(err, GroupError::Config(_)));
    }
}
