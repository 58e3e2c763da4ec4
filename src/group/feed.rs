//! Ordered delivery of assignment changes to the application.
//!
//! The membership loop publishes every accepted assignment; a single
//! application task awaits them with [`AssignmentFeed::next`]. Updates are
//! queued on a [`Ring`] in order, and a burst of rebalances never blocks the
//! heartbeat loop. At most [`FEED_CAPACITY`] updates are held: when nobody
//! reads, the oldest are discarded so the consumer always ends on the latest.

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::constants::FEED_CAPACITY;
use crate::group::assignment::Assignment;
use crate::ring::Ring;
use crate::types::MemberEpoch;

/// An assignment accepted by the member, tagged with the epoch it came in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssignmentUpdate {
    pub epoch: MemberEpoch,
    pub assignment: Assignment,
}

/// Single-consumer queue of [`AssignmentUpdate`]s.
#[derive(Debug, Default)]
pub struct AssignmentFeed {
    ring: Ring<AssignmentUpdate>,
    notify: Notify,
    /// Serializes take and trim so a discarded update is never also delivered.
    gate: Mutex<()>,
}

impl AssignmentFeed {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an update, discarding the oldest one if the feed is full.
    /// Returns false once the feed is closed.
    pub fn publish(&self, update: AssignmentUpdate) -> bool {
        let _gate = self.gate.lock();
        while self.ring.len() >= FEED_CAPACITY {
            self.ring.drop_peek();
        }
        let pushed = self.ring.push(update);
        if pushed.first {
            self.notify.notify_one();
        }
        !pushed.dead
    }

    /// Wait for the next update. Returns `None` once the feed is closed;
    /// updates still queued at close are discarded.
    pub async fn next(&self) -> Option<AssignmentUpdate> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.ring.is_dead() {
                return None;
            }
            if let Some(update) = self.take() {
                return Some(update);
            }
            notified.await;
        }
    }

    fn take(&self) -> Option<AssignmentUpdate> {
        let _gate = self.gate.lock();
        let update = self.ring.peek()?;
        self.ring.drop_peek();
        Some(update)
    }

    /// Close the feed and wake any waiting consumer. Idempotent.
    pub fn close(&self) {
        self.ring.die();
        self.notify.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.ring.is_dead()
    }

    /// Number of updates waiting to be taken.
    pub fn pending(&self) -> usize {
        self.ring.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    fn update(epoch: i32, partitions: &[i32]) -> AssignmentUpdate {
        AssignmentUpdate {
            epoch: MemberEpoch::new(epoch),
            assignment: Assignment::from_iter([("t", partitions.to_vec())]),
        }
    }

    #[tokio::test]
    async fn test_updates_delivered_in_order() {
        let feed = AssignmentFeed::new();
        for epoch in 1..=5 {
            assert!(feed.publish(update(epoch, &[epoch])));
        }
        assert_eq!(feed.pending(), 5);
        for epoch in 1..=5 {
            assert_eq!(feed.next().await.unwrap().epoch, MemberEpoch::new(epoch));
        }
        assert_eq!(feed.pending(), 0);
    }

    #[tokio::test]
    async fn test_waiting_consumer_woken_by_publish() {
        let feed = Arc::new(AssignmentFeed::new());
        let consumer = {
            let feed = Arc::clone(&feed);
            tokio::spawn(async move { feed.next().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        feed.publish(update(1, &[0]));
        let got = consumer.await.unwrap().unwrap();
        assert_eq!(got, update(1, &[0]));
    }

    #[tokio::test]
    async fn test_close_wakes_consumer_and_refuses_publish() {
        let feed = Arc::new(AssignmentFeed::new());
        let consumer = {
            let feed = Arc::clone(&feed);
            tokio::spawn(async move { feed.next().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        feed.close();
        assert_eq!(consumer.await.unwrap(), None);
        assert!(feed.is_closed());
        assert!(!feed.publish(update(2, &[1])));
        assert_eq!(feed.next().await, None);
    }

    #[tokio::test]
    async fn test_unread_feed_keeps_only_latest() {
        let feed = AssignmentFeed::new();
        for epoch in 1..=200 {
            assert!(feed.publish(update(epoch, &[epoch % 7])));
            assert!(feed.pending() <= FEED_CAPACITY);
        }
        assert_eq!(feed.pending(), FEED_CAPACITY);

        let oldest_kept = 200 - FEED_CAPACITY as i32 + 1;
        for epoch in oldest_kept..=200 {
            assert_eq!(feed.next().await.unwrap().epoch, MemberEpoch::new(epoch));
        }
        assert_eq!(feed.pending(), 0);
    }

    #[tokio::test]
    async fn test_close_discards_pending() {
        let feed = AssignmentFeed::new();
        feed.publish(update(1, &[0]));
        feed.close();
        assert_eq!(feed.pending(), 0);
        assert_eq!(feed.next().await, None);
    }
}
