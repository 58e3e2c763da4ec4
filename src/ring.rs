//! Bounded-inline FIFO with an overflow queue.
//!
//! [`Ring`] serializes work handed from many producers to a single processor.
//! The producer that pushes onto an empty ring becomes responsible for
//! processing the front item; the processor keeps calling
//! [`Ring::drop_peek`] until the ring reports it is empty.
//!
//! # Layout
//!
//! ```text
//! inline: [ slot0 | slot1 ]       overflow: VecDeque<T>
//!           ^head                            (only used while inline is full)
//! ```
//!
//! Items live in a small inline buffer. Only when it is full do new items
//! spill into the overflow queue, and each freed inline slot is refilled from
//! the overflow front, so ordering is strictly first-in-first-out.
//!
//! # Memory
//!
//! A fully drained overflow is released immediately. While draining, the
//! overflow is shrunk whenever its occupancy falls below a quarter of its
//! capacity, so a burst does not pin memory after the backlog clears.
//!
//! # Termination
//!
//! [`Ring::die`] is terminal and idempotent: remaining items are discarded,
//! later pushes are refused, and later drops report the ring as dead.

use std::collections::VecDeque;

use parking_lot::Mutex;

use crate::constants::{RING_INLINE_CAPACITY, RING_OVERFLOW_SHRINK_FLOOR};

/// Result of [`Ring::push`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pushed {
    /// The pushed item is now the sole, front item.
    pub first: bool,
    /// The ring is dead and the item was discarded.
    pub dead: bool,
}

/// Result of [`Ring::drop_peek`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dropped<T> {
    /// The new front item, if any remain.
    pub next: Option<T>,
    /// The ring is dead.
    pub dead: bool,
}

impl<T> Dropped<T> {
    /// True if another item is waiting to be processed.
    pub fn has_next(&self) -> bool {
        self.next.is_some()
    }
}

/// A FIFO queue with two inline slots and an unbounded overflow.
///
/// All operations take `&self` and are safe to call from any thread; the ring
/// is usually shared behind an `Arc`.
pub struct Ring<T> {
    inner: Mutex<RingInner<T>>,
}

struct RingInner<T> {
    inline: [Option<T>; RING_INLINE_CAPACITY],
    head: usize,
    inline_len: usize,
    overflow: VecDeque<T>,
    dead: bool,
}

impl<T> RingInner<T> {
    fn len(&self) -> usize {
        self.inline_len + self.overflow.len()
    }

    fn front(&self) -> Option<&T> {
        if self.inline_len == 0 {
            return None;
        }
        self.inline[self.head].as_ref()
    }

    fn shrink_overflow(&mut self) {
        if self.overflow.is_empty() {
            self.overflow = VecDeque::new();
            return;
        }
        let cap = self.overflow.capacity();
        let len = self.overflow.len();
        if cap > RING_OVERFLOW_SHRINK_FLOOR && len * 4 <= cap {
            self.overflow.shrink_to(len * 2);
        }
    }
}

impl<T> Ring<T> {
    /// Create an empty ring.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(RingInner {
                inline: std::array::from_fn(|_| None),
                head: 0,
                inline_len: 0,
                overflow: VecDeque::new(),
                dead: false,
            }),
        }
    }

    /// Append an item.
    ///
    /// `first` is true if the ring was empty, meaning the caller must now
    /// process the item. A dead ring discards the item and reports `dead`.
    pub fn push(&self, item: T) -> Pushed {
        let mut inner = self.inner.lock();
        if inner.dead {
            return Pushed {
                first: false,
                dead: true,
            };
        }

        let first = inner.len() == 0;
        if inner.inline_len < RING_INLINE_CAPACITY {
            debug_assert!(inner.overflow.is_empty());
            let slot = (inner.head + inner.inline_len) % RING_INLINE_CAPACITY;
            inner.inline[slot] = Some(item);
            inner.inline_len += 1;
        } else {
            inner.overflow.push_back(item);
        }

        Pushed { first, dead: false }
    }

    /// Remove the front item and report the new front.
    ///
    /// Dropping from an empty live ring is a no-op reporting no next item.
    pub fn drop_peek(&self) -> Dropped<T>
    where
        T: Clone,
    {
        let mut inner = self.inner.lock();
        if inner.dead {
            return Dropped {
                next: None,
                dead: true,
            };
        }
        if inner.inline_len == 0 {
            return Dropped {
                next: None,
                dead: false,
            };
        }

        let head = inner.head;
        inner.inline[head] = None;
        inner.head = (head + 1) % RING_INLINE_CAPACITY;
        inner.inline_len -= 1;

        if let Some(spilled) = inner.overflow.pop_front() {
            let slot = (inner.head + inner.inline_len) % RING_INLINE_CAPACITY;
            inner.inline[slot] = Some(spilled);
            inner.inline_len += 1;
            inner.shrink_overflow();
        }

        Dropped {
            next: inner.front().cloned(),
            dead: false,
        }
    }

    /// Clone the front item without removing it.
    pub fn peek(&self) -> Option<T>
    where
        T: Clone,
    {
        let inner = self.inner.lock();
        if inner.dead {
            return None;
        }
        inner.front().cloned()
    }

    /// Kill the ring, discarding everything queued.
    pub fn die(&self) {
        let mut inner = self.inner.lock();
        inner.dead = true;
        inner.inline = std::array::from_fn(|_| None);
        inner.head = 0;
        inner.inline_len = 0;
        inner.overflow = VecDeque::new();
    }

    pub fn is_dead(&self) -> bool {
        self.inner.lock().dead
    }

    /// Number of queued items, including the front.
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of items currently spilled past the inline slots.
    pub fn overflow_len(&self) -> usize {
        self.inner.lock().overflow.len()
    }

    /// Allocated capacity of the overflow queue.
    pub fn overflow_capacity(&self) -> usize {
        self.inner.lock().overflow.capacity()
    }
}

impl<T> Default for Ring<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for Ring<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("Ring")
            .field("len", &inner.len())
            .field("overflow_capacity", &inner.overflow.capacity())
            .field("dead", &inner.dead)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pushed(first: bool, dead: bool) -> Pushed {
        Pushed { first, dead }
    }

    fn dropped(next: Option<i32>, dead: bool) -> Dropped<i32> {
        Dropped { next, dead }
    }

    // ========================================================================
    // Basic push / drop
    // ========================================================================

    #[test]
    fn test_push_then_drain() {
        let ring = Ring::new();
        assert_eq!(ring.push(1), pushed(true, false));
        assert_eq!(ring.push(2), pushed(false, false));
        assert_eq!(ring.push(3), pushed(false, false));

        assert_eq!(ring.drop_peek(), dropped(Some(2), false));
        assert_eq!(ring.drop_peek(), dropped(Some(3), false));
        assert_eq!(ring.drop_peek(), dropped(None, false));
        assert!(ring.is_empty());
    }

    #[test]
    fn test_alternating_push_drop_stays_inline() {
        let ring = Ring::new();
        for i in 0..100 {
            assert!(ring.push(i).first);
            assert!(!ring.push(i + 1000).first);
            assert_eq!(ring.drop_peek(), dropped(Some(i + 1000), false));
            assert_eq!(ring.drop_peek(), dropped(None, false));
        }
        assert_eq!(ring.overflow_capacity(), 0);
    }

    #[test]
    fn test_overflow_used_and_released() {
        let ring = Ring::new();
        for i in 1..=10 {
            assert_eq!(ring.push(i).first, i == 1);
        }
        assert_eq!(ring.overflow_len(), 8);

        for expected in 2..=10 {
            assert_eq!(ring.drop_peek(), dropped(Some(expected), false));
        }
        assert_eq!(ring.drop_peek(), dropped(None, false));
        assert_eq!(ring.overflow_len(), 0);
        assert_eq!(ring.overflow_capacity(), 0);
    }

    #[test]
    fn test_drop_on_empty_is_noop() {
        let ring: Ring<i32> = Ring::new();
        assert_eq!(ring.drop_peek(), dropped(None, false));
        assert!(ring.push(5).first);
    }

    #[test]
    fn test_peek() {
        let ring = Ring::new();
        assert_eq!(ring.peek(), None);
        ring.push("a");
        ring.push("b");
        assert_eq!(ring.peek(), Some("a"));
        ring.drop_peek();
        assert_eq!(ring.peek(), Some("b"));
    }

    // ========================================================================
    // Termination
    // ========================================================================

    #[test]
    fn test_die_discards_and_refuses() {
        let ring = Ring::new();
        ring.push(1);
        ring.push(2);
        ring.push(3);
        ring.die();

        assert!(ring.is_dead());
        assert_eq!(ring.len(), 0);
        assert_eq!(ring.push(4), pushed(false, true));
        assert_eq!(ring.drop_peek(), dropped(None, true));
        assert_eq!(ring.peek(), None);
    }

    #[test]
    fn test_die_is_idempotent() {
        let ring: Ring<i32> = Ring::new();
        ring.die();
        ring.die();
        assert_eq!(ring.push(1), pushed(false, true));
    }

    // ========================================================================
    // Memory
    // ========================================================================

    #[test]
    fn test_steady_state_capacity_bounded() {
        let ring = Ring::new();
        for i in 0..10 {
            ring.push(i);
        }
        for i in 10..10_010 {
            ring.push(i);
            ring.drop_peek();
        }
        assert_eq!(ring.len(), 10);
        assert!(ring.overflow_capacity() <= 20, "{:?}", ring);
    }

    #[test]
    fn test_burst_capacity_released_after_drain() {
        let ring = Ring::new();
        for i in 0..1000 {
            ring.push(i);
        }
        assert!(ring.overflow_capacity() >= 998);

        for _ in 0..990 {
            ring.drop_peek();
        }
        assert!(ring.overflow_capacity() <= 500, "{:?}", ring);

        for i in 0..10 {
            ring.push(i);
        }
        while ring.drop_peek().has_next() {}
        assert!(ring.overflow_capacity() <= 500);
        assert_eq!(ring.overflow_capacity(), 0);
    }
}
