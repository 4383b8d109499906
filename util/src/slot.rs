//! # Shared latest value slot
//!
//! A [`SharedLatestSlot`] decouples a producer loop from a consumer loop running at a different
//! rate. It holds at most one value: publishing replaces whatever is there, so the consumer only
//! ever sees the newest value and nothing queues up behind a slow consumer.
//!
//! Alongside the value the slot keeps a fresh flag. [`take`](SharedLatestSlot::take) hands out each
//! published value at most once and clears the flag, while [`peek`](SharedLatestSlot::peek) always
//! returns the last published value so a consumer can hold it.
//!
//! The lock is only ever held to move a value in or out of the slot, never across I/O.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Single value, last-writer-wins holder shared between a producer and a consumer.
///
/// Cloning the slot creates another handle to the same value. Large values should be wrapped in an
/// `Arc` so that [`peek`](Self::peek) stays cheap.
pub struct SharedLatestSlot<T> {
    value: Arc<Mutex<Latest<T>>>,
}

struct Latest<T> {
    value: Option<T>,

    /// Set on publish, cleared by take
    fresh: bool,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl<T> SharedLatestSlot<T> {
    /// Create a new empty slot.
    pub fn new() -> Self {
        Self {
            value: Arc::new(Mutex::new(Latest {
                value: None,
                fresh: false,
            })),
        }
    }

    /// Publish a value, discarding any value that has not been taken yet.
    pub fn publish(&self, value: T) {
        let mut latest = self.lock();
        latest.value = Some(value);
        latest.fresh = true;
    }

    /// Returns true if a value has ever been published.
    pub fn is_occupied(&self) -> bool {
        self.lock().value.is_some()
    }

    /// Returns true if the last published value has not been taken yet.
    pub fn is_fresh(&self) -> bool {
        self.lock().fresh
    }

    fn lock(&self) -> MutexGuard<'_, Latest<T>> {
        // The value and flag are only ever written together, so a poisoned slot is still valid.
        self.value.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T: Clone> SharedLatestSlot<T> {
    /// Return the current value if it is fresh and mark it consumed.
    ///
    /// A published value is returned by at most one call to `take`. The value stays in the slot
    /// for [`peek`](Self::peek).
    pub fn take(&self) -> Option<T> {
        let mut latest = self.lock();
        if !latest.fresh {
            return None;
        }
        latest.fresh = false;
        latest.value.clone()
    }

    /// Return a copy of the last published value, fresh or not, without consuming it.
    pub fn peek(&self) -> Option<T> {
        self.lock().value.clone()
    }
}

impl<T> Clone for SharedLatestSlot<T> {
    fn clone(&self) -> Self {
        Self {
            value: self.value.clone(),
        }
    }
}

impl<T> Default for SharedLatestSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use std::{sync::Barrier, thread};

    #[test]
    fn test_empty() {
        let slot = SharedLatestSlot::<u32>::new();
        assert_eq!(slot.peek(), None);
        assert_eq!(slot.take(), None);
        assert!(!slot.is_occupied());
    }

    #[test]
    fn test_last_writer_wins() {
        let slot = SharedLatestSlot::new();
        slot.publish(1);
        slot.publish(2);
        slot.publish(3);

        assert_eq!(slot.peek(), Some(3));
        assert_eq!(slot.take(), Some(3));
        assert_eq!(slot.take(), None);
    }

    #[test]
    fn test_peek_after_take() {
        let slot = SharedLatestSlot::new();
        slot.publish(5);
        assert!(slot.is_fresh());

        assert_eq!(slot.take(), Some(5));
        assert!(!slot.is_fresh());
        assert!(slot.is_occupied());
        assert_eq!(slot.peek(), Some(5));
        assert_eq!(slot.take(), None);

        slot.publish(6);
        assert_eq!(slot.peek(), Some(6));
        assert_eq!(slot.take(), Some(6));
    }

    #[test]
    fn test_peek_holds() {
        let slot = SharedLatestSlot::new();
        slot.publish("a");

        for _ in 0..5 {
            assert_eq!(slot.peek(), Some("a"));
        }
        assert!(slot.is_occupied());
        assert!(slot.is_fresh());
    }

    #[test]
    fn test_handles_share_value() {
        let producer = SharedLatestSlot::new();
        let consumer = producer.clone();

        producer.publish(vec![1, 2, 3]);
        assert_eq!(consumer.take(), Some(vec![1, 2, 3]));
        assert!(!producer.is_fresh());
        assert_eq!(producer.peek(), Some(vec![1, 2, 3]));
    }

    #[test]
    fn test_concurrent_take_no_duplicates() {
        const NUM_VALUES: u32 = 2000;

        let slot = SharedLatestSlot::<u32>::new();
        let barrier = Arc::new(Barrier::new(3));

        let consumers: Vec<_> = (0..2)
            .map(|_| {
                let slot = slot.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    let mut seen = Vec::new();
                    for _ in 0..(NUM_VALUES * 4) {
                        if let Some(v) = slot.take() {
                            seen.push(v);
                        }
                    }
                    seen
                })
            })
            .collect();

        barrier.wait();
        for v in 0..NUM_VALUES {
            slot.publish(v);
        }

        let mut all: Vec<u32> = consumers
            .into_iter()
            .flat_map(|c| c.join().unwrap())
            .collect();
        if let Some(v) = slot.take() {
            all.push(v);
        }

        let total = all.len();
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), total, "a value was taken twice");
    }

    #[test]
    fn test_consumer_never_goes_backwards() {
        let slot = SharedLatestSlot::<u64>::new();
        let consumer = slot.clone();

        let jh = thread::spawn(move || {
            let mut last = None;
            for _ in 0..10_000 {
                if let Some(v) = consumer.peek() {
                    if let Some(l) = last {
                        assert!(v >= l);
                    }
                    last = Some(v);
                }
            }
        });

        for v in 0..10_000u64 {
            slot.publish(v);
        }

        jh.join().unwrap();
    }

    #[test]
    fn test_poisoned_lock_recovers() {
        let slot = SharedLatestSlot::new();
        slot.publish(7);

        let poisoner = slot.clone();
        let _ = thread::spawn(move || {
            let _guard = poisoner.value.lock().unwrap();
            panic!("poison the slot");
        })
        .join();

        assert_eq!(slot.peek(), Some(7));
        slot.publish(8);
        assert_eq!(slot.take(), Some(8));
    }
}
