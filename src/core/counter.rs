//! Lock-free bounded slot counter.

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::core::error::SchedulerError;

/// Counts free execution slots in `0..=limit`.
#[derive(Debug)]
pub struct BoundedCounter {
    value: AtomicUsize,
    limit: usize,
}

impl BoundedCounter {
    /// A counter with every slot free.
    #[must_use]
    pub const fn new(limit: usize) -> Self {
        Self {
            value: AtomicUsize::new(limit),
            limit,
        }
    }

    /// Upper bound.
    #[must_use]
    pub const fn limit(&self) -> usize {
        self.limit
    }

    /// Current number of free slots.
    #[must_use]
    pub fn get(&self) -> usize {
        self.value.load(Ordering::Acquire)
    }

    /// Mark every slot free again.
    pub fn reset(&self) {
        self.value.store(self.limit, Ordering::Release);
    }

    /// Take a slot. Returns the slots left free.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::SlotUnderflow`] at zero; the counter is unchanged.
    pub fn decrement(&self) -> Result<usize, SchedulerError> {
        self.value
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |v| v.checked_sub(1))
            .map(|previous| previous - 1)
            .map_err(|_| SchedulerError::SlotUnderflow)
    }

    /// Release a slot.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::SlotOverflow`] if every slot is free already.
    pub fn increment(&self) -> Result<usize, SchedulerError> {
        let limit = self.limit;
        self.value
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |v| {
                (v < limit).then_some(v + 1)
            })
            .map(|previous| previous + 1)
            .map_err(|_| SchedulerError::SlotOverflow(limit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_bounds() {
        let counter = BoundedCounter::new(2);
        assert_eq!(counter.decrement().unwrap(), 1);
        assert_eq!(counter.decrement().unwrap(), 0);
        assert!(matches!(counter.decrement(), Err(SchedulerError::SlotUnderflow)));
        assert_eq!(counter.get(), 0);
        assert_eq!(counter.increment().unwrap(), 1);
        assert_eq!(counter.increment().unwrap(), 2);
        assert!(matches!(counter.increment(), Err(SchedulerError::SlotOverflow(2))));
        assert_eq!(counter.get(), 2);
    }

    #[test]
    fn test_concurrent_reservations_never_exceed_limit() {
        let counter = Arc::new(BoundedCounter::new(8));
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let counter = Arc::clone(&counter);
                thread::spawn(move || (0..100).filter(|_| counter.decrement().is_ok()).count())
            })
            .collect();
        let taken: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(taken, 8);
        assert_eq!(counter.get(), 0);
    }
}
