//! Process-wide cap on concurrently open recognizer connections.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Fixed-capacity permit pool shared by every session in a process.
///
/// Acquisition never waits: a saturated pool returns `None` and the caller
/// schedules its own retry, staying responsive to cancellation. Permits
/// release on drop, so failure, cancellation, and normal-exit paths all
/// release exactly once.
#[derive(Debug)]
pub struct PermitPool {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

impl PermitPool {
    pub fn new(capacity: usize) -> Self {
        PermitPool {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Takes one permit if any is free.
    pub fn try_acquire(&self) -> Option<AsrPermit> {
        match Arc::clone(&self.semaphore).try_acquire_owned() {
            Ok(permit) => Some(AsrPermit { _permit: permit }),
            Err(_) => None,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Permits currently free.
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }
}

/// One held recognizer connection slot.
#[derive(Debug)]
pub struct AsrPermit {
    _permit: OwnedSemaphorePermit,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn saturated_pool_refuses_without_waiting() {
        let pool = PermitPool::new(2);
        let first = pool.try_acquire().expect("first permit");
        let _second = pool.try_acquire().expect("second permit");
        assert!(pool.try_acquire().is_none());
        assert_eq!(pool.available(), 0);

        drop(first);
        assert_eq!(pool.available(), 1);
        assert!(pool.try_acquire().is_some());
    }

    #[test]
    fn capacity_is_fixed() {
        let pool = PermitPool::new(5);
        assert_eq!(pool.capacity(), 5);
        assert_eq!(pool.available(), 5);
    }
}
