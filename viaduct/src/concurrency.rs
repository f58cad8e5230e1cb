//! The bounded concurrency gate: caps the number of in-flight requests
//! being dispatched at once, queuing the rest in FIFO order.
//!
//! Built directly on `tokio::sync::Semaphore`, whose waiter queue is
//! already FIFO, applied here to the whole dispatch pipeline rather than
//! to a single middleware.

use std::sync::Arc;

use tokio::sync::{Semaphore, SemaphorePermit};

/// Caps concurrent in-flight requests at `limit`. Acquiring a permit when
/// the gate is saturated waits in arrival order; the in-flight count never
/// exceeds `limit` and never goes negative (releasing more permits than
/// were acquired is not possible through this API).
#[derive(Clone)]
pub struct ConcurrencyGate {
    semaphore: Arc<Semaphore>,
    limit: usize,
}

/// A held slot in the gate. Dropping it releases the slot back to the pool.
pub struct Permit<'a> {
    _inner: SemaphorePermit<'a>,
}

impl ConcurrencyGate {
    /// Builds a gate allowing at most `limit` concurrent requests.
    pub fn new(limit: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(limit)),
            limit,
        }
    }

    /// The configured concurrency limit.
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// The number of requests currently in flight (limit minus available
    /// permits).
    pub fn in_flight(&self) -> usize {
        self.limit - self.semaphore.available_permits()
    }

    /// Waits for a slot, FIFO among other waiters, then returns a permit
    /// that releases the slot on drop.
    pub async fn acquire(&self) -> Permit<'_> {
        let inner = self
            .semaphore
            .acquire()
            .await
            .expect("ConcurrencyGate semaphore is never closed");
        Permit { _inner: inner }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn in_flight_tracks_held_permits() {
        let gate = ConcurrencyGate::new(2);
        assert_eq!(gate.in_flight(), 0);
        let p1 = gate.acquire().await;
        assert_eq!(gate.in_flight(), 1);
        let p2 = gate.acquire().await;
        assert_eq!(gate.in_flight(), 2);
        drop(p1);
        assert_eq!(gate.in_flight(), 1);
        drop(p2);
        assert_eq!(gate.in_flight(), 0);
    }

    #[tokio::test]
    async fn third_waiter_blocks_until_release() {
        let gate = ConcurrencyGate::new(1);
        let p1 = gate.acquire().await;
        let gate2 = gate.clone();
        let handle = tokio::spawn(async move {
            let _p2 = gate2.acquire().await;
        });
        tokio::task::yield_now().await;
        assert_eq!(gate.in_flight(), 1);
        drop(p1);
        handle.await.unwrap();
    }
}
