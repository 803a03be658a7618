//! One-shot wait-points for pacemaker hooks.
//!
//! A [`WaitPoint`] is a resolvable signal: callers `subscribe` and get a
//! one-shot receiver, the core `resolve`s it from inside a handler, and
//! the event loop drives the continuations on its next tick. Resolution
//! drains the current subscribers; anyone subscribing afterwards waits for
//! the next cycle.

use tokio::sync::oneshot;

/// A multi-subscriber one-shot signal.
#[derive(Debug)]
pub struct WaitPoint<T: Clone> {
    subscribers: Vec<oneshot::Sender<T>>,
}

impl<T: Clone> Default for WaitPoint<T> {
    fn default() -> Self {
        WaitPoint::new()
    }
}

impl<T: Clone> WaitPoint<T> {
    pub fn new() -> Self {
        WaitPoint {
            subscribers: Vec::new(),
        }
    }

    /// Register for the next resolution.
    pub fn subscribe(&mut self) -> oneshot::Receiver<T> {
        let (tx, rx) = oneshot::channel();
        self.subscribers.push(tx);
        rx
    }

    /// Fire the signal once: every current subscriber receives a clone of
    /// `value`, then the subscriber list starts fresh.
    pub fn resolve(&mut self, value: T) {
        for tx in self.subscribers.drain(..) {
            // Subscribers may have gone away; that is fine.
            let _ = tx.send(value.clone());
        }
    }

    /// Whether anyone is currently waiting.
    pub fn has_subscribers(&self) -> bool {
        !self.subscribers.is_empty()
    }

    /// Build a receiver that is already resolved with `value`.
    pub fn resolved(value: T) -> oneshot::Receiver<T> {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(value);
        rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_reaches_every_subscriber() {
        let mut wp: WaitPoint<u32> = WaitPoint::new();
        let mut a = wp.subscribe();
        let mut b = wp.subscribe();
        wp.resolve(7);
        assert_eq!(a.try_recv().unwrap(), 7);
        assert_eq!(b.try_recv().unwrap(), 7);
    }

    #[test]
    fn late_subscribers_wait_for_the_next_cycle() {
        let mut wp: WaitPoint<u32> = WaitPoint::new();
        wp.resolve(1);
        let mut late = wp.subscribe();
        assert!(late.try_recv().is_err(), "nothing resolved yet this cycle");
        wp.resolve(2);
        assert_eq!(late.try_recv().unwrap(), 2);
    }

    #[test]
    fn resolved_receiver_fires_immediately() {
        let mut rx = WaitPoint::resolved(42u32);
        assert_eq!(rx.try_recv().unwrap(), 42);
    }
}
