//! Single-assignment reply cell keyed by correlation id
//!
//! A [`MessageFuture`] is created by [`crate::Stream::send`], shared between
//! the caller (who waits on it) and the channel's receive loop (who resolves
//! it), and poisoned by the disconnect monitor when the connection drops.
//!
//! Transitions are terminal:
//!
//! - `Pending -> Resolved(content)` via [`MessageFuture::resolve`]
//! - `Pending -> Poisoned` via [`MessageFuture::poison`]
//!
//! Resolving a non-pending future is an error (`AlreadyResolved` or
//! `Disconnected`) and leaves it untouched. Poisoning a non-pending future is
//! a no-op. Every operation on a poisoned future reports `Disconnected`.

use std::time::{Duration, Instant};

use core_types::CorrelationId;
use parking_lot::{Condvar, Mutex};

use crate::error::FutureError;

#[derive(Debug)]
enum FutureState {
    Pending,
    Resolved(Vec<u8>),
    Poisoned,
}

#[derive(Debug)]
pub struct MessageFuture {
    correlation_id: CorrelationId,
    state: Mutex<FutureState>,
    ready: Condvar,
}

impl MessageFuture {
    pub fn new(correlation_id: CorrelationId) -> Self {
        Self {
            correlation_id,
            state: Mutex::new(FutureState::Pending),
            ready: Condvar::new(),
        }
    }

    /// A future that was poisoned before anyone could wait on it.
    pub fn poisoned(correlation_id: CorrelationId) -> Self {
        Self {
            correlation_id,
            state: Mutex::new(FutureState::Poisoned),
            ready: Condvar::new(),
        }
    }

    pub fn correlation_id(&self) -> &CorrelationId {
        &self.correlation_id
    }

    /// Blocks until the reply arrives or the connection drops.
    pub fn result(&self) -> Result<Vec<u8>, FutureError> {
        let mut state = self.state.lock();
        loop {
            match &*state {
                FutureState::Resolved(content) => return Ok(content.clone()),
                FutureState::Poisoned => return Err(FutureError::Disconnected),
                FutureState::Pending => self.ready.wait(&mut state),
            }
        }
    }

    /// Like [`MessageFuture::result`], bounded by `timeout`.
    ///
    /// A timeout leaves the future pending; a later call may still succeed.
    pub fn result_timeout(&self, timeout: Duration) -> Result<Vec<u8>, FutureError> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        loop {
            match &*state {
                FutureState::Resolved(content) => return Ok(content.clone()),
                FutureState::Poisoned => return Err(FutureError::Disconnected),
                FutureState::Pending => {
                    if self.ready.wait_until(&mut state, deadline).timed_out()
                        && matches!(*state, FutureState::Pending)
                    {
                        return Err(FutureError::Timeout);
                    }
                }
            }
        }
    }

    /// Records the reply and wakes every waiter.
    pub fn resolve(&self, content: Vec<u8>) -> Result<(), FutureError> {
        let mut state = self.state.lock();
        match &*state {
            FutureState::Pending => {
                *state = FutureState::Resolved(content);
                drop(state);
                self.ready.notify_all();
                Ok(())
            }
            FutureState::Resolved(_) => Err(FutureError::AlreadyResolved),
            FutureState::Poisoned => Err(FutureError::Disconnected),
        }
    }

    /// Marks the future as failed by a lost connection. Returns true if this
    /// call performed the transition.
    pub fn poison(&self) -> bool {
        let mut state = self.state.lock();
        if !matches!(*state, FutureState::Pending) {
            return false;
        }
        *state = FutureState::Poisoned;
        drop(state);
        self.ready.notify_all();
        true
    }

    pub fn is_done(&self) -> Result<bool, FutureError> {
        match &*self.state.lock() {
            FutureState::Pending => Ok(false),
            FutureState::Resolved(_) => Ok(true),
            FutureState::Poisoned => Err(FutureError::Disconnected),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn pending() -> Arc<MessageFuture> {
        Arc::new(MessageFuture::new(CorrelationId::generate()))
    }

    #[test]
    fn test_result_returns_resolved_content() {
        let future = pending();
        assert_eq!(future.is_done(), Ok(false));
        future.resolve(b"reply".to_vec()).unwrap();
        assert_eq!(future.result().unwrap(), b"reply");
        // waiting again does not consume the reply
        assert_eq!(future.result().unwrap(), b"reply");
        assert_eq!(future.is_done(), Ok(true));
    }

    #[test]
    fn test_result_blocks_until_resolved_from_another_thread() {
        let future = pending();
        let resolver = Arc::clone(&future);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            resolver.resolve(b"late".to_vec()).unwrap();
        });
        assert_eq!(future.result().unwrap(), b"late");
        handle.join().unwrap();
    }

    #[test]
    fn test_timeout_leaves_future_pending() {
        let future = pending();
        assert_eq!(
            future.result_timeout(Duration::from_millis(10)),
            Err(FutureError::Timeout)
        );
        future.resolve(b"after".to_vec()).unwrap();
        assert_eq!(
            future.result_timeout(Duration::from_millis(10)).unwrap(),
            b"after"
        );
    }

    #[test]
    fn test_second_resolve_is_rejected() {
        let future = pending();
        future.resolve(b"one".to_vec()).unwrap();
        assert_eq!(
            future.resolve(b"two".to_vec()),
            Err(FutureError::AlreadyResolved)
        );
        assert_eq!(future.result().unwrap(), b"one");
        assert!(!future.poison());
        assert_eq!(future.result().unwrap(), b"one");
    }

    #[test]
    fn test_poison_wakes_blocked_waiter() {
        let future = pending();
        let waiter = Arc::clone(&future);
        let handle = thread::spawn(move || waiter.result());
        thread::sleep(Duration::from_millis(20));
        assert!(future.poison());
        assert_eq!(handle.join().unwrap(), Err(FutureError::Disconnected));
    }

    #[test]
    fn test_poisoned_future_always_reports_disconnected() {
        let future = MessageFuture::poisoned(CorrelationId::from("gone"));
        assert_eq!(future.result(), Err(FutureError::Disconnected));
        assert_eq!(
            future.result_timeout(Duration::from_millis(1)),
            Err(FutureError::Disconnected)
        );
        assert_eq!(
            future.resolve(b"x".to_vec()),
            Err(FutureError::Disconnected)
        );
        assert_eq!(future.is_done(), Err(FutureError::Disconnected));
        assert!(!future.poison());
        assert_eq!(future.correlation_id().as_str(), "gone");
    }
}
