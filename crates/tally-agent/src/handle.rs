//! A cloneable handle for controlling a session from outside the loop.

use parking_lot::Mutex;
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use tokio_util::sync::CancellationToken;

/// A cloneable handle for aborting the running session.
///
/// All fields are `Arc`-wrapped, so cloning is cheap.
#[derive(Clone)]
pub struct AgentHandle {
    pub(crate) cancel: Arc<Mutex<CancellationToken>>,
    pub(crate) is_running: Arc<AtomicBool>,
}

impl AgentHandle {
    pub(crate) fn new() -> Self {
        Self {
            cancel: Arc::new(Mutex::new(CancellationToken::new())),
            is_running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Abort the running session.
    pub fn abort(&self) {
        self.cancel.lock().cancel();
    }

    /// Install a fresh token and mark the loop running. Returns the new token.
    pub(crate) fn start(&self) -> CancellationToken {
        let token = CancellationToken::new();
        *self.cancel.lock() = token.clone();
        self.is_running.store(true, Ordering::Release);
        token
    }

    /// Mark the loop idle.
    pub(crate) fn finish(&self) {
        self.is_running.store(false, Ordering::Release);
    }

    /// Whether the agent loop is currently running.
    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_abort_cancels_current_token() {
        let handle = AgentHandle::new();
        let token = handle.start();
        handle.clone().abort();
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn test_start_replaces_cancelled_token() {
        let handle = AgentHandle::new();
        let old = handle.start();
        handle.abort();
        let fresh = handle.start();
        assert!(old.is_cancelled());
        assert!(!fresh.is_cancelled());
    }

    #[test]
    fn test_running_flag() {
        let handle = AgentHandle::new();
        assert!(!handle.is_running());
        handle.start();
        assert!(handle.clone().is_running());
        handle.finish();
        assert!(!handle.is_running());
    }
}
