//! Cancellation and deadline propagation for blocking probes
//!
//! A [`Context`] is handed to every network operation. Child contexts
//! inherit the parent's cancellation and never outlive its deadline.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::error::ContextError;

#[derive(Debug)]
struct ContextInner {
    cancelled: AtomicBool,
    deadline: Option<Instant>,
    parent: Option<Context>,
}

/// Cancellable context with an optional deadline
#[derive(Debug, Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

impl Default for Context {
    fn default() -> Self {
        Self::background()
    }
}

impl Context {
    /// Root context: never times out, only cancelled explicitly
    pub fn background() -> Self {
        Self {
            inner: Arc::new(ContextInner {
                cancelled: AtomicBool::new(false),
                deadline: None,
                parent: None,
            }),
        }
    }

    /// Child context that expires after `timeout` (or earlier, with the parent)
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let own = Instant::now() + timeout;
        let deadline = match self.deadline() {
            Some(parent) if parent < own => parent,
            _ => own,
        };
        Self {
            inner: Arc::new(ContextInner {
                cancelled: AtomicBool::new(false),
                deadline: Some(deadline),
                parent: Some(self.clone()),
            }),
        }
    }

    /// Child context sharing the parent's deadline, cancellable on its own
    pub fn with_cancel(&self) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                cancelled: AtomicBool::new(false),
                deadline: self.deadline(),
                parent: Some(self.clone()),
            }),
        }
    }

    /// Cancel this context and every context derived from it
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.inner.deadline
    }

    /// Time left before the deadline (`None` when there is no deadline)
    pub fn remaining(&self) -> Option<Duration> {
        self.inner
            .deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Returns the reason this context is done, if it is
    pub fn err(&self) -> Result<(), ContextError> {
        if self.is_cancelled() {
            return Err(ContextError::Cancelled);
        }
        if let Some(deadline) = self.inner.deadline {
            if Instant::now() >= deadline {
                return Err(ContextError::DeadlineExceeded);
            }
        }
        Ok(())
    }

    pub fn is_done(&self) -> bool {
        self.err().is_err()
    }

    fn is_cancelled(&self) -> bool {
        if self.inner.cancelled.load(Ordering::SeqCst) {
            return true;
        }
        match &self.inner.parent {
            Some(parent) => parent.is_cancelled(),
            None => false,
        }
    }

    /// Clamp an I/O timeout to the time this context has left
    pub fn bound(&self, timeout: Duration) -> Duration {
        match self.remaining() {
            // Zero is rejected by socket timeout setters
            Some(left) => left.min(timeout).max(Duration::from_millis(1)),
            None => timeout,
        }
    }
}
