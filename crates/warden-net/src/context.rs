//! Cancellation and deadlines for dials and requests.
//!
//! A [`DialContext`] is handed to every [`NetDriver::dial`](crate::NetDriver::dial)
//! and every HTTP request. It carries an optional deadline and a shared
//! [`CancelToken`]; derived contexts may only narrow the deadline.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::Notify;

#[derive(Debug, Default)]
struct CancelState {
    cancelled: AtomicBool,
    notify: Notify,
}

/// Shared cancellation flag. Clones observe the same state.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    state: Arc<CancelState>,
}

impl CancelToken {
    /// Create a token that is not cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel every operation observing this token.
    pub fn cancel(&self) {
        self.state.cancelled.store(true, Ordering::SeqCst);
        self.state.notify.notify_waiters();
    }

    /// Whether [`cancel`](Self::cancel) has been called.
    pub fn is_cancelled(&self) -> bool {
        self.state.cancelled.load(Ordering::SeqCst)
    }

    /// Resolve once the token is cancelled.
    pub async fn cancelled(&self) {
        loop {
            // Register before checking the flag so a concurrent cancel
            // cannot slip between the check and the wait.
            let notified = self.state.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

/// Why a context is no longer usable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextError {
    /// The token was cancelled.
    Canceled,
    /// The deadline passed.
    DeadlineExceeded,
}

/// Deadline and cancellation carried through a dial or request.
#[derive(Debug, Clone, Default)]
pub struct DialContext {
    deadline: Option<Instant>,
    cancel: CancelToken,
}

impl DialContext {
    /// A context with no deadline and a fresh token.
    pub fn background() -> Self {
        Self::default()
    }

    /// A context expiring `timeout` from now.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::background().child_with_timeout(timeout)
    }

    /// A context expiring at `deadline`.
    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            deadline: Some(deadline),
            cancel: CancelToken::new(),
        }
    }

    /// Replace the cancellation token.
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Derive a context sharing cancellation whose deadline is the earlier
    /// of this one and `timeout` from now.
    pub fn child_with_timeout(&self, timeout: Duration) -> Self {
        let candidate = Instant::now().checked_add(timeout);
        let deadline = match (self.deadline, candidate) {
            (Some(current), Some(candidate)) => Some(current.min(candidate)),
            (current, candidate) => current.or(candidate),
        };
        Self {
            deadline,
            cancel: self.cancel.clone(),
        }
    }

    /// The deadline, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// The cancellation token.
    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Time left before the deadline. `None` means unbounded.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Report whether the context has been cancelled or has expired.
    pub fn err(&self) -> Option<ContextError> {
        if self.cancel.is_cancelled() {
            Some(ContextError::Canceled)
        } else if self.remaining() == Some(Duration::ZERO) {
            Some(ContextError::DeadlineExceeded)
        } else {
            None
        }
    }

    /// Resolve once the context is cancelled or its deadline passes.
    ///
    /// Must be polled inside a runtime with the time driver enabled.
    pub async fn done(&self) -> ContextError {
        let expired = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline.into()).await,
                None => std::future::pending().await,
            }
        };
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => ContextError::Canceled,
            () = expired => ContextError::DeadlineExceeded,
        }
    }
}
