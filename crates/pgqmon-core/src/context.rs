//! Deadlines and cancellation for blocking database calls.
//!
//! A [`Context`] carries an absolute deadline and a cancel flag shared with
//! every context derived from it. Derived contexts never outlive their parent:
//! [`Context::child`] always picks the earlier of the two deadlines.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::error::QpmError;

#[derive(Clone, Debug)]
pub struct Context {
    deadline: Instant,
    cancelled: Arc<AtomicBool>,
}

impl Context {
    /// Creates a root context expiring `timeout` from now.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            deadline: Instant::now() + timeout,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Derives a context whose deadline is the minimum of this one and
    /// `timeout` from now. Cancellation propagates from the parent.
    pub fn child(&self, timeout: Duration) -> Self {
        let candidate = Instant::now() + timeout;
        Self {
            deadline: self.deadline.min(candidate),
            cancelled: Arc::clone(&self.cancelled),
        }
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Time left before the deadline, zero once it has passed.
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// Cancels this context and every context sharing its flag.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Returns the termination reason, if any.
    pub fn check(&self) -> Result<(), QpmError> {
        if self.is_cancelled() {
            return Err(QpmError::Cancelled);
        }
        if self.remaining().is_zero() {
            return Err(QpmError::DeadlineExceeded);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn child_never_extends_parent_deadline() {
        let parent = Context::with_timeout(Duration::from_millis(50));
        let child = parent.child(Duration::from_secs(10));
        assert_eq!(child.deadline(), parent.deadline());

        let tighter = parent.child(Duration::from_millis(1));
        assert!(tighter.deadline() <= parent.deadline());
    }

    #[test]
    fn cancel_propagates_to_children() {
        let parent = Context::with_timeout(Duration::from_secs(5));
        let child = parent.child(Duration::from_secs(1));
        assert!(child.check().is_ok());
        parent.cancel();
        assert_eq!(child.check(), Err(QpmError::Cancelled));
    }

    #[test]
    fn expired_context_reports_deadline() {
        let ctx = Context::with_timeout(Duration::ZERO);
        assert_eq!(ctx.check(), Err(QpmError::DeadlineExceeded));
        assert_eq!(ctx.remaining(), Duration::ZERO);
    }
}
