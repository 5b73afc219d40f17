use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Cooperative cancellation flag shared between a caller and a long-running
/// computation.
///
/// Cloning the token shares the underlying flag. Computations observe the
/// flag at coarse checkpoints (beam boundaries, optimizer iterations, Monte
/// Carlo batches) and return their most recent consistent result when it is
/// set.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation. All clones of this token observe the request.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

/// Optional wall-clock budget for a long-running computation.
///
/// Checked at the same checkpoints as [`CancelToken`]; an expired budget
/// yields a partial result rather than an error.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunBudget {
    deadline: Option<Instant>,
}

impl RunBudget {
    /// A budget that never expires.
    pub fn unlimited() -> Self {
        Self::default()
    }

    /// A budget expiring `timeout` from now.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            deadline: Some(Instant::now() + timeout),
        }
    }

    pub fn expired(&self) -> bool {
        match self.deadline {
            Some(deadline) => Instant::now() >= deadline,
            None => false,
        }
    }
}
