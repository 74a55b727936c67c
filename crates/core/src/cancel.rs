//! Cooperative cancellation shared by every stage of a run.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

/// Why a run stopped early.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Cancelled {
    #[error("translation cancelled")]
    Requested,
    #[error("translation deadline exceeded")]
    DeadlineExceeded,
}

/// Cheap, cloneable handle checked between batches, between files and while
/// waiting for a slot. Clones share the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// A token that also trips once `timeout` has elapsed from now.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            flag: Arc::default(),
            deadline: Some(Instant::now() + timeout),
        }
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.checkpoint().is_err()
    }

    /// Return an error if the run should stop here.
    pub fn checkpoint(&self) -> Result<(), Cancelled> {
        if self.flag.load(Ordering::SeqCst) {
            return Err(Cancelled::Requested);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Err(Cancelled::DeadlineExceeded),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_the_flag() {
        let token = CancelToken::new();
        let other = token.clone();
        assert!(token.checkpoint().is_ok());
        other.cancel();
        assert_eq!(token.checkpoint(), Err(Cancelled::Requested));
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_trips_after_timeout() {
        let token = CancelToken::with_timeout(Duration::from_secs(5));
        assert!(!token.is_cancelled());
        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(token.checkpoint(), Err(Cancelled::DeadlineExceeded));
    }
}
