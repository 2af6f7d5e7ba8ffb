//! Cooperative cancellation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::ReplayError;

/// Shared cancellation request, polled between decode iterations.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    /// Creates a flag that is not set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation. May be called from any thread.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Returns whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Fails with [`ReplayError::Cancelled`] once cancellation was requested.
    pub fn check(&self) -> Result<(), ReplayError> {
        if self.is_cancelled() {
            return Err(ReplayError::Cancelled);
        }
        Ok(())
    }
}
