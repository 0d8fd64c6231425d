//! Cancellation tokens with parent-to-child cascade.
//!
//! The scheduler owns a root token; every run derives a child. Cancelling
//! the root cancels all children, while cancelling one child leaves its
//! siblings running. Checks are lock-free atomic loads, cheap enough for
//! the per-chunk streaming path.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Clone, Default)]
pub struct CancelToken {
    own: Arc<AtomicBool>,
    ancestors: Vec<Arc<AtomicBool>>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Derive a child token: cancelled when either itself or any ancestor
    /// is cancelled.
    pub fn child(&self) -> Self {
        let mut ancestors = self.ancestors.clone();
        ancestors.push(self.own.clone());
        Self {
            own: Arc::new(AtomicBool::new(false)),
            ancestors,
        }
    }

    /// Signal cancellation for this token and its descendants.
    pub fn cancel(&self) {
        self.own.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.own.load(Ordering::Acquire)
            || self.ancestors.iter().any(|a| a.load(Ordering::Acquire))
    }
}
