//! Cooperative shutdown signal for the sync loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A shutdown token shared between the sync loop and its owner.
///
/// The token can be cloned across tasks; requesting shutdown on any clone is
/// observed by all of them. The loop checks it between ticks only, so an
/// in-flight tick always completes before the loop stops.
#[derive(Debug, Clone, Default)]
pub struct ShutdownToken {
    requested: Arc<AtomicBool>,
}

impl ShutdownToken {
    /// Create a new token with shutdown not requested.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request shutdown. All clones observe it.
    pub fn request(&self) {
        self.requested.store(true, Ordering::SeqCst);
    }

    /// Check whether shutdown has been requested.
    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_token_not_requested() {
        assert!(!ShutdownToken::new().is_requested());
    }

    #[test]
    fn test_clone_shares_state() {
        let token = ShutdownToken::new();
        let clone = token.clone();

        clone.request();

        assert!(token.is_requested());
        assert!(clone.is_requested());
    }
}
