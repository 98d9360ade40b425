//! Cooperative cancellation of polling loops

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{Error, Result};

/// Shared flag checked by engines between polling iterations
///
/// Clones share the same flag, so a token handed to an engine can be
/// cancelled from another thread. A cancelled wait leaves the target in an
/// unknown run state; issue a stop before accessing memory again.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    /// Create a token that is not cancelled
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Clear a previous cancellation request
    pub fn reset(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }

    /// Whether cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// The shared flag, for handing to code that sets it directly
    ///
    /// Signal handlers registered with `signal_hook::flag::register` store
    /// `true` into it, which cancels every clone of this token.
    pub fn flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.flag)
    }

    /// Return `Error::Cancelled` if cancellation was requested
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_flag() {
        let token = CancelToken::new();
        let other = token.clone();
        assert!(token.check().is_ok());
        other.cancel();
        assert_eq!(token.check(), Err(Error::Cancelled));
        token.reset();
        assert!(!other.is_cancelled());
    }

    #[test]
    fn test_flag_store_cancels_token() {
        let token = CancelToken::new();
        let flag = token.flag();
        flag.store(true, Ordering::SeqCst);
        assert_eq!(token.clone().check(), Err(Error::Cancelled));
        token.reset();
        assert!(!flag.load(Ordering::SeqCst));
    }
}
