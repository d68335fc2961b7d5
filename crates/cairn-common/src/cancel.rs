use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A cooperative cancellation signal shared between a caller and the
/// long-running operation it started (§5: `getTarball`, `writeTarball`, and
/// uplink fan-out all "accept a cancellation token; when triggered, the
/// operation aborts all in-flight I/O"). Cloning shares the same flag;
/// checking it is a single atomic load, cheap enough to call at every
/// suspension point.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        CancelToken(Arc::new(AtomicBool::new(false)))
    }

    /// A token that can never be cancelled, for callers with nothing to
    /// wire up (e.g. tests, or internal calls that don't expose one).
    pub fn never() -> Self {
        CancelToken::new()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_is_visible_through_clones() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn never_starts_uncancelled() {
        assert!(!CancelToken::never().is_cancelled());
    }
}
