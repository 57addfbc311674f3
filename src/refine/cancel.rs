use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A caller-owned cancellation signal. Clones share the same flag.
///
/// The loop looks at it before each refinement pass, so a pass that already started always completes.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag {
    cancelled: Arc<AtomicBool>,
}

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}
