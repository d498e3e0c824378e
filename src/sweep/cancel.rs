use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared stop request for a running sweep.
///
/// Cloning yields a handle to the same flag, so the operator side (Ctrl-C
/// handler, UI) and the sweep can each hold one. The sweep polls the flag at
/// every grid-cell boundary; an instrument exchange in flight always completes
/// before the request is honored.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    /// A token that is not cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request the sweep to stop.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Whether a stop was requested.
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Clear a previous request so the token can be reused.
    pub fn reset(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}
