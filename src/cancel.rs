use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::AnalysisError;

/// Cooperative cancellation flag shared between the caller and a running analysis.
///
/// The pipeline only polls it between phases and between annotation batches;
/// calls already in flight are allowed to finish and their results discarded.
#[derive(Debug, Clone, Default)]
pub struct CancelSignal {
    flag: Arc<AtomicBool>,
}

impl CancelSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Checkpoint: `Err(Cancelled)` once the flag is set
    pub fn check(&self) -> Result<(), AnalysisError> {
        if self.is_cancelled() {
            Err(AnalysisError::Cancelled)
        } else {
            Ok(())
        }
    }
}
