use std::fmt;

/// Phase notifications emitted while an analysis runs
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Progress {
    Loading,
    Scanning,
    Tiling { regions: usize },
    Annotating { completed: usize, total: usize },
    Consolidating,
    Done { items: usize },
}

impl fmt::Display for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Progress::Loading => write!(f, "Loading images..."),
            Progress::Scanning => write!(f, "Scanning for changed areas..."),
            Progress::Tiling { regions } => write!(f, "Preparing analysis tiles ({} regions)...", regions),
            Progress::Annotating { completed, total } => {
                write!(f, "Annotating: {} of {} tiles", completed, total)
            }
            Progress::Consolidating => write!(f, "Merging and deduplicating results..."),
            Progress::Done { items } => write!(f, "Done: {} changes", items),
        }
    }
}

/// Receiver of progress updates. Implemented for any `Fn(&Progress) + Send + Sync`.
pub trait ProgressSink: Send + Sync {
    fn report(&self, progress: &Progress);
}

impl<F> ProgressSink for F
where
    F: Fn(&Progress) + Send + Sync,
{
    fn report(&self, progress: &Progress) {
        self(progress)
    }
}
