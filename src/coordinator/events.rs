use std::path::PathBuf;

use crate::models::{BatchReport, ItemStatus, PlaylistItem, ServiceKind};

/// Everything the presentation layer learns about running operations.
/// Sent from worker threads; only the UI thread applies them.
#[derive(Debug, Clone, PartialEq)]
pub enum CoordinatorEvent {
    /// Service-level progress, 0-100.
    Progress { service: ServiceKind, percent: f32 },
    PlaylistLoaded { items: Vec<PlaylistItem> },
    ItemStatus { index: usize, status: ItemStatus },
    ItemProgress { index: usize, percent: f32 },
    SingleFinished { service: ServiceKind, path: PathBuf, already_present: bool },
    BatchFinished(BatchReport),
    Paused { service: ServiceKind },
    Failed { service: ServiceKind, message: String },
}

impl CoordinatorEvent {
    /// True for events that end an operation.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CoordinatorEvent::SingleFinished { .. }
                | CoordinatorEvent::BatchFinished(_)
                | CoordinatorEvent::Paused { .. }
                | CoordinatorEvent::Failed { .. }
        )
    }
}
