use std::collections::HashMap;

use comfy_table::{Cell, Table};

use crate::coordinator::CoordinatorEvent;
use crate::models::{ItemStatus, PlaylistItem, ServiceKind};

/// Live playlist status list plus per-service progress.
/// Owned by the UI thread and changed only through `apply`.
#[derive(Debug, Default)]
pub struct PlaylistView {
    items: Vec<PlaylistItem>,
    statuses: Vec<ItemStatus>,
    progress: HashMap<ServiceKind, f32>,
    paused: bool,
    finished: bool,
    last_error: Option<String>,
}

impl PlaylistView {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, event: &CoordinatorEvent) {
        match event {
            CoordinatorEvent::Progress { service, percent } => {
                self.progress.insert(*service, *percent);
            }
            CoordinatorEvent::PlaylistLoaded { items } => {
                self.items = items.clone();
                self.statuses = vec![ItemStatus::Pending; items.len()];
                self.paused = false;
                self.finished = false;
            }
            CoordinatorEvent::ItemStatus { index, status } => {
                if let Some(slot) = self.statuses.get_mut(*index) {
                    *slot = *status;
                }
            }
            CoordinatorEvent::Failed { message, .. } => {
                self.last_error = Some(message.clone());
            }
            _ => {}
        }

        if event.is_terminal() {
            self.paused = matches!(event, CoordinatorEvent::Paused { .. });
            self.finished = !self.paused;
        }
    }

    /// Called when a continue is dispatched, so a second request is refused
    /// until the resumed operation reports back.
    pub fn mark_resuming(&mut self) {
        self.paused = false;
        self.finished = false;
    }

    pub fn progress(&self, service: ServiceKind) -> f32 {
        self.progress.get(&service).copied().unwrap_or(0.0)
    }

    pub fn statuses(&self) -> &[ItemStatus] {
        &self.statuses
    }

    pub fn done_count(&self) -> usize {
        self.statuses
            .iter()
            .filter(|s| **s == ItemStatus::Done)
            .count()
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn table(&self) -> Table {
        let mut table = Table::new();
        table.set_header(vec!["#", "Title", "Artist", "Album", "Status"]);
        for (i, (item, status)) in self.items.iter().zip(&self.statuses).enumerate() {
            table.add_row(vec![
                Cell::new(i + 1),
                Cell::new(&item.title),
                Cell::new(&item.primary_contributor),
                Cell::new(&item.collection_name),
                Cell::new(status.label()),
            ]);
        }
        table
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loaded(n: usize) -> PlaylistView {
        let mut view = PlaylistView::new();
        view.apply(&CoordinatorEvent::PlaylistLoaded {
            items: (0..n)
                .map(|i| PlaylistItem {
                    title: format!("Track {}", i + 1),
                    ..Default::default()
                })
                .collect(),
        });
        view
    }

    #[test]
    fn test_failed_middle_item_stays_not_done() {
        let mut view = loaded(3);
        for (index, status) in [
            (0, ItemStatus::Done),
            (1, ItemStatus::Failed),
            (2, ItemStatus::Done),
        ] {
            view.apply(&CoordinatorEvent::ItemStatus { index, status });
        }

        assert_eq!(
            view.statuses(),
            &[ItemStatus::Done, ItemStatus::Failed, ItemStatus::Done]
        );
        assert_eq!(view.done_count(), 2);
    }

    #[test]
    fn test_progress_and_pause_tracking() {
        let mut view = loaded(2);
        view.apply(&CoordinatorEvent::Progress {
            service: ServiceKind::Spotify,
            percent: 50.0,
        });
        view.apply(&CoordinatorEvent::Paused {
            service: ServiceKind::Spotify,
        });

        assert_eq!(view.progress(ServiceKind::Spotify), 50.0);
        assert_eq!(view.progress(ServiceKind::YouTube), 0.0);
        assert!(view.is_paused());
        assert!(!view.is_finished());
    }

    #[test]
    fn test_continue_is_accepted_once_per_pause() {
        let mut view = loaded(1);
        view.apply(&CoordinatorEvent::Paused {
            service: ServiceKind::Spotify,
        });
        assert!(view.is_paused());

        view.mark_resuming();
        assert!(!view.is_paused());
        assert!(!view.is_finished());

        view.apply(&CoordinatorEvent::Paused {
            service: ServiceKind::Spotify,
        });
        assert!(view.is_paused());
    }

    #[test]
    fn test_out_of_range_status_is_ignored() {
        let mut view = loaded(1);
        view.apply(&CoordinatorEvent::ItemStatus {
            index: 5,
            status: ItemStatus::Done,
        });
        assert_eq!(view.done_count(), 0);
    }

    #[test]
    fn test_failure_records_message() {
        let mut view = PlaylistView::new();
        view.apply(&CoordinatorEvent::Failed {
            service: ServiceKind::Spotify,
            message: "no tracks found".to_string(),
        });
        assert!(view.is_finished());
        assert_eq!(view.last_error(), Some("no tracks found"));
    }
}
