use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Mutex, PoisonError};
use std::thread;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::core::tagger;
use crate::coordinator::{Coordinator, CoordinatorEvent};
use crate::error::{FetchError, Result};
use crate::models::{
    BatchReport, DownloadJob, ItemOutcome, ItemStatus, PlaylistItem, PlaylistRequest, ServiceKind,
};

/// Search engine used for catalog items.
const ITEM_SERVICE: ServiceKind = ServiceKind::YouTube;

/// Ephemeral state of one playlist-wide attempt.
struct BatchSession {
    items: Vec<PlaylistItem>,
    output_directory: PathBuf,
    next_index: AtomicUsize,
    completed_count: AtomicUsize,
    resume_index: Mutex<Option<usize>>,
}

impl BatchSession {
    fn new(items: Vec<PlaylistItem>, output_directory: PathBuf) -> Self {
        Self {
            items,
            output_directory,
            next_index: AtomicUsize::new(0),
            completed_count: AtomicUsize::new(0),
            resume_index: Mutex::new(None),
        }
    }

    fn len(&self) -> usize {
        self.items.len()
    }

    /// Next index in submission order, or None when all are handed out.
    fn claim(&self) -> Option<usize> {
        let index = self.next_index.fetch_add(1, Ordering::SeqCst);
        (index < self.len()).then_some(index)
    }

    /// Keeps the lowest index seen stopped.
    fn note_stopped(&self, index: usize) {
        let mut resume = self
            .resume_index
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *resume = Some(resume.map_or(index, |r| r.min(index)));
    }

    fn percent_through(&self, index: usize) -> f32 {
        (index + 1) as f32 / self.len() as f32 * 100.0
    }
}

impl Coordinator {
    pub(crate) fn run_batch(&self, request: &PlaylistRequest) -> Result<BatchReport> {
        let token = self.stop.session_token();
        if token.is_cancelled() {
            return Err(FetchError::Stopped);
        }

        let catalog = self.catalog.as_ref().ok_or_else(|| {
            FetchError::Credentials("no catalog service configured".to_string())
        })?;
        let items = catalog.resolve(&request.url)?;
        if items.is_empty() {
            return Err(FetchError::NoTracks(request.url.clone()));
        }

        info!(
            url = %request.url,
            catalog = catalog.name(),
            count = items.len(),
            workers = self.workers,
            "starting playlist download"
        );
        self.emit(CoordinatorEvent::PlaylistLoaded {
            items: items.clone(),
        });

        let session = BatchSession::new(items, request.output_directory.clone());
        let outcomes = self.dispatch(&session, &token);

        let completed_count = session.completed_count.load(Ordering::SeqCst);
        let stopped = token.is_cancelled();
        let final_progress = if stopped {
            completed_count as f32 / session.len() as f32 * 100.0
        } else {
            100.0
        };
        let resume_index = *session
            .resume_index
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let report = BatchReport {
            items: session.items,
            outcomes,
            completed_count,
            resume_index,
            stopped,
            final_progress,
        };

        info!(
            completed = report.completed_count,
            total = report.items.len(),
            stopped = report.stopped,
            progress = report.final_progress,
            resume_index = ?report.resume_index,
            "playlist download finished"
        );
        self.emit(CoordinatorEvent::Progress {
            service: ServiceKind::Spotify,
            percent: final_progress,
        });
        if stopped {
            self.emit(CoordinatorEvent::Paused {
                service: ServiceKind::Spotify,
            });
        } else {
            self.emit(CoordinatorEvent::BatchFinished(report.clone()));
        }
        Ok(report)
    }

    /// Runs every item on at most `self.workers` threads and blocks until each
    /// one has completed, failed or short-circuited on the token.
    fn dispatch(&self, session: &BatchSession, token: &CancellationToken) -> Vec<ItemOutcome> {
        let (tx, rx) = mpsc::channel();
        let workers = self.workers.min(session.len());

        thread::scope(|scope| {
            for _ in 0..workers {
                let tx = tx.clone();
                scope.spawn(move || {
                    while let Some(index) = session.claim() {
                        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                            self.run_item(session, index, token)
                        }))
                        .unwrap_or_else(|_| {
                            warn!(index, "worker panicked");
                            self.emit(CoordinatorEvent::ItemStatus {
                                index,
                                status: ItemStatus::Failed,
                            });
                            ItemOutcome::Failed {
                                reason: "worker panicked".to_string(),
                            }
                        });
                        if tx.send((index, outcome)).is_err() {
                            break;
                        }
                    }
                });
            }
        });
        drop(tx);

        let mut outcomes = vec![ItemOutcome::Stopped; session.len()];
        for (index, outcome) in rx {
            outcomes[index] = outcome;
        }
        outcomes
    }

    fn run_item(&self, session: &BatchSession, index: usize, token: &CancellationToken) -> ItemOutcome {
        let item = &session.items[index];

        if token.is_cancelled() {
            session.note_stopped(index);
            self.emit(CoordinatorEvent::ItemStatus {
                index,
                status: ItemStatus::Stopped,
            });
            return ItemOutcome::Stopped;
        }

        self.emit(CoordinatorEvent::ItemStatus {
            index,
            status: ItemStatus::Downloading,
        });

        let job = DownloadJob::search(
            ITEM_SERVICE,
            item.search_query(),
            session.output_directory.clone(),
        )
        .audio();

        let fetched = self.fetch_one(&job, token, |percent| {
            self.emit(CoordinatorEvent::ItemProgress { index, percent });
        });

        let outcome = match fetched {
            Ok(outcome) => outcome,
            Err(FetchError::Stopped) => {
                session.note_stopped(index);
                self.emit(CoordinatorEvent::ItemStatus {
                    index,
                    status: ItemStatus::Stopped,
                });
                return ItemOutcome::Stopped;
            }
            Err(e) => {
                warn!(index, item = %item.summary(), error = %e, "item failed, continuing");
                self.emit(CoordinatorEvent::ItemStatus {
                    index,
                    status: ItemStatus::Failed,
                });
                return ItemOutcome::Failed {
                    reason: e.to_string(),
                };
            }
        };

        let tagged = tagger::stamp(&outcome.path, item, self.covers.as_ref()).any();
        session.completed_count.fetch_add(1, Ordering::SeqCst);

        self.emit(CoordinatorEvent::Progress {
            service: ServiceKind::Spotify,
            percent: session.percent_through(index),
        });
        self.emit(CoordinatorEvent::ItemStatus {
            index,
            status: ItemStatus::Done,
        });

        if outcome.already_present {
            ItemOutcome::AlreadyPresent {
                path: outcome.path,
                tagged,
            }
        } else {
            ItemOutcome::Downloaded {
                path: outcome.path,
                tagged,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{mpsc, Arc};

    use super::*;
    use crate::coordinator::test_support::*;
    use crate::coordinator::{Resumed, StopControl};

    fn items(titles: &[&str]) -> Vec<PlaylistItem> {
        titles
            .iter()
            .map(|t| PlaylistItem {
                title: t.to_string(),
                primary_contributor: "Band".to_string(),
                collection_name: "Album".to_string(),
                cover_image_url: None,
            })
            .collect()
    }

    fn request(dir: &tempfile::TempDir) -> PlaylistRequest {
        PlaylistRequest {
            url: "https://open.spotify.com/playlist/abc".to_string(),
            output_directory: dir.path().to_path_buf(),
        }
    }

    fn statuses(events: &[CoordinatorEvent], len: usize) -> Vec<ItemStatus> {
        let mut out = vec![ItemStatus::Pending; len];
        for event in events {
            if let CoordinatorEvent::ItemStatus { index, status } = event {
                out[*index] = *status;
            }
        }
        out
    }

    #[test]
    fn test_full_batch_reaches_one_hundred_percent() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(FakeFetcher::new());
        let (tx, rx) = mpsc::channel();
        let coordinator = Coordinator::new(fetcher.clone(), Arc::new(NoCovers), tx)
            .with_catalog(Arc::new(FakeCatalog::with_items(items(&["A", "B", "C", "D", "E"]))));

        let report = coordinator.download_playlist(request(&dir)).unwrap();

        assert_eq!(report.completed_count, 5);
        assert!(!report.stopped);
        assert_eq!(report.final_progress, 100.0);
        assert!(report.outcomes.iter().all(|o| o.is_completed()));
        assert_eq!(fetcher.download_calls(), 5);

        let events: Vec<_> = rx.try_iter().collect();
        assert_eq!(statuses(&events, 5), vec![ItemStatus::Done; 5]);
        let last_progress = events.iter().rev().find_map(|e| match e {
            CoordinatorEvent::Progress { percent, .. } => Some(*percent),
            _ => None,
        });
        assert_eq!(last_progress, Some(100.0));
        assert!(matches!(events.last(), Some(CoordinatorEvent::BatchFinished(_))));
    }

    #[test]
    fn test_failed_item_does_not_fail_batch() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(FakeFetcher::new().failing_on("Second"));
        let (tx, rx) = mpsc::channel();
        let coordinator = Coordinator::new(fetcher.clone(), Arc::new(NoCovers), tx)
            .with_catalog(Arc::new(FakeCatalog::with_items(items(&["First", "Second", "Third"]))));

        let report = coordinator.download_playlist(request(&dir)).unwrap();

        assert_eq!(report.completed_count, 2);
        assert!(!report.stopped);
        assert_eq!(report.final_progress, 100.0);
        assert!(report.outcomes[0].is_completed());
        assert!(matches!(report.outcomes[1], ItemOutcome::Failed { .. }));
        assert!(report.outcomes[2].is_completed());

        let events: Vec<_> = rx.try_iter().collect();
        assert_eq!(
            statuses(&events, 3),
            vec![ItemStatus::Done, ItemStatus::Failed, ItemStatus::Done]
        );
    }

    #[test]
    fn test_empty_catalog_fails_without_touching_output() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("music");
        let fetcher = Arc::new(FakeFetcher::new());
        let (tx, rx) = mpsc::channel();
        let coordinator = Coordinator::new(fetcher.clone(), Arc::new(NoCovers), tx)
            .with_catalog(Arc::new(FakeCatalog::with_items(vec![])));

        let err = coordinator
            .download_playlist(PlaylistRequest {
                url: "https://open.spotify.com/playlist/empty".to_string(),
                output_directory: out.clone(),
            })
            .unwrap_err();

        assert!(matches!(err, FetchError::NoTracks(_)));
        assert!(!out.exists());
        assert_eq!(fetcher.resolve_calls(), 0);
        assert!(rx
            .try_iter()
            .any(|e| matches!(e, CoordinatorEvent::Failed { service: ServiceKind::Spotify, .. })));
    }

    #[test]
    fn test_catalog_failure_fails_whole_batch() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(FakeFetcher::new());
        let (tx, _rx) = mpsc::channel();
        let coordinator = Coordinator::new(fetcher.clone(), Arc::new(NoCovers), tx)
            .with_catalog(Arc::new(FakeCatalog::failing("credentials rejected")));

        let err = coordinator.download_playlist(request(&dir)).unwrap_err();

        assert!(matches!(err, FetchError::Credentials(_)));
        assert_eq!(fetcher.download_calls(), 0);
    }

    #[test]
    fn test_missing_catalog_is_credentials_error() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, _rx) = mpsc::channel();
        let coordinator = Coordinator::new(Arc::new(FakeFetcher::new()), Arc::new(NoCovers), tx);
        assert!(matches!(
            coordinator.download_playlist(request(&dir)),
            Err(FetchError::Credentials(_))
        ));
    }

    #[test]
    fn test_stop_then_resume_restarts_from_first_item() {
        let dir = tempfile::tempdir().unwrap();
        let stop = Arc::new(StopControl::new());
        let fetcher = Arc::new(FakeFetcher::new().stopping_on_first_download(stop.clone()));
        let (tx, rx) = mpsc::channel();
        let coordinator = Coordinator::new(fetcher.clone(), Arc::new(NoCovers), tx)
            .with_stop_control(stop.clone())
            .with_workers(1)
            .with_catalog(Arc::new(FakeCatalog::with_items(items(&["One", "Two", "Three"]))));

        let report = coordinator.download_playlist(request(&dir)).unwrap();

        assert!(report.stopped);
        assert_eq!(report.completed_count, 0);
        assert_eq!(report.resume_index, Some(0));
        assert!(report.outcomes.iter().all(|o| *o == ItemOutcome::Stopped));
        assert_eq!(fetcher.download_calls(), 1);
        let events: Vec<_> = rx.try_iter().collect();
        assert!(events.contains(&CoordinatorEvent::Paused {
            service: ServiceKind::Spotify
        }));

        let Resumed::Batch(resumed) = coordinator.resume_last().unwrap() else {
            panic!("expected a batch resume");
        };

        assert!(!resumed.stopped);
        assert_eq!(resumed.completed_count, 3);
        let sources = fetcher.downloaded_sources();
        assert_eq!(sources.len(), 4);
        assert!(sources[0].starts_with("One "));
        assert!(sources[1].starts_with("One "));
        assert!(sources[2].starts_with("Two "));
        assert!(sources[3].starts_with("Three "));
    }

    #[test]
    fn test_resume_skips_files_already_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(FakeFetcher::new());
        let catalog = Arc::new(FakeCatalog::with_items(items(&["One", "Two"])));
        let (tx, _rx) = mpsc::channel();
        let coordinator = Coordinator::new(fetcher.clone(), Arc::new(NoCovers), tx)
            .with_catalog(catalog.clone());

        coordinator.download_playlist(request(&dir)).unwrap();
        let Resumed::Batch(again) = coordinator.resume_last().unwrap() else {
            panic!("expected a batch resume");
        };

        assert_eq!(catalog.calls(), 2);
        assert_eq!(fetcher.download_calls(), 2);
        assert!(again
            .outcomes
            .iter()
            .all(|o| matches!(o, ItemOutcome::AlreadyPresent { .. })));
        assert_eq!(again.completed_count, 2);
    }

    #[test]
    fn test_stop_all_pauses_concurrent_single_job_too() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(FakeFetcher::blocking());
        let (tx, rx) = mpsc::channel();
        let coordinator = Coordinator::new(fetcher.clone(), Arc::new(NoCovers), tx)
            .with_workers(2)
            .with_catalog(Arc::new(FakeCatalog::with_items(items(&["One", "Two"]))));

        let (report, single) = thread::scope(|scope| {
            let batch = scope.spawn(|| coordinator.download_playlist(request(&dir)));
            let single = scope.spawn(|| {
                coordinator.download_single(DownloadJob::url(
                    ServiceKind::YouTube,
                    "https://youtu.be/other",
                    dir.path().join("singles"),
                ))
            });

            fetcher.wait_for_downloads(3);
            coordinator.stop_all();

            (batch.join().unwrap(), single.join().unwrap())
        });

        let report = report.unwrap();
        assert!(report.stopped);
        assert_eq!(report.completed_count, 0);
        assert!(matches!(single, Err(FetchError::Stopped)));

        let events: Vec<_> = rx.try_iter().collect();
        assert!(events.contains(&CoordinatorEvent::Paused {
            service: ServiceKind::Spotify
        }));
        assert!(events.contains(&CoordinatorEvent::Paused {
            service: ServiceKind::YouTube
        }));
    }

    #[test]
    fn test_items_are_tagged_with_their_own_record() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(FakeFetcher::new());
        let (tx, _rx) = mpsc::channel();
        let coordinator = Coordinator::new(fetcher.clone(), Arc::new(NoCovers), tx)
            .with_catalog(Arc::new(FakeCatalog::with_items(items(&["One", "Two", "Three", "Four"]))));

        let report = coordinator.download_playlist(request(&dir)).unwrap();

        for (item, outcome) in report.items.iter().zip(&report.outcomes) {
            let tags = tagger::read_tags(outcome.path().unwrap()).unwrap().unwrap();
            assert_eq!(tags.title.as_deref(), Some(item.title.as_str()));
            assert!(matches!(outcome, ItemOutcome::Downloaded { tagged: true, .. }));
        }
    }
}
