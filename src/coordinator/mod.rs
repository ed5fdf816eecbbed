//! Download coordination: single-item orchestration, the bounded playlist
//! batch driver, pause-all/continue and the memory of what to resume.

mod batch;
pub mod events;
mod single;
pub mod stop;

#[cfg(test)]
pub(crate) mod test_support;

use std::collections::HashMap;
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{error, info, warn};

use crate::config::DEFAULT_WORKERS;
use crate::engine::{validate_job, MediaFetcher};
use crate::error::{FetchError, Result};
use crate::models::{BatchReport, DownloadJob, FetchOutcome, PlaylistRequest, ServiceKind};
use crate::sources::{CatalogSource, CoverSource};

pub use events::CoordinatorEvent;
pub use stop::StopControl;

/// Parameters of the last operation started for a service.
#[derive(Debug, Clone, PartialEq)]
pub enum LastParams {
    Single(DownloadJob),
    Playlist(PlaylistRequest),
}

#[derive(Debug, Default)]
struct LastAttempted {
    by_service: HashMap<ServiceKind, LastParams>,
    most_recent: Option<ServiceKind>,
}

/// Result of `resume_last`.
#[derive(Debug, Clone, PartialEq)]
pub enum Resumed {
    Single(FetchOutcome),
    Batch(BatchReport),
}

pub struct Coordinator {
    fetcher: Arc<dyn MediaFetcher>,
    catalog: Option<Arc<dyn CatalogSource>>,
    covers: Arc<dyn CoverSource>,
    stop: Arc<StopControl>,
    last: Mutex<LastAttempted>,
    events: Mutex<Sender<CoordinatorEvent>>,
    workers: usize,
}

impl Coordinator {
    pub fn new(
        fetcher: Arc<dyn MediaFetcher>,
        covers: Arc<dyn CoverSource>,
        events: Sender<CoordinatorEvent>,
    ) -> Self {
        Self {
            fetcher,
            catalog: None,
            covers,
            stop: Arc::new(StopControl::new()),
            last: Mutex::new(LastAttempted::default()),
            events: Mutex::new(events),
            workers: DEFAULT_WORKERS,
        }
    }

    pub fn with_catalog(mut self, catalog: Arc<dyn CatalogSource>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    #[cfg(test)]
    pub fn with_stop_control(mut self, stop: Arc<StopControl>) -> Self {
        self.stop = stop;
        self
    }

    fn emit(&self, event: CoordinatorEvent) {
        let sender = self.events.lock().unwrap_or_else(PoisonError::into_inner);
        let _ = sender.send(event);
    }

    fn remember(&self, service: ServiceKind, params: LastParams) {
        let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        last.by_service.insert(service, params);
        last.most_recent = Some(service);
    }

    pub fn last_params(&self, service: ServiceKind) -> Option<LastParams> {
        let last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        last.by_service.get(&service).cloned()
    }

    /// Downloads one URL or search result, reporting progress for its service.
    pub fn download_single(&self, job: DownloadJob) -> Result<FetchOutcome> {
        let service = job.service;
        if let Err(e) = validate_job(&job) {
            self.emit(CoordinatorEvent::Failed {
                service,
                message: e.to_string(),
            });
            return Err(e);
        }
        self.remember(service, LastParams::Single(job.clone()));

        info!(%service, source = %job.source, "starting download");
        let token = self.stop.session_token();
        let result = self.fetch_one(&job, &token, |percent| {
            self.emit(CoordinatorEvent::Progress { service, percent });
        });

        match &result {
            Ok(outcome) => {
                self.emit(CoordinatorEvent::Progress {
                    service,
                    percent: 100.0,
                });
                self.emit(CoordinatorEvent::SingleFinished {
                    service,
                    path: outcome.path.clone(),
                    already_present: outcome.already_present,
                });
            }
            Err(FetchError::Stopped) => {
                info!(%service, "download paused");
                self.emit(CoordinatorEvent::Paused { service });
            }
            Err(e) => {
                warn!(%service, error = %e, "download failed");
                self.emit(CoordinatorEvent::Failed {
                    service,
                    message: e.to_string(),
                });
            }
        }
        result
    }

    /// Resolves a catalog link and downloads every item it lists.
    pub fn download_playlist(&self, request: PlaylistRequest) -> Result<BatchReport> {
        let service = ServiceKind::Spotify;
        self.remember(service, LastParams::Playlist(request.clone()));

        let result = self.run_batch(&request);
        if let Err(ref e) = result {
            if e.is_stopped() {
                self.emit(CoordinatorEvent::Paused { service });
            } else {
                error!(url = %request.url, error = %e, "playlist download failed");
                self.emit(CoordinatorEvent::Failed {
                    service,
                    message: e.to_string(),
                });
            }
        }
        result
    }

    /// Pauses every running operation of every service.
    pub fn stop_all(&self) {
        info!("stop requested for all downloads");
        self.stop.stop_all();
    }

    /// Clears the stop state and restarts the most recently started operation
    /// with its remembered parameters. Playlists restart from the first item.
    pub fn resume_last(&self) -> Result<Resumed> {
        let params = {
            let last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
            last.most_recent
                .and_then(|service| last.by_service.get(&service).cloned())
        };
        let params = params.ok_or(FetchError::NothingToResume)?;

        if self.stop.is_stopped() {
            info!("clearing stop state");
        }
        self.stop.reset();
        match params {
            LastParams::Single(job) => self.download_single(job).map(Resumed::Single),
            LastParams::Playlist(request) => self.download_playlist(request).map(Resumed::Batch),
        }
    }
}
