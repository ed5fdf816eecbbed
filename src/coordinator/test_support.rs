//! In-memory stand-ins for the fetch engine, catalog and cover services.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crate::coordinator::StopControl;
use crate::engine::{expected_output_path, MediaFetcher, ProgressHook, ResolvedMedia};
use crate::error::{FetchError, Result};
use crate::models::{DownloadJob, PlaylistItem};
use crate::sources::{CatalogSource, CoverSource};

/// Upper bound for a transfer that waits to be stopped.
const BLOCK_LIMIT: Duration = Duration::from_secs(10);

/// Writes a small file per job. Can fail on matching sources, pull the
/// stop control during its first transfer, or block until stopped.
pub struct FakeFetcher {
    resolves: Mutex<Vec<String>>,
    downloads: Mutex<Vec<String>>,
    fail_on: Option<String>,
    stop_on_first: Option<Arc<StopControl>>,
    stop_fired: AtomicBool,
    block_until_stopped: bool,
}

impl FakeFetcher {
    pub fn new() -> Self {
        Self {
            resolves: Mutex::new(Vec::new()),
            downloads: Mutex::new(Vec::new()),
            fail_on: None,
            stop_on_first: None,
            stop_fired: AtomicBool::new(false),
            block_until_stopped: false,
        }
    }

    pub fn blocking() -> Self {
        Self {
            block_until_stopped: true,
            ..Self::new()
        }
    }

    /// Waits until at least `n` transfers have started.
    pub fn wait_for_downloads(&self, n: usize) {
        let started = Instant::now();
        while self.download_calls() < n {
            assert!(started.elapsed() < BLOCK_LIMIT, "transfers never started");
            thread::sleep(Duration::from_millis(5));
        }
    }

    pub fn failing_on(mut self, needle: &str) -> Self {
        self.fail_on = Some(needle.to_string());
        self
    }

    pub fn stopping_on_first_download(mut self, stop: Arc<StopControl>) -> Self {
        self.stop_on_first = Some(stop);
        self
    }

    pub fn expected_path(&self, job: &DownloadJob) -> PathBuf {
        let stem: String = job
            .source
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        expected_output_path(
            &job.output_directory.join(format!("{}.webm", stem)),
            job.media_mode,
        )
    }

    pub fn resolve_calls(&self) -> usize {
        self.resolves.lock().unwrap().len()
    }

    pub fn resolved_sources(&self) -> Vec<String> {
        self.resolves.lock().unwrap().clone()
    }

    pub fn download_calls(&self) -> usize {
        self.downloads.lock().unwrap().len()
    }

    pub fn downloaded_sources(&self) -> Vec<String> {
        self.downloads.lock().unwrap().clone()
    }
}

impl MediaFetcher for FakeFetcher {
    fn resolve(&self, job: &DownloadJob) -> Result<ResolvedMedia> {
        self.resolves.lock().unwrap().push(job.source.clone());
        let output_path = self.expected_path(job);
        Ok(ResolvedMedia {
            title: job.source.clone(),
            output_path,
        })
    }

    fn download(
        &self,
        job: &DownloadJob,
        media: &ResolvedMedia,
        progress: ProgressHook<'_>,
    ) -> Result<PathBuf> {
        self.downloads.lock().unwrap().push(job.source.clone());

        if let Some(ref stop) = self.stop_on_first {
            if !self.stop_fired.swap(true, Ordering::SeqCst) {
                stop.stop_all();
            }
        }
        progress(50.0)?;

        if self.block_until_stopped {
            let started = Instant::now();
            while started.elapsed() < BLOCK_LIMIT {
                progress(50.0)?;
                thread::sleep(Duration::from_millis(5));
            }
            return Err(FetchError::Engine("transfer was never stopped".to_string()));
        }

        if let Some(ref needle) = self.fail_on {
            if job.source.contains(needle.as_str()) {
                return Err(FetchError::Engine(format!("simulated failure for {}", needle)));
            }
        }

        progress(100.0)?;
        std::fs::write(&media.output_path, b"fake audio")?;
        Ok(media.output_path.clone())
    }
}

pub struct FakeCatalog {
    items: Vec<PlaylistItem>,
    failure: Option<String>,
    calls: AtomicUsize,
}

impl FakeCatalog {
    pub fn with_items(items: Vec<PlaylistItem>) -> Self {
        Self {
            items,
            failure: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            items: Vec::new(),
            failure: Some(message.to_string()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl CatalogSource for FakeCatalog {
    fn name(&self) -> &str {
        "fake"
    }

    fn resolve(&self, _url: &str) -> Result<Vec<PlaylistItem>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.failure {
            Some(ref message) => Err(FetchError::Credentials(message.clone())),
            None => Ok(self.items.clone()),
        }
    }
}

pub struct NoCovers;

impl CoverSource for NoCovers {
    fn fetch_cover(&self, url: &str) -> Result<Vec<u8>> {
        Err(FetchError::Engine(format!("no cover for {}", url)))
    }
}
