use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::coordinator::Coordinator;
use crate::engine::validate_job;
use crate::error::{FetchError, Result};
use crate::models::{DownloadJob, FetchOutcome};

impl Coordinator {
    /// Runs one fetch under `token`.
    ///
    /// The token is checked before anything starts and on every engine
    /// progress callback; there is no other cancellation point. Repeated
    /// progress values are reported once. A file already
    /// present at the resolved path counts as done without a transfer.
    pub(crate) fn fetch_one(
        &self,
        job: &DownloadJob,
        token: &CancellationToken,
        mut on_progress: impl FnMut(f32),
    ) -> Result<FetchOutcome> {
        validate_job(job)?;
        if token.is_cancelled() {
            return Err(FetchError::Stopped);
        }

        std::fs::create_dir_all(&job.output_directory)?;
        let media = self.fetcher.resolve(job)?;
        debug!(title = %media.title, path = %media.output_path.display(), "resolved output path");

        if media.output_path.exists() {
            info!(path = %media.output_path.display(), "already downloaded, skipping");
            return Ok(FetchOutcome {
                path: media.output_path,
                already_present: true,
            });
        }

        let mut last = None;
        let mut hook = |percent: f32| -> Result<()> {
            if token.is_cancelled() {
                return Err(FetchError::Stopped);
            }
            let percent = percent.clamp(0.0, 100.0);
            if last != Some(percent) {
                last = Some(percent);
                on_progress(percent);
            }
            Ok(())
        };
        let path = self.fetcher.download(job, &media, &mut hook)?;

        info!(path = %path.display(), "download complete");
        Ok(FetchOutcome {
            path,
            already_present: false,
        })
    }
}
