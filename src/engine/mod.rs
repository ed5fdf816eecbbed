pub mod ytdlp;

use std::path::{Path, PathBuf};

use url::Url;

use crate::error::{FetchError, Result};
use crate::models::{DownloadJob, JobKind, MediaMode, ServiceKind};

/// Container produced by the audio post-processing step.
pub const AUDIO_EXTENSION: &str = "mp3";
pub const DEFAULT_HEIGHT: u32 = 1080;

const YOUTUBE_HOSTS: &[&str] = &["youtube.com", "youtu.be"];
const SOUNDCLOUD_HOSTS: &[&str] = &["soundcloud.com"];
const SPOTIFY_HOSTS: &[&str] = &["open.spotify.com"];

/// Where the engine will put a job's file, known before any transfer.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedMedia {
    pub title: String,
    pub output_path: PathBuf,
}

/// Progress hook handed to the engine. Called with a 0-100 percentage; an
/// `Err` aborts the transfer and must be returned unchanged.
pub type ProgressHook<'a> = &'a mut dyn FnMut(f32) -> Result<()>;

/// Resolves and downloads a playable stream.
pub trait MediaFetcher: Send + Sync {
    /// Computes the final output path for a job, extension substitution
    /// included, without transferring media.
    fn resolve(&self, job: &DownloadJob) -> Result<ResolvedMedia>;

    /// Transfers the media and returns the path of the file written.
    fn download(
        &self,
        job: &DownloadJob,
        media: &ResolvedMedia,
        progress: ProgressHook<'_>,
    ) -> Result<PathBuf>;
}

/// Rejects malformed input before any network activity.
pub fn validate_job(job: &DownloadJob) -> Result<()> {
    match job.kind {
        JobKind::SearchQuery => {
            if job.source.trim().is_empty() {
                return Err(FetchError::InvalidInput(
                    "search query is empty".to_string(),
                ));
            }
            Ok(())
        }
        JobKind::SingleUrl => validate_url(job.service, &job.source),
    }
}

pub fn validate_url(service: ServiceKind, source: &str) -> Result<()> {
    let url = Url::parse(source.trim())
        .map_err(|_| FetchError::InvalidInput(format!("not a URL: {}", source)))?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(FetchError::InvalidInput(format!(
            "unsupported scheme in {}",
            source
        )));
    }

    let hosts = match service {
        ServiceKind::YouTube => YOUTUBE_HOSTS,
        ServiceKind::SoundCloud => SOUNDCLOUD_HOSTS,
        ServiceKind::Spotify => SPOTIFY_HOSTS,
    };
    let host = url.host_str().unwrap_or_default().to_lowercase();
    let known = hosts
        .iter()
        .any(|h| host == *h || host.ends_with(&format!(".{}", h)));

    if !known {
        return Err(FetchError::InvalidInput(format!(
            "{} is not a {} link",
            source, service
        )));
    }
    Ok(())
}

/// Parses a quality hint such as `"720"` or `"720p"` into a height ceiling.
pub fn height_ceiling(quality: Option<&str>) -> u32 {
    quality
        .map(|q| q.trim().trim_end_matches(['p', 'P']))
        .and_then(|q| q.parse().ok())
        .filter(|h| *h > 0)
        .unwrap_or(DEFAULT_HEIGHT)
}

pub fn format_selector(job: &DownloadJob) -> String {
    match job.media_mode {
        MediaMode::Audio => "bestaudio/best".to_string(),
        MediaMode::Video => {
            let h = height_ceiling(job.quality_hint.as_deref());
            format!("bestvideo[height<={h}]+bestaudio/best[height<={h}]")
        }
    }
}

/// Applies the extension change the audio conversion will make.
pub fn expected_output_path(raw: &Path, mode: MediaMode) -> PathBuf {
    match mode {
        MediaMode::Audio => raw.with_extension(AUDIO_EXTENSION),
        MediaMode::Video => raw.to_path_buf(),
    }
}
