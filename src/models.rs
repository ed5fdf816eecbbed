use std::fmt;
use std::path::{Path, PathBuf};

/// External service a job or remembered parameter set belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceKind {
    YouTube,
    SoundCloud,
    Spotify,
}

impl ServiceKind {
    pub fn label(&self) -> &'static str {
        match self {
            ServiceKind::YouTube => "YouTube",
            ServiceKind::SoundCloud => "SoundCloud",
            ServiceKind::Spotify => "Spotify",
        }
    }
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    SingleUrl,
    SearchQuery,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaMode {
    Audio,
    Video,
}

/// One download request handed to the fetch engine. Not persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadJob {
    pub kind: JobKind,
    pub service: ServiceKind,
    pub source: String,
    pub output_directory: PathBuf,
    pub media_mode: MediaMode,
    pub quality_hint: Option<String>,
}

impl DownloadJob {
    pub fn url(service: ServiceKind, url: impl Into<String>, output_directory: impl Into<PathBuf>) -> Self {
        Self {
            kind: JobKind::SingleUrl,
            service,
            source: url.into(),
            output_directory: output_directory.into(),
            media_mode: MediaMode::Video,
            quality_hint: None,
        }
    }

    pub fn search(service: ServiceKind, query: impl Into<String>, output_directory: impl Into<PathBuf>) -> Self {
        Self {
            kind: JobKind::SearchQuery,
            ..Self::url(service, query, output_directory)
        }
    }

    pub fn audio(mut self) -> Self {
        self.media_mode = MediaMode::Audio;
        self
    }

    pub fn with_mode(mut self, mode: MediaMode) -> Self {
        self.media_mode = mode;
        self
    }

    pub fn with_quality(mut self, quality: Option<String>) -> Self {
        self.quality_hint = quality;
        self
    }
}

/// Playlist download parameters, remembered for resume.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaylistRequest {
    pub url: String,
    pub output_directory: PathBuf,
}

/// One entry of a resolved catalog listing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlaylistItem {
    pub title: String,
    pub primary_contributor: String,
    pub collection_name: String,
    pub cover_image_url: Option<String>,
}

impl PlaylistItem {
    pub fn summary(&self) -> String {
        format!(
            "{} - {} [{}]",
            self.primary_contributor, self.title, self.collection_name
        )
    }

    /// Search text sent to the fetch engine for this item.
    pub fn search_query(&self) -> String {
        format!("{} {} official audio", self.title, self.primary_contributor)
    }
}

/// A file produced (or found) by a single-item fetch.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchOutcome {
    pub path: PathBuf,
    pub already_present: bool,
}

/// Display status of a playlist entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemStatus {
    Pending,
    Downloading,
    Done,
    Failed,
    Stopped,
}

impl ItemStatus {
    pub fn label(&self) -> &'static str {
        match self {
            ItemStatus::Pending => "pending",
            ItemStatus::Downloading => "downloading",
            ItemStatus::Done => "done",
            ItemStatus::Failed => "failed",
            ItemStatus::Stopped => "stopped",
        }
    }
}

/// Per-item result returned from the batch driver.
#[derive(Debug, Clone, PartialEq)]
pub enum ItemOutcome {
    Downloaded { path: PathBuf, tagged: bool },
    AlreadyPresent { path: PathBuf, tagged: bool },
    Failed { reason: String },
    Stopped,
}

impl ItemOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(
            self,
            ItemOutcome::Downloaded { .. } | ItemOutcome::AlreadyPresent { .. }
        )
    }

    pub fn path(&self) -> Option<&Path> {
        match self {
            ItemOutcome::Downloaded { path, .. } | ItemOutcome::AlreadyPresent { path, .. } => {
                Some(path)
            }
            _ => None,
        }
    }
}

/// Final state of one playlist-wide download attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchReport {
    pub items: Vec<PlaylistItem>,
    pub outcomes: Vec<ItemOutcome>,
    pub completed_count: usize,
    /// Lowest index observed stopped. Advisory only.
    pub resume_index: Option<usize>,
    pub stopped: bool,
    pub final_progress: f32,
}

/// Tag fields read back from an audio file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackTags {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub has_cover: bool,
}

impl TrackTags {
    pub fn display_title(&self) -> &str {
        self.title.as_deref().unwrap_or("unknown")
    }

    pub fn display_artist(&self) -> &str {
        self.artist.as_deref().unwrap_or("unknown")
    }

    pub fn display_album(&self) -> &str {
        self.album.as_deref().unwrap_or("unknown")
    }
}

#[derive(Debug, Clone)]
pub struct AudioFile {
    pub path: PathBuf,
    pub current_tags: Option<TrackTags>,
}

impl AudioFile {
    pub fn filename(&self) -> &str {
        self.path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("unknown")
    }

    pub fn has_tags(&self) -> bool {
        self.current_tags.is_some()
    }
}
