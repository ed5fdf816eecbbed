use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use tracing::{debug, info};

use crate::engine::{
    expected_output_path, format_selector, MediaFetcher, ProgressHook, ResolvedMedia,
    AUDIO_EXTENSION,
};
use crate::error::{FetchError, Result};
use crate::models::{DownloadJob, JobKind, MediaMode, ServiceKind};

const OUTPUT_TEMPLATE: &str = "%(title)s.%(ext)s";
const PROGRESS_MARKER: &str = "tunegrab-progress:";
const FILE_MARKER: &str = "tunegrab-file:";
/// How long the engine may stay silent before the stop state is re-checked.
const SILENCE_POLL: Duration = Duration::from_millis(250);

/// Fetch engine backed by the external `yt-dlp` binary.
pub struct YtDlp {
    binary: PathBuf,
    ffmpeg_location: Option<PathBuf>,
}

enum Line {
    Out(String),
    Err(String),
}

impl YtDlp {
    pub fn new(binary: PathBuf, ffmpeg_location: Option<PathBuf>) -> Self {
        Self {
            binary,
            ffmpeg_location,
        }
    }

    /// Uses the configured binary, falling back to `yt-dlp` on `PATH`.
    pub fn locate(configured: Option<PathBuf>, ffmpeg_location: Option<PathBuf>) -> Result<Self> {
        let binary = match configured {
            Some(path) => path,
            None => which::which("yt-dlp")
                .map_err(|e| FetchError::EngineMissing(format!("yt-dlp: {}", e)))?,
        };
        info!(binary = %binary.display(), "using yt-dlp");
        Ok(Self::new(binary, ffmpeg_location))
    }

    fn target(job: &DownloadJob) -> String {
        match (job.kind, job.service) {
            (JobKind::SingleUrl, _) => job.source.trim().to_string(),
            (JobKind::SearchQuery, ServiceKind::SoundCloud) => {
                format!("scsearch1:{}", job.source.trim())
            }
            (JobKind::SearchQuery, _) => format!("ytsearch1:{}", job.source.trim()),
        }
    }

    fn template(job: &DownloadJob) -> String {
        job.output_directory
            .join(OUTPUT_TEMPLATE)
            .to_string_lossy()
            .into_owned()
    }

    fn common_args(job: &DownloadJob) -> Vec<String> {
        vec![
            "--no-playlist".to_string(),
            "--no-warnings".to_string(),
            "-f".to_string(),
            format_selector(job),
            "-o".to_string(),
            Self::template(job),
        ]
    }

    fn download_args(&self, job: &DownloadJob) -> Vec<String> {
        let mut args = Self::common_args(job);
        args.extend(["--continue", "--newline", "--progress"].map(String::from));
        args.push("--progress-template".to_string());
        args.push(format!("download:{}%(progress._percent_str)s", PROGRESS_MARKER));
        args.push("--print".to_string());
        args.push(format!("after_move:{}%(filepath)s", FILE_MARKER));
        if job.media_mode == MediaMode::Audio {
            args.extend(["-x", "--audio-format", AUDIO_EXTENSION].map(String::from));
        }
        if let Some(ref ffmpeg) = self.ffmpeg_location {
            args.push("--ffmpeg-location".to_string());
            args.push(ffmpeg.to_string_lossy().into_owned());
        }
        args.push(Self::target(job));
        args
    }
}

impl MediaFetcher for YtDlp {
    fn resolve(&self, job: &DownloadJob) -> Result<ResolvedMedia> {
        let mut args = Self::common_args(job);
        args.extend(["--skip-download", "--print", "filename"].map(String::from));
        args.push(Self::target(job));
        debug!(?args, "resolving output filename");

        let output = Command::new(&self.binary).args(&args).output()?;
        if !output.status.success() {
            return Err(FetchError::Engine(last_error_line(&String::from_utf8_lossy(
                &output.stderr,
            ))));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let raw = stdout
            .lines()
            .map(str::trim)
            .rfind(|l| !l.is_empty())
            .ok_or_else(|| FetchError::Engine("yt-dlp printed no filename".to_string()))?;

        let output_path = expected_output_path(Path::new(raw), job.media_mode);
        let title = output_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();

        Ok(ResolvedMedia { title, output_path })
    }

    fn download(
        &self,
        job: &DownloadJob,
        media: &ResolvedMedia,
        progress: ProgressHook<'_>,
    ) -> Result<PathBuf> {
        let args = self.download_args(job);
        debug!(?args, "starting yt-dlp");

        let mut child = Command::new(&self.binary)
            .args(&args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let (tx, rx) = mpsc::channel();
        if let Some(out) = child.stdout.take() {
            forward_lines(out, tx.clone(), Line::Out);
        }
        if let Some(err) = child.stderr.take() {
            forward_lines(err, tx.clone(), Line::Err);
        }
        drop(tx);

        let mut written = None;
        let mut stderr_tail = String::new();
        let mut last_percent = 0.0;

        loop {
            let line = match rx.recv_timeout(SILENCE_POLL) {
                Ok(line) => line,
                Err(RecvTimeoutError::Timeout) => {
                    // Re-report the last value so a stop is seen while yt-dlp is quiet.
                    if let Err(e) = progress(last_percent) {
                        kill(&mut child);
                        return Err(e);
                    }
                    continue;
                }
                Err(RecvTimeoutError::Disconnected) => break,
            };
            let text = match &line {
                Line::Out(text) | Line::Err(text) => text.trim(),
            };
            if let Some(pct) = parse_progress(text) {
                last_percent = pct;
                if let Err(e) = progress(pct) {
                    kill(&mut child);
                    return Err(e);
                }
            } else if let Some(path) = text.strip_prefix(FILE_MARKER) {
                written = Some(PathBuf::from(path));
            } else if let Line::Err(_) = line {
                stderr_tail.push_str(text);
                stderr_tail.push('\n');
            }
        }

        let status = child.wait()?;
        if !status.success() {
            return Err(FetchError::Engine(last_error_line(&stderr_tail)));
        }

        // Older yt-dlp builds may not honour after_move printing.
        let path = written.unwrap_or_else(|| media.output_path.clone());
        if !path.exists() {
            return Err(FetchError::Engine(format!(
                "yt-dlp finished but {} is missing",
                path.display()
            )));
        }
        Ok(path)
    }
}

fn kill(child: &mut Child) {
    debug!(pid = child.id(), "killing yt-dlp");
    let _ = child.kill();
    let _ = child.wait();
}

fn forward_lines<R, F>(reader: R, tx: mpsc::Sender<Line>, wrap: F)
where
    R: Read + Send + 'static,
    F: Fn(String) -> Line + Send + 'static,
{
    thread::spawn(move || {
        for line in BufReader::new(reader).lines().map_while(|l| l.ok()) {
            if tx.send(wrap(line)).is_err() {
                break;
            }
        }
    });
}

fn parse_progress(line: &str) -> Option<f32> {
    let rest = line.strip_prefix(PROGRESS_MARKER)?;
    let number = rest.trim().strip_suffix('%')?;
    number.trim().parse::<f32>().ok()
}

fn last_error_line(stderr: &str) -> String {
    stderr
        .lines()
        .map(str::trim)
        .rfind(|l| l.starts_with("ERROR:"))
        .or_else(|| stderr.lines().map(str::trim).rfind(|l| !l.is_empty()))
        .unwrap_or("yt-dlp exited with an error")
        .to_string()
}
