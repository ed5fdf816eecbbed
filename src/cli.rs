use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use comfy_table::{Cell, Table};
use dialoguer::Input;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::debug;

use crate::config::{self, Config, SpotifyConfig};
use crate::coordinator::{Coordinator, CoordinatorEvent, LastParams};
use crate::core::{parser, scanner, tagger};
use crate::engine::ytdlp::YtDlp;
use crate::models::{
    DownloadJob, ItemOutcome, ItemStatus, MediaMode, PlaylistItem, PlaylistRequest, ServiceKind,
};
use crate::presentation::PlaylistView;
use crate::sources::spotify::SpotifyClient;
use crate::sources::HttpCoverSource;

const TICK: Duration = Duration::from_millis(100);

#[derive(Parser)]
#[command(
    name = "tunegrab",
    about = "Download audio and video from YouTube, SoundCloud and Spotify playlists"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Download a YouTube video, or its audio with --audio
    Youtube {
        url: String,
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Height ceiling for video, e.g. 720
        #[arg(short, long)]
        quality: Option<String>,
        #[arg(long)]
        audio: bool,
    },
    /// Download a SoundCloud track as audio
    Soundcloud {
        url: String,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Download the first search result
    Search {
        query: String,
        /// Search SoundCloud instead of YouTube
        #[arg(long)]
        soundcloud: bool,
        #[arg(long)]
        video: bool,
        #[arg(short, long)]
        quality: Option<String>,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Download every track of a Spotify playlist (or a single track)
    Spotify {
        url: String,
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Concurrent downloads
        #[arg(short, long)]
        workers: Option<usize>,
    },
    /// List MP3 files in a directory with their tags
    Scan { directory: PathBuf },
    /// Stamp an MP3 file with metadata and an optional cover
    Tag {
        file: PathBuf,
        #[arg(long)]
        title: String,
        #[arg(long)]
        artist: String,
        #[arg(long, default_value = "")]
        album: String,
        #[arg(long = "cover-url")]
        cover_url: Option<String>,
    },
    /// Set Spotify credentials
    Config,
}

pub fn run(cli: Cli) -> Result<()> {
    let cfg = config::load_config();

    match cli.command {
        Commands::Youtube {
            url,
            output,
            quality,
            audio,
        } => {
            let mode = if audio { MediaMode::Audio } else { MediaMode::Video };
            let job = DownloadJob::url(ServiceKind::YouTube, url, output_dir(&cfg, output))
                .with_mode(mode)
                .with_quality(quality.or_else(|| cfg.download.quality.clone()));
            cmd_single(&cfg, job)
        }
        Commands::Soundcloud { url, output } => {
            let job = DownloadJob::url(ServiceKind::SoundCloud, url, output_dir(&cfg, output)).audio();
            cmd_single(&cfg, job)
        }
        Commands::Search {
            query,
            soundcloud,
            video,
            quality,
            output,
        } => {
            let service = if soundcloud {
                ServiceKind::SoundCloud
            } else {
                ServiceKind::YouTube
            };
            let mode = if video && !soundcloud {
                MediaMode::Video
            } else {
                MediaMode::Audio
            };
            let job = DownloadJob::search(service, query, output_dir(&cfg, output))
                .with_mode(mode)
                .with_quality(quality.or_else(|| cfg.download.quality.clone()));
            cmd_single(&cfg, job)
        }
        Commands::Spotify {
            url,
            output,
            workers,
        } => cmd_spotify(&cfg, url, output_dir(&cfg, output), workers),
        Commands::Scan { directory } => cmd_scan(&directory),
        Commands::Tag {
            file,
            title,
            artist,
            album,
            cover_url,
        } => cmd_tag(
            &file,
            PlaylistItem {
                title,
                primary_contributor: artist,
                collection_name: album,
                cover_image_url: cover_url,
            },
        ),
        Commands::Config => cmd_config(),
    }
}

fn output_dir(cfg: &Config, flag: Option<PathBuf>) -> PathBuf {
    flag.unwrap_or_else(|| cfg.download.output_directory())
}

fn build_coordinator(cfg: &Config) -> Result<(Coordinator, Receiver<CoordinatorEvent>)> {
    let engine = YtDlp::locate(
        cfg.download.ytdlp_path.clone(),
        cfg.download.ffmpeg_location.clone(),
    )
    .context("the yt-dlp binary is required for downloads")?;
    let covers = HttpCoverSource::new()?;
    let (tx, rx) = mpsc::channel();
    let coordinator = Coordinator::new(Arc::new(engine), Arc::new(covers), tx)
        .with_workers(cfg.download.workers());
    Ok((coordinator, rx))
}

fn cmd_single(cfg: &Config, job: DownloadJob) -> Result<()> {
    let (coordinator, rx) = build_coordinator(cfg)?;
    let service = job.service;
    drive(Arc::new(coordinator), rx, service, move |c| {
        let _ = c.download_single(job);
    })
}

fn cmd_spotify(cfg: &Config, url: String, output: PathBuf, workers: Option<usize>) -> Result<()> {
    let catalog = SpotifyClient::new(&cfg.spotify)?;
    let (coordinator, rx) = build_coordinator(cfg)?;
    let mut coordinator = coordinator.with_catalog(Arc::new(catalog));
    if let Some(n) = workers {
        coordinator = coordinator.with_workers(n);
    }

    let request = PlaylistRequest {
        url,
        output_directory: output,
    };
    drive(Arc::new(coordinator), rx, ServiceKind::Spotify, move |c| {
        let _ = c.download_playlist(request);
    })
}

/// Terminal presentation loop. Operations run on background threads; this
/// thread owns the view and applies every event it receives. Typing `p`
/// pauses all downloads, `c` continues the last one, `q` quits.
fn drive(
    coordinator: Arc<Coordinator>,
    events: Receiver<CoordinatorEvent>,
    service: ServiceKind,
    start: impl FnOnce(&Coordinator) + Send + 'static,
) -> Result<()> {
    let mut operations = Operations::default();
    operations.spawn(&coordinator, start);
    let input = spawn_input_reader();

    let bar = ProgressBar::new(100);
    bar.set_style(
        ProgressStyle::with_template("{prefix:>10} [{bar:40.cyan/blue}] {pos:>3}% {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> "),
    );
    bar.set_prefix(service.label());
    bar.println("type p + Enter to pause, c + Enter to continue, q + Enter to quit");

    let mut view = PlaylistView::new();
    loop {
        match events.recv_timeout(TICK) {
            Ok(event) => {
                view.apply(&event);
                render(&bar, &view, service, &event);
                for queued in events.try_iter() {
                    view.apply(&queued);
                    render(&bar, &view, service, &queued);
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }

        while let Ok(line) = input.try_recv() {
            match line.trim() {
                "p" | "s" | "stop" => coordinator.stop_all(),
                "c" | "r" | "continue" if view.is_paused() => {
                    bar.set_message("resuming");
                    if let Some(params) = coordinator.last_params(service) {
                        bar.println(format!("continuing {}", describe(&params)));
                    }
                    view.mark_resuming();
                    operations.spawn(&coordinator, |c| {
                        if let Err(e) = c.resume_last() {
                            debug!(error = %e, "resume ended with error");
                        }
                    });
                }
                "c" | "r" | "continue" => bar.println("nothing is paused"),
                "q" | "quit" => {
                    bar.set_message("stopping");
                    operations.stop_and_join(&coordinator);
                    bar.abandon_with_message("quit");
                    print_summary(&view);
                    return Ok(());
                }
                "" => {}
                other => bar.println(format!("unknown command: {}", other)),
            }
        }

        if view.is_finished() {
            break;
        }
    }

    bar.finish();
    print_summary(&view);

    match view.last_error() {
        Some(message) => bail!("{}", message),
        None => Ok(()),
    }
}

/// Threads running coordinator operations for the presentation loop.
#[derive(Default)]
struct Operations {
    handles: Vec<JoinHandle<()>>,
}

impl Operations {
    fn spawn(
        &mut self,
        coordinator: &Arc<Coordinator>,
        op: impl FnOnce(&Coordinator) + Send + 'static,
    ) {
        self.handles.retain(|h| !h.is_finished());
        let coordinator = Arc::clone(coordinator);
        self.handles.push(thread::spawn(move || op(&coordinator)));
    }

    /// Stops everything and waits for each thread, so no engine process
    /// outlives the CLI.
    fn stop_and_join(&mut self, coordinator: &Coordinator) {
        coordinator.stop_all();
        for handle in self.handles.drain(..) {
            if handle.join().is_err() {
                debug!("operation thread panicked");
            }
        }
    }
}

fn spawn_input_reader() -> Receiver<String> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines().map_while(|l| l.ok()) {
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}

fn render(bar: &ProgressBar, view: &PlaylistView, service: ServiceKind, event: &CoordinatorEvent) {
    match event {
        CoordinatorEvent::Progress { service: s, .. } if *s == service => {
            bar.set_position(view.progress(service).round() as u64);
        }
        CoordinatorEvent::PlaylistLoaded { items } => {
            bar.println(format!("{} tracks found", items.len()));
        }
        CoordinatorEvent::ItemProgress { index, percent } => {
            bar.set_message(format!("track {} at {:.0}%", index + 1, percent));
        }
        CoordinatorEvent::ItemStatus { index, status } => {
            if matches!(status, ItemStatus::Done | ItemStatus::Failed) {
                bar.println(format!(
                    "[{}/{}] track {} {}",
                    view.done_count(),
                    view.statuses().len(),
                    index + 1,
                    status.label()
                ));
            }
        }
        CoordinatorEvent::BatchFinished(report) => {
            for path in report.outcomes.iter().filter_map(ItemOutcome::path) {
                bar.println(format!("saved {}", path.display()));
            }
        }
        CoordinatorEvent::SingleFinished {
            path,
            already_present,
            ..
        } => {
            let note = if *already_present { " (already present)" } else { "" };
            bar.println(format!("saved {}{}", path.display(), note));
        }
        CoordinatorEvent::Paused { .. } => {
            bar.set_message("paused");
            bar.println("paused: type c to continue or q to quit");
        }
        _ => {}
    }
}

fn describe(params: &LastParams) -> &str {
    match params {
        LastParams::Single(job) => &job.source,
        LastParams::Playlist(request) => &request.url,
    }
}

fn print_summary(view: &PlaylistView) {
    if view.statuses().is_empty() {
        return;
    }
    println!("{}", view.table());
    println!(
        "\n{} of {} tracks downloaded",
        view.done_count(),
        view.statuses().len()
    );
}

fn cmd_scan(directory: &Path) -> Result<()> {
    let files = scanner::scan_directory(directory)?;

    if files.is_empty() {
        println!("no MP3 files found in {}", directory.display());
        return Ok(());
    }

    let mut table = Table::new();
    table.set_header(vec!["File", "Title", "Artist", "Album", "Cover"]);

    for file in &files {
        let (title, artist, album, cover) = match &file.current_tags {
            Some(t) => (
                t.display_title().to_string(),
                t.display_artist().to_string(),
                t.display_album().to_string(),
                if t.has_cover { "yes" } else { "no" },
            ),
            None => {
                let guess = parser::parse_filename(&file.path);
                (
                    format!("{}?", guess.display_title()),
                    format!("{}?", guess.display_artist()),
                    "-".to_string(),
                    "-",
                )
            }
        };

        table.add_row(vec![
            Cell::new(file.filename()),
            Cell::new(&title),
            Cell::new(&artist),
            Cell::new(&album),
            Cell::new(cover),
        ]);
    }

    println!("{table}");
    println!(
        "\n{} files (tagged: {}, untagged: {})",
        files.len(),
        files.iter().filter(|f| f.has_tags()).count(),
        files.iter().filter(|f| !f.has_tags()).count(),
    );

    Ok(())
}

fn cmd_tag(file: &Path, item: PlaylistItem) -> Result<()> {
    if !file.is_file() {
        bail!("file not found: {}", file.display());
    }
    let covers = HttpCoverSource::new()?;
    let report = tagger::stamp(file, &item, &covers);

    if !report.text_tagged {
        bail!("could not write tags to {}", file.display());
    }
    if item.cover_image_url.is_some() && !report.cover_embedded {
        println!("cover could not be embedded; text tags were written");
    }
    println!("tagged {}: {}", file.display(), item.summary());
    Ok(())
}

fn cmd_config() -> Result<()> {
    let mut cfg = config::load_file_config();

    println!("Spotify API settings");
    println!("(create credentials at https://developer.spotify.com/dashboard)\n");

    let current_id = cfg.spotify.client_id.clone().unwrap_or_default();
    let client_id: String = Input::new()
        .with_prompt("Client ID")
        .with_initial_text(current_id)
        .interact_text()?;

    let current_secret = cfg.spotify.client_secret.clone().unwrap_or_default();
    let client_secret: String = Input::new()
        .with_prompt("Client Secret")
        .with_initial_text(current_secret)
        .interact_text()?;

    cfg.spotify = SpotifyConfig {
        client_id: Some(client_id),
        client_secret: Some(client_secret),
    };

    config::save_config(&cfg)?;
    println!("\nsettings saved");
    Ok(())
}
