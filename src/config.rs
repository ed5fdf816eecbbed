use std::path::PathBuf;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::warn;

pub const DEFAULT_WORKERS: usize = 4;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub spotify: SpotifyConfig,
    #[serde(default)]
    pub download: DownloadConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SpotifyConfig {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
}

impl SpotifyConfig {
    pub fn is_configured(&self) -> bool {
        self.client_id.as_ref().is_some_and(|s| !s.is_empty())
            && self.client_secret.as_ref().is_some_and(|s| !s.is_empty())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DownloadConfig {
    pub output_directory: Option<PathBuf>,
    /// Vertical resolution ceiling for video jobs, e.g. "720".
    pub quality: Option<String>,
    pub workers: Option<usize>,
    pub ytdlp_path: Option<PathBuf>,
    pub ffmpeg_location: Option<PathBuf>,
}

impl DownloadConfig {
    pub fn output_directory(&self) -> PathBuf {
        self.output_directory
            .clone()
            .unwrap_or_else(|| PathBuf::from("downloads"))
    }

    pub fn workers(&self) -> usize {
        self.workers.filter(|n| *n > 0).unwrap_or(DEFAULT_WORKERS)
    }
}

impl Config {
    /// 환경 변수가 설정 파일보다 우선한다.
    pub fn overlay_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(id) = non_empty("SPOTIFY_CLIENT_ID") {
            self.spotify.client_id = Some(id);
        }
        if let Some(secret) = non_empty("SPOTIFY_CLIENT_SECRET") {
            self.spotify.client_secret = Some(secret);
        }
        if let Some(ffmpeg) = non_empty("FFMPEG_LOCATION") {
            self.download.ffmpeg_location = Some(PathBuf::from(ffmpeg));
        }
    }
}

fn config_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home)
        .join(".config")
        .join("tunegrab")
        .join("config.toml")
}

/// 설정 파일을 읽고 환경 변수를 덮어쓴다.
pub fn load_config() -> Config {
    let mut config = load_file_config();
    config.overlay_env(|key| std::env::var(key).ok());
    config
}

/// 환경 변수 없이 설정 파일만 읽는다.
pub fn load_file_config() -> Config {
    let path = config_path();
    if !path.exists() {
        return Config::default();
    }
    match std::fs::read_to_string(&path) {
        Ok(content) => toml::from_str(&content).unwrap_or_else(|e| {
            warn!(path = %path.display(), error = %e, "ignoring unreadable config file");
            Config::default()
        }),
        Err(_) => Config::default(),
    }
}

pub fn save_config(config: &Config) -> Result<()> {
    let path = config_path();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let content = toml::to_string_pretty(config)?;
    std::fs::write(&path, content)?;
    Ok(())
}
