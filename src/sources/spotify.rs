use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use base64::Engine;
use serde::Deserialize;
use tracing::{debug, info};
use url::Url;

use crate::config::SpotifyConfig;
use crate::error::{FetchError, Result};
use crate::models::PlaylistItem;
use crate::sources::CatalogSource;

const API_BASE: &str = "https://api.spotify.com/v1";
const TOKEN_URL: &str = "https://accounts.spotify.com/api/token";
const PAGE_LIMIT: usize = 100;
/// 만료 직전의 토큰은 미리 갱신한다.
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

/// Client Credentials 방식의 Spotify 카탈로그 클라이언트.
/// 액세스 토큰은 처음 사용할 때 발급받고 만료 전까지 재사용한다.
pub struct SpotifyClient {
    client: reqwest::blocking::Client,
    client_id: String,
    client_secret: String,
    tokens: TokenCache,
}

#[derive(Debug, Clone)]
struct AccessToken {
    value: String,
    expires_at: Option<Instant>,
}

impl AccessToken {
    fn is_fresh(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| now + EXPIRY_MARGIN < at)
    }
}

/// 발급받은 토큰 보관소. 만료되었거나 401로 거부된 토큰은 한 번 재발급한다.
#[derive(Debug, Default)]
struct TokenCache {
    current: Mutex<Option<AccessToken>>,
}

impl TokenCache {
    fn get(&self, authenticate: &dyn Fn() -> Result<AccessToken>) -> Result<String> {
        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(token) = current.as_ref().filter(|t| t.is_fresh(Instant::now())) {
            return Ok(token.value.clone());
        }
        let token = authenticate()?;
        let value = token.value.clone();
        *current = Some(token);
        Ok(value)
    }

    fn invalidate(&self) {
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// `request`가 `None`을 돌려주면 토큰이 거부된 것으로 보고 한 번만 재시도한다.
    fn call<T>(
        &self,
        authenticate: &dyn Fn() -> Result<AccessToken>,
        mut request: impl FnMut(&str) -> Result<Option<T>>,
    ) -> Result<T> {
        let token = self.get(authenticate)?;
        if let Some(value) = request(token.as_str())? {
            return Ok(value);
        }

        debug!("access token rejected, requesting a new one");
        self.invalidate();
        let token = self.get(authenticate)?;
        request(token.as_str())?
            .ok_or_else(|| FetchError::Credentials("access token rejected".to_string()))
    }
}

/// 클라이언트가 처리하는 링크 종류.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpotifyLink {
    Playlist(String),
    Track(String),
}

impl SpotifyLink {
    /// Parses `open.spotify.com/{playlist,track}/<id>` links, with or without a
    /// locale segment (`/intl-de/track/...`) and query string.
    pub fn parse(input: &str) -> Option<Self> {
        let url = Url::parse(input.trim()).ok()?;
        if url.host_str()? != "open.spotify.com" {
            return None;
        }
        let segments: Vec<&str> = url
            .path_segments()?
            .filter(|s| !s.is_empty() && !s.starts_with("intl-"))
            .collect();
        match segments.as_slice() {
            ["playlist", id] => Some(SpotifyLink::Playlist(id.to_string())),
            ["track", id] => Some(SpotifyLink::Track(id.to_string())),
            _ => None,
        }
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: Option<u64>,
}

#[derive(Deserialize)]
struct PlaylistPage {
    items: Vec<PlaylistEntry>,
    next: Option<String>,
}

#[derive(Deserialize)]
struct PlaylistEntry {
    track: Option<SpotifyTrack>,
}

#[derive(Deserialize)]
struct SpotifyTrack {
    name: String,
    artists: Vec<SpotifyArtist>,
    album: Option<SpotifyAlbum>,
}

#[derive(Deserialize)]
struct SpotifyArtist {
    name: String,
}

#[derive(Deserialize)]
struct SpotifyAlbum {
    name: String,
    #[serde(default)]
    images: Vec<SpotifyImage>,
}

#[derive(Deserialize)]
struct SpotifyImage {
    url: String,
    width: Option<u32>,
}

impl SpotifyClient {
    /// 자격 증명이 하나라도 없으면 실패한다.
    pub fn new(config: &SpotifyConfig) -> Result<Self> {
        if !config.is_configured() {
            return Err(FetchError::Credentials(
                "set SPOTIFY_CLIENT_ID and SPOTIFY_CLIENT_SECRET or run `tunegrab config`"
                    .to_string(),
            ));
        }

        Ok(Self {
            client: reqwest::blocking::Client::new(),
            client_id: config.client_id.clone().unwrap_or_default(),
            client_secret: config.client_secret.clone().unwrap_or_default(),
            tokens: TokenCache::default(),
        })
    }

    fn authenticate(&self) -> Result<AccessToken> {
        let credentials = format!("{}:{}", self.client_id, self.client_secret);
        let encoded = base64::engine::general_purpose::STANDARD.encode(credentials);

        let resp = self
            .client
            .post(TOKEN_URL)
            .header("Authorization", format!("Basic {}", encoded))
            .form(&[("grant_type", "client_credentials")])
            .send()?;

        if !resp.status().is_success() {
            return Err(FetchError::Credentials(format!(
                "token request rejected with {}",
                resp.status()
            )));
        }

        let token: TokenResponse = resp
            .json()
            .map_err(|e| FetchError::Catalog(format!("unreadable token response: {}", e)))?;
        debug!(expires_in = ?token.expires_in, "obtained Spotify access token");
        Ok(AccessToken {
            value: token.access_token,
            expires_at: token
                .expires_in
                .map(|secs| Instant::now() + Duration::from_secs(secs)),
        })
    }

    fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        self.tokens.call(&|| self.authenticate(), |token| {
            let resp = self
                .client
                .get(url)
                .bearer_auth(token)
                .query(query)
                .send()?;

            let status = resp.status();
            if status == reqwest::StatusCode::UNAUTHORIZED {
                return Ok(None);
            }
            if !status.is_success() {
                return Err(FetchError::Catalog(format!("{} returned {}", url, status)));
            }
            resp.json().map(Some).map_err(|e| {
                FetchError::Catalog(format!("unreadable response from {}: {}", url, e))
            })
        })
    }

    fn playlist_items(&self, playlist_id: &str) -> Result<Vec<PlaylistItem>> {
        let url = format!("{}/playlists/{}/tracks", API_BASE, playlist_id);
        paginate(|offset| {
            debug!(playlist_id, offset, "requesting playlist page");
            self.get_json(
                &url,
                &[
                    ("offset", offset.to_string()),
                    ("limit", PAGE_LIMIT.to_string()),
                ],
            )
        })
    }

    fn track_item(&self, track_id: &str) -> Result<PlaylistItem> {
        let url = format!("{}/tracks/{}", API_BASE, track_id);
        let track: SpotifyTrack = self.get_json(&url, &[])?;
        Ok(convert_track(&track))
    }
}

impl CatalogSource for SpotifyClient {
    fn name(&self) -> &str {
        "Spotify"
    }

    fn resolve(&self, url: &str) -> Result<Vec<PlaylistItem>> {
        let items = match SpotifyLink::parse(url) {
            Some(SpotifyLink::Playlist(id)) => self.playlist_items(&id)?,
            Some(SpotifyLink::Track(id)) => vec![self.track_item(&id)?],
            None => return Err(FetchError::NoTracks(url.to_string())),
        };
        info!(url, count = items.len(), "resolved Spotify link");
        Ok(items)
    }
}

/// Walks offset-paginated playlist pages, starting at offset 0 and advancing by
/// the number of entries each page actually returned.
fn paginate(mut fetch_page: impl FnMut(usize) -> Result<PlaylistPage>) -> Result<Vec<PlaylistItem>> {
    let mut items = Vec::new();
    let mut offset = 0;

    loop {
        let page = fetch_page(offset)?;
        let returned = page.items.len();
        items.extend(
            page.items
                .iter()
                .filter_map(|entry| entry.track.as_ref())
                .map(convert_track),
        );

        if page.next.is_none() || returned == 0 {
            break;
        }
        offset += returned;
    }

    Ok(items)
}

fn convert_track(track: &SpotifyTrack) -> PlaylistItem {
    let primary_contributor = track
        .artists
        .first()
        .map(|a| a.name.clone())
        .unwrap_or_default();

    let cover_image_url = track.album.as_ref().and_then(|album| {
        album
            .images
            .iter()
            .max_by_key(|img| img.width.unwrap_or(0))
            .map(|img| img.url.clone())
    });

    PlaylistItem {
        title: track.name.clone(),
        primary_contributor,
        collection_name: track
            .album
            .as_ref()
            .map(|a| a.name.clone())
            .unwrap_or_default(),
        cover_image_url,
    }
}
