pub mod spotify;

use std::time::Duration;

use crate::error::Result;
use crate::models::PlaylistItem;

pub const COVER_TIMEOUT: Duration = Duration::from_secs(10);

/// 플레이리스트/트랙 메타데이터 소스 트레이트.
/// 카탈로그 링크를 순서가 있는 항목 목록으로 변환한다.
pub trait CatalogSource: Send + Sync {
    fn name(&self) -> &str;
    /// 카탈로그 순서대로 항목을 반환한다. 알 수 없는 링크는 `NoTracks`.
    fn resolve(&self, url: &str) -> Result<Vec<PlaylistItem>>;
}

/// 삽입할 커버 이미지를 다운로드한다.
pub trait CoverSource: Send + Sync {
    fn fetch_cover(&self, url: &str) -> Result<Vec<u8>>;
}

/// 타임아웃이 있는 HTTP 커버 다운로드.
pub struct HttpCoverSource {
    client: reqwest::blocking::Client,
}

impl HttpCoverSource {
    pub fn new() -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(COVER_TIMEOUT)
            .build()?;
        Ok(Self { client })
    }
}

impl CoverSource for HttpCoverSource {
    fn fetch_cover(&self, url: &str) -> Result<Vec<u8>> {
        let data = self
            .client
            .get(url)
            .send()?
            .error_for_status()?
            .bytes()?
            .to_vec();
        Ok(data)
    }
}
