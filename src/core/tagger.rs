use std::path::Path;

use id3::{Tag, TagLike, Version};
use tracing::{debug, warn};

use crate::error::{FetchError, Result};
use crate::models::{PlaylistItem, TrackTags};
use crate::sources::CoverSource;

/// 태그 기록 결과. 텍스트 태그와 커버 각각의 성공 여부.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TagReport {
    pub text_tagged: bool,
    pub cover_embedded: bool,
}

impl TagReport {
    pub fn any(&self) -> bool {
        self.text_tagged || self.cover_embedded
    }
}

/// 오디오 파일에서 ID3 태그를 읽는다.
/// 태그가 없거나 제목/아티스트/앨범이 모두 비어있으면 None을 반환한다.
pub fn read_tags(path: &Path) -> Result<Option<TrackTags>> {
    let tag = match Tag::read_from_path(path) {
        Ok(tag) => tag,
        Err(id3::Error {
            kind: id3::ErrorKind::NoTag,
            ..
        }) => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let has_any = tag.title().is_some() || tag.artist().is_some() || tag.album().is_some();
    if !has_any {
        return Ok(None);
    }

    let has_cover = tag.pictures().next().is_some();
    let tags = TrackTags {
        title: tag.title().map(|s| s.to_string()),
        artist: tag.artist().map(|s| s.to_string()),
        album: tag.album().map(|s| s.to_string()),
        has_cover,
    };
    Ok(Some(tags))
}

fn ensure_supported(path: &Path) -> Result<()> {
    let is_mp3 = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("mp3"));
    if !is_mp3 {
        return Err(FetchError::Tag(format!(
            "unsupported file type: {}",
            path.display()
        )));
    }
    Ok(())
}

fn load_or_new(path: &Path) -> Tag {
    Tag::read_from_path(path).unwrap_or_else(|_| Tag::new())
}

/// 제목, 아티스트, 앨범을 기록한다. 나머지 프레임은 유지한다.
pub fn write_text_tags(path: &Path, item: &PlaylistItem) -> Result<()> {
    ensure_supported(path)?;
    let mut tag = load_or_new(path);

    if !item.title.is_empty() {
        tag.set_title(&item.title);
    }
    if !item.primary_contributor.is_empty() {
        tag.set_artist(&item.primary_contributor);
    }
    if !item.collection_name.is_empty() {
        tag.set_album(&item.collection_name);
    }

    tag.write_to_path(path, Version::Id3v24)?;
    Ok(())
}

/// 기존 이미지를 모두 지우고 `data`를 앞표지로 삽입한다.
pub fn embed_cover(path: &Path, data: &[u8]) -> Result<()> {
    ensure_supported(path)?;
    let mut tag = load_or_new(path);

    tag.remove_all_pictures();
    tag.add_frame(id3::frame::Picture {
        mime_type: detect_mime_type(data),
        picture_type: id3::frame::PictureType::CoverFront,
        description: String::new(),
        data: data.to_vec(),
    });

    tag.write_to_path(path, Version::Id3v24)?;
    Ok(())
}

/// 다운로드한 파일에 항목의 메타데이터를 기록한다.
/// 텍스트 태그와 커버는 따로 시도하며, 실패는 로그만 남기고 반환하지 않는다.
pub fn stamp(path: &Path, item: &PlaylistItem, covers: &dyn CoverSource) -> TagReport {
    let mut report = TagReport::default();

    match write_text_tags(path, item) {
        Ok(()) => report.text_tagged = true,
        Err(e) => warn!(path = %path.display(), error = %e, "could not write text tags"),
    }

    let Some(ref url) = item.cover_image_url else {
        return report;
    };

    match covers
        .fetch_cover(url)
        .and_then(|data| embed_cover(path, &data))
    {
        Ok(()) => report.cover_embedded = true,
        Err(e) => warn!(path = %path.display(), url = %url, error = %e, "could not embed cover"),
    }

    debug!(path = %path.display(), ?report, "stamped");
    report
}

/// 이미지 바이너리의 매직 바이트로 MIME 타입을 판별한다.
fn detect_mime_type(data: &[u8]) -> String {
    if data.starts_with(&[0x89, 0x50, 0x4E, 0x47]) {
        "image/png".to_string()
    } else {
        "image/jpeg".to_string()
    }
}
