use std::path::Path;

use tracing::debug;

use crate::core::tagger;
use crate::error::{FetchError, Result};
use crate::models::AudioFile;

/// 디렉토리를 재귀 탐색하여 모든 MP3 파일을 경로순으로 반환한다.
/// 각 파일의 현재 ID3 태그를 함께 읽는다.
pub fn scan_directory(dir: &Path) -> Result<Vec<AudioFile>> {
    let mut files = Vec::new();
    collect_audio_files(dir, &mut files)?;
    files.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(files)
}

fn collect_audio_files(dir: &Path, files: &mut Vec<AudioFile>) -> Result<()> {
    if !dir.is_dir() {
        return Err(FetchError::InvalidInput(format!(
            "{} is not a directory",
            dir.display()
        )));
    }

    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();

        if path.is_dir() {
            collect_audio_files(&path, files)?;
        } else if is_mp3(&path) {
            files.push(load_audio_file(&path));
        }
    }

    Ok(())
}

/// 확장자가 .mp3인지 확인한다 (대소문자 무시).
fn is_mp3(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("mp3"))
        .unwrap_or(false)
}

fn load_audio_file(path: &Path) -> AudioFile {
    let current_tags = match tagger::read_tags(path) {
        Ok(tags) => tags,
        Err(e) => {
            debug!(path = %path.display(), error = %e, "unreadable tag");
            None
        }
    };
    AudioFile {
        path: path.to_path_buf(),
        current_tags,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PlaylistItem;

    #[test]
    fn test_scan_finds_nested_mp3_sorted() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("album");
        std::fs::create_dir(&nested).unwrap();
        std::fs::write(dir.path().join("b.mp3"), b"x").unwrap();
        std::fs::write(nested.join("a.MP3"), b"x").unwrap();
        std::fs::write(dir.path().join("cover.jpg"), b"x").unwrap();

        let files = scan_directory(dir.path()).unwrap();

        let names: Vec<_> = files.iter().map(|f| f.filename().to_string()).collect();
        assert_eq!(names.len(), 2);
        assert!(names.contains(&"a.MP3".to_string()));
        assert!(names.contains(&"b.mp3".to_string()));
        assert!(files.windows(2).all(|w| w[0].path <= w[1].path));
    }

    #[test]
    fn test_scan_reports_tags() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("song.mp3");
        std::fs::write(&path, b"x").unwrap();
        let item = PlaylistItem {
            title: "Song".to_string(),
            primary_contributor: "Band".to_string(),
            ..Default::default()
        };
        tagger::write_text_tags(&path, &item).unwrap();

        let files = scan_directory(dir.path()).unwrap();

        assert!(files[0].has_tags());
        let tags = files[0].current_tags.as_ref().unwrap();
        assert_eq!(tags.display_artist(), "Band");
        assert_eq!(tags.display_album(), "unknown");
    }

    #[test]
    fn test_scan_rejects_file_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("song.mp3");
        std::fs::write(&path, b"x").unwrap();
        assert!(matches!(
            scan_directory(&path),
            Err(FetchError::InvalidInput(_))
        ));
    }
}
