use std::path::Path;

use crate::models::TrackTags;

/// Guesses artist and title from a downloaded file's name.
///
/// Supported patterns:
/// - "Artist - Title (Official Audio).mp3"
/// - "01. Artist - Title.mp3"
/// - "01. Title.mp3"
/// - "Title.mp3" (fallback)
pub fn parse_filename(path: &Path) -> TrackTags {
    let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
        return TrackTags::default();
    };
    let stem = strip_noise(stem.trim());

    if let Some(rest) = strip_track_number(stem) {
        if let Some(tags) = try_artist_title(rest) {
            return tags;
        }
    }

    if let Some(tags) = try_artist_title(stem) {
        return tags;
    }

    let title = strip_track_number(stem).unwrap_or(stem).trim();
    TrackTags {
        title: (!title.is_empty()).then(|| title.to_string()),
        ..Default::default()
    }
}

/// Drops a trailing "(Official Audio)" / "[Official Video]" style suffix.
fn strip_noise(stem: &str) -> &str {
    let trimmed = stem.trim_end();
    for (open, close) in [('(', ')'), ('[', ']')] {
        if !trimmed.ends_with(close) {
            continue;
        }
        if let Some(pos) = trimmed.rfind(open) {
            let inner = trimmed[pos + 1..trimmed.len() - 1].to_lowercase();
            if inner.contains("official") || inner.contains("lyric") || inner.contains("audio") {
                return trimmed[..pos].trim_end();
            }
        }
    }
    trimmed
}

fn try_artist_title(stem: &str) -> Option<TrackTags> {
    let (artist, title) = stem.split_once(" - ")?;
    let artist = artist.trim();
    let title = title.trim();

    if artist.is_empty() || title.is_empty() {
        return None;
    }

    Some(TrackTags {
        title: Some(title.to_string()),
        artist: Some(artist.to_string()),
        ..Default::default()
    })
}

fn strip_track_number(stem: &str) -> Option<&str> {
    let digits = stem.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits == 0 {
        return None;
    }

    let rest = &stem[digits..];
    let rest = rest.strip_prefix('.').unwrap_or(rest).trim_start();

    if rest.is_empty() {
        return None;
    }
    Some(rest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_artist_title() {
        let tags = parse_filename(&PathBuf::from("IU - Blueming.mp3"));
        assert_eq!(tags.artist.as_deref(), Some("IU"));
        assert_eq!(tags.title.as_deref(), Some("Blueming"));
    }

    #[test]
    fn test_official_suffix_is_dropped() {
        let tags = parse_filename(&PathBuf::from("Daft Punk - One More Time (Official Audio).mp3"));
        assert_eq!(tags.artist.as_deref(), Some("Daft Punk"));
        assert_eq!(tags.title.as_deref(), Some("One More Time"));

        let tags = parse_filename(&PathBuf::from("Song (Remix).mp3"));
        assert_eq!(tags.title.as_deref(), Some("Song (Remix)"));
    }

    #[test]
    fn test_numbered_title() {
        let tags = parse_filename(&PathBuf::from("01. Blueming.mp3"));
        assert_eq!(tags.title.as_deref(), Some("Blueming"));
        assert!(tags.artist.is_none());
    }

    #[test]
    fn test_numbered_artist_title() {
        let tags = parse_filename(&PathBuf::from("01 IU - Blueming.mp3"));
        assert_eq!(tags.artist.as_deref(), Some("IU"));
        assert_eq!(tags.title.as_deref(), Some("Blueming"));
    }

    #[test]
    fn test_fallback() {
        let tags = parse_filename(&PathBuf::from("SomeSong.mp3"));
        assert_eq!(tags.title.as_deref(), Some("SomeSong"));
        assert!(tags.artist.is_none());
    }
}
