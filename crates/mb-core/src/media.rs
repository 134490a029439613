//! Static media format tables and file-name helpers.
//!
//! Inputs are classified purely by file extension: a "video-like" input is
//! routed to audio extraction, everything else to a generic convert.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Output formats a generic convert may target.
pub const AUDIO_FORMATS: &[&str] = &["mp3", "wav", "ogg", "flac"];

/// Extensions treated as video-like (routed to audio extraction).
pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "avi", "mov", "mkv", "webm"];

/// Output format produced by audio extraction, regardless of the requested
/// batch format.
pub const EXTRACTION_FORMAT: &str = "mp3";

// ---------------------------------------------------------------------------
// MediaKind
// ---------------------------------------------------------------------------

/// Coarse classification of an input file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
}

impl MediaKind {
    /// Classify `file_name` against the given video-like extension list.
    pub fn classify<S: AsRef<str>>(file_name: &str, video_extensions: &[S]) -> Self {
        if is_video_file(file_name, video_extensions) {
            Self::Video
        } else {
            Self::Audio
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Audio => write!(f, "audio"),
            Self::Video => write!(f, "video"),
        }
    }
}

// ---------------------------------------------------------------------------
// Name helpers
// ---------------------------------------------------------------------------

/// Lowercased extension of `file_name`, if it has one.
pub fn extension(file_name: &str) -> Option<String> {
    let (stem, ext) = file_name.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// Whether `file_name` carries one of the video-like extensions.
pub fn is_video_file<S: AsRef<str>>(file_name: &str, video_extensions: &[S]) -> bool {
    match extension(file_name) {
        Some(ext) => video_extensions
            .iter()
            .any(|v| v.as_ref().eq_ignore_ascii_case(&ext)),
        None => false,
    }
}

/// `file_name` without its final extension.
///
/// Names with no extension, or whose only dot is the leading one
/// (`.hidden`), are returned unchanged.
pub fn file_stem(file_name: &str) -> &str {
    match file_name.rfind('.') {
        Some(idx) if idx > 0 => &file_name[..idx],
        _ => file_name,
    }
}

/// Name of the converted output: the input stem with `format` as extension.
pub fn output_name(input_name: &str, format: &str) -> String {
    format!("{}.{}", file_stem(input_name), format)
}

/// MIME type attached to produced artifacts.
pub fn mime_type_for(format: &str) -> String {
    format!("audio/{}", format.to_ascii_lowercase())
}

/// Whether `format` is one of the supported generic output formats.
pub fn is_supported_output<S: AsRef<str>>(format: &str, formats: &[S]) -> bool {
    formats.iter().any(|f| f.as_ref().eq_ignore_ascii_case(format))
}

/// Human-readable byte size (`1.5 KB`, `2 GB`), base 1024, at most two
/// decimals.
pub fn format_file_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["Bytes", "KB", "MB", "GB", "TB"];
    if bytes == 0 {
        return "0 Bytes".to_string();
    }

    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }

    let rounded = format!("{value:.2}");
    let trimmed = rounded.trim_end_matches('0').trim_end_matches('.');
    format!("{trimmed} {}", UNITS[unit])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_is_lowercased() {
        assert_eq!(extension("Clip.MP4").as_deref(), Some("mp4"));
        assert_eq!(extension("archive.tar.gz").as_deref(), Some("gz"));
        assert_eq!(extension("noext"), None);
        assert_eq!(extension(".hidden"), None);
        assert_eq!(extension("trailing."), None);
    }

    #[test]
    fn video_classification() {
        assert!(is_video_file("clip.mp4", VIDEO_EXTENSIONS));
        assert!(is_video_file("CLIP.MKV", VIDEO_EXTENSIONS));
        assert!(!is_video_file("song.wav", VIDEO_EXTENSIONS));
        assert!(!is_video_file("mp4", VIDEO_EXTENSIONS));
        assert_eq!(MediaKind::classify("a.mov", VIDEO_EXTENSIONS), MediaKind::Video);
        assert_eq!(MediaKind::classify("a.flac", VIDEO_EXTENSIONS), MediaKind::Audio);
    }

    #[test]
    fn classification_uses_given_list() {
        let only_webm = vec!["webm".to_string()];
        assert!(is_video_file("talk.webm", &only_webm));
        assert!(!is_video_file("talk.mp4", &only_webm));
    }

    #[test]
    fn stems_and_output_names() {
        assert_eq!(file_stem("clip.mp4"), "clip");
        assert_eq!(file_stem("my.song.wav"), "my.song");
        assert_eq!(file_stem("noext"), "noext");
        assert_eq!(file_stem(".hidden"), ".hidden");
        assert_eq!(output_name("clip.mp4", "mp3"), "clip.mp3");
        assert_eq!(output_name("noext", "ogg"), "noext.ogg");
    }

    #[test]
    fn mime_types() {
        assert_eq!(mime_type_for("mp3"), "audio/mp3");
        assert_eq!(mime_type_for("FLAC"), "audio/flac");
    }

    #[test]
    fn supported_outputs() {
        assert!(is_supported_output("mp3", AUDIO_FORMATS));
        assert!(is_supported_output("OGG", AUDIO_FORMATS));
        assert!(!is_supported_output("mp4", AUDIO_FORMATS));
    }

    #[test]
    fn file_sizes() {
        assert_eq!(format_file_size(0), "0 Bytes");
        assert_eq!(format_file_size(512), "512 Bytes");
        assert_eq!(format_file_size(1024), "1 KB");
        assert_eq!(format_file_size(1536), "1.5 KB");
        assert_eq!(format_file_size(2 * 1024 * 1024 * 1024), "2 GB");
        assert_eq!(format_file_size(1_234_567), "1.18 MB");
    }
}
