//! External tool discovery.
//!
//! The ffmpeg engine needs exactly one binary. It is resolved from the
//! configured path when that exists, otherwise from `PATH` via
//! [`which::which`].

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use mb_core::config::ToolsConfig;

/// Name of the transcoder binary.
pub const FFMPEG: &str = "ffmpeg";

/// Availability information for a tool, returned by [`check_tools`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInfo {
    pub name: String,
    pub available: bool,
    /// First line of the tool's `-version` output.
    pub version: Option<String>,
    pub path: Option<PathBuf>,
}

/// Resolve the ffmpeg binary.
///
/// A configured path that does not exist falls back to a `PATH` search.
pub fn locate_ffmpeg(config: &ToolsConfig) -> Option<PathBuf> {
    match config.ffmpeg_path.as_deref() {
        Some(p) if p.exists() => Some(p.to_path_buf()),
        Some(p) => {
            tracing::warn!(path = %p.display(), "Configured ffmpeg path does not exist, searching PATH");
            which::which(FFMPEG).ok()
        }
        None => which::which(FFMPEG).ok(),
    }
}

/// Resolve the ffmpeg binary or fail with [`mb_core::Error::EngineLoad`].
pub fn require_ffmpeg(config: &ToolsConfig) -> mb_core::Result<PathBuf> {
    locate_ffmpeg(config).ok_or_else(|| {
        mb_core::Error::EngineLoad(format!("{FFMPEG} not found; is it installed and in PATH?"))
    })
}

/// Check every tool the engine can use.
pub fn check_tools(config: &ToolsConfig) -> Vec<ToolInfo> {
    let info = match locate_ffmpeg(config) {
        Some(path) => ToolInfo {
            name: FFMPEG.to_string(),
            available: true,
            version: detect_version(&path),
            path: Some(path),
        },
        None => ToolInfo {
            name: FFMPEG.to_string(),
            available: false,
            version: None,
            path: None,
        },
    };
    vec![info]
}

/// Run `<tool> -version` and return the first line of stdout.
pub fn detect_version(path: &Path) -> Option<String> {
    let output = std::process::Command::new(path)
        .arg("-version")
        .output()
        .ok()?;

    if !output.status.success() {
        return None;
    }

    String::from_utf8_lossy(&output.stdout)
        .lines()
        .next()
        .map(|s| s.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_tools_reports_ffmpeg() {
        // ffmpeg may or may not be installed; the call must not panic.
        let infos = check_tools(&ToolsConfig::default());
        assert_eq!(infos.len(), 1);
        assert_eq!(infos[0].name, "ffmpeg");
        assert_eq!(infos[0].available, infos[0].path.is_some());
    }

    #[test]
    fn missing_configured_path_falls_back_to_path_search() {
        let cfg = ToolsConfig {
            ffmpeg_path: Some(PathBuf::from("/nonexistent/bin/ffmpeg-xyz")),
            ..Default::default()
        };
        assert_eq!(locate_ffmpeg(&cfg), which::which("ffmpeg").ok());
    }

    #[test]
    fn existing_configured_path_wins() {
        let dir = tempfile::tempdir().unwrap();
        let fake = dir.path().join("my-ffmpeg");
        std::fs::write(&fake, b"").unwrap();
        let cfg = ToolsConfig {
            ffmpeg_path: Some(fake.clone()),
            ..Default::default()
        };
        assert_eq!(locate_ffmpeg(&cfg), Some(fake));
    }

    #[test]
    fn detect_version_of_missing_binary_is_none() {
        assert!(detect_version(Path::new("/nonexistent/tool_xyz_12345")).is_none());
    }
}
