//! Application configuration types.
//!
//! The top-level [`Config`] struct is deserialized from JSON and carries the
//! limits, format tables, bundle defaults, engine tool settings, and event bus
//! sizing. Every section defaults sensibly so a completely empty `{}` file is
//! valid.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::media::{self, MediaKind};
use crate::Error;

/// Default maximum input size: 2 GiB.
pub const DEFAULT_MAX_FILE_SIZE: u64 = 2 * 1024 * 1024 * 1024;

// ---------------------------------------------------------------------------
// Top-level Config
// ---------------------------------------------------------------------------

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub limits: LimitsConfig,
    pub formats: FormatsConfig,
    pub bundle: BundleConfig,
    pub tools: ToolsConfig,
    pub events: EventsConfig,
}

impl Config {
    /// Deserialize a `Config` from a JSON string.
    ///
    /// String-based so the caller can read the file however it sees fit.
    pub fn from_json(json_str: &str) -> Result<Self> {
        serde_json::from_str(json_str)
            .map_err(|e| Error::Validation(format!("config parse error: {e}")))
    }

    /// Load configuration from a file, failing on unreadable or malformed
    /// files.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json(&contents)
    }

    /// Load configuration from a file path, falling back to defaults if the
    /// path is `None` or the file does not exist.
    pub fn load_or_default(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            return Self::default();
        };

        match std::fs::read_to_string(path) {
            Ok(contents) => Self::from_json(&contents).unwrap_or_else(|e| {
                tracing::warn!("Failed to parse config file {}: {e}", path.display());
                Self::default()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("No config file at {}; using defaults", path.display());
                Self::default()
            }
            Err(e) => {
                tracing::warn!("Failed to read config file {}: {e}", path.display());
                Self::default()
            }
        }
    }

    /// Return a list of validation warnings (non-fatal issues).
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.limits.max_concurrent == 0 {
            warnings.push("limits.max_concurrent is 0; 1 will be used".into());
        }

        if self.limits.max_file_size == 0 {
            warnings.push("limits.max_file_size is 0; every non-empty file will be rejected".into());
        }

        if self.formats.audio_formats.is_empty() {
            warnings.push("formats.audio_formats is empty; no generic conversion is possible".into());
        }

        if !media::is_supported_output(
            &self.formats.default_output_format,
            &self.formats.audio_formats,
        ) {
            warnings.push(format!(
                "formats.default_output_format '{}' is not listed in formats.audio_formats",
                self.formats.default_output_format
            ));
        }

        for ext in &self.formats.video_extensions {
            if media::is_supported_output(ext, &self.formats.audio_formats) {
                warnings.push(format!(
                    "'{ext}' is both a video extension and an output format"
                ));
            }
        }

        if !self.bundle.default_name.ends_with(".zip") {
            warnings.push(format!(
                "bundle.default_name '{}' does not end in .zip",
                self.bundle.default_name
            ));
        }

        if let Some(ref p) = self.tools.ffmpeg_path {
            if !p.exists() {
                warnings.push(format!(
                    "tools.ffmpeg_path {} does not exist; PATH lookup will be used",
                    p.display()
                ));
            }
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Sub-configs
// ---------------------------------------------------------------------------

/// Admission and parallelism limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Inputs larger than this many bytes are rejected at submission.
    pub max_file_size: u64,
    /// Wave size: how many conversions run concurrently.
    pub max_concurrent: usize,
}

impl LimitsConfig {
    /// `max_concurrent`, clamped to at least one.
    pub fn effective_concurrency(&self) -> usize {
        self.max_concurrent.max(1)
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            max_concurrent: 2,
        }
    }
}

/// Format tables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FormatsConfig {
    /// Extensions routed to audio extraction instead of generic convert.
    pub video_extensions: Vec<String>,
    /// Formats a generic convert may target.
    pub audio_formats: Vec<String>,
    /// Format used when the caller does not choose one.
    pub default_output_format: String,
}

impl FormatsConfig {
    /// Classify `file_name` against the configured video-like extensions.
    pub fn classify(&self, file_name: &str) -> MediaKind {
        MediaKind::classify(file_name, &self.video_extensions)
    }

    /// Whether `format` is an allowed generic output format.
    pub fn supports_output(&self, format: &str) -> bool {
        media::is_supported_output(format, &self.audio_formats)
    }
}

impl Default for FormatsConfig {
    fn default() -> Self {
        Self {
            video_extensions: media::VIDEO_EXTENSIONS.iter().map(|s| s.to_string()).collect(),
            audio_formats: media::AUDIO_FORMATS.iter().map(|s| s.to_string()).collect(),
            default_output_format: "mp3".into(),
        }
    }
}

/// Archive bundle defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BundleConfig {
    pub default_name: String,
}

impl Default for BundleConfig {
    fn default() -> Self {
        Self {
            default_name: "converted-audio-files.zip".into(),
        }
    }
}

/// External engine tool settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    /// Explicit ffmpeg location; `PATH` is searched when unset or missing.
    pub ffmpeg_path: Option<PathBuf>,
    /// Maximum seconds a single engine command may run.
    pub timeout_secs: u64,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: None,
            timeout_secs: 300,
        }
    }
}

/// Event bus sizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    /// Broadcast channel capacity.
    pub capacity: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self { capacity: 256 }
    }
}
