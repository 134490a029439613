//! Routing an input to an engine command.

use mb_core::config::FormatsConfig;
use mb_core::media::{self, MediaKind, EXTRACTION_FORMAT};
use mb_core::TaskId;

/// Extraction policy for video-like inputs.
const EXTRACT_SAMPLE_RATE: &str = "44100";
const EXTRACT_CHANNELS: &str = "2";
const EXTRACT_BITRATE: &str = "192k";

/// What the engine will be asked to do with one input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConversionPlan {
    /// Audio-only mp3 from a video-like input, regardless of the batch format.
    Extract,
    /// Generic conversion to the batch's output format.
    Convert { format: String },
}

impl ConversionPlan {
    /// Pick the plan for `input_name`.
    pub fn for_input(input_name: &str, formats: &FormatsConfig, output_format: &str) -> Self {
        match formats.classify(input_name) {
            MediaKind::Video => Self::Extract,
            MediaKind::Audio => Self::Convert {
                format: output_format.to_ascii_lowercase(),
            },
        }
    }

    /// Format of the produced file.
    pub fn output_format(&self) -> &str {
        match self {
            Self::Extract => EXTRACTION_FORMAT,
            Self::Convert { format } => format,
        }
    }

    /// User-facing name of the produced file.
    pub fn output_name(&self, input_name: &str) -> String {
        media::output_name(input_name, self.output_format())
    }

    /// Engine arguments reading `input` and writing `output` (virtual names).
    pub fn args(&self, input: &str, output: &str) -> Vec<String> {
        let mut args = vec!["-i".to_string(), input.to_string()];
        if let Self::Extract = self {
            args.extend(
                [
                    "-vn",
                    "-ar",
                    EXTRACT_SAMPLE_RATE,
                    "-ac",
                    EXTRACT_CHANNELS,
                    "-ab",
                    EXTRACT_BITRATE,
                    "-f",
                    EXTRACTION_FORMAT,
                ]
                .map(String::from),
            );
        }
        args.push(output.to_string());
        args
    }
}

/// Virtual file names for one task inside the engine.
///
/// Prefixed with the full task id, so tasks with the same input name never
/// share engine files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualNames {
    pub input: String,
    pub output: String,
}

impl VirtualNames {
    pub fn new(task_id: TaskId, input_name: &str, output_name: &str) -> Self {
        let prefix = task_id.simple();
        let output = format!("{prefix}-out-{}", sanitize(output_name));
        Self {
            input: format!("{prefix}-in-{}", sanitize(input_name)),
            output,
        }
    }
}

/// Keep virtual names flat and shell-inert.
fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '/' | '\\' | '\0' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn formats() -> FormatsConfig {
        FormatsConfig::default()
    }

    #[test]
    fn video_inputs_are_extracted_to_mp3() {
        let plan = ConversionPlan::for_input("clip.mp4", &formats(), "flac");
        assert_eq!(plan, ConversionPlan::Extract);
        assert_eq!(plan.output_name("clip.mp4"), "clip.mp3");
        assert_eq!(
            plan.args("i", "o"),
            vec!["-i", "i", "-vn", "-ar", "44100", "-ac", "2", "-ab", "192k", "-f", "mp3", "o"]
        );
    }

    #[test]
    fn audio_inputs_use_batch_format() {
        let plan = ConversionPlan::for_input("song.WAV", &formats(), "OGG");
        assert_eq!(plan.output_format(), "ogg");
        assert_eq!(plan.output_name("song.WAV"), "song.ogg");
        assert_eq!(plan.args("i", "o"), vec!["-i", "i", "o"]);
    }

    #[test]
    fn extension_match_is_case_insensitive() {
        let plan = ConversionPlan::for_input("Movie.MKV", &formats(), "wav");
        assert_eq!(plan, ConversionPlan::Extract);
    }

    #[test]
    fn virtual_names_are_unique_per_task() {
        let a = VirtualNames::new(TaskId::new(), "song.wav", "song.mp3");
        let b = VirtualNames::new(TaskId::new(), "song.wav", "song.mp3");
        assert_ne!(a.input, b.input);
        assert_ne!(a.input, a.output);
        assert!(a.input.ends_with("-in-song.wav"));
        assert!(a.output.ends_with("-out-song.mp3"));
    }

    #[test]
    fn virtual_names_carry_the_whole_task_id() {
        let id = TaskId::new();
        let v = VirtualNames::new(id, "song.wav", "song.mp3");
        assert_eq!(v.input, format!("{}-in-song.wav", id.simple()));
        assert_eq!(v.output, format!("{}-out-song.mp3", id.simple()));
    }

    #[test]
    fn virtual_names_are_flat() {
        let v = VirtualNames::new(TaskId::new(), "../x/y.wav", "y.mp3");
        assert!(!v.input.contains('/'));
    }
}
