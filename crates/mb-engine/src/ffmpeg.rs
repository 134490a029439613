//! ffmpeg-backed [`Engine`].
//!
//! Loading locates the binary, confirms it runs, and creates a private
//! [`ScratchDir`]. Virtual file names become files in that directory and every
//! command runs with it as the working directory, so the relative names the
//! orchestrator passes in `-i <input> ... <output>` resolve inside it.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use mb_core::config::ToolsConfig;

use crate::command::ToolCommand;
use crate::engine::{Engine, EngineLoader};
use crate::tools;
use crate::workspace::ScratchDir;

/// Arguments prepended to every command.
const BASE_ARGS: &[&str] = &["-hide_banner", "-nostdin", "-y", "-loglevel", "error"];

/// Builds [`FfmpegEngine`]s from tool configuration.
#[derive(Debug, Clone, Default)]
pub struct FfmpegLoader {
    config: ToolsConfig,
}

impl FfmpegLoader {
    pub fn new(config: ToolsConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl EngineLoader for FfmpegLoader {
    async fn load(&self) -> mb_core::Result<Arc<dyn Engine>> {
        let program = tools::require_ffmpeg(&self.config)?;

        let probe = program.clone();
        let version = tokio::task::spawn_blocking(move || tools::detect_version(&probe))
            .await
            .map_err(|e| mb_core::Error::EngineLoad(format!("version probe panicked: {e}")))?
            .ok_or_else(|| {
                mb_core::Error::EngineLoad(format!(
                    "{} did not answer -version",
                    program.display()
                ))
            })?;

        let scratch = ScratchDir::new()?;
        tracing::info!(
            program = %program.display(),
            version = %version,
            scratch = %scratch.path().display(),
            "ffmpeg engine ready"
        );

        Ok(Arc::new(FfmpegEngine {
            program,
            version,
            timeout: Duration::from_secs(self.config.timeout_secs.max(1)),
            scratch,
        }))
    }
}

/// A loaded ffmpeg engine.
#[derive(Debug)]
pub struct FfmpegEngine {
    program: PathBuf,
    version: String,
    timeout: Duration,
    scratch: ScratchDir,
}

impl FfmpegEngine {
    /// First line of `ffmpeg -version`.
    pub fn version(&self) -> &str {
        &self.version
    }
}

#[async_trait]
impl Engine for FfmpegEngine {
    fn name(&self) -> &'static str {
        tools::FFMPEG
    }

    async fn write_input(&self, name: &str, bytes: Bytes) -> mb_core::Result<()> {
        let path = self.scratch.path_for(name)?;
        tokio::fs::write(&path, &bytes)
            .await
            .map_err(|e| mb_core::Error::engine_io("write", name, e))
    }

    async fn exec(&self, args: &[String]) -> mb_core::Result<()> {
        ToolCommand::new(self.program.clone())
            .args(BASE_ARGS.iter().copied())
            .args(args.iter().cloned())
            .timeout(self.timeout)
            .current_dir(self.scratch.path())
            .execute()
            .await
            .map(|_| ())
    }

    async fn read_output(&self, name: &str) -> mb_core::Result<Bytes> {
        let path = self.scratch.path_for(name)?;
        tokio::fs::read(&path)
            .await
            .map(Bytes::from)
            .map_err(|e| mb_core::Error::engine_io("read", name, e))
    }

    async fn delete_file(&self, name: &str) -> mb_core::Result<()> {
        let path = self.scratch.path_for(name)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(mb_core::Error::engine_io("delete", name, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[tokio::test]
    async fn load_fails_without_binary() {
        if which::which("ffmpeg").is_ok() {
            return;
        }
        let loader = FfmpegLoader::new(ToolsConfig::default());
        assert_matches!(loader.load().await, Err(mb_core::Error::EngineLoad(_)));
    }

    #[tokio::test]
    async fn virtual_files_round_trip_through_scratch_dir() {
        let engine = FfmpegEngine {
            program: PathBuf::from("ffmpeg"),
            version: String::new(),
            timeout: Duration::from_secs(5),
            scratch: ScratchDir::new().unwrap(),
        };

        engine
            .write_input("abc-in.wav", Bytes::from_static(b"RIFF"))
            .await
            .unwrap();
        assert!(engine.scratch.path().join("abc-in.wav").exists());
        let back = engine.read_output("abc-in.wav").await.unwrap();
        assert_eq!(&back[..], b"RIFF");

        engine.delete_file("abc-in.wav").await.unwrap();
        // Deleting twice is harmless.
        engine.delete_file("abc-in.wav").await.unwrap();
        assert_matches!(
            engine.read_output("abc-in.wav").await,
            Err(mb_core::Error::EngineIo { .. })
        );
    }

    #[tokio::test]
    async fn converts_generated_tone_when_ffmpeg_present() {
        if which::which("ffmpeg").is_err() {
            return;
        }
        let loader = FfmpegLoader::new(ToolsConfig::default());
        let engine = loader.load().await.unwrap();

        let gen: Vec<String> = [
            "-f", "lavfi", "-i", "sine=frequency=440:duration=0.2", "tone.wav",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        engine.exec(&gen).await.unwrap();

        let convert: Vec<String> = ["-i", "tone.wav", "tone.flac"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        engine.exec(&convert).await.unwrap();
        let out = engine.read_output("tone.flac").await.unwrap();
        assert!(out.starts_with(b"fLaC"));
    }
}
