//! Scratch directory backing the ffmpeg engine's virtual filesystem.
//!
//! Virtual names map to flat files inside a private [`TempDir`] that is
//! removed when the [`ScratchDir`] drops.

use std::path::{Path, PathBuf};

use tempfile::TempDir;

pub struct ScratchDir {
    temp_dir: TempDir,
}

impl ScratchDir {
    /// Create a fresh, empty scratch directory.
    pub fn new() -> mb_core::Result<Self> {
        let temp_dir = tempfile::Builder::new()
            .prefix("mediabatch-")
            .tempdir()
            .map_err(|e| mb_core::Error::EngineLoad(format!("failed to create scratch dir: {e}")))?;
        Ok(Self { temp_dir })
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Map a virtual file name to its host path.
    ///
    /// Names are flat: separators and dot-only names are rejected so nothing
    /// resolves outside the directory.
    pub fn path_for(&self, name: &str) -> mb_core::Result<PathBuf> {
        if name.is_empty()
            || name == "."
            || name == ".."
            || name.contains('/')
            || name.contains('\\')
            || name.contains('\0')
        {
            return Err(mb_core::Error::engine_io(
                "resolve",
                name,
                "invalid virtual file name",
            ));
        }
        Ok(self.temp_dir.path().join(name))
    }
}

impl std::fmt::Debug for ScratchDir {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScratchDir")
            .field("path", &self.path())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_flat_names_inside_dir() {
        let scratch = ScratchDir::new().unwrap();
        let p = scratch.path_for("abc-song.wav").unwrap();
        assert_eq!(p.parent().unwrap(), scratch.path());
        assert_eq!(p.file_name().unwrap(), "abc-song.wav");
    }

    #[test]
    fn rejects_escaping_names() {
        let scratch = ScratchDir::new().unwrap();
        for bad in ["", ".", "..", "../etc/passwd", "a/b", "a\\b"] {
            assert!(scratch.path_for(bad).is_err(), "accepted {bad:?}");
        }
    }

    #[test]
    fn removed_on_drop() {
        let scratch = ScratchDir::new().unwrap();
        let path = scratch.path().to_path_buf();
        std::fs::write(scratch.path_for("x").unwrap(), b"1").unwrap();
        assert!(path.exists());
        drop(scratch);
        assert!(!path.exists());
    }
}
