//! Download and bundle sinks.
//!
//! The orchestrator never decides where results go. It hands `{name, bytes}`
//! pairs to a [`DownloadSink`], or to a [`Bundler`] that packs them into one
//! archive first.

use std::collections::{HashMap, HashSet};
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::io::AsyncWriteExt;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use mb_core::media;
use mb_core::{Error, Result};

/// One downloadable file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadItem {
    pub name: String,
    pub mime_type: String,
    pub bytes: Bytes,
}

/// Receives finished downloads.
#[async_trait]
pub trait DownloadSink: Send + Sync {
    async fn deliver(&self, item: &DownloadItem) -> Result<()>;
}

/// Packs several items into one archive.
pub trait Bundler: Send + Sync {
    /// Build an archive named `name` from `items`.
    ///
    /// Fails with [`Error::Bundle`].
    fn bundle(&self, name: &str, items: &[DownloadItem]) -> Result<DownloadItem>;
}

// ---------------------------------------------------------------------------
// DirectorySink
// ---------------------------------------------------------------------------

/// Writes each download into a directory on disk.
///
/// Existing files are never replaced: a taken name becomes `name (n).ext`
/// with the first free `n`.
#[derive(Debug, Clone)]
pub struct DirectorySink {
    dir: PathBuf,
}

impl DirectorySink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[async_trait]
impl DownloadSink for DirectorySink {
    async fn deliver(&self, item: &DownloadItem) -> Result<()> {
        let file_name = Path::new(&item.name)
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| Error::Validation(format!("invalid download name: {}", item.name)))?;
        tokio::fs::create_dir_all(&self.dir).await?;
        let (path, mut file) = create_free_file(&self.dir, file_name).await?;
        file.write_all(&item.bytes).await?;
        file.flush().await?;
        tracing::info!(
            path = %path.display(),
            size = %media::format_file_size(item.bytes.len() as u64),
            "Saved download"
        );
        Ok(())
    }
}

/// Create `file_name` in `dir`, or the first free `file_name (n)` variant.
async fn create_free_file(dir: &Path, file_name: &str) -> Result<(PathBuf, tokio::fs::File)> {
    let mut n = 0;
    loop {
        let candidate = if n == 0 {
            file_name.to_string()
        } else {
            with_suffix(file_name, n)
        };
        let path = dir.join(candidate);
        match tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(file) => return Ok((path, file)),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => n += 1,
            Err(e) => return Err(e.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// MemorySink
// ---------------------------------------------------------------------------

/// Collects downloads in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    items: Mutex<Vec<DownloadItem>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn items(&self) -> Vec<DownloadItem> {
        self.items.lock().clone()
    }
}

#[async_trait]
impl DownloadSink for MemorySink {
    async fn deliver(&self, item: &DownloadItem) -> Result<()> {
        self.items.lock().push(item.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// ZipBundler
// ---------------------------------------------------------------------------

/// Builds a deflate-compressed zip archive in memory.
#[derive(Debug, Clone, Copy, Default)]
pub struct ZipBundler;

impl Bundler for ZipBundler {
    fn bundle(&self, name: &str, items: &[DownloadItem]) -> Result<DownloadItem> {
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));

        let names: Vec<&str> = items.iter().map(|i| i.name.as_str()).collect();
        for (entry_name, item) in unique_names(&names).into_iter().zip(items) {
            let options =
                SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
            zip.start_file(entry_name, options)
                .map_err(|e| bundle_error(name, e))?;
            zip.write_all(&item.bytes)
                .map_err(|e| bundle_error(name, e))?;
        }

        let cursor = zip.finish().map_err(|e| bundle_error(name, e))?;
        Ok(DownloadItem {
            name: name.to_string(),
            mime_type: "application/zip".to_string(),
            bytes: Bytes::from(cursor.into_inner()),
        })
    }
}

fn bundle_error(name: &str, e: impl std::fmt::Display) -> Error {
    Error::Bundle(format!("{name}: {e}"))
}

/// Disambiguate repeated names: `a.mp3`, `a (1).mp3`, `a (2).mp3`.
pub fn unique_names(names: &[&str]) -> Vec<String> {
    let mut used: HashSet<String> = HashSet::new();
    let mut counters: HashMap<&str, usize> = HashMap::new();
    let mut out = Vec::with_capacity(names.len());

    for &name in names {
        if used.insert(name.to_string()) {
            out.push(name.to_string());
            continue;
        }
        let n = counters.entry(name).or_insert(0);
        loop {
            *n += 1;
            let candidate = with_suffix(name, *n);
            if used.insert(candidate.clone()) {
                out.push(candidate);
                break;
            }
        }
    }
    out
}

fn with_suffix(name: &str, n: usize) -> String {
    let stem = media::file_stem(name);
    match media::extension(name) {
        Some(_) => format!("{stem} ({n}){}", &name[stem.len()..]),
        None => format!("{name} ({n})"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    fn item(name: &str, body: &'static [u8]) -> DownloadItem {
        DownloadItem {
            name: name.into(),
            mime_type: "audio/mp3".into(),
            bytes: Bytes::from_static(body),
        }
    }

    #[test]
    fn unique_names_suffixes_duplicates() {
        assert_eq!(
            unique_names(&["a.mp3", "b.mp3", "a.mp3", "a.mp3", "noext", "noext"]),
            vec!["a.mp3", "b.mp3", "a (1).mp3", "a (2).mp3", "noext", "noext (1)"]
        );
    }

    #[test]
    fn zip_bundle_contains_every_item() {
        let items = vec![item("a.mp3", b"AAAA"), item("b.ogg", b"BB"), item("a.mp3", b"C")];
        let bundle = ZipBundler.bundle("out.zip", &items).unwrap();
        assert_eq!(bundle.name, "out.zip");
        assert_eq!(bundle.mime_type, "application/zip");

        let mut archive = zip::ZipArchive::new(Cursor::new(bundle.bytes.to_vec())).unwrap();
        assert_eq!(archive.len(), 3);
        let mut body = String::new();
        archive
            .by_name("a (1).mp3")
            .unwrap()
            .read_to_string(&mut body)
            .unwrap();
        assert_eq!(body, "C");
    }

    #[tokio::test]
    async fn directory_sink_writes_files() {
        let dir = tempfile::tempdir().unwrap();
        let sink = DirectorySink::new(dir.path().join("nested"));
        sink.deliver(&item("a.mp3", b"hello")).await.unwrap();
        let written = std::fs::read(dir.path().join("nested").join("a.mp3")).unwrap();
        assert_eq!(written, b"hello");
    }

    #[tokio::test]
    async fn directory_sink_never_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.mp3"), b"original").unwrap();
        let sink = DirectorySink::new(dir.path());

        sink.deliver(&item("a.mp3", b"first")).await.unwrap();
        sink.deliver(&item("a.mp3", b"second")).await.unwrap();

        assert_eq!(std::fs::read(dir.path().join("a.mp3")).unwrap(), b"original");
        assert_eq!(std::fs::read(dir.path().join("a (1).mp3")).unwrap(), b"first");
        assert_eq!(std::fs::read(dir.path().join("a (2).mp3")).unwrap(), b"second");
    }

    #[tokio::test]
    async fn directory_sink_strips_directories_from_names() {
        let dir = tempfile::tempdir().unwrap();
        let sink = DirectorySink::new(dir.path());
        sink.deliver(&item("../../escape.mp3", b"x")).await.unwrap();
        assert!(dir.path().join("escape.mp3").exists());
    }

    #[tokio::test]
    async fn memory_sink_collects() {
        let sink = MemorySink::new();
        sink.deliver(&item("a.mp3", b"1")).await.unwrap();
        sink.deliver(&item("b.mp3", b"2")).await.unwrap();
        let names: Vec<_> = sink.items().into_iter().map(|i| i.name).collect();
        assert_eq!(names, vec!["a.mp3", "b.mp3"]);
    }
}
