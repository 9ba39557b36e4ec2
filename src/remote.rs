use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use serde::Serialize;
use thiserror::Error;

use crate::record::{Record, Source};
use crate::report::LogReporter;
use crate::scanner::metadata::{LoftyTagReader, TagReader, audio_hash};
use crate::scanner::{self, ScanOptions};
use crate::transfer::sanitize_component;

#[derive(Error, Debug)]
pub enum LibraryError {
    #[error("could not verify library: {0}")]
    Authentication(String),
    #[error("transfer failed for {id}: {reason}")]
    Transfer { id: String, reason: String },
    #[error("listing interrupted")]
    Interrupted,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum UploadOutcome {
    Uploaded,
    /// The library already held the same audio; nothing was sent.
    Matched,
    /// A different song already occupies the destination.
    AlreadyExists,
    Failed,
}

impl UploadOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Uploaded => "Uploaded",
            Self::Matched => "Matched",
            Self::AlreadyExists => "Already exists",
            Self::Failed => "Failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadResult {
    pub outcome: UploadOutcome,
    pub id: Option<String>,
    pub reason: Option<String>,
}

impl UploadResult {
    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            outcome: UploadOutcome::Failed,
            id: None,
            reason: Some(reason.into()),
        }
    }

    /// The library now holds the song (newly or already).
    pub fn is_success(&self) -> bool {
        self.outcome != UploadOutcome::Failed && self.id.is_some()
    }
}

/// The song service on the other side of a sync.
pub trait RemoteLibrary {
    /// Every song in the library. Fails with [`LibraryError::Authentication`]
    /// when the library can't be reached as the configured identity.
    fn list_songs(&self) -> Result<Vec<Record>, LibraryError>;

    fn upload(&self, record: &Record) -> UploadResult;

    fn download(&self, record: &Record) -> Result<Vec<u8>, LibraryError>;

    fn delete(&self, record: &Record) -> Result<(), LibraryError>;
}

/// A [`RemoteLibrary`] kept as a directory tree, e.g. a NAS share or a
/// portable player. Song ids are paths relative to the mirror root.
pub struct MirrorLibrary<R: TagReader = LoftyTagReader> {
    root: PathBuf,
    reader: R,
    hash: bool,
    interrupt: Option<Arc<AtomicBool>>,
}

impl MirrorLibrary<LoftyTagReader> {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_reader(root, LoftyTagReader)
    }
}

impl<R: TagReader> MirrorLibrary<R> {
    pub fn with_reader(root: impl Into<PathBuf>, reader: R) -> Self {
        Self {
            root: root.into(),
            reader,
            hash: false,
            interrupt: None,
        }
    }

    /// Hash mirror songs while listing them.
    pub fn hashing(mut self, hash: bool) -> Self {
        self.hash = hash;
        self
    }

    /// Stop listing once `flag` is raised.
    pub fn interruptible(mut self, flag: Arc<AtomicBool>) -> Self {
        self.interrupt = Some(flag);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn ensure_root(&self) -> Result<(), LibraryError> {
        if self.root.is_dir() {
            Ok(())
        } else {
            Err(LibraryError::Authentication(format!(
                "mirror root {} is not an accessible directory",
                self.root.display()
            )))
        }
    }

    fn song_path(&self, record: &Record) -> PathBuf {
        record
            .path
            .clone()
            .unwrap_or_else(|| self.root.join(&record.id))
    }

    /// Where an uploaded file lands: `<artist>/<album>/<file name>`.
    fn destination(&self, record: &Record, file_name: &std::ffi::OsStr) -> PathBuf {
        let artist = record
            .album_artist
            .as_deref()
            .or(record.artist.as_deref())
            .unwrap_or("Unknown Artist");
        let album = record.album.as_deref().unwrap_or("Unknown Album");
        self.root
            .join(sanitize_component(artist))
            .join(sanitize_component(album))
            .join(file_name)
    }
}

/// `path` below `root` as a `/`-separated id.
fn relative_id(path: &Path, root: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

impl<R: TagReader> RemoteLibrary for MirrorLibrary<R> {
    fn list_songs(&self) -> Result<Vec<Record>, LibraryError> {
        self.ensure_root()?;
        let root = std::path::absolute(&self.root)?;

        let options = ScanOptions {
            hash: self.hash,
            interrupt: self.interrupt.clone(),
            ..Default::default()
        };
        let to_library_error = |e: scanner::ScanError| match e {
            scanner::ScanError::Io(e) => LibraryError::Io(e),
            scanner::ScanError::Interrupted => LibraryError::Interrupted,
            other => LibraryError::Authentication(other.to_string()),
        };
        let files = scanner::find_audio_files(std::slice::from_ref(&root), &options, &self.reader)
            .map_err(to_library_error)?;
        let records = scanner::read_records(&files, &options, &self.reader, &LogReporter)
            .map_err(to_library_error)?;

        Ok(records
            .into_iter()
            .map(|r| {
                let path = r.path.clone().unwrap_or_default();
                Record {
                    id: relative_id(&path, &root),
                    source: Source::Remote,
                    ..r
                }
            })
            .collect())
    }

    fn upload(&self, record: &Record) -> UploadResult {
        if let Err(e) = self.ensure_root() {
            return UploadResult::failed(e.to_string());
        }
        let Some(source) = record.path.as_deref() else {
            return UploadResult::failed("record has no local file");
        };
        let Some(file_name) = source.file_name() else {
            return UploadResult::failed("record path has no file name");
        };

        let dest = self.destination(record, file_name);
        let id = relative_id(&dest, &self.root);

        if dest.exists() {
            let outcome = if same_audio(source, &dest) {
                UploadOutcome::Matched
            } else {
                UploadOutcome::AlreadyExists
            };
            return UploadResult {
                outcome,
                id: Some(id),
                reason: None,
            };
        }

        let copied = dest
            .parent()
            .map_or(Ok(()), fs::create_dir_all)
            .and_then(|_| fs::copy(source, &dest));

        match copied {
            Ok(_) => UploadResult {
                outcome: UploadOutcome::Uploaded,
                id: Some(id),
                reason: None,
            },
            Err(e) => UploadResult::failed(e.to_string()),
        }
    }

    fn download(&self, record: &Record) -> Result<Vec<u8>, LibraryError> {
        fs::read(self.song_path(record)).map_err(|e| LibraryError::Transfer {
            id: record.id.clone(),
            reason: e.to_string(),
        })
    }

    /// Remove the song's file, then any folders it leaves empty below the root.
    fn delete(&self, record: &Record) -> Result<(), LibraryError> {
        let path = self.song_path(record);
        if !path.starts_with(&self.root) && !path.starts_with(std::path::absolute(&self.root)?) {
            return Err(LibraryError::Transfer {
                id: record.id.clone(),
                reason: "song is outside the library".into(),
            });
        }
        fs::remove_file(&path).map_err(|e| LibraryError::Transfer {
            id: record.id.clone(),
            reason: e.to_string(),
        })?;

        let root = std::path::absolute(&self.root)?;
        let mut dir = std::path::absolute(&path)?.parent().map(Path::to_path_buf);
        while let Some(d) = dir {
            // remove_dir fails on non-empty folders, which ends the walk
            if d == root || !d.starts_with(&root) || fs::remove_dir(&d).is_err() {
                break;
            }
            dir = d.parent().map(Path::to_path_buf);
        }
        Ok(())
    }
}

/// Both files hold the same audio, ignoring tags.
fn same_audio(a: &Path, b: &Path) -> bool {
    match (fs::read(a), fs::read(b)) {
        (Ok(a), Ok(b)) => audio_hash(&a) == audio_hash(&b),
        _ => false,
    }
}
