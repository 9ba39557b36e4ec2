pub mod metadata;

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use thiserror::Error;
use walkdir::WalkDir;

use crate::exclude::ExclusionRules;
use crate::record::Record;
use crate::report::{Event, EventKind, Outcome, Reporter};
use metadata::TagReader;

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("path does not exist: {}", .0.display())]
    MissingRoot(PathBuf),
    #[error("scan interrupted")]
    Interrupted,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// How a scan walks and what it reads.
#[derive(Debug, Clone, Default)]
pub struct ScanOptions {
    /// Directory levels below each root to descend. `Some(0)` stays in the
    /// root itself, `None` is unbounded.
    pub max_depth: Option<usize>,
    pub rules: ExclusionRules,
    /// Compute content hashes (reads every file in full).
    pub hash: bool,
    /// Raised from a signal handler; the walk and tag reading stop early.
    pub interrupt: Option<Arc<AtomicBool>>,
}

impl ScanOptions {
    fn interrupted(&self) -> bool {
        self.interrupt
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }
}

/// Scan roots for audio files and build a record per file.
///
/// Tags are read in parallel but the result keeps enumeration order.
pub fn scan(
    roots: &[PathBuf],
    options: &ScanOptions,
    reader: &dyn TagReader,
    reporter: &dyn Reporter,
) -> Result<Vec<Record>, ScanError> {
    let files = find_audio_files(roots, options, reader)?;
    log::info!("Found {} local songs", files.len());
    read_records(&files, options, reader, reporter)
}

/// Enumerate supported audio files under `roots`, honoring depth and
/// exclusion rules.
///
/// Every root is checked before any directory is read; a missing one is a
/// usage error. Unreadable entries below a root are logged and skipped.
/// Returns [`ScanError::Interrupted`] once the interrupt flag is raised.
pub fn find_audio_files(
    roots: &[PathBuf],
    options: &ScanOptions,
    reader: &dyn TagReader,
) -> Result<Vec<PathBuf>, ScanError> {
    if let Some(missing) = roots.iter().find(|r| !r.exists()) {
        return Err(ScanError::MissingRoot(missing.clone()));
    }

    let mut seen: HashSet<PathBuf> = HashSet::new();
    let mut files = Vec::new();

    for root in roots {
        let root = std::path::absolute(root)?;

        if root.is_file() {
            let parent = root.parent().unwrap_or(&root);
            if !options.rules.is_excluded(&root, parent)
                && is_audio(&root, reader)
                && seen.insert(root.clone())
            {
                files.push(root);
            }
            continue;
        }

        let mut walker = WalkDir::new(&root).follow_links(true).min_depth(1);
        if let Some(depth) = options.max_depth {
            walker = walker.max_depth(depth.saturating_add(1));
        }

        let entries = walker
            .into_iter()
            .filter_entry(|e| !options.rules.is_excluded(e.path(), &root));

        for entry in entries {
            if options.interrupted() {
                return Err(ScanError::Interrupted);
            }
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    let path = e
                        .path()
                        .map(|p| p.display().to_string())
                        .unwrap_or_else(|| root.display().to_string());
                    log::warn!("Error reading {}: {}", path, e);
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.into_path();
            if is_audio(&path, reader) && seen.insert(path.clone()) {
                files.push(path);
            }
        }
    }

    Ok(files)
}

fn is_audio(path: &Path, reader: &dyn TagReader) -> bool {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();

    match metadata::read_header(path) {
        Ok(header) => reader.is_supported(&header, &ext),
        Err(e) => {
            log::warn!("Error reading {}: {}", path.display(), e);
            false
        }
    }
}

/// Build records for `files`, one per readable file, in input order.
pub fn read_records(
    files: &[PathBuf],
    options: &ScanOptions,
    reader: &dyn TagReader,
    reporter: &dyn Reporter,
) -> Result<Vec<Record>, ScanError> {
    reporter.start(EventKind::Scan, files.len());

    let records: Vec<Option<Record>> = files
        .par_iter()
        .map(|path| {
            if options.interrupted() {
                return None;
            }
            let result = read_record(path, options.hash, reader);
            let outcome = match &result {
                Ok(_) => Outcome::Done("Scanned".into()),
                Err(e) => Outcome::Failed(e.clone()),
            };
            reporter.event(Event {
                kind: EventKind::Scan,
                item: path.display().to_string(),
                outcome,
            });
            result.ok()
        })
        .collect();

    reporter.finish(EventKind::Scan);
    if options.interrupted() {
        return Err(ScanError::Interrupted);
    }
    Ok(records.into_iter().flatten().collect())
}

fn read_record(path: &Path, hash: bool, reader: &dyn TagReader) -> Result<Record, String> {
    let meta = std::fs::metadata(path).map_err(|e| e.to_string())?;

    let hash = if hash {
        Some(reader.content_hash(path).map_err(|e| e.to_string())?)
    } else {
        None
    };

    let tags = reader.read_tags(path).unwrap_or_else(|e| {
        log::debug!("Could not read tags from {}: {}", path.display(), e);
        Default::default()
    });

    Ok(Record {
        artist: tags.artist,
        album_artist: tags.album_artist,
        album: tags.album,
        title: tags.title,
        track_number: tags.track_number,
        disc_number: tags.disc_number,
        year: tags.year,
        genre: tags.genre,
        created: meta.created().ok().map(DateTime::<Utc>::from),
        modified: meta.modified().ok().map(DateTime::<Utc>::from),
        hash,
        ..Record::local(path)
    })
}
