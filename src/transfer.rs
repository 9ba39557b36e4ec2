//! Upload, download and delete loops over a [`RemoteLibrary`].
//!
//! Each item is transferred on its own: a failure is logged and counted and
//! the loop moves on. The cancel flag is checked between items, so an
//! interrupt never leaves a half-written song behind.

use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::LazyLock;
use std::sync::atomic::{AtomicBool, Ordering};

use regex::{Captures, Regex};
use serde::Serialize;

use crate::record::Record;
use crate::remote::RemoteLibrary;
use crate::report::{Event, EventKind, Outcome, Reporter};

pub const DEFAULT_TEMPLATE: &str = "%artist%/%album%/%track2% - %title%";

static PLACEHOLDER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"%([A-Za-z0-9_]+)%").unwrap());

/// Counts for one transfer run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TransferSummary {
    pub total: usize,
    pub succeeded: usize,
    pub skipped: usize,
    pub failed: usize,
    /// The cancel flag stopped the loop before every item was handled.
    pub interrupted: bool,
}

/// Replace characters that are not allowed in a file name component.
pub fn sanitize_component(value: &str) -> String {
    let cleaned: String = value
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let trimmed = cleaned.trim().trim_end_matches('.');
    match trimmed {
        "" | "." | ".." => "_".to_string(),
        t => t.to_string(),
    }
}

/// Download destination pattern such as `%artist%/%album%/%track2% - %title%`.
///
/// Placeholders: `%artist%`, `%album_artist%`, `%album%`, `%title%`,
/// `%genre%`, `%year%`, `%track%`, `%track2%`, `%disc%`, `%disc2%`. Unknown
/// placeholders are kept literally. The file extension comes from the record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputTemplate {
    raw: String,
}

impl Default for OutputTemplate {
    fn default() -> Self {
        Self::new(DEFAULT_TEMPLATE)
    }
}

impl OutputTemplate {
    pub fn new(raw: impl Into<String>) -> Self {
        Self { raw: raw.into() }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// The literal directory prefix before the first placeholder. This is
    /// where already-downloaded songs live.
    pub fn base_path(&self) -> PathBuf {
        let mut base = PathBuf::new();
        let mut templated = false;
        for component in Path::new(&self.raw).components() {
            if component.as_os_str().to_string_lossy().contains('%') {
                templated = true;
                break;
            }
            base.push(component);
        }
        // Without placeholders the last component is the file name
        if !templated {
            base.pop();
        }
        if base.as_os_str().is_empty() {
            PathBuf::from(".")
        } else {
            base
        }
    }

    /// Destination path for `record`, extension included.
    pub fn render(&self, record: &Record) -> PathBuf {
        let mut path = PathBuf::new();
        for component in Path::new(&self.raw).components() {
            match component {
                Component::Normal(part) => {
                    let part = part.to_string_lossy();
                    let rendered = PLACEHOLDER_RE.replace_all(&part, |caps: &Captures| {
                        placeholder(record, &caps[1])
                            .map(|v| if v.is_empty() { v } else { sanitize_component(&v) })
                            .unwrap_or_else(|| caps[0].to_string())
                    });
                    path.push(rendered.as_ref());
                }
                other => path.push(other),
            }
        }

        let ext = record.extension().unwrap_or_else(|| "mp3".to_string());
        let file_name = path
            .file_name()
            .map(|n| format!("{}.{ext}", n.to_string_lossy()))
            .unwrap_or_else(|| format!("{}.{ext}", sanitize_component(&record.id)));
        path.set_file_name(file_name);
        path
    }
}

fn placeholder(record: &Record, name: &str) -> Option<String> {
    let text = |v: &Option<String>, fallback: &str| {
        v.as_deref()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(fallback)
            .to_string()
    };

    let value = match name.to_lowercase().as_str() {
        "artist" => text(&record.artist, "Unknown Artist"),
        "album_artist" | "albumartist" => text(
            if record.album_artist.is_some() {
                &record.album_artist
            } else {
                &record.artist
            },
            "Unknown Artist",
        ),
        "album" => text(&record.album, "Unknown Album"),
        "title" => text(&record.title, "Unknown Title"),
        "genre" => text(&record.genre, "Unknown Genre"),
        "year" => record.year.map(|y| y.to_string()).unwrap_or_default(),
        "track" => record.track_number.unwrap_or(0).to_string(),
        "track2" => format!("{:02}", record.track_number.unwrap_or(0)),
        "disc" => record.disc_number.unwrap_or(0).to_string(),
        "disc2" => format!("{:02}", record.disc_number.unwrap_or(0)),
        _ => return None,
    };
    Some(value)
}

/// `(  7/120)` style counter, padded to the width of `total`.
fn counter(n: usize, total: usize) -> String {
    let width = total.to_string().len();
    format!("({n:>width$}/{total})")
}

fn label(record: &Record) -> String {
    record
        .path
        .as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| record.id.clone())
}

/// Upload `records` one at a time.
///
/// With `delete_on_success`, the local file is removed once the library
/// holds the song. A failed removal is logged but the upload still counts.
pub fn upload_songs(
    library: &dyn RemoteLibrary,
    records: &[Record],
    delete_on_success: bool,
    cancel: &AtomicBool,
    reporter: &dyn Reporter,
) -> TransferSummary {
    let total = records.len();
    let mut summary = TransferSummary {
        total,
        ..Default::default()
    };
    reporter.start(EventKind::Upload, total);

    for (i, record) in records.iter().enumerate() {
        if cancel.load(Ordering::Relaxed) {
            summary.interrupted = true;
            break;
        }

        let item = label(record);
        let n = counter(i + 1, total);
        let result = library.upload(record);

        let outcome = if result.is_success() {
            summary.succeeded += 1;
            log::info!(
                "{n} {} -- {item} ({})",
                result.outcome.label(),
                result.id.as_deref().unwrap_or("")
            );

            if let (true, Some(path)) = (delete_on_success, &record.path) {
                if let Err(e) = fs::remove_file(path) {
                    log::warn!("Failed to remove {} after upload: {e}", path.display());
                }
            }
            Outcome::Done(result.outcome.label().to_string())
        } else {
            summary.failed += 1;
            let reason = result.reason.unwrap_or_else(|| "no song id returned".into());
            log::warn!("{n} Failed to upload -- {item} | {reason}");
            Outcome::Failed(reason)
        };

        reporter.event(Event {
            kind: EventKind::Upload,
            item,
            outcome,
        });
    }

    reporter.finish(EventKind::Upload);
    summary
}

/// Download `records` into the paths `template` renders for them.
///
/// Existing files are never overwritten.
pub fn download_songs(
    library: &dyn RemoteLibrary,
    records: &[Record],
    template: &OutputTemplate,
    cancel: &AtomicBool,
    reporter: &dyn Reporter,
) -> TransferSummary {
    let total = records.len();
    let mut summary = TransferSummary {
        total,
        ..Default::default()
    };
    reporter.start(EventKind::Download, total);

    for (i, record) in records.iter().enumerate() {
        if cancel.load(Ordering::Relaxed) {
            summary.interrupted = true;
            break;
        }

        let n = counter(i + 1, total);
        let dest = template.render(record);

        let outcome = if dest.exists() {
            summary.skipped += 1;
            log::info!("{n} Skipped -- {} | file exists", dest.display());
            Outcome::Skipped("file exists".into())
        } else {
            match download_one(library, record, &dest) {
                Ok(()) => {
                    summary.succeeded += 1;
                    log::info!("{n} Downloaded -- {} ({})", dest.display(), record.id);
                    Outcome::Done("Downloaded".into())
                }
                Err(reason) => {
                    summary.failed += 1;
                    log::warn!("{n} Failed to download -- {record} | {reason}");
                    Outcome::Failed(reason)
                }
            }
        };

        reporter.event(Event {
            kind: EventKind::Download,
            item: record.id.clone(),
            outcome,
        });
    }

    reporter.finish(EventKind::Download);
    summary
}

/// Remove `records` from the library one at a time.
pub fn delete_songs(
    library: &dyn RemoteLibrary,
    records: &[Record],
    cancel: &AtomicBool,
    reporter: &dyn Reporter,
) -> TransferSummary {
    let total = records.len();
    let mut summary = TransferSummary {
        total,
        ..Default::default()
    };
    reporter.start(EventKind::Delete, total);

    for (i, record) in records.iter().enumerate() {
        if cancel.load(Ordering::Relaxed) {
            summary.interrupted = true;
            break;
        }

        let n = counter(i + 1, total);
        let outcome = match library.delete(record) {
            Ok(()) => {
                summary.succeeded += 1;
                log::info!("{n} Deleted -- {record}");
                Outcome::Done("Deleted".into())
            }
            Err(e) => {
                summary.failed += 1;
                log::warn!("{n} Failed to delete -- {record} | {e}");
                Outcome::Failed(e.to_string())
            }
        };

        reporter.event(Event {
            kind: EventKind::Delete,
            item: record.id.clone(),
            outcome,
        });
    }

    reporter.finish(EventKind::Delete);
    summary
}

fn download_one(library: &dyn RemoteLibrary, record: &Record, dest: &Path) -> Result<(), String> {
    let bytes = library.download(record).map_err(|e| e.to_string())?;
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).map_err(|e| e.to_string())?;
    }
    fs::write(dest, bytes).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::{LibraryError, UploadOutcome, UploadResult};
    use crate::report::CollectingReporter;
    use std::collections::HashSet;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct FakeLibrary {
        broken: HashSet<String>,
        /// Raised when the named song is handled, simulating Ctrl-C mid-run.
        interrupt_on: Option<(String, Arc<AtomicBool>)>,
        seen: Mutex<Vec<String>>,
    }

    impl FakeLibrary {
        fn touch(&self, id: &str) {
            self.seen.lock().unwrap().push(id.to_string());
            if let Some((at, flag)) = &self.interrupt_on {
                if at == id {
                    flag.store(true, Ordering::Relaxed);
                }
            }
        }

        fn seen(&self) -> Vec<String> {
            self.seen.lock().unwrap().clone()
        }
    }

    impl RemoteLibrary for FakeLibrary {
        fn list_songs(&self) -> Result<Vec<Record>, LibraryError> {
            Ok(Vec::new())
        }

        fn upload(&self, record: &Record) -> UploadResult {
            self.touch(&record.id);
            if self.broken.contains(&record.id) {
                UploadResult::failed("rejected")
            } else {
                UploadResult {
                    outcome: UploadOutcome::Uploaded,
                    id: Some(format!("remote-{}", record.id)),
                    reason: None,
                }
            }
        }

        fn download(&self, record: &Record) -> Result<Vec<u8>, LibraryError> {
            self.touch(&record.id);
            if self.broken.contains(&record.id) {
                Err(LibraryError::Transfer {
                    id: record.id.clone(),
                    reason: "gone".into(),
                })
            } else {
                Ok(record.id.as_bytes().to_vec())
            }
        }

        fn delete(&self, record: &Record) -> Result<(), LibraryError> {
            self.touch(&record.id);
            if self.broken.contains(&record.id) {
                Err(LibraryError::Transfer {
                    id: record.id.clone(),
                    reason: "locked".into(),
                })
            } else {
                Ok(())
            }
        }
    }

    fn song(id: &str, artist: &str, title: &str, track: u32) -> Record {
        Record {
            artist: Some(artist.into()),
            album: Some("Album".into()),
            title: Some(title.into()),
            track_number: Some(track),
            extra: [("format".to_string(), "flac".to_string())].into(),
            ..Record::remote(id)
        }
    }

    #[test]
    fn sanitizes_path_characters() {
        assert_eq!(sanitize_component("AC/DC"), "AC_DC");
        assert_eq!(sanitize_component("What?: Now"), "What__ Now");
        assert_eq!(sanitize_component("  .. "), "_");
        assert_eq!(sanitize_component("Etc."), "Etc");
    }

    #[test]
    fn renders_default_template() {
        let template = OutputTemplate::default();
        let r = song("1", "AC/DC", "Hells Bells", 1);
        assert_eq!(
            template.render(&r),
            PathBuf::from("AC_DC/Album/01 - Hells Bells.flac")
        );
    }

    #[test]
    fn missing_tags_use_fallbacks() {
        let template = OutputTemplate::new("out/%artist%/%title% [%year%] %unknown%");
        let r = Record::remote("x");
        assert_eq!(
            template.render(&r),
            PathBuf::from("out/Unknown Artist/Unknown Title [] %unknown%.mp3")
        );
    }

    #[test]
    fn base_path_is_literal_prefix() {
        assert_eq!(
            OutputTemplate::new("/srv/music/%artist%/%title%").base_path(),
            PathBuf::from("/srv/music")
        );
        assert_eq!(OutputTemplate::default().base_path(), PathBuf::from("."));
        assert_eq!(
            OutputTemplate::new("dl/fixed-name").base_path(),
            PathBuf::from("dl")
        );
    }

    #[test]
    fn counter_pads_to_total_width() {
        assert_eq!(counter(7, 120), "(  7/120)");
        assert_eq!(counter(1, 1), "(1/1)");
    }

    #[test]
    fn upload_failures_do_not_stop_the_run() {
        let lib = FakeLibrary {
            broken: ["b".to_string()].into(),
            ..Default::default()
        };
        let reporter = CollectingReporter::default();
        let songs = [song("a", "x", "A", 1), song("b", "x", "B", 2), song("c", "x", "C", 3)];

        let summary = upload_songs(&lib, &songs, false, &AtomicBool::new(false), &reporter);

        assert_eq!(lib.seen(), ["a", "b", "c"]);
        assert_eq!(summary.succeeded, 2);
        assert_eq!(summary.failed, 1);
        assert!(!summary.interrupted);
        let failed: Vec<_> = reporter
            .events()
            .into_iter()
            .filter(|e| e.outcome.is_failure())
            .map(|e| e.item)
            .collect();
        assert_eq!(failed, ["b"]);
    }

    #[test]
    fn interrupt_stops_between_items() {
        let cancel = Arc::new(AtomicBool::new(false));
        let lib = FakeLibrary {
            interrupt_on: Some(("a".into(), cancel.clone())),
            ..Default::default()
        };
        let songs = [song("a", "x", "A", 1), song("b", "x", "B", 2)];

        let summary = upload_songs(
            &lib,
            &songs,
            false,
            &cancel,
            &CollectingReporter::default(),
        );

        assert_eq!(lib.seen(), ["a"]);
        assert_eq!(summary.succeeded, 1);
        assert!(summary.interrupted);
    }

    #[test]
    fn delete_on_success_removes_only_uploaded_files() {
        let dir = tempfile::tempdir().unwrap();
        let ok = dir.path().join("ok.mp3");
        let bad = dir.path().join("bad.mp3");
        fs::write(&ok, b"x").unwrap();
        fs::write(&bad, b"x").unwrap();

        let bad_id = bad.to_string_lossy().into_owned();
        let lib = FakeLibrary {
            broken: [bad_id].into(),
            ..Default::default()
        };
        let songs = [Record::local(&ok), Record::local(&bad)];

        upload_songs(
            &lib,
            &songs,
            true,
            &AtomicBool::new(false),
            &CollectingReporter::default(),
        );

        assert!(!ok.exists());
        assert!(bad.exists());
    }

    #[test]
    fn downloads_write_rendered_paths_and_skip_existing() {
        let dir = tempfile::tempdir().unwrap();
        let template =
            OutputTemplate::new(format!("{}/%artist%/%track2% - %title%", dir.path().display()));
        let songs = [
            song("a", "X", "First", 1),
            song("b", "X", "Second", 2),
            song("c", "X", "Third", 3),
        ];
        let existing = dir.path().join("X/03 - Third.flac");
        fs::create_dir_all(existing.parent().unwrap()).unwrap();
        fs::write(&existing, b"old").unwrap();

        let lib = FakeLibrary {
            broken: ["b".to_string()].into(),
            ..Default::default()
        };
        let summary = download_songs(
            &lib,
            &songs,
            &template,
            &AtomicBool::new(false),
            &CollectingReporter::default(),
        );

        assert_eq!(
            summary,
            TransferSummary {
                total: 3,
                succeeded: 1,
                skipped: 1,
                failed: 1,
                interrupted: false,
            }
        );
        assert_eq!(fs::read(dir.path().join("X/01 - First.flac")).unwrap(), b"a");
        assert!(!dir.path().join("X/02 - Second.flac").exists());
        assert_eq!(fs::read(&existing).unwrap(), b"old");
    }

    #[test]
    fn delete_failures_are_counted_and_skipped_past() {
        let lib = FakeLibrary {
            broken: ["a".to_string()].into(),
            ..Default::default()
        };
        let reporter = CollectingReporter::default();
        let songs = [song("a", "x", "A", 1), song("b", "x", "B", 2)];

        let summary = delete_songs(&lib, &songs, &AtomicBool::new(false), &reporter);

        assert_eq!(lib.seen(), ["a", "b"]);
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.failed, 1);
        let outcomes: Vec<_> = reporter.events().into_iter().map(|e| e.outcome).collect();
        assert_eq!(
            outcomes,
            [
                Outcome::Failed("transfer failed for a: locked".into()),
                Outcome::Done("Deleted".into()),
            ]
        );
    }

    #[test]
    fn delete_stops_when_interrupted() {
        let cancel = Arc::new(AtomicBool::new(false));
        let lib = FakeLibrary {
            interrupt_on: Some(("a".into(), cancel.clone())),
            ..Default::default()
        };
        let songs = [song("a", "x", "A", 1), song("b", "x", "B", 2)];

        let summary = delete_songs(&lib, &songs, &cancel, &CollectingReporter::default());

        assert_eq!(lib.seen(), ["a"]);
        assert!(summary.interrupted);
    }

    #[test]
    fn cancelled_before_start_does_nothing() {
        let lib = FakeLibrary::default();
        let summary = download_songs(
            &lib,
            &[song("a", "X", "A", 1)],
            &OutputTemplate::default(),
            &AtomicBool::new(true),
            &CollectingReporter::default(),
        );
        assert!(summary.interrupted);
        assert!(lib.seen().is_empty());
    }
}
