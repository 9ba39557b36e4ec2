use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;

use chrono::{DateTime, FixedOffset, Utc};

use tunesync::dates::{DateFilter, Policy, TimePeriod, filter_by_date};
use tunesync::diff::CompareMode;
use tunesync::filter::{FilterSet, filter_records};
use tunesync::record::Record;
use tunesync::remote::{MirrorLibrary, RemoteLibrary};
use tunesync::report::CollectingReporter;
use tunesync::scanner::ScanOptions;
use tunesync::scanner::metadata::{TagInfo, TagReader, audio_hash};
use tunesync::sync::{self, Selection};
use tunesync::transfer;

/// Tags keyed by file name, so copies keep their tags.
#[derive(Default)]
struct FakeReader {
    tags: HashMap<String, TagInfo>,
}

impl FakeReader {
    fn with(mut self, file: &str, artist: &str, album: &str, title: &str, track: u32) -> Self {
        self.tags.insert(
            file.to_string(),
            TagInfo {
                artist: Some(artist.into()),
                album: Some(album.into()),
                title: Some(title.into()),
                track_number: Some(track),
                ..Default::default()
            },
        );
        self
    }
}

impl TagReader for FakeReader {
    fn is_supported(&self, _header: &[u8], extension: &str) -> bool {
        extension == "mp3"
    }

    fn read_tags(&self, path: &Path) -> Result<TagInfo, String> {
        let name = path.file_name().unwrap().to_string_lossy();
        self.tags
            .get(name.as_ref())
            .cloned()
            .ok_or_else(|| format!("no tags for {name}"))
    }

    fn content_hash(&self, path: &Path) -> io::Result<String> {
        Ok(audio_hash(&fs::read(path)?))
    }
}

fn reader() -> FakeReader {
    FakeReader::default()
        .with("a.mp3", "Test", "X", "Song1", 1)
        .with("b.mp3", "Test", "X", "Song2", 2)
}

fn music_dir() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("a.mp3"), b"first song").unwrap();
    fs::write(dir.path().join("b.mp3"), b"second song").unwrap();
    dir
}

fn names(records: &[Record]) -> Vec<String> {
    records
        .iter()
        .map(|r| {
            r.path
                .as_ref()
                .and_then(|p| p.file_name())
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| r.id.clone())
        })
        .collect()
}

fn metadata_only() -> CompareMode {
    CompareMode {
        hash: false,
        metadata: true,
    }
}

#[test]
fn song_missing_remotely_is_found_by_metadata() {
    let dir = music_dir();
    let local = sync::local_songs(
        &[dir.path().to_path_buf()],
        &ScanOptions::default(),
        &Selection::default(),
        &reader(),
        &CollectingReporter::default(),
    )
    .unwrap();

    let remote = vec![Record {
        artist: Some("test".into()),
        album: Some("x".into()),
        title: Some("song2".into()),
        track_number: Some(2),
        ..Record::remote("remote-b")
    }];

    let missing = sync::missing_songs(local, &remote, metadata_only());
    assert_eq!(names(&missing), ["a.mp3"]);
}

#[test]
fn upload_then_resync_finds_nothing_missing() {
    let dir = music_dir();
    let mirror_dir = tempfile::tempdir().unwrap();
    let library = MirrorLibrary::with_reader(mirror_dir.path(), reader()).hashing(true);
    let options = ScanOptions {
        hash: true,
        ..Default::default()
    };
    let roots: Vec<PathBuf> = vec![dir.path().to_path_buf()];

    let local = sync::local_songs(
        &roots,
        &options,
        &Selection::default(),
        &reader(),
        &CollectingReporter::default(),
    )
    .unwrap();
    let remote = sync::remote_songs(&library, &Selection::default()).unwrap();
    assert!(remote.is_empty());

    let missing = sync::missing_songs(local.clone(), &remote, CompareMode::default());
    assert_eq!(missing.len(), 2);

    let summary = transfer::upload_songs(
        &library,
        &missing,
        false,
        &AtomicBool::new(false),
        &CollectingReporter::default(),
    );
    assert_eq!(summary.succeeded, 2);
    assert!(mirror_dir.path().join("Test/X/a.mp3").exists());

    let remote = library.list_songs().unwrap();
    assert_eq!(remote.len(), 2);
    assert!(sync::missing_songs(local.clone(), &remote, CompareMode::default()).is_empty());
    let hash_only = CompareMode {
        hash: true,
        metadata: false,
    };
    assert!(sync::missing_songs(local, &remote, hash_only).is_empty());
}

#[test]
fn download_writes_songs_missing_locally() {
    let mirror_dir = music_dir();
    let out = tempfile::tempdir().unwrap();
    let library = MirrorLibrary::with_reader(mirror_dir.path(), reader());

    let remote = sync::remote_songs(&library, &Selection::default()).unwrap();
    let missing = sync::missing_songs(remote, &[], metadata_only());
    let template = transfer::OutputTemplate::new(format!(
        "{}/%artist%/%album%/%track2% - %title%",
        out.path().display()
    ));

    let summary = transfer::download_songs(
        &library,
        &missing,
        &template,
        &AtomicBool::new(false),
        &CollectingReporter::default(),
    );

    assert_eq!(summary.succeeded, 2);
    assert_eq!(
        fs::read(out.path().join("Test/X/01 - Song1.mp3")).unwrap(),
        b"first song"
    );
    assert_eq!(template.base_path(), out.path());
}

fn remote_song(id: &str, artist: &str, album: &str) -> Record {
    Record {
        artist: Some(artist.into()),
        album: Some(album.into()),
        ..Record::remote(id)
    }
}

#[test]
fn include_and_exclude_in_one_expression() {
    let records = vec![
        remote_song("1", "Foo", "Baz"),
        remote_song("2", "Foo", "Bar"),
        remote_song("3", "Qux", "Baz"),
    ];
    let filters = FilterSet::parse(&["artist[Foo]-album[Bar]"]).unwrap();
    let kept: Vec<_> = filter_records(records, &filters)
        .into_iter()
        .map(|r| r.id)
        .collect();
    assert_eq!(kept, ["1"]);
}

#[test]
fn created_on_covers_exactly_one_day() {
    let at = |s: &str| {
        Some(
            DateTime::parse_from_rfc3339(s)
                .unwrap()
                .with_timezone(&Utc),
        )
    };
    let mk = |id: &str, created: &str| Record {
        created: at(created),
        ..Record::remote(id)
    };
    let records = vec![
        mk("start", "2020-05-01T00:00:00Z"),
        mk("late", "2020-05-01T23:59:59Z"),
        mk("next", "2020-05-02T00:00:00Z"),
        mk("before", "2020-04-30T23:59:59Z"),
    ];

    let filter = DateFilter {
        created: vec![TimePeriod::parse("2020-05-01", Policy::On, FixedOffset::east_opt(0)).unwrap()],
        modified: vec![],
    };
    let kept: Vec<_> = filter_by_date(records, &filter)
        .into_iter()
        .map(|r| r.id)
        .collect();
    assert_eq!(kept, ["start", "late"]);
}

#[test]
fn depth_limit_applies_to_scans() {
    let dir = music_dir();
    fs::create_dir_all(dir.path().join("nested")).unwrap();
    fs::write(dir.path().join("nested/c.mp3"), b"third song").unwrap();
    let roots = [dir.path().to_path_buf()];

    let scan = |max_depth| {
        let options = ScanOptions {
            max_depth,
            ..Default::default()
        };
        sync::local_songs(
            &roots,
            &options,
            &Selection::default(),
            &reader(),
            &CollectingReporter::default(),
        )
        .unwrap()
    };

    let mut shallow = names(&scan(Some(0)));
    shallow.sort();
    assert_eq!(shallow, ["a.mp3", "b.mp3"]);
    assert_eq!(scan(None).len(), 3);
}
