use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which side of the sync a record was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    Local,
    Remote,
}

/// The fixed set of record fields that filters can address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Field {
    Id,
    Path,
    Artist,
    AlbumArtist,
    Album,
    Title,
    TrackNumber,
    DiscNumber,
    Year,
    Genre,
    Created,
    Modified,
    Hash,
}

impl Field {
    pub const ALL: &'static [Field] = &[
        Field::Id,
        Field::Path,
        Field::Artist,
        Field::AlbumArtist,
        Field::Album,
        Field::Title,
        Field::TrackNumber,
        Field::DiscNumber,
        Field::Year,
        Field::Genre,
        Field::Created,
        Field::Modified,
        Field::Hash,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Id => "id",
            Self::Path => "path",
            Self::Artist => "artist",
            Self::AlbumArtist => "album_artist",
            Self::Album => "album",
            Self::Title => "title",
            Self::TrackNumber => "track_number",
            Self::DiscNumber => "disc_number",
            Self::Year => "year",
            Self::Genre => "genre",
            Self::Created => "created",
            Self::Modified => "modified",
            Self::Hash => "hash",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Error for a field name outside [`Field::ALL`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown field '{0}'")]
pub struct UnknownField(pub String);

impl FromStr for Field {
    type Err = UnknownField;

    /// Case-insensitive; `_`, `-` and spaces are ignored so `trackNumber`,
    /// `track_number` and `tracknumber` all resolve to the same field.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key: String = s
            .chars()
            .filter(|c| !matches!(c, '_' | '-' | ' '))
            .collect::<String>()
            .to_lowercase();

        let field = match key.as_str() {
            "id" | "songid" => Self::Id,
            "path" | "filepath" => Self::Path,
            "artist" => Self::Artist,
            "albumartist" => Self::AlbumArtist,
            "album" => Self::Album,
            "title" => Self::Title,
            "tracknumber" | "track" => Self::TrackNumber,
            "discnumber" | "disc" => Self::DiscNumber,
            "year" | "date" => Self::Year,
            "genre" => Self::Genre,
            "created" | "creationtimestamp" => Self::Created,
            "modified" | "lastmodifiedtimestamp" => Self::Modified,
            "hash" | "contenthash" => Self::Hash,
            _ => return Err(UnknownField(s.to_string())),
        };
        Ok(field)
    }
}

/// An immutable song snapshot from either the local folder or the remote library.
///
/// `id` is unique within the collection the record came from: the absolute
/// path for local files, the service id for remote songs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    pub source: Source,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,

    #[serde(default)]
    pub artist: Option<String>,
    #[serde(default)]
    pub album_artist: Option<String>,
    #[serde(default)]
    pub album: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub track_number: Option<u32>,
    #[serde(default)]
    pub disc_number: Option<u32>,
    #[serde(default)]
    pub year: Option<i32>,
    #[serde(default)]
    pub genre: Option<String>,

    #[serde(default)]
    pub created: Option<DateTime<Utc>>,
    #[serde(default)]
    pub modified: Option<DateTime<Utc>>,

    /// Opaque content hash supplied by the tag reader or the remote service.
    #[serde(default)]
    pub hash: Option<String>,

    /// Fields the service or tags carry that filters don't address.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, String>,
}

impl Record {
    fn empty(id: String, source: Source) -> Self {
        Self {
            id,
            source,
            path: None,
            artist: None,
            album_artist: None,
            album: None,
            title: None,
            track_number: None,
            disc_number: None,
            year: None,
            genre: None,
            created: None,
            modified: None,
            hash: None,
            extra: BTreeMap::new(),
        }
    }

    /// A local record identified by its path.
    pub fn local(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut record = Self::empty(path.to_string_lossy().into_owned(), Source::Local);
        record.path = Some(path);
        record
    }

    /// A remote record identified by the service id.
    pub fn remote(id: impl Into<String>) -> Self {
        Self::empty(id.into(), Source::Remote)
    }

    /// String form of a field, as seen by filters. `None` when the field is unset.
    pub fn value(&self, field: Field) -> Option<String> {
        match field {
            Field::Id => Some(self.id.clone()),
            Field::Path => self.path.as_ref().map(|p| p.to_string_lossy().into_owned()),
            Field::Artist => self.artist.clone(),
            Field::AlbumArtist => self.album_artist.clone(),
            Field::Album => self.album.clone(),
            Field::Title => self.title.clone(),
            Field::TrackNumber => self.track_number.map(|n| n.to_string()),
            Field::DiscNumber => self.disc_number.map(|n| n.to_string()),
            Field::Year => self.year.map(|y| y.to_string()),
            Field::Genre => self.genre.clone(),
            Field::Created => self.created.map(|t| t.to_rfc3339()),
            Field::Modified => self.modified.map(|t| t.to_rfc3339()),
            Field::Hash => self.hash.clone(),
        }
    }

    /// File extension of the local path, lowercased, if any.
    pub fn extension(&self) -> Option<String> {
        self.path
            .as_deref()
            .and_then(Path::extension)
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .or_else(|| self.extra.get("format").map(|f| f.to_lowercase()))
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} -- {} -- {} ({})",
            self.title.as_deref().unwrap_or("<title>"),
            self.artist.as_deref().unwrap_or("<artist>"),
            self.album.as_deref().unwrap_or("<album>"),
            self.id
        )
    }
}

/// Convert a service timestamp in epoch microseconds.
pub fn from_epoch_micros(micros: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_micros(micros)
}

/// Sort by artist, album, disc, track, then title (case-insensitive).
pub fn sort_records(records: &mut [Record]) {
    fn lower(s: &Option<String>) -> String {
        s.as_deref().unwrap_or("").to_lowercase()
    }

    records.sort_by(|a, b| {
        lower(&a.artist)
            .cmp(&lower(&b.artist))
            .then_with(|| lower(&a.album).cmp(&lower(&b.album)))
            .then_with(|| a.disc_number.unwrap_or(0).cmp(&b.disc_number.unwrap_or(0)))
            .then_with(|| a.track_number.unwrap_or(0).cmp(&b.track_number.unwrap_or(0)))
            .then_with(|| lower(&a.title).cmp(&lower(&b.title)))
            .then_with(|| a.id.cmp(&b.id))
    });
}
