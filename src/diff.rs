//! Decide which songs of one collection are missing from another.
//!
//! Two identities are available. Hash mode compares opaque content hashes.
//! Metadata mode compares a [`DiffKey`] built from artist, album, title and
//! track number after normalization, so `"AC/DC"` and `"ac dc "` agree.

use std::collections::HashSet;

use thiserror::Error;

use crate::record::Record;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("use one of --{0}/--no-{0}, not both")]
pub struct UsageError(pub &'static str);

/// Which identities a comparison uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompareMode {
    pub hash: bool,
    pub metadata: bool,
}

impl Default for CompareMode {
    fn default() -> Self {
        Self {
            hash: true,
            metadata: true,
        }
    }
}

impl CompareMode {
    /// Resolve `--use-X`/`--no-use-X` flag pairs on top of `defaults`.
    /// Giving both flags of a pair is a usage error.
    pub fn from_flags(
        defaults: CompareMode,
        use_hash: bool,
        no_use_hash: bool,
        use_metadata: bool,
        no_use_metadata: bool,
    ) -> Result<Self, UsageError> {
        if use_hash && no_use_hash {
            return Err(UsageError("use-hash"));
        }
        if use_metadata && no_use_metadata {
            return Err(UsageError("use-metadata"));
        }

        Ok(Self {
            hash: pick(defaults.hash, use_hash, no_use_hash),
            metadata: pick(defaults.metadata, use_metadata, no_use_metadata),
        })
    }
}

fn pick(default: bool, yes: bool, no: bool) -> bool {
    if yes {
        true
    } else if no {
        false
    } else {
        default
    }
}

/// Normalized metadata identity of a record.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DiffKey {
    pub artist: String,
    pub album: String,
    pub title: String,
    pub track_number: Option<u32>,
}

impl DiffKey {
    pub fn of(record: &Record) -> Self {
        let norm = |v: &Option<String>| v.as_deref().map(normalize).unwrap_or_default();
        Self {
            artist: norm(&record.artist),
            album: norm(&record.album),
            title: norm(&record.title),
            track_number: record.track_number,
        }
    }
}

/// Case-fold, spell out `&`, turn punctuation into spaces and collapse runs
/// of whitespace.
pub fn normalize(value: &str) -> String {
    let folded = value.to_lowercase().replace('&', " and ");
    let spaced: String = folded
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    spaced.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Records of `source` with no counterpart in `target`, in source order.
///
/// With both modes on, hash mode narrows the source first and metadata mode
/// runs on what is left, so a song counts as missing only if neither its
/// hash nor its metadata is found. With neither mode, everything is missing.
pub fn find_missing(source: Vec<Record>, target: &[Record], mode: CompareMode) -> Vec<Record> {
    let mut missing = source;

    if mode.hash {
        missing = missing_by_hash(missing, target);
    }
    if mode.metadata {
        missing = missing_by_metadata(missing, target);
    }

    missing
}

pub fn missing_by_hash(source: Vec<Record>, target: &[Record]) -> Vec<Record> {
    let hashes: HashSet<&str> = target.iter().filter_map(|r| r.hash.as_deref()).collect();
    source
        .into_iter()
        .filter(|r| r.hash.as_deref().is_none_or(|h| !hashes.contains(h)))
        .collect()
}

pub fn missing_by_metadata(source: Vec<Record>, target: &[Record]) -> Vec<Record> {
    let keys: HashSet<DiffKey> = target.iter().map(DiffKey::of).collect();
    source
        .into_iter()
        .filter(|r| !keys.contains(&DiffKey::of(r)))
        .collect()
}
