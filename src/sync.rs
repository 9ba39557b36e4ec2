//! The reconciliation pipeline shared by every command:
//! list a collection, narrow it by metadata then by date, compare it with
//! the other side.

use std::path::PathBuf;

use crate::dates::{DateFilter, filter_by_date};
use crate::diff::{CompareMode, find_missing};
use crate::filter::{FilterSet, filter_records};
use crate::record::{Record, sort_records};
use crate::remote::{LibraryError, RemoteLibrary};
use crate::report::Reporter;
use crate::scanner::metadata::TagReader;
use crate::scanner::{self, ScanError, ScanOptions};

/// Narrowing applied to a collection before it is compared.
#[derive(Debug, Clone, Default)]
pub struct Selection {
    pub filters: FilterSet,
    pub dates: DateFilter,
}

impl Selection {
    /// Metadata filters first, then date periods.
    pub fn apply(&self, records: Vec<Record>) -> Vec<Record> {
        filter_by_date(filter_records(records, &self.filters), &self.dates)
    }
}

/// Scan `roots` and narrow the result.
pub fn local_songs(
    roots: &[PathBuf],
    options: &ScanOptions,
    selection: &Selection,
    reader: &dyn TagReader,
    reporter: &dyn Reporter,
) -> Result<Vec<Record>, ScanError> {
    let records = scanner::scan(roots, options, reader, reporter)?;
    Ok(selection.apply(records))
}

/// List the remote library and narrow the result.
pub fn remote_songs(
    library: &dyn RemoteLibrary,
    selection: &Selection,
) -> Result<Vec<Record>, LibraryError> {
    let records = library.list_songs()?;
    log::info!("Found {} remote songs", records.len());
    Ok(selection.apply(records))
}

/// Songs of `source` that `target` lacks, sorted for transfer.
pub fn missing_songs(source: Vec<Record>, target: &[Record], mode: CompareMode) -> Vec<Record> {
    let mut missing = find_missing(source, target, mode);
    sort_records(&mut missing);
    log::info!("Found {} songs missing", missing.len());
    missing
}
