//! Packs several named streams into one ZIP archive.
//!
//! The archive is built entirely in memory, so callers must bound the total
//! input size (the HTTP layer does so with its request body limit).

use std::collections::BTreeMap;
use std::io::{self, Cursor, Read, Write};

use thiserror::Error;
use zip::result::ZipError;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

#[derive(Debug, Error)]
pub enum PackageError {
    #[error("no entries to package")]
    Empty,
    #[error("failed to read entry `{name}`: {source}")]
    Read {
        name: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to add entry `{name}`: {source}")]
    Entry {
        name: String,
        #[source]
        source: ZipError,
    },
    #[error("failed to write entry `{name}`: {source}")]
    Write {
        name: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to finish archive: {0}")]
    Finish(#[source] ZipError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackagedArchive {
    pub bytes: Vec<u8>,
    pub entry_names: Vec<String>,
}

/// Builds a deflate ZIP from `(name, reader)` pairs.
///
/// Entries are written sorted by name. When a name repeats, the last pair
/// with that name wins and earlier ones are dropped. Any failure discards
/// the partially written archive.
pub fn package_entries<I, R>(entries: I) -> Result<PackagedArchive, PackageError>
where
    I: IntoIterator<Item = (String, R)>,
    R: Read,
{
    let unique: BTreeMap<String, R> = entries.into_iter().collect();
    if unique.is_empty() {
        return Err(PackageError::Empty);
    }

    let options = FileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .unix_permissions(0o644);
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let mut entry_names = Vec::with_capacity(unique.len());
    let mut buffer = Vec::new();

    for (name, mut reader) in unique {
        buffer.clear();
        reader
            .read_to_end(&mut buffer)
            .map_err(|source| PackageError::Read {
                name: name.clone(),
                source,
            })?;

        writer
            .start_file(name.as_str(), options)
            .map_err(|source| PackageError::Entry {
                name: name.clone(),
                source,
            })?;
        writer
            .write_all(&buffer)
            .map_err(|source| PackageError::Write {
                name: name.clone(),
                source,
            })?;
        entry_names.push(name);
    }

    let bytes = writer.finish().map_err(PackageError::Finish)?.into_inner();
    Ok(PackagedArchive { bytes, entry_names })
}
