//! In-memory archive packer
//!
//! Builds a zip archive from `(entry name, contents)` pairs, fully
//! materialised in memory. Entries are stored uncompressed (letter PDFs are
//! already compressed) with a fixed modification time and `0644` Unix
//! permissions, so the same input always produces the same bytes and the
//! partner's tooling never infers `0000` permissions.
//!
//! Two entries with the same name are a known edge case: the later contents
//! win, at the position of the first occurrence, and a warning is logged.
//! This happens when two source paths in different folders share a basename.

use bytes::Bytes;
use std::io::{Cursor, Write};
use thiserror::Error;
use tracing::warn;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, DateTime, ZipWriter};

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("failed to write archive entry {name}: {source}")]
    Entry {
        name: String,
        #[source]
        source: zip::result::ZipError,
    },

    #[error("failed to write archive entry {name}: {source}")]
    Io {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to finalise archive: {0}")]
    Finish(#[source] zip::result::ZipError),
}

/// Pack `entries` into one zip archive, in order
///
/// An empty input produces a valid, empty archive.
pub fn pack(entries: &[(String, Bytes)]) -> Result<Vec<u8>, ArchiveError> {
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Stored)
        .last_modified_time(DateTime::default())
        .unix_permissions(0o644);

    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    for (name, contents) in dedupe_last_wins(entries) {
        writer
            .start_file(name, options)
            .map_err(|source| ArchiveError::Entry {
                name: name.to_string(),
                source,
            })?;
        writer
            .write_all(contents)
            .map_err(|source| ArchiveError::Io {
                name: name.to_string(),
                source,
            })?;
    }

    let cursor = writer.finish().map_err(ArchiveError::Finish)?;
    Ok(cursor.into_inner())
}

/// Basename of an object key (`2017-01-01/TEST1.PDF` -> `TEST1.PDF`)
pub fn entry_name(source_key: &str) -> &str {
    source_key.rsplit('/').next().unwrap_or(source_key)
}

fn dedupe_last_wins(entries: &[(String, Bytes)]) -> Vec<(&str, &Bytes)> {
    let mut packed: Vec<(&str, &Bytes)> = Vec::with_capacity(entries.len());
    for (name, contents) in entries {
        match packed.iter_mut().find(|(existing, _)| *existing == name.as_str()) {
            Some(slot) => {
                warn!(entry = %name, "duplicate archive entry name, later contents win");
                slot.1 = contents;
            }
            None => packed.push((name.as_str(), contents)),
        }
    }
    packed
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use zip::ZipArchive;

    fn read_back(data: Vec<u8>) -> Vec<(String, Vec<u8>)> {
        let mut archive = ZipArchive::new(Cursor::new(data)).unwrap();
        (0..archive.len())
            .map(|i| {
                let mut file = archive.by_index(i).unwrap();
                let mut contents = Vec::new();
                file.read_to_end(&mut contents).unwrap();
                (file.name().to_string(), contents)
            })
            .collect()
    }

    #[test]
    fn test_pack_preserves_order_and_contents() {
        let entries = vec![
            ("TEST1.PDF".to_string(), Bytes::from_static(b"\x00\x01")),
            ("TEST2.PDF".to_string(), Bytes::from_static(b"\x02\x03\x04")),
        ];

        let files = read_back(pack(&entries).unwrap());

        assert_eq!(files.len(), 2);
        assert_eq!(files[0], ("TEST1.PDF".to_string(), b"\x00\x01".to_vec()));
        assert_eq!(files[1], ("TEST2.PDF".to_string(), b"\x02\x03\x04".to_vec()));
    }

    #[test]
    fn test_pack_is_deterministic() {
        let entries = vec![
            ("A.PDF".to_string(), Bytes::from_static(b"alpha")),
            ("B.PDF".to_string(), Bytes::from_static(b"beta")),
        ];
        assert_eq!(pack(&entries).unwrap(), pack(&entries).unwrap());
    }

    #[test]
    fn test_pack_empty_is_valid_archive() {
        let data = pack(&[]).unwrap();
        let archive = ZipArchive::new(Cursor::new(data)).unwrap();
        assert_eq!(archive.len(), 0);
    }

    #[test]
    fn test_pack_duplicate_names_last_wins() {
        let entries = vec![
            ("SAME.PDF".to_string(), Bytes::from_static(b"first")),
            ("OTHER.PDF".to_string(), Bytes::from_static(b"other")),
            ("SAME.PDF".to_string(), Bytes::from_static(b"second")),
        ];

        let files = read_back(pack(&entries).unwrap());

        assert_eq!(files.len(), 2);
        assert_eq!(files[0], ("SAME.PDF".to_string(), b"second".to_vec()));
        assert_eq!(files[1].0, "OTHER.PDF");
    }

    #[test]
    fn test_entries_have_unix_permissions() {
        let entries = vec![("A.PDF".to_string(), Bytes::from_static(b"a"))];
        let mut archive = ZipArchive::new(Cursor::new(pack(&entries).unwrap())).unwrap();
        let file = archive.by_index(0).unwrap();
        assert_eq!(file.unix_mode().map(|m| m & 0o777), Some(0o644));
    }

    #[test]
    fn test_entry_name() {
        assert_eq!(entry_name("2017-01-01/TEST1.PDF"), "TEST1.PDF");
        assert_eq!(entry_name("a/b/c.PDF"), "c.PDF");
        assert_eq!(entry_name("flat.PDF"), "flat.PDF");
    }
}
