//! Packaging of translated documents.
//! Only successful results are packaged; failures are reported elsewhere.

use crate::pipeline::FileTranslationResult;
use std::io::{Seek, Write};
use std::path::Path;
use thiserror::Error;
use tracing::trace;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// A file to place in the archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    pub name: String,
    pub content: String,
}

/// Name of the translated file: `{stem}_{language_tag}.srt`.
pub fn output_name(filename: &str, language_tag: &str) -> String {
    let stem = Path::new(filename)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| filename.to_string());
    format!("{stem}_{language_tag}.srt")
}

/// Archive entries for every successful result, in result order.
pub fn archive_entries(results: &[FileTranslationResult], language_tag: &str) -> Vec<ArchiveEntry> {
    results
        .iter()
        .filter(|r| r.is_success())
        .filter_map(|r| {
            Some(ArchiveEntry {
                name: output_name(&r.filename, language_tag),
                content: r.content.clone()?,
            })
        })
        .collect()
}

/// Write `entries` as a deflated zip archive into `writer` and hand it back.
pub fn write_zip<W: Write + Seek>(entries: &[ArchiveEntry], writer: W) -> Result<W, ArchiveError> {
    trace!("write_zip entries={}", entries.len());
    let mut zip = ZipWriter::new(writer);
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);
    for entry in entries {
        zip.start_file(entry.name.as_str(), options)?;
        zip.write_all(entry.content.as_bytes())?;
    }
    Ok(zip.finish()?)
}
