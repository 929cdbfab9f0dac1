use crate::error::IngestError;
use crate::models::{ContentDigest, DocumentRecord};
use serde::Serialize;
use serde_json::ser::PrettyFormatter;
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{info, warn};
use walkdir::WalkDir;

/// Writes the record as 4-space-indented JSON through a temp file in the
/// target directory, so readers only ever see the old or the new content.
pub fn write_record(path: &Path, record: &DocumentRecord) -> Result<(), IngestError> {
    let dir = path.parent().ok_or_else(|| {
        IngestError::MissingFileName(path.to_string_lossy().to_string())
    })?;

    let mut buffer = Vec::new();
    let formatter = PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut buffer, formatter);
    record.serialize(&mut serializer)?;

    let mut staged = NamedTempFile::new_in(dir)?;
    staged.write_all(&buffer)?;
    staged.as_file().sync_all()?;
    staged
        .persist(path)
        .map_err(|error| IngestError::Io(error.error))?;
    Ok(())
}

pub fn read_record(path: &Path) -> Result<DocumentRecord, IngestError> {
    let raw = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

/// Every `.json` file under `root`, sorted.
pub fn record_files(root: &Path) -> Vec<PathBuf> {
    let mut records: Vec<PathBuf> = WalkDir::new(root)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| {
            path.extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext.eq_ignore_ascii_case("json"))
        })
        .collect();
    records.sort();
    records
}

/// `(record, pdf)` pairs for every JSON record that has a sibling PDF.
pub fn archived_records(root: &Path) -> Vec<(PathBuf, PathBuf)> {
    record_files(root)
        .into_iter()
        .filter_map(|record| {
            let pdf = record.with_extension("pdf");
            pdf.is_file().then_some((record, pdf))
        })
        .collect()
}

/// Records under one root that carry the same digest. The first path in
/// sorted order is the copy to keep.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DuplicateGroup {
    pub digest: ContentDigest,
    pub records: Vec<PathBuf>,
}

impl DuplicateGroup {
    pub fn kept(&self) -> Option<&Path> {
        self.records.first().map(PathBuf::as_path)
    }

    pub fn redundant(&self) -> &[PathBuf] {
        self.records.get(1..).unwrap_or_default()
    }
}

/// Groups every record under `root` by its digest and returns the groups
/// with more than one member. Records without a digest and unreadable
/// files are left out.
pub fn find_duplicate_digests(root: &Path) -> Vec<DuplicateGroup> {
    let mut by_digest: BTreeMap<ContentDigest, Vec<PathBuf>> = BTreeMap::new();
    let mut scanned = 0usize;

    for path in record_files(root) {
        match read_record(&path) {
            Ok(record) if record.sha512.is_empty() => {}
            Ok(record) => {
                scanned += 1;
                by_digest.entry(record.sha512).or_default().push(path);
            }
            Err(error) => warn!(record = %path.display(), %error, "unreadable record"),
        }
    }

    let groups: Vec<DuplicateGroup> = by_digest
        .into_iter()
        .filter(|(_, records)| records.len() > 1)
        .map(|(digest, records)| DuplicateGroup { digest, records })
        .collect();

    info!(
        root = %root.display(),
        scanned,
        duplicate_digests = groups.len(),
        "duplicate audit finished"
    );
    groups
}
