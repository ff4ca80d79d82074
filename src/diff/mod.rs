//! Field-by-field comparison of two IRD records.
//!
//! Every check runs; each contributes at most one entry, except the
//! per-region and per-file hash checks which contribute one per mismatch.
//! Output order is fixed:
//!
//! 1. scalar fields
//! 2. header and footer (decompressed)
//! 3. region count and region hashes
//! 4. file count
//! 5. file hashes keyed by offset, then the two "missing" summaries
//! 6. data keys and PIC
//!
//! The only early exit is a header or footer that does not decompress.

use std::fmt;
use std::fs;
use std::io;
use std::path::Path;

use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::blob::{self, BlobError};
use crate::record::{IrdRecord, RecordError};

#[derive(Error, Debug)]
pub enum DiffError {
    #[error("Corrupt {field} blob: {cause}")]
    CorruptBlob { field: &'static str, #[source] cause: BlobError },
    #[error("Cannot load record: {0}")]
    Record(#[from] RecordError),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

// ── Entries ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum DiffValue {
    /// The value on each side.
    Pair { a: String, b: String },
    /// A derived value such as a byte count or a list of offsets.
    Single(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiffEntry {
    pub label: String,
    pub value: DiffValue,
}

impl DiffEntry {
    pub fn pair(label: impl Into<String>, a: impl Into<String>, b: impl Into<String>) -> Self {
        Self { label: label.into(), value: DiffValue::Pair { a: a.into(), b: b.into() } }
    }

    pub fn single(label: impl Into<String>, v: impl Into<String>) -> Self {
        Self { label: label.into(), value: DiffValue::Single(v.into()) }
    }
}

impl fmt::Display for DiffEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.value {
            DiffValue::Pair { a, b } => write!(f, "{}: {} vs {}", self.label, a, b),
            DiffValue::Single(v)     => write!(f, "{}: {}", self.label, v),
        }
    }
}

/// Result of comparing two record files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiffReport {
    /// Both paths name the same file; nothing was compared.
    SameSource,
    Entries(Vec<DiffEntry>),
}

// ── Entry points ──────────────────────────────────────────────────────────────

/// Load and compare two JSON records.  Short-circuits when both paths
/// canonicalize to the same file.
pub fn diff_paths<P: AsRef<Path>, Q: AsRef<Path>>(a: P, b: Q) -> Result<DiffReport, DiffError> {
    let (a, b) = (fs::canonicalize(a)?, fs::canonicalize(b)?);
    if a == b {
        debug!(path = %a.display(), "same record on both sides");
        return Ok(DiffReport::SameSource);
    }
    let ra = IrdRecord::load(&a)?;
    let rb = IrdRecord::load(&b)?;
    Ok(DiffReport::Entries(diff(&ra, &rb)?))
}

/// Compare two records.  An empty result means they are equivalent.
pub fn diff(a: &IrdRecord, b: &IrdRecord) -> Result<Vec<DiffEntry>, DiffError> {
    let mut out = Vec::new();

    scalar(&mut out, "Version",        a.version,               b.version);
    scalar(&mut out, "Title ID",       &a.title_id,             &b.title_id);
    scalar(&mut out, "Title",          &a.title,                &b.title);
    scalar(&mut out, "System Version", &a.system_version,       &b.system_version);
    scalar(&mut out, "Disc Version",   &a.disc_version,         &b.disc_version);
    scalar(&mut out, "App Version",    &a.app_version,          &b.app_version);
    scalar(&mut out, "Extra Config",   Hex16(a.extra_config),   Hex16(b.extra_config));
    scalar(&mut out, "Attachments",    Hex16(a.attachments),    Hex16(b.attachments));
    scalar(&mut out, "Unique ID",      Hex32(a.uid),            Hex32(b.uid));

    compare_blob(&mut out, "Header", &a.header, &b.header)?;
    compare_blob(&mut out, "Footer", &a.footer, &b.footer)?;

    compare_regions(&mut out, a, b);

    scalar(&mut out, "File Count", a.file_count, b.file_count);
    compare_files(&mut out, a, b);

    bytes(&mut out, "Data 1 Key", &a.data1_key, &b.data1_key);
    bytes(&mut out, "Data 2 Key", &a.data2_key, &b.data2_key);
    bytes(&mut out, "PIC",        &a.pic,       &b.pic);

    Ok(out)
}

/// `|len(a) - len(b)|` plus the number of differing positions in the
/// common prefix.  Not an edit distance: an insertion near the start
/// counts every shifted byte.
pub fn byte_difference(a: &[u8], b: &[u8]) -> usize {
    let mismatched = a.iter().zip(b).filter(|(x, y)| x != y).count();
    a.len().abs_diff(b.len()) + mismatched
}

// ── Checks ────────────────────────────────────────────────────────────────────

struct Hex16(u16);
struct Hex32(u32);

impl fmt::Display for Hex16 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "0x{:04X}", self.0) }
}
impl fmt::Display for Hex32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "0x{:08X}", self.0) }
}

fn scalar<T: fmt::Display>(out: &mut Vec<DiffEntry>, label: &str, a: T, b: T) {
    let (a, b) = (a.to_string(), b.to_string());
    if a != b {
        out.push(DiffEntry::pair(label, a, b));
    }
}

fn bytes(out: &mut Vec<DiffEntry>, label: &str, a: &[u8], b: &[u8]) {
    if a != b {
        out.push(DiffEntry::pair(label, hex::encode(a), hex::encode(b)));
    }
}

fn compare_blob(out: &mut Vec<DiffEntry>, field: &'static str, a: &[u8], b: &[u8]) -> Result<(), DiffError> {
    let a = blob::decompress(a).map_err(|cause| DiffError::CorruptBlob { field, cause })?;
    let b = blob::decompress(b).map_err(|cause| DiffError::CorruptBlob { field, cause })?;

    if a.len() != b.len() {
        out.push(DiffEntry::pair(format!("{field} Length"), a.len().to_string(), b.len().to_string()));
    }
    let n = byte_difference(&a, &b);
    if n != 0 {
        out.push(DiffEntry::single(field, format!("differs by {n} bytes")));
    }
    Ok(())
}

fn compare_regions(out: &mut Vec<DiffEntry>, a: &IrdRecord, b: &IrdRecord) {
    scalar(out, "Region Count", a.region_count, b.region_count);

    // Stored counts may disagree with the hash tables; never index past either.
    let n = (a.region_count.min(b.region_count) as usize)
        .min(a.region_hashes.len())
        .min(b.region_hashes.len());
    for i in 0..n {
        bytes(out, &format!("Region {i} Hash"), &a.region_hashes[i], &b.region_hashes[i]);
    }
}

fn compare_files(out: &mut Vec<DiffEntry>, a: &IrdRecord, b: &IrdRecord) {
    let mut missing_in_b = Vec::new();
    for f in a.files.iter() {
        match b.files.get(f.offset) {
            Some(hb) => bytes(out, &format!("File {} Hash", f.offset), &f.hash, hb),
            None     => missing_in_b.push(f.offset),
        }
    }
    let missing_in_a: Vec<u64> = b.files.iter()
        .map(|f| f.offset)
        .filter(|off| !a.files.contains(*off))
        .collect();

    // Both summaries are always present, even when empty.
    out.push(DiffEntry::single("Files Missing From B", join(&missing_in_b)));
    out.push(DiffEntry::single("Files Missing From A", join(&missing_in_a)));
}

fn join(offsets: &[u64]) -> String {
    offsets.iter().map(u64::to_string).collect::<Vec<_>>().join(", ")
}
