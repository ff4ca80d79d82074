//! Disc key resolution.
//!
//! A key is taken from the first source in an ordered chain that produces
//! one.  The default chain is:
//!
//! | # | Source | Present when | On failure |
//! |---|--------|--------------|------------|
//! | 1 | [`KeySource::ExplicitHex`]      | `--key` given            | fall through |
//! | 2 | [`KeySource::KeyFile`]          | `--key-file` given       | fall through |
//! | 3 | [`KeySource::GetKeyLog`]        | `--getkey-log` given     | abort |
//! | 4 | [`KeySource::SidecarKeyFile`]   | `<image>.key` exists     | fall through |
//! | 5 | [`KeySource::SidecarGetKeyLog`] | `<image>.getkey.log` exists | abort |
//! | 6 | [`KeySource::RemoteLookup`]     | always                   | abort |
//!
//! "On failure" is the [`StepPolicy`] applied when a present source yields
//! something unusable.  A hinted path that does not exist, an I/O error, or a
//! transport error always ends the call regardless of policy.

pub mod getkey;

use std::fs::{self, File};
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::identity;
use crate::lookup::{KeyDatabase, LookupError};
use crate::record::KEY_LEN;
use getkey::{GetKeyLog, GetKeyLogError};

/// Extension of a raw 16-byte key file next to the image.
pub const KEY_FILE_EXT:   &str = "key";
/// Extension of a GetKey log next to the image.
pub const GETKEY_LOG_EXT: &str = "getkey.log";

// ── Error type ───────────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum KeyError {
    #[error("Invalid key from {origin}: {reason}")]
    InvalidKeyFormat { origin: KeySource, reason: String },
    #[error("Key source not found: {path:?}")]
    SourceNotFound { path: PathBuf },
    #[error("Unusable GetKey log {path:?}: {cause}")]
    GetKeyLog { path: PathBuf, #[source] cause: GetKeyLogError },
    #[error("Disc not found in key database")]
    LookupNotFound,
    #[error("Disc matches {0} database entries; provide the key manually")]
    LookupAmbiguous(usize),
    #[error("Key lookup failed: {0}")]
    Lookup(#[from] LookupError),
    #[error("No key source produced a key")]
    Exhausted,
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

// ── Types ─────────────────────────────────────────────────────────────────────

/// Where a key came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum KeySource {
    ExplicitHex,
    KeyFile,
    GetKeyLog,
    SidecarKeyFile,
    SidecarGetKeyLog,
    RemoteLookup,
}

impl KeySource {
    pub fn name(self) -> &'static str {
        match self {
            KeySource::ExplicitHex      => "explicit-hex",
            KeySource::KeyFile          => "key-file",
            KeySource::GetKeyLog        => "getkey-log",
            KeySource::SidecarKeyFile   => "sidecar-key-file",
            KeySource::SidecarGetKeyLog => "sidecar-getkey-log",
            KeySource::RemoteLookup     => "remote-lookup",
        }
    }
}

impl std::fmt::Display for KeySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A resolved key and its provenance.
///
/// Keys from every local source are exactly [`KEY_LEN`] bytes.  A key from
/// the remote database is passed through even when it is not; check
/// [`is_valid`](Self::is_valid) before use.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeyCandidate {
    #[serde(with = "hex")]
    pub key:        Vec<u8>,
    pub source:     KeySource,
    /// Carried through untouched for the IRD encoder.
    pub layerbreak: Option<u64>,
}

impl KeyCandidate {
    pub fn is_valid(&self) -> bool {
        self.key.len() == KEY_LEN
    }

    pub fn as_array(&self) -> Option<[u8; KEY_LEN]> {
        self.key.as_slice().try_into().ok()
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.key)
    }
}

/// Caller-supplied key sources.
#[derive(Debug, Clone, Default)]
pub struct ResolveHints {
    pub explicit_hex_key: Option<String>,
    pub key_file:         Option<PathBuf>,
    pub getkey_log:       Option<PathBuf>,
}

/// What to do when a present source yields an unusable key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepPolicy {
    FallThrough,
    Abort,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolveStep {
    pub source:     KeySource,
    pub on_failure: StepPolicy,
}

impl ResolveStep {
    pub const fn new(source: KeySource, on_failure: StepPolicy) -> Self {
        Self { source, on_failure }
    }
}

pub const DEFAULT_STEPS: [ResolveStep; 6] = [
    ResolveStep::new(KeySource::ExplicitHex,      StepPolicy::FallThrough),
    ResolveStep::new(KeySource::KeyFile,          StepPolicy::FallThrough),
    ResolveStep::new(KeySource::GetKeyLog,        StepPolicy::Abort),
    ResolveStep::new(KeySource::SidecarKeyFile,   StepPolicy::FallThrough),
    ResolveStep::new(KeySource::SidecarGetKeyLog, StepPolicy::Abort),
    ResolveStep::new(KeySource::RemoteLookup,     StepPolicy::Abort),
];

enum StepOutcome {
    Found(Vec<u8>),
    /// Source not present.
    Absent,
    /// Present but unusable; subject to the step's policy.
    Unusable(KeyError),
}

// ── Resolver ──────────────────────────────────────────────────────────────────

pub struct KeyResolver<D: KeyDatabase> {
    db:    D,
    steps: Vec<ResolveStep>,
}

impl<D: KeyDatabase> KeyResolver<D> {
    pub fn new(db: D) -> Self {
        Self::with_steps(db, DEFAULT_STEPS.to_vec())
    }

    pub fn with_steps(db: D, steps: Vec<ResolveStep>) -> Self {
        Self { db, steps }
    }

    pub fn steps(&self) -> &[ResolveStep] {
        &self.steps
    }

    /// Run the chain for the image at `iso_path`.  The first key found is
    /// returned; no later source is touched.
    pub fn resolve(
        &self,
        iso_path:   &Path,
        hints:      &ResolveHints,
        layerbreak: Option<u64>,
    ) -> Result<KeyCandidate, KeyError> {
        for step in &self.steps {
            debug!(source = %step.source, "trying key source");
            match self.run_step(step.source, iso_path, hints)? {
                StepOutcome::Found(key) => {
                    info!(source = %step.source, "disc key resolved");
                    return Ok(KeyCandidate { key, source: step.source, layerbreak });
                }
                StepOutcome::Absent => {}
                StepOutcome::Unusable(err) => match step.on_failure {
                    StepPolicy::FallThrough => warn!(source = %step.source, "{err}, trying next source"),
                    StepPolicy::Abort       => return Err(err),
                },
            }
        }
        Err(KeyError::Exhausted)
    }

    fn run_step(&self, source: KeySource, iso_path: &Path, hints: &ResolveHints) -> Result<StepOutcome, KeyError> {
        match source {
            KeySource::ExplicitHex => Ok(match &hints.explicit_hex_key {
                Some(h) => match parse_hex_key(h) {
                    Ok(key) => StepOutcome::Found(key.to_vec()),
                    Err(err) => StepOutcome::Unusable(err),
                },
                None => StepOutcome::Absent,
            }),
            KeySource::KeyFile => match &hints.key_file {
                Some(p) => read_key_file(p, source),
                None    => Ok(StepOutcome::Absent),
            },
            KeySource::GetKeyLog => match &hints.getkey_log {
                Some(p) => read_getkey_log(p),
                None    => Ok(StepOutcome::Absent),
            },
            KeySource::SidecarKeyFile => {
                let p = iso_path.with_extension(KEY_FILE_EXT);
                if p.is_file() { read_key_file(&p, source) } else { Ok(StepOutcome::Absent) }
            }
            KeySource::SidecarGetKeyLog => {
                let p = iso_path.with_extension(GETKEY_LOG_EXT);
                if p.is_file() { read_getkey_log(&p) } else { Ok(StepOutcome::Absent) }
            }
            KeySource::RemoteLookup => self.remote_lookup(iso_path),
        }
    }

    /// CRC32 first; SHA1 only when the CRC32 matches more than one disc.
    fn remote_lookup(&self, iso_path: &Path) -> Result<StepOutcome, KeyError> {
        let crc = hex::encode(identity::crc32(BufReader::new(open_image(iso_path)?))?);
        debug!(crc32 = %crc, "querying key database");
        let mut ids = self.db.query_by_hash(&crc)?;

        if ids.len() > 1 {
            let sha = hex::encode(identity::sha1(BufReader::new(open_image(iso_path)?))?);
            debug!(sha1 = %sha, matches = ids.len(), "CRC32 ambiguous, querying by SHA1");
            ids = self.db.query_by_hash(&sha)?;
        }

        let id = match ids.as_slice() {
            []   => return Ok(StepOutcome::Unusable(KeyError::LookupNotFound)),
            [id] => *id,
            _    => return Ok(StepOutcome::Unusable(KeyError::LookupAmbiguous(ids.len()))),
        };

        let key = self.db.fetch_key(id)?;
        if key.len() != KEY_LEN {
            warn!(disc = id, len = key.len(), "key database returned a key of unexpected length");
        }
        Ok(StepOutcome::Found(key))
    }
}

// ── Source readers ────────────────────────────────────────────────────────────

/// Decode a 32-digit hex key.
pub fn parse_hex_key(s: &str) -> Result<[u8; KEY_LEN], KeyError> {
    let bytes = hex::decode(s.trim()).map_err(|e| KeyError::InvalidKeyFormat {
        origin: KeySource::ExplicitHex,
        reason: e.to_string(),
    })?;
    let len = bytes.len();
    bytes.try_into().map_err(|_| KeyError::InvalidKeyFormat {
        origin: KeySource::ExplicitHex,
        reason: format!("expected {KEY_LEN} bytes, got {len}"),
    })
}

fn read_key_file(path: &Path, source: KeySource) -> Result<StepOutcome, KeyError> {
    let bytes = fs::read(path).map_err(|e| not_found_or_io(path, e))?;
    if bytes.len() != KEY_LEN {
        return Ok(StepOutcome::Unusable(KeyError::InvalidKeyFormat {
            origin: source,
            reason: format!("{path:?} is {} bytes, expected {KEY_LEN}", bytes.len()),
        }));
    }
    Ok(StepOutcome::Found(bytes))
}

fn read_getkey_log(path: &Path) -> Result<StepOutcome, KeyError> {
    if !path.exists() {
        return Err(KeyError::SourceNotFound { path: path.to_owned() });
    }
    Ok(match GetKeyLog::read(path) {
        Ok(log)  => StepOutcome::Found(log.disc_key.to_vec()),
        Err(cause) => StepOutcome::Unusable(KeyError::GetKeyLog { path: path.to_owned(), cause }),
    })
}

fn open_image(path: &Path) -> Result<File, KeyError> {
    File::open(path).map_err(|e| not_found_or_io(path, e))
}

fn not_found_or_io(path: &Path, e: io::Error) -> KeyError {
    if e.kind() == io::ErrorKind::NotFound {
        KeyError::SourceNotFound { path: path.to_owned() }
    } else {
        KeyError::Io(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::TempDir;

    const KEY_HEX: &str = "00112233445566778899aabbccddeeff";

    /// In-memory key database that records every hash it is asked about.
    #[derive(Default)]
    struct MockDb {
        hits:    HashMap<String, Vec<u64>>,
        keys:    HashMap<u64, Vec<u8>>,
        queries: RefCell<Vec<String>>,
    }

    impl KeyDatabase for MockDb {
        fn query_by_hash(&self, hash_hex: &str) -> Result<Vec<u64>, LookupError> {
            self.queries.borrow_mut().push(hash_hex.to_string());
            Ok(self.hits.get(hash_hex).cloned().unwrap_or_default())
        }
        fn fetch_key(&self, id: u64) -> Result<Vec<u8>, LookupError> {
            Ok(self.keys.get(&id).cloned().unwrap_or_default())
        }
    }

    struct Disc {
        dir:  TempDir,
        iso:  PathBuf,
        crc:  String,
        sha:  String,
    }

    fn disc() -> Disc {
        let dir = tempfile::tempdir().unwrap();
        let iso = dir.path().join("game.iso");
        let content = b"PS3 disc image contents";
        File::create(&iso).unwrap().write_all(content).unwrap();
        let crc = hex::encode(identity::crc32(&content[..]).unwrap());
        let sha = hex::encode(identity::sha1(&content[..]).unwrap());
        Disc { dir, iso, crc, sha }
    }

    fn key_bytes() -> Vec<u8> {
        hex::decode(KEY_HEX).unwrap()
    }

    #[test]
    fn explicit_hex_wins_without_touching_key_file() {
        let d = disc();
        let hints = ResolveHints {
            explicit_hex_key: Some(KEY_HEX.into()),
            // Reading this would fail with SourceNotFound.
            key_file: Some(d.dir.path().join("missing.key")),
            ..Default::default()
        };
        let db = MockDb::default();
        let k = KeyResolver::new(&db).resolve(&d.iso, &hints, Some(12345)).unwrap();
        assert_eq!(k.source, KeySource::ExplicitHex);
        assert_eq!(k.key, key_bytes());
        assert_eq!(k.layerbreak, Some(12345));
        assert!(db.queries.borrow().is_empty());
    }

    #[test]
    fn short_explicit_key_falls_through_to_key_file() {
        let d = disc();
        let key_file = d.dir.path().join("user.key");
        fs::write(&key_file, key_bytes()).unwrap();
        let hints = ResolveHints {
            explicit_hex_key: Some("0011".into()),
            key_file: Some(key_file),
            ..Default::default()
        };
        let k = KeyResolver::new(MockDb::default()).resolve(&d.iso, &hints, None).unwrap();
        assert_eq!(k.source, KeySource::KeyFile);
    }

    #[test]
    fn bad_hex_falls_through_to_sidecar() {
        let d = disc();
        fs::write(d.iso.with_extension("key"), key_bytes()).unwrap();
        let hints = ResolveHints { explicit_hex_key: Some("zz".repeat(16)), ..Default::default() };
        let k = KeyResolver::new(MockDb::default()).resolve(&d.iso, &hints, None).unwrap();
        assert_eq!(k.source, KeySource::SidecarKeyFile);
        assert_eq!(k.key, key_bytes());
    }

    #[test]
    fn wrong_length_key_file_falls_through() {
        let d = disc();
        let key_file = d.dir.path().join("short.key");
        fs::write(&key_file, [0u8; 8]).unwrap();
        fs::write(d.iso.with_extension("key"), key_bytes()).unwrap();
        let hints = ResolveHints { key_file: Some(key_file), ..Default::default() };
        let k = KeyResolver::new(MockDb::default()).resolve(&d.iso, &hints, None).unwrap();
        assert_eq!(k.source, KeySource::SidecarKeyFile);
    }

    #[test]
    fn missing_hinted_key_file_is_fatal() {
        let d = disc();
        let hints = ResolveHints { key_file: Some(d.dir.path().join("nope.key")), ..Default::default() };
        let err = KeyResolver::new(MockDb::default()).resolve(&d.iso, &hints, None).unwrap_err();
        assert!(matches!(err, KeyError::SourceNotFound { .. }));
    }

    #[test]
    fn hinted_getkey_log_is_used() {
        let d = disc();
        let log = d.dir.path().join("dump.getkey.log");
        fs::write(&log, format!("get_dec_key succeeded!\ndisc_key = {KEY_HEX}\n")).unwrap();
        let hints = ResolveHints { getkey_log: Some(log), ..Default::default() };
        let k = KeyResolver::new(MockDb::default()).resolve(&d.iso, &hints, None).unwrap();
        assert_eq!(k.source, KeySource::GetKeyLog);
        assert_eq!(k.key, key_bytes());
    }

    #[test]
    fn broken_getkey_log_aborts_instead_of_falling_through() {
        let d = disc();
        let log = d.dir.path().join("dump.getkey.log");
        fs::write(&log, "disc_id = 00\n").unwrap();
        // A usable sidecar exists but must not be reached.
        fs::write(d.iso.with_extension("key"), key_bytes()).unwrap();
        let hints = ResolveHints { getkey_log: Some(log), ..Default::default() };
        let err = KeyResolver::new(MockDb::default()).resolve(&d.iso, &hints, None).unwrap_err();
        assert!(matches!(err, KeyError::GetKeyLog { .. }));
    }

    #[test]
    fn broken_getkey_log_can_fall_through_by_policy() {
        let d = disc();
        let log = d.dir.path().join("dump.getkey.log");
        fs::write(&log, "disc_id = 00\n").unwrap();
        fs::write(d.iso.with_extension("key"), key_bytes()).unwrap();
        let steps = DEFAULT_STEPS
            .iter()
            .map(|s| match s.source {
                KeySource::GetKeyLog => ResolveStep::new(s.source, StepPolicy::FallThrough),
                _ => *s,
            })
            .collect();
        let hints = ResolveHints { getkey_log: Some(log), ..Default::default() };
        let k = KeyResolver::with_steps(MockDb::default(), steps).resolve(&d.iso, &hints, None).unwrap();
        assert_eq!(k.source, KeySource::SidecarKeyFile);
    }

    #[test]
    fn sidecar_getkey_log_is_found() {
        let d = disc();
        fs::write(
            d.iso.with_extension("getkey.log"),
            format!("disc_key = {KEY_HEX}\n"),
        ).unwrap();
        let k = KeyResolver::new(MockDb::default()).resolve(&d.iso, &ResolveHints::default(), None).unwrap();
        assert_eq!(k.source, KeySource::SidecarGetKeyLog);
    }

    #[test]
    fn single_crc_match_skips_sha1() {
        let d = disc();
        let mut db = MockDb::default();
        db.hits.insert(d.crc.clone(), vec![42]);
        db.keys.insert(42, key_bytes());
        let k = KeyResolver::new(&db).resolve(&d.iso, &ResolveHints::default(), None).unwrap();
        assert_eq!(k.source, KeySource::RemoteLookup);
        assert_eq!(k.key, key_bytes());
        assert_eq!(*db.queries.borrow(), vec![d.crc.clone()]);
    }

    #[test]
    fn zero_crc_matches_is_not_found_without_sha1() {
        let d = disc();
        let db = MockDb::default();
        let err = KeyResolver::new(&db).resolve(&d.iso, &ResolveHints::default(), None).unwrap_err();
        assert!(matches!(err, KeyError::LookupNotFound));
        assert_eq!(*db.queries.borrow(), vec![d.crc.clone()]);
    }

    #[test]
    fn ambiguous_crc_is_settled_by_sha1() {
        let d = disc();
        let mut db = MockDb::default();
        db.hits.insert(d.crc.clone(), vec![1, 2]);
        db.hits.insert(d.sha.clone(), vec![2]);
        db.keys.insert(2, key_bytes());
        let k = KeyResolver::new(&db).resolve(&d.iso, &ResolveHints::default(), None).unwrap();
        assert_eq!(k.key, key_bytes());
        assert_eq!(*db.queries.borrow(), vec![d.crc.clone(), d.sha.clone()]);
    }

    #[test]
    fn ambiguous_sha1_needs_manual_key() {
        let d = disc();
        let mut db = MockDb::default();
        db.hits.insert(d.crc.clone(), vec![1, 2, 3]);
        db.hits.insert(d.sha.clone(), vec![1, 2]);
        let err = KeyResolver::new(&db).resolve(&d.iso, &ResolveHints::default(), None).unwrap_err();
        assert!(matches!(err, KeyError::LookupAmbiguous(2)));
    }

    #[test]
    fn sha1_with_no_matches_is_not_found() {
        let d = disc();
        let mut db = MockDb::default();
        db.hits.insert(d.crc.clone(), vec![1, 2]);
        let err = KeyResolver::new(&db).resolve(&d.iso, &ResolveHints::default(), None).unwrap_err();
        assert!(matches!(err, KeyError::LookupNotFound));
    }

    #[test]
    fn odd_length_remote_key_is_still_returned() {
        let d = disc();
        let mut db = MockDb::default();
        db.hits.insert(d.crc.clone(), vec![9]);
        db.keys.insert(9, vec![0xEE; 12]);
        let k = KeyResolver::new(&db).resolve(&d.iso, &ResolveHints::default(), None).unwrap();
        assert!(!k.is_valid());
        assert_eq!(k.as_array(), None);
        assert_eq!(k.key.len(), 12);
    }

    #[test]
    fn chain_without_remote_is_exhausted() {
        let d = disc();
        let steps = DEFAULT_STEPS[..5].to_vec();
        let err = KeyResolver::with_steps(MockDb::default(), steps)
            .resolve(&d.iso, &ResolveHints::default(), None)
            .unwrap_err();
        assert!(matches!(err, KeyError::Exhausted));
    }

    #[test]
    fn missing_image_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let err = KeyResolver::new(MockDb::default())
            .resolve(&dir.path().join("absent.iso"), &ResolveHints::default(), None)
            .unwrap_err();
        assert!(matches!(err, KeyError::SourceNotFound { .. }));
    }
}
