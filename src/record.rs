use std::fs;
use std::io;
use std::path::Path;

use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

pub const KEY_LEN: usize = 16;

#[derive(Error, Debug)]
pub enum RecordError {
    #[error("File table mismatch: {keys} offsets but {hashes} hashes")]
    MismatchedFileTables { keys: usize, hashes: usize },
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// One file's hash, keyed by its byte offset on disc.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileHash {
    pub offset: u64,
    #[serde(with = "hex")]
    pub hash:   Vec<u8>,
}

/// Offset → hash association list in insertion order.
///
/// Offsets are expected to be unique but this is not enforced; [`get`]
/// returns the first entry with a matching offset.
///
/// [`get`]: FileHashes::get
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileHashes(Vec<FileHash>);

impl FileHashes {
    pub fn new() -> Self { Self(Vec::new()) }

    /// Build from the two parallel tables an IRD codec exposes.
    pub fn from_parallel(keys: Vec<u64>, hashes: Vec<Vec<u8>>) -> Result<Self, RecordError> {
        if keys.len() != hashes.len() {
            return Err(RecordError::MismatchedFileTables { keys: keys.len(), hashes: hashes.len() });
        }
        Ok(Self(
            keys.into_iter()
                .zip(hashes)
                .map(|(offset, hash)| FileHash { offset, hash })
                .collect(),
        ))
    }

    pub fn push(&mut self, offset: u64, hash: Vec<u8>) {
        self.0.push(FileHash { offset, hash });
    }

    pub fn get(&self, offset: u64) -> Option<&[u8]> {
        self.0.iter().find(|f| f.offset == offset).map(|f| f.hash.as_slice())
    }

    pub fn contains(&self, offset: u64) -> bool {
        self.get(offset).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FileHash> {
        self.0.iter()
    }

    pub fn len(&self) -> usize { self.0.len() }

    pub fn is_empty(&self) -> bool { self.0.is_empty() }
}

impl FromIterator<(u64, Vec<u8>)> for FileHashes {
    fn from_iter<I: IntoIterator<Item = (u64, Vec<u8>)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(offset, hash)| FileHash { offset, hash }).collect())
    }
}

/// A decoded IRD record.  Header and footer stay gzip-compressed as stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IrdRecord {
    pub version:        u32,
    pub title_id:       String,
    pub title:          String,
    pub system_version: String,
    pub disc_version:   String,
    pub app_version:    String,
    #[serde(with = "hex")]
    pub header:         Vec<u8>,
    #[serde(with = "hex")]
    pub footer:         Vec<u8>,
    pub region_count:   u32,
    #[serde(with = "hex_list")]
    pub region_hashes:  Vec<Vec<u8>>,
    pub file_count:     u64,
    pub files:          FileHashes,
    pub extra_config:   u16,
    pub attachments:    u16,
    pub uid:            u32,
    #[serde(with = "hex")]
    pub data1_key:      [u8; KEY_LEN],
    #[serde(with = "hex")]
    pub data2_key:      [u8; KEY_LEN],
    #[serde(with = "hex")]
    pub pic:            Vec<u8>,
}

// Accepts either the `files` association list or the codec's parallel
// `file_keys` / `file_hashes` tables.
#[derive(Deserialize)]
struct IrdRecordRaw {
    version:        u32,
    title_id:       String,
    title:          String,
    system_version: String,
    disc_version:   String,
    app_version:    String,
    #[serde(with = "hex")]
    header:         Vec<u8>,
    #[serde(with = "hex")]
    footer:         Vec<u8>,
    region_count:   u32,
    #[serde(with = "hex_list")]
    region_hashes:  Vec<Vec<u8>>,
    file_count:     u64,
    #[serde(default)]
    files:          Option<FileHashes>,
    #[serde(default)]
    file_keys:      Option<Vec<u64>>,
    #[serde(default, with = "hex_list_opt")]
    file_hashes:    Option<Vec<Vec<u8>>>,
    extra_config:   u16,
    attachments:    u16,
    uid:            u32,
    #[serde(with = "hex")]
    data1_key:      [u8; KEY_LEN],
    #[serde(with = "hex")]
    data2_key:      [u8; KEY_LEN],
    #[serde(with = "hex")]
    pic:            Vec<u8>,
}

impl<'de> Deserialize<'de> for IrdRecord {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = IrdRecordRaw::deserialize(deserializer)?;

        let files = match (raw.files, raw.file_keys, raw.file_hashes) {
            (Some(files), _, _) => files,
            (None, Some(keys), Some(hashes)) => {
                FileHashes::from_parallel(keys, hashes).map_err(serde::de::Error::custom)?
            }
            (None, None, None) => FileHashes::new(),
            _ => {
                return Err(serde::de::Error::custom(
                    "IrdRecord needs 'files' or both 'file_keys' and 'file_hashes'",
                ))
            }
        };

        Ok(IrdRecord {
            version:        raw.version,
            title_id:       raw.title_id,
            title:          raw.title,
            system_version: raw.system_version,
            disc_version:   raw.disc_version,
            app_version:    raw.app_version,
            header:         raw.header,
            footer:         raw.footer,
            region_count:   raw.region_count,
            region_hashes:  raw.region_hashes,
            file_count:     raw.file_count,
            files,
            extra_config:   raw.extra_config,
            attachments:    raw.attachments,
            uid:            raw.uid,
            data1_key:      raw.data1_key,
            data2_key:      raw.data2_key,
            pic:            raw.pic,
        })
    }
}

impl IrdRecord {
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec_pretty(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, RecordError> {
        Ok(Self::from_bytes(&fs::read(path)?)?)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), RecordError> {
        fs::write(path, self.to_bytes()?)?;
        Ok(())
    }
}

mod hex_list {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(list: &[Vec<u8>], s: S) -> Result<S::Ok, S::Error> {
        s.collect_seq(list.iter().map(hex::encode))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<Vec<u8>>, D::Error> {
        Vec::<String>::deserialize(d)?
            .iter()
            .map(|h| hex::decode(h).map_err(serde::de::Error::custom))
            .collect()
    }
}

mod hex_list_opt {
    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Vec<Vec<u8>>>, D::Error> {
        match Option::<Vec<String>>::deserialize(d)? {
            Some(list) => list
                .iter()
                .map(|h| hex::decode(h).map_err(serde::de::Error::custom))
                .collect::<Result<Vec<_>, _>>()
                .map(Some),
            None => Ok(None),
        }
    }
}
