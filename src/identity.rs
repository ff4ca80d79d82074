//! Content digests over a full disc image.
//!
//! Both digests are single streaming passes.  Each call starts from the
//! current stream position and reads to EOF; callers that need two digests
//! open (or rewind) the image twice.  Nothing is cached.

use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

use crc32fast::Hasher;
use serde::Serialize;
use sha1::{Digest, Sha1};

/// Read buffer used for hashing.
const HASH_BUF_SIZE: usize = 1024 * 1024;

/// CRC32 of the stream, as 4 big-endian bytes (the reversed order of the
/// little-endian digest state, which is how databases print it).
pub fn crc32<R: Read>(mut reader: R) -> io::Result<[u8; 4]> {
    let mut hasher = Hasher::new();
    let mut buf = vec![0u8; HASH_BUF_SIZE];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 { break; }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize().to_be_bytes())
}

/// SHA1 of the stream.
pub fn sha1<R: Read>(mut reader: R) -> io::Result<[u8; 20]> {
    let mut hasher = Sha1::new();
    let mut buf = vec![0u8; HASH_BUF_SIZE];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 { break; }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize().into())
}

/// Lowercase hex CRC32 of the file at `path`.
pub fn crc32_hex<P: AsRef<Path>>(path: P) -> io::Result<String> {
    let file = File::open(path)?;
    Ok(hex::encode(crc32(BufReader::new(file))?))
}

/// Lowercase hex SHA1 of the file at `path`.
pub fn sha1_hex<P: AsRef<Path>>(path: P) -> io::Result<String> {
    let file = File::open(path)?;
    Ok(hex::encode(sha1(BufReader::new(file))?))
}

/// Both digests of a disc image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiscIdentity {
    pub crc32: String,
    pub sha1:  String,
}

impl DiscIdentity {
    /// Two independent full passes over the image.
    pub fn compute<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let path = path.as_ref();
        Ok(Self {
            crc32: crc32_hex(path)?,
            sha1:  sha1_hex(path)?,
        })
    }
}
