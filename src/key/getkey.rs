//! Parser for `.getkey.log` files written by PS3 disc dumping tools.
//!
//! ```text
//! get_dec_key succeeded!
//! disc_key = 8e1b6c4f0d2a9e37c5b8a0f1d3e6c2b9
//! disc_id = 00000000000000000000XXXXXXXXXXXX
//! PIC =
//! 10020000010000000000000000000000...
//! 0000...
//! ```
//!
//! Only `disc_key` is required.  The `PIC =` value may sit on the same line
//! or on the lines that follow it, up to the next blank line or `key = `
//! entry.

use std::fs;
use std::io;
use std::path::Path;

use thiserror::Error;

use crate::record::KEY_LEN;

/// Length of a PIC blob as recorded in an IRD.
pub const PIC_LEN: usize = 115;

#[derive(Error, Debug)]
pub enum GetKeyLogError {
    #[error("GetKey log reports failure: {0}")]
    NotSucceeded(String),
    #[error("GetKey log has no {0} entry")]
    MissingField(&'static str),
    #[error("GetKey log {field} is not valid hex of the expected length")]
    InvalidHex { field: &'static str },
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetKeyLog {
    pub disc_key: [u8; KEY_LEN],
    /// Kept as text: unknown nibbles are written as `X`.
    pub disc_id:  Option<String>,
    pub pic:      Option<Vec<u8>>,
}

impl GetKeyLog {
    pub fn read<P: AsRef<Path>>(path: P) -> Result<Self, GetKeyLogError> {
        let text = fs::read_to_string(path)?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self, GetKeyLogError> {
        let mut disc_key = None;
        let mut disc_id  = None;
        let mut pic_hex: Option<String> = None;
        let mut in_pic   = false;

        for line in text.lines().map(str::trim) {
            if in_pic {
                if line.is_empty() || line.contains(" = ") {
                    in_pic = false;
                } else {
                    pic_hex.get_or_insert_with(String::new).push_str(line);
                    continue;
                }
            }

            if line.contains("get_dec_key failed") {
                return Err(GetKeyLogError::NotSucceeded(line.to_string()));
            } else if let Some(v) = value_of(line, "disc_key") {
                disc_key = Some(v.to_string());
            } else if let Some(v) = value_of(line, "disc_id") {
                disc_id = Some(v.to_string());
            } else if let Some(v) = value_of(line, "PIC") {
                pic_hex = Some(v.to_string());
                in_pic = true;
            }
        }

        let disc_key = disc_key.ok_or(GetKeyLogError::MissingField("disc_key"))?;
        let disc_key = hex::decode(&disc_key)
            .ok()
            .and_then(|k| <[u8; KEY_LEN]>::try_from(k).ok())
            .ok_or(GetKeyLogError::InvalidHex { field: "disc_key" })?;

        let pic = match pic_hex.filter(|p| !p.is_empty()) {
            Some(p) => {
                let mut bytes = hex::decode(&p).map_err(|_| GetKeyLogError::InvalidHex { field: "PIC" })?;
                if bytes.len() < PIC_LEN {
                    return Err(GetKeyLogError::InvalidHex { field: "PIC" });
                }
                bytes.truncate(PIC_LEN);
                Some(bytes)
            }
            None => None,
        };

        Ok(Self { disc_key, disc_id, pic })
    }
}

/// `name = value` → `value`.  The name must match exactly.
fn value_of<'a>(line: &'a str, name: &str) -> Option<&'a str> {
    let (k, v) = line.split_once('=')?;
    (k.trim() == name).then(|| v.trim())
}
