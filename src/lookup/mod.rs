//! Remote key database client.
//!
//! The resolver only sees the [`KeyDatabase`] trait.  [`RedumpClient`] is the
//! HTTP implementation that talks to a Redump-compatible site:
//!
//! | Operation | Request | Result |
//! |-----------|---------|--------|
//! | `query_by_hash` | `GET {base}/discs/quicksearch/{hash}/` | disc ids |
//! | `fetch_key`     | `GET {base}/disc/{id}/key`            | raw key bytes |
//!
//! A quicksearch with exactly one hit is answered with a redirect to that
//! disc's page, so the final response URL is checked before the body.
//! Requests are blocking and are never retried here.

use std::time::Duration;

use reqwest::blocking::Client;
use thiserror::Error;
use tracing::debug;

pub const DEFAULT_BASE_URL: &str = "http://redump.org";
pub const DEFAULT_TIMEOUT:  Duration = Duration::from_secs(30);

#[derive(Error, Debug)]
pub enum LookupError {
    #[error("HTTP request to {url} failed: {source}")]
    Http { url: String, #[source] source: reqwest::Error },
    #[error("{url} returned status {status}")]
    Status { url: String, status: u16 },
}

/// A database that maps content hashes to disc ids and disc ids to keys.
pub trait KeyDatabase {
    /// Ids of every disc whose image matches `hash_hex`.
    fn query_by_hash(&self, hash_hex: &str) -> Result<Vec<u64>, LookupError>;
    /// Raw key bytes for a disc.  Expected to be 16 bytes, not guaranteed.
    fn fetch_key(&self, id: u64) -> Result<Vec<u8>, LookupError>;
}

impl<T: KeyDatabase + ?Sized> KeyDatabase for &T {
    fn query_by_hash(&self, hash_hex: &str) -> Result<Vec<u64>, LookupError> {
        (**self).query_by_hash(hash_hex)
    }
    fn fetch_key(&self, id: u64) -> Result<Vec<u8>, LookupError> {
        (**self).fetch_key(id)
    }
}

// ── LookupConfig ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct LookupConfig {
    /// Site root, without a trailing slash.
    pub base_url:   String,
    pub timeout:    Duration,
    pub user_agent: String,
}

impl Default for LookupConfig {
    fn default() -> Self {
        Self {
            base_url:   DEFAULT_BASE_URL.to_string(),
            timeout:    DEFAULT_TIMEOUT,
            user_agent: format!("irdkit/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

// ── RedumpClient ──────────────────────────────────────────────────────────────

pub struct RedumpClient {
    client:   Client,
    base_url: String,
}

impl RedumpClient {
    pub fn new(config: LookupConfig) -> Result<Self, LookupError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent)
            .build()
            .map_err(|source| LookupError::Http { url: config.base_url.clone(), source })?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn get(&self, url: String) -> Result<reqwest::blocking::Response, LookupError> {
        debug!(%url, "lookup request");
        let resp = self.client
            .get(&url)
            .send()
            .map_err(|source| LookupError::Http { url: url.clone(), source })?;
        let status = resp.status();
        if !status.is_success() {
            return Err(LookupError::Status { url, status: status.as_u16() });
        }
        Ok(resp)
    }
}

impl KeyDatabase for RedumpClient {
    fn query_by_hash(&self, hash_hex: &str) -> Result<Vec<u64>, LookupError> {
        let url = format!("{}/discs/quicksearch/{}/", self.base_url, hash_hex);
        let resp = self.get(url.clone())?;

        if let Some(id) = disc_id_from_path(resp.url().path()) {
            return Ok(vec![id]);
        }
        let body = resp.text().map_err(|source| LookupError::Http { url, source })?;
        Ok(disc_ids_in_page(&body))
    }

    fn fetch_key(&self, id: u64) -> Result<Vec<u8>, LookupError> {
        let url = format!("{}/disc/{}/key", self.base_url, id);
        let resp = self.get(url.clone())?;
        let bytes = resp.bytes().map_err(|source| LookupError::Http { url, source })?;
        Ok(bytes.to_vec())
    }
}

// ── Page parsing ──────────────────────────────────────────────────────────────

const DISC_LINK: &str = "/disc/";

/// `/disc/{id}/` (optionally with a trailing sub-path) → `id`.
fn disc_id_from_path(path: &str) -> Option<u64> {
    let rest = path.strip_prefix(DISC_LINK)?;
    leading_id(rest)
}

/// Every `/disc/{id}/` link in a results page, first-seen order, no repeats.
fn disc_ids_in_page(body: &str) -> Vec<u64> {
    let mut ids = Vec::new();
    for (pos, _) in body.match_indices(DISC_LINK) {
        if let Some(id) = leading_id(&body[pos + DISC_LINK.len()..]) {
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
    }
    ids
}

fn leading_id(s: &str) -> Option<u64> {
    let digits = s.bytes().take_while(u8::is_ascii_digit).count();
    if digits == 0 || s.as_bytes().get(digits) != Some(&b'/') {
        return None;
    }
    s[..digits].parse().ok()
}
