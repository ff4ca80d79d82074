//! Gzip handling for the compressed header and footer blobs of an IRD record.

use std::io::{self, Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BlobError {
    #[error("Compression error: {0}")]
    Compression(io::Error),
    #[error("Decompression error: {0}")]
    Decompression(io::Error),
}

/// Gzip `data` at the default level.
pub fn compress(data: &[u8]) -> Result<Vec<u8>, BlobError> {
    let mut enc = GzEncoder::new(Vec::new(), Compression::default());
    enc.write_all(data).map_err(BlobError::Compression)?;
    enc.finish().map_err(BlobError::Compression)
}

/// Inflate a gzip stream.  A bad header or a short trailer is rejected.
pub fn decompress(data: &[u8]) -> Result<Vec<u8>, BlobError> {
    let mut out = Vec::new();
    GzDecoder::new(data)
        .read_to_end(&mut out)
        .map_err(BlobError::Decompression)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gzip_roundtrip() {
        let data: Vec<u8> = (0u8..=255).cycle().take(10_000).collect();
        let packed = compress(&data).unwrap();
        assert_eq!(&packed[..2], &[0x1f, 0x8b]);
        assert_eq!(decompress(&packed).unwrap(), data);
    }

    #[test]
    fn rejects_garbage() {
        assert!(matches!(decompress(b"not gzip at all"), Err(BlobError::Decompression(_))));
    }

    #[test]
    fn rejects_truncated_stream() {
        let packed = compress(b"some header bytes that will be cut").unwrap();
        let cut = &packed[..packed.len() - 6];
        assert!(decompress(cut).is_err());
    }
}
