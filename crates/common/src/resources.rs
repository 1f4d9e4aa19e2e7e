//! Corpus loading: gzip detection plus JSON/YAML decoding

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::de::DeserializeOwned;
use std::borrow::Cow;
use std::io::{Read, Write};
use std::path::Path;
use tracing::debug;

use crate::error::{SigilError, SigilResult};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

#[inline]
pub fn is_gzip(data: &[u8]) -> bool {
    data.starts_with(&GZIP_MAGIC)
}

pub fn decompress_gzip(data: &[u8]) -> SigilResult<Vec<u8>> {
    let mut out = Vec::new();
    GzDecoder::new(data)
        .read_to_end(&mut out)
        .map_err(|e| SigilError::corpus("gzip", e))?;
    Ok(out)
}

pub fn compress_gzip(data: &[u8]) -> SigilResult<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(data)
        .map_err(|e| SigilError::corpus("gzip", e))?;
    encoder.finish().map_err(|e| SigilError::corpus("gzip", e))
}

/// Plain bytes, transparently decompressed when gzip magic is present.
pub fn maybe_decompress(data: &[u8]) -> SigilResult<Cow<'_, [u8]>> {
    if is_gzip(data) {
        decompress_gzip(data).map(Cow::Owned)
    } else {
        Ok(Cow::Borrowed(data))
    }
}

pub fn unmarshal_json<T: DeserializeOwned>(data: &[u8]) -> SigilResult<T> {
    let data = maybe_decompress(data)?;
    serde_json::from_slice(&data).map_err(|e| SigilError::corpus("json", e))
}

pub fn unmarshal_yaml<T: DeserializeOwned>(data: &[u8]) -> SigilResult<T> {
    let data = maybe_decompress(data)?;
    serde_yaml::from_slice(&data).map_err(|e| SigilError::corpus("yaml", e))
}

/// Read a corpus file from disk.
pub fn load_resource(path: impl AsRef<Path>) -> SigilResult<Vec<u8>> {
    let path = path.as_ref();
    debug!(path = %path.display(), "loading resource");
    std::fs::read(path).map_err(|e| SigilError::corpus(&path.display().to_string(), e))
}

/// Lookup key: lowercase with `-`, `_` and spaces removed.
pub fn normalize_string(s: &str) -> String {
    s.to_lowercase()
        .chars()
        .filter(|c| !matches!(c, '-' | '_' | ' '))
        .collect()
}
