//! Content hashes and the favicon hash index

use std::collections::HashMap;
use std::io::Cursor;

use crate::framework::{FrameFrom, Framework};

/// Lowercase hex MD5.
pub fn md5_hash(data: &[u8]) -> String {
    format!("{:x}", md5::compute(data))
}

/// MurmurHash3 x86 32-bit (seed 0) rendered as signed decimal.
pub fn mmh3_hash32(data: &[u8]) -> String {
    let hash = murmur3::murmur3_32(&mut Cursor::new(data), 0).unwrap_or_default();
    (hash as i32).to_string()
}

/// Hash → framework name maps for favicons.
#[derive(Debug, Clone, Default)]
pub struct Favicons {
    pub md5: HashMap<String, String>,
    pub mmh3: HashMap<String, String>,
}

impl Favicons {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.md5.len() + self.mmh3.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.md5.is_empty() && self.mmh3.is_empty()
    }

    pub fn insert_md5(&mut self, hash: &str, name: &str) {
        self.md5.insert(hash.trim().to_lowercase(), name.to_string());
    }

    pub fn insert_mmh3(&mut self, hash: &str, name: &str) {
        self.mmh3.insert(hash.trim().to_string(), name.to_string());
    }

    /// Copy every entry of `other`, overwriting duplicates.
    pub fn extend(&mut self, other: &Favicons) {
        self.md5
            .extend(other.md5.iter().map(|(k, v)| (k.clone(), v.clone())));
        self.mmh3
            .extend(other.mmh3.iter().map(|(k, v)| (k.clone(), v.clone())));
    }

    /// MD5 is consulted before MMH3.
    pub fn hash_match(&self, md5: &str, mmh3: &str) -> Option<Framework> {
        self.md5
            .get(md5)
            .or_else(|| self.mmh3.get(mmh3))
            .map(|name| Framework::new(name.clone(), FrameFrom::Ico))
    }

    pub fn content_match(&self, content: &[u8]) -> Option<Framework> {
        if self.is_empty() {
            return None;
        }
        self.hash_match(&md5_hash(content), &mmh3_hash32(content))
    }
}
