//! Favicon hash engine
//!
//! A flat index of MD5 / MMH3 hashes collected from the other corpora. The
//! orchestrator registers it but keeps it out of the passive web pass; it is
//! consulted through `detect_favicon`.

use async_trait::async_trait;
use sigil_common::{
    md5_hash, mmh3_hash32, Engine, EngineCapability, Favicons, Framework, Frameworks, WebResponse,
};

pub const NAME: &str = "favicon";

#[derive(Debug, Clone, Default)]
pub struct FaviconEngine {
    favicons: Favicons,
}

impl FaviconEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_favicons(favicons: Favicons) -> Self {
        Self { favicons }
    }

    pub fn favicons(&self) -> &Favicons {
        &self.favicons
    }

    pub fn extend(&mut self, other: &Favicons) {
        self.favicons.extend(other);
    }

    pub fn insert_md5(&mut self, hash: &str, name: &str) {
        self.favicons.insert_md5(hash, name);
    }

    pub fn insert_mmh3(&mut self, hash: &str, name: &str) {
        self.favicons.insert_mmh3(hash, name);
    }

    /// Look up precomputed hashes.
    pub fn hash_match(&self, md5: &str, mmh3: &str) -> Option<Framework> {
        self.favicons.hash_match(md5, mmh3)
    }

    /// Hash `content` once and look it up.
    pub fn match_bytes(&self, content: &[u8]) -> Option<Framework> {
        if content.is_empty() {
            return None;
        }
        self.hash_match(&md5_hash(content), &mmh3_hash32(content))
    }
}

#[async_trait]
impl Engine for FaviconEngine {
    fn name(&self) -> &str {
        NAME
    }

    fn len(&self) -> usize {
        self.favicons.len()
    }

    fn capability(&self) -> EngineCapability {
        EngineCapability::WEB
    }

    fn web_match(&self, content: &WebResponse) -> Frameworks {
        self.match_bytes(content.body_or_raw())
            .into_iter()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sigil_common::FrameFrom;

    #[test]
    fn md5_before_mmh3() {
        let icon = b"\x00\x00\x01\x00fake-icon";
        let mut engine = FaviconEngine::new();
        engine.insert_md5(&md5_hash(icon), "by-md5");
        engine.insert_mmh3(&mmh3_hash32(icon), "by-mmh3");

        let frame = engine.match_bytes(icon).unwrap();
        assert_eq!(frame.name, "by-md5");
        assert_eq!(frame.from, FrameFrom::Ico);
        assert_eq!(engine.len(), 2);
    }

    #[test]
    fn web_match_hashes_body() {
        let icon = b"icon-bytes";
        let mut engine = FaviconEngine::new();
        engine.insert_mmh3(&mmh3_hash32(icon), "nacos");

        let mut raw = b"HTTP/1.1 200 OK\r\nContent-Type: image/x-icon\r\n\r\n".to_vec();
        raw.extend_from_slice(icon);
        let frames = engine.web_match(&WebResponse::new(raw));
        assert!(frames.contains("nacos"));

        assert!(engine.match_bytes(b"").is_none());
        assert!(engine.match_bytes(b"other").is_none());
    }
}
