//! FingerprintHub engine
//!
//! Records are AND-composed: every listed header must be present (`*` accepts
//! any non-empty value, otherwise a case-insensitive substring), and every
//! keyword must appear in the body. A record without headers matches on the
//! body alone and vice versa. Favicon hashes are not matched here; they are
//! handed to the favicon engine.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::Deserialize;
use sigil_common::content::contains;
use sigil_common::resources::{maybe_decompress, unmarshal_json, unmarshal_yaml};
use sigil_common::{
    Engine, EngineCapability, Favicons, FrameFrom, Framework, Frameworks, SigilResult,
    WebResponse,
};
use tracing::{debug, info};

pub const NAME: &str = "fingerprinthub";

const ANY_VALUE: &str = "*";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct HubRecord {
    pub name: String,
    pub path: String,
    #[serde(alias = "request_method")]
    pub method: String,
    pub status_code: u16,
    pub headers: BTreeMap<String, String>,
    pub keyword: Vec<String>,
    pub favicon_hash: Vec<String>,
    #[serde(skip)]
    compiled_headers: Vec<(String, String)>,
    #[serde(skip)]
    compiled_keywords: Vec<Vec<u8>>,
}

impl HubRecord {
    fn compile(&mut self) {
        self.compiled_headers = self
            .headers
            .iter()
            .map(|(k, v)| (k.to_lowercase(), v.to_lowercase()))
            .collect();
        self.compiled_keywords = self
            .keyword
            .iter()
            .map(|k| k.to_lowercase().into_bytes())
            .collect();
    }

    /// Records that only carry favicon hashes never match on content.
    fn is_content_rule(&self) -> bool {
        !self.compiled_headers.is_empty() || !self.compiled_keywords.is_empty()
    }

    fn match_headers(&self, content: &WebResponse) -> bool {
        self.compiled_headers.iter().all(|(name, expected)| {
            content.header_values(name).any(|value| {
                if expected == ANY_VALUE {
                    !value.is_empty()
                } else {
                    value.to_lowercase().contains(expected.as_str())
                }
            })
        })
    }

    fn match_body(&self, content: &WebResponse) -> bool {
        let body = content.body_or_raw_lower();
        self.compiled_keywords.iter().all(|k| contains(body, k))
    }

    pub fn matches(&self, content: &WebResponse) -> bool {
        if self.status_code != 0 && content.status() != Some(self.status_code) {
            return false;
        }
        self.is_content_rule() && self.match_headers(content) && self.match_body(content)
    }
}

#[derive(Debug, Clone, Default)]
pub struct FingerprintHubEngine {
    records: Vec<HubRecord>,
    favicons: Favicons,
}

impl FingerprintHubEngine {
    /// Parse a JSON (or YAML) record list, gzip allowed.
    pub fn from_bytes(data: &[u8]) -> SigilResult<Self> {
        let data = maybe_decompress(data)?;
        let records: Vec<HubRecord> = match data.iter().find(|b| !b.is_ascii_whitespace()) {
            Some(b'[') | Some(b'{') => unmarshal_json(&data)?,
            _ => unmarshal_yaml(&data)?,
        };
        let engine = Self::from_records(records);
        info!(
            "Loaded {} fingerprinthub records ({} favicon hashes)",
            engine.records.len(),
            engine.favicons.len()
        );
        Ok(engine)
    }

    pub fn from_records(mut records: Vec<HubRecord>) -> Self {
        let mut favicons = Favicons::new();
        for record in &mut records {
            record.compile();
            for hash in &record.favicon_hash {
                favicons.insert_md5(hash, &record.name);
            }
        }
        Self { records, favicons }
    }

    pub fn records(&self) -> &[HubRecord] {
        &self.records
    }

    /// MD5 favicon hashes collected from the records.
    pub fn favicons(&self) -> &Favicons {
        &self.favicons
    }
}

#[async_trait]
impl Engine for FingerprintHubEngine {
    fn name(&self) -> &str {
        NAME
    }

    fn len(&self) -> usize {
        self.records.len()
    }

    fn capability(&self) -> EngineCapability {
        EngineCapability::WEB
    }

    fn web_match(&self, content: &WebResponse) -> Frameworks {
        let mut frames = Frameworks::new();
        for record in self.records.iter().filter(|r| r.matches(content)) {
            debug!(name = %record.name, "fingerprinthub hit");
            let mut frame = Framework::new(&record.name, FrameFrom::Default);
            frame.add_tag(NAME);
            frames.add(frame);
        }
        frames
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CORPUS: &str = r#"[
        {"name": "nginx-welcome", "path": "/", "headers": {"Server": "nginx"}, "keyword": ["Welcome"]},
        {"name": "powered", "headers": {"X-Powered-By": "*"}},
        {"name": "body-only", "keyword": ["<title>Sigil", "dashboard"]},
        {"name": "icon-only", "favicon_hash": ["D41D8CD98F00B204E9800998ECF8427E"]}
    ]"#;

    fn engine() -> FingerprintHubEngine {
        FingerprintHubEngine::from_bytes(CORPUS.as_bytes()).unwrap()
    }

    #[test]
    fn header_and_keyword_must_both_hold() {
        let engine = engine();
        let empty = WebResponse::new(&b"HTTP/1.1 200 OK\r\nServer: nginx/1.0\r\n\r\n"[..]);
        assert!(!engine.web_match(&empty).contains("nginx-welcome"));

        let welcome =
            WebResponse::new(&b"HTTP/1.1 200 OK\r\nServer: nginx/1.0\r\n\r\nWelcome to nginx"[..]);
        let frames = engine.web_match(&welcome);
        let frame = frames.get("nginx-welcome").unwrap();
        assert!(frame.has_tag("fingerprinthub"));
        assert_eq!(frame.from, FrameFrom::Default);
    }

    #[test]
    fn wildcard_header_and_body_only() {
        let engine = engine();
        let resp = WebResponse::new(
            &b"HTTP/1.1 200 OK\r\nX-Powered-By: PHP/8\r\n\r\n<title>sigil</title> Dashboard"[..],
        );
        let frames = engine.web_match(&resp);
        assert!(frames.contains("powered"));
        assert!(frames.contains("body-only"));
        assert!(!frames.contains("icon-only"));

        let blank = WebResponse::new(&b"HTTP/1.1 200 OK\r\nX-Powered-By: \r\n\r\n"[..]);
        assert!(!engine.web_match(&blank).contains("powered"));
    }

    #[test]
    fn favicon_hashes_are_collected() {
        let engine = engine();
        assert_eq!(engine.len(), 4);
        let frame = engine
            .favicons()
            .hash_match("d41d8cd98f00b204e9800998ecf8427e", "")
            .unwrap();
        assert_eq!(frame.name, "icon-only");
    }
}
