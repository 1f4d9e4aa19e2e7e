//! EHole engine

use async_trait::async_trait;
use regex::bytes::Regex;
use serde::Deserialize;
use sigil_common::content::contains;
use sigil_common::resources::{maybe_decompress, unmarshal_json};
use sigil_common::{
    Engine, EngineCapability, Favicons, FrameFrom, Framework, Frameworks, SigilError, SigilResult,
    WebResponse,
};
use tracing::{debug, info};

pub const NAME: &str = "ehole";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    Keyword,
    Regular,
    #[serde(rename = "faviconhash")]
    FaviconHash,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Location {
    Body,
    Header,
    Title,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EHoleFinger {
    pub cms: String,
    pub method: Method,
    pub location: Location,
    #[serde(default)]
    pub keyword: Vec<String>,
    #[serde(skip)]
    keywords: Vec<Vec<u8>>,
    #[serde(skip)]
    regexps: Vec<Regex>,
}

impl EHoleFinger {
    fn compile(&mut self) -> SigilResult<()> {
        match self.method {
            Method::Keyword => {
                self.keywords = self
                    .keyword
                    .iter()
                    .map(|k| k.to_lowercase().into_bytes())
                    .collect();
            }
            Method::Regular => {
                self.regexps = self
                    .keyword
                    .iter()
                    .map(|k| {
                        Regex::new(&format!("(?i){}", k))
                            .map_err(|e| SigilError::rule(&format!("ehole {}", self.cms), e))
                    })
                    .collect::<SigilResult<_>>()?;
            }
            Method::FaviconHash => {}
        }
        Ok(())
    }

    /// AND over every keyword or regex of the finger.
    pub fn matches(&self, content: &WebResponse) -> bool {
        let Some(haystack) = (match self.location {
            Location::Body | Location::Title => content.body_lower(),
            Location::Header => content.header_lower(),
        }) else {
            return false;
        };
        match self.method {
            Method::Keyword => self.keywords.iter().all(|k| contains(haystack, k)),
            Method::Regular => self.regexps.iter().all(|re| re.is_match(haystack)),
            Method::FaviconHash => false,
        }
    }
}

#[derive(Debug, Deserialize)]
struct EHoleCorpus {
    fingerprint: Vec<EHoleFinger>,
}

#[derive(Debug, Clone, Default)]
pub struct EHoleEngine {
    fingers: Vec<EHoleFinger>,
    favicons: Favicons,
}

impl EHoleEngine {
    /// Parse `{"fingerprint": [...]}`. A bad regex fails the whole corpus.
    pub fn from_bytes(data: &[u8]) -> SigilResult<Self> {
        let data = maybe_decompress(data)?;
        let corpus: EHoleCorpus = unmarshal_json(&data)?;
        let engine = Self::from_fingers(corpus.fingerprint)?;
        info!("Loaded {} ehole fingerprints", engine.fingers.len());
        Ok(engine)
    }

    pub fn from_fingers(mut fingers: Vec<EHoleFinger>) -> SigilResult<Self> {
        let mut favicons = Favicons::new();
        for finger in &mut fingers {
            finger.compile()?;
            if finger.method == Method::FaviconHash {
                for hash in &finger.keyword {
                    favicons.insert_mmh3(hash, &finger.cms);
                }
            }
        }
        Ok(Self { fingers, favicons })
    }

    pub fn fingers(&self) -> &[EHoleFinger] {
        &self.fingers
    }

    /// MMH3 favicon hashes collected from `faviconhash` fingers.
    pub fn favicons(&self) -> &Favicons {
        &self.favicons
    }
}

#[async_trait]
impl Engine for EHoleEngine {
    fn name(&self) -> &str {
        NAME
    }

    fn len(&self) -> usize {
        self.fingers.len()
    }

    fn capability(&self) -> EngineCapability {
        EngineCapability::WEB
    }

    fn web_match(&self, content: &WebResponse) -> Frameworks {
        let mut frames = Frameworks::new();
        for finger in self.fingers.iter().filter(|f| f.matches(content)) {
            debug!(cms = %finger.cms, "ehole hit");
            frames.add(Framework::new(&finger.cms, FrameFrom::EHole));
        }
        frames
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CORPUS: &str = r#"{"fingerprint": [
        {"cms": "seeyon", "method": "keyword", "location": "body", "keyword": ["/seeyon/USER-DATA/", "/seeyon/common/"]},
        {"cms": "weblogic", "method": "regular", "location": "header", "keyword": ["server: weblogic\\s+[0-9.]+"]},
        {"cms": "jeecms", "method": "keyword", "location": "title", "keyword": ["jeecms"]},
        {"cms": "spring", "method": "faviconhash", "location": "body", "keyword": ["116323821"]}
    ]}"#;

    #[test]
    fn keyword_and_regular() {
        let engine = EHoleEngine::from_bytes(CORPUS.as_bytes()).unwrap();
        assert_eq!(engine.len(), 4);

        let resp = WebResponse::new(
            &b"HTTP/1.1 200 OK\r\nServer: WebLogic 12.2.1\r\n\r\n<a href=\"/seeyon/common/x\"></a><script src=\"/seeyon/USER-DATA/y\">"[..],
        );
        let frames = engine.web_match(&resp);
        assert!(frames.contains("seeyon"));
        assert!(frames.contains("weblogic"));
        assert!(!frames.contains("jeecms"));
        assert!(frames.get("seeyon").unwrap().has_tag("ehole"));
    }

    #[test]
    fn keywords_are_conjunctive() {
        let engine = EHoleEngine::from_bytes(CORPUS.as_bytes()).unwrap();
        let resp = WebResponse::new(&b"HTTP/1.1 200 OK\r\n\r\n/seeyon/common/ only"[..]);
        assert!(engine.web_match(&resp).is_empty());
    }

    #[test]
    fn favicon_hashes_and_bad_regex() {
        let engine = EHoleEngine::from_bytes(CORPUS.as_bytes()).unwrap();
        assert_eq!(
            engine.favicons().hash_match("", "116323821").unwrap().name,
            "spring"
        );

        let bad = r#"{"fingerprint": [{"cms": "x", "method": "regular", "location": "body", "keyword": ["(unclosed"]}]}"#;
        assert!(EHoleEngine::from_bytes(bad.as_bytes()).is_err());
    }
}
