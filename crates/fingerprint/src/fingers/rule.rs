//! Fingers rules and the shared rule matcher
//!
//! A rule compiles into an ordered list of [`Pattern`]s. Classes are tried in
//! priority order and the first hit wins: vuln regexes, regexps, header
//! literals, body literals, body md5, body mmh3, then favicon hashes over the
//! body. Certificate literals are a separate fallback for HTTP fingers.

use regex::bytes::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use sigil_common::content::contains;
use sigil_common::{md5_hash, mmh3_hash32, MatchDetail, SigilError, SigilResult, WebResponse};

use super::dsl;

/// Version placeholder meaning "no static version".
pub const NO_VERSION: &str = "_";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Regexps {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub body: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub md5: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mmh3: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub regexp: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub version: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cert: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub header: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub vuln: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FaviconRule {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub path: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mmh3: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub md5: Vec<String>,
}

/// One compiled pattern.
#[derive(Debug, Clone)]
pub enum Pattern {
    Vuln(Regex),
    Regexp(Regex),
    Header(Vec<u8>),
    Body(Vec<u8>),
    Md5(String),
    Mmh3(String),
    FaviconMd5(String),
    FaviconMmh3(String),
}

impl Pattern {
    pub fn class(&self) -> &'static str {
        match self {
            Pattern::Vuln(_) => "vuln",
            Pattern::Regexp(_) => "regexp",
            Pattern::Header(_) => "header",
            Pattern::Body(_) => "body",
            Pattern::Md5(_) => "md5",
            Pattern::Mmh3(_) => "mmh3",
            Pattern::FaviconMd5(_) => "favicon_md5",
            Pattern::FaviconMmh3(_) => "favicon_mmh3",
        }
    }

    fn describe(&self) -> String {
        match self {
            Pattern::Vuln(r) | Pattern::Regexp(r) => r.as_str().to_string(),
            Pattern::Header(b) | Pattern::Body(b) => String::from_utf8_lossy(b).into_owned(),
            Pattern::Md5(h) | Pattern::Mmh3(h) | Pattern::FaviconMd5(h) | Pattern::FaviconMmh3(h) => {
                h.clone()
            }
        }
    }
}

/// Outcome of a rule hit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleMatch {
    pub is_vuln: bool,
    pub version: String,
    pub detail: Option<MatchDetail>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Rule {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub favicon: Option<FaviconRule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regexps: Option<Regexps>,
    #[serde(default, rename = "send_data", skip_serializing_if = "String::is_empty")]
    pub send_data_str: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub info: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub vuln: String,
    #[serde(default)]
    pub level: i32,

    #[serde(skip)]
    pub send_data: Option<Vec<u8>>,
    #[serde(skip)]
    pub patterns: Vec<Pattern>,
    #[serde(skip)]
    pub version_regexps: Vec<Regex>,
    #[serde(skip)]
    pub certs: Vec<String>,
    #[serde(skip)]
    pub case_sensitive: bool,
}

fn compile_regex(pattern: &str, case_insensitive: bool) -> SigilResult<Regex> {
    let source = if case_insensitive {
        format!("(?i){}", pattern)
    } else {
        pattern.to_string()
    };
    Regex::new(&source).map_err(|e| SigilError::rule(pattern, e))
}

impl Rule {
    #[inline]
    pub fn is_active(&self) -> bool {
        self.send_data.is_some()
    }

    pub fn compile(&mut self, finger: &str, case_sensitive: bool) -> SigilResult<()> {
        if self.version.is_empty() {
            self.version = NO_VERSION.to_string();
        }
        self.case_sensitive = case_sensitive;
        if !self.send_data_str.is_empty() {
            let data = dsl::parse(&self.send_data_str)
                .map_err(|e| SigilError::rule(finger, e))?;
            self.send_data = Some(data);
            if self.level == 0 {
                self.level = 1;
            }
        }

        let fold = |s: &String| {
            if case_sensitive {
                s.as_bytes().to_vec()
            } else {
                s.to_lowercase().into_bytes()
            }
        };

        let mut patterns = Vec::new();
        if let Some(regexps) = &self.regexps {
            for r in &regexps.vuln {
                patterns.push(Pattern::Vuln(compile_regex(r, true)?));
            }
            for r in &regexps.regexp {
                patterns.push(Pattern::Regexp(compile_regex(r, true)?));
            }
            patterns.extend(regexps.header.iter().map(|h| Pattern::Header(fold(h))));
            patterns.extend(regexps.body.iter().map(|b| Pattern::Body(fold(b))));
            patterns.extend(regexps.md5.iter().map(|h| Pattern::Md5(h.trim().to_lowercase())));
            patterns.extend(regexps.mmh3.iter().map(|h| Pattern::Mmh3(h.trim().to_string())));

            self.version_regexps = regexps
                .version
                .iter()
                .map(|r| compile_regex(r, false))
                .collect::<SigilResult<_>>()?;
            self.certs = regexps.cert.clone();
        }
        if let Some(favicon) = &self.favicon {
            patterns.extend(favicon.md5.iter().map(|h| Pattern::FaviconMd5(h.trim().to_lowercase())));
            patterns.extend(favicon.mmh3.iter().map(|h| Pattern::FaviconMmh3(h.trim().to_string())));
        }
        self.patterns = patterns;
        Ok(())
    }

    /// Primary pattern classes in priority order.
    pub fn match_patterns(&self, content: &WebResponse, finger: &str) -> Option<RuleMatch> {
        let header = if self.case_sensitive {
            content.header()
        } else {
            content.header_lower()
        };
        let body = match (header, self.case_sensitive) {
            (None, false) => content.body_lower().unwrap_or(content.raw_lower()),
            (None, true) => content.body().unwrap_or(content.raw()),
            (Some(_), false) => content.body_lower().unwrap_or_default(),
            (Some(_), true) => content.body().unwrap_or_default(),
        };
        let hash_body = content.body_or_raw();
        let mut hashes: Option<(String, String)> = None;
        let mut hashed = || -> (String, String) {
            hashes
                .get_or_insert_with(|| (md5_hash(hash_body), mmh3_hash32(hash_body)))
                .clone()
        };

        for (index, pattern) in self.patterns.iter().enumerate() {
            let (hit, is_vuln, version) = match pattern {
                Pattern::Vuln(re) => match capture(re, content.raw()) {
                    Some(v) => (true, true, v),
                    None => (false, false, String::new()),
                },
                Pattern::Regexp(re) => match capture(re, content.raw()) {
                    Some(v) => (true, false, v),
                    None => (false, false, String::new()),
                },
                Pattern::Header(lit) => (
                    header.is_some_and(|h| contains(h, lit)),
                    false,
                    String::new(),
                ),
                Pattern::Body(lit) => (contains(body, lit), false, String::new()),
                Pattern::Md5(h) | Pattern::FaviconMd5(h) => (hashed().0 == *h, false, String::new()),
                Pattern::Mmh3(h) | Pattern::FaviconMmh3(h) => {
                    (hashed().1 == *h, false, String::new())
                }
            };
            if hit {
                debug!("{} finger hit, {}: {:?}", finger, pattern.class(), pattern.describe());
                return Some(RuleMatch {
                    is_vuln,
                    version,
                    detail: Some(MatchDetail::new(pattern.class(), Some(index), pattern.describe())),
                });
            }
        }
        None
    }

    pub fn match_cert(&self, cert: &str) -> Option<&str> {
        self.certs
            .iter()
            .find(|c| cert.contains(c.as_str()))
            .map(String::as_str)
    }

    /// Full matcher: primary classes, then the certificate fallback for HTTP
    /// fingers, then version extraction when the hit carried no version.
    pub fn matches(&self, content: &WebResponse, is_http: bool, finger: &str) -> Option<RuleMatch> {
        let mut hit = match self.match_patterns(content, finger) {
            Some(hit) => hit,
            None if is_http => {
                let cert = content.cert()?;
                let literal = self.match_cert(cert)?;
                debug!("{} finger hit, cert: {:?}", finger, literal);
                RuleMatch {
                    detail: Some(MatchDetail::new("cert", None, literal)),
                    ..Default::default()
                }
            }
            None => return None,
        };

        if hit.version.is_empty() {
            for re in &self.version_regexps {
                if let Some(v) = capture(re, content.raw()) {
                    if !v.is_empty() {
                        hit.version = v;
                    }
                }
            }
        }
        Some(hit)
    }
}

/// Trimmed first capture group, or empty when the pattern has none.
fn capture(re: &Regex, haystack: &[u8]) -> Option<String> {
    let caps = re.captures(haystack)?;
    Some(
        caps.get(1)
            .map(|m| String::from_utf8_lossy(m.as_bytes()).trim().to_string())
            .unwrap_or_default(),
    )
}
