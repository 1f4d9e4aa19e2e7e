//! Wappalyzer engine
//!
//! Detection runs three passes over a response (headers, then `set-cookie`
//! cookies, then the body: html, script sources, meta tags and css) and
//! closes the detected set over `implies`. JavaScript property checks need a
//! browser and are not evaluated.

pub mod pattern;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::bytes::Regex;
use serde::de::{self, Deserializer, SeqAccess, Visitor};
use serde::Deserialize;
use sigil_common::resources::{maybe_decompress, unmarshal_json};
use sigil_common::{
    Attributes, Engine, EngineCapability, FrameFrom, Framework, Frameworks, SigilResult,
    WebResponse,
};
use tracing::{debug, info, warn};

pub use pattern::{Pattern, VersionTemplate};

pub const NAME: &str = "wappalyzer";

static SCRIPT_SRC: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)<script[^>]+src\s*=\s*["']?([^"'\s>]+)"#).unwrap()
});

static META_TAG: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)<meta[^>]+>"#).unwrap()
});

static META_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)(?:name|property)\s*=\s*["']([^"']+)["']"#).unwrap()
});

static META_CONTENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)content\s*=\s*["']([^"']*)["']"#).unwrap()
});

/// A string or a list of strings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StringList(pub Vec<String>);

impl<'de> Deserialize<'de> for StringList {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct StringListVisitor;

        impl<'de> Visitor<'de> for StringListVisitor {
            type Value = StringList;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a string or an array of strings")
            }

            fn visit_str<E: de::Error>(self, value: &str) -> Result<Self::Value, E> {
                Ok(StringList(vec![value.to_string()]))
            }

            fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
                Ok(StringList::default())
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
                let mut values = Vec::new();
                while let Some(value) = seq.next_element::<String>()? {
                    values.push(value);
                }
                Ok(StringList(values))
            }
        }

        deserializer.deserialize_any(StringListVisitor)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppRule {
    pub cats: Vec<u32>,
    pub headers: BTreeMap<String, StringList>,
    pub cookies: BTreeMap<String, StringList>,
    pub html: StringList,
    #[serde(alias = "scriptSrc")]
    pub scripts: StringList,
    pub meta: BTreeMap<String, StringList>,
    pub js: BTreeMap<String, StringList>,
    pub css: StringList,
    pub implies: StringList,
    pub cpe: Option<String>,
    pub description: Option<String>,
    pub website: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Category {
    pub name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WappalyzerCorpus {
    #[serde(alias = "technologies")]
    pub apps: BTreeMap<String, AppRule>,
    #[serde(default)]
    pub categories: HashMap<String, Category>,
}

#[derive(Debug, Clone)]
pub struct Implied {
    pub name: String,
    pub version: Option<String>,
}

/// Compiled application fingerprint.
#[derive(Debug, Clone)]
pub struct App {
    pub name: String,
    pub categories: Vec<String>,
    headers: Vec<(String, Pattern)>,
    cookies: Vec<(String, Pattern)>,
    html: Vec<Pattern>,
    scripts: Vec<Pattern>,
    meta: Vec<(String, Pattern)>,
    css: Vec<Pattern>,
    pub implies: Vec<Implied>,
    pub cpe: Option<Attributes>,
    pub description: String,
    pub website: String,
}

/// Compile each pattern of a list. Patterns the regex engine rejects are
/// dropped with a warning.
fn compile_list(app: &str, list: &StringList) -> Vec<Pattern> {
    list.0
        .iter()
        .filter_map(|s| match Pattern::parse(s) {
            Ok(p) => Some(p),
            Err(e) => {
                warn!(app, "skipping pattern: {}", e);
                None
            }
        })
        .collect()
}

fn compile_map(app: &str, map: &BTreeMap<String, StringList>) -> Vec<(String, Pattern)> {
    map.iter()
        .flat_map(|(key, list)| {
            let key = key.to_lowercase();
            compile_list(app, list)
                .into_iter()
                .map(move |p| (key.clone(), p))
        })
        .collect()
}

impl App {
    pub fn compile(name: &str, rule: &AppRule, categories: &HashMap<String, Category>) -> Self {
        let implies = rule
            .implies
            .0
            .iter()
            .map(|s| {
                let mut parts = s.split("\\;");
                let name = parts.next().unwrap_or_default().trim().to_string();
                let version = parts
                    .filter_map(|p| p.strip_prefix("version:"))
                    .find_map(|v| VersionTemplate::parse(v).literal());
                Implied { name, version }
            })
            .filter(|i| !i.name.is_empty())
            .collect();

        let cpe = rule.cpe.as_deref().and_then(|c| match Attributes::parse(c) {
            Ok(attrs) => Some(attrs),
            Err(e) => {
                warn!(app = name, "invalid cpe {}: {}", c, e);
                None
            }
        });

        Self {
            name: name.to_string(),
            categories: rule
                .cats
                .iter()
                .filter_map(|id| categories.get(&id.to_string()).map(|c| c.name.clone()))
                .collect(),
            headers: compile_map(name, &rule.headers),
            cookies: compile_map(name, &rule.cookies),
            html: compile_list(name, &rule.html),
            scripts: compile_list(name, &rule.scripts),
            meta: compile_map(name, &rule.meta),
            css: compile_list(name, &rule.css),
            implies,
            cpe,
            description: rule.description.clone().unwrap_or_default(),
            website: rule.website.clone().unwrap_or_default(),
        }
    }

    fn to_framework(&self, version: &str) -> Framework {
        let mut frame = Framework::new(&self.name, FrameFrom::Wappalyzer);
        if let Some(cpe) = &self.cpe {
            frame.update_attributes(cpe);
        }
        if !version.is_empty() {
            frame.set_version(version);
        }
        for category in &self.categories {
            frame.add_tag(&format!("category:{}", category));
        }
        frame
    }
}

/// Request-independent views extracted from the body once.
struct BodyViews<'a> {
    body: &'a [u8],
    scripts: Vec<&'a [u8]>,
    meta: Vec<(String, &'a [u8])>,
}

impl<'a> BodyViews<'a> {
    fn new(body: &'a [u8]) -> Self {
        let scripts = SCRIPT_SRC
            .captures_iter(body)
            .filter_map(|c| c.get(1).map(|m| m.as_bytes()))
            .collect();
        let meta = META_TAG
            .find_iter(body)
            .filter_map(|tag| {
                let tag = tag.as_bytes();
                let name = META_NAME.captures(tag)?.get(1)?;
                let content = META_CONTENT.captures(tag)?.get(1)?;
                Some((
                    String::from_utf8_lossy(name.as_bytes()).to_lowercase(),
                    content.as_bytes(),
                ))
            })
            .collect();
        Self {
            body,
            scripts,
            meta,
        }
    }
}

/// Detected app name → first non-empty version.
type Detected = BTreeMap<String, String>;

fn record(detected: &mut Detected, name: &str, version: String) {
    let slot = detected.entry(name.to_string()).or_default();
    if slot.is_empty() {
        *slot = version;
    }
}

#[derive(Debug, Clone, Default)]
pub struct WappalyzerEngine {
    apps: BTreeMap<String, App>,
}

impl WappalyzerEngine {
    pub fn from_bytes(data: &[u8]) -> SigilResult<Self> {
        let data = maybe_decompress(data)?;
        let corpus: WappalyzerCorpus = unmarshal_json(&data)?;
        let engine = Self::from_corpus(&corpus);
        info!("Loaded {} wappalyzer apps", engine.apps.len());
        Ok(engine)
    }

    pub fn from_corpus(corpus: &WappalyzerCorpus) -> Self {
        let apps = corpus
            .apps
            .iter()
            .map(|(name, rule)| (name.clone(), App::compile(name, rule, &corpus.categories)))
            .collect();
        Self { apps }
    }

    pub fn app(&self, name: &str) -> Option<&App> {
        self.apps.get(name)
    }

    fn check_headers(&self, content: &WebResponse, detected: &mut Detected) {
        for app in self.apps.values() {
            for (name, pattern) in &app.headers {
                for value in content.header_values(name) {
                    if let Some(version) = pattern.evaluate(value.to_lowercase().as_bytes()) {
                        record(detected, &app.name, version);
                    }
                }
            }
        }
    }

    fn check_cookies(&self, cookies: &HashMap<String, String>, detected: &mut Detected) {
        for app in self.apps.values() {
            for (name, pattern) in &app.cookies {
                if let Some(value) = cookies.get(name) {
                    if let Some(version) = pattern.evaluate(value.as_bytes()) {
                        record(detected, &app.name, version);
                    }
                }
            }
        }
    }

    fn check_body(&self, views: &BodyViews<'_>, detected: &mut Detected) {
        for app in self.apps.values() {
            let body_hits = app
                .html
                .iter()
                .chain(app.css.iter())
                .filter_map(|p| p.evaluate(views.body));
            let script_hits = app
                .scripts
                .iter()
                .flat_map(|p| views.scripts.iter().filter_map(move |s| p.evaluate(s)));
            let meta_hits = app.meta.iter().flat_map(|(name, p)| {
                views
                    .meta
                    .iter()
                    .filter(move |(n, _)| n == name)
                    .filter_map(move |(_, content)| p.evaluate(content))
            });
            for version in body_hits.chain(script_hits).chain(meta_hits) {
                record(detected, &app.name, version);
            }
        }
    }

    /// Add implied apps transitively. Cycles terminate on the visited set.
    fn apply_implies(&self, detected: &mut Detected) {
        let mut queue: Vec<String> = detected.keys().cloned().collect();
        let mut visited: HashSet<String> = queue.iter().cloned().collect();
        while let Some(name) = queue.pop() {
            let Some(app) = self.apps.get(&name) else {
                continue;
            };
            for implied in &app.implies {
                record(
                    detected,
                    &implied.name,
                    implied.version.clone().unwrap_or_default(),
                );
                if visited.insert(implied.name.clone()) {
                    queue.push(implied.name.clone());
                }
            }
        }
    }

    /// App name → version, before conversion to frames.
    pub fn detect(&self, content: &WebResponse) -> BTreeMap<String, String> {
        let mut detected = Detected::new();
        self.check_headers(content, &mut detected);

        let cookies = parse_set_cookies(content);
        if !cookies.is_empty() {
            self.check_cookies(&cookies, &mut detected);
        }

        let views = BodyViews::new(content.body_or_raw_lower());
        self.check_body(&views, &mut detected);

        self.apply_implies(&mut detected);
        detected
    }
}

/// Lowercased cookie name → lowercased value from every `set-cookie` header.
fn parse_set_cookies(content: &WebResponse) -> HashMap<String, String> {
    content
        .header_values("set-cookie")
        .filter_map(|v| {
            let pair = v.split(';').next()?;
            let (name, value) = pair.split_once('=').unwrap_or((pair, ""));
            Some((name.trim().to_lowercase(), value.trim().to_lowercase()))
        })
        .collect()
}

#[async_trait]
impl Engine for WappalyzerEngine {
    fn name(&self) -> &str {
        NAME
    }

    fn len(&self) -> usize {
        self.apps.len()
    }

    fn capability(&self) -> EngineCapability {
        EngineCapability::WEB
    }

    fn web_match(&self, content: &WebResponse) -> Frameworks {
        let mut frames = Frameworks::new();
        for (name, version) in self.detect(content) {
            match self.apps.get(&name) {
                Some(app) => {
                    debug!(name = %name, version = %version, "wappalyzer hit");
                    frames.add(app.to_framework(&version));
                }
                None => {
                    let mut frame = Framework::new(&name, FrameFrom::Wappalyzer);
                    frame.set_version(version);
                    frames.add(frame);
                }
            }
        }
        frames
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CORPUS: &str = r#"{
        "apps": {
            "jQuery UI": {
                "cats": [59],
                "scriptSrc": ["jquery[.-]ui(?:[.-]([\\d.]+))?(?:\\.min)?\\.js\\;version:\\1"],
                "implies": "jQuery",
                "cpe": "cpe:2.3:a:jquery:jquery_ui:*:*:*:*:*:*:*:*"
            },
            "jQuery": {
                "cats": [59],
                "scriptSrc": "jquery(?:-(\\d+\\.\\d+\\.\\d+))?(?:\\.min)?\\.js\\;version:\\1",
                "implies": "jQuery UI"
            },
            "Nginx": {
                "cats": [22],
                "headers": {"Server": "nginx(?:/([\\d.]+))?\\;version:\\1"},
                "cpe": "cpe:2.3:a:f5:nginx:*:*:*:*:*:*:*:*"
            },
            "PHP": {
                "cats": [27],
                "cookies": {"PHPSESSID": ""},
                "headers": {"X-Powered-By": "^php/?([\\d.]+)?\\;version:\\1"}
            },
            "WordPress": {
                "cats": [1],
                "meta": {"generator": "^wordpress ?([\\d.]+)?\\;version:\\1"},
                "html": "<link rel=[\"']stylesheet[\"'] [^>]+/wp-(?:content|includes)/",
                "implies": ["PHP\\;confidence:50", "MySQL"]
            },
            "Broken": {
                "html": "(?<=lookbehind)x"
            }
        },
        "categories": {
            "1": {"name": "CMS"},
            "22": {"name": "Web servers"},
            "27": {"name": "Programming languages"},
            "59": {"name": "JavaScript libraries"}
        }
    }"#;

    fn engine() -> WappalyzerEngine {
        WappalyzerEngine::from_bytes(CORPUS.as_bytes()).unwrap()
    }

    #[test]
    fn headers_cookies_and_categories() {
        let resp = WebResponse::new(
            &b"HTTP/1.1 200 OK\r\nServer: nginx/1.25.3\r\nSet-Cookie: PHPSESSID=abc; path=/\r\n\r\n<html></html>"[..],
        );
        let frames = engine().web_match(&resp);
        let nginx = frames.get("nginx").unwrap();
        assert_eq!(nginx.version, "1.25.3");
        assert_eq!(nginx.vendor, "f5");
        assert!(nginx.has_tag("category:Web servers"));
        assert!(nginx.has_tag("wappalyzer"));
        assert!(frames.contains("php"));
    }

    #[test]
    fn body_meta_and_implies() {
        let resp = WebResponse::new(
            &b"HTTP/1.1 200 OK\r\n\r\n<meta name=\"generator\" content=\"WordPress 6.4.2\"><link rel='stylesheet' href='/wp-content/x.css'>"[..],
        );
        let frames = engine().web_match(&resp);
        assert_eq!(frames.get("wordpress").unwrap().version, "6.4.2");
        assert!(frames.contains("php"));
        assert!(frames.contains("mysql"));
    }

    #[test]
    fn implies_cycle_terminates() {
        let resp = WebResponse::new(
            &b"HTTP/1.1 200 OK\r\n\r\n<script src=\"/static/jquery-ui-1.12.1.min.js\"></script>"[..],
        );
        let detected = engine().detect(&resp);
        assert_eq!(detected.get("jQuery UI").map(String::as_str), Some("1.12.1"));
        assert!(detected.contains_key("jQuery"));
    }

    #[test]
    fn unsupported_patterns_are_skipped() {
        let engine = engine();
        assert_eq!(engine.len(), 6);
        assert!(engine.app("Broken").unwrap().html.is_empty());
    }
}
