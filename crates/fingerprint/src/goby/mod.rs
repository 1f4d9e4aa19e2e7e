//! Goby engine
//!
//! Each finger labels substring tests over the lowercased raw response and
//! combines the labels with a boolean expression.

pub mod logic;

use std::collections::HashMap;

use async_trait::async_trait;
use serde::Deserialize;
use sigil_common::content::contains;
use sigil_common::resources::{maybe_decompress, unmarshal_json};
use sigil_common::{
    Engine, EngineCapability, FrameFrom, Framework, Frameworks, SigilError, SigilResult,
    WebResponse,
};
use tracing::{debug, info};

pub use logic::Expr;

pub const NAME: &str = "goby";

#[derive(Debug, Clone, Deserialize)]
pub struct GobyRule {
    pub label: String,
    pub feature: String,
    #[serde(default)]
    pub is_equal: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GobyFinger {
    pub name: String,
    pub logic: String,
    #[serde(default)]
    pub rule: Vec<GobyRule>,
    #[serde(skip)]
    expr: Option<Expr>,
}

impl GobyFinger {
    fn compile(&mut self) -> SigilResult<()> {
        for rule in &mut self.rule {
            rule.feature = rule.feature.to_lowercase();
        }
        let expr = Expr::parse(&self.logic)
            .map_err(|e| SigilError::rule(&format!("goby {}", self.name), e))?;
        self.expr = Some(expr);
        Ok(())
    }

    /// `raw_lower` must already be lowercased.
    pub fn matches(&self, raw_lower: &[u8]) -> bool {
        let Some(expr) = &self.expr else {
            return false;
        };
        let env: HashMap<String, bool> = self
            .rule
            .iter()
            .map(|r| {
                let found = contains(raw_lower, r.feature.as_bytes());
                (r.label.clone(), found == r.is_equal)
            })
            .collect();
        expr.evaluate(&env)
    }
}

#[derive(Debug, Clone, Default)]
pub struct GobyEngine {
    fingers: Vec<GobyFinger>,
}

impl GobyEngine {
    pub fn from_bytes(data: &[u8]) -> SigilResult<Self> {
        let data = maybe_decompress(data)?;
        let fingers: Vec<GobyFinger> = unmarshal_json(&data)?;
        let engine = Self::from_fingers(fingers)?;
        info!("Loaded {} goby fingers", engine.fingers.len());
        Ok(engine)
    }

    pub fn from_fingers(mut fingers: Vec<GobyFinger>) -> SigilResult<Self> {
        for finger in &mut fingers {
            finger.compile()?;
        }
        Ok(Self { fingers })
    }

    pub fn fingers(&self) -> &[GobyFinger] {
        &self.fingers
    }
}

#[async_trait]
impl Engine for GobyEngine {
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
        let raw = content.raw_lower();
        let mut frames = Frameworks::new();
        for finger in self.fingers.iter().filter(|f| f.matches(raw)) {
            debug!(name = %finger.name, "goby hit");
            frames.add(Framework::new(&finger.name, FrameFrom::Goby));
        }
        frames
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CORPUS: &str = r#"[
        {"name": "apache-not-tomcat", "logic": "a && !b", "rule": [
            {"label": "a", "feature": "Apache", "is_equal": true},
            {"label": "b", "feature": "Tomcat", "is_equal": true}
        ]},
        {"name": "no-iis", "logic": "x", "rule": [
            {"label": "x", "feature": "Microsoft-IIS", "is_equal": false}
        ]}
    ]"#;

    #[test]
    fn boolean_logic() {
        let engine = GobyEngine::from_bytes(CORPUS.as_bytes()).unwrap();

        let apache = WebResponse::new(&b"HTTP/1.1 200 OK\r\nServer: Apache\r\n\r\n"[..]);
        let frames = engine.web_match(&apache);
        assert!(frames.contains("apache-not-tomcat"));
        assert!(frames.get("apache-not-tomcat").unwrap().has_tag("goby"));

        let both = WebResponse::new(
            &b"HTTP/1.1 200 OK\r\nServer: Apache\r\n\r\nApache Tomcat/9.0"[..],
        );
        assert!(!engine.web_match(&both).contains("apache-not-tomcat"));
    }

    #[test]
    fn is_equal_false_negates() {
        let engine = GobyEngine::from_bytes(CORPUS.as_bytes()).unwrap();
        let iis = WebResponse::new(&b"HTTP/1.1 200 OK\r\nServer: Microsoft-IIS/10.0\r\n\r\n"[..]);
        assert!(!engine.web_match(&iis).contains("no-iis"));
        let other = WebResponse::new(&b"HTTP/1.1 200 OK\r\nServer: nginx\r\n\r\n"[..]);
        assert!(engine.web_match(&other).contains("no-iis"));
    }

    #[test]
    fn malformed_logic_fails_load() {
        let bad = r#"[{"name": "x", "logic": "a &&", "rule": []}]"#;
        assert!(GobyEngine::from_bytes(bad.as_bytes()).is_err());
    }
}
