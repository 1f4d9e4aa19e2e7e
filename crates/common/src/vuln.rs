//! Vulnerability tags emitted by matchers

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

use crate::framework::Framework;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info = 1,
    Medium,
    High,
    Critical,
    Unknown,
}

impl Severity {
    pub fn parse(s: &str) -> Self {
        match s {
            "info" => Severity::Info,
            "medium" => Severity::Medium,
            "high" => Severity::High,
            "critical" => Severity::Critical,
            _ => Severity::Unknown,
        }
    }

    #[inline]
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
            Severity::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Vuln {
    pub name: String,
    pub severity: Severity,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub payload: BTreeMap<String, serde_json::Value>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub detail: BTreeMap<String, Vec<String>>,
    #[serde(skip)]
    pub framework: Option<Box<Framework>>,
}

impl Vuln {
    pub fn new(name: impl Into<String>, severity: Severity) -> Self {
        Self {
            name: name.into(),
            severity,
            tags: Vec::new(),
            payload: BTreeMap::new(),
            detail: BTreeMap::new(),
            framework: None,
        }
    }

    #[inline]
    #[must_use]
    pub fn with_detail(mut self, key: &str, values: Vec<String>) -> Self {
        self.detail.insert(key.to_string(), values);
        self
    }

    #[inline]
    #[must_use]
    pub fn with_framework(mut self, frame: Framework) -> Self {
        self.framework = Some(Box::new(frame));
        self
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    fn payload_string(&self) -> String {
        self.payload
            .iter()
            .map(|(k, v)| match v {
                serde_json::Value::String(s) => format!("{}={}", k, s),
                other => format!("{}={}", k, other),
            })
            .collect::<Vec<_>>()
            .join(",")
    }

    fn detail_string(&self) -> String {
        self.detail
            .iter()
            .map(|(k, v)| format!("{}:{}", k, v.join(",")))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl fmt::Display for Vuln {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        let payload = self.payload_string();
        if !payload.is_empty() {
            write!(f, " payloads:{}", payload.escape_debug())?;
        }
        let detail = self.detail_string();
        if !detail.is_empty() {
            write!(f, " detail:{}", detail.escape_debug())?;
        }
        Ok(())
    }
}

/// Name-keyed vulnerability set; the first record for a name wins.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(transparent)]
pub struct Vulns(BTreeMap<String, Vuln>);

impl Vulns {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&Vuln> {
        self.0.get(name)
    }

    pub fn one(&self) -> Option<&Vuln> {
        self.0.values().next()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Vuln> {
        self.0.values()
    }

    pub fn add(&mut self, vuln: Vuln) -> bool {
        if self.0.contains_key(&vuln.name) {
            return false;
        }
        self.0.insert(vuln.name.clone(), vuln);
        true
    }

    /// Fold `other` in, lowercasing names and tags. Returns the number of new
    /// names.
    pub fn merge(&mut self, other: Vulns) -> usize {
        let mut added = 0;
        for (_, mut vuln) in other.0 {
            vuln.name = vuln.name.to_lowercase();
            for tag in vuln.tags.iter_mut() {
                *tag = tag.to_lowercase();
            }
            match self.0.get_mut(&vuln.name) {
                Some(existing) => {
                    for tag in vuln.tags {
                        if !existing.has_tag(&tag) {
                            existing.tags.push(tag);
                        }
                    }
                }
                None => {
                    self.0.insert(vuln.name.clone(), vuln);
                    added += 1;
                }
            }
        }
        added
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.0.values().any(|v| v.has_tag(tag))
    }
}

impl fmt::Display for Vulns {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for vuln in self.0.values() {
            write!(f, "[ {}: {} ] ", vuln.severity, vuln)?;
        }
        Ok(())
    }
}
