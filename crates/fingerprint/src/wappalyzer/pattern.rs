//! Wappalyzer pattern DSL
//!
//! `regex\;version:\1\;confidence:50`. The regex part may be empty, in which
//! case the pattern matches any value. Version templates reference capture
//! groups with `\N` and support the ternary `\N?present:absent`.

use regex::bytes::{Captures, Regex};
use sigil_common::{SigilError, SigilResult};

const SEPARATOR: &str = "\\;";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionToken {
    Literal(String),
    Group(usize),
    Ternary {
        group: usize,
        present: Vec<VersionToken>,
        absent: Vec<VersionToken>,
    },
}

/// Parsed version template.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VersionTemplate(Vec<VersionToken>);

impl VersionTemplate {
    pub fn parse(template: &str) -> Self {
        Self(parse_tokens(template))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The template text when it has no group references.
    pub fn literal(&self) -> Option<String> {
        let mut out = String::new();
        for token in &self.0 {
            match token {
                VersionToken::Literal(s) => out.push_str(s),
                _ => return None,
            }
        }
        Some(out)
    }

    pub fn render(&self, caps: Option<&Captures<'_>>) -> String {
        render_tokens(&self.0, caps).trim().to_string()
    }
}

fn group_text(caps: Option<&Captures<'_>>, group: usize) -> String {
    caps.and_then(|c| c.get(group))
        .map(|m| String::from_utf8_lossy(m.as_bytes()).into_owned())
        .unwrap_or_default()
}

fn render_tokens(tokens: &[VersionToken], caps: Option<&Captures<'_>>) -> String {
    let mut out = String::new();
    for token in tokens {
        match token {
            VersionToken::Literal(s) => out.push_str(s),
            VersionToken::Group(n) => out.push_str(&group_text(caps, *n)),
            VersionToken::Ternary {
                group,
                present,
                absent,
            } => {
                let branch = if group_text(caps, *group).is_empty() {
                    absent
                } else {
                    present
                };
                out.push_str(&render_tokens(branch, caps));
            }
        }
    }
    out
}

fn parse_tokens(template: &str) -> Vec<VersionToken> {
    let mut tokens = Vec::new();
    let mut literal = String::new();
    let mut chars = template.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        let group = match chars.peek() {
            Some(&(_, d)) if c == '\\' && d.is_ascii_digit() => d,
            _ => {
                literal.push(c);
                continue;
            }
        };
        chars.next();
        let group = group.to_digit(10).unwrap_or_default() as usize;
        if !literal.is_empty() {
            tokens.push(VersionToken::Literal(std::mem::take(&mut literal)));
        }
        if chars.next_if(|&(_, q)| q == '?').is_some() {
            // `\N?a:b` consumes the rest of the template
            let rest = &template[i + 3..];
            let (present, absent) = rest.split_once(':').unwrap_or((rest, ""));
            tokens.push(VersionToken::Ternary {
                group,
                present: parse_tokens(present),
                absent: parse_tokens(absent),
            });
            return tokens;
        }
        tokens.push(VersionToken::Group(group));
    }
    if !literal.is_empty() {
        tokens.push(VersionToken::Literal(literal));
    }
    tokens
}

#[derive(Debug, Clone)]
pub struct Pattern {
    regex: Option<Regex>,
    pub version: VersionTemplate,
    pub confidence: u8,
}

impl Pattern {
    pub fn parse(s: &str) -> SigilResult<Self> {
        let mut parts = s.split(SEPARATOR);
        let expr = parts.next().unwrap_or_default();
        let regex = if expr.is_empty() {
            None
        } else {
            let re = Regex::new(&format!("(?i){}", expr))
                .map_err(|e| SigilError::rule(&format!("wappalyzer pattern {}", expr), e))?;
            Some(re)
        };

        let mut pattern = Self {
            regex,
            version: VersionTemplate::default(),
            confidence: 100,
        };
        for part in parts {
            if let Some(v) = part.strip_prefix("version:") {
                pattern.version = VersionTemplate::parse(v);
            } else if let Some(c) = part.strip_prefix("confidence:") {
                pattern.confidence = c.trim().parse().unwrap_or(100);
            }
        }
        Ok(pattern)
    }

    /// On a hit, the rendered version (possibly empty).
    pub fn evaluate(&self, target: &[u8]) -> Option<String> {
        let Some(regex) = &self.regex else {
            return Some(self.version.render(None));
        };
        if self.version.is_empty() {
            return regex.is_match(target).then(String::new);
        }
        regex
            .captures(target)
            .map(|caps| self.version.render(Some(&caps)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dsl_parts() {
        let p = Pattern::parse("jquery[.-]ui(?:[.-]([\\d.]+))?\\;version:\\1\\;confidence:50").unwrap();
        assert_eq!(p.confidence, 50);
        assert_eq!(p.evaluate(b"/js/jquery-ui-1.12.1/jquery-ui.min.js").as_deref(), Some("1.12.1"));
        assert_eq!(p.evaluate(b"/js/jquery-ui.js").as_deref(), Some(""));
        assert_eq!(p.evaluate(b"/js/react.js"), None);
    }

    #[test]
    fn empty_regex_matches_anything() {
        let p = Pattern::parse("").unwrap();
        assert_eq!(p.evaluate(b"whatever").as_deref(), Some(""));
    }

    #[test]
    fn ternary_template() {
        let p = Pattern::parse("nginx(/([\\d.]+))?\\;version:\\1?\\2:unknown").unwrap();
        assert_eq!(p.evaluate(b"nginx/1.25.3").as_deref(), Some("1.25.3"));
        assert_eq!(p.evaluate(b"nginx").as_deref(), Some("unknown"));
    }

    #[test]
    fn template_tokens() {
        let t = VersionTemplate::parse("v\\1.\\2");
        assert_eq!(
            t.0,
            vec![
                VersionToken::Literal("v".into()),
                VersionToken::Group(1),
                VersionToken::Literal(".".into()),
                VersionToken::Group(2),
            ]
        );
        assert_eq!(VersionTemplate::parse("2.0").literal().as_deref(), Some("2.0"));
        assert!(VersionTemplate::parse("\\1").literal().is_none());
    }

    #[test]
    fn invalid_regex_is_error() {
        assert!(Pattern::parse("(unclosed").is_err());
    }
}
