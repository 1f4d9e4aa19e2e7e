//! CPE 2.3 well-formed names
//!
//! Values are stored unquoted. An empty string is the logical value ANY and
//! `"-"` is NA. Two bindings are supported: the legacy `cpe:/` URI (with
//! packed editions and percent encoding) and the `cpe:2.3:` formatted string
//! (backslash quoting).

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{SigilError, SigilResult};

const NA: &str = "-";

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Attributes {
    #[serde(default)]
    pub part: String,
    #[serde(default)]
    pub vendor: String,
    #[serde(default)]
    pub product: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub update: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub edition: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub sw_edition: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub target_sw: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub target_hw: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub other: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub language: String,
}

impl Attributes {
    /// Application attributes for a product name.
    #[inline]
    #[must_use]
    pub fn application(product: &str) -> Self {
        Self {
            part: "a".to_string(),
            product: product.to_string(),
            ..Default::default()
        }
    }

    /// Parse either binding form.
    pub fn parse(s: &str) -> SigilResult<Self> {
        let s = s.trim();
        if let Some(rest) = s.strip_prefix("cpe:2.3:") {
            Self::parse_formatted(rest)
        } else if let Some(rest) = s.strip_prefix("cpe:/") {
            Self::parse_uri(rest)
        } else {
            Err(SigilError::Parse(format!("not a cpe: {}", s)))
        }
    }

    fn parse_formatted(rest: &str) -> SigilResult<Self> {
        let fields = split_unescaped(rest);
        if fields.len() > 11 {
            return Err(SigilError::Parse(format!("too many cpe components: {}", rest)));
        }
        let mut values: Vec<String> = fields.iter().map(|f| unbind_formatted(f)).collect();
        values.resize(11, String::new());
        let attrs = Self {
            part: values[0].clone(),
            vendor: values[1].clone(),
            product: values[2].clone(),
            version: values[3].clone(),
            update: values[4].clone(),
            edition: values[5].clone(),
            language: values[6].clone(),
            sw_edition: values[7].clone(),
            target_sw: values[8].clone(),
            target_hw: values[9].clone(),
            other: values[10].clone(),
        };
        attrs.validate_part()?;
        Ok(attrs)
    }

    fn parse_uri(rest: &str) -> SigilResult<Self> {
        // nmap writes `cpe:/a:vendor:product/` with a trailing delimiter
        let rest = rest.split(|c: char| c == '/' || c.is_whitespace()).next().unwrap_or("");
        let fields: Vec<&str> = rest.split(':').collect();
        if fields.len() > 7 {
            return Err(SigilError::Parse(format!("too many cpe components: {}", rest)));
        }
        let get = |i: usize| fields.get(i).map(|f| unbind_uri(f)).unwrap_or_default();
        let mut attrs = Self {
            part: get(0),
            vendor: get(1),
            product: get(2),
            version: get(3),
            update: get(4),
            language: get(6),
            ..Default::default()
        };

        let edition = fields.get(5).copied().unwrap_or("");
        if let Some(packed) = edition.strip_prefix('~') {
            let packed: Vec<&str> = packed.split('~').collect();
            let unpack = |i: usize| packed.get(i).map(|f| unbind_uri(f)).unwrap_or_default();
            attrs.edition = unpack(0);
            attrs.sw_edition = unpack(1);
            attrs.target_sw = unpack(2);
            attrs.target_hw = unpack(3);
            attrs.other = unpack(4);
        } else {
            attrs.edition = unbind_uri(edition);
        }
        attrs.validate_part()?;
        Ok(attrs)
    }

    fn validate_part(&self) -> SigilResult<()> {
        match self.part.as_str() {
            "" | "a" | "o" | "h" | NA => Ok(()),
            other => Err(SigilError::Parse(format!("invalid cpe part: {}", other))),
        }
    }

    /// `cpe:/` URI binding.
    pub fn bind_to_uri(&self) -> String {
        let edition = if self.sw_edition.is_empty()
            && self.target_sw.is_empty()
            && self.target_hw.is_empty()
            && self.other.is_empty()
        {
            bind_uri(&self.edition)
        } else {
            format!(
                "~{}~{}~{}~{}~{}",
                bind_uri(&self.edition),
                bind_uri(&self.sw_edition),
                bind_uri(&self.target_sw),
                bind_uri(&self.target_hw),
                bind_uri(&self.other)
            )
        };

        let mut parts = vec![
            bind_uri(&self.part),
            bind_uri(&self.vendor),
            bind_uri(&self.product),
            bind_uri(&self.version),
            bind_uri(&self.update),
            edition,
            bind_uri(&self.language),
        ];
        while parts.last().is_some_and(|p| p.is_empty()) {
            parts.pop();
        }
        format!("cpe:/{}", parts.join(":"))
    }

    /// `cpe:2.3:` formatted string binding.
    pub fn bind_to_fmt_string(&self) -> String {
        let values = [
            &self.part,
            &self.vendor,
            &self.product,
            &self.version,
            &self.update,
            &self.edition,
            &self.language,
            &self.sw_edition,
            &self.target_sw,
            &self.target_hw,
            &self.other,
        ];
        let bound: Vec<String> = values.iter().map(|v| bind_formatted(v)).collect();
        format!("cpe:2.3:{}", bound.join(":"))
    }

    /// Human readable WFN form, e.g. `wfn:[part="a",product="nginx"]`.
    pub fn wfn_string(&self) -> String {
        let named = [
            ("part", &self.part),
            ("vendor", &self.vendor),
            ("product", &self.product),
            ("version", &self.version),
            ("update", &self.update),
            ("edition", &self.edition),
            ("sw_edition", &self.sw_edition),
            ("target_sw", &self.target_sw),
            ("target_hw", &self.target_hw),
            ("other", &self.other),
            ("language", &self.language),
        ];
        let body: Vec<String> = named
            .iter()
            .filter(|(_, v)| !v.is_empty())
            .map(|(k, v)| {
                if v.as_str() == NA {
                    format!("{}=NA", k)
                } else {
                    format!("{}=\"{}\"", k, v)
                }
            })
            .collect();
        format!("wfn:[{}]", body.join(","))
    }

    /// Copy every non-ANY field of `other` over this one.
    pub fn update_from(&mut self, other: &Attributes) {
        let pairs = [
            (&mut self.part, &other.part),
            (&mut self.vendor, &other.vendor),
            (&mut self.product, &other.product),
            (&mut self.version, &other.version),
            (&mut self.update, &other.update),
            (&mut self.edition, &other.edition),
            (&mut self.sw_edition, &other.sw_edition),
            (&mut self.target_sw, &other.target_sw),
            (&mut self.target_hw, &other.target_hw),
            (&mut self.other, &other.other),
            (&mut self.language, &other.language),
        ];
        for (dst, src) in pairs {
            if !src.is_empty() {
                dst.clone_from(src);
            }
        }
    }
}

impl fmt::Display for Attributes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.bind_to_fmt_string())
    }
}

fn split_unescaped(s: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut escaped = false;
    for c in s.chars() {
        if escaped {
            current.push('\\');
            current.push(c);
            escaped = false;
        } else if c == '\\' {
            escaped = true;
        } else if c == ':' {
            fields.push(std::mem::take(&mut current));
        } else {
            current.push(c);
        }
    }
    if escaped {
        current.push('\\');
    }
    fields.push(current);
    fields
}

fn unbind_formatted(s: &str) -> String {
    match s {
        "*" => return String::new(),
        NA => return NA.to_string(),
        _ => {}
    }
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(c);
        }
    }
    out
}

fn bind_formatted(s: &str) -> String {
    match s {
        "" => return "*".to_string(),
        NA => return NA.to_string(),
        _ => {}
    }
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') || !c.is_ascii() {
            out.push(c);
        } else {
            out.push('\\');
            out.push(c);
        }
    }
    out
}

fn unbind_uri(s: &str) -> String {
    if s.is_empty() {
        return String::new();
    }
    if s == NA {
        return NA.to_string();
    }
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
            if let Some(b) = hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                out.push(b);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn bind_uri(s: &str) -> String {
    match s {
        "" => return String::new(),
        NA => return NA.to_string(),
        _ => {}
    }
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        if b.is_ascii_alphanumeric() || matches!(b, b'.' | b'-' | b'_') {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{:02x}", b));
        }
    }
    out
}
