//! Probes: payload, port hints and ordered match group

use std::fmt;
use std::ops::RangeInclusive;

use serde::{Deserialize, Serialize};
use sigil_common::{SigilError, SigilResult};

use crate::fingerprint::FingerPrint;
use crate::matcher::Match;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Protocol {
    #[default]
    #[serde(rename = "TCP", alias = "tcp")]
    Tcp,
    #[serde(rename = "UDP", alias = "udp")]
    Udp,
}

impl Protocol {
    pub fn parse(s: &str) -> SigilResult<Self> {
        match s {
            "TCP" | "tcp" => Ok(Protocol::Tcp),
            "UDP" | "udp" => Ok(Protocol::Udp),
            other => Err(SigilError::RuleCompile(format!("unknown probe protocol: {}", other))),
        }
    }

    #[inline]
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Protocol::Tcp => "TCP",
            Protocol::Udp => "UDP",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Set of ports written as `80,443,8000-8010`. `T:` / `U:` prefixes on
/// `Exclude` entries are accepted and ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PortList(Vec<RangeInclusive<u16>>);

impl PortList {
    pub fn parse(expr: &str) -> SigilResult<Self> {
        let bad = |item: &str| SigilError::RuleCompile(format!("bad port list item: {}", item));
        let mut ranges = Vec::new();
        for item in expr.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let bare = item
                .strip_prefix("T:")
                .or_else(|| item.strip_prefix("U:"))
                .unwrap_or(item);
            let range = match bare.split_once('-') {
                Some((lo, hi)) => {
                    let lo: u16 = lo.trim().parse().map_err(|_| bad(item))?;
                    let hi: u16 = hi.trim().parse().map_err(|_| bad(item))?;
                    lo..=hi
                }
                None => {
                    let port: u16 = bare.parse().map_err(|_| bad(item))?;
                    port..=port
                }
            };
            ranges.push(range);
        }
        Ok(Self(ranges))
    }

    pub fn contains(&self, port: u16) -> bool {
        self.0.iter().any(|r| r.contains(&port))
    }

    pub fn push(&mut self, port: u16) {
        if !self.contains(port) {
            self.0.push(port..=port);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<u16>> for PortList {
    fn from(ports: Vec<u16>) -> Self {
        Self(ports.into_iter().map(|p| p..=p).collect())
    }
}

#[derive(Debug, Clone)]
pub struct Probe {
    /// `TCP_GetRequest`, `UDP_DNSStatusRequest`, ...
    pub name: String,
    pub protocol: Protocol,
    pub rarity: u8,
    pub ports: PortList,
    pub ssl_ports: PortList,
    pub matches: Vec<Match>,
    pub fallback: Option<String>,
    pub(crate) fallback_index: Option<usize>,
    pub payload: Vec<u8>,
}

impl Probe {
    pub fn new(protocol: Protocol, name: &str, payload: Vec<u8>) -> Self {
        Self {
            name: format!("{}_{}", protocol, name),
            protocol,
            rarity: 0,
            ports: PortList::default(),
            ssl_ports: PortList::default(),
            matches: Vec::new(),
            fallback: None,
            fallback_index: None,
            payload,
        }
    }

    #[inline]
    #[must_use]
    pub fn with_rarity(mut self, rarity: u8) -> Self {
        self.rarity = rarity;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_ports(mut self, ports: PortList) -> Self {
        self.ports = ports;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_ssl_ports(mut self, ports: PortList) -> Self {
        self.ssl_ports = ports;
        self
    }

    /// True when the probe is hinted for `port` either plain or over TLS.
    pub fn covers(&self, port: u16) -> bool {
        self.ports.contains(port) || self.ssl_ports.contains(port)
    }

    /// Payload with `{Host}` replaced.
    pub fn build_request(&self, host: &str) -> Vec<u8> {
        const PLACEHOLDER: &[u8] = b"{Host}";
        let mut out = Vec::with_capacity(self.payload.len());
        let mut rest = self.payload.as_slice();
        while let Some(pos) = rest
            .windows(PLACEHOLDER.len())
            .position(|w| w == PLACEHOLDER)
        {
            out.extend_from_slice(&rest[..pos]);
            out.extend_from_slice(host.as_bytes());
            rest = &rest[pos + PLACEHOLDER.len()..];
        }
        out.extend_from_slice(rest);
        out
    }

    /// Run the match group in file order.
    ///
    /// A softmatch records its service and narrows the remaining candidates
    /// to matches of that same service; the first hard match wins.
    pub fn match_response(&self, data: &[u8]) -> FingerPrint {
        let mut fp = FingerPrint::default();
        let mut soft_filter: Option<&str> = None;

        for m in &self.matches {
            if soft_filter.is_some_and(|service| service != m.service) {
                continue;
            }
            if !m.is_match(data) {
                continue;
            }
            fp.match_regex = m.regex().as_str().to_string();
            if m.soft {
                fp.service.clone_from(&m.service);
                soft_filter = Some(&m.service);
                continue;
            }
            m.make_version_info(data, &mut fp);
            return fp;
        }
        fp
    }
}

/// Decode a probe payload written with C escapes (`\0`, `\r`, `\xNN`, ...).
pub fn unescape_payload(s: &str) -> SigilResult<Vec<u8>> {
    let mut out = Vec::with_capacity(s.len());
    let bytes = s.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        if b != b'\\' || i + 1 == bytes.len() {
            out.push(b);
            i += 1;
            continue;
        }
        let esc = bytes[i + 1];
        i += 2;
        match esc {
            b'0' => out.push(0),
            b'a' => out.push(0x07),
            b'b' => out.push(0x08),
            b'f' => out.push(0x0c),
            b'n' => out.push(b'\n'),
            b'r' => out.push(b'\r'),
            b't' => out.push(b'\t'),
            b'v' => out.push(0x0b),
            b'\\' | b'"' | b'\'' | b'|' => out.push(esc),
            b'x' => {
                let hex = bytes
                    .get(i..i + 2)
                    .and_then(|h| std::str::from_utf8(h).ok())
                    .and_then(|h| u8::from_str_radix(h, 16).ok())
                    .ok_or_else(|| {
                        SigilError::RuleCompile(format!("bad \\x escape in payload: {}", s))
                    })?;
                out.push(hex);
                i += 2;
            }
            other => {
                out.push(b'\\');
                out.push(other);
            }
        }
    }
    Ok(out)
}
