//! Captured responses
//!
//! [`WebResponse`] splits and lowercases a response once so that every engine
//! can match against the same views without re-scanning the bytes.

use crate::error::{SigilError, SigilResult};

const SEPARATOR: &[u8] = b"\r\n\r\n";

/// Split at the first blank line into `(header, body)`.
pub fn split_content(content: &[u8]) -> Option<(&[u8], &[u8])> {
    find(content, SEPARATOR).map(|i| (&content[..i], &content[i + SEPARATOR.len()..]))
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Byte substring test.
#[inline]
pub fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    needle.is_empty() || find(haystack, needle).is_some()
}

/// Parsed HTTP/1.x response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub proto: String,
    pub status: u16,
    pub reason: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn parse(content: &[u8]) -> SigilResult<Self> {
        let (head, body) = match split_content(content) {
            Some(parts) => parts,
            None => match find(content, b"\n\n") {
                Some(i) => (&content[..i], &content[i + 2..]),
                None => (content, &content[content.len()..]),
            },
        };
        let head = String::from_utf8_lossy(head);
        let mut lines = head.lines();

        let status_line = lines
            .next()
            .ok_or_else(|| SigilError::Parse("empty response".into()))?;
        let mut parts = status_line.trim().splitn(3, ' ');
        let proto = parts.next().unwrap_or_default();
        if !proto.starts_with("HTTP/") {
            return Err(SigilError::Parse(format!("malformed status line: {}", status_line)));
        }
        let status = parts
            .next()
            .and_then(|s| s.parse::<u16>().ok())
            .ok_or_else(|| SigilError::Parse(format!("malformed status code: {}", status_line)))?;
        let reason = parts.next().unwrap_or_default().trim().to_string();

        let mut headers = Vec::new();
        for line in lines {
            if let Some((name, value)) = line.split_once(':') {
                headers.push((name.trim().to_string(), value.trim().to_string()));
            }
        }

        let mut response = Self {
            proto: proto.to_string(),
            status,
            reason,
            headers,
            body: body.to_vec(),
        };
        if response
            .header("transfer-encoding")
            .is_some_and(|v| v.eq_ignore_ascii_case("chunked"))
        {
            if let Some(decoded) = decode_chunked(&response.body) {
                response.body = decoded;
            }
        }
        Ok(response)
    }

    /// First header value, case-insensitive.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Re-serialise as raw bytes with a normalised header block.
    pub fn read_raw(&self) -> Vec<u8> {
        let mut raw = format!("{} {} {}\r\n", self.proto, self.status, self.reason);
        for (k, v) in &self.headers {
            if k.eq_ignore_ascii_case("transfer-encoding") {
                continue;
            }
            raw.push_str(&format!("{}: {}\r\n", k, v));
        }
        raw.push_str("\r\n");
        let mut bytes = raw.into_bytes();
        bytes.extend_from_slice(&self.body);
        bytes
    }
}

fn decode_chunked(body: &[u8]) -> Option<Vec<u8>> {
    let mut out = Vec::with_capacity(body.len());
    let mut rest = body;
    loop {
        let line_end = find(rest, b"\r\n")?;
        let size_line = std::str::from_utf8(&rest[..line_end]).ok()?;
        let size_str = size_line.split(';').next().unwrap_or("").trim();
        let size = usize::from_str_radix(size_str, 16).ok()?;
        rest = &rest[line_end + 2..];
        if size == 0 {
            return Some(out);
        }
        if rest.len() < size {
            out.extend_from_slice(rest);
            return Some(out);
        }
        out.extend_from_slice(&rest[..size]);
        rest = rest.get(size + 2..).unwrap_or(&[]);
    }
}

/// A response prepared for matching.
#[derive(Debug, Clone, Default)]
pub struct WebResponse {
    raw: Vec<u8>,
    lower: Vec<u8>,
    split: Option<usize>,
    headers: Vec<(String, String)>,
    status: Option<u16>,
    cert: Option<String>,
}

impl WebResponse {
    /// Prepare raw HTTP bytes; header parsing is best effort.
    pub fn new(raw: impl Into<Vec<u8>>) -> Self {
        let raw = raw.into();
        let lower = raw.to_ascii_lowercase();
        let split = find(&raw, SEPARATOR);
        let (headers, status) = match HttpResponse::parse(&raw) {
            Ok(resp) => (
                resp.headers
                    .into_iter()
                    .map(|(k, v)| (k.to_lowercase(), v))
                    .collect(),
                Some(resp.status),
            ),
            Err(_) => (Vec::new(), None),
        };
        Self {
            raw,
            lower,
            split,
            headers,
            status,
            cert: None,
        }
    }

    /// Non-HTTP content: no header/body split.
    pub fn raw_only(raw: impl Into<Vec<u8>>) -> Self {
        let raw = raw.into();
        Self {
            lower: raw.to_ascii_lowercase(),
            raw,
            ..Default::default()
        }
    }

    #[inline]
    #[must_use]
    pub fn with_cert(mut self, cert: impl Into<String>) -> Self {
        let cert = cert.into();
        self.cert = if cert.is_empty() { None } else { Some(cert) };
        self
    }

    #[inline]
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    #[inline]
    pub fn raw_lower(&self) -> &[u8] {
        &self.lower
    }

    pub fn header(&self) -> Option<&[u8]> {
        self.split.map(|i| &self.raw[..i])
    }

    pub fn header_lower(&self) -> Option<&[u8]> {
        self.split.map(|i| &self.lower[..i])
    }

    pub fn body(&self) -> Option<&[u8]> {
        self.split.map(|i| &self.raw[i + SEPARATOR.len()..])
    }

    pub fn body_lower(&self) -> Option<&[u8]> {
        self.split.map(|i| &self.lower[i + SEPARATOR.len()..])
    }

    /// Body when split, otherwise the whole content.
    pub fn body_or_raw(&self) -> &[u8] {
        self.body().unwrap_or(&self.raw)
    }

    pub fn body_or_raw_lower(&self) -> &[u8] {
        self.body_lower().unwrap_or(&self.lower)
    }

    /// Parsed headers with lowercased names.
    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    pub fn header_value(&self, name: &str) -> Option<&str> {
        let name = name.to_lowercase();
        self.headers
            .iter()
            .find(|(k, _)| *k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn header_values<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.headers
            .iter()
            .filter(move |(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn status(&self) -> Option<u16> {
        self.status
    }

    pub fn cert(&self) -> Option<&str> {
        self.cert.as_deref()
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }
}
