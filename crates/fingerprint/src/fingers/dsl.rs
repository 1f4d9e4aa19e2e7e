//! `send_data` payload language
//!
//! Plain text with C escapes (`\r \n \t \0 \\ \xNN`). Binary segments are
//! written as `b64de|<base64>|` or `hex|<hex>|`. `{{Hostname}}` stays in the
//! compiled bytes and is substituted per target by [`render`].

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use sigil_common::{SigilError, SigilResult};

const HOSTNAME: &[u8] = b"{{Hostname}}";

pub fn parse(s: &str) -> SigilResult<Vec<u8>> {
    let mut out = Vec::with_capacity(s.len());
    let mut rest = s;
    while !rest.is_empty() {
        if let Some(after) = rest.strip_prefix("b64de|") {
            let (segment, tail) = segment(after, "b64de")?;
            let decoded = STANDARD
                .decode(segment.trim())
                .map_err(|e| SigilError::rule("b64de segment", e))?;
            out.extend_from_slice(&decoded);
            rest = tail;
        } else if let Some(after) = rest.strip_prefix("hex|") {
            let (segment, tail) = segment(after, "hex")?;
            out.extend_from_slice(&decode_hex(segment.trim())?);
            rest = tail;
        } else {
            let next = ["b64de|", "hex|"]
                .iter()
                .filter_map(|marker| rest.find(marker))
                .filter(|&i| i > 0)
                .min()
                .unwrap_or(rest.len());
            unescape_into(&rest[..next], &mut out);
            rest = &rest[next..];
        }
    }
    Ok(out)
}

fn segment<'a>(s: &'a str, kind: &str) -> SigilResult<(&'a str, &'a str)> {
    s.find('|')
        .map(|end| (&s[..end], &s[end + 1..]))
        .ok_or_else(|| SigilError::RuleCompile(format!("unterminated {} segment", kind)))
}

fn decode_hex(s: &str) -> SigilResult<Vec<u8>> {
    let digits: Vec<u8> = s.bytes().filter(|b| !b.is_ascii_whitespace()).collect();
    if digits.len() % 2 != 0 {
        return Err(SigilError::RuleCompile(format!("odd hex length: {}", s)));
    }
    digits
        .chunks(2)
        .map(|pair| {
            let hi = hex_value(pair[0]);
            let lo = hex_value(pair[1]);
            match (hi, lo) {
                (Some(hi), Some(lo)) => Ok((hi << 4) | lo),
                _ => Err(SigilError::RuleCompile(format!("invalid hex: {}", s))),
            }
        })
        .collect()
}

fn hex_value(b: u8) -> Option<u8> {
    (b as char).to_digit(16).map(|d| d as u8)
}

/// C-style escapes; unknown escapes are kept verbatim.
pub fn unescape_into(s: &str, out: &mut Vec<u8>) {
    let bytes = s.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'\\' || i + 1 >= bytes.len() {
            out.push(bytes[i]);
            i += 1;
            continue;
        }
        match bytes[i + 1] {
            b'r' => out.push(b'\r'),
            b'n' => out.push(b'\n'),
            b't' => out.push(b'\t'),
            b'0' => out.push(0),
            b'\\' => out.push(b'\\'),
            b'x' if i + 3 < bytes.len() => {
                match (hex_value(bytes[i + 2]), hex_value(bytes[i + 3])) {
                    (Some(hi), Some(lo)) => {
                        out.push((hi << 4) | lo);
                        i += 4;
                        continue;
                    }
                    _ => out.extend_from_slice(b"\\x"),
                }
            }
            other => {
                out.push(b'\\');
                out.push(other);
            }
        }
        i += 2;
    }
}

/// Substitute `{{Hostname}}` with the target host.
pub fn render(payload: &[u8], host: &str) -> Vec<u8> {
    if !contains(payload, HOSTNAME) {
        return payload.to_vec();
    }
    let mut out = Vec::with_capacity(payload.len() + host.len());
    let mut i = 0;
    while i < payload.len() {
        if payload[i..].starts_with(HOSTNAME) {
            out.extend_from_slice(host.as_bytes());
            i += HOSTNAME.len();
        } else {
            out.push(payload[i]);
            i += 1;
        }
    }
    out
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}
