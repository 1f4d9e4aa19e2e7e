//! `match` / `softmatch` directives
//!
//! A directive reads
//!
//! ```text
//! <service> m<d><pattern><d>[is] [p/product/] [v/version/] [i/info/]
//!           [h/host/] [o/os/] [d/device/] [cpe:/part:vendor:product/a]...
//! ```
//!
//! Patterns are compiled as byte regexes with Unicode disabled so that
//! `\xNN` escapes match raw bytes. Version fields are templates whose `$N`
//! and `$P(N)` references are substituted from the pattern's captures.

use regex::bytes::{Captures, Regex};
use serde::Deserialize;
use sigil_common::{Attributes, SigilError, SigilResult};
use tracing::warn;

use crate::fingerprint::FingerPrint;
use crate::protocol::fix_protocol;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Literal(String),
    Group(usize),
}

/// Version-info field with back references resolved to group indices.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Template(Vec<Token>);

impl Template {
    pub fn parse(s: &str) -> Self {
        let mut tokens = Vec::new();
        let mut literal = String::new();
        let mut rest = s;
        while let Some(pos) = rest.find('$') {
            literal.push_str(&rest[..pos]);
            let after = &rest[pos + 1..];
            let (group, consumed) = match after.as_bytes() {
                [b'P', b'(', d, b')', ..] if d.is_ascii_digit() => ((d - b'0') as usize, 4),
                [d, ..] if d.is_ascii_digit() => ((d - b'0') as usize, 1),
                _ => {
                    literal.push('$');
                    rest = after;
                    continue;
                }
            };
            if !literal.is_empty() {
                tokens.push(Token::Literal(std::mem::take(&mut literal)));
            }
            tokens.push(Token::Group(group));
            rest = &after[consumed..];
        }
        literal.push_str(rest);
        if !literal.is_empty() {
            tokens.push(Token::Literal(literal));
        }
        Self(tokens)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Substitute captures; missing groups render empty and line breaks are
    /// dropped.
    pub fn render(&self, caps: &Captures<'_>) -> String {
        let mut out = String::new();
        for token in &self.0 {
            match token {
                Token::Literal(s) => out.push_str(s),
                Token::Group(n) => {
                    if let Some(m) = caps.get(*n) {
                        out.push_str(&String::from_utf8_lossy(m.as_bytes()));
                    }
                }
            }
        }
        out.retain(|c| c != '\n' && c != '\r');
        out
    }
}

#[derive(Debug, Clone, Default)]
pub struct VersionInfo {
    pub product: Template,
    pub version: Template,
    pub info: Template,
    pub hostname: Template,
    pub os: Template,
    pub device: Template,
    pub cpes: Vec<Template>,
}

impl VersionInfo {
    /// Parse the trailing `p/../ v/../ cpe:/../` fields. Any delimiter is
    /// accepted after the field letter; flags after the closing delimiter
    /// (such as the `a` in `cpe:/../a`) are ignored.
    pub fn parse(tail: &str) -> Self {
        let mut info = Self::default();
        let mut rest = tail.trim_start();
        while !rest.is_empty() {
            let (key, after) = if let Some(after) = rest.strip_prefix("cpe:") {
                ('c', after)
            } else {
                let mut chars = rest.chars();
                match chars.next() {
                    Some(c @ ('p' | 'v' | 'i' | 'h' | 'o' | 'd')) => (c, chars.as_str()),
                    _ => {
                        rest = skip_word(rest);
                        continue;
                    }
                }
            };
            let Some(delim) = after.chars().next() else {
                break;
            };
            let body = &after[delim.len_utf8()..];
            let Some(end) = body.find(delim) else {
                break;
            };
            let value = &body[..end];
            match key {
                'p' => info.product = Template::parse(value),
                'v' => info.version = Template::parse(value),
                'i' => info.info = Template::parse(value),
                'h' => info.hostname = Template::parse(value),
                'o' => info.os = Template::parse(value),
                'd' => info.device = Template::parse(value),
                _ => info.cpes.push(Template::parse(&format!("cpe:/{}", value))),
            }
            rest = skip_word(&body[end + delim.len_utf8()..]);
        }
        info
    }
}

fn skip_word(s: &str) -> &str {
    let end = s.find(char::is_whitespace).unwrap_or(s.len());
    s[end..].trim_start()
}

/// Version info as carried by the pre-transformed JSON corpus.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct VersionInfoRecord {
    pub product_name: String,
    pub version: String,
    pub info: String,
    pub hostname: String,
    pub operating_system: String,
    pub device_type: String,
    pub cpes: Vec<String>,
}

impl From<&VersionInfoRecord> for VersionInfo {
    fn from(r: &VersionInfoRecord) -> Self {
        Self {
            product: Template::parse(&r.product_name),
            version: Template::parse(&r.version),
            info: Template::parse(&r.info),
            hostname: Template::parse(&r.hostname),
            os: Template::parse(&r.operating_system),
            device: Template::parse(&r.device_type),
            cpes: r.cpes.iter().map(|c| Template::parse(c)).collect(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MatchRecord {
    pub soft: bool,
    pub service: String,
    pub pattern: String,
    /// `i` / `s` flags; absent in corpora transformed before flags were kept.
    pub options: String,
    pub version_info: Option<VersionInfoRecord>,
}

#[derive(Debug, Clone)]
pub struct Match {
    pub soft: bool,
    pub service: String,
    pub pattern: String,
    regex: Regex,
    pub version_info: VersionInfo,
}

impl Match {
    /// Compile a match. Returns `Ok(None)` when the pattern uses regex
    /// features that are not supported; the caller skips it.
    pub fn compile(
        service: &str,
        pattern: &str,
        options: &str,
        soft: bool,
        version_info: VersionInfo,
    ) -> SigilResult<Option<Self>> {
        if service.is_empty() {
            return Err(SigilError::RuleCompile(format!(
                "match without service: {}",
                pattern
            )));
        }
        let expr = build_pattern(pattern, options);
        let regex = match Regex::new(&expr) {
            Ok(regex) => regex,
            Err(err) => {
                warn!(service, pattern, "skipping unsupported nmap pattern: {}", err);
                return Ok(None);
            }
        };
        Ok(Some(Self {
            soft,
            service: fix_protocol(service),
            pattern: pattern.to_string(),
            regex,
            version_info,
        }))
    }

    /// Parse the arguments of a `match` / `softmatch` line.
    pub fn parse_directive(args: &str, soft: bool) -> SigilResult<Option<Self>> {
        let bad = || SigilError::RuleCompile(format!("malformed match directive: {}", args));
        let (service, rest) = args.split_once(' ').ok_or_else(bad)?;
        if !service
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/'))
        {
            return Err(bad());
        }
        let rest = rest.strip_prefix('m').ok_or_else(bad)?;
        let delim = rest.chars().next().ok_or_else(bad)?;
        let body = &rest[delim.len_utf8()..];
        let end = body.find(delim).ok_or_else(bad)?;
        let pattern = &body[..end];
        if pattern.is_empty() {
            return Err(bad());
        }

        let after = &body[end + delim.len_utf8()..];
        let flags_len = after
            .find(|c: char| c != 'i' && c != 's')
            .unwrap_or(after.len());
        let (options, tail) = after.split_at(flags_len);
        if !tail.is_empty() && !tail.starts_with(char::is_whitespace) {
            return Err(bad());
        }
        Self::compile(service, pattern, options, soft, VersionInfo::parse(tail))
    }

    pub fn from_record(record: &MatchRecord) -> SigilResult<Option<Self>> {
        let info = record
            .version_info
            .as_ref()
            .map(VersionInfo::from)
            .unwrap_or_default();
        Self::compile(
            &record.service,
            &record.pattern,
            &record.options,
            record.soft,
            info,
        )
    }

    #[inline]
    pub fn is_match(&self, data: &[u8]) -> bool {
        self.regex.is_match(data)
    }

    pub fn regex(&self) -> &Regex {
        &self.regex
    }

    /// Fill `fp` from the version templates. `data` must match.
    pub fn make_version_info(&self, data: &[u8], fp: &mut FingerPrint) {
        let Some(caps) = self.regex.captures(data) else {
            return;
        };
        let info = &self.version_info;
        fp.service.clone_from(&self.service);
        fp.product_name = info.product.render(&caps);
        fp.version = info.version.render(&caps);
        fp.info = info.info.render(&caps);
        fp.hostname = info.hostname.render(&caps);
        fp.operating_system = info.os.render(&caps);
        fp.device_type = info.device.render(&caps);

        fp.cpes.clear();
        fp.cpe_attributes.clear();
        for cpe in info.cpes.iter().map(|t| t.render(&caps)) {
            if cpe.is_empty() {
                continue;
            }
            match Attributes::parse(&cpe) {
                Ok(attr) => {
                    fp.cpe_attributes.push(attr);
                    fp.cpes.push(cpe);
                }
                Err(err) => warn!(cpe = %cpe, "dropping malformed cpe: {}", err),
            }
        }
    }
}

/// Turn an nmap pattern plus `is` flags into a byte regex. With flags the
/// body is wrapped in a group that keeps a leading `^` and trailing `$`
/// outside; `i` is always added alongside `s`.
pub(crate) fn build_pattern(pattern: &str, options: &str) -> String {
    let pattern = pattern.replace("\\0", "\\x00");
    if options.is_empty() {
        return format!("(?-u){}", pattern);
    }

    let mut opts = options.to_string();
    if !opts.contains('i') {
        opts.push('i');
    }
    let (anchor, body) = match pattern.strip_prefix('^') {
        Some(body) => ("^", body),
        None => ("", pattern.as_str()),
    };
    let (body, tail) = match body.strip_suffix('$') {
        Some(inner) if !inner.ends_with('\\') => (inner, "$"),
        _ => (body, ""),
    };
    format!("(?-u){}(?{}:{}){}", anchor, opts, body, tail)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn option_wrapping() {
        assert_eq!(build_pattern("^abc$", ""), "(?-u)^abc$");
        assert_eq!(build_pattern("^abc$", "s"), "(?-u)^(?si:abc)$");
        assert_eq!(build_pattern("abc", "i"), "(?-u)(?i:abc)");
        assert_eq!(build_pattern("a\\0b", ""), "(?-u)a\\x00b");
        assert_eq!(build_pattern("cost \\$", "i"), "(?-u)(?i:cost \\$)");
    }

    #[test]
    fn templates_substitute_groups() {
        let re = Regex::new(r"(?-u)^SSH-([\d.]+)-OpenSSH_(\S+)").unwrap();
        let caps = re.captures(b"SSH-2.0-OpenSSH_8.9p1\r\n").unwrap();
        assert_eq!(Template::parse("protocol $1").render(&caps), "protocol 2.0");
        assert_eq!(Template::parse("$P(2)").render(&caps), "8.9p1");
        assert_eq!(Template::parse("$9 cost $x").render(&caps), " cost $x");
    }

    #[test]
    fn directive_with_version_info() {
        let m = Match::parse_directive(
            r"redis m|^.*redis_version:([.\d]+)\n|s p/Redis key-value store/ v/$1/ cpe:/a:redislabs:redis:$1/",
            false,
        )
        .unwrap()
        .unwrap();
        assert_eq!(m.service, "redis");
        let data = b"$3000\r\n# Server\r\nredis_version:6.0.9\nredis_mode:standalone";
        assert!(m.is_match(data));

        let mut fp = FingerPrint::default();
        m.make_version_info(data, &mut fp);
        assert_eq!(fp.product_name, "Redis key-value store");
        assert_eq!(fp.version, "6.0.9");
        assert_eq!(fp.cpes, vec!["cpe:/a:redislabs:redis:6.0.9"]);
        assert_eq!(fp.cpe_attributes[0].vendor, "redislabs");
    }

    #[test]
    fn raw_bytes_and_case() {
        let m = Match::parse_directive(
            r"ms-wbt-server m|^\x03\0\0\x13\x0e\xd0| p/Microsoft Terminal Services/ o/Windows/ cpe:/o:microsoft:windows/a",
            false,
        )
        .unwrap()
        .unwrap();
        assert_eq!(m.service, "rdp");
        assert!(m.is_match(b"\x03\x00\x00\x13\x0e\xd0\x00\x00"));
        assert_eq!(m.version_info.cpes.len(), 1);

        let ci = Match::parse_directive("ftp m|^220[- ].*filezilla.*|i p/FileZilla/", false)
            .unwrap()
            .unwrap();
        assert!(ci.is_match(b"220 FileZilla Server 1.7"));
        let cs = Match::parse_directive("ftp m=^220 FileZilla=", false)
            .unwrap()
            .unwrap();
        assert!(!cs.is_match(b"220 filezilla"));
    }

    #[test]
    fn unsupported_and_malformed() {
        // look-around is not supported by the regex crate
        assert!(Match::parse_directive("http m|^HTTP(?=/1)|", false)
            .unwrap()
            .is_none());
        assert!(Match::parse_directive("http m|unterminated", false).is_err());
        assert!(Match::parse_directive("http x|abc|", false).is_err());
        assert!(Match::parse_directive("http m|abc|q", false).is_err());
    }
}
