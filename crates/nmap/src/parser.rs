//! Probe corpus loaders
//!
//! Two inputs are understood: the line oriented `nmap-service-probes` text
//! and the pre-transformed JSON corpus `{probes: [...], services: {...}}`.

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use sigil_common::resources::{maybe_decompress, unmarshal_json};
use sigil_common::{SigilError, SigilResult};
use tracing::debug;

use crate::matcher::{Match, MatchRecord};
use crate::probe::{unescape_payload, PortList, Probe, Protocol};

static PROBE_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(UDP|TCP) ([a-zA-Z0-9\-_./]+) q\|([^|]*)\|(?:\s+.*)?$").unwrap()
});

/// Probes and global directives read from a corpus.
#[derive(Debug, Default)]
pub struct ProbeSet {
    pub probes: Vec<Probe>,
    pub exclude: PortList,
    /// `{port: service}` map carried by JSON corpora.
    pub services: BTreeMap<String, String>,
}

/// Parse `nmap-service-probes` text.
pub fn parse_probe_file(text: &str) -> SigilResult<ProbeSet> {
    let mut set = ProbeSet::default();
    let mut current: Option<Probe> = None;

    for (lineno, line) in text.lines().enumerate() {
        let line = line.trim_end();
        if line.len() < 2 || line.starts_with('#') {
            continue;
        }
        let (command, args) = line.split_once(' ').unwrap_or((line, ""));
        let at = |err: SigilError| SigilError::RuleCompile(format!("line {}: {}", lineno + 1, err));

        if command == "Exclude" {
            set.exclude = PortList::parse(args).map_err(at)?;
            continue;
        }
        if command == "Probe" {
            if let Some(done) = current.take() {
                set.probes.push(done);
            }
            current = Some(parse_probe_line(args).map_err(at)?);
            continue;
        }

        let Some(probe) = current.as_mut() else {
            return Err(at(SigilError::RuleCompile(format!(
                "`{}` before any Probe",
                command
            ))));
        };
        match command {
            "match" | "softmatch" => {
                if let Some(m) = Match::parse_directive(args, command == "softmatch").map_err(at)? {
                    probe.matches.push(m);
                }
            }
            "ports" => probe.ports = PortList::parse(args).map_err(at)?,
            "sslports" => probe.ssl_ports = PortList::parse(args).map_err(at)?,
            "rarity" => probe.rarity = parse_int(args).map_err(at)?,
            "totalwaitms" | "tcpwrappedms" => {
                parse_int::<u64>(args).map_err(at)?;
            }
            "fallback" => probe.fallback = Some(parse_fallback(args).map_err(at)?),
            other => debug!(directive = other, "ignoring unknown probe directive"),
        }
    }
    if let Some(done) = current.take() {
        set.probes.push(done);
    }
    Ok(set)
}

fn parse_probe_line(args: &str) -> SigilResult<Probe> {
    let caps = PROBE_LINE
        .captures(args)
        .ok_or_else(|| SigilError::RuleCompile(format!("malformed Probe: {}", args)))?;
    let protocol = Protocol::parse(&caps[1])?;
    let payload = unescape_payload(&caps[3])?;
    Ok(Probe::new(protocol, &caps[2], payload))
}

fn parse_int<T: std::str::FromStr>(args: &str) -> SigilResult<T> {
    args.trim()
        .parse()
        .map_err(|_| SigilError::RuleCompile(format!("expected a number, got `{}`", args)))
}

/// Only the first of several comma separated fallbacks is kept.
fn parse_fallback(args: &str) -> SigilResult<String> {
    let first = args.split(',').next().unwrap_or_default().trim();
    if first.is_empty()
        || !first
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/'))
    {
        return Err(SigilError::RuleCompile(format!("malformed fallback: {}", args)));
    }
    Ok(first.to_string())
}

#[derive(Debug, Deserialize)]
struct ProbeRecord {
    name: String,
    #[serde(default)]
    protocol: Protocol,
    #[serde(default)]
    rarity: u8,
    #[serde(default)]
    ports: Vec<u16>,
    #[serde(default)]
    ssl_ports: Vec<u16>,
    #[serde(default)]
    matches: Vec<MatchRecord>,
    #[serde(default)]
    fallback: String,
    #[serde(default)]
    probe_string: String,
}

#[derive(Debug, Deserialize)]
struct ProbesFile {
    #[serde(default)]
    probes: Vec<ProbeRecord>,
    #[serde(default)]
    services: BTreeMap<String, String>,
}

/// Parse the JSON corpus (optionally gzip compressed). Probe strings are
/// taken as their UTF-8 bytes.
pub fn parse_probes_json(data: &[u8]) -> SigilResult<ProbeSet> {
    let data = maybe_decompress(data)?;
    let file: ProbesFile = unmarshal_json(&data)?;

    let mut probes = Vec::with_capacity(file.probes.len());
    for record in file.probes {
        let mut matches = Vec::with_capacity(record.matches.len());
        for m in &record.matches {
            if let Some(m) = Match::from_record(m)? {
                matches.push(m);
            }
        }
        let mut probe = Probe {
            name: record.name,
            protocol: record.protocol,
            rarity: record.rarity,
            ports: PortList::from(record.ports),
            ssl_ports: PortList::from(record.ssl_ports),
            matches,
            fallback: None,
            fallback_index: None,
            payload: record.probe_string.into_bytes(),
        };
        if !record.fallback.is_empty() {
            probe.fallback = Some(record.fallback);
        }
        probes.push(probe);
    }
    Ok(ProbeSet {
        probes,
        exclude: PortList::default(),
        services: file.services,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROBES: &str = r#"
# comment
Exclude T:9100-9107

Probe TCP NULL q||
totalwaitms 6000
match ssh m|^SSH-([\d.]+)-OpenSSH_([\w.]+)\r?\n|i p/OpenSSH/ v/$2/ i/protocol $1/
softmatch ftp m|^220[- ]|

Probe TCP GetRequest q|GET / HTTP/1.0\r\n\r\n|
rarity 1
ports 80,8000-8010
sslports 443
fallback GenericLines,NULL
match http m|^HTTP/1\.[01] \d\d\d|

Probe UDP DNSStatusRequest q|\0\0\x10\0\0\0\0\0\0\0\0\0|
rarity 1
ports 53
match domain m|^\0\0\x90\x04\0\0\0\0\0\0\0\0| p/generic dns response: NOTIMP/
"#;

    #[test]
    fn parses_probe_file() {
        let set = parse_probe_file(PROBES).unwrap();
        assert_eq!(set.probes.len(), 3);
        assert!(set.exclude.contains(9101));

        let null = &set.probes[0];
        assert_eq!(null.name, "TCP_NULL");
        assert!(null.payload.is_empty());
        assert_eq!(null.matches.len(), 2);
        assert!(null.matches[1].soft);

        let get = &set.probes[1];
        assert_eq!(get.rarity, 1);
        assert!(get.ports.contains(8005));
        assert!(get.ssl_ports.contains(443));
        assert_eq!(get.fallback.as_deref(), Some("GenericLines"));
        assert_eq!(get.payload, b"GET / HTTP/1.0\r\n\r\n");

        let dns = &set.probes[2];
        assert_eq!(dns.protocol, Protocol::Udp);
        assert_eq!(dns.payload.len(), 12);
        assert_eq!(dns.matches[0].service, "dns");
    }

    #[test]
    fn rejects_bad_directives() {
        assert!(parse_probe_file("match http m|x|\n").is_err());
        assert!(parse_probe_file("Probe SCTP x q||\n").is_err());
        assert!(parse_probe_file("Probe TCP NULL q||\nrarity high\n").is_err());
    }

    #[test]
    fn parses_json_corpus() {
        let data = br#"{
            "probes": [{
                "name": "TCP_GetRequest", "protocol": "TCP", "rarity": 1,
                "ports": [80, 8080], "ssl_ports": [443], "fallback": "NULL",
                "probe_string": "GET / HTTP/1.0\r\n\r\n",
                "matches": [
                    {"soft": false, "service": "http", "pattern": "^HTTP/1\\.[01] \\d\\d\\d .*Server: nginx/([\\d.]+)",
                     "options": "s", "version_info": {"product_name": "nginx", "version": "$1"}},
                    {"service": "http", "pattern": "^http"}
                ]
            }],
            "services": {"80": "http"}
        }"#;
        let set = parse_probes_json(data).unwrap();
        let probe = &set.probes[0];
        assert_eq!(probe.fallback.as_deref(), Some("NULL"));
        assert!(probe.ssl_ports.contains(443));

        let fp = probe.match_response(b"HTTP/1.1 200 OK\r\nServer: nginx/1.24.0\r\n\r\n");
        assert_eq!(fp.version, "1.24.0");
        // no options: case sensitive
        assert!(!probe.matches[1].is_match(b"HTTP/1.1"));
        assert_eq!(set.services.get("80").map(String::as_str), Some("http"));
    }
}
