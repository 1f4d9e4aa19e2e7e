//! Probe execution
//!
//! A scan walks the selected probes, sends each through a [`ProbeSender`] and
//! feeds the reply to the probe's match group. Per probe the outcome is one of
//! [`ScanStatus`]; the first `Closed` or `Matched` ends the scan. The set of
//! probes already sent lives on the stack of a single scan.

use std::collections::HashSet;

use async_trait::async_trait;
use sigil_common::{SigilError, SigilResult};
use tracing::{debug, instrument};

use crate::catalog::{Nmap, HTTP_PROBE};
use crate::fingerprint::FingerPrint;
use crate::probe::Protocol;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanStatus {
    /// Refused or unreachable.
    Closed,
    /// Reachable, but no rule fired.
    Open,
    NotMatched,
    Matched,
}

#[derive(Debug, Clone, Default)]
pub struct Response {
    pub raw: Vec<u8>,
    /// Whether the bytes were read over TLS.
    pub tls: bool,
    pub fingerprint: FingerPrint,
}

/// Transport seam for probes. Returns the reply and whether TLS was actually
/// used.
#[async_trait]
pub trait ProbeSender: Send + Sync {
    async fn send_probe(
        &self,
        host: &str,
        port: u16,
        data: &[u8],
        tls: bool,
        protocol: Protocol,
    ) -> SigilResult<(Vec<u8>, bool)>;
}

/// Split `"U:161"` / `"443"` into a port and a UDP flag.
pub fn parse_port(port: &str) -> Option<(u16, bool)> {
    let port = port.trim();
    let (rest, udp) = match port.get(..2) {
        Some(prefix) if prefix.eq_ignore_ascii_case("U:") => (&port[2..], true),
        _ => (port, false),
    };
    match rest.trim().parse::<u16>() {
        Ok(0) | Err(_) => None,
        Ok(n) => Some((n, udp)),
    }
}

fn is_closed_error(err: &SigilError, protocol: Protocol) -> bool {
    if err.is_closed() {
        return true;
    }
    let message = err.to_string().to_lowercase();
    ["connection refused", "no route to host", "network is unreachable"]
        .iter()
        .any(|needle| message.contains(needle))
        || (protocol == Protocol::Udp && message.contains("refused"))
}

type Outcome = (ScanStatus, Option<Response>);

impl Nmap {
    /// Scan `host:port`. `port` may carry a `U:` prefix to select UDP probes.
    #[instrument(skip(self, sender), fields(probes = self.len()))]
    pub async fn scan(
        &self,
        host: &str,
        port: &str,
        level: u8,
        sender: &dyn ProbeSender,
    ) -> Outcome {
        let Some((port, udp)) = parse_port(port) else {
            return (ScanStatus::NotMatched, None);
        };
        let mut used = HashSet::new();

        if udp {
            let probes = self.udp_probes(port, level);
            return self.run_probes(host, port, sender, &mut used, &probes).await;
        }
        if self.is_excluded(port) {
            debug!(port, "port excluded from probing");
            return (ScanStatus::NotMatched, None);
        }

        let probes = self.select_probes(port, level);
        let Some((first, rest)) = probes.split_first() else {
            return (ScanStatus::NotMatched, None);
        };
        let (status, response) = self
            .run_probes(host, port, sender, &mut used, std::slice::from_ref(first))
            .await;
        if matches!(status, ScanStatus::Closed | ScanStatus::Matched) {
            return (status, response);
        }

        let (rest_status, rest_response) =
            self.run_probes(host, port, sender, &mut used, rest).await;
        match rest_status {
            ScanStatus::NotMatched if status == ScanStatus::Open => (status, response),
            _ => (rest_status, rest_response),
        }
    }

    async fn run_probes(
        &self,
        host: &str,
        port: u16,
        sender: &dyn ProbeSender,
        used: &mut HashSet<usize>,
        probes: &[usize],
    ) -> Outcome {
        let mut open: Option<Response> = None;
        let mut seen_open = false;

        for &idx in probes {
            if !used.insert(idx) {
                continue;
            }
            let tls = self.probes[idx].ssl_ports.contains(port);
            let (status, response) = self.send(host, port, tls, sender, idx).await;
            match status {
                ScanStatus::Closed => return (ScanStatus::Closed, None),
                ScanStatus::Matched => {
                    let is_ssl = response
                        .as_ref()
                        .is_some_and(|r| r.fingerprint.service == "ssl");
                    if is_ssl {
                        if let Some(upgraded) = self.ssl_second_pass(host, port, sender, used).await {
                            return (ScanStatus::Matched, Some(upgraded));
                        }
                    }
                    return (ScanStatus::Matched, response);
                }
                ScanStatus::Open => {
                    seen_open = true;
                    if response.is_some() {
                        open = response;
                    }
                }
                ScanStatus::NotMatched => {}
            }
        }

        if seen_open {
            (ScanStatus::Open, open)
        } else {
            (ScanStatus::NotMatched, None)
        }
    }

    /// A TLS service was detected: try to identify what runs inside it.
    async fn ssl_second_pass(
        &self,
        host: &str,
        port: u16,
        sender: &dyn ProbeSender,
        used: &mut HashSet<usize>,
    ) -> Option<Response> {
        let mut found: Option<Response> = None;
        for &idx in &self.ssl_second {
            if !used.insert(idx) {
                continue;
            }
            let tls = self.probes[idx].ssl_ports.contains(port);
            match self.send(host, port, tls, sender, idx).await {
                (ScanStatus::Closed, _) => break,
                (ScanStatus::Matched, response) => {
                    found = response;
                    break;
                }
                _ => {}
            }
        }

        let still_ssl = found
            .as_ref()
            .map_or(true, |r| r.fingerprint.service == "ssl");
        if still_ssl {
            let http = self.index(HTTP_PROBE)?;
            found = match self.send(host, port, true, sender, http).await {
                (ScanStatus::Matched, response) => response,
                _ => None,
            };
        }

        let mut response = found?;
        match response.fingerprint.service.as_str() {
            "ssl" => None,
            "http" => {
                response.fingerprint.service = "https".to_string();
                Some(response)
            }
            _ => Some(response),
        }
    }

    /// Send one probe and classify the outcome.
    async fn send(
        &self,
        host: &str,
        port: u16,
        tls: bool,
        sender: &dyn ProbeSender,
        idx: usize,
    ) -> Outcome {
        let probe = &self.probes[idx];
        let request = probe.build_request(host);
        debug!(probe = %probe.name, port, tls, "sending probe");

        let (raw, tls) = match sender
            .send_probe(host, port, &request, tls, probe.protocol)
            .await
        {
            Ok(reply) => reply,
            Err(err) if is_closed_error(&err, probe.protocol) => {
                debug!(probe = %probe.name, "closed: {}", err);
                return (ScanStatus::Closed, None);
            }
            Err(err) => {
                debug!(probe = %probe.name, "no reply: {}", err);
                return (ScanStatus::Open, None);
            }
        };

        let fingerprint = self.fingerprint(&raw, tls, idx);
        let status = if fingerprint.is_matched() {
            debug!(probe = %probe.name, service = %fingerprint.service, "probe matched");
            ScanStatus::Matched
        } else {
            ScanStatus::Open
        };
        (
            status,
            Some(Response {
                raw,
                tls,
                fingerprint,
            }),
        )
    }

    /// Match `raw` against probe `idx`, following its fallback chain while no
    /// service is found.
    pub fn fingerprint(&self, raw: &[u8], tls: bool, idx: usize) -> FingerPrint {
        let probe = &self.probes[idx];
        let mut fp = probe.match_response(raw);

        let mut visited = HashSet::from([idx]);
        let mut next = probe.fallback_index;
        while let Some(fallback) = next {
            if fp.is_matched() || !visited.insert(fallback) {
                break;
            }
            fp = self.probes[fallback].match_response(raw);
            next = self.probes[fallback].fallback_index;
        }

        if tls && fp.service == "http" {
            fp.service = "https".to_string();
        }
        fp.probe_name.clone_from(&probe.name);
        fp
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::ServiceTable;
    use std::sync::Mutex;

    const PROBES: &str = r#"
Probe TCP NULL q||
match ssh m|^SSH-([\d.]+)-OpenSSH_([\w.]+)\r?\n| p/OpenSSH/ v/$2/ i/protocol $1/

Probe TCP GetRequest q|GET / HTTP/1.0\r\nHost: {Host}\r\n\r\n|
rarity 1
ports 80
match ssl m|^\x15\x03[\x00-\x04]\0\x02| i/TLS alert/
match http m|^HTTP/1\.[01] \d\d\d .*\r\nServer: nginx/([\d.]+)|s p/nginx/ v/$1/

Probe TCP GenericLines q|\r\n\r\n|
rarity 1
ports 21

Probe TCP HTTPOptions q|OPTIONS / HTTP/1.0\r\n\r\n|
rarity 2
ports 80
fallback GetRequest

Probe TCP TerminalServerCookie q|\x03\0\0*%\xe0|
rarity 7
ports 3389

Probe UDP DNSStatusRequest q|\0\0\x10\0\0\0\0\0\0\0\0\0|
rarity 1
ports 53
match domain m|^\0\0\x90\x04| p/generic dns response: NOTIMP/
"#;

    const HTTP_REPLY: &[u8] = b"HTTP/1.1 200 OK\r\nServer: nginx/1.25.3\r\n\r\n";

    /// Scripted peer that records every probe it receives.
    struct Peer<F> {
        reply: F,
        log: Mutex<Vec<(Vec<u8>, bool, Protocol)>>,
    }

    impl<F> Peer<F>
    where
        F: Fn(&[u8], bool, Protocol) -> SigilResult<Vec<u8>> + Send + Sync,
    {
        fn new(reply: F) -> Self {
            Self {
                reply,
                log: Mutex::new(Vec::new()),
            }
        }

        fn sent(&self) -> Vec<(Vec<u8>, bool, Protocol)> {
            self.log.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl<F> ProbeSender for Peer<F>
    where
        F: Fn(&[u8], bool, Protocol) -> SigilResult<Vec<u8>> + Send + Sync,
    {
        async fn send_probe(
            &self,
            _host: &str,
            _port: u16,
            data: &[u8],
            tls: bool,
            protocol: Protocol,
        ) -> SigilResult<(Vec<u8>, bool)> {
            self.log.lock().unwrap().push((data.to_vec(), tls, protocol));
            (self.reply)(data, tls, protocol).map(|r| (r, tls))
        }
    }

    fn nmap() -> Nmap {
        Nmap::from_probe_file(PROBES, ServiceTable::builtin()).unwrap()
    }

    #[tokio::test]
    async fn banner_on_null_probe_ends_scan() {
        let peer = Peer::new(|data: &[u8], _, _| {
            Ok(if data.is_empty() {
                b"SSH-2.0-OpenSSH_9.6\r\n".to_vec()
            } else {
                Vec::new()
            })
        });
        let (status, response) = nmap().scan("10.0.0.5", "22", 1, &peer).await;
        assert_eq!(status, ScanStatus::Matched);
        let fp = response.unwrap().fingerprint;
        assert_eq!(fp.service, "ssh");
        assert_eq!(fp.version, "9.6");
        assert_eq!(fp.info, "protocol 2.0");
        assert_eq!(fp.probe_name, "TCP_NULL");
        assert_eq!(peer.sent().len(), 1);
    }

    #[tokio::test]
    async fn tls_alert_upgrades_to_https() {
        let peer = Peer::new(|data: &[u8], tls, _| {
            Ok(match (data.starts_with(b"GET"), tls) {
                (true, false) => b"\x15\x03\x01\x00\x02\x02\x46".to_vec(),
                (true, true) => HTTP_REPLY.to_vec(),
                _ => Vec::new(),
            })
        });
        let (status, response) = nmap().scan("example.com", "443", 1, &peer).await;
        assert_eq!(status, ScanStatus::Matched);
        let response = response.unwrap();
        assert!(response.tls);
        assert_eq!(response.fingerprint.service, "https");
        assert_eq!(response.fingerprint.product_name, "nginx");

        let sent = peer.sent();
        let gets: Vec<_> = sent.iter().filter(|(d, _, _)| d.starts_with(b"GET")).collect();
        assert_eq!(gets.len(), 2);
        assert!(!gets[0].1 && gets[1].1);
        assert!(gets[0].0.windows(11).any(|w| w == b"example.com"));
    }

    #[tokio::test]
    async fn no_probe_is_sent_twice() {
        let peer = Peer::new(|_: &[u8], _, _| Ok(b"\x00garbage".to_vec()));
        let (status, _) = nmap().scan("10.0.0.5", "80", 9, &peer).await;
        assert_eq!(status, ScanStatus::Open);

        let sent = peer.sent();
        let mut payloads: Vec<_> = sent.iter().map(|(d, _, _)| d.clone()).collect();
        let total = payloads.len();
        payloads.sort();
        payloads.dedup();
        assert_eq!(payloads.len(), total);
        assert_eq!(total, 5);
    }

    #[tokio::test]
    async fn refused_is_closed() {
        let peer = Peer::new(|_: &[u8], _, _| {
            Err(SigilError::ConnectionRefused("connection refused".into()))
        });
        let (status, response) = nmap().scan("10.0.0.5", "80", 1, &peer).await;
        assert_eq!(status, ScanStatus::Closed);
        assert!(response.is_none());
        assert_eq!(peer.sent().len(), 1);
    }

    #[tokio::test]
    async fn timeouts_leave_port_open() {
        let peer = Peer::new(|_: &[u8], _, _| Err(SigilError::Timeout("deadline has elapsed".into())));
        let (status, _) = nmap().scan("10.0.0.5", "3306", 1, &peer).await;
        assert_eq!(status, ScanStatus::Open);
    }

    #[tokio::test]
    async fn udp_port_strings_select_udp_probes() {
        let peer = Peer::new(|_: &[u8], _, protocol| {
            assert_eq!(protocol, Protocol::Udp);
            Ok(b"\x00\x00\x90\x04\x00\x00".to_vec())
        });
        let (status, response) = nmap().scan("10.0.0.53", "U:53", 1, &peer).await;
        assert_eq!(status, ScanStatus::Matched);
        assert_eq!(response.unwrap().fingerprint.service, "dns");
        assert_eq!(peer.sent().len(), 1);
    }

    #[test]
    fn fallback_chain_reuses_match_group() {
        let nmap = nmap();
        let idx = nmap.index("TCP_HTTPOptions").unwrap();
        let fp = nmap.fingerprint(HTTP_REPLY, false, idx);
        assert_eq!(fp.service, "http");
        assert_eq!(fp.probe_name, "TCP_HTTPOptions");
        assert_eq!(nmap.fingerprint(HTTP_REPLY, true, idx).service, "https");
    }

    #[test]
    fn port_strings() {
        assert_eq!(parse_port("443"), Some((443, false)));
        assert_eq!(parse_port("U:137"), Some((137, true)));
        assert_eq!(parse_port("u:53"), Some((53, true)));
        assert_eq!(parse_port("0"), None);
        assert_eq!(parse_port("http"), None);
    }
}
