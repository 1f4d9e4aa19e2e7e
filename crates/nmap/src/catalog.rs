//! Loaded probe catalog
//!
//! The catalog owns every probe and the lookup tables built from them. It is
//! frozen after construction: custom matches and port hints are applied once
//! in [`Nmap::new`], fallbacks are resolved to indices, and scans only read.

use std::collections::{HashMap, HashSet};

use sigil_common::SigilResult;
use tracing::{info, warn};

use crate::custom;
use crate::matcher::Match;
use crate::parser::{parse_probe_file, parse_probes_json, ProbeSet};
use crate::probe::{PortList, Probe, Protocol};
use crate::services::ServiceTable;

pub(crate) const SSL_PROBES: &[&str] = &["TCP_TLSSessionReq", "TCP_SSLSessionReq", "TCP_SSLv23SessionReq"];
pub(crate) const SSL_SECOND_PROBES: &[&str] = &["TCP_TerminalServerCookie", "TCP_TerminalServer"];
pub(crate) const HTTP_PROBE: &str = "TCP_GetRequest";

#[derive(Debug, Clone, Default)]
pub struct Nmap {
    pub(crate) probes: Vec<Probe>,
    by_name: HashMap<String, usize>,
    exclude: PortList,
    port_front: HashMap<u16, Vec<usize>>,
    port_back: HashMap<u16, Vec<usize>>,
    pub(crate) ssl_probes: Vec<usize>,
    pub(crate) ssl_second: Vec<usize>,
    services: ServiceTable,
}

impl Nmap {
    /// Build the catalog. Probes without a rarity are treated as rarity 1 so
    /// that `TCP_NULL` takes part in the rarity walk.
    pub fn new(set: ProbeSet, mut services: ServiceTable) -> Self {
        services.extend_from_map(&set.services);
        let mut nmap = Self {
            exclude: set.exclude,
            services,
            ..Default::default()
        };
        for mut probe in set.probes {
            if probe.rarity == 0 {
                probe.rarity = 1;
            }
            if nmap.by_name.contains_key(&probe.name) {
                warn!(probe = %probe.name, "duplicate probe ignored");
                continue;
            }
            nmap.by_name.insert(probe.name.clone(), nmap.probes.len());
            nmap.probes.push(probe);
        }

        custom::add_custom_matches(&mut nmap);
        custom::optimize(&mut nmap);

        nmap.ssl_probes = nmap.indices(SSL_PROBES);
        nmap.ssl_second = nmap.indices(SSL_SECOND_PROBES);
        nmap.resolve_fallbacks();

        info!(
            "Loaded {} nmap probes ({} matches)",
            nmap.probes.len(),
            nmap.probes.iter().map(|p| p.matches.len()).sum::<usize>()
        );
        nmap
    }

    pub fn from_probe_file(text: &str, services: ServiceTable) -> SigilResult<Self> {
        Ok(Self::new(parse_probe_file(text)?, services))
    }

    pub fn from_json(data: &[u8], services: ServiceTable) -> SigilResult<Self> {
        Ok(Self::new(parse_probes_json(data)?, services))
    }

    pub fn len(&self) -> usize {
        self.probes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.probes.is_empty()
    }

    pub fn probes(&self) -> &[Probe] {
        &self.probes
    }

    pub fn probe(&self, name: &str) -> Option<&Probe> {
        self.index(name).map(|i| &self.probes[i])
    }

    pub(crate) fn probe_mut(&mut self, name: &str) -> Option<&mut Probe> {
        let i = self.index(name)?;
        Some(&mut self.probes[i])
    }

    pub fn index(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).copied()
    }

    fn indices(&self, names: &[&str]) -> Vec<usize> {
        names.iter().filter_map(|n| self.index(n)).collect()
    }

    pub fn services(&self) -> &ServiceTable {
        &self.services
    }

    pub fn is_excluded(&self, port: u16) -> bool {
        self.exclude.contains(port)
    }

    /// Append a match directive to an existing probe. Returns false when the
    /// probe is unknown or the pattern is unsupported.
    pub fn add_match(&mut self, probe: &str, directive: &str) -> SigilResult<bool> {
        let Some(probe) = self.probe_mut(probe) else {
            return Ok(false);
        };
        match Match::parse_directive(directive, false)? {
            Some(m) => {
                probe.matches.push(m);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub(crate) fn prepend_port_probe(&mut self, port: u16, name: &str) {
        if let Some(i) = self.index(name) {
            self.port_front.entry(port).or_default().insert(0, i);
        }
    }

    pub(crate) fn append_port_probe(&mut self, port: u16, name: &str) {
        if let Some(i) = self.index(name) {
            self.port_back.entry(port).or_default().push(i);
        }
    }

    /// Fallback names are written bare (`GetRequest`) or qualified
    /// (`TCP_GetRequest`); bare names prefer the TCP probe.
    fn resolve_fallbacks(&mut self) {
        for i in 0..self.probes.len() {
            let Some(name) = self.probes[i].fallback.clone() else {
                continue;
            };
            let index = self
                .index(&name)
                .or_else(|| self.index(&format!("TCP_{}", name)))
                .or_else(|| self.index(&format!("UDP_{}", name)));
            if index.is_none() {
                warn!(probe = %self.probes[i].name, fallback = %name, "unknown fallback probe");
            }
            self.probes[i].fallback_index = index;
        }
    }

    /// TCP probes hinted for `port`: explicit front hints, then probes whose
    /// `ports`/`sslports` cover it ordered by rarity, then back hints.
    pub fn port_probes(&self, port: u16) -> Vec<usize> {
        let mut covering: Vec<usize> = (0..self.probes.len())
            .filter(|&i| self.probes[i].protocol == Protocol::Tcp && self.probes[i].covers(port))
            .collect();
        covering.sort_by_key(|&i| self.probes[i].rarity);

        let front = self.port_front.get(&port).map(Vec::as_slice).unwrap_or_default();
        let back = self.port_back.get(&port).map(Vec::as_slice).unwrap_or_default();
        dedupe(front.iter().copied().chain(covering).chain(back.iter().copied()))
    }

    /// Selection for a TCP scan: rarity 1..=level, then port hints, then the
    /// SSL probes; first occurrence wins.
    pub fn select_probes(&self, port: u16, level: u8) -> Vec<usize> {
        let by_rarity = (1..=level).flat_map(|rarity| {
            self.probes
                .iter()
                .enumerate()
                .filter(move |(_, p)| p.protocol == Protocol::Tcp && p.rarity == rarity)
                .map(|(i, _)| i)
        });
        dedupe(
            by_rarity
                .chain(self.port_probes(port))
                .chain(self.ssl_probes.iter().copied()),
        )
    }

    /// UDP probes with `rarity <= level` that cover `port` or declare no
    /// ports at all.
    pub fn udp_probes(&self, port: u16, level: u8) -> Vec<usize> {
        (0..self.probes.len())
            .filter(|&i| {
                let p = &self.probes[i];
                p.protocol == Protocol::Udp
                    && p.rarity <= level
                    && (p.ports.is_empty() || p.ports.contains(port))
            })
            .collect()
    }

    /// Well-known service for `port`, if any.
    pub fn guess_protocol(&self, port: u16, udp: bool) -> Option<&str> {
        self.services.guess(port, udp)
    }
}

fn dedupe(items: impl IntoIterator<Item = usize>) -> Vec<usize> {
    let mut seen = HashSet::new();
    items.into_iter().filter(|i| seen.insert(*i)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROBES: &str = r#"
Probe TCP NULL q||
match ssh m|^SSH-|

Probe TCP GenericLines q|\r\n\r\n|
rarity 1
ports 21,23

Probe TCP GetRequest q|GET / HTTP/1.0\r\n\r\n|
rarity 1
ports 80,8080
sslports 443
fallback GetRequestNotThere

Probe TCP SSLSessionReq q|\x16\x03\0\0S\x01|
rarity 1
ports 443
match ssl m|^\x16\x03|

Probe TCP TerminalServerCookie q|\x03\0\0*%\xe0|
rarity 7
ports 3389

Probe TCP TerminalServer q|\x03\0\0\x0b\x06\xe0|
rarity 6
ports 3389

Probe TCP redis-server q|*1\r\n$4\r\ninfo\r\n|
rarity 8
ports 6379

Probe UDP DNSStatusRequest q|\0\0\x10\0|
rarity 1
ports 53

Probe UDP Broadcast q|\0|
rarity 9
"#;

    fn nmap() -> Nmap {
        Nmap::from_probe_file(PROBES, ServiceTable::builtin()).unwrap()
    }

    fn names(nmap: &Nmap, idx: &[usize]) -> Vec<String> {
        idx.iter().map(|&i| nmap.probes[i].name.clone()).collect()
    }

    #[test]
    fn selection_is_deduplicated_and_ordered() {
        let nmap = nmap();
        let selected = nmap.select_probes(443, 1);
        let unique: HashSet<_> = selected.iter().collect();
        assert_eq!(unique.len(), selected.len());
        assert_eq!(
            names(&nmap, &selected),
            vec!["TCP_NULL", "TCP_GenericLines", "TCP_GetRequest", "TCP_SSLSessionReq"]
        );

        let rdp = names(&nmap, &nmap.select_probes(3389, 1));
        assert_eq!(
            rdp[4..].to_vec(),
            vec!["TCP_TerminalServer", "TCP_TerminalServerCookie"]
        );
    }

    #[test]
    fn optimised_port_hints() {
        let nmap = nmap();
        assert_eq!(names(&nmap, &nmap.port_probes(993))[0], "TCP_GenericLines");
        assert!(nmap.probe("TCP_GenericLines").unwrap().ssl_ports.contains(993));
        assert_eq!(names(&nmap, &nmap.port_probes(8443))[0], "TCP_SSLSessionReq");
        assert_eq!(
            names(&nmap, &nmap.port_probes(33890)),
            vec!["TCP_TerminalServer", "TCP_TerminalServerCookie"]
        );
    }

    #[test]
    fn fallbacks_resolved() {
        let nmap = nmap();
        let get = nmap.probe("TCP_GetRequest").unwrap();
        assert_eq!(get.fallback.as_deref(), Some("TCP_NULL"));
        assert_eq!(get.fallback_index, nmap.index("TCP_NULL"));
        let cookie = nmap.probe("TCP_TerminalServerCookie").unwrap();
        assert_eq!(cookie.fallback_index, nmap.index("TCP_GetRequest"));
    }

    #[test]
    fn custom_matches_only_on_existing_probes() {
        let nmap = nmap();
        let redis = nmap.probe("TCP_redis-server").unwrap();
        assert_eq!(redis.matches.len(), 2);
        assert!(nmap.probe("TCP_NULL").unwrap().matches.len() > 1);
    }

    #[test]
    fn udp_selection() {
        let nmap = nmap();
        assert_eq!(names(&nmap, &nmap.udp_probes(53, 1)), vec!["UDP_DNSStatusRequest"]);
        assert_eq!(
            names(&nmap, &nmap.udp_probes(53, 9)),
            vec!["UDP_DNSStatusRequest", "UDP_Broadcast"]
        );
        assert!(nmap.udp_probes(161, 1).is_empty());
    }

    #[test]
    fn guesses_from_table() {
        let nmap = nmap();
        assert_eq!(nmap.guess_protocol(3306, false), Some("mysql"));
        assert_eq!(nmap.guess_protocol(40000, false), None);
    }
}
