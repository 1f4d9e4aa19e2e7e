//! Port to service table used for guessing
//!
//! A built-in table of well-known ports is always available; an
//! `nmap-services.json` corpus or the `services` map of a probes corpus can
//! replace or extend it.

use std::collections::{BTreeMap, HashMap};

use serde::Deserialize;
use sigil_common::resources::{maybe_decompress, unmarshal_json};
use sigil_common::SigilResult;
use tracing::info;

use crate::protocol::fix_service_name;

/// Well-known TCP ports, organised by service family.
const WELL_KNOWN: &[(u16, &str)] = &[
    // File transfer
    (20, "ftp-data"),
    (21, "ftp"),
    (69, "tftp"),
    (873, "rsync"),
    (989, "ftps-data"),
    (990, "ftps"),
    (2049, "nfs"),
    // Remote access
    (22, "ssh"),
    (23, "telnet"),
    (512, "exec"),
    (513, "login"),
    (3389, "ms-wbt-server"),
    (5900, "vnc"),
    (5901, "vnc-1"),
    (5902, "vnc-2"),
    (5985, "wsman"),
    (5986, "wsmans"),
    // Mail
    (25, "smtp"),
    (109, "pop2"),
    (110, "pop3"),
    (143, "imap"),
    (465, "smtps"),
    (587, "submission"),
    (993, "imaps"),
    (995, "pop3s"),
    // Name and directory services
    (53, "domain"),
    (88, "kerberos-sec"),
    (389, "ldap"),
    (636, "ldapssl"),
    (3268, "globalcatLDAP"),
    // Web
    (80, "http"),
    (443, "https"),
    (591, "http-alt"),
    (3000, "ppp"),
    (8000, "http-alt"),
    (8008, "http"),
    (8080, "http-proxy"),
    (8081, "blackice-icecap"),
    (8443, "https-alt"),
    (8888, "sun-answerbook"),
    (9443, "tungsten-https"),
    // Windows and RPC
    (111, "rpcbind"),
    (135, "msrpc"),
    (137, "netbios-ns"),
    (139, "netbios-ssn"),
    (445, "microsoft-ds"),
    // Management
    (161, "snmp"),
    (162, "snmptrap"),
    (623, "oob-ws-http"),
    (2375, "docker"),
    (2376, "docker-s"),
    (6443, "sun-sr-https"),
    (10250, "kubelet"),
    // Databases and caches
    (1433, "ms-sql-s"),
    (1521, "oracle-tns"),
    (3306, "mysql"),
    (5432, "postgresql"),
    (5984, "couchdb"),
    (6379, "redis"),
    (7474, "neo4j"),
    (9042, "cassandra"),
    (9200, "elasticsearch"),
    (11211, "memcache"),
    (27017, "mongod"),
    (50000, "ibm-db2"),
    // Messaging
    (1883, "mqtt"),
    (5672, "amqp"),
    (6667, "irc"),
    (9092, "kafka"),
    (15672, "rabbitmq"),
    // Proxies and tunnels
    (1080, "socks"),
    (1194, "openvpn"),
    (1723, "pptp"),
    (3128, "squid-http"),
    // Misc
    (79, "finger"),
    (119, "nntp"),
    (123, "ntp"),
    (179, "bgp"),
    (514, "shell"),
    (548, "afp"),
    (631, "ipp"),
    (3690, "svnserve"),
    (5060, "sip"),
    (9418, "git"),
];

#[derive(Debug, Deserialize)]
struct ServiceEntry {
    name: String,
    port: u32,
    #[serde(default)]
    protocol: String,
    #[serde(default)]
    probability: f64,
}

#[derive(Debug, Deserialize)]
struct ServicesFile {
    #[serde(default)]
    services: Vec<ServiceEntry>,
}

/// Port to service-name map. Names are stored already normalised with
/// [`fix_service_name`].
#[derive(Debug, Clone, Default)]
pub struct ServiceTable {
    tcp: HashMap<u16, String>,
    udp: HashMap<u16, String>,
}

impl ServiceTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in well-known port table.
    pub fn builtin() -> Self {
        let mut table = Self::new();
        for (port, name) in WELL_KNOWN {
            table.insert(*port, name, false);
        }
        table
    }

    /// Load `nmap-services.json` (`{services: [{name, port, protocol,
    /// probability}]}`). Per port, the most probable entry wins.
    pub fn from_json(data: &[u8]) -> SigilResult<Self> {
        let data = maybe_decompress(data)?;
        let file: ServicesFile = unmarshal_json(&data)?;

        let mut best: HashMap<(u16, bool), (f64, String)> = HashMap::new();
        for entry in file.services {
            let Ok(port) = u16::try_from(entry.port) else {
                continue;
            };
            let udp = entry.protocol.eq_ignore_ascii_case("udp");
            let slot = best.entry((port, udp)).or_insert((f64::MIN, String::new()));
            if entry.probability > slot.0 {
                *slot = (entry.probability, entry.name);
            }
        }

        let mut table = Self::new();
        for ((port, udp), (_, name)) in best {
            table.insert(port, &name, udp);
        }
        info!("Loaded {} nmap services", table.len());
        Ok(table)
    }

    /// Extend with the `{port: name}` map carried by a probes corpus. Existing
    /// entries are kept.
    pub fn extend_from_map(&mut self, services: &BTreeMap<String, String>) {
        for (port, name) in services {
            if let Ok(port) = port.trim().parse::<u16>() {
                if !self.tcp.contains_key(&port) {
                    self.insert(port, name, false);
                }
            }
        }
    }

    pub fn insert(&mut self, port: u16, name: &str, udp: bool) {
        let map = if udp { &mut self.udp } else { &mut self.tcp };
        map.insert(port, fix_service_name(name));
    }

    pub fn len(&self) -> usize {
        self.tcp.len() + self.udp.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Service name for a port, `None` when unknown. UDP lookups fall back to
    /// the TCP table.
    pub fn guess(&self, port: u16, udp: bool) -> Option<&str> {
        let name = if udp {
            self.udp.get(&port).or_else(|| self.tcp.get(&port))
        } else {
            self.tcp.get(&port)
        };
        name.map(String::as_str).filter(|n| *n != "unknown")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_ports() {
        let table = ServiceTable::builtin();
        assert_eq!(table.guess(3306, false), Some("mysql"));
        assert_eq!(table.guess(53, false), Some("dns"));
        assert_eq!(table.guess(3268, false), Some("globalcatldap"));
        assert_eq!(table.guess(1, false), None);
    }

    #[test]
    fn json_prefers_probable_entries() {
        let data = br#"{"services": [
            {"name": "http", "port": 80, "protocol": "tcp", "probability": 0.48},
            {"name": "www", "port": 80, "protocol": "tcp", "probability": 0.01},
            {"name": "netbios_ns", "port": 137, "protocol": "udp", "probability": 0.36},
            {"name": "", "port": 9, "protocol": "tcp", "probability": 0.1}
        ]}"#;
        let table = ServiceTable::from_json(data).unwrap();
        assert_eq!(table.guess(80, false), Some("http"));
        assert_eq!(table.guess(137, true), Some("netbios-ns"));
        assert_eq!(table.guess(137, false), None);
        assert_eq!(table.guess(9, false), None);
    }

    #[test]
    fn corpus_map_does_not_override() {
        let mut table = ServiceTable::builtin();
        let map = BTreeMap::from([
            ("3306".to_string(), "mariadb".to_string()),
            ("7001".to_string(), "afs3-callback".to_string()),
        ]);
        table.extend_from_map(&map);
        assert_eq!(table.guess(3306, false), Some("mysql"));
        assert_eq!(table.guess(7001, false), Some("afs3-callback"));
    }
}
