//! Local additions on top of the probe corpus
//!
//! Extra match rules for banners the stock corpus misses, and port hints /
//! fallback overrides that make common ports resolve with fewer probes. Each
//! entry is applied only when its probe exists in the loaded corpus.

use tracing::{debug, warn};

use crate::catalog::{Nmap, SSL_PROBES};

const CUSTOM_MATCHES: &[(&str, &str)] = &[
    ("TCP_GetRequest", r"echo m|^GET / HTTP/1.0\r\n\r\n$|s"),
    ("TCP_GetRequest", r"mongodb m|.*It looks like you are trying to access MongoDB.*|s p/MongoDB/"),
    ("TCP_GetRequest", r"http m|^HTTP/1\.[01] \d\d\d (?:[^\r\n]+\r\n)*?Server: ([^\r\n]+)| p/$1/"),
    ("TCP_GetRequest", r"http m|^HTTP/1\.[01] \d\d\d|"),
    ("TCP_NULL", r"mysql m|.\x00\x00..j\x04Host '.*' is not allowed to connect to this MariaDB server| p/MariaDB/"),
    ("TCP_NULL", r"mysql m|.\x00\x00..j\x04Host '.*' is not allowed to connect to this MySQL server| p/MySQL/"),
    ("TCP_NULL", r"mysql m|.\x00\x00\x00\x0a(\d+\.\d+\.\d+)\x00.*caching_sha2_password\x00| p/MariaDB/ v/$1/"),
    ("TCP_NULL", r"mysql m|.\x00\x00\x00\x0a([\d.-]+)-MariaDB\x00.*mysql_native_password\x00| p/MariaDB/ v/$1/"),
    ("TCP_NULL", r"redis m|-DENIED Redis is running in.*| p/Redis/ i/Protected mode/"),
    ("TCP_NULL", r"telnet m|^.*Welcome to visit (.*) series router!.*|s p/$1 Router/"),
    ("TCP_NULL", r"telnet m|^Username: ??|"),
    ("TCP_NULL", r"telnet m|^.*Telnet service is disabled or Your telnet session has expired due to inactivity.*|s i/Disabled/"),
    ("TCP_NULL", r"telnet m|^.*Telnet connection from (.*) refused.*|s i/Refused/"),
    ("TCP_NULL", r"telnet m|^.*Command line is locked now, please retry later.*\x0d\x0a\x0d\x0a|s i/Locked/"),
    ("TCP_NULL", r"telnet m|^.*Warning: Telnet is not a secure protocol, and it is recommended to use Stelnet.*|s"),
    ("TCP_NULL", r"telnet m|^telnetd:|s"),
    ("TCP_NULL", r"telnet m|^.*Quopin CLI for (.*)\x0d\x0a\x0d\x0a|s p/$1/"),
    ("TCP_NULL", r"telnet m|^\x0d\x0aHello, this is FRRouting \(version ([\d.]+)\).*|s p/FRRouting/ v/$1/"),
    ("TCP_NULL", r"telnet m|^.*User Access Verification.*Username:|s"),
    ("TCP_NULL", r"telnet m|^Connection failed.  Windows CE Telnet Service cannot accept anymore concurrent users.|s o/Windows/"),
    ("TCP_NULL", r"telnet m|^\x0d\x0a\x0d\x0aWelcome to the host.\x0d\x0a.*|s o/Windows/"),
    ("TCP_NULL", r"telnet m|^.*Welcome Visiting Huawei Home Gateway\x0d\x0aCopyright by Huawei Technologies Co., Ltd.*Login:|s p/Huawei/"),
    ("TCP_NULL", r"telnet m|^..\x01..\x03..\x18..\x1f|s p/Huawei/"),
    ("TCP_NULL", r"smtp m|^220 ([a-z0-1.-]+).*| h/$1/"),
    ("TCP_NULL", r"ftp m|^220 H3C Small-FTP Server Version ([\d.]+).* | p/H3C Small-FTP/ v/$1/"),
    ("TCP_NULL", r"ftp m|^421[- ]Service not available..*|"),
    ("TCP_NULL", r"ftp m|^220[- ].*filezilla.*|i p/FileZilla/"),
    (
        "TCP_TerminalServerCookie",
        r"ms-wbt-server m|^\x03\0\0\x13\x0e\xd0\0\0\x124\0\x02.*\0\x02\0\0\0| p/Microsoft Terminal Services/ o/Windows/ cpe:/o:microsoft:windows/a",
    ),
    (
        "TCP_redis-server",
        r"redis m|^.*redis_version:([.\d]+)\n|s p/Redis key-value store/ v/$1/ cpe:/a:redislabs:redis:$1/",
    ),
    ("TCP_redis-server", r"redis m|^-NOAUTH Authentication required.|s p/Redis key-value store/"),
];

const TLS_MAIL_PORTS: &[u16] = &[993, 994, 995, 465];
const ALT_RDP_PORTS: &[u16] = &[3390, 33890, 33900];
const PROXY_PORTS: &[u16] = &[7890, 7891, 4000, 2022, 6000, 7000];
const HTTP_PORTS: &[u16] = &[80, 443, 8080, 8443, 8000, 8888, 9090];
const SSL_FIRST_PORTS: &[u16] = &[443, 8443, 3389];

const FALLBACKS: &[(&str, &str)] = &[
    ("TCP_GenericLines", "TCP_NULL"),
    ("TCP_GetRequest", "TCP_NULL"),
    ("TCP_TerminalServerCookie", "TCP_GetRequest"),
    ("TCP_TerminalServer", "TCP_GetRequest"),
];

pub(crate) fn add_custom_matches(nmap: &mut Nmap) {
    let mut added = 0;
    for (probe, directive) in CUSTOM_MATCHES {
        match nmap.add_match(probe, directive) {
            Ok(true) => added += 1,
            Ok(false) => {}
            Err(err) => warn!(probe, "custom match rejected: {}", err),
        }
    }
    debug!("Added {} custom nmap matches", added);
}

pub(crate) fn optimize(nmap: &mut Nmap) {
    if let Some(generic) = nmap.probe_mut("TCP_GenericLines") {
        for &port in TLS_MAIL_PORTS {
            generic.ssl_ports.push(port);
        }
    }
    for &port in TLS_MAIL_PORTS {
        nmap.prepend_port_probe(port, "TCP_GenericLines");
    }
    for &port in ALT_RDP_PORTS {
        nmap.append_port_probe(port, "TCP_TerminalServer");
        nmap.append_port_probe(port, "TCP_TerminalServerCookie");
    }
    for &port in PROXY_PORTS {
        nmap.append_port_probe(port, "TCP_Socks5");
    }
    for &port in HTTP_PORTS {
        nmap.prepend_port_probe(port, "TCP_GetRequest");
    }
    for &port in SSL_FIRST_PORTS {
        for name in SSL_PROBES.iter().rev() {
            nmap.prepend_port_probe(port, name);
        }
    }

    for (probe, fallback) in FALLBACKS {
        if nmap.index(fallback).is_none() {
            continue;
        }
        if let Some(p) = nmap.probe_mut(probe) {
            p.fallback = Some((*fallback).to_string());
        }
    }
}
