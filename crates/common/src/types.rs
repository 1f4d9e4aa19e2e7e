//! Transport and port types shared by senders and service engines

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::framework::Framework;

/// Transport used by a [`crate::ServiceSender`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Tcp,
    Udp,
    Tls,
}

impl Network {
    #[inline]
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Network::Tcp => "tcp",
            Network::Udp => "udp",
            Network::Tls => "tls",
        }
    }

    /// `ssl` is accepted as an alias of `tls`; anything unknown is TCP.
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "udp" => Network::Udp,
            "tls" | "ssl" => Network::Tls,
            _ => Network::Tcp,
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A port string such as `"443"` or `"U:137"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PortSpec {
    pub port: u16,
    pub udp: bool,
}

impl PortSpec {
    /// Unparseable numbers fall back to port 80.
    pub fn parse(s: &str) -> Self {
        let s = s.trim();
        let (rest, udp) = match s.get(..2) {
            Some(prefix) if prefix.eq_ignore_ascii_case("U:") => (&s[2..], true),
            _ => (s, false),
        };
        Self {
            port: rest.trim().parse().unwrap_or(80),
            udp,
        }
    }

    /// Network to use given a caller preference; `U:` always wins.
    pub fn network(&self, requested: Network) -> Network {
        if self.udp {
            Network::Udp
        } else {
            requested
        }
    }
}

impl fmt::Display for PortSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.udp {
            write!(f, "U:{}", self.port)
        } else {
            write!(f, "{}", self.port)
        }
    }
}

/// What an engine can do.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EngineCapability {
    pub web: bool,
    pub service: bool,
}

impl EngineCapability {
    pub const WEB: Self = Self {
        web: true,
        service: false,
    };
    pub const SERVICE: Self = Self {
        web: false,
        service: true,
    };
}

/// Outcome of an active service probe.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceResult {
    pub host: String,
    pub port: String,
    pub framework: Option<Framework>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vuln: Option<crate::vuln::Vuln>,
}

impl ServiceResult {
    pub fn new(host: &str, port: &str, framework: Option<Framework>) -> Self {
        Self {
            host: host.to_string(),
            port: port.to_string(),
            framework,
            vuln: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_udp_prefix() {
        let spec = PortSpec::parse("U:137");
        assert_eq!(spec.port, 137);
        assert!(spec.udp);
        assert_eq!(spec.network(Network::Tls), Network::Udp);
        assert_eq!(spec.to_string(), "U:137");

        let spec = PortSpec::parse("u:53");
        assert!(spec.udp);
    }

    #[test]
    fn tcp_ports_keep_requested_network() {
        let spec = PortSpec::parse(" 443 ");
        assert_eq!(spec.port, 443);
        assert_eq!(spec.network(Network::Tls), Network::Tls);
        assert_eq!(PortSpec::parse("nope").port, 80);
    }

    #[test]
    fn network_aliases() {
        assert_eq!(Network::parse("SSL"), Network::Tls);
        assert_eq!(Network::parse(""), Network::Tcp);
    }
}
