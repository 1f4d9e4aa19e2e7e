//! `Engine` adapter for the probe catalog

use async_trait::async_trait;
use sigil_common::{
    Engine, EngineCapability, FrameFrom, Framework, Network, ServiceCallback, ServiceResult,
    ServiceSender, SigilResult,
};
use tracing::{debug, info, instrument};

use crate::catalog::Nmap;
use crate::probe::Protocol;
use crate::protocol::fix_protocol;
use crate::scan::{parse_port, ProbeSender, ScanStatus};
use crate::services::ServiceTable;

pub const NAME: &str = "nmap";

/// Probe corpus shipped with the crate.
pub const EMBEDDED_PROBES: &str = include_str!("../data/nmap-service-probes");

/// Ports where a TLS handshake is attempted first.
const TLS_PORTS: &[u16] = &[443, 8443, 993, 995, 465, 636, 989, 990, 992, 994, 5986];

#[derive(Debug, Clone, Copy, Default)]
pub struct NmapConfig {
    /// Do not fall back to the port table when a port is open but unmatched.
    pub no_guess: bool,
}

impl NmapConfig {
    #[inline]
    #[must_use]
    pub fn with_no_guess(mut self, no_guess: bool) -> Self {
        self.no_guess = no_guess;
        self
    }
}

#[derive(Debug, Clone)]
pub struct NmapEngine {
    nmap: Nmap,
    config: NmapConfig,
}

impl NmapEngine {
    pub fn new(nmap: Nmap, config: NmapConfig) -> Self {
        info!("Nmap engine ready with {} probes", nmap.len());
        Self { nmap, config }
    }

    /// Engine over the embedded probe file and the built-in port table.
    pub fn embedded(config: NmapConfig) -> SigilResult<Self> {
        let nmap = Nmap::from_probe_file(EMBEDDED_PROBES, ServiceTable::builtin())?;
        Ok(Self::new(nmap, config))
    }

    /// Engine over a JSON probes corpus and an optional `nmap-services.json`.
    pub fn from_json(
        probes: &[u8],
        services: Option<&[u8]>,
        config: NmapConfig,
    ) -> SigilResult<Self> {
        let table = match services {
            Some(data) => ServiceTable::from_json(data)?,
            None => ServiceTable::builtin(),
        };
        Ok(Self::new(Nmap::from_json(probes, table)?, config))
    }

    /// Engine over `nmap-service-probes` text.
    pub fn from_probe_file(
        text: &str,
        services: Option<&[u8]>,
        config: NmapConfig,
    ) -> SigilResult<Self> {
        let table = match services {
            Some(data) => ServiceTable::from_json(data)?,
            None => ServiceTable::builtin(),
        };
        Ok(Self::new(Nmap::from_probe_file(text, table)?, config))
    }

    pub fn nmap(&self) -> &Nmap {
        &self.nmap
    }

    pub fn config(&self) -> NmapConfig {
        self.config
    }

    fn guess(&self, port: u16, udp: bool) -> Option<Framework> {
        let name = self.nmap.guess_protocol(port, udp)?;
        let mut frame = Framework::new(fix_protocol(name), FrameFrom::Guess);
        frame.add_tag("guess");
        Some(frame)
    }
}

/// Maps probe requests onto a [`ServiceSender`]: UDP probes go out with a
/// `U:` port, TLS is used when asked for or on well-known TLS ports and
/// falls back once to plain TCP.
struct SenderAdapter<'a> {
    sender: &'a dyn ServiceSender,
}

#[async_trait]
impl ProbeSender for SenderAdapter<'_> {
    async fn send_probe(
        &self,
        host: &str,
        port: u16,
        data: &[u8],
        tls: bool,
        protocol: Protocol,
    ) -> SigilResult<(Vec<u8>, bool)> {
        if protocol == Protocol::Udp {
            let port = format!("U:{}", port);
            let reply = self.sender.send(host, &port, data, Network::Udp).await?;
            return Ok((reply, false));
        }

        let port = port.to_string();
        let use_tls = tls || TLS_PORTS.contains(&port.parse().unwrap_or_default());
        if !use_tls {
            let reply = self.sender.send(host, &port, data, Network::Tcp).await?;
            return Ok((reply, false));
        }
        match self.sender.send(host, &port, data, Network::Tls).await {
            Ok(reply) => Ok((reply, true)),
            Err(err) => {
                debug!(host, port = %port, "tls failed, retrying over tcp: {}", err);
                let reply = self.sender.send(host, &port, data, Network::Tcp).await?;
                Ok((reply, false))
            }
        }
    }
}

#[async_trait]
impl Engine for NmapEngine {
    fn name(&self) -> &str {
        NAME
    }

    fn len(&self) -> usize {
        self.nmap.len()
    }

    fn capability(&self) -> EngineCapability {
        EngineCapability::SERVICE
    }

    #[instrument(skip(self, sender, callback))]
    async fn service_match(
        &self,
        host: &str,
        port: &str,
        level: i32,
        sender: &dyn ServiceSender,
        callback: Option<&ServiceCallback>,
    ) -> Option<ServiceResult> {
        if level <= 0 {
            return None;
        }
        let level = u8::try_from(level).unwrap_or(u8::MAX);
        let (port_num, udp) = parse_port(port)?;

        let adapter = SenderAdapter { sender };
        let (status, response) = self.nmap.scan(host, port, level, &adapter).await;
        let frame = match status {
            ScanStatus::Matched => response
                .and_then(|r| r.fingerprint.to_frameworks().into_iter().next()),
            ScanStatus::Open if !self.config.no_guess => self.guess(port_num, udp),
            _ => None,
        }?;

        let result = ServiceResult::new(host, port, Some(frame));
        if let Some(callback) = callback {
            callback(&result);
        }
        Some(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sigil_common::SigilError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// TLS port that speaks HTTP and stays silent on everything else.
    struct HttpsPeer;

    #[async_trait]
    impl ServiceSender for HttpsPeer {
        async fn send(
            &self,
            _host: &str,
            _port: &str,
            data: &[u8],
            network: Network,
        ) -> SigilResult<Vec<u8>> {
            match network {
                Network::Tls if data.starts_with(b"GET ") => {
                    Ok(b"HTTP/1.1 200 OK\r\nServer: nginx/1.25.3\r\n\r\n".to_vec())
                }
                Network::Tls | Network::Tcp => Ok(Vec::new()),
                Network::Udp => Err(SigilError::Network("unexpected udp".into())),
            }
        }
    }

    /// Connects but never answers anything recognisable.
    struct Mute {
        networks: Mutex<Vec<(String, Network)>>,
    }

    #[async_trait]
    impl ServiceSender for Mute {
        async fn send(
            &self,
            _host: &str,
            port: &str,
            _data: &[u8],
            network: Network,
        ) -> SigilResult<Vec<u8>> {
            self.networks.lock().unwrap().push((port.to_string(), network));
            if network == Network::Tls {
                return Err(SigilError::Tls("handshake failed".into()));
            }
            Ok(b"\x4a\x00\x00\x00\xffunrecognised".to_vec())
        }
    }

    fn engine(no_guess: bool) -> NmapEngine {
        NmapEngine::embedded(NmapConfig::default().with_no_guess(no_guess)).unwrap()
    }

    #[tokio::test]
    async fn https_on_tls_port() {
        let engine = engine(false);
        let result = engine
            .service_match("10.0.0.1", "443", 1, &HttpsPeer, None)
            .await
            .unwrap();
        let frame = result.framework.unwrap();
        assert_eq!(frame.name, "https");
        assert!(frame.froms.contains(&FrameFrom::Nmap));
        assert!(frame.froms.contains(&FrameFrom::Active));
    }

    #[tokio::test]
    async fn open_port_guess() {
        let engine = engine(false);
        let mute = Mute {
            networks: Mutex::new(Vec::new()),
        };
        let calls = std::sync::Arc::new(AtomicUsize::new(0));
        let calls_cb = calls.clone();
        let callback = move |_: &ServiceResult| {
            calls_cb.fetch_add(1, Ordering::SeqCst);
        };
        let result = engine
            .service_match("10.0.0.2", "3306", 1, &mute, Some(&callback))
            .await
            .unwrap();
        let frame = result.framework.unwrap();
        assert_eq!(frame.name, "mysql");
        assert_eq!(frame.from, FrameFrom::Guess);
        assert!(frame.has_tag("guess"));
        assert!(frame.is_guess());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn no_guess_and_level_gate() {
        let mute = Mute {
            networks: Mutex::new(Vec::new()),
        };
        assert!(engine(true)
            .service_match("10.0.0.2", "3306", 1, &mute, None)
            .await
            .is_none());
        assert!(engine(false)
            .service_match("10.0.0.2", "3306", 0, &mute, None)
            .await
            .is_none());
    }

    #[tokio::test]
    async fn tls_failure_retries_tcp_and_udp_gets_prefix() {
        let engine = engine(true);
        let mute = Mute {
            networks: Mutex::new(Vec::new()),
        };
        engine.service_match("10.0.0.3", "993", 1, &mute, None).await;
        let calls = mute.networks.lock().unwrap().clone();
        assert_eq!(calls[0], ("993".to_string(), Network::Tls));
        assert_eq!(calls[1], ("993".to_string(), Network::Tcp));

        mute.networks.lock().unwrap().clear();
        engine.service_match("10.0.0.3", "U:53", 1, &mute, None).await;
        let calls = mute.networks.lock().unwrap().clone();
        assert!(!calls.is_empty());
        assert!(calls.iter().all(|(p, n)| p == "U:53" && *n == Network::Udp));
    }
}
