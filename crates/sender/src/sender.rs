//! Default socket sender

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use sigil_common::{Network, PortSpec, ServiceSender, SigilError, SigilResult};
use tokio::net::{lookup_host, TcpStream, UdpSocket};
use tokio::time::timeout;
use tokio_native_tls::TlsConnector;
use tracing::{debug, instrument};

use crate::exchange::exchange;
use crate::options::SenderOptions;

/// TCP/UDP/TLS transport for active probes.
#[derive(Clone)]
pub struct DefaultServiceSender {
    options: SenderOptions,
    connector: TlsConnector,
}

impl std::fmt::Debug for DefaultServiceSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DefaultServiceSender")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl DefaultServiceSender {
    /// Sender with default read clamps; a zero `timeout` means 5 seconds.
    pub fn new(timeout: Duration) -> SigilResult<Self> {
        Self::with_options(SenderOptions::default().with_timeout(timeout))
    }

    pub fn with_options(options: SenderOptions) -> SigilResult<Self> {
        let connector = native_tls::TlsConnector::builder()
            .danger_accept_invalid_certs(true)
            .danger_accept_invalid_hostnames(true)
            .build()
            .map_err(|e| SigilError::Tls(e.to_string()))?;
        Ok(Self {
            options,
            connector: TlsConnector::from(connector),
        })
    }

    pub fn options(&self) -> &SenderOptions {
        &self.options
    }

    async fn resolve(&self, host: &str, port: u16) -> SigilResult<SocketAddr> {
        let mut addrs = match timeout(self.options.timeout, lookup_host((host, port))).await {
            Ok(Ok(addrs)) => addrs,
            Ok(Err(e)) => return Err(SigilError::Network(format!("resolve {}: {}", host, e))),
            Err(_) => return Err(SigilError::Timeout(format!("resolve {}", host))),
        };
        addrs
            .next()
            .ok_or_else(|| SigilError::Network(format!("no address for {}", host)))
    }

    async fn connect(&self, addr: SocketAddr) -> SigilResult<TcpStream> {
        match timeout(self.options.timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => Ok(stream),
            Ok(Err(e)) => Err(SigilError::from_io(e)),
            Err(_) => Err(SigilError::Timeout(format!("connect {}", addr))),
        }
    }

    async fn send_tcp(&self, host: &str, port: u16, data: &[u8]) -> SigilResult<Vec<u8>> {
        let addr = self.resolve(host, port).await?;
        let mut stream = self.connect(addr).await?;
        exchange(
            &mut stream,
            data,
            self.options.timeout,
            self.options.tcp_read_timeout(),
            self.options.buffer_size,
        )
        .await
    }

    async fn send_tls(&self, host: &str, port: u16, data: &[u8]) -> SigilResult<Vec<u8>> {
        let addr = self.resolve(host, port).await?;
        let stream = self.connect(addr).await?;
        let mut stream = match timeout(self.options.timeout, self.connector.connect(host, stream)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(SigilError::Tls(e.to_string())),
            Err(_) => return Err(SigilError::Timeout(format!("tls handshake {}", addr))),
        };
        exchange(
            &mut stream,
            data,
            self.options.timeout,
            self.options.tcp_read_timeout(),
            self.options.buffer_size,
        )
        .await
    }

    async fn send_udp(&self, host: &str, port: u16, data: &[u8]) -> SigilResult<Vec<u8>> {
        let addr = self.resolve(host, port).await?;
        let local: SocketAddr = if addr.is_ipv4() {
            ([0, 0, 0, 0], 0).into()
        } else {
            ([0u16; 8], 0).into()
        };
        let socket = UdpSocket::bind(local).await.map_err(SigilError::from_io)?;
        socket.connect(addr).await.map_err(SigilError::from_io)?;

        if !data.is_empty() {
            match timeout(self.options.timeout, socket.send(data)).await {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => return Err(SigilError::from_io(e)),
                Err(_) => return Err(SigilError::Timeout("udp write timed out".into())),
            }
        }

        let mut buf = vec![0u8; self.options.buffer_size];
        match timeout(self.options.udp_read_timeout(), socket.recv(&mut buf)).await {
            Ok(Ok(n)) => {
                buf.truncate(n);
                Ok(buf)
            }
            Ok(Err(e)) => Err(SigilError::from_io(e)),
            Err(_) => Err(SigilError::Timeout("udp read timed out".into())),
        }
    }
}

#[async_trait]
impl ServiceSender for DefaultServiceSender {
    #[instrument(skip(self, data), fields(len = data.len()))]
    async fn send(
        &self,
        host: &str,
        port: &str,
        data: &[u8],
        network: Network,
    ) -> SigilResult<Vec<u8>> {
        let spec = PortSpec::parse(port);
        let host = host.trim_start_matches('[').trim_end_matches(']');
        let network = spec.network(network);
        debug!(host, port = spec.port, network = network.as_str(), "sending probe");
        match network {
            Network::Udp => self.send_udp(host, spec.port, data).await,
            Network::Tls => self.send_tls(host, spec.port, data).await,
            Network::Tcp => self.send_tcp(host, spec.port, data).await,
        }
    }
}
