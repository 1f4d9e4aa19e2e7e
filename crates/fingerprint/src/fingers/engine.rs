//! Fingers engine: HTTP fingers, their active subset and port-grouped socket
//! fingers

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, instrument};

use sigil_common::resources::{unmarshal_json, unmarshal_yaml};
use sigil_common::{
    Engine, EngineCapability, Favicons, Frameworks, Network, PortSpec, ServiceCallback,
    ServiceResult, ServiceSender, SigilResult, Vulns, WebResponse,
};

use super::finger::{
    ActiveSender, Finger, FingerHit, FingersConfig, TargetSender, HTTP_PROTOCOL, TCP_PROTOCOL,
    UDP_PROTOCOL,
};

pub const NAME: &str = "fingers";

/// Socket fingers without ports are filed under this key.
const ANY_PORT: &str = "0";

#[derive(Debug, Clone, Default)]
pub struct FingersEngine {
    http_fingers: Vec<Finger>,
    active_http: Vec<usize>,
    socket_fingers: Vec<Finger>,
    socket_group: HashMap<String, Vec<usize>>,
    favicons: Favicons,
    config: FingersConfig,
}

/// Decode a finger list, JSON or YAML, optionally gzip compressed.
pub fn load_fingers(data: &[u8]) -> SigilResult<Vec<Finger>> {
    let trimmed = data.iter().find(|b| !b.is_ascii_whitespace());
    match trimmed {
        Some(b'[') | Some(b'{') | Some(0x1f) => unmarshal_json(data),
        Some(_) => unmarshal_yaml(data),
        None => Ok(Vec::new()),
    }
}

/// Expand `a-b` ranges and comma lists into individual port keys.
pub fn expand_ports(ports: &[String]) -> Vec<String> {
    let mut out = Vec::new();
    for entry in ports.iter().flat_map(|p| p.split(',')) {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        let range = entry
            .split_once('-')
            .and_then(|(a, b)| Some((a.trim().parse::<u16>().ok()?, b.trim().parse::<u16>().ok()?)));
        match range {
            Some((start, end)) if start <= end => out.extend((start..=end).map(|p| p.to_string())),
            _ => out.push(entry.to_string()),
        }
    }
    out
}

impl FingersEngine {
    pub fn new(http: Vec<Finger>, socket: Vec<Finger>, config: FingersConfig) -> SigilResult<Self> {
        let mut engine = Self {
            config,
            ..Default::default()
        };
        engine.append(http)?;
        engine.append(socket)?;
        info!(
            "fingers engine loaded {} http ({} active) and {} socket fingers",
            engine.http_fingers.len(),
            engine.active_http.len(),
            engine.socket_fingers.len()
        );
        Ok(engine)
    }

    pub fn from_bytes(
        http_data: &[u8],
        socket_data: Option<&[u8]>,
        config: FingersConfig,
    ) -> SigilResult<Self> {
        let http = load_fingers(http_data)?;
        let socket = match socket_data {
            Some(data) => load_fingers(data)?,
            None => Vec::new(),
        };
        Self::new(http, socket, config)
    }

    /// Compile and file fingers by protocol.
    pub fn append(&mut self, fingers: Vec<Finger>) -> SigilResult<()> {
        for mut finger in fingers {
            finger.compile(false)?;
            match finger.protocol.as_str() {
                HTTP_PROTOCOL => self.add_http(finger),
                TCP_PROTOCOL | UDP_PROTOCOL => self.add_socket(finger),
                other => debug!("skip finger {} with protocol {}", finger.name, other),
            }
        }
        Ok(())
    }

    /// Append custom fingers from a YAML document.
    pub fn append_yaml(&mut self, data: &[u8]) -> SigilResult<()> {
        let fingers: Vec<Finger> = unmarshal_yaml(data)?;
        self.append(fingers)
    }

    fn add_http(&mut self, finger: Finger) {
        for rule in &finger.rules {
            if let Some(favicon) = &rule.favicon {
                for hash in &favicon.md5 {
                    self.favicons.insert_md5(hash, &finger.name);
                }
                for hash in &favicon.mmh3 {
                    self.favicons.insert_mmh3(hash, &finger.name);
                }
            }
        }
        if finger.is_active {
            self.active_http.push(self.http_fingers.len());
        }
        self.http_fingers.push(finger);
    }

    fn add_socket(&mut self, finger: Finger) {
        let index = self.socket_fingers.len();
        let ports = expand_ports(&finger.default_port);
        if ports.is_empty() {
            self.socket_group
                .entry(ANY_PORT.to_string())
                .or_default()
                .push(index);
        }
        for port in ports {
            self.socket_group.entry(port).or_default().push(index);
        }
        self.socket_fingers.push(finger);
    }

    pub fn http_fingers(&self) -> &[Finger] {
        &self.http_fingers
    }

    pub fn socket_fingers(&self) -> &[Finger] {
        &self.socket_fingers
    }

    pub fn favicons(&self) -> &Favicons {
        &self.favicons
    }

    pub fn config(&self) -> &FingersConfig {
        &self.config
    }

    pub fn set_match_detail(&mut self, enabled: bool) {
        self.config.match_detail = enabled;
    }

    pub fn set_opsec(&mut self, enabled: bool) {
        self.config.opsec = enabled;
    }

    /// Passive match of every HTTP finger.
    pub fn http_match(&self, content: &WebResponse) -> (Frameworks, Vulns) {
        let mut frames = Frameworks::new();
        let mut vulns = Vulns::new();
        for finger in &self.http_fingers {
            if let Some((frame, vuln)) = finger.passive_match(content, &self.config) {
                frames.add(frame);
                if let Some(vuln) = vuln {
                    vulns.add(vuln);
                }
            }
        }
        (frames, vulns)
    }

    /// Active match of the HTTP fingers that carry `send_data`.
    pub async fn http_active_match(
        &self,
        level: i32,
        sender: &dyn ActiveSender,
    ) -> (Frameworks, Vulns) {
        let mut frames = Frameworks::new();
        let mut vulns = Vulns::new();
        for &i in &self.active_http {
            if let Some((frame, vuln)) = self.http_fingers[i]
                .active_match(level, sender, &self.config)
                .await
            {
                frames.add(frame);
                if let Some(vuln) = vuln {
                    vulns.add(vuln);
                }
            }
        }
        (frames, vulns)
    }

    async fn first_hit(
        &self,
        indices: &[usize],
        content: &WebResponse,
        level: i32,
        sender: Option<&dyn ActiveSender>,
        tried: &mut HashSet<usize>,
    ) -> Option<FingerHit> {
        for &i in indices {
            if !tried.insert(i) {
                continue;
            }
            if let Some(hit) = self.socket_fingers[i]
                .match_with(content, level, sender, &self.config)
                .await
            {
                return Some(hit);
            }
        }
        None
    }

    /// Socket fingers for `port` first, then port-less fingers, then the rest.
    /// Returns the first hit.
    pub async fn socket_match(
        &self,
        content: &WebResponse,
        port: &str,
        level: i32,
        sender: Option<&dyn ActiveSender>,
    ) -> Option<FingerHit> {
        let mut tried = HashSet::new();
        let empty = Vec::new();
        if !port.is_empty() {
            let group = self.socket_group.get(port).unwrap_or(&empty);
            if let Some(hit) = self.first_hit(group, content, level, sender, &mut tried).await {
                return Some(hit);
            }
        }
        let any = self.socket_group.get(ANY_PORT).unwrap_or(&empty);
        if let Some(hit) = self.first_hit(any, content, level, sender, &mut tried).await {
            return Some(hit);
        }
        let rest: Vec<usize> = (0..self.socket_fingers.len()).collect();
        self.first_hit(&rest, content, level, sender, &mut tried).await
    }
}

#[async_trait]
impl Engine for FingersEngine {
    fn name(&self) -> &str {
        NAME
    }

    fn len(&self) -> usize {
        self.http_fingers.len() + self.socket_fingers.len()
    }

    fn capability(&self) -> EngineCapability {
        EngineCapability {
            web: true,
            service: true,
        }
    }

    fn web_match(&self, response: &WebResponse) -> Frameworks {
        self.http_match(response).0
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
        let target = TargetSender {
            sender,
            host,
            port,
            network: Network::Tcp,
        };
        let key = PortSpec::parse(port).port.to_string();
        let (frame, vuln) = self
            .socket_match(&WebResponse::default(), &key, level, Some(&target as &dyn ActiveSender))
            .await?;
        let mut result = ServiceResult::new(host, port, Some(frame));
        result.vuln = vuln;
        if let Some(callback) = callback {
            callback(&result);
        }
        Some(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sigil_common::{FrameFrom, SigilResult};
    use std::sync::atomic::{AtomicUsize, Ordering};

    const HTTP: &str = r#"[
        {"name": "nginx", "rule": [{"regexps": {"header": ["server: nginx"]}}]},
        {"name": "nacos", "focus": true, "rule": [
            {"regexps": {"body": ["<title>nacos</title>"]}},
            {"favicon": {"mmh3": ["13942501"]}, "send_data": "/nacos/logo.png", "level": 2}
        ]},
        {"name": "tomcat", "rule": [{"regexps": {"body": ["tomcat"]}, "send_data": "/manager/html"}]}
    ]"#;

    const SOCKET: &str = r#"[
        {"name": "redis", "protocol": "tcp", "default_port": ["6379"],
         "rule": [{"regexps": {"body": ["-noauth", "+pong"]}, "send_data": "PING\r\n"}]},
        {"name": "ssh", "protocol": "tcp",
         "rule": [{"regexps": {"regexp": ["^ssh-([\\d.]+)"]}}]}
    ]"#;

    fn engine() -> FingersEngine {
        FingersEngine::from_bytes(HTTP.as_bytes(), Some(SOCKET.as_bytes()), FingersConfig::default())
            .unwrap()
    }

    #[test]
    fn loads_and_groups() {
        let engine = engine();
        assert_eq!(engine.len(), 5);
        assert_eq!(engine.active_http.len(), 2);
        assert_eq!(engine.socket_group.get("6379"), Some(&vec![0]));
        assert_eq!(engine.socket_group.get(ANY_PORT), Some(&vec![1]));
        assert_eq!(engine.favicons().mmh3.get("13942501").map(String::as_str), Some("nacos"));
    }

    #[test]
    fn empty_engine_matches_nothing() {
        let engine = FingersEngine::from_bytes(b"[]", None, FingersConfig::default()).unwrap();
        assert!(engine.is_empty());
        let resp = WebResponse::new(b"HTTP/1.1 200 OK\r\nServer: nginx\r\n\r\n".to_vec());
        assert!(engine.web_match(&resp).is_empty());
    }

    #[test]
    fn web_match_is_pure() {
        let engine = engine();
        let resp = WebResponse::new(
            b"HTTP/1.1 200 OK\r\nServer: nginx\r\n\r\n<title>Nacos</title>".to_vec(),
        );
        let first = engine.web_match(&resp);
        let second = engine.web_match(&resp);
        assert_eq!(first.names(), second.names());
        assert!(first.contains("nginx"));
        assert!(first.get("nacos").unwrap().is_focus);
    }

    #[test]
    fn expands_port_ranges() {
        let ports = expand_ports(&["80,443".to_string(), "8000-8002".to_string(), "top".to_string()]);
        assert_eq!(ports, vec!["80", "443", "8000", "8001", "8002", "top"]);
    }

    #[test]
    fn yaml_fingers_append() {
        let mut engine = engine();
        engine
            .append_yaml(b"- name: gitlab\n  rule:\n    - regexps:\n        body: [gitlab]\n")
            .unwrap();
        let resp = WebResponse::new(b"HTTP/1.1 200 OK\r\n\r\nGitLab".to_vec());
        assert!(engine.web_match(&resp).contains("gitlab"));
    }

    struct Redis {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ServiceSender for Redis {
        async fn send(&self, _: &str, port: &str, data: &[u8], _: Network) -> SigilResult<Vec<u8>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            assert_eq!(port, "6379");
            if data == b"PING\r\n" {
                Ok(b"+PONG\r\n".to_vec())
            } else {
                Ok(Vec::new())
            }
        }
    }

    #[tokio::test]
    async fn service_match_probes_port_group_first() {
        let engine = engine();
        let sender = Redis {
            calls: AtomicUsize::new(0),
        };
        let seen = std::sync::Arc::new(AtomicUsize::new(0));
        let seen_cb = seen.clone();
        let callback = move |_: &ServiceResult| {
            seen_cb.fetch_add(1, Ordering::SeqCst);
        };
        let result = engine
            .service_match("10.0.0.1", "6379", 1, &sender, Some(&callback as &ServiceCallback))
            .await
            .unwrap();
        let frame = result.framework.unwrap();
        assert_eq!(frame.name, "redis");
        assert!(frame.froms.contains(&FrameFrom::Active));
        assert_eq!(sender.calls.load(Ordering::SeqCst), 1);
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn http_active_match_uses_active_subset() {
        let engine = engine();
        let sender = super::super::finger::FnSender(|data: &[u8]| {
            if data == b"/manager/html" {
                Some(b"HTTP/1.1 200 OK\r\n\r\nTomcat Manager".to_vec())
            } else {
                None
            }
        });
        let (frames, _) = engine.http_active_match(1, &sender).await;
        assert_eq!(frames.names(), vec!["tomcat".to_string()]);
    }
}
