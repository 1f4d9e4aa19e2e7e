//! A named finger: metadata plus an ordered rule list

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use tracing::debug;

use sigil_common::{
    Attributes, FrameFrom, Framework, ServiceSender, Network, Severity, SigilResult, Vuln,
    WebResponse,
};

use super::dsl;
use super::rule::{Rule, RuleMatch, NO_VERSION};

pub const HTTP_PROTOCOL: &str = "http";
pub const TCP_PROTOCOL: &str = "tcp";
pub const UDP_PROTOCOL: &str = "udp";

/// Transport for a finger's `send_data`. `None` means the send failed.
#[async_trait]
pub trait ActiveSender: Send + Sync {
    async fn send(&self, data: &[u8]) -> Option<Vec<u8>>;
}

/// Synchronous closure sender.
pub struct FnSender<F>(pub F);

#[async_trait]
impl<F> ActiveSender for FnSender<F>
where
    F: Fn(&[u8]) -> Option<Vec<u8>> + Send + Sync,
{
    async fn send(&self, data: &[u8]) -> Option<Vec<u8>> {
        (self.0)(data)
    }
}

/// Adapts a [`ServiceSender`] to one target, rendering `{{Hostname}}`.
pub struct TargetSender<'a> {
    pub sender: &'a dyn ServiceSender,
    pub host: &'a str,
    pub port: &'a str,
    pub network: Network,
}

#[async_trait]
impl ActiveSender for TargetSender<'_> {
    async fn send(&self, data: &[u8]) -> Option<Vec<u8>> {
        let payload = dsl::render(data, self.host);
        match self.sender.send(self.host, self.port, &payload, self.network).await {
            Ok(reply) => Some(reply),
            Err(e) => {
                debug!("send to {}:{} failed: {}", self.host, self.port, e);
                None
            }
        }
    }
}

/// Per-engine matching switches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FingersConfig {
    /// Skip active probes of fingers flagged `opsec`.
    pub opsec: bool,
    /// Keep which pattern hit on emitted frames.
    pub match_detail: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Finger {
    pub name: String,
    #[serde(default)]
    pub protocol: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub link: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub default_port: Vec<String>,
    #[serde(default)]
    pub focus: bool,
    #[serde(default, rename = "rule")]
    pub rules: Vec<Rule>,
    #[serde(default, rename = "tag", skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default)]
    pub opsec: bool,
    #[serde(flatten)]
    pub attributes: Attributes,

    #[serde(skip)]
    pub is_active: bool,
}

pub type FingerHit = (Framework, Option<Vuln>);

impl Finger {
    pub fn compile(&mut self, case_sensitive: bool) -> SigilResult<()> {
        if self.protocol.is_empty() {
            self.protocol = HTTP_PROTOCOL.to_string();
        }
        if self.default_port.is_empty() && self.protocol == HTTP_PROTOCOL {
            self.default_port = vec!["80".to_string()];
        }
        for rule in self.rules.iter_mut() {
            rule.compile(&self.name, case_sensitive)?;
        }
        self.is_active = self.rules.iter().any(Rule::is_active);
        Ok(())
    }

    #[inline]
    pub fn is_http(&self) -> bool {
        self.protocol == HTTP_PROTOCOL
    }

    fn opsec_blocked(&self, config: &FingersConfig) -> bool {
        if config.opsec && self.opsec {
            debug!("(opsec!!!) skip active finger {} scan", self.name);
            true
        } else {
            false
        }
    }

    /// Build the frame and optional vuln for a hit on `rules[index]`.
    pub fn to_result(&self, hit: RuleMatch, index: usize, config: &FingersConfig) -> FingerHit {
        let rule = &self.rules[index];
        let mut frame = Framework::new(self.name.clone(), FrameFrom::Fingers);
        if !hit.version.is_empty() {
            frame.set_version(hit.version);
        } else if rule.version != NO_VERSION {
            frame.set_version(rule.version.clone());
        }
        frame.update_attributes(&self.attributes);
        frame.is_focus = self.focus;
        for tag in &self.tags {
            frame.add_tag(tag);
        }
        if config.match_detail {
            frame.match_detail = hit.detail;
        }

        let vuln = if hit.is_vuln || !rule.vuln.is_empty() || !rule.info.is_empty() {
            let mut vuln = if !rule.vuln.is_empty() {
                Vuln::new(rule.vuln.clone(), Severity::High).with_framework(frame.clone())
            } else if !rule.info.is_empty() {
                Vuln::new(rule.info.clone(), Severity::Info).with_framework(frame.clone())
            } else {
                Vuln::new(self.name.clone(), Severity::Info)
            };
            if self.is_active {
                vuln.detail
                    .insert("path".to_string(), vec![rule.send_data_str.clone()]);
            }
            Some(vuln)
        } else {
            None
        };
        (frame, vuln)
    }

    fn mark_active(frame: &mut Framework) {
        frame.from = FrameFrom::Fingers;
        frame.froms.clear();
        frame.froms.insert(FrameFrom::Fingers);
        frame.froms.insert(FrameFrom::Active);
    }

    fn reparse(&self, reply: Vec<u8>) -> WebResponse {
        if self.is_http() {
            WebResponse::new(reply)
        } else {
            WebResponse::raw_only(reply)
        }
    }

    /// Passive rules only; never sends.
    pub fn passive_match(&self, content: &WebResponse, config: &FingersConfig) -> Option<FingerHit> {
        let is_http = self.is_http();
        self.rules.iter().enumerate().find_map(|(i, rule)| {
            rule.matches(content, is_http, &self.name)
                .map(|hit| self.to_result(hit, i, config))
        })
    }

    /// Walk the rules, sending `send_data` where the level allows.
    /// Replies replace the content for this finger only.
    pub async fn match_with(
        &self,
        content: &WebResponse,
        level: i32,
        sender: Option<&dyn ActiveSender>,
        config: &FingersConfig,
    ) -> Option<FingerHit> {
        let is_http = self.is_http();
        let mut current: Cow<'_, WebResponse> = Cow::Borrowed(content);
        for (i, rule) in self.rules.iter().enumerate() {
            let mut active = false;
            if let (Some(data), Some(sender)) = (&rule.send_data, sender) {
                if level >= rule.level && !self.opsec_blocked(config) {
                    if let Some(reply) = sender.send(data).await {
                        current = Cow::Owned(self.reparse(reply));
                        active = true;
                    }
                }
            }
            if let Some(hit) = rule.matches(&current, is_http, &self.name) {
                let (mut frame, vuln) = self.to_result(hit, i, config);
                if active {
                    Self::mark_active(&mut frame);
                }
                return Some((frame, vuln));
            }
        }
        None
    }

    /// Active rules only. Stops at the first rule that cannot be sent.
    pub async fn active_match(
        &self,
        level: i32,
        sender: &dyn ActiveSender,
        config: &FingersConfig,
    ) -> Option<FingerHit> {
        let is_http = self.is_http();
        for (i, rule) in self.rules.iter().enumerate() {
            let data = rule.send_data.as_ref()?;
            if level < rule.level || self.opsec_blocked(config) {
                return None;
            }
            let reply = sender.send(data).await?;
            let content = self.reparse(reply);
            if let Some(hit) = rule.matches(&content, is_http, &self.name) {
                let (mut frame, vuln) = self.to_result(hit, i, config);
                Self::mark_active(&mut frame);
                return Some((frame, vuln));
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sigil_common::{mmh3_hash32, SigilResult};
    use std::sync::Mutex;

    fn finger(json: &str) -> Finger {
        let mut f: Finger = serde_json::from_str(json).unwrap();
        f.compile(false).unwrap();
        f
    }

    fn http(body: &[u8]) -> Vec<u8> {
        let mut raw = b"HTTP/1.1 200 OK\r\nContent-Type: image/png\r\n\r\n".to_vec();
        raw.extend_from_slice(body);
        raw
    }

    #[test]
    fn compile_sets_defaults() {
        let f = finger(r#"{"name": "nginx", "rule": [{"regexps": {"body": ["nginx"]}}]}"#);
        assert_eq!(f.protocol, "http");
        assert_eq!(f.default_port, vec!["80".to_string()]);
        assert!(!f.is_active);
    }

    #[test]
    fn passive_match_builds_frame() {
        let f = finger(
            r#"{"name": "Tomcat", "focus": true, "tag": ["java"], "vendor": "apache",
                "rule": [{"regexps": {"body": ["apache tomcat"]}, "version": "9"}]}"#,
        );
        let content = WebResponse::new(b"HTTP/1.1 200 OK\r\n\r\nApache Tomcat".to_vec());
        let (frame, vuln) = f.passive_match(&content, &FingersConfig::default()).unwrap();
        assert_eq!(frame.name, "Tomcat");
        assert_eq!(frame.version, "9");
        assert!(frame.is_focus);
        assert!(frame.has_tag("java"));
        assert_eq!(frame.attributes.vendor, "apache");
        assert!(frame.match_detail.is_none());
        assert!(vuln.is_none());
    }

    #[test]
    fn info_rule_emits_vuln() {
        let f = finger(
            r#"{"name": "tomcat", "rule": [{"regexps": {"vuln": ["manager app"]}, "info": "tomcat-manager"}]}"#,
        );
        let content = WebResponse::new(b"HTTP/1.1 200 OK\r\n\r\nManager App".to_vec());
        let config = FingersConfig {
            match_detail: true,
            ..Default::default()
        };
        let (frame, vuln) = f.passive_match(&content, &config).unwrap();
        let vuln = vuln.unwrap();
        assert_eq!(vuln.name, "tomcat-manager");
        assert_eq!(vuln.severity, Severity::Info);
        assert_eq!(frame.match_detail.unwrap().class, "vuln");
    }

    #[tokio::test]
    async fn nacos_favicon_fetched_actively() {
        let icon = b"\x89PNG\r\n\x1a\nnacos-logo".to_vec();
        let expected = mmh3_hash32(&icon);
        let f = finger(&format!(
            r#"{{"name": "nacos", "focus": true, "tag": ["nacos"],
                "rule": [
                    {{"regexps": {{"body": ["<title>Nacos</title>"]}}, "send_data": "/nacos/"}},
                    {{"favicon": {{"mmh3": ["{}"]}}, "send_data": "/nacos/console-ui/public/img/nacos-logo.png", "level": 2}}
                ]}}"#,
            expected
        ));
        assert!(f.is_active);

        let sent = Mutex::new(Vec::new());
        let sender = FnSender(|data: &[u8]| {
            let path = String::from_utf8_lossy(data).into_owned();
            sent.lock().unwrap().push(path.clone());
            if path.ends_with(".png") {
                Some(http(&icon))
            } else {
                Some(http(b"<html>login</html>"))
            }
        });

        let (frame, _) = f
            .active_match(2, &sender, &FingersConfig::default())
            .await
            .unwrap();
        assert_eq!(frame.name, "nacos");
        assert!(frame.is_focus);
        assert!(frame.froms.contains(&FrameFrom::Active));
        assert!(frame.froms.contains(&FrameFrom::Fingers));
        assert_eq!(sent.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn level_gates_active_rules() {
        let f = finger(
            r#"{"name": "admin", "rule": [{"regexps": {"body": ["admin"]}, "send_data": "/admin", "level": 3}]}"#,
        );
        let sender = FnSender(|_: &[u8]| Some(http(b"admin")));
        let config = FingersConfig::default();
        assert!(f.active_match(1, &sender, &config).await.is_none());
        assert!(f.active_match(3, &sender, &config).await.is_some());
    }

    #[tokio::test]
    async fn opsec_skips_probe_but_keeps_passive() {
        let f = finger(
            r#"{"name": "weblogic", "opsec": true,
                "rule": [{"regexps": {"body": ["weblogic"]}, "send_data": "/console"}]}"#,
        );
        let calls = Mutex::new(0);
        let sender = FnSender(|_: &[u8]| {
            *calls.lock().unwrap() += 1;
            Some(http(b"weblogic"))
        });
        let config = FingersConfig {
            opsec: true,
            ..Default::default()
        };
        let passive = WebResponse::new(b"HTTP/1.1 200 OK\r\n\r\nWebLogic Server".to_vec());
        let (frame, _) = f.match_with(&passive, 5, Some(&sender as &dyn ActiveSender), &config).await.unwrap();
        assert!(!frame.froms.contains(&FrameFrom::Active));
        assert_eq!(*calls.lock().unwrap(), 0);
        assert!(f.active_match(5, &sender, &config).await.is_none());
    }

    struct Reflect;

    #[async_trait]
    impl ServiceSender for Reflect {
        async fn send(&self, _: &str, _: &str, data: &[u8], _: Network) -> SigilResult<Vec<u8>> {
            Ok(data.to_vec())
        }
    }

    #[tokio::test]
    async fn target_sender_renders_hostname() {
        let sender = TargetSender {
            sender: &Reflect,
            host: "db.local",
            port: "6379",
            network: Network::Tcp,
        };
        let reply = sender.send(b"HELLO {{Hostname}}").await.unwrap();
        assert_eq!(reply, b"HELLO db.local");
    }
}
