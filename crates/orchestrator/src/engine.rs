//! Engine registry and the unified matching surface

use std::collections::HashMap;
use std::fmt;

use sigil_common::{
    Engine, Framework, Frameworks, HttpResponse, ServiceCallback, ServiceResult,
    ServiceSender, SigilError, SigilResult, WebResponse,
};
use sigil_fingerprint::{
    EHoleEngine, FaviconEngine, FingerprintHubEngine, FingersConfig, FingersEngine, GobyEngine,
    WappalyzerEngine,
};
use sigil_nmap::{NmapConfig, NmapEngine, EMBEDDED_PROBES};
use tracing::{debug, info, instrument};

use crate::alias::{Alias, Aliases};
use crate::corpora::Corpora;
use crate::options::{
    EngineOptions, EHOLE, FAVICON, FINGERPRINTHUB, FINGERS, GOBY, NMAP, WAPPALYZER,
};

/// All fingerprint engines behind one surface.
///
/// Engines are built once and never mutated afterwards, so a `Sigil` can be
/// shared across tasks behind an `Arc`. The favicon engine is always built;
/// it is fed from the other corpora and kept out of [`Sigil::web_match`].
pub struct Sigil {
    fingers: Option<FingersEngine>,
    fingerprinthub: Option<FingerprintHubEngine>,
    wappalyzer: Option<WappalyzerEngine>,
    ehole: Option<EHoleEngine>,
    goby: Option<GobyEngine>,
    nmap: Option<NmapEngine>,
    favicon: FaviconEngine,
    /// Registered engine names in dispatch order.
    order: Vec<String>,
    enabled: HashMap<String, bool>,
    aliases: Aliases,
}

impl Sigil {
    /// Build the requested engines. Any corpus error aborts construction.
    #[instrument(skip(options), fields(engines = ?options.engine_names()))]
    pub fn new(options: EngineOptions) -> SigilResult<Self> {
        let mut sigil = Self {
            fingers: None,
            fingerprinthub: None,
            wappalyzer: None,
            ehole: None,
            goby: None,
            nmap: None,
            favicon: FaviconEngine::new(),
            order: Vec::new(),
            enabled: HashMap::new(),
            aliases: Aliases::new(),
        };
        for name in options.engine_names() {
            sigil.init_engine(&name, &options)?;
        }
        if !sigil.order.iter().any(|n| n == FAVICON) {
            sigil.order.push(FAVICON.to_string());
        }
        sigil.compile(options.corpora.aliases.as_deref())?;
        info!("Sigil ready: {}", sigil);
        Ok(sigil)
    }

    fn init_engine(&mut self, name: &str, options: &EngineOptions) -> SigilResult<()> {
        let corpora = &options.corpora;
        match name {
            FINGERS => {
                let config = FingersConfig {
                    opsec: options.opsec,
                    match_detail: options.match_detail,
                };
                let engine = match &corpora.fingers_http {
                    Some(http) => {
                        FingersEngine::from_bytes(http, corpora.fingers_socket.as_deref(), config)?
                    }
                    None => {
                        let mut engine = FingersEngine::new(Vec::new(), Vec::new(), config)?;
                        if let Some(socket) = &corpora.fingers_socket {
                            engine.append(sigil_fingerprint::fingers::load_fingers(socket)?)?;
                        }
                        engine
                    }
                };
                self.fingers = Some(engine);
            }
            FINGERPRINTHUB => {
                self.fingerprinthub = Some(load_or_default(
                    &corpora.fingerprinthub,
                    FingerprintHubEngine::from_bytes,
                )?);
            }
            WAPPALYZER => {
                self.wappalyzer =
                    Some(load_or_default(&corpora.wappalyzer, WappalyzerEngine::from_bytes)?);
            }
            EHOLE => self.ehole = Some(load_or_default(&corpora.ehole, EHoleEngine::from_bytes)?),
            GOBY => self.goby = Some(load_or_default(&corpora.goby, GobyEngine::from_bytes)?),
            NMAP => self.nmap = Some(build_nmap(corpora, NmapConfig { no_guess: options.no_guess })?),
            FAVICON => {}
            other => return Err(SigilError::EngineNotFound(other.to_string())),
        }
        if !self.order.iter().any(|n| n == name) {
            self.order.push(name.to_string());
        }
        self.enabled.insert(name.to_string(), true);
        debug!(engine = name, "engine registered");
        Ok(())
    }

    /// Fill the favicon index from the other corpora and build the alias
    /// table, seeded from the fingers HTTP fingers.
    fn compile(&mut self, alias_yaml: Option<&[u8]>) -> SigilResult<()> {
        if let Some(fingers) = &self.fingers {
            self.favicon.extend(fingers.favicons());
        }
        if let Some(hub) = &self.fingerprinthub {
            self.favicon.extend(hub.favicons());
        }
        if let Some(ehole) = &self.ehole {
            self.favicon.extend(ehole.favicons());
        }
        self.enabled.insert(FAVICON.to_string(), false);

        let seed: Vec<Alias> = self
            .fingers
            .iter()
            .flat_map(|f| f.http_fingers())
            .map(|finger| {
                Alias::new(&finger.name)
                    .with_attributes(finger.attributes.clone())
                    .with_engine_name(FINGERS, &finger.name)
            })
            .collect();
        self.aliases = Aliases::with_overrides(seed, alias_yaml)?;
        Ok(())
    }

    /// Registered engine by name regardless of its enabled state.
    pub fn registered(&self, name: &str) -> Option<&dyn Engine> {
        match name {
            FINGERS => self.fingers.as_ref().map(|e| e as &dyn Engine),
            FINGERPRINTHUB => self.fingerprinthub.as_ref().map(|e| e as &dyn Engine),
            WAPPALYZER => self.wappalyzer.as_ref().map(|e| e as &dyn Engine),
            EHOLE => self.ehole.as_ref().map(|e| e as &dyn Engine),
            GOBY => self.goby.as_ref().map(|e| e as &dyn Engine),
            NMAP => self.nmap.as_ref().map(|e| e as &dyn Engine),
            FAVICON => Some(&self.favicon as &dyn Engine),
            _ => None,
        }
    }

    /// Enabled engine by name.
    pub fn engine(&self, name: &str) -> Option<&dyn Engine> {
        if self.is_enabled(name) {
            self.registered(name)
        } else {
            None
        }
    }

    pub fn is_enabled(&self, name: &str) -> bool {
        self.enabled.get(name).copied().unwrap_or(false)
    }

    /// Re-enable a registered engine; unknown names are ignored.
    pub fn enable(&mut self, name: &str) {
        if self.registered(name).is_some() {
            self.enabled.insert(name.to_string(), true);
        }
    }

    pub fn disable(&mut self, name: &str) {
        self.enabled.insert(name.to_string(), false);
    }

    /// Registered engine names in dispatch order.
    pub fn engine_names(&self) -> &[String] {
        &self.order
    }

    fn enabled_engines(&self) -> impl Iterator<Item = (&str, &dyn Engine)> {
        self.order
            .iter()
            .filter(|name| self.is_enabled(name))
            .filter_map(|name| Some((name.as_str(), self.registered(name)?)))
    }

    pub fn fingers(&self) -> Option<&FingersEngine> {
        self.fingers.as_ref()
    }

    pub fn fingerprinthub(&self) -> Option<&FingerprintHubEngine> {
        self.fingerprinthub.as_ref()
    }

    pub fn wappalyzer(&self) -> Option<&WappalyzerEngine> {
        self.wappalyzer.as_ref()
    }

    pub fn ehole(&self) -> Option<&EHoleEngine> {
        self.ehole.as_ref()
    }

    pub fn goby(&self) -> Option<&GobyEngine> {
        self.goby.as_ref()
    }

    pub fn nmap(&self) -> Option<&NmapEngine> {
        self.nmap.as_ref()
    }

    pub fn favicon(&self) -> &FaviconEngine {
        &self.favicon
    }

    pub fn aliases(&self) -> &Aliases {
        &self.aliases
    }

    /// Passive match of raw HTTP response bytes against every enabled web
    /// engine.
    pub fn web_match(&self, content: &[u8]) -> Frameworks {
        self.match_response(&WebResponse::new(content))
    }

    /// Alias of [`Sigil::web_match`].
    pub fn match_content(&self, content: &[u8]) -> Frameworks {
        self.web_match(content)
    }

    pub fn match_response(&self, response: &WebResponse) -> Frameworks {
        let mut combined = Frameworks::new();
        for (name, engine) in self.enabled_engines() {
            if name == FAVICON || !engine.capability().web {
                continue;
            }
            let frames = engine.web_match(response);
            self.merge_frameworks(&mut combined, name, frames);
        }
        combined
    }

    /// Passive match restricted to `engines`, enabled or not.
    pub fn web_match_with_engines(&self, content: &[u8], engines: &[&str]) -> Frameworks {
        let response = WebResponse::new(content);
        let mut combined = Frameworks::new();
        for &name in engines {
            if let Some(engine) = self.registered(name).filter(|e| e.capability().web) {
                let frames = engine.web_match(&response);
                self.merge_frameworks(&mut combined, name, frames);
            }
        }
        combined
    }

    /// Parse `content` as an HTTP response, normalise it and match.
    pub fn detect_content(&self, content: &[u8]) -> SigilResult<Frameworks> {
        let response = HttpResponse::parse(content)?;
        Ok(self.web_match(&response.read_raw()))
    }

    /// Active detection through every enabled service engine. Only results
    /// carrying a framework are returned.
    #[instrument(skip(self, sender, callback))]
    pub async fn detect_service(
        &self,
        host: &str,
        port: &str,
        level: i32,
        sender: &dyn ServiceSender,
        callback: Option<&ServiceCallback>,
    ) -> Vec<ServiceResult> {
        let engines: Vec<&dyn Engine> = self
            .enabled_engines()
            .filter(|(_, e)| e.capability().service)
            .map(|(_, e)| e)
            .collect();

        let mut results = Vec::new();
        for engine in engines {
            if let Some(result) = engine.service_match(host, port, level, sender, callback).await {
                if result.framework.is_some() {
                    results.push(result);
                }
            }
        }
        results
    }

    /// Hash favicon bytes once and look them up.
    pub fn detect_favicon(&self, content: &[u8]) -> Option<Framework> {
        self.favicon.match_bytes(content)
    }

    /// Fold `other` into `origin`, renaming through the alias table and
    /// dropping frames whose alias blocks `engine`.
    pub fn merge_frameworks(&self, origin: &mut Frameworks, engine: &str, other: Frameworks) {
        for mut frame in other {
            if !self.aliases.apply(engine, &mut frame) {
                debug!(engine, frame = %frame.name, "blocked by alias");
                continue;
            }
            origin.add(frame);
        }
    }
}

fn load_or_default<T: Default>(
    data: &Option<Vec<u8>>,
    load: impl FnOnce(&[u8]) -> SigilResult<T>,
) -> SigilResult<T> {
    match data {
        Some(bytes) => load(bytes),
        None => Ok(T::default()),
    }
}

fn build_nmap(corpora: &Corpora, config: NmapConfig) -> SigilResult<NmapEngine> {
    let services = corpora.nmap_services.as_deref();
    if let Some(json) = &corpora.nmap_probes_json {
        return NmapEngine::from_json(json, services, config);
    }
    let text = corpora.nmap_probes.as_deref().unwrap_or(EMBEDDED_PROBES);
    NmapEngine::from_probe_file(text, services, config)
}

impl fmt::Display for Sigil {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .order
            .iter()
            .filter_map(|name| Some(format!("{}:{}", name, self.registered(name)?.len())))
            .collect();
        f.write_str(&parts.join(" "))
    }
}

impl fmt::Debug for Sigil {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sigil")
            .field("engines", &self.order)
            .field("enabled", &self.enabled)
            .field("aliases", &self.aliases.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use sigil_common::{md5_hash, FrameFrom, Network};

    const FINGERS_HTTP: &str = r#"[
        {"name": "nginx", "vendor": "f5", "product": "nginx",
         "rule": [{"regexps": {"header": ["server: nginx"]}}]},
        {"name": "jquery-ui", "rule": [{"regexps": {"body": ["jquery-ui.min.js"]}}]},
        {"name": "gitlab", "rule": [{"favicon": {"md5": ["f7e3d97f404e71d302b3239eef48d5f2"]}}]}
    ]"#;

    const WAPPALYZER_JSON: &str = r#"{
        "apps": {
            "jQuery UI": {"cats": [59], "scriptSrc": "jquery-ui(?:\\.min)?\\.js"},
            "Nginx": {"cats": [22], "headers": {"Server": "nginx(?:/([\\d.]+))?\\;version:\\1"}}
        },
        "categories": {"22": {"name": "Web servers"}, "59": {"name": "JavaScript libraries"}}
    }"#;

    const GOBY_JSON: &str = r#"[
        {"name": "Nginx", "logic": "a", "rule": [{"label": "a", "feature": "server: nginx", "is_equal": true}]}
    ]"#;

    const ALIASES: &str = r#"
- name: jquery-ui
  vendor: jquery
  product: jquery_ui
  alias:
    wappalyzer: [jQuery UI]
    fingers: [jquery-ui]
- name: nginx
  vendor: f5
  product: nginx
  alias:
    wappalyzer: [Nginx]
    goby: [Nginx]
    fingers: [nginx]
"#;

    const RESPONSE: &[u8] = b"HTTP/1.1 200 OK\r\nServer: nginx/1.24.0\r\nContent-Type: text/html\r\n\r\n<html><script src=\"/static/jquery-ui.min.js\"></script></html>";

    fn corpora() -> Corpora {
        Corpora {
            fingers_http: Some(FINGERS_HTTP.as_bytes().to_vec()),
            wappalyzer: Some(WAPPALYZER_JSON.as_bytes().to_vec()),
            goby: Some(GOBY_JSON.as_bytes().to_vec()),
            aliases: Some(ALIASES.as_bytes().to_vec()),
            ..Default::default()
        }
    }

    fn sigil(engines: &[&str]) -> Sigil {
        Sigil::new(
            EngineOptions::new()
                .with_engines(engines.iter().copied())
                .with_corpora(corpora()),
        )
        .unwrap()
    }

    #[test]
    fn alias_remap_across_engines() {
        let sigil = sigil(&[WAPPALYZER]);
        let frames = sigil.web_match(RESPONSE);
        let frame = frames.get("jquery-ui").unwrap();
        assert_eq!(frame.attributes.vendor, "jquery");
        assert_eq!(frame.attributes.product, "jquery_ui");
        assert!(!frames.contains("jQuery UI"));
        assert_eq!(frames.get("nginx").unwrap().version, "1.24.0");
    }

    #[test]
    fn merge_is_commutative_on_names() {
        let forward = sigil(&[FINGERS, WAPPALYZER, GOBY]).web_match(RESPONSE);
        let backward = sigil(&[GOBY, WAPPALYZER, FINGERS]).web_match(RESPONSE);
        let mut a = forward.names();
        let mut b = backward.names();
        a.sort();
        b.sort();
        assert_eq!(a, b);
        assert_eq!(a, vec!["jquery-ui", "nginx"]);

        let nginx = forward.get("nginx").unwrap();
        assert!(nginx.froms.contains(&FrameFrom::Fingers));
        assert!(nginx.froms.contains(&FrameFrom::Wappalyzer));
        assert!(nginx.froms.contains(&FrameFrom::Goby));
    }

    #[test]
    fn favicon_is_registered_but_passive_only_by_request() {
        let mut sigil = sigil(&[FINGERS]);
        assert!(!sigil.is_enabled(FAVICON));
        assert!(sigil.engine(FAVICON).is_none());
        assert!(sigil.registered(FAVICON).is_some());
        assert_eq!(sigil.favicon().len(), 1);

        let icon = b"\x89PNG gitlab icon";
        let expected = md5_hash(icon);
        sigil.favicon.insert_md5(&expected, "gitlab");
        assert_eq!(sigil.detect_favicon(icon).unwrap().name, "gitlab");
        assert!(sigil.detect_favicon(b"").is_none());
    }

    #[test]
    fn enable_disable_and_display() {
        let mut sigil = sigil(&[FINGERS, GOBY]);
        assert_eq!(sigil.to_string(), "fingers:3 goby:1 favicon:1");
        sigil.disable(GOBY);
        assert!(sigil.engine(GOBY).is_none());
        sigil.enable(GOBY);
        assert!(sigil.engine(GOBY).is_some());
        sigil.enable(WAPPALYZER);
        assert!(!sigil.is_enabled(WAPPALYZER));
        assert!(sigil.goby().is_some());
        assert!(sigil.wappalyzer().is_none());
    }

    #[test]
    fn unknown_engine_aborts() {
        let err = Sigil::new(EngineOptions::new().with_engines(["shodan"])).unwrap_err();
        assert!(matches!(err, SigilError::EngineNotFound(name) if name == "shodan"));
    }

    #[test]
    fn detect_content_normalises_response() {
        let sigil = sigil(&[FINGERS]);
        let chunked = b"HTTP/1.1 200 OK\r\nServer: nginx\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n0\r\n\r\n";
        let frames = sigil.detect_content(chunked).unwrap();
        assert!(frames.contains("nginx"));
        assert!(sigil.detect_content(b"not http").is_err());
    }

    struct Banner;

    #[async_trait]
    impl ServiceSender for Banner {
        async fn send(
            &self,
            _host: &str,
            _port: &str,
            _data: &[u8],
            _network: Network,
        ) -> SigilResult<Vec<u8>> {
            Ok(b"SSH-2.0-OpenSSH_9.6\r\n".to_vec())
        }
    }

    #[tokio::test]
    async fn detect_service_uses_service_engines() {
        let sigil = sigil(&[NMAP, GOBY]);
        let results = sigil.detect_service("10.0.0.9", "22", 1, &Banner, None).await;
        assert_eq!(results.len(), 1);
        let frame = results[0].framework.as_ref().unwrap();
        assert_eq!(frame.name, "ssh");
        assert_eq!(frame.version, "9.6");
    }
}
