//! Corpus bytes handed to the engines

use std::path::Path;

use sigil_common::resources::load_resource;
use sigil_common::{SigilError, SigilResult};
use tracing::{debug, info};

pub const ALIASES_FILE: &str = "aliases.yaml";
pub const FINGERS_HTTP_FILE: &str = "fingers_http.json";
pub const FINGERS_SOCKET_FILE: &str = "fingers_socket.json";
pub const FINGERPRINTHUB_FILE: &str = "fingerprinthub_v3.json";
pub const EHOLE_FILE: &str = "ehole.json";
pub const GOBY_FILE: &str = "goby.json";
pub const WAPPALYZER_FILE: &str = "wappalyzer.json";
pub const NMAP_PROBES_JSON_FILE: &str = "nmap-service-probes.json";
pub const NMAP_PROBES_FILE: &str = "nmap-service-probes";
pub const NMAP_SERVICES_FILE: &str = "nmap-services.json";

/// Raw corpus bytes, any of which may be gzip compressed. Engines whose
/// corpus is absent start empty, except nmap which falls back to its
/// embedded probe file.
#[derive(Debug, Clone, Default)]
pub struct Corpora {
    pub aliases: Option<Vec<u8>>,
    pub fingers_http: Option<Vec<u8>>,
    pub fingers_socket: Option<Vec<u8>>,
    pub fingerprinthub: Option<Vec<u8>>,
    pub ehole: Option<Vec<u8>>,
    pub goby: Option<Vec<u8>>,
    pub wappalyzer: Option<Vec<u8>>,
    pub nmap_probes_json: Option<Vec<u8>>,
    pub nmap_probes: Option<String>,
    pub nmap_services: Option<Vec<u8>>,
}

impl Corpora {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every known corpus file present in `dir`. `<file>.gz` is tried
    /// when `<file>` is missing.
    pub fn from_dir(dir: impl AsRef<Path>) -> SigilResult<Self> {
        let dir = dir.as_ref();
        if !dir.is_dir() {
            return Err(SigilError::Config(format!(
                "resource directory {} not found",
                dir.display()
            )));
        }
        let nmap_probes = read_optional(dir, NMAP_PROBES_FILE)?
            .map(|bytes| {
                String::from_utf8(bytes).map_err(|e| SigilError::corpus(NMAP_PROBES_FILE, e))
            })
            .transpose()?;

        let corpora = Self {
            aliases: read_optional(dir, ALIASES_FILE)?,
            fingers_http: read_optional(dir, FINGERS_HTTP_FILE)?,
            fingers_socket: read_optional(dir, FINGERS_SOCKET_FILE)?,
            fingerprinthub: read_optional(dir, FINGERPRINTHUB_FILE)?,
            ehole: read_optional(dir, EHOLE_FILE)?,
            goby: read_optional(dir, GOBY_FILE)?,
            wappalyzer: read_optional(dir, WAPPALYZER_FILE)?,
            nmap_probes_json: read_optional(dir, NMAP_PROBES_JSON_FILE)?,
            nmap_probes,
            nmap_services: read_optional(dir, NMAP_SERVICES_FILE)?,
        };
        info!("Loaded {} corpus files from {}", corpora.count(), dir.display());
        Ok(corpora)
    }

    /// Number of corpora present.
    pub fn count(&self) -> usize {
        [
            &self.aliases,
            &self.fingers_http,
            &self.fingers_socket,
            &self.fingerprinthub,
            &self.ehole,
            &self.goby,
            &self.wappalyzer,
            &self.nmap_probes_json,
            &self.nmap_services,
        ]
        .iter()
        .filter(|c| c.is_some())
        .count()
            + usize::from(self.nmap_probes.is_some())
    }
}

fn read_optional(dir: &Path, name: &str) -> SigilResult<Option<Vec<u8>>> {
    for candidate in [dir.join(name), dir.join(format!("{}.gz", name))] {
        if candidate.is_file() {
            debug!(path = %candidate.display(), "reading corpus");
            return load_resource(&candidate).map(Some);
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn loads_present_files_only() {
        let dir = std::env::temp_dir().join(format!("sigil-corpora-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(GOBY_FILE), b"[]").unwrap();
        fs::write(dir.join(format!("{}.gz", EHOLE_FILE)), b"\x1f\x8b").unwrap();
        fs::write(dir.join(NMAP_PROBES_FILE), "Probe TCP NULL q||\n").unwrap();

        let corpora = Corpora::from_dir(&dir).unwrap();
        assert_eq!(corpora.goby.as_deref(), Some(&b"[]"[..]));
        assert_eq!(corpora.ehole.as_deref(), Some(&b"\x1f\x8b"[..]));
        assert!(corpora.nmap_probes.unwrap().starts_with("Probe TCP NULL"));
        assert!(corpora.wappalyzer.is_none());

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn missing_dir_is_config_error() {
        let err = Corpora::from_dir("/nonexistent/sigil/resources").unwrap_err();
        assert!(matches!(err, SigilError::Config(_)));
    }
}
