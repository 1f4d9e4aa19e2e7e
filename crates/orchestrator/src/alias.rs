//! Canonical names across engines
//!
//! Every engine names products its own way (`jQuery UI`, `jquery-ui`,
//! `JQueryUI`). An [`Alias`] declares one canonical name plus the spelling
//! each engine uses; [`Aliases`] indexes those spellings per engine by their
//! normalised form.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Serialize};
use sigil_common::resources::{normalize_string, unmarshal_yaml};
use sigil_common::{Attributes, Framework, SigilResult};
use tracing::{debug, info};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Alias {
    pub name: String,
    #[serde(flatten)]
    pub attributes: Attributes,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub categories: String,
    #[serde(default)]
    pub priority: i32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub link: Vec<String>,
    /// Engine name to the names that engine emits.
    #[serde(default, rename = "alias")]
    pub alias_map: BTreeMap<String, Vec<String>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub block: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pocs: Vec<String>,

    #[serde(skip)]
    blocked: HashSet<String>,
}

impl Alias {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    #[inline]
    #[must_use]
    pub fn with_engine_name(mut self, engine: &str, name: &str) -> Self {
        self.alias_map
            .entry(engine.to_string())
            .or_default()
            .push(name.to_string());
        self
    }

    #[inline]
    #[must_use]
    pub fn with_attributes(mut self, attributes: Attributes) -> Self {
        self.attributes = attributes;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_block(mut self, engine: &str) -> Self {
        self.block.push(engine.to_string());
        self
    }

    fn compile(&mut self) {
        self.name = self.name.to_lowercase();
        self.blocked = self.block.iter().cloned().collect();
    }

    pub fn is_blocked(&self, engine: &str) -> bool {
        self.blocked.contains(engine)
    }

    pub fn fuzzy_match(&self, s: &str) -> bool {
        normalize_string(&self.name) == normalize_string(s)
    }

    /// CPE attributes of this alias as an application.
    pub fn to_attributes(&self) -> Attributes {
        let mut attrs = self.attributes.clone();
        attrs.part = "a".to_string();
        attrs
    }
}

/// Outcome of looking a detected name up.
#[derive(Debug, Clone, Copy)]
pub enum AliasLookup<'a> {
    /// Rename to this alias.
    Found(&'a Alias),
    /// The alias exists but blocks the engine: drop the detection.
    Blocked(&'a Alias),
}

#[derive(Debug, Clone, Default)]
pub struct Aliases {
    aliases: HashMap<String, Alias>,
    /// engine -> normalised engine name -> alias name
    map: HashMap<String, HashMap<String, String>>,
}

impl Aliases {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed with `origin`, then let the YAML corpus override it.
    pub fn with_overrides(origin: Vec<Alias>, yaml: Option<&[u8]>) -> SigilResult<Self> {
        let mut aliases = Self::new();
        aliases.extend(origin);
        if let Some(data) = yaml {
            let overrides: Vec<Alias> = unmarshal_yaml(data)?;
            aliases.extend(overrides);
        }
        info!("Loaded {} aliases", aliases.len());
        Ok(aliases)
    }

    pub fn extend(&mut self, aliases: impl IntoIterator<Item = Alias>) {
        for alias in aliases {
            self.append(alias);
        }
    }

    /// Insert or replace by name. POCs of a replaced alias are kept.
    pub fn append(&mut self, mut alias: Alias) {
        alias.compile();
        if let Some(original) = self.aliases.get(&alias.name) {
            let mut pocs = original.pocs.clone();
            for poc in alias.pocs.drain(..) {
                if !pocs.contains(&poc) {
                    pocs.push(poc);
                }
            }
            alias.pocs = pocs;
        }

        for (engine, names) in &alias.alias_map {
            let engine_map = self.map.entry(engine.clone()).or_default();
            for name in names {
                engine_map.insert(normalize_string(name), alias.name.clone());
            }
        }
        debug!(alias = %alias.name, "alias registered");
        self.aliases.insert(alias.name.clone(), alias);
    }

    pub fn len(&self) -> usize {
        self.aliases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.aliases.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&Alias> {
        self.aliases.get(&name.to_lowercase())
    }

    pub fn find(&self, engine: &str, name: &str) -> Option<AliasLookup<'_>> {
        let alias_name = self.map.get(engine)?.get(&normalize_string(name))?;
        let alias = self.aliases.get(alias_name)?;
        if alias.is_blocked(engine) {
            Some(AliasLookup::Blocked(alias))
        } else {
            Some(AliasLookup::Found(alias))
        }
    }

    /// First engine whose spelling matches `name` and is not blocked.
    pub fn find_any(&self, name: &str) -> Option<(&str, &Alias)> {
        let mut engines: Vec<&String> = self.map.keys().collect();
        engines.sort();
        engines.into_iter().find_map(|engine| match self.find(engine, name) {
            Some(AliasLookup::Found(alias)) => Some((engine.as_str(), alias)),
            _ => None,
        })
    }

    /// Rename `frame` in place when `engine` has an alias for it. Returns
    /// false when the alias blocks the engine and the frame should be dropped.
    pub fn apply(&self, engine: &str, frame: &mut Framework) -> bool {
        match self.find(engine, &frame.name) {
            Some(AliasLookup::Found(alias)) => {
                frame.name.clone_from(&alias.name);
                frame.update_attributes(&alias.to_attributes());
                true
            }
            Some(AliasLookup::Blocked(_)) => false,
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sigil_common::FrameFrom;

    const ALIASES: &str = r#"
- name: jquery-ui
  vendor: jquery
  product: jquery_ui
  categories: javascript
  alias:
    wappalyzer:
      - jQuery UI
    fingers:
      - jquery-ui
  pocs:
    - jquery-ui-xss
- name: Tomcat
  vendor: apache
  product: tomcat
  alias:
    fingers: [tomcat]
    goby: [Apache-Tomcat]
  block: [goby]
"#;

    fn aliases() -> Aliases {
        Aliases::with_overrides(Vec::new(), Some(ALIASES.as_bytes())).unwrap()
    }

    #[test]
    fn remaps_engine_spelling() {
        let aliases = aliases();
        let mut frame = Framework::new("jQuery UI", FrameFrom::Wappalyzer);
        frame.set_version("1.12.1");
        assert!(aliases.apply("wappalyzer", &mut frame));
        assert_eq!(frame.name, "jquery-ui");
        assert_eq!(frame.attributes.part, "a");
        assert_eq!(frame.attributes.vendor, "jquery");
        assert_eq!(frame.attributes.product, "jquery_ui");
        assert_eq!(frame.version, "1.12.1");
        assert!(frame.froms.contains(&FrameFrom::Wappalyzer));

        // spelling is per engine
        let mut other = Framework::new("jQuery UI", FrameFrom::Goby);
        assert!(aliases.apply("goby", &mut other));
        assert_eq!(other.name, "jQuery UI");
    }

    #[test]
    fn blocked_engine_drops_frame() {
        let aliases = aliases();
        assert!(matches!(
            aliases.find("goby", "apache-tomcat"),
            Some(AliasLookup::Blocked(_))
        ));
        let mut frame = Framework::new("Apache-Tomcat", FrameFrom::Goby);
        assert!(!aliases.apply("goby", &mut frame));
        assert!(matches!(aliases.find("fingers", "Tomcat"), Some(AliasLookup::Found(_))));
    }

    #[test]
    fn overrides_keep_pocs_and_names_are_lowercase() {
        let seed = vec![Alias::new("jquery-ui").with_engine_name("fingers", "jquery-ui")];
        let mut aliases = Aliases::with_overrides(seed, Some(ALIASES.as_bytes())).unwrap();
        aliases.append(Alias {
            pocs: vec!["jquery-ui-proto".into()],
            ..Alias::new("jquery-ui")
        });
        let alias = aliases.get("JQuery-UI").unwrap();
        assert_eq!(alias.pocs, vec!["jquery-ui-xss", "jquery-ui-proto"]);
        assert!(aliases.get("tomcat").is_some());
        assert!(alias.fuzzy_match("jQuery_UI"));
    }

    #[test]
    fn find_any_skips_blocked() {
        let aliases = aliases();
        let (engine, alias) = aliases.find_any("jQuery UI").unwrap();
        assert_eq!(engine, "fingers");
        assert_eq!(alias.name, "jquery-ui");
        assert!(aliases.find_any("Apache-Tomcat").is_none());
    }
}
