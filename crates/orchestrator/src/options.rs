//! Orchestrator and batch configuration

use crate::corpora::Corpora;

pub const FINGERS: &str = "fingers";
pub const FINGERPRINTHUB: &str = "fingerprinthub";
pub const WAPPALYZER: &str = "wappalyzer";
pub const EHOLE: &str = "ehole";
pub const GOBY: &str = "goby";
pub const NMAP: &str = "nmap";
pub const FAVICON: &str = "favicon";

/// Every engine, in default dispatch order.
pub const ALL_ENGINES: &[&str] = &[FINGERS, FINGERPRINTHUB, WAPPALYZER, EHOLE, GOBY, NMAP, FAVICON];

/// Construction options for [`crate::Sigil`].
#[derive(Debug, Clone, Default)]
pub struct EngineOptions {
    /// Engines to build, in dispatch order. Empty means all.
    pub engines: Vec<String>,
    pub corpora: Corpora,
    /// Do not emit port-table guesses for open but unidentified ports.
    pub no_guess: bool,
    /// Skip active probes of fingers flagged `opsec`.
    pub opsec: bool,
    /// Record which rule class produced each hit.
    pub match_detail: bool,
}

impl EngineOptions {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    #[must_use]
    pub fn with_engines<I, S>(mut self, engines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.engines = engines.into_iter().map(Into::into).collect();
        self
    }

    #[inline]
    #[must_use]
    pub fn with_corpora(mut self, corpora: Corpora) -> Self {
        self.corpora = corpora;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_no_guess(mut self, no_guess: bool) -> Self {
        self.no_guess = no_guess;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_opsec(mut self, opsec: bool) -> Self {
        self.opsec = opsec;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_match_detail(mut self, match_detail: bool) -> Self {
        self.match_detail = match_detail;
        self
    }

    /// Requested engine names, deduplicated, lowercased; all when empty.
    pub fn engine_names(&self) -> Vec<String> {
        if self.engines.is_empty() {
            return ALL_ENGINES.iter().map(|e| e.to_string()).collect();
        }
        let mut names: Vec<String> = Vec::new();
        for name in &self.engines {
            let name = name.trim().to_lowercase();
            if !name.is_empty() && !names.contains(&name) {
                names.push(name);
            }
        }
        names
    }
}

/// Worker pool settings for [`crate::ServiceBatch`].
#[derive(Debug, Clone, Copy)]
pub struct BatchOptions {
    pub concurrency: usize,
    pub level: i32,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            concurrency: 50,
            level: 1,
        }
    }
}

impl BatchOptions {
    #[inline]
    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    #[inline]
    #[must_use]
    pub fn with_level(mut self, level: i32) -> Self {
        self.level = level;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_names_default_to_all() {
        assert_eq!(EngineOptions::new().engine_names().len(), ALL_ENGINES.len());
        let names = EngineOptions::new()
            .with_engines(["Goby", "fingers", "goby", " "])
            .engine_names();
        assert_eq!(names, vec!["goby", "fingers"]);
        assert_eq!(BatchOptions::default().with_concurrency(0).concurrency, 1);
    }
}
