//! Error types for sigil engines
//!
//! Corpus and rule errors abort engine construction; network errors are
//! per-probe and get translated into scan states by the callers.

use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SigilError {
    #[error("Corpus load error: {0}")]
    CorpusLoad(String),

    #[error("Rule compile error: {0}")]
    RuleCompile(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("connection refused: {0}")]
    ConnectionRefused(String),

    #[error("unreachable: {0}")]
    Unreachable(String),

    #[error("Timeout error: {0}")]
    Timeout(String),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("engine not found: {0}")]
    EngineNotFound(String),
}

impl SigilError {
    /// Classify a socket error so that refused and unreachable peers can be
    /// told apart from timeouts and resets.
    pub fn from_io(err: io::Error) -> Self {
        let message = err.to_string();
        let lower = message.to_lowercase();
        match err.kind() {
            io::ErrorKind::ConnectionRefused => SigilError::ConnectionRefused(message),
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => SigilError::Timeout(message),
            _ if lower.contains("no route to host") || lower.contains("network is unreachable") => {
                SigilError::Unreachable(message)
            }
            _ if lower.contains("refused") => SigilError::ConnectionRefused(message),
            _ => SigilError::Io(err),
        }
    }

    /// True when the peer actively rejected us or could not be routed to.
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        matches!(self, SigilError::ConnectionRefused(_) | SigilError::Unreachable(_))
    }

    pub fn corpus<E: std::fmt::Display>(what: &str, err: E) -> Self {
        SigilError::CorpusLoad(format!("{}: {}", what, err))
    }

    pub fn rule<E: std::fmt::Display>(what: &str, err: E) -> Self {
        SigilError::RuleCompile(format!("{}: {}", what, err))
    }
}

/// Result type alias for sigil operations
pub type SigilResult<T> = Result<T, SigilError>;
