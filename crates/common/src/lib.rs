//! Sigil Common - shared model and traits
//!
//! This crate provides the detection model ([`Framework`], [`Vuln`], CPE
//! [`Attributes`]), the [`Engine`] and [`ServiceSender`] seams, response
//! preparation and corpus loading used by every sigil engine.

pub mod content;
pub mod cpe;
pub mod error;
pub mod framework;
pub mod hash;
pub mod resources;
pub mod traits;
pub mod types;
pub mod vuln;

// Re-export commonly used types
pub use content::{split_content, HttpResponse, WebResponse};
pub use cpe::Attributes;
pub use error::{SigilError, SigilResult};
pub use framework::{FrameFrom, Framework, Frameworks, MatchDetail};
pub use hash::{md5_hash, mmh3_hash32, Favicons};
pub use traits::{Engine, ServiceCallback, ServiceSender};
pub use types::{EngineCapability, Network, PortSpec, ServiceResult};
pub use vuln::{Severity, Vuln, Vulns};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
