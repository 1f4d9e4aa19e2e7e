//! Sigil Nmap - active service identification
//!
//! Loads an `nmap-service-probes` corpus (text or the JSON transform), sends
//! probes through a [`sigil_common::ServiceSender`] and matches replies with
//! the match/softmatch state machine:
//! - `catalog`: the frozen probe catalog, probe selection by rarity and port
//! - `scan`: the per-port scan loop, SSL upgrade and fallback chains
//! - `engine`: [`NmapEngine`], the [`sigil_common::Engine`] implementation

pub mod catalog;
mod custom;
pub mod engine;
pub mod fingerprint;
pub mod matcher;
pub mod parser;
pub mod probe;
pub mod protocol;
pub mod scan;
pub mod services;

pub use catalog::Nmap;
pub use engine::{NmapConfig, NmapEngine, EMBEDDED_PROBES, NAME};
pub use fingerprint::FingerPrint;
pub use parser::{parse_probe_file, parse_probes_json, ProbeSet};
pub use probe::{PortList, Probe, Protocol};
pub use protocol::{fix_protocol, fix_service_name};
pub use scan::{parse_port, ProbeSender, Response, ScanStatus};
pub use services::ServiceTable;
