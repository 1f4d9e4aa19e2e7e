//! Sigil Fingerprint - web fingerprint engines
//!
//! This crate provides the rule-corpus engines that identify software from a
//! captured response:
//! - `fingers`: regex/literal/hash rules with active `send_data` probing
//! - `favicon`: MD5 / MMH3 favicon index
//! - `fingerprinthub`, `ehole`, `goby`, `wappalyzer`: third-party corpora
//!
//! Every engine implements [`sigil_common::Engine`].

pub mod ehole;
pub mod favicon;
pub mod fingerprinthub;
pub mod fingers;
pub mod goby;
pub mod wappalyzer;

pub use ehole::EHoleEngine;
pub use favicon::FaviconEngine;
pub use fingerprinthub::FingerprintHubEngine;
pub use fingers::{Finger, FingersConfig, FingersEngine};
pub use goby::GobyEngine;
pub use wappalyzer::WappalyzerEngine;
