//! Fingers rule dialect
//!
//! Fingers are JSON/YAML records holding an ordered rule list. Each rule can
//! match passively against a captured response or drive a probe through
//! `send_data` when the caller's level allows it.

pub mod dsl;
pub mod engine;
pub mod finger;
pub mod rule;

pub use engine::{expand_ports, load_fingers, FingersEngine};
pub use finger::{ActiveSender, Finger, FingerHit, FingersConfig, FnSender, TargetSender};
pub use rule::{FaviconRule, Pattern, Regexps, Rule, RuleMatch};
