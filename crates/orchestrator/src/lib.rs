//! Sigil Orchestrator - engine registry, aliasing and batch detection
//!
//! [`Sigil`] builds every configured engine from a [`Corpora`], merges their
//! passive web matches through the [`Aliases`] table and drives the service
//! engines for active detection. [`ServiceBatch`] runs that detection over
//! many targets with a fixed worker pool.

mod alias;
mod batch;
mod corpora;
mod engine;
mod options;
mod progress;

pub use alias::{Alias, AliasLookup, Aliases};
pub use batch::{ServiceBatch, ServiceTarget};
pub use corpora::Corpora;
pub use engine::Sigil;
pub use options::{
    BatchOptions, EngineOptions, ALL_ENGINES, EHOLE, FAVICON, FINGERPRINTHUB, FINGERS, GOBY, NMAP,
    WAPPALYZER,
};
pub use progress::{ProgressSnapshot, ProgressTracker};

pub use sigil_common as common;
