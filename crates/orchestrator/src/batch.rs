//! Concurrent service detection over many targets

use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::Serialize;
use sigil_common::{ServiceCallback, ServiceResult, ServiceSender, SigilError, SigilResult};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::engine::Sigil;
use crate::options::BatchOptions;
use crate::progress::{ProgressSnapshot, ProgressTracker};

/// One `host` / `port` pair. The port keeps its `U:` prefix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceTarget {
    pub host: String,
    pub port: String,
}

impl ServiceTarget {
    pub fn new(host: impl Into<String>, port: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: port.into(),
        }
    }

    /// Accepts `host port`, `host:port`, `host:U:port` and `[v6]:port`.
    pub fn parse(line: &str) -> SigilResult<Self> {
        let line = line.trim();
        let mut fields = line.split_whitespace();
        let (host, port) = match (fields.next(), fields.next()) {
            (Some(host), Some(port)) => (host, port),
            (Some(pair), None) => split_pair(pair)
                .ok_or_else(|| SigilError::Parse(format!("missing port: {}", line)))?,
            _ => return Err(SigilError::Parse("empty target".into())),
        };
        let host = host.trim_start_matches('[').trim_end_matches(']');
        let number = port
            .strip_prefix("U:")
            .or_else(|| port.strip_prefix("u:"))
            .unwrap_or(port);
        if host.is_empty() || number.parse::<u16>().is_err() {
            return Err(SigilError::Parse(format!("invalid target: {}", line)));
        }
        Ok(Self::new(host, port))
    }

    /// Parse one target per line, skipping blanks and `#` comments.
    pub fn parse_list(text: &str) -> SigilResult<Vec<Self>> {
        text.lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with('#'))
            .map(Self::parse)
            .collect()
    }
}

fn split_pair(pair: &str) -> Option<(&str, &str)> {
    if let Some(idx) = pair.find(":U:").or_else(|| pair.find(":u:")) {
        return Some((&pair[..idx], &pair[idx + 1..]));
    }
    pair.rsplit_once(':')
}

impl FromStr for ServiceTarget {
    type Err = SigilError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for ServiceTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Fixed worker pool draining a shared target queue.
pub struct ServiceBatch {
    sigil: Arc<Sigil>,
    sender: Arc<dyn ServiceSender>,
    options: BatchOptions,
    progress: Arc<ProgressTracker>,
}

impl ServiceBatch {
    pub fn new(sigil: Arc<Sigil>, sender: Arc<dyn ServiceSender>, options: BatchOptions) -> Self {
        Self {
            sigil,
            sender,
            options,
            progress: Arc::new(ProgressTracker::new()),
        }
    }

    pub fn progress(&self) -> ProgressSnapshot {
        self.progress.snapshot()
    }

    /// Detect every target and return the identified results. Result order
    /// follows completion, not input.
    #[instrument(skip_all, fields(targets = targets.len(), concurrency = self.options.concurrency))]
    pub async fn run(
        &self,
        targets: Vec<ServiceTarget>,
        callback: Option<Arc<ServiceCallback>>,
    ) -> Vec<ServiceResult> {
        self.progress.set_total(targets.len());
        info!("Starting batch of {} targets", targets.len());

        let queue = Arc::new(Mutex::new(VecDeque::from(targets)));
        let results = Arc::new(Mutex::new(Vec::new()));
        let concurrency = self.options.concurrency.max(1);

        let mut workers = Vec::with_capacity(concurrency);
        for _ in 0..concurrency {
            let queue = queue.clone();
            let results = results.clone();
            let sigil = self.sigil.clone();
            let sender = self.sender.clone();
            let progress = self.progress.clone();
            let callback = callback.clone();
            let level = self.options.level;

            workers.push(tokio::spawn(async move {
                loop {
                    let next = { queue.lock().await.pop_front() };
                    let Some(target) = next else {
                        break;
                    };
                    let found = sigil
                        .detect_service(
                            &target.host,
                            &target.port,
                            level,
                            sender.as_ref(),
                            callback.as_deref(),
                        )
                        .await;
                    debug!(target = %target, hits = found.len(), "target done");
                    progress.record(!found.is_empty());
                    if !found.is_empty() {
                        results.lock().await.extend(found);
                    }
                }
            }));
        }

        for worker in workers {
            if let Err(e) = worker.await {
                warn!("batch worker failed: {}", e);
            }
        }

        self.progress.print_summary();
        let mut results = results.lock().await;
        std::mem::take(&mut *results)
    }
}
