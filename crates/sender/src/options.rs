//! Transport timeouts and buffer sizing

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Timeouts used by [`crate::DefaultServiceSender`].
///
/// `timeout` bounds connecting and writing. Reads wait for at most
/// `min(timeout, read clamp)` for the protocol in use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SenderOptions {
    pub timeout: Duration,
    pub tcp_read_clamp: Duration,
    pub udp_read_clamp: Duration,
    pub buffer_size: usize,
}

impl Default for SenderOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            tcp_read_clamp: Duration::from_millis(500),
            udp_read_clamp: Duration::from_millis(200),
            buffer_size: 10240,
        }
    }
}

impl SenderOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Short waits for large sweeps over responsive networks.
    pub fn fast() -> Self {
        Self {
            timeout: Duration::from_secs(2),
            tcp_read_clamp: Duration::from_millis(300),
            udp_read_clamp: Duration::from_millis(150),
            ..Self::default()
        }
    }

    /// Long waits for slow links and chatty services.
    pub fn accurate() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            tcp_read_clamp: Duration::from_secs(2),
            udp_read_clamp: Duration::from_secs(1),
            ..Self::default()
        }
    }

    /// Non-positive timeouts keep the default.
    #[inline]
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        if !timeout.is_zero() {
            self.timeout = timeout;
        }
        self
    }

    #[inline]
    #[must_use]
    pub fn with_read_clamps(mut self, tcp: Duration, udp: Duration) -> Self {
        self.tcp_read_clamp = tcp;
        self.udp_read_clamp = udp;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size.max(1);
        self
    }

    pub fn tcp_read_timeout(&self) -> Duration {
        self.timeout.min(self.tcp_read_clamp)
    }

    pub fn udp_read_timeout(&self) -> Duration {
        self.timeout.min(self.udp_read_clamp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_timeouts_are_clamped() {
        let options = SenderOptions::default();
        assert_eq!(options.tcp_read_timeout(), Duration::from_millis(500));
        assert_eq!(options.udp_read_timeout(), Duration::from_millis(200));

        let short = options.with_timeout(Duration::from_millis(100));
        assert_eq!(short.tcp_read_timeout(), Duration::from_millis(100));
        assert_eq!(short.udp_read_timeout(), Duration::from_millis(100));
    }

    #[test]
    fn zero_timeout_keeps_default() {
        let options = SenderOptions::default().with_timeout(Duration::ZERO);
        assert_eq!(options.timeout, Duration::from_secs(5));
        assert!(SenderOptions::fast().timeout < SenderOptions::accurate().timeout);
    }
}
