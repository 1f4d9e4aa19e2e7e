//! Engine and transport seams
//!
//! Every fingerprint corpus is wrapped in an [`Engine`]. Web engines match an
//! already captured [`WebResponse`]; service engines drive a caller supplied
//! [`ServiceSender`] to probe a live target.

use async_trait::async_trait;

use crate::content::WebResponse;
use crate::error::SigilResult;
use crate::framework::Frameworks;
use crate::types::{EngineCapability, Network, ServiceResult};

/// Invoked for every result a service engine emits.
pub type ServiceCallback = dyn Fn(&ServiceResult) + Send + Sync;

/// Request/response transport used by active probing.
#[async_trait]
pub trait ServiceSender: Send + Sync {
    /// Send `data` and return whatever the peer answered. A `"U:"` port
    /// prefix forces UDP regardless of `network`.
    async fn send(&self, host: &str, port: &str, data: &[u8], network: Network)
        -> SigilResult<Vec<u8>>;
}

#[async_trait]
pub trait Engine: Send + Sync {
    fn name(&self) -> &str;

    /// Number of loaded rules.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn capability(&self) -> EngineCapability;

    /// Passive match; pure over the response.
    fn web_match(&self, _response: &WebResponse) -> Frameworks {
        Frameworks::new()
    }

    /// Active probe of `host:port`.
    async fn service_match(
        &self,
        _host: &str,
        _port: &str,
        _level: i32,
        _sender: &dyn ServiceSender,
        _callback: Option<&ServiceCallback>,
    ) -> Option<ServiceResult> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framework::{FrameFrom, Framework};

    struct Echo;

    #[async_trait]
    impl ServiceSender for Echo {
        async fn send(
            &self,
            _host: &str,
            _port: &str,
            data: &[u8],
            _network: Network,
        ) -> SigilResult<Vec<u8>> {
            Ok(data.to_vec())
        }
    }

    struct Banner;

    #[async_trait]
    impl Engine for Banner {
        fn name(&self) -> &str {
            "banner"
        }

        fn len(&self) -> usize {
            1
        }

        fn capability(&self) -> EngineCapability {
            EngineCapability::SERVICE
        }

        async fn service_match(
            &self,
            host: &str,
            port: &str,
            _level: i32,
            sender: &dyn ServiceSender,
            _callback: Option<&ServiceCallback>,
        ) -> Option<ServiceResult> {
            let reply = sender.send(host, port, b"ping", Network::Tcp).await.ok()?;
            let frame = Framework::new(String::from_utf8_lossy(&reply), FrameFrom::Active);
            Some(ServiceResult::new(host, port, Some(frame)))
        }
    }

    #[tokio::test]
    async fn default_methods_and_sender() {
        let engine = Banner;
        assert!(!engine.is_empty());
        assert!(engine.web_match(&WebResponse::new(b"".to_vec())).is_empty());

        let result = engine
            .service_match("127.0.0.1", "7", 1, &Echo, None)
            .await
            .unwrap();
        assert_eq!(result.framework.unwrap().name, "ping");
    }
}
