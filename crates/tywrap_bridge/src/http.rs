//! Stateless HTTP transport: one `POST` per frame.

use crate::cancel::CancellationToken;
use crate::core::DEFAULT_TIMEOUT_MS;
use crate::error::{BridgeError, BridgeResult};
use crate::transport::{SendOutcome, Transport, TransportEvent};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tywrap_protocol::CodecOptions;

/// HTTP bridge configuration.
#[derive(Debug, Clone)]
pub struct HttpBridgeConfig {
    pub base_url: String,
    pub headers: BTreeMap<String, String>,
    /// Per-request timeout in milliseconds; `0` disables it.
    pub timeout_ms: u64,
    pub codec: CodecOptions,
}

impl HttpBridgeConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            headers: BTreeMap::new(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            codec: CodecOptions::default(),
        }
    }
}

/// Transport posting each frame to a base URL. Stateless: `init` and
/// `dispose` are bookkeeping only, no worker process exists on this side.
pub struct HttpTransport {
    config: HttpBridgeConfig,
    client: Option<reqwest::Client>,
    cancel: CancellationToken,
    events_rx: Option<mpsc::UnboundedReceiver<TransportEvent>>,
    // Held so the core's event stream stays open (it never yields).
    _events_tx: Option<mpsc::UnboundedSender<TransportEvent>>,
    ready: bool,
}

impl HttpTransport {
    pub fn new(config: HttpBridgeConfig) -> Self {
        Self {
            config,
            client: None,
            cancel: CancellationToken::new(),
            events_rx: None,
            _events_tx: None,
            ready: false,
        }
    }

    /// Token aborting every in-flight request on this transport. An abort
    /// surfaces as a timeout error.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn init(&mut self) -> BridgeResult<()> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| BridgeError::protocol(format!("Failed to build HTTP client: {}", e)))?;
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        self.client = Some(client);
        self.events_rx = Some(events_rx);
        self._events_tx = Some(events_tx);
        self.ready = true;
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.ready
    }

    async fn send(
        &mut self,
        frame: String,
        timeout: Option<Duration>,
        cancel: Option<&CancellationToken>,
    ) -> BridgeResult<SendOutcome> {
        if !self.ready {
            return Err(BridgeError::Disposed);
        }
        let client = self
            .client
            .as_ref()
            .ok_or_else(|| BridgeError::protocol("HTTP transport not initialized"))?;

        let mut request = client
            .post(&self.config.base_url)
            .header(reqwest::header::CONTENT_TYPE, "application/json");
        for (name, value) in &self.config.headers {
            request = request.header(name, value);
        }

        let round_trip = async {
            let response = request
                .body(frame)
                .send()
                .await
                .map_err(|e| BridgeError::execution("NetworkError", e.to_string()))?;
            let status = response.status();
            let body = response
                .text()
                .await
                .map_err(|e| BridgeError::execution("NetworkError", e.to_string()))?;
            if !status.is_success() {
                return Err(BridgeError::execution(
                    format!("HTTP_{}", status.as_u16()),
                    body,
                ));
            }
            Ok(SendOutcome::Reply(body))
        };

        let external = cancel.cloned().unwrap_or_else(|| self.cancel.clone());
        let internal = self.cancel.clone();

        // Biased: an abort observed alongside a completed round trip
        // still reports as a timeout, matching the stdio timer semantics.
        tokio::select! {
            biased;
            _ = external.cancelled() => Err(BridgeError::aborted()),
            _ = internal.cancelled() => Err(BridgeError::aborted()),
            _ = sleep_when(timeout) => Err(BridgeError::timeout_elapsed(
                timeout.map(|t| t.as_millis() as u64).unwrap_or_default(),
            )),
            outcome = round_trip => outcome,
        }
    }

    fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<TransportEvent>> {
        self.events_rx.take()
    }

    async fn dispose(&mut self) {
        self.ready = false;
        self.cancel.cancel();
        self.client = None;
    }
}

async fn sleep_when(timeout: Option<Duration>) {
    match timeout {
        Some(timeout) => tokio::time::sleep(timeout).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_send_before_init_is_disposed_error() {
        let mut transport = HttpTransport::new(HttpBridgeConfig::new("http://127.0.0.1:1/rpc"));
        let result = transport.send("{}".to_string(), None, None).await;
        assert!(matches!(result, Err(BridgeError::Disposed)));
    }

    #[tokio::test]
    async fn test_network_failure_is_execution_error() {
        // Port 1 on loopback refuses connections.
        let mut transport = HttpTransport::new(HttpBridgeConfig::new("http://127.0.0.1:1/rpc"));
        transport.init().await.unwrap();
        let result = transport
            .send("{}".to_string(), Some(Duration::from_secs(5)), None)
            .await;
        match result {
            Err(BridgeError::Execution { kind, .. }) => assert_eq!(kind, "NetworkError"),
            other => panic!("expected NetworkError execution error, got {:?}", other.err()),
        }
    }

    #[tokio::test]
    async fn test_external_abort_is_timeout() {
        let mut transport = HttpTransport::new(HttpBridgeConfig::new("http://127.0.0.1:1/rpc"));
        transport.init().await.unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = transport
            .send("{}".to_string(), Some(Duration::from_secs(5)), Some(&cancel))
            .await;
        assert!(matches!(result, Err(BridgeError::Timeout { .. })));
    }

    #[tokio::test]
    async fn test_dispose_clears_ready() {
        let mut transport = HttpTransport::new(HttpBridgeConfig::new("http://127.0.0.1:1/rpc"));
        transport.init().await.unwrap();
        assert!(transport.is_ready());
        transport.dispose().await;
        assert!(!transport.is_ready());
    }
}
