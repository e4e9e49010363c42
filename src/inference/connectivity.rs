//! Internet reachability check used by provider selection.

use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

/// Answers "can remote providers be reached right now?".
#[async_trait]
pub trait ConnectivityCheck: Send + Sync {
    /// Never errors: any failure, including a timeout, means offline.
    async fn is_connected(&self) -> bool;
}

/// Single bounded HTTP request against a configured endpoint.
#[derive(Debug, Clone)]
pub struct HttpConnectivityProbe {
    url: String,
    timeout: Duration,
    http: reqwest::Client,
}

impl HttpConnectivityProbe {
    pub fn new(url: &str, timeout: Duration) -> Self {
        Self {
            url: url.to_string(),
            timeout,
            http: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl ConnectivityCheck for HttpConnectivityProbe {
    async fn is_connected(&self) -> bool {
        let request = self.http.head(&self.url).timeout(self.timeout).send();
        match tokio::time::timeout(self.timeout, request).await {
            // Any HTTP answer, even an error status, proves reachability.
            Ok(Ok(resp)) => {
                debug!("Connectivity probe {} answered {}", self.url, resp.status());
                true
            }
            Ok(Err(e)) => {
                debug!("Connectivity probe {} failed: {}", self.url, e);
                false
            }
            Err(_) => {
                debug!("Connectivity probe {} timed out", self.url);
                false
            }
        }
    }
}

/// Fixed answer; for offline mode and tests.
#[derive(Debug, Clone, Copy)]
pub struct StaticConnectivity(pub bool);

#[async_trait]
impl ConnectivityCheck for StaticConnectivity {
    async fn is_connected(&self) -> bool {
        self.0
    }
}
