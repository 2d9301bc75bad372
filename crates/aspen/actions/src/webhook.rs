//! Outbound webhook delivery.

use std::time::Duration;
use tracing::debug;

/// Sends JSON payloads to user-configured URLs with a bounded timeout.
pub struct WebhookSender {
    client: reqwest::Client,
    timeout: Duration,
}

impl WebhookSender {
    pub fn new() -> Self {
        Self::with_timeout(Duration::from_secs(10))
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            timeout,
        }
    }

    /// POST the payload. Returns the response status code or an error
    /// string; the caller converts failures into a failed action result.
    pub async fn send(&self, url: &str, payload: &serde_json::Value) -> Result<u16, String> {
        let response = tokio::time::timeout(
            self.timeout,
            self.client.post(url).json(payload).send(),
        )
        .await
        .map_err(|_| format!("webhook timed out after {}ms", self.timeout.as_millis()))?
        .map_err(|e| format!("webhook request failed: {}", e))?;

        let status = response.status();
        debug!(url = url, status = status.as_u16(), "webhook delivered");
        if status.is_success() {
            Ok(status.as_u16())
        } else {
            Err(format!("webhook returned {}", status))
        }
    }
}

impl Default for WebhookSender {
    fn default() -> Self {
        Self::new()
    }
}
