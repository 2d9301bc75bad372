//! Notification delivery.
//!
//! The engine hands rendered variables to a channel; formatting into HTML
//! or Slack blocks happens in the delivery service behind it. Sends are
//! fire-and-forget from the evaluation cycle's perspective.

use async_trait::async_trait;
use serde::Serialize;
use std::sync::RwLock;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use aspen_types::NotificationKind;

use crate::template::TemplateVars;

/// Errors from notification delivery.
#[derive(Debug, Error)]
pub enum NotifyError {
    /// The delivery endpoint rejected or failed the send.
    #[error("delivery failed: {0}")]
    Delivery(String),

    /// The send did not complete within the deadline.
    #[error("delivery timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
}

/// Receipt for an accepted notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReceipt {
    pub message_id: Option<String>,
}

/// A channel that can deliver notifications of a given kind.
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    async fn send(
        &self,
        kind: NotificationKind,
        recipients: &[String],
        vars: &TemplateVars,
        message: Option<&str>,
    ) -> Result<DeliveryReceipt, NotifyError>;
}

#[derive(Serialize)]
struct DeliveryRequest<'a> {
    kind: String,
    recipients: &'a [String],
    vars: &'a TemplateVars,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<&'a str>,
}

/// Posts notifications to the delivery service that owns rendering.
pub struct HttpNotificationChannel {
    endpoint: String,
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpNotificationChannel {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            client: reqwest::Client::new(),
            timeout: Duration::from_secs(10),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl NotificationChannel for HttpNotificationChannel {
    async fn send(
        &self,
        kind: NotificationKind,
        recipients: &[String],
        vars: &TemplateVars,
        message: Option<&str>,
    ) -> Result<DeliveryReceipt, NotifyError> {
        let request = DeliveryRequest {
            kind: kind.to_string(),
            recipients,
            vars,
            message,
        };

        let response = tokio::time::timeout(
            self.timeout,
            self.client.post(&self.endpoint).json(&request).send(),
        )
        .await
        .map_err(|_| NotifyError::Timeout {
            timeout_ms: self.timeout.as_millis() as u64,
        })?
        .map_err(|e| NotifyError::Delivery(e.to_string()))?;

        if !response.status().is_success() {
            return Err(NotifyError::Delivery(format!(
                "endpoint returned {}",
                response.status()
            )));
        }

        let message_id = response
            .headers()
            .get("x-message-id")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        debug!(kind = %kind, recipients = recipients.len(), "notification accepted");
        Ok(DeliveryReceipt { message_id })
    }
}

/// Logs sends without delivering them. Used when no delivery endpoint is
/// configured.
#[derive(Default)]
pub struct LogNotificationChannel;

impl LogNotificationChannel {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl NotificationChannel for LogNotificationChannel {
    async fn send(
        &self,
        kind: NotificationKind,
        recipients: &[String],
        _vars: &TemplateVars,
        message: Option<&str>,
    ) -> Result<DeliveryReceipt, NotifyError> {
        tracing::info!(
            kind = %kind,
            recipients = recipients.len(),
            message = message.unwrap_or(""),
            "notification dropped (no delivery endpoint configured)"
        );
        Ok(DeliveryReceipt { message_id: None })
    }
}

/// Captures sends for tests and local development.
#[derive(Default)]
pub struct InMemoryNotificationChannel {
    sent: RwLock<Vec<(NotificationKind, Vec<String>, TemplateVars)>>,
    fail: RwLock<bool>,
}

impl InMemoryNotificationChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail(&self, fail: bool) {
        *self.fail.write().unwrap() = fail;
    }

    pub fn sent_count(&self) -> usize {
        self.sent.read().unwrap().len()
    }

    pub fn sent(&self) -> Vec<(NotificationKind, Vec<String>, TemplateVars)> {
        self.sent.read().unwrap().clone()
    }
}

#[async_trait]
impl NotificationChannel for InMemoryNotificationChannel {
    async fn send(
        &self,
        kind: NotificationKind,
        recipients: &[String],
        vars: &TemplateVars,
        _message: Option<&str>,
    ) -> Result<DeliveryReceipt, NotifyError> {
        if *self.fail.read().unwrap() {
            return Err(NotifyError::Delivery("simulated failure".into()));
        }
        self.sent
            .write()
            .unwrap()
            .push((kind, recipients.to_vec(), vars.clone()));
        Ok(DeliveryReceipt {
            message_id: Some(format!("mem-{}", self.sent_count())),
        })
    }
}
