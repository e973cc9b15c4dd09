//! Transition notifications
//!
//! The workflow engine hands every committed transition to a [`Notifier`]
//! after the transaction is done. Delivery is best effort:
//! - `webhook`: POST the event as JSON, retried with exponential backoff
//! - `log`: emit a structured log line only

use crate::auth::Role;
use crate::config::NotificationConfig;
use crate::db::models::InvoiceStatus;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use backoff::ExponentialBackoffBuilder;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// A committed status change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionEvent {
    pub invoice_id: i32,
    pub invoice_number: String,
    pub from: InvoiceStatus,
    pub to: InvoiceStatus,
    pub actor: String,
    pub role: Role,
    pub comment: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Trait for transition notification delivery
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, event: &TransitionEvent) -> Result<()>;

    /// Short name used in logs and metric labels
    fn name(&self) -> &str;
}

/// Webhook notifier
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
    max_retry: Duration,
}

impl WebhookNotifier {
    pub fn new(url: String, timeout: Duration, max_retry: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Configuration {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            url,
            max_retry,
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, event: &TransitionEvent) -> Result<()> {
        let policy = ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(200))
            .with_max_elapsed_time(Some(self.max_retry))
            .build();

        let operation = || {
            let request = self.client.post(&self.url).json(event);
            async move {
                let response = match request.send().await {
                    Ok(response) => response,
                    Err(e) => return Err(backoff::Error::transient(AppError::from(e))),
                };

                let status = response.status();
                if status.is_success() {
                    return Ok(());
                }

                let err = AppError::ExternalService {
                    service: "webhook".to_string(),
                    message: format!("webhook returned {}", status),
                };
                // 4xx will not improve on retry
                if status.is_client_error() {
                    Err(backoff::Error::permanent(err))
                } else {
                    Err(backoff::Error::transient(err))
                }
            }
        };

        backoff::future::retry_notify(policy, operation, |err: AppError, wait: Duration| {
            tracing::warn!(
                invoice_id = event.invoice_id,
                error = %err,
                retry_in_ms = wait.as_millis() as u64,
                "Webhook delivery failed, retrying"
            );
        })
        .await
    }

    fn name(&self) -> &str {
        "webhook"
    }
}

/// Notifier that only logs
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, event: &TransitionEvent) -> Result<()> {
        tracing::info!(
            invoice_id = event.invoice_id,
            invoice_number = %event.invoice_number,
            from = %event.from,
            to = %event.to,
            actor = %event.actor,
            "Invoice status changed"
        );
        Ok(())
    }

    fn name(&self) -> &str {
        "log"
    }
}

/// Create a notifier based on configuration
pub fn create_notifier(config: &NotificationConfig) -> Result<Arc<dyn Notifier>> {
    match config.provider.as_str() {
        "webhook" => {
            let url = config
                .webhook_url
                .clone()
                .ok_or_else(|| AppError::Configuration {
                    message: "notifications.webhook_url is required for the webhook provider"
                        .to_string(),
                })?;
            Ok(Arc::new(WebhookNotifier::new(
                url,
                Duration::from_secs(config.timeout_secs),
                Duration::from_secs(config.max_retry_secs),
            )?))
        }
        "log" => Ok(Arc::new(LogNotifier)),
        other => {
            tracing::warn!(provider = other, "Unknown notification provider, using log");
            Ok(Arc::new(LogNotifier))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event() -> TransitionEvent {
        TransitionEvent {
            invoice_id: 4,
            invoice_number: "INV-4".to_string(),
            from: InvoiceStatus::UnderReview,
            to: InvoiceStatus::Approved,
            actor: "pm.user".to_string(),
            role: Role::PM,
            comment: Some("ok".to_string()),
            occurred_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_log_notifier() {
        assert!(LogNotifier.notify(&event()).await.is_ok());
    }

    #[test]
    fn test_event_serializes_status_names() {
        let json = serde_json::to_value(event()).unwrap();
        assert_eq!(json["from"], "UnderReview");
        assert_eq!(json["to"], "Approved");
        assert_eq!(json["role"], "PM");
    }

    #[test]
    fn test_create_notifier() {
        let mut config = NotificationConfig::default();
        assert_eq!(create_notifier(&config).unwrap().name(), "log");

        config.provider = "webhook".to_string();
        assert!(matches!(
            create_notifier(&config),
            Err(AppError::Configuration { .. })
        ));

        config.webhook_url = Some("http://127.0.0.1:9/hook".to_string());
        assert_eq!(create_notifier(&config).unwrap().name(), "webhook");
    }

    #[tokio::test]
    async fn test_webhook_gives_up_after_retry_budget() {
        let notifier = WebhookNotifier::new(
            "http://127.0.0.1:9/hook".to_string(),
            Duration::from_millis(200),
            Duration::from_millis(500),
        )
        .unwrap();

        assert!(notifier.notify(&event()).await.is_err());
    }
}
