//! OCR extraction and invoice ingestion
//!
//! Provides a unified interface for document extraction providers:
//! - HTTP endpoint returning the JSON [`OcrResult`] shape
//! - Mock provider for tests and local runs
//!
//! [`map_to_invoice`] turns an extraction into an invoice draft and
//! [`OcrIngestionService`] runs the whole upload path.

mod ingestion;
mod mapper;

pub use ingestion::{hash_file, OcrIngestionService};
pub use mapper::{map_to_invoice, parse_amount, PENDING};

use crate::config::OcrConfig;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// One extracted value: the typed reading when the provider produced one,
/// the raw text it was read from, and the provider's confidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrField<T> {
    #[serde(default)]
    pub value: Option<T>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub confidence: Option<f64>,
}

impl<T> Default for OcrField<T> {
    fn default() -> Self {
        Self {
            value: None,
            content: None,
            confidence: None,
        }
    }
}

impl<T> OcrField<T> {
    pub fn typed(value: T, confidence: f64) -> Self {
        Self {
            value: Some(value),
            content: None,
            confidence: Some(confidence),
        }
    }

    pub fn text(content: impl Into<String>, confidence: f64) -> Self {
        Self {
            value: None,
            content: Some(content.into()),
            confidence: Some(confidence),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrLineItem {
    pub description: Option<String>,
    pub quantity: Option<Decimal>,
    pub unit_price: Option<Decimal>,
    pub amount: OcrField<Decimal>,
}

/// Provider output for one document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrResult {
    pub invoice_number: OcrField<String>,
    pub invoice_date: OcrField<NaiveDate>,
    pub due_date: OcrField<NaiveDate>,
    pub invoice_value: OcrField<Decimal>,
    pub subtotal: OcrField<Decimal>,
    pub tax_amount: OcrField<Decimal>,
    pub currency: OcrField<String>,
    pub vendor_name: OcrField<String>,
    pub vendor_tax_id: OcrField<String>,
    pub vendor_address: OcrField<String>,
    pub customer_name: OcrField<String>,
    pub customer_address: OcrField<String>,
    pub line_items: Vec<OcrLineItem>,
    /// Whole-document confidence
    pub confidence_score: Option<f64>,
    pub raw_text: Option<String>,
}

/// Trait for document extraction
#[async_trait]
pub trait DocumentExtractor: Send + Sync {
    /// Extract invoice fields from an uploaded document
    async fn extract(&self, bytes: &[u8], content_type: &str, file_name: &str)
        -> Result<OcrResult>;

    /// Get the provider name
    fn provider(&self) -> &str;
}

/// Extraction over HTTP
pub struct HttpDocumentExtractor {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpDocumentExtractor {
    pub fn new(endpoint: String, api_key: Option<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Configuration {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            endpoint,
            api_key,
        })
    }

    fn upstream(message: String) -> AppError {
        AppError::ExternalService {
            service: "ocr".to_string(),
            message,
        }
    }
}

#[async_trait]
impl DocumentExtractor for HttpDocumentExtractor {
    async fn extract(
        &self,
        bytes: &[u8],
        content_type: &str,
        file_name: &str,
    ) -> Result<OcrResult> {
        let mut request = self
            .client
            .post(&self.endpoint)
            .query(&[("file_name", file_name)])
            .header("Content-Type", content_type)
            .body(bytes.to_vec());

        if let Some(ref key) = self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Self::upstream(format!("Request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Self::upstream(format!("API error {}: {}", status, body)));
        }

        response
            .json::<OcrResult>()
            .await
            .map_err(|e| Self::upstream(format!("Failed to parse response: {}", e)))
    }

    fn provider(&self) -> &str {
        "http"
    }
}

/// Mock extractor for testing
pub struct MockExtractor {
    outcome: std::result::Result<OcrResult, String>,
}

impl MockExtractor {
    /// Always returns `result`
    pub fn new(result: OcrResult) -> Self {
        Self {
            outcome: Ok(result),
        }
    }

    /// Always fails with an upstream error
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            outcome: Err(message.into()),
        }
    }
}

impl Default for MockExtractor {
    fn default() -> Self {
        Self::new(OcrResult::default())
    }
}

#[async_trait]
impl DocumentExtractor for MockExtractor {
    async fn extract(
        &self,
        bytes: &[u8],
        _content_type: &str,
        _file_name: &str,
    ) -> Result<OcrResult> {
        match &self.outcome {
            Ok(result) => {
                let mut result = result.clone();
                if result.raw_text.is_none() {
                    result.raw_text = Some(String::from_utf8_lossy(bytes).into_owned());
                }
                Ok(result)
            }
            Err(message) => Err(AppError::ExternalService {
                service: "ocr".to_string(),
                message: message.clone(),
            }),
        }
    }

    fn provider(&self) -> &str {
        "mock"
    }
}

/// Create an extractor based on configuration
pub fn create_extractor(config: &OcrConfig) -> Result<Arc<dyn DocumentExtractor>> {
    match config.provider.as_str() {
        "http" => {
            let endpoint = config
                .endpoint
                .clone()
                .ok_or_else(|| AppError::Configuration {
                    message: "ocr.endpoint is required for the http provider".to_string(),
                })?;
            Ok(Arc::new(HttpDocumentExtractor::new(
                endpoint,
                config.api_key.clone(),
                Duration::from_secs(config.timeout_secs),
            )?))
        }
        "mock" => Ok(Arc::new(MockExtractor::default())),
        other => {
            tracing::warn!(provider = other, "Unknown OCR provider, using mock");
            Ok(Arc::new(MockExtractor::default()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_deserializes_partial_payload() {
        let json = serde_json::json!({
            "invoice_number": { "value": "INV-9", "confidence": 0.97 },
            "invoice_value": { "content": "AED 1,250.00", "confidence": 0.8 },
            "invoice_date": { "value": "2026-03-01" },
            "line_items": [ { "description": "Steel", "amount": { "value": "100.50" } } ]
        });

        let result: OcrResult = serde_json::from_value(json).unwrap();
        assert_eq!(result.invoice_number.value.as_deref(), Some("INV-9"));
        assert_eq!(result.invoice_value.value, None);
        assert_eq!(result.invoice_value.content.as_deref(), Some("AED 1,250.00"));
        assert_eq!(
            result.invoice_date.value,
            NaiveDate::from_ymd_opt(2026, 3, 1)
        );
        assert_eq!(result.line_items.len(), 1);
        assert!(result.vendor_name.value.is_none());
        assert!(result.confidence_score.is_none());
    }

    #[tokio::test]
    async fn test_mock_extractor() {
        let extractor = MockExtractor::default();
        let result = extractor
            .extract(b"scanned text", "application/pdf", "a.pdf")
            .await
            .unwrap();
        assert_eq!(result.raw_text.as_deref(), Some("scanned text"));

        let failing = MockExtractor::failing("provider down");
        assert!(matches!(
            failing.extract(b"", "application/pdf", "a.pdf").await,
            Err(AppError::ExternalService { .. })
        ));
    }

    #[test]
    fn test_create_extractor() {
        let mut config = OcrConfig::default();
        assert_eq!(create_extractor(&config).unwrap().provider(), "mock");

        config.provider = "http".to_string();
        assert!(create_extractor(&config).is_err());

        config.endpoint = Some("http://ocr.local/extract".to_string());
        assert_eq!(create_extractor(&config).unwrap().provider(), "http");
    }
}
