//! InvoiceFlow Common Library
//!
//! Shared code for the InvoiceFlow services including:
//! - Invoice workflow (status policy, history ledger, transition engine)
//! - OCR ingestion and mapping
//! - Database models and repository patterns
//! - Error types and handling
//! - Configuration management
//! - Authentication utilities and login throttling
//! - Transition notifications
//! - Metrics and observability

pub mod auth;
pub mod config;
pub mod db;
pub mod errors;
pub mod metrics;
pub mod notifications;
pub mod ocr;
pub mod rate_limit;
pub mod workflow;

// Re-export commonly used types
pub use auth::{Actor, Role};
pub use config::AppConfig;
pub use db::{DbPool, Repository};
pub use errors::{AppError, Result};
pub use workflow::WorkflowEngine;

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
