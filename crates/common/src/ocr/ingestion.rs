//! Upload-to-invoice pipeline

use super::{map_to_invoice, DocumentExtractor, PENDING};
use crate::auth::{Actor, Role};
use crate::db::models::Invoice;
use crate::errors::{AppError, Result};
use crate::metrics;
use crate::workflow::{FileMeta, InvoiceStore, WorkflowEngine};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, instrument, warn};

/// Hex-encoded SHA-256 of an uploaded file
pub fn hash_file(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

pub struct OcrIngestionService {
    extractor: Arc<dyn DocumentExtractor>,
    store: Arc<dyn InvoiceStore>,
    engine: Arc<WorkflowEngine>,
}

impl OcrIngestionService {
    pub fn new(
        extractor: Arc<dyn DocumentExtractor>,
        store: Arc<dyn InvoiceStore>,
        engine: Arc<WorkflowEngine>,
    ) -> Self {
        Self {
            extractor,
            store,
            engine,
        }
    }

    /// Extract, map, flag duplicates and submit.
    ///
    /// Nothing is persisted when extraction or mapping fails.
    #[instrument(skip(self, bytes, file, actor), fields(file_name = %file.name, size = bytes.len(), actor = %actor.username))]
    pub async fn ingest(&self, bytes: &[u8], file: FileMeta, actor: &Actor) -> Result<Invoice> {
        if !actor.role.at_least(Role::Secretary) {
            return Err(AppError::Forbidden {
                message: format!("Role {} cannot submit invoices", actor.role),
            });
        }

        let file_hash = hash_file(bytes);
        let provider = self.extractor.provider().to_string();

        let start = Instant::now();
        let extracted = self
            .extractor
            .extract(bytes, &file.content_type, &file.name)
            .await;
        let elapsed = start.elapsed().as_secs_f64();

        let ocr = match extracted {
            Ok(ocr) => ocr,
            Err(e) => {
                metrics::record_ocr(elapsed, &provider, "failure");
                warn!(provider = %provider, error = %e, "OCR extraction failed");
                return Err(match e {
                    AppError::ExternalService { .. } => e,
                    other => AppError::ExternalService {
                        service: "ocr".to_string(),
                        message: other.to_string(),
                    },
                });
            }
        };

        let mut draft = match map_to_invoice(&ocr, &actor.username, file) {
            Ok(draft) => draft,
            Err(e) => {
                metrics::record_ocr(elapsed, &provider, "rejected");
                return Err(e);
            }
        };
        metrics::record_ocr(elapsed, &provider, "success");

        // Placeholders never identify an invoice
        let vendor_and_number = (draft.vendor_name != PENDING && draft.invoice_number != PENDING)
            .then(|| (draft.vendor_name.as_str(), draft.invoice_number.as_str()));

        let duplicate_of = self
            .store
            .find_duplicate(Some(&file_hash), vendor_and_number)
            .await?;

        if let Some(original) = duplicate_of {
            warn!(duplicate_of = original, "Uploaded invoice looks like a duplicate");
        }

        draft.duplicate_of_invoice_id = duplicate_of;
        draft.file_hash = Some(file_hash);

        let invoice = self.engine.submit(draft, actor).await?;
        info!(
            invoice_id = invoice.id,
            requires_review = invoice.requires_review,
            "OCR invoice ingested"
        );
        Ok(invoice)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::InvoiceStatus;
    use crate::notifications::LogNotifier;
    use crate::ocr::{MockExtractor, OcrField, OcrResult};
    use crate::workflow::MemoryInvoiceStore;

    fn file(name: &str) -> FileMeta {
        FileMeta {
            path: format!("uploads/{}", name),
            name: name.to_string(),
            content_type: "application/pdf".to_string(),
            size: 10,
        }
    }

    fn service(extractor: MockExtractor) -> (OcrIngestionService, Arc<MemoryInvoiceStore>) {
        let store = Arc::new(MemoryInvoiceStore::new());
        let engine = Arc::new(WorkflowEngine::new(store.clone(), Arc::new(LogNotifier)));
        (
            OcrIngestionService::new(Arc::new(extractor), store.clone(), engine),
            store,
        )
    }

    fn read_invoice() -> OcrResult {
        OcrResult {
            invoice_number: OcrField::typed("INV-77".to_string(), 0.99),
            vendor_name: OcrField::typed("Gulf Steel LLC".to_string(), 0.99),
            vendor_tax_id: OcrField::typed("TRN-1".to_string(), 0.99),
            ..Default::default()
        }
    }

    #[test]
    fn test_hash_file() {
        assert_eq!(
            hash_file(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[tokio::test]
    async fn test_ingest_submits_invoice() {
        let (service, store) = service(MockExtractor::new(read_invoice()));
        let actor = Actor::new(2, "sec", Role::Secretary);

        let invoice = service.ingest(b"pdf-bytes", file("a.pdf"), &actor).await.unwrap();
        assert_eq!(invoice.status, InvoiceStatus::Submitted);
        assert_eq!(invoice.file_hash, Some(hash_file(b"pdf-bytes")));
        assert_eq!(invoice.file_name.as_deref(), Some("a.pdf"));
        assert_eq!(invoice.duplicate_of_invoice_id, None);
        assert_eq!(store.history(invoice.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_extraction_failure_persists_nothing() {
        let (service, store) = service(MockExtractor::failing("timeout"));
        let actor = Actor::new(2, "sec", Role::Secretary);

        let err = service
            .ingest(b"pdf-bytes", file("a.pdf"), &actor)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::ExternalService { .. }));
        assert!(store.find_invoice(1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicates_are_flagged() {
        let (service, _) = service(MockExtractor::new(read_invoice()));
        let actor = Actor::new(2, "sec", Role::Secretary);

        let first = service.ingest(b"one", file("a.pdf"), &actor).await.unwrap();
        // Different bytes, same vendor and number
        let second = service.ingest(b"two", file("b.pdf"), &actor).await.unwrap();
        assert_eq!(second.duplicate_of_invoice_id, Some(first.id));
    }

    #[tokio::test]
    async fn test_sentinels_never_match() {
        let (service, _) = service(MockExtractor::default());
        let actor = Actor::new(2, "sec", Role::Secretary);

        let first = service.ingest(b"one", file("a.pdf"), &actor).await.unwrap();
        assert!(first.requires_review);
        let second = service.ingest(b"two", file("b.pdf"), &actor).await.unwrap();
        assert_eq!(second.duplicate_of_invoice_id, None);

        // Same bytes still match by hash
        let third = service.ingest(b"one", file("c.pdf"), &actor).await.unwrap();
        assert_eq!(third.duplicate_of_invoice_id, Some(first.id));
    }

    #[tokio::test]
    async fn test_read_only_cannot_ingest() {
        let (service, _) = service(MockExtractor::default());
        let err = service
            .ingest(b"x", file("a.pdf"), &Actor::new(9, "viewer", Role::ReadOnly))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Forbidden { .. }));
    }
}
