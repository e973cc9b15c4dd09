//! Status history ledger
//!
//! Append-only record of every status an invoice has been in. There is no
//! update or delete path; rows only disappear when their invoice is deleted.

use super::store::{InvoiceStore, NewStatusEntry};
use crate::db::models::{InvoiceStatus, StatusHistory};
use crate::errors::{AppError, Result};
use chrono::Utc;
use std::sync::Arc;

#[derive(Clone)]
pub struct StatusLedger {
    store: Arc<dyn InvoiceStore>,
}

impl StatusLedger {
    pub fn new(store: Arc<dyn InvoiceStore>) -> Self {
        Self { store }
    }

    /// Append one entry; fails with NotFound when the invoice does not exist
    pub async fn append(
        &self,
        invoice_id: i32,
        from: Option<InvoiceStatus>,
        to: InvoiceStatus,
        actor: &str,
        comment: Option<String>,
    ) -> Result<StatusHistory> {
        self.ensure_exists(invoice_id).await?;

        let entry = self
            .store
            .append_history(NewStatusEntry {
                invoice_id,
                from_status: from,
                status: to,
                changed_by: actor.to_string(),
                comment,
                changed_at: Utc::now(),
            })
            .await?;

        tracing::debug!(invoice_id, status = %to, actor, "Ledger entry appended");
        Ok(entry)
    }

    /// Every entry for the invoice in append order
    pub async fn history(&self, invoice_id: i32) -> Result<Vec<StatusHistory>> {
        self.ensure_exists(invoice_id).await?;
        self.store.history(invoice_id).await
    }

    /// The status an invoice was in when it was last put on hold
    pub async fn held_from(&self, invoice_id: i32) -> Result<Option<InvoiceStatus>> {
        let history = self.history(invoice_id).await?;
        Ok(history
            .iter()
            .rev()
            .find(|entry| entry.status == InvoiceStatus::OnHold)
            .and_then(|entry| entry.from_status))
    }

    async fn ensure_exists(&self, invoice_id: i32) -> Result<()> {
        match self.store.find_invoice(invoice_id).await? {
            Some(_) => Ok(()),
            None => Err(AppError::InvoiceNotFound { id: invoice_id }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::store::{MemoryInvoiceStore, NewInvoice};

    async fn seeded() -> (StatusLedger, i32) {
        let store = Arc::new(MemoryInvoiceStore::new());
        let invoice = store
            .insert_invoice(NewInvoice::new("INV-10", "Acme", "sec"), Utc::now())
            .await
            .unwrap();
        (StatusLedger::new(store), invoice.id)
    }

    #[tokio::test]
    async fn test_append_and_read_in_order() {
        let (ledger, id) = seeded().await;

        ledger
            .append(
                id,
                Some(InvoiceStatus::Submitted),
                InvoiceStatus::UnderReview,
                "pm",
                Some("picked up".to_string()),
            )
            .await
            .unwrap();

        let history = ledger.history(id).await.unwrap();
        let statuses: Vec<_> = history.iter().map(|h| h.status).collect();
        assert_eq!(
            statuses,
            vec![InvoiceStatus::Submitted, InvoiceStatus::UnderReview]
        );
        assert_eq!(history[1].comment.as_deref(), Some("picked up"));
    }

    #[tokio::test]
    async fn test_missing_invoice_is_not_found() {
        let (ledger, _) = seeded().await;

        let err = ledger
            .append(999, None, InvoiceStatus::Submitted, "pm", None)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvoiceNotFound { id: 999 }));

        assert!(matches!(
            ledger.history(999).await,
            Err(AppError::InvoiceNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_held_from_uses_latest_hold() {
        let (ledger, id) = seeded().await;
        assert_eq!(ledger.held_from(id).await.unwrap(), None);

        for (from, to) in [
            (InvoiceStatus::Submitted, InvoiceStatus::OnHold),
            (InvoiceStatus::OnHold, InvoiceStatus::Submitted),
            (InvoiceStatus::Submitted, InvoiceStatus::UnderReview),
            (InvoiceStatus::UnderReview, InvoiceStatus::OnHold),
        ] {
            ledger.append(id, Some(from), to, "head", None).await.unwrap();
        }

        assert_eq!(
            ledger.held_from(id).await.unwrap(),
            Some(InvoiceStatus::UnderReview)
        );
    }
}
