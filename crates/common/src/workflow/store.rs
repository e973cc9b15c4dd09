//! Persistence boundary for the workflow engine
//!
//! The engine only needs a handful of operations over invoices and their
//! status history. [`InvoiceStore`] names them; the SeaORM repository is the
//! production implementation and [`MemoryInvoiceStore`] backs tests and local
//! runs without a database.

use crate::db::models::{CurrencyType, Invoice, InvoiceStatus, StatusHistory};
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Mutex;

/// Where an uploaded invoice file was stored
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMeta {
    pub path: String,
    pub name: String,
    pub content_type: String,
    pub size: i64,
}

/// An invoice that has not been persisted yet
#[derive(Debug, Clone, PartialEq)]
pub struct NewInvoice {
    pub invoice_number: String,
    pub invoice_date: Option<NaiveDate>,
    pub due_date: Option<NaiveDate>,
    pub invoice_value: Option<Decimal>,
    pub subtotal: Option<Decimal>,
    pub tax_amount: Option<Decimal>,
    pub currency: Option<CurrencyType>,
    pub status: InvoiceStatus,
    pub description: Option<String>,
    pub vendor_name: String,
    pub vendor_tax_id: String,
    pub vendor_address: Option<String>,
    pub customer_name: Option<String>,
    pub customer_address: Option<String>,
    pub vendor_id: Option<i32>,
    pub project_id: Option<i32>,
    pub lpo_id: Option<i32>,
    pub file: Option<FileMeta>,
    pub file_hash: Option<String>,
    pub duplicate_of_invoice_id: Option<i32>,
    pub requires_review: bool,
    pub confidence_score: Option<f64>,
    pub field_confidence: serde_json::Value,
    pub line_items: serde_json::Value,
    pub ocr_raw_text: Option<String>,
    pub created_by: String,
}

impl NewInvoice {
    /// A blank Submitted draft owned by `created_by`
    pub fn new(
        invoice_number: impl Into<String>,
        vendor_name: impl Into<String>,
        created_by: impl Into<String>,
    ) -> Self {
        Self {
            invoice_number: invoice_number.into(),
            invoice_date: None,
            due_date: None,
            invoice_value: None,
            subtotal: None,
            tax_amount: None,
            currency: None,
            status: InvoiceStatus::Submitted,
            description: None,
            vendor_name: vendor_name.into(),
            vendor_tax_id: String::new(),
            vendor_address: None,
            customer_name: None,
            customer_address: None,
            vendor_id: None,
            project_id: None,
            lpo_id: None,
            file: None,
            file_hash: None,
            duplicate_of_invoice_id: None,
            requires_review: false,
            confidence_score: None,
            field_confidence: serde_json::json!({}),
            line_items: serde_json::json!([]),
            ocr_raw_text: None,
            created_by: created_by.into(),
        }
    }
}

/// A ledger entry that has not been persisted yet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewStatusEntry {
    pub invoice_id: i32,
    pub from_status: Option<InvoiceStatus>,
    pub status: InvoiceStatus,
    pub changed_by: String,
    pub comment: Option<String>,
    pub changed_at: DateTime<Utc>,
}

/// A status change guarded by the state the caller loaded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionRecord {
    pub expected_status: InvoiceStatus,
    pub expected_version: i32,
    pub entry: NewStatusEntry,
}

/// Operations the workflow needs from persistence
#[async_trait]
pub trait InvoiceStore: Send + Sync {
    async fn find_invoice(&self, id: i32) -> Result<Option<Invoice>>;

    /// Insert the invoice in Submitted together with its creation entry
    async fn insert_invoice(&self, draft: NewInvoice, at: DateTime<Utc>) -> Result<Invoice>;

    /// Compare-and-set the status and append the ledger entry atomically.
    ///
    /// Fails with `ConcurrentModification` when the stored status or
    /// row_version no longer match, in which case nothing is written.
    async fn apply_transition(&self, record: TransitionRecord) -> Result<Invoice>;

    async fn append_history(&self, entry: NewStatusEntry) -> Result<StatusHistory>;

    /// Entries for one invoice in append order.
    ///
    /// Order follows the store's insert sequence, not `changed_at`, so
    /// clock skew between gateway instances cannot reorder the ledger.
    async fn history(&self, invoice_id: i32) -> Result<Vec<StatusHistory>>;

    /// An existing invoice sharing the file hash or the (vendor, number) pair.
    /// Matching on the pair ignores ASCII case.
    async fn find_duplicate(
        &self,
        file_hash: Option<&str>,
        vendor_and_number: Option<(&str, &str)>,
    ) -> Result<Option<i32>>;
}

/// Build the model a draft turns into once it has an id
pub(crate) fn invoice_from_draft(id: i32, draft: NewInvoice, at: DateTime<Utc>) -> Invoice {
    let (file_path, file_name, file_type, file_size) = match draft.file {
        Some(file) => (
            Some(file.path),
            Some(file.name),
            Some(file.content_type),
            Some(file.size),
        ),
        None => (None, None, None, None),
    };

    Invoice {
        id,
        invoice_number: draft.invoice_number,
        invoice_date: draft.invoice_date,
        due_date: draft.due_date,
        invoice_value: draft.invoice_value,
        subtotal: draft.subtotal,
        tax_amount: draft.tax_amount,
        currency: draft.currency,
        status: InvoiceStatus::Submitted,
        description: draft.description,
        vendor_name: draft.vendor_name,
        vendor_tax_id: draft.vendor_tax_id,
        vendor_address: draft.vendor_address,
        customer_name: draft.customer_name,
        customer_address: draft.customer_address,
        vendor_id: draft.vendor_id,
        project_id: draft.project_id,
        lpo_id: draft.lpo_id,
        file_path,
        file_name,
        file_type,
        file_size,
        file_hash: draft.file_hash,
        duplicate_of_invoice_id: draft.duplicate_of_invoice_id,
        requires_review: draft.requires_review,
        confidence_score: draft.confidence_score,
        field_confidence: draft.field_confidence,
        line_items: draft.line_items,
        ocr_raw_text: draft.ocr_raw_text,
        row_version: 1,
        created_by: draft.created_by,
        created_at: at.into(),
        modified_by: None,
        modified_at: None,
    }
}

#[derive(Default)]
struct MemoryState {
    invoices: BTreeMap<i32, Invoice>,
    history: Vec<StatusHistory>,
    next_invoice_id: i32,
    next_history_id: i32,
}

impl MemoryState {
    fn push_history(&mut self, entry: NewStatusEntry) -> StatusHistory {
        self.next_history_id += 1;
        let row = StatusHistory {
            id: self.next_history_id,
            invoice_id: entry.invoice_id,
            from_status: entry.from_status,
            status: entry.status,
            changed_at: entry.changed_at.into(),
            changed_by: entry.changed_by.clone(),
            comment: entry.comment,
            created_at: entry.changed_at.into(),
            created_by: entry.changed_by,
        };
        self.history.push(row.clone());
        row
    }
}

/// Process-local store; one mutex covers invoices and history so every
/// transition is applied as a unit.
#[derive(Default)]
pub struct MemoryInvoiceStore {
    state: Mutex<MemoryState>,
}

impl MemoryInvoiceStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl InvoiceStore for MemoryInvoiceStore {
    async fn find_invoice(&self, id: i32) -> Result<Option<Invoice>> {
        Ok(self.lock().invoices.get(&id).cloned())
    }

    async fn insert_invoice(&self, draft: NewInvoice, at: DateTime<Utc>) -> Result<Invoice> {
        let mut state = self.lock();
        state.next_invoice_id += 1;
        let id = state.next_invoice_id;

        let invoice = invoice_from_draft(id, draft, at);
        state.push_history(NewStatusEntry {
            invoice_id: id,
            from_status: None,
            status: InvoiceStatus::Submitted,
            changed_by: invoice.created_by.clone(),
            comment: Some("Invoice submitted".to_string()),
            changed_at: at,
        });
        state.invoices.insert(id, invoice.clone());

        Ok(invoice)
    }

    async fn apply_transition(&self, record: TransitionRecord) -> Result<Invoice> {
        let mut state = self.lock();
        let invoice_id = record.entry.invoice_id;

        let invoice = state
            .invoices
            .get_mut(&invoice_id)
            .ok_or(AppError::InvoiceNotFound { id: invoice_id })?;

        if invoice.status != record.expected_status
            || invoice.row_version != record.expected_version
        {
            return Err(AppError::ConcurrentModification { id: invoice_id });
        }

        invoice.status = record.entry.status;
        invoice.row_version += 1;
        invoice.modified_by = Some(record.entry.changed_by.clone());
        invoice.modified_at = Some(record.entry.changed_at.into());
        let updated = invoice.clone();

        state.push_history(record.entry);
        Ok(updated)
    }

    async fn append_history(&self, entry: NewStatusEntry) -> Result<StatusHistory> {
        let mut state = self.lock();
        if !state.invoices.contains_key(&entry.invoice_id) {
            return Err(AppError::InvoiceNotFound {
                id: entry.invoice_id,
            });
        }
        Ok(state.push_history(entry))
    }

    async fn history(&self, invoice_id: i32) -> Result<Vec<StatusHistory>> {
        let mut entries: Vec<StatusHistory> = self
            .lock()
            .history
            .iter()
            .filter(|h| h.invoice_id == invoice_id)
            .cloned()
            .collect();
        entries.sort_by_key(|h| h.id);
        Ok(entries)
    }

    async fn find_duplicate(
        &self,
        file_hash: Option<&str>,
        vendor_and_number: Option<(&str, &str)>,
    ) -> Result<Option<i32>> {
        let state = self.lock();
        let found = state.invoices.values().find(|inv| {
            let same_file = match (file_hash, inv.file_hash.as_deref()) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            };
            let same_number = vendor_and_number.is_some_and(|(vendor, number)| {
                inv.vendor_name.eq_ignore_ascii_case(vendor)
                    && inv.invoice_number.eq_ignore_ascii_case(number)
            });
            same_file || same_number
        });
        Ok(found.map(|inv| inv.id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(invoice_id: i32, from: InvoiceStatus, to: InvoiceStatus) -> NewStatusEntry {
        NewStatusEntry {
            invoice_id,
            from_status: Some(from),
            status: to,
            changed_by: "pm".to_string(),
            comment: None,
            changed_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_insert_writes_creation_entry() {
        let store = MemoryInvoiceStore::new();
        let invoice = store
            .insert_invoice(NewInvoice::new("INV-1", "Acme", "sec"), Utc::now())
            .await
            .unwrap();

        assert_eq!(invoice.status, InvoiceStatus::Submitted);
        assert_eq!(invoice.row_version, 1);

        let history = store.history(invoice.id).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].from_status, None);
        assert_eq!(history[0].status, InvoiceStatus::Submitted);
        assert_eq!(history[0].changed_by, "sec");
    }

    #[tokio::test]
    async fn test_stale_version_is_a_conflict() {
        let store = MemoryInvoiceStore::new();
        let invoice = store
            .insert_invoice(NewInvoice::new("INV-2", "Acme", "sec"), Utc::now())
            .await
            .unwrap();

        let first = TransitionRecord {
            expected_status: InvoiceStatus::Submitted,
            expected_version: 1,
            entry: entry(invoice.id, InvoiceStatus::Submitted, InvoiceStatus::UnderReview),
        };
        let updated = store.apply_transition(first.clone()).await.unwrap();
        assert_eq!(updated.row_version, 2);

        let err = store.apply_transition(first).await.unwrap_err();
        assert!(matches!(err, AppError::ConcurrentModification { .. }));
        assert_eq!(store.history(invoice.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_history_follows_append_order_not_clock() {
        let store = MemoryInvoiceStore::new();
        let invoice = store
            .insert_invoice(NewInvoice::new("INV-4", "Acme", "sec"), Utc::now())
            .await
            .unwrap();

        // second writer's clock runs an hour behind
        let mut skewed = entry(invoice.id, InvoiceStatus::Submitted, InvoiceStatus::UnderReview);
        skewed.changed_at = Utc::now() - chrono::Duration::hours(1);
        store
            .apply_transition(TransitionRecord {
                expected_status: InvoiceStatus::Submitted,
                expected_version: 1,
                entry: skewed,
            })
            .await
            .unwrap();

        let history = store.history(invoice.id).await.unwrap();
        let current = store.find_invoice(invoice.id).await.unwrap().unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].status, InvoiceStatus::Submitted);
        assert_eq!(history.last().map(|h| h.status), Some(current.status));
    }

    #[tokio::test]
    async fn test_duplicate_lookup() {
        let store = MemoryInvoiceStore::new();
        let mut draft = NewInvoice::new("INV-3", "Acme Trading", "sec");
        draft.file_hash = Some("abc".to_string());
        let existing = store.insert_invoice(draft, Utc::now()).await.unwrap();

        assert_eq!(
            store
                .find_duplicate(Some("abc"), Some(("Other", "X")))
                .await
                .unwrap(),
            Some(existing.id)
        );
        assert_eq!(
            store
                .find_duplicate(None, Some(("acme trading", "inv-3")))
                .await
                .unwrap(),
            Some(existing.id)
        );
        assert_eq!(
            store
                .find_duplicate(Some("zzz"), Some(("Acme", "INV-3")))
                .await
                .unwrap(),
            None
        );
        assert_eq!(store.find_duplicate(None, None).await.unwrap(), None);
    }
}
