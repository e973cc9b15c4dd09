//! Invoice workflow engine
//!
//! The single write path for invoice status. Every transition is checked
//! against the policy table, applied with an optimistic guard on the
//! loaded status and row version, and recorded in the ledger inside the
//! same unit of work. Notifications go out after commit and never affect
//! the outcome.

use super::ledger::StatusLedger;
use super::policy;
use super::store::{InvoiceStore, NewInvoice, NewStatusEntry, TransitionRecord};
use crate::auth::{Actor, Role};
use crate::db::models::{Invoice, InvoiceStatus, StatusHistory};
use crate::errors::{AppError, Result};
use crate::metrics;
use crate::notifications::{Notifier, TransitionEvent};
use chrono::Utc;
use std::sync::Arc;
use tracing::{info, instrument, warn, Instrument};

pub struct WorkflowEngine {
    store: Arc<dyn InvoiceStore>,
    ledger: StatusLedger,
    notifier: Arc<dyn Notifier>,
}

impl WorkflowEngine {
    pub fn new(store: Arc<dyn InvoiceStore>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            ledger: StatusLedger::new(Arc::clone(&store)),
            store,
            notifier,
        }
    }

    pub fn ledger(&self) -> &StatusLedger {
        &self.ledger
    }

    /// Create an invoice in Submitted together with its creation entry
    #[instrument(skip(self, draft, actor), fields(invoice_number = %draft.invoice_number, actor = %actor.username))]
    pub async fn submit(&self, mut draft: NewInvoice, actor: &Actor) -> Result<Invoice> {
        if !actor.role.at_least(Role::Secretary) {
            return Err(AppError::Forbidden {
                message: format!("Role {} cannot submit invoices", actor.role),
            });
        }

        if let Some(original) = draft.duplicate_of_invoice_id {
            if self.store.find_invoice(original).await?.is_none() {
                return Err(AppError::validation(
                    "duplicate_of_invoice_id",
                    format!("invoice {} does not exist", original),
                ));
            }
        }

        draft.status = InvoiceStatus::Submitted;
        draft.created_by = actor.username.clone();
        let source = if draft.file.is_some() { "upload" } else { "manual" };

        let invoice = self.store.insert_invoice(draft, Utc::now()).await?;

        metrics::record_submission(source);
        info!(
            invoice_id = invoice.id,
            requires_review = invoice.requires_review,
            duplicate_of = ?invoice.duplicate_of_invoice_id,
            "Invoice submitted"
        );

        Ok(invoice)
    }

    pub async fn get(&self, invoice_id: i32) -> Result<Invoice> {
        self.store
            .find_invoice(invoice_id)
            .await?
            .ok_or(AppError::InvoiceNotFound { id: invoice_id })
    }

    pub async fn history(&self, invoice_id: i32) -> Result<Vec<StatusHistory>> {
        self.ledger.history(invoice_id).await
    }

    /// Move an invoice to `target` on behalf of `actor`.
    ///
    /// Fails with `ForbiddenTransition` when the policy denies the move and
    /// with `ConcurrentModification` when another writer changed the invoice
    /// after it was loaded. In both cases nothing is written. There is no
    /// internal retry.
    #[instrument(skip(self, actor, comment), fields(actor = %actor.username, role = %actor.role))]
    pub async fn request_transition(
        &self,
        invoice_id: i32,
        target: InvoiceStatus,
        actor: &Actor,
        comment: Option<String>,
    ) -> Result<Invoice> {
        let invoice = match self.store.find_invoice(invoice_id).await? {
            Some(invoice) => invoice,
            None => {
                metrics::record_transition_rejected("not_found");
                return Err(AppError::InvoiceNotFound { id: invoice_id });
            }
        };
        let current = invoice.status;

        if !policy::can_transition(current, target, actor.role) {
            return Err(self.reject(current, target, actor));
        }

        // Resume goes back to where the hold started
        if current == InvoiceStatus::OnHold && target.is_active() && actor.role != Role::Admin {
            if let Some(held_from) = self.ledger.held_from(invoice_id).await? {
                if held_from != target {
                    return Err(self.reject(current, target, actor));
                }
            }
        }

        let record = TransitionRecord {
            expected_status: current,
            expected_version: invoice.row_version,
            entry: NewStatusEntry {
                invoice_id,
                from_status: Some(current),
                status: target,
                changed_by: actor.username.clone(),
                comment: comment.clone(),
                changed_at: Utc::now(),
            },
        };

        let updated = match self.store.apply_transition(record).await {
            Ok(updated) => updated,
            Err(err @ AppError::ConcurrentModification { .. }) => {
                metrics::record_transition_rejected("conflict");
                warn!(invoice_id, from = %current, to = %target, "Transition lost a concurrent update");
                return Err(err);
            }
            Err(err) => return Err(err),
        };

        metrics::record_transition(current.as_str(), target.as_str());
        info!(invoice_id, from = %current, to = %target, "Invoice transitioned");

        self.dispatch(TransitionEvent {
            invoice_id,
            invoice_number: updated.invoice_number.clone(),
            from: current,
            to: target,
            actor: actor.username.clone(),
            role: actor.role,
            comment,
            occurred_at: Utc::now(),
        });

        Ok(updated)
    }

    /// Targets `role` could move this invoice to right now
    pub async fn allowed_targets(&self, invoice_id: i32, role: Role) -> Result<Vec<InvoiceStatus>> {
        let invoice = self.get(invoice_id).await?;
        let mut targets = policy::allowed_targets(invoice.status, role);

        if invoice.status == InvoiceStatus::OnHold && role != Role::Admin {
            if let Some(held_from) = self.ledger.held_from(invoice_id).await? {
                targets.retain(|t| !t.is_active() || *t == held_from);
            }
        }

        Ok(targets)
    }

    fn reject(&self, from: InvoiceStatus, to: InvoiceStatus, actor: &Actor) -> AppError {
        metrics::record_transition_rejected("forbidden");
        AppError::ForbiddenTransition {
            from: from.to_string(),
            to: to.to_string(),
            role: actor.role.to_string(),
        }
    }

    fn dispatch(&self, event: TransitionEvent) {
        let notifier = Arc::clone(&self.notifier);
        tokio::spawn(
            async move {
                if let Err(e) = notifier.notify(&event).await {
                    warn!(
                        invoice_id = event.invoice_id,
                        notifier = notifier.name(),
                        error = %e,
                        "Transition notification failed"
                    );
                    metrics::record_notification_failure(notifier.name());
                }
            }
            .in_current_span(),
        );
    }
}
