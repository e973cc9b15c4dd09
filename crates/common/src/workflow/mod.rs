//! Invoice approval workflow
//!
//! - `policy`: which role may move an invoice between two statuses
//! - `ledger`: append-only status history
//! - `engine`: the transactional transition path
//! - `store`: persistence boundary the engine runs against

mod engine;
mod ledger;
pub mod policy;
mod store;

pub use engine::WorkflowEngine;
pub use ledger::StatusLedger;
pub use policy::{allowed_targets, can_transition, minimum_role};
pub use store::{
    FileMeta, InvoiceStore, MemoryInvoiceStore, NewInvoice, NewStatusEntry, TransitionRecord,
};

pub(crate) use store::invoice_from_draft;
