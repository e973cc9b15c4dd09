//! Invoice handlers: manual entry, edits, workflow transitions, comments

use super::PageQuery;
use crate::AppState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::NaiveDate;
use invoiceflow_common::{
    auth::{AuthContext, Role},
    db::{
        models::{check_amount, CurrencyType, Invoice, InvoiceComment, InvoiceStatus, StatusHistory},
        InvoiceFilter, InvoiceUpdate, Page,
    },
    errors::{AppError, Result},
    workflow::{InvoiceStore, NewInvoice},
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Manually keyed invoice
#[derive(Debug, Deserialize, Validate)]
pub struct CreateInvoiceRequest {
    #[validate(length(min = 1, max = 100))]
    pub invoice_number: String,

    #[validate(length(min = 1, max = 255))]
    pub vendor_name: String,

    #[serde(default)]
    #[validate(length(max = 100))]
    pub vendor_tax_id: Option<String>,

    pub vendor_address: Option<String>,
    pub customer_name: Option<String>,
    pub customer_address: Option<String>,
    pub invoice_date: Option<NaiveDate>,
    pub due_date: Option<NaiveDate>,
    pub invoice_value: Option<Decimal>,
    pub subtotal: Option<Decimal>,
    pub tax_amount: Option<Decimal>,
    pub currency: Option<CurrencyType>,

    #[validate(length(max = 4000))]
    pub description: Option<String>,

    pub vendor_id: Option<i32>,
    pub project_id: Option<i32>,
    pub lpo_id: Option<i32>,
    pub duplicate_of_invoice_id: Option<i32>,
}

#[derive(Debug, Default, Deserialize, Validate)]
pub struct UpdateInvoiceRequest {
    #[validate(length(min = 1, max = 100))]
    pub invoice_number: Option<String>,
    pub invoice_date: Option<NaiveDate>,
    pub due_date: Option<NaiveDate>,
    pub invoice_value: Option<Decimal>,
    pub subtotal: Option<Decimal>,
    pub tax_amount: Option<Decimal>,
    pub currency: Option<CurrencyType>,
    #[validate(length(max = 4000))]
    pub description: Option<String>,
    #[validate(length(min = 1, max = 255))]
    pub vendor_name: Option<String>,
    pub vendor_tax_id: Option<String>,
    pub vendor_address: Option<String>,
    pub vendor_id: Option<i32>,
    pub project_id: Option<i32>,
    pub lpo_id: Option<i32>,
    pub duplicate_of_invoice_id: Option<i32>,
    pub requires_review: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListInvoicesQuery {
    pub status: Option<InvoiceStatus>,
    pub project_id: Option<i32>,
    pub vendor_id: Option<i32>,
    pub requires_review: Option<bool>,
    pub page: Option<u64>,
    pub per_page: Option<u64>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct TransitionRequest {
    pub target: InvoiceStatus,

    #[validate(length(max = 2000))]
    pub comment: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AllowedTransitionsResponse {
    pub invoice_id: i32,
    pub current: InvoiceStatus,
    pub targets: Vec<InvoiceStatus>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CommentRequest {
    #[validate(length(min = 1, max = 4000))]
    pub text: String,
}

fn check_amounts(fields: &[(&str, Option<Decimal>)]) -> Result<()> {
    for (name, value) in fields {
        if let Some(value) = value {
            check_amount(name, *value)?;
        }
    }
    Ok(())
}

impl CreateInvoiceRequest {
    fn into_draft(self, created_by: &str) -> NewInvoice {
        let mut draft = NewInvoice::new(self.invoice_number, self.vendor_name, created_by);
        draft.vendor_tax_id = self.vendor_tax_id.unwrap_or_default();
        draft.vendor_address = self.vendor_address;
        draft.customer_name = self.customer_name;
        draft.customer_address = self.customer_address;
        draft.invoice_date = self.invoice_date;
        draft.due_date = self.due_date;
        draft.invoice_value = self.invoice_value;
        draft.subtotal = self.subtotal;
        draft.tax_amount = self.tax_amount;
        draft.currency = self.currency;
        draft.description = self.description;
        draft.vendor_id = self.vendor_id;
        draft.project_id = self.project_id;
        draft.lpo_id = self.lpo_id;
        draft.duplicate_of_invoice_id = self.duplicate_of_invoice_id;
        draft
    }
}

impl From<UpdateInvoiceRequest> for InvoiceUpdate {
    fn from(r: UpdateInvoiceRequest) -> Self {
        InvoiceUpdate {
            invoice_number: r.invoice_number,
            invoice_date: r.invoice_date,
            due_date: r.due_date,
            invoice_value: r.invoice_value,
            subtotal: r.subtotal,
            tax_amount: r.tax_amount,
            currency: r.currency,
            description: r.description,
            vendor_name: r.vendor_name,
            vendor_tax_id: r.vendor_tax_id,
            vendor_address: r.vendor_address,
            vendor_id: r.vendor_id,
            project_id: r.project_id,
            lpo_id: r.lpo_id,
            duplicate_of_invoice_id: r.duplicate_of_invoice_id,
            requires_review: r.requires_review,
        }
    }
}

/// Create an invoice in Submitted; an earlier invoice with the same vendor
/// and number is flagged as the original
pub async fn create_invoice(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(request): Json<CreateInvoiceRequest>,
) -> Result<(StatusCode, Json<Invoice>)> {
    auth.require_role(Role::Secretary)?;
    request.validate()?;
    check_amounts(&[
        ("invoice_value", request.invoice_value),
        ("subtotal", request.subtotal),
        ("tax_amount", request.tax_amount),
    ])?;

    let mut draft = request.into_draft(auth.username());
    if draft.duplicate_of_invoice_id.is_none() {
        draft.duplicate_of_invoice_id = state
            .repo
            .find_duplicate(
                None,
                Some((draft.vendor_name.as_str(), draft.invoice_number.as_str())),
            )
            .await?;
    }

    let invoice = state.engine.submit(draft, &auth.actor).await?;
    Ok((StatusCode::CREATED, Json(invoice)))
}

pub async fn list_invoices(
    State(state): State<AppState>,
    _auth: AuthContext,
    Query(query): Query<ListInvoicesQuery>,
) -> Result<Json<Page<Invoice>>> {
    let filter = InvoiceFilter {
        status: query.status,
        project_id: query.project_id,
        vendor_id: query.vendor_id,
        requires_review: query.requires_review,
    };

    let paging = PageQuery {
        page: query.page,
        per_page: query.per_page,
    };
    let page = state
        .repo
        .list_invoices(&filter, paging.page(), paging.per_page())
        .await?;
    Ok(Json(page))
}

pub async fn get_invoice(
    State(state): State<AppState>,
    _auth: AuthContext,
    Path(id): Path<i32>,
) -> Result<Json<Invoice>> {
    Ok(Json(state.engine.get(id).await?))
}

/// Edit fields of an open invoice; status only moves through transitions
pub async fn update_invoice(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<i32>,
    Json(request): Json<UpdateInvoiceRequest>,
) -> Result<Json<Invoice>> {
    auth.require_role(Role::Secretary)?;
    request.validate()?;

    let invoice = state
        .repo
        .update_invoice(id, request.into(), auth.username())
        .await?;
    tracing::info!(invoice_id = id, actor = %auth.username(), "Invoice updated");
    Ok(Json(invoice))
}

pub async fn delete_invoice(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<i32>,
) -> Result<StatusCode> {
    auth.require_role(Role::Head)?;

    if !state.repo.delete_invoice(id).await? {
        return Err(AppError::InvoiceNotFound { id });
    }
    tracing::info!(invoice_id = id, actor = %auth.username(), "Invoice deleted");
    Ok(StatusCode::NO_CONTENT)
}

pub async fn transition_invoice(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<i32>,
    Json(request): Json<TransitionRequest>,
) -> Result<Json<Invoice>> {
    request.validate()?;

    let invoice = state
        .engine
        .request_transition(id, request.target, &auth.actor, request.comment)
        .await?;
    Ok(Json(invoice))
}

/// Statuses the caller could move the invoice to right now
pub async fn allowed_transitions(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<i32>,
) -> Result<Json<AllowedTransitionsResponse>> {
    let invoice = state.engine.get(id).await?;
    let targets = state.engine.allowed_targets(id, auth.role()).await?;

    Ok(Json(AllowedTransitionsResponse {
        invoice_id: id,
        current: invoice.status,
        targets,
    }))
}

pub async fn invoice_history(
    State(state): State<AppState>,
    _auth: AuthContext,
    Path(id): Path<i32>,
) -> Result<Json<Vec<StatusHistory>>> {
    Ok(Json(state.engine.history(id).await?))
}

pub async fn add_comment(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<i32>,
    Json(request): Json<CommentRequest>,
) -> Result<(StatusCode, Json<InvoiceComment>)> {
    auth.require_role(Role::Secretary)?;
    request.validate()?;

    let comment = state
        .repo
        .add_comment(id, auth.username(), request.text)
        .await?;
    Ok((StatusCode::CREATED, Json(comment)))
}

pub async fn list_comments(
    State(state): State<AppState>,
    _auth: AuthContext,
    Path(id): Path<i32>,
) -> Result<Json<Vec<InvoiceComment>>> {
    Ok(Json(state.repo.list_comments(id).await?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_negative_amounts_rejected() {
        let err = check_amounts(&[
            ("invoice_value", Some(Decimal::new(100, 0))),
            ("tax_amount", Some(Decimal::new(-5, 0))),
        ])
        .unwrap_err();
        assert!(matches!(err, AppError::Validation { field: Some(ref f), .. } if f == "tax_amount"));

        assert!(check_amounts(&[("subtotal", None), ("invoice_value", Some(Decimal::ZERO))]).is_ok());
    }

    #[test]
    fn test_amounts_must_fit_money_column() {
        let err = check_amounts(&[("subtotal", Some(Decimal::new(10_005, 3)))]).unwrap_err();
        assert!(matches!(err, AppError::Validation { field: Some(ref f), .. } if f == "subtotal"));

        let huge = Decimal::from_str_exact("12345678901234567890.12").unwrap();
        let err = check_amounts(&[("invoice_value", Some(huge))]).unwrap_err();
        assert!(matches!(err, AppError::Validation { field: Some(ref f), .. } if f == "invoice_value"));
    }

    #[test]
    fn test_create_request_builds_submitted_draft() {
        let request: CreateInvoiceRequest = serde_json::from_value(serde_json::json!({
            "invoice_number": "INV-1001",
            "vendor_name": "Gulf Steel LLC",
            "invoice_value": "1250.00",
            "currency": "AED",
            "project_id": 4
        }))
        .unwrap();
        assert!(request.validate().is_ok());

        let draft = request.into_draft("sec");
        assert_eq!(draft.status, InvoiceStatus::Submitted);
        assert_eq!(draft.vendor_tax_id, "");
        assert_eq!(draft.currency, Some(CurrencyType::Aed));
        assert_eq!(draft.invoice_value, Some(Decimal::new(125000, 2)));
        assert_eq!(draft.project_id, Some(4));
        assert_eq!(draft.created_by, "sec");
    }

    #[test]
    fn test_transition_request_uses_status_names() {
        let request: TransitionRequest = serde_json::from_value(serde_json::json!({
            "target": "PMOReview",
            "comment": "Ready for PMO"
        }))
        .unwrap();
        assert_eq!(request.target, InvoiceStatus::PmoReview);

        assert!(serde_json::from_value::<TransitionRequest>(serde_json::json!({
            "target": "Paid"
        }))
        .is_err());
    }
}
