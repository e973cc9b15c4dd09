//! Local purchase order handlers

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
        models::{CurrencyType, Lpo},
        LpoInput, Page,
    },
    errors::{AppError, Result},
};
use rust_decimal::Decimal;
use serde::Deserialize;
use validator::Validate;

#[derive(Debug, Deserialize, Validate)]
pub struct LpoRequest {
    #[validate(length(min = 1, max = 50))]
    pub lpo_number: String,

    pub project_id: Option<i32>,
    pub vendor_id: Option<i32>,
    pub issue_date: Option<NaiveDate>,
    pub amount: Option<Decimal>,
    pub currency: Option<CurrencyType>,

    #[validate(length(max = 4000))]
    pub description: Option<String>,
}

impl From<LpoRequest> for LpoInput {
    fn from(r: LpoRequest) -> Self {
        LpoInput {
            lpo_number: r.lpo_number.trim().to_string(),
            project_id: r.project_id,
            vendor_id: r.vendor_id,
            issue_date: r.issue_date,
            amount: r.amount,
            currency: r.currency,
            description: r.description,
        }
    }
}

pub async fn create_lpo(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(request): Json<LpoRequest>,
) -> Result<(StatusCode, Json<Lpo>)> {
    auth.require_role(Role::PM)?;
    request.validate()?;

    let lpo = state.repo.create_lpo(request.into(), auth.username()).await?;
    Ok((StatusCode::CREATED, Json(lpo)))
}

pub async fn list_lpos(
    State(state): State<AppState>,
    _auth: AuthContext,
    Query(query): Query<PageQuery>,
) -> Result<Json<Page<Lpo>>> {
    Ok(Json(state.repo.list_lpos(query.page(), query.per_page()).await?))
}

pub async fn get_lpo(
    State(state): State<AppState>,
    _auth: AuthContext,
    Path(id): Path<i32>,
) -> Result<Json<Lpo>> {
    state
        .repo
        .find_lpo(id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::not_found("lpo", id))
}

pub async fn update_lpo(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<i32>,
    Json(request): Json<LpoRequest>,
) -> Result<Json<Lpo>> {
    auth.require_role(Role::PM)?;
    request.validate()?;

    Ok(Json(
        state.repo.update_lpo(id, request.into(), auth.username()).await?,
    ))
}

pub async fn delete_lpo(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<i32>,
) -> Result<StatusCode> {
    auth.require_role(Role::Head)?;
    state.repo.delete_lpo(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
