//! Vendor handlers

use super::PageQuery;
use crate::AppState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use invoiceflow_common::{
    auth::{AuthContext, Role},
    db::{models::Vendor, Page, VendorInput},
    errors::{AppError, Result},
};
use serde::Deserialize;
use validator::Validate;

#[derive(Debug, Deserialize, Validate)]
pub struct VendorRequest {
    #[validate(length(min = 1, max = 255))]
    pub name: String,

    #[validate(length(max = 100))]
    pub tax_id: Option<String>,

    #[validate(email)]
    pub email: Option<String>,

    #[validate(length(max = 50))]
    pub phone: Option<String>,

    pub address: Option<String>,
    pub is_active: Option<bool>,
}

impl From<VendorRequest> for VendorInput {
    fn from(r: VendorRequest) -> Self {
        VendorInput {
            name: r.name,
            tax_id: r.tax_id,
            email: r.email,
            phone: r.phone,
            address: r.address,
            is_active: r.is_active,
        }
    }
}

pub async fn create_vendor(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(request): Json<VendorRequest>,
) -> Result<(StatusCode, Json<Vendor>)> {
    auth.require_role(Role::PM)?;
    request.validate()?;

    let vendor = state.repo.create_vendor(request.into(), auth.username()).await?;
    Ok((StatusCode::CREATED, Json(vendor)))
}

pub async fn list_vendors(
    State(state): State<AppState>,
    _auth: AuthContext,
    Query(query): Query<PageQuery>,
) -> Result<Json<Page<Vendor>>> {
    Ok(Json(
        state.repo.list_vendors(query.page(), query.per_page()).await?,
    ))
}

pub async fn get_vendor(
    State(state): State<AppState>,
    _auth: AuthContext,
    Path(id): Path<i32>,
) -> Result<Json<Vendor>> {
    state
        .repo
        .find_vendor(id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::not_found("vendor", id))
}

pub async fn update_vendor(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<i32>,
    Json(request): Json<VendorRequest>,
) -> Result<Json<Vendor>> {
    auth.require_role(Role::PM)?;
    request.validate()?;

    Ok(Json(
        state.repo.update_vendor(id, request.into(), auth.username()).await?,
    ))
}

pub async fn delete_vendor(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<i32>,
) -> Result<StatusCode> {
    auth.require_role(Role::Head)?;
    state.repo.delete_vendor(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vendor_email_is_checked() {
        let request: VendorRequest = serde_json::from_value(serde_json::json!({
            "name": "Gulf Steel LLC",
            "email": "not-an-email"
        }))
        .unwrap();
        assert!(request.validate().is_err());
    }
}
