//! Department hierarchy handlers

use crate::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use invoiceflow_common::{
    auth::{AuthContext, Role},
    db::{models::Department, DepartmentInput},
    errors::{AppError, Result},
};
use serde::Deserialize;
use validator::Validate;

#[derive(Debug, Deserialize, Validate)]
pub struct DepartmentRequest {
    #[validate(length(min = 1, max = 255))]
    pub name: String,

    pub parent_id: Option<i32>,

    #[validate(length(max = 255))]
    pub manager_name: Option<String>,
}

impl From<DepartmentRequest> for DepartmentInput {
    fn from(r: DepartmentRequest) -> Self {
        DepartmentInput {
            name: r.name,
            parent_id: r.parent_id,
            manager_name: r.manager_name,
        }
    }
}

pub async fn create_department(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(request): Json<DepartmentRequest>,
) -> Result<(StatusCode, Json<Department>)> {
    auth.require_role(Role::PM)?;
    request.validate()?;

    let department = state
        .repo
        .create_department(request.into(), auth.username())
        .await?;
    Ok((StatusCode::CREATED, Json(department)))
}

pub async fn list_departments(
    State(state): State<AppState>,
    _auth: AuthContext,
) -> Result<Json<Vec<Department>>> {
    Ok(Json(state.repo.list_departments().await?))
}

pub async fn get_department(
    State(state): State<AppState>,
    _auth: AuthContext,
    Path(id): Path<i32>,
) -> Result<Json<Department>> {
    state
        .repo
        .find_department(id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::not_found("department", id))
}

pub async fn department_children(
    State(state): State<AppState>,
    _auth: AuthContext,
    Path(id): Path<i32>,
) -> Result<Json<Vec<Department>>> {
    Ok(Json(state.repo.department_children(id).await?))
}

pub async fn update_department(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<i32>,
    Json(request): Json<DepartmentRequest>,
) -> Result<Json<Department>> {
    auth.require_role(Role::PM)?;
    request.validate()?;

    Ok(Json(
        state
            .repo
            .update_department(id, request.into(), auth.username())
            .await?,
    ))
}

pub async fn delete_department(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<i32>,
) -> Result<StatusCode> {
    auth.require_role(Role::Head)?;
    state.repo.delete_department(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
