//! Project handlers

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
        models::{CurrencyType, Project},
        Page, ProjectInput,
    },
    errors::{AppError, Result},
};
use rust_decimal::Decimal;
use serde::Deserialize;
use validator::{Validate, ValidationError};

#[derive(Debug, Deserialize, Validate)]
#[validate(schema(function = "validate_project_dates"))]
pub struct ProjectRequest {
    #[validate(length(min = 1, max = 50))]
    pub project_code: String,

    #[validate(length(min = 1, max = 255))]
    pub name: String,

    pub description: Option<String>,
    pub department_id: Option<i32>,
    pub budget: Option<Decimal>,
    pub currency: Option<CurrencyType>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

fn validate_project_dates(request: &ProjectRequest) -> std::result::Result<(), ValidationError> {
    if let (Some(start), Some(end)) = (request.start_date, request.end_date) {
        if end < start {
            return Err(ValidationError::new("end_date_before_start_date"));
        }
    }
    if request.budget.is_some_and(|b| b < Decimal::ZERO) {
        return Err(ValidationError::new("negative_budget"));
    }
    Ok(())
}

impl From<ProjectRequest> for ProjectInput {
    fn from(r: ProjectRequest) -> Self {
        ProjectInput {
            project_code: r.project_code.trim().to_string(),
            name: r.name,
            description: r.description,
            department_id: r.department_id,
            budget: r.budget,
            currency: r.currency,
            start_date: r.start_date,
            end_date: r.end_date,
        }
    }
}

pub async fn create_project(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(request): Json<ProjectRequest>,
) -> Result<(StatusCode, Json<Project>)> {
    auth.require_role(Role::PM)?;
    request.validate()?;

    let project = state.repo.create_project(request.into(), auth.username()).await?;
    tracing::info!(project_id = project.id, code = %project.project_code, "Project created");
    Ok((StatusCode::CREATED, Json(project)))
}

pub async fn list_projects(
    State(state): State<AppState>,
    _auth: AuthContext,
    Query(query): Query<PageQuery>,
) -> Result<Json<Page<Project>>> {
    Ok(Json(
        state.repo.list_projects(query.page(), query.per_page()).await?,
    ))
}

pub async fn get_project(
    State(state): State<AppState>,
    _auth: AuthContext,
    Path(id): Path<i32>,
) -> Result<Json<Project>> {
    state
        .repo
        .find_project(id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::not_found("project", id))
}

pub async fn update_project(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<i32>,
    Json(request): Json<ProjectRequest>,
) -> Result<Json<Project>> {
    auth.require_role(Role::PM)?;
    request.validate()?;

    Ok(Json(
        state.repo.update_project(id, request.into(), auth.username()).await?,
    ))
}

pub async fn delete_project(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<i32>,
) -> Result<StatusCode> {
    auth.require_role(Role::Head)?;
    state.repo.delete_project(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(start: &str, end: &str) -> ProjectRequest {
        serde_json::from_value(serde_json::json!({
            "project_code": "PRJ-7",
            "name": "Tower B fit-out",
            "start_date": start,
            "end_date": end,
        }))
        .unwrap()
    }

    #[test]
    fn test_end_date_must_follow_start() {
        assert!(request("2026-01-01", "2026-06-30").validate().is_ok());
        assert!(request("2026-06-30", "2026-01-01").validate().is_err());
    }
}
