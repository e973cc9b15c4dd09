//! Reporting handlers

use crate::AppState;
use axum::{extract::State, Json};
use invoiceflow_common::{
    auth::AuthContext,
    db::StatusSummary,
    errors::Result,
};
use rust_decimal::Decimal;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct StatusSummaryResponse {
    pub statuses: Vec<StatusSummary>,
    pub total_count: i64,
    pub total_value: Decimal,
}

impl From<Vec<StatusSummary>> for StatusSummaryResponse {
    fn from(statuses: Vec<StatusSummary>) -> Self {
        let total_count = statuses.iter().map(|s| s.count).sum();
        let total_value = statuses.iter().map(|s| s.total_value).sum();
        Self {
            statuses,
            total_count,
            total_value,
        }
    }
}

/// Invoice count and value per workflow status
pub async fn status_summary(
    State(state): State<AppState>,
    _auth: AuthContext,
) -> Result<Json<StatusSummaryResponse>> {
    Ok(Json(state.repo.status_summary().await?.into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use invoiceflow_common::db::models::InvoiceStatus;

    #[test]
    fn test_totals() {
        let response = StatusSummaryResponse::from(vec![
            StatusSummary {
                status: InvoiceStatus::Submitted,
                count: 2,
                total_value: Decimal::new(1000, 0),
            },
            StatusSummary {
                status: InvoiceStatus::Approved,
                count: 1,
                total_value: Decimal::new(250, 1),
            },
        ]);
        assert_eq!(response.total_count, 3);
        assert_eq!(response.total_value, Decimal::new(10250, 1));
    }
}
