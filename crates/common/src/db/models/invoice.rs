//! Invoice entity and its workflow status

use crate::errors::AppError;
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Invoice workflow status, stored as its numeric code
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
)]
#[sea_orm(rs_type = "i32", db_type = "Integer")]
pub enum InvoiceStatus {
    #[sea_orm(num_value = 0)]
    Submitted,
    #[sea_orm(num_value = 1)]
    UnderReview,
    #[sea_orm(num_value = 2)]
    Approved,
    #[sea_orm(num_value = 3)]
    InProgress,
    #[sea_orm(num_value = 4)]
    #[serde(rename = "PMOReview")]
    PmoReview,
    #[sea_orm(num_value = 5)]
    Completed,
    #[sea_orm(num_value = 6)]
    Rejected,
    #[sea_orm(num_value = 7)]
    Cancelled,
    #[sea_orm(num_value = 8)]
    OnHold,
}

impl InvoiceStatus {
    pub const ALL: [InvoiceStatus; 9] = [
        InvoiceStatus::Submitted,
        InvoiceStatus::UnderReview,
        InvoiceStatus::Approved,
        InvoiceStatus::InProgress,
        InvoiceStatus::PmoReview,
        InvoiceStatus::Completed,
        InvoiceStatus::Rejected,
        InvoiceStatus::Cancelled,
        InvoiceStatus::OnHold,
    ];

    pub fn code(self) -> i32 {
        match self {
            InvoiceStatus::Submitted => 0,
            InvoiceStatus::UnderReview => 1,
            InvoiceStatus::Approved => 2,
            InvoiceStatus::InProgress => 3,
            InvoiceStatus::PmoReview => 4,
            InvoiceStatus::Completed => 5,
            InvoiceStatus::Rejected => 6,
            InvoiceStatus::Cancelled => 7,
            InvoiceStatus::OnHold => 8,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.code() == code)
    }

    /// No outgoing transitions except by Admin override
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            InvoiceStatus::Completed | InvoiceStatus::Rejected | InvoiceStatus::Cancelled
        )
    }

    /// States that can be put on hold
    pub fn is_active(self) -> bool {
        matches!(
            self,
            InvoiceStatus::Submitted
                | InvoiceStatus::UnderReview
                | InvoiceStatus::Approved
                | InvoiceStatus::InProgress
                | InvoiceStatus::PmoReview
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            InvoiceStatus::Submitted => "Submitted",
            InvoiceStatus::UnderReview => "UnderReview",
            InvoiceStatus::Approved => "Approved",
            InvoiceStatus::InProgress => "InProgress",
            InvoiceStatus::PmoReview => "PMOReview",
            InvoiceStatus::Completed => "Completed",
            InvoiceStatus::Rejected => "Rejected",
            InvoiceStatus::Cancelled => "Cancelled",
            InvoiceStatus::OnHold => "OnHold",
        }
    }
}

impl fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Supported invoice currencies
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(3))")]
#[serde(rename_all = "UPPERCASE")]
pub enum CurrencyType {
    #[sea_orm(string_value = "AED")]
    Aed,
    #[sea_orm(string_value = "USD")]
    Usd,
    #[sea_orm(string_value = "EUR")]
    Eur,
    #[sea_orm(string_value = "GBP")]
    Gbp,
    #[sea_orm(string_value = "SAR")]
    Sar,
    #[sea_orm(string_value = "QAR")]
    Qar,
    #[sea_orm(string_value = "KWD")]
    Kwd,
    #[sea_orm(string_value = "BHD")]
    Bhd,
    #[sea_orm(string_value = "OMR")]
    Omr,
    #[sea_orm(string_value = "INR")]
    Inr,
}

impl CurrencyType {
    /// Parse an ISO code; unknown codes yield `None`
    pub fn parse(code: &str) -> Option<Self> {
        match code.trim().to_ascii_uppercase().as_str() {
            "AED" => Some(CurrencyType::Aed),
            "USD" => Some(CurrencyType::Usd),
            "EUR" => Some(CurrencyType::Eur),
            "GBP" => Some(CurrencyType::Gbp),
            "SAR" => Some(CurrencyType::Sar),
            "QAR" => Some(CurrencyType::Qar),
            "KWD" => Some(CurrencyType::Kwd),
            "BHD" => Some(CurrencyType::Bhd),
            "OMR" => Some(CurrencyType::Omr),
            "INR" => Some(CurrencyType::Inr),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "invoices")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    #[sea_orm(column_type = "Text")]
    pub invoice_number: String,

    pub invoice_date: Option<Date>,

    pub due_date: Option<Date>,

    #[sea_orm(column_type = "Decimal(Some((18, 2)))", nullable)]
    pub invoice_value: Option<Decimal>,

    #[sea_orm(column_type = "Decimal(Some((18, 2)))", nullable)]
    pub subtotal: Option<Decimal>,

    #[sea_orm(column_type = "Decimal(Some((18, 2)))", nullable)]
    pub tax_amount: Option<Decimal>,

    pub currency: Option<CurrencyType>,

    pub status: InvoiceStatus,

    #[sea_orm(column_type = "Text", nullable)]
    pub description: Option<String>,

    #[sea_orm(column_type = "Text")]
    pub vendor_name: String,

    #[sea_orm(column_type = "Text")]
    pub vendor_tax_id: String,

    #[sea_orm(column_type = "Text", nullable)]
    pub vendor_address: Option<String>,

    #[sea_orm(column_type = "Text", nullable)]
    pub customer_name: Option<String>,

    #[sea_orm(column_type = "Text", nullable)]
    pub customer_address: Option<String>,

    pub vendor_id: Option<i32>,

    pub project_id: Option<i32>,

    pub lpo_id: Option<i32>,

    #[sea_orm(column_type = "Text", nullable)]
    pub file_path: Option<String>,

    #[sea_orm(column_type = "Text", nullable)]
    pub file_name: Option<String>,

    #[sea_orm(column_type = "Text", nullable)]
    pub file_type: Option<String>,

    pub file_size: Option<i64>,

    /// SHA-256 of the uploaded file, hex encoded
    #[sea_orm(column_type = "Text", nullable)]
    pub file_hash: Option<String>,

    pub duplicate_of_invoice_id: Option<i32>,

    /// Set when extraction left placeholder values behind
    pub requires_review: bool,

    pub confidence_score: Option<f64>,

    /// Per-field OCR confidence, keyed by field name
    #[sea_orm(column_type = "JsonBinary")]
    pub field_confidence: Json,

    #[sea_orm(column_type = "JsonBinary")]
    pub line_items: Json,

    #[sea_orm(column_type = "Text", nullable)]
    pub ocr_raw_text: Option<String>,

    /// Optimistic lock counter, bumped on every status change
    pub row_version: i32,

    #[sea_orm(column_type = "Text")]
    pub created_by: String,

    pub created_at: DateTimeWithTimeZone,

    #[sea_orm(column_type = "Text", nullable)]
    pub modified_by: Option<String>,

    pub modified_at: Option<DateTimeWithTimeZone>,
}

/// Digits left of the point allowed by a `NUMERIC(18, 2)` money column
const MONEY_INTEGER_DIGITS: u32 = 16;
const MONEY_SCALE: u32 = 2;

/// Reject an amount that is negative or does not fit a money column.
///
/// Trailing zeros do not count against the scale, so `1.500` is accepted
/// while `1.505` is not.
pub fn check_amount(field: &str, value: Decimal) -> crate::errors::Result<()> {
    if value.is_sign_negative() && !value.is_zero() {
        return Err(AppError::validation(
            field,
            format!("{} must not be negative (got {})", field, value),
        ));
    }
    if value.normalize().scale() > MONEY_SCALE {
        return Err(AppError::validation(
            field,
            format!("{} allows at most {} decimal places (got {})", field, MONEY_SCALE, value),
        ));
    }
    if value.abs() >= Decimal::from(10u64.pow(MONEY_INTEGER_DIGITS)) {
        return Err(AppError::validation(
            field,
            format!("{} exceeds the largest storable amount (got {})", field, value),
        ));
    }
    Ok(())
}

impl Model {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::status_history::Entity")]
    StatusHistory,

    #[sea_orm(has_many = "super::invoice_comment::Entity")]
    Comments,

    #[sea_orm(
        belongs_to = "super::vendor::Entity",
        from = "Column::VendorId",
        to = "super::vendor::Column::Id",
        on_delete = "Restrict"
    )]
    Vendor,

    #[sea_orm(
        belongs_to = "super::project::Entity",
        from = "Column::ProjectId",
        to = "super::project::Column::Id",
        on_delete = "Restrict"
    )]
    Project,

    #[sea_orm(
        belongs_to = "super::lpo::Entity",
        from = "Column::LpoId",
        to = "super::lpo::Column::Id",
        on_delete = "Restrict"
    )]
    Lpo,
}

impl Related<super::status_history::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::StatusHistory.def()
    }
}

impl Related<super::invoice_comment::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Comments.def()
    }
}

impl Related<super::vendor::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Vendor.def()
    }
}

impl Related<super::project::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Project.def()
    }
}

impl Related<super::lpo::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Lpo.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes_are_stable() {
        for (expected, status) in InvoiceStatus::ALL.into_iter().enumerate() {
            assert_eq!(status.code(), expected as i32);
            assert_eq!(InvoiceStatus::from_code(expected as i32), Some(status));
        }
        assert_eq!(InvoiceStatus::from_code(9), None);
    }

    #[test]
    fn test_terminal_and_active_are_disjoint() {
        for status in InvoiceStatus::ALL {
            assert!(!(status.is_terminal() && status.is_active()));
        }
        assert!(!InvoiceStatus::OnHold.is_terminal());
        assert!(!InvoiceStatus::OnHold.is_active());
    }

    #[test]
    fn test_currency_parse() {
        assert_eq!(CurrencyType::parse(" aed "), Some(CurrencyType::Aed));
        assert_eq!(CurrencyType::parse("INR"), Some(CurrencyType::Inr));
        assert_eq!(CurrencyType::parse("JPY"), None);
        assert_eq!(CurrencyType::parse(""), None);
    }

    #[test]
    fn test_check_amount_bounds() {
        assert!(check_amount("invoice_value", Decimal::new(105000, 2)).is_ok());
        assert!(check_amount("invoice_value", Decimal::new(1500, 3)).is_ok());
        assert!(check_amount("invoice_value", Decimal::ZERO).is_ok());
        assert!(check_amount("invoice_value", Decimal::new(9_999_999_999_999_999, 0)).is_ok());

        let too_precise = check_amount("subtotal", Decimal::new(1505, 3)).unwrap_err();
        assert!(matches!(too_precise, AppError::Validation { field: Some(ref f), .. } if f == "subtotal"));

        let too_large = Decimal::from_str_exact("12345678901234567890.12").unwrap();
        assert!(check_amount("invoice_value", too_large).is_err());
        assert!(check_amount("invoice_value", Decimal::new(10_000_000_000_000_000, 0)).is_err());
        assert!(check_amount("tax_amount", Decimal::new(-1, 0)).is_err());
    }

    #[test]
    fn test_status_serializes_by_name() {
        let json = serde_json::to_string(&InvoiceStatus::PmoReview).unwrap();
        assert_eq!(json, "\"PMOReview\"");
        let parsed: InvoiceStatus = serde_json::from_str("\"OnHold\"").unwrap();
        assert_eq!(parsed, InvoiceStatus::OnHold);
    }
}
