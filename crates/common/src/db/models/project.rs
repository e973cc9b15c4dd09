//! Project entity

use super::invoice::CurrencyType;
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "projects")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    #[sea_orm(column_type = "Text", unique)]
    pub project_code: String,

    #[sea_orm(column_type = "Text")]
    pub name: String,

    #[sea_orm(column_type = "Text", nullable)]
    pub description: Option<String>,

    pub department_id: Option<i32>,

    #[sea_orm(column_type = "Decimal(Some((18, 2)))", nullable)]
    pub budget: Option<Decimal>,

    pub currency: Option<CurrencyType>,

    pub start_date: Option<Date>,

    pub end_date: Option<Date>,

    #[sea_orm(column_type = "Text")]
    pub created_by: String,

    pub created_at: DateTimeWithTimeZone,

    #[sea_orm(column_type = "Text", nullable)]
    pub modified_by: Option<String>,

    pub modified_at: Option<DateTimeWithTimeZone>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::department_hierarchy::Entity",
        from = "Column::DepartmentId",
        to = "super::department_hierarchy::Column::Id"
    )]
    Department,

    #[sea_orm(has_many = "super::invoice::Entity")]
    Invoices,

    #[sea_orm(has_many = "super::lpo::Entity")]
    Lpos,
}

impl Related<super::department_hierarchy::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Department.def()
    }
}

impl Related<super::invoice::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Invoices.def()
    }
}

impl Related<super::lpo::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Lpos.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
