//! SeaORM entity models
//!
//! Database entities for InvoiceFlow

mod invoice;
mod status_history;
mod invoice_comment;
mod project;
mod vendor;
mod lpo;
mod department_hierarchy;
mod user;

pub use invoice::{
    Entity as InvoiceEntity,
    Model as Invoice,
    ActiveModel as InvoiceActiveModel,
    Column as InvoiceColumn,
    check_amount,
    CurrencyType,
    InvoiceStatus,
};

pub use status_history::{
    Entity as StatusHistoryEntity,
    Model as StatusHistory,
    ActiveModel as StatusHistoryActiveModel,
    Column as StatusHistoryColumn,
};

pub use invoice_comment::{
    Entity as InvoiceCommentEntity,
    Model as InvoiceComment,
    ActiveModel as InvoiceCommentActiveModel,
    Column as InvoiceCommentColumn,
};

pub use project::{
    Entity as ProjectEntity,
    Model as Project,
    ActiveModel as ProjectActiveModel,
    Column as ProjectColumn,
};

pub use vendor::{
    Entity as VendorEntity,
    Model as Vendor,
    ActiveModel as VendorActiveModel,
    Column as VendorColumn,
};

pub use lpo::{
    Entity as LpoEntity,
    Model as Lpo,
    ActiveModel as LpoActiveModel,
    Column as LpoColumn,
};

pub use department_hierarchy::{
    Entity as DepartmentEntity,
    Model as Department,
    ActiveModel as DepartmentActiveModel,
    Column as DepartmentColumn,
};

pub use user::{
    Entity as UserEntity,
    Model as User,
    ActiveModel as UserActiveModel,
    Column as UserColumn,
};
