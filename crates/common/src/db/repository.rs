//! Repository pattern for database operations
//!
//! Provides a clean interface for all data access operations
//! with proper error handling and transaction support.

use crate::auth::Role;
use crate::db::models::*;
use crate::db::DbPool;
use crate::errors::{AppError, Result};
use crate::workflow::{invoice_from_draft, InvoiceStore, NewInvoice, NewStatusEntry, TransitionRecord};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::sea_query::{Expr, Func};
use sea_orm::{
    ActiveModelTrait, ActiveValue::NotSet, ColumnTrait, Condition, ConnectionTrait,
    DatabaseConnection, EntityTrait, FromQueryResult, PaginatorTrait, QueryFilter, QueryOrder,
    QuerySelect, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};

/// Upper bound on department depth walked by the cycle check
const MAX_DEPARTMENT_DEPTH: usize = 256;

/// One page of a listing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u64,
    pub per_page: u64,
}

/// Filters for invoice listings
#[derive(Debug, Clone, Default)]
pub struct InvoiceFilter {
    pub status: Option<InvoiceStatus>,
    pub project_id: Option<i32>,
    pub vendor_id: Option<i32>,
    pub requires_review: Option<bool>,
}

/// Editable invoice fields; `None` leaves the stored value alone
#[derive(Debug, Clone, Default)]
pub struct InvoiceUpdate {
    pub invoice_number: Option<String>,
    pub invoice_date: Option<NaiveDate>,
    pub due_date: Option<NaiveDate>,
    pub invoice_value: Option<Decimal>,
    pub subtotal: Option<Decimal>,
    pub tax_amount: Option<Decimal>,
    pub currency: Option<CurrencyType>,
    pub description: Option<String>,
    pub vendor_name: Option<String>,
    pub vendor_tax_id: Option<String>,
    pub vendor_address: Option<String>,
    pub vendor_id: Option<i32>,
    pub project_id: Option<i32>,
    pub lpo_id: Option<i32>,
    pub duplicate_of_invoice_id: Option<i32>,
    pub requires_review: Option<bool>,
}

#[derive(Debug, Clone, Default)]
pub struct ProjectInput {
    pub project_code: String,
    pub name: String,
    pub description: Option<String>,
    pub department_id: Option<i32>,
    pub budget: Option<Decimal>,
    pub currency: Option<CurrencyType>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Default)]
pub struct VendorInput {
    pub name: String,
    pub tax_id: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Clone, Default)]
pub struct LpoInput {
    pub lpo_number: String,
    pub project_id: Option<i32>,
    pub vendor_id: Option<i32>,
    pub issue_date: Option<NaiveDate>,
    pub amount: Option<Decimal>,
    pub currency: Option<CurrencyType>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct DepartmentInput {
    pub name: String,
    pub parent_id: Option<i32>,
    pub manager_name: Option<String>,
}

/// Invoice count and value for one status
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSummary {
    pub status: InvoiceStatus,
    pub count: i64,
    pub total_value: Decimal,
}

#[derive(Debug, FromQueryResult)]
struct StatusSummaryRow {
    status: InvoiceStatus,
    count: i64,
    total_value: Option<Decimal>,
}

/// Repository for data access operations
#[derive(Clone)]
pub struct Repository {
    pool: DbPool,
}

impl Repository {
    /// Create a new repository with the given connection pool
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Get the read connection
    fn read_conn(&self) -> &DatabaseConnection {
        self.pool.read()
    }

    /// Get the write connection
    fn write_conn(&self) -> &DatabaseConnection {
        self.pool.write()
    }

    // ========================================================================
    // Health Check
    // ========================================================================

    /// Ping the database
    pub async fn ping(&self) -> Result<()> {
        self.pool.ping().await
    }

    // ========================================================================
    // Invoice Operations
    // ========================================================================

    /// List invoices newest first; `page` starts at 1
    pub async fn list_invoices(
        &self,
        filter: &InvoiceFilter,
        page: u64,
        per_page: u64,
    ) -> Result<Page<Invoice>> {
        let mut query = InvoiceEntity::find();
        if let Some(status) = filter.status {
            query = query.filter(InvoiceColumn::Status.eq(status));
        }
        if let Some(project_id) = filter.project_id {
            query = query.filter(InvoiceColumn::ProjectId.eq(project_id));
        }
        if let Some(vendor_id) = filter.vendor_id {
            query = query.filter(InvoiceColumn::VendorId.eq(vendor_id));
        }
        if let Some(requires_review) = filter.requires_review {
            query = query.filter(InvoiceColumn::RequiresReview.eq(requires_review));
        }

        let per_page = per_page.max(1);
        let page = page.max(1);
        let paginator = query
            .order_by_desc(InvoiceColumn::CreatedAt)
            .order_by_desc(InvoiceColumn::Id)
            .paginate(self.read_conn(), per_page);

        let total = paginator.num_items().await?;
        let items = paginator.fetch_page(page - 1).await?;

        Ok(Page {
            items,
            total,
            page,
            per_page,
        })
    }

    /// Edit non-status fields of an invoice that is still open
    pub async fn update_invoice(&self, id: i32, update: InvoiceUpdate, actor: &str) -> Result<Invoice> {
        let invoice = InvoiceEntity::find_by_id(id)
            .one(self.write_conn())
            .await?
            .ok_or(AppError::InvoiceNotFound { id })?;

        if invoice.is_terminal() {
            return Err(AppError::Conflict {
                message: format!("Invoice {} is {} and can no longer be edited", id, invoice.status),
            });
        }

        for (field, value) in [
            ("invoice_value", update.invoice_value),
            ("subtotal", update.subtotal),
            ("tax_amount", update.tax_amount),
        ] {
            if let Some(value) = value {
                check_amount(field, value)?;
            }
        }

        if let Some(original) = update.duplicate_of_invoice_id {
            if original == id {
                return Err(AppError::validation(
                    "duplicate_of_invoice_id",
                    "an invoice cannot duplicate itself",
                ));
            }
            if InvoiceEntity::find_by_id(original).one(self.read_conn()).await?.is_none() {
                return Err(AppError::validation(
                    "duplicate_of_invoice_id",
                    format!("invoice {} does not exist", original),
                ));
            }
        }
        self.ensure_references(update.project_id, update.vendor_id, update.lpo_id).await?;

        let expected_status = invoice.status;
        let expected_version = invoice.row_version;
        let mut active: InvoiceActiveModel = invoice.into();
        if let Some(v) = update.invoice_number {
            active.invoice_number = Set(v);
        }
        if let Some(v) = update.invoice_date {
            active.invoice_date = Set(Some(v));
        }
        if let Some(v) = update.due_date {
            active.due_date = Set(Some(v));
        }
        if let Some(v) = update.invoice_value {
            active.invoice_value = Set(Some(v));
        }
        if let Some(v) = update.subtotal {
            active.subtotal = Set(Some(v));
        }
        if let Some(v) = update.tax_amount {
            active.tax_amount = Set(Some(v));
        }
        if let Some(v) = update.currency {
            active.currency = Set(Some(v));
        }
        if let Some(v) = update.description {
            active.description = Set(Some(v));
        }
        if let Some(v) = update.vendor_name {
            active.vendor_name = Set(v);
        }
        if let Some(v) = update.vendor_tax_id {
            active.vendor_tax_id = Set(v);
        }
        if let Some(v) = update.vendor_address {
            active.vendor_address = Set(Some(v));
        }
        if let Some(v) = update.vendor_id {
            active.vendor_id = Set(Some(v));
        }
        if let Some(v) = update.project_id {
            active.project_id = Set(Some(v));
        }
        if let Some(v) = update.lpo_id {
            active.lpo_id = Set(Some(v));
        }
        if let Some(v) = update.duplicate_of_invoice_id {
            active.duplicate_of_invoice_id = Set(Some(v));
        }
        if let Some(v) = update.requires_review {
            active.requires_review = Set(v);
        }
        active.modified_by = Set(Some(actor.to_string()));
        active.modified_at = Set(Some(Utc::now().into()));

        // Every transition bumps row_version, so a status change committed
        // since the read leaves this update with nothing to match
        let result = InvoiceEntity::update_many()
            .set(active)
            .filter(InvoiceColumn::Id.eq(id))
            .filter(InvoiceColumn::Status.eq(expected_status))
            .filter(InvoiceColumn::RowVersion.eq(expected_version))
            .exec(self.write_conn())
            .await?;

        let current = InvoiceEntity::find_by_id(id)
            .one(self.write_conn())
            .await?
            .ok_or(AppError::InvoiceNotFound { id })?;

        if result.rows_affected == 0 {
            return Err(if current.is_terminal() {
                AppError::Conflict {
                    message: format!("Invoice {} is {} and can no longer be edited", id, current.status),
                }
            } else {
                AppError::ConcurrentModification { id }
            });
        }
        Ok(current)
    }

    /// Delete an invoice; history and comments go with it
    pub async fn delete_invoice(&self, id: i32) -> Result<bool> {
        let result = InvoiceEntity::delete_by_id(id)
            .exec(self.write_conn())
            .await?;

        Ok(result.rows_affected > 0)
    }

    // ========================================================================
    // Comment Operations
    // ========================================================================

    pub async fn add_comment(&self, invoice_id: i32, author: &str, text: String) -> Result<InvoiceComment> {
        self.require_invoice(invoice_id).await?;

        let comment = InvoiceCommentActiveModel {
            id: NotSet,
            invoice_id: Set(invoice_id),
            author: Set(author.to_string()),
            text: Set(text),
            created_at: Set(Utc::now().into()),
            created_by: Set(author.to_string()),
            modified_at: Set(None),
            modified_by: Set(None),
        };

        comment.insert(self.write_conn()).await.map_err(Into::into)
    }

    pub async fn list_comments(&self, invoice_id: i32) -> Result<Vec<InvoiceComment>> {
        self.require_invoice(invoice_id).await?;

        InvoiceCommentEntity::find()
            .filter(InvoiceCommentColumn::InvoiceId.eq(invoice_id))
            .order_by_asc(InvoiceCommentColumn::CreatedAt)
            .order_by_asc(InvoiceCommentColumn::Id)
            .all(self.read_conn())
            .await
            .map_err(Into::into)
    }

    // ========================================================================
    // Project Operations
    // ========================================================================

    pub async fn create_project(&self, input: ProjectInput, actor: &str) -> Result<Project> {
        self.ensure_project_code_free(&input.project_code, None).await?;
        if let Some(budget) = input.budget {
            check_amount("budget", budget)?;
        }
        if let Some(department_id) = input.department_id {
            self.require_department(department_id).await?;
        }

        let project = ProjectActiveModel {
            id: NotSet,
            project_code: Set(input.project_code),
            name: Set(input.name),
            description: Set(input.description),
            department_id: Set(input.department_id),
            budget: Set(input.budget),
            currency: Set(input.currency),
            start_date: Set(input.start_date),
            end_date: Set(input.end_date),
            created_by: Set(actor.to_string()),
            created_at: Set(Utc::now().into()),
            modified_by: Set(None),
            modified_at: Set(None),
        };

        project.insert(self.write_conn()).await.map_err(Into::into)
    }

    pub async fn find_project(&self, id: i32) -> Result<Option<Project>> {
        ProjectEntity::find_by_id(id)
            .one(self.read_conn())
            .await
            .map_err(Into::into)
    }

    pub async fn list_projects(&self, page: u64, per_page: u64) -> Result<Page<Project>> {
        let per_page = per_page.max(1);
        let page = page.max(1);
        let paginator = ProjectEntity::find()
            .order_by_asc(ProjectColumn::ProjectCode)
            .paginate(self.read_conn(), per_page);

        Ok(Page {
            total: paginator.num_items().await?,
            items: paginator.fetch_page(page - 1).await?,
            page,
            per_page,
        })
    }

    pub async fn update_project(&self, id: i32, input: ProjectInput, actor: &str) -> Result<Project> {
        let project = self
            .find_project(id)
            .await?
            .ok_or_else(|| AppError::not_found("project", id))?;
        self.ensure_project_code_free(&input.project_code, Some(id)).await?;
        if let Some(budget) = input.budget {
            check_amount("budget", budget)?;
        }
        if let Some(department_id) = input.department_id {
            self.require_department(department_id).await?;
        }

        let mut active: ProjectActiveModel = project.into();
        active.project_code = Set(input.project_code);
        active.name = Set(input.name);
        active.description = Set(input.description);
        active.department_id = Set(input.department_id);
        active.budget = Set(input.budget);
        active.currency = Set(input.currency);
        active.start_date = Set(input.start_date);
        active.end_date = Set(input.end_date);
        active.modified_by = Set(Some(actor.to_string()));
        active.modified_at = Set(Some(Utc::now().into()));

        active.update(self.write_conn()).await.map_err(Into::into)
    }

    /// Refused while invoices or LPOs reference the project
    pub async fn delete_project(&self, id: i32) -> Result<()> {
        let invoices = InvoiceEntity::find()
            .filter(InvoiceColumn::ProjectId.eq(id))
            .count(self.read_conn())
            .await?;
        let lpos = LpoEntity::find()
            .filter(LpoColumn::ProjectId.eq(id))
            .count(self.read_conn())
            .await?;
        if invoices + lpos > 0 {
            return Err(AppError::Conflict {
                message: format!(
                    "Project {} is referenced by {} invoice(s) and {} LPO(s)",
                    id, invoices, lpos
                ),
            });
        }

        let result = ProjectEntity::delete_by_id(id)
            .exec(self.write_conn())
            .await?;
        if result.rows_affected == 0 {
            return Err(AppError::not_found("project", id));
        }
        Ok(())
    }

    // ========================================================================
    // Vendor Operations
    // ========================================================================

    pub async fn create_vendor(&self, input: VendorInput, actor: &str) -> Result<Vendor> {
        let vendor = VendorActiveModel {
            id: NotSet,
            name: Set(input.name),
            tax_id: Set(input.tax_id),
            email: Set(input.email),
            phone: Set(input.phone),
            address: Set(input.address),
            is_active: Set(input.is_active.unwrap_or(true)),
            created_by: Set(actor.to_string()),
            created_at: Set(Utc::now().into()),
            modified_by: Set(None),
            modified_at: Set(None),
        };

        vendor.insert(self.write_conn()).await.map_err(Into::into)
    }

    pub async fn find_vendor(&self, id: i32) -> Result<Option<Vendor>> {
        VendorEntity::find_by_id(id)
            .one(self.read_conn())
            .await
            .map_err(Into::into)
    }

    pub async fn list_vendors(&self, page: u64, per_page: u64) -> Result<Page<Vendor>> {
        let per_page = per_page.max(1);
        let page = page.max(1);
        let paginator = VendorEntity::find()
            .order_by_asc(VendorColumn::Name)
            .paginate(self.read_conn(), per_page);

        Ok(Page {
            total: paginator.num_items().await?,
            items: paginator.fetch_page(page - 1).await?,
            page,
            per_page,
        })
    }

    pub async fn update_vendor(&self, id: i32, input: VendorInput, actor: &str) -> Result<Vendor> {
        let vendor = self
            .find_vendor(id)
            .await?
            .ok_or_else(|| AppError::not_found("vendor", id))?;

        let mut active: VendorActiveModel = vendor.into();
        active.name = Set(input.name);
        active.tax_id = Set(input.tax_id);
        active.email = Set(input.email);
        active.phone = Set(input.phone);
        active.address = Set(input.address);
        if let Some(is_active) = input.is_active {
            active.is_active = Set(is_active);
        }
        active.modified_by = Set(Some(actor.to_string()));
        active.modified_at = Set(Some(Utc::now().into()));

        active.update(self.write_conn()).await.map_err(Into::into)
    }

    /// Refused while invoices or LPOs reference the vendor
    pub async fn delete_vendor(&self, id: i32) -> Result<()> {
        let invoices = InvoiceEntity::find()
            .filter(InvoiceColumn::VendorId.eq(id))
            .count(self.read_conn())
            .await?;
        let lpos = LpoEntity::find()
            .filter(LpoColumn::VendorId.eq(id))
            .count(self.read_conn())
            .await?;
        if invoices + lpos > 0 {
            return Err(AppError::Conflict {
                message: format!(
                    "Vendor {} is referenced by {} invoice(s) and {} LPO(s)",
                    id, invoices, lpos
                ),
            });
        }

        let result = VendorEntity::delete_by_id(id)
            .exec(self.write_conn())
            .await?;
        if result.rows_affected == 0 {
            return Err(AppError::not_found("vendor", id));
        }
        Ok(())
    }

    // ========================================================================
    // LPO Operations
    // ========================================================================

    pub async fn create_lpo(&self, input: LpoInput, actor: &str) -> Result<Lpo> {
        self.ensure_lpo_number_free(&input.lpo_number, None).await?;
        self.ensure_references(input.project_id, input.vendor_id, None).await?;
        if let Some(amount) = input.amount {
            check_amount("amount", amount)?;
        }

        let lpo = LpoActiveModel {
            id: NotSet,
            lpo_number: Set(input.lpo_number),
            project_id: Set(input.project_id),
            vendor_id: Set(input.vendor_id),
            issue_date: Set(input.issue_date),
            amount: Set(input.amount),
            currency: Set(input.currency),
            description: Set(input.description),
            created_by: Set(actor.to_string()),
            created_at: Set(Utc::now().into()),
            modified_by: Set(None),
            modified_at: Set(None),
        };

        lpo.insert(self.write_conn()).await.map_err(Into::into)
    }

    pub async fn find_lpo(&self, id: i32) -> Result<Option<Lpo>> {
        LpoEntity::find_by_id(id)
            .one(self.read_conn())
            .await
            .map_err(Into::into)
    }

    pub async fn list_lpos(&self, page: u64, per_page: u64) -> Result<Page<Lpo>> {
        let per_page = per_page.max(1);
        let page = page.max(1);
        let paginator = LpoEntity::find()
            .order_by_asc(LpoColumn::LpoNumber)
            .paginate(self.read_conn(), per_page);

        Ok(Page {
            total: paginator.num_items().await?,
            items: paginator.fetch_page(page - 1).await?,
            page,
            per_page,
        })
    }

    pub async fn update_lpo(&self, id: i32, input: LpoInput, actor: &str) -> Result<Lpo> {
        let lpo = self
            .find_lpo(id)
            .await?
            .ok_or_else(|| AppError::not_found("lpo", id))?;
        self.ensure_lpo_number_free(&input.lpo_number, Some(id)).await?;
        self.ensure_references(input.project_id, input.vendor_id, None).await?;
        if let Some(amount) = input.amount {
            check_amount("amount", amount)?;
        }

        let mut active: LpoActiveModel = lpo.into();
        active.lpo_number = Set(input.lpo_number);
        active.project_id = Set(input.project_id);
        active.vendor_id = Set(input.vendor_id);
        active.issue_date = Set(input.issue_date);
        active.amount = Set(input.amount);
        active.currency = Set(input.currency);
        active.description = Set(input.description);
        active.modified_by = Set(Some(actor.to_string()));
        active.modified_at = Set(Some(Utc::now().into()));

        active.update(self.write_conn()).await.map_err(Into::into)
    }

    /// Refused while invoices reference the LPO
    pub async fn delete_lpo(&self, id: i32) -> Result<()> {
        let invoices = InvoiceEntity::find()
            .filter(InvoiceColumn::LpoId.eq(id))
            .count(self.read_conn())
            .await?;
        if invoices > 0 {
            return Err(AppError::Conflict {
                message: format!("LPO {} is referenced by {} invoice(s)", id, invoices),
            });
        }

        let result = LpoEntity::delete_by_id(id).exec(self.write_conn()).await?;
        if result.rows_affected == 0 {
            return Err(AppError::not_found("lpo", id));
        }
        Ok(())
    }

    // ========================================================================
    // Department Operations
    // ========================================================================

    pub async fn create_department(&self, input: DepartmentInput, actor: &str) -> Result<Department> {
        if let Some(parent_id) = input.parent_id {
            self.require_department(parent_id).await?;
        }

        let department = DepartmentActiveModel {
            id: NotSet,
            name: Set(input.name),
            parent_id: Set(input.parent_id),
            manager_name: Set(input.manager_name),
            created_by: Set(actor.to_string()),
            created_at: Set(Utc::now().into()),
            modified_by: Set(None),
            modified_at: Set(None),
        };

        department.insert(self.write_conn()).await.map_err(Into::into)
    }

    pub async fn find_department(&self, id: i32) -> Result<Option<Department>> {
        DepartmentEntity::find_by_id(id)
            .one(self.read_conn())
            .await
            .map_err(Into::into)
    }

    pub async fn list_departments(&self) -> Result<Vec<Department>> {
        DepartmentEntity::find()
            .order_by_asc(DepartmentColumn::Name)
            .all(self.read_conn())
            .await
            .map_err(Into::into)
    }

    pub async fn department_children(&self, id: i32) -> Result<Vec<Department>> {
        self.require_department(id).await?;

        DepartmentEntity::find()
            .filter(DepartmentColumn::ParentId.eq(id))
            .order_by_asc(DepartmentColumn::Name)
            .all(self.read_conn())
            .await
            .map_err(Into::into)
    }

    /// Update a department; re-parenting may never make it its own ancestor
    pub async fn update_department(
        &self,
        id: i32,
        input: DepartmentInput,
        actor: &str,
    ) -> Result<Department> {
        let department = self
            .find_department(id)
            .await?
            .ok_or_else(|| AppError::not_found("department", id))?;
        self.ensure_no_cycle(id, input.parent_id).await?;

        let mut active: DepartmentActiveModel = department.into();
        active.name = Set(input.name);
        active.parent_id = Set(input.parent_id);
        active.manager_name = Set(input.manager_name);
        active.modified_by = Set(Some(actor.to_string()));
        active.modified_at = Set(Some(Utc::now().into()));

        active.update(self.write_conn()).await.map_err(Into::into)
    }

    /// Refused while the department has children or projects
    pub async fn delete_department(&self, id: i32) -> Result<()> {
        let children = DepartmentEntity::find()
            .filter(DepartmentColumn::ParentId.eq(id))
            .count(self.read_conn())
            .await?;
        let projects = ProjectEntity::find()
            .filter(ProjectColumn::DepartmentId.eq(id))
            .count(self.read_conn())
            .await?;
        if children + projects > 0 {
            return Err(AppError::Conflict {
                message: format!(
                    "Department {} still has {} child department(s) and {} project(s)",
                    id, children, projects
                ),
            });
        }

        let result = DepartmentEntity::delete_by_id(id)
            .exec(self.write_conn())
            .await?;
        if result.rows_affected == 0 {
            return Err(AppError::not_found("department", id));
        }
        Ok(())
    }

    async fn ensure_no_cycle(&self, id: i32, parent_id: Option<i32>) -> Result<()> {
        let mut next = parent_id;
        let mut depth = 0;

        while let Some(ancestor) = next {
            if ancestor == id {
                return Err(AppError::validation(
                    "parent_id",
                    "a department cannot be its own ancestor",
                ));
            }
            depth += 1;
            if depth > MAX_DEPARTMENT_DEPTH {
                return Err(AppError::validation("parent_id", "department tree is too deep"));
            }
            next = self
                .find_department(ancestor)
                .await?
                .ok_or_else(|| AppError::not_found("department", ancestor))?
                .parent_id;
        }

        Ok(())
    }

    // ========================================================================
    // User Operations
    // ========================================================================

    pub async fn find_user_by_username(&self, username: &str) -> Result<Option<User>> {
        UserEntity::find()
            .filter(UserColumn::Username.eq(username))
            .one(self.read_conn())
            .await
            .map_err(Into::into)
    }

    pub async fn create_user(
        &self,
        username: &str,
        email: Option<String>,
        password_hash: String,
        role: Role,
    ) -> Result<User> {
        if self.find_user_by_username(username).await?.is_some() {
            return Err(AppError::Conflict {
                message: format!("User '{}' already exists", username),
            });
        }

        let user = UserActiveModel {
            id: NotSet,
            username: Set(username.to_string()),
            email: Set(email),
            password_hash: Set(password_hash),
            role: Set(role),
            is_active: Set(true),
            created_at: Set(Utc::now().into()),
        };

        user.insert(self.write_conn()).await.map_err(Into::into)
    }

    pub async fn count_users(&self) -> Result<u64> {
        UserEntity::find()
            .count(self.read_conn())
            .await
            .map_err(Into::into)
    }

    // ========================================================================
    // Reports
    // ========================================================================

    /// Invoice count and total value for every status, zero rows included
    pub async fn status_summary(&self) -> Result<Vec<StatusSummary>> {
        let rows = InvoiceEntity::find()
            .select_only()
            .column(InvoiceColumn::Status)
            .column_as(InvoiceColumn::Id.count(), "count")
            .column_as(InvoiceColumn::InvoiceValue.sum(), "total_value")
            .group_by(InvoiceColumn::Status)
            .into_model::<StatusSummaryRow>()
            .all(self.read_conn())
            .await?;

        Ok(InvoiceStatus::ALL
            .into_iter()
            .map(|status| {
                let row = rows.iter().find(|r| r.status == status);
                StatusSummary {
                    status,
                    count: row.map_or(0, |r| r.count),
                    total_value: row.and_then(|r| r.total_value).unwrap_or(Decimal::ZERO),
                }
            })
            .collect())
    }

    // ========================================================================
    // Reference checks
    // ========================================================================

    async fn require_invoice(&self, id: i32) -> Result<()> {
        match InvoiceEntity::find_by_id(id).one(self.read_conn()).await? {
            Some(_) => Ok(()),
            None => Err(AppError::InvoiceNotFound { id }),
        }
    }

    async fn require_department(&self, id: i32) -> Result<()> {
        match self.find_department(id).await? {
            Some(_) => Ok(()),
            None => Err(AppError::validation(
                "department_id",
                format!("department {} does not exist", id),
            )),
        }
    }

    async fn ensure_references(
        &self,
        project_id: Option<i32>,
        vendor_id: Option<i32>,
        lpo_id: Option<i32>,
    ) -> Result<()> {
        if let Some(id) = project_id {
            if self.find_project(id).await?.is_none() {
                return Err(AppError::validation("project_id", format!("project {} does not exist", id)));
            }
        }
        if let Some(id) = vendor_id {
            if self.find_vendor(id).await?.is_none() {
                return Err(AppError::validation("vendor_id", format!("vendor {} does not exist", id)));
            }
        }
        if let Some(id) = lpo_id {
            if self.find_lpo(id).await?.is_none() {
                return Err(AppError::validation("lpo_id", format!("LPO {} does not exist", id)));
            }
        }
        Ok(())
    }

    async fn ensure_project_code_free(&self, code: &str, except: Option<i32>) -> Result<()> {
        let existing = ProjectEntity::find()
            .filter(ProjectColumn::ProjectCode.eq(code))
            .one(self.read_conn())
            .await?;
        match existing {
            Some(p) if Some(p.id) != except => Err(AppError::Conflict {
                message: format!("Project code '{}' is already in use", code),
            }),
            _ => Ok(()),
        }
    }

    async fn ensure_lpo_number_free(&self, number: &str, except: Option<i32>) -> Result<()> {
        let existing = LpoEntity::find()
            .filter(LpoColumn::LpoNumber.eq(number))
            .one(self.read_conn())
            .await?;
        match existing {
            Some(l) if Some(l.id) != except => Err(AppError::Conflict {
                message: format!("LPO number '{}' is already in use", number),
            }),
            _ => Ok(()),
        }
    }
}

// ============================================================================
// Workflow persistence
// ============================================================================

async fn insert_history<C: ConnectionTrait>(conn: &C, entry: NewStatusEntry) -> Result<StatusHistory> {
    let at: DateTimeWithTimeZone = entry.changed_at.into();
    let row = StatusHistoryActiveModel {
        id: NotSet,
        invoice_id: Set(entry.invoice_id),
        from_status: Set(entry.from_status),
        status: Set(entry.status),
        changed_at: Set(at),
        changed_by: Set(entry.changed_by.clone()),
        comment: Set(entry.comment),
        created_at: Set(at),
        created_by: Set(entry.changed_by),
    };

    row.insert(conn).await.map_err(Into::into)
}

#[async_trait]
impl InvoiceStore for Repository {
    async fn find_invoice(&self, id: i32) -> Result<Option<Invoice>> {
        // Reads the primary so a transition never loads stale replica state
        InvoiceEntity::find_by_id(id)
            .one(self.write_conn())
            .await
            .map_err(Into::into)
    }

    async fn insert_invoice(&self, draft: NewInvoice, at: DateTime<Utc>) -> Result<Invoice> {
        let txn = self.write_conn().begin().await?;

        let mut active: InvoiceActiveModel = invoice_from_draft(0, draft, at).into();
        active = active.reset_all();
        active.id = NotSet;
        let invoice = active.insert(&txn).await?;

        insert_history(
            &txn,
            NewStatusEntry {
                invoice_id: invoice.id,
                from_status: None,
                status: InvoiceStatus::Submitted,
                changed_by: invoice.created_by.clone(),
                comment: Some("Invoice submitted".to_string()),
                changed_at: at,
            },
        )
        .await?;

        txn.commit().await?;
        Ok(invoice)
    }

    async fn apply_transition(&self, record: TransitionRecord) -> Result<Invoice> {
        let invoice_id = record.entry.invoice_id;
        let modified_at: DateTimeWithTimeZone = record.entry.changed_at.into();
        let txn = self.write_conn().begin().await?;

        let result = InvoiceEntity::update_many()
            .col_expr(InvoiceColumn::Status, Expr::value(record.entry.status))
            .col_expr(
                InvoiceColumn::RowVersion,
                Expr::col(InvoiceColumn::RowVersion).add(1),
            )
            .col_expr(
                InvoiceColumn::ModifiedBy,
                Expr::value(Some(record.entry.changed_by.clone())),
            )
            .col_expr(InvoiceColumn::ModifiedAt, Expr::value(Some(modified_at)))
            .filter(InvoiceColumn::Id.eq(invoice_id))
            .filter(InvoiceColumn::Status.eq(record.expected_status))
            .filter(InvoiceColumn::RowVersion.eq(record.expected_version))
            .exec(&txn)
            .await?;

        if result.rows_affected == 0 {
            let exists = InvoiceEntity::find_by_id(invoice_id).one(&txn).await?.is_some();
            txn.rollback().await?;
            return Err(if exists {
                AppError::ConcurrentModification { id: invoice_id }
            } else {
                AppError::InvoiceNotFound { id: invoice_id }
            });
        }

        insert_history(&txn, record.entry).await?;

        let updated = InvoiceEntity::find_by_id(invoice_id)
            .one(&txn)
            .await?
            .ok_or(AppError::InvoiceNotFound { id: invoice_id })?;

        txn.commit().await?;
        Ok(updated)
    }

    async fn append_history(&self, entry: NewStatusEntry) -> Result<StatusHistory> {
        self.require_invoice(entry.invoice_id).await?;
        insert_history(self.write_conn(), entry).await
    }

    async fn history(&self, invoice_id: i32) -> Result<Vec<StatusHistory>> {
        StatusHistoryEntity::find()
            .filter(StatusHistoryColumn::InvoiceId.eq(invoice_id))
            .order_by_asc(StatusHistoryColumn::Id)
            .all(self.write_conn())
            .await
            .map_err(Into::into)
    }

    async fn find_duplicate(
        &self,
        file_hash: Option<&str>,
        vendor_and_number: Option<(&str, &str)>,
    ) -> Result<Option<i32>> {
        let mut condition = Condition::any();
        if let Some(hash) = file_hash {
            condition = condition.add(InvoiceColumn::FileHash.eq(hash));
        }
        if let Some((vendor, number)) = vendor_and_number {
            condition = condition.add(
                Condition::all()
                    .add(
                        Expr::expr(Func::lower(Expr::col(InvoiceColumn::VendorName)))
                            .eq(vendor.to_lowercase()),
                    )
                    .add(
                        Expr::expr(Func::lower(Expr::col(InvoiceColumn::InvoiceNumber)))
                            .eq(number.to_lowercase()),
                    ),
            );
        }
        if condition.is_empty() {
            return Ok(None);
        }

        let found = InvoiceEntity::find()
            .filter(condition)
            .order_by_asc(InvoiceColumn::Id)
            .one(self.read_conn())
            .await?;

        Ok(found.map(|invoice| invoice.id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sea_orm::{DatabaseBackend, MockDatabase, MockExecResult, Value};
    use std::collections::BTreeMap;

    fn invoice(id: i32, status: InvoiceStatus, row_version: i32) -> Invoice {
        let mut invoice = invoice_from_draft(id, NewInvoice::new("INV-1", "Acme", "sec"), Utc::now());
        invoice.status = status;
        invoice.row_version = row_version;
        invoice
    }

    fn history_row(invoice_id: i32, from: InvoiceStatus, to: InvoiceStatus) -> StatusHistory {
        let now: DateTimeWithTimeZone = Utc::now().into();
        StatusHistory {
            id: 2,
            invoice_id,
            from_status: Some(from),
            status: to,
            changed_at: now,
            changed_by: "pm".to_string(),
            comment: None,
            created_at: now,
            created_by: "pm".to_string(),
        }
    }

    fn record(invoice_id: i32) -> TransitionRecord {
        TransitionRecord {
            expected_status: InvoiceStatus::UnderReview,
            expected_version: 2,
            entry: NewStatusEntry {
                invoice_id,
                from_status: Some(InvoiceStatus::UnderReview),
                status: InvoiceStatus::Approved,
                changed_by: "pm".to_string(),
                comment: None,
                changed_at: Utc::now(),
            },
        }
    }

    fn repository(db: MockDatabase) -> Repository {
        Repository::new(DbPool::from_connection(db.into_connection()))
    }

    #[tokio::test]
    async fn test_apply_transition_commits_update_and_entry() {
        let repo = repository(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_exec_results([MockExecResult {
                    last_insert_id: 0,
                    rows_affected: 1,
                }])
                .append_query_results([vec![history_row(
                    5,
                    InvoiceStatus::UnderReview,
                    InvoiceStatus::Approved,
                )]])
                .append_query_results([vec![invoice(5, InvoiceStatus::Approved, 3)]]),
        );

        let updated = repo.apply_transition(record(5)).await.unwrap();
        assert_eq!(updated.status, InvoiceStatus::Approved);
        assert_eq!(updated.row_version, 3);
    }

    #[tokio::test]
    async fn test_apply_transition_stale_guard_is_conflict() {
        let repo = repository(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_exec_results([MockExecResult {
                    last_insert_id: 0,
                    rows_affected: 0,
                }])
                .append_query_results([vec![invoice(5, InvoiceStatus::Rejected, 3)]]),
        );

        let err = repo.apply_transition(record(5)).await.unwrap_err();
        assert!(matches!(err, AppError::ConcurrentModification { id: 5 }));
    }

    #[tokio::test]
    async fn test_apply_transition_missing_invoice() {
        let repo = repository(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_exec_results([MockExecResult {
                    last_insert_id: 0,
                    rows_affected: 0,
                }])
                .append_query_results([Vec::<Invoice>::new()]),
        );

        let err = tokio_test::assert_err!(repo.apply_transition(record(5)).await);
        assert!(matches!(err, AppError::InvoiceNotFound { id: 5 }));
    }

    #[tokio::test]
    async fn test_status_summary_fills_missing_statuses() {
        let row = |status: InvoiceStatus, count: i64, total: Decimal| {
            BTreeMap::from([
                ("status", Value::from(status.code())),
                ("count", Value::from(count)),
                ("total_value", Value::from(total)),
            ])
        };
        let repo = repository(MockDatabase::new(DatabaseBackend::Postgres).append_query_results([
            vec![
                row(InvoiceStatus::Submitted, 3, Decimal::new(125_000, 2)),
                row(InvoiceStatus::Approved, 1, Decimal::new(9_950, 2)),
            ],
        ]));

        let summary = repo.status_summary().await.unwrap();
        assert_eq!(summary.len(), InvoiceStatus::ALL.len());
        assert_eq!(summary[0].count, 3);
        assert_eq!(summary[0].total_value, Decimal::new(125_000, 2));
        assert_eq!(summary[1].status, InvoiceStatus::UnderReview);
        assert_eq!(summary[1].count, 0);
        assert_eq!(summary[1].total_value, Decimal::ZERO);
        assert_eq!(summary[2].count, 1);
    }

    #[tokio::test]
    async fn test_delete_project_is_restricted() {
        let count_row = |n: i64| BTreeMap::from([("num_items", Value::from(n))]);
        let repo = repository(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([vec![count_row(2)]])
                .append_query_results([vec![count_row(0)]]),
        );

        let err = repo.delete_project(1).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict { .. }));
    }

    #[tokio::test]
    async fn test_update_refuses_terminal_invoice() {
        let repo = repository(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([vec![invoice(8, InvoiceStatus::Completed, 6)]]),
        );

        let err = repo
            .update_invoice(8, InvoiceUpdate::default(), "sec")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict { .. }));
    }

    #[tokio::test]
    async fn test_update_loses_to_completion_committed_after_read() {
        let repo = repository(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([vec![invoice(8, InvoiceStatus::PmoReview, 5)]])
                .append_exec_results([MockExecResult {
                    last_insert_id: 0,
                    rows_affected: 0,
                }])
                .append_query_results([vec![invoice(8, InvoiceStatus::Completed, 6)]]),
        );

        let update = InvoiceUpdate {
            description: Some("late edit".to_string()),
            ..Default::default()
        };
        let err = repo.update_invoice(8, update, "sec").await.unwrap_err();
        assert!(matches!(err, AppError::Conflict { .. }));
    }

    #[tokio::test]
    async fn test_update_applies_to_open_invoice() {
        let mut edited = invoice(9, InvoiceStatus::UnderReview, 2);
        edited.description = Some("corrected".to_string());
        let repo = repository(
            MockDatabase::new(DatabaseBackend::Postgres)
                .append_query_results([vec![invoice(9, InvoiceStatus::UnderReview, 2)]])
                .append_exec_results([MockExecResult {
                    last_insert_id: 0,
                    rows_affected: 1,
                }])
                .append_query_results([vec![edited]]),
        );

        let update = InvoiceUpdate {
            description: Some("corrected".to_string()),
            ..Default::default()
        };
        let updated = repo.update_invoice(9, update, "sec").await.unwrap();
        assert_eq!(updated.description.as_deref(), Some("corrected"));
        assert_eq!(updated.row_version, 2);
    }
}
