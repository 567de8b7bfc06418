use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use thiserror::Error;

use orgsvc_core::ServiceError;
use orgsvc_core::types::{Employee, EmployeeDraft, EmployeeFilter, EmployeeStats, Page, PageRequest};

use crate::{contains_pattern, is_unique_violation, to_rfc3339};

const COLUMNS: &str = "id, first_name, last_name, email, department_id, created_at, updated_at";

/// Repository for the `employees` table. E-mail comparisons ignore case.
#[derive(Clone)]
pub struct EmployeeRepository {
    pool: SqlitePool,
}

impl EmployeeRepository {
    pub(crate) fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn find_by_id(&self, id: i64) -> Result<Option<Employee>, EmployeeStoreError> {
        let row = sqlx::query_as::<_, EmployeeRow>(&format!(
            "SELECT {COLUMNS} FROM employees WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(EmployeeRow::into_domain))
    }

    pub async fn exists_by_id(&self, id: i64) -> Result<bool, EmployeeStoreError> {
        let row = sqlx::query("SELECT EXISTS(SELECT 1 FROM employees WHERE id = ?) AS present")
            .bind(id)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get::<i64, _>("present") != 0)
    }

    pub async fn exists_by_email(&self, email: &str) -> Result<bool, EmployeeStoreError> {
        let row = sqlx::query("SELECT EXISTS(SELECT 1 FROM employees WHERE email = ?) AS present")
            .bind(email)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get::<i64, _>("present") != 0)
    }

    /// Whether an employee other than `id` already uses `email`.
    pub async fn exists_by_email_excluding(
        &self,
        email: &str,
        id: i64,
    ) -> Result<bool, EmployeeStoreError> {
        let row = sqlx::query(
            "SELECT EXISTS(SELECT 1 FROM employees WHERE email = ? AND id <> ?) AS present",
        )
        .bind(email)
        .bind(id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get::<i64, _>("present") != 0)
    }

    pub async fn insert(
        &self,
        draft: &EmployeeDraft,
        now: DateTime<Utc>,
    ) -> Result<Employee, EmployeeStoreError> {
        let now = to_rfc3339(now);
        let row = sqlx::query_as::<_, EmployeeRow>(&format!(
            "INSERT INTO employees (first_name, last_name, email, department_id, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?) \
             RETURNING {COLUMNS}"
        ))
        .bind(&draft.first_name)
        .bind(&draft.last_name)
        .bind(&draft.email)
        .bind(draft.department_id)
        .bind(&now)
        .bind(&now)
        .fetch_one(&self.pool)
        .await
        .map_err(|err| map_write_error(err, &draft.email))?;
        Ok(row.into_domain())
    }

    /// Replaces every mutable column. Returns `None` when `id` is unknown.
    pub async fn update(
        &self,
        id: i64,
        draft: &EmployeeDraft,
        now: DateTime<Utc>,
    ) -> Result<Option<Employee>, EmployeeStoreError> {
        let row = sqlx::query_as::<_, EmployeeRow>(&format!(
            "UPDATE employees \
             SET first_name = ?, last_name = ?, email = ?, department_id = ?, updated_at = ? \
             WHERE id = ? \
             RETURNING {COLUMNS}"
        ))
        .bind(&draft.first_name)
        .bind(&draft.last_name)
        .bind(&draft.email)
        .bind(draft.department_id)
        .bind(to_rfc3339(now))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|err| map_write_error(err, &draft.email))?;
        Ok(row.map(EmployeeRow::into_domain))
    }

    pub async fn delete(&self, id: i64) -> Result<bool, EmployeeStoreError> {
        let result = sqlx::query("DELETE FROM employees WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn list(
        &self,
        filter: &EmployeeFilter,
        request: PageRequest,
    ) -> Result<Page<Employee>, EmployeeStoreError> {
        const WHERE: &str = "WHERE (? IS NULL OR LOWER(email) LIKE LOWER(?) ESCAPE '\\') \
                               AND (? IS NULL OR LOWER(last_name) LIKE LOWER(?) ESCAPE '\\') \
                               AND (? IS NULL OR department_id = ?)";
        let email = filter.email.as_deref().map(contains_pattern);
        let last_name = filter.last_name.as_deref().map(contains_pattern);

        let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM employees {WHERE}"))
            .bind(&email)
            .bind(&email)
            .bind(&last_name)
            .bind(&last_name)
            .bind(filter.department_id)
            .bind(filter.department_id)
            .fetch_one(&self.pool)
            .await?;

        let rows = sqlx::query_as::<_, EmployeeRow>(&format!(
            "SELECT {COLUMNS} FROM employees {WHERE} \
             ORDER BY {column} {direction}, id ASC \
             LIMIT ? OFFSET ?",
            column = sort_column(request.sort.field),
            direction = request.sort.direction.as_sql(),
        ))
        .bind(&email)
        .bind(&email)
        .bind(&last_name)
        .bind(&last_name)
        .bind(filter.department_id)
        .bind(filter.department_id)
        .bind(request.limit())
        .bind(request.offset())
        .fetch_all(&self.pool)
        .await?;

        let content = rows.into_iter().map(EmployeeRow::into_domain).collect();
        Ok(Page::new(content, request, total as u64))
    }

    /// Matches `term` against first name, last name and e-mail.
    pub async fn search(
        &self,
        term: &str,
        request: PageRequest,
    ) -> Result<Page<Employee>, EmployeeStoreError> {
        const WHERE: &str = "WHERE LOWER(first_name) LIKE LOWER(?) ESCAPE '\\' \
                                OR LOWER(last_name) LIKE LOWER(?) ESCAPE '\\' \
                                OR LOWER(email) LIKE LOWER(?) ESCAPE '\\'";
        let pattern = contains_pattern(term);

        let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM employees {WHERE}"))
            .bind(&pattern)
            .bind(&pattern)
            .bind(&pattern)
            .fetch_one(&self.pool)
            .await?;

        let rows = sqlx::query_as::<_, EmployeeRow>(&format!(
            "SELECT {COLUMNS} FROM employees {WHERE} \
             ORDER BY {column} {direction}, id ASC \
             LIMIT ? OFFSET ?",
            column = sort_column(request.sort.field),
            direction = request.sort.direction.as_sql(),
        ))
        .bind(&pattern)
        .bind(&pattern)
        .bind(&pattern)
        .bind(request.limit())
        .bind(request.offset())
        .fetch_all(&self.pool)
        .await?;

        let content = rows.into_iter().map(EmployeeRow::into_domain).collect();
        Ok(Page::new(content, request, total as u64))
    }

    /// Head count overall and per department. Unassigned employees only
    /// count toward the total.
    pub async fn stats(&self) -> Result<EmployeeStats, EmployeeStoreError> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM employees")
            .fetch_one(&self.pool)
            .await?;

        let rows = sqlx::query(
            "SELECT department_id, COUNT(*) AS headcount FROM employees \
             WHERE department_id IS NOT NULL \
             GROUP BY department_id",
        )
        .fetch_all(&self.pool)
        .await?;

        let counts_by_department = rows
            .into_iter()
            .map(|row| {
                let department_id: i64 = row.get("department_id");
                let headcount: i64 = row.get("headcount");
                (department_id, headcount as u64)
            })
            .collect();

        Ok(EmployeeStats {
            total_employees: total as u64,
            counts_by_department,
        })
    }
}

fn sort_column(field: &str) -> &'static str {
    match field {
        "firstName" => "first_name",
        "lastName" => "last_name",
        "email" => "email",
        "departmentId" => "department_id",
        "createdAt" => "created_at",
        "updatedAt" => "updated_at",
        _ => "id",
    }
}

fn map_write_error(err: sqlx::Error, email: &str) -> EmployeeStoreError {
    if is_unique_violation(&err) {
        EmployeeStoreError::DuplicateEmail(email.to_string())
    } else {
        EmployeeStoreError::Database(err)
    }
}

#[derive(Debug, sqlx::FromRow)]
struct EmployeeRow {
    id: i64,
    first_name: String,
    last_name: String,
    email: String,
    department_id: Option<i64>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl EmployeeRow {
    fn into_domain(self) -> Employee {
        Employee {
            id: self.id,
            first_name: self.first_name,
            last_name: self.last_name,
            email: self.email,
            department_id: self.department_id,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Errors raised by the employee repository.
#[derive(Debug, Error)]
pub enum EmployeeStoreError {
    #[error("employee email already exists: {0}")]
    DuplicateEmail(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl From<EmployeeStoreError> for ServiceError {
    fn from(err: EmployeeStoreError) -> Self {
        match err {
            EmployeeStoreError::DuplicateEmail(email) => {
                ServiceError::duplicate("Employee", "email", email)
            }
            EmployeeStoreError::Database(err) => ServiceError::internal(err),
        }
    }
}
