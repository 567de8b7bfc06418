use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use thiserror::Error;

use orgsvc_core::ServiceError;
use orgsvc_core::types::{Department, DepartmentDraft, DepartmentFilter, Page, PageRequest};

use crate::{contains_pattern, is_unique_violation, to_rfc3339};

const COLUMNS: &str = "id, name, code, description, manager_email, created_at, updated_at";

/// Repository for the `departments` table.
#[derive(Clone)]
pub struct DepartmentRepository {
    pool: SqlitePool,
}

impl DepartmentRepository {
    pub(crate) fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn find_by_id(&self, id: i64) -> Result<Option<Department>, DepartmentStoreError> {
        let row = sqlx::query_as::<_, DepartmentRow>(&format!(
            "SELECT {COLUMNS} FROM departments WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(DepartmentRow::into_domain))
    }

    /// Looks a department up by code, ignoring case.
    pub async fn find_by_code(&self, code: &str) -> Result<Option<Department>, DepartmentStoreError> {
        let row = sqlx::query_as::<_, DepartmentRow>(&format!(
            "SELECT {COLUMNS} FROM departments WHERE code = UPPER(?)"
        ))
        .bind(code.trim())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(DepartmentRow::into_domain))
    }

    pub async fn exists_by_id(&self, id: i64) -> Result<bool, DepartmentStoreError> {
        let row = sqlx::query("SELECT EXISTS(SELECT 1 FROM departments WHERE id = ?) AS present")
            .bind(id)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get::<i64, _>("present") != 0)
    }

    pub async fn exists_by_code(&self, code: &str) -> Result<bool, DepartmentStoreError> {
        let row = sqlx::query(
            "SELECT EXISTS(SELECT 1 FROM departments WHERE code = UPPER(?)) AS present",
        )
        .bind(code)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get::<i64, _>("present") != 0)
    }

    /// Whether a department other than `id` already uses `code`.
    pub async fn exists_by_code_excluding(
        &self,
        code: &str,
        id: i64,
    ) -> Result<bool, DepartmentStoreError> {
        let row = sqlx::query(
            "SELECT EXISTS(SELECT 1 FROM departments WHERE code = UPPER(?) AND id <> ?) AS present",
        )
        .bind(code)
        .bind(id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get::<i64, _>("present") != 0)
    }

    pub async fn insert(
        &self,
        draft: &DepartmentDraft,
        now: DateTime<Utc>,
    ) -> Result<Department, DepartmentStoreError> {
        let now = to_rfc3339(now);
        let row = sqlx::query_as::<_, DepartmentRow>(&format!(
            "INSERT INTO departments (name, code, description, manager_email, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?) \
             RETURNING {COLUMNS}"
        ))
        .bind(&draft.name)
        .bind(&draft.code)
        .bind(&draft.description)
        .bind(&draft.manager_email)
        .bind(&now)
        .bind(&now)
        .fetch_one(&self.pool)
        .await
        .map_err(|err| map_write_error(err, &draft.code))?;
        Ok(row.into_domain())
    }

    /// Replaces every mutable column. Returns `None` when `id` is unknown.
    pub async fn update(
        &self,
        id: i64,
        draft: &DepartmentDraft,
        now: DateTime<Utc>,
    ) -> Result<Option<Department>, DepartmentStoreError> {
        let row = sqlx::query_as::<_, DepartmentRow>(&format!(
            "UPDATE departments \
             SET name = ?, code = ?, description = ?, manager_email = ?, updated_at = ? \
             WHERE id = ? \
             RETURNING {COLUMNS}"
        ))
        .bind(&draft.name)
        .bind(&draft.code)
        .bind(&draft.description)
        .bind(&draft.manager_email)
        .bind(to_rfc3339(now))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|err| map_write_error(err, &draft.code))?;
        Ok(row.map(DepartmentRow::into_domain))
    }

    /// Returns whether a row was removed.
    pub async fn delete(&self, id: i64) -> Result<bool, DepartmentStoreError> {
        let result = sqlx::query("DELETE FROM departments WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn list(
        &self,
        filter: &DepartmentFilter,
        request: PageRequest,
    ) -> Result<Page<Department>, DepartmentStoreError> {
        const WHERE: &str = "WHERE (? IS NULL OR LOWER(name) LIKE LOWER(?) ESCAPE '\\') \
                               AND (? IS NULL OR LOWER(code) LIKE LOWER(?) ESCAPE '\\')";
        let name = filter.name.as_deref().map(contains_pattern);
        let code = filter.code.as_deref().map(contains_pattern);

        let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM departments {WHERE}"))
            .bind(&name)
            .bind(&name)
            .bind(&code)
            .bind(&code)
            .fetch_one(&self.pool)
            .await?;

        let rows = sqlx::query_as::<_, DepartmentRow>(&format!(
            "SELECT {COLUMNS} FROM departments {WHERE} \
             ORDER BY {column} {direction}, id ASC \
             LIMIT ? OFFSET ?",
            column = sort_column(request.sort.field),
            direction = request.sort.direction.as_sql(),
        ))
        .bind(&name)
        .bind(&name)
        .bind(&code)
        .bind(&code)
        .bind(request.limit())
        .bind(request.offset())
        .fetch_all(&self.pool)
        .await?;

        let content = rows.into_iter().map(DepartmentRow::into_domain).collect();
        Ok(Page::new(content, request, total as u64))
    }
}

fn sort_column(field: &str) -> &'static str {
    match field {
        "name" => "name",
        "code" => "code",
        "createdAt" => "created_at",
        "updatedAt" => "updated_at",
        _ => "id",
    }
}

fn map_write_error(err: sqlx::Error, code: &str) -> DepartmentStoreError {
    if is_unique_violation(&err) {
        DepartmentStoreError::DuplicateCode(code.to_string())
    } else {
        DepartmentStoreError::Database(err)
    }
}

#[derive(Debug, sqlx::FromRow)]
struct DepartmentRow {
    id: i64,
    name: String,
    code: String,
    description: Option<String>,
    manager_email: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl DepartmentRow {
    fn into_domain(self) -> Department {
        Department {
            id: self.id,
            name: self.name,
            code: self.code,
            description: self.description,
            manager_email: self.manager_email,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Errors raised by the department repository.
#[derive(Debug, Error)]
pub enum DepartmentStoreError {
    #[error("department code already exists: {0}")]
    DuplicateCode(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl From<DepartmentStoreError> for ServiceError {
    fn from(err: DepartmentStoreError) -> Self {
        match err {
            DepartmentStoreError::DuplicateCode(code) => {
                ServiceError::duplicate("Department", "code", code)
            }
            DepartmentStoreError::Database(err) => ServiceError::internal(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::setup_db;
    use orgsvc_core::types::{Sort, DEPARTMENT_SORT_FIELDS};

    fn draft(name: &str, code: &str) -> DepartmentDraft {
        DepartmentDraft {
            name: name.to_string(),
            code: code.to_string(),
            description: None,
            manager_email: None,
        }
    }

    #[tokio::test]
    async fn insert_and_lookup() {
        let (db, _dir) = setup_db().await;
        let repo = db.departments();

        let created = repo.insert(&draft("Engineering", "ENG"), Utc::now()).await.expect("insert");
        assert!(created.id > 0);

        let by_id = repo.find_by_id(created.id).await.expect("find").expect("present");
        assert_eq!(by_id, created);
        let by_code = repo.find_by_code("eng").await.expect("find").expect("present");
        assert_eq!(by_code.id, created.id);

        assert!(repo.exists_by_id(created.id).await.expect("exists"));
        assert!(!repo.exists_by_id(created.id + 1).await.expect("exists"));
        assert!(repo.exists_by_code("Eng").await.expect("exists"));
        assert!(!repo
            .exists_by_code_excluding("ENG", created.id)
            .await
            .expect("exists"));
    }

    #[tokio::test]
    async fn duplicate_code_is_reported() {
        let (db, _dir) = setup_db().await;
        let repo = db.departments();
        repo.insert(&draft("Engineering", "ENG"), Utc::now()).await.expect("insert");

        let err = repo
            .insert(&draft("Other", "ENG"), Utc::now())
            .await
            .expect_err("duplicate");
        assert!(matches!(err, DepartmentStoreError::DuplicateCode(code) if code == "ENG"));
    }

    #[tokio::test]
    async fn update_and_delete() {
        let (db, _dir) = setup_db().await;
        let repo = db.departments();
        let created = repo.insert(&draft("Engineering", "ENG"), Utc::now()).await.expect("insert");

        let updated = repo
            .update(created.id, &draft("Platform", "PLT"), Utc::now())
            .await
            .expect("update")
            .expect("present");
        assert_eq!(updated.name, "Platform");
        assert_eq!(updated.created_at, created.created_at);

        assert!(repo.update(999, &draft("X", "XXX"), Utc::now()).await.expect("update").is_none());
        assert!(repo.delete(created.id).await.expect("delete"));
        assert!(!repo.delete(created.id).await.expect("delete twice"));
    }

    #[tokio::test]
    async fn list_filters_sorts_and_pages() {
        let (db, _dir) = setup_db().await;
        let repo = db.departments();
        for (name, code) in [("Engineering", "ENG"), ("Finance", "FIN"), ("Legal", "LEG")] {
            repo.insert(&draft(name, code), Utc::now()).await.expect("insert");
        }

        let request = PageRequest::new(Some(0), Some(2), Some("name,desc"), DEPARTMENT_SORT_FIELDS)
            .expect("page");
        let page = repo.list(&DepartmentFilter::default(), request).await.expect("list");
        assert_eq!(page.total_elements, 3);
        assert_eq!(page.total_pages, 2);
        let names: Vec<_> = page.content.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["Legal", "Finance"]);

        let filter = DepartmentFilter::new(Some("gin".into()), None);
        let page = repo
            .list(
                &filter,
                PageRequest {
                    sort: Sort::BY_ID,
                    ..PageRequest::default()
                },
            )
            .await
            .expect("list");
        assert_eq!(page.total_elements, 1);
        assert_eq!(page.content[0].code, "ENG");
    }

    #[tokio::test]
    async fn list_filter_treats_wildcards_literally() {
        let (db, _dir) = setup_db().await;
        let repo = db.departments();
        for (name, code) in [("Engineering", "ENG"), ("R_D", "RND"), ("Finance", "FIN")] {
            repo.insert(&draft(name, code), Utc::now()).await.expect("insert");
        }

        let page = repo
            .list(&DepartmentFilter::new(Some("%".into()), None), PageRequest::default())
            .await
            .expect("list");
        assert_eq!(page.total_elements, 0);

        let page = repo
            .list(&DepartmentFilter::new(Some("_".into()), None), PageRequest::default())
            .await
            .expect("list");
        assert_eq!(page.total_elements, 1);
        assert_eq!(page.content[0].code, "RND");
    }
}
