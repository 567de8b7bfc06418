use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{FieldViolation, ServiceError};

pub const DEFAULT_PAGE_SIZE: u32 = 20;
pub const MAX_PAGE_SIZE: u32 = 100;

pub const DEPARTMENT_NAME_MAX: usize = 120;
pub const DEPARTMENT_CODE_MIN: usize = 3;
pub const DEPARTMENT_CODE_MAX: usize = 20;
pub const EMPLOYEE_NAME_MAX: usize = 80;

/// Sortable fields of the department listing.
pub const DEPARTMENT_SORT_FIELDS: &[&str] = &["id", "name", "code", "createdAt", "updatedAt"];
/// Sortable fields of the employee listing.
pub const EMPLOYEE_SORT_FIELDS: &[&str] = &[
    "id",
    "firstName",
    "lastName",
    "email",
    "departmentId",
    "createdAt",
    "updatedAt",
];

/// Department persisted by the department service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Department {
    pub id: i64,
    pub name: String,
    pub code: String,
    pub description: Option<String>,
    pub manager_email: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Projection of a department attached to employee responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepartmentSummary {
    pub id: i64,
    pub name: String,
    pub code: String,
}

impl From<&Department> for DepartmentSummary {
    fn from(department: &Department) -> Self {
        Self {
            id: department.id,
            name: department.name.clone(),
            code: department.code.clone(),
        }
    }
}

/// Inbound department payload shared by create, update and patch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DepartmentRequest {
    pub name: Option<String>,
    pub code: Option<String>,
    pub description: Option<String>,
    pub manager_email: Option<String>,
}

/// Validated department fields ready to be written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepartmentDraft {
    pub name: String,
    pub code: String,
    pub description: Option<String>,
    pub manager_email: Option<String>,
}

/// Validated subset of department fields supplied by a patch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DepartmentPatch {
    pub name: Option<String>,
    pub code: Option<String>,
    pub description: Option<String>,
    pub manager_email: Option<String>,
}

impl DepartmentRequest {
    /// Validates a full payload. The code is stored upper-case.
    pub fn into_draft(self) -> Result<DepartmentDraft, ServiceError> {
        let mut violations = Vec::new();
        let name = required("name", self.name, &mut violations);
        let code = required("code", self.code, &mut violations).map(|code| code.to_uppercase());
        if let Some(name) = &name {
            check_max("name", name, DEPARTMENT_NAME_MAX, &mut violations);
        }
        if let Some(code) = &code {
            check_code(code, &mut violations);
        }
        let manager_email = optional(self.manager_email);
        if let Some(email) = &manager_email {
            check_email("managerEmail", email, &mut violations);
        }

        match (name, code) {
            (Some(name), Some(code)) if violations.is_empty() => Ok(DepartmentDraft {
                name,
                code,
                description: optional(self.description),
                manager_email,
            }),
            _ => Err(ServiceError::validation(violations)),
        }
    }

    /// Validates only the fields present in the payload.
    pub fn into_patch(self) -> Result<DepartmentPatch, ServiceError> {
        let mut violations = Vec::new();
        let name = self.name.map(|name| name.trim().to_string());
        if let Some(name) = &name {
            if name.is_empty() {
                violations.push(FieldViolation::new("name", "must not be blank"));
            }
            check_max("name", name, DEPARTMENT_NAME_MAX, &mut violations);
        }
        let code = self.code.map(|code| code.trim().to_uppercase());
        if let Some(code) = &code {
            check_code(code, &mut violations);
        }
        let manager_email = optional(self.manager_email);
        if let Some(email) = &manager_email {
            check_email("managerEmail", email, &mut violations);
        }

        if !violations.is_empty() {
            return Err(ServiceError::validation(violations));
        }
        Ok(DepartmentPatch {
            name,
            code,
            description: optional(self.description),
            manager_email,
        })
    }
}

impl DepartmentPatch {
    pub fn apply_to(self, current: &Department) -> DepartmentDraft {
        DepartmentDraft {
            name: self.name.unwrap_or_else(|| current.name.clone()),
            code: self.code.unwrap_or_else(|| current.code.clone()),
            description: self.description.or_else(|| current.description.clone()),
            manager_email: self.manager_email.or_else(|| current.manager_email.clone()),
        }
    }
}

/// Employee persisted by the employee service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Employee {
    pub id: i64,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub department_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Employee as returned to clients, decorated with its department when it
/// could be resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EmployeeView {
    pub id: i64,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub department_id: Option<i64>,
    pub department: Option<DepartmentSummary>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl EmployeeView {
    pub fn assemble(employee: Employee, department: Option<DepartmentSummary>) -> Self {
        Self {
            id: employee.id,
            first_name: employee.first_name,
            last_name: employee.last_name,
            email: employee.email,
            department_id: employee.department_id,
            department,
            created_at: employee.created_at,
            updated_at: employee.updated_at,
        }
    }
}

/// Employee listing entry as read back from the employee service by its peers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmployeeSummary {
    pub id: i64,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    #[serde(default)]
    pub department_id: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmployeeRequest {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub department_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmployeeDraft {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub department_id: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EmployeePatch {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub department_id: Option<i64>,
}

impl EmployeeRequest {
    pub fn into_draft(self) -> Result<EmployeeDraft, ServiceError> {
        let mut violations = Vec::new();
        let first_name = required("firstName", self.first_name, &mut violations);
        let last_name = required("lastName", self.last_name, &mut violations);
        let email = required("email", self.email, &mut violations);
        if let Some(first_name) = &first_name {
            check_max("firstName", first_name, EMPLOYEE_NAME_MAX, &mut violations);
        }
        if let Some(last_name) = &last_name {
            check_max("lastName", last_name, EMPLOYEE_NAME_MAX, &mut violations);
        }
        if let Some(email) = &email {
            check_email("email", email, &mut violations);
        }
        check_department_id(self.department_id, &mut violations);

        match (first_name, last_name, email) {
            (Some(first_name), Some(last_name), Some(email)) if violations.is_empty() => {
                Ok(EmployeeDraft {
                    first_name,
                    last_name,
                    email,
                    department_id: self.department_id,
                })
            }
            _ => Err(ServiceError::validation(violations)),
        }
    }

    pub fn into_patch(self) -> Result<EmployeePatch, ServiceError> {
        let mut violations = Vec::new();
        let first_name = self.first_name.map(|value| value.trim().to_string());
        let last_name = self.last_name.map(|value| value.trim().to_string());
        let email = self.email.map(|value| value.trim().to_string());
        for (field, value) in [("firstName", &first_name), ("lastName", &last_name)] {
            if let Some(value) = value {
                if value.is_empty() {
                    violations.push(FieldViolation::new(field, "must not be blank"));
                }
                check_max(field, value, EMPLOYEE_NAME_MAX, &mut violations);
            }
        }
        if let Some(email) = &email {
            check_email("email", email, &mut violations);
        }
        check_department_id(self.department_id, &mut violations);

        if !violations.is_empty() {
            return Err(ServiceError::validation(violations));
        }
        Ok(EmployeePatch {
            first_name,
            last_name,
            email,
            department_id: self.department_id,
        })
    }
}

impl EmployeePatch {
    pub fn apply_to(self, current: &Employee) -> EmployeeDraft {
        EmployeeDraft {
            first_name: self.first_name.unwrap_or_else(|| current.first_name.clone()),
            last_name: self.last_name.unwrap_or_else(|| current.last_name.clone()),
            email: self.email.unwrap_or_else(|| current.email.clone()),
            department_id: self.department_id.or(current.department_id),
        }
    }
}

/// Aggregate head counts of the employee service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EmployeeStats {
    pub total_employees: u64,
    pub counts_by_department: BTreeMap<i64, u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DepartmentFilter {
    pub name: Option<String>,
    pub code: Option<String>,
}

impl DepartmentFilter {
    pub fn new(name: Option<String>, code: Option<String>) -> Self {
        Self {
            name: optional(name),
            code: optional(code),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EmployeeFilter {
    pub email: Option<String>,
    pub last_name: Option<String>,
    pub department_id: Option<i64>,
}

impl EmployeeFilter {
    pub fn new(email: Option<String>, last_name: Option<String>, department_id: Option<i64>) -> Self {
        Self {
            email: optional(email),
            last_name: optional(last_name),
            department_id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    pub fn as_sql(self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

/// Sort order restricted to a fixed set of field names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sort {
    pub field: &'static str,
    pub direction: SortDirection,
}

impl Sort {
    pub const BY_ID: Sort = Sort {
        field: "id",
        direction: SortDirection::Asc,
    };

    /// Parses `field[,asc|desc]`, accepting only names listed in `allowed`.
    pub fn parse(raw: &str, allowed: &[&'static str]) -> Result<Self, ServiceError> {
        let (field, direction) = match raw.split_once(',') {
            Some((field, direction)) => (field.trim(), Some(direction.trim())),
            None => (raw.trim(), None),
        };
        let field = allowed
            .iter()
            .copied()
            .find(|candidate| *candidate == field)
            .ok_or_else(|| {
                ServiceError::validation(vec![FieldViolation::new(
                    "sort",
                    format!("unsupported sort field, expected one of {}", allowed.join(", ")),
                )
                .rejecting(raw)])
            })?;
        let direction = match direction.map(str::to_ascii_lowercase).as_deref() {
            None | Some("") | Some("asc") => SortDirection::Asc,
            Some("desc") => SortDirection::Desc,
            Some(_) => {
                return Err(ServiceError::validation(vec![FieldViolation::new(
                    "sort",
                    "direction must be asc or desc",
                )
                .rejecting(raw)]))
            }
        };
        Ok(Self { field, direction })
    }
}

impl fmt::Display for Sort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let direction = match self.direction {
            SortDirection::Asc => "asc",
            SortDirection::Desc => "desc",
        };
        write!(f, "{},{}", self.field, direction)
    }
}

/// Zero-based page coordinates of a listing request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: u32,
    pub size: u32,
    pub sort: Sort,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: 0,
            size: DEFAULT_PAGE_SIZE,
            sort: Sort::BY_ID,
        }
    }
}

impl PageRequest {
    pub fn new(
        page: Option<u32>,
        size: Option<u32>,
        sort: Option<&str>,
        allowed: &[&'static str],
    ) -> Result<Self, ServiceError> {
        let size = size.unwrap_or(DEFAULT_PAGE_SIZE);
        if size == 0 || size > MAX_PAGE_SIZE {
            return Err(ServiceError::validation(vec![FieldViolation::new(
                "size",
                format!("must be between 1 and {MAX_PAGE_SIZE}"),
            )
            .rejecting(size.to_string())]));
        }
        let sort = match sort.map(str::trim).filter(|raw| !raw.is_empty()) {
            Some(raw) => Sort::parse(raw, allowed)?,
            None => Sort::BY_ID,
        };
        Ok(Self {
            page: page.unwrap_or(0),
            size,
            sort,
        })
    }

    pub fn offset(&self) -> i64 {
        i64::from(self.page) * i64::from(self.size)
    }

    pub fn limit(&self) -> i64 {
        i64::from(self.size)
    }
}

/// Paginated listing in the wire shape shared by every service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    #[serde(default = "Vec::new")]
    pub content: Vec<T>,
    #[serde(default)]
    pub page: u32,
    #[serde(default)]
    pub size: u32,
    // Required when reading a peer's listing: a probe must not read a
    // malformed body as zero dependents.
    pub total_elements: u64,
    #[serde(default)]
    pub total_pages: u64,
    #[serde(default)]
    pub first: bool,
    #[serde(default)]
    pub last: bool,
}

impl<T> Page<T> {
    pub fn new(content: Vec<T>, request: PageRequest, total_elements: u64) -> Self {
        let size = u64::from(request.size.max(1));
        let total_pages = total_elements.div_ceil(size);
        Self {
            content,
            page: request.page,
            size: request.size,
            total_elements,
            total_pages,
            first: request.page == 0,
            last: u64::from(request.page) + 1 >= total_pages,
        }
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            content: self.content.into_iter().map(f).collect(),
            page: self.page,
            size: self.size,
            total_elements: self.total_elements,
            total_pages: self.total_pages,
            first: self.first,
            last: self.last,
        }
    }
}

/// Product as served by the FakeStore catalogue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: i64,
    pub title: String,
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub rating: Option<Rating>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rating {
    pub rate: f64,
    pub count: u64,
}

pub const DEFAULT_CATEGORIES: [&str; 4] = [
    "electronics",
    "jewelery",
    "men's clothing",
    "women's clothing",
];

impl Product {
    /// Placeholder returned when the catalogue cannot be reached.
    pub fn unavailable(id: i64) -> Self {
        Self {
            id,
            title: "Product Unavailable".to_string(),
            price: Some(0.0),
            description: Some(
                "This product is temporarily unavailable. Please try again later.".to_string(),
            ),
            category: Some("unavailable".to_string()),
            image: None,
            rating: None,
        }
    }

    pub fn price_between(&self, min: f64, max: f64) -> bool {
        self.price.is_some_and(|price| price >= min && price <= max)
    }

    /// Case-insensitive match against title and description.
    pub fn mentions(&self, keyword: &str) -> bool {
        let keyword = keyword.to_lowercase();
        self.title.to_lowercase().contains(&keyword)
            || self
                .description
                .as_deref()
                .is_some_and(|description| description.to_lowercase().contains(&keyword))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProductSource {
    FakestoreApi,
    Cache,
    Fallback,
}

/// Envelope of every product-service response.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProductResponse<T> {
    pub data: T,
    pub source: ProductSource,
    pub cached: bool,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl<T> ProductResponse<T> {
    pub fn live(data: T, timestamp: DateTime<Utc>) -> Self {
        Self {
            data,
            source: ProductSource::FakestoreApi,
            cached: false,
            timestamp,
            message: None,
        }
    }

    pub fn cached(data: T, timestamp: DateTime<Utc>) -> Self {
        Self {
            data,
            source: ProductSource::Cache,
            cached: true,
            timestamp,
            message: None,
        }
    }

    pub fn fallback(data: T, timestamp: DateTime<Utc>, message: impl Into<String>) -> Self {
        Self {
            data,
            source: ProductSource::Fallback,
            cached: false,
            timestamp,
            message: Some(message.into()),
        }
    }

    /// Derives a response from this one, keeping its provenance.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> ProductResponse<U> {
        ProductResponse {
            data: f(self.data),
            source: self.source,
            cached: self.cached,
            timestamp: self.timestamp,
            message: self.message,
        }
    }
}

fn optional(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn required(
    field: &'static str,
    value: Option<String>,
    violations: &mut Vec<FieldViolation>,
) -> Option<String> {
    let value = optional(value);
    if value.is_none() {
        violations.push(FieldViolation::new(field, "is required"));
    }
    value
}

fn check_max(field: &'static str, value: &str, max: usize, violations: &mut Vec<FieldViolation>) {
    if value.chars().count() > max {
        violations.push(
            FieldViolation::new(field, format!("must be at most {max} characters")).rejecting(value),
        );
    }
}

fn check_code(code: &str, violations: &mut Vec<FieldViolation>) {
    let len = code.chars().count();
    if !(DEPARTMENT_CODE_MIN..=DEPARTMENT_CODE_MAX).contains(&len) {
        violations.push(
            FieldViolation::new(
                "code",
                format!(
                    "must be between {DEPARTMENT_CODE_MIN} and {DEPARTMENT_CODE_MAX} characters"
                ),
            )
            .rejecting(code),
        );
    }
}

fn check_email(field: &'static str, value: &str, violations: &mut Vec<FieldViolation>) {
    if !looks_like_email(value) {
        violations.push(FieldViolation::new(field, "must be a valid email address").rejecting(value));
    }
}

fn check_department_id(department_id: Option<i64>, violations: &mut Vec<FieldViolation>) {
    if let Some(id) = department_id.filter(|id| *id <= 0) {
        violations.push(
            FieldViolation::new("departmentId", "must be a positive number").rejecting(id.to_string()),
        );
    }
}

pub fn looks_like_email(value: &str) -> bool {
    if value.chars().any(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = value.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use chrono::TimeZone;
    use serde_json::json;

    fn violations(err: ServiceError) -> Vec<&'static str> {
        match err {
            ServiceError::Validation { violations } => {
                violations.into_iter().map(|violation| violation.field).collect()
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    fn department() -> Department {
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        Department {
            id: 1,
            name: "Engineering".into(),
            code: "ENG".into(),
            description: Some("Builds things".into()),
            manager_email: None,
            created_at: at,
            updated_at: at,
        }
    }

    #[test]
    fn department_draft_normalizes_code() {
        let draft = DepartmentRequest {
            name: Some("  Engineering ".into()),
            code: Some(" eng-01 ".into()),
            description: Some("   ".into()),
            manager_email: Some("lead@example.com".into()),
        }
        .into_draft()
        .expect("valid");

        assert_eq!(draft.name, "Engineering");
        assert_eq!(draft.code, "ENG-01");
        assert_eq!(draft.description, None);
        assert_eq!(draft.manager_email.as_deref(), Some("lead@example.com"));
    }

    #[test]
    fn department_draft_collects_every_violation() {
        let err = DepartmentRequest {
            name: None,
            code: Some("ab".into()),
            description: None,
            manager_email: Some("not-an-email".into()),
        }
        .into_draft()
        .expect_err("invalid");

        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(violations(err), vec!["name", "code", "managerEmail"]);
    }

    #[test]
    fn department_patch_keeps_missing_fields() {
        let patch = DepartmentRequest {
            code: Some("ops".into()),
            ..DepartmentRequest::default()
        }
        .into_patch()
        .expect("valid patch");

        let draft = patch.apply_to(&department());
        assert_eq!(draft.name, "Engineering");
        assert_eq!(draft.code, "OPS");
        assert_eq!(draft.description.as_deref(), Some("Builds things"));
    }

    #[test]
    fn department_patch_rejects_blank_name() {
        let err = DepartmentRequest {
            name: Some("  ".into()),
            ..DepartmentRequest::default()
        }
        .into_patch()
        .expect_err("blank name");
        assert_eq!(violations(err), vec!["name"]);
    }

    #[test]
    fn employee_draft_validates_fields() {
        let err = EmployeeRequest {
            first_name: Some("A".repeat(81)),
            last_name: None,
            email: Some("bad@".into()),
            department_id: Some(0),
        }
        .into_draft()
        .expect_err("invalid");

        assert_eq!(
            violations(err),
            vec!["lastName", "firstName", "email", "departmentId"]
        );
    }

    #[test]
    fn employee_patch_merges_department() {
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let current = Employee {
            id: 4,
            first_name: "Ada".into(),
            last_name: "Lovelace".into(),
            email: "ada@example.com".into(),
            department_id: Some(1),
            created_at: at,
            updated_at: at,
        };

        let draft = EmployeeRequest {
            department_id: Some(2),
            ..EmployeeRequest::default()
        }
        .into_patch()
        .expect("valid")
        .apply_to(&current);
        assert_eq!(draft.department_id, Some(2));
        assert_eq!(draft.email, "ada@example.com");
    }

    #[test]
    fn employee_view_serializes_null_department() {
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let view = EmployeeView::assemble(
            Employee {
                id: 1,
                first_name: "Ada".into(),
                last_name: "Lovelace".into(),
                email: "ada@example.com".into(),
                department_id: Some(9),
                created_at: at,
                updated_at: at,
            },
            None,
        );
        let value = serde_json::to_value(&view).expect("serialize");
        assert_eq!(value["firstName"], "Ada");
        assert_eq!(value["departmentId"], 9);
        assert!(value["department"].is_null());
    }

    #[test]
    fn page_request_bounds_and_sort() {
        let request =
            PageRequest::new(Some(2), Some(10), Some("name,desc"), DEPARTMENT_SORT_FIELDS)
                .expect("valid");
        assert_eq!(request.offset(), 20);
        assert_eq!(request.sort.field, "name");
        assert_eq!(request.sort.direction, SortDirection::Desc);
        assert_eq!(request.sort.to_string(), "name,desc");

        assert!(PageRequest::new(None, Some(0), None, DEPARTMENT_SORT_FIELDS).is_err());
        assert!(PageRequest::new(None, Some(101), None, DEPARTMENT_SORT_FIELDS).is_err());
        assert!(PageRequest::new(None, None, Some("salary"), EMPLOYEE_SORT_FIELDS).is_err());
        assert!(PageRequest::new(None, None, Some("id,sideways"), EMPLOYEE_SORT_FIELDS).is_err());
        assert_eq!(
            PageRequest::new(None, None, Some(" "), EMPLOYEE_SORT_FIELDS).expect("default"),
            PageRequest::default()
        );
    }

    #[test]
    fn page_metadata_is_derived_from_total() {
        let request = PageRequest::new(Some(1), Some(2), None, DEPARTMENT_SORT_FIELDS).expect("valid");
        let page = Page::new(vec![3, 4], request, 5);
        assert_eq!(page.total_pages, 3);
        assert!(!page.first);
        assert!(!page.last);

        let empty = Page::<i32>::new(Vec::new(), PageRequest::default(), 0);
        assert_eq!(empty.total_pages, 0);
        assert!(empty.first && empty.last);

        let value = serde_json::to_value(page.map(|n| n * 10)).expect("serialize");
        assert_eq!(value["content"], json!([30, 40]));
        assert_eq!(value["totalElements"], 5);
    }

    #[test]
    fn peer_page_requires_total_elements() {
        let page: Page<EmployeeSummary> = serde_json::from_value(json!({
            "content": [],
            "totalElements": 3
        }))
        .expect("minimal page");
        assert_eq!(page.total_elements, 3);

        let malformed = serde_json::from_value::<Page<EmployeeSummary>>(json!({"content": []}));
        assert!(malformed.is_err());
    }

    #[test]
    fn product_helpers() {
        let product = Product {
            id: 1,
            title: "Fjallraven Backpack".into(),
            price: Some(109.95),
            description: Some("Your perfect pack for everyday use".into()),
            category: Some("men's clothing".into()),
            image: None,
            rating: Some(Rating {
                rate: 3.9,
                count: 120,
            }),
        };
        assert!(product.price_between(100.0, 110.0));
        assert!(!product.price_between(0.0, 100.0));
        assert!(product.mentions("BACKPACK"));
        assert!(product.mentions("everyday"));
        assert!(!product.mentions("laptop"));

        let placeholder = Product::unavailable(7);
        assert_eq!(placeholder.title, "Product Unavailable");
        assert_eq!(placeholder.id, 7);
    }

    #[test]
    fn email_shape() {
        assert!(looks_like_email("a.b@example.co"));
        assert!(!looks_like_email("a b@example.com"));
        assert!(!looks_like_email("@example.com"));
        assert!(!looks_like_email("a@example"));
        assert!(!looks_like_email("a@@example.com"));
    }
}
