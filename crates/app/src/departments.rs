use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use metrics::counter;
use serde::Deserialize;
use tracing::info;

use orgsvc_clients::EmployeeClient;
use orgsvc_core::referential::{probe_dependents, require_reference};
use orgsvc_core::types::{
    Department, DepartmentFilter, DepartmentRequest, EmployeeSummary, Page, PageRequest,
    DEPARTMENT_SORT_FIELDS, EMPLOYEE_SORT_FIELDS,
};
use orgsvc_core::{CheckOutcome, RemoteError, RemoteTarget, ServiceError};
use orgsvc_storage::Database;

use crate::problem::ProblemResponse;
use crate::router::{AppState, Clock};

pub const SERVICE_NAME: &str = "department-service";

/// Department CRUD plus the checks that involve the employee service.
#[derive(Clone)]
pub struct DepartmentService {
    storage: Database,
    employees: EmployeeClient,
    clock: Clock,
}

impl DepartmentService {
    pub fn new(storage: Database, employees: EmployeeClient, clock: Clock) -> Self {
        Self {
            storage,
            employees,
            clock,
        }
    }

    fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    pub async fn list(
        &self,
        filter: &DepartmentFilter,
        request: PageRequest,
    ) -> Result<Page<Department>, ServiceError> {
        Ok(self.storage.departments().list(filter, request).await?)
    }

    pub async fn get(&self, id: i64) -> Result<Department, ServiceError> {
        self.storage
            .departments()
            .find_by_id(id)
            .await?
            .ok_or_else(|| ServiceError::not_found("Department", id))
    }

    pub async fn get_by_code(&self, code: &str) -> Result<Department, ServiceError> {
        self.storage
            .departments()
            .find_by_code(code)
            .await?
            .ok_or_else(|| ServiceError::not_found_by("Department", "code", code.trim().to_uppercase()))
    }

    pub async fn create(&self, request: DepartmentRequest) -> Result<Department, ServiceError> {
        let draft = request.into_draft()?;
        let repo = self.storage.departments();
        if repo.exists_by_code(&draft.code).await? {
            return Err(ServiceError::duplicate("Department", "code", draft.code));
        }

        let department = repo.insert(&draft, self.now()).await?;
        info!(stage = "departments", department_id = department.id, code = %department.code, "department created");
        Ok(department)
    }

    pub async fn update(&self, id: i64, request: DepartmentRequest) -> Result<Department, ServiceError> {
        let draft = request.into_draft()?;
        let repo = self.storage.departments();
        if !repo.exists_by_id(id).await? {
            return Err(ServiceError::not_found("Department", id));
        }
        if repo.exists_by_code_excluding(&draft.code, id).await? {
            return Err(ServiceError::duplicate("Department", "code", draft.code));
        }

        repo.update(id, &draft, self.now())
            .await?
            .ok_or_else(|| ServiceError::not_found("Department", id))
    }

    pub async fn patch(&self, id: i64, request: DepartmentRequest) -> Result<Department, ServiceError> {
        let patch = request.into_patch()?;
        let repo = self.storage.departments();
        let current = repo
            .find_by_id(id)
            .await?
            .ok_or_else(|| ServiceError::not_found("Department", id))?;
        if let Some(code) = &patch.code {
            if repo.exists_by_code_excluding(code, id).await? {
                return Err(ServiceError::duplicate("Department", "code", code.clone()));
            }
        }

        let draft = patch.apply_to(&current);
        repo.update(id, &draft, self.now())
            .await?
            .ok_or_else(|| ServiceError::not_found("Department", id))
    }

    /// Deletes a department unless the employee service confirms it still has
    /// employees. An unreachable employee service does not block the delete.
    pub async fn delete(&self, id: i64) -> Result<CheckOutcome, ServiceError> {
        let repo = self.storage.departments();
        if !repo.exists_by_id(id).await? {
            return Err(ServiceError::not_found("Department", id));
        }

        let probe = self
            .employees
            .count_employees(id)
            .await
            .map_err(RemoteError::from);
        let outcome = probe_dependents(RemoteTarget::new("employee-service", "Employee", id), probe);
        counter!(
            "remote_checks_total",
            "site" => "department_delete_probe",
            "outcome" => outcome.label()
        )
        .increment(1);

        if let CheckOutcome::ConfirmedPresent(count) = outcome {
            return Err(ServiceError::BusinessRuleViolation {
                code: "department_has_employees",
                message: format!(
                    "Cannot delete department. {count} employee(s) are still assigned to this department."
                ),
            });
        }

        if !repo.delete(id).await? {
            return Err(ServiceError::not_found("Department", id));
        }
        info!(stage = "departments", department_id = id, probe = outcome.label(), "department deleted");
        Ok(outcome)
    }

    /// Lists the employees assigned to a department, as reported by the
    /// employee service. Any peer failure, a 404 included, surfaces as 502.
    pub async fn employees_of(
        &self,
        id: i64,
        request: PageRequest,
    ) -> Result<Page<EmployeeSummary>, ServiceError> {
        if !self.storage.departments().exists_by_id(id).await? {
            return Err(ServiceError::not_found("Department", id));
        }

        let result = self
            .employees
            .list_employees(id, request.page, request.size)
            .await
            .map_err(|err| match RemoteError::from(err) {
                // The department exists locally, so a 404 means the listing itself is missing.
                RemoteError::NotFound => RemoteError::unavailable(Some(404), "employee listing not found"),
                other => other,
            });
        let outcome = require_reference(RemoteTarget::new("employee-service", "Employee", id), result);
        counter!(
            "remote_checks_total",
            "site" => "department_employees",
            "outcome" => if outcome.is_ok() { "found" } else { "failed" }
        )
        .increment(1);
        outcome
    }
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_departments).post(create_department))
        .route("/by-code/:code", get(get_department_by_code))
        .route(
            "/:id",
            get(get_department)
                .put(update_department)
                .patch(patch_department)
                .delete(delete_department),
        )
        .route("/:id/employees", get(list_department_employees))
}

fn problem(err: ServiceError) -> ProblemResponse {
    ProblemResponse::from_service_error(SERVICE_NAME, err)
}

fn rejected(rejection: impl std::fmt::Display) -> ProblemResponse {
    ProblemResponse::rejected(SERVICE_NAME, rejection)
}

#[derive(Debug, Default, Deserialize)]
struct ListQuery {
    page: Option<u32>,
    size: Option<u32>,
    sort: Option<String>,
    name: Option<String>,
    code: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct PageQuery {
    page: Option<u32>,
    size: Option<u32>,
}

async fn list_departments(
    State(state): State<AppState>,
    query: Result<Query<ListQuery>, QueryRejection>,
) -> Result<Json<Page<Department>>, ProblemResponse> {
    let Query(query) = query.map_err(rejected)?;
    let request = PageRequest::new(query.page, query.size, query.sort.as_deref(), DEPARTMENT_SORT_FIELDS)
        .map_err(problem)?;
    let filter = DepartmentFilter::new(query.name, query.code);
    let page = state.departments().list(&filter, request).await.map_err(problem)?;
    Ok(Json(page))
}

async fn get_department(
    State(state): State<AppState>,
    id: Result<Path<i64>, PathRejection>,
) -> Result<Json<Department>, ProblemResponse> {
    let Path(id) = id.map_err(rejected)?;
    let department = state.departments().get(id).await.map_err(problem)?;
    Ok(Json(department))
}

async fn get_department_by_code(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> Result<Json<Department>, ProblemResponse> {
    let department = state.departments().get_by_code(&code).await.map_err(problem)?;
    Ok(Json(department))
}

async fn create_department(
    State(state): State<AppState>,
    payload: Result<Json<DepartmentRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Department>), ProblemResponse> {
    let Json(request) = payload.map_err(rejected)?;
    let department = state.departments().create(request).await.map_err(problem)?;
    Ok((StatusCode::CREATED, Json(department)))
}

async fn update_department(
    State(state): State<AppState>,
    id: Result<Path<i64>, PathRejection>,
    payload: Result<Json<DepartmentRequest>, JsonRejection>,
) -> Result<Json<Department>, ProblemResponse> {
    let Path(id) = id.map_err(rejected)?;
    let Json(request) = payload.map_err(rejected)?;
    let department = state.departments().update(id, request).await.map_err(problem)?;
    Ok(Json(department))
}

async fn patch_department(
    State(state): State<AppState>,
    id: Result<Path<i64>, PathRejection>,
    payload: Result<Json<DepartmentRequest>, JsonRejection>,
) -> Result<Json<Department>, ProblemResponse> {
    let Path(id) = id.map_err(rejected)?;
    let Json(request) = payload.map_err(rejected)?;
    let department = state.departments().patch(id, request).await.map_err(problem)?;
    Ok(Json(department))
}

async fn delete_department(
    State(state): State<AppState>,
    id: Result<Path<i64>, PathRejection>,
) -> Result<StatusCode, ProblemResponse> {
    let Path(id) = id.map_err(rejected)?;
    state.departments().delete(id).await.map_err(problem)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_department_employees(
    State(state): State<AppState>,
    id: Result<Path<i64>, PathRejection>,
    query: Result<Query<PageQuery>, QueryRejection>,
) -> Result<Json<Page<EmployeeSummary>>, ProblemResponse> {
    let Path(id) = id.map_err(rejected)?;
    let Query(query) = query.map_err(rejected)?;
    let request =
        PageRequest::new(query.page, query.size, None, EMPLOYEE_SORT_FIELDS).map_err(problem)?;
    let page = state.departments().employees_of(id, request).await.map_err(problem)?;
    Ok(Json(page))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{read_json, send, TestApp};
    use axum::http::Method;
    use httpmock::prelude::*;
    use serde_json::json;

    fn engineering() -> serde_json::Value {
        json!({
            "name": "Engineering",
            "code": "eng",
            "description": "Builds the product",
            "managerEmail": "lead@example.com"
        })
    }

    #[tokio::test]
    async fn create_upper_cases_code_and_rejects_duplicates() {
        let app = TestApp::start().await;

        let response = send(&app.router, Method::POST, "/api/v1/departments", Some(engineering())).await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let body = read_json(response).await;
        assert_eq!(body["code"], "ENG");
        assert_eq!(body["managerEmail"], "lead@example.com");

        let response = send(
            &app.router,
            Method::POST,
            "/api/v1/departments",
            Some(json!({"name": "Other", "code": "Eng"})),
        )
        .await;
        assert_eq!(response.status(), StatusCode::CONFLICT);
        assert_eq!(
            response.headers()["content-type"],
            "application/problem+json"
        );
        let body = read_json(response).await;
        assert_eq!(body["type"], "duplicate-resource");
        assert_eq!(body["service"], SERVICE_NAME);
        assert_eq!(body["value"], "ENG");
    }

    #[tokio::test]
    async fn invalid_payloads_are_rejected() {
        let app = TestApp::start().await;

        let response = send(
            &app.router,
            Method::POST,
            "/api/v1/departments",
            Some(json!({"name": "", "code": "x", "managerEmail": "nope"})),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = read_json(response).await;
        assert_eq!(body["type"], "validation-error");
        assert_eq!(body["violations"].as_array().map(Vec::len), Some(3));

        let response = send(&app.router, Method::GET, "/api/v1/departments/abc", None).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = send(&app.router, Method::GET, "/api/v1/departments?size=500", None).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn lookups_by_id_and_code() {
        let app = TestApp::start().await;
        let created = read_json(
            send(&app.router, Method::POST, "/api/v1/departments", Some(engineering())).await,
        )
        .await;
        let id = created["id"].as_i64().expect("id");

        let response = send(&app.router, Method::GET, &format!("/api/v1/departments/{id}"), None).await;
        assert_eq!(response.status(), StatusCode::OK);

        let response = send(&app.router, Method::GET, "/api/v1/departments/by-code/eng", None).await;
        assert_eq!(read_json(response).await["id"], id);

        let response = send(&app.router, Method::GET, "/api/v1/departments/999", None).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = read_json(response).await;
        assert_eq!(body["type"], "not-found");
        assert_eq!(body["detail"], "Department not found with id: 999");
    }

    #[tokio::test]
    async fn update_and_patch() {
        let app = TestApp::start().await;
        let first = read_json(
            send(&app.router, Method::POST, "/api/v1/departments", Some(engineering())).await,
        )
        .await;
        let id = first["id"].as_i64().expect("id");
        send(
            &app.router,
            Method::POST,
            "/api/v1/departments",
            Some(json!({"name": "Finance", "code": "FIN"})),
        )
        .await;

        let response = send(
            &app.router,
            Method::PATCH,
            &format!("/api/v1/departments/{id}"),
            Some(json!({"description": "Platform and tooling"})),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = read_json(response).await;
        assert_eq!(body["name"], "Engineering");
        assert_eq!(body["description"], "Platform and tooling");

        let response = send(
            &app.router,
            Method::PATCH,
            &format!("/api/v1/departments/{id}"),
            Some(json!({"code": "fin"})),
        )
        .await;
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let response = send(
            &app.router,
            Method::PUT,
            &format!("/api/v1/departments/{id}"),
            Some(json!({"name": "Platform", "code": "ENG"})),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = read_json(response).await;
        assert_eq!(body["name"], "Platform");
        assert!(body["description"].is_null());

        let response = send(
            &app.router,
            Method::PUT,
            "/api/v1/departments/999",
            Some(json!({"name": "Ghost", "code": "GHO"})),
        )
        .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn list_pages_and_filters() {
        let app = TestApp::start().await;
        for (name, code) in [("Engineering", "ENG"), ("Finance", "FIN"), ("Legal", "LEG")] {
            send(
                &app.router,
                Method::POST,
                "/api/v1/departments",
                Some(json!({"name": name, "code": code})),
            )
            .await;
        }

        let response = send(
            &app.router,
            Method::GET,
            "/api/v1/departments?page=0&size=2&sort=code,desc",
            None,
        )
        .await;
        let body = read_json(response).await;
        assert_eq!(body["totalElements"], 3);
        assert_eq!(body["totalPages"], 2);
        assert_eq!(body["content"][0]["code"], "LEG");
        assert_eq!(body["first"], true);
        assert_eq!(body["last"], false);

        let response = send(&app.router, Method::GET, "/api/v1/departments?name=fin", None).await;
        let body = read_json(response).await;
        assert_eq!(body["totalElements"], 1);
    }

    #[tokio::test]
    async fn delete_is_blocked_while_employees_remain() {
        let app = TestApp::start().await;
        let id = app.create_department("ENG").await;
        let probe = app
            .peer
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/api/v1/employees")
                    .query_param("departmentId", id.to_string())
                    .query_param("page", "0")
                    .query_param("size", "1");
                then.status(200)
                    .json_body(json!({"content": [], "totalElements": 2}));
            })
            .await;

        let response = send(&app.router, Method::DELETE, &format!("/api/v1/departments/{id}"), None).await;
        assert_eq!(response.status(), StatusCode::CONFLICT);
        let body = read_json(response).await;
        assert_eq!(body["type"], "business-rule-violation");
        assert_eq!(
            body["detail"],
            "Cannot delete department. 2 employee(s) are still assigned to this department."
        );
        probe.assert_async().await;

        let response = send(&app.router, Method::GET, &format!("/api/v1/departments/{id}"), None).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn delete_proceeds_when_no_employees() {
        let app = TestApp::start().await;
        let id = app.create_department("ENG").await;
        app.peer
            .mock_async(|when, then| {
                when.method(GET).path("/api/v1/employees");
                then.status(200)
                    .json_body(json!({"content": [], "totalElements": 0}));
            })
            .await;

        let response = send(&app.router, Method::DELETE, &format!("/api/v1/departments/{id}"), None).await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = send(&app.router, Method::DELETE, &format!("/api/v1/departments/{id}"), None).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn delete_fails_open_when_employee_service_is_down() {
        let app = TestApp::start_with_unreachable_peers().await;
        let id = app.create_department("ENG").await;

        let response = send(&app.router, Method::DELETE, &format!("/api/v1/departments/{id}"), None).await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = send(&app.router, Method::GET, &format!("/api/v1/departments/{id}"), None).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn delete_fails_open_on_server_error() {
        let app = TestApp::start().await;
        let id = app.create_department("ENG").await;
        app.peer
            .mock_async(|when, then| {
                when.method(GET).path("/api/v1/employees");
                then.status(503);
            })
            .await;

        let response = send(&app.router, Method::DELETE, &format!("/api/v1/departments/{id}"), None).await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn employees_of_department_proxies_listing() {
        let app = TestApp::start().await;
        let id = app.create_department("ENG").await;
        app.peer
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/api/v1/employees")
                    .query_param("departmentId", id.to_string())
                    .query_param("page", "0")
                    .query_param("size", "20");
                then.status(200).json_body(json!({
                    "content": [{
                        "id": 4,
                        "firstName": "Ada",
                        "lastName": "Lovelace",
                        "email": "ada@example.com",
                        "departmentId": id
                    }],
                    "page": 0,
                    "size": 20,
                    "totalElements": 1,
                    "totalPages": 1,
                    "first": true,
                    "last": true
                }));
            })
            .await;

        let response = send(
            &app.router,
            Method::GET,
            &format!("/api/v1/departments/{id}/employees"),
            None,
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = read_json(response).await;
        assert_eq!(body["content"][0]["email"], "ada@example.com");

        let response = send(&app.router, Method::GET, "/api/v1/departments/999/employees", None).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn employees_of_department_reports_unavailable_peer() {
        let app = TestApp::start_with_unreachable_peers().await;
        let id = app.create_department("ENG").await;

        let response = send(
            &app.router,
            Method::GET,
            &format!("/api/v1/departments/{id}/employees"),
            None,
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        let body = read_json(response).await;
        assert_eq!(body["type"], "upstream-unavailable");
        assert_eq!(body["upstreamService"], "employee-service");
    }

    #[tokio::test]
    async fn delete_is_blocked_by_a_single_employee() {
        let app = TestApp::start().await;
        let id = app.create_department("ENG").await;
        app.peer
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/api/v1/employees")
                    .query_param("departmentId", id.to_string());
                then.status(200)
                    .json_body(json!({"content": [], "totalElements": 1}));
            })
            .await;

        let response = send(&app.router, Method::DELETE, &format!("/api/v1/departments/{id}"), None).await;
        assert_eq!(response.status(), StatusCode::CONFLICT);
        let body = read_json(response).await;
        assert_eq!(
            body["detail"],
            "Cannot delete department. 1 employee(s) are still assigned to this department."
        );

        let response = send(&app.router, Method::GET, &format!("/api/v1/departments/{id}"), None).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn employees_of_department_treats_peer_not_found_as_unavailable() {
        let app = TestApp::start().await;
        let id = app.create_department("ENG").await;
        app.peer
            .mock_async(|when, then| {
                when.method(GET).path("/api/v1/employees");
                then.status(404);
            })
            .await;

        let response = send(
            &app.router,
            Method::GET,
            &format!("/api/v1/departments/{id}/employees"),
            None,
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        let body = read_json(response).await;
        assert_eq!(body["type"], "upstream-unavailable");
        assert_eq!(body["upstreamService"], "employee-service");
    }
}
