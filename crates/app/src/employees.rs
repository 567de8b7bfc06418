use std::{
    collections::{BTreeSet, HashMap},
    sync::Arc,
};

use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection},
        Path, Query, State,
    },
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{sse::Sse, IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use metrics::counter;
use serde::Deserialize;
use tokio::task::JoinSet;
use tracing::{info, warn, Instrument};

use orgsvc_clients::DepartmentClient;
use orgsvc_core::referential::{enrichment, require_reference};
use orgsvc_core::types::{
    DepartmentSummary, Employee, EmployeeFilter, EmployeeRequest, EmployeeStats, EmployeeView,
    Page, PageRequest, EMPLOYEE_SORT_FIELDS,
};
use orgsvc_core::{Guarded, IdempotencyGuard, RemoteError, RemoteTarget, ServiceError};
use orgsvc_storage::Database;

use crate::events::{
    event_keep_alive, event_stream, parse_kind_list, EmployeeEvent, EventFilter, EventHub,
};
use crate::problem::ProblemResponse;
use crate::router::{AppState, Clock};

pub const SERVICE_NAME: &str = "employee-service";

pub const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";
pub const IDEMPOTENT_REPLAYED_HEADER: &str = "idempotent-replayed";

/// Employee CRUD. Department references are verified against the
/// department service before any write and used to decorate reads.
#[derive(Clone)]
pub struct EmployeeService {
    storage: Database,
    departments: DepartmentClient,
    idempotency: Arc<IdempotencyGuard<EmployeeView>>,
    events: EventHub,
    clock: Clock,
}

impl EmployeeService {
    pub fn new(storage: Database, departments: DepartmentClient, events: EventHub, clock: Clock) -> Self {
        Self {
            storage,
            departments,
            idempotency: Arc::new(IdempotencyGuard::new()),
            events,
            clock,
        }
    }

    fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    /// Fail-closed lookup used before writes. Any answer other than a found
    /// department aborts the caller.
    async fn require_department(&self, id: i64, site: &'static str) -> Result<DepartmentSummary, ServiceError> {
        let result = self
            .departments
            .get_department(id)
            .await
            .map_err(RemoteError::from);
        let outcome = require_reference(RemoteTarget::new("department-service", "Department", id), result);
        let label = match &outcome {
            Ok(_) => "found",
            Err(ServiceError::ReferencedEntityNotFound { .. }) => "missing",
            Err(_) => "unavailable",
        };
        counter!("remote_checks_total", "site" => site, "outcome" => label).increment(1);
        outcome
    }

    async fn enrich(&self, employee: Employee) -> EmployeeView {
        let department = match employee.department_id {
            Some(id) => department_for(&self.departments, id).await,
            None => None,
        };
        EmployeeView::assemble(employee, department)
    }

    /// Decorates a whole page with one lookup per distinct department. The
    /// lookups run concurrently.
    async fn enrich_page(&self, page: Page<Employee>) -> Page<EmployeeView> {
        let ids: BTreeSet<i64> = page
            .content
            .iter()
            .filter_map(|employee| employee.department_id)
            .collect();
        let mut lookups = JoinSet::new();
        for id in ids {
            let client = self.departments.clone();
            lookups.spawn(
                async move { (id, department_for(&client, id).await) }.in_current_span(),
            );
        }

        let mut departments = HashMap::with_capacity(lookups.len());
        while let Some(joined) = lookups.join_next().await {
            match joined {
                Ok((id, department)) => {
                    departments.insert(id, department);
                }
                Err(err) => warn!(stage = "enrichment", error = %err, "department lookup task failed"),
            }
        }

        page.map(|employee| {
            let department = employee
                .department_id
                .and_then(|id| departments.get(&id).cloned().flatten());
            EmployeeView::assemble(employee, department)
        })
    }

    pub async fn list(
        &self,
        filter: &EmployeeFilter,
        request: PageRequest,
    ) -> Result<Page<EmployeeView>, ServiceError> {
        let page = self.storage.employees().list(filter, request).await?;
        Ok(self.enrich_page(page).await)
    }

    pub async fn search(
        &self,
        term: Option<&str>,
        request: PageRequest,
    ) -> Result<Page<EmployeeView>, ServiceError> {
        let term = term.map(str::trim).filter(|term| !term.is_empty());
        let Some(term) = term else {
            return Err(ServiceError::invalid("q", "must not be blank"));
        };
        let page = self.storage.employees().search(term, request).await?;
        Ok(self.enrich_page(page).await)
    }

    pub async fn get(&self, id: i64) -> Result<EmployeeView, ServiceError> {
        let employee = self
            .storage
            .employees()
            .find_by_id(id)
            .await?
            .ok_or_else(|| ServiceError::not_found("Employee", id))?;
        Ok(self.enrich(employee).await)
    }

    pub async fn stats(&self) -> Result<EmployeeStats, ServiceError> {
        Ok(self.storage.employees().stats().await?)
    }

    /// Creates an employee at most once per idempotency key. A replayed
    /// result is the representation recorded by the first successful create.
    pub async fn create(
        &self,
        key: Option<&str>,
        request: EmployeeRequest,
    ) -> Result<Guarded<EmployeeView>, ServiceError> {
        let guarded = self
            .idempotency
            .guarded_create(key, request, |request| self.insert_new(request))
            .await?;
        if guarded.replayed {
            counter!("idempotency_replays_total").increment(1);
            info!(stage = "idempotency", employee_id = guarded.value.id, "replayed employee create");
        }
        Ok(guarded)
    }

    async fn insert_new(&self, request: EmployeeRequest) -> Result<EmployeeView, ServiceError> {
        let draft = request.into_draft()?;
        let repo = self.storage.employees();
        if repo.exists_by_email(&draft.email).await? {
            return Err(ServiceError::duplicate("Employee", "email", draft.email));
        }
        let department = match draft.department_id {
            Some(id) => Some(self.require_department(id, "employee_create").await?),
            None => None,
        };

        let employee = repo.insert(&draft, self.now()).await?;
        let view = EmployeeView::assemble(employee, department);
        info!(
            stage = "employees",
            employee_id = view.id,
            department_id = ?view.department_id,
            "employee created"
        );
        self.events.publish(EmployeeEvent::created(&view, self.now()));
        Ok(view)
    }

    pub async fn update(&self, id: i64, request: EmployeeRequest) -> Result<EmployeeView, ServiceError> {
        let draft = request.into_draft()?;
        let repo = self.storage.employees();
        if !repo.exists_by_id(id).await? {
            return Err(ServiceError::not_found("Employee", id));
        }
        if repo.exists_by_email_excluding(&draft.email, id).await? {
            return Err(ServiceError::duplicate("Employee", "email", draft.email));
        }
        let department = match draft.department_id {
            Some(department_id) => Some(self.require_department(department_id, "employee_update").await?),
            None => None,
        };

        let employee = repo
            .update(id, &draft, self.now())
            .await?
            .ok_or_else(|| ServiceError::not_found("Employee", id))?;
        let view = EmployeeView::assemble(employee, department);
        self.events.publish(EmployeeEvent::updated(&view, self.now()));
        Ok(view)
    }

    pub async fn patch(&self, id: i64, request: EmployeeRequest) -> Result<EmployeeView, ServiceError> {
        let patch = request.into_patch()?;
        let repo = self.storage.employees();
        let current = repo
            .find_by_id(id)
            .await?
            .ok_or_else(|| ServiceError::not_found("Employee", id))?;
        if let Some(email) = &patch.email {
            if repo.exists_by_email_excluding(email, id).await? {
                return Err(ServiceError::duplicate("Employee", "email", email.clone()));
            }
        }
        let checked = match patch.department_id {
            Some(department_id) => Some(self.require_department(department_id, "employee_patch").await?),
            None => None,
        };

        let draft = patch.apply_to(&current);
        let employee = repo
            .update(id, &draft, self.now())
            .await?
            .ok_or_else(|| ServiceError::not_found("Employee", id))?;
        let view = match checked {
            Some(department) => EmployeeView::assemble(employee, Some(department)),
            None => self.enrich(employee).await,
        };
        self.events.publish(EmployeeEvent::updated(&view, self.now()));
        Ok(view)
    }

    pub async fn delete(&self, id: i64) -> Result<(), ServiceError> {
        if !self.storage.employees().delete(id).await? {
            return Err(ServiceError::not_found("Employee", id));
        }
        info!(stage = "employees", employee_id = id, "employee deleted");
        self.events.publish(EmployeeEvent::deleted(id, self.now()));
        Ok(())
    }
}

/// Silent-omit lookup used to decorate reads.
async fn department_for(client: &DepartmentClient, id: i64) -> Option<DepartmentSummary> {
    let result = client.get_department(id).await.map_err(RemoteError::from);
    let department = enrichment(RemoteTarget::new("department-service", "Department", id), result);
    counter!(
        "remote_checks_total",
        "site" => "employee_enrichment",
        "outcome" => if department.is_some() { "found" } else { "omitted" }
    )
    .increment(1);
    department
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_employees).post(create_employee))
        .route("/search", get(search_employees))
        .route("/stats", get(employee_stats))
        .route(
            "/:id",
            get(get_employee)
                .put(update_employee)
                .patch(patch_employee)
                .delete(delete_employee),
        )
}

fn problem(err: ServiceError) -> ProblemResponse {
    ProblemResponse::from_service_error(SERVICE_NAME, err)
}

fn rejected(rejection: impl std::fmt::Display) -> ProblemResponse {
    ProblemResponse::rejected(SERVICE_NAME, rejection)
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListQuery {
    page: Option<u32>,
    size: Option<u32>,
    sort: Option<String>,
    email: Option<String>,
    last_name: Option<String>,
    department_id: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
struct SearchQuery {
    q: Option<String>,
    page: Option<u32>,
    size: Option<u32>,
    sort: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct EventsQuery {
    pub kinds: Option<String>,
}

async fn list_employees(
    State(state): State<AppState>,
    query: Result<Query<ListQuery>, QueryRejection>,
) -> Result<Json<Page<EmployeeView>>, ProblemResponse> {
    let Query(query) = query.map_err(rejected)?;
    let request = PageRequest::new(query.page, query.size, query.sort.as_deref(), EMPLOYEE_SORT_FIELDS)
        .map_err(problem)?;
    let filter = EmployeeFilter::new(query.email, query.last_name, query.department_id);
    let page = state.employees().list(&filter, request).await.map_err(problem)?;
    Ok(Json(page))
}

async fn search_employees(
    State(state): State<AppState>,
    query: Result<Query<SearchQuery>, QueryRejection>,
) -> Result<Json<Page<EmployeeView>>, ProblemResponse> {
    let Query(query) = query.map_err(rejected)?;
    let request = PageRequest::new(query.page, query.size, query.sort.as_deref(), EMPLOYEE_SORT_FIELDS)
        .map_err(problem)?;
    let page = state
        .employees()
        .search(query.q.as_deref(), request)
        .await
        .map_err(problem)?;
    Ok(Json(page))
}

async fn employee_stats(State(state): State<AppState>) -> Result<Json<EmployeeStats>, ProblemResponse> {
    let stats = state.employees().stats().await.map_err(problem)?;
    Ok(Json(stats))
}

async fn get_employee(
    State(state): State<AppState>,
    id: Result<Path<i64>, PathRejection>,
) -> Result<Json<EmployeeView>, ProblemResponse> {
    let Path(id) = id.map_err(rejected)?;
    let employee = state.employees().get(id).await.map_err(problem)?;
    Ok(Json(employee))
}

async fn create_employee(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<EmployeeRequest>, JsonRejection>,
) -> Result<Response, ProblemResponse> {
    let key = headers
        .get(IDEMPOTENCY_KEY_HEADER)
        .map(HeaderValue::to_str)
        .transpose()
        .map_err(|_| rejected("Idempotency-Key header must be visible ASCII"))?;
    let Json(request) = payload.map_err(rejected)?;

    let guarded = state.employees().create(key, request).await.map_err(problem)?;
    let mut response = (StatusCode::CREATED, Json(guarded.value)).into_response();
    if guarded.replayed {
        response.headers_mut().insert(
            HeaderName::from_static(IDEMPOTENT_REPLAYED_HEADER),
            HeaderValue::from_static("true"),
        );
    }
    Ok(response)
}

async fn update_employee(
    State(state): State<AppState>,
    id: Result<Path<i64>, PathRejection>,
    payload: Result<Json<EmployeeRequest>, JsonRejection>,
) -> Result<Json<EmployeeView>, ProblemResponse> {
    let Path(id) = id.map_err(rejected)?;
    let Json(request) = payload.map_err(rejected)?;
    let employee = state.employees().update(id, request).await.map_err(problem)?;
    Ok(Json(employee))
}

async fn patch_employee(
    State(state): State<AppState>,
    id: Result<Path<i64>, PathRejection>,
    payload: Result<Json<EmployeeRequest>, JsonRejection>,
) -> Result<Json<EmployeeView>, ProblemResponse> {
    let Path(id) = id.map_err(rejected)?;
    let Json(request) = payload.map_err(rejected)?;
    let employee = state.employees().patch(id, request).await.map_err(problem)?;
    Ok(Json(employee))
}

async fn delete_employee(
    State(state): State<AppState>,
    id: Result<Path<i64>, PathRejection>,
) -> Result<StatusCode, ProblemResponse> {
    let Path(id) = id.map_err(rejected)?;
    state.employees().delete(id).await.map_err(problem)?;
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /_debug/events?kinds=created,deleted`
pub async fn debug_events(
    State(state): State<AppState>,
    query: Result<Query<EventsQuery>, QueryRejection>,
) -> Result<
    Sse<impl tokio_stream::Stream<Item = Result<axum::response::sse::Event, serde_json::Error>>>,
    ProblemResponse,
> {
    let Query(query) = query.map_err(rejected)?;
    let kinds = parse_kind_list(query.kinds).map_err(rejected)?;
    let stream = event_stream(state.events().clone(), EventFilter::from_kinds(kinds));
    Ok(Sse::new(stream).keep_alive(event_keep_alive()))
}
