use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{header, HeaderName, HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use chrono::{DateTime, Utc};
use metrics_exporter_prometheus::PrometheusHandle;
use tracing::{info_span, warn, Instrument};
use uuid::Uuid;

use orgsvc_clients::{build_http_client, ClientError, DepartmentClient, EmployeeClient, FakeStoreClient};
use orgsvc_storage::Database;
use orgsvc_util::{AppConfig, ServiceKind};

use crate::departments::{self, DepartmentService};
use crate::employees::{self, EmployeeService};
use crate::events::EventHub;
use crate::problem::ProblemResponse;
use crate::products::{self, ProductService};
use crate::telemetry;

pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

#[derive(Clone)]
pub struct AppState {
    metrics: PrometheusHandle,
    service: ServiceKind,
    events: EventHub,
    storage: Database,
    departments: DepartmentService,
    employees: EmployeeService,
    products: Arc<ProductService>,
}

impl AppState {
    pub fn new(
        config: &AppConfig,
        metrics: PrometheusHandle,
        events: EventHub,
        storage: Database,
    ) -> Result<Self, ClientError> {
        let clock: Clock = Arc::new(Utc::now);
        let http = build_http_client(config.remote_timeout)?;

        let departments = DepartmentService::new(
            storage.clone(),
            EmployeeClient::new(config.employee_service_url.clone(), http.clone()),
            clock.clone(),
        );
        let employees = EmployeeService::new(
            storage.clone(),
            DepartmentClient::new(config.department_service_url.clone(), http.clone()),
            events.clone(),
            clock.clone(),
        );
        let products = ProductService::new(
            FakeStoreClient::new(config.fakestore_base_url.clone(), http),
            config.product_cache_ttl,
            clock,
        );

        Ok(Self {
            metrics,
            service: config.service,
            events,
            storage,
            departments,
            employees,
            products: Arc::new(products),
        })
    }

    pub fn metrics(&self) -> &PrometheusHandle {
        &self.metrics
    }

    pub fn service(&self) -> ServiceKind {
        self.service
    }

    pub fn events(&self) -> &EventHub {
        &self.events
    }

    pub fn storage(&self) -> &Database {
        &self.storage
    }

    pub fn departments(&self) -> &DepartmentService {
        &self.departments
    }

    pub fn employees(&self) -> &EmployeeService {
        &self.employees
    }

    pub fn products(&self) -> &ProductService {
        &self.products
    }
}

/// Mounts the operational endpoints plus the routers of every service the
/// process is configured to host.
pub fn app_router(state: AppState) -> Router {
    let service = state.service();
    let mut router = Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics));

    if service.serves_departments() {
        router = router.nest("/api/v1/departments", departments::routes());
    }
    if service.serves_employees() {
        router = router
            .nest("/api/v1/employees", employees::routes())
            .route("/_debug/events", get(employees::debug_events));
    }
    if service.serves_products() {
        router = router.nest("/api/v1/products", products::routes());
    }

    router
        .layer(middleware::from_fn(request_id))
        .with_state(state)
}

/// Reuses the caller's `x-request-id` or mints one, runs the request inside a
/// span carrying it and echoes it on the response.
async fn request_id(request: Request, next: Next) -> Response {
    let id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty() && value.len() <= 128)
        .map(str::to_owned)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let span = info_span!(
        "request",
        request_id = %id,
        method = %request.method(),
        path = %request.uri().path(),
    );
    let mut response = next.run(request).instrument(span).await;
    if let Ok(value) = HeaderValue::from_str(&id) {
        response
            .headers_mut()
            .insert(HeaderName::from_static(REQUEST_ID_HEADER), value);
    }
    response
}

async fn healthz(State(state): State<AppState>) -> Result<StatusCode, ProblemResponse> {
    state.storage().ping().await.map_err(|err| {
        warn!(stage = "health", error = %err, "database ping failed");
        ProblemResponse::new(
            state.service().as_str(),
            StatusCode::SERVICE_UNAVAILABLE,
            "service-unavailable",
            "database is not reachable",
        )
    })?;
    Ok(StatusCode::OK)
}

async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    let body = telemetry::render_metrics(state.metrics());
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    )
}
