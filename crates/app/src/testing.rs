//! Shared fixtures for handler tests: a router over a throwaway SQLite file
//! with its peers and the product catalogue pointed at mock servers.

use std::time::Duration;

use axum::{
    body::Body,
    http::{Method, Request},
    response::Response,
    Router,
};
use chrono::Utc;
use http_body_util::BodyExt;
use httpmock::MockServer;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;
use url::Url;

use orgsvc_core::types::DepartmentDraft;
use orgsvc_storage::Database;
use orgsvc_util::{AppConfig, Environment, ServiceKind};

use crate::events::EventHub;
use crate::router::{app_router, AppState};
use crate::telemetry;

const UNREACHABLE: &str = "http://127.0.0.1:9/";

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    /// Stands in for both peer services.
    pub peer: MockServer,
    /// Stands in for the FakeStore catalogue.
    pub store: MockServer,
    _dir: TempDir,
}

impl TestApp {
    pub async fn start() -> Self {
        Self::build(ServiceKind::All, true).await
    }

    pub async fn start_as(service: ServiceKind) -> Self {
        Self::build(service, true).await
    }

    pub async fn start_with_unreachable_peers() -> Self {
        Self::build(ServiceKind::All, false).await
    }

    async fn build(service: ServiceKind, reachable: bool) -> Self {
        let peer = MockServer::start_async().await;
        let store = MockServer::start_async().await;
        let (peer_url, store_url) = if reachable {
            (peer.url("/api/v1/"), store.url("/"))
        } else {
            (format!("{UNREACHABLE}api/v1/"), UNREACHABLE.to_string())
        };

        let dir = tempfile::tempdir().expect("tempdir");
        let database_url = format!("sqlite://{}", dir.path().join("test.db").display());
        let storage = Database::connect(&database_url).await.expect("connect");
        storage.run_migrations().await.expect("migrations");

        let config = AppConfig {
            bind_addr: "127.0.0.1:0".parse().expect("addr"),
            environment: Environment::Test,
            service,
            database_url,
            department_service_url: Url::parse(&peer_url).expect("peer url"),
            employee_service_url: Url::parse(&peer_url).expect("peer url"),
            fakestore_base_url: Url::parse(&store_url).expect("store url"),
            remote_timeout: Duration::from_millis(500),
            product_cache_ttl: Duration::from_secs(60),
        };
        let metrics = telemetry::init_metrics().expect("metrics init");
        let state = AppState::new(&config, metrics, EventHub::new(), storage).expect("state");

        Self {
            router: app_router(state.clone()),
            state,
            peer,
            store,
            _dir: dir,
        }
    }

    pub async fn create_department(&self, code: &str) -> i64 {
        let draft = DepartmentDraft {
            name: format!("Department {code}"),
            code: code.to_string(),
            description: None,
            manager_email: None,
        };
        self.state
            .storage()
            .departments()
            .insert(&draft, Utc::now())
            .await
            .expect("seed department")
            .id
    }
}

pub async fn send(router: &Router, method: Method, uri: &str, body: Option<Value>) -> Response {
    send_with_headers(router, method, uri, &[], body).await
}

pub async fn send_with_headers(
    router: &Router,
    method: Method,
    uri: &str,
    headers: &[(&str, &str)],
    body: Option<Value>,
) -> Response {
    let mut builder = Request::builder().method(method).uri(uri);
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    let request = match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(json.to_string())),
        None => builder.body(Body::empty()),
    }
    .expect("request");

    router
        .clone()
        .oneshot(request)
        .await
        .expect("handler should respond")
}

pub async fn read_json(response: Response) -> Value {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("body")
        .to_bytes();
    serde_json::from_slice(&bytes).expect("json body")
}
