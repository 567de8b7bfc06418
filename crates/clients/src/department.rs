use reqwest::Client;
use url::Url;

use orgsvc_core::types::DepartmentSummary;

use crate::{parse_json, ClientError};

/// Client used by the employee service to reach the department service.
#[derive(Clone)]
pub struct DepartmentClient {
    http: Client,
    base_url: Url,
}

impl DepartmentClient {
    /// `base_url` points at the API root, e.g. `http://departments:8081/api/v1/`.
    pub fn new(base_url: Url, http: Client) -> Self {
        Self { http, base_url }
    }

    /// `GET departments/{id}`.
    pub async fn get_department(&self, id: i64) -> Result<DepartmentSummary, ClientError> {
        let url = self.base_url.join(&format!("departments/{id}"))?;
        let response = self.http.get(url).send().await?;
        parse_json(response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use orgsvc_core::RemoteError;
    use serde_json::json;
    use std::time::Duration;

    fn client(server: &MockServer) -> DepartmentClient {
        let base = Url::parse(&server.url("/api/v1/")).expect("url");
        DepartmentClient::new(base, Client::builder().build().expect("client"))
    }

    #[tokio::test]
    async fn get_department_parses_summary() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET).path("/api/v1/departments/7");
                then.status(200).json_body(json!({
                    "id": 7,
                    "name": "Engineering",
                    "code": "ENG",
                    "description": null,
                    "createdAt": "2024-01-01T00:00:00Z"
                }));
            })
            .await;

        let department = client(&server).get_department(7).await.expect("department");
        mock.assert_async().await;
        assert_eq!(department.code, "ENG");
    }

    #[tokio::test]
    async fn missing_department_is_not_found() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/api/v1/departments/8");
                then.status(404).json_body(json!({"title": "Not Found"}));
            })
            .await;

        let err = client(&server).get_department(8).await.expect_err("404");
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn slow_peer_times_out() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/api/v1/departments/9");
                then.status(200)
                    .delay(Duration::from_millis(500))
                    .json_body(json!({"id": 9, "name": "Slow", "code": "SLO"}));
            })
            .await;

        let base = Url::parse(&server.url("/api/v1/")).expect("url");
        let http = crate::build_http_client(Duration::from_millis(100)).expect("client");
        let err = DepartmentClient::new(base, http)
            .get_department(9)
            .await
            .expect_err("timeout");
        assert!(err.is_timeout());
        assert!(matches!(
            RemoteError::from(err),
            RemoteError::Unavailable { status: None, .. }
        ));
    }
}
