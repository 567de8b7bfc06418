use reqwest::Client;
use serde::Deserialize;
use url::Url;

use orgsvc_core::types::{EmployeeSummary, Page};

use crate::{parse_json, ClientError};

/// Client used by the department service to list a department's employees.
#[derive(Clone)]
pub struct EmployeeClient {
    http: Client,
    base_url: Url,
}

impl EmployeeClient {
    pub fn new(base_url: Url, http: Client) -> Self {
        Self { http, base_url }
    }

    /// `GET employees?departmentId=&page=&size=`.
    pub async fn list_employees(
        &self,
        department_id: i64,
        page: u32,
        size: u32,
    ) -> Result<Page<EmployeeSummary>, ClientError> {
        let url = self.listing_url(department_id, page, size)?;
        let response = self.http.get(url).send().await?;
        parse_json(response).await
    }

    /// Number of employees assigned to a department. Reads only
    /// `totalElements` from a one-row page.
    pub async fn count_employees(&self, department_id: i64) -> Result<u64, ClientError> {
        let url = self.listing_url(department_id, 0, 1)?;
        let response = self.http.get(url).send().await?;
        let count: EmployeeCount = parse_json(response).await?;
        Ok(count.total_elements)
    }

    fn listing_url(&self, department_id: i64, page: u32, size: u32) -> Result<Url, ClientError> {
        let mut url = self.base_url.join("employees")?;
        url.query_pairs_mut()
            .append_pair("departmentId", &department_id.to_string())
            .append_pair("page", &page.to_string())
            .append_pair("size", &size.to_string());
        Ok(url)
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct EmployeeCount {
    total_elements: u64,
}
