use reqwest::Client;
use url::Url;

use orgsvc_core::types::Product;

use crate::{ensure_success, parse_json, ClientError};

/// Client for the public FakeStore product catalogue.
#[derive(Clone)]
pub struct FakeStoreClient {
    http: Client,
    base_url: Url,
}

impl FakeStoreClient {
    pub fn new(base_url: Url, http: Client) -> Self {
        Self { http, base_url }
    }

    pub async fn products(&self) -> Result<Vec<Product>, ClientError> {
        let url = self.base_url.join("products")?;
        let response = self.http.get(url).send().await?;
        parse_json(response).await
    }

    /// Fetches one product. The catalogue answers unknown ids with an empty
    /// 200 body, which is reported as `None`.
    pub async fn product(&self, id: i64) -> Result<Option<Product>, ClientError> {
        let url = self.base_url.join(&format!("products/{id}"))?;
        let response = ensure_success(self.http.get(url).send().await?).await?;
        let body = response.text().await?;
        let body = body.trim();
        if body.is_empty() || body == "null" {
            return Ok(None);
        }
        serde_json::from_str(body)
            .map(Some)
            .map_err(|err| ClientError::Decode(err.to_string()))
    }

    pub async fn categories(&self) -> Result<Vec<String>, ClientError> {
        let url = self.base_url.join("products/categories")?;
        let response = self.http.get(url).send().await?;
        parse_json(response).await
    }

    /// Category names contain spaces and quotes, so the name is pushed as an
    /// encoded path segment.
    pub async fn products_in_category(&self, category: &str) -> Result<Vec<Product>, ClientError> {
        let mut url = self.base_url.join("products/category")?;
        url.path_segments_mut()
            .map_err(|_| ClientError::InvalidBase(self.base_url.to_string()))?
            .push(category);
        let response = self.http.get(url).send().await?;
        parse_json(response).await
    }
}
