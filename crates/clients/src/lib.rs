pub mod department;
pub mod employee;
pub mod fakestore;

use std::time::Duration;

use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use thiserror::Error;

use orgsvc_core::RemoteError;

pub use department::DepartmentClient;
pub use employee::EmployeeClient;
pub use fakestore::FakeStoreClient;

/// Builds the shared HTTP client. `timeout` bounds every request end to end.
pub fn build_http_client(timeout: Duration) -> Result<Client, ClientError> {
    Ok(Client::builder()
        .timeout(timeout)
        .connect_timeout(timeout)
        .user_agent(concat!("orgsvc/", env!("CARGO_PKG_VERSION")))
        .build()?)
}

/// Errors produced by the peer and catalogue clients.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("failed to build url: {0}")]
    Url(#[from] url::ParseError),
    #[error("base url cannot carry path segments: {0}")]
    InvalidBase(String),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected status {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("failed to decode response body: {0}")]
    Decode(String),
}

impl ClientError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Status { status, .. } if *status == StatusCode::NOT_FOUND)
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Http(err) if err.is_timeout())
    }
}

impl From<ClientError> for RemoteError {
    fn from(err: ClientError) -> Self {
        match err {
            err if err.is_not_found() => RemoteError::NotFound,
            ClientError::Status { status, .. } => {
                RemoteError::unavailable(Some(status.as_u16()), format!("unexpected status {status}"))
            }
            ClientError::Http(err) => {
                RemoteError::unavailable(err.status().map(|status| status.as_u16()), err.to_string())
            }
            other => RemoteError::unavailable(None, other.to_string()),
        }
    }
}

async fn parse_json<T>(response: Response) -> Result<T, ClientError>
where
    T: DeserializeOwned,
{
    let response = ensure_success(response).await?;
    Ok(response.json().await?)
}

async fn ensure_success(response: Response) -> Result<Response, ClientError> {
    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("<unavailable>"));
        return Err(ClientError::Status { status, body });
    }
    Ok(response)
}
