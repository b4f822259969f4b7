//! HTTP client for the directive engine API.
//!
//! Configuration is via environment variables:
//! - `DIRECTIVE_ENGINE_URL` - Base URL (default: `http://localhost:17020/api/v1`)
//! - `DIRECTIVE_ENGINE_API_KEY` - API key for authentication (optional for local)

use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use thiserror::Error;
use uuid::Uuid;

use crate::models::*;

/// Default URL for local development.
pub const DEFAULT_URL: &str = "http://localhost:17020/api/v1";

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Not found: {}", .0.message)]
    NotFound(ErrorResponse),

    #[error("Rejected ({status}): {}", .body.message)]
    Rejected {
        status: StatusCode,
        body: ErrorResponse,
    },

    #[error("Unauthorized: API key required or invalid")]
    Unauthorized,

    #[error("Server error: {0}")]
    Server(String),
}

#[derive(Debug, Clone)]
pub struct EngineClient {
    base_url: String,
    api_key: Option<String>,
    client: Client,
}

impl EngineClient {
    pub fn from_env() -> Self {
        let base_url =
            std::env::var("DIRECTIVE_ENGINE_URL").unwrap_or_else(|_| DEFAULT_URL.to_string());
        let api_key = std::env::var("DIRECTIVE_ENGINE_API_KEY")
            .ok()
            .filter(|k| !k.is_empty());
        Self::new(base_url, api_key)
    }

    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            client: Client::new(),
        }
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        let mut req = self.client.request(method, &url);
        if let Some(ref key) = self.api_key {
            req = req.bearer_auth(key);
        }
        req
    }

    async fn handle_response<T: DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T, ClientError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response.json().await?);
        }

        let text = response.text().await.unwrap_or_default();
        let body = serde_json::from_str::<ErrorResponse>(&text)
            .unwrap_or_else(|_| ErrorResponse::new("unknown", text.clone()));

        match status {
            StatusCode::NOT_FOUND => Err(ClientError::NotFound(body)),
            StatusCode::UNAUTHORIZED => Err(ClientError::Unauthorized),
            s if s.is_client_error() => Err(ClientError::Rejected { status: s, body }),
            _ => Err(ClientError::Server(format!("{}: {}", status, body.message))),
        }
    }

    pub async fn health(&self) -> Result<serde_json::Value, ClientError> {
        let response = self.request(Method::GET, "/health").send().await?;
        self.handle_response(response).await
    }

    pub async fn get_directive(&self, id: Uuid) -> Result<Directive, ClientError> {
        let response = self
            .request(Method::GET, &format!("/directives/{}", id))
            .send()
            .await?;
        self.handle_response(response).await
    }

    pub async fn progress(&self, id: Uuid) -> Result<ProgressReport, ClientError> {
        let response = self
            .request(Method::GET, &format!("/progress/{}", id))
            .send()
            .await?;
        self.handle_response(response).await
    }

    pub async fn breakdown(&self, id: Uuid) -> Result<PhaseBreakdown, ClientError> {
        let response = self
            .request(Method::GET, &format!("/breakdown/{}", id))
            .send()
            .await?;
        self.handle_response(response).await
    }

    pub async fn transition(
        &self,
        id: Uuid,
        target_status: DirectiveStatus,
    ) -> Result<Directive, ClientError> {
        let response = self
            .request(Method::POST, &format!("/transition/{}", id))
            .json(&TransitionInput { target_status })
            .send()
            .await?;
        self.handle_response(response).await
    }

    pub async fn complete(&self, id: Uuid) -> Result<Directive, ClientError> {
        let response = self
            .request(Method::POST, &format!("/complete/{}", id))
            .send()
            .await?;
        self.handle_response(response).await
    }

    pub async fn children(&self, id: Uuid) -> Result<Vec<Directive>, ClientError> {
        let response = self
            .request(Method::GET, &format!("/directives/{}/children", id))
            .send()
            .await?;
        self.handle_response(response).await
    }
}
