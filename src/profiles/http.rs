//! Shared HTTPS client for the Google REST endpoints

use crate::profiles::error::ProfileError;
use http_body_util::BodyExt;
use hyper::header::{AUTHORIZATION, CONTENT_TYPE};
use hyper::{Method, Request, StatusCode};
use hyper_rustls::HttpsConnector;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use serde_json::Value;

pub type HttpsClient = Client<HttpsConnector<HttpConnector>, String>;

pub fn build_client() -> Result<HttpsClient, ProfileError> {
    let _ = rustls::crypto::ring::default_provider().install_default();

    let connector = hyper_rustls::HttpsConnectorBuilder::new()
        .with_native_roots()
        .map_err(|e| ProfileError::Config(format!("Failed to load native TLS roots: {}", e)))?
        .https_or_http()
        .enable_http1()
        .enable_http2()
        .build();

    Ok(Client::builder(hyper_util::rt::TokioExecutor::new()).build(connector))
}

#[derive(Debug)]
pub struct JsonResponse {
    pub status: StatusCode,
    pub body: Value,
}

impl JsonResponse {
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// `(status, message)` from a Google API error body, e.g.
    /// `{"error": {"code": 404, "message": "...", "status": "NOT_FOUND"}}`
    pub fn google_error(&self) -> (String, String) {
        let error = &self.body["error"];
        let status = error["status"]
            .as_str()
            .map(str::to_string)
            .unwrap_or_else(|| self.status.as_str().to_string());
        let message = match &error["message"] {
            Value::String(message) => message.clone(),
            _ => self.body.to_string(),
        };
        (status, message)
    }
}

pub async fn send_json(
    client: &HttpsClient,
    method: Method,
    url: &str,
    bearer: Option<&str>,
    body: Option<&Value>,
) -> Result<JsonResponse, ProfileError> {
    let mut builder = Request::builder()
        .method(method)
        .uri(url)
        .header(CONTENT_TYPE, "application/json");
    if let Some(token) = bearer {
        builder = builder.header(AUTHORIZATION, format!("Bearer {}", token));
    }

    let payload = match body {
        Some(body) => serde_json::to_string(body)?,
        None => String::new(),
    };
    let request = builder
        .body(payload)
        .map_err(|e| ProfileError::Backend(format!("Invalid request to {}: {}", url, e)))?;

    let response = client
        .request(request)
        .await
        .map_err(|e| ProfileError::Backend(format!("Request to {} failed: {}", url, e)))?;

    let status = response.status();
    let bytes = response
        .into_body()
        .collect()
        .await
        .map_err(|e| ProfileError::Backend(format!("Failed to read response body: {}", e)))?
        .to_bytes();

    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
    };

    Ok(JsonResponse { status, body })
}
