//! HTTP client for the cloud management API
//!
//! The client only moves JSON documents. Interpreting them is the job of
//! [`crate::adapter::RestPlatformAdapter`].

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

pub const TOKEN_HEADER: &str = "x-cloud-access-token";

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP client could not be created: {0}")]
    Client(String),

    #[error("API returned error: {status} - {message}")]
    Status { status: u16, message: String },

    #[error("Response parsing failed: {0}")]
    ParseError(String),
}

impl RemoteError {
    pub fn status(&self) -> Option<u16> {
        match self {
            RemoteError::Status { status, .. } => Some(*status),
            RemoteError::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }

    pub fn is_unauthorized(&self) -> bool {
        self.status() == Some(401)
    }
}

#[derive(Debug, Clone)]
pub struct RemoteRequest {
    pub method: Method,
    pub path: String,
    pub query_params: BTreeMap<String, String>,
    pub headers: HashMap<String, String>,
    pub body: Option<Value>,
}

impl RemoteRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query_params: BTreeMap::new(),
            headers: HashMap::new(),
            body: None,
        }
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.query_params.insert(key.into(), value.to_string());
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Path plus the encoded query string, used for logs and mock lookups.
    pub fn target(&self) -> String {
        if self.query_params.is_empty() {
            return self.path.clone();
        }
        let query: Vec<String> = self
            .query_params
            .iter()
            .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
            .collect();
        format!("{}?{}", self.path, query.join("&"))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RemoteResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Value,
}

impl RemoteResponse {
    pub fn ok(body: Value) -> Self {
        Self {
            status: 200,
            headers: HashMap::new(),
            body,
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Decode the body into a typed document.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, RemoteError> {
        serde_json::from_value(self.body.clone())
            .map_err(|e| RemoteError::ParseError(format!("JSON decode error: {}", e)))
    }
}

/// Authenticated request/response exchange with the management API.
///
/// Any status outside 2xx comes back as [`RemoteError::Status`].
#[async_trait]
pub trait RemoteClient: Send + Sync {
    async fn call(&self, request: &RemoteRequest) -> Result<RemoteResponse, RemoteError>;

    /// Token attached to every following request; `None` drops it.
    fn set_auth_token(&self, token: Option<String>);

    async fn get(&self, path: &str) -> Result<RemoteResponse, RemoteError> {
        self.call(&RemoteRequest::new(Method::GET, path)).await
    }

    async fn post(&self, path: &str, body: Value) -> Result<RemoteResponse, RemoteError> {
        self.call(&RemoteRequest::new(Method::POST, path).with_body(body))
            .await
    }

    async fn put(&self, path: &str, body: Value) -> Result<RemoteResponse, RemoteError> {
        self.call(&RemoteRequest::new(Method::PUT, path).with_body(body))
            .await
    }

    async fn delete(&self, path: &str) -> Result<RemoteResponse, RemoteError> {
        self.call(&RemoteRequest::new(Method::DELETE, path)).await
    }
}

/// reqwest-based client
pub struct HttpRemoteClient {
    client: Client,
    base_url: String,
    auth_token: RwLock<Option<String>>,
}

impl HttpRemoteClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, RemoteError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RemoteError::Client(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            auth_token: RwLock::new(None),
        })
    }

    fn build_url(&self, request: &RemoteRequest) -> String {
        format!("{}{}", self.base_url, request.target())
    }
}

#[async_trait]
impl RemoteClient for HttpRemoteClient {
    async fn call(&self, request: &RemoteRequest) -> Result<RemoteResponse, RemoteError> {
        log::debug!("Calling API: {} {}", request.method, request.target());

        let mut builder = self
            .client
            .request(request.method.clone(), self.build_url(request))
            .header("Accept", "application/json");
        let token = self
            .auth_token
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(token) = token {
            builder = builder.header("Authorization", format!("Bearer {}", token));
        }
        for (key, value) in &request.headers {
            builder = builder.header(key, value);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let mut headers = HashMap::new();
        for (key, value) in response.headers() {
            if let Ok(value) = value.to_str() {
                headers.insert(key.to_string(), value.to_string());
            }
        }

        let text = response.text().await?;
        let body: Value = if text.is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text)
                .map_err(|e| RemoteError::ParseError(format!("JSON parse error: {}", e)))?
        };

        if !(200..300).contains(&status) {
            let message = body
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("Unknown error")
                .to_string();
            return Err(RemoteError::Status { status, message });
        }

        log::debug!(
            "API response: status={}, body_size={}",
            status,
            text.len()
        );
        Ok(RemoteResponse {
            status,
            headers,
            body,
        })
    }

    fn set_auth_token(&self, token: Option<String>) {
        *self
            .auth_token
            .write()
            .unwrap_or_else(PoisonError::into_inner) = token;
    }
}

/// Canned responses keyed by `"<METHOD> <target>"`, e.g.
/// `"GET /api/vdcs/vdc-1/vapps?page=1"`. Requests are recorded.
#[derive(Default)]
pub struct MockRemoteClient {
    responses: HashMap<String, Result<RemoteResponse, (u16, String)>>,
    requests: Mutex<Vec<RemoteRequest>>,
    tokens: Mutex<Vec<Option<String>>>,
}

impl MockRemoteClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_response(&mut self, method_target: impl Into<String>, response: RemoteResponse) {
        self.responses.insert(method_target.into(), Ok(response));
    }

    pub fn add_json(&mut self, method_target: impl Into<String>, body: Value) {
        self.add_response(method_target, RemoteResponse::ok(body));
    }

    pub fn add_error(&mut self, method_target: impl Into<String>, status: u16, message: &str) {
        self.responses
            .insert(method_target.into(), Err((status, message.to_string())));
    }

    pub fn requests(&self) -> Vec<RemoteRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of recorded requests whose `"<METHOD> <target>"` starts with `prefix`.
    pub fn count(&self, prefix: &str) -> usize {
        self.requests()
            .iter()
            .filter(|r| Self::make_key(r).starts_with(prefix))
            .count()
    }

    pub fn tokens(&self) -> Vec<Option<String>> {
        self.tokens
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn make_key(request: &RemoteRequest) -> String {
        format!("{} {}", request.method, request.target())
    }
}

#[async_trait]
impl RemoteClient for MockRemoteClient {
    async fn call(&self, request: &RemoteRequest) -> Result<RemoteResponse, RemoteError> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.clone());

        let key = Self::make_key(request);
        match self.responses.get(&key) {
            Some(Ok(response)) => Ok(response.clone()),
            Some(Err((status, message))) => Err(RemoteError::Status {
                status: *status,
                message: message.clone(),
            }),
            None => Err(RemoteError::Status {
                status: 404,
                message: format!("Mock response not found for: {}", key),
            }),
        }
    }

    fn set_auth_token(&self, token: Option<String>) {
        self.tokens
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(token);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_mock_client() {
        let mut client = MockRemoteClient::new();
        client.add_json("GET /api/test", json!({"data": "test"}));
        client.add_error("DELETE /api/test", 409, "busy");

        let result = client.get("/api/test").await.unwrap();
        assert_eq!(result.status, 200);
        assert_eq!(result.body["data"], "test");

        let err = client.delete("/api/test").await.unwrap_err();
        assert_eq!(err.status(), Some(409));
        assert!(client.get("/api/missing").await.unwrap_err().is_not_found());
        assert_eq!(client.count("GET "), 2);
    }

    #[test]
    fn test_query_is_encoded_and_ordered() {
        let request = RemoteRequest::new(Method::GET, "/api/provider-vdcs")
            .with_query("page", 2)
            .with_query("name", "pvdc gold");
        assert_eq!(request.target(), "/api/provider-vdcs?name=pvdc%20gold&page=2");
    }

    #[test]
    fn test_url_building() {
        let client =
            HttpRemoteClient::new("https://cloud.internal/", Duration::from_secs(30)).unwrap();
        let request = RemoteRequest::new(Method::GET, "/api/vdcs").with_query("page", 1);
        assert_eq!(
            client.build_url(&request),
            "https://cloud.internal/api/vdcs?page=1"
        );
    }

    #[test]
    fn test_typed_body_decoding() {
        #[derive(Debug, serde::Deserialize, PartialEq)]
        struct Token {
            token: String,
        }

        let response = RemoteResponse::ok(json!({"token": "abc"}));
        assert_eq!(
            response.json::<Token>().unwrap(),
            Token {
                token: "abc".to_string()
            }
        );
        assert!(matches!(
            RemoteResponse::ok(json!([1, 2])).json::<Token>(),
            Err(RemoteError::ParseError(_))
        ));
    }
}
