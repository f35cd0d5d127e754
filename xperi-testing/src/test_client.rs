// In-memory test client

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use xperi_core::{App, HttpMethod, HttpRequest, HttpResponse, Server};

/// Sends requests straight to [`Server::dispatch`].
#[derive(Clone)]
pub struct TestClient {
    server: Server,
}

impl TestClient {
    pub fn new(server: Server) -> Self {
        Self { server }
    }

    pub fn from_app(app: App) -> Self {
        Self::new(app.build())
    }

    pub fn server(&self) -> &Server {
        &self.server
    }

    pub async fn get(&self, path: &str) -> TestResponse {
        self.request(HttpMethod::GET, path, Vec::new()).await
    }

    pub async fn post(&self, path: &str, body: impl Into<Vec<u8>>) -> TestResponse {
        self.request(HttpMethod::POST, path, body.into()).await
    }

    pub async fn put(&self, path: &str, body: impl Into<Vec<u8>>) -> TestResponse {
        self.request(HttpMethod::PUT, path, body.into()).await
    }

    pub async fn patch(&self, path: &str, body: impl Into<Vec<u8>>) -> TestResponse {
        self.request(HttpMethod::PATCH, path, body.into()).await
    }

    pub async fn delete(&self, path: &str) -> TestResponse {
        self.request(HttpMethod::DELETE, path, Vec::new()).await
    }

    pub async fn options(&self, path: &str) -> TestResponse {
        self.request(HttpMethod::OPTIONS, path, Vec::new()).await
    }

    /// POST `data` serialized as JSON.
    pub async fn post_json<T: Serialize>(
        &self,
        path: &str,
        data: &T,
    ) -> Result<TestResponse, serde_json::Error> {
        let request = TestRequestBuilder::new(HttpMethod::POST, path).json(data)?;
        Ok(self.send(request).await)
    }

    pub async fn request(&self, method: HttpMethod, path: &str, body: Vec<u8>) -> TestResponse {
        self.send(TestRequestBuilder::new(method, path).body(body))
            .await
    }

    pub async fn send(&self, request: TestRequestBuilder) -> TestResponse {
        TestResponse::new(self.server.dispatch(request.build()).await)
    }
}

/// Builder for requests with headers, query parameters or a body.
#[derive(Debug, Clone)]
pub struct TestRequestBuilder {
    method: String,
    path: String,
    headers: HashMap<String, String>,
    body: Vec<u8>,
    query: Vec<(String, String)>,
}

impl TestRequestBuilder {
    pub fn new(method: HttpMethod, path: &str) -> Self {
        Self::raw(method.as_str(), path)
    }

    /// Builder for a verb [`HttpMethod`] does not cover.
    pub fn raw(method: &str, path: &str) -> Self {
        Self {
            method: method.to_string(),
            path: path.to_string(),
            headers: HashMap::new(),
            body: Vec::new(),
            query: Vec::new(),
        }
    }

    pub fn header(mut self, key: &str, value: &str) -> Self {
        self.headers
            .insert(key.to_ascii_lowercase(), value.to_string());
        self
    }

    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    pub fn json<T: Serialize>(mut self, data: &T) -> Result<Self, serde_json::Error> {
        self.body = serde_json::to_vec(data)?;
        Ok(self.header("content-type", "application/json"))
    }

    pub fn query(mut self, key: &str, value: &str) -> Self {
        self.query.push((key.to_string(), value.to_string()));
        self
    }

    pub fn build(self) -> HttpRequest {
        let url = if self.query.is_empty() {
            self.path
        } else {
            let pairs: Vec<String> = self
                .query
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect();
            let separator = if self.path.contains('?') { '&' } else { '?' };
            format!("{}{}{}", self.path, separator, pairs.join("&"))
        };

        let mut request = HttpRequest::new(self.method, url).with_body(self.body);
        request.headers = self.headers;
        request
    }
}

/// Response captured by the [`TestClient`].
#[derive(Debug, Clone)]
pub struct TestResponse {
    inner: HttpResponse,
}

impl TestResponse {
    pub fn new(inner: HttpResponse) -> Self {
        Self { inner }
    }

    pub fn status(&self) -> u16 {
        self.inner.status
    }

    pub fn header(&self, key: &str) -> Option<&str> {
        self.inner.header(key)
    }

    pub fn body(&self) -> &[u8] {
        &self.inner.body
    }

    pub fn body_string(&self) -> String {
        self.inner.body_string()
    }

    pub fn body_json<T: DeserializeOwned>(&self) -> Result<T, String> {
        serde_json::from_slice(&self.inner.body).map_err(|e| format!("Serialization error: {e}"))
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.inner.status)
    }

    pub fn into_inner(self) -> HttpResponse {
        self.inner
    }
}
