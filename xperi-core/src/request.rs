// Request facade shared by every handler of one dispatch

use crate::body_parser::UploadedFile;
use crate::http::HttpRequest;
use crate::params::{self, Params};
use crate::Error;
use bytes::Bytes;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Handle to the request being dispatched.
///
/// Cloning is cheap; every clone sees the same parameter map, body and
/// locals. Method, URL, headers and the raw body are fixed at construction.
#[derive(Clone)]
pub struct Request {
    inner: Arc<RequestInner>,
}

struct RequestInner {
    method: String,
    url: String,
    path: String,
    query: HashMap<String, String>,
    headers: HashMap<String, String>,
    raw_body: Bytes,
    state: Mutex<RequestState>,
}

#[derive(Default)]
struct RequestState {
    params: Params,
    body: Value,
    files: HashMap<String, Vec<UploadedFile>>,
    fields: HashMap<String, String>,
    locals: HashMap<String, Value>,
}

impl Request {
    pub fn from_http(raw: HttpRequest) -> Self {
        let (path, query) = split_url(&raw.url);
        let headers = raw
            .headers
            .into_iter()
            .map(|(k, v)| (k.to_ascii_lowercase(), v))
            .collect();
        Self {
            inner: Arc::new(RequestInner {
                method: raw.method.to_ascii_uppercase(),
                path,
                query,
                url: raw.url,
                headers,
                raw_body: Bytes::from(raw.body),
                state: Mutex::new(RequestState::default()),
            }),
        }
    }

    /// Upper-cased request verb.
    pub fn method(&self) -> &str {
        &self.inner.method
    }

    /// Raw URL including the query string.
    pub fn url(&self) -> &str {
        &self.inner.url
    }

    /// URL path with the query string stripped.
    pub fn path(&self) -> &str {
        &self.inner.path
    }

    pub fn query(&self) -> &HashMap<String, String> {
        &self.inner.query
    }

    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.inner.query.get(name).map(String::as_str)
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.inner
            .headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn headers(&self) -> &HashMap<String, String> {
        &self.inner.headers
    }

    /// Full `Content-Type` header, parameters included.
    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
    }

    /// Lower-cased media type without parameters (`multipart/form-data`).
    pub fn media_type(&self) -> Option<String> {
        self.content_type()
            .and_then(|ct| ct.split(';').next())
            .map(|ct| ct.trim().to_ascii_lowercase())
            .filter(|ct| !ct.is_empty())
    }

    pub fn raw_body(&self) -> Bytes {
        self.inner.raw_body.clone()
    }

    pub fn params(&self) -> Params {
        self.inner.state.lock().params.clone()
    }

    pub fn param(&self, name: &str) -> Option<Value> {
        self.inner.state.lock().params.get(name).cloned()
    }

    /// Merge parameters into the map. String values are coerced to numbers
    /// when they parse as one.
    pub fn add_params(&self, incoming: Params) {
        params::merge(&mut self.inner.state.lock().params, incoming);
    }

    /// Decoded body. `Value::Null` when nothing was decoded.
    pub fn body(&self) -> Value {
        self.inner.state.lock().body.clone()
    }

    pub fn body_as<T: DeserializeOwned>(&self) -> Result<T, Error> {
        let body = self.body();
        serde_json::from_value(body).map_err(Error::from)
    }

    pub fn set_body(&self, body: Value) {
        self.inner.state.lock().body = body;
    }

    pub fn files(&self) -> HashMap<String, Vec<UploadedFile>> {
        self.inner.state.lock().files.clone()
    }

    /// First file uploaded under `field`.
    pub fn file(&self, field: &str) -> Option<UploadedFile> {
        self.inner
            .state
            .lock()
            .files
            .get(field)
            .and_then(|files| files.first().cloned())
    }

    pub fn fields(&self) -> HashMap<String, String> {
        self.inner.state.lock().fields.clone()
    }

    pub fn field(&self, name: &str) -> Option<String> {
        self.inner.state.lock().fields.get(name).cloned()
    }

    pub(crate) fn set_form(
        &self,
        files: HashMap<String, Vec<UploadedFile>>,
        fields: HashMap<String, String>,
    ) {
        let mut state = self.inner.state.lock();
        state.files = files;
        state.fields = fields;
    }

    /// Store a value for handlers further down the chain.
    pub fn set_local(&self, key: impl Into<String>, value: Value) {
        self.inner.state.lock().locals.insert(key.into(), value);
    }

    pub fn local(&self, key: &str) -> Option<Value> {
        self.inner.state.lock().locals.get(key).cloned()
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("method", &self.inner.method)
            .field("url", &self.inner.url)
            .finish_non_exhaustive()
    }
}

fn split_url(url: &str) -> (String, HashMap<String, String>) {
    let (path, query) = match url.split_once('?') {
        Some((path, query)) => (path, query),
        None => (url, ""),
    };
    let path = if path.is_empty() { "/" } else { path };
    (path.to_string(), parse_query(query))
}

fn parse_query(query: &str) -> HashMap<String, String> {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            (decode_component(key), decode_component(value))
        })
        .collect()
}

fn decode_component(raw: &str) -> String {
    let raw = raw.replace('+', " ");
    match urlencoding::decode(&raw) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => raw,
    }
}
