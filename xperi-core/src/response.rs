// Response facade: status, headers and the single terminal write

use crate::http::HttpResponse;
use crate::Error;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::warn;

/// Handle to the response being built for one request.
///
/// Every clone writes to the same state. Once a terminal write
/// ([`json`](Self::json), [`send`](Self::send), [`end`](Self::end)) happened,
/// further status, header or body writes are logged and ignored.
#[derive(Clone)]
pub struct Response {
    inner: Arc<Mutex<ResponseState>>,
}

struct ResponseState {
    status: u16,
    headers: HashMap<String, String>,
    body: Vec<u8>,
    ended: bool,
    rejected_writes: usize,
}

impl Default for Response {
    fn default() -> Self {
        Self::new()
    }
}

impl Response {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(ResponseState {
                status: 200,
                headers: HashMap::new(),
                body: Vec::new(),
                ended: false,
                rejected_writes: 0,
            })),
        }
    }

    /// Set the status used by the terminal write.
    pub fn status(&self, code: u16) -> &Self {
        self.mutate("status", |state| state.status = code);
        self
    }

    pub fn set_header(&self, name: impl AsRef<str>, value: impl Into<String>) -> &Self {
        let name = name.as_ref().to_ascii_lowercase();
        let value = value.into();
        self.mutate("header", move |state| {
            state.headers.insert(name, value);
        });
        self
    }

    pub fn content_type(&self, content_type: impl Into<String>) -> &Self {
        self.set_header("content-type", content_type)
    }

    /// Set status and a batch of headers at once.
    pub fn write_head<I, K, V>(&self, code: u16, headers: I) -> &Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        self.status(code);
        for (name, value) in headers {
            self.set_header(name, value);
        }
        self
    }

    /// Serialize `payload`, mark it `application/json` and end the response.
    pub fn json<T: Serialize + ?Sized>(&self, payload: &T) -> Result<&Self, Error> {
        let body = serde_json::to_vec(payload)?;
        self.finish("json", Some("application/json"), body);
        Ok(self)
    }

    /// Write raw bytes and end the response. `text/plain` is assumed when no
    /// content type was set.
    pub fn send(&self, data: impl Into<Vec<u8>>) -> &Self {
        self.finish("send", Some("text/plain; charset=utf-8"), data.into());
        self
    }

    /// End the response without a body.
    pub fn end(&self) -> &Self {
        self.finish("end", None, Vec::new());
        self
    }

    pub fn is_ended(&self) -> bool {
        self.inner.lock().ended
    }

    pub fn status_code(&self) -> u16 {
        self.inner.lock().status
    }

    pub fn header(&self, name: &str) -> Option<String> {
        self.inner
            .lock()
            .headers
            .get(&name.to_ascii_lowercase())
            .cloned()
    }

    pub fn body(&self) -> Vec<u8> {
        self.inner.lock().body.clone()
    }

    /// Number of writes dropped because the response had already ended.
    pub fn rejected_writes(&self) -> usize {
        self.inner.lock().rejected_writes
    }

    pub fn snapshot(&self) -> HttpResponse {
        let state = self.inner.lock();
        HttpResponse {
            status: state.status,
            headers: state.headers.clone(),
            body: state.body.clone(),
        }
    }

    fn mutate(&self, what: &str, apply: impl FnOnce(&mut ResponseState)) {
        let mut state = self.inner.lock();
        if state.ended {
            state.rejected_writes += 1;
            warn!(write = what, "Response already ended, write ignored");
            return;
        }
        apply(&mut state);
    }

    fn finish(&self, what: &str, default_type: Option<&str>, body: Vec<u8>) {
        self.mutate(what, |state| {
            if let Some(content_type) = default_type {
                if what == "json" || !state.headers.contains_key("content-type") {
                    state
                        .headers
                        .insert("content-type".to_string(), content_type.to_string());
                }
            }
            state
                .headers
                .insert("content-length".to_string(), body.len().to_string());
            state.body = body;
            state.ended = true;
        });
    }
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.lock();
        f.debug_struct("Response")
            .field("status", &state.status)
            .field("ended", &state.ended)
            .finish_non_exhaustive()
    }
}
