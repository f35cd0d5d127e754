// Recording handlers for chain-order tests

use parking_lot::Mutex;
use std::sync::Arc;
use xperi_core::{Layer, Params, handler};

/// One handler invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub name: String,
    pub method: String,
    pub url: String,
    /// Parameter map as the handler saw it.
    pub params: Params,
}

/// Shared log of handler invocations.
///
/// ```ignore
/// let recorder = CallRecorder::new();
/// let app = App::new().use_middleware([
///     recorder.pass("auth"),
///     recorder.stop("deny"),
///     recorder.pass("never"),
/// ]);
/// // ... dispatch ...
/// assert_eq!(recorder.names(), ["auth", "deny"]);
/// ```
#[derive(Clone, Default)]
pub struct CallRecorder {
    calls: Arc<Mutex<Vec<RecordedCall>>>,
}

impl CallRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handler that records its call and advances the chain.
    pub fn pass(&self, name: &str) -> Layer {
        self.recording(name, None)
    }

    /// Handler that records its call and neither responds nor advances.
    pub fn stop(&self, name: &str) -> Layer {
        self.recording(name, Some(None))
    }

    /// Handler that records its call and ends the response with `body`.
    pub fn respond(&self, name: &str, body: &str) -> Layer {
        self.recording(name, Some(Some(body.to_string())))
    }

    // `halt`: None advances, Some(None) stops silently, Some(Some(body)) responds.
    fn recording(&self, name: &str, halt: Option<Option<String>>) -> Layer {
        let calls = self.calls.clone();
        let name = name.to_string();
        handler(move |req, res, next, _server| {
            let calls = calls.clone();
            let name = name.clone();
            let halt = halt.clone();
            async move {
                calls.lock().push(RecordedCall {
                    name,
                    method: req.method().to_string(),
                    url: req.url().to_string(),
                    params: req.params(),
                });
                match halt {
                    None => {
                        next.advance();
                    }
                    Some(Some(body)) => {
                        res.send(body);
                    }
                    Some(None) => {}
                }
                Ok(())
            }
        })
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }

    pub fn names(&self) -> Vec<String> {
        self.calls.lock().iter().map(|c| c.name.clone()).collect()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn was_called(&self, name: &str) -> bool {
        self.calls.lock().iter().any(|c| c.name == name)
    }

    pub fn clear(&self) {
        self.calls.lock().clear();
    }
}
