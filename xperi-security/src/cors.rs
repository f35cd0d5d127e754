//! CORS (Cross-Origin Resource Sharing) middleware
//!
//! Checks the request `Origin` against the configured origins and writes the
//! `Access-Control-*` headers before the rest of the chain runs.
//!
//! - A restricted origin list rejects requests without `Origin` (403
//!   `CORS is not allowed`) and requests from other origins (403 `Forbidden`).
//! - Preflight (`OPTIONS`) requests are answered with 204 and the chain stops.
//! - Any other allowed request gets the headers and continues.
//!
//! # Quick Start
//!
//! ```
//! use xperi_security::cors::CorsConfig;
//!
//! // Defaults: any origin, credentials allowed
//! let cors = CorsConfig::default();
//!
//! // Specific origins
//! let cors = CorsConfig::new()
//!     .allow_origin("https://example.com")
//!     .allow_origin("https://app.example.com")
//!     .allow_methods(vec!["GET", "POST"])
//!     .allow_credentials(false);
//! ```

use async_trait::async_trait;
use regex::Regex;
use tracing::{debug, trace};
use xperi_core::{Error, Handler, Layer, Next, Request, Response, Server};

const WILDCARD: &str = "*";

/// CORS configuration
#[derive(Debug, Clone)]
pub struct CorsConfig {
    /// Allowed origins; `*` allows any origin
    origins: Vec<String>,

    /// Allowed origin patterns
    origin_patterns: Vec<Regex>,

    /// Allowed HTTP methods
    methods: Vec<String>,

    /// Allowed request headers
    headers: Vec<String>,

    /// Exposed response headers
    expose_headers: Vec<String>,

    allow_credentials: bool,

    /// Preflight cache lifetime in seconds, 0 omits the header
    max_age: u64,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            origins: vec![WILDCARD.to_string()],
            origin_patterns: Vec::new(),
            methods: to_strings(["GET", "POST", "PUT", "PATCH", "DELETE"]),
            headers: to_strings(["Content-Type", "Authorization", "Accept", "X-Auth-Token"]),
            expose_headers: to_strings(["X-Custom-Header"]),
            allow_credentials: true,
            max_age: 3600,
        }
    }
}

impl CorsConfig {
    /// Configuration with the default policy (any origin).
    pub fn new() -> Self {
        Self::default()
    }

    /// Allow a specific origin.
    ///
    /// The first call replaces the default wildcard, so the origin list
    /// becomes restricted.
    pub fn allow_origin(mut self, origin: impl Into<String>) -> Self {
        if self.allows_any_origin() {
            self.origins.clear();
        }
        self.origins.push(origin.into());
        self
    }

    /// Replace the origin list.
    pub fn allow_origins<I, S>(mut self, origins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.origins = origins.into_iter().map(Into::into).collect();
        self
    }

    /// Allow origins matching a regex pattern.
    ///
    /// ```
    /// use xperi_security::cors::CorsConfig;
    ///
    /// let cors = CorsConfig::new()
    ///     .allow_origin_regex(r"^https://.*\.example\.com$").unwrap();
    /// assert!(cors.is_origin_allowed("https://api.example.com"));
    /// assert!(!cors.is_origin_allowed("https://example.org"));
    /// ```
    pub fn allow_origin_regex(mut self, pattern: &str) -> Result<Self, regex::Error> {
        let regex = Regex::new(pattern)?;
        if self.allows_any_origin() {
            self.origins.clear();
        }
        self.origin_patterns.push(regex);
        Ok(self)
    }

    pub fn allow_any_origin(mut self) -> Self {
        self.origins = vec![WILDCARD.to_string()];
        self.origin_patterns.clear();
        self
    }

    pub fn allow_methods(mut self, methods: Vec<impl Into<String>>) -> Self {
        self.methods = methods
            .into_iter()
            .map(|m| m.into().to_uppercase())
            .collect();
        self
    }

    pub fn allow_headers(mut self, headers: Vec<impl Into<String>>) -> Self {
        self.headers = headers.into_iter().map(Into::into).collect();
        self
    }

    pub fn expose_headers(mut self, headers: Vec<impl Into<String>>) -> Self {
        self.expose_headers = headers.into_iter().map(Into::into).collect();
        self
    }

    pub fn allow_credentials(mut self, allow: bool) -> Self {
        self.allow_credentials = allow;
        self
    }

    pub fn max_age(mut self, seconds: u64) -> Self {
        self.max_age = seconds;
        self
    }

    pub fn allows_any_origin(&self) -> bool {
        self.origins.iter().any(|o| o == WILDCARD)
    }

    pub fn is_origin_allowed(&self, origin: &str) -> bool {
        self.allows_any_origin()
            || self.origins.iter().any(|o| o == origin)
            || self.origin_patterns.iter().any(|p| p.is_match(origin))
    }

    fn apply_headers(&self, res: &Response) {
        if !self.methods.is_empty() {
            res.set_header("Access-Control-Allow-Methods", self.methods.join(", "));
        }
        if !self.headers.is_empty() {
            res.set_header("Access-Control-Allow-Headers", self.headers.join(", "));
        }
        if self.allow_credentials {
            res.set_header("Access-Control-Allow-Credentials", "true");
        }
        if self.max_age > 0 {
            res.set_header("Access-Control-Max-Age", self.max_age.to_string());
        }
        if !self.expose_headers.is_empty() {
            res.set_header(
                "Access-Control-Expose-Headers",
                self.expose_headers.join(", "),
            );
        }
    }
}

#[async_trait]
impl Handler for CorsConfig {
    async fn call(
        &self,
        req: Request,
        res: Response,
        next: Next,
        _server: Server,
    ) -> Result<(), Error> {
        let origin = req.header("origin").unwrap_or_default();

        if origin.is_empty() && !self.allows_any_origin() {
            debug!(url = req.url(), "Request without Origin rejected");
            res.status(403).send("CORS is not allowed");
            return Ok(());
        }

        if !self.is_origin_allowed(origin) {
            debug!(origin, "Origin not allowed");
            res.status(403).send("Forbidden");
            return Ok(());
        }

        let allow_origin = if origin.is_empty() { WILDCARD } else { origin };
        res.set_header("Access-Control-Allow-Origin", allow_origin);
        self.apply_headers(&res);

        if req.method() == "OPTIONS" {
            trace!(origin = allow_origin, "Answered CORS preflight");
            res.status(204).end();
            return Ok(());
        }

        next.advance();
        Ok(())
    }
}

/// Wrap a [`CorsConfig`] as a chain layer.
pub fn cors(config: CorsConfig) -> Layer {
    Layer::from_handler(config)
}

fn to_strings<const N: usize>(values: [&str; N]) -> Vec<String> {
    values.iter().map(|s| s.to_string()).collect()
}
