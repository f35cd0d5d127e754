// Route table, nested mounts and route resolution

use crate::chain::{self, ChainOutcome};
use crate::context::DispatchContext;
use crate::handler::{IntoLayers, Layer};
use crate::logging::{debug, warn};
use crate::matcher::PathPattern;
use crate::params::Params;
use crate::{Error, HttpMethod, HttpStatus};
use futures_util::future::{BoxFuture, FutureExt};
use std::fmt;
use std::sync::Arc;

/// One registered route.
///
/// Entries registered with a verb carry a method and only terminal
/// handlers. Entries registered with [`Router::use_route`] have no method
/// and may mount nested routers.
pub struct RouteEntry {
    pattern: PathPattern,
    method: Option<HttpMethod>,
    layers: Vec<Layer>,
    sub_routers: Vec<Arc<Router>>,
}

impl RouteEntry {
    pub fn pattern(&self) -> &PathPattern {
        &self.pattern
    }

    pub fn method(&self) -> Option<HttpMethod> {
        self.method
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    /// True when this entry mounts at least one router.
    pub fn is_mount(&self) -> bool {
        !self.sub_routers.is_empty()
    }

    fn accepts_method(&self, method: &str) -> bool {
        self.method.is_none_or(|m| m.matches(method))
    }
}

impl fmt::Debug for RouteEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteEntry")
            .field("pattern", &self.pattern.as_str())
            .field("method", &self.method)
            .field("layers", &self.layers.len())
            .field("sub_routers", &self.sub_routers.len())
            .finish()
    }
}

/// A matched entry plus what the match produced.
#[derive(Debug)]
pub struct Resolved<'a> {
    pub entry: &'a RouteEntry,
    /// Raw captures of `entry`'s own pattern. For a mount these come from
    /// the prefix only; captures of nested routers are merged when they run.
    pub params: Params,
    /// Path left for the routers mounted on `entry`.
    pub remainder: String,
}

/// Ordered route table. The first entry that matches wins.
///
/// A router is immutable once mounted and may serve any number of
/// concurrent dispatches; all per-request state lives in the dispatch
/// context handed to it.
#[derive(Default)]
pub struct Router {
    entries: Vec<RouteEntry>,
}

impl Router {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Register a route that matches any method.
    ///
    /// Routers among `layers` are mounted: the entry then matches when its
    /// pattern matches a prefix of the path and one of the mounted routers
    /// resolves the rest.
    pub fn use_route(&mut self, pattern: &str, layers: impl IntoLayers) -> &mut Self {
        let layers = layers.into_layers();
        let sub_routers = layers
            .iter()
            .filter_map(|layer| match layer {
                Layer::Mounted(router) => Some(router.clone()),
                Layer::Terminal(_) => None,
            })
            .collect();
        self.entries.push(RouteEntry {
            pattern: PathPattern::parse(pattern),
            method: None,
            layers,
            sub_routers,
        });
        self
    }

    /// Register a route constrained to `method`.
    pub fn route(
        &mut self,
        method: HttpMethod,
        pattern: &str,
        layers: impl IntoLayers,
    ) -> &mut Self {
        let layers = layers.into_layers();
        if layers.iter().any(Layer::is_router) {
            warn!(
                method = %method,
                pattern,
                "Routers cannot be mounted under a verb route; use use_route instead"
            );
        }
        self.entries.push(RouteEntry {
            pattern: PathPattern::parse(pattern),
            method: Some(method),
            layers,
            sub_routers: Vec::new(),
        });
        self
    }

    pub fn get(&mut self, pattern: &str, layers: impl IntoLayers) -> &mut Self {
        self.route(HttpMethod::GET, pattern, layers)
    }

    pub fn post(&mut self, pattern: &str, layers: impl IntoLayers) -> &mut Self {
        self.route(HttpMethod::POST, pattern, layers)
    }

    pub fn put(&mut self, pattern: &str, layers: impl IntoLayers) -> &mut Self {
        self.route(HttpMethod::PUT, pattern, layers)
    }

    pub fn patch(&mut self, pattern: &str, layers: impl IntoLayers) -> &mut Self {
        self.route(HttpMethod::PATCH, pattern, layers)
    }

    pub fn delete(&mut self, pattern: &str, layers: impl IntoLayers) -> &mut Self {
        self.route(HttpMethod::DELETE, pattern, layers)
    }

    pub fn options(&mut self, pattern: &str, layers: impl IntoLayers) -> &mut Self {
        self.route(HttpMethod::OPTIONS, pattern, layers)
    }

    pub fn head(&mut self, pattern: &str, layers: impl IntoLayers) -> &mut Self {
        self.route(HttpMethod::HEAD, pattern, layers)
    }

    pub fn entries(&self) -> &[RouteEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Find the first entry matching `method` and the router-relative `path`.
    pub fn resolve(&self, method: &str, path: &str) -> Option<Resolved<'_>> {
        self.entries.iter().find_map(|entry| {
            if entry.is_mount() {
                let (params, remainder) = entry.pattern.match_prefix(path)?;
                entry
                    .sub_routers
                    .iter()
                    .any(|router| router.resolve(method, &remainder).is_some())
                    .then_some(Resolved {
                        entry,
                        params,
                        remainder,
                    })
            } else {
                if !entry.accepts_method(method) {
                    return None;
                }
                let params = entry.pattern.captures(path)?;
                Some(Resolved {
                    entry,
                    params,
                    remainder: String::new(),
                })
            }
        })
    }

    pub fn is_match(&self, method: &str, path: &str) -> bool {
        self.resolve(method, path).is_some()
    }

    /// Resolve and run the matched chain; answer 404 when nothing matches.
    pub(crate) fn execute_routes<'a>(
        &'a self,
        ctx: &'a DispatchContext,
    ) -> BoxFuture<'a, ChainOutcome> {
        async move {
            match self.try_execute(ctx).await {
                Some(outcome) => outcome,
                None => {
                    let err = Error::RouteNotFound {
                        url: ctx.req.url().to_string(),
                        method: ctx.req.method().to_string(),
                    };
                    debug!(error = %err, "No route matched");
                    ctx.res.status(HttpStatus::NotFound.code()).send(err.to_string());
                    ChainOutcome::NotFound
                }
            }
        }
        .boxed()
    }

    /// Like [`execute_routes`](Self::execute_routes) but a miss yields `None`
    /// and writes nothing.
    pub(crate) fn try_execute<'a>(
        &'a self,
        ctx: &'a DispatchContext,
    ) -> BoxFuture<'a, Option<ChainOutcome>> {
        async move {
            let resolved = self.resolve(ctx.req.method(), &ctx.path)?;
            debug!(
                pattern = %resolved.entry.pattern,
                mount = %ctx.mount_prefix,
                path = %ctx.path,
                "Route matched"
            );

            ctx.req.add_params(resolved.params);
            let consumed = ctx
                .path
                .strip_suffix(resolved.remainder.as_str())
                .unwrap_or(ctx.path.as_str());
            let child = ctx.descend(consumed, resolved.remainder);
            Some(chain::run(&resolved.entry.layers, &child).await)
        }
        .boxed()
    }
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Router")
            .field("entries", &self.entries)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler;
    use serde_json::json;

    fn noop() -> Layer {
        handler(|_req, _res, _next, _server| async { Ok(()) })
    }

    #[test]
    fn test_first_match_wins() {
        let mut router = Router::new();
        router.get("/users/:id", noop());
        router.get("/users/active", noop());

        let resolved = router.resolve("GET", "/users/active").unwrap();
        assert_eq!(resolved.entry.pattern().as_str(), "/users/:id");
        assert_eq!(resolved.params["id"], json!("active"));
    }

    #[test]
    fn test_method_constraint() {
        let mut router = Router::new();
        router.post("/items", noop());
        router.get("/items", noop());

        let resolved = router.resolve("GET", "/items").unwrap();
        assert_eq!(resolved.entry.method(), Some(HttpMethod::GET));
        assert!(router.resolve("DELETE", "/items").is_none());
    }

    #[test]
    fn test_use_route_matches_any_method() {
        let mut router = Router::new();
        router.use_route("/health", noop());
        assert!(router.is_match("GET", "/health"));
        assert!(router.is_match("BREW", "/health/"));
    }

    #[test]
    fn test_nested_resolution() {
        let mut inner = Router::new();
        inner.get("/piazada", noop());

        let mut outer = Router::new();
        outer.use_route("/teste/:teste", inner);
        assert!(outer.entries()[0].is_mount());

        let resolved = outer.resolve("GET", "/teste/abc/piazada").unwrap();
        assert_eq!(resolved.params["teste"], json!("abc"));
        assert_eq!(resolved.remainder, "/piazada");

        assert!(outer.resolve("POST", "/teste/abc/piazada").is_none());
        assert!(outer.resolve("GET", "/teste/abc/other").is_none());
        assert!(outer.resolve("GET", "/teste/abc").is_none());
    }

    #[test]
    fn test_resolved_params_hold_only_the_entry_captures() {
        let mut inner = Router::new();
        inner.get("/items/:item", noop());

        let mut outer = Router::new();
        outer.use_route("/shops/:shop", inner);

        let resolved = outer.resolve("GET", "/shops/7/items/pen").unwrap();
        assert_eq!(resolved.params.len(), 1);
        assert_eq!(resolved.params["shop"], json!("7"));
        assert_eq!(resolved.remainder, "/items/pen");
    }

    #[test]
    fn test_mount_skipped_when_sub_router_misses() {
        let mut api = Router::new();
        api.get("/users", noop());

        let mut root = Router::new();
        root.use_route("/api", api);
        root.get("/api/status", noop());

        let resolved = root.resolve("GET", "/api/status").unwrap();
        assert!(!resolved.entry.is_mount());
    }

    #[test]
    fn test_deeply_nested_resolution() {
        let mut leaf = Router::new();
        leaf.get("/:comment", noop());

        let mut posts = Router::new();
        posts.use_route("/posts/:post", leaf);

        let mut root = Router::new();
        root.use_route("/users/:user", posts);

        let resolved = root.resolve("GET", "/users/1/posts/2/3").unwrap();
        assert_eq!(resolved.params["user"], json!("1"));
        assert_eq!(resolved.remainder, "/posts/2/3");
    }

    #[test]
    fn test_root_mount() {
        let mut inner = Router::new();
        inner.get("/", noop());
        inner.get("/about", noop());

        let mut root = Router::new();
        root.use_route("/", inner);

        assert!(root.is_match("GET", "/"));
        assert!(root.is_match("GET", "/about"));
        assert!(!root.is_match("GET", "/missing"));
    }
}
