// Application builder, dispatch entry point and HTTP/1.1 transport

use crate::body_parser;
use crate::chain::{self, panic_message};
use crate::context::DispatchContext;
use crate::handler::{IntoLayers, Layer};
use crate::logging::{debug, error, info, trace, warn};
use crate::options::{ServerOptions, UploadOptions};
use crate::{Error, HttpRequest, HttpResponse, HttpStatus, Request, Response};
use bytes::Bytes;
use futures_util::future::{BoxFuture, FutureExt};
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::Incoming;
use hyper::header::{COOKIE, HeaderMap};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use std::collections::HashMap;
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, ToSocketAddrs};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::Instrument;

/// Server-wide callback receiving every fault raised while dispatching.
pub type ErrorCallback =
    Arc<dyn Fn(Error, Request, Response) -> BoxFuture<'static, ()> + Send + Sync>;

fn default_error_callback() -> ErrorCallback {
    Arc::new(|err: Error, req: Request, _res: Response| {
        async move {
            error!(
                error = %err,
                method = %req.method(),
                url = %req.url(),
                "Unhandled error while dispatching request"
            );
        }
        .boxed()
    })
}

/// Builder for a [`Server`].
///
/// ```ignore
/// let mut api = Router::new();
/// api.get("/users/:id", handler(show_user));
///
/// let server = App::new()
///     .use_middleware(cors(CorsConfig::default()))
///     .use_middleware(api)
///     .config_error(|err, _req, res| async move {
///         let _ = res.status(err.status_code()).json(&json!({"error": err.to_string()}));
///     })
///     .build();
/// ```
pub struct App {
    layers: Vec<Layer>,
    on_error: ErrorCallback,
    options: ServerOptions,
}

impl Default for App {
    fn default() -> Self {
        Self::new()
    }
}

impl App {
    pub fn new() -> Self {
        Self {
            layers: Vec::new(),
            on_error: default_error_callback(),
            options: ServerOptions::default(),
        }
    }

    /// Append handlers or routers to the top-level chain.
    pub fn use_middleware(mut self, layers: impl IntoLayers) -> Self {
        self.layers.extend(layers.into_layers());
        self
    }

    /// Replace the error callback. The default one logs and writes nothing.
    pub fn config_error<F, Fut>(mut self, callback: F) -> Self
    where
        F: Fn(Error, Request, Response) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.on_error = Arc::new(move |err: Error, req: Request, res: Response| {
            callback(err, req, res).boxed()
        });
        self
    }

    /// Accept files only from `fields`, with the given upload rules.
    pub fn uploaded_files<I, S>(mut self, fields: I, options: UploadOptions) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.options.upload = options.file_fields(fields);
        self
    }

    pub fn upload_options(mut self, options: UploadOptions) -> Self {
        self.options.upload = options;
        self
    }

    pub fn options(mut self, options: ServerOptions) -> Self {
        self.options = options;
        self
    }

    pub fn build(self) -> Server {
        Server {
            inner: Arc::new(ServerInner {
                layers: self.layers,
                on_error: self.on_error,
                options: self.options,
            }),
        }
    }
}

/// A built application. Cheap to clone; every clone serves the same chain.
#[derive(Clone)]
pub struct Server {
    inner: Arc<ServerInner>,
}

struct ServerInner {
    layers: Vec<Layer>,
    on_error: ErrorCallback,
    options: ServerOptions,
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("layers", &self.inner.layers.len())
            .field("options", &self.inner.options)
            .finish_non_exhaustive()
    }
}

impl Server {
    pub fn options(&self) -> &ServerOptions {
        &self.inner.options
    }

    /// Run one request through decoding and the top-level chain.
    pub async fn dispatch(&self, raw: HttpRequest) -> HttpResponse {
        let span = tracing::info_span!("request", method = %raw.method, url = %raw.url);
        self.dispatch_inner(raw).instrument(span).await
    }

    async fn dispatch_inner(&self, raw: HttpRequest) -> HttpResponse {
        let options = &self.inner.options;
        if raw.body.len() > options.max_body_bytes {
            let err = Error::PayloadTooLarge(format!(
                "body of {} bytes exceeds {} bytes",
                raw.body.len(),
                options.max_body_bytes
            ));
            return fault_response(err.status_code(), &err.to_string());
        }

        let req = Request::from_http(raw);
        let res = Response::new();
        let ctx = DispatchContext::new(req.clone(), res.clone(), self.clone());

        let work = async {
            if let Err(err) = body_parser::decode(&req, &options.upload).await {
                debug!(error = %err, "Body decoding failed, chain skipped");
                ctx.report(err).await;
                return;
            }
            let outcome = chain::run(&self.inner.layers, &ctx).await;
            debug!(?outcome, "Dispatch finished");
        };

        match options.request_timeout_ms {
            Some(ms) => {
                if tokio::time::timeout(Duration::from_millis(ms), work)
                    .await
                    .is_err()
                {
                    warn!(timeout_ms = ms, "Request timed out, dispatch aborted");
                    ctx.report(Error::Timeout(ms)).await;
                }
            }
            None => work.await,
        }

        let faults = ctx.faults();
        if faults.count > 0 && !res.is_ended() {
            let (status, message) = faults.first.unwrap_or_else(|| {
                let status = HttpStatus::InternalServerError;
                (status.code(), status.reason().to_string())
            });
            debug!(status, "Error callback left the response open, answering");
            let body = serde_json::json!({ "error": message, "status": status });
            if let Err(err) = res.status(status).json(&body) {
                error!(error = %err, "Failed to write fault response");
                res.end();
            }
        }

        res.snapshot()
    }

    pub(crate) async fn report_error(&self, err: Error, req: Request, res: Response) {
        let callback = self.inner.on_error.clone();
        let call = async move { callback(err, req, res).await };
        if let Err(panic) = AssertUnwindSafe(call).catch_unwind().await {
            error!(panic = %panic_message(panic), "Error callback panicked");
        }
    }

    /// Bind `addr` and serve HTTP/1.1 until [`Listening::close`] is called.
    pub async fn listen(&self, addr: impl ToSocketAddrs) -> Result<Listening, Error> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        info!(addr = %local_addr, "Server listening");

        let server = self.clone();
        let task = tokio::spawn(accept_loop(server, listener, shutdown_rx));

        Ok(Listening {
            local_addr,
            shutdown: shutdown_tx,
            task,
        })
    }

    /// Bind the host and port from the server options.
    pub async fn serve(&self) -> Result<Listening, Error> {
        let addr = self
            .options()
            .socket_addr()
            .map_err(|e| Error::Io(std::io::Error::new(std::io::ErrorKind::InvalidInput, e)))?;
        self.listen(addr).await
    }
}

/// Handle to a running listener.
#[derive(Debug)]
pub struct Listening {
    local_addr: SocketAddr,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl Listening {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting connections and let open ones finish their request.
    pub async fn close(self) {
        let _ = self.shutdown.send(true);
        if let Err(err) = self.task.await {
            warn!(error = %err, "Listener task ended abnormally");
        }
        info!(addr = %self.local_addr, "Server closed");
    }
}

async fn accept_loop(server: Server, listener: TcpListener, mut shutdown: watch::Receiver<bool>) {
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(conn) => conn,
                    Err(err) => {
                        warn!(error = %err, "Failed to accept connection");
                        continue;
                    }
                };
                let server = server.clone();
                let shutdown = shutdown.clone();
                tokio::spawn(serve_connection(server, stream, peer, shutdown));
            }
            _ = shutdown.changed() => break,
        }
    }
}

async fn serve_connection(
    server: Server,
    stream: tokio::net::TcpStream,
    peer: SocketAddr,
    mut shutdown: watch::Receiver<bool>,
) {
    let io = TokioIo::new(stream);
    let service = service_fn(move |req: hyper::Request<Incoming>| {
        let server = server.clone();
        async move { Ok::<_, Infallible>(handle_request(server, req).await) }
    });

    let conn = http1::Builder::new().serve_connection(io, service);
    tokio::pin!(conn);

    tokio::select! {
        result = conn.as_mut() => {
            if let Err(err) = result.map_err(Error::from) {
                debug!(peer = %peer, error = %err, "Connection closed with error");
            }
            return;
        }
        _ = shutdown.changed() => conn.as_mut().graceful_shutdown(),
    }
    if let Err(err) = conn.await.map_err(Error::from) {
        debug!(peer = %peer, error = %err, "Connection closed with error");
    }
}

async fn handle_request(
    server: Server,
    req: hyper::Request<Incoming>,
) -> hyper::Response<Full<Bytes>> {
    let (parts, body) = req.into_parts();
    let url = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| parts.uri.path().to_string());

    let mut raw = HttpRequest::new(parts.method.as_str(), url);
    raw.headers = collect_headers(&parts.headers);

    let limit = server.options().max_body_bytes;
    let response = match Limited::new(body, limit).collect().await {
        Ok(collected) => {
            raw.body = collected.to_bytes().to_vec();
            server.dispatch(raw).await
        }
        Err(err) => {
            let err = body_error(err, limit);
            fault_response(err.status_code(), &err.to_string())
        }
    };

    into_hyper(response)
}

/// Lowercase header map. Repeated headers are joined the way Node does:
/// `cookie` with `; `, everything else with `, `.
fn collect_headers(headers: &HeaderMap) -> HashMap<String, String> {
    let mut collected: HashMap<String, String> = HashMap::new();
    for (name, value) in headers {
        let Ok(value) = value.to_str() else {
            trace!(header = %name, "Dropping header value that is not visible ASCII");
            continue;
        };
        match collected.get_mut(name.as_str()) {
            Some(existing) => {
                existing.push_str(if *name == COOKIE { "; " } else { ", " });
                existing.push_str(value);
            }
            None => {
                collected.insert(name.as_str().to_string(), value.to_string());
            }
        }
    }
    collected
}

fn body_error(err: Box<dyn std::error::Error + Send + Sync>, limit: usize) -> Error {
    if err.downcast_ref::<LengthLimitError>().is_some() {
        return Error::PayloadTooLarge(format!("body exceeds {limit} bytes"));
    }
    match err.downcast::<hyper::Error>() {
        Ok(err) => Error::Hyper(*err),
        Err(other) => Error::status(HttpStatus::BadRequest.code(), other.to_string()),
    }
}

fn into_hyper(response: HttpResponse) -> hyper::Response<Full<Bytes>> {
    let mut builder = hyper::Response::builder().status(response.status);
    for (name, value) in &response.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    builder
        .body(Full::new(Bytes::from(response.body)))
        .unwrap_or_else(|err| {
            error!(error = %err, "Invalid response parts, sending 500");
            let mut fallback = hyper::Response::new(Full::new(Bytes::new()));
            *fallback.status_mut() = hyper::StatusCode::INTERNAL_SERVER_ERROR;
            fallback
        })
}

/// JSON error body used when nothing else answered a faulted request.
pub(crate) fn fault_response(status: u16, message: &str) -> HttpResponse {
    let body = serde_json::json!({ "error": message, "status": status });
    let mut response = HttpResponse::new(status);
    response
        .headers
        .insert("content-type".to_string(), "application/json".to_string());
    response.body = body.to_string().into_bytes();
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{handler, Router};
    use serde_json::{json, Value};

    #[test]
    fn test_repeated_headers_are_joined() {
        let mut headers = HeaderMap::new();
        headers.append("Accept", "text/html".parse().unwrap());
        headers.append("Accept", "application/json".parse().unwrap());
        headers.append("Cookie", "a=1".parse().unwrap());
        headers.append("Cookie", "b=2".parse().unwrap());
        headers.append("X-Raw", hyper::header::HeaderValue::from_bytes(b"caf\xe9").unwrap());

        let collected = collect_headers(&headers);
        assert_eq!(collected["accept"], "text/html, application/json");
        assert_eq!(collected["cookie"], "a=1; b=2");
        assert!(!collected.contains_key("x-raw"));
    }

    #[test]
    fn test_body_error_mapping() {
        let err = body_error(Box::new(std::io::Error::other("reset")), 10);
        assert_eq!(err.status_code(), 400);
        assert!(err.to_string().contains("reset"));
    }

    #[tokio::test]
    async fn test_empty_app_flushes_default_response() {
        let server = App::new().build();
        let response = server.dispatch(HttpRequest::new("GET", "/")).await;
        assert_eq!(response.status, 200);
        assert!(response.body.is_empty());
    }

    #[tokio::test]
    async fn test_safety_net_uses_fault_status() {
        let server = App::new()
            .use_middleware(handler(|_req, _res, _next, _server| async move {
                Err(Error::status(401, "no token"))
            }))
            .build();
        let response = server.dispatch(HttpRequest::new("GET", "/")).await;
        assert_eq!(response.status, 401);
        let body: Value = serde_json::from_slice(&response.body).unwrap();
        assert_eq!(body, json!({"error": "no token", "status": 401}));
    }

    #[tokio::test]
    async fn test_error_callback_response_wins() {
        let server = App::new()
            .use_middleware(handler(|_req, _res, _next, _server| async move {
                Err(Error::custom(std::io::Error::other("disk gone")))
            }))
            .config_error(|err, _req, res| async move {
                res.status(503).send(format!("sorry: {err}"));
            })
            .build();
        let response = server.dispatch(HttpRequest::new("GET", "/")).await;
        assert_eq!(response.status, 503);
        assert_eq!(response.body_string(), "sorry: disk gone");
    }

    #[tokio::test]
    async fn test_panicking_error_callback_is_contained() {
        let server = App::new()
            .use_middleware(handler(|_req, _res, _next, _server| async move {
                Err(Error::status(418, "teapot"))
            }))
            .config_error(|_err, req, _res| async move {
                if req.path() == "/" {
                    panic!("callback exploded");
                }
            })
            .build();
        let response = server.dispatch(HttpRequest::new("GET", "/")).await;
        assert_eq!(response.status, 418);
    }

    #[tokio::test]
    async fn test_decode_error_skips_chain() {
        let server = App::new()
            .use_middleware(handler(|_req, res, _next, _server| async move {
                res.send("should not run");
                Ok(())
            }))
            .build();
        let response = server
            .dispatch(
                HttpRequest::new("POST", "/")
                    .with_header("content-type", "application/json")
                    .with_body("{broken"),
            )
            .await;
        assert_eq!(response.status, 400);
        assert!(response.body_string().contains("Invalid JSON"));
    }

    #[tokio::test]
    async fn test_body_limit() {
        let server = App::new()
            .options(ServerOptions::default().with_max_body_bytes(4))
            .build();
        let response = server
            .dispatch(HttpRequest::new("POST", "/").with_body("too long"))
            .await;
        assert_eq!(response.status, 413);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_reports_cancellation() {
        let seen = Arc::new(parking_lot::Mutex::new(None));
        let seen_in_callback = seen.clone();
        let server = App::new()
            .options(ServerOptions::default().with_request_timeout_ms(50))
            .use_middleware(handler(|_req, res, _next, _server| async move {
                tokio::time::sleep(Duration::from_secs(10)).await;
                res.send("too late");
                Ok(())
            }))
            .config_error(move |err, _req, _res| {
                let seen = seen_in_callback.clone();
                async move {
                    *seen.lock() = Some(err.is_cancellation());
                }
            })
            .build();

        let response = server.dispatch(HttpRequest::new("GET", "/slow")).await;
        assert_eq!(response.status, 504);
        assert_eq!(*seen.lock(), Some(true));
    }

    #[tokio::test]
    async fn test_uploaded_files_sets_field_whitelist() {
        let server = App::new()
            .uploaded_files(["avatar"], UploadOptions::default().max_fields(3))
            .build();
        assert_eq!(server.options().upload.file_fields, vec!["avatar".to_string()]);
        assert_eq!(server.options().upload.max_fields, Some(3));
    }

    #[tokio::test]
    async fn test_listen_and_close() {
        let mut router = Router::new();
        router.get("/ping", handler(|_req, res, _next, _server| async move {
            res.send("pong");
            Ok(())
        }));
        let server = App::new().use_middleware(router).build();
        let listening = server.listen("127.0.0.1:0").await.unwrap();
        assert_ne!(listening.local_addr().port(), 0);
        listening.close().await;
    }
}
