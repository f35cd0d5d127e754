//! End-to-end dispatch tests: routers, mounts, parameters and faults driven
//! through `Server::dispatch`.

use parking_lot::Mutex;
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use xperi_core::*;

type Log = Arc<Mutex<Vec<String>>>;

fn log() -> Log {
    Arc::new(Mutex::new(Vec::new()))
}

/// Handler that records `name` plus its params, then answers with `name`.
fn answer(log: &Log, name: &'static str) -> Layer {
    let log = log.clone();
    handler(move |req, res, _next, _server| {
        let log = log.clone();
        async move {
            log.lock().push(name.to_string());
            res.json(&json!({"handler": name, "params": req.params()}))?;
            Ok(())
        }
    })
}

fn step(log: &Log, name: &'static str, advance: bool) -> Layer {
    let log = log.clone();
    handler(move |_req, _res, next, _server| {
        let log = log.clone();
        async move {
            log.lock().push(name.to_string());
            if advance {
                next.advance();
            }
            Ok(())
        }
    })
}

async fn get(server: &Server, url: &str) -> HttpResponse {
    server.dispatch(HttpRequest::new("GET", url)).await
}

fn json_body(response: &HttpResponse) -> Value {
    serde_json::from_slice(&response.body).unwrap()
}

#[tokio::test]
async fn test_first_registered_match_wins() {
    let log = log();
    let mut router = Router::new();
    router.get("/users/:id", answer(&log, "by-id"));
    router.get("/users/active", answer(&log, "active"));
    let server = App::new().use_middleware(router).build();

    let body = json_body(&get(&server, "/users/active").await);
    assert_eq!(body["handler"], "by-id");
    assert_eq!(body["params"]["id"], "active");
    assert_eq!(*log.lock(), vec!["by-id"]);
}

#[tokio::test]
async fn test_trailing_slash_is_equivalent() {
    let log = log();
    let mut router = Router::new();
    router.get("/items/:id", answer(&log, "item"));
    router.get("/list/", answer(&log, "list"));
    let server = App::new().use_middleware(router).build();

    for url in ["/items/3", "/items/3/", "/list", "/list/"] {
        assert_eq!(get(&server, url).await.status, 200, "{url}");
    }
    assert_eq!(get(&server, "/items").await.status, 404);
}

#[tokio::test]
async fn test_numeric_params_are_coerced() {
    let log = log();
    let mut router = Router::new();
    router.get("/users/:id", answer(&log, "user"));
    let server = App::new().use_middleware(router).build();

    assert_eq!(json_body(&get(&server, "/users/42").await)["params"]["id"], json!(42));
    assert_eq!(json_body(&get(&server, "/users/abc").await)["params"]["id"], json!("abc"));
}

#[tokio::test]
async fn test_handler_without_next_stops_the_chain() {
    let log = log();
    let server = App::new()
        .use_middleware([
            step(&log, "h1", false),
            step(&log, "h2", true),
            step(&log, "h3", true),
        ])
        .build();

    let response = get(&server, "/").await;
    assert_eq!(*log.lock(), vec!["h1"]);
    assert_eq!(response.status, 200);
    assert!(response.body.is_empty());
}

#[tokio::test]
async fn test_nested_router_receives_parent_params() {
    let log = log();
    let mut inner = Router::new();
    inner.get("/piazada", answer(&log, "inner"));
    let mut outer = Router::new();
    outer.use_route("/teste/:teste", inner);
    let server = App::new().use_middleware(outer).build();

    let body = json_body(&get(&server, "/teste/abc/piazada").await);
    assert_eq!(body["handler"], "inner");
    assert_eq!(body["params"]["teste"], "abc");

    assert_eq!(get(&server, "/teste/abc/other").await.status, 404);
}

#[tokio::test]
async fn test_mount_middleware_runs_before_nested_routes() {
    let log = log();
    let mut inner = Router::new();
    inner.get("/list", answer(&log, "list"));
    let mut outer = Router::new();
    outer.use_route("/api", vec![step(&log, "auth", true), inner.into()]);
    let server = App::new()
        .use_middleware(vec![step(&log, "global", true), outer.into()])
        .build();

    assert_eq!(get(&server, "/api/list").await.status, 200);
    assert_eq!(*log.lock(), vec!["global", "auth", "list"]);
}

#[tokio::test]
async fn test_concurrent_requests_are_isolated() {
    let mut router = Router::new();
    router.get(
        "/slow/:id",
        handler(|req, res, _next, _server| async move {
            let id = req.param("id");
            // Let the other request interleave.
            tokio::time::sleep(Duration::from_millis(20)).await;
            res.status(200).json(&json!({"id": id, "seen": req.param("id")}))?;
            Ok(())
        }),
    );
    let server = App::new().use_middleware(router).build();

    let (a, b) = tokio::join!(get(&server, "/slow/1"), get(&server, "/slow/two"));
    let (a, b) = (json_body(&a), json_body(&b));
    assert_eq!(a, json!({"id": 1, "seen": 1}));
    assert_eq!(b, json!({"id": "two", "seen": "two"}));
}

#[tokio::test]
async fn test_unknown_route_names_url_and_method() {
    let mut router = Router::new();
    router.get("/known", step(&log(), "known", false));
    let server = App::new().use_middleware(router).build();

    let response = server
        .dispatch(HttpRequest::new("DELETE", "/known?x=1"))
        .await;
    assert_eq!(response.status, 404);
    let body = response.body_string();
    assert!(body.contains("/known?x=1"));
    assert!(body.contains("DELETE"));
}

#[tokio::test]
async fn test_fault_reports_once_and_server_keeps_serving() {
    let reported = Arc::new(AtomicUsize::new(0));
    let counter = reported.clone();

    let mut router = Router::new();
    router.get(
        "/fail",
        handler(|_req, _res, _next, _server| async move {
            Err(Error::custom(std::io::Error::other("disk on fire")))
        }),
    );
    router.get(
        "/ok",
        handler(|_req, res, _next, _server| async move {
            res.send("fine");
            Ok(())
        }),
    );

    let server = App::new()
        .use_middleware(router)
        .config_error(move |_err: Error, _req: Request, _res: Response| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        })
        .build();

    let failed = get(&server, "/fail").await;
    assert_eq!(failed.status, 500);
    assert_eq!(json_body(&failed)["error"], "disk on fire");
    assert_eq!(reported.load(Ordering::SeqCst), 1);

    let ok = get(&server, "/ok").await;
    assert_eq!(ok.status, 200);
    assert_eq!(ok.body_string(), "fine");
    assert_eq!(reported.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_query_and_form_body_reach_handler() {
    let mut router = Router::new();
    router.post(
        "/search",
        handler(|req, res, _next, _server| async move {
            res.json(&json!({"q": req.query_param("q"), "body": req.body()}))?;
            Ok(())
        }),
    );
    let server = App::new().use_middleware(router).build();

    let request = HttpRequest::new("POST", "/search?q=hello%20world")
        .with_header("Content-Type", "application/x-www-form-urlencoded")
        .with_body("name=ana&lang=rust");
    let body = json_body(&server.dispatch(request).await);
    assert_eq!(body["q"], "hello world");
    assert_eq!(body["body"], json!({"name": "ana", "lang": "rust"}));
}

#[tokio::test]
async fn test_parent_chain_continues_after_mounted_router() {
    let log = log();
    let mut inner = Router::new();
    inner.get("/x", step(&log, "inner", true));
    let server = App::new()
        .use_middleware(vec![inner.into(), answer(&log, "after")])
        .build();

    let response = get(&server, "/x").await;
    assert_eq!(response.status, 200);
    assert_eq!(json_body(&response)["handler"], "after");
    assert_eq!(*log.lock(), vec!["inner", "after"]);
}

#[tokio::test]
async fn test_nested_fault_stops_enclosing_chains_and_reports_once() {
    let log = log();
    let reported = Arc::new(AtomicUsize::new(0));
    let counter = reported.clone();

    let mut inner = Router::new();
    inner.get(
        "/boom",
        handler(|_req, _res, _next, _server| async move {
            Err(Error::status(409, "conflict"))
        }),
    );
    let mut outer = Router::new();
    outer.use_route("/api", vec![inner.into(), step(&log, "after-inner", true)]);

    let server = App::new()
        .use_middleware(vec![outer.into(), step(&log, "after-outer", true)])
        .config_error(move |_err: Error, _req: Request, _res: Response| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        })
        .build();

    let response = get(&server, "/api/boom").await;
    assert_eq!(response.status, 409);
    assert_eq!(json_body(&response), json!({"error": "conflict", "status": 409}));
    assert!(log.lock().is_empty());
    assert_eq!(reported.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_advance_with_params_reach_later_handlers() {
    let log = log();
    let mut router = Router::new();
    router.get(
        "/orders/:id",
        vec![
            handler(|_req, _res, next, _server| async move {
                let mut extra = Params::new();
                extra.insert("tenant".to_string(), json!("acme"));
                extra.insert("page".to_string(), json!("3"));
                next.advance_with(extra);
                Ok(())
            }),
            answer(&log, "order"),
        ],
    );
    let server = App::new().use_middleware(router).build();

    let body = json_body(&get(&server, "/orders/12").await);
    assert_eq!(body["params"], json!({"id": 12, "tenant": "acme", "page": 3}));
}
