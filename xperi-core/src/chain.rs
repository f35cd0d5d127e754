// Middleware chain executor
//
// Runs the layers of one chain strictly in order. A terminal handler is
// awaited to completion; the chain only moves on if it fired its `Next`.
// Mounted routers recurse into route resolution.

use crate::context::DispatchContext;
use crate::handler::{Layer, Next};
use crate::logging::{debug, trace};
use crate::Error;
use futures_util::future::{BoxFuture, FutureExt};
use std::any::Any;
use std::panic::AssertUnwindSafe;

/// How a chain stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ChainOutcome {
    /// Every layer ran and the last one advanced.
    Completed,
    /// A handler returned without calling `next`.
    Halted,
    /// A handler failed; the error callback has been invoked.
    Faulted,
    /// A top-level router found no route and answered 404.
    NotFound,
}

impl ChainOutcome {
    /// Whether an enclosing chain may keep going after this one.
    pub fn continues_parent(self) -> bool {
        matches!(self, ChainOutcome::Completed | ChainOutcome::Halted)
    }
}

/// Run `layers` against the dispatch in `ctx`.
pub(crate) fn run<'a>(
    layers: &'a [Layer],
    ctx: &'a DispatchContext,
) -> BoxFuture<'a, ChainOutcome> {
    async move {
        debug!(
            layers = layers.len(),
            mount = %ctx.mount_prefix,
            "Executing handler chain"
        );

        for (index, layer) in layers.iter().enumerate() {
            trace!(index, router = layer.is_router(), "Executing chain layer");

            match layer {
                Layer::Terminal(handler) => {
                    let next = Next::new(index, ctx.req.clone());
                    let call = handler.call(
                        ctx.req.clone(),
                        ctx.res.clone(),
                        next.clone(),
                        ctx.server.clone(),
                    );

                    match AssertUnwindSafe(call).catch_unwind().await {
                        Ok(Ok(())) => {}
                        Ok(Err(err)) => {
                            ctx.report(err).await;
                            return ChainOutcome::Faulted;
                        }
                        Err(panic) => {
                            ctx.report(Error::Panic(panic_message(panic))).await;
                            return ChainOutcome::Faulted;
                        }
                    }

                    if !next.is_called() {
                        trace!(index, "Handler did not call next, chain halted");
                        return ChainOutcome::Halted;
                    }
                }
                Layer::Mounted(router) => {
                    let outcome = if ctx.nested {
                        match router.try_execute(ctx).await {
                            Some(outcome) => outcome,
                            None => continue,
                        }
                    } else {
                        router.execute_routes(ctx).await
                    };

                    if !outcome.continues_parent() {
                        return outcome;
                    }
                }
            }
        }

        ChainOutcome::Completed
    }
    .boxed()
}

pub(crate) fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{handler, App, HttpRequest, Request, Response};
    use parking_lot::Mutex;
    use std::sync::Arc;

    fn recorder(log: &Arc<Mutex<Vec<&'static str>>>, name: &'static str, advance: bool) -> Layer {
        let log = log.clone();
        handler(move |_req, _res, next, _server| {
            let log = log.clone();
            async move {
                log.lock().push(name);
                if advance {
                    next.advance();
                }
                Ok(())
            }
        })
    }

    fn context() -> DispatchContext {
        let server = App::new().build();
        let req = Request::from_http(HttpRequest::new("GET", "/"));
        DispatchContext::new(req, Response::new(), server)
    }

    #[tokio::test]
    async fn test_runs_in_order_while_advancing() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let layers = vec![
            recorder(&log, "h1", true),
            recorder(&log, "h2", true),
            recorder(&log, "h3", true),
        ];
        let ctx = context();
        assert_eq!(run(&layers, &ctx).await, ChainOutcome::Completed);
        assert_eq!(*log.lock(), vec!["h1", "h2", "h3"]);
    }

    #[tokio::test]
    async fn test_stops_when_next_not_called() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let layers = vec![
            recorder(&log, "h1", false),
            recorder(&log, "h2", true),
            recorder(&log, "h3", true),
        ];
        let ctx = context();
        assert_eq!(run(&layers, &ctx).await, ChainOutcome::Halted);
        assert_eq!(*log.lock(), vec!["h1"]);
        assert!(!ctx.res.is_ended());
    }

    #[tokio::test]
    async fn test_next_waits_for_handler_completion() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let slow_log = log.clone();
        let layers = vec![
            handler(move |_req, _res, next, _server| {
                let log = slow_log.clone();
                async move {
                    next.advance();
                    tokio::task::yield_now().await;
                    log.lock().push("h1 done");
                    Ok(())
                }
            }),
            recorder(&log, "h2", false),
        ];
        let ctx = context();
        run(&layers, &ctx).await;
        assert_eq!(*log.lock(), vec!["h1 done", "h2"]);
    }

    #[tokio::test]
    async fn test_double_next_runs_following_handler_once() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let layers = vec![
            handler(|_req, _res, next, _server| async move {
                next.advance();
                next.advance();
                Ok(())
            }),
            recorder(&log, "h2", false),
            recorder(&log, "h3", false),
        ];
        let ctx = context();
        assert_eq!(run(&layers, &ctx).await, ChainOutcome::Halted);
        assert_eq!(*log.lock(), vec!["h2"]);
    }

    #[tokio::test]
    async fn test_error_and_panic_fault_the_chain() {
        let failing = vec![handler(|_req, _res, _next, _server| async move {
            Err(Error::status(409, "conflict"))
        })];
        let ctx = context();
        assert_eq!(run(&failing, &ctx).await, ChainOutcome::Faulted);
        assert_eq!(ctx.faults().first, Some((409, "conflict".to_string())));

        let panicking = vec![handler(|req, _res, _next, _server| async move {
            if req.path() == "/" {
                panic!("kaboom");
            }
            Ok(())
        })];
        let ctx = context();
        assert_eq!(run(&panicking, &ctx).await, ChainOutcome::Faulted);
        let faults = ctx.faults();
        assert_eq!(faults.count, 1);
        assert!(faults.first.unwrap().1.contains("kaboom"));
    }
}
