// Handlers, chain layers and the `next` continuation

use crate::logging::warn;
use crate::params::Params;
use crate::{Error, Request, Response, Router, Server};
use async_trait::async_trait;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// A terminal step of a handler chain.
///
/// The handler decides whether the chain continues: it either writes the
/// response, or calls [`Next::advance`] before returning. Returning an error
/// hands it to the server-wide error callback and stops the chain.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn call(
        &self,
        req: Request,
        res: Response,
        next: Next,
        server: Server,
    ) -> Result<(), Error>;
}

/// Adapter turning an async closure into a [`Handler`].
pub struct FnHandler<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> Handler for FnHandler<F>
where
    F: Fn(Request, Response, Next, Server) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), Error>> + Send + 'static,
{
    async fn call(
        &self,
        req: Request,
        res: Response,
        next: Next,
        server: Server,
    ) -> Result<(), Error> {
        (self.f)(req, res, next, server).await
    }
}

/// Wrap an async closure as a chain layer.
///
/// ```ignore
/// router.get("/ping", handler(|_req, res, _next, _server| async move {
///     res.send("pong");
///     Ok(())
/// }));
/// ```
pub fn handler<F, Fut>(f: F) -> Layer
where
    F: Fn(Request, Response, Next, Server) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), Error>> + Send + 'static,
{
    Layer::Terminal(Arc::new(FnHandler { f }))
}

/// One slot of a handler chain.
#[derive(Clone)]
pub enum Layer {
    Terminal(Arc<dyn Handler>),
    /// A router mounted in the chain; dispatch recurses into its routes.
    Mounted(Arc<Router>),
}

impl Layer {
    pub fn from_handler<H: Handler + 'static>(handler: H) -> Self {
        Layer::Terminal(Arc::new(handler))
    }

    pub fn is_router(&self) -> bool {
        matches!(self, Layer::Mounted(_))
    }
}

impl fmt::Debug for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Layer::Terminal(_) => f.write_str("Layer::Terminal"),
            Layer::Mounted(router) => f
                .debug_tuple("Layer::Mounted")
                .field(&router.len())
                .finish(),
        }
    }
}

impl From<Router> for Layer {
    fn from(router: Router) -> Self {
        Layer::Mounted(Arc::new(router))
    }
}

impl From<Arc<Router>> for Layer {
    fn from(router: Arc<Router>) -> Self {
        Layer::Mounted(router)
    }
}

/// Anything that can be registered as a list of layers.
pub trait IntoLayers {
    fn into_layers(self) -> Vec<Layer>;
}

impl IntoLayers for Layer {
    fn into_layers(self) -> Vec<Layer> {
        vec![self]
    }
}

impl IntoLayers for Router {
    fn into_layers(self) -> Vec<Layer> {
        vec![self.into()]
    }
}

impl IntoLayers for Vec<Layer> {
    fn into_layers(self) -> Vec<Layer> {
        self
    }
}

impl<const N: usize> IntoLayers for [Layer; N] {
    fn into_layers(self) -> Vec<Layer> {
        self.into()
    }
}

/// Continuation passed to every handler.
///
/// Calling [`advance`](Self::advance) lets the chain move on once the current
/// handler returns. Only the first call counts; later calls are logged and
/// ignored, so the next handler never runs twice.
#[derive(Clone)]
pub struct Next {
    inner: Arc<NextInner>,
}

struct NextInner {
    index: usize,
    req: Request,
    fired: AtomicBool,
}

impl Next {
    pub(crate) fn new(index: usize, req: Request) -> Self {
        Self {
            inner: Arc::new(NextInner {
                index,
                req,
                fired: AtomicBool::new(false),
            }),
        }
    }

    /// Let the chain continue with the following handler.
    pub fn advance(&self) -> bool {
        self.fire()
    }

    /// Merge `params` into the request, then continue.
    pub fn advance_with(&self, params: Params) -> bool {
        if !self.fire() {
            return false;
        }
        self.inner.req.add_params(params);
        true
    }

    /// Position of the handler this continuation belongs to.
    pub fn index(&self) -> usize {
        self.inner.index
    }

    pub fn is_called(&self) -> bool {
        self.inner.fired.load(Ordering::Acquire)
    }

    fn fire(&self) -> bool {
        let first = self
            .inner
            .fired
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if !first {
            warn!(index = self.inner.index, "next() called more than once, ignored");
        }
        first
    }
}

impl fmt::Debug for Next {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Next")
            .field("index", &self.inner.index)
            .field("called", &self.is_called())
            .finish()
    }
}
