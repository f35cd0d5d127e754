// Per-dispatch state threaded through chains and routers

use crate::logging::debug;
use crate::{Error, Request, Response, Server};
use parking_lot::Mutex;
use std::sync::Arc;

/// Everything one dispatch needs, passed by reference through every chain
/// and router it visits. Routers never store any of it.
#[derive(Clone)]
pub(crate) struct DispatchContext {
    pub req: Request,
    pub res: Response,
    pub server: Server,
    /// Part of the path consumed by enclosing mounts.
    pub mount_prefix: String,
    /// Path still to be resolved by the next router.
    pub path: String,
    /// True once dispatch entered a matched route.
    pub nested: bool,
    faults: Arc<Mutex<FaultLog>>,
}

/// Faults reported during one dispatch.
#[derive(Debug, Default, Clone)]
pub(crate) struct FaultLog {
    pub count: usize,
    pub first: Option<(u16, String)>,
}

impl DispatchContext {
    pub fn new(req: Request, res: Response, server: Server) -> Self {
        let path = req.path().to_string();
        Self {
            req,
            res,
            server,
            mount_prefix: String::new(),
            path,
            nested: false,
            faults: Arc::new(Mutex::new(FaultLog::default())),
        }
    }

    /// Context for the chain of a matched route.
    pub fn descend(&self, consumed: &str, remainder: String) -> Self {
        let mut child = self.clone();
        child.mount_prefix.push_str(consumed);
        child.path = remainder;
        child.nested = true;
        child
    }

    /// Record a fault and hand it to the error callback.
    pub async fn report(&self, err: Error) {
        {
            let mut faults = self.faults.lock();
            faults.count += 1;
            if faults.first.is_none() {
                faults.first = Some((err.status_code(), err.to_string()));
            }
        }
        debug!(
            error = %err,
            mount = %self.mount_prefix,
            "Reporting fault to error callback"
        );
        self.server
            .report_error(err, self.req.clone(), self.res.clone())
            .await;
    }

    pub fn faults(&self) -> FaultLog {
        self.faults.lock().clone()
    }
}
