//! Processing lifecycle hooks.
//!
//! The start hook wraps every dispatch: it receives the transport id, the
//! dispatch context and a `done` future that performs the actual handler
//! invocation. The default hook just awaits `done`. A hook can run code
//! before and after it (for example to enter a tracing span or an async-local
//! scope) or decide not to run it at all.
//!
//! The end hook fires once per dispatch after the handler's output is fully
//! consumed.

use std::future::Future;
use std::sync::Arc;

use courier_core::RpcContext;
use futures::future::BoxFuture;

/// Identifier of the transport a dispatch arrived on.
pub type TransportId = Arc<str>;

/// The deferred handler invocation handed to the start hook.
pub type ProcessingDone = BoxFuture<'static, ()>;

/// Start hook signature.
pub type StartHook =
    Arc<dyn Fn(TransportId, RpcContext, ProcessingDone) -> BoxFuture<'static, ()> + Send + Sync>;

/// End hook signature.
pub type EndHook = Arc<dyn Fn(&str, &RpcContext) + Send + Sync>;

/// The pair of hooks a server runs around each dispatch.
#[derive(Clone)]
pub(crate) struct Hooks {
    pub(crate) start: StartHook,
    pub(crate) end: EndHook,
}

impl Default for Hooks {
    fn default() -> Self {
        Self {
            start: Arc::new(|_: TransportId, _: RpcContext, done: ProcessingDone| done),
            end: Arc::new(|_: &str, _: &RpcContext| {}),
        }
    }
}

impl Hooks {
    pub(crate) fn set_start<F, Fut>(&mut self, hook: F)
    where
        F: Fn(TransportId, RpcContext, ProcessingDone) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.start = Arc::new(
            move |id: TransportId, ctx: RpcContext, done: ProcessingDone| -> BoxFuture<'static, ()> {
                Box::pin(hook(id, ctx, done))
            },
        );
    }

    pub(crate) fn set_end<F>(&mut self, hook: F)
    where
        F: Fn(&str, &RpcContext) + Send + Sync + 'static,
    {
        self.end = Arc::new(hook);
    }
}
