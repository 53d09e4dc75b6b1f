//! Work handlers and their registry.
//!
//! A handler turns one [`WorkRequest`] into a JSON result. The registry
//! holds at most one handler per [`WorkKind`]; the dispatcher looks the
//! handler up when it admits an item.

pub mod completion;
pub mod synthesis;

pub use completion::CompletionHandler;
pub use synthesis::SynthesisHandler;

use crate::error::Result;
use crate::model::{WorkKind, WorkRequest};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Boxed future returned by [`WorkHandler::handle`].
pub type HandlerFuture<'a> = Pin<Box<dyn Future<Output = Result<serde_json::Value>> + Send + 'a>>;

/// Executes one kind of work.
pub trait WorkHandler: Send + Sync + 'static {
    fn handle(&self, request: WorkRequest) -> HandlerFuture<'_>;
}

/// Adapter from an async closure. See [`handler_fn`].
pub struct FnHandler<F>(F);

/// Wrap an async closure as a [`WorkHandler`].
pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(WorkRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<serde_json::Value>> + Send + 'static,
{
    FnHandler(f)
}

impl<F, Fut> WorkHandler for FnHandler<F>
where
    F: Fn(WorkRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<serde_json::Value>> + Send + 'static,
{
    fn handle(&self, request: WorkRequest) -> HandlerFuture<'_> {
        Box::pin((self.0)(request))
    }
}

/// Handlers indexed by kind.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<WorkKind, Arc<dyn WorkHandler>>,
}

impl HandlerRegistry {
    /// Create an empty registry with no handlers.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Install the handler for `kind`, returning the one it replaced.
    pub fn register(
        &mut self,
        kind: WorkKind,
        handler: impl WorkHandler,
    ) -> Option<Arc<dyn WorkHandler>> {
        self.handlers.insert(kind, Arc::new(handler))
    }

    /// Builder form of [`register`](Self::register).
    pub fn with(mut self, kind: WorkKind, handler: impl WorkHandler) -> Self {
        self.register(kind, handler);
        self
    }

    /// Look up the handler for a kind.
    pub fn get(&self, kind: WorkKind) -> Option<Arc<dyn WorkHandler>> {
        self.handlers.get(&kind).cloned()
    }

    pub fn contains(&self, kind: WorkKind) -> bool {
        self.handlers.contains_key(&kind)
    }
}
