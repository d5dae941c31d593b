// SPDX-License-Identifier: MIT OR Apache-2.0
//! tb-dispatch
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! The Handler contract and dispatch table (spec.md §4.5).
//!
//! The source system resolves handlers by dynamic `module.symbol` lookup at
//! runtime. Per the redesign note in spec.md §9 this becomes a static
//! **registration table** populated at startup by each handler module;
//! failure to register a name the Registry declares is a load-time error,
//! matching the Registry's own load-time strictness (spec.md §4.1).

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tb_core::{HandlerContext, HandlerOutcome};
use tb_error::{ErrorCode, TbError};

/// The Handler contract (spec.md §4.5/§6): an asynchronous function from
/// validated input and read-only context to a tagged outcome.
///
/// A handler must be pure with respect to the core: it may only touch
/// external state it owns, and it must never mutate the queue or receipts
/// directly — the Worker is solely responsible for persistence.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Execute the tool against already-schema-validated `input`.
    async fn call(&self, input: Value, ctx: HandlerContext) -> HandlerOutcome;
}

/// Blanket impl so a plain async closure can be registered directly,
/// mirroring how `abp-runtime::Runtime::register_backend` accepts bare
/// backend values rather than requiring a wrapper type.
#[async_trait]
impl<F, Fut> Handler for F
where
    F: Fn(Value, HandlerContext) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = HandlerOutcome> + Send,
{
    async fn call(&self, input: Value, ctx: HandlerContext) -> HandlerOutcome {
        (self)(input, ctx).await
    }
}

/// Split a dotted tool name into the `(module, symbol)` pair the source
/// system's dynamic dispatch would have used: the first segment is the
/// module, the remaining segments joined by `_` are the exported symbol.
///
/// `integrations.highlevel.sync_contacts` → `("integrations",
/// "highlevel_sync_contacts")`. Exposed for diagnostics and for handler
/// crates that want to name their registration constants consistently;
/// the [`Dispatcher`] itself keys its table by the full tool name.
#[must_use]
pub fn module_symbol(tool_name: &str) -> Option<(String, String)> {
    let mut segments = tool_name.split('.');
    let module = segments.next()?;
    let rest: Vec<&str> = segments.collect();
    if rest.is_empty() {
        return None;
    }
    Some((module.to_string(), rest.join("_")))
}

/// A static table mapping tool names to their [`Handler`].
#[derive(Clone, Default)]
pub struct Dispatcher {
    handlers: HashMap<String, Arc<dyn Handler>>,
}

impl Dispatcher {
    /// Start building a dispatch table.
    #[must_use]
    pub fn builder() -> DispatcherBuilder {
        DispatcherBuilder::default()
    }

    /// Resolve `tool_name` to its handler.
    ///
    /// # Errors
    ///
    /// Returns `TbError { code: HandlerNotFound }` — a worker-side fault,
    /// not a handler fault, per spec.md §4.5.
    pub fn resolve(&self, tool_name: &str) -> Result<Arc<dyn Handler>, TbError> {
        self.handlers.get(tool_name).cloned().ok_or_else(|| {
            let (module, symbol) = module_symbol(tool_name).unwrap_or_default();
            tracing::warn!(tool_name, module, symbol, "no handler registered for this tool name");
            TbError::new(
                ErrorCode::HandlerNotFound,
                format!("no handler registered for `{tool_name}`"),
            )
        })
    }

    /// Number of registered handlers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// `true` when nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

/// Builder for [`Dispatcher`]; each handler module calls
/// [`DispatcherBuilder::register`] at startup.
#[derive(Default)]
pub struct DispatcherBuilder {
    handlers: HashMap<String, Arc<dyn Handler>>,
}

impl DispatcherBuilder {
    /// Register a handler under a tool name. Registering the same name
    /// twice is a startup bug; the second registration silently replaces
    /// the first is never acceptable here, so this panics rather than
    /// masking it — mirroring the Registry's "never mask" load policy.
    #[must_use]
    pub fn register(mut self, tool_name: impl Into<String>, handler: impl Handler + 'static) -> Self {
        let tool_name = tool_name.into();
        if self.handlers.contains_key(&tool_name) {
            panic!("duplicate handler registration for `{tool_name}`");
        }
        self.handlers.insert(tool_name, Arc::new(handler));
        self
    }

    /// Finish building the dispatch table.
    #[must_use]
    pub fn build(self) -> Dispatcher {
        Dispatcher {
            handlers: self.handlers,
        }
    }
}
