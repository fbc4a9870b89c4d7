//! Request-Context Registry (C3, spec.md §4.3): a cancellation handle and
//! credential snapshot scoped to exactly one JSON-RPC dispatch.
//!
//! Two complementary mechanisms, per spec.md §9 "Ambient request context":
//! an ambient scope (a `tokio::task_local!` value bag downstream handlers
//! read without explicit threading) and an explicit registry keyed by
//! `request_id` so `notifications/cancelled` can find the live handler.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use mcpgate_auth::ResolvedAuth;
use mcpgate_core::{GateError, GateResult};
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// A cooperative cancellation handle. `cancel` fires every registered
/// listener at-most-once, in registration order, on the cancelling task,
/// then clears the listener list (spec.md §4.3).
#[derive(Clone)]
pub struct CancellationHandle {
    token: CancellationToken,
    reason: Arc<Mutex<Option<String>>>,
    #[allow(clippy::type_complexity)]
    listeners: Arc<Mutex<Vec<Box<dyn FnOnce(Option<String>) + Send>>>>,
}

impl CancellationHandle {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            reason: Arc::new(Mutex::new(None)),
            listeners: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn cancel(&self, reason: Option<String>) {
        *self.reason.lock() = reason.clone();
        self.token.cancel();
        let fired: Vec<_> = std::mem::take(&mut *self.listeners.lock());
        for listener in fired {
            listener(reason.clone());
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Registers `listener` to run once cancellation happens. If already
    /// cancelled, fires immediately instead of queuing.
    pub fn on_cancelled(&self, listener: impl FnOnce(Option<String>) + Send + 'static) {
        if self.is_cancelled() {
            listener(self.reason.lock().clone());
            return;
        }
        self.listeners.lock().push(Box::new(listener));
    }

    pub fn throw_if_cancelled(&self) -> GateResult<()> {
        if self.is_cancelled() {
            Err(GateError::cancelled())
        } else {
            Ok(())
        }
    }

    /// Resolves once `cancel` has been called; await this at suspension
    /// points instead of polling `is_cancelled` (spec.md §5).
    pub async fn cancelled(&self) {
        self.token.cancelled().await;
    }
}

impl Default for CancellationHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Request Context (spec.md §3): lifetime is a single JSON-RPC request, torn
/// down on response close, exception, or cancellation.
#[derive(Clone)]
pub struct RequestContext {
    pub request_id: String,
    pub session_id: Option<String>,
    pub cancellation: CancellationHandle,
    pub timestamp: DateTime<Utc>,
    pub auth: ResolvedAuth,
}

tokio::task_local! {
    static CURRENT: RequestContext;
}

impl RequestContext {
    /// Runs `f` with `self` as the ambient context; nested scopes (a handler
    /// calling another handler) inherit, shadowing only for their own
    /// subtree (spec.md §4.3 "nested scopes inherit; overwrites are
    /// stack-scoped to the nesting").
    pub async fn scope<F: Future>(self, f: F) -> F::Output {
        CURRENT.scope(self, f).await
    }

    /// The ambient context for the current task tree, if any. Readers
    /// outside any scope see `None`.
    pub fn try_current() -> Option<RequestContext> {
        CURRENT.try_with(Clone::clone).ok()
    }
}

/// Explicit registry keyed by `request_id` (spec.md §4.3 item 2).
pub struct ContextRegistry {
    contexts: DashMap<String, RequestContext>,
}

impl Default for ContextRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ContextRegistry {
    pub fn new() -> Self {
        Self {
            contexts: DashMap::new(),
        }
    }

    pub fn create(&self, request_id: String, session_id: Option<String>, auth: ResolvedAuth) -> RequestContext {
        let ctx = RequestContext {
            request_id: request_id.clone(),
            session_id,
            cancellation: CancellationHandle::new(),
            timestamp: Utc::now(),
            auth,
        };
        self.contexts.insert(request_id, ctx.clone());
        ctx
    }

    pub fn get(&self, request_id: &str) -> Option<RequestContext> {
        self.contexts.get(request_id).map(|e| e.clone())
    }

    /// Looks up the cancellation handle and invokes `cancel(reason)`.
    /// Returns whether a live context was found (an unknown `request_id` is
    /// logged at debug and silently accepted by the caller, spec.md §4.7).
    pub fn cancel(&self, request_id: &str, reason: Option<String>) -> bool {
        match self.contexts.get(request_id) {
            Some(ctx) => {
                ctx.cancellation.cancel(reason);
                true
            }
            None => false,
        }
    }

    pub fn delete(&self, request_id: &str) -> bool {
        self.contexts.remove(request_id).is_some()
    }

    pub fn delete_by_session(&self, session_id: &str) -> usize {
        let ids: Vec<String> = self
            .contexts
            .iter()
            .filter(|e| e.session_id.as_deref() == Some(session_id))
            .map(|e| e.request_id.clone())
            .collect();
        for id in &ids {
            self.contexts.remove(id);
        }
        ids.len()
    }

    /// Safety-net sweep (spec.md §4.3, §5: every 60 s, `max_age` 10 min). A
    /// nonzero eviction count signals a leaked context upstream and is
    /// logged by the caller at warning.
    pub fn cleanup_expired(&self, max_age: chrono::Duration) -> usize {
        let now = Utc::now();
        let stale: Vec<String> = self
            .contexts
            .iter()
            .filter(|e| now - e.timestamp > max_age)
            .map(|e| e.request_id.clone())
            .collect();
        for id in &stale {
            self.contexts.remove(id);
        }
        stale.len()
    }

    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }
}

/// Background sweep task (spec.md §5): 60 s period, 10 min max age.
pub fn spawn_sweeper(registry: Arc<ContextRegistry>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(60));
        loop {
            interval.tick().await;
            let evicted = registry.cleanup_expired(chrono::Duration::minutes(10));
            if evicted > 0 {
                tracing::warn!(evicted, "request-context sweep evicted stale contexts, possible leak upstream");
            }
        }
    })
}
