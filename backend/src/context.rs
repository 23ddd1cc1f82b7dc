//! Request-scoped "current request / current user" storage.
//!
//! Each request runs inside [`RequestContext::scope`], which installs a
//! task-local context for the lifetime of the wrapped future. Code further down
//! the call chain (model listeners, login pushes) reads it through the free
//! functions below without threading parameters. Spawned tasks do not inherit
//! the context; wrap them in their own scope if they need it.

use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::models::user::UserContext;

tokio::task_local! {
    static CURRENT_CONTEXT: RequestContext;
}

/// What the audit layer remembers about the request being handled.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestSnapshot {
    pub method: String,
    pub path: String,
    pub query: Option<String>,
    pub headers: BTreeMap<String, String>,
    pub secure: bool,
}

#[derive(Debug, Default)]
struct ContextState {
    request: Option<RequestSnapshot>,
    user: Option<UserContext>,
}

/// Context shared by everything running inside one request's scope.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    inner: Arc<Mutex<ContextState>>,
}

impl RequestContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `future` with this context installed as the current one.
    pub async fn scope<F>(self, future: F) -> F::Output
    where
        F: Future,
    {
        CURRENT_CONTEXT.scope(self, future).await
    }

    /// Synchronous counterpart of [`RequestContext::scope`].
    pub fn sync_scope<F, R>(self, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        CURRENT_CONTEXT.sync_scope(self, f)
    }

    /// Returns a guard that clears this context when dropped, whether the
    /// owner finished, failed, panicked or was cancelled.
    pub fn guard(&self) -> ContextGuard {
        ContextGuard {
            context: self.clone(),
        }
    }

    pub fn set_request(&self, request: RequestSnapshot) {
        self.state().request = Some(request);
    }

    pub fn request(&self) -> Option<RequestSnapshot> {
        self.state().request.clone()
    }

    pub fn set_user(&self, user: UserContext) {
        self.state().user = Some(user);
    }

    pub fn user(&self) -> Option<UserContext> {
        self.state().user.clone()
    }

    pub fn clear(&self) {
        let mut state = self.state();
        state.request = None;
        state.user = None;
    }

    fn state(&self) -> MutexGuard<'_, ContextState> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Clears its context on drop.
#[must_use = "the context is cleared as soon as the guard is dropped"]
#[derive(Debug)]
pub struct ContextGuard {
    context: RequestContext,
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        self.context.clear();
    }
}

fn with_current<R>(f: impl FnOnce(&RequestContext) -> R) -> Option<R> {
    CURRENT_CONTEXT.try_with(f).ok()
}

pub fn set_current_request(request: RequestSnapshot) {
    if with_current(|context| context.set_request(request)).is_none() {
        tracing::debug!("set_current_request called outside a request context");
    }
}

pub fn get_current_request() -> Option<RequestSnapshot> {
    with_current(RequestContext::request).flatten()
}

/// Records the authenticated user, even when no request has been set yet.
pub fn set_current_user(user: UserContext) {
    if with_current(|context| context.set_user(user)).is_none() {
        tracing::debug!("set_current_user called outside a request context");
    }
}

pub fn get_current_user() -> Option<UserContext> {
    with_current(RequestContext::user).flatten()
}

/// Drops the current request and user. Safe to call repeatedly.
pub fn clear() {
    with_current(RequestContext::clear);
}

/// `(user_id, user_info)` for the current user, or `("", {})` if there is none.
pub fn get_user_details() -> (String, Map<String, Value>) {
    match get_current_user() {
        Some(user) => user.details(),
        None => (String::new(), Map::new()),
    }
}
