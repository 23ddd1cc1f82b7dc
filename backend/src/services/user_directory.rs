//! Resolves the authenticated caller into a [`UserContext`].

use async_trait::async_trait;
use std::collections::HashMap;

use crate::models::user::UserContext;

/// Lookup used by the auth middleware.
///
/// Use `MockUserResolver` in tests to control the outcome.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UserResolver: Send + Sync {
    async fn resolve(&self, user_id: &str) -> Option<UserContext>;
}

/// Fixed set of known users, keyed by id.
#[derive(Debug, Clone, Default)]
pub struct StaticUserResolver {
    users: HashMap<String, UserContext>,
}

impl StaticUserResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user(mut self, user: UserContext) -> Self {
        if let Some(id) = user.id.clone() {
            self.users.insert(id, user);
        } else {
            tracing::warn!("Ignoring user without id");
        }
        self
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

#[async_trait]
impl UserResolver for StaticUserResolver {
    async fn resolve(&self, user_id: &str) -> Option<UserContext> {
        self.users.get(user_id).cloned()
    }
}
