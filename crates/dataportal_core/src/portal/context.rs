//! Execution context tokens scoping the portal cache.

use crate::cache::KeyScope;
use uuid::Uuid;

/// Explicit request scope for portal cache keys.
///
/// Callers thread one context through the calls that belong to the same
/// logical request; portals in different contexts never share cached entries.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExecutionContext {
    token: String,
}

impl ExecutionContext {
    /// Fresh context with a random token.
    pub fn new() -> Self {
        Self {
            token: Uuid::new_v4().simple().to_string(),
        }
    }

    /// Context with a caller-chosen token (e.g. a request id).
    pub fn named(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub(crate) fn scope(&self) -> KeyScope {
        KeyScope::Context(self.token.clone())
    }
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::new()
    }
}
