//! Cache key shapes and scoping.

/// How cache keys are scoped beyond the entity type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum KeyScope {
    /// Shared by every caller (data access cache).
    Plain,
    /// Isolated per execution context token (data portal cache).
    Context(String),
}

/// Builds the three key shapes for one entity type under one scope.
///
/// - model: `M:{type}:{identity}`
/// - query: `S:{type}:{sql}` with the trimmed literal SQL text
/// - relation: `R:{type}:{identity}`
///
/// Context-scoped keys carry a trailing `:C{token}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheKeys {
    type_name: &'static str,
    scope: KeyScope,
}

impl CacheKeys {
    pub fn new(type_name: &'static str, scope: KeyScope) -> Self {
        Self { type_name, scope }
    }

    pub fn scope(&self) -> &KeyScope {
        &self.scope
    }

    pub fn model(&self, identity: &str) -> String {
        self.scoped(format!("M:{}:{identity}", self.type_name))
    }

    pub fn query(&self, sql: &str) -> String {
        self.scoped(format!("S:{}:{}", self.type_name, sql.trim()))
    }

    pub fn relation(&self, identity: &str) -> String {
        self.scoped(format!("R:{}:{identity}", self.type_name))
    }

    fn scoped(&self, key: String) -> String {
        match &self.scope {
            KeyScope::Plain => key,
            KeyScope::Context(token) => format!("{key}:C{token}"),
        }
    }
}
