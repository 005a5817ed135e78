use std::{any::Any, collections::HashMap, fmt, sync::Arc};

/// Request-scoped data handed to every hook, loader and security filter.
///
/// Carries the caller's principal plus arbitrary typed extensions (for
/// example a tenant id or a handle to a lookup service).
#[derive(Clone, Default)]
pub struct ExecutionContext {
    principal: Option<String>,
    roles: Vec<String>,
    extensions: HashMap<std::any::TypeId, Arc<dyn Any + Send + Sync>>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Context for an authenticated caller.
    pub fn for_principal(principal: impl Into<String>) -> Self {
        Self {
            principal: Some(principal.into()),
            ..Self::default()
        }
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.roles.push(role.into());
        self
    }

    /// Stores a typed extension, replacing any previous value of the same type.
    pub fn with_extension<T>(mut self, value: T) -> Self
    where
        T: Any + Send + Sync,
    {
        self.extensions.insert(std::any::TypeId::of::<T>(), Arc::new(value));
        self
    }

    pub fn principal(&self) -> Option<&str> {
        self.principal.as_deref()
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|candidate| candidate == role)
    }

    pub fn extension<T>(&self) -> Option<&T>
    where
        T: Any + Send + Sync,
    {
        self.extensions
            .get(&std::any::TypeId::of::<T>())
            .and_then(|value| value.downcast_ref::<T>())
    }
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("principal", &self.principal)
            .field("roles", &self.roles)
            .field("extensions", &self.extensions.len())
            .finish()
    }
}
