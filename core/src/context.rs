//! Host application context
//!
//! The host hands the agent an opaque context when it initializes. The
//! monitor only needs it to name the application in connection checks.

use std::sync::{Arc, PoisonError, RwLock};

/// Package name reported while no context has been supplied
pub const PACKAGE_NAME_UNAVAILABLE: &str = "package name unavailable: context not set";

/// What the agent needs to know about its host application
pub trait AppContext: Send + Sync {
    /// Package or application name of the host
    fn package_name(&self) -> String;
}

/// Context with a fixed package name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticContext {
    package_name: String,
}

impl StaticContext {
    pub fn new(package_name: impl Into<String>) -> Self {
        Self {
            package_name: package_name.into(),
        }
    }
}

impl AppContext for StaticContext {
    fn package_name(&self) -> String {
        self.package_name.clone()
    }
}

/// Slot the context is stored in once `init` runs
#[derive(Default)]
pub struct ContextSlot {
    inner: RwLock<Option<Arc<dyn AppContext>>>,
}

impl ContextSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store (or replace) the context
    pub fn set(&self, context: Arc<dyn AppContext>) {
        let mut slot = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        *slot = Some(context);
    }

    /// Current context, if any
    pub fn get(&self) -> Option<Arc<dyn AppContext>> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Package name of the current context, or a placeholder
    pub fn package_name(&self) -> String {
        self.get()
            .map(|ctx| ctx.package_name())
            .unwrap_or_else(|| PACKAGE_NAME_UNAVAILABLE.to_string())
    }
}

impl std::fmt::Debug for ContextSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextSlot")
            .field("package_name", &self.package_name())
            .finish()
    }
}
