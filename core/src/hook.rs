//! Pluggable call hooks
//!
//! A hook sees every call routed through [`Agent::intercept`] and may swap
//! the call's result. All methods default to no-ops.
//!
//! [`Agent::intercept`]: crate::agent::Agent::intercept

use crate::context::AppContext;
use std::any::Any;

/// Observer/rewriter for intercepted calls
pub trait ApiHook: Send + Sync {
    /// Called once the host supplies its context
    fn init(&self, _context: &dyn AppContext) {}

    /// Called before the intercepted call runs
    fn before_call(&self, _payload: &str) {}

    /// Called after the intercepted call returns.
    ///
    /// `result` can be downcast to the call's return type and overwritten.
    fn after_call(&self, _payload: &str, _result: &mut dyn Any) {}

    /// Called when the agent shuts down
    fn finalize(&self) {}
}

/// Hook that does nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHook;

impl ApiHook for NoopHook {}
