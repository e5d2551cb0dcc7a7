//! Shared interpreter state.

use crate::config::VmConfig;
use relay_core::{Exception, Value};
use rustc_hash::FxHashMap;
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::Arc;

/// Host stack kept free before entering another guest activation.
const STACK_RED_ZONE: usize = 128 * 1024;

/// Size of each host stack segment allocated once the red zone is reached.
const STACK_SEGMENT: usize = 2 * 1024 * 1024;

/// Run `f` with at least [`STACK_RED_ZONE`] bytes of host stack, switching
/// to a fresh segment when the current one runs low. Nested guest calls
/// recurse on the host, so `recursion_limit` alone does not bound host
/// stack use.
pub(crate) fn with_stack<R>(f: impl FnOnce() -> R) -> R {
    stacker::maybe_grow(STACK_RED_ZONE, STACK_SEGMENT, f)
}

/// State shared by every function and generator of one VM: the module
/// globals, the configuration and the current call depth.
#[derive(Debug)]
pub struct VmContext {
    globals: RefCell<FxHashMap<Arc<str>, Value>>,
    config: VmConfig,
    depth: Cell<usize>,
}

impl VmContext {
    /// A context with no globals.
    pub fn new(config: VmConfig) -> Rc<Self> {
        Rc::new(Self {
            globals: RefCell::new(FxHashMap::default()),
            config,
            depth: Cell::new(0),
        })
    }

    /// Configuration.
    #[inline]
    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    /// Look up a global.
    pub fn global(&self, name: &str) -> Option<Value> {
        self.globals.borrow().get(name).cloned()
    }

    /// Bind a global, returning the previous value.
    pub fn set_global(&self, name: impl Into<Arc<str>>, value: Value) -> Option<Value> {
        self.globals.borrow_mut().insert(name.into(), value)
    }

    /// Remove every global. The map is emptied before the old values are
    /// dropped so their destructors may run guest code.
    pub fn clear_globals(&self) {
        let old = std::mem::take(&mut *self.globals.borrow_mut());
        drop(old);
    }

    /// Current call depth.
    #[inline]
    pub fn depth(&self) -> usize {
        self.depth.get()
    }

    /// Enter one level of guest execution.
    pub fn enter(&self) -> Result<DepthGuard<'_>, Exception> {
        let depth = self.depth.get();
        if depth >= self.config.recursion_limit {
            return Err(Exception::recursion(self.config.recursion_limit));
        }
        self.depth.set(depth + 1);
        Ok(DepthGuard { ctx: self })
    }
}

/// Leaves the call level on drop.
#[derive(Debug)]
pub struct DepthGuard<'a> {
    ctx: &'a VmContext,
}

impl Drop for DepthGuard<'_> {
    fn drop(&mut self) {
        self.ctx.depth.set(self.ctx.depth.get().saturating_sub(1));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_core::ExceptionKind;

    #[test]
    fn test_depth_guard() {
        let ctx = VmContext::new(VmConfig::default().with_recursion_limit(2));
        let a = ctx.enter().unwrap();
        let b = ctx.enter().unwrap();
        assert_eq!(ctx.depth(), 2);
        let err = ctx.enter().unwrap_err();
        assert!(err.is(&ExceptionKind::RecursionError));
        drop(b);
        drop(a);
        assert_eq!(ctx.depth(), 0);
    }

    #[test]
    fn test_globals() {
        let ctx = VmContext::new(VmConfig::default());
        assert!(ctx.set_global("x", Value::Int(1)).is_none());
        assert_eq!(ctx.global("x"), Some(Value::Int(1)));
        ctx.clear_globals();
        assert_eq!(ctx.global("x"), None);
    }
}
