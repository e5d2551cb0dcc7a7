//! Host-facing virtual machine.

use crate::builtins::{self, ExceptionClass};
use crate::config::VmConfig;
use crate::context::VmContext;
use crate::error::{VmError, VmResult};
use crate::function::Function;
use crate::generator::GeneratorObject;
use relay_compiler::ast::Module;
use relay_compiler::compile_module;
use relay_core::{ExceptionKind, Value};
use std::rc::Rc;
use tracing::{debug, info};

/// The relay virtual machine.
///
/// Owns one [`VmContext`]: the globals every loaded function and generator
/// resolves names against. Builtins and the builtin exception classes are
/// bound on construction.
///
/// Functions hold a reference back to the context through their globals,
/// so dropping the VM clears the globals to release them.
#[derive(Debug)]
pub struct VirtualMachine {
    ctx: Rc<VmContext>,
}

impl VirtualMachine {
    /// Create a VM with builtins installed.
    pub fn new(config: VmConfig) -> Self {
        let ctx = VmContext::new(config);
        builtins::install(&ctx);
        Self { ctx }
    }

    /// The shared context.
    #[inline]
    pub fn context(&self) -> &Rc<VmContext> {
        &self.ctx
    }

    /// Compile `module` and bind each function as a global.
    ///
    /// Nothing is bound if any function fails to compile.
    pub fn load(&mut self, module: &Module) -> VmResult<()> {
        let codes = compile_module(module, &self.ctx.config().compiler)?;
        for code in codes {
            debug!(function = %code.name, generator = code.is_generator(), "loaded");
            let name = code.name.clone();
            let function = Function::new(Rc::new(code), Rc::clone(&self.ctx));
            self.ctx.set_global(name, Value::object(function));
        }
        info!(functions = module.functions.len(), "module loaded");
        Ok(())
    }

    /// Call the global `name`.
    pub fn call(&self, name: &str, args: Vec<Value>) -> VmResult<Value> {
        let callee = self
            .ctx
            .global(name)
            .ok_or_else(|| VmError::UndefinedGlobal(name.to_string()))?;
        Ok(relay_core::protocol::call(&callee, args)?)
    }

    /// Call the generator function `name` and return the generator object.
    pub fn generator(&self, name: &str, args: Vec<Value>) -> VmResult<Rc<GeneratorObject>> {
        let callee = self
            .ctx
            .global(name)
            .ok_or_else(|| VmError::UndefinedGlobal(name.to_string()))?;
        let function = callee
            .downcast_ref::<Function>()
            .filter(|f| f.is_generator())
            .ok_or_else(|| VmError::NotAGenerator(name.to_string()))?;
        Ok(function.spawn(args)?)
    }

    /// Look up a global.
    pub fn global(&self, name: &str) -> Option<Value> {
        self.ctx.global(name)
    }

    /// Bind a global.
    pub fn set_global(&self, name: &str, value: Value) {
        self.ctx.set_global(name, value);
    }

    /// Define a user exception class deriving from `Exception`.
    pub fn define_exception(&self, name: &str) -> ExceptionKind {
        let kind = ExceptionKind::Custom(name.into());
        self.ctx
            .set_global(name, Value::object(ExceptionClass::new(kind.clone())));
        kind
    }
}

impl Default for VirtualMachine {
    fn default() -> Self {
        Self::new(VmConfig::default())
    }
}

impl Drop for VirtualMachine {
    fn drop(&mut self) {
        self.ctx.clear_globals();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_RECURSION_LIMIT;
    use relay_compiler::ast::{CmpOp, Expr, FunctionDef, Stmt};
    use relay_core::{Exception, IterResult};

    fn vm_with(functions: Vec<FunctionDef>) -> VirtualMachine {
        let mut vm = VirtualMachine::default();
        vm.load(&Module::new(functions)).unwrap();
        vm
    }

    #[test]
    fn test_call_global_function() {
        let vm = vm_with(vec![FunctionDef::new(
            "double",
            &["x"],
            vec![Stmt::return_value(Expr::mul(Expr::name("x"), Expr::int(2)))],
        )]);
        assert_eq!(vm.call("double", vec![Value::Int(21)]).unwrap(), Value::Int(42));
    }

    #[test]
    fn test_generator_lookup_errors() {
        let vm = vm_with(vec![FunctionDef::new("f", &[], vec![Stmt::return_none()])]);
        assert!(matches!(vm.generator("f", vec![]), Err(VmError::NotAGenerator(_))));
        assert!(matches!(vm.generator("nope", vec![]), Err(VmError::UndefinedGlobal(_))));
        assert!(matches!(vm.call("nope", vec![]), Err(VmError::UndefinedGlobal(_))));
    }

    #[test]
    fn test_generator_handle() {
        let vm = vm_with(vec![FunctionDef::new(
            "g",
            &[],
            vec![Stmt::expr(Expr::yield_value(Expr::int(1)))],
        )]);
        let g = vm.generator("g", vec![]).unwrap();
        assert_eq!(g.advance().unwrap(), IterResult::Yielded(Value::Int(1)));
    }

    #[test]
    fn test_custom_exception_is_catchable_as_exception() {
        let vm = VirtualMachine::default();
        let kind = vm.define_exception("Boom");
        let exc = Exception::new(kind, "");
        assert!(exc.matches(&ExceptionKind::Exception));
        assert!(vm.global("Boom").is_some());
    }

    #[test]
    fn test_recursion_near_the_limit() {
        // def down(n):
        //     if n == 0: return 0
        //     return down(n - 1) + 1
        let vm = vm_with(vec![FunctionDef::new(
            "down",
            &["n"],
            vec![
                Stmt::if_else(
                    Expr::compare(CmpOp::Eq, Expr::name("n"), Expr::int(0)),
                    vec![Stmt::return_value(Expr::int(0))],
                    vec![],
                ),
                Stmt::return_value(Expr::add(
                    Expr::call("down", vec![Expr::sub(Expr::name("n"), Expr::int(1))]),
                    Expr::int(1),
                )),
            ],
        )]);
        let limit = DEFAULT_RECURSION_LIMIT as i64;

        let below = vm.call("down", vec![Value::Int(limit - 10)]).unwrap();
        assert_eq!(below, Value::Int(limit - 10));

        let err = vm.call("down", vec![Value::Int(limit + 10)]).unwrap_err();
        assert!(err.exception().is_some_and(|e| e.is(&ExceptionKind::RecursionError)));
    }

    #[test]
    fn test_failed_load_binds_nothing() {
        let mut vm = VirtualMachine::default();
        let module = Module::new(vec![
            FunctionDef::new("ok", &[], vec![Stmt::return_none()]),
            FunctionDef::new("bad", &[], vec![Stmt::break_loop()]),
        ]);
        assert!(matches!(vm.load(&module), Err(VmError::Compile(_))));
        assert!(vm.global("ok").is_none());
    }
}
