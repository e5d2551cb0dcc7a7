//! Scope analysis for function bodies.
//!
//! Runs before code generation and answers three questions about a
//! [`FunctionDef`]:
//!
//! 1. Which names are locals? Parameters, assignment targets, `for`
//!    targets and `except ... as` names. Every other name is a module
//!    global.
//! 2. Which register does each local live in? Locals occupy the low
//!    registers, parameters first, in order of first appearance.
//! 3. Is the function a generator? It is exactly when the body contains a
//!    suspension point.

use crate::ast::{Expr, ExprKind, FunctionDef, Stmt, StmtKind};
use crate::bytecode::Register;
use rustc_hash::FxHashMap;
use std::sync::Arc;

/// Result of analyzing one function.
#[derive(Debug, Clone)]
pub struct FunctionScope {
    /// Local names; index is the register number.
    locals: Vec<Arc<str>>,
    /// Name to register.
    index: FxHashMap<Arc<str>, Register>,
    /// Number of leading locals that are parameters.
    param_count: usize,
    /// Whether the body contains `yield` / `yield from`.
    is_generator: bool,
}

impl FunctionScope {
    /// Analyze a function definition.
    pub fn analyze(def: &FunctionDef) -> Self {
        let mut scope = Self {
            locals: Vec::new(),
            index: FxHashMap::default(),
            param_count: def.params.len(),
            is_generator: false,
        };
        for param in &def.params {
            scope.declare(param);
        }
        scope.is_generator = contains_suspension(&def.body);
        scope.collect_block(&def.body);
        scope
    }

    fn declare(&mut self, name: &Arc<str>) {
        if self.index.contains_key(name) {
            return;
        }
        // Overflow is reported by the compiler against `local_count()`.
        let reg = Register(self.locals.len().min(u8::MAX as usize) as u8);
        self.index.insert(name.clone(), reg);
        self.locals.push(name.clone());
    }

    fn collect_block(&mut self, body: &[Stmt]) {
        for stmt in body {
            self.collect_stmt(stmt);
        }
    }

    fn collect_stmt(&mut self, stmt: &Stmt) {
        match &stmt.kind {
            StmtKind::Assign { target, .. } => {
                if let ExprKind::Name(name) = &target.kind {
                    self.declare(name);
                }
            }
            StmtKind::If { body, orelse, .. } => {
                self.collect_block(body);
                self.collect_block(orelse);
            }
            StmtKind::While { body, .. } => self.collect_block(body),
            StmtKind::For { target, body, .. } => {
                self.declare(target);
                self.collect_block(body);
            }
            StmtKind::Try {
                body,
                handlers,
                finalbody,
            } => {
                self.collect_block(body);
                for handler in handlers {
                    if let Some(name) = &handler.name {
                        self.declare(name);
                    }
                    self.collect_block(&handler.body);
                }
                self.collect_block(finalbody);
            }
            StmtKind::Expr(_)
            | StmtKind::Break
            | StmtKind::Continue
            | StmtKind::Return(_)
            | StmtKind::Raise(_)
            | StmtKind::Pass => {}
        }
    }

    /// Register holding a local, or `None` for globals.
    #[inline]
    pub fn lookup(&self, name: &str) -> Option<Register> {
        self.index.get(name).copied()
    }

    /// Local names in register order.
    #[inline]
    pub fn locals(&self) -> &[Arc<str>] {
        &self.locals
    }

    /// Number of locals (including parameters).
    #[inline]
    pub fn local_count(&self) -> usize {
        self.locals.len()
    }

    /// Number of parameters.
    #[inline]
    pub fn param_count(&self) -> usize {
        self.param_count
    }

    /// Whether the function is a generator.
    #[inline]
    pub fn is_generator(&self) -> bool {
        self.is_generator
    }
}

// ============================================================================
// Suspension Detection
// ============================================================================

/// Returns true if any statement contains a suspension point.
pub fn contains_suspension(body: &[Stmt]) -> bool {
    body.iter().any(stmt_suspends)
}

fn stmt_suspends(stmt: &Stmt) -> bool {
    match &stmt.kind {
        StmtKind::Expr(e) => expr_suspends(e),
        StmtKind::Assign { target, value } => expr_suspends(target) || expr_suspends(value),
        StmtKind::If { test, body, orelse } => {
            expr_suspends(test) || contains_suspension(body) || contains_suspension(orelse)
        }
        StmtKind::While { test, body } => expr_suspends(test) || contains_suspension(body),
        StmtKind::For { iter, body, .. } => expr_suspends(iter) || contains_suspension(body),
        StmtKind::Return(value) | StmtKind::Raise(value) => value.as_ref().is_some_and(expr_suspends),
        StmtKind::Try {
            body,
            handlers,
            finalbody,
        } => {
            contains_suspension(body)
                || handlers.iter().any(|h| contains_suspension(&h.body))
                || contains_suspension(finalbody)
        }
        StmtKind::Break | StmtKind::Continue | StmtKind::Pass => false,
    }
}

/// Returns true if the expression is or contains a suspension point.
pub fn expr_suspends(expr: &Expr) -> bool {
    match &expr.kind {
        ExprKind::Yield(_) | ExprKind::YieldFrom(_) => true,
        ExprKind::Const(_) | ExprKind::Name(_) => false,
        ExprKind::BinOp { left, right, .. } | ExprKind::Compare { left, right, .. } => {
            expr_suspends(left) || expr_suspends(right)
        }
        ExprKind::Not(operand) => expr_suspends(operand),
        ExprKind::Call { func, args } => expr_suspends(func) || args.iter().any(expr_suspends),
        ExprKind::List(items) => items.iter().any(expr_suspends),
    }
}

// ============================================================================
// Tests
// ============================================================================
