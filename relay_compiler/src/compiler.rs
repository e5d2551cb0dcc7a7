//! Statement and expression code generation.
//!
//! `FunctionCompiler` walks one function body and emits register bytecode
//! through a [`FunctionBuilder`]. Suspension points become `Yield` (plain)
//! or the delegation loop (`yield from`); everything else is ordinary
//! sequencing and branching.
//!
//! # Try Layout
//!
//! ```text
//! try_start:
//!     <body>                      protected by H (except) and F (finally)
//!     Jump after_handlers
//! H:  PushExcInfo
//!     MatchException t, Kind ; JumpIfFalse t, next
//!     <handler body>              protected by F
//!     PopExcInfo ; Jump after_handlers
//! next:
//!     Reraise
//! after_handlers:
//!     <finally body>              normal-path copy
//!     Jump end
//! F:  PushExcInfo
//!     <finally body>              exceptional copy
//!     Reraise
//! end:
//! ```
//!
//! `return`, `break` and `continue` inline the finally bodies they leave.
//! Protected ranges are split around those inline copies so an exception
//! raised inside a copy is not caught by the very `finally` it belongs to.

use crate::ast::{Constant, Expr, ExprKind, FunctionDef, Stmt, StmtKind};
use crate::bytecode::{CodeObject, ExceptionEntry, FunctionBuilder, Instruction, Label, Register};
use crate::config::CompilerConfig;
use crate::error::{CompileError, CompileErrorKind, CompileResult};
use crate::scope::FunctionScope;
use relay_core::{Span, Value};
use smallvec::SmallVec;
use std::sync::Arc;

/// Innermost enclosing loop.
#[derive(Debug, Clone, Copy)]
struct LoopContext {
    continue_label: Label,
    break_label: Label,
    /// `finally_stack` length when the loop was entered.
    finally_depth: usize,
    /// Handled-exception depth when the loop was entered.
    handler_depth: u16,
}

/// A `finally` body that must run when control leaves its `try`.
#[derive(Debug, Clone, Copy)]
struct FinallyContext<'a> {
    body: &'a [Stmt],
    /// Index of the region guarding the `try` in `regions`.
    region: usize,
    handler_depth: u16,
}

/// An open protected range, possibly split into segments.
#[derive(Debug, Default)]
struct ProtectedRegion {
    start: Option<u32>,
    segments: SmallVec<[(u32, u32); 2]>,
}

/// Compiles one function definition to bytecode.
pub(crate) struct FunctionCompiler<'a> {
    builder: FunctionBuilder,
    scope: &'a FunctionScope,
    function: Arc<str>,
    register_limit: usize,
    loops: SmallVec<[LoopContext; 4]>,
    finally_stack: SmallVec<[FinallyContext<'a>; 4]>,
    regions: Vec<ProtectedRegion>,
    handler_depth: u16,
}

impl<'a> FunctionCompiler<'a> {
    pub(crate) fn new(def: &FunctionDef, scope: &'a FunctionScope, config: &CompilerConfig) -> Self {
        let mut builder = FunctionBuilder::new(def.name.clone());
        builder.set_filename(config.filename.clone());
        builder.set_arg_count(def.params.len() as u16);
        builder.set_register_limit(config.max_registers as u16);
        builder.set_span(def.span);
        if scope.is_generator() {
            builder.mark_generator();
        }
        Self {
            builder,
            scope,
            function: def.name.clone(),
            register_limit: config.max_registers,
            loops: SmallVec::new(),
            finally_stack: SmallVec::new(),
            regions: Vec::new(),
            handler_depth: 0,
        }
    }

    /// Compile the body; falls off the end with `return None`.
    pub(crate) fn compile(mut self, body: &'a [Stmt]) -> CompileResult<CodeObject> {
        if self.builder.reserve_locals(self.scope.locals()).is_none() {
            return Err(self.error(CompileErrorKind::TooManyRegisters {
                limit: self.register_limit,
            }));
        }
        self.compile_block(body)?;
        let r = self.alloc()?;
        self.builder.emit_load_none(r);
        self.builder.emit_return(r);

        let function = self.function.clone();
        let span = self.builder.span();
        self.builder
            .finish()
            .map_err(|kind| CompileError::new(kind, function, span))
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    fn error(&self, kind: CompileErrorKind) -> CompileError {
        CompileError::new(kind, self.function.clone(), self.builder.span())
    }

    fn alloc(&mut self) -> CompileResult<Register> {
        self.builder.alloc_register().ok_or_else(|| {
            self.error(CompileErrorKind::TooManyRegisters {
                limit: self.register_limit,
            })
        })
    }

    fn alloc_block(&mut self, count: usize, what: &'static str) -> CompileResult<(Register, u8)> {
        let count = u8::try_from(count).map_err(|_| self.error(CompileErrorKind::TooManyOperands { what }))?;
        let base = self.builder.alloc_register_block(count).ok_or_else(|| {
            self.error(CompileErrorKind::TooManyRegisters {
                limit: self.register_limit,
            })
        })?;
        Ok((base, count))
    }

    fn release(&mut self, reg: Register) {
        self.builder.free_register(reg);
    }

    fn local(&self, name: &str) -> CompileResult<Register> {
        self.scope.lookup(name).ok_or_else(|| {
            self.error(CompileErrorKind::Internal(format!(
                "'{}' was not collected as a local",
                name
            )))
        })
    }

    // =========================================================================
    // Protected Regions
    // =========================================================================

    fn open_region(&mut self) -> usize {
        self.regions.push(ProtectedRegion {
            start: Some(self.builder.current_pc()),
            segments: SmallVec::new(),
        });
        self.regions.len() - 1
    }

    fn close_region(&mut self, index: usize) -> CompileResult<SmallVec<[(u32, u32); 2]>> {
        if index + 1 != self.regions.len() {
            return Err(self.error(CompileErrorKind::Internal(
                "protected regions closed out of order".to_string(),
            )));
        }
        self.suspend_regions(index);
        Ok(self
            .regions
            .pop()
            .map(|region| region.segments)
            .unwrap_or_default())
    }

    /// Stop protecting code emitted from here on for `regions[from..]`.
    fn suspend_regions(&mut self, from: usize) {
        let pc = self.builder.current_pc();
        for region in &mut self.regions[from..] {
            if let Some(start) = region.start.take() {
                if pc > start {
                    region.segments.push((start, pc));
                }
            }
        }
    }

    /// Resume protection for `regions[from..]`.
    fn resume_regions(&mut self, from: usize) {
        let pc = self.builder.current_pc();
        for region in &mut self.regions[from..] {
            if region.start.is_none() {
                region.start = Some(pc);
            }
        }
    }

    /// Bind `handler` here and route `segments` to it.
    fn bind_handler(&mut self, segments: &[(u32, u32)], depth: u16) {
        let handler_pc = self.builder.current_pc();
        for &(start_pc, end_pc) in segments {
            self.builder.add_exception_entry(ExceptionEntry {
                start_pc,
                end_pc,
                handler_pc,
                depth,
            });
        }
    }

    fn emit_pops(&mut self, from: u16, to: u16) {
        for _ in to..from {
            self.builder.emit(Instruction::PopExcInfo);
        }
    }

    /// Inline every finally body in `finally_stack[stop..]`, innermost first.
    ///
    /// Returns the handled-exception depth in effect afterwards and the
    /// lowest region index that was suspended (re-opened by the caller).
    fn unwind_finally(&mut self, stop: usize) -> CompileResult<(u16, Option<usize>)> {
        let mut depth = self.handler_depth;
        let mut lowest = None;
        for i in (stop..self.finally_stack.len()).rev() {
            let ctx = self.finally_stack[i];
            self.emit_pops(depth, ctx.handler_depth);
            depth = ctx.handler_depth;
            self.suspend_regions(ctx.region);
            lowest = Some(ctx.region);

            let saved_finally = self.finally_stack.clone();
            let saved_loops = self.loops.clone();
            let saved_depth = self.handler_depth;
            self.finally_stack.truncate(i);
            self.loops.retain(|l| l.finally_depth <= i);
            self.handler_depth = ctx.handler_depth;

            let result = self.compile_block(ctx.body);

            self.finally_stack = saved_finally;
            self.loops = saved_loops;
            self.handler_depth = saved_depth;
            result?;
        }
        Ok((depth, lowest))
    }

    // =========================================================================
    // Statements
    // =========================================================================

    fn compile_block(&mut self, body: &'a [Stmt]) -> CompileResult<()> {
        for stmt in body {
            self.compile_stmt(stmt)?;
        }
        Ok(())
    }

    fn compile_stmt(&mut self, stmt: &'a Stmt) -> CompileResult<()> {
        self.builder.set_span(stmt.span);
        match &stmt.kind {
            StmtKind::Expr(expr) => {
                let r = self.compile_expr(expr)?;
                self.release(r);
            }
            StmtKind::Assign { target, value } => self.compile_assign(target, value)?,
            StmtKind::If { test, body, orelse } => self.compile_if(test, body, orelse)?,
            StmtKind::While { test, body } => self.compile_while(test, body)?,
            StmtKind::For { target, iter, body } => self.compile_for(target, iter, body)?,
            StmtKind::Break => self.compile_break()?,
            StmtKind::Continue => self.compile_continue()?,
            StmtKind::Return(value) => self.compile_return(value.as_ref())?,
            StmtKind::Raise(Some(exc)) => {
                let r = self.compile_expr(exc)?;
                self.builder.emit_raise(r);
                self.release(r);
            }
            StmtKind::Raise(None) => {
                self.builder.emit(Instruction::Reraise);
            }
            StmtKind::Try {
                body,
                handlers,
                finalbody,
            } => self.compile_try(body, handlers, finalbody)?,
            StmtKind::Pass => {}
        }
        Ok(())
    }

    fn compile_assign(&mut self, target: &Expr, value: &Expr) -> CompileResult<()> {
        let ExprKind::Name(name) = &target.kind else {
            self.builder.set_span(target.span);
            return Err(self.error(CompileErrorKind::InvalidAssignTarget {
                target: target.describe(),
            }));
        };
        let dst = self.local(name)?;
        let r = self.compile_expr(value)?;
        self.builder.emit_move(dst, r);
        self.release(r);
        Ok(())
    }

    fn compile_if(&mut self, test: &Expr, body: &'a [Stmt], orelse: &'a [Stmt]) -> CompileResult<()> {
        let else_label = self.builder.create_label();
        let end_label = self.builder.create_label();
        let cond = self.compile_expr(test)?;
        self.builder.emit_jump_if_false(cond, else_label);
        self.release(cond);
        self.compile_block(body)?;
        if !orelse.is_empty() {
            self.builder.emit_jump(end_label);
        }
        self.builder.bind_label(else_label);
        self.compile_block(orelse)?;
        self.builder.bind_label(end_label);
        Ok(())
    }

    fn push_loop(&mut self, continue_label: Label, break_label: Label) {
        self.loops.push(LoopContext {
            continue_label,
            break_label,
            finally_depth: self.finally_stack.len(),
            handler_depth: self.handler_depth,
        });
    }

    fn compile_while(&mut self, test: &Expr, body: &'a [Stmt]) -> CompileResult<()> {
        let top = self.builder.create_label();
        let exit = self.builder.create_label();
        self.builder.bind_label(top);
        let cond = self.compile_expr(test)?;
        self.builder.emit_jump_if_false(cond, exit);
        self.release(cond);

        self.push_loop(top, exit);
        let result = self.compile_block(body);
        self.loops.pop();
        result?;

        self.builder.emit_jump(top);
        self.builder.bind_label(exit);
        Ok(())
    }

    fn compile_for(&mut self, target: &str, iter: &Expr, body: &'a [Stmt]) -> CompileResult<()> {
        let dst = self.local(target)?;
        let src = self.compile_expr(iter)?;
        let it = self.alloc()?;
        self.builder.emit_get_iter(it, src);
        self.release(src);

        let top = self.builder.create_label();
        let exit = self.builder.create_label();
        self.builder.bind_label(top);
        self.builder.emit_for_iter(dst, it, exit);

        self.push_loop(top, exit);
        let result = self.compile_block(body);
        self.loops.pop();
        result?;

        self.builder.emit_jump(top);
        self.builder.bind_label(exit);
        self.release(it);
        Ok(())
    }

    fn compile_break(&mut self) -> CompileResult<()> {
        let Some(ctx) = self.loops.last().copied() else {
            return Err(self.error(CompileErrorKind::BreakOutsideLoop));
        };
        self.leave_loop(ctx, ctx.break_label)
    }

    fn compile_continue(&mut self) -> CompileResult<()> {
        let Some(ctx) = self.loops.last().copied() else {
            return Err(self.error(CompileErrorKind::ContinueOutsideLoop));
        };
        self.leave_loop(ctx, ctx.continue_label)
    }

    fn leave_loop(&mut self, ctx: LoopContext, target: Label) -> CompileResult<()> {
        let (depth, lowest) = self.unwind_finally(ctx.finally_depth)?;
        self.emit_pops(depth, ctx.handler_depth);
        self.builder.emit_jump(target);
        if let Some(region) = lowest {
            self.resume_regions(region);
        }
        Ok(())
    }

    fn compile_return(&mut self, value: Option<&Expr>) -> CompileResult<()> {
        let mut r = match value {
            Some(expr) => self.compile_expr(expr)?,
            None => {
                let r = self.alloc()?;
                self.builder.emit_load_none(r);
                r
            }
        };
        if !self.finally_stack.is_empty() {
            // A finally body may rebind the local being returned.
            let tmp = self.alloc()?;
            self.builder.emit_move(tmp, r);
            self.release(r);
            r = tmp;
        }
        let (_, lowest) = self.unwind_finally(0)?;
        self.builder.emit_return(r);
        self.release(r);
        if let Some(region) = lowest {
            self.resume_regions(region);
        }
        Ok(())
    }

    fn compile_try(
        &mut self,
        body: &'a [Stmt],
        handlers: &'a [crate::ast::ExceptHandler],
        finalbody: &'a [Stmt],
    ) -> CompileResult<()> {
        if handlers.is_empty() && finalbody.is_empty() {
            return self.compile_block(body);
        }
        let depth0 = self.handler_depth;

        let finally_region = if finalbody.is_empty() {
            None
        } else {
            let region = self.open_region();
            self.finally_stack.push(FinallyContext {
                body: finalbody,
                region,
                handler_depth: depth0,
            });
            Some(region)
        };

        if handlers.is_empty() {
            self.compile_block(body)?;
        } else {
            let region = self.open_region();
            self.compile_block(body)?;
            let segments = self.close_region(region)?;

            let after = self.builder.create_label();
            self.builder.emit_jump(after);

            self.bind_handler(&segments, depth0);
            self.builder.emit(Instruction::PushExcInfo);
            self.handler_depth = depth0 + 1;

            for handler in handlers {
                self.builder.set_span(handler.span);
                let next = self.builder.create_label();
                if let Some(kind) = &handler.kind {
                    let t = self.alloc()?;
                    let kind = self.builder.add_name(kind.clone());
                    self.builder.emit(Instruction::MatchException { dst: t, kind });
                    self.builder.emit_jump_if_false(t, next);
                    self.release(t);
                }
                if let Some(name) = &handler.name {
                    let dst = self.local(name)?;
                    self.builder.emit(Instruction::LoadException { dst });
                }
                self.compile_block(&handler.body)?;
                self.builder.emit(Instruction::PopExcInfo);
                self.builder.emit_jump(after);
                self.builder.bind_label(next);
            }
            self.builder.emit(Instruction::Reraise);
            self.handler_depth = depth0;
            self.builder.bind_label(after);
        }

        if let Some(region) = finally_region {
            self.finally_stack.pop();
            let segments = self.close_region(region)?;

            self.compile_block(finalbody)?;
            let end = self.builder.create_label();
            self.builder.emit_jump(end);

            self.bind_handler(&segments, depth0);
            self.builder.emit(Instruction::PushExcInfo);
            self.handler_depth = depth0 + 1;
            self.compile_block(finalbody)?;
            self.builder.emit(Instruction::Reraise);
            self.handler_depth = depth0;
            self.builder.bind_label(end);
        }
        Ok(())
    }

    // =========================================================================
    // Expressions
    // =========================================================================

    /// Compile an expression; the result is a local register or a temporary
    /// the caller must release.
    fn compile_expr(&mut self, expr: &Expr) -> CompileResult<Register> {
        match &expr.kind {
            ExprKind::Const(constant) => {
                let value = match constant {
                    Constant::None => Value::None,
                    Constant::Bool(b) => Value::Bool(*b),
                    Constant::Int(i) => Value::Int(*i),
                    Constant::Str(s) => Value::Str(s.clone()),
                };
                let dst = self.alloc()?;
                let idx = self.builder.add_constant(value);
                self.builder.emit_load_const(dst, idx);
                Ok(dst)
            }
            ExprKind::Name(name) => {
                if let Some(reg) = self.scope.lookup(name) {
                    return Ok(reg);
                }
                let dst = self.alloc()?;
                let idx = self.builder.add_name(name.clone());
                self.builder.emit_load_global(dst, idx);
                Ok(dst)
            }
            ExprKind::BinOp { op, left, right } => {
                let lhs = self.compile_held(left, [&**right])?;
                let rhs = self.compile_expr(right)?;
                self.release(rhs);
                self.release(lhs);
                let dst = self.alloc()?;
                self.builder.emit_binary(*op, dst, lhs, rhs);
                Ok(dst)
            }
            ExprKind::Compare { op, left, right } => {
                let lhs = self.compile_held(left, [&**right])?;
                let rhs = self.compile_expr(right)?;
                self.release(rhs);
                self.release(lhs);
                let dst = self.alloc()?;
                self.builder.emit_compare(*op, dst, lhs, rhs);
                Ok(dst)
            }
            ExprKind::Not(operand) => {
                let src = self.compile_expr(operand)?;
                self.release(src);
                let dst = self.alloc()?;
                self.builder.emit_not(dst, src);
                Ok(dst)
            }
            ExprKind::Call { func, args } => {
                let callee = self.compile_held(func, args)?;
                let (base, argc) = self.compile_operand_block(args, "arguments")?;
                self.release(callee);
                let dst = self.alloc()?;
                self.builder.emit_call(dst, callee, base, argc);
                self.builder.free_register_block(base, argc);
                Ok(dst)
            }
            ExprKind::List(items) => {
                let (base, count) = self.compile_operand_block(items, "list items")?;
                let dst = self.alloc()?;
                self.builder.emit_build_list(dst, base, count);
                self.builder.free_register_block(base, count);
                Ok(dst)
            }
            ExprKind::Yield(value) => self.compile_yield(expr.span, value.as_deref()),
            ExprKind::YieldFrom(iterable) => self.compile_yield_from(expr.span, iterable),
        }
    }

    /// Compile an operand that is read only after `later` has been evaluated.
    ///
    /// A local is copied out when any later operand can raise, call or
    /// suspend, so an unbound local raises in source order and the value
    /// read is the one seen before the later operands ran.
    fn compile_held<'e>(
        &mut self,
        expr: &Expr,
        later: impl IntoIterator<Item = &'e Expr>,
    ) -> CompileResult<Register> {
        let reg = self.compile_expr(expr)?;
        if !self.is_local_read(expr) || later.into_iter().all(|e| self.is_inert(e)) {
            return Ok(reg);
        }
        let held = self.alloc()?;
        self.builder.emit_move(held, reg);
        Ok(held)
    }

    fn is_local_read(&self, expr: &Expr) -> bool {
        matches!(&expr.kind, ExprKind::Name(name) if self.scope.lookup(name).is_some())
    }

    /// Returns true if evaluating `expr` emits nothing that can raise or run
    /// guest code.
    fn is_inert(&self, expr: &Expr) -> bool {
        matches!(expr.kind, ExprKind::Const(_)) || self.is_local_read(expr)
    }

    /// Evaluate `exprs` left to right into a fresh consecutive block.
    fn compile_operand_block(&mut self, exprs: &[Expr], what: &'static str) -> CompileResult<(Register, u8)> {
        let (base, count) = self.alloc_block(exprs.len(), what)?;
        for (i, expr) in exprs.iter().enumerate() {
            let r = self.compile_expr(expr)?;
            self.builder.emit_move(Register(base.0 + i as u8), r);
            self.release(r);
        }
        Ok((base, count))
    }

    /// `yield value`: suspend with `value`; the resumption is the result.
    fn compile_yield(&mut self, span: Span, value: Option<&Expr>) -> CompileResult<Register> {
        let src = match value {
            Some(expr) => self.compile_expr(expr)?,
            None => {
                let r = self.alloc()?;
                self.builder.emit_load_none(r);
                r
            }
        };
        let saved = self.builder.span();
        self.builder.set_span(span);
        let dst = self.alloc()?;
        self.builder.emit_yield(dst, src);
        self.release(src);
        self.builder.set_span(saved);
        Ok(dst)
    }

    /// `yield from iterable`: evaluate once, then run the delegation loop.
    ///
    /// ```text
    ///     BeginDelegate s
    /// L:  DelegateStep v, d
    ///     JumpIfTrue d, END
    ///     YieldDelegated v
    ///     Jump L
    /// END:
    /// ```
    fn compile_yield_from(&mut self, span: Span, iterable: &Expr) -> CompileResult<Register> {
        let src = self.compile_expr(iterable)?;
        let saved = self.builder.span();
        self.builder.set_span(span);
        self.builder.emit(Instruction::BeginDelegate { src });
        self.release(src);

        let value = self.alloc()?;
        let done = self.alloc()?;
        let step = self.builder.create_label();
        let end = self.builder.create_label();
        self.builder.bind_label(step);
        self.builder.emit(Instruction::DelegateStep { value, done });
        self.builder.emit_jump_if_true(done, end);
        self.builder.emit_yield_delegated(value);
        self.builder.emit_jump(step);
        self.builder.bind_label(end);
        self.release(done);
        self.builder.set_span(saved);
        Ok(value)
    }
}
