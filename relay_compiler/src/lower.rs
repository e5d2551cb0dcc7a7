//! Generator lowering.
//!
//! Turns a [`FunctionDef`] into a [`CodeObject`] ready for the interpreter.
//! For generator functions this is where the body becomes a resumable state
//! machine:
//!
//! 1. Every suspension point is checked for re-entrability. A suspension
//!    inside an `except` handler or a `finally` body is rejected: the
//!    handled-exception stack lives only in the running activation and is
//!    gone after the frame is saved.
//! 2. The body is compiled; each suspension receives a dense resume index.
//! 3. Liveness runs over the result and each resume point records exactly
//!    the registers that must survive it.
//! 4. The frame layout (the generator's `localFrame` shape) is derived
//!    from the resume table plus the parameters live on entry.

use crate::ast::{Expr, ExprKind, FunctionDef, Module, Stmt, StmtKind};
use crate::bytecode::{CodeObject, FrameLayout, Instruction, ResumeTableBuilder};
use crate::compiler::FunctionCompiler;
use crate::config::CompilerConfig;
use crate::error::{CompileError, CompileErrorKind, CompileResult};
use crate::liveness::{LivenessAnalysis, LivenessMap};
use crate::scope::FunctionScope;
use relay_core::Span;
use tracing::{debug, instrument, trace};

/// Compile every function in `module`, in definition order.
pub fn compile_module(module: &Module, config: &CompilerConfig) -> CompileResult<Vec<CodeObject>> {
    module
        .functions
        .iter()
        .map(|def| lower_function(def, config))
        .collect()
}

/// Lower one function definition.
#[instrument(level = "debug", skip_all, fields(function = %def.name))]
pub fn lower_function(def: &FunctionDef, config: &CompilerConfig) -> CompileResult<CodeObject> {
    check_suspension_sites(def)?;

    let scope = FunctionScope::analyze(def);
    if scope.local_count() > config.max_registers {
        return Err(CompileError::new(
            CompileErrorKind::TooManyRegisters {
                limit: config.max_registers,
            },
            def.name.clone(),
            def.span,
        ));
    }

    let mut code = FunctionCompiler::new(def, &scope, config).compile(&def.body)?;
    if code.is_generator() {
        attach_resume_table(&mut code, config)?;
        debug!(
            resume_points = code.resume_table.len(),
            frame_capacity = code.frame_layout.capacity,
            "lowered generator"
        );
    } else {
        debug!(instructions = code.instructions.len(), "compiled function");
    }
    trace!(listing = %code.disassemble(), "bytecode");
    Ok(code)
}

/// Run liveness and record the resume table and frame layout on `code`.
fn attach_resume_table(code: &mut CodeObject, config: &CompilerConfig) -> CompileResult<()> {
    let analysis = LivenessAnalysis::compute(code);
    let mut table = ResumeTableBuilder::new();

    for (pc, inst) in code.instructions.iter().enumerate() {
        let (resume, delegate) = match inst {
            Instruction::Yield { resume, .. } => (*resume, false),
            Instruction::YieldDelegated { resume, .. } => (*resume, true),
            _ => continue,
        };
        if table.len() as u32 >= config.max_resume_points {
            return Err(CompileError::new(
                CompileErrorKind::TooManyResumePoints {
                    limit: config.max_resume_points,
                },
                code.name.clone(),
                code.span_at(pc as u32),
            ));
        }
        let liveness = analysis.live_across(code, pc);
        let index = if delegate {
            table.add_delegate(pc as u32, liveness)
        } else {
            table.add_yield(pc as u32, liveness)
        };
        if index != resume {
            return Err(CompileError::new(
                CompileErrorKind::Internal(format!(
                    "resume index {} emitted at pc {} but tabled as {}",
                    resume, pc, index
                )),
                code.name.clone(),
                code.span_at(pc as u32),
            ));
        }
        trace!(pc, resume, live = ?liveness, "resume point");
    }

    let entry = analysis
        .live_in(0)
        .intersect(LivenessMap::first(code.arg_count as usize));
    code.resume_table = table.build();
    code.frame_layout = FrameLayout::from_table(&code.resume_table, entry);
    Ok(())
}

// =============================================================================
// Suspension Site Validation
// =============================================================================

/// Where a statement sits relative to exception handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Region {
    Body,
    ExceptHandler,
    Finally,
}

/// Reject suspension points that could not be resumed.
pub fn check_suspension_sites(def: &FunctionDef) -> CompileResult<()> {
    check_block(&def.body, Region::Body).map_err(|(kind, span)| CompileError::new(kind, def.name.clone(), span))
}

type SiteResult = Result<(), (CompileErrorKind, Span)>;

fn check_block(body: &[Stmt], region: Region) -> SiteResult {
    body.iter().try_for_each(|stmt| check_stmt(stmt, region))
}

fn check_stmt(stmt: &Stmt, region: Region) -> SiteResult {
    match &stmt.kind {
        StmtKind::Expr(e) => check_expr(e, region),
        StmtKind::Assign { target, value } => {
            check_expr(target, region)?;
            check_expr(value, region)
        }
        StmtKind::If { test, body, orelse } => {
            check_expr(test, region)?;
            check_block(body, region)?;
            check_block(orelse, region)
        }
        StmtKind::While { test, body } => {
            check_expr(test, region)?;
            check_block(body, region)
        }
        StmtKind::For { iter, body, .. } => {
            check_expr(iter, region)?;
            check_block(body, region)
        }
        StmtKind::Return(value) | StmtKind::Raise(value) => match value {
            Some(e) => check_expr(e, region),
            None => Ok(()),
        },
        StmtKind::Try {
            body,
            handlers,
            finalbody,
        } => {
            // The protected body keeps its enclosing region: a try nested in
            // a handler is still inside that handler.
            check_block(body, region)?;
            let handler_region = match region {
                Region::Body => Region::ExceptHandler,
                outer => outer,
            };
            for handler in handlers {
                check_block(&handler.body, handler_region)?;
            }
            let finally_region = match region {
                Region::Body => Region::Finally,
                outer => outer,
            };
            check_block(finalbody, finally_region)
        }
        StmtKind::Break | StmtKind::Continue | StmtKind::Pass => Ok(()),
    }
}

fn check_expr(expr: &Expr, region: Region) -> SiteResult {
    if region == Region::Body {
        return Ok(());
    }
    match first_suspension(expr) {
        Some(site) => {
            let keyword = match site.kind {
                ExprKind::YieldFrom(_) => "yield from",
                _ => "yield",
            };
            let kind = match region {
                Region::ExceptHandler => CompileErrorKind::SuspendInExceptHandler { keyword },
                _ => CompileErrorKind::SuspendInFinally { keyword },
            };
            Err((kind, site.span))
        }
        None => Ok(()),
    }
}

/// The first suspension point in evaluation order.
fn first_suspension(expr: &Expr) -> Option<&Expr> {
    match &expr.kind {
        ExprKind::Yield(value) => value.as_deref().and_then(first_suspension).or(Some(expr)),
        ExprKind::YieldFrom(iterable) => first_suspension(iterable).or(Some(expr)),
        ExprKind::Const(_) | ExprKind::Name(_) => None,
        ExprKind::BinOp { left, right, .. } | ExprKind::Compare { left, right, .. } => {
            first_suspension(left).or_else(|| first_suspension(right))
        }
        ExprKind::Not(operand) => first_suspension(operand),
        ExprKind::Call { func, args } => first_suspension(func).or_else(|| args.iter().find_map(first_suspension)),
        ExprKind::List(items) => items.iter().find_map(first_suspension),
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::ExceptHandler;
    use crate::bytecode::Register;

    fn lower(def: FunctionDef) -> CompileResult<CodeObject> {
        lower_function(&def, &CompilerConfig::default())
    }

    #[test]
    fn test_plain_function_has_no_resume_table() {
        let code = lower(FunctionDef::new(
            "f",
            &["a"],
            vec![Stmt::return_value(Expr::add(Expr::name("a"), Expr::int(1)))],
        ))
        .unwrap();
        assert!(!code.is_generator());
        assert!(code.resume_table.is_empty());
    }

    #[test]
    fn test_resume_indices_are_dense() {
        let code = lower(FunctionDef::new(
            "g",
            &[],
            vec![
                Stmt::expr(Expr::yield_value(Expr::int(1))),
                Stmt::expr(Expr::yield_from(Expr::call("h", vec![]))),
                Stmt::expr(Expr::yield_value(Expr::int(3))),
            ],
        ))
        .unwrap();
        let points: Vec<_> = code.resume_table.iter().map(|p| p.is_delegate).collect();
        assert_eq!(points, vec![false, true, false]);
    }

    #[test]
    fn test_yield_in_handler_rejected_with_span() {
        let site = Span::new(40, 47);
        let def = FunctionDef::new(
            "g",
            &[],
            vec![Stmt::try_except(
                vec![Stmt::pass()],
                vec![ExceptHandler::new(
                    None,
                    None,
                    vec![Stmt::expr(Expr::yield_value(Expr::int(1)).at(site))],
                )],
            )],
        );
        let err = lower(def).unwrap_err();
        assert_eq!(err.kind, CompileErrorKind::SuspendInExceptHandler { keyword: "yield" });
        assert_eq!(err.span, site);
    }

    #[test]
    fn test_nested_try_in_finally_still_rejected() {
        let def = FunctionDef::new(
            "g",
            &[],
            vec![Stmt::try_finally(
                vec![Stmt::pass()],
                vec![Stmt::try_except(
                    vec![Stmt::expr(Expr::yield_from(Expr::name("h")))],
                    vec![],
                )],
            )],
        );
        let err = lower(def).unwrap_err();
        assert_eq!(err.kind, CompileErrorKind::SuspendInFinally { keyword: "yield from" });
    }

    #[test]
    fn test_entry_liveness_only_keeps_used_params() {
        let code = lower(FunctionDef::new(
            "g",
            &["used", "unused"],
            vec![Stmt::expr(Expr::yield_value(Expr::name("used")))],
        ))
        .unwrap();
        assert!(code.frame_layout.entry.is_live(Register(0)));
        assert!(!code.frame_layout.entry.is_live(Register(1)));
    }

    #[test]
    fn test_resume_point_limit() {
        let def = FunctionDef::new(
            "g",
            &[],
            vec![
                Stmt::expr(Expr::yield_value(Expr::int(1))),
                Stmt::expr(Expr::yield_value(Expr::int(2))),
            ],
        );
        let config = CompilerConfig::default().with_max_resume_points(1);
        let err = lower_function(&def, &config).unwrap_err();
        assert_eq!(err.kind, CompileErrorKind::TooManyResumePoints { limit: 1 });
    }
}
