//! Generator runtime object tests.
//!
//! Tests cover:
//! - Plain yields driven by `advance`/`send`
//! - Lifecycle states and the terminal `Completed` policy
//! - `throw` and `close` at each lifecycle state
//! - `finally` bodies on close and close-on-drop
//! - Saved frame size and local survival across suspensions
//! - Guest-side iteration over generators
//!
//! # Test Organization
//!
//! 1. Advance & Send
//! 2. Lifecycle
//! 3. Throw
//! 4. Close
//! 5. Frame Storage
//! 6. Guest Iteration

use relay_compiler::ast::{CmpOp, ExceptHandler, Expr, FunctionDef, Module, Stmt};
use relay_core::{Exception, ExceptionKind, IterResult, Object, Slot, Value};
use relay_vm::config::DEFAULT_RECURSION_LIMIT;
use relay_vm::{GeneratorError, GeneratorObject, GeneratorState, VirtualMachine, VmConfig, init_tracing};
use std::any::Any;
use std::cell::RefCell;
use std::rc::Rc;

// =============================================================================
// Test Helper Functions
// =============================================================================

/// Host object bound as the global `record`: every call appends its first
/// argument.
#[derive(Debug, Default)]
struct Recorder {
    log: RefCell<Vec<Value>>,
}

impl Recorder {
    fn entries(&self) -> Vec<Value> {
        self.log.borrow().clone()
    }
}

impl Object for Recorder {
    fn type_name(&self) -> &str {
        "recorder"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn call(&self, args: Vec<Value>) -> Slot<Value> {
        self.log.borrow_mut().push(args.into_iter().next().unwrap_or_default());
        Some(Ok(Value::None))
    }
}

fn load(config: VmConfig, functions: Vec<FunctionDef>) -> (VirtualMachine, Rc<Recorder>) {
    init_tracing();
    let mut vm = VirtualMachine::new(config);
    let recorder = Rc::new(Recorder::default());
    vm.set_global("record", Value::Object(recorder.clone()));
    if let Err(e) = vm.load(&Module::new(functions)) {
        panic!("module failed to load: {}", e);
    }
    (vm, recorder)
}

fn vm_with(functions: Vec<FunctionDef>) -> (VirtualMachine, Rc<Recorder>) {
    load(VmConfig::default(), functions)
}

fn record(s: &str) -> Stmt {
    Stmt::expr(Expr::call("record", vec![Expr::str(s)]))
}

fn yield_stmt(value: Expr) -> Stmt {
    Stmt::expr(Expr::yield_value(value))
}

fn yielded(result: Result<IterResult, GeneratorError>) -> Value {
    match result {
        Ok(IterResult::Yielded(value)) => value,
        other => panic!("expected a yielded value, got {:?}", other),
    }
}

fn returned(result: Result<IterResult, GeneratorError>) -> Value {
    match result {
        Ok(IterResult::Returned(value)) => value,
        other => panic!("expected exhaustion, got {:?}", other),
    }
}

fn raised(result: Result<IterResult, GeneratorError>) -> Exception {
    match result {
        Err(GeneratorError::Raised(exc)) => exc,
        other => panic!("expected a raised exception, got {:?}", other),
    }
}

/// `def count(n): i = 0; while i < n: yield i; i = i + 1; return i`
fn count_def() -> FunctionDef {
    FunctionDef::new(
        "count",
        &["n"],
        vec![
            Stmt::assign("i", Expr::int(0)),
            Stmt::while_loop(
                Expr::compare(CmpOp::Lt, Expr::name("i"), Expr::name("n")),
                vec![
                    yield_stmt(Expr::name("i")),
                    Stmt::assign("i", Expr::add(Expr::name("i"), Expr::int(1))),
                ],
            ),
            Stmt::return_value(Expr::name("i")),
        ],
    )
}

/// `try: yield 1 finally: record("cleanup")`
fn guarded_def() -> FunctionDef {
    FunctionDef::new(
        "guarded",
        &[],
        vec![Stmt::try_finally(
            vec![yield_stmt(Expr::int(1)), yield_stmt(Expr::int(2))],
            vec![record("cleanup")],
        )],
    )
}

fn spawn(vm: &VirtualMachine, name: &str, args: Vec<Value>) -> Rc<GeneratorObject> {
    match vm.generator(name, args) {
        Ok(g) => g,
        Err(e) => panic!("could not create generator '{}': {}", name, e),
    }
}

// =============================================================================
// 1. Advance & Send
// =============================================================================

#[test]
fn test_yields_arrive_in_source_order() {
    let (vm, _) = vm_with(vec![count_def()]);
    let g = spawn(&vm, "count", vec![Value::Int(3)]);

    assert_eq!(yielded(g.advance()), Value::Int(0));
    assert_eq!(yielded(g.advance()), Value::Int(1));
    assert_eq!(yielded(g.advance()), Value::Int(2));
    assert_eq!(returned(g.advance()), Value::Int(3));
}

#[test]
fn test_sent_value_is_the_yield_result() {
    // a = yield 1; b = yield a + 10; yield b * 2
    let (vm, _) = vm_with(vec![FunctionDef::new(
        "g",
        &[],
        vec![
            Stmt::assign("a", Expr::yield_value(Expr::int(1))),
            Stmt::assign("b", Expr::yield_value(Expr::add(Expr::name("a"), Expr::int(10)))),
            yield_stmt(Expr::mul(Expr::name("b"), Expr::int(2))),
        ],
    )]);
    let g = spawn(&vm, "g", vec![]);

    assert_eq!(yielded(g.advance()), Value::Int(1));
    assert_eq!(yielded(g.send(Value::Int(5))), Value::Int(15));
    assert_eq!(yielded(g.send(Value::Int(3))), Value::Int(6));
    assert_eq!(returned(g.advance()), Value::None);
}

#[test]
fn test_advance_delivers_none() {
    // x = yield 1; yield x
    let (vm, _) = vm_with(vec![FunctionDef::new(
        "g",
        &[],
        vec![
            Stmt::assign("x", Expr::yield_value(Expr::int(1))),
            yield_stmt(Expr::name("x")),
        ],
    )]);
    let g = spawn(&vm, "g", vec![]);
    g.advance().unwrap();
    assert_eq!(yielded(g.advance()), Value::None);
}

#[test]
fn test_send_non_none_to_fresh_generator() {
    let (vm, recorder) = vm_with(vec![FunctionDef::new(
        "g",
        &[],
        vec![record("started"), yield_stmt(Expr::int(1))],
    )]);
    let g = spawn(&vm, "g", vec![]);

    assert_eq!(g.send(Value::Int(1)), Err(GeneratorError::CantSendNonNone));
    assert_eq!(g.state(), GeneratorState::Created);
    assert!(recorder.entries().is_empty());

    // send(None) is the same as advance().
    assert_eq!(yielded(g.send(Value::None)), Value::Int(1));
}

#[test]
fn test_left_operand_is_read_before_a_yield_on_the_right() {
    // if False: x = 1
    // return x + (yield 5)
    let (vm, _) = vm_with(vec![FunctionDef::new(
        "g",
        &[],
        vec![
            Stmt::if_else(Expr::boolean(false), vec![Stmt::assign("x", Expr::int(1))], vec![]),
            Stmt::return_value(Expr::add(Expr::name("x"), Expr::yield_value(Expr::int(5)))),
        ],
    )]);
    let g = spawn(&vm, "g", vec![]);

    let exc = raised(g.advance());
    assert!(exc.is(&ExceptionKind::UnboundLocalError));
    assert_eq!(g.state(), GeneratorState::Completed);
}

#[test]
fn test_left_operand_is_read_before_a_call_on_the_right() {
    // if False: x = 1
    // yield x < record("right")
    let (vm, recorder) = vm_with(vec![FunctionDef::new(
        "g",
        &[],
        vec![
            Stmt::if_else(Expr::boolean(false), vec![Stmt::assign("x", Expr::int(1))], vec![]),
            yield_stmt(Expr::compare(
                CmpOp::Lt,
                Expr::name("x"),
                Expr::call("record", vec![Expr::str("right")]),
            )),
        ],
    )]);
    let g = spawn(&vm, "g", vec![]);

    assert!(raised(g.advance()).is(&ExceptionKind::UnboundLocalError));
    assert!(recorder.entries().is_empty());
}

#[test]
fn test_left_operand_survives_the_suspension() {
    // x = 10; return x + (yield x)
    let (vm, _) = vm_with(vec![FunctionDef::new(
        "g",
        &[],
        vec![
            Stmt::assign("x", Expr::int(10)),
            Stmt::return_value(Expr::add(Expr::name("x"), Expr::yield_value(Expr::name("x")))),
        ],
    )]);
    let g = spawn(&vm, "g", vec![]);

    assert_eq!(yielded(g.advance()), Value::Int(10));
    assert_eq!(returned(g.send(Value::Int(5))), Value::Int(15));
}

// =============================================================================
// 2. Lifecycle
// =============================================================================

#[test]
fn test_state_transitions() {
    let (vm, _) = vm_with(vec![count_def()]);
    let g = spawn(&vm, "count", vec![Value::Int(1)]);

    assert_eq!(g.state(), GeneratorState::Created);
    g.advance().unwrap();
    assert_eq!(g.state(), GeneratorState::Suspended);
    assert_eq!(g.resume_index(), 0);
    g.advance().unwrap();
    assert_eq!(g.state(), GeneratorState::Completed);
    assert_eq!(g.state().name(), "GEN_CLOSED");
}

#[test]
fn test_completed_generator_stays_exhausted() {
    // record("start"); yield 1; record("end"); return 7
    let (vm, recorder) = vm_with(vec![FunctionDef::new(
        "g",
        &[],
        vec![
            record("start"),
            yield_stmt(Expr::int(1)),
            record("end"),
            Stmt::return_value(Expr::int(7)),
        ],
    )]);
    let g = spawn(&vm, "g", vec![]);

    assert_eq!(g.final_value(), None);
    assert_eq!(yielded(g.advance()), Value::Int(1));
    assert_eq!(returned(g.advance()), Value::Int(7));
    assert_eq!(g.final_value(), Some(Value::Int(7)));

    for _ in 0..3 {
        assert_eq!(returned(g.advance()), Value::None);
        assert_eq!(returned(g.send(Value::Int(1))), Value::None);
    }
    assert_eq!(g.state(), GeneratorState::Completed);
    assert_eq!(g.final_value(), Some(Value::Int(7)));
    assert_eq!(recorder.entries(), vec![Value::from("start"), Value::from("end")]);
}

#[test]
fn test_reentrant_resume_is_already_running() {
    // def g(): yield next(me)     with me bound to the generator itself
    let (vm, _) = vm_with(vec![FunctionDef::new(
        "g",
        &[],
        vec![yield_stmt(Expr::call("next", vec![Expr::name("me")]))],
    )]);
    let g = spawn(&vm, "g", vec![]);
    vm.set_global("me", Value::Object(g.clone()));

    let exc = raised(g.advance());
    assert_eq!(exc, Exception::value_error("generator already executing"));
    assert_eq!(g.state(), GeneratorState::Completed);
}

#[test]
fn test_stop_iteration_escaping_body_becomes_runtime_error() {
    let (vm, _) = vm_with(vec![FunctionDef::new(
        "g",
        &[],
        vec![
            yield_stmt(Expr::int(1)),
            Stmt::raise(Expr::name("StopIteration")),
        ],
    )]);
    let g = spawn(&vm, "g", vec![]);
    g.advance().unwrap();

    let exc = raised(g.advance());
    assert_eq!(exc, Exception::runtime_error("generator raised StopIteration"));
    assert_eq!(g.state(), GeneratorState::Completed);
}

#[test]
fn test_raised_exception_completes_generator() {
    let (vm, _) = vm_with(vec![FunctionDef::new(
        "g",
        &[],
        vec![
            yield_stmt(Expr::int(1)),
            Stmt::raise(Expr::call("ValueError", vec![Expr::str("boom")])),
        ],
    )]);
    let g = spawn(&vm, "g", vec![]);
    g.advance().unwrap();

    assert_eq!(raised(g.advance()), Exception::value_error("boom"));
    assert_eq!(returned(g.advance()), Value::None);
    assert_eq!(g.final_value(), None);
}

// =============================================================================
// 3. Throw
// =============================================================================

#[test]
fn test_throw_into_fresh_generator_skips_body() {
    let (vm, recorder) = vm_with(vec![FunctionDef::new(
        "g",
        &[],
        vec![record("ran"), yield_stmt(Expr::int(1))],
    )]);
    let g = spawn(&vm, "g", vec![]);

    let exc = raised(g.throw(Exception::value_error("early")));
    assert_eq!(exc, Exception::value_error("early"));
    assert_eq!(g.state(), GeneratorState::Completed);
    assert!(recorder.entries().is_empty());
}

#[test]
fn test_throw_is_caught_at_the_yield() {
    // try: yield 1
    // except ValueError as e: yield e
    // yield 3
    let (vm, _) = vm_with(vec![FunctionDef::new(
        "g",
        &[],
        vec![
            Stmt::assign("caught", Expr::none()),
            Stmt::try_except(
                vec![yield_stmt(Expr::int(1))],
                vec![ExceptHandler::new(
                    Some("ValueError"),
                    Some("e"),
                    vec![Stmt::assign("caught", Expr::name("e"))],
                )],
            ),
            yield_stmt(Expr::name("caught")),
        ],
    )]);
    let g = spawn(&vm, "g", vec![]);
    g.advance().unwrap();

    let value = yielded(g.throw(Exception::value_error("in")));
    assert_eq!(value.as_exception(), Some(&Exception::value_error("in")));
}

#[test]
fn test_uncaught_throw_propagates_and_completes() {
    let (vm, _) = vm_with(vec![count_def()]);
    let g = spawn(&vm, "count", vec![Value::Int(5)]);
    g.advance().unwrap();

    let exc = raised(g.throw(Exception::type_error("stop")));
    assert!(exc.is(&ExceptionKind::TypeError));
    assert_eq!(g.state(), GeneratorState::Completed);
}

#[test]
fn test_throw_into_completed_generator_reraises() {
    let (vm, _) = vm_with(vec![count_def()]);
    let g = spawn(&vm, "count", vec![Value::Int(0)]);
    assert_eq!(returned(g.advance()), Value::Int(0));

    let exc = raised(g.throw(Exception::value_error("late")));
    assert_eq!(exc, Exception::value_error("late"));
}

// =============================================================================
// 4. Close
// =============================================================================

#[test]
fn test_close_suspended_generator() {
    let (vm, _) = vm_with(vec![count_def()]);
    let g = spawn(&vm, "count", vec![Value::Int(5)]);
    g.advance().unwrap();

    assert_eq!(g.close(), Ok(()));
    assert_eq!(g.state(), GeneratorState::Completed);
    assert_eq!(returned(g.advance()), Value::None);
}

#[test]
fn test_close_created_and_completed() {
    let (vm, recorder) = vm_with(vec![guarded_def()]);
    let g = spawn(&vm, "guarded", vec![]);

    assert_eq!(g.close(), Ok(()));
    assert_eq!(g.state(), GeneratorState::Completed);
    assert_eq!(g.close(), Ok(()));
    assert!(recorder.entries().is_empty(), "body never started");
}

#[test]
fn test_close_runs_finally() {
    let (vm, recorder) = vm_with(vec![guarded_def()]);
    let g = spawn(&vm, "guarded", vec![]);
    g.advance().unwrap();

    assert_eq!(g.close(), Ok(()));
    assert_eq!(recorder.entries(), vec![Value::from("cleanup")]);
}

#[test]
fn test_return_in_finally_swallows_generator_exit() {
    // try: yield 1 finally: return 5
    let (vm, _) = vm_with(vec![FunctionDef::new(
        "g",
        &[],
        vec![Stmt::try_finally(
            vec![yield_stmt(Expr::int(1))],
            vec![Stmt::return_value(Expr::int(5))],
        )],
    )]);
    let g = spawn(&vm, "g", vec![]);
    g.advance().unwrap();

    assert_eq!(g.close(), Ok(()));
    assert_eq!(g.final_value(), Some(Value::Int(5)));
}

#[test]
fn test_error_raised_while_closing_propagates() {
    // try: yield 1 finally: raise ValueError("cleanup failed")
    let (vm, _) = vm_with(vec![FunctionDef::new(
        "g",
        &[],
        vec![Stmt::try_finally(
            vec![yield_stmt(Expr::int(1))],
            vec![Stmt::raise(Expr::call("ValueError", vec![Expr::str("cleanup failed")]))],
        )],
    )]);
    let g = spawn(&vm, "g", vec![]);
    g.advance().unwrap();

    assert_eq!(
        g.close(),
        Err(GeneratorError::Raised(Exception::value_error("cleanup failed")))
    );
    assert_eq!(g.state(), GeneratorState::Completed);
}

#[test]
fn test_yield_after_generator_exit_is_rejected() {
    // try: yield 1
    // except GeneratorExit: pass
    // yield 2
    let (vm, _) = vm_with(vec![FunctionDef::new(
        "stubborn",
        &[],
        vec![
            Stmt::try_except(
                vec![yield_stmt(Expr::int(1))],
                vec![ExceptHandler::new(Some("GeneratorExit"), None, vec![Stmt::pass()])],
            ),
            yield_stmt(Expr::int(2)),
        ],
    )]);
    let g = spawn(&vm, "stubborn", vec![]);
    g.advance().unwrap();

    assert_eq!(g.close(), Err(GeneratorError::IgnoredGeneratorExit));
    assert_eq!(g.state(), GeneratorState::Suspended);
    assert_eq!(g.resume_index(), 1);

    // At the second yield nothing catches GeneratorExit.
    assert_eq!(g.close(), Ok(()));
    assert_eq!(g.state(), GeneratorState::Completed);
}

#[test]
fn test_dropping_suspended_generator_closes_it() {
    let (vm, recorder) = vm_with(vec![guarded_def()]);
    let g = spawn(&vm, "guarded", vec![]);
    g.advance().unwrap();
    drop(g);
    assert_eq!(recorder.entries(), vec![Value::from("cleanup")]);
}

#[test]
fn test_close_on_drop_can_be_disabled() {
    let (vm, recorder) = load(VmConfig::default().with_close_on_drop(false), vec![guarded_def()]);
    let g = spawn(&vm, "guarded", vec![]);
    g.advance().unwrap();
    drop(g);
    assert!(recorder.entries().is_empty());
}

// =============================================================================
// 5. Frame Storage
// =============================================================================

#[test]
fn test_only_live_locals_are_saved() {
    // x = 10; unused = 20; yield 1; yield x
    let (vm, _) = vm_with(vec![FunctionDef::new(
        "g",
        &[],
        vec![
            Stmt::assign("x", Expr::int(10)),
            Stmt::assign("unused", Expr::int(20)),
            yield_stmt(Expr::int(1)),
            yield_stmt(Expr::name("x")),
        ],
    )]);
    let g = spawn(&vm, "g", vec![]);

    g.advance().unwrap();
    assert_eq!(g.saved_len(), 1);
    assert_eq!(yielded(g.advance()), Value::Int(10));
    assert_eq!(g.saved_len(), 0);
}

#[test]
fn test_locals_survive_many_suspensions() {
    // total = 0
    // for i in range(n):
    //     total = total + i
    //     yield total
    // return total
    let (vm, _) = vm_with(vec![FunctionDef::new(
        "running_sum",
        &["n"],
        vec![
            Stmt::assign("total", Expr::int(0)),
            Stmt::for_loop(
                "i",
                Expr::call("range", vec![Expr::name("n")]),
                vec![
                    Stmt::assign("total", Expr::add(Expr::name("total"), Expr::name("i"))),
                    yield_stmt(Expr::name("total")),
                ],
            ),
            Stmt::return_value(Expr::name("total")),
        ],
    )]);
    let g = spawn(&vm, "running_sum", vec![Value::Int(5)]);

    let sums: Vec<Value> = (0..5).map(|_| yielded(g.advance())).collect();
    assert_eq!(sums, [0, 1, 3, 6, 10].map(Value::Int).to_vec());
    assert_eq!(returned(g.advance()), Value::Int(10));
}

#[test]
fn test_unread_parameter_is_dropped_at_creation() {
    // def g(a, b): yield b
    let (vm, _) = vm_with(vec![FunctionDef::new(
        "g",
        &["a", "b"],
        vec![yield_stmt(Expr::name("b"))],
    )]);
    let g = spawn(&vm, "g", vec![Value::Int(1), Value::Int(2)]);
    assert_eq!(g.saved_len(), 1);
    assert_eq!(yielded(g.advance()), Value::Int(2));
}

// =============================================================================
// 6. Guest Iteration
// =============================================================================

#[test]
fn test_for_loop_over_generator() {
    // def consumer(): total = 0; for v in count(4): total = total + v; return total
    let (vm, _) = vm_with(vec![
        count_def(),
        FunctionDef::new(
            "consumer",
            &[],
            vec![
                Stmt::assign("total", Expr::int(0)),
                Stmt::for_loop(
                    "v",
                    Expr::call("count", vec![Expr::int(4)]),
                    vec![Stmt::assign("total", Expr::add(Expr::name("total"), Expr::name("v")))],
                ),
                Stmt::return_value(Expr::name("total")),
            ],
        ),
    ]);
    assert_eq!(vm.call("consumer", vec![]).unwrap(), Value::Int(6));
}

#[test]
fn test_builtin_list_drains_generator() {
    let (vm, _) = vm_with(vec![
        count_def(),
        FunctionDef::new(
            "size",
            &[],
            vec![Stmt::return_value(Expr::call(
                "len",
                vec![Expr::call("list", vec![Expr::call("count", vec![Expr::int(3)])])],
            ))],
        ),
    ]);
    assert_eq!(vm.call("size", vec![]).unwrap(), Value::Int(3));
}

#[test]
fn test_guest_next_raises_stop_iteration_with_return_value() {
    // def first_of_empty():
    //     it = count(0)
    //     try: next(it)
    //     except StopIteration as e: return e
    let (vm, _) = vm_with(vec![
        count_def(),
        FunctionDef::new(
            "first_of_empty",
            &[],
            vec![
                Stmt::assign("it", Expr::call("count", vec![Expr::int(0)])),
                Stmt::try_except(
                    vec![Stmt::expr(Expr::call("next", vec![Expr::name("it")]))],
                    vec![ExceptHandler::new(
                        Some("StopIteration"),
                        Some("e"),
                        vec![Stmt::return_value(Expr::name("e"))],
                    )],
                ),
            ],
        ),
    ]);
    let value = vm.call("first_of_empty", vec![]).unwrap();
    let exc = value.as_exception().unwrap();
    assert!(exc.is(&ExceptionKind::StopIteration));
    assert_eq!(exc.payload, Value::Int(0));
}

#[test]
fn test_nested_resumes_stop_at_the_recursion_limit() {
    // def walk(n):
    //     if n == 0:
    //         yield 0
    //         return
    //     yield next(walk(n - 1)) + 1
    let (vm, _) = vm_with(vec![FunctionDef::new(
        "walk",
        &["n"],
        vec![
            Stmt::if_else(
                Expr::compare(CmpOp::Eq, Expr::name("n"), Expr::int(0)),
                vec![yield_stmt(Expr::int(0)), Stmt::return_none()],
                vec![],
            ),
            yield_stmt(Expr::add(
                Expr::call(
                    "next",
                    vec![Expr::call("walk", vec![Expr::sub(Expr::name("n"), Expr::int(1))])],
                ),
                Expr::int(1),
            )),
        ],
    )]);
    let limit = DEFAULT_RECURSION_LIMIT as i64;

    let g = spawn(&vm, "walk", vec![Value::Int(limit - 10)]);
    assert_eq!(yielded(g.advance()), Value::Int(limit - 10));

    let g = spawn(&vm, "walk", vec![Value::Int(limit + 10)]);
    assert!(raised(g.advance()).is(&ExceptionKind::RecursionError));
    assert_eq!(g.state(), GeneratorState::Completed);
    assert_eq!(vm.context().depth(), 0);
}

#[test]
fn test_generator_arity_is_checked_at_call() {
    let (vm, _) = vm_with(vec![count_def()]);
    let err = vm.generator("count", vec![]).unwrap_err();
    assert_eq!(
        err.exception(),
        Some(&Exception::type_error("count() takes 1 positional arguments but 0 were given"))
    );
}
