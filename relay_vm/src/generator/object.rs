//! Generator object implementation.
//!
//! A `GeneratorObject` is one invocation of a generator function. It keeps:
//!
//! - the lifecycle state and resume index (one `GeneratorHeader` word)
//! - the saved live registers (`FrameStorage`)
//! - the active `yield from` delegate, if any
//! - the final value once the body has returned
//!
//! # Protocol
//!
//! | state     | advance / send(v)          | throw(e)             | close()                 |
//! |-----------|----------------------------|----------------------|-------------------------|
//! | Created   | run from entry; `send(v)` with `v != None` fails | raise `e`, complete | complete |
//! | Suspended | resume with the value      | raise `e` at the yield | raise `GeneratorExit` at the yield |
//! | Running   | `AlreadyRunning`           | `AlreadyRunning`     | `AlreadyRunning`        |
//! | Completed | `Returned(None)`           | raise `e`            | no-op                   |
//!
//! The header is checked before the interior `RefCell` is borrowed, and no
//! borrow is held while the body runs.
//!
//! # Driver Stack
//!
//! A resume call runs bodies on an explicit stack of activations. When a
//! body reaches a `yield from` step whose delegate is another generator,
//! the nested body is pushed onto that stack instead of being entered
//! through a host call. Its outcome is written back into the parked step
//! when it suspends, returns or raises. Delegation chains therefore cost
//! heap, not host stack, per level; each level still sees its own state
//! transitions.

use super::delegation::DelegationFrame;
use super::state::{GeneratorHeader, GeneratorState};
use super::storage::FrameStorage;
use super::suspend::{self, Resumption};
use crate::context::{self, DepthGuard, VmContext};
use crate::error::GeneratorError;
use crate::frame::Frame;
use crate::interpreter::{self, Exit};
use relay_compiler::{CodeObject, Instruction};
use relay_core::protocol::normalize_exhaustion;
use relay_core::{Exception, ExceptionKind, IterResult, Object, Slot, Value};
use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::mem;
use std::ops::Deref;
use std::rc::{Rc, Weak};
use tracing::{debug, trace, warn};

/// Mutable state, only touched between runs of the body.
#[derive(Debug, Default)]
struct GeneratorInner {
    storage: FrameStorage,
    delegate: Option<DelegationFrame>,
    final_value: Option<Value>,
}

/// A generator runtime object.
pub struct GeneratorObject {
    header: GeneratorHeader,
    this: Weak<GeneratorObject>,
    code: Rc<CodeObject>,
    ctx: Rc<VmContext>,
    inner: RefCell<GeneratorInner>,
}

impl GeneratorObject {
    /// Create a generator for `code` with its arguments bound. The body
    /// does not run.
    pub fn new(code: Rc<CodeObject>, ctx: Rc<VmContext>, args: Vec<Value>) -> Rc<Self> {
        let mut storage = FrameStorage::with_capacity(code.frame_layout.capacity);
        let mut entry = Frame::new(code.arg_count as usize);
        entry.load_args(args);
        storage.capture(&entry.registers, code.frame_layout.entry);

        trace!(generator = %code.name, "created");
        Rc::new_cyclic(|this| Self {
            header: GeneratorHeader::new(),
            this: this.clone(),
            code,
            ctx,
            inner: RefCell::new(GeneratorInner {
                storage,
                ..GeneratorInner::default()
            }),
        })
    }

    /// Name of the generator function.
    #[inline]
    pub fn name(&self) -> &str {
        &self.code.name
    }

    /// Compiled body.
    #[inline]
    pub fn code(&self) -> &Rc<CodeObject> {
        &self.code
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    /// Current lifecycle state.
    #[inline]
    pub fn state(&self) -> GeneratorState {
        self.header.state()
    }

    /// Resume index of the last suspension.
    #[inline]
    pub fn resume_index(&self) -> u32 {
        self.header.resume_index()
    }

    /// The value the body returned; `None` until normal completion.
    pub fn final_value(&self) -> Option<Value> {
        if self.header.is_running() {
            return None;
        }
        self.inner.borrow().final_value.clone()
    }

    /// Returns true while suspended inside a `yield from`.
    pub fn has_delegate(&self) -> bool {
        !self.header.is_running() && self.inner.borrow().delegate.is_some()
    }

    /// Number of values currently held in the saved frame.
    pub fn saved_len(&self) -> usize {
        if self.header.is_running() {
            return 0;
        }
        self.inner.borrow().storage.len()
    }

    // =========================================================================
    // Protocol
    // =========================================================================

    /// `next(gen)`.
    pub fn advance(&self) -> Result<IterResult, GeneratorError> {
        self.resume(Resumption::next())
    }

    /// `gen.send(value)`.
    pub fn send(&self, value: Value) -> Result<IterResult, GeneratorError> {
        self.resume(Resumption::Value(value))
    }

    /// `gen.throw(exception)`.
    pub fn throw(&self, exception: Exception) -> Result<IterResult, GeneratorError> {
        self.resume(Resumption::Throw(exception))
    }

    /// `gen.close()`.
    pub fn close(&self) -> Result<(), GeneratorError> {
        close_outcome(self.resume(Resumption::Close))
    }

    fn resume(&self, resumption: Resumption) -> Result<IterResult, GeneratorError> {
        let _depth = self.enter(&resumption)?;
        match self.start(resumption) {
            Start::Settled(result) => result,
            Start::Run(frame, pending) => context::with_stack(|| self.drive(frame, pending)),
        }
    }

    /// Take one call level if `resumption` is going to run the body.
    fn enter(&self, resumption: &Resumption) -> Result<Option<DepthGuard<'_>>, GeneratorError> {
        let runs = match self.header.state() {
            GeneratorState::Suspended => true,
            GeneratorState::Created => matches!(resumption, Resumption::Value(v) if v.is_none()),
            GeneratorState::Running | GeneratorState::Completed => false,
        };
        if !runs {
            return Ok(None);
        }
        Ok(Some(self.ctx.enter()?))
    }

    /// Apply the lifecycle policy for `resumption`. When the body has to
    /// run, move to `Running` and rebuild its frame.
    fn start(&self, resumption: Resumption) -> Start {
        let (state, index) = self.header.state_and_index();
        match state {
            GeneratorState::Running => return Start::Settled(Err(GeneratorError::AlreadyRunning)),
            GeneratorState::Completed => {
                return Start::Settled(match resumption {
                    Resumption::Throw(exc) => Err(GeneratorError::Raised(exc)),
                    _ => Ok(IterResult::Returned(Value::None)),
                });
            }
            GeneratorState::Created => match resumption {
                Resumption::Value(ref value) if !value.is_none() => {
                    return Start::Settled(Err(GeneratorError::CantSendNonNone));
                }
                Resumption::Throw(exc) => {
                    self.finish(None);
                    return Start::Settled(Err(GeneratorError::Raised(exc)));
                }
                Resumption::Close => {
                    self.finish(None);
                    return Start::Settled(Ok(IterResult::Returned(Value::None)));
                }
                Resumption::Value(_) => {}
            },
            GeneratorState::Suspended => {}
        }

        if self.header.try_start().is_none() {
            return Start::Settled(Err(GeneratorError::AlreadyRunning));
        }
        trace!(generator = %self.code.name, from = %state, resume_index = index, "running");

        let mut frame = Frame::new(self.code.register_count as usize);
        match self.prepare_frame(state, index, &mut frame, resumption) {
            Ok(pending) => Start::Run(frame, pending),
            Err(exc) => {
                self.finish(None);
                Start::Settled(Err(GeneratorError::Raised(exc)))
            }
        }
    }

    /// Run this generator's body, and every generator it delegates to, on
    /// one driver stack until this body leaves.
    fn drive(&self, frame: Frame, pending: Option<Exception>) -> Result<IterResult, GeneratorError> {
        let mut stack = vec![Activation {
            owner: Owner::Root(self),
            frame,
            pending,
            link: None,
        }];

        loop {
            let Some(top) = stack.last_mut() else {
                return Err(GeneratorError::Raised(Exception::internal("generator driver stack underflow")));
            };
            let outcome = interpreter::execute(
                &top.owner.ctx,
                &top.owner.code,
                &mut top.frame,
                Some(&*top.owner),
                top.pending.take(),
            );
            let result = match outcome {
                Ok(Exit::Delegate(delegation)) => {
                    descend(&mut stack, delegation);
                    continue;
                }
                outcome => top.owner.settle(outcome, &top.frame),
            };

            let Some(Activation { link: Some(link), .. }) = stack.pop() else {
                return result;
            };
            match stack.last_mut() {
                Some(parent) => parent.complete_step(link, result),
                None => {
                    return Err(GeneratorError::Raised(Exception::internal(
                        "nested generator finished without a parent",
                    )));
                }
            }
        }
    }

    /// Record how a run of the body ended.
    fn settle(&self, outcome: Result<Exit, Exception>, frame: &Frame) -> Result<IterResult, GeneratorError> {
        match outcome {
            Ok(Exit::Yield(value, resume)) => {
                let saved = {
                    let mut inner = self.inner.borrow_mut();
                    suspend::save(&self.code, resume, &mut inner.storage, frame)
                };
                if let Err(exc) = saved {
                    self.finish(None);
                    return Err(GeneratorError::Raised(exc));
                }
                self.header.suspend(resume);
                trace!(generator = %self.code.name, resume_index = resume, "suspended");
                Ok(IterResult::Yielded(value))
            }
            Ok(Exit::Return(value)) => {
                self.finish(Some(value.clone()));
                Ok(IterResult::Returned(value))
            }
            Ok(Exit::Delegate(_)) => {
                self.finish(None);
                Err(GeneratorError::Raised(Exception::internal(
                    "delegation step escaped the generator driver",
                )))
            }
            Err(exc) => {
                self.finish(None);
                Err(GeneratorError::Raised(escaped(exc)))
            }
        }
    }

    /// Fill `frame` for a run starting from `state`.
    fn prepare_frame(
        &self,
        state: GeneratorState,
        index: u32,
        frame: &mut Frame,
        resumption: Resumption,
    ) -> Result<Option<Exception>, Exception> {
        let mut inner = self.inner.borrow_mut();
        let inner = &mut *inner;
        if state == GeneratorState::Created {
            inner
                .storage
                .restore(&mut frame.registers, self.code.frame_layout.entry);
            return Ok(None);
        }
        suspend::restore(
            &self.code,
            index,
            &mut inner.storage,
            inner.delegate.as_mut(),
            frame,
            resumption,
        )
    }

    /// Enter `Completed`. Saved values are dropped after the borrow ends,
    /// since their destructors may run guest code.
    fn finish(&self, final_value: Option<Value>) {
        self.header.complete();
        let (storage, delegate) = {
            let mut inner = self.inner.borrow_mut();
            inner.final_value = final_value;
            (std::mem::take(&mut inner.storage), inner.delegate.take())
        };
        drop(storage);
        drop(delegate);
        trace!(generator = %self.code.name, "completed");
    }

    // =========================================================================
    // Delegate Slot
    // =========================================================================

    /// Install the delegate of a starting `yield from`.
    pub(crate) fn begin_delegate(&self, frame: DelegationFrame) {
        let old = self.inner.borrow_mut().delegate.replace(frame);
        drop(old);
    }

    /// Take the delegate out of the slot for one driver step.
    pub(crate) fn take_delegate(&self) -> Option<DelegationFrame> {
        self.inner.borrow_mut().delegate.take()
    }

    /// Put the delegate back after it yielded.
    pub(crate) fn restore_delegate(&self, frame: DelegationFrame) {
        self.inner.borrow_mut().delegate = Some(frame);
    }

    /// A strong handle to this generator, while one exists.
    fn strong(&self) -> Option<Rc<Self>> {
        self.this.upgrade()
    }
}

// =============================================================================
// Driver Stack
// =============================================================================

/// Result of asking a generator to run.
enum Start {
    /// Answered by the lifecycle policy; the body did not run.
    Settled(Result<IterResult, GeneratorError>),
    /// The body runs in this frame, raising the exception first if any.
    Run(Frame, Option<Exception>),
}

/// What a nested run was asked to do.
#[derive(Debug)]
enum Request {
    /// `next`, `send` or `throw`: the outcome is the parent's step result.
    Resume,
    /// `close`: a clean close raises this exception in the parent.
    Close(Exception),
}

/// The parent's parked `yield from` step.
struct Link {
    delegation: DelegationFrame,
    request: Request,
}

enum Owner<'a> {
    Root(&'a GeneratorObject),
    Nested(Rc<GeneratorObject>),
}

impl Deref for Owner<'_> {
    type Target = GeneratorObject;

    fn deref(&self) -> &GeneratorObject {
        match self {
            Owner::Root(generator) => generator,
            Owner::Nested(generator) => generator,
        }
    }
}

/// A body executing on the driver stack.
struct Activation<'a> {
    owner: Owner<'a>,
    frame: Frame,
    pending: Option<Exception>,
    /// `None` for the generator the resume call was made on.
    link: Option<Link>,
}

impl Activation<'_> {
    /// Finish the parked `DelegateStep` with a nested generator's outcome.
    fn complete_step(&mut self, link: Link, result: Result<IterResult, GeneratorError>) {
        let Link { delegation, request } = link;
        let outcome = match request {
            Request::Resume => result.map_err(GeneratorError::into_exception),
            Request::Close(exc) => match close_outcome(result) {
                Ok(()) => Err(exc),
                Err(err) => Err(err.into_exception()),
            },
        };
        if let Err(exc) = self.write_step(delegation, normalize_exhaustion(outcome)) {
            // Raised at the step itself, so its handlers apply.
            self.pending = Some(exc);
        }
    }

    fn write_step(
        &mut self,
        delegation: DelegationFrame,
        outcome: Result<IterResult, Exception>,
    ) -> Result<(), Exception> {
        let ip = self.frame.ip;
        let Some(&Instruction::DelegateStep { value, done }) = self.owner.code.instructions.get(ip as usize)
        else {
            return Err(Exception::internal(format_args!(
                "'{}' parked a delegation away from a DelegateStep (at {})",
                self.owner.code.name, ip
            )));
        };
        match outcome? {
            IterResult::Yielded(v) => {
                self.owner.restore_delegate(delegation);
                self.frame.set(value, v)?;
                self.frame.set(done, Value::Bool(false))?;
            }
            IterResult::Returned(v) => {
                debug!(generator = %self.owner.code.name, result = %v, "delegation finished");
                drop(delegation);
                self.frame.set(value, v)?;
                self.frame.set(done, Value::Bool(true))?;
            }
        }
        self.frame.ip = ip + 1;
        Ok(())
    }
}

/// Forward the parked step's resumption into the nested generator, pushing
/// its body when it has to run.
fn descend(stack: &mut Vec<Activation<'_>>, mut delegation: DelegationFrame) {
    let resumption = mem::take(&mut delegation.pending);
    let Some(child) = delegation.nested_generator().and_then(GeneratorObject::strong) else {
        if let Some(parent) = stack.last_mut() {
            parent.pending = Some(Exception::internal("delegation parked without a nested generator"));
        }
        return;
    };

    let (request, start) = match resumption {
        Resumption::Throw(exc) if exc.is(&ExceptionKind::GeneratorExit) => {
            debug!(delegate = %child.name(), "closing nested generator for thrown GeneratorExit");
            (Request::Close(exc), child.start(Resumption::Close))
        }
        Resumption::Close => {
            debug!(delegate = %child.name(), "closing nested generator");
            (Request::Close(Exception::generator_exit()), child.start(Resumption::Close))
        }
        other => {
            trace!(delegate = %child.name(), "resuming nested generator");
            (Request::Resume, child.start(other))
        }
    };

    let link = Link { delegation, request };
    match start {
        Start::Run(frame, pending) => stack.push(Activation {
            owner: Owner::Nested(child),
            frame,
            pending,
            link: Some(link),
        }),
        Start::Settled(result) => {
            if let Some(parent) = stack.last_mut() {
                parent.complete_step(link, result);
            }
        }
    }
}

/// How a run requested by `close()` reads as a close result.
fn close_outcome(result: Result<IterResult, GeneratorError>) -> Result<(), GeneratorError> {
    match result {
        Ok(IterResult::Yielded(_)) => Err(GeneratorError::IgnoredGeneratorExit),
        Ok(IterResult::Returned(_)) => Ok(()),
        Err(GeneratorError::Raised(exc)) if exc.is(&ExceptionKind::GeneratorExit) => Ok(()),
        Err(err) => Err(err),
    }
}

/// A `StopIteration` escaping a generator body becomes a `RuntimeError`.
fn escaped(exc: Exception) -> Exception {
    if exc.is(&ExceptionKind::StopIteration) {
        Exception::runtime_error("generator raised StopIteration")
    } else {
        exc
    }
}

impl Drop for GeneratorObject {
    fn drop(&mut self) {
        if self.header.state() != GeneratorState::Suspended || !self.ctx.config().close_on_drop {
            return;
        }
        if let Err(err) = self.close() {
            warn!(generator = %self.code.name, error = %err, "error while closing dropped generator");
        }
    }
}

impl fmt::Debug for GeneratorObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeneratorObject")
            .field("name", &self.code.name)
            .field("header", &self.header)
            .finish_non_exhaustive()
    }
}

impl Object for GeneratorObject {
    fn type_name(&self) -> &str {
        "generator"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn repr(&self) -> String {
        format!("<generator object {}>", self.code.name)
    }

    fn get_iter(self: Rc<Self>) -> Slot<Value> {
        Some(Ok(Value::Object(self)))
    }

    fn next(&self) -> Slot<IterResult> {
        Some(self.advance().map_err(GeneratorError::into_exception))
    }

    fn send(&self, value: Value) -> Slot<IterResult> {
        Some(GeneratorObject::send(self, value).map_err(GeneratorError::into_exception))
    }

    fn throw(&self, exception: Exception) -> Slot<IterResult> {
        Some(GeneratorObject::throw(self, exception).map_err(GeneratorError::into_exception))
    }

    fn close(&self) -> Slot<()> {
        Some(GeneratorObject::close(self).map_err(GeneratorError::into_exception))
    }
}
