use std::rc::Rc;

use anyhow::Result;
use tracing::{debug, trace, warn};

use super::code::CodeObject;
use super::collections;
use super::config::{EngineConfig, InterruptHandle};
use super::frame::{BlockKind, Frame, FrameInfo, Namespace, new_namespace};
use super::instruction::{Op, forward_target};
use super::unwind::{self, Signal};
use crate::error::{StepLimitExceeded, StructuralError, UncaughtException};
use crate::host::Host;
use crate::util::fast_map::FastHashMap;
use crate::val::{Dict, ExcKind, ExcRef, Exception, Val, attr, builtins, iter};

const ANNOTATIONS: &str = "__annotations__";

/// Why an instruction could not complete normally.
pub(super) enum Fault {
    /// A guest exception, routed through block unwinding.
    Guest(ExcRef),
    /// Ends the run immediately.
    Fatal(anyhow::Error),
}

impl From<anyhow::Error> for Fault {
    fn from(err: anyhow::Error) -> Self {
        if err.is::<StructuralError>() || err.is::<StepLimitExceeded>() || err.is::<UncaughtException>() {
            return Fault::Fatal(err);
        }
        Fault::Guest(Exception::from_host_error(err))
    }
}

impl From<StructuralError> for Fault {
    fn from(err: StructuralError) -> Self {
        Fault::Fatal(anyhow::Error::new(err))
    }
}

pub(super) fn guest(kind: ExcKind, message: impl Into<String>) -> Fault {
    Fault::Guest(Exception::with_message(kind, message))
}

/// Result of executing one instruction via [`Engine::step`].
#[derive(Debug, Clone, PartialEq)]
pub enum Progress {
    Running,
    Finished(Val),
}

/// Executes instruction streams against an explicit frame stack.
///
/// One engine runs one program at a time; independent engines share nothing.
pub struct Engine<H: Host> {
    pub(super) host: H,
    pub(super) config: EngineConfig,
    pub(super) frames: Vec<Frame>,
    pub(super) globals: Namespace,
    builtins: FastHashMap<String, Val>,
    /// The exception an `except` body is currently handling.
    pub(super) handled: Option<ExcRef>,
    interrupt: InterruptHandle,
    steps: u64,
}

impl<H: Host> Engine<H> {
    pub fn new(host: H) -> Self {
        Self::with_config(host, EngineConfig::default())
    }

    pub fn with_config(host: H, config: EngineConfig) -> Self {
        Self {
            host,
            config,
            frames: Vec::new(),
            globals: new_namespace(),
            builtins: builtins::namespace_entries().into_iter().collect(),
            handled: None,
            interrupt: InterruptHandle::default(),
            steps: 0,
        }
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn interrupt_handle(&self) -> InterruptHandle {
        self.interrupt.clone()
    }

    /// Instructions executed by the current or last run.
    pub fn steps(&self) -> u64 {
        self.steps
    }

    /// Live frames, outermost first.
    pub fn frames(&self) -> Vec<FrameInfo> {
        self.frames.iter().map(Frame::info).collect()
    }

    /// A global of the current or last run.
    pub fn global(&self, name: &str) -> Option<Val> {
        self.globals.borrow().get(name).cloned()
    }

    /// Runs `code` as the top-level frame to completion.
    ///
    /// An exception escaping every handler is returned as an
    /// [`UncaughtException`] inside the error.
    pub fn run(&mut self, code: CodeObject) -> Result<Val> {
        self.load(code)?;
        loop {
            if let Progress::Finished(value) = self.step()? {
                return Ok(value);
            }
        }
    }

    /// Installs `code` as a fresh root frame without executing it.
    pub fn load(&mut self, code: CodeObject) -> Result<()> {
        if !self.frames.is_empty() {
            return Err(StructuralError::EngineBusy.into());
        }
        self.globals = new_namespace();
        self.globals
            .borrow_mut()
            .insert("__name__".to_string(), Val::str("__main__"));
        self.handled = None;
        self.steps = 0;
        debug!(target: "framevm::vm::frame", code = %code.name, "push root frame");
        self.frames.push(Frame::module(Rc::new(code), self.globals.clone()));
        Ok(())
    }

    /// Executes one instruction and drains any signal it produced.
    pub fn step(&mut self) -> Result<Progress> {
        let outcome = match self.execute_next() {
            Ok(None) => Ok(Progress::Running),
            Ok(Some(signal)) => self.deliver(signal),
            Err(Fault::Guest(exc)) => self.deliver(Signal::Raise(exc)),
            Err(Fault::Fatal(err)) => Err(err),
        };
        if outcome.is_err() {
            self.frames.clear();
            self.handled = None;
        }
        outcome
    }

    fn check_budget(&mut self) -> Result<(), Fault> {
        self.steps += 1;
        if let Some(limit) = self.config.max_steps
            && self.steps > limit
        {
            return Err(Fault::Fatal(StepLimitExceeded { limit }.into()));
        }
        if self.interrupt.take() {
            warn!(target: "framevm::vm::interrupt", steps = self.steps, "interrupt requested");
            return Err(guest(ExcKind::KeyboardInterrupt, ""));
        }
        Ok(())
    }

    pub(super) fn frame(&mut self) -> Result<&mut Frame, StructuralError> {
        self.frames.last_mut().ok_or(StructuralError::EmptyFrameStack)
    }

    fn execute_next(&mut self) -> Result<Option<Signal>, Fault> {
        self.check_budget()?;
        let trace_enabled = self.config.trace_instructions;
        let frame = self.frame()?;
        let code = frame.code.clone();
        let Some(instr) = code.instructions.get(frame.ip) else {
            // Falling off the end returns None.
            return Ok(Some(Signal::Return(Val::None)));
        };
        frame.offset = instr.offset;
        frame.ip += 1;
        if trace_enabled {
            trace!(
                target: "framevm::vm::dispatch",
                code = %code.name,
                offset = instr.offset,
                op = instr.op.mnemonic(),
                depth = frame.stack.len(),
            );
        }
        self.execute(&instr.op)
    }

    /// Routes a signal through the current frame's blocks and, when it
    /// survives them, out to the caller.
    fn deliver(&mut self, mut signal: Signal) -> Result<Progress> {
        loop {
            let frame = self.frames.last_mut().ok_or(StructuralError::EmptyFrameStack)?;
            let Some(escaped) = unwind::unwind(frame, signal, &mut self.handled)? else {
                return Ok(Progress::Running);
            };
            let offset = frame.offset;
            let done = self.frames.pop().ok_or(StructuralError::EmptyFrameStack)?;
            debug!(
                target: "framevm::vm::frame",
                code = %done.code.name,
                signal = escaped.name(),
                depth = self.frames.len(),
                "pop frame"
            );
            match escaped {
                Signal::Return(value) => match self.frames.last_mut() {
                    Some(caller) => {
                        caller.push(value);
                        return Ok(Progress::Running);
                    }
                    None => return Ok(Progress::Finished(value)),
                },
                Signal::Raise(exc) => {
                    exc.push_trace(&done.code.name, offset);
                    if self.frames.is_empty() {
                        debug!(target: "framevm::vm::frame", kind = %exc.kind(), "uncaught exception");
                        return Err(exc.to_uncaught().into());
                    }
                    signal = Signal::Raise(exc);
                }
                other => {
                    return Err(StructuralError::SignalOutsideLoop {
                        at: offset,
                        signal: other.name(),
                    }
                    .into());
                }
            }
        }
    }

    fn load_name(&mut self, name: &str) -> Result<Val, Fault> {
        let frame = self.frame()?;
        if let Some(value) = frame.locals.borrow().get(name) {
            return Ok(value.clone());
        }
        if let Some(value) = frame.fast_by_name(name) {
            return Ok(value);
        }
        let globals = frame.globals.clone();
        self.load_global(&globals, name)
    }

    fn load_global(&self, globals: &Namespace, name: &str) -> Result<Val, Fault> {
        if let Some(value) = globals.borrow().get(name) {
            return Ok(value.clone());
        }
        self.builtins
            .get(name)
            .cloned()
            .ok_or_else(|| guest(ExcKind::NameError, format!("name '{name}' is not defined")))
    }

    fn unbound_local(frame: &Frame, slot: u32) -> Fault {
        let name = frame.code.varnames.get(slot as usize).map_or("?", String::as_str);
        guest(
            ExcKind::UnboundLocalError,
            format!("local variable '{name}' referenced before assignment"),
        )
    }

    fn unbound_cell(frame: &Frame, name: &str) -> Fault {
        let message = if frame.code.freevars.iter().any(|n| n == name) {
            format!("free variable '{name}' referenced before assignment in enclosing scope")
        } else {
            format!("local variable '{name}' referenced before assignment")
        };
        guest(ExcKind::NameError, message)
    }

    fn execute(&mut self, op: &Op) -> Result<Option<Signal>, Fault> {
        match op {
            Op::Nop | Op::ExtendedArg(_) => {}
            Op::PopTop => {
                self.frame()?.pop()?;
            }
            Op::RotTwo => self.frame()?.rotate(2)?,
            Op::RotThree => self.frame()?.rotate(3)?,
            Op::DupTop => {
                let frame = self.frame()?;
                let top = frame.peek(0)?.clone();
                frame.push(top);
            }
            Op::DupTopTwo => {
                let frame = self.frame()?;
                let (second, top) = (frame.peek(1)?.clone(), frame.peek(0)?.clone());
                frame.push(second);
                frame.push(top);
            }

            Op::LoadConst(c) => self.frame()?.push(c.to_val()),
            Op::LoadName(name) => {
                let value = self.load_name(name)?;
                self.frame()?.push(value);
            }
            Op::StoreName(name) => {
                let frame = self.frame()?;
                let value = frame.pop()?;
                frame.locals.borrow_mut().insert(name.clone(), value);
            }
            Op::DeleteName(name) => {
                let frame = self.frame()?;
                if frame.locals.borrow_mut().remove(name).is_none() {
                    return Err(guest(ExcKind::NameError, format!("name '{name}' is not defined")));
                }
            }
            Op::LoadGlobal(name) => {
                let globals = self.frame()?.globals.clone();
                let value = self.load_global(&globals, name)?;
                self.frame()?.push(value);
            }
            Op::StoreGlobal(name) => {
                let frame = self.frame()?;
                let value = frame.pop()?;
                frame.globals.borrow_mut().insert(name.clone(), value);
            }
            Op::DeleteGlobal(name) => {
                let frame = self.frame()?;
                if frame.globals.borrow_mut().remove(name).is_none() {
                    return Err(guest(ExcKind::NameError, format!("name '{name}' is not defined")));
                }
            }
            Op::LoadFast(slot) => {
                let frame = self.frame()?;
                match frame.fast[*slot as usize].clone() {
                    Some(value) => frame.push(value),
                    None => return Err(Self::unbound_local(frame, *slot)),
                }
            }
            Op::StoreFast(slot) => {
                let frame = self.frame()?;
                let value = frame.pop()?;
                frame.fast[*slot as usize] = Some(value);
            }
            Op::DeleteFast(slot) => {
                let frame = self.frame()?;
                if frame.fast[*slot as usize].take().is_none() {
                    return Err(Self::unbound_local(frame, *slot));
                }
            }
            Op::LoadClosure(name) => {
                let frame = self.frame()?;
                let cell = frame.cell(name)?.clone();
                frame.push(Val::Cell(cell));
            }
            Op::LoadDeref(name) => {
                let frame = self.frame()?;
                let value = frame.cell(name)?.get();
                match value {
                    Some(value) => frame.push(value),
                    None => return Err(Self::unbound_cell(frame, name)),
                }
            }
            Op::StoreDeref(name) => {
                let frame = self.frame()?;
                let value = frame.pop()?;
                frame.cell(name)?.set(value);
            }
            Op::DeleteDeref(name) => {
                let frame = self.frame()?;
                if !frame.cell(name)?.clear() {
                    return Err(Self::unbound_cell(frame, name));
                }
            }
            Op::LoadAttr(name) => {
                let frame = self.frame()?;
                let obj = frame.pop()?;
                frame.push(attr::get_attr(&obj, name)?);
            }
            Op::StoreAttr(name) => {
                let frame = self.frame()?;
                let obj = frame.pop()?;
                let value = frame.pop()?;
                attr::set_attr(&obj, name, value)?;
            }
            Op::DeleteAttr(name) => {
                let obj = self.frame()?.pop()?;
                attr::delete_attr(&obj, name)?;
            }
            Op::BinarySubscr => {
                let frame = self.frame()?;
                let key = frame.pop()?;
                let obj = frame.pop()?;
                frame.push(attr::get_item(&obj, &key)?);
            }
            Op::StoreSubscr => {
                let frame = self.frame()?;
                let key = frame.pop()?;
                let obj = frame.pop()?;
                let value = frame.pop()?;
                attr::set_item(&obj, &key, value)?;
            }
            Op::DeleteSubscr => {
                let frame = self.frame()?;
                let key = frame.pop()?;
                let obj = frame.pop()?;
                attr::delete_item(&obj, &key)?;
            }

            Op::UnaryOp(kind) => {
                let frame = self.frame()?;
                let value = frame.pop()?;
                frame.push(kind.func()(&value)?);
            }
            Op::BinaryOp(kind) => {
                let frame = self.frame()?;
                let rhs = frame.pop()?;
                let lhs = frame.pop()?;
                frame.push(kind.binary()(&lhs, &rhs)?);
            }
            Op::InplaceOp(kind) => {
                let frame = self.frame()?;
                let rhs = frame.pop()?;
                let lhs = frame.pop()?;
                frame.push(kind.inplace()(&lhs, &rhs)?);
            }
            Op::CompareOp(kind) => {
                let frame = self.frame()?;
                let rhs = frame.pop()?;
                let lhs = frame.pop()?;
                frame.push(kind.func()(&lhs, &rhs)?);
            }

            Op::JumpForward(delta) => {
                let frame = self.frame()?;
                let target = forward_target(frame.offset, *delta);
                let target = u32::try_from(target).map_err(|_| StructuralError::UnknownJumpTarget {
                    at: frame.offset,
                    target,
                })?;
                frame.jump(target)?;
            }
            Op::JumpAbsolute(target) => self.frame()?.jump(*target)?,
            Op::PopJumpIfTrue(target) => {
                let frame = self.frame()?;
                if frame.pop()?.truthy() {
                    frame.jump(*target)?;
                }
            }
            Op::PopJumpIfFalse(target) => {
                let frame = self.frame()?;
                if !frame.pop()?.truthy() {
                    frame.jump(*target)?;
                }
            }
            Op::JumpIfTrueOrPop(target) => {
                let frame = self.frame()?;
                if frame.peek(0)?.truthy() {
                    frame.jump(*target)?;
                } else {
                    frame.pop()?;
                }
            }
            Op::JumpIfFalseOrPop(target) => {
                let frame = self.frame()?;
                if frame.peek(0)?.truthy() {
                    frame.pop()?;
                } else {
                    frame.jump(*target)?;
                }
            }

            Op::BuildTuple(_)
            | Op::BuildList(_)
            | Op::BuildSet(_)
            | Op::BuildMap(_)
            | Op::BuildConstKeyMap(_)
            | Op::BuildString(_)
            | Op::BuildSlice(_)
            | Op::BuildTupleUnpack(_)
            | Op::BuildTupleUnpackWithCall(_)
            | Op::BuildListUnpack(_)
            | Op::BuildSetUnpack(_)
            | Op::BuildMapUnpack(_)
            | Op::BuildMapUnpackWithCall(_)
            | Op::ListAppend(_)
            | Op::SetAdd(_)
            | Op::MapAdd(_)
            | Op::UnpackSequence(_)
            | Op::UnpackEx(_) => collections::execute(self.frame()?, op)?,

            Op::GetIter => {
                let frame = self.frame()?;
                let value = frame.pop()?;
                frame.push(iter::get_iter(&value)?);
            }
            Op::ForIter(exit) => {
                let frame = self.frame()?;
                let next = iter::next(frame.peek(0)?)?;
                match next {
                    Some(item) => frame.push(item),
                    None => {
                        frame.pop()?;
                        frame.jump(*exit)?;
                    }
                }
            }

            Op::SetupLoop(end) => self.frame()?.push_block(BlockKind::Loop, *end),
            Op::SetupExcept(handler) => self.frame()?.push_block(BlockKind::ExceptGuard, *handler),
            Op::SetupFinally(handler) => self.frame()?.push_block(BlockKind::FinallyGuard, *handler),
            Op::PopBlock => {
                let frame = self.frame()?;
                let block = frame.pop_block()?;
                frame.truncate(block.level);
            }
            Op::PopExcept => {
                let frame = self.frames.last_mut().ok_or(StructuralError::EmptyFrameStack)?;
                unwind::pop_except(frame, &mut self.handled)?;
            }
            Op::EndFinally => return Ok(unwind::end_finally(self.frame()?)?),
            Op::BreakLoop => return Ok(Some(Signal::Break)),
            Op::ContinueLoop(target) => return Ok(Some(Signal::Continue(*target))),

            Op::MakeFunction(flags) => self.make_function(*flags)?,
            Op::CallFunction(argc) => self.call_function(*argc as usize)?,
            Op::CallFunctionKw(argc) => self.call_function_kw(*argc as usize)?,
            Op::CallFunctionEx(flags) => self.call_function_ex(*flags)?,
            Op::ReturnValue => {
                let value = self.frame()?.pop()?;
                return Ok(Some(Signal::Return(value)));
            }
            Op::RaiseVarargs(argc) => return Err(self.raise(*argc)?),

            Op::ImportName(name) => {
                let frame = self.frame()?;
                frame.pop()?;
                frame.pop()?;
                let module = self.host.import_module(name)?;
                self.frame()?.push(module);
            }
            Op::ImportFrom(name) => {
                let frame = self.frame()?;
                let module = frame.peek(0)?.clone();
                let value = attr::get_attr(&module, name).map_err(|_| {
                    let from = match &module {
                        Val::Module(m) => m.name.clone(),
                        other => other.type_name().to_string(),
                    };
                    guest(ExcKind::ImportError, format!("cannot import name '{name}' from '{from}'"))
                })?;
                frame.push(value);
            }
            Op::ImportStar => {
                let frame = self.frame()?;
                let module = frame.pop()?;
                let Val::Module(module) = module else {
                    return Err(guest(ExcKind::TypeError, "import * expects a module"));
                };
                let mut locals = frame.locals.borrow_mut();
                for (name, value) in module.attrs.borrow().iter() {
                    if !name.starts_with('_') {
                        locals.insert(name.clone(), value.clone());
                    }
                }
            }
            Op::PrintExpr => {
                let value = self.frame()?.pop()?;
                if !matches!(value, Val::None) {
                    self.host.write_stdout(&format!("{}\n", value.repr()))?;
                }
            }

            Op::SetupAnnotations => {
                let frame = self.frame()?;
                frame
                    .locals
                    .borrow_mut()
                    .entry(ANNOTATIONS.to_string())
                    .or_insert_with(|| Val::dict(Dict::new()));
            }
            Op::StoreAnnotation(name) => {
                let frame = self.frame()?;
                let value = frame.pop()?;
                let annotations = frame.locals.borrow().get(ANNOTATIONS).cloned();
                let Some(annotations) = annotations else {
                    return Err(guest(ExcKind::NameError, "__annotations__ not found"));
                };
                attr::set_item(&annotations, &Val::str(name), value)?;
            }
        }
        Ok(None)
    }

    /// `RAISE_VARARGS`: builds the exception to raise, returned as the fault.
    fn raise(&mut self, argc: u32) -> Result<Fault, Fault> {
        let frame = self.frame()?;
        let exc = match argc {
            0 => {
                return Ok(match &self.handled {
                    Some(exc) => Fault::Guest(exc.clone()),
                    None => guest(ExcKind::RuntimeError, "No active exception to reraise"),
                });
            }
            1 => frame.pop()?,
            2 => {
                let cause = frame.pop()?;
                let exc = instantiate(frame.pop()?)?;
                let cause = match cause {
                    Val::None => None,
                    other => Some(instantiate(other)?),
                };
                exc.set_cause(cause);
                return Ok(Fault::Guest(exc));
            }
            n => {
                return Err(StructuralError::BadOperand {
                    at: frame.offset,
                    message: format!("RAISE_VARARGS takes at most 2 operands, got {n}"),
                }
                .into());
            }
        };
        Ok(Fault::Guest(instantiate(exc)?))
    }
}

/// Turns a raised value into an exception instance.
fn instantiate(value: Val) -> Result<ExcRef, Fault> {
    match value {
        Val::Exception(exc) => Ok(exc),
        Val::ExcType(kind) => Ok(Exception::new(kind, Vec::new())),
        _ => Err(guest(ExcKind::TypeError, "exceptions must derive from BaseException")),
    }
}
