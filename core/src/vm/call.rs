use std::rc::Rc;

use tracing::debug;

use super::cell::Cell;
use super::engine::{Engine, Fault, guest};
use super::frame::Frame;
use super::function::FunctionValue;
use super::instruction::FunctionFlags;
use crate::error::StructuralError;
use crate::host::Host;
use crate::val::{ExcKind, Exception, Val, iter};

impl<H: Host> Engine<H> {
    /// `MAKE_FUNCTION`: qualname and code on top, then the optional pieces
    /// in closure, annotations, kwdefaults, defaults order.
    pub(super) fn make_function(&mut self, flags: FunctionFlags) -> Result<(), Fault> {
        let frame = self.frame()?;
        let qualname = frame.pop()?;
        let code = match frame.pop()? {
            Val::Code(code) => code,
            other => {
                return Err(StructuralError::BadOperand {
                    at: frame.offset,
                    message: format!("MAKE_FUNCTION expects a code object, found {}", other.type_name()),
                }
                .into());
            }
        };

        let mut closure = Vec::new();
        if flags.contains(FunctionFlags::CLOSURE) {
            let cells = match frame.pop()? {
                Val::Tuple(items) => items,
                other => return Err(bad_operand(frame, "closure", &other)),
            };
            if cells.len() != code.freevars.len() {
                return Err(StructuralError::BadOperand {
                    at: frame.offset,
                    message: format!(
                        "{} closure cells for {} free variables",
                        cells.len(),
                        code.freevars.len()
                    ),
                }
                .into());
            }
            for (name, cell) in code.freevars.iter().zip(cells.iter()) {
                match cell {
                    Val::Cell(cell) => closure.push((name.clone(), cell.clone())),
                    other => return Err(bad_operand(frame, "closure cell", other)),
                }
            }
        } else if !code.freevars.is_empty() {
            return Err(StructuralError::BadOperand {
                at: frame.offset,
                message: format!("{} has free variables but no closure", code.name),
            }
            .into());
        }

        let annotations = if flags.contains(FunctionFlags::ANNOTATIONS) {
            Some(frame.pop()?)
        } else {
            None
        };

        let mut kwdefaults = Vec::new();
        if flags.contains(FunctionFlags::KWDEFAULTS) {
            match frame.pop()? {
                Val::Dict(dict) => {
                    for (key, value) in dict.borrow().iter() {
                        match key {
                            Val::Str(name) => kwdefaults.push((name.to_string(), value.clone())),
                            other => return Err(bad_operand(frame, "keyword default name", other)),
                        }
                    }
                }
                other => return Err(bad_operand(frame, "keyword defaults", &other)),
            }
        }

        let defaults = if flags.contains(FunctionFlags::DEFAULTS) {
            match frame.pop()? {
                Val::Tuple(items) => items.to_vec(),
                other => return Err(bad_operand(frame, "defaults", &other)),
            }
        } else {
            Vec::new()
        };

        let name = match qualname {
            Val::Str(name) => name.to_string(),
            _ => code.name.clone(),
        };
        let function = FunctionValue {
            code,
            name,
            globals: frame.globals.clone(),
            defaults,
            kwdefaults,
            annotations,
            closure,
        };
        frame.push(Val::Function(Rc::new(function)));
        Ok(())
    }

    /// `CALL_FUNCTION`: `argc` positional arguments above the callee.
    pub(super) fn call_function(&mut self, argc: usize) -> Result<(), Fault> {
        let frame = self.frame()?;
        let args = frame.pop_n(argc)?;
        let callee = frame.pop()?;
        self.invoke(callee, args, Vec::new())
    }

    /// `CALL_FUNCTION_KW`: a tuple of keyword names on top; the last
    /// `names.len()` of the `argc` arguments are keyword values.
    pub(super) fn call_function_kw(&mut self, argc: usize) -> Result<(), Fault> {
        let frame = self.frame()?;
        let names = match frame.pop()? {
            Val::Tuple(names) => names,
            other => return Err(bad_operand(frame, "keyword names", &other)),
        };
        if names.len() > argc {
            return Err(StructuralError::BadOperand {
                at: frame.offset,
                message: format!("{} keyword names for {argc} arguments", names.len()),
            }
            .into());
        }
        let mut args = frame.pop_n(argc)?;
        let callee = frame.pop()?;
        let values = args.split_off(argc - names.len());
        let mut kwargs = Vec::with_capacity(names.len());
        for (name, value) in names.iter().zip(values) {
            match name {
                Val::Str(name) => kwargs.push((name.to_string(), value)),
                other => return Err(bad_operand(self.frame()?, "keyword name", other)),
            }
        }
        self.invoke(callee, args, kwargs)
    }

    /// `CALL_FUNCTION_EX`: positional iterable, plus a mapping when bit 0
    /// of `flags` is set.
    pub(super) fn call_function_ex(&mut self, flags: u32) -> Result<(), Fault> {
        let frame = self.frame()?;
        let mut kwargs = Vec::new();
        if flags & 0x01 != 0 {
            match frame.pop()? {
                Val::Dict(dict) => {
                    for (key, value) in dict.borrow().iter() {
                        match key {
                            Val::Str(name) => kwargs.push((name.to_string(), value.clone())),
                            _ => return Err(guest(ExcKind::TypeError, "keywords must be strings")),
                        }
                    }
                }
                other => {
                    return Err(guest(
                        ExcKind::TypeError,
                        format!("argument after ** must be a mapping, not {}", other.type_name()),
                    ));
                }
            }
        }
        let args = frame.pop()?;
        let callee = frame.pop()?;
        let args = match args {
            Val::Tuple(items) => items.to_vec(),
            other => iter::collect(&other)?,
        };
        self.invoke(callee, args, kwargs)
    }

    /// Calls `callee`. Guest functions get a new frame; everything else
    /// completes immediately and leaves its result on the caller's stack.
    pub(super) fn invoke(&mut self, callee: Val, args: Vec<Val>, kwargs: Vec<(String, Val)>) -> Result<(), Fault> {
        match callee {
            Val::Function(func) => self.push_call_frame(&func, args, kwargs),
            Val::Native(native) => {
                let result = (native.func)(&mut self.host, &args, &kwargs)?;
                self.frame()?.push(result);
                Ok(())
            }
            Val::Method(method) => {
                let mut full = Vec::with_capacity(args.len() + 1);
                full.push(method.receiver.clone());
                full.extend(args);
                let result = (method.func.func)(&mut self.host, &full, &kwargs)?;
                self.frame()?.push(result);
                Ok(())
            }
            Val::ExcType(kind) => {
                if !kwargs.is_empty() {
                    return Err(guest(
                        ExcKind::TypeError,
                        format!("{kind}() takes no keyword arguments"),
                    ));
                }
                self.frame()?.push(Val::Exception(Exception::new(kind, args)));
                Ok(())
            }
            other => Err(guest(
                ExcKind::TypeError,
                format!("'{}' object is not callable", other.type_name()),
            )),
        }
    }

    fn push_call_frame(
        &mut self,
        func: &Rc<FunctionValue>,
        args: Vec<Val>,
        kwargs: Vec<(String, Val)>,
    ) -> Result<(), Fault> {
        if self.frames.len() >= self.config.max_frames {
            return Err(guest(ExcKind::RecursionError, "maximum recursion depth exceeded"));
        }
        let slots = func.bind(args, kwargs)?;
        let closure: &[(String, Cell)] = &func.closure;
        let frame = Frame::function(func.code.clone(), func.globals.clone(), slots, closure);
        debug!(
            target: "framevm::vm::frame",
            code = %func.name,
            depth = self.frames.len() + 1,
            "push frame"
        );
        self.frames.push(frame);
        Ok(())
    }
}

fn bad_operand(frame: &Frame, what: &str, found: &Val) -> Fault {
    StructuralError::BadOperand {
        at: frame.offset,
        message: format!("{what} operand holds {}", found.type_name()),
    }
    .into()
}
