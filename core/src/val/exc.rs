use std::{cell::RefCell, fmt, rc::Rc};

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoStaticStr};

use super::Val;
use crate::error::UncaughtException;

/// Built-in exception kinds.
///
/// The hierarchy mirrors the reference host closely enough for handler
/// matching; see [`ExcKind::parent`].
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr, EnumIter, Serialize, Deserialize,
)]
pub enum ExcKind {
    BaseException,
    Exception,
    KeyboardInterrupt,
    SystemExit,
    ArithmeticError,
    OverflowError,
    ZeroDivisionError,
    LookupError,
    IndexError,
    KeyError,
    RuntimeError,
    NotImplementedError,
    RecursionError,
    AttributeError,
    NameError,
    UnboundLocalError,
    ValueError,
    TypeError,
    ImportError,
    ModuleNotFoundError,
    AssertionError,
    StopIteration,
    MemoryError,
}

impl ExcKind {
    pub fn parent(self) -> Option<ExcKind> {
        use ExcKind::*;
        match self {
            BaseException => None,
            Exception | KeyboardInterrupt | SystemExit => Some(BaseException),
            ArithmeticError | LookupError | RuntimeError | AttributeError | NameError | ValueError | TypeError
            | ImportError | AssertionError | StopIteration | MemoryError => Some(Exception),
            OverflowError | ZeroDivisionError => Some(ArithmeticError),
            IndexError | KeyError => Some(LookupError),
            NotImplementedError | RecursionError => Some(RuntimeError),
            UnboundLocalError => Some(NameError),
            ModuleNotFoundError => Some(ImportError),
        }
    }

    /// Reflexive subclass test.
    pub fn is_subclass_of(self, other: ExcKind) -> bool {
        let mut current = Some(self);
        while let Some(kind) = current {
            if kind == other {
                return true;
            }
            current = kind.parent();
        }
        false
    }
}

/// One frame an exception passed through while propagating.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceEntry {
    pub name: String,
    pub offset: u32,
}

pub type ExcRef = Rc<Exception>;

/// A raised guest exception value.
#[derive(Debug)]
pub struct Exception {
    kind: ExcKind,
    args: Vec<Val>,
    cause: RefCell<Option<ExcRef>>,
    traceback: RefCell<Vec<TraceEntry>>,
}

impl Exception {
    pub fn new(kind: ExcKind, args: Vec<Val>) -> ExcRef {
        Rc::new(Self {
            kind,
            args,
            cause: RefCell::new(None),
            traceback: RefCell::new(Vec::new()),
        })
    }

    pub fn with_message(kind: ExcKind, message: impl Into<String>) -> ExcRef {
        let message = message.into();
        let args = if message.is_empty() {
            Vec::new()
        } else {
            vec![Val::from(message)]
        };
        Self::new(kind, args)
    }

    /// Converts a host capability failure into a guest exception.
    pub fn from_host_error(err: anyhow::Error) -> ExcRef {
        match err.downcast::<HostError>() {
            Ok(host) => Self::with_message(host.kind, host.message),
            Err(other) => Self::with_message(ExcKind::RuntimeError, format!("{other:#}")),
        }
    }

    pub fn kind(&self) -> ExcKind {
        self.kind
    }

    pub fn args(&self) -> &[Val] {
        &self.args
    }

    /// `str(exc)`: empty, the lone argument, or the argument tuple.
    pub fn message(&self) -> String {
        match self.args.as_slice() {
            [] => String::new(),
            [only] => only.to_string(),
            many => Val::tuple(many.to_vec()).to_string(),
        }
    }

    pub fn cause(&self) -> Option<ExcRef> {
        self.cause.borrow().clone()
    }

    pub fn set_cause(&self, cause: Option<ExcRef>) {
        *self.cause.borrow_mut() = cause;
    }

    pub fn push_trace(&self, name: &str, offset: u32) {
        self.traceback.borrow_mut().push(TraceEntry {
            name: name.to_string(),
            offset,
        });
    }

    pub fn traceback(&self) -> Vec<TraceEntry> {
        self.traceback.borrow().clone()
    }

    pub(crate) fn to_uncaught(&self) -> UncaughtException {
        UncaughtException::new(self.kind, self.message(), self.traceback())
    }
}

/// Error raised by a host capability, surfaced to guest code as `kind`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostError {
    pub kind: ExcKind,
    pub message: String,
}

impl fmt::Display for HostError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for HostError {}

pub fn host_error(kind: ExcKind, message: impl Into<String>) -> anyhow::Error {
    anyhow::Error::new(HostError {
        kind,
        message: message.into(),
    })
}
