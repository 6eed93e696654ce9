//! Host value model.
//!
//! The engine treats values as opaque and reaches them only through the
//! capability functions in this module tree: operators (`crate::op`),
//! attribute and subscript access (`attr`), truthiness, iteration (`iter`)
//! and native callables (`builtins`, `methods`).

use std::{
    cell::RefCell,
    collections::BTreeMap,
    fmt,
    rc::Rc,
};

use anyhow::Result;

use crate::host::Host;
use crate::vm::{Cell, CodeObject, FunctionValue, Signal};

pub mod attr;
pub mod builtins;
mod display;
mod exc;
pub mod iter;
pub mod methods;

pub use exc::{ExcKind, ExcRef, Exception, HostError, TraceEntry, host_error};
pub use iter::IterState;

/// Signature shared by builtins, bound methods and stdlib module functions.
pub type NativeFn = fn(host: &mut dyn Host, args: &[Val], kwargs: &[(String, Val)]) -> Result<Val>;

#[derive(Clone, Copy)]
pub struct NativeFunction {
    pub name: &'static str,
    pub func: NativeFn,
}

impl NativeFunction {
    pub const fn new(name: &'static str, func: NativeFn) -> Self {
        Self { name, func }
    }
}

/// A native method closed over its receiver.
#[derive(Clone)]
pub struct BoundMethod {
    pub receiver: Val,
    pub func: NativeFunction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeValue {
    pub start: i64,
    pub stop: i64,
    pub step: i64,
}

impl RangeValue {
    pub fn len(&self) -> usize {
        let span = if self.step > 0 {
            i128::from(self.stop) - i128::from(self.start)
        } else {
            i128::from(self.start) - i128::from(self.stop)
        };
        if span <= 0 {
            return 0;
        }
        let step = i128::from(self.step).abs();
        usize::try_from((span + step - 1) / step).unwrap_or(usize::MAX)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, idx: usize) -> Option<i64> {
        if idx >= self.len() {
            return None;
        }
        let value = i128::from(self.start) + i128::from(self.step) * idx as i128;
        i64::try_from(value).ok()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SliceValue {
    pub start: Option<i64>,
    pub stop: Option<i64>,
    pub step: Option<i64>,
}

/// Insertion-ordered mapping keyed by value equality.
#[derive(Clone, Default)]
pub struct Dict {
    entries: Vec<(Val, Val)>,
}

impl Dict {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn position(&self, key: &Val) -> Option<usize> {
        self.entries.iter().position(|(k, _)| k == key)
    }

    pub fn get(&self, key: &Val) -> Option<&Val> {
        self.position(key).map(|idx| &self.entries[idx].1)
    }

    pub fn contains_key(&self, key: &Val) -> bool {
        self.position(key).is_some()
    }

    /// Inserts or replaces; rejects unhashable keys.
    pub fn insert(&mut self, key: Val, value: Val) -> Result<Option<Val>> {
        key.ensure_hashable()?;
        match self.position(&key) {
            Some(idx) => Ok(Some(std::mem::replace(&mut self.entries[idx].1, value))),
            None => {
                self.entries.push((key, value));
                Ok(None)
            }
        }
    }

    pub fn remove(&mut self, key: &Val) -> Option<Val> {
        self.position(key).map(|idx| self.entries.remove(idx).1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Val, &Val)> {
        self.entries.iter().map(|(k, v)| (k, v))
    }

    pub fn keys(&self) -> Vec<Val> {
        self.entries.iter().map(|(k, _)| k.clone()).collect()
    }
}

#[derive(Debug)]
pub struct ModuleValue {
    pub name: String,
    pub attrs: RefCell<BTreeMap<String, Val>>,
}

impl ModuleValue {
    pub fn new(name: impl Into<String>, exports: impl IntoIterator<Item = (String, Val)>) -> Self {
        Self {
            name: name.into(),
            attrs: RefCell::new(exports.into_iter().collect()),
        }
    }
}

#[derive(Clone)]
pub enum Val {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Rc<str>),
    Tuple(Rc<[Val]>),
    List(Rc<RefCell<Vec<Val>>>),
    Dict(Rc<RefCell<Dict>>),
    Set(Rc<RefCell<Vec<Val>>>),
    Range(RangeValue),
    Slice(SliceValue),
    Iter(Rc<RefCell<IterState>>),
    /// Plain attribute bag.
    Namespace(Rc<RefCell<BTreeMap<String, Val>>>),
    Module(Rc<ModuleValue>),
    Native(NativeFunction),
    Method(Rc<BoundMethod>),
    ExcType(ExcKind),
    Exception(ExcRef),
    Function(Rc<FunctionValue>),
    Cell(Cell),
    Code(Rc<CodeObject>),
    /// A control-flow signal parked on the operand stack while a finally region runs.
    Signal(Rc<Signal>),
}

impl Val {
    pub fn str(s: impl AsRef<str>) -> Val {
        Val::Str(Rc::from(s.as_ref()))
    }

    pub fn tuple(items: Vec<Val>) -> Val {
        Val::Tuple(Rc::from(items))
    }

    pub fn list(items: Vec<Val>) -> Val {
        Val::List(Rc::new(RefCell::new(items)))
    }

    pub fn dict(dict: Dict) -> Val {
        Val::Dict(Rc::new(RefCell::new(dict)))
    }

    /// Builds a set, dropping duplicates while keeping first-seen order.
    pub fn set(items: Vec<Val>) -> Result<Val> {
        let mut out: Vec<Val> = Vec::with_capacity(items.len());
        for item in items {
            item.ensure_hashable()?;
            if !out.contains(&item) {
                out.push(item);
            }
        }
        Ok(Val::Set(Rc::new(RefCell::new(out))))
    }

    pub fn namespace(attrs: impl IntoIterator<Item = (String, Val)>) -> Val {
        Val::Namespace(Rc::new(RefCell::new(attrs.into_iter().collect())))
    }

    pub fn native(name: &'static str, func: NativeFn) -> Val {
        Val::Native(NativeFunction::new(name, func))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Val::None => "NoneType",
            Val::Bool(_) => "bool",
            Val::Int(_) => "int",
            Val::Float(_) => "float",
            Val::Str(_) => "str",
            Val::Tuple(_) => "tuple",
            Val::List(_) => "list",
            Val::Dict(_) => "dict",
            Val::Set(_) => "set",
            Val::Range(_) => "range",
            Val::Slice(_) => "slice",
            Val::Iter(_) => "iterator",
            Val::Namespace(_) => "namespace",
            Val::Module(_) => "module",
            Val::Native(_) => "builtin_function_or_method",
            Val::Method(_) => "method",
            Val::ExcType(_) => "type",
            Val::Exception(exc) => exc.kind().into(),
            Val::Function(_) => "function",
            Val::Cell(_) => "cell",
            Val::Code(_) => "code",
            Val::Signal(_) => "signal",
        }
    }

    /// Truthiness test.
    pub fn truthy(&self) -> bool {
        match self {
            Val::None => false,
            Val::Bool(b) => *b,
            Val::Int(i) => *i != 0,
            Val::Float(f) => *f != 0.0,
            Val::Str(s) => !s.is_empty(),
            Val::Tuple(items) => !items.is_empty(),
            Val::List(items) | Val::Set(items) => !items.borrow().is_empty(),
            Val::Dict(d) => !d.borrow().is_empty(),
            Val::Range(r) => !r.is_empty(),
            _ => true,
        }
    }

    /// Integer view of ints and bools.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Val::Int(i) => Some(*i),
            Val::Bool(b) => Some(*b as i64),
            _ => None,
        }
    }

    /// Float view of any real number.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Val::Float(f) => Some(*f),
            other => other.as_int().map(|i| i as f64),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Val::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn ensure_hashable(&self) -> Result<()> {
        match self {
            Val::List(_) | Val::Dict(_) | Val::Set(_) | Val::Namespace(_) => Err(host_error(
                ExcKind::TypeError,
                format!("unhashable type: '{}'", self.type_name()),
            )),
            Val::Tuple(items) => items.iter().try_for_each(Val::ensure_hashable),
            _ => Ok(()),
        }
    }

    /// Identity comparison (`is`).
    pub fn is(&self, other: &Val) -> bool {
        match (self, other) {
            (Val::None, Val::None) => true,
            (Val::Bool(a), Val::Bool(b)) => a == b,
            (Val::Int(a), Val::Int(b)) => a == b,
            (Val::Float(a), Val::Float(b)) => a.to_bits() == b.to_bits(),
            (Val::Str(a), Val::Str(b)) => Rc::ptr_eq(a, b) || a == b,
            (Val::Tuple(a), Val::Tuple(b)) => Rc::ptr_eq(a, b),
            (Val::List(a), Val::List(b)) | (Val::Set(a), Val::Set(b)) => Rc::ptr_eq(a, b),
            (Val::Dict(a), Val::Dict(b)) => Rc::ptr_eq(a, b),
            (Val::Namespace(a), Val::Namespace(b)) => Rc::ptr_eq(a, b),
            (Val::Module(a), Val::Module(b)) => Rc::ptr_eq(a, b),
            (Val::Iter(a), Val::Iter(b)) => Rc::ptr_eq(a, b),
            (Val::Exception(a), Val::Exception(b)) => Rc::ptr_eq(a, b),
            (Val::Function(a), Val::Function(b)) => Rc::ptr_eq(a, b),
            (Val::Cell(a), Val::Cell(b)) => a.ptr_eq(b),
            (Val::Code(a), Val::Code(b)) => Rc::ptr_eq(a, b),
            (Val::ExcType(a), Val::ExcType(b)) => a == b,
            (Val::Native(a), Val::Native(b)) => a.name == b.name,
            _ => false,
        }
    }
}

/// Value equality (`==`).
impl PartialEq for Val {
    fn eq(&self, other: &Val) -> bool {
        match (self, other) {
            (Val::Str(a), Val::Str(b)) => a == b,
            (Val::Float(_), _) | (_, Val::Float(_)) => match (self.as_float(), other.as_float()) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            },
            (Val::Int(_) | Val::Bool(_), Val::Int(_) | Val::Bool(_)) => self.as_int() == other.as_int(),
            (Val::Tuple(a), Val::Tuple(b)) => a[..] == b[..],
            (Val::List(a), Val::List(b)) => Rc::ptr_eq(a, b) || *a.borrow() == *b.borrow(),
            (Val::Set(a), Val::Set(b)) => {
                let (a, b) = (a.borrow(), b.borrow());
                a.len() == b.len() && a.iter().all(|item| b.contains(item))
            }
            (Val::Dict(a), Val::Dict(b)) => {
                if Rc::ptr_eq(a, b) {
                    return true;
                }
                let (a, b) = (a.borrow(), b.borrow());
                a.len() == b.len() && a.iter().all(|(k, v)| b.get(k) == Some(v))
            }
            (Val::Range(a), Val::Range(b)) => a == b,
            (Val::Slice(a), Val::Slice(b)) => a == b,
            _ => self.is(other),
        }
    }
}

impl From<i64> for Val {
    fn from(value: i64) -> Self {
        Val::Int(value)
    }
}

impl From<bool> for Val {
    fn from(value: bool) -> Self {
        Val::Bool(value)
    }
}

impl From<f64> for Val {
    fn from(value: f64) -> Self {
        Val::Float(value)
    }
}

impl From<&str> for Val {
    fn from(value: &str) -> Self {
        Val::str(value)
    }
}

impl From<String> for Val {
    fn from(value: String) -> Self {
        Val::Str(Rc::from(value))
    }
}

impl From<ExcRef> for Val {
    fn from(value: ExcRef) -> Self {
        Val::Exception(value)
    }
}

// Debug renders the guest repr; containers that reference themselves are
// printed with `...` by the display module.
impl fmt::Debug for Val {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.repr())
    }
}
