use std::fmt;
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use strum::IntoStaticStr;

use super::code::CodeObject;
use crate::op::{BinOp, CmpOp, UnaryOp};
use crate::val::Val;

/// Distance between consecutive instruction offsets in a canonical stream.
pub const INSTRUCTION_STRIDE: u32 = 2;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instruction {
    pub offset: u32,
    #[serde(flatten)]
    pub op: Op,
}

impl Instruction {
    pub fn new(offset: u32, op: Op) -> Self {
        Self { offset, op }
    }

    /// Absolute target of a jump-carrying instruction.
    ///
    /// Widened to `u64` so a relative jump past the offset range stays representable.
    pub fn jump_target(&self) -> Option<u64> {
        match &self.op {
            Op::JumpForward(delta) => Some(forward_target(self.offset, *delta)),
            Op::JumpAbsolute(t)
            | Op::PopJumpIfTrue(t)
            | Op::PopJumpIfFalse(t)
            | Op::JumpIfTrueOrPop(t)
            | Op::JumpIfFalseOrPop(t)
            | Op::ForIter(t)
            | Op::SetupLoop(t)
            | Op::SetupExcept(t)
            | Op::SetupFinally(t)
            | Op::ContinueLoop(t) => Some(u64::from(*t)),
            _ => None,
        }
    }
}

/// Target of a `JumpForward(delta)` at `offset`, relative to the next instruction.
pub fn forward_target(offset: u32, delta: u32) -> u64 {
    u64::from(offset) + u64::from(INSTRUCTION_STRIDE) + u64::from(delta)
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mnemonic: &'static str = (&self.op).into();
        write!(f, "{:>6} {mnemonic:<24}", self.offset)?;
        match &self.op {
            Op::LoadConst(c) => write!(f, " {}", c.to_val().repr()),
            Op::LoadName(n)
            | Op::StoreName(n)
            | Op::DeleteName(n)
            | Op::LoadGlobal(n)
            | Op::StoreGlobal(n)
            | Op::DeleteGlobal(n)
            | Op::LoadClosure(n)
            | Op::LoadDeref(n)
            | Op::StoreDeref(n)
            | Op::DeleteDeref(n)
            | Op::LoadAttr(n)
            | Op::StoreAttr(n)
            | Op::DeleteAttr(n)
            | Op::ImportName(n)
            | Op::ImportFrom(n)
            | Op::StoreAnnotation(n) => write!(f, " {n}"),
            Op::UnaryOp(op) => write!(f, " ({op})"),
            Op::BinaryOp(op) | Op::InplaceOp(op) => write!(f, " ({op})"),
            Op::CompareOp(op) => write!(f, " ({op})"),
            Op::MakeFunction(flags) => write!(f, " {:#04x}", flags.bits()),
            _ => match (self.jump_target(), self.op.arg()) {
                (Some(target), _) => write!(f, " (to {target})"),
                (None, Some(arg)) => write!(f, " {arg}"),
                (None, None) => Ok(()),
            },
        }
    }
}

/// Flags telling `MakeFunction` which optional pieces sit on the stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FunctionFlags(u8);

impl FunctionFlags {
    pub const NONE: FunctionFlags = FunctionFlags(0);
    pub const DEFAULTS: FunctionFlags = FunctionFlags(0x01);
    pub const KWDEFAULTS: FunctionFlags = FunctionFlags(0x02);
    pub const ANNOTATIONS: FunctionFlags = FunctionFlags(0x04);
    pub const CLOSURE: FunctionFlags = FunctionFlags(0x08);

    #[inline]
    pub const fn bits(self) -> u8 {
        self.0
    }

    #[inline]
    pub const fn from_bits(bits: u8) -> FunctionFlags {
        FunctionFlags(bits)
    }

    #[inline]
    pub const fn contains(self, other: FunctionFlags) -> bool {
        (self.0 & other.0) == other.0
    }

    #[inline]
    pub fn insert(&mut self, other: FunctionFlags) {
        self.0 |= other.0;
    }
}

/// Signature flags of a code object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CodeFlags(u32);

impl CodeFlags {
    pub const NONE: CodeFlags = CodeFlags(0);
    pub const VARARGS: CodeFlags = CodeFlags(0x04);
    pub const VARKEYWORDS: CodeFlags = CodeFlags(0x08);

    #[inline]
    pub const fn bits(self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn from_bits(bits: u32) -> CodeFlags {
        CodeFlags(bits)
    }

    #[inline]
    pub const fn contains(self, other: CodeFlags) -> bool {
        (self.0 & other.0) == other.0
    }

    #[inline]
    pub fn insert(&mut self, other: CodeFlags) {
        self.0 |= other.0;
    }
}

/// Literal operand of `LoadConst`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Const {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Tuple(Vec<Const>),
    Code(Rc<CodeObject>),
}

impl Const {
    pub fn to_val(&self) -> Val {
        match self {
            Const::None => Val::None,
            Const::Bool(b) => Val::Bool(*b),
            Const::Int(i) => Val::Int(*i),
            Const::Float(f) => Val::Float(*f),
            Const::Str(s) => Val::str(s),
            Const::Tuple(items) => Val::tuple(items.iter().map(Const::to_val).collect()),
            Const::Code(code) => Val::Code(code.clone()),
        }
    }
}

impl From<&str> for Const {
    fn from(value: &str) -> Self {
        Const::Str(value.to_string())
    }
}

impl From<i64> for Const {
    fn from(value: i64) -> Self {
        Const::Int(value)
    }
}

impl From<f64> for Const {
    fn from(value: f64) -> Self {
        Const::Float(value)
    }
}

/// One pre-decoded instruction.
///
/// Name-carrying variants hold the resolved name; slot variants hold an index
/// into the frame's local slots. Jump operands are absolute offsets except
/// `JumpForward`, which is relative to the following instruction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, IntoStaticStr)]
#[serde(tag = "op", content = "arg")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum Op {
    Nop,
    ExtendedArg(u32),
    PopTop,
    RotTwo,
    RotThree,
    DupTop,
    DupTopTwo,

    LoadConst(Const),
    LoadName(String),
    StoreName(String),
    DeleteName(String),
    LoadGlobal(String),
    StoreGlobal(String),
    DeleteGlobal(String),
    LoadFast(u32),
    StoreFast(u32),
    DeleteFast(u32),
    LoadClosure(String),
    LoadDeref(String),
    StoreDeref(String),
    DeleteDeref(String),
    LoadAttr(String),
    StoreAttr(String),
    DeleteAttr(String),
    BinarySubscr,
    StoreSubscr,
    DeleteSubscr,

    UnaryOp(UnaryOp),
    BinaryOp(BinOp),
    InplaceOp(BinOp),
    CompareOp(CmpOp),

    JumpForward(u32),
    JumpAbsolute(u32),
    PopJumpIfTrue(u32),
    PopJumpIfFalse(u32),
    JumpIfTrueOrPop(u32),
    JumpIfFalseOrPop(u32),

    BuildTuple(u32),
    BuildList(u32),
    BuildSet(u32),
    BuildMap(u32),
    BuildConstKeyMap(u32),
    BuildString(u32),
    BuildSlice(u32),
    BuildTupleUnpack(u32),
    BuildTupleUnpackWithCall(u32),
    BuildListUnpack(u32),
    BuildSetUnpack(u32),
    BuildMapUnpack(u32),
    BuildMapUnpackWithCall(u32),
    ListAppend(u32),
    SetAdd(u32),
    MapAdd(u32),
    UnpackSequence(u32),
    UnpackEx(u32),

    GetIter,
    ForIter(u32),

    SetupLoop(u32),
    BreakLoop,
    ContinueLoop(u32),
    SetupExcept(u32),
    SetupFinally(u32),
    PopBlock,
    PopExcept,
    EndFinally,

    MakeFunction(FunctionFlags),
    CallFunction(u32),
    CallFunctionKw(u32),
    CallFunctionEx(u32),
    ReturnValue,
    RaiseVarargs(u32),

    ImportName(String),
    ImportFrom(String),
    ImportStar,
    PrintExpr,

    SetupAnnotations,
    StoreAnnotation(String),
}

impl Op {
    /// Numeric immediate, when the instruction carries one.
    pub fn arg(&self) -> Option<u32> {
        match self {
            Op::ExtendedArg(n)
            | Op::LoadFast(n)
            | Op::StoreFast(n)
            | Op::DeleteFast(n)
            | Op::JumpForward(n)
            | Op::JumpAbsolute(n)
            | Op::PopJumpIfTrue(n)
            | Op::PopJumpIfFalse(n)
            | Op::JumpIfTrueOrPop(n)
            | Op::JumpIfFalseOrPop(n)
            | Op::BuildTuple(n)
            | Op::BuildList(n)
            | Op::BuildSet(n)
            | Op::BuildMap(n)
            | Op::BuildConstKeyMap(n)
            | Op::BuildString(n)
            | Op::BuildSlice(n)
            | Op::BuildTupleUnpack(n)
            | Op::BuildTupleUnpackWithCall(n)
            | Op::BuildListUnpack(n)
            | Op::BuildSetUnpack(n)
            | Op::BuildMapUnpack(n)
            | Op::BuildMapUnpackWithCall(n)
            | Op::ListAppend(n)
            | Op::SetAdd(n)
            | Op::MapAdd(n)
            | Op::UnpackSequence(n)
            | Op::UnpackEx(n)
            | Op::ForIter(n)
            | Op::SetupLoop(n)
            | Op::ContinueLoop(n)
            | Op::SetupExcept(n)
            | Op::SetupFinally(n)
            | Op::CallFunction(n)
            | Op::CallFunctionKw(n)
            | Op::CallFunctionEx(n)
            | Op::RaiseVarargs(n) => Some(*n),
            _ => None,
        }
    }

    pub fn mnemonic(&self) -> &'static str {
        self.into()
    }
}
