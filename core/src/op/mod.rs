//! Operator kinds and their dispatch tables.
//!
//! Instructions carry an operator-kind operand; the engine resolves it to a
//! function pointer through the dense tables below and never matches on
//! operator semantics itself.

use std::fmt;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::val::{ExcKind, Val, host_error};

mod ops;

pub(crate) use ops::{contains, exception_match, order};

pub(crate) fn err_op<T: fmt::Display, R>(l: &Val, op: T, r: &Val) -> Result<R> {
    Err(host_error(
        ExcKind::TypeError,
        format!(
            "unsupported operand type(s) for {op}: '{}' and '{}'",
            l.type_name(),
            r.type_name()
        ),
    ))
}

pub type BinaryFn = fn(&Val, &Val) -> Result<Val>;
pub type UnaryFn = fn(&Val) -> Result<Val>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Pow,
    FloorDiv,
    TrueDiv,
    Mod,
    LShift,
    RShift,
    And,
    Xor,
    Or,
    MatMul,
}

impl BinOp {
    pub const COUNT: usize = 13;

    pub fn symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Pow => "** or pow()",
            BinOp::FloorDiv => "//",
            BinOp::TrueDiv => "/",
            BinOp::Mod => "%",
            BinOp::LShift => "<<",
            BinOp::RShift => ">>",
            BinOp::And => "&",
            BinOp::Xor => "^",
            BinOp::Or => "|",
            BinOp::MatMul => "@",
        }
    }

    #[inline]
    pub fn binary(self) -> BinaryFn {
        BINARY[self as usize]
    }

    #[inline]
    pub fn inplace(self) -> BinaryFn {
        INPLACE[self as usize]
    }
}

impl fmt::Display for BinOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnaryOp {
    Positive,
    Negative,
    Not,
    Invert,
}

impl UnaryOp {
    #[inline]
    pub fn func(self) -> UnaryFn {
        UNARY[self as usize]
    }
}

impl fmt::Display for UnaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            UnaryOp::Positive => "unary +",
            UnaryOp::Negative => "unary -",
            UnaryOp::Not => "not",
            UnaryOp::Invert => "unary ~",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CmpOp {
    Lt,
    Le,
    Eq,
    Ne,
    Gt,
    Ge,
    In,
    NotIn,
    Is,
    IsNot,
    ExceptionMatch,
}

impl CmpOp {
    #[inline]
    pub fn func(self) -> BinaryFn {
        COMPARE[self as usize]
    }
}

impl fmt::Display for CmpOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
            CmpOp::Eq => "==",
            CmpOp::Ne => "!=",
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
            CmpOp::In => "in",
            CmpOp::NotIn => "not in",
            CmpOp::Is => "is",
            CmpOp::IsNot => "is not",
            CmpOp::ExceptionMatch => "exception match",
        })
    }
}

// Tables are indexed by discriminant; keep them in declaration order.
static BINARY: [BinaryFn; BinOp::COUNT] = [
    |l, r| l + r,
    |l, r| l - r,
    |l, r| l * r,
    ops::pow,
    ops::floor_div,
    |l, r| l / r,
    |l, r| l % r,
    ops::lshift,
    ops::rshift,
    ops::bitand,
    ops::bitxor,
    ops::bitor,
    |l, r| err_op(l, BinOp::MatMul, r),
];

static INPLACE: [BinaryFn; BinOp::COUNT] = [
    ops::inplace_add,
    |l, r| l - r,
    ops::inplace_mul,
    ops::pow,
    ops::floor_div,
    |l, r| l / r,
    |l, r| l % r,
    ops::lshift,
    ops::rshift,
    ops::bitand,
    ops::bitxor,
    ops::bitor,
    |l, r| err_op(l, BinOp::MatMul, r),
];

static UNARY: [UnaryFn; 4] = [ops::positive, ops::negative, |v| Ok(Val::Bool(!v.truthy())), ops::invert];

static COMPARE: [BinaryFn; 11] = [
    |l, r| order(l, CmpOp::Lt, r).map(Val::Bool),
    |l, r| order(l, CmpOp::Le, r).map(Val::Bool),
    |l, r| Ok(Val::Bool(l == r)),
    |l, r| Ok(Val::Bool(l != r)),
    |l, r| order(l, CmpOp::Gt, r).map(Val::Bool),
    |l, r| order(l, CmpOp::Ge, r).map(Val::Bool),
    |l, r| contains(r, l).map(Val::Bool),
    |l, r| contains(r, l).map(|found| Val::Bool(!found)),
    |l, r| Ok(Val::Bool(l.is(r))),
    |l, r| Ok(Val::Bool(!l.is(r))),
    |l, r| exception_match(l, r).map(Val::Bool),
];
