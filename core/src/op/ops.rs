use std::cmp::Ordering;
use std::ops::{Add, Div, Mul, Rem, Sub};

use anyhow::Result;

use super::{BinOp, CmpOp, UnaryOp, err_op};
use crate::val::{ExcKind, Val, host_error, iter};

#[derive(Clone, Copy)]
enum Num {
    Int(i64),
    Float(f64),
}

fn num(v: &Val) -> Option<Num> {
    match v {
        Val::Int(i) => Some(Num::Int(*i)),
        Val::Bool(b) => Some(Num::Int(*b as i64)),
        Val::Float(f) => Some(Num::Float(*f)),
        _ => None,
    }
}

fn num_pair(l: &Val, r: &Val) -> Option<(Num, Num)> {
    Some((num(l)?, num(r)?))
}

fn as_floats(l: Num, r: Num) -> (f64, f64) {
    let f = |n| match n {
        Num::Int(i) => i as f64,
        Num::Float(f) => f,
    };
    (f(l), f(r))
}

fn overflow() -> anyhow::Error {
    host_error(ExcKind::OverflowError, "integer overflow")
}

fn int_or_overflow(value: Option<i64>) -> Result<Val> {
    value.map(Val::Int).ok_or_else(overflow)
}

fn repeat_count(n: &Val) -> Option<usize> {
    n.as_int().map(|n| n.max(0) as usize)
}

impl Add for &Val {
    type Output = Result<Val>;

    fn add(self, other: Self) -> Self::Output {
        if let Some(pair) = num_pair(self, other) {
            return match pair {
                (Num::Int(a), Num::Int(b)) => int_or_overflow(a.checked_add(b)),
                (a, b) => {
                    let (a, b) = as_floats(a, b);
                    Ok(Val::Float(a + b))
                }
            };
        }
        match (self, other) {
            (Val::Str(a), Val::Str(b)) => {
                let mut out = String::with_capacity(a.len() + b.len());
                out.push_str(a);
                out.push_str(b);
                Ok(Val::from(out))
            }
            (Val::Tuple(a), Val::Tuple(b)) => Ok(Val::tuple(a.iter().chain(b.iter()).cloned().collect())),
            (Val::List(a), Val::List(b)) => {
                let mut out = a.borrow().clone();
                out.extend(b.borrow().iter().cloned());
                Ok(Val::list(out))
            }
            _ => err_op(self, BinOp::Add, other),
        }
    }
}

impl Sub for &Val {
    type Output = Result<Val>;

    fn sub(self, other: Self) -> Self::Output {
        if let Some(pair) = num_pair(self, other) {
            return match pair {
                (Num::Int(a), Num::Int(b)) => int_or_overflow(a.checked_sub(b)),
                (a, b) => {
                    let (a, b) = as_floats(a, b);
                    Ok(Val::Float(a - b))
                }
            };
        }
        match (self, other) {
            (Val::Set(a), Val::Set(b)) => {
                let b = b.borrow();
                Val::set(a.borrow().iter().filter(|item| !b.contains(item)).cloned().collect())
            }
            _ => err_op(self, BinOp::Sub, other),
        }
    }
}

impl Mul for &Val {
    type Output = Result<Val>;

    fn mul(self, other: Self) -> Self::Output {
        if let Some(pair) = num_pair(self, other) {
            return match pair {
                (Num::Int(a), Num::Int(b)) => int_or_overflow(a.checked_mul(b)),
                (a, b) => {
                    let (a, b) = as_floats(a, b);
                    Ok(Val::Float(a * b))
                }
            };
        }
        match (self, other) {
            (Val::Str(s), n) | (n, Val::Str(s)) if repeat_count(n).is_some() => {
                Ok(Val::from(repeat_str(s, repeat_count(n).unwrap_or(0))?))
            }
            (Val::List(items), n) | (n, Val::List(items)) if repeat_count(n).is_some() => {
                let items = items.borrow();
                Ok(Val::list(repeat_items(&items, repeat_count(n).unwrap_or(0))?))
            }
            (Val::Tuple(items), n) | (n, Val::Tuple(items)) if repeat_count(n).is_some() => {
                Ok(Val::tuple(repeat_items(items, repeat_count(n).unwrap_or(0))?))
            }
            _ => err_op(self, BinOp::Mul, other),
        }
    }
}

/// Length of a sequence of `len` repeated `times` times, bounded like an index-sized integer.
fn repeated_len(len: usize, times: usize, what: &str) -> Result<usize> {
    len.checked_mul(times)
        .filter(|total| *total <= isize::MAX as usize)
        .ok_or_else(|| host_error(ExcKind::OverflowError, format!("repeated {what} is too long")))
}

fn out_of_memory() -> anyhow::Error {
    host_error(ExcKind::MemoryError, "")
}

fn repeat_str(s: &str, times: usize) -> Result<String> {
    let total = repeated_len(s.len(), times, "string")?;
    let mut out = String::new();
    out.try_reserve_exact(total).map_err(|_| out_of_memory())?;
    for _ in 0..times {
        out.push_str(s);
    }
    Ok(out)
}

fn repeat_items(items: &[Val], times: usize) -> Result<Vec<Val>> {
    let total = repeated_len(items.len(), times, "sequence")?;
    let mut out = Vec::new();
    out.try_reserve_exact(total).map_err(|_| out_of_memory())?;
    for _ in 0..times {
        out.extend(items.iter().cloned());
    }
    Ok(out)
}

impl Div for &Val {
    type Output = Result<Val>;

    /// True division always produces a float.
    fn div(self, other: Self) -> Self::Output {
        let Some((a, b)) = num_pair(self, other) else {
            return err_op(self, BinOp::TrueDiv, other);
        };
        let (a, b) = as_floats(a, b);
        if b == 0.0 {
            let msg = match num(self) {
                Some(Num::Int(_)) if matches!(num(other), Some(Num::Int(_))) => "division by zero",
                _ => "float division by zero",
            };
            return Err(host_error(ExcKind::ZeroDivisionError, msg));
        }
        Ok(Val::Float(a / b))
    }
}

impl Rem for &Val {
    type Output = Result<Val>;

    /// Modulo takes the sign of the divisor.
    fn rem(self, other: Self) -> Self::Output {
        match num_pair(self, other) {
            Some((Num::Int(a), Num::Int(b))) => {
                if b == 0 {
                    return Err(host_error(
                        ExcKind::ZeroDivisionError,
                        "integer division or modulo by zero",
                    ));
                }
                let r = a.checked_rem(b).ok_or_else(overflow)?;
                Ok(Val::Int(if r != 0 && (r < 0) != (b < 0) { r + b } else { r }))
            }
            Some((a, b)) => {
                let (a, b) = as_floats(a, b);
                if b == 0.0 {
                    return Err(host_error(ExcKind::ZeroDivisionError, "float modulo"));
                }
                let r = a % b;
                Ok(Val::Float(if r != 0.0 && (r < 0.0) != (b < 0.0) { r + b } else { r }))
            }
            None => err_op(self, BinOp::Mod, other),
        }
    }
}

pub(super) fn floor_div(l: &Val, r: &Val) -> Result<Val> {
    match num_pair(l, r) {
        Some((Num::Int(a), Num::Int(b))) => {
            if b == 0 {
                return Err(host_error(
                    ExcKind::ZeroDivisionError,
                    "integer division or modulo by zero",
                ));
            }
            let q = a.checked_div(b).ok_or_else(overflow)?;
            Ok(Val::Int(if a % b != 0 && (a < 0) != (b < 0) { q - 1 } else { q }))
        }
        Some((a, b)) => {
            let (a, b) = as_floats(a, b);
            if b == 0.0 {
                return Err(host_error(ExcKind::ZeroDivisionError, "float divmod()"));
            }
            Ok(Val::Float((a / b).floor()))
        }
        None => err_op(l, BinOp::FloorDiv, r),
    }
}

pub(super) fn pow(l: &Val, r: &Val) -> Result<Val> {
    match num_pair(l, r) {
        Some((Num::Int(a), Num::Int(b))) if b >= 0 => {
            let exp = u32::try_from(b).map_err(|_| overflow())?;
            int_or_overflow(a.checked_pow(exp))
        }
        Some((a, b)) => {
            let (a, b) = as_floats(a, b);
            if a == 0.0 && b < 0.0 {
                return Err(host_error(
                    ExcKind::ZeroDivisionError,
                    "0.0 cannot be raised to a negative power",
                ));
            }
            Ok(Val::Float(a.powf(b)))
        }
        None => err_op(l, BinOp::Pow, r),
    }
}

fn int_pair(l: &Val, r: &Val) -> Option<(i64, i64)> {
    match (l, r) {
        (Val::Int(_) | Val::Bool(_), Val::Int(_) | Val::Bool(_)) => Some((l.as_int()?, r.as_int()?)),
        _ => None,
    }
}

fn shift_count(n: i64) -> Result<u32> {
    if n < 0 {
        return Err(host_error(ExcKind::ValueError, "negative shift count"));
    }
    Ok(u32::try_from(n).unwrap_or(u32::MAX))
}

pub(super) fn lshift(l: &Val, r: &Val) -> Result<Val> {
    let Some((a, b)) = int_pair(l, r) else {
        return err_op(l, BinOp::LShift, r);
    };
    let count = shift_count(b)?;
    if a == 0 {
        return Ok(Val::Int(0));
    }
    if count >= 63 || (a.unsigned_abs() >> (63 - count)) != 0 {
        return Err(overflow());
    }
    Ok(Val::Int(a << count))
}

pub(super) fn rshift(l: &Val, r: &Val) -> Result<Val> {
    let Some((a, b)) = int_pair(l, r) else {
        return err_op(l, BinOp::RShift, r);
    };
    let count = shift_count(b)?.min(63);
    Ok(Val::Int(a >> count))
}

macro_rules! bitwise {
    ($name:ident, $op:tt, $kind:expr) => {
        pub(super) fn $name(l: &Val, r: &Val) -> Result<Val> {
            match (l, r) {
                (Val::Bool(a), Val::Bool(b)) => Ok(Val::Bool(*a $op *b)),
                _ => match int_pair(l, r) {
                    Some((a, b)) => Ok(Val::Int(a $op b)),
                    None => set_op(l, $kind, r),
                },
            }
        }
    };
}

bitwise!(bitand, &, BinOp::And);
bitwise!(bitxor, ^, BinOp::Xor);
bitwise!(bitor, |, BinOp::Or);

fn set_op(l: &Val, op: BinOp, r: &Val) -> Result<Val> {
    let (Val::Set(a), Val::Set(b)) = (l, r) else {
        return err_op(l, op, r);
    };
    let (a, b) = (a.borrow(), b.borrow());
    let items: Vec<Val> = match op {
        BinOp::And => a.iter().filter(|item| b.contains(item)).cloned().collect(),
        BinOp::Or => a.iter().chain(b.iter()).cloned().collect(),
        _ => a
            .iter()
            .filter(|item| !b.contains(item))
            .chain(b.iter().filter(|item| !a.contains(item)))
            .cloned()
            .collect(),
    };
    Val::set(items)
}

/// `+=` extends lists in place so aliases observe the change.
pub(super) fn inplace_add(l: &Val, r: &Val) -> Result<Val> {
    if let Val::List(items) = l {
        let extra = iter::collect(r)?;
        items.borrow_mut().extend(extra);
        return Ok(l.clone());
    }
    l + r
}

pub(super) fn inplace_mul(l: &Val, r: &Val) -> Result<Val> {
    if let (Val::List(items), Some(times)) = (l, repeat_count(r)) {
        let repeated = repeat_items(&items.borrow(), times)?;
        *items.borrow_mut() = repeated;
        return Ok(l.clone());
    }
    l * r
}

fn bad_unary(op: UnaryOp, v: &Val) -> anyhow::Error {
    host_error(
        ExcKind::TypeError,
        format!("bad operand type for {op}: '{}'", v.type_name()),
    )
}

pub(super) fn positive(v: &Val) -> Result<Val> {
    match num(v) {
        Some(Num::Int(i)) => Ok(Val::Int(i)),
        Some(Num::Float(f)) => Ok(Val::Float(f)),
        None => Err(bad_unary(UnaryOp::Positive, v)),
    }
}

pub(super) fn negative(v: &Val) -> Result<Val> {
    match num(v) {
        Some(Num::Int(i)) => int_or_overflow(i.checked_neg()),
        Some(Num::Float(f)) => Ok(Val::Float(-f)),
        None => Err(bad_unary(UnaryOp::Negative, v)),
    }
}

pub(super) fn invert(v: &Val) -> Result<Val> {
    match num(v) {
        Some(Num::Int(i)) => Ok(Val::Int(!i)),
        _ => Err(bad_unary(UnaryOp::Invert, v)),
    }
}

fn partial_order(l: &Val, r: &Val) -> Option<Ordering> {
    if let Some(pair) = num_pair(l, r) {
        return match pair {
            (Num::Int(a), Num::Int(b)) => Some(a.cmp(&b)),
            (a, b) => {
                let (a, b) = as_floats(a, b);
                a.partial_cmp(&b)
            }
        };
    }
    match (l, r) {
        (Val::Str(a), Val::Str(b)) => Some(a.cmp(b)),
        (Val::Tuple(a), Val::Tuple(b)) => sequence_order(a, b),
        (Val::List(a), Val::List(b)) => sequence_order(&a.borrow(), &b.borrow()),
        _ => None,
    }
}

fn sequence_order(a: &[Val], b: &[Val]) -> Option<Ordering> {
    for (x, y) in a.iter().zip(b.iter()) {
        if x != y {
            return partial_order(x, y);
        }
    }
    Some(a.len().cmp(&b.len()))
}

/// Rich ordering comparison; mismatched types are a TypeError.
pub(crate) fn order(l: &Val, op: CmpOp, r: &Val) -> Result<bool> {
    let comparable = num_pair(l, r).is_some()
        || matches!(
            (l, r),
            (Val::Str(_), Val::Str(_)) | (Val::Tuple(_), Val::Tuple(_)) | (Val::List(_), Val::List(_))
        );
    if !comparable {
        return Err(host_error(
            ExcKind::TypeError,
            format!(
                "'{op}' not supported between instances of '{}' and '{}'",
                l.type_name(),
                r.type_name()
            ),
        ));
    }
    // NaN compares false against everything.
    let Some(ordering) = partial_order(l, r) else {
        return Ok(false);
    };
    Ok(match op {
        CmpOp::Lt => ordering.is_lt(),
        CmpOp::Le => ordering.is_le(),
        CmpOp::Gt => ordering.is_gt(),
        CmpOp::Ge => ordering.is_ge(),
        _ => false,
    })
}

/// Membership test: `item in container`.
pub(crate) fn contains(container: &Val, item: &Val) -> Result<bool> {
    match container {
        Val::Str(haystack) => match item {
            Val::Str(needle) => Ok(haystack.contains(needle.as_ref())),
            other => Err(host_error(
                ExcKind::TypeError,
                format!(
                    "'in <string>' requires string as left operand, not {}",
                    other.type_name()
                ),
            )),
        },
        Val::Tuple(items) => Ok(items.contains(item)),
        Val::List(items) | Val::Set(items) => Ok(items.borrow().contains(item)),
        Val::Dict(dict) => Ok(dict.borrow().contains_key(item)),
        Val::Range(range) => Ok(match item.as_int() {
            Some(n) => {
                let offset = n - range.start;
                let in_bounds = if range.step > 0 {
                    n >= range.start && n < range.stop
                } else {
                    n <= range.start && n > range.stop
                };
                in_bounds && offset % range.step == 0
            }
            None => false,
        }),
        Val::Iter(_) => Ok(iter::collect(container)?.contains(item)),
        other => Err(host_error(
            ExcKind::TypeError,
            format!("argument of type '{}' is not iterable", other.type_name()),
        )),
    }
}

/// Handler matching: does the raised value `l` match the handler pattern `r`.
pub(crate) fn exception_match(l: &Val, r: &Val) -> Result<bool> {
    let raised = match l {
        Val::Exception(exc) => exc.kind(),
        Val::ExcType(kind) => *kind,
        _ => return Ok(false),
    };
    match r {
        Val::ExcType(kind) => Ok(raised.is_subclass_of(*kind)),
        Val::Tuple(kinds) => {
            for kind in kinds.iter() {
                if exception_match(l, kind)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        _ => Err(host_error(
            ExcKind::TypeError,
            "catching classes that do not inherit from BaseException is not allowed",
        )),
    }
}
