//! Container construction, accumulation and unpacking opcodes.

use super::engine::{Fault, guest};
use super::frame::Frame;
use super::instruction::Op;
use crate::error::StructuralError;
use crate::val::{Dict, ExcKind, SliceValue, Val, iter};

fn bad_operand(frame: &Frame, message: String) -> Fault {
    StructuralError::BadOperand {
        at: frame.offset,
        message,
    }
    .into()
}

fn slice_bound(value: &Val) -> Result<Option<i64>, Fault> {
    match value {
        Val::None => Ok(None),
        other => other.as_int().map(Some).ok_or_else(|| {
            guest(
                ExcKind::TypeError,
                "slice indices must be integers or None or have an __index__ method",
            )
        }),
    }
}

fn build_dict(pairs: impl IntoIterator<Item = (Val, Val)>) -> Result<Dict, Fault> {
    let mut dict = Dict::new();
    for (key, value) in pairs {
        dict.insert(key, value)?;
    }
    Ok(dict)
}

/// Unpacks every iterable operand into one flat sequence.
fn spread(frame: &mut Frame, count: u32) -> Result<Vec<Val>, Fault> {
    let mut items = Vec::new();
    for source in frame.pop_n(count as usize)? {
        items.extend(iter::collect(&source)?);
    }
    Ok(items)
}

fn merge_mappings(frame: &mut Frame, count: u32, reject_duplicates: bool) -> Result<Dict, Fault> {
    let mut dict = Dict::new();
    for source in frame.pop_n(count as usize)? {
        let Val::Dict(source) = source else {
            let message = if reject_duplicates {
                format!("argument after ** must be a mapping, not {}", source.type_name())
            } else {
                format!("'{}' object is not a mapping", source.type_name())
            };
            return Err(guest(ExcKind::TypeError, message));
        };
        for (key, value) in source.borrow().iter() {
            if dict.insert(key.clone(), value.clone())?.is_some() && reject_duplicates {
                let message = match key {
                    Val::Str(name) => format!("got multiple values for keyword argument '{name}'"),
                    _ => "keywords must be strings".to_string(),
                };
                return Err(guest(ExcKind::TypeError, message));
            }
        }
    }
    Ok(dict)
}

fn unpack_sequence(frame: &mut Frame, count: usize) -> Result<(), Fault> {
    let items = iter::collect(&frame.pop()?)?;
    if items.len() < count {
        return Err(guest(
            ExcKind::ValueError,
            format!("not enough values to unpack (expected {count}, got {})", items.len()),
        ));
    }
    if items.len() > count {
        return Err(guest(
            ExcKind::ValueError,
            format!("too many values to unpack (expected {count})"),
        ));
    }
    for item in items.into_iter().rev() {
        frame.push(item);
    }
    Ok(())
}

/// `UNPACK_EX`: low byte counts targets before the starred one, the next
/// byte the targets after it.
fn unpack_starred(frame: &mut Frame, arg: u32) -> Result<(), Fault> {
    let before = (arg & 0xFF) as usize;
    let after = (arg >> 8) as usize;
    let mut items = iter::collect(&frame.pop()?)?;
    if items.len() < before + after {
        return Err(guest(
            ExcKind::ValueError,
            format!(
                "not enough values to unpack (expected at least {}, got {})",
                before + after,
                items.len()
            ),
        ));
    }
    let tail = items.split_off(items.len() - after);
    let middle = items.split_off(before);
    for item in tail.into_iter().rev() {
        frame.push(item);
    }
    frame.push(Val::list(middle));
    for item in items.into_iter().rev() {
        frame.push(item);
    }
    Ok(())
}

/// Accumulator target of a comprehension opcode: `PEEK(depth)` once the
/// operands are popped.
fn accumulator(frame: &Frame, depth: u32) -> Result<Val, Fault> {
    if depth == 0 {
        return Err(bad_operand(frame, "accumulator depth must be at least 1".to_string()));
    }
    Ok(frame.peek(depth as usize - 1)?.clone())
}

pub(super) fn execute(frame: &mut Frame, op: &Op) -> Result<(), Fault> {
    match op {
        Op::BuildTuple(n) => {
            let items = frame.pop_n(*n as usize)?;
            frame.push(Val::tuple(items));
        }
        Op::BuildList(n) => {
            let items = frame.pop_n(*n as usize)?;
            frame.push(Val::list(items));
        }
        Op::BuildSet(n) => {
            let items = frame.pop_n(*n as usize)?;
            frame.push(Val::set(items)?);
        }
        Op::BuildMap(n) => {
            let flat = frame.pop_n(*n as usize * 2)?;
            let mut flat = flat.into_iter();
            let mut pairs = Vec::with_capacity(*n as usize);
            while let (Some(key), Some(value)) = (flat.next(), flat.next()) {
                pairs.push((key, value));
            }
            frame.push(Val::dict(build_dict(pairs)?));
        }
        Op::BuildConstKeyMap(n) => {
            let keys = match frame.pop()? {
                Val::Tuple(keys) if keys.len() == *n as usize => keys,
                other => {
                    return Err(bad_operand(
                        frame,
                        format!("BUILD_CONST_KEY_MAP expects a {n}-tuple of keys, found {}", other.repr()),
                    ));
                }
            };
            let values = frame.pop_n(*n as usize)?;
            frame.push(Val::dict(build_dict(keys.iter().cloned().zip(values))?));
        }
        Op::BuildString(n) => {
            let mut out = String::new();
            for part in frame.pop_n(*n as usize)? {
                match part {
                    Val::Str(s) => out.push_str(&s),
                    other => {
                        return Err(bad_operand(frame, format!("BUILD_STRING got {}", other.type_name())));
                    }
                }
            }
            frame.push(Val::from(out));
        }
        Op::BuildSlice(n) => {
            let parts = match *n {
                2 | 3 => frame.pop_n(*n as usize)?,
                other => return Err(bad_operand(frame, format!("BUILD_SLICE takes 2 or 3 operands, got {other}"))),
            };
            let slice = SliceValue {
                start: slice_bound(&parts[0])?,
                stop: slice_bound(&parts[1])?,
                step: match parts.get(2) {
                    Some(step) => slice_bound(step)?,
                    None => None,
                },
            };
            frame.push(Val::Slice(slice));
        }
        Op::BuildTupleUnpack(n) | Op::BuildTupleUnpackWithCall(n) => {
            let items = spread(frame, *n)?;
            frame.push(Val::tuple(items));
        }
        Op::BuildListUnpack(n) => {
            let items = spread(frame, *n)?;
            frame.push(Val::list(items));
        }
        Op::BuildSetUnpack(n) => {
            let items = spread(frame, *n)?;
            frame.push(Val::set(items)?);
        }
        Op::BuildMapUnpack(n) => {
            let dict = merge_mappings(frame, *n, false)?;
            frame.push(Val::dict(dict));
        }
        Op::BuildMapUnpackWithCall(n) => {
            let dict = merge_mappings(frame, *n, true)?;
            frame.push(Val::dict(dict));
        }
        Op::ListAppend(depth) => {
            let value = frame.pop()?;
            match accumulator(frame, *depth)? {
                Val::List(list) => list.borrow_mut().push(value),
                other => return Err(bad_operand(frame, format!("LIST_APPEND target is {}", other.type_name()))),
            }
        }
        Op::SetAdd(depth) => {
            let value = frame.pop()?;
            match accumulator(frame, *depth)? {
                Val::Set(set) => {
                    value.ensure_hashable()?;
                    let mut set = set.borrow_mut();
                    if !set.contains(&value) {
                        set.push(value);
                    }
                }
                other => return Err(bad_operand(frame, format!("SET_ADD target is {}", other.type_name()))),
            }
        }
        Op::MapAdd(depth) => {
            let key = frame.pop()?;
            let value = frame.pop()?;
            match accumulator(frame, *depth)? {
                Val::Dict(dict) => {
                    dict.borrow_mut().insert(key, value)?;
                }
                other => return Err(bad_operand(frame, format!("MAP_ADD target is {}", other.type_name()))),
            }
        }
        Op::UnpackSequence(n) => unpack_sequence(frame, *n as usize)?,
        Op::UnpackEx(arg) => unpack_starred(frame, *arg)?,
        other => {
            return Err(bad_operand(frame, format!("{} is not a collection opcode", other.mnemonic())));
        }
    }
    Ok(())
}
