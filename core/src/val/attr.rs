//! Attribute and subscript get/set/delete.

use std::rc::Rc;

use anyhow::Result;

use super::{BoundMethod, ExcKind, SliceValue, Val, host_error, methods};

fn no_attribute(obj: &Val, name: &str) -> anyhow::Error {
    let message = match obj {
        Val::Module(module) => format!("module '{}' has no attribute '{name}'", module.name),
        other => format!("'{}' object has no attribute '{name}'", other.type_name()),
    };
    host_error(ExcKind::AttributeError, message)
}

pub fn get_attr(obj: &Val, name: &str) -> Result<Val> {
    let found = match obj {
        Val::Namespace(attrs) => attrs.borrow().get(name).cloned(),
        Val::Module(module) => match name {
            "__name__" => Some(Val::str(&module.name)),
            _ => module.attrs.borrow().get(name).cloned(),
        },
        Val::Exception(exc) => match name {
            "args" => Some(Val::tuple(exc.args().to_vec())),
            "__cause__" => Some(exc.cause().map_or(Val::None, Val::Exception)),
            _ => None,
        },
        Val::ExcType(kind) if name == "__name__" => Some(Val::str(kind.to_string())),
        Val::Function(func) => match name {
            "__name__" => Some(Val::str(&func.name)),
            "__defaults__" if func.defaults.is_empty() => Some(Val::None),
            "__defaults__" => Some(Val::tuple(func.defaults.clone())),
            _ => None,
        },
        Val::Native(native) if name == "__name__" => Some(Val::str(native.name)),
        Val::Range(range) => match name {
            "start" => Some(Val::Int(range.start)),
            "stop" => Some(Val::Int(range.stop)),
            "step" => Some(Val::Int(range.step)),
            _ => None,
        },
        _ => None,
    };
    if let Some(value) = found {
        return Ok(value);
    }
    match methods::lookup(obj, name) {
        Some(func) => Ok(Val::Method(Rc::new(BoundMethod {
            receiver: obj.clone(),
            func,
        }))),
        None => Err(no_attribute(obj, name)),
    }
}

pub fn set_attr(obj: &Val, name: &str, value: Val) -> Result<()> {
    match obj {
        Val::Namespace(attrs) => {
            attrs.borrow_mut().insert(name.to_string(), value);
            Ok(())
        }
        Val::Module(module) => {
            module.attrs.borrow_mut().insert(name.to_string(), value);
            Ok(())
        }
        other => Err(no_attribute(other, name)),
    }
}

pub fn delete_attr(obj: &Val, name: &str) -> Result<()> {
    let removed = match obj {
        Val::Namespace(attrs) => attrs.borrow_mut().remove(name),
        Val::Module(module) => module.attrs.borrow_mut().remove(name),
        _ => None,
    };
    removed.map(|_| ()).ok_or_else(|| no_attribute(obj, name))
}

/// Resolves a slice against a sequence length, clamping like the reference host.
pub fn slice_indices(slice: &SliceValue, len: usize) -> Result<(i64, i64, i64)> {
    let step = slice.step.unwrap_or(1);
    if step == 0 {
        return Err(host_error(ExcKind::ValueError, "slice step cannot be zero"));
    }
    let len = len as i64;
    let (lower, upper) = if step < 0 { (-1, len - 1) } else { (0, len) };
    let clamp = |bound: Option<i64>, default: i64| match bound {
        None => default,
        Some(b) if b < 0 => (b + len).max(lower),
        Some(b) => b.min(upper),
    };
    let start = clamp(slice.start, if step < 0 { upper } else { lower });
    let stop = clamp(slice.stop, if step < 0 { lower } else { upper });
    Ok((start, stop, step))
}

fn slice_positions(slice: &SliceValue, len: usize) -> Result<Vec<usize>> {
    let (start, stop, step) = slice_indices(slice, len)?;
    let mut out = Vec::new();
    let mut i = start;
    while (step > 0 && i < stop) || (step < 0 && i > stop) {
        out.push(i as usize);
        match i.checked_add(step) {
            Some(next) => i = next,
            None => break,
        }
    }
    Ok(out)
}

fn index_of(kind: &str, key: &Val, len: usize) -> Result<usize> {
    let Some(raw) = key.as_int() else {
        return Err(host_error(
            ExcKind::TypeError,
            format!("{kind} indices must be integers or slices, not {}", key.type_name()),
        ));
    };
    let idx = if raw < 0 { raw + len as i64 } else { raw };
    if idx < 0 || idx >= len as i64 {
        return Err(host_error(ExcKind::IndexError, format!("{kind} index out of range")));
    }
    Ok(idx as usize)
}

fn key_error(key: &Val) -> anyhow::Error {
    host_error(ExcKind::KeyError, key.repr())
}

pub fn get_item(obj: &Val, key: &Val) -> Result<Val> {
    match (obj, key) {
        (Val::List(items), Val::Slice(slice)) => {
            let items = items.borrow();
            let picked = slice_positions(slice, items.len())?;
            Ok(Val::list(picked.into_iter().map(|i| items[i].clone()).collect()))
        }
        (Val::List(items), _) => {
            let items = items.borrow();
            Ok(items[index_of("list", key, items.len())?].clone())
        }
        (Val::Tuple(items), Val::Slice(slice)) => {
            let picked = slice_positions(slice, items.len())?;
            Ok(Val::tuple(picked.into_iter().map(|i| items[i].clone()).collect()))
        }
        (Val::Tuple(items), _) => Ok(items[index_of("tuple", key, items.len())?].clone()),
        (Val::Str(s), _) => {
            let chars: Vec<char> = s.chars().collect();
            match key {
                Val::Slice(slice) => {
                    let picked = slice_positions(slice, chars.len())?;
                    Ok(Val::from(picked.into_iter().map(|i| chars[i]).collect::<String>()))
                }
                _ => Ok(Val::from(chars[index_of("string", key, chars.len())?].to_string())),
            }
        }
        (Val::Range(range), _) => {
            let idx = index_of("range object", key, range.len())?;
            range.get(idx).map(Val::Int).ok_or_else(|| key_error(key))
        }
        (Val::Dict(dict), _) => {
            key.ensure_hashable()?;
            dict.borrow().get(key).cloned().ok_or_else(|| key_error(key))
        }
        (other, _) => Err(host_error(
            ExcKind::TypeError,
            format!("'{}' object is not subscriptable", other.type_name()),
        )),
    }
}

pub fn set_item(obj: &Val, key: &Val, value: Val) -> Result<()> {
    match obj {
        Val::List(items) => {
            if let Val::Slice(slice) = key {
                let replacement = super::iter::collect(&value)?;
                let mut items = items.borrow_mut();
                let (start, stop, step) = slice_indices(slice, items.len())?;
                if step != 1 {
                    return Err(host_error(
                        ExcKind::ValueError,
                        "extended slice assignment is not supported",
                    ));
                }
                let start = start as usize;
                let stop = (stop as usize).max(start);
                items.splice(start..stop, replacement);
                return Ok(());
            }
            let mut items = items.borrow_mut();
            let idx = index_of("list", key, items.len())?;
            items[idx] = value;
            Ok(())
        }
        Val::Dict(dict) => dict.borrow_mut().insert(key.clone(), value).map(|_| ()),
        other => Err(host_error(
            ExcKind::TypeError,
            format!("'{}' object does not support item assignment", other.type_name()),
        )),
    }
}

pub fn delete_item(obj: &Val, key: &Val) -> Result<()> {
    match obj {
        Val::List(items) => {
            let mut items = items.borrow_mut();
            if let Val::Slice(slice) = key {
                let mut doomed = slice_positions(slice, items.len())?;
                doomed.sort_unstable();
                for idx in doomed.into_iter().rev() {
                    items.remove(idx);
                }
                return Ok(());
            }
            let idx = index_of("list", key, items.len())?;
            items.remove(idx);
            Ok(())
        }
        Val::Dict(dict) => dict.borrow_mut().remove(key).map(|_| ()).ok_or_else(|| key_error(key)),
        other => Err(host_error(
            ExcKind::TypeError,
            format!("'{}' object doesn't support item deletion", other.type_name()),
        )),
    }
}
