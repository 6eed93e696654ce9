//! Native methods of the built-in container and string types.
//!
//! Every method receives its receiver as `args[0]`.

use anyhow::Result;

use super::{Dict, ExcKind, NativeFunction, Val, host_error, iter};
use crate::host::Host;
use crate::op::{CmpOp, order};

pub fn lookup(receiver: &Val, name: &str) -> Option<NativeFunction> {
    let table: &[NativeFunction] = match receiver {
        Val::List(_) => LIST_METHODS,
        Val::Dict(_) => DICT_METHODS,
        Val::Str(_) => STR_METHODS,
        Val::Set(_) => SET_METHODS,
        _ => return None,
    };
    table.iter().find(|m| m.name == name).copied()
}

const LIST_METHODS: &[NativeFunction] = &[
    NativeFunction::new("append", list_append),
    NativeFunction::new("extend", list_extend),
    NativeFunction::new("insert", list_insert),
    NativeFunction::new("pop", list_pop),
    NativeFunction::new("remove", list_remove),
    NativeFunction::new("index", list_index),
    NativeFunction::new("count", list_count),
    NativeFunction::new("reverse", list_reverse),
    NativeFunction::new("sort", list_sort),
    NativeFunction::new("copy", list_copy),
    NativeFunction::new("clear", list_clear),
];

const DICT_METHODS: &[NativeFunction] = &[
    NativeFunction::new("get", dict_get),
    NativeFunction::new("keys", dict_keys),
    NativeFunction::new("values", dict_values),
    NativeFunction::new("items", dict_items),
    NativeFunction::new("pop", dict_pop),
    NativeFunction::new("setdefault", dict_setdefault),
    NativeFunction::new("update", dict_update),
    NativeFunction::new("copy", dict_copy),
];

const STR_METHODS: &[NativeFunction] = &[
    NativeFunction::new("join", str_join),
    NativeFunction::new("upper", str_upper),
    NativeFunction::new("lower", str_lower),
    NativeFunction::new("strip", str_strip),
    NativeFunction::new("split", str_split),
    NativeFunction::new("startswith", str_startswith),
    NativeFunction::new("endswith", str_endswith),
    NativeFunction::new("replace", str_replace),
    NativeFunction::new("find", str_find),
];

const SET_METHODS: &[NativeFunction] = &[
    NativeFunction::new("add", set_add),
    NativeFunction::new("discard", set_discard),
    NativeFunction::new("remove", set_remove),
];

/// Checks positional arity for a method or builtin and rejects keywords.
pub fn expect_args(name: &str, args: &[Val], kwargs: &[(String, Val)], min: usize, max: usize) -> Result<()> {
    if let Some((key, _)) = kwargs.first() {
        return Err(host_error(
            ExcKind::TypeError,
            format!("{name}() got an unexpected keyword argument '{key}'"),
        ));
    }
    if args.len() < min || args.len() > max {
        let expected = if min == max {
            min.to_string()
        } else {
            format!("{min} to {max}")
        };
        return Err(host_error(
            ExcKind::TypeError,
            format!("{name}() takes {expected} arguments ({} given)", args.len()),
        ));
    }
    Ok(())
}

fn list_of(args: &[Val]) -> Result<&std::rc::Rc<std::cell::RefCell<Vec<Val>>>> {
    match args.first() {
        Some(Val::List(items)) | Some(Val::Set(items)) => Ok(items),
        _ => Err(host_error(ExcKind::TypeError, "descriptor requires a 'list' object")),
    }
}

fn dict_of(args: &[Val]) -> Result<&std::rc::Rc<std::cell::RefCell<Dict>>> {
    match args.first() {
        Some(Val::Dict(dict)) => Ok(dict),
        _ => Err(host_error(ExcKind::TypeError, "descriptor requires a 'dict' object")),
    }
}

fn str_of(args: &[Val]) -> Result<&str> {
    match args.first() {
        Some(Val::Str(s)) => Ok(s),
        _ => Err(host_error(ExcKind::TypeError, "descriptor requires a 'str' object")),
    }
}

fn str_arg<'a>(name: &str, v: &'a Val) -> Result<&'a str> {
    v.as_str().ok_or_else(|| {
        host_error(
            ExcKind::TypeError,
            format!("{name}() argument must be str, not {}", v.type_name()),
        )
    })
}

fn list_append(_: &mut dyn Host, args: &[Val], kwargs: &[(String, Val)]) -> Result<Val> {
    expect_args("append", args, kwargs, 2, 2)?;
    list_of(args)?.borrow_mut().push(args[1].clone());
    Ok(Val::None)
}

fn list_extend(_: &mut dyn Host, args: &[Val], kwargs: &[(String, Val)]) -> Result<Val> {
    expect_args("extend", args, kwargs, 2, 2)?;
    let extra = iter::collect(&args[1])?;
    list_of(args)?.borrow_mut().extend(extra);
    Ok(Val::None)
}

fn list_insert(_: &mut dyn Host, args: &[Val], kwargs: &[(String, Val)]) -> Result<Val> {
    expect_args("insert", args, kwargs, 3, 3)?;
    let mut items = list_of(args)?.borrow_mut();
    let len = items.len() as i64;
    let raw = args[1]
        .as_int()
        .ok_or_else(|| host_error(ExcKind::TypeError, "insert() index must be an integer"))?;
    let idx = if raw < 0 { (raw + len).max(0) } else { raw.min(len) };
    items.insert(idx as usize, args[2].clone());
    Ok(Val::None)
}

fn list_pop(_: &mut dyn Host, args: &[Val], kwargs: &[(String, Val)]) -> Result<Val> {
    expect_args("pop", args, kwargs, 1, 2)?;
    let mut items = list_of(args)?.borrow_mut();
    if items.is_empty() {
        return Err(host_error(ExcKind::IndexError, "pop from empty list"));
    }
    let len = items.len() as i64;
    let raw = args.get(1).and_then(Val::as_int).unwrap_or(-1);
    let idx = if raw < 0 { raw + len } else { raw };
    if idx < 0 || idx >= len {
        return Err(host_error(ExcKind::IndexError, "pop index out of range"));
    }
    Ok(items.remove(idx as usize))
}

fn list_remove(_: &mut dyn Host, args: &[Val], kwargs: &[(String, Val)]) -> Result<Val> {
    expect_args("remove", args, kwargs, 2, 2)?;
    let mut items = list_of(args)?.borrow_mut();
    match items.iter().position(|item| *item == args[1]) {
        Some(idx) => {
            items.remove(idx);
            Ok(Val::None)
        }
        None => Err(host_error(ExcKind::ValueError, "list.remove(x): x not in list")),
    }
}

fn list_index(_: &mut dyn Host, args: &[Val], kwargs: &[(String, Val)]) -> Result<Val> {
    expect_args("index", args, kwargs, 2, 2)?;
    let items = list_of(args)?.borrow();
    items
        .iter()
        .position(|item| *item == args[1])
        .map(|idx| Val::Int(idx as i64))
        .ok_or_else(|| host_error(ExcKind::ValueError, format!("{} is not in list", args[1].repr())))
}

fn list_count(_: &mut dyn Host, args: &[Val], kwargs: &[(String, Val)]) -> Result<Val> {
    expect_args("count", args, kwargs, 2, 2)?;
    let items = list_of(args)?.borrow();
    Ok(Val::Int(items.iter().filter(|item| **item == args[1]).count() as i64))
}

fn list_reverse(_: &mut dyn Host, args: &[Val], kwargs: &[(String, Val)]) -> Result<Val> {
    expect_args("reverse", args, kwargs, 1, 1)?;
    list_of(args)?.borrow_mut().reverse();
    Ok(Val::None)
}

/// Stable insertion sort over the host ordering; comparison errors propagate.
fn list_sort(_: &mut dyn Host, args: &[Val], kwargs: &[(String, Val)]) -> Result<Val> {
    let reverse = match kwargs {
        [] => false,
        [(key, value)] if key == "reverse" => value.truthy(),
        [(key, _), ..] => {
            return Err(host_error(
                ExcKind::TypeError,
                format!("sort() got an unexpected keyword argument '{key}'"),
            ));
        }
    };
    expect_args("sort", args, &[], 1, 1)?;
    let list = list_of(args)?;
    let mut items = list.borrow().clone();
    for i in 1..items.len() {
        let mut j = i;
        while j > 0 {
            let out_of_order = if reverse {
                order(&items[j - 1], CmpOp::Lt, &items[j])?
            } else {
                order(&items[j], CmpOp::Lt, &items[j - 1])?
            };
            if !out_of_order {
                break;
            }
            items.swap(j - 1, j);
            j -= 1;
        }
    }
    *list.borrow_mut() = items;
    Ok(Val::None)
}

fn list_copy(_: &mut dyn Host, args: &[Val], kwargs: &[(String, Val)]) -> Result<Val> {
    expect_args("copy", args, kwargs, 1, 1)?;
    Ok(Val::list(list_of(args)?.borrow().clone()))
}

fn list_clear(_: &mut dyn Host, args: &[Val], kwargs: &[(String, Val)]) -> Result<Val> {
    expect_args("clear", args, kwargs, 1, 1)?;
    list_of(args)?.borrow_mut().clear();
    Ok(Val::None)
}

fn dict_get(_: &mut dyn Host, args: &[Val], kwargs: &[(String, Val)]) -> Result<Val> {
    expect_args("get", args, kwargs, 2, 3)?;
    let dict = dict_of(args)?.borrow();
    Ok(dict
        .get(&args[1])
        .cloned()
        .unwrap_or_else(|| args.get(2).cloned().unwrap_or(Val::None)))
}

fn dict_keys(_: &mut dyn Host, args: &[Val], kwargs: &[(String, Val)]) -> Result<Val> {
    expect_args("keys", args, kwargs, 1, 1)?;
    Ok(Val::list(dict_of(args)?.borrow().keys()))
}

fn dict_values(_: &mut dyn Host, args: &[Val], kwargs: &[(String, Val)]) -> Result<Val> {
    expect_args("values", args, kwargs, 1, 1)?;
    Ok(Val::list(dict_of(args)?.borrow().iter().map(|(_, v)| v.clone()).collect()))
}

fn dict_items(_: &mut dyn Host, args: &[Val], kwargs: &[(String, Val)]) -> Result<Val> {
    expect_args("items", args, kwargs, 1, 1)?;
    let dict = dict_of(args)?.borrow();
    Ok(Val::list(
        dict.iter()
            .map(|(k, v)| Val::tuple(vec![k.clone(), v.clone()]))
            .collect(),
    ))
}

fn dict_pop(_: &mut dyn Host, args: &[Val], kwargs: &[(String, Val)]) -> Result<Val> {
    expect_args("pop", args, kwargs, 2, 3)?;
    let removed = dict_of(args)?.borrow_mut().remove(&args[1]);
    match (removed, args.get(2)) {
        (Some(value), _) => Ok(value),
        (None, Some(default)) => Ok(default.clone()),
        (None, None) => Err(host_error(ExcKind::KeyError, args[1].repr())),
    }
}

fn dict_setdefault(_: &mut dyn Host, args: &[Val], kwargs: &[(String, Val)]) -> Result<Val> {
    expect_args("setdefault", args, kwargs, 2, 3)?;
    let mut dict = dict_of(args)?.borrow_mut();
    if let Some(existing) = dict.get(&args[1]) {
        return Ok(existing.clone());
    }
    let value = args.get(2).cloned().unwrap_or(Val::None);
    dict.insert(args[1].clone(), value.clone())?;
    Ok(value)
}

fn dict_update(_: &mut dyn Host, args: &[Val], kwargs: &[(String, Val)]) -> Result<Val> {
    if args.len() > 2 {
        return Err(host_error(
            ExcKind::TypeError,
            format!("update expected at most 1 argument, got {}", args.len() - 1),
        ));
    }
    let target = dict_of(args)?;
    if let Some(source) = args.get(1) {
        let pairs = merge_pairs(source)?;
        let mut dict = target.borrow_mut();
        for (k, v) in pairs {
            dict.insert(k, v)?;
        }
    }
    let mut dict = target.borrow_mut();
    for (k, v) in kwargs {
        dict.insert(Val::str(k), v.clone())?;
    }
    Ok(Val::None)
}

/// Key/value pairs of a mapping or an iterable of pairs.
pub(crate) fn merge_pairs(source: &Val) -> Result<Vec<(Val, Val)>> {
    if let Val::Dict(dict) = source {
        return Ok(dict.borrow().iter().map(|(k, v)| (k.clone(), v.clone())).collect());
    }
    let mut pairs = Vec::new();
    for item in iter::collect(source)? {
        match iter::collect(&item)?.as_slice() {
            [k, v] => pairs.push((k.clone(), v.clone())),
            other => {
                return Err(host_error(
                    ExcKind::ValueError,
                    format!(
                        "dictionary update sequence element has length {}; 2 is required",
                        other.len()
                    ),
                ));
            }
        }
    }
    Ok(pairs)
}

fn dict_copy(_: &mut dyn Host, args: &[Val], kwargs: &[(String, Val)]) -> Result<Val> {
    expect_args("copy", args, kwargs, 1, 1)?;
    Ok(Val::dict(dict_of(args)?.borrow().clone()))
}

fn str_join(_: &mut dyn Host, args: &[Val], kwargs: &[(String, Val)]) -> Result<Val> {
    expect_args("join", args, kwargs, 2, 2)?;
    let sep = str_of(args)?;
    let mut parts = Vec::new();
    for (idx, item) in iter::collect(&args[1])?.iter().enumerate() {
        match item {
            Val::Str(s) => parts.push(s.to_string()),
            other => {
                return Err(host_error(
                    ExcKind::TypeError,
                    format!("sequence item {idx}: expected str instance, {} found", other.type_name()),
                ));
            }
        }
    }
    Ok(Val::from(parts.join(sep)))
}

fn str_upper(_: &mut dyn Host, args: &[Val], kwargs: &[(String, Val)]) -> Result<Val> {
    expect_args("upper", args, kwargs, 1, 1)?;
    Ok(Val::from(str_of(args)?.to_uppercase()))
}

fn str_lower(_: &mut dyn Host, args: &[Val], kwargs: &[(String, Val)]) -> Result<Val> {
    expect_args("lower", args, kwargs, 1, 1)?;
    Ok(Val::from(str_of(args)?.to_lowercase()))
}

fn str_strip(_: &mut dyn Host, args: &[Val], kwargs: &[(String, Val)]) -> Result<Val> {
    expect_args("strip", args, kwargs, 1, 2)?;
    let s = str_of(args)?;
    match args.get(1) {
        None | Some(Val::None) => Ok(Val::str(s.trim())),
        Some(chars) => {
            let chars: Vec<char> = str_arg("strip", chars)?.chars().collect();
            Ok(Val::str(s.trim_matches(|c| chars.contains(&c))))
        }
    }
}

fn str_split(_: &mut dyn Host, args: &[Val], kwargs: &[(String, Val)]) -> Result<Val> {
    expect_args("split", args, kwargs, 1, 2)?;
    let s = str_of(args)?;
    let parts: Vec<Val> = match args.get(1) {
        None | Some(Val::None) => s.split_whitespace().map(Val::str).collect(),
        Some(sep) => {
            let sep = str_arg("split", sep)?;
            if sep.is_empty() {
                return Err(host_error(ExcKind::ValueError, "empty separator"));
            }
            s.split(sep).map(Val::str).collect()
        }
    };
    Ok(Val::list(parts))
}

fn str_startswith(_: &mut dyn Host, args: &[Val], kwargs: &[(String, Val)]) -> Result<Val> {
    expect_args("startswith", args, kwargs, 2, 2)?;
    Ok(Val::Bool(str_of(args)?.starts_with(str_arg("startswith", &args[1])?)))
}

fn str_endswith(_: &mut dyn Host, args: &[Val], kwargs: &[(String, Val)]) -> Result<Val> {
    expect_args("endswith", args, kwargs, 2, 2)?;
    Ok(Val::Bool(str_of(args)?.ends_with(str_arg("endswith", &args[1])?)))
}

fn str_replace(_: &mut dyn Host, args: &[Val], kwargs: &[(String, Val)]) -> Result<Val> {
    expect_args("replace", args, kwargs, 3, 3)?;
    let from = str_arg("replace", &args[1])?;
    let to = str_arg("replace", &args[2])?;
    Ok(Val::from(str_of(args)?.replace(from, to)))
}

fn str_find(_: &mut dyn Host, args: &[Val], kwargs: &[(String, Val)]) -> Result<Val> {
    expect_args("find", args, kwargs, 2, 2)?;
    let s = str_of(args)?;
    let needle = str_arg("find", &args[1])?;
    Ok(Val::Int(match s.find(needle) {
        Some(byte_idx) => s[..byte_idx].chars().count() as i64,
        None => -1,
    }))
}

fn set_add(_: &mut dyn Host, args: &[Val], kwargs: &[(String, Val)]) -> Result<Val> {
    expect_args("add", args, kwargs, 2, 2)?;
    args[1].ensure_hashable()?;
    let mut items = list_of(args)?.borrow_mut();
    if !items.contains(&args[1]) {
        items.push(args[1].clone());
    }
    Ok(Val::None)
}

fn set_discard(_: &mut dyn Host, args: &[Val], kwargs: &[(String, Val)]) -> Result<Val> {
    expect_args("discard", args, kwargs, 2, 2)?;
    list_of(args)?.borrow_mut().retain(|item| *item != args[1]);
    Ok(Val::None)
}

fn set_remove(_: &mut dyn Host, args: &[Val], kwargs: &[(String, Val)]) -> Result<Val> {
    expect_args("remove", args, kwargs, 2, 2)?;
    let mut items = list_of(args)?.borrow_mut();
    match items.iter().position(|item| *item == args[1]) {
        Some(idx) => {
            items.remove(idx);
            Ok(Val::None)
        }
        None => Err(host_error(ExcKind::KeyError, args[1].repr())),
    }
}
