//! The fixed built-in namespace consulted last by name lookup.

use anyhow::Result;
use strum::IntoEnumIterator;

use super::methods::{expect_args, merge_pairs};
use super::{Dict, ExcKind, HostError, RangeValue, Val, attr, host_error, iter};
use crate::host::Host;
use crate::op::{BinOp, CmpOp, order};

const BUILTINS: &[(&str, super::NativeFn)] = &[
    ("print", print),
    ("len", len),
    ("range", range),
    ("isinstance", isinstance),
    ("str", str_),
    ("repr", repr),
    ("int", int),
    ("float", float),
    ("bool", bool_),
    ("list", list),
    ("tuple", tuple),
    ("dict", dict),
    ("set", set),
    ("abs", abs),
    ("min", min),
    ("max", max),
    ("sum", sum),
    ("iter", iter_),
    ("next", next),
    ("sorted", sorted),
    ("enumerate", enumerate),
    ("zip", zip),
    ("reversed", reversed),
    ("getattr", getattr),
    ("setattr", setattr),
    ("hasattr", hasattr),
    ("namespace", namespace),
];

/// Every builtin callable plus the exception types, keyed by name.
pub fn namespace_entries() -> Vec<(String, Val)> {
    let mut out: Vec<(String, Val)> = BUILTINS
        .iter()
        .map(|(name, func)| (name.to_string(), Val::native(*name, *func)))
        .collect();
    out.extend(ExcKind::iter().map(|kind| (kind.to_string(), Val::ExcType(kind))));
    out
}

fn print(host: &mut dyn Host, args: &[Val], kwargs: &[(String, Val)]) -> Result<Val> {
    let mut sep = " ".to_string();
    let mut end = "\n".to_string();
    for (key, value) in kwargs {
        let slot = match key.as_str() {
            "sep" => &mut sep,
            "end" => &mut end,
            other => {
                return Err(host_error(
                    ExcKind::TypeError,
                    format!("'{other}' is an invalid keyword argument for print()"),
                ));
            }
        };
        match value {
            Val::None => {}
            Val::Str(s) => *slot = s.to_string(),
            other => {
                return Err(host_error(
                    ExcKind::TypeError,
                    format!("{key} must be None or a string, not {}", other.type_name()),
                ));
            }
        }
    }
    let mut line = args.iter().map(Val::to_string).collect::<Vec<_>>().join(&sep);
    line.push_str(&end);
    host.write_stdout(&line)?;
    Ok(Val::None)
}

fn len(_: &mut dyn Host, args: &[Val], kwargs: &[(String, Val)]) -> Result<Val> {
    expect_args("len", args, kwargs, 1, 1)?;
    let n = match &args[0] {
        Val::Str(s) => s.chars().count(),
        Val::Tuple(items) => items.len(),
        Val::List(items) | Val::Set(items) => items.borrow().len(),
        Val::Dict(dict) => dict.borrow().len(),
        Val::Range(range) => range.len(),
        other => {
            return Err(host_error(
                ExcKind::TypeError,
                format!("object of type '{}' has no len()", other.type_name()),
            ));
        }
    };
    Ok(Val::Int(n as i64))
}

fn int_arg(name: &str, v: &Val) -> Result<i64> {
    v.as_int().ok_or_else(|| {
        host_error(
            ExcKind::TypeError,
            format!("'{}' object cannot be interpreted as an integer ({name})", v.type_name()),
        )
    })
}

fn range(_: &mut dyn Host, args: &[Val], kwargs: &[(String, Val)]) -> Result<Val> {
    expect_args("range", args, kwargs, 1, 3)?;
    let ints = args
        .iter()
        .map(|arg| int_arg("range", arg))
        .collect::<Result<Vec<_>>>()?;
    let (start, stop, step) = match ints.as_slice() {
        [stop] => (0, *stop, 1),
        [start, stop] => (*start, *stop, 1),
        [start, stop, step, ..] => (*start, *stop, *step),
        [] => return Err(host_error(ExcKind::TypeError, "range expected 1 argument, got 0")),
    };
    if step == 0 {
        return Err(host_error(ExcKind::ValueError, "range() arg 3 must not be zero"));
    }
    Ok(Val::Range(RangeValue { start, stop, step }))
}

fn instance_of(obj: &Val, cls: &Val) -> Result<bool> {
    match cls {
        Val::ExcType(kind) => Ok(matches!(obj, Val::Exception(exc) if exc.kind().is_subclass_of(*kind))),
        Val::Native(native) => Ok(match native.name {
            "int" => matches!(obj, Val::Int(_) | Val::Bool(_)),
            "bool" => matches!(obj, Val::Bool(_)),
            "float" => matches!(obj, Val::Float(_)),
            "str" => matches!(obj, Val::Str(_)),
            "list" => matches!(obj, Val::List(_)),
            "tuple" => matches!(obj, Val::Tuple(_)),
            "dict" => matches!(obj, Val::Dict(_)),
            "set" => matches!(obj, Val::Set(_)),
            "range" => matches!(obj, Val::Range(_)),
            _ => false,
        }),
        Val::Tuple(options) => {
            for option in options.iter() {
                if instance_of(obj, option)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        _ => Err(host_error(
            ExcKind::TypeError,
            "isinstance() arg 2 must be a type or tuple of types",
        )),
    }
}

fn isinstance(_: &mut dyn Host, args: &[Val], kwargs: &[(String, Val)]) -> Result<Val> {
    expect_args("isinstance", args, kwargs, 2, 2)?;
    instance_of(&args[0], &args[1]).map(Val::Bool)
}

fn str_(_: &mut dyn Host, args: &[Val], kwargs: &[(String, Val)]) -> Result<Val> {
    expect_args("str", args, kwargs, 0, 1)?;
    Ok(args.first().map_or_else(|| Val::str(""), |v| Val::from(v.to_string())))
}

fn repr(_: &mut dyn Host, args: &[Val], kwargs: &[(String, Val)]) -> Result<Val> {
    expect_args("repr", args, kwargs, 1, 1)?;
    Ok(Val::from(args[0].repr()))
}

fn int(_: &mut dyn Host, args: &[Val], kwargs: &[(String, Val)]) -> Result<Val> {
    expect_args("int", args, kwargs, 0, 1)?;
    match args.first() {
        None => Ok(Val::Int(0)),
        Some(Val::Float(f)) if f.is_finite() => Ok(Val::Int(f.trunc() as i64)),
        Some(Val::Float(_)) => Err(host_error(
            ExcKind::OverflowError,
            "cannot convert float infinity or NaN to integer",
        )),
        Some(Val::Str(s)) => s.trim().replace('_', "").parse::<i64>().map(Val::Int).map_err(|_| {
            host_error(
                ExcKind::ValueError,
                format!("invalid literal for int() with base 10: {}", Val::Str(s.clone()).repr()),
            )
        }),
        Some(v) => int_arg("int", v).map(Val::Int),
    }
}

fn float(_: &mut dyn Host, args: &[Val], kwargs: &[(String, Val)]) -> Result<Val> {
    expect_args("float", args, kwargs, 0, 1)?;
    match args.first() {
        None => Ok(Val::Float(0.0)),
        Some(Val::Str(s)) => {
            let text = s.trim().to_ascii_lowercase();
            let parsed = match text.as_str() {
                "inf" | "+inf" | "infinity" => Some(f64::INFINITY),
                "-inf" | "-infinity" => Some(f64::NEG_INFINITY),
                "nan" => Some(f64::NAN),
                other => other.parse::<f64>().ok(),
            };
            parsed.map(Val::Float).ok_or_else(|| {
                host_error(
                    ExcKind::ValueError,
                    format!("could not convert string to float: {}", Val::Str(s.clone()).repr()),
                )
            })
        }
        Some(v) => v.as_float().map(Val::Float).ok_or_else(|| {
            host_error(
                ExcKind::TypeError,
                format!("float() argument must be a string or a number, not '{}'", v.type_name()),
            )
        }),
    }
}

fn bool_(_: &mut dyn Host, args: &[Val], kwargs: &[(String, Val)]) -> Result<Val> {
    expect_args("bool", args, kwargs, 0, 1)?;
    Ok(Val::Bool(args.first().is_some_and(Val::truthy)))
}

fn list(_: &mut dyn Host, args: &[Val], kwargs: &[(String, Val)]) -> Result<Val> {
    expect_args("list", args, kwargs, 0, 1)?;
    match args.first() {
        None => Ok(Val::list(Vec::new())),
        Some(v) => Ok(Val::list(iter::collect(v)?)),
    }
}

fn tuple(_: &mut dyn Host, args: &[Val], kwargs: &[(String, Val)]) -> Result<Val> {
    expect_args("tuple", args, kwargs, 0, 1)?;
    match args.first() {
        None => Ok(Val::tuple(Vec::new())),
        Some(Val::Tuple(items)) => Ok(Val::Tuple(items.clone())),
        Some(v) => Ok(Val::tuple(iter::collect(v)?)),
    }
}

fn dict(_: &mut dyn Host, args: &[Val], kwargs: &[(String, Val)]) -> Result<Val> {
    if args.len() > 1 {
        return Err(host_error(
            ExcKind::TypeError,
            format!("dict expected at most 1 argument, got {}", args.len()),
        ));
    }
    let mut out = Dict::new();
    if let Some(source) = args.first() {
        for (k, v) in merge_pairs(source)? {
            out.insert(k, v)?;
        }
    }
    for (k, v) in kwargs {
        out.insert(Val::str(k), v.clone())?;
    }
    Ok(Val::dict(out))
}

fn set(_: &mut dyn Host, args: &[Val], kwargs: &[(String, Val)]) -> Result<Val> {
    expect_args("set", args, kwargs, 0, 1)?;
    match args.first() {
        None => Val::set(Vec::new()),
        Some(v) => Val::set(iter::collect(v)?),
    }
}

fn abs(_: &mut dyn Host, args: &[Val], kwargs: &[(String, Val)]) -> Result<Val> {
    expect_args("abs", args, kwargs, 1, 1)?;
    match &args[0] {
        Val::Float(f) => Ok(Val::Float(f.abs())),
        v => match v.as_int() {
            Some(i) => i
                .checked_abs()
                .map(Val::Int)
                .ok_or_else(|| host_error(ExcKind::OverflowError, "integer overflow")),
            None => Err(host_error(
                ExcKind::TypeError,
                format!("bad operand type for abs(): '{}'", v.type_name()),
            )),
        },
    }
}

fn extreme(name: &str, args: &[Val], kwargs: &[(String, Val)], pick: CmpOp) -> Result<Val> {
    let (items, default) = {
        let mut default = None;
        for (key, value) in kwargs {
            match key.as_str() {
                "default" => default = Some(value.clone()),
                other => {
                    return Err(host_error(
                        ExcKind::TypeError,
                        format!("'{other}' is an invalid keyword argument for {name}()"),
                    ));
                }
            }
        }
        match args {
            [] => {
                return Err(host_error(
                    ExcKind::TypeError,
                    format!("{name} expected 1 argument, got 0"),
                ));
            }
            [single] => (iter::collect(single)?, default),
            many => (many.to_vec(), default),
        }
    };
    let mut iter = items.into_iter();
    let Some(mut best) = iter.next() else {
        return default.ok_or_else(|| host_error(ExcKind::ValueError, format!("{name}() arg is an empty sequence")));
    };
    for item in iter {
        if order(&item, pick, &best)? {
            best = item;
        }
    }
    Ok(best)
}

fn min(_: &mut dyn Host, args: &[Val], kwargs: &[(String, Val)]) -> Result<Val> {
    extreme("min", args, kwargs, CmpOp::Lt)
}

fn max(_: &mut dyn Host, args: &[Val], kwargs: &[(String, Val)]) -> Result<Val> {
    extreme("max", args, kwargs, CmpOp::Gt)
}

fn sum(_: &mut dyn Host, args: &[Val], kwargs: &[(String, Val)]) -> Result<Val> {
    expect_args("sum", args, kwargs, 1, 2)?;
    let mut total = args.get(1).cloned().unwrap_or(Val::Int(0));
    if matches!(total, Val::Str(_)) {
        return Err(host_error(
            ExcKind::TypeError,
            "sum() can't sum strings [use ''.join(seq) instead]",
        ));
    }
    let add = BinOp::Add.binary();
    for item in iter::collect(&args[0])? {
        total = add(&total, &item)?;
    }
    Ok(total)
}

fn iter_(_: &mut dyn Host, args: &[Val], kwargs: &[(String, Val)]) -> Result<Val> {
    expect_args("iter", args, kwargs, 1, 1)?;
    iter::get_iter(&args[0])
}

fn next(_: &mut dyn Host, args: &[Val], kwargs: &[(String, Val)]) -> Result<Val> {
    expect_args("next", args, kwargs, 1, 2)?;
    match (iter::next(&args[0])?, args.get(1)) {
        (Some(item), _) => Ok(item),
        (None, Some(default)) => Ok(default.clone()),
        (None, None) => Err(host_error(ExcKind::StopIteration, "")),
    }
}

fn sorted(host: &mut dyn Host, args: &[Val], kwargs: &[(String, Val)]) -> Result<Val> {
    if args.len() != 1 {
        return Err(host_error(
            ExcKind::TypeError,
            format!("sorted expected 1 argument, got {}", args.len()),
        ));
    }
    let list = Val::list(iter::collect(&args[0])?);
    let sort = super::methods::lookup(&list, "sort")
        .ok_or_else(|| host_error(ExcKind::RuntimeError, "list.sort is missing"))?;
    (sort.func)(host, std::slice::from_ref(&list), kwargs)?;
    Ok(list)
}

fn enumerate(_: &mut dyn Host, args: &[Val], kwargs: &[(String, Val)]) -> Result<Val> {
    expect_args("enumerate", args, kwargs, 1, 2)?;
    let start = args.get(1).map(|v| int_arg("enumerate", v)).transpose()?.unwrap_or(0);
    let pairs = iter::collect(&args[0])?
        .into_iter()
        .enumerate()
        .map(|(idx, item)| Val::tuple(vec![Val::Int(start + idx as i64), item]))
        .collect();
    iter::get_iter(&Val::list(pairs))
}

fn zip(_: &mut dyn Host, args: &[Val], kwargs: &[(String, Val)]) -> Result<Val> {
    expect_args("zip", args, kwargs, 0, usize::MAX)?;
    let columns = args.iter().map(iter::collect).collect::<Result<Vec<_>>>()?;
    let len = columns.iter().map(Vec::len).min().unwrap_or(0);
    let rows = (0..len)
        .map(|row| Val::tuple(columns.iter().map(|col| col[row].clone()).collect()))
        .collect();
    iter::get_iter(&Val::list(rows))
}

fn reversed(_: &mut dyn Host, args: &[Val], kwargs: &[(String, Val)]) -> Result<Val> {
    expect_args("reversed", args, kwargs, 1, 1)?;
    let mut items = iter::collect(&args[0])?;
    items.reverse();
    iter::get_iter(&Val::list(items))
}

fn name_arg<'a>(func: &str, v: &'a Val) -> Result<&'a str> {
    v.as_str().ok_or_else(|| {
        host_error(
            ExcKind::TypeError,
            format!("{func}(): attribute name must be string"),
        )
    })
}

fn getattr(_: &mut dyn Host, args: &[Val], kwargs: &[(String, Val)]) -> Result<Val> {
    expect_args("getattr", args, kwargs, 2, 3)?;
    let name = name_arg("getattr", &args[1])?;
    match (attr::get_attr(&args[0], name), args.get(2)) {
        (Ok(value), _) => Ok(value),
        (Err(err), Some(default)) if is_attribute_error(&err) => Ok(default.clone()),
        (Err(err), _) => Err(err),
    }
}

fn is_attribute_error(err: &anyhow::Error) -> bool {
    err.downcast_ref::<HostError>()
        .is_some_and(|host| host.kind.is_subclass_of(ExcKind::AttributeError))
}

fn setattr(_: &mut dyn Host, args: &[Val], kwargs: &[(String, Val)]) -> Result<Val> {
    expect_args("setattr", args, kwargs, 3, 3)?;
    attr::set_attr(&args[0], name_arg("setattr", &args[1])?, args[2].clone())?;
    Ok(Val::None)
}

fn hasattr(_: &mut dyn Host, args: &[Val], kwargs: &[(String, Val)]) -> Result<Val> {
    expect_args("hasattr", args, kwargs, 2, 2)?;
    match attr::get_attr(&args[0], name_arg("hasattr", &args[1])?) {
        Ok(_) => Ok(Val::Bool(true)),
        Err(err) if is_attribute_error(&err) => Ok(Val::Bool(false)),
        Err(err) => Err(err),
    }
}

/// `namespace(**attrs)`: a mutable attribute bag.
fn namespace(_: &mut dyn Host, args: &[Val], kwargs: &[(String, Val)]) -> Result<Val> {
    if !args.is_empty() {
        return Err(host_error(
            ExcKind::TypeError,
            "namespace() takes no positional arguments",
        ));
    }
    Ok(Val::namespace(kwargs.iter().cloned()))
}
