use std::collections::HashMap;

use anyhow::Result;
use framevm_core::host::Host;
use framevm_core::module::Module;
use framevm_core::val::methods::expect_args;
use framevm_core::val::{Dict, ExcKind, Val, host_error};
use serde_json::Value as JsonValue;

#[derive(Debug)]
pub struct JsonModule {
    functions: HashMap<String, Val>,
}

impl Default for JsonModule {
    fn default() -> Self {
        Self::new()
    }
}

impl JsonModule {
    pub fn new() -> Self {
        let mut functions = HashMap::new();
        functions.insert("loads".to_string(), Val::native("loads", loads));
        functions.insert("dumps".to_string(), Val::native("dumps", dumps));
        JsonModule { functions }
    }
}

impl Module for JsonModule {
    fn name(&self) -> &str {
        "json"
    }

    fn description(&self) -> &str {
        "JSON encoding and decoding"
    }

    fn exports(&self) -> Vec<(String, Val)> {
        self.functions.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }
}

fn loads(_: &mut dyn Host, args: &[Val], kwargs: &[(String, Val)]) -> Result<Val> {
    expect_args("loads", args, kwargs, 1, 1)?;
    let Some(text) = args[0].as_str() else {
        return Err(host_error(
            ExcKind::TypeError,
            format!(
                "the JSON object must be str, not {}",
                args[0].type_name()
            ),
        ));
    };
    let value: JsonValue = serde_json::from_str(text)
        .map_err(|e| host_error(ExcKind::ValueError, format!("invalid JSON: {e}")))?;
    from_json(value)
}

fn from_json(value: JsonValue) -> Result<Val> {
    Ok(match value {
        JsonValue::Null => Val::None,
        JsonValue::Bool(b) => Val::Bool(b),
        JsonValue::Number(n) => match n.as_i64() {
            Some(i) => Val::Int(i),
            None => Val::Float(n.as_f64().unwrap_or(f64::NAN)),
        },
        JsonValue::String(s) => Val::str(s),
        JsonValue::Array(items) => Val::list(items.into_iter().map(from_json).collect::<Result<_>>()?),
        JsonValue::Object(map) => {
            let mut dict = Dict::new();
            for (key, value) in map {
                dict.insert(Val::str(key), from_json(value)?)?;
            }
            Val::dict(dict)
        }
    })
}

/// `dumps(obj, indent=None, sort_keys=False)`
fn dumps(_: &mut dyn Host, args: &[Val], kwargs: &[(String, Val)]) -> Result<Val> {
    expect_args("dumps", args, &[], 1, 1)?;
    let mut options = DumpOptions::default();
    for (key, value) in kwargs {
        match key.as_str() {
            "indent" => {
                options.indent = match value {
                    Val::None => None,
                    other => Some(other.as_int().filter(|n| *n >= 0).ok_or_else(|| {
                        host_error(ExcKind::TypeError, "indent must be a non-negative int or None")
                    })? as usize),
                }
            }
            "sort_keys" => options.sort_keys = value.truthy(),
            other => {
                return Err(host_error(
                    ExcKind::TypeError,
                    format!("dumps() got an unexpected keyword argument '{other}'"),
                ));
            }
        }
    }
    let mut out = String::new();
    write_value(&args[0], &options, 0, &mut out)?;
    Ok(Val::from(out))
}

#[derive(Debug, Default)]
struct DumpOptions {
    indent: Option<usize>,
    sort_keys: bool,
}

impl DumpOptions {
    fn newline(&self, depth: usize, out: &mut String) {
        if let Some(width) = self.indent {
            out.push('\n');
            out.push_str(&" ".repeat(width * depth));
        }
    }

    fn item_separator(&self) -> &'static str {
        if self.indent.is_some() { "," } else { ", " }
    }
}

fn write_str(s: &str, out: &mut String) -> Result<()> {
    out.push_str(&serde_json::to_string(s)?);
    Ok(())
}

fn write_value(value: &Val, options: &DumpOptions, depth: usize, out: &mut String) -> Result<()> {
    match value {
        Val::None => out.push_str("null"),
        Val::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Val::Int(i) => out.push_str(&i.to_string()),
        Val::Float(f) => {
            if !f.is_finite() {
                return Err(host_error(
                    ExcKind::ValueError,
                    "Out of range float values are not JSON compliant",
                ));
            }
            out.push_str(&value.repr());
        }
        Val::Str(s) => write_str(s, out)?,
        Val::List(items) => write_array(&items.borrow(), options, depth, out)?,
        Val::Tuple(items) => write_array(items, options, depth, out)?,
        Val::Dict(dict) => {
            let mut entries = Vec::with_capacity(dict.borrow().len());
            for (key, value) in dict.borrow().iter() {
                entries.push((object_key(key)?, value.clone()));
            }
            if options.sort_keys {
                entries.sort_by(|a, b| a.0.cmp(&b.0));
            }
            write_object(&entries, options, depth, out)?;
        }
        other => {
            return Err(host_error(
                ExcKind::TypeError,
                format!("Object of type {} is not JSON serializable", other.type_name()),
            ));
        }
    }
    Ok(())
}

/// JSON object keys are strings; scalar keys are coerced.
fn object_key(key: &Val) -> Result<String> {
    match key {
        Val::Str(s) => Ok(s.to_string()),
        Val::Int(_) | Val::Float(_) => Ok(key.repr()),
        Val::Bool(b) => Ok(b.to_string()),
        Val::None => Ok("null".to_string()),
        other => Err(host_error(
            ExcKind::TypeError,
            format!(
                "keys must be str, int, float, bool or None, not {}",
                other.type_name()
            ),
        )),
    }
}

fn write_array(items: &[Val], options: &DumpOptions, depth: usize, out: &mut String) -> Result<()> {
    if items.is_empty() {
        out.push_str("[]");
        return Ok(());
    }
    out.push('[');
    for (idx, item) in items.iter().enumerate() {
        if idx > 0 {
            out.push_str(options.item_separator());
        }
        options.newline(depth + 1, out);
        write_value(item, options, depth + 1, out)?;
    }
    options.newline(depth, out);
    out.push(']');
    Ok(())
}

fn write_object(entries: &[(String, Val)], options: &DumpOptions, depth: usize, out: &mut String) -> Result<()> {
    if entries.is_empty() {
        out.push_str("{}");
        return Ok(());
    }
    out.push('{');
    for (idx, (key, value)) in entries.iter().enumerate() {
        if idx > 0 {
            out.push_str(options.item_separator());
        }
        options.newline(depth + 1, out);
        write_str(key, out)?;
        out.push_str(": ");
        write_value(value, options, depth + 1, out)?;
    }
    options.newline(depth, out);
    out.push('}');
    Ok(())
}
