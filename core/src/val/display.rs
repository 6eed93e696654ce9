use std::fmt::{self, Write};

use super::Val;

/// Shortest round-trip float text, laid out the way the reference host prints it:
/// positional for decimal exponents in `-4..16`, scientific with a signed,
/// two-digit exponent otherwise.
fn float_repr(f: f64) -> String {
    if f.is_nan() {
        return "nan".to_string();
    }
    if f.is_infinite() {
        return if f > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    let sign = if f.is_sign_negative() { "-" } else { "" };
    let mut buf = ryu::Buffer::new();
    let (digits, point) = decimal_digits(buf.format_finite(f.abs()));
    if digits.is_empty() {
        return format!("{sign}0.0");
    }

    let exponent = point - 1;
    let body = if !(-4..16).contains(&exponent) {
        let (lead, rest) = digits.split_at(1);
        let mantissa = if rest.is_empty() { lead.to_string() } else { format!("{lead}.{rest}") };
        let exp_sign = if exponent < 0 { '-' } else { '+' };
        format!("{mantissa}e{exp_sign}{:02}", exponent.unsigned_abs())
    } else if point <= 0 {
        format!("0.{}{digits}", "0".repeat(point.unsigned_abs() as usize))
    } else {
        let point = point as usize;
        if point >= digits.len() {
            format!("{digits}{}.0", "0".repeat(point - digits.len()))
        } else {
            format!("{}.{}", &digits[..point], &digits[point..])
        }
    };
    format!("{sign}{body}")
}

/// Splits ryu output into significant digits and the position of the decimal
/// point relative to the first of them (`value = 0.DIGITS * 10^point`).
fn decimal_digits(text: &str) -> (String, i32) {
    let (mantissa, exp) = match text.split_once('e') {
        Some((m, e)) => (m, e.parse::<i32>().unwrap_or(0)),
        None => (text, 0),
    };
    let (int_part, frac_part) = mantissa.split_once('.').unwrap_or((mantissa, ""));
    let mut point = int_part.len() as i32 + exp;
    let joined = format!("{int_part}{frac_part}");
    let trimmed = joined.trim_start_matches('0');
    point -= (joined.len() - trimmed.len()) as i32;
    (trimmed.trim_end_matches('0').to_string(), point)
}

fn str_repr(s: &str) -> String {
    let quote = if s.contains('\'') && !s.contains('"') { '"' } else { '\'' };
    let mut out = String::with_capacity(s.len() + 2);
    out.push(quote);
    for ch in s.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c => out.push(c),
        }
    }
    out.push(quote);
    out
}

fn join_repr<'a>(items: impl Iterator<Item = &'a Val>) -> String {
    let mut out = String::new();
    for (idx, item) in items.enumerate() {
        if idx > 0 {
            out.push_str(", ");
        }
        out.push_str(&item.repr());
    }
    out
}

impl Val {
    /// `repr(value)`.
    pub fn repr(&self) -> String {
        match self {
            Val::None => "None".to_string(),
            Val::Bool(true) => "True".to_string(),
            Val::Bool(false) => "False".to_string(),
            Val::Int(i) => i.to_string(),
            Val::Float(f) => float_repr(*f),
            Val::Str(s) => str_repr(s),
            Val::Tuple(items) if items.len() == 1 => format!("({},)", items[0].repr()),
            Val::Tuple(items) => format!("({})", join_repr(items.iter())),
            Val::List(items) => match items.try_borrow() {
                Ok(items) => format!("[{}]", join_repr(items.iter())),
                Err(_) => "[...]".to_string(),
            },
            Val::Set(items) => match items.try_borrow() {
                Ok(items) if items.is_empty() => "set()".to_string(),
                Ok(items) => format!("{{{}}}", join_repr(items.iter())),
                Err(_) => "{...}".to_string(),
            },
            Val::Dict(dict) => match dict.try_borrow() {
                Ok(dict) => {
                    let mut out = String::from("{");
                    for (idx, (k, v)) in dict.iter().enumerate() {
                        if idx > 0 {
                            out.push_str(", ");
                        }
                        let _ = write!(out, "{}: {}", k.repr(), v.repr());
                    }
                    out.push('}');
                    out
                }
                Err(_) => "{...}".to_string(),
            },
            Val::Range(r) if r.step == 1 => format!("range({}, {})", r.start, r.stop),
            Val::Range(r) => format!("range({}, {}, {})", r.start, r.stop, r.step),
            Val::Slice(s) => {
                let part = |v: Option<i64>| v.map_or("None".to_string(), |v| v.to_string());
                format!("slice({}, {}, {})", part(s.start), part(s.stop), part(s.step))
            }
            Val::Iter(_) => "<iterator>".to_string(),
            Val::Namespace(attrs) => match attrs.try_borrow() {
                Ok(attrs) => {
                    let fields: Vec<String> = attrs.iter().map(|(k, v)| format!("{k}={}", v.repr())).collect();
                    format!("namespace({})", fields.join(", "))
                }
                Err(_) => "namespace(...)".to_string(),
            },
            Val::Module(module) => format!("<module '{}'>", module.name),
            Val::Native(native) => format!("<built-in function {}>", native.name),
            Val::Method(method) => format!(
                "<built-in method {} of {} object>",
                method.func.name,
                method.receiver.type_name()
            ),
            Val::ExcType(kind) => format!("<class '{kind}'>"),
            Val::Exception(exc) => {
                let args: Vec<String> = exc.args().iter().map(Val::repr).collect();
                format!("{}({})", exc.kind(), args.join(", "))
            }
            Val::Function(func) => format!("<function {}>", func.name),
            Val::Cell(cell) => match cell.get() {
                Some(value) => format!("<cell: {} object>", value.type_name()),
                None => "<cell: empty>".to_string(),
            },
            Val::Code(code) => format!("<code object {}>", code.name),
            Val::Signal(signal) => format!("<signal {signal:?}>"),
        }
    }
}

/// `str(value)`.
impl fmt::Display for Val {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Val::Str(s) => f.write_str(s),
            Val::Exception(exc) => f.write_str(&exc.message()),
            other => f.write_str(&other.repr()),
        }
    }
}
