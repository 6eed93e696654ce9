use std::collections::HashMap;

use anyhow::Result;
use framevm_core::host::Host;
use framevm_core::module::Module;
use framevm_core::val::methods::expect_args;
use framevm_core::val::{ExcKind, Val, host_error};

#[derive(Debug)]
pub struct MathModule {
    functions: HashMap<String, Val>,
}

impl Default for MathModule {
    fn default() -> Self {
        Self::new()
    }
}

impl MathModule {
    pub fn new() -> Self {
        let mut functions = HashMap::new();

        functions.insert("sqrt".to_string(), Val::native("sqrt", Self::sqrt));
        functions.insert("exp".to_string(), Val::native("exp", Self::exp));
        functions.insert("log".to_string(), Val::native("log", Self::log));
        functions.insert("log2".to_string(), Val::native("log2", Self::log2));
        functions.insert("log10".to_string(), Val::native("log10", Self::log10));
        functions.insert("pow".to_string(), Val::native("pow", Self::pow));
        functions.insert("sin".to_string(), Val::native("sin", Self::sin));
        functions.insert("cos".to_string(), Val::native("cos", Self::cos));
        functions.insert("tan".to_string(), Val::native("tan", Self::tan));
        functions.insert("atan2".to_string(), Val::native("atan2", Self::atan2));
        functions.insert("hypot".to_string(), Val::native("hypot", Self::hypot));
        functions.insert("fabs".to_string(), Val::native("fabs", Self::fabs));
        functions.insert("floor".to_string(), Val::native("floor", Self::floor));
        functions.insert("ceil".to_string(), Val::native("ceil", Self::ceil));
        functions.insert("trunc".to_string(), Val::native("trunc", Self::trunc));
        functions.insert("isnan".to_string(), Val::native("isnan", Self::isnan));
        functions.insert("isinf".to_string(), Val::native("isinf", Self::isinf));
        functions.insert("gcd".to_string(), Val::native("gcd", Self::gcd));
        functions.insert("factorial".to_string(), Val::native("factorial", Self::factorial));
        functions.insert("pi".to_string(), Val::Float(std::f64::consts::PI));
        functions.insert("e".to_string(), Val::Float(std::f64::consts::E));
        functions.insert("tau".to_string(), Val::Float(std::f64::consts::TAU));
        functions.insert("inf".to_string(), Val::Float(f64::INFINITY));
        functions.insert("nan".to_string(), Val::Float(f64::NAN));

        Self { functions }
    }

    fn sqrt(_: &mut dyn Host, args: &[Val], kwargs: &[(String, Val)]) -> Result<Val> {
        let x = unary_float("sqrt", args, kwargs)?;
        if x < 0.0 {
            return Err(domain_error());
        }
        Ok(Val::Float(x.sqrt()))
    }

    fn exp(_: &mut dyn Host, args: &[Val], kwargs: &[(String, Val)]) -> Result<Val> {
        let x = unary_float("exp", args, kwargs)?;
        finite_result(x.exp(), x)
    }

    /// `log(x[, base])`, natural log by default.
    fn log(_: &mut dyn Host, args: &[Val], kwargs: &[(String, Val)]) -> Result<Val> {
        expect_args("log", args, kwargs, 1, 2)?;
        let x = positive(float_arg("log", &args[0])?)?;
        match args.get(1) {
            None => Ok(Val::Float(x.ln())),
            Some(base) => {
                let base = positive(float_arg("log", base)?)?;
                if base == 1.0 {
                    return Err(host_error(ExcKind::ZeroDivisionError, "float division by zero"));
                }
                Ok(Val::Float(x.ln() / base.ln()))
            }
        }
    }

    fn log2(_: &mut dyn Host, args: &[Val], kwargs: &[(String, Val)]) -> Result<Val> {
        let x = positive(unary_float("log2", args, kwargs)?)?;
        Ok(Val::Float(x.log2()))
    }

    fn log10(_: &mut dyn Host, args: &[Val], kwargs: &[(String, Val)]) -> Result<Val> {
        let x = positive(unary_float("log10", args, kwargs)?)?;
        Ok(Val::Float(x.log10()))
    }

    fn pow(_: &mut dyn Host, args: &[Val], kwargs: &[(String, Val)]) -> Result<Val> {
        expect_args("pow", args, kwargs, 2, 2)?;
        let base = float_arg("pow", &args[0])?;
        let exp = float_arg("pow", &args[1])?;
        if base == 0.0 && exp < 0.0 {
            return Err(domain_error());
        }
        if base < 0.0 && exp.fract() != 0.0 {
            return Err(domain_error());
        }
        finite_result(base.powf(exp), base)
    }

    fn sin(_: &mut dyn Host, args: &[Val], kwargs: &[(String, Val)]) -> Result<Val> {
        Ok(Val::Float(unary_float("sin", args, kwargs)?.sin()))
    }

    fn cos(_: &mut dyn Host, args: &[Val], kwargs: &[(String, Val)]) -> Result<Val> {
        Ok(Val::Float(unary_float("cos", args, kwargs)?.cos()))
    }

    fn tan(_: &mut dyn Host, args: &[Val], kwargs: &[(String, Val)]) -> Result<Val> {
        Ok(Val::Float(unary_float("tan", args, kwargs)?.tan()))
    }

    fn atan2(_: &mut dyn Host, args: &[Val], kwargs: &[(String, Val)]) -> Result<Val> {
        expect_args("atan2", args, kwargs, 2, 2)?;
        let y = float_arg("atan2", &args[0])?;
        let x = float_arg("atan2", &args[1])?;
        Ok(Val::Float(y.atan2(x)))
    }

    fn hypot(_: &mut dyn Host, args: &[Val], kwargs: &[(String, Val)]) -> Result<Val> {
        expect_args("hypot", args, kwargs, 2, 2)?;
        let x = float_arg("hypot", &args[0])?;
        let y = float_arg("hypot", &args[1])?;
        Ok(Val::Float(x.hypot(y)))
    }

    fn fabs(_: &mut dyn Host, args: &[Val], kwargs: &[(String, Val)]) -> Result<Val> {
        Ok(Val::Float(unary_float("fabs", args, kwargs)?.abs()))
    }

    fn floor(_: &mut dyn Host, args: &[Val], kwargs: &[(String, Val)]) -> Result<Val> {
        expect_args("floor", args, kwargs, 1, 1)?;
        integral(&args[0], "floor", f64::floor)
    }

    fn ceil(_: &mut dyn Host, args: &[Val], kwargs: &[(String, Val)]) -> Result<Val> {
        expect_args("ceil", args, kwargs, 1, 1)?;
        integral(&args[0], "ceil", f64::ceil)
    }

    fn trunc(_: &mut dyn Host, args: &[Val], kwargs: &[(String, Val)]) -> Result<Val> {
        expect_args("trunc", args, kwargs, 1, 1)?;
        integral(&args[0], "trunc", f64::trunc)
    }

    fn isnan(_: &mut dyn Host, args: &[Val], kwargs: &[(String, Val)]) -> Result<Val> {
        Ok(Val::Bool(unary_float("isnan", args, kwargs)?.is_nan()))
    }

    fn isinf(_: &mut dyn Host, args: &[Val], kwargs: &[(String, Val)]) -> Result<Val> {
        Ok(Val::Bool(unary_float("isinf", args, kwargs)?.is_infinite()))
    }

    fn gcd(_: &mut dyn Host, args: &[Val], kwargs: &[(String, Val)]) -> Result<Val> {
        expect_args("gcd", args, kwargs, 2, 2)?;
        let mut a = int_arg(&args[0])?.unsigned_abs();
        let mut b = int_arg(&args[1])?.unsigned_abs();
        while b != 0 {
            (a, b) = (b, a % b);
        }
        i64::try_from(a)
            .map(Val::Int)
            .map_err(|_| host_error(ExcKind::OverflowError, "integer overflow"))
    }

    fn factorial(_: &mut dyn Host, args: &[Val], kwargs: &[(String, Val)]) -> Result<Val> {
        expect_args("factorial", args, kwargs, 1, 1)?;
        let n = int_arg(&args[0])?;
        if n < 0 {
            return Err(host_error(
                ExcKind::ValueError,
                "factorial() not defined for negative values",
            ));
        }
        (1..=n)
            .try_fold(1i64, |acc, k| acc.checked_mul(k))
            .map(Val::Int)
            .ok_or_else(|| host_error(ExcKind::OverflowError, "integer overflow"))
    }
}

impl Module for MathModule {
    fn name(&self) -> &str {
        "math"
    }

    fn description(&self) -> &str {
        "Mathematical functions over ints and floats"
    }

    fn exports(&self) -> Vec<(String, Val)> {
        self.functions.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }
}

fn domain_error() -> anyhow::Error {
    host_error(ExcKind::ValueError, "math domain error")
}

fn float_arg(func: &str, v: &Val) -> Result<f64> {
    v.as_float().ok_or_else(|| {
        host_error(
            ExcKind::TypeError,
            format!("{func}() must be a real number, not '{}'", v.type_name()),
        )
    })
}

fn int_arg(v: &Val) -> Result<i64> {
    v.as_int().ok_or_else(|| {
        host_error(
            ExcKind::TypeError,
            format!("'{}' object cannot be interpreted as an integer", v.type_name()),
        )
    })
}

fn unary_float(func: &str, args: &[Val], kwargs: &[(String, Val)]) -> Result<f64> {
    expect_args(func, args, kwargs, 1, 1)?;
    float_arg(func, &args[0])
}

fn positive(x: f64) -> Result<f64> {
    if x <= 0.0 { Err(domain_error()) } else { Ok(x) }
}

/// An infinite result from a finite input overflowed.
fn finite_result(result: f64, input: f64) -> Result<Val> {
    if result.is_infinite() && input.is_finite() {
        return Err(host_error(ExcKind::OverflowError, "math range error"));
    }
    Ok(Val::Float(result))
}

fn integral(v: &Val, func: &str, round: fn(f64) -> f64) -> Result<Val> {
    if let Some(i) = v.as_int() {
        return Ok(Val::Int(i));
    }
    let x = float_arg(func, v)?;
    if x.is_nan() {
        return Err(host_error(
            ExcKind::ValueError,
            "cannot convert float NaN to integer",
        ));
    }
    let rounded = round(x);
    if x.is_infinite() || rounded < i64::MIN as f64 || rounded >= i64::MAX as f64 {
        return Err(host_error(
            ExcKind::OverflowError,
            "cannot convert float infinity to integer",
        ));
    }
    Ok(Val::Int(rounded as i64))
}
