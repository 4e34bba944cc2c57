//! Operator semantics over values.
//!
//! These are the pure halves of the AIR operator nodes: they consume value
//! operands and produce a value or a runtime error. Reference plumbing
//! (reading operands, writing assign-back results) lives in the evaluator;
//! nothing here touches a reference.
//!
//! Integer arithmetic is checked — overflow and division by zero are
//! runtime errors, never wrapping. Real arithmetic follows IEEE-754 and
//! never fails. Mixed integer/real arithmetic widens to real.

use std::rc::Rc;

use crate::{
    air::{BinaryOp, UnaryOp},
    exception::{ExecResult, Exception},
    value::{Compare, Value},
};

fn unary_error(op: &str, operand: &Value) -> Exception {
    Exception::runtime(format!(
        "`{op}` not applicable (operand had type `{}`)",
        operand.type_of()
    ))
}

fn binary_error(op: &str, lhs: &Value, rhs: &Value) -> Exception {
    Exception::runtime(format!(
        "`{op}` not applicable (operands had types `{}` and `{}`)",
        lhs.type_of(),
        rhs.type_of()
    ))
}

fn overflow_error(what: &str, lhs: i64, rhs: i64) -> Exception {
    Exception::runtime(format!("integer {what} overflow (operands were `{lhs}` and `{rhs}`)"))
}

/// Applies a pure unary operator. Increment/decrement forms are not pure
/// and are handled by the evaluator directly.
pub(crate) fn unary(op: UnaryOp, operand: &Value) -> ExecResult<Value> {
    match op {
        UnaryOp::Pos => match operand {
            Value::Integer(_) | Value::Real(_) => Ok(operand.clone()),
            _ => Err(unary_error("+", operand)),
        },
        UnaryOp::Neg => match operand {
            Value::Integer(n) => n
                .checked_neg()
                .map(Value::Integer)
                .ok_or_else(|| overflow_error("negation", *n, 0)),
            Value::Real(r) => Ok(Value::Real(-r)),
            _ => Err(unary_error("-", operand)),
        },
        UnaryOp::NotLogical => Ok(Value::Boolean(!operand.test())),
        UnaryOp::NotBitwise => match operand {
            Value::Boolean(b) => Ok(Value::Boolean(!b)),
            Value::Integer(n) => Ok(Value::Integer(!n)),
            _ => Err(unary_error("~", operand)),
        },
        UnaryOp::TypeOf => Ok(Value::from(operand.type_of().to_string())),
        UnaryOp::Sqrt => Ok(Value::Real(operand.as_number()?.sqrt())),
        UnaryOp::Abs => match operand {
            Value::Integer(n) => n
                .checked_abs()
                .map(Value::Integer)
                .ok_or_else(|| overflow_error("negation", *n, 0)),
            Value::Real(r) => Ok(Value::Real(r.abs())),
            _ => Err(unary_error("__abs", operand)),
        },
        UnaryOp::Sign => match operand {
            // Arithmetic sign propagation: -1 for negative (sign bit on
            // reals, so -0.0 counts), else 0.
            Value::Integer(n) => Ok(Value::Integer(n >> 63)),
            Value::Real(r) => Ok(Value::Integer(if r.is_sign_negative() { -1 } else { 0 })),
            _ => Err(unary_error("__sign", operand)),
        },
        UnaryOp::Round => rounded(operand, f64::round),
        UnaryOp::Floor => rounded(operand, f64::floor),
        UnaryOp::Ceil => rounded(operand, f64::ceil),
        UnaryOp::Trunc => rounded(operand, f64::trunc),
        UnaryOp::IRound => rounded_integer(operand, f64::round),
        UnaryOp::IFloor => rounded_integer(operand, f64::floor),
        UnaryOp::ICeil => rounded_integer(operand, f64::ceil),
        UnaryOp::ITrunc => rounded_integer(operand, f64::trunc),
        UnaryOp::IsNan => match operand {
            Value::Integer(_) => Ok(Value::Boolean(false)),
            Value::Real(r) => Ok(Value::Boolean(r.is_nan())),
            _ => Err(unary_error("__isnan", operand)),
        },
        UnaryOp::IsInf => match operand {
            Value::Integer(_) => Ok(Value::Boolean(false)),
            Value::Real(r) => Ok(Value::Boolean(r.is_infinite())),
            _ => Err(unary_error("__isinf", operand)),
        },
        UnaryOp::Lzcnt => Ok(Value::Integer(i64::from(
            (operand.as_integer()? as u64).leading_zeros(),
        ))),
        UnaryOp::Tzcnt => Ok(Value::Integer(i64::from(
            (operand.as_integer()? as u64).trailing_zeros(),
        ))),
        UnaryOp::Popcnt => Ok(Value::Integer(i64::from(
            (operand.as_integer()? as u64).count_ones(),
        ))),
        UnaryOp::CountOf => match operand {
            Value::Null => Ok(Value::Integer(0)),
            Value::String(s) => Ok(Value::Integer(s.len() as i64)),
            Value::Array(a) => Ok(Value::Integer(a.len() as i64)),
            Value::Object(o) => Ok(Value::Integer(o.len() as i64)),
            _ => Err(unary_error("countof", operand)),
        },
        UnaryOp::ToBoolean => Ok(Value::Boolean(operand.test())),
        UnaryOp::PreInc | UnaryOp::PreDec | UnaryOp::PostInc | UnaryOp::PostDec => Err(
            Exception::runtime("increment/decrement requires a modifiable reference"),
        ),
    }
}

fn rounded(operand: &Value, f: impl Fn(f64) -> f64) -> ExecResult<Value> {
    match operand {
        Value::Integer(_) => Ok(operand.clone()),
        Value::Real(r) => Ok(Value::Real(f(*r))),
        _ => Err(unary_error("rounding", operand)),
    }
}

fn rounded_integer(operand: &Value, f: impl Fn(f64) -> f64) -> ExecResult<Value> {
    match operand {
        Value::Integer(_) => Ok(operand.clone()),
        Value::Real(r) => {
            let rounded = f(*r);
            // i64 range check; the boundary values are not exactly
            // representable, so compare in f64 against the open interval.
            if rounded.is_nan() || rounded < -9.223_372_036_854_776E18 || rounded >= 9.223_372_036_854_776E18 {
                return Err(Exception::runtime(format!(
                    "value `{rounded}` not representable as an integer"
                )));
            }
            Ok(Value::Integer(rounded as i64))
        }
        _ => Err(unary_error("rounding", operand)),
    }
}

/// The value `n + delta` for the increment/decrement forms.
pub(crate) fn increment(operand: &Value, delta: i64) -> ExecResult<Value> {
    match operand {
        Value::Integer(n) => n
            .checked_add(delta)
            .map(Value::Integer)
            .ok_or_else(|| overflow_error("addition", *n, delta)),
        Value::Real(r) => Ok(Value::Real(r + delta as f64)),
        _ => Err(unary_error(if delta > 0 { "++" } else { "--" }, operand)),
    }
}

/// Applies a binary operator to two value operands.
pub(crate) fn binary(op: BinaryOp, lhs: &Value, rhs: &Value) -> ExecResult<Value> {
    match op {
        BinaryOp::CmpEq => Ok(Value::Boolean(lhs.compare(rhs) == Compare::Equal)),
        BinaryOp::CmpNe => Ok(Value::Boolean(lhs.compare(rhs) != Compare::Equal)),
        BinaryOp::CmpLt => ordered(lhs, rhs, "<").map(|c| Value::Boolean(c == Compare::Less)),
        BinaryOp::CmpGt => ordered(lhs, rhs, ">").map(|c| Value::Boolean(c == Compare::Greater)),
        BinaryOp::CmpLte => ordered(lhs, rhs, "<=").map(|c| Value::Boolean(c != Compare::Greater)),
        BinaryOp::CmpGte => ordered(lhs, rhs, ">=").map(|c| Value::Boolean(c != Compare::Less)),
        BinaryOp::CmpThreeWay => Ok(Value::from(lhs.compare(rhs).to_string())),
        BinaryOp::Add => add(lhs, rhs),
        BinaryOp::Sub => sub(lhs, rhs),
        BinaryOp::Mul => mul(lhs, rhs),
        BinaryOp::Div => div(lhs, rhs),
        BinaryOp::Mod => modulo(lhs, rhs),
        BinaryOp::Sll => shift(lhs, rhs, "<<<", |x, n| Value::Integer(((x as u64) << (n % 64)) as i64)),
        BinaryOp::Srl => shift(lhs, rhs, ">>>", |x, n| Value::Integer(((x as u64) >> (n % 64)) as i64)),
        BinaryOp::Sla => shift(lhs, rhs, "<<", |x, n| Value::Integer(x << n.min(63))),
        BinaryOp::Sra => shift(lhs, rhs, ">>", |x, n| Value::Integer(x >> n.min(63))),
        BinaryOp::AndBitwise => bitwise(lhs, rhs, "&", |a, b| a & b, |a, b| a && b),
        BinaryOp::OrBitwise => bitwise(lhs, rhs, "|", |a, b| a | b, |a, b| a || b),
        BinaryOp::XorBitwise => bitwise(lhs, rhs, "^", |a, b| a ^ b, |a, b| a != b),
    }
}

fn ordered(lhs: &Value, rhs: &Value, op: &str) -> ExecResult<Compare> {
    match lhs.compare(rhs) {
        Compare::Unordered => Err(Exception::runtime(format!(
            "`{op}` applied to unordered operands (types `{}` and `{}`)",
            lhs.type_of(),
            rhs.type_of()
        ))),
        other => Ok(other),
    }
}

fn add(lhs: &Value, rhs: &Value) -> ExecResult<Value> {
    match (lhs, rhs) {
        (Value::Integer(a), Value::Integer(b)) => a
            .checked_add(*b)
            .map(Value::Integer)
            .ok_or_else(|| overflow_error("addition", *a, *b)),
        (Value::Real(_) | Value::Integer(_), Value::Real(_) | Value::Integer(_)) => {
            Ok(Value::Real(lhs.as_number()? + rhs.as_number()?))
        }
        (Value::Boolean(a), Value::Boolean(b)) => Ok(Value::Boolean(*a | *b)),
        (Value::String(a), Value::String(b)) => {
            let mut joined = String::with_capacity(a.len() + b.len());
            joined.push_str(a);
            joined.push_str(b);
            Ok(Value::from(joined))
        }
        (Value::Array(a), Value::Array(b)) => {
            let mut joined = Vec::with_capacity(a.len() + b.len());
            joined.extend(a.iter().cloned());
            joined.extend(b.iter().cloned());
            Ok(Value::from(joined))
        }
        _ => Err(binary_error("+", lhs, rhs)),
    }
}

fn sub(lhs: &Value, rhs: &Value) -> ExecResult<Value> {
    match (lhs, rhs) {
        (Value::Integer(a), Value::Integer(b)) => a
            .checked_sub(*b)
            .map(Value::Integer)
            .ok_or_else(|| overflow_error("subtraction", *a, *b)),
        (Value::Real(_) | Value::Integer(_), Value::Real(_) | Value::Integer(_)) => {
            Ok(Value::Real(lhs.as_number()? - rhs.as_number()?))
        }
        (Value::Boolean(a), Value::Boolean(b)) => Ok(Value::Boolean(*a ^ *b)),
        _ => Err(binary_error("-", lhs, rhs)),
    }
}

fn mul(lhs: &Value, rhs: &Value) -> ExecResult<Value> {
    match (lhs, rhs) {
        (Value::Integer(a), Value::Integer(b)) => a
            .checked_mul(*b)
            .map(Value::Integer)
            .ok_or_else(|| overflow_error("multiplication", *a, *b)),
        (Value::Real(_) | Value::Integer(_), Value::Real(_) | Value::Integer(_)) => {
            Ok(Value::Real(lhs.as_number()? * rhs.as_number()?))
        }
        (Value::Boolean(a), Value::Boolean(b)) => Ok(Value::Boolean(*a & *b)),
        (Value::String(s), Value::Integer(n)) | (Value::Integer(n), Value::String(s)) => repeat_string(s, *n),
        _ => Err(binary_error("*", lhs, rhs)),
    }
}

fn repeat_string(s: &Rc<str>, count: i64) -> ExecResult<Value> {
    if count < 0 {
        return Err(Exception::runtime(format!(
            "negative string duplication count (value was `{count}`)"
        )));
    }
    let total = (s.len() as u64).checked_mul(count as u64);
    match total {
        Some(total) if total <= u64::from(u32::MAX) => Ok(Value::from(s.repeat(count as usize))),
        _ => Err(Exception::runtime("string duplication result too long")),
    }
}

fn div(lhs: &Value, rhs: &Value) -> ExecResult<Value> {
    match (lhs, rhs) {
        (Value::Integer(a), Value::Integer(b)) => {
            if *b == 0 {
                return Err(Exception::runtime(format!(
                    "integer division by zero (operands were `{a}` and `0`)"
                )));
            }
            a.checked_div(*b)
                .map(Value::Integer)
                .ok_or_else(|| overflow_error("division", *a, *b))
        }
        (Value::Real(_) | Value::Integer(_), Value::Real(_) | Value::Integer(_)) => {
            Ok(Value::Real(lhs.as_number()? / rhs.as_number()?))
        }
        _ => Err(binary_error("/", lhs, rhs)),
    }
}

fn modulo(lhs: &Value, rhs: &Value) -> ExecResult<Value> {
    match (lhs, rhs) {
        (Value::Integer(a), Value::Integer(b)) => {
            if *b == 0 {
                return Err(Exception::runtime(format!(
                    "integer division by zero (operands were `{a}` and `0`)"
                )));
            }
            a.checked_rem(*b)
                .map(Value::Integer)
                .ok_or_else(|| overflow_error("division", *a, *b))
        }
        (Value::Real(_) | Value::Integer(_), Value::Real(_) | Value::Integer(_)) => {
            Ok(Value::Real(lhs.as_number()? % rhs.as_number()?))
        }
        _ => Err(binary_error("%", lhs, rhs)),
    }
}

fn shift(lhs: &Value, rhs: &Value, op: &str, apply: impl Fn(i64, u32) -> Value) -> ExecResult<Value> {
    let (Value::Integer(x), Value::Integer(n)) = (lhs, rhs) else {
        return Err(binary_error(op, lhs, rhs));
    };
    if *n < 0 {
        return Err(Exception::runtime(format!("negative shift count (value was `{n}`)")));
    }
    let count = u32::try_from(*n).unwrap_or(u32::MAX);
    Ok(apply(*x, count))
}

fn bitwise(
    lhs: &Value,
    rhs: &Value,
    op: &str,
    ints: impl Fn(i64, i64) -> i64,
    bools: impl Fn(bool, bool) -> bool,
) -> ExecResult<Value> {
    match (lhs, rhs) {
        (Value::Integer(a), Value::Integer(b)) => Ok(Value::Integer(ints(*a, *b))),
        (Value::Boolean(a), Value::Boolean(b)) => Ok(Value::Boolean(bools(*a, *b))),
        _ => Err(binary_error(op, lhs, rhs)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_division_truncates_and_checks() {
        let v = binary(BinaryOp::Div, &Value::Integer(7), &Value::Integer(2)).unwrap();
        assert_eq!(v.as_integer().unwrap(), 3);
        assert!(binary(BinaryOp::Div, &Value::Integer(1), &Value::Integer(0)).is_err());
        assert!(binary(BinaryOp::Div, &Value::Integer(i64::MIN), &Value::Integer(-1)).is_err());
    }

    #[test]
    fn logical_shift_counts_wrap_mod_64() {
        let v = binary(BinaryOp::Sll, &Value::Integer(1), &Value::Integer(64)).unwrap();
        assert_eq!(v.as_integer().unwrap(), 1);
        let v = binary(BinaryOp::Srl, &Value::Integer(-1), &Value::Integer(1)).unwrap();
        assert_eq!(v.as_integer().unwrap(), i64::MAX);
    }

    #[test]
    fn arithmetic_shift_counts_clamp() {
        let v = binary(BinaryOp::Sra, &Value::Integer(-8), &Value::Integer(1000)).unwrap();
        assert_eq!(v.as_integer().unwrap(), -1);
    }

    #[test]
    fn sign_is_negative_one_or_zero() {
        assert_eq!(unary(UnaryOp::Sign, &Value::Integer(-5)).unwrap().as_integer().unwrap(), -1);
        assert_eq!(unary(UnaryOp::Sign, &Value::Integer(0)).unwrap().as_integer().unwrap(), 0);
        assert_eq!(unary(UnaryOp::Sign, &Value::Integer(7)).unwrap().as_integer().unwrap(), 0);
        assert_eq!(unary(UnaryOp::Sign, &Value::Real(-0.0)).unwrap().as_integer().unwrap(), -1);
    }

    #[test]
    fn three_way_comparison_formats_brackets() {
        let v = binary(BinaryOp::CmpThreeWay, &Value::Integer(1), &Value::Integer(2)).unwrap();
        assert_eq!(&**v.as_string().unwrap(), "[less]");
        let v = binary(BinaryOp::CmpThreeWay, &Value::Real(f64::NAN), &Value::Real(f64::NAN)).unwrap();
        assert_eq!(&**v.as_string().unwrap(), "[unordered]");
    }
}
