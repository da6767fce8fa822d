//! Numeric filters. All of them coerce through `to_number`, so non-numeric
//! input behaves as zero rather than erroring; division and modulo by zero
//! are filter-argument errors.

use crate::error::{Error, Result};
use crate::render::RenderContext;
use crate::value::{Number, Value};

use super::{require_arg, FilterArgs, FilterRegistry};

pub(super) fn register(registry: &mut FilterRegistry) {
    registry.register("abs", Box::new(abs));
    registry.register("ceil", Box::new(ceil));
    registry.register("floor", Box::new(floor));
    registry.register("round", Box::new(round));
    registry.register("plus", Box::new(plus));
    registry.register("minus", Box::new(minus));
    registry.register("times", Box::new(times));
    registry.register("divided_by", Box::new(divided_by));
    registry.register("modulo", Box::new(modulo));
    registry.register("at_least", Box::new(at_least));
    registry.register("at_most", Box::new(at_most));
}

fn abs(input: Value, _args: &FilterArgs, _ctx: &RenderContext) -> Result<Value> {
    Ok(Value::number(input.to_number().abs()))
}

fn ceil(input: Value, _args: &FilterArgs, _ctx: &RenderContext) -> Result<Value> {
    Ok(Value::number(Number::new(
        input.to_number().decimal().ceil().normalize(),
    )))
}

fn floor(input: Value, _args: &FilterArgs, _ctx: &RenderContext) -> Result<Value> {
    Ok(Value::number(Number::new(
        input.to_number().decimal().floor().normalize(),
    )))
}

fn round(input: Value, args: &FilterArgs, _ctx: &RenderContext) -> Result<Value> {
    let digits = match args.get(0) {
        Some(value) => value.to_number().to_i64().max(0) as u32,
        None => 0,
    };
    let rounded = input.to_number().round_dp(digits);
    Ok(Value::number(if digits == 0 {
        Number::new(rounded.decimal().normalize())
    } else {
        rounded
    }))
}

fn plus(input: Value, args: &FilterArgs, _ctx: &RenderContext) -> Result<Value> {
    let rhs = require_arg(args, "plus", 0)?.to_number();
    let lhs = input.to_number();
    Ok(Value::number(lhs.checked_add(rhs).unwrap_or(lhs)))
}

fn minus(input: Value, args: &FilterArgs, _ctx: &RenderContext) -> Result<Value> {
    let rhs = require_arg(args, "minus", 0)?.to_number();
    let lhs = input.to_number();
    Ok(Value::number(lhs.checked_sub(rhs).unwrap_or(lhs)))
}

fn times(input: Value, args: &FilterArgs, _ctx: &RenderContext) -> Result<Value> {
    let rhs = require_arg(args, "times", 0)?.to_number();
    let lhs = input.to_number();
    Ok(Value::number(lhs.checked_mul(rhs).unwrap_or(Number::ZERO)))
}

/// Integer division when both operands were written without a decimal
/// point, decimal division otherwise.
fn divided_by(input: Value, args: &FilterArgs, _ctx: &RenderContext) -> Result<Value> {
    let rhs = require_arg(args, "divided_by", 0)?.to_number();
    if rhs.is_zero() {
        return Err(Error::filter_argument("divided_by", "division by zero"));
    }
    let lhs = input.to_number();
    let quotient = lhs
        .checked_div(rhs)
        .ok_or_else(|| Error::filter_argument("divided_by", "division overflow"))?;
    if lhs.has_integer_scale() && rhs.has_integer_scale() {
        Ok(Value::number(Number::new(
            quotient.decimal().floor().normalize(),
        )))
    } else {
        Ok(Value::number(quotient))
    }
}

/// Result takes the sign of the divisor, matching Liquid.
fn modulo(input: Value, args: &FilterArgs, _ctx: &RenderContext) -> Result<Value> {
    let rhs = require_arg(args, "modulo", 0)?.to_number();
    if rhs.is_zero() {
        return Err(Error::filter_argument("modulo", "division by zero"));
    }
    let lhs = input.to_number();
    let rem = lhs
        .checked_rem(rhs)
        .ok_or_else(|| Error::filter_argument("modulo", "modulo overflow"))?;
    let adjusted = rem
        .checked_add(rhs)
        .and_then(|sum| sum.checked_rem(rhs))
        .unwrap_or(rem);
    Ok(Value::number(adjusted))
}

fn at_least(input: Value, args: &FilterArgs, _ctx: &RenderContext) -> Result<Value> {
    let bound = require_arg(args, "at_least", 0)?.to_number();
    let value = input.to_number();
    Ok(Value::number(if value < bound { bound } else { value }))
}

fn at_most(input: Value, args: &FilterArgs, _ctx: &RenderContext) -> Result<Value> {
    let bound = require_arg(args, "at_most", 0)?.to_number();
    let value = input.to_number();
    Ok(Value::number(if value > bound { bound } else { value }))
}

#[cfg(test)]
mod tests {
    use crate::error::Error;
    use crate::filters::testing::apply;
    use crate::value::{Number, Value};

    fn number(text: &str) -> Value {
        Value::number(Number::parse(text).unwrap())
    }

    #[test]
    fn test_abs_ceil_floor() {
        assert_eq!(apply("abs", number("-3.5"), vec![]).unwrap(), number("3.5"));
        assert_eq!(apply("ceil", number("1.2"), vec![]).unwrap(), number("2"));
        assert_eq!(apply("floor", number("1.8"), vec![]).unwrap(), number("1"));
    }

    #[test]
    fn test_round() {
        assert_eq!(apply("round", number("2.7"), vec![]).unwrap(), number("3"));
        assert_eq!(
            apply("round", number("2.7156"), vec![Value::from(2)]).unwrap(),
            number("2.72")
        );
    }

    #[test]
    fn test_arithmetic() {
        assert_eq!(
            apply("plus", number("1"), vec![number("2")]).unwrap(),
            number("3")
        );
        assert_eq!(
            apply("minus", number("1"), vec![number("2")]).unwrap(),
            number("-1")
        );
        assert_eq!(
            apply("times", number("1.5"), vec![number("2")]).unwrap(),
            number("3.0")
        );
        // Non-numeric strings coerce to zero.
        assert_eq!(
            apply("plus", Value::str("x"), vec![number("2")]).unwrap(),
            number("2")
        );
    }

    #[test]
    fn test_divided_by() {
        // Integer operands: truncating division.
        assert_eq!(
            apply("divided_by", number("20"), vec![number("7")]).unwrap(),
            number("2")
        );
        // A decimal operand switches to decimal division.
        assert_eq!(
            apply("divided_by", number("20"), vec![number("7.0")]).unwrap()
                .to_display(&Default::default())[..4]
                .to_string(),
            "2.85"
        );
        assert!(matches!(
            apply("divided_by", number("1"), vec![number("0")]),
            Err(Error::FilterArgument { .. })
        ));
    }

    #[test]
    fn test_modulo_follows_divisor_sign() {
        assert_eq!(
            apply("modulo", number("4"), vec![number("3")]).unwrap(),
            number("1")
        );
        assert_eq!(
            apply("modulo", number("-4"), vec![number("3")]).unwrap(),
            number("2")
        );
        assert!(apply("modulo", number("4"), vec![number("0")]).is_err());
    }

    #[test]
    fn test_bounds() {
        assert_eq!(
            apply("at_least", number("3"), vec![number("5")]).unwrap(),
            number("5")
        );
        assert_eq!(
            apply("at_most", number("3"), vec![number("5")]).unwrap(),
            number("3")
        );
    }
}
