//! Array filters.

use crate::error::Result;
use crate::render::RenderContext;
use crate::value::{Number, Value};

use super::{require_arg, FilterArgs, FilterRegistry};

pub(super) fn register(registry: &mut FilterRegistry) {
    registry.register("join", Box::new(join));
    registry.register("first", Box::new(first));
    registry.register("last", Box::new(last));
    registry.register("map", Box::new(map));
    registry.register("reverse", Box::new(reverse));
    registry.register("sort", Box::new(sort));
    registry.register("sort_natural", Box::new(sort_natural));
    registry.register("uniq", Box::new(uniq));
    registry.register("compact", Box::new(compact));
    registry.register("concat", Box::new(concat));
    registry.register("size", Box::new(size));
    registry.register("where", Box::new(where_filter));
    registry.register("sum", Box::new(sum));
}

/// Materializes the input as items; scalars become a single-item list so
/// array filters degrade gracefully.
fn items_of(input: &Value) -> Vec<Value> {
    match input {
        Value::Array(_) | Value::Dictionary(_) | Value::Range(_) => {
            input.slice_items(0, None, false)
        }
        Value::Nil => Vec::new(),
        other => vec![other.clone()],
    }
}

fn join(input: Value, args: &FilterArgs, ctx: &RenderContext) -> Result<Value> {
    let glue = match args.get(0) {
        Some(value) => value.to_display(ctx.culture()),
        None => " ".to_string(),
    };
    let joined = items_of(&input)
        .iter()
        .map(|item| item.to_display(ctx.culture()))
        .collect::<Vec<_>>()
        .join(&glue);
    Ok(Value::str(joined))
}

fn first(input: Value, _args: &FilterArgs, _ctx: &RenderContext) -> Result<Value> {
    Ok(input.builtin_member("first"))
}

fn last(input: Value, _args: &FilterArgs, _ctx: &RenderContext) -> Result<Value> {
    Ok(input.builtin_member("last"))
}

/// Projects each element onto one of its members.
fn map(input: Value, args: &FilterArgs, ctx: &RenderContext) -> Result<Value> {
    let key = require_arg(args, "map", 0)?.to_display(ctx.culture());
    let mapped = items_of(&input)
        .iter()
        .map(|item| item.builtin_member(&key))
        .collect();
    Ok(Value::array(mapped))
}

fn reverse(input: Value, _args: &FilterArgs, _ctx: &RenderContext) -> Result<Value> {
    let mut items = items_of(&input);
    items.reverse();
    Ok(Value::array(items))
}

fn sort(input: Value, _args: &FilterArgs, _ctx: &RenderContext) -> Result<Value> {
    let mut items = items_of(&input);
    items.sort_by(|a, b| a.compare(b).unwrap_or(std::cmp::Ordering::Equal));
    Ok(Value::array(items))
}

/// Case-insensitive string ordering.
fn sort_natural(input: Value, _args: &FilterArgs, ctx: &RenderContext) -> Result<Value> {
    let mut items = items_of(&input);
    items.sort_by_key(|item| item.to_display(ctx.culture()).to_lowercase());
    Ok(Value::array(items))
}

fn uniq(input: Value, _args: &FilterArgs, _ctx: &RenderContext) -> Result<Value> {
    let mut unique: Vec<Value> = Vec::new();
    for item in items_of(&input) {
        if !unique.contains(&item) {
            unique.push(item);
        }
    }
    Ok(Value::array(unique))
}

fn compact(input: Value, _args: &FilterArgs, _ctx: &RenderContext) -> Result<Value> {
    let items = items_of(&input)
        .into_iter()
        .filter(|item| !item.is_nil())
        .collect();
    Ok(Value::array(items))
}

fn concat(input: Value, args: &FilterArgs, _ctx: &RenderContext) -> Result<Value> {
    let other = require_arg(args, "concat", 0)?;
    let mut items = items_of(&input);
    items.extend(items_of(other));
    Ok(Value::array(items))
}

/// Size of any collection; strings count characters, scalars are zero.
fn size(input: Value, _args: &FilterArgs, _ctx: &RenderContext) -> Result<Value> {
    let size = match &input {
        Value::Str(_) | Value::Array(_) | Value::Dictionary(_) | Value::Range(_) => {
            input.builtin_member("size")
        }
        _ => Value::number(Number::ZERO),
    };
    Ok(size)
}

/// Keeps elements whose member equals the given value, or is truthy when no
/// value argument is given.
fn where_filter(input: Value, args: &FilterArgs, ctx: &RenderContext) -> Result<Value> {
    let key = require_arg(args, "where", 0)?.to_display(ctx.culture());
    let expected = args.get(1);
    let items = items_of(&input)
        .into_iter()
        .filter(|item| {
            let member = item.builtin_member(&key);
            match expected {
                Some(expected) => member == *expected,
                None => member.to_bool(),
            }
        })
        .collect();
    Ok(Value::array(items))
}

/// Sums elements, optionally projecting a member first.
fn sum(input: Value, args: &FilterArgs, ctx: &RenderContext) -> Result<Value> {
    let key = args.get(0).map(|value| value.to_display(ctx.culture()));
    let mut total = Number::ZERO;
    for item in items_of(&input) {
        let term = match &key {
            Some(key) => item.builtin_member(key).to_number(),
            None => item.to_number(),
        };
        total = total.checked_add(term).unwrap_or(total);
    }
    Ok(Value::number(total))
}
