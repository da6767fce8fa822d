//! `default` and `date`.

use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, TimeZone};

use crate::error::{Error, Result};
use crate::render::RenderContext;
use crate::value::Value;

use super::{require_arg, FilterArgs, FilterRegistry};

pub(super) fn register(registry: &mut FilterRegistry) {
    registry.register("default", Box::new(default));
    registry.register("date", Box::new(date));
}

/// Replaces nil, false, and empty values. `allow_false: true` keeps `false`.
fn default(input: Value, args: &FilterArgs, _ctx: &RenderContext) -> Result<Value> {
    let fallback = require_arg(args, "default", 0)?;
    let allow_false = args
        .named("allow_false")
        .map(Value::to_bool)
        .unwrap_or(false);

    let replace = match &input {
        Value::Nil => true,
        Value::Bool(false) => !allow_false,
        other => *other == Value::Empty,
    };
    Ok(if replace { fallback.clone() } else { input })
}

/// Formats a date with strftime directives. The input may be a datetime, a
/// parseable string, `"now"`/`"today"`, or a Unix timestamp.
fn date(input: Value, args: &FilterArgs, ctx: &RenderContext) -> Result<Value> {
    let Some(datetime) = resolve_datetime(&input, ctx) else {
        // Unparseable input renders unchanged, Liquid-style.
        return Ok(input);
    };

    let format = match args.get(0) {
        Some(format) => format.to_display(ctx.culture()),
        None => return Ok(Value::str(datetime.to_rfc3339())),
    };
    if StrftimeItems::new(&format).any(|item| matches!(item, Item::Error)) {
        return Err(Error::filter_argument(
            "date",
            format!("invalid format string '{format}'"),
        ));
    }
    Ok(Value::str(datetime.format(&format).to_string()))
}

fn resolve_datetime(input: &Value, ctx: &RenderContext) -> Option<DateTime<FixedOffset>> {
    match input {
        Value::DateTime(dt) => Some(*dt),
        Value::Number(n) => ctx
            .timezone()
            .timestamp_opt(n.to_i64(), 0)
            .single(),
        Value::Str(s) => parse_datetime(s.as_str(), ctx),
        _ => None,
    }
}

fn parse_datetime(text: &str, ctx: &RenderContext) -> Option<DateTime<FixedOffset>> {
    let text = text.trim();
    if text.eq_ignore_ascii_case("now") || text.eq_ignore_ascii_case("today") {
        return Some(ctx.now());
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt);
    }
    // Naive timestamps pick up the configured timezone.
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return ctx.timezone().from_local_datetime(&naive).single();
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        let naive = date.and_hms_opt(0, 0, 0)?;
        return ctx.timezone().from_local_datetime(&naive).single();
    }
    None
}
