//! String filters.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::encode;
use crate::error::Result;
use crate::render::RenderContext;
use crate::value::Value;

use super::{require_arg, FilterArgs, FilterRegistry};

pub(super) fn register(registry: &mut FilterRegistry) {
    registry.register("append", Box::new(append));
    registry.register("prepend", Box::new(prepend));
    registry.register("capitalize", Box::new(capitalize));
    registry.register("downcase", Box::new(downcase));
    registry.register("upcase", Box::new(upcase));
    registry.register("lstrip", Box::new(lstrip));
    registry.register("rstrip", Box::new(rstrip));
    registry.register("strip", Box::new(strip));
    registry.register("strip_newlines", Box::new(strip_newlines));
    registry.register("newline_to_br", Box::new(newline_to_br));
    registry.register("remove", Box::new(remove));
    registry.register("remove_first", Box::new(remove_first));
    registry.register("replace", Box::new(replace));
    registry.register("replace_first", Box::new(replace_first));
    registry.register("slice", Box::new(slice));
    registry.register("split", Box::new(split));
    registry.register("truncate", Box::new(truncate));
    registry.register("truncatewords", Box::new(truncatewords));
    registry.register("strip_html", Box::new(strip_html));
    registry.register("escape", Box::new(escape));
    registry.register("escape_once", Box::new(escape_once));
    registry.register("url_encode", Box::new(url_encode));
    registry.register("url_decode", Box::new(url_decode));
}

fn text(value: &Value, ctx: &RenderContext) -> String {
    value.to_display(ctx.culture())
}

fn append(input: Value, args: &FilterArgs, ctx: &RenderContext) -> Result<Value> {
    let suffix = require_arg(args, "append", 0)?;
    Ok(Value::str(format!("{}{}", text(&input, ctx), text(suffix, ctx))))
}

fn prepend(input: Value, args: &FilterArgs, ctx: &RenderContext) -> Result<Value> {
    let prefix = require_arg(args, "prepend", 0)?;
    Ok(Value::str(format!("{}{}", text(prefix, ctx), text(&input, ctx))))
}

fn capitalize(input: Value, _args: &FilterArgs, ctx: &RenderContext) -> Result<Value> {
    let text = text(&input, ctx);
    let mut chars = text.chars();
    let capitalized = match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase(),
        None => String::new(),
    };
    Ok(Value::str(capitalized))
}

fn downcase(input: Value, _args: &FilterArgs, ctx: &RenderContext) -> Result<Value> {
    Ok(Value::str(text(&input, ctx).to_lowercase()))
}

fn upcase(input: Value, _args: &FilterArgs, ctx: &RenderContext) -> Result<Value> {
    Ok(Value::str(text(&input, ctx).to_uppercase()))
}

fn lstrip(input: Value, _args: &FilterArgs, ctx: &RenderContext) -> Result<Value> {
    Ok(Value::str(text(&input, ctx).trim_start().to_string()))
}

fn rstrip(input: Value, _args: &FilterArgs, ctx: &RenderContext) -> Result<Value> {
    Ok(Value::str(text(&input, ctx).trim_end().to_string()))
}

fn strip(input: Value, _args: &FilterArgs, ctx: &RenderContext) -> Result<Value> {
    Ok(Value::str(text(&input, ctx).trim().to_string()))
}

fn strip_newlines(input: Value, _args: &FilterArgs, ctx: &RenderContext) -> Result<Value> {
    Ok(Value::str(text(&input, ctx).replace(['\r', '\n'], "")))
}

fn newline_to_br(input: Value, _args: &FilterArgs, ctx: &RenderContext) -> Result<Value> {
    let text = text(&input, ctx).replace("\r\n", "\n").replace('\n', "<br />\n");
    Ok(Value::str(text))
}

fn remove(input: Value, args: &FilterArgs, ctx: &RenderContext) -> Result<Value> {
    let needle = text(require_arg(args, "remove", 0)?, ctx);
    Ok(Value::str(text(&input, ctx).replace(&needle, "")))
}

fn remove_first(input: Value, args: &FilterArgs, ctx: &RenderContext) -> Result<Value> {
    let needle = text(require_arg(args, "remove_first", 0)?, ctx);
    Ok(Value::str(text(&input, ctx).replacen(&needle, "", 1)))
}

fn replace(input: Value, args: &FilterArgs, ctx: &RenderContext) -> Result<Value> {
    let from = text(require_arg(args, "replace", 0)?, ctx);
    let to = text(&args.at(1), ctx);
    Ok(Value::str(text(&input, ctx).replace(&from, &to)))
}

fn replace_first(input: Value, args: &FilterArgs, ctx: &RenderContext) -> Result<Value> {
    let from = text(require_arg(args, "replace_first", 0)?, ctx);
    let to = text(&args.at(1), ctx);
    Ok(Value::str(text(&input, ctx).replacen(&from, &to, 1)))
}

/// `slice: offset[, length]` over characters, or over array elements when
/// the input is an array. Negative offsets count from the end.
fn slice(input: Value, args: &FilterArgs, ctx: &RenderContext) -> Result<Value> {
    let offset = require_arg(args, "slice", 0)?.to_number().to_i64();
    let length = match args.get(1) {
        Some(value) => value.to_number().to_i64().max(0) as usize,
        None => 1,
    };

    if let Value::Array(items) = &input {
        let start = normalize_offset(offset, items.len());
        let window: Vec<Value> = items.iter().skip(start).take(length).cloned().collect();
        return Ok(Value::array(window));
    }

    let chars: Vec<char> = text(&input, ctx).chars().collect();
    let start = normalize_offset(offset, chars.len());
    Ok(Value::str(
        chars.into_iter().skip(start).take(length).collect::<String>(),
    ))
}

fn normalize_offset(offset: i64, len: usize) -> usize {
    if offset < 0 {
        len.saturating_sub(offset.unsigned_abs() as usize)
    } else {
        (offset as usize).min(len)
    }
}

/// An empty separator splits into characters.
fn split(input: Value, args: &FilterArgs, ctx: &RenderContext) -> Result<Value> {
    let separator = text(require_arg(args, "split", 0)?, ctx);
    let text = text(&input, ctx);
    if text.is_empty() {
        return Ok(Value::array(Vec::new()));
    }
    let parts: Vec<Value> = if separator.is_empty() {
        text.chars().map(|c| Value::str(c.to_string())).collect()
    } else {
        text.split(separator.as_str()).map(Value::str).collect()
    };
    Ok(Value::array(parts))
}

/// The ellipsis counts toward the length budget.
fn truncate(input: Value, args: &FilterArgs, ctx: &RenderContext) -> Result<Value> {
    let text = text(&input, ctx);
    let max = match args.get(0) {
        Some(value) => value.to_number().to_i64().max(0) as usize,
        None => 50,
    };
    let ellipsis = match args.get(1) {
        Some(value) => value.to_display(ctx.culture()),
        None => "...".to_string(),
    };
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= max {
        return Ok(Value::str(text));
    }
    let keep = max.saturating_sub(ellipsis.chars().count());
    let truncated: String = chars.into_iter().take(keep).collect();
    Ok(Value::str(truncated + &ellipsis))
}

fn truncatewords(input: Value, args: &FilterArgs, ctx: &RenderContext) -> Result<Value> {
    let text = text(&input, ctx);
    let max = match args.get(0) {
        Some(value) => value.to_number().to_i64().max(1) as usize,
        None => 15,
    };
    let ellipsis = match args.get(1) {
        Some(value) => value.to_display(ctx.culture()),
        None => "...".to_string(),
    };
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.len() <= max {
        return Ok(Value::str(text));
    }
    Ok(Value::str(words[..max].join(" ") + &ellipsis))
}

static HTML_TAGS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)<script.*?</script>|<style.*?</style>|<!--.*?-->|<.*?>")
        .unwrap_or_else(|err| unreachable!("static pattern: {err}"))
});

fn strip_html(input: Value, _args: &FilterArgs, ctx: &RenderContext) -> Result<Value> {
    Ok(Value::str(
        HTML_TAGS.replace_all(&text(&input, ctx), "").into_owned(),
    ))
}

/// Escapes HTML and marks the result encoded so the output encoder does not
/// escape it a second time.
fn escape(input: Value, _args: &FilterArgs, ctx: &RenderContext) -> Result<Value> {
    Ok(Value::encoded_str(encode::escape_html(&text(&input, ctx))))
}

fn escape_once(input: Value, _args: &FilterArgs, ctx: &RenderContext) -> Result<Value> {
    Ok(Value::encoded_str(encode::escape_html_once(&text(
        &input, ctx,
    ))))
}

fn url_encode(input: Value, _args: &FilterArgs, ctx: &RenderContext) -> Result<Value> {
    Ok(Value::str(encode::url_encode(&text(&input, ctx))))
}

fn url_decode(input: Value, _args: &FilterArgs, ctx: &RenderContext) -> Result<Value> {
    Ok(Value::str(encode::url_decode(&text(&input, ctx))))
}
