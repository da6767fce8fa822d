//! Context-sensitive output escaping.
//!
//! Every output statement passes its rendered text through the context's
//! encoder exactly once. Pre-encoded strings (capture results, the output of
//! the `escape` filter) bypass the encoder.

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

/// Escapes a string fragment into an output buffer.
pub trait TextEncoder: Send + Sync {
    fn encode(&self, out: &mut String, input: &str);
}

/// HTML escaping to prevent XSS. The default encoder.
#[derive(Debug, Clone, Copy, Default)]
pub struct HtmlEncoder;

impl TextEncoder for HtmlEncoder {
    fn encode(&self, out: &mut String, input: &str) {
        escape_html_into(out, input);
    }
}

/// Pass-through encoder for plain-text output.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullEncoder;

impl TextEncoder for NullEncoder {
    fn encode(&self, out: &mut String, input: &str) {
        out.push_str(input);
    }
}

/// URL-component escaping for URL contexts.
#[derive(Debug, Clone, Copy, Default)]
pub struct UrlEncoder;

impl TextEncoder for UrlEncoder {
    fn encode(&self, out: &mut String, input: &str) {
        out.push_str(&url_encode(input));
    }
}

pub(crate) fn escape_html_into(out: &mut String, input: &str) {
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
}

pub(crate) fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len() + input.len() / 8);
    escape_html_into(&mut out, input);
    out
}

/// HTML-escapes the input without double-escaping existing entities.
pub(crate) fn escape_html_once(input: &str) -> String {
    let mut out = String::with_capacity(input.len() + input.len() / 8);
    let bytes = input.as_bytes();
    let mut i = 0;
    for (pos, c) in input.char_indices() {
        if pos < i {
            continue;
        }
        match c {
            '&' => {
                if let Some(len) = entity_len(&bytes[pos..]) {
                    out.push_str(&input[pos..pos + len]);
                    i = pos + len;
                } else {
                    out.push_str("&amp;");
                }
            }
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

/// Length of an HTML entity (`&name;`, `&#123;`, `&#xFF;`) starting at the
/// leading ampersand, or `None` when the ampersand is bare.
fn entity_len(bytes: &[u8]) -> Option<usize> {
    let body = &bytes[1..];
    let (skip, digits) = match body.first()? {
        b'#' => match body.get(1)? {
            b'x' | b'X' => (2, true),
            _ => (1, true),
        },
        _ => (0, false),
    };
    let mut len = 0;
    for b in &body[skip..] {
        match b {
            b';' => return if len > 0 { Some(1 + skip + len + 1) } else { None },
            b'0'..=b'9' => len += 1,
            b'a'..=b'f' | b'A'..=b'F' if digits => len += 1,
            c if !digits && c.is_ascii_alphanumeric() => len += 1,
            _ => return None,
        }
    }
    None
}

// RFC 3986 unreserved characters stay as-is; everything else is percent
// encoded, with space as '+' to match Liquid's url_encode.
const URL_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~')
    .remove(b' ');

pub(crate) fn url_encode(input: &str) -> String {
    utf8_percent_encode(input, URL_COMPONENT)
        .to_string()
        .replace(' ', "+")
}

pub(crate) fn url_decode(input: &str) -> String {
    let plus_decoded = input.replace('+', " ");
    percent_encoding::percent_decode_str(&plus_decoded)
        .decode_utf8()
        .map(|c| c.into_owned())
        .unwrap_or(plus_decoded)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_html_escape() {
        assert_eq!(escape_html("<i>&</i>"), "&lt;i&gt;&amp;&lt;/i&gt;");
        assert_eq!(escape_html(r#"a "b" 'c'"#), "a &quot;b&quot; &#39;c&#39;");
    }

    #[test]
    fn test_escape_once_keeps_entities() {
        assert_eq!(escape_html_once("1 &lt; 2 & 3"), "1 &lt; 2 &amp; 3");
        assert_eq!(escape_html_once("&#39;&bad"), "&#39;&amp;bad");
    }

    #[test]
    fn test_url_roundtrip() {
        assert_eq!(url_encode("a b/c?x=1"), "a+b%2Fc%3Fx%3D1");
        assert_eq!(url_decode("a+b%2Fc%3Fx%3D1"), "a b/c?x=1");
    }

    #[test]
    fn test_encoders_write_through() {
        let mut out = String::new();
        HtmlEncoder.encode(&mut out, "<b>");
        NullEncoder.encode(&mut out, "<b>");
        assert_eq!(out, "&lt;b&gt;<b>");

        let mut url = String::new();
        UrlEncoder.encode(&mut url, "a b");
        assert_eq!(url, "a+b");
    }
}
