//! HTML escaping for `<%= %>` output.

use crate::value::Value;

/// Replace `& < > " '` with their entities in a single pass.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&#34;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// `undefined` and `null` escape to the empty string.
pub fn escape_value(value: &Value) -> String {
    if value.is_nullish() {
        return String::new();
    }
    escape_html(&value.to_js_string())
}
