//! `${...}` expansion over template data
//!
//! `${name}` is replaced by the variable's value and `${name:-fallback}` by the
//! fallback when the variable is unset. Unresolved references without a
//! fallback are left as written. `$${` produces a literal `${`.
//!
//! Only string values and property values are expanded; typed values pass
//! through unchanged.

use std::collections::HashMap;

use crate::data::{NodeList, Value};

/// Variable bindings used for one expansion.
pub type Bindings = HashMap<String, String>;

/// Expand every reference in `text`.
pub fn expand_text(text: &str, bindings: &Bindings) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];

        if let Some(after) = tail.strip_prefix("$${") {
            out.push_str("${");
            rest = after;
            continue;
        }

        let Some(body_start) = tail.strip_prefix("${") else {
            out.push('$');
            rest = &tail[1..];
            continue;
        };

        let Some(end) = body_start.find('}') else {
            out.push_str(tail);
            return out;
        };

        let body = &body_start[..end];
        let (name, fallback) = match body.split_once(":-") {
            Some((name, fallback)) => (name, Some(fallback)),
            None => (body, None),
        };

        match lookup(bindings, name.trim()).or(fallback) {
            Some(value) => out.push_str(value),
            None => out.push_str(&tail[..end + 3]),
        }
        rest = &body_start[end + 1..];
    }

    out.push_str(rest);
    out
}

fn lookup<'a>(bindings: &'a Bindings, name: &str) -> Option<&'a str> {
    bindings
        .get(name)
        .or_else(|| {
            bindings
                .iter()
                .find(|(key, _)| key.eq_ignore_ascii_case(name))
                .map(|(_, value)| value)
        })
        .map(String::as_str)
}

/// Deep copy of `template` with string values and property values expanded.
pub fn expand_nodes(template: &NodeList, bindings: &Bindings) -> NodeList {
    let mut expanded = template.clone();
    if bindings.is_empty() {
        return expanded;
    }
    for node in expanded.iter_mut() {
        node.walk_mut(&mut |node| {
            if let Value::String(text) = &node.value {
                if text.contains('$') {
                    node.value = Value::String(expand_text(text, bindings));
                }
            }
            for value in node.properties.values_mut() {
                if value.contains('$') {
                    *value = expand_text(value, bindings);
                }
            }
        });
    }
    expanded
}
