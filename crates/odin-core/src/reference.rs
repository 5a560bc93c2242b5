//! The `^` reference mini-language.
//!
//! A reference has the form `^task(.path)*`: the first segment names a
//! sibling task and the remaining segments are successive keys into that
//! task's persisted record. A whole argument may be a reference, or
//! references may be embedded in surrounding text inside braces: `{^a.b}`.
//! Braces nest; `{^a.{^b}}` resolves the inner span first and splices the
//! result into the outer reference before resolving it.

use serde_json::Value;

/// Is this string a reference to another task's record?
pub fn is_reference(text: &str) -> bool {
    text.starts_with('^')
}

/// Split a reference into its lookup segments, dropping the leading `^`.
pub fn parse_reference(reference: &str) -> Vec<&str> {
    let mut parts: Vec<&str> = reference.split('.').collect();
    parts[0] = parts[0].strip_prefix('^').unwrap_or(parts[0]);
    parts
}

/// Walk `path` into `record`. A missing key resolves to `None`; the caller
/// decides whether that is an error.
pub fn extract_path<'a>(path: &[&str], record: &'a Value) -> Option<&'a Value> {
    let mut current = record;
    for key in path {
        current = match current {
            Value::Object(map) => map.get(*key)?,
            Value::Array(items) => items.get(key.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Render a resolved value for splicing into surrounding text. Strings
/// splice raw; anything else splices as its JSON rendering.
fn fragment(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// Expand the references in one argument.
///
/// Brace spans are expanded bottom-up; a span whose contents are not a
/// reference is copied through verbatim, as are unmatched braces. If the
/// fully expanded argument is itself a reference it is resolved through
/// `resolve`, otherwise the expanded string is returned.
pub fn rewrite_references(reference: &str, resolve: &dyn Fn(&str) -> Value) -> Value {
    // Byte offsets of the currently open spans, just past each `{`.
    let mut starts: Vec<usize> = Vec::new();
    let mut out = String::new();
    for (i, ch) in reference.char_indices() {
        match ch {
            '{' => starts.push(i + 1),
            '}' => {
                // A `}` without an opener is literal text.
                let Some(start) = starts.pop() else {
                    out.push(ch);
                    continue;
                };
                if starts.is_empty() {
                    let to_sub = &reference[start..i];
                    match rewrite_references(to_sub, resolve) {
                        // The span was not a substitution: put the braces back.
                        Value::String(sub) if sub == to_sub => {
                            out.push('{');
                            out.push_str(&sub);
                            out.push('}');
                        }
                        resolved => out.push_str(&fragment(&resolved)),
                    }
                }
            }
            _ => {
                if starts.is_empty() {
                    out.push(ch);
                }
            }
        }
    }
    // A span that never closes is copied out verbatim from its `{`.
    if let Some(&first) = starts.first() {
        out.push_str(&reference[first - 1..]);
    }
    if is_reference(&out) {
        return resolve(&out);
    }
    Value::String(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    fn mapping() -> HashMap<&'static str, Value> {
        HashMap::from([
            ("^a.b", json!("first-value")),
            ("^c", json!("c-value")),
            ("^d.r", json!("dr-vals")),
            ("^ec", json!("c")),
            ("^a.b.c", json!("a-b-c-value")),
            ("^z", json!(".x")),
            ("^y.x", json!("b.c")),
            ("^q", json!("a")),
            ("^a.{example}", json!("a-with-example")),
        ])
    }

    fn rewrite(reference: &str) -> Value {
        let map = mapping();
        rewrite_references(reference, &|r| map.get(r).cloned().unwrap_or(Value::Null))
    }

    #[test]
    fn full_reference() {
        assert_eq!(rewrite("^a.b"), json!("first-value"));
    }

    #[test]
    fn no_reference() {
        assert_eq!(rewrite("missing"), json!("missing"));
    }

    #[test]
    fn partial_reference() {
        assert_eq!(rewrite("text-{^c}-text"), json!("text-c-value-text"));
    }

    #[test]
    fn multiple_references() {
        assert_eq!(
            rewrite("text-{^d.r}-more-{^a.b}"),
            json!("text-dr-vals-more-first-value")
        );
    }

    #[test]
    fn curlies_without_reference_are_literal() {
        assert_eq!(rewrite("text-{example}-more"), json!("text-{example}-more"));
    }

    #[test]
    fn starts_with_reference() {
        assert_eq!(rewrite("{^c}-ex"), json!("c-value-ex"));
    }

    #[test]
    fn ends_with_reference() {
        assert_eq!(rewrite("ex-{^a.b}"), json!("ex-first-value"));
    }

    #[test]
    fn only_a_sub_reference() {
        assert_eq!(rewrite("{^d.r}"), json!("dr-vals"));
    }

    #[test]
    fn sub_reference() {
        assert_eq!(rewrite("text-{^a.b.{^ec}}-example"), json!("text-a-b-c-value-example"));
    }

    #[test]
    fn nested_references() {
        assert_eq!(rewrite("example={^a.{^y{^z}}}"), json!("example=a-b-c-value"));
    }

    #[test]
    fn multiple_sub_references() {
        assert_eq!(rewrite("example={^{^q}.b.{^ec}}"), json!("example=a-b-c-value"));
    }

    #[test]
    fn non_reference_inside_sub_reference() {
        assert_eq!(rewrite("example={^a.{example}}"), json!("example=a-with-example"));
    }

    #[test]
    fn lone_right_brace() {
        assert_eq!(rewrite("example-}-more"), json!("example-}-more"));
    }

    #[test]
    fn lone_left_brace() {
        assert_eq!(rewrite("example={-more"), json!("example={-more"));
    }

    #[test]
    fn rewrite_is_a_fixed_point() {
        let map = mapping();
        let resolve = |r: &str| map.get(r).cloned().unwrap_or(Value::Null);
        for input in ["text-{^c}-text", "plain", "ex-{^a.b}", "{unrelated}"] {
            let once = rewrite_references(input, &resolve);
            let twice = rewrite_references(once.as_str().unwrap(), &resolve);
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn extract_path_walks_objects_and_arrays() {
        let record = json!({"out": {"path": "/data/file", "parts": ["x", "y"]}});
        assert_eq!(
            extract_path(&["out", "path"], &record),
            Some(&json!("/data/file"))
        );
        assert_eq!(extract_path(&["out", "parts", "1"], &record), Some(&json!("y")));
        assert_eq!(extract_path(&["out", "missing"], &record), None);
    }

    #[test]
    fn parse_reference_strips_caret() {
        assert_eq!(parse_reference("^gen.out.path"), vec!["gen", "out", "path"]);
        assert_eq!(parse_reference("plain"), vec!["plain"]);
    }
}
