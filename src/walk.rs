// Copyright 2026 The Schnabel Project
// SPDX-License-Identifier: Apache-2.0

// Depth-bounded walker over untyped tool-argument JSON.
//
// Tool args arrive as arbitrary wire JSON. Detectors and the arg sanitizer
// traverse them through this walker so the depth bound and path notation
// stay consistent everywhere. Paths use dotted keys and bracketed indices
// ("args.urls[2]").

use serde_json::Value;

/// Containers nested deeper than this are not descended into.
pub const MAX_WALK_DEPTH: usize = 32;

/// Visit every string leaf reachable within the depth bound.
///
/// The visitor receives the leaf's path (rooted at `root_path`) and value.
pub fn walk_strings<F>(value: &Value, root_path: &str, visit: &mut F)
where
    F: FnMut(&str, &str),
{
    walk_inner(value, root_path, 0, visit);
}

fn walk_inner<F>(value: &Value, path: &str, depth: usize, visit: &mut F)
where
    F: FnMut(&str, &str),
{
    match value {
        Value::String(s) => visit(path, s),
        Value::Array(items) => {
            if depth >= MAX_WALK_DEPTH {
                return;
            }
            for (i, item) in items.iter().enumerate() {
                walk_inner(item, &format!("{path}[{i}]"), depth + 1, visit);
            }
        }
        Value::Object(map) => {
            if depth >= MAX_WALK_DEPTH {
                return;
            }
            for (key, item) in map {
                let child = if path.is_empty() {
                    key.clone()
                } else {
                    format!("{path}.{key}")
                };
                walk_inner(item, &child, depth + 1, visit);
            }
        }
        // null / bool / number carry no text.
        _ => {}
    }
}

/// Rewrite every string leaf in place within the depth bound.
///
/// The mapper returns `Some(replacement)` to rewrite a leaf. Returns the
/// number of leaves changed.
pub fn map_strings_mut<F>(value: &mut Value, map: &mut F) -> usize
where
    F: FnMut(&str) -> Option<String>,
{
    map_inner(value, 0, map)
}

fn map_inner<F>(value: &mut Value, depth: usize, map: &mut F) -> usize
where
    F: FnMut(&str) -> Option<String>,
{
    match value {
        Value::String(s) => {
            if let Some(replacement) = map(s) {
                if replacement != *s {
                    *s = replacement;
                    return 1;
                }
            }
            0
        }
        Value::Array(items) => {
            if depth >= MAX_WALK_DEPTH {
                return 0;
            }
            items
                .iter_mut()
                .map(|item| map_inner(item, depth + 1, map))
                .sum()
        }
        Value::Object(obj) => {
            if depth >= MAX_WALK_DEPTH {
                return 0;
            }
            obj.values_mut()
                .map(|item| map_inner(item, depth + 1, map))
                .sum()
        }
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn nested(depth: usize, leaf: Value) -> Value {
        let mut v = leaf;
        for _ in 0..depth {
            v = json!({ "k": v });
        }
        v
    }

    #[test]
    fn visits_all_string_leaves_with_paths() {
        let v = json!({
            "url": "https://a",
            "opts": {"headers": ["x", "y"]},
            "n": 3
        });
        let mut seen = Vec::new();
        walk_strings(&v, "args", &mut |path, s| {
            seen.push((path.to_string(), s.to_string()));
        });
        seen.sort();
        assert_eq!(
            seen,
            vec![
                ("args.opts.headers[0]".to_string(), "x".to_string()),
                ("args.opts.headers[1]".to_string(), "y".to_string()),
                ("args.url".to_string(), "https://a".to_string()),
            ]
        );
    }

    #[test]
    fn leaf_at_depth_limit_is_reached() {
        let v = nested(MAX_WALK_DEPTH, json!("deep"));
        let mut count = 0;
        walk_strings(&v, "", &mut |_, _| count += 1);
        assert_eq!(count, 1);
    }

    #[test]
    fn leaf_past_depth_limit_is_ignored() {
        let v = nested(MAX_WALK_DEPTH + 1, json!("too deep"));
        let mut count = 0;
        walk_strings(&v, "", &mut |_, _| count += 1);
        assert_eq!(count, 0);
    }

    #[test]
    fn map_rewrites_changed_leaves_only() {
        let mut v = json!({"a": "keep", "b": "fix\u{200B}me", "c": ["fix\u{200B}too"]});
        let changed = map_strings_mut(&mut v, &mut |s| Some(s.replace('\u{200B}', "")));
        assert_eq!(changed, 2);
        assert_eq!(v["b"], "fixme");
        assert_eq!(v["c"][0], "fixtoo");
        assert_eq!(v["a"], "keep");
    }

    #[test]
    fn map_respects_depth_limit() {
        let mut v = nested(MAX_WALK_DEPTH + 1, json!("x"));
        let changed = map_strings_mut(&mut v, &mut |_| Some("y".to_string()));
        assert_eq!(changed, 0);
    }
}
