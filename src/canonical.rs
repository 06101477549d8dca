// Copyright 2026 The Schnabel Project
// SPDX-License-Identifier: Apache-2.0

// Canonical JSON -- the sole hashing substrate.
//
// Rules:
// - object keys sorted lexicographically by Unicode code point
// - arrays preserve order
// - no insignificant whitespace
// - numbers in serde_json's standard minimal form
// - nesting beyond MAX_DEPTH renders as the "[Circular]" sentinel
//
// `serde_json::Value` is a tree, so true reference cycles cannot occur;
// the depth budget is the image of a cycle guard for adversarially nested
// input and keeps the writer off the stack limit.

use serde_json::Value;
use sha2::{Digest, Sha256};

/// Depth at which nested containers collapse to the sentinel.
const MAX_DEPTH: usize = 128;

/// Sentinel emitted for containers nested past the depth budget.
const CIRCULAR_SENTINEL: &str = "\"[Circular]\"";

/// Produce the canonical JSON string for a value.
///
/// Byte-identical output for semantically equal inputs; every hash in the
/// evidence package is computed over this form.
pub fn canonicalize(value: &Value) -> String {
    let mut out = String::with_capacity(64);
    write_canonical(value, &mut out, 0);
    out
}

/// Canonicalize any serializable value.
pub fn canonicalize_serialize<T: serde::Serialize>(value: &T) -> String {
    match serde_json::to_value(value) {
        Ok(v) => canonicalize(&v),
        // Serialization of our own types cannot fail; a map with non-string
        // keys would be the only path here and none of the evidence types
        // carry one.
        Err(_) => "null".to_string(),
    }
}

/// Lowercase hex SHA-256 of a string.
pub fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn write_canonical(value: &Value, out: &mut String, depth: usize) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(true) => out.push_str("true"),
        Value::Bool(false) => out.push_str("false"),
        Value::Number(n) => out.push_str(&n.to_string()),
        Value::String(s) => write_json_string(s, out),
        Value::Array(arr) => {
            if depth >= MAX_DEPTH {
                out.push_str(CIRCULAR_SENTINEL);
                return;
            }
            out.push('[');
            for (i, v) in arr.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(v, out, depth + 1);
            }
            out.push(']');
        }
        Value::Object(map) => {
            if depth >= MAX_DEPTH {
                out.push_str(CIRCULAR_SENTINEL);
                return;
            }
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort_unstable();
            out.push('{');
            for (i, k) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_json_string(k, out);
                out.push(':');
                write_canonical(&map[*k], out, depth + 1);
            }
            out.push('}');
        }
    }
}

/// Escape exactly as serde_json's standard encoder does.
fn write_json_string(s: &str, out: &mut String) {
    out.push('"');
    for ch in s.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\u{08}' => out.push_str("\\b"),
            '\u{0C}' => out.push_str("\\f"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => {
                out.push_str(&format!("\\u{:04x}", c as u32));
            }
            c => out.push(c),
        }
    }
    out.push('"');
}
