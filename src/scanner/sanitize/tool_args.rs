// Copyright 2026 The Schnabel Project
// SPDX-License-Identifier: Apache-2.0

// Tool-argument canonicalizer.
//
// Applies the unicode cleanup to every string leaf of the parsed tool-call
// list, then rewrites `toolCallsJson` canonically. Leaves are NOT trimmed:
// surrounding whitespace in an argument may be semantic. One finding per
// request when anything changed.

use async_trait::async_trait;

use crate::canonical::canonicalize;
use crate::error::AuditError;
use crate::normalize::NormalizedInput;
use crate::scanner::{Finding, FindingKind, FindingTarget, RiskLevel, Scanner, ScannerKind, ScannerOutput};
use crate::views::{ensure_views, ViewName};
use crate::walk::map_strings_mut;

use super::{clean_text, CleanupStats};

pub struct ToolArgsCanonicalizer;

#[async_trait]
impl Scanner for ToolArgsCanonicalizer {
    fn name(&self) -> &'static str {
        "tool_args_canonicalizer"
    }

    fn kind(&self) -> ScannerKind {
        ScannerKind::Sanitize
    }

    async fn run(&self, input: NormalizedInput) -> Result<ScannerOutput, AuditError> {
        let mut input = ensure_views(input);

        // Malformed embedded JSON: leave the document untouched.
        let Ok(mut calls) = serde_json::from_str::<serde_json::Value>(&input.canonical.tool_calls_json)
        else {
            return Ok(ScannerOutput::clean(input));
        };

        let mut stats = CleanupStats::default();
        let changed = map_strings_mut(&mut calls, &mut |s| {
            let (cleaned, leaf_stats) = clean_text(s, false);
            stats.merge(leaf_stats);
            Some(cleaned)
        });

        if changed == 0 {
            return Ok(ScannerOutput::clean(input));
        }

        input.canonical.tool_calls_json = canonicalize(&calls);

        let (risk, score) = if stats.invisible_removed > 0 || stats.bidi_removed > 0 {
            (RiskLevel::Medium, 0.5)
        } else {
            (RiskLevel::Low, 0.2)
        };

        let finding = Finding::new(
            FindingKind::Sanitize,
            "tool_args_canonicalizer",
            &input.request_id,
            "tool_args",
            score,
            risk,
            format!("cleaned {changed} tool argument strings"),
            FindingTarget::prompt(ViewName::Raw),
        )
        .with_tag("unicode")
        .with_tag("tool_args")
        .with_evidence("changedLeaves", changed)
        .with_evidence("removedInvisibleCount", stats.invisible_removed)
        .with_evidence("removedBidiCount", stats.bidi_removed);

        Ok(ScannerOutput {
            input,
            findings: vec![finding],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::normalize;
    use crate::request::{AuditRequest, ToolCall};
    use serde_json::json;

    async fn run_with_args(args: serde_json::Value) -> ScannerOutput {
        let mut req = AuditRequest::new("req-ta", 0.0, "p");
        req.tool_calls = vec![ToolCall {
            tool_name: "fs.write".to_string(),
            args,
        }];
        let input = normalize(&req).unwrap();
        ToolArgsCanonicalizer.run(input).await.unwrap()
    }

    #[tokio::test]
    async fn strips_invisibles_from_string_leaves() {
        let out = run_with_args(json!({"path": "/tmp/\u{200B}x", "note": "ok"})).await;

        assert!(out.input.canonical.tool_calls_json.contains("/tmp/x"));
        assert!(!out.input.canonical.tool_calls_json.contains('\u{200B}'));

        assert_eq!(out.findings.len(), 1);
        let f = &out.findings[0];
        assert_eq!(f.risk, RiskLevel::Medium);
        assert_eq!(f.evidence["changedLeaves"], 1);
        assert_eq!(f.evidence["removedInvisibleCount"], 1);
    }

    #[tokio::test]
    async fn whitespace_in_args_is_preserved() {
        let out = run_with_args(json!({"text": "  padded\u{200D}  "})).await;
        assert!(out.input.canonical.tool_calls_json.contains("  padded  "));
    }

    #[tokio::test]
    async fn nfkc_only_change_is_low() {
        let out = run_with_args(json!({"cmd": "\u{FF52}\u{FF4D}"})).await;
        assert!(out.input.canonical.tool_calls_json.contains("rm"));
        assert_eq!(out.findings[0].risk, RiskLevel::Low);
    }

    #[tokio::test]
    async fn clean_args_emit_nothing() {
        let before = run_with_args(json!({"path": "/tmp/x", "n": 3}))
            .await;
        assert!(before.findings.is_empty());
    }

    #[tokio::test]
    async fn rewrite_stays_canonical() {
        let out = run_with_args(json!({"b": "x\u{200B}", "a": "y"})).await;
        // Keys sorted after the rewrite.
        let json = &out.input.canonical.tool_calls_json;
        let a_pos = json.find("\"a\"").unwrap();
        let b_pos = json.find("\"b\"").unwrap();
        assert!(a_pos < b_pos);
    }

    #[tokio::test]
    async fn no_tool_calls_is_a_no_op() {
        let req = AuditRequest::new("req-ta0", 0.0, "p");
        let input = normalize(&req).unwrap();
        let out = ToolArgsCanonicalizer.run(input).await.unwrap();
        assert!(out.findings.is_empty());
        assert_eq!(out.input.canonical.tool_calls_json, "[]");
    }
}
