// Copyright 2026 The Schnabel Project
// SPDX-License-Identifier: Apache-2.0

// Separator collapse.
//
// "i.g.n.o.r.e" and "i-g-n-o-r-e" defeat keyword matching while reading
// fine to a model. This sanitizer elides separator characters sitting
// between two letter/number code points (Unicode-aware), plus separator
// runs hugging a letter at the string boundary.

use async_trait::async_trait;

use crate::error::AuditError;
use crate::normalize::NormalizedInput;
use crate::scanner::{Finding, FindingKind, RiskLevel, Scanner, ScannerKind, ScannerOutput};
use crate::views::{ensure_views, ViewName};

use super::{for_each_target, propagate_revealed};

const SEPARATORS: [char; 5] = ['|', '.', '_', '-', '+'];

pub struct SeparatorCollapse;

#[async_trait]
impl Scanner for SeparatorCollapse {
    fn name(&self) -> &'static str {
        "separator_collapse"
    }

    fn kind(&self) -> ScannerKind {
        ScannerKind::Sanitize
    }

    async fn run(&self, input: NormalizedInput) -> Result<ScannerOutput, AuditError> {
        let mut input = ensure_views(input);
        let mut findings = Vec::new();
        let request_id = input.request_id.clone();

        for_each_target(&mut input, |target, views| {
            let (sanitized, removed_sanitized) = collapse(&views.sanitized);
            let (revealed, removed_revealed) = collapse(&views.revealed);
            let removed = removed_sanitized.max(removed_revealed);
            if removed == 0 {
                return;
            }

            views.sanitized = sanitized;
            views.revealed = revealed;

            let (risk, score) = if removed >= 6 {
                (RiskLevel::Medium, 0.5)
            } else {
                (RiskLevel::Low, 0.25)
            };

            let target = target.finding_target(ViewName::Sanitized);
            findings.push(
                Finding::new(
                    FindingKind::Sanitize,
                    "separator_collapse",
                    &request_id,
                    &target.key(),
                    score,
                    risk,
                    format!("collapsed {removed} separator characters between letters"),
                    target,
                )
                .with_tag("obfuscation")
                .with_evidence("removedCount", removed),
            );
        });

        propagate_revealed(&mut input);
        Ok(ScannerOutput { input, findings })
    }
}

fn is_separator(c: char) -> bool {
    SEPARATORS.contains(&c)
}

/// Remove separators between two alphanumerics and at alphanumeric-adjacent
/// string boundaries. Returns the new string and the removal count.
fn collapse(text: &str) -> (String, usize) {
    let chars: Vec<char> = text.chars().collect();
    let len = chars.len();
    let mut out = String::with_capacity(text.len());
    let mut removed = 0;

    for (i, &c) in chars.iter().enumerate() {
        if is_separator(c) {
            let prev_alnum = i > 0 && chars[i - 1].is_alphanumeric();
            let next_alnum = i + 1 < len && chars[i + 1].is_alphanumeric();
            let leading = i == 0 && next_alnum;
            let trailing = i + 1 == len && prev_alnum;
            if (prev_alnum && next_alnum) || leading || trailing {
                removed += 1;
                continue;
            }
        }
        out.push(c);
    }

    (out, removed)
}
