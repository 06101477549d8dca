// Copyright 2026 The Schnabel Project
// SPDX-License-Identifier: Apache-2.0

// Built-in keyword injection detector.
//
// A small, always-on regex list for the classic injection families:
// instruction override and system-prompt disclosure. The rule pack covers
// the long tail; this detector guarantees baseline coverage even with no
// pack configured. Scans every view of the prompt and each chunk.

use async_trait::async_trait;
use regex::{Regex, RegexBuilder};

use crate::error::AuditError;
use crate::normalize::NormalizedInput;
use crate::rulepack::MatchSpan;
use crate::scanner::{Finding, FindingKind, RiskLevel, Scanner, ScannerKind, ScannerOutput};
use crate::views::ensure_views;

use super::{for_each_views, match_views, snippet, view_names};

struct BuiltinPattern {
    name: &'static str,
    regex: Regex,
    risk: RiskLevel,
    score: f64,
}

pub struct KeywordInjection {
    patterns: Vec<BuiltinPattern>,
}

impl KeywordInjection {
    pub fn new() -> Self {
        let compile = |pattern: &str| {
            RegexBuilder::new(pattern)
                .case_insensitive(true)
                .build()
                .expect("static builtin pattern")
        };

        Self {
            patterns: vec![
                BuiltinPattern {
                    name: "instruction_override",
                    regex: compile(
                        r"(?:ignore|disregard|forget)\s+(?:all\s+|any\s+)?(?:the\s+)?(?:previous|prior|above|earlier)\s+(?:instructions|directions|prompts|rules)",
                    ),
                    risk: RiskLevel::High,
                    score: 0.8,
                },
                BuiltinPattern {
                    name: "system_prompt_disclosure",
                    regex: compile(
                        r"(?:reveal|show|print|repeat|display)\s+(?:me\s+)?(?:your\s+|the\s+)?(?:system|hidden|initial)\s+prompt",
                    ),
                    risk: RiskLevel::High,
                    score: 0.75,
                },
                BuiltinPattern {
                    name: "role_override",
                    regex: compile(
                        r"you\s+are\s+now\s+(?:dan\b|unrestricted|in\s+developer\s+mode)",
                    ),
                    risk: RiskLevel::High,
                    score: 0.7,
                },
            ],
        }
    }
}

impl Default for KeywordInjection {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Scanner for KeywordInjection {
    fn name(&self) -> &'static str {
        "keyword_injection"
    }

    fn kind(&self) -> ScannerKind {
        ScannerKind::Detect
    }

    async fn run(&self, input: NormalizedInput) -> Result<ScannerOutput, AuditError> {
        let input = ensure_views(input);
        let mut findings = Vec::new();

        for_each_views(&input, |target, views| {
            // Responses are covered by response-scoped pack rules instead.
            if matches!(target, super::TargetRef::Response) {
                return;
            }

            for pattern in &self.patterns {
                let Some(hit) = match_views(views, |text| {
                    pattern.regex.find(text).map(|m| MatchSpan {
                        start: m.start(),
                        len: m.end() - m.start(),
                    })
                }) else {
                    continue;
                };

                let finding_target = target.finding_target(hit.preferred);
                let key = format!("{}:{}", pattern.name, finding_target.key());
                findings.push(
                    Finding::new(
                        FindingKind::Detect,
                        "keyword_injection",
                        &input.request_id,
                        &key,
                        pattern.score,
                        pattern.risk,
                        format!("built-in injection pattern \"{}\" matched", pattern.name),
                        finding_target,
                    )
                    .with_tag("prompt_injection")
                    .with_evidence("pattern", pattern.name)
                    .with_evidence("matchedViews", view_names(&hit.matched_views))
                    .with_evidence(
                        "snippet",
                        snippet(views.get(hit.preferred), hit.span),
                    ),
                );
            }
        });

        Ok(ScannerOutput { input, findings })
    }
}
