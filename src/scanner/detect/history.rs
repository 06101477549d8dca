// Copyright 2026 The Schnabel Project
// SPDX-License-Identifier: Apache-2.0

// Cross-turn detectors.
//
// Both consult the session's trailing turns through the shared history
// store. Contradiction: the response claims something already happened,
// but no recorded turn backs it. Flip-flop: the previous turn carried
// failure evidence and the current response claims success anyway.
// Requests without a session id produce no findings.

use std::sync::Arc;

use async_trait::async_trait;
use regex::{Regex, RegexBuilder};

use crate::error::AuditError;
use crate::history::HistoryStore;
use crate::normalize::NormalizedInput;
use crate::scanner::{
    Finding, FindingKind, FindingTarget, RiskLevel, Scanner, ScannerKind, ScannerOutput,
};
use crate::views::ViewName;

use super::response_text;

/// Turns consulted by both detectors.
pub const DEFAULT_WINDOW: usize = 5;

fn regex_i(pattern: &str) -> Regex {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .expect("static detector pattern")
}

fn prior_success_claim() -> Regex {
    regex_i(
        r"\b(?:as|like)\s+(?:i|we)\s+(?:already|previously)\s+(?:did|mentioned|completed|confirmed)\b|\balready\s+(?:done|completed|succeeded|sent|transferred|handled|fixed)\b|\b(?:i|we)\s+(?:already|previously)\s+(?:completed|did|sent|handled|transferred)\s+(?:it|that|this)\b|이미\s*(?:완료|처리|송금|전송)",
    )
}

fn success_claim() -> Regex {
    regex_i(
        r"\b(?:succeeded|successful(?:ly)?|success|completed|all\s+done|worked|finished)\b|성공|완료|됐습니다",
    )
}

fn failure_evidence() -> Regex {
    regex_i(r"\b(?:failed|failure|error|couldn't|could\s+not|unable)\b|실패|오류|에러")
}

// ---------------------------------------------------------------------------
// Contradiction
// ---------------------------------------------------------------------------

pub struct HistoryContradiction {
    store: Arc<dyn HistoryStore>,
    window: usize,
    prior_claim: Regex,
}

impl HistoryContradiction {
    pub fn new(store: Arc<dyn HistoryStore>) -> Self {
        Self::with_window(store, DEFAULT_WINDOW)
    }

    pub fn with_window(store: Arc<dyn HistoryStore>, window: usize) -> Self {
        Self {
            store,
            window,
            prior_claim: prior_success_claim(),
        }
    }
}

#[async_trait]
impl Scanner for HistoryContradiction {
    fn name(&self) -> &'static str {
        "history_contradiction"
    }

    fn kind(&self) -> ScannerKind {
        ScannerKind::Detect
    }

    async fn run(&self, input: NormalizedInput) -> Result<ScannerOutput, AuditError> {
        let mut findings = Vec::new();

        let (Some(session_id), Some(response)) =
            (input.raw.session_id().map(String::from), response_text(&input))
        else {
            return Ok(ScannerOutput { input, findings });
        };

        if self.prior_claim.is_match(&response) {
            let recent = self.store.get_recent(&session_id, self.window);
            let any_success = recent
                .iter()
                .any(|turn| !turn.succeeded_tools.is_empty());
            if !any_success {
                findings.push(
                    Finding::new(
                        FindingKind::Detect,
                        "history_contradiction",
                        &input.request_id,
                        "history:prior_success_claim",
                        0.55,
                        RiskLevel::Medium,
                        "response claims prior success with no successful tool on record",
                        FindingTarget::response(ViewName::Revealed),
                    )
                    .with_tag("contradiction")
                    .with_tag("history")
                    .with_evidence("windowTurns", recent.len())
                    .with_evidence("sessionId", session_id),
                );
            }
        }

        Ok(ScannerOutput { input, findings })
    }
}

// ---------------------------------------------------------------------------
// Flip-flop
// ---------------------------------------------------------------------------

pub struct HistoryFlipFlop {
    store: Arc<dyn HistoryStore>,
    window: usize,
    success: Regex,
    failure: Regex,
}

impl HistoryFlipFlop {
    pub fn new(store: Arc<dyn HistoryStore>) -> Self {
        Self::with_window(store, DEFAULT_WINDOW)
    }

    pub fn with_window(store: Arc<dyn HistoryStore>, window: usize) -> Self {
        Self {
            store,
            window,
            success: success_claim(),
            failure: failure_evidence(),
        }
    }
}

#[async_trait]
impl Scanner for HistoryFlipFlop {
    fn name(&self) -> &'static str {
        "history_flipflop"
    }

    fn kind(&self) -> ScannerKind {
        ScannerKind::Detect
    }

    async fn run(&self, input: NormalizedInput) -> Result<ScannerOutput, AuditError> {
        let mut findings = Vec::new();

        let (Some(session_id), Some(response)) =
            (input.raw.session_id().map(String::from), response_text(&input))
        else {
            return Ok(ScannerOutput { input, findings });
        };

        if self.success.is_match(&response) {
            let recent = self.store.get_recent(&session_id, self.window);
            if let Some(previous) = recent.last() {
                let prior_failure = !previous.failed_tools.is_empty()
                    || previous
                        .response_snippet
                        .as_deref()
                        .is_some_and(|s| self.failure.is_match(s));
                if prior_failure {
                    findings.push(
                        Finding::new(
                            FindingKind::Detect,
                            "history_flipflop",
                            &input.request_id,
                            "history:flipflop",
                            0.8,
                            RiskLevel::High,
                            "response claims success right after a failed turn",
                            FindingTarget::response(ViewName::Revealed),
                        )
                        .with_tag("contradiction")
                        .with_tag("history")
                        .with_evidence("previousRequestId", previous.request_id.clone())
                        .with_evidence("previousFailedTools", previous.failed_tools.clone()),
                    );
                }
            }
        }

        Ok(ScannerOutput { input, findings })
    }
}
