// Copyright 2026 The Schnabel Project
// SPDX-License-Identifier: Apache-2.0

// Tool-result detectors.
//
// Contradiction: the response's success/failure story versus recorded tool
// outcomes. Fact mismatch: response claims about an allow-list of result
// keys versus the recorded values. Both are deliberately conservative --
// claim grammars cover English and Korean only; other locales produce no
// findings rather than guesses.

use async_trait::async_trait;
use regex::{Regex, RegexBuilder};

use crate::error::AuditError;
use crate::normalize::NormalizedInput;
use crate::scanner::{
    Finding, FindingKind, FindingTarget, RiskLevel, Scanner, ScannerKind, ScannerOutput,
};
use crate::views::ViewName;

/// Numeric result keys the fact checker is allowed to compare.
const NUMERIC_KEYS: [&str; 5] = ["balance", "total", "count", "amount", "score"];

/// Boolean result keys the fact checker is allowed to compare.
const BOOL_KEYS: [&str; 3] = ["found", "exists", "success"];

fn regex_i(pattern: &str) -> Regex {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .expect("static detector pattern")
}

/// Tool results as (name, ok, result), preferring the canonical JSON.
fn parsed_tool_results(input: &NormalizedInput) -> Vec<(String, bool, serde_json::Value)> {
    if let Ok(serde_json::Value::Array(items)) =
        serde_json::from_str::<serde_json::Value>(&input.canonical.tool_results_json)
    {
        return items
            .into_iter()
            .map(|item| {
                let name = item
                    .get("toolName")
                    .and_then(|v| v.as_str())
                    .unwrap_or("")
                    .to_string();
                let ok = item.get("ok").and_then(|v| v.as_bool()).unwrap_or(false);
                let result = item
                    .get("result")
                    .cloned()
                    .unwrap_or(serde_json::Value::Null);
                (name, ok, result)
            })
            .collect();
    }
    input
        .raw
        .tool_results
        .iter()
        .map(|r| (r.tool_name.clone(), r.ok, r.result.clone()))
        .collect()
}

use super::response_text;

// ---------------------------------------------------------------------------
// Contradiction
// ---------------------------------------------------------------------------

pub struct ToolResultContradiction {
    success_claim: Regex,
    failure_claim: Regex,
}

impl ToolResultContradiction {
    pub fn new() -> Self {
        Self {
            success_claim: regex_i(
                r"\b(?:succeeded|successful(?:ly)?|success|completed|all\s+done|worked|finished)\b|성공|완료|됐습니다|마쳤습니다",
            ),
            failure_claim: regex_i(
                r"\b(?:failed|failure|error|errors|couldn't|could\s+not|unable|didn't\s+work)\b|실패|오류|에러|못했습니다",
            ),
        }
    }
}

impl Default for ToolResultContradiction {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Scanner for ToolResultContradiction {
    fn name(&self) -> &'static str {
        "tool_result_contradiction"
    }

    fn kind(&self) -> ScannerKind {
        ScannerKind::Detect
    }

    async fn run(&self, input: NormalizedInput) -> Result<ScannerOutput, AuditError> {
        let mut findings = Vec::new();

        let results = parsed_tool_results(&input);
        let Some(response) = response_text(&input) else {
            return Ok(ScannerOutput { input, findings });
        };
        if results.is_empty() {
            return Ok(ScannerOutput { input, findings });
        }

        let failed: Vec<&str> = results
            .iter()
            .filter(|(_, ok, _)| !ok)
            .map(|(name, ..)| name.as_str())
            .collect();
        let succeeded: Vec<&str> = results
            .iter()
            .filter(|(_, ok, _)| *ok)
            .map(|(name, ..)| name.as_str())
            .collect();

        let claims_success = self.success_claim.is_match(&response);
        let claims_failure = self.failure_claim.is_match(&response);

        if !failed.is_empty() && claims_success {
            findings.push(
                Finding::new(
                    FindingKind::Detect,
                    "tool_result_contradiction",
                    &input.request_id,
                    "contradiction:success_claim",
                    0.8,
                    RiskLevel::High,
                    "response claims success but a tool call failed",
                    FindingTarget::response(ViewName::Revealed),
                )
                .with_tag("contradiction")
                .with_evidence(
                    "failedTools",
                    failed.iter().map(|s| s.to_string()).collect::<Vec<_>>(),
                ),
            );
        } else if !succeeded.is_empty() && claims_failure && !claims_success {
            findings.push(
                Finding::new(
                    FindingKind::Detect,
                    "tool_result_contradiction",
                    &input.request_id,
                    "contradiction:failure_claim",
                    0.5,
                    RiskLevel::Medium,
                    "response claims failure but tool calls succeeded",
                    FindingTarget::response(ViewName::Revealed),
                )
                .with_tag("contradiction")
                .with_evidence(
                    "succeededTools",
                    succeeded.iter().map(|s| s.to_string()).collect::<Vec<_>>(),
                ),
            );
        }

        Ok(ScannerOutput { input, findings })
    }
}

// ---------------------------------------------------------------------------
// Fact mismatch
// ---------------------------------------------------------------------------

struct BoolClaims {
    key: &'static str,
    positive: Regex,
    negative: Regex,
}

pub struct ToolResultFactMismatch {
    numeric_claims: Vec<(&'static str, Regex)>,
    bool_claims: Vec<BoolClaims>,
}

impl ToolResultFactMismatch {
    pub fn new() -> Self {
        let aliases = |key: &str| -> String {
            let ko = match key {
                "balance" => "|잔액|잔고",
                "total" => "|총액|합계",
                "count" => "|개수|건수",
                "amount" => "|금액",
                "score" => "|점수",
                _ => "",
            };
            format!("(?:{key}{ko})")
        };

        let numeric_claims = NUMERIC_KEYS
            .iter()
            .map(|key| {
                let pattern = format!(
                    r"{}\s*(?:is|was|=|:|은|는|이|가)?\s*(-?\d+(?:\.\d+)?)",
                    aliases(key)
                );
                (*key, regex_i(&pattern))
            })
            .collect();

        let bool_claims = vec![
            BoolClaims {
                key: "found",
                positive: regex_i(r"\bfound\b|찾았습니다"),
                negative: regex_i(
                    r"\b(?:not\s+found|couldn't\s+find|could\s+not\s+find|no\s+results?)\b|찾지\s*못|없습니다",
                ),
            },
            BoolClaims {
                key: "exists",
                positive: regex_i(r"\bexists?\b|존재합니다"),
                negative: regex_i(
                    r"\b(?:does\s+not\s+exist|doesn't\s+exist|no\s+such)\b|존재하지\s*않",
                ),
            },
            BoolClaims {
                key: "success",
                positive: regex_i(r"\b(?:succeeded|successful(?:ly)?|success)\b|성공"),
                negative: regex_i(r"\b(?:failed|failure|unsuccessful)\b|실패"),
            },
        ];

        Self {
            numeric_claims,
            bool_claims,
        }
    }
}

impl Default for ToolResultFactMismatch {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Scanner for ToolResultFactMismatch {
    fn name(&self) -> &'static str {
        "tool_result_fact_mismatch"
    }

    fn kind(&self) -> ScannerKind {
        ScannerKind::Detect
    }

    async fn run(&self, input: NormalizedInput) -> Result<ScannerOutput, AuditError> {
        let mut findings = Vec::new();

        let Some(response) = response_text(&input) else {
            return Ok(ScannerOutput { input, findings });
        };

        for (index, (tool_name, _ok, result)) in parsed_tool_results(&input).iter().enumerate() {
            for (key, value) in extract_facts(result) {
                match value {
                    FactValue::Number(actual) => {
                        let Some(claimed) = self.claimed_number(key, &response) else {
                            continue;
                        };
                        if (claimed - actual).abs() > 1e-9 {
                            findings.push(
                                self.mismatch_finding(
                                    &input,
                                    index,
                                    tool_name,
                                    key,
                                    RiskLevel::High,
                                    0.85,
                                    format!(
                                        "response claims {key} {claimed} but tool reported {actual}"
                                    ),
                                )
                                .with_evidence("toolValue", actual)
                                .with_evidence("claimedValue", claimed),
                            );
                        }
                    }
                    FactValue::Bool(actual) => {
                        let Some(claims) = self.bool_claims.iter().find(|c| c.key == key) else {
                            continue;
                        };
                        let negative = claims.negative.is_match(&response);
                        let positive = claims.positive.is_match(&response) && !negative;
                        if !actual && positive {
                            findings.push(
                                self.mismatch_finding(
                                    &input,
                                    index,
                                    tool_name,
                                    key,
                                    RiskLevel::High,
                                    0.85,
                                    format!("response claims {key} but the tool reported false"),
                                )
                                .with_evidence("toolValue", false)
                                .with_evidence("claimKind", "positive"),
                            );
                        } else if actual && negative {
                            findings.push(
                                self.mismatch_finding(
                                    &input,
                                    index,
                                    tool_name,
                                    key,
                                    RiskLevel::Medium,
                                    0.5,
                                    format!("response denies {key} but the tool reported true"),
                                )
                                .with_evidence("toolValue", true)
                                .with_evidence("claimKind", "negative"),
                            );
                        }
                    }
                }
            }
        }

        Ok(ScannerOutput { input, findings })
    }
}

impl ToolResultFactMismatch {
    fn claimed_number(&self, key: &str, response: &str) -> Option<f64> {
        let (_, regex) = self.numeric_claims.iter().find(|(k, _)| *k == key)?;
        let caps = regex.captures(response)?;
        caps.get(1)?.as_str().parse().ok()
    }

    #[allow(clippy::too_many_arguments)]
    fn mismatch_finding(
        &self,
        input: &NormalizedInput,
        index: usize,
        tool_name: &str,
        key: &str,
        risk: RiskLevel,
        score: f64,
        summary: String,
    ) -> Finding {
        Finding::new(
            FindingKind::Detect,
            "tool_result_fact_mismatch",
            &input.request_id,
            &format!("fact:{index}:{key}"),
            score,
            risk,
            summary,
            FindingTarget::response(ViewName::Revealed),
        )
        .with_tag("contradiction")
        .with_tag("fact_check")
        .with_evidence("toolName", tool_name)
        .with_evidence("key", key)
    }
}

enum FactValue {
    Number(f64),
    Bool(bool),
}

/// Pull only allow-listed facts out of a result value. Arrays contribute
/// their length as `count`.
fn extract_facts(result: &serde_json::Value) -> Vec<(&'static str, FactValue)> {
    let mut facts = Vec::new();
    match result {
        serde_json::Value::Object(map) => {
            for key in NUMERIC_KEYS {
                if let Some(n) = map.get(key).and_then(|v| v.as_f64()) {
                    facts.push((key, FactValue::Number(n)));
                }
            }
            for key in BOOL_KEYS {
                if let Some(b) = map.get(key).and_then(|v| v.as_bool()) {
                    facts.push((key, FactValue::Bool(b)));
                }
            }
        }
        serde_json::Value::Array(items) => {
            facts.push(("count", FactValue::Number(items.len() as f64)));
        }
        _ => {}
    }
    facts
}
