// Copyright 2026 The Schnabel Project
// SPDX-License-Identifier: Apache-2.0

// Policy evaluation -- findings in, verdict out.
//
// Base evaluation is a pure function of (findings, config). Escalations are
// applied on top: an immediate force-block on fact mismatch, and a
// repetition rule over recent session turns. The verdict is advisory; the
// core never enforces it.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::AuditError;
use crate::history::HistoryTurn;
use crate::scanner::{Finding, RiskLevel};

/// Scanners whose findings count toward the repetition escalation.
const CONTRADICTION_SCANNERS: [&str; 4] = [
    "history_contradiction",
    "history_flipflop",
    "tool_result_contradiction",
    "tool_result_fact_mismatch",
];

/// Advisory verdict. Ordinal: allow < allow_with_warning < challenge < block.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum PolicyAction {
    #[default]
    Allow,
    AllowWithWarning,
    Challenge,
    Block,
}

impl PolicyAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            PolicyAction::Allow => "allow",
            PolicyAction::AllowWithWarning => "allow_with_warning",
            PolicyAction::Challenge => "challenge",
            PolicyAction::Block => "block",
        }
    }
}

/// Evaluator thresholds. `validate` must pass before use.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyConfig {
    pub policy_id: String,
    /// Findings at or above this risk force `block`.
    pub block_at: RiskLevel,
    /// Findings at or above this risk force at least `challenge`.
    pub challenge_at: RiskLevel,
    pub challenge_score_sum_at: f64,
    pub warn_score_sum_at: f64,
    pub max_reasons: usize,
    /// History turns consulted by the repetition escalation.
    pub contradiction_window: usize,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            policy_id: "schnabel-policy-v0".to_string(),
            block_at: RiskLevel::Critical,
            challenge_at: RiskLevel::High,
            challenge_score_sum_at: 0.9,
            warn_score_sum_at: 0.4,
            max_reasons: 5,
            contradiction_window: 5,
        }
    }
}

impl PolicyConfig {
    pub fn validate(&self) -> Result<(), AuditError> {
        if self.block_at < self.challenge_at {
            return Err(AuditError::PolicyConfig(
                "blockAt must not be below challengeAt".to_string(),
            ));
        }
        for (name, v) in [
            ("challengeScoreSumAt", self.challenge_score_sum_at),
            ("warnScoreSumAt", self.warn_score_sum_at),
        ] {
            if !v.is_finite() || v < 0.0 {
                return Err(AuditError::PolicyConfig(format!(
                    "{name} must be finite and non-negative"
                )));
            }
        }
        if self.warn_score_sum_at > self.challenge_score_sum_at {
            return Err(AuditError::PolicyConfig(
                "warnScoreSumAt must not exceed challengeScoreSumAt".to_string(),
            ));
        }
        if self.max_reasons == 0 {
            return Err(AuditError::PolicyConfig(
                "maxReasons must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Aggregate statistics over the evaluated findings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionStats {
    pub total_findings: usize,
    pub max_score: f64,
    pub score_sum: f64,
    pub by_risk: BTreeMap<RiskLevel, usize>,
}

/// The rendered verdict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyDecision {
    pub policy_id: String,
    pub action: PolicyAction,
    pub risk: RiskLevel,
    pub confidence: f64,
    pub reasons: Vec<String>,
    pub finding_ids: Vec<String>,
    pub stats: DecisionStats,
}

/// Base evaluation: a pure function of `(findings, config)`.
pub fn evaluate(findings: &[Finding], config: &PolicyConfig) -> Result<PolicyDecision, AuditError> {
    config.validate()?;

    let mut by_risk: BTreeMap<RiskLevel, usize> = BTreeMap::new();
    let mut max_score: f64 = 0.0;
    let mut score_sum: f64 = 0.0;
    let mut max_risk = RiskLevel::None;

    for finding in findings {
        *by_risk.entry(finding.risk).or_insert(0) += 1;
        max_score = max_score.max(finding.score);
        score_sum += finding.score;
        max_risk = max_risk.max(finding.risk);
    }

    let action = if max_risk >= config.block_at {
        PolicyAction::Block
    } else if max_risk >= config.challenge_at || score_sum >= config.challenge_score_sum_at {
        PolicyAction::Challenge
    } else if score_sum >= config.warn_score_sum_at {
        PolicyAction::AllowWithWarning
    } else {
        PolicyAction::Allow
    };

    Ok(PolicyDecision {
        policy_id: config.policy_id.clone(),
        action,
        risk: max_risk,
        confidence: confidence_for(max_risk),
        reasons: top_reasons(findings, config.max_reasons),
        finding_ids: findings.iter().map(|f| f.id.clone()).collect(),
        stats: DecisionStats {
            total_findings: findings.len(),
            max_score,
            score_sum,
            by_risk,
        },
    })
}

/// Apply post-hoc escalations to a base decision.
///
/// `recent_turns` is the session's trailing window, oldest → newest; the
/// current findings always participate.
pub fn escalate(
    mut decision: PolicyDecision,
    findings: &[Finding],
    recent_turns: &[HistoryTurn],
    config: &PolicyConfig,
) -> PolicyDecision {
    // 1) Fact mismatch at high or above: immediate block.
    let fact_mismatch = findings
        .iter()
        .any(|f| f.scanner == "tool_result_fact_mismatch" && f.risk >= RiskLevel::High);
    if fact_mismatch {
        decision.action = PolicyAction::Block;
        decision.risk = RiskLevel::Critical;
        decision.confidence = decision.confidence.max(0.9);
        decision.reasons.insert(
            0,
            "[CRITICAL|policy] tool result contradicts recorded facts: forced block".to_string(),
        );
        truncate_reasons(&mut decision, config);
        return decision;
    }

    // 2) Repetition: contradiction signals in the trailing window plus now.
    let window = recent_turns
        .len()
        .saturating_sub(config.contradiction_window);
    let historical: usize = recent_turns[window..]
        .iter()
        .map(|turn| {
            turn.detect_scanners
                .iter()
                .filter(|s| CONTRADICTION_SCANNERS.contains(&s.as_str()))
                .count()
        })
        .sum();
    let current = findings
        .iter()
        .filter(|f| CONTRADICTION_SCANNERS.contains(&f.scanner.as_str()))
        .count();
    let total = historical + current;

    if total >= 3 {
        decision.action = PolicyAction::Block;
        decision.risk = RiskLevel::Critical;
        decision.confidence = decision.confidence.max(0.85);
        decision.reasons.insert(
            0,
            format!("[CRITICAL|policy] {total} contradiction signals in session window: forced block"),
        );
    } else if total >= 2 {
        decision.action = decision.action.max(PolicyAction::Challenge);
        decision.risk = decision.risk.max(RiskLevel::High);
        decision.confidence = decision.confidence.max(0.75);
        decision.reasons.insert(
            0,
            format!("[HIGH|policy] {total} contradiction signals in session window: escalated"),
        );
    }
    truncate_reasons(&mut decision, config);
    decision
}

/// Base evaluation plus escalations in one call.
pub fn evaluate_with_history(
    findings: &[Finding],
    recent_turns: &[HistoryTurn],
    config: &PolicyConfig,
) -> Result<PolicyDecision, AuditError> {
    let base = evaluate(findings, config)?;
    Ok(escalate(base, findings, recent_turns, config))
}

fn confidence_for(risk: RiskLevel) -> f64 {
    match risk {
        RiskLevel::Critical => 0.9,
        RiskLevel::High => 0.75,
        RiskLevel::Medium => 0.6,
        RiskLevel::Low => 0.55,
        RiskLevel::None => 0.7,
    }
}

fn top_reasons(findings: &[Finding], max_reasons: usize) -> Vec<String> {
    let mut ranked: Vec<&Finding> = findings.iter().collect();
    ranked.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| b.risk.cmp(&a.risk))
    });
    ranked
        .into_iter()
        .take(max_reasons)
        .map(|f| {
            format!(
                "[{}|{}] {}: {}",
                f.risk.label(),
                f.scanner,
                f.target.describe(),
                f.summary
            )
        })
        .collect()
}

fn truncate_reasons(decision: &mut PolicyDecision, config: &PolicyConfig) {
    decision.reasons.truncate(config.max_reasons);
}
