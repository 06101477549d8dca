// Copyright 2026 The Schnabel Project
// SPDX-License-Identifier: Apache-2.0

// Audit orchestration.
//
// Wires the stages end to end: validate and normalize, run the scanner
// chain, evaluate policy against session history, package evidence,
// forward to the dump sink, append the history turn. A failure anywhere
// surfaces the error and leaves no evidence and no history behind.

use std::sync::Arc;

use chrono::Utc;

use crate::error::AuditError;
use crate::evidence::{build_evidence, EvidencePackage, ScannerInfo};
use crate::history::{HistoryStore, HistoryTurn};
use crate::normalize::normalize;
use crate::policy::{evaluate_with_history, PolicyAction, PolicyConfig, PolicyDecision};
use crate::request::AuditRequest;
use crate::scanner::chain::{scan, ScanMetric, ScanOptions};
use crate::scanner::{Finding, FindingKind, Scanner};

/// What gets persisted by the sink, when one is attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DumpPolicy {
    /// Persist only incident verdicts (challenge and up) instead of all.
    pub incidents_only: bool,
    /// Whether `allow_with_warning` counts as an incident.
    pub warn_is_incident: bool,
}

impl Default for DumpPolicy {
    fn default() -> Self {
        Self {
            incidents_only: true,
            warn_is_incident: false,
        }
    }
}

/// External persistence seam. On-disk layouts and remote submission live
/// with collaborators; the core only forwards finished packages.
pub trait EvidenceSink: Send + Sync {
    fn persist(&self, package: &EvidencePackage);
}

pub struct AuditOptions {
    pub scanners: Vec<Arc<dyn Scanner>>,
    pub scan: ScanOptions,
    pub policy: PolicyConfig,
    pub history: Option<Arc<dyn HistoryStore>>,
    /// Caller-supplied prompt cap in characters, checked before normalize.
    pub max_prompt_length: Option<usize>,
    /// Include raw-text previews in the evidence digest.
    pub include_previews: bool,
    pub dump_evidence: Option<Arc<dyn EvidenceSink>>,
    pub dump_policy: DumpPolicy,
    /// Release scanner resources (watchers, cache entries) after the run.
    pub auto_close_scanners: bool,
}

impl AuditOptions {
    pub fn new(scanners: Vec<Arc<dyn Scanner>>) -> Self {
        Self {
            scanners,
            scan: ScanOptions::default(),
            policy: PolicyConfig::default(),
            history: None,
            max_prompt_length: None,
            include_previews: true,
            dump_evidence: None,
            dump_policy: DumpPolicy::default(),
            auto_close_scanners: false,
        }
    }

    /// The full built-in pipeline with the embedded rule pack.
    pub fn with_default_chain(
        history: Option<Arc<dyn HistoryStore>>,
    ) -> Result<Self, AuditError> {
        let scanners = crate::scanner::default_chain(
            crate::scanner::detect::rulepack::RulePackSource::Embedded,
            history.clone(),
        )?;
        let mut options = Self::new(scanners);
        options.history = history;
        Ok(options)
    }
}

/// The finished audit for one turn.
#[derive(Debug)]
pub struct AuditReport {
    pub decision: PolicyDecision,
    pub evidence: EvidencePackage,
    pub metrics: Vec<ScanMetric>,
    /// Whether the dump policy classified this turn as persist-worthy.
    pub dump_recommended: bool,
}

/// Audit one request end to end.
pub async fn run_audit(
    request: &AuditRequest,
    options: &AuditOptions,
) -> Result<AuditReport, AuditError> {
    let result = run_inner(request, options).await;
    if options.auto_close_scanners {
        for scanner in &options.scanners {
            scanner.close();
        }
    }
    result
}

async fn run_inner(
    request: &AuditRequest,
    options: &AuditOptions,
) -> Result<AuditReport, AuditError> {
    options.policy.validate()?;

    if let Some(max) = options.max_prompt_length {
        let length = request.prompt.chars().count();
        if length > max {
            return Err(AuditError::InvalidRequest(format!(
                "prompt length {length} exceeds maxPromptLength {max}"
            )));
        }
    }

    let normalized = normalize(request)?;
    let l1_canonical = normalized.canonical.clone();

    let outcome = scan(normalized, &options.scanners, &options.scan).await?;

    let session_id = request.session_id();
    let recent = match (&options.history, session_id) {
        (Some(store), Some(session)) => {
            store.get_recent(session, options.policy.contradiction_window)
        }
        _ => Vec::new(),
    };
    let decision = evaluate_with_history(&outcome.findings, &recent, &options.policy)?;

    let scanners_run: Vec<ScannerInfo> = outcome
        .metrics
        .iter()
        .map(|m| ScannerInfo {
            name: m.scanner.clone(),
            kind: m.kind,
        })
        .collect();

    let evidence = build_evidence(
        request,
        l1_canonical,
        outcome.input.canonical.clone(),
        outcome.input.views.clone(),
        scanners_run,
        outcome.findings.clone(),
        decision.clone(),
        options.include_previews,
    );

    tracing::info!(
        request_id = %request.request_id,
        action = decision.action.as_str(),
        risk = decision.risk.as_str(),
        findings = outcome.findings.len(),
        root_hash = %evidence.integrity.root_hash,
        "audit complete"
    );

    let dump_recommended = is_incident(&decision, options.dump_policy);
    if let Some(sink) = &options.dump_evidence {
        if dump_recommended || !options.dump_policy.incidents_only {
            sink.persist(&evidence);
        }
    }

    if let (Some(store), Some(session)) = (&options.history, session_id) {
        store.append(session, build_turn(request, &decision, &outcome.findings));
    }

    Ok(AuditReport {
        decision,
        evidence,
        metrics: outcome.metrics,
        dump_recommended,
    })
}

fn is_incident(decision: &PolicyDecision, dump: DumpPolicy) -> bool {
    decision.action >= PolicyAction::Challenge
        || (decision.action == PolicyAction::AllowWithWarning && dump.warn_is_incident)
}

fn build_turn(
    request: &AuditRequest,
    decision: &PolicyDecision,
    findings: &[Finding],
) -> HistoryTurn {
    let succeeded_tools = request
        .tool_results
        .iter()
        .filter(|r| r.ok)
        .map(|r| r.tool_name.clone())
        .collect();
    let failed_tools = request
        .tool_results
        .iter()
        .filter(|r| !r.ok)
        .map(|r| r.tool_name.clone())
        .collect();

    let response_snippet = request
        .response_text
        .as_deref()
        .map(|s| s.chars().take(160).collect::<String>());

    let mut rule_ids = Vec::new();
    let mut categories = Vec::new();
    let mut detect_scanners = Vec::new();
    let mut detect_tags = Vec::new();
    for finding in findings {
        if finding.kind != FindingKind::Detect {
            continue;
        }
        detect_scanners.push(finding.scanner.clone());
        if let Some(id) = finding.evidence.get("ruleId").and_then(|v| v.as_str()) {
            rule_ids.push(id.to_string());
        }
        if let Some(cat) = finding.evidence.get("category").and_then(|v| v.as_str()) {
            categories.push(cat.to_string());
        }
        detect_tags.extend(finding.tags.iter().cloned());
    }
    categories.sort();
    categories.dedup();
    detect_tags.sort();
    detect_tags.dedup();

    HistoryTurn {
        request_id: request.request_id.clone(),
        created_at_ms: Utc::now().timestamp_millis(),
        action: decision.action,
        risk: decision.risk,
        succeeded_tools,
        failed_tools,
        response_snippet,
        rule_ids,
        categories,
        detect_scanners,
        detect_tags,
    }
}
