// Copyright 2026 The Schnabel Project
// SPDX-License-Identifier: Apache-2.0

// Rule-pack detector.
//
// Runs every compiled rule against every in-scope target, probing all four
// views per text. Chunk rules honor the rule's `sources` restriction. One
// finding per (rule, target), attributed to the preferred matching view.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::AuditError;
use crate::normalize::NormalizedInput;
use crate::rulepack::loader::RulePackHandle;
use crate::rulepack::{compile_str, CompiledRule, CompiledRulePack, RuleScope};
use crate::scanner::{Finding, FindingKind, Scanner, ScannerKind, ScannerOutput};
use crate::views::{ensure_views, ViewSet};

use super::{match_views, snippet, view_names, TargetRef};

/// Built-in pack compiled from the bundled asset.
const EMBEDDED_RULES: &str = include_str!("../../../assets/rules/default.rules.json");

/// Where the scanner's rules come from.
pub enum RulePackSource {
    /// The pack bundled into the binary. No hot reload.
    Embedded,
    /// A pack file on disk, cached process-wide and hot-reloaded on change.
    Path(PathBuf),
}

enum Rules {
    Fixed(Arc<CompiledRulePack>),
    Reloading(RulePackHandle),
}

pub struct RulePackScanner {
    rules: Rules,
}

impl RulePackScanner {
    pub fn new(source: RulePackSource) -> Result<Self, AuditError> {
        let rules = match source {
            RulePackSource::Embedded => {
                Rules::Fixed(Arc::new(compile_str(EMBEDDED_RULES, "embedded")?))
            }
            RulePackSource::Path(path) => Rules::Reloading(RulePackHandle::load(&path)?),
        };
        Ok(Self { rules })
    }

    fn current(&self) -> Arc<CompiledRulePack> {
        match &self.rules {
            Rules::Fixed(pack) => pack.clone(),
            Rules::Reloading(handle) => handle.current(),
        }
    }
}

#[async_trait]
impl Scanner for RulePackScanner {
    fn name(&self) -> &'static str {
        "rule_pack"
    }

    fn kind(&self) -> ScannerKind {
        ScannerKind::Detect
    }

    async fn run(&self, input: NormalizedInput) -> Result<ScannerOutput, AuditError> {
        let input = ensure_views(input);
        let pack = self.current();
        let mut findings = Vec::new();

        super::for_each_views(&input, |target, views| {
            let scope = match target {
                TargetRef::Prompt => RuleScope::Prompt,
                TargetRef::Chunk(..) => RuleScope::Chunks,
                TargetRef::Response => RuleScope::Response,
            };

            for rule in &pack.rules {
                if !rule.applies_to(scope) {
                    continue;
                }
                if let TargetRef::Chunk(_, source) = target {
                    if let Some(allowed) = &rule.sources {
                        if !allowed.iter().any(|s| s == source.as_str()) {
                            continue;
                        }
                    }
                }
                if let Some(finding) = evaluate_rule(rule, &pack.version, target, views, &input) {
                    findings.push(finding);
                }
            }
        });

        Ok(ScannerOutput { input, findings })
    }

    fn close(&self) {
        if let Rules::Reloading(handle) = &self.rules {
            handle.close();
        }
    }
}

fn evaluate_rule(
    rule: &CompiledRule,
    pack_version: &str,
    target: TargetRef,
    views: &ViewSet,
    input: &NormalizedInput,
) -> Option<Finding> {
    let hit = match_views(views, |text| rule.matches(text))?;

    let finding_target = target.finding_target(hit.preferred);
    let key = format!("{}:{}", rule.id, finding_target.key());
    let summary = rule
        .summary
        .clone()
        .unwrap_or_else(|| format!("rule \"{}\" matched", rule.id));

    let mut finding = Finding::new(
        FindingKind::Detect,
        "rule_pack",
        &input.request_id,
        &key,
        rule.score,
        rule.risk,
        summary,
        finding_target,
    )
    .with_tag(rule.category.clone())
    .with_evidence("ruleId", rule.id.clone())
    .with_evidence("category", rule.category.clone())
    .with_evidence(
        "patternType",
        serde_json::to_value(rule.pattern_type).unwrap_or_default(),
    )
    .with_evidence("rulePackVersion", pack_version)
    .with_evidence("matchedViews", view_names(&hit.matched_views))
    .with_evidence("snippet", snippet(views.get(hit.preferred), hit.span));

    for tag in &rule.tags {
        finding = finding.with_tag(tag.clone());
    }
    Some(finding)
}
