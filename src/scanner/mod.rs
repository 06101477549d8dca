// Copyright 2026 The Schnabel Project
// SPDX-License-Identifier: Apache-2.0

// Scanner model -- the seam every pipeline stage implements.
//
// A scanner consumes the working document and returns an updated document
// plus zero or more findings. Sanitizers rewrite views, enrichers derive
// views, detectors only read. The chain runtime (`chain.rs`) owns ordering,
// timeouts, and metrics.

pub mod chain;
pub mod detect;
pub mod enrich;
pub mod sanitize;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::canonical::sha256_hex;
use crate::error::AuditError;
use crate::history::HistoryStore;
use crate::normalize::NormalizedInput;
use crate::request::ChunkSource;
use crate::views::ViewName;

// ---------------------------------------------------------------------------
// Risk model
// ---------------------------------------------------------------------------

/// Graded severity. Ordinal: none < low < medium < high < critical.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    #[default]
    None,
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::None => "none",
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        }
    }

    /// Uppercase label used in policy reasons.
    pub fn label(&self) -> &'static str {
        match self {
            RiskLevel::None => "NONE",
            RiskLevel::Low => "LOW",
            RiskLevel::Medium => "MEDIUM",
            RiskLevel::High => "HIGH",
            RiskLevel::Critical => "CRITICAL",
        }
    }
}

// ---------------------------------------------------------------------------
// Findings
// ---------------------------------------------------------------------------

/// What stage of the pipeline produced a finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FindingKind {
    Sanitize,
    Enrich,
    Detect,
}

/// Which text a finding is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TargetField {
    #[serde(rename = "prompt")]
    Prompt,
    #[serde(rename = "promptChunk")]
    PromptChunk,
    #[serde(rename = "response")]
    Response,
}

/// Full provenance for a finding: field, view, and chunk coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FindingTarget {
    pub field: TargetField,
    pub view: ViewName,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<ChunkSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_index: Option<usize>,
}

impl FindingTarget {
    pub fn prompt(view: ViewName) -> Self {
        Self {
            field: TargetField::Prompt,
            view,
            source: None,
            chunk_index: None,
        }
    }

    pub fn chunk(index: usize, source: ChunkSource, view: ViewName) -> Self {
        Self {
            field: TargetField::PromptChunk,
            view,
            source: Some(source),
            chunk_index: Some(index),
        }
    }

    pub fn response(view: ViewName) -> Self {
        Self {
            field: TargetField::Response,
            view,
            source: None,
            chunk_index: None,
        }
    }

    /// Stable key fragment for finding IDs ("prompt", "chunk:2", "response").
    pub fn key(&self) -> String {
        match self.field {
            TargetField::Prompt => "prompt".to_string(),
            TargetField::PromptChunk => format!("chunk:{}", self.chunk_index.unwrap_or(0)),
            TargetField::Response => "response".to_string(),
        }
    }

    /// Human label used in policy reasons ("prompt", "promptChunk[2]").
    pub fn describe(&self) -> String {
        match self.field {
            TargetField::Prompt => "prompt".to_string(),
            TargetField::PromptChunk => {
                format!("promptChunk[{}]", self.chunk_index.unwrap_or(0))
            }
            TargetField::Response => "response".to_string(),
        }
    }
}

/// A single risk-scored observation. Findings are values: the same
/// `(scanner, requestId, key)` always yields the same id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Finding {
    pub id: String,
    pub kind: FindingKind,
    pub scanner: String,
    pub score: f64,
    pub risk: RiskLevel,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    pub summary: String,
    pub target: FindingTarget,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub evidence: serde_json::Map<String, serde_json::Value>,
}

impl Finding {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        kind: FindingKind,
        scanner: &str,
        request_id: &str,
        key: &str,
        score: f64,
        risk: RiskLevel,
        summary: impl Into<String>,
        target: FindingTarget,
    ) -> Self {
        Self {
            id: finding_id(scanner, request_id, key),
            kind,
            scanner: scanner.to_string(),
            score: score.clamp(0.0, 1.0),
            risk,
            tags: Vec::new(),
            summary: summary.into(),
            target,
            evidence: serde_json::Map::new(),
        }
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn with_evidence(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.evidence.insert(key.to_string(), value.into());
        self
    }
}

/// `f_` + first 20 hex digits of sha256("scanner:requestId:key").
pub fn finding_id(scanner: &str, request_id: &str, key: &str) -> String {
    let digest = sha256_hex(&format!("{scanner}:{request_id}:{key}"));
    format!("f_{}", &digest[..20])
}

// ---------------------------------------------------------------------------
// Scanner trait
// ---------------------------------------------------------------------------

/// Pipeline stage classification, recorded in metrics and evidence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScannerKind {
    Sanitize,
    Enrich,
    Detect,
}

impl ScannerKind {
    pub fn finding_kind(&self) -> FindingKind {
        match self {
            ScannerKind::Sanitize => FindingKind::Sanitize,
            ScannerKind::Enrich => FindingKind::Enrich,
            ScannerKind::Detect => FindingKind::Detect,
        }
    }
}

/// Result of one scanner invocation: the (possibly replaced) working
/// document and the findings emitted while producing it.
pub struct ScannerOutput {
    pub input: NormalizedInput,
    pub findings: Vec<Finding>,
}

impl ScannerOutput {
    pub fn clean(input: NormalizedInput) -> Self {
        Self {
            input,
            findings: Vec::new(),
        }
    }
}

/// One stage of the audit pipeline.
///
/// Implementations must be `Send + Sync`: the engine shares them across
/// concurrent requests behind `Arc`. `run` must not panic on well-typed
/// input; sanitize and enrich stages additionally must not fail on
/// malformed text (they leave views unchanged instead).
#[async_trait]
pub trait Scanner: Send + Sync {
    /// Stable snake_case name; part of every finding id this scanner emits.
    fn name(&self) -> &'static str;

    fn kind(&self) -> ScannerKind;

    async fn run(&self, input: NormalizedInput) -> Result<ScannerOutput, AuditError>;

    /// Release any process-global resources (file watchers, cache entries).
    fn close(&self) {}
}

// ---------------------------------------------------------------------------
// Default chain
// ---------------------------------------------------------------------------

/// The full audit pipeline in canonical order: sanitize, enrich, detect.
///
/// `rules` selects the rule pack (embedded default or a hot-reloadable
/// file); `history` enables the cross-turn detectors when present.
pub fn default_chain(
    rules: detect::rulepack::RulePackSource,
    history: Option<Arc<dyn HistoryStore>>,
) -> Result<Vec<Arc<dyn Scanner>>, AuditError> {
    let mut scanners: Vec<Arc<dyn Scanner>> = vec![
        Arc::new(sanitize::unicode::UnicodeSanitizer),
        Arc::new(sanitize::hidden_tags::HiddenAsciiTags),
        Arc::new(sanitize::separators::SeparatorCollapse),
        Arc::new(sanitize::tool_args::ToolArgsCanonicalizer),
        Arc::new(enrich::SkeletonEnricher),
        Arc::new(detect::keyword::KeywordInjection::new()),
        Arc::new(detect::rulepack::RulePackScanner::new(rules)?),
        Arc::new(detect::tool_args::ToolArgsSsrf),
        Arc::new(detect::tool_args::ToolArgsPathTraversal),
        Arc::new(detect::tool_results::ToolResultContradiction::new()),
        Arc::new(detect::tool_results::ToolResultFactMismatch::new()),
        Arc::new(detect::confusables::Uts39Confusables),
    ];

    if let Some(store) = history {
        scanners.push(Arc::new(detect::history::HistoryContradiction::new(
            store.clone(),
        )));
        scanners.push(Arc::new(detect::history::HistoryFlipFlop::new(store)));
    }

    Ok(scanners)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn risk_level_ordering_is_ordinal() {
        assert!(RiskLevel::None < RiskLevel::Low);
        assert!(RiskLevel::Low < RiskLevel::Medium);
        assert!(RiskLevel::Medium < RiskLevel::High);
        assert!(RiskLevel::High < RiskLevel::Critical);
    }

    #[test]
    fn risk_level_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&RiskLevel::Critical).unwrap(),
            "\"critical\""
        );
    }

    #[test]
    fn finding_id_is_deterministic() {
        let a = finding_id("rule_pack", "req-1", "rule:chunk:0");
        let b = finding_id("rule_pack", "req-1", "rule:chunk:0");
        assert_eq!(a, b);
        assert!(a.starts_with("f_"));
        assert_eq!(a.len(), 22);
    }

    #[test]
    fn finding_id_varies_with_every_component() {
        let base = finding_id("s", "r", "k");
        assert_ne!(base, finding_id("s2", "r", "k"));
        assert_ne!(base, finding_id("s", "r2", "k"));
        assert_ne!(base, finding_id("s", "r", "k2"));
    }

    #[test]
    fn target_keys_and_descriptions() {
        let prompt = FindingTarget::prompt(ViewName::Revealed);
        assert_eq!(prompt.key(), "prompt");
        assert_eq!(prompt.describe(), "prompt");

        let chunk = FindingTarget::chunk(2, ChunkSource::Retrieval, ViewName::Sanitized);
        assert_eq!(chunk.key(), "chunk:2");
        assert_eq!(chunk.describe(), "promptChunk[2]");
        assert_eq!(chunk.source, Some(ChunkSource::Retrieval));
    }

    #[test]
    fn finding_score_is_clamped() {
        let f = Finding::new(
            FindingKind::Detect,
            "t",
            "r",
            "k",
            1.7,
            RiskLevel::High,
            "s",
            FindingTarget::prompt(ViewName::Raw),
        );
        assert_eq!(f.score, 1.0);
    }

    #[test]
    fn target_field_serializes_spec_names() {
        let t = FindingTarget::chunk(0, ChunkSource::User, ViewName::Raw);
        let v = serde_json::to_value(&t).unwrap();
        assert_eq!(v["field"], "promptChunk");
        assert_eq!(v["view"], "raw");
        assert_eq!(v["chunkIndex"], 0);
    }
}
