// Copyright 2026 The Schnabel Project
// SPDX-License-Identifier: Apache-2.0

// Evidence packaging.
//
// The package is the tamper-evident record of one audit: raw digests, the
// canonical payload before and after scanning, views, findings, decision,
// and the scanner roster, folded into a single root hash. Section order is
// contractual. `generatedAtMs` is stamped after the fold and never enters
// any hash input.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::canonical::{canonicalize_serialize, sha256_hex};
use crate::normalize::CanonicalInput;
use crate::policy::PolicyDecision;
use crate::request::{Actor, AuditRequest};
use crate::scanner::{Finding, ScannerKind};
use crate::views::InputViews;

/// Evidence schema identifier.
pub const EVIDENCE_SCHEMA: &str = "schnabel-evidence-v0";

/// Hash-fold seed.
const ROOT_SEED: &str = "root";

const PREVIEW_CHARS: usize = 120;

/// Request header copied into evidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestInfo {
    pub timestamp: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor: Option<Actor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

/// Digest of one raw input field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DigestEntry {
    pub sha256: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preview: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawDigest {
    pub prompt: DigestEntry,
    pub prompt_chunks: DigestEntry,
    pub tool_calls: DigestEntry,
    pub tool_results: DigestEntry,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_text: Option<DigestEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedSection {
    pub canonical: CanonicalInput,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScannedSection {
    pub canonical: CanonicalInput,
    pub views: Option<InputViews>,
}

/// One chain entry, in fold order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegrityItem {
    pub name: String,
    pub hash: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Integrity {
    pub algo: String,
    pub items: Vec<IntegrityItem>,
    pub root_hash: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvidenceMeta {
    pub rule_pack_versions: Vec<String>,
}

/// Executed scanner, in chain order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScannerInfo {
    pub name: String,
    pub kind: ScannerKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvidencePackage {
    pub schema: String,
    pub request_id: String,
    pub request: RequestInfo,
    pub raw_digest: RawDigest,
    pub normalized: NormalizedSection,
    pub scanned: ScannedSection,
    pub scanners: Vec<ScannerInfo>,
    pub findings: Vec<Finding>,
    pub decision: PolicyDecision,
    pub integrity: Integrity,
    pub meta: EvidenceMeta,
    pub generated_at_ms: i64,
}

/// Assemble the package and fold the integrity chain.
///
/// `normalized` is the canonical payload as of normalization (before any
/// scanner ran); `scanned_*` is the post-chain state.
pub fn build_evidence(
    raw: &AuditRequest,
    normalized: CanonicalInput,
    scanned: CanonicalInput,
    scanned_views: Option<InputViews>,
    scanners: Vec<ScannerInfo>,
    findings: Vec<Finding>,
    decision: PolicyDecision,
    include_previews: bool,
) -> EvidencePackage {
    let request = RequestInfo {
        timestamp: raw.timestamp,
        actor: raw.actor.clone(),
        model: raw.model.clone(),
    };
    let raw_digest = digest_raw(raw, include_previews);
    let normalized = NormalizedSection {
        canonical: normalized,
    };
    let scanned = ScannedSection {
        canonical: scanned,
        views: scanned_views,
    };

    let integrity = fold_integrity(
        &request,
        &raw_digest,
        &normalized,
        &scanned,
        &findings,
        &decision,
        &scanners,
    );

    let meta = EvidenceMeta {
        rule_pack_versions: rule_pack_versions(&findings),
    };

    EvidencePackage {
        schema: EVIDENCE_SCHEMA.to_string(),
        request_id: raw.request_id.clone(),
        request,
        raw_digest,
        normalized,
        scanned,
        scanners,
        findings,
        decision,
        integrity,
        meta,
        generated_at_ms: Utc::now().timestamp_millis(),
    }
}

/// Recompute every section hash from the package contents and refold.
/// True when nothing hashed was altered (`generatedAtMs` is free to vary).
pub fn verify_integrity(package: &EvidencePackage) -> bool {
    let expected = fold_integrity(
        &package.request,
        &package.raw_digest,
        &package.normalized,
        &package.scanned,
        &package.findings,
        &package.decision,
        &package.scanners,
    );
    expected == package.integrity
}

fn fold_integrity(
    request: &RequestInfo,
    raw_digest: &RawDigest,
    normalized: &NormalizedSection,
    scanned: &ScannedSection,
    findings: &[Finding],
    decision: &PolicyDecision,
    scanners: &[ScannerInfo],
) -> Integrity {
    let items = vec![
        item("request", request),
        item("rawDigest", raw_digest),
        item("normalizedCanonical", &normalized.canonical),
        item("scannedCanonical", &scanned.canonical),
        item("scannedViews", &scanned.views),
        item("findings", &findings),
        item("decision", decision),
        item("scanners", &scanners),
    ];

    let mut acc = ROOT_SEED.to_string();
    for entry in &items {
        acc = sha256_hex(&format!("{acc}:{}:{}", entry.name, entry.hash));
    }

    Integrity {
        algo: "sha256".to_string(),
        items,
        root_hash: acc,
    }
}

fn item<T: Serialize>(name: &str, section: &T) -> IntegrityItem {
    IntegrityItem {
        name: name.to_string(),
        hash: sha256_hex(&canonicalize_serialize(section)),
    }
}

fn digest_raw(raw: &AuditRequest, include_previews: bool) -> RawDigest {
    let preview = |text: &str| {
        if !include_previews {
            return None;
        }
        Some(text.chars().take(PREVIEW_CHARS).collect::<String>())
    };

    RawDigest {
        prompt: DigestEntry {
            sha256: sha256_hex(&raw.prompt),
            length: Some(raw.prompt.chars().count()),
            count: None,
            preview: preview(&raw.prompt),
        },
        prompt_chunks: DigestEntry {
            sha256: sha256_hex(&canonicalize_serialize(&raw.prompt_chunks)),
            length: None,
            count: Some(raw.prompt_chunks.as_ref().map_or(0, Vec::len)),
            preview: None,
        },
        tool_calls: DigestEntry {
            sha256: sha256_hex(&canonicalize_serialize(&raw.tool_calls)),
            length: None,
            count: Some(raw.tool_calls.len()),
            preview: None,
        },
        tool_results: DigestEntry {
            sha256: sha256_hex(&canonicalize_serialize(&raw.tool_results)),
            length: None,
            count: Some(raw.tool_results.len()),
            preview: None,
        },
        response_text: raw.response_text.as_deref().map(|text| DigestEntry {
            sha256: sha256_hex(text),
            length: Some(text.chars().count()),
            count: None,
            preview: preview(text),
        }),
    }
}

/// Sorted, deduplicated rule-pack versions referenced by the findings.
fn rule_pack_versions(findings: &[Finding]) -> Vec<String> {
    let mut versions: Vec<String> = findings
        .iter()
        .filter_map(|f| f.evidence.get("rulePackVersion"))
        .filter_map(|v| v.as_str())
        .map(String::from)
        .collect();
    versions.sort();
    versions.dedup();
    versions
}
