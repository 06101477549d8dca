// Copyright 2026 The Schnabel Project
// SPDX-License-Identifier: Apache-2.0

// Rule pack compiler.
//
// Rule packs are JSON: `{ "version": string, "rules": [RuleSpec...] }`.
// Rule authors are semi-trusted, so compilation enforces safety guards:
// pattern length cap, backreference ban, nested-quantifier and greedy
// wildcard heuristics, and a flag whitelist. Duplicate rules (by stable
// signature) collapse to the first occurrence; the compiled pack is sorted
// by rule id and immutable afterwards.

pub mod loader;

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

use crate::canonical::{canonicalize_serialize, sha256_hex};
use crate::error::AuditError;
use crate::scanner::RiskLevel;

/// Maximum rule pattern length in characters.
pub const MAX_PATTERN_CHARS: usize = 400;

/// Maximum compiled regex size (1 MB), same cap for negatives.
const MAX_REGEX_SIZE: usize = 1024 * 1024;

/// Where a rule applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleScope {
    Prompt,
    Chunks,
    Response,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatternType {
    Regex,
    Keyword,
}

/// One rule as authored in the pack file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleSpec {
    pub id: String,
    pub category: String,
    pub pattern_type: PatternType,
    pub pattern: String,
    #[serde(default)]
    pub flags: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub negative_pattern: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub negative_flags: Option<String>,
    pub risk: RiskLevel,
    pub score: f64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scopes: Option<Vec<RuleScope>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sources: Option<Vec<String>>,
}

/// On-disk pack shape.
#[derive(Debug, Clone, Deserialize)]
pub struct RulePackFile {
    pub version: String,
    pub rules: Vec<RuleSpec>,
}

#[derive(Debug)]
enum RuleMatcher {
    Regex {
        positive: Regex,
        negative: Option<Regex>,
    },
    Keyword {
        positive: String,
        negative: Option<String>,
    },
}

/// Byte span of a positive match within the scanned text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchSpan {
    pub start: usize,
    pub len: usize,
}

/// A validated, compiled rule.
#[derive(Debug)]
pub struct CompiledRule {
    pub id: String,
    pub category: String,
    pub pattern_type: PatternType,
    pub pattern: String,
    /// Sanitized flag set (subset of `imsu`).
    pub flags: String,
    pub negative_pattern: Option<String>,
    pub risk: RiskLevel,
    pub score: f64,
    pub tags: Vec<String>,
    pub summary: Option<String>,
    pub scopes: Vec<RuleScope>,
    pub sources: Option<Vec<String>>,
    pub signature: String,
    matcher: RuleMatcher,
}

impl CompiledRule {
    pub fn applies_to(&self, scope: RuleScope) -> bool {
        self.scopes.contains(&scope)
    }

    /// Test the rule: a hit requires the positive pattern to match and the
    /// negative pattern (when present) not to.
    pub fn matches(&self, text: &str) -> Option<MatchSpan> {
        match &self.matcher {
            RuleMatcher::Regex { positive, negative } => {
                let hit = positive.find(text)?;
                if let Some(neg) = negative {
                    if neg.is_match(text) {
                        return None;
                    }
                }
                Some(MatchSpan {
                    start: hit.start(),
                    len: hit.end() - hit.start(),
                })
            }
            RuleMatcher::Keyword { positive, negative } => {
                let lower = text.to_lowercase();
                let start = lower.find(positive.as_str())?;
                if let Some(neg) = negative {
                    if lower.contains(neg.as_str()) {
                        return None;
                    }
                }
                // Lowercasing rarely changes byte offsets; clamp defensively
                // to a char boundary inside the original text.
                let start = clamp_boundary(text, start);
                Some(MatchSpan {
                    start,
                    len: positive.len().min(text.len() - start),
                })
            }
        }
    }
}

/// An immutable compiled pack; hot reload swaps whole `Arc`s of these.
#[derive(Debug)]
pub struct CompiledRulePack {
    pub version: String,
    pub origin: String,
    pub rules: Vec<CompiledRule>,
}

impl CompiledRulePack {
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Parse and compile a pack from JSON text. `origin` names the source in
/// diagnostics (a path or "embedded").
pub fn compile_str(content: &str, origin: &str) -> Result<CompiledRulePack, AuditError> {
    let file: RulePackFile = serde_json::from_str(content).map_err(|e| load_err(origin, format!("invalid JSON: {e}")))?;
    compile(file, origin)
}

/// Compile parsed rules with all guards applied.
pub fn compile(file: RulePackFile, origin: &str) -> Result<CompiledRulePack, AuditError> {
    let mut seen_ids = std::collections::HashSet::new();
    let mut seen_signatures = std::collections::HashSet::new();
    let mut rules = Vec::with_capacity(file.rules.len());

    for spec in file.rules {
        if !seen_ids.insert(spec.id.clone()) {
            return Err(load_err(origin, format!("duplicate rule id \"{}\"", spec.id)));
        }
        let rule = compile_rule(spec, origin)?;
        if seen_signatures.insert(rule.signature.clone()) {
            rules.push(rule);
        }
    }

    rules.sort_by(|a, b| a.id.cmp(&b.id));

    Ok(CompiledRulePack {
        version: file.version,
        origin: origin.to_string(),
        rules,
    })
}

fn compile_rule(spec: RuleSpec, origin: &str) -> Result<CompiledRule, AuditError> {
    if spec.id.is_empty() {
        return Err(load_err(origin, "rule id must not be empty".to_string()));
    }
    if !(0.0..=1.0).contains(&spec.score) || !spec.score.is_finite() {
        return Err(load_err(
            origin,
            format!("rule \"{}\": score must be within [0,1]", spec.id),
        ));
    }

    let flags = sanitize_flags(&spec.flags, &spec.id, origin)?;
    let negative_flags = match &spec.negative_flags {
        Some(f) => sanitize_flags(f, &spec.id, origin)?,
        None => flags.clone(),
    };

    let scopes = spec
        .scopes
        .clone()
        .unwrap_or_else(|| vec![RuleScope::Prompt, RuleScope::Chunks]);
    if scopes.is_empty() {
        return Err(load_err(
            origin,
            format!("rule \"{}\": scopes must not be empty", spec.id),
        ));
    }

    let matcher = match spec.pattern_type {
        PatternType::Regex => {
            let positive = compile_regex(&spec.pattern, &flags, &spec.id, origin)?;
            let negative = spec
                .negative_pattern
                .as_deref()
                .map(|p| compile_regex(p, &negative_flags, &spec.id, origin))
                .transpose()?;
            RuleMatcher::Regex { positive, negative }
        }
        PatternType::Keyword => {
            guard_pattern_length(&spec.pattern, &spec.id, origin)?;
            RuleMatcher::Keyword {
                positive: spec.pattern.to_lowercase(),
                negative: spec.negative_pattern.as_deref().map(str::to_lowercase),
            }
        }
    };

    let signature = rule_signature(&spec, &flags, &negative_flags);

    Ok(CompiledRule {
        id: spec.id,
        category: spec.category,
        pattern_type: spec.pattern_type,
        pattern: spec.pattern,
        flags,
        negative_pattern: spec.negative_pattern,
        risk: spec.risk,
        score: spec.score,
        tags: spec.tags,
        summary: spec.summary,
        scopes,
        sources: spec.sources,
        signature,
        matcher,
    })
}

/// Stable signature over the guard-relevant fields, used for dedup.
fn rule_signature(spec: &RuleSpec, flags: &str, negative_flags: &str) -> String {
    let payload = serde_json::json!({
        "patternType": spec.pattern_type,
        "pattern": spec.pattern,
        "flags": flags,
        "negativePattern": spec.negative_pattern,
        "negativeFlags": negative_flags,
        "risk": spec.risk,
        "score": spec.score,
        "category": spec.category,
        "scopes": spec.scopes,
        "sources": spec.sources,
    });
    sha256_hex(&canonicalize_serialize(&payload))
}

/// Keep `imsu`, silently drop `g`/`y`, reject anything else.
fn sanitize_flags(flags: &str, rule_id: &str, origin: &str) -> Result<String, AuditError> {
    let mut out = String::new();
    for c in flags.chars() {
        match c {
            'i' | 'm' | 's' | 'u' => {
                if !out.contains(c) {
                    out.push(c);
                }
            }
            'g' | 'y' => {}
            other => {
                return Err(load_err(
                    origin,
                    format!("rule \"{rule_id}\": unsupported regex flag \"{other}\""),
                ));
            }
        }
    }
    Ok(out)
}

fn guard_pattern_length(pattern: &str, rule_id: &str, origin: &str) -> Result<(), AuditError> {
    if pattern.chars().count() > MAX_PATTERN_CHARS {
        return Err(load_err(
            origin,
            format!("rule \"{rule_id}\": pattern exceeds {MAX_PATTERN_CHARS} characters"),
        ));
    }
    Ok(())
}

fn compile_regex(
    pattern: &str,
    flags: &str,
    rule_id: &str,
    origin: &str,
) -> Result<Regex, AuditError> {
    guard_pattern_length(pattern, rule_id, origin)?;
    guard_redos(pattern, rule_id, origin)?;

    RegexBuilder::new(pattern)
        .case_insensitive(flags.contains('i'))
        .multi_line(flags.contains('m'))
        .dot_matches_new_line(flags.contains('s'))
        .size_limit(MAX_REGEX_SIZE)
        .build()
        .map_err(|e| load_err(origin, format!("rule \"{rule_id}\": invalid regex: {e}")))
}

/// Static ReDoS heuristics. The regex engine is linear-time, but the guards
/// keep packs portable to engines that are not.
fn guard_redos(pattern: &str, rule_id: &str, origin: &str) -> Result<(), AuditError> {
    // Backreferences \1..\9.
    let bytes = pattern.as_bytes();
    for i in 0..bytes.len().saturating_sub(1) {
        if bytes[i] == b'\\' && (b'1'..=b'9').contains(&bytes[i + 1]) {
            // Skip escaped backslashes ("\\1" is a literal backslash + 1).
            let escapes = bytes[..i].iter().rev().take_while(|b| **b == b'\\').count();
            if escapes % 2 == 0 {
                return Err(load_err(
                    origin,
                    format!("rule \"{rule_id}\": backreferences are not allowed"),
                ));
            }
        }
    }

    // Nested quantifier: a quantified group that is itself quantified.
    let nested = Regex::new(r"\([^)]*[*+][^)]*\)\s*[*+]").expect("static guard regex");
    if nested.is_match(pattern) {
        return Err(load_err(
            origin,
            format!("rule \"{rule_id}\": nested quantifiers are not allowed"),
        ));
    }

    // Greedy whitespace-then-wildcard without a lazy modifier.
    let greedy = Regex::new(r"\\s[+*]\.[*+](\?)?").expect("static guard regex");
    for caps in greedy.captures_iter(pattern) {
        if caps.get(1).is_none() {
            return Err(load_err(
                origin,
                format!("rule \"{rule_id}\": greedy wildcard after \\s quantifier must be lazy"),
            ));
        }
    }

    Ok(())
}

fn clamp_boundary(text: &str, offset: usize) -> usize {
    let mut pos = offset.min(text.len());
    while pos > 0 && !text.is_char_boundary(pos) {
        pos -= 1;
    }
    pos
}

fn load_err(origin: &str, message: String) -> AuditError {
    AuditError::RulePackLoad {
        path: origin.to_string(),
        message,
    }
}
