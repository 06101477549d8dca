// Copyright 2026 The Schnabel Project
// SPDX-License-Identifier: Apache-2.0

// Request normalization -- the first pipeline stage.
//
// Builds a deterministic `NormalizedInput` from an `AuditRequest`: validates
// required fields, trims text, canonicalizes tool activity, derives cheap
// features. Idempotent: normalizing the preserved raw request again yields
// an identical canonical payload.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::canonical::canonicalize_serialize;
use crate::error::AuditError;
use crate::request::{AuditRequest, ChunkSource};
use crate::views::InputViews;

/// Hard cap on prompt size, independent of any caller-supplied limit.
pub const MAX_PROMPT_BYTES: usize = 1024 * 1024;

/// Hard cap on request id length.
pub const MAX_REQUEST_ID_CHARS: usize = 255;

/// Coarse language hint derived from the prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LanguageHint {
    Ko,
    En,
    Unknown,
}

/// A trimmed, provenance-tagged chunk (empties already dropped).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalChunk {
    pub source: ChunkSource,
    pub text: String,
}

/// The canonical text payload scanners operate on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalInput {
    pub prompt: String,
    #[serde(rename = "promptChunksCanonical")]
    pub prompt_chunks: Vec<CanonicalChunk>,
    pub tool_calls_json: String,
    pub tool_results_json: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_text: Option<String>,
}

/// Cheap request features derived once at normalization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputFeatures {
    pub has_tool_calls: bool,
    pub has_tool_results: bool,
    /// Deduplicated, sorted union of call and result tool names.
    pub tool_names: Vec<String>,
    pub language_hint: LanguageHint,
    /// Character count of the canonical prompt. Sanitizers keep it current.
    pub prompt_length: usize,
}

/// The working document passed through the scanner chain.
///
/// `raw` preserves the original request by reference and must never be
/// mutated downstream; `canonical` and `views` are replaced by value as
/// sanitizers run.
#[derive(Debug, Clone)]
pub struct NormalizedInput {
    pub request_id: String,
    pub canonical: CanonicalInput,
    pub features: InputFeatures,
    pub views: Option<InputViews>,
    pub raw: Arc<AuditRequest>,
}

impl NormalizedInput {
    /// Recompute `features.prompt_length` after a sanitizer rewrote the
    /// canonical prompt.
    pub fn refresh_prompt_length(&mut self) {
        self.features.prompt_length = self.canonical.prompt.chars().count();
    }
}

/// Validate and normalize an audit request.
pub fn normalize(request: &AuditRequest) -> Result<NormalizedInput, AuditError> {
    validate(request)?;

    let prompt = request.prompt.trim().to_string();
    let response_text = request
        .response_text
        .as_deref()
        .map(|s| s.trim().to_string());

    let prompt_chunks: Vec<CanonicalChunk> = request
        .prompt_chunks
        .as_deref()
        .unwrap_or(&[])
        .iter()
        .filter_map(|chunk| {
            let text = chunk.text.trim();
            if text.is_empty() {
                None
            } else {
                Some(CanonicalChunk {
                    source: chunk.source,
                    text: text.to_string(),
                })
            }
        })
        .collect();

    let tool_calls_json = canonicalize_serialize(&request.tool_calls);
    let tool_results_json = canonicalize_serialize(&request.tool_results);

    let mut names: BTreeSet<&str> = BTreeSet::new();
    for call in &request.tool_calls {
        names.insert(call.tool_name.as_str());
    }
    for result in &request.tool_results {
        names.insert(result.tool_name.as_str());
    }

    let features = InputFeatures {
        has_tool_calls: !request.tool_calls.is_empty(),
        has_tool_results: !request.tool_results.is_empty(),
        tool_names: names.into_iter().map(String::from).collect(),
        language_hint: detect_language(&prompt),
        prompt_length: prompt.chars().count(),
    };

    Ok(NormalizedInput {
        request_id: request.request_id.clone(),
        canonical: CanonicalInput {
            prompt,
            prompt_chunks,
            tool_calls_json,
            tool_results_json,
            response_text,
        },
        features,
        views: None,
        raw: Arc::new(request.clone()),
    })
}

fn validate(request: &AuditRequest) -> Result<(), AuditError> {
    if request.request_id.is_empty() {
        return Err(AuditError::InvalidRequest(
            "requestId must not be empty".to_string(),
        ));
    }
    if request.request_id.chars().count() > MAX_REQUEST_ID_CHARS {
        return Err(AuditError::InvalidRequest(format!(
            "requestId exceeds {MAX_REQUEST_ID_CHARS} characters"
        )));
    }
    if !request.timestamp.is_finite() || request.timestamp < 0.0 {
        return Err(AuditError::InvalidRequest(
            "timestamp must be finite and non-negative".to_string(),
        ));
    }
    if request.prompt.len() > MAX_PROMPT_BYTES {
        return Err(AuditError::InvalidRequest(format!(
            "prompt exceeds {MAX_PROMPT_BYTES} bytes"
        )));
    }
    Ok(())
}

/// Hangul anywhere wins; otherwise ASCII letters suggest English.
fn detect_language(prompt: &str) -> LanguageHint {
    let mut saw_ascii_letter = false;
    for ch in prompt.chars() {
        let cp = ch as u32;
        // Hangul syllables, jamo, and compatibility jamo.
        if matches!(cp, 0xAC00..=0xD7A3 | 0x1100..=0x11FF | 0x3130..=0x318F) {
            return LanguageHint::Ko;
        }
        if ch.is_ascii_alphabetic() {
            saw_ascii_letter = true;
        }
    }
    if saw_ascii_letter {
        LanguageHint::En
    } else {
        LanguageHint::Unknown
    }
}
