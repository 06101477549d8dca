// Copyright 2026 The Schnabel Project
// SPDX-License-Identifier: Apache-2.0

// Multi-view text representation.
//
// Every audited text carries four parallel strings:
// - `raw`       -- canonical text as produced at normalization, never touched
// - `sanitized` -- reversible cleaning (NFKC, invisibles, bidi, separators)
// - `revealed`  -- sanitized plus decoded hidden payloads (TAG characters)
// - `skeleton`  -- UTS#39 confusable skeleton of `revealed`
//
// Views are first-class data: detectors match against all of them and record
// which views fired, instead of re-deriving transformations from raw text.

use serde::{Deserialize, Serialize};

use crate::normalize::NormalizedInput;
use crate::request::ChunkSource;

/// Names of the four views, in the order detectors scan them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViewName {
    Raw,
    Sanitized,
    Revealed,
    Skeleton,
}

impl ViewName {
    /// Scan order for detectors.
    pub const ALL: [ViewName; 4] = [
        ViewName::Raw,
        ViewName::Sanitized,
        ViewName::Revealed,
        ViewName::Skeleton,
    ];

    /// Preference order for a finding's `target.view`: the most informative
    /// cleaned view wins, skeleton only as a last resort.
    pub const PREFERRED: [ViewName; 4] = [
        ViewName::Revealed,
        ViewName::Sanitized,
        ViewName::Raw,
        ViewName::Skeleton,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ViewName::Raw => "raw",
            ViewName::Sanitized => "sanitized",
            ViewName::Revealed => "revealed",
            ViewName::Skeleton => "skeleton",
        }
    }
}

/// The four parallel strings for a single text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewSet {
    pub raw: String,
    pub sanitized: String,
    pub revealed: String,
    pub skeleton: String,
}

impl ViewSet {
    /// A fresh view set: all four views equal to the canonical text.
    pub fn seeded(text: &str) -> Self {
        Self {
            raw: text.to_string(),
            sanitized: text.to_string(),
            revealed: text.to_string(),
            skeleton: text.to_string(),
        }
    }

    pub fn get(&self, view: ViewName) -> &str {
        match view {
            ViewName::Raw => &self.raw,
            ViewName::Sanitized => &self.sanitized,
            ViewName::Revealed => &self.revealed,
            ViewName::Skeleton => &self.skeleton,
        }
    }
}

/// Views for one provenance-tagged chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkViews {
    pub source: ChunkSource,
    pub views: ViewSet,
}

/// The complete view payload for a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputViews {
    pub prompt: ViewSet,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub chunks: Vec<ChunkViews>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<ViewSet>,
}

/// Attach view sets to an input that lacks them.
///
/// Idempotent: an input that already carries views is returned unchanged.
/// Chunk views are rebuilt from `promptChunksCanonical` in index order.
pub fn ensure_views(mut input: NormalizedInput) -> NormalizedInput {
    if input.views.is_some() {
        return input;
    }

    let chunks = input
        .canonical
        .prompt_chunks
        .iter()
        .map(|chunk| ChunkViews {
            source: chunk.source,
            views: ViewSet::seeded(&chunk.text),
        })
        .collect();

    input.views = Some(InputViews {
        prompt: ViewSet::seeded(&input.canonical.prompt),
        chunks,
        response: input
            .canonical
            .response_text
            .as_deref()
            .map(ViewSet::seeded),
    });
    input
}
