// Copyright 2026 The Schnabel Project
// SPDX-License-Identifier: Apache-2.0

// Sanitize stage.
//
// Shared contract: a sanitizer may rewrite `sanitized` and `revealed` views
// (never `raw`), then propagates the most informative view back onto the
// canonical payload so detectors that ignore views still benefit. Findings
// are emitted only for transformations that are themselves suspicious.

pub mod hidden_tags;
pub mod separators;
pub mod tool_args;
pub mod unicode;

use unicode_normalization::UnicodeNormalization;

use crate::normalize::NormalizedInput;
use crate::request::ChunkSource;
use crate::scanner::FindingTarget;
use crate::views::{ViewName, ViewSet};

/// Invisible code points stripped by the unicode cleanup.
const INVISIBLES: [char; 6] = [
    '\u{200B}', // zero-width space
    '\u{200C}', // zero-width non-joiner
    '\u{200D}', // zero-width joiner
    '\u{2060}', // word joiner
    '\u{FEFF}', // BOM / zero-width no-break space
    '\u{00AD}', // soft hyphen
];

fn is_invisible(c: char) -> bool {
    INVISIBLES.contains(&c)
}

fn is_bidi_control(c: char) -> bool {
    matches!(c, '\u{202A}'..='\u{202E}' | '\u{2066}'..='\u{2069}')
}

/// What the unicode cleanup changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct CleanupStats {
    pub nfkc_changed: bool,
    pub invisible_removed: usize,
    pub bidi_removed: usize,
}

impl CleanupStats {
    pub fn merge(&mut self, other: CleanupStats) {
        self.nfkc_changed |= other.nfkc_changed;
        self.invisible_removed += other.invisible_removed;
        self.bidi_removed += other.bidi_removed;
    }

    pub fn any(&self) -> bool {
        self.nfkc_changed || self.invisible_removed > 0 || self.bidi_removed > 0
    }
}

/// NFKC, strip invisibles, strip bidi controls, optionally trim.
///
/// `trim` is off for tool-arg strings where surrounding whitespace may be
/// semantic.
pub(crate) fn clean_text(text: &str, trim: bool) -> (String, CleanupStats) {
    let nfkc: String = text.nfkc().collect();
    let mut stats = CleanupStats {
        nfkc_changed: nfkc != text,
        ..CleanupStats::default()
    };

    let mut out = String::with_capacity(nfkc.len());
    for c in nfkc.chars() {
        if is_invisible(c) {
            stats.invisible_removed += 1;
        } else if is_bidi_control(c) {
            stats.bidi_removed += 1;
        } else {
            out.push(c);
        }
    }

    if trim {
        let trimmed = out.trim();
        if trimmed.len() != out.len() {
            out = trimmed.to_string();
        }
    }
    (out, stats)
}

/// Identifies one sanitize target while iterating a document.
#[derive(Debug, Clone, Copy)]
pub(crate) enum TargetRef {
    Prompt,
    Chunk(usize, ChunkSource),
    Response,
}

impl TargetRef {
    pub fn finding_target(&self, view: ViewName) -> FindingTarget {
        match *self {
            TargetRef::Prompt => FindingTarget::prompt(view),
            TargetRef::Chunk(index, source) => FindingTarget::chunk(index, source, view),
            TargetRef::Response => FindingTarget::response(view),
        }
    }
}

/// Visit every target's view set mutably.
pub(crate) fn for_each_target<F>(input: &mut NormalizedInput, mut visit: F)
where
    F: FnMut(TargetRef, &mut ViewSet),
{
    let Some(views) = input.views.as_mut() else {
        return;
    };
    visit(TargetRef::Prompt, &mut views.prompt);
    for (index, chunk) in views.chunks.iter_mut().enumerate() {
        visit(TargetRef::Chunk(index, chunk.source), &mut chunk.views);
    }
    if let Some(response) = views.response.as_mut() {
        visit(TargetRef::Response, response);
    }
}

/// Copy the `revealed` view back onto the canonical payload and refresh the
/// prompt-length feature.
pub(crate) fn propagate_revealed(input: &mut NormalizedInput) {
    let Some(views) = input.views.as_ref() else {
        return;
    };
    input.canonical.prompt = views.prompt.revealed.clone();
    for (chunk, view) in input
        .canonical
        .prompt_chunks
        .iter_mut()
        .zip(views.chunks.iter())
    {
        chunk.text = view.views.revealed.clone();
    }
    if let (Some(text), Some(view)) = (
        input.canonical.response_text.as_mut(),
        views.response.as_ref(),
    ) {
        *text = view.revealed.clone();
    }
    input.refresh_prompt_length();
}
