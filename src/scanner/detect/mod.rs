// Copyright 2026 The Schnabel Project
// SPDX-License-Identifier: Apache-2.0

// Detect stage.
//
// Detectors read views (never raw request text), record which views
// matched, and choose a preferred view for the finding target. They must
// not fail on well-typed input: embedded-JSON parse failures fall back to
// the raw request lists.

pub mod confusables;
pub mod history;
pub mod keyword;
pub mod rulepack;
pub mod tool_args;
pub mod tool_results;

use crate::normalize::NormalizedInput;
use crate::rulepack::MatchSpan;
use crate::views::{ViewName, ViewSet};

pub(crate) use super::sanitize::TargetRef;

/// Result of probing one view set with a matcher.
pub(crate) struct ViewMatch {
    pub matched_views: Vec<ViewName>,
    pub preferred: ViewName,
    /// Span of the hit within the preferred view's text.
    pub span: MatchSpan,
}

/// Probe all four views in scan order; pick the preferred view for the
/// finding target (`revealed > sanitized > raw > skeleton`).
pub(crate) fn match_views<F>(views: &ViewSet, test: F) -> Option<ViewMatch>
where
    F: Fn(&str) -> Option<MatchSpan>,
{
    let mut matched: Vec<(ViewName, MatchSpan)> = Vec::new();
    for view in ViewName::ALL {
        if let Some(span) = test(views.get(view)) {
            matched.push((view, span));
        }
    }
    if matched.is_empty() {
        return None;
    }

    let preferred = ViewName::PREFERRED
        .iter()
        .find(|v| matched.iter().any(|(m, _)| m == *v))
        .copied()
        .unwrap_or(matched[0].0);
    let span = matched
        .iter()
        .find(|(v, _)| *v == preferred)
        .map(|(_, s)| *s)
        .unwrap_or(matched[0].1);

    Some(ViewMatch {
        matched_views: matched.into_iter().map(|(v, _)| v).collect(),
        preferred,
        span,
    })
}

/// The response text detectors read: the revealed view when present,
/// otherwise the canonical response.
pub(crate) fn response_text(input: &NormalizedInput) -> Option<String> {
    if let Some(views) = input.views.as_ref() {
        if let Some(response) = views.response.as_ref() {
            return Some(response.revealed.clone());
        }
    }
    input.canonical.response_text.clone()
}

/// Visit each target's view set read-only (prompt, chunks in order, response).
pub(crate) fn for_each_views<F>(input: &NormalizedInput, mut visit: F)
where
    F: FnMut(TargetRef, &ViewSet),
{
    let Some(views) = input.views.as_ref() else {
        return;
    };
    visit(TargetRef::Prompt, &views.prompt);
    for (index, chunk) in views.chunks.iter().enumerate() {
        visit(TargetRef::Chunk(index, chunk.source), &chunk.views);
    }
    if let Some(response) = views.response.as_ref() {
        visit(TargetRef::Response, response);
    }
}

/// 80-character window centered on the match, trailing ellipsis when the
/// text continues past the window.
pub(crate) fn snippet(text: &str, span: MatchSpan) -> String {
    const WINDOW: usize = 80;

    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= WINDOW {
        return text.to_string();
    }

    // Byte offset -> char index of the match start.
    let match_char = text
        .char_indices()
        .take_while(|(b, _)| *b < span.start)
        .count();
    let match_chars = text[span.start..]
        .chars()
        .take(span.len.min(text.len() - span.start))
        .count()
        .min(WINDOW);

    let lead = (WINDOW - match_chars) / 2;
    let start = match_char.saturating_sub(lead).min(chars.len() - WINDOW);
    let end = start + WINDOW;

    let mut out: String = chars[start..end].iter().collect();
    if end < chars.len() {
        out.push_str("...");
    }
    out
}

/// Serialize matched views for evidence.
pub(crate) fn view_names(views: &[ViewName]) -> Vec<&'static str> {
    views.iter().map(|v| v.as_str()).collect()
}
