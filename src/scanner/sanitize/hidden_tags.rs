// Copyright 2026 The Schnabel Project
// SPDX-License-Identifier: Apache-2.0

// Hidden ASCII tag decoder.
//
// Unicode TAG characters (U+E0000..U+E007F) render as nothing but carry an
// ASCII payload at `cp - 0xE0000`. Smuggled instructions ride in otherwise
// innocent text. The decoded payload is appended to the `revealed` view so
// downstream detectors see what the model would.

use async_trait::async_trait;

use crate::error::AuditError;
use crate::normalize::NormalizedInput;
use crate::scanner::{Finding, FindingKind, RiskLevel, Scanner, ScannerKind, ScannerOutput};
use crate::views::{ensure_views, ViewName};

use super::{for_each_target, propagate_revealed};

const TAG_BASE: u32 = 0xE0000;
const TAG_END: u32 = 0xE007F;

pub struct HiddenAsciiTags;

#[async_trait]
impl Scanner for HiddenAsciiTags {
    fn name(&self) -> &'static str {
        "hidden_ascii_tags"
    }

    fn kind(&self) -> ScannerKind {
        ScannerKind::Sanitize
    }

    async fn run(&self, input: NormalizedInput) -> Result<ScannerOutput, AuditError> {
        let mut input = ensure_views(input);
        let mut findings = Vec::new();
        let request_id = input.request_id.clone();

        for_each_target(&mut input, |target, views| {
            let decode = decode_tags(&views.sanitized);
            if decode.tag_count == 0 {
                return;
            }

            views.sanitized = decode.stripped.clone();
            views.revealed = if decode.decoded.is_empty() {
                decode.stripped.clone()
            } else {
                format!("{}\n{}", decode.stripped, decode.decoded)
                    .trim()
                    .to_string()
            };

            let target = target.finding_target(ViewName::Revealed);
            findings.push(
                Finding::new(
                    FindingKind::Sanitize,
                    "hidden_ascii_tags",
                    &request_id,
                    &target.key(),
                    0.85,
                    RiskLevel::High,
                    format!("decoded {} hidden TAG characters", decode.tag_count),
                    target,
                )
                .with_tag("unicode")
                .with_tag("steganography")
                .with_evidence("tagCount", decode.tag_count)
                .with_evidence("decodedLength", decode.decoded.chars().count())
                .with_evidence("decodedPreview", preview(&decode.decoded)),
            );
        });

        propagate_revealed(&mut input);
        Ok(ScannerOutput { input, findings })
    }
}

struct TagDecode {
    stripped: String,
    decoded: String,
    tag_count: usize,
}

fn decode_tags(text: &str) -> TagDecode {
    let mut stripped = String::with_capacity(text.len());
    let mut decoded = String::new();
    let mut tag_count = 0;

    for c in text.chars() {
        let cp = c as u32;
        if (TAG_BASE..=TAG_END).contains(&cp) {
            tag_count += 1;
            let ascii = cp - TAG_BASE;
            // Printable range only; TAG variants of controls are dropped.
            if (0x20..=0x7E).contains(&ascii) {
                // The subtraction stays within ASCII.
                if let Some(ch) = char::from_u32(ascii) {
                    decoded.push(ch);
                }
            }
        } else {
            stripped.push(c);
        }
    }

    TagDecode {
        stripped,
        decoded,
        tag_count,
    }
}

fn preview(decoded: &str) -> String {
    const MAX: usize = 120;
    if decoded.chars().count() <= MAX {
        decoded.to_string()
    } else {
        decoded.chars().take(MAX).collect()
    }
}

/// Encode text as TAG characters (test fixture helper).
#[cfg(test)]
pub(crate) fn encode_tags(text: &str) -> String {
    text.chars()
        .filter_map(|c| char::from_u32(TAG_BASE + c as u32))
        .collect()
}
