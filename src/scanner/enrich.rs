// Copyright 2026 The Schnabel Project
// SPDX-License-Identifier: Apache-2.0

// Skeleton enrichment.
//
// Writes the UTS#39 skeleton of each `revealed` view into the `skeleton`
// view. Runs after all sanitizers so the skeleton covers decoded payloads.
// Emits no findings; the confusables detector reads the result.

use async_trait::async_trait;

use crate::confusables::skeletonize;
use crate::error::AuditError;
use crate::normalize::NormalizedInput;
use crate::scanner::{Scanner, ScannerKind, ScannerOutput};
use crate::views::ensure_views;

pub struct SkeletonEnricher;

#[async_trait]
impl Scanner for SkeletonEnricher {
    fn name(&self) -> &'static str {
        "uts39_skeleton"
    }

    fn kind(&self) -> ScannerKind {
        ScannerKind::Enrich
    }

    async fn run(&self, input: NormalizedInput) -> Result<ScannerOutput, AuditError> {
        let mut input = ensure_views(input);

        if let Some(views) = input.views.as_mut() {
            views.prompt.skeleton = skeletonize(&views.prompt.revealed);
            for chunk in views.chunks.iter_mut() {
                chunk.views.skeleton = skeletonize(&chunk.views.revealed);
            }
            if let Some(response) = views.response.as_mut() {
                response.skeleton = skeletonize(&response.revealed);
            }
        }

        Ok(ScannerOutput::clean(input))
    }
}
