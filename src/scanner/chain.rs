// Copyright 2026 The Schnabel Project
// SPDX-License-Identifier: Apache-2.0

// Scanner chain runtime.
//
// Scanners run sequentially: the output document of scanner i is the input
// of scanner i+1. The runtime owns per-scanner timeouts, per-scanner
// metrics, fail-fast, and the view carry-over invariants:
// - a scanner that returns no views gets the previous views re-attached
// - the `raw` view is restored from the pre-scanner snapshot, so no
//   scanner can rewrite what was canonicalized at normalization

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::error::AuditError;
use crate::normalize::NormalizedInput;
use crate::scanner::{Finding, RiskLevel, Scanner, ScannerKind};
use crate::views::{ensure_views, InputViews};

/// Per-scanner execution record, in chain order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanMetric {
    pub scanner: String,
    pub kind: ScannerKind,
    pub duration_ms: f64,
    pub finding_count: usize,
}

/// Synchronous metric observer, invoked in submission order.
pub type MetricCallback = Arc<dyn Fn(&ScanMetric) + Send + Sync>;

#[derive(Clone)]
pub struct ScanOptions {
    /// Per-scanner wall-clock budget.
    pub scanner_timeout: Duration,
    /// Stop the chain once a finding reaches `fail_fast_at`.
    pub fail_fast: bool,
    pub fail_fast_at: RiskLevel,
    pub on_metric: Option<MetricCallback>,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            scanner_timeout: Duration::from_millis(30_000),
            fail_fast: false,
            fail_fast_at: RiskLevel::High,
            on_metric: None,
        }
    }
}

/// Result of a completed chain.
#[derive(Debug)]
pub struct ScanOutcome {
    pub input: NormalizedInput,
    pub findings: Vec<Finding>,
    pub metrics: Vec<ScanMetric>,
}

/// Run the chain over a working document.
///
/// Any scanner failure or timeout aborts the whole chain; partial results
/// are discarded by the caller receiving an error.
pub async fn scan(
    input: NormalizedInput,
    scanners: &[Arc<dyn Scanner>],
    options: &ScanOptions,
) -> Result<ScanOutcome, AuditError> {
    let mut input = ensure_views(input);
    let mut findings: Vec<Finding> = Vec::new();
    let mut metrics: Vec<ScanMetric> = Vec::new();

    for (index, scanner) in scanners.iter().enumerate() {
        let name = scanner.name();
        if name.is_empty() {
            return Err(AuditError::ScannerInvalid {
                index,
                message: "scanner name must not be empty".to_string(),
            });
        }

        let previous_views = input.views.clone();
        let started = Instant::now();

        let run = tokio::time::timeout(options.scanner_timeout, scanner.run(input.clone()));
        let output = match run.await {
            Err(_) => {
                return Err(AuditError::ScannerTimeout {
                    scanner: name.to_string(),
                    index,
                    timeout_ms: options.scanner_timeout.as_millis() as u64,
                });
            }
            Ok(Err(err)) => {
                return Err(AuditError::ChainError {
                    scanner: name.to_string(),
                    index,
                    message: err.to_string(),
                });
            }
            Ok(Ok(output)) => output,
        };

        let duration_ms = started.elapsed().as_secs_f64() * 1000.0;

        input = output.input;
        carry_over_views(&mut input, previous_views);

        let metric = ScanMetric {
            scanner: name.to_string(),
            kind: scanner.kind(),
            duration_ms,
            finding_count: output.findings.len(),
        };
        tracing::debug!(
            scanner = name,
            index,
            duration_ms = metric.duration_ms,
            finding_count = metric.finding_count,
            "scanner finished"
        );
        if let Some(cb) = &options.on_metric {
            cb(&metric);
        }
        metrics.push(metric);

        let tripped = options.fail_fast
            && output
                .findings
                .iter()
                .any(|f| f.risk >= options.fail_fast_at);
        findings.extend(output.findings);

        if tripped {
            tracing::debug!(scanner = name, index, "fail-fast threshold reached");
            break;
        }
    }

    Ok(ScanOutcome {
        input,
        findings,
        metrics,
    })
}

/// Re-attach views a scanner dropped and pin the `raw` view to the
/// pre-scanner snapshot.
fn carry_over_views(input: &mut NormalizedInput, previous: Option<InputViews>) {
    let Some(previous) = previous else {
        return;
    };
    match &mut input.views {
        None => input.views = Some(previous),
        Some(views) => {
            views.prompt.raw = previous.prompt.raw;
            for (chunk, prev) in views.chunks.iter_mut().zip(previous.chunks) {
                chunk.views.raw = prev.views.raw;
            }
            if let (Some(resp), Some(prev)) = (views.response.as_mut(), previous.response) {
                resp.raw = prev.raw;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::normalize;
    use crate::request::AuditRequest;
    use crate::scanner::{FindingKind, FindingTarget, ScannerOutput};
    use crate::views::ViewName;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct EmitN {
        name: &'static str,
        count: usize,
        risk: RiskLevel,
    }

    #[async_trait]
    impl Scanner for EmitN {
        fn name(&self) -> &'static str {
            self.name
        }
        fn kind(&self) -> ScannerKind {
            ScannerKind::Detect
        }
        async fn run(&self, input: NormalizedInput) -> Result<ScannerOutput, AuditError> {
            let findings = (0..self.count)
                .map(|i| {
                    Finding::new(
                        FindingKind::Detect,
                        self.name,
                        &input.request_id,
                        &format!("k{i}"),
                        0.5,
                        self.risk,
                        "test finding",
                        FindingTarget::prompt(ViewName::Raw),
                    )
                })
                .collect();
            Ok(ScannerOutput { input, findings })
        }
    }

    struct DropViews;

    #[async_trait]
    impl Scanner for DropViews {
        fn name(&self) -> &'static str {
            "drop_views"
        }
        fn kind(&self) -> ScannerKind {
            ScannerKind::Sanitize
        }
        async fn run(&self, mut input: NormalizedInput) -> Result<ScannerOutput, AuditError> {
            input.views = None;
            Ok(ScannerOutput::clean(input))
        }
    }

    struct MutateRaw;

    #[async_trait]
    impl Scanner for MutateRaw {
        fn name(&self) -> &'static str {
            "mutate_raw"
        }
        fn kind(&self) -> ScannerKind {
            ScannerKind::Sanitize
        }
        async fn run(&self, mut input: NormalizedInput) -> Result<ScannerOutput, AuditError> {
            if let Some(views) = input.views.as_mut() {
                views.prompt.raw = "clobbered".to_string();
                views.prompt.sanitized = "sanitized-change".to_string();
            }
            Ok(ScannerOutput::clean(input))
        }
    }

    struct Sleepy;

    #[async_trait]
    impl Scanner for Sleepy {
        fn name(&self) -> &'static str {
            "sleepy"
        }
        fn kind(&self) -> ScannerKind {
            ScannerKind::Detect
        }
        async fn run(&self, input: NormalizedInput) -> Result<ScannerOutput, AuditError> {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(ScannerOutput::clean(input))
        }
    }

    fn test_input() -> NormalizedInput {
        normalize(&AuditRequest::new("req-chain", 0.0, "hello chain")).unwrap()
    }

    #[tokio::test]
    async fn runs_scanners_in_order_and_collects_metrics() {
        let scanners: Vec<Arc<dyn Scanner>> = vec![
            Arc::new(EmitN {
                name: "first",
                count: 2,
                risk: RiskLevel::Low,
            }),
            Arc::new(EmitN {
                name: "second",
                count: 1,
                risk: RiskLevel::Low,
            }),
        ];
        let outcome = scan(test_input(), &scanners, &ScanOptions::default())
            .await
            .unwrap();

        assert_eq!(outcome.metrics.len(), 2);
        assert_eq!(outcome.metrics[0].scanner, "first");
        assert_eq!(outcome.metrics[1].scanner, "second");
        let counted: usize = outcome.metrics.iter().map(|m| m.finding_count).sum();
        assert_eq!(counted, outcome.findings.len());
        assert_eq!(outcome.findings.len(), 3);
    }

    #[tokio::test]
    async fn reattaches_views_dropped_by_scanner() {
        let scanners: Vec<Arc<dyn Scanner>> = vec![Arc::new(DropViews)];
        let outcome = scan(test_input(), &scanners, &ScanOptions::default())
            .await
            .unwrap();
        let views = outcome.input.views.expect("views re-attached");
        assert_eq!(views.prompt.raw, "hello chain");
    }

    #[tokio::test]
    async fn raw_view_is_restored_after_scanner_mutation() {
        let scanners: Vec<Arc<dyn Scanner>> = vec![Arc::new(MutateRaw)];
        let outcome = scan(test_input(), &scanners, &ScanOptions::default())
            .await
            .unwrap();
        let views = outcome.input.views.unwrap();
        assert_eq!(views.prompt.raw, "hello chain");
        // Non-raw mutations survive.
        assert_eq!(views.prompt.sanitized, "sanitized-change");
    }

    #[tokio::test]
    async fn timeout_aborts_chain_with_scanner_name() {
        let scanners: Vec<Arc<dyn Scanner>> = vec![Arc::new(Sleepy)];
        let options = ScanOptions {
            scanner_timeout: Duration::from_millis(10),
            ..ScanOptions::default()
        };
        let err = scan(test_input(), &scanners, &options).await.unwrap_err();
        match err {
            AuditError::ScannerTimeout { scanner, index, .. } => {
                assert_eq!(scanner, "sleepy");
                assert_eq!(index, 0);
            }
            other => panic!("expected timeout, got {other}"),
        }
    }

    #[tokio::test]
    async fn fail_fast_stops_after_threshold() {
        let scanners: Vec<Arc<dyn Scanner>> = vec![
            Arc::new(EmitN {
                name: "high_hit",
                count: 1,
                risk: RiskLevel::High,
            }),
            Arc::new(EmitN {
                name: "never_runs",
                count: 1,
                risk: RiskLevel::Low,
            }),
        ];
        let options = ScanOptions {
            fail_fast: true,
            ..ScanOptions::default()
        };
        let outcome = scan(test_input(), &scanners, &options).await.unwrap();
        assert_eq!(outcome.metrics.len(), 1);
        assert_eq!(outcome.findings.len(), 1);
    }

    #[tokio::test]
    async fn fail_fast_below_threshold_continues() {
        let scanners: Vec<Arc<dyn Scanner>> = vec![
            Arc::new(EmitN {
                name: "medium_hit",
                count: 1,
                risk: RiskLevel::Medium,
            }),
            Arc::new(EmitN {
                name: "runs_too",
                count: 1,
                risk: RiskLevel::Low,
            }),
        ];
        let options = ScanOptions {
            fail_fast: true,
            ..ScanOptions::default()
        };
        let outcome = scan(test_input(), &scanners, &options).await.unwrap();
        assert_eq!(outcome.metrics.len(), 2);
    }

    #[tokio::test]
    async fn metric_callback_sees_submission_order() {
        let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let options = ScanOptions {
            on_metric: Some(Arc::new(move |m: &ScanMetric| {
                sink.lock().unwrap().push(m.scanner.clone());
            })),
            ..ScanOptions::default()
        };
        let scanners: Vec<Arc<dyn Scanner>> = vec![
            Arc::new(EmitN {
                name: "a",
                count: 0,
                risk: RiskLevel::Low,
            }),
            Arc::new(EmitN {
                name: "b",
                count: 0,
                risk: RiskLevel::Low,
            }),
        ];
        scan(test_input(), &scanners, &options).await.unwrap();
        assert_eq!(*seen.lock().unwrap(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn empty_chain_returns_input_with_views() {
        let outcome = scan(test_input(), &[], &ScanOptions::default())
            .await
            .unwrap();
        assert!(outcome.input.views.is_some());
        assert!(outcome.findings.is_empty());
        assert!(outcome.metrics.is_empty());
    }
}
