// Copyright 2026 The Schnabel Project
// SPDX-License-Identifier: Apache-2.0

/// All errors that can surface from an audit run.
///
/// Variants map one-to-one onto the audit error kinds: a failed audit
/// produces no evidence package and appends nothing to session history.
#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("failed to load rule pack \"{path}\": {message}")]
    RulePackLoad { path: String, message: String },

    #[error("invalid scanner at index {index}: {message}")]
    ScannerInvalid { index: usize, message: String },

    #[error("scanner \"{scanner}\" (index {index}) exceeded {timeout_ms}ms timeout")]
    ScannerTimeout {
        scanner: String,
        index: usize,
        timeout_ms: u64,
    },

    #[error("scanner \"{scanner}\" (index {index}) failed: {message}")]
    ChainError {
        scanner: String,
        index: usize,
        message: String,
    },

    #[error("missing asset: {0}")]
    AssetMissing(String),

    #[error("invalid policy config: {0}")]
    PolicyConfig(String),
}
