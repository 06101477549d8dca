// Copyright 2026 The Schnabel Project
// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use schnabel::audit::{run_audit, AuditOptions};
use schnabel::policy::PolicyAction;
use schnabel::request::AuditRequest;
use schnabel::scanner::chain::ScanOptions;
use schnabel::scanner::detect::rulepack::RulePackSource;
use schnabel::scanner::{default_chain, RiskLevel};

#[derive(Parser)]
#[command(name = "schnabel", about = "LLM traffic audit pipeline")]
struct Cli {
    /// Path to an AuditRequest JSON file ("-" for stdin)
    #[arg(long)]
    request: String,

    /// Rule pack file (defaults to the embedded pack)
    #[arg(long, env = "SCHNABEL_RULES")]
    rules: Option<PathBuf>,

    /// Stop the chain at the first high-risk finding
    #[arg(long, default_value_t = false)]
    fail_fast: bool,

    /// Pretty-print the evidence package
    #[arg(long, default_value_t = false)]
    pretty: bool,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .json()
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let raw = match read_request(&cli.request) {
        Ok(raw) => raw,
        Err(e) => {
            tracing::error!("failed to read request: {e}");
            std::process::exit(2);
        }
    };
    let request: AuditRequest = match serde_json::from_str(&raw) {
        Ok(r) => r,
        Err(e) => {
            tracing::error!("invalid request JSON: {e}");
            std::process::exit(2);
        }
    };

    let source = match cli.rules {
        Some(path) => RulePackSource::Path(path),
        None => RulePackSource::Embedded,
    };
    let scanners = match default_chain(source, None) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!("failed to build scanner chain: {e}");
            std::process::exit(2);
        }
    };

    let mut options = AuditOptions::new(scanners);
    options.scan = ScanOptions {
        fail_fast: cli.fail_fast,
        fail_fast_at: RiskLevel::High,
        ..ScanOptions::default()
    };
    options.auto_close_scanners = true;

    let report = match run_audit(&request, &options).await {
        Ok(report) => report,
        Err(e) => {
            tracing::error!("audit failed: {e}");
            std::process::exit(2);
        }
    };

    let rendered = if cli.pretty {
        serde_json::to_string_pretty(&report.evidence)
    } else {
        serde_json::to_string(&report.evidence)
    };
    match rendered {
        Ok(json) => println!("{json}"),
        Err(e) => {
            tracing::error!("failed to render evidence: {e}");
            std::process::exit(2);
        }
    }

    if report.decision.action == PolicyAction::Block {
        std::process::exit(1);
    }
}

fn read_request(source: &str) -> std::io::Result<String> {
    if source == "-" {
        use std::io::Read;
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        Ok(buf)
    } else {
        std::fs::read_to_string(source)
    }
}
