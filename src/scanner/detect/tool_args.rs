// Copyright 2026 The Schnabel Project
// SPDX-License-Identifier: Apache-2.0

// Tool-argument detectors: SSRF and path traversal.
//
// Both walk the canonicalized tool-call list (falling back to the raw
// request list when the embedded JSON fails to parse) and inspect every
// string leaf within the depth bound.

use std::net::{Ipv4Addr, Ipv6Addr};

use async_trait::async_trait;
use regex::Regex;
use url::Url;

use crate::error::AuditError;
use crate::normalize::NormalizedInput;
use crate::scanner::{
    Finding, FindingKind, FindingTarget, RiskLevel, Scanner, ScannerKind, ScannerOutput,
};
use crate::views::ViewName;
use crate::walk::walk_strings;

/// Schemes we recognize as URL prefixes in tool arguments.
const URL_SCHEMES: [&str; 10] = [
    "http", "https", "ftp", "file", "gopher", "dict", "ldap", "ldaps", "data", "netdoc",
];

/// Schemes that are dangerous regardless of target.
const DANGEROUS_SCHEMES: [&str; 7] = ["file", "gopher", "dict", "ldap", "ldaps", "data", "netdoc"];

const SENSITIVE_PATH_PREFIXES: [&str; 11] = [
    "/etc/passwd",
    "/etc/shadow",
    "/proc/",
    "/sys/",
    "/root/",
    ".ssh",
    "id_rsa",
    ".env",
    "c:/windows/system32",
    "c:/users/",
    "c:/windows/",
];

/// The parsed tool-call list, preferring the canonical JSON.
fn parsed_tool_calls(input: &NormalizedInput) -> Vec<(String, serde_json::Value)> {
    if let Ok(serde_json::Value::Array(items)) =
        serde_json::from_str::<serde_json::Value>(&input.canonical.tool_calls_json)
    {
        return items
            .into_iter()
            .map(|item| {
                let name = item
                    .get("toolName")
                    .and_then(|v| v.as_str())
                    .unwrap_or("")
                    .to_string();
                let args = item.get("args").cloned().unwrap_or(serde_json::Value::Null);
                (name, args)
            })
            .collect();
    }
    input
        .raw
        .tool_calls
        .iter()
        .map(|c| (c.tool_name.clone(), c.args.clone()))
        .collect()
}

// ---------------------------------------------------------------------------
// SSRF
// ---------------------------------------------------------------------------

pub struct ToolArgsSsrf;

#[async_trait]
impl Scanner for ToolArgsSsrf {
    fn name(&self) -> &'static str {
        "tool_args_ssrf"
    }

    fn kind(&self) -> ScannerKind {
        ScannerKind::Detect
    }

    async fn run(&self, input: NormalizedInput) -> Result<ScannerOutput, AuditError> {
        let mut findings = Vec::new();

        for (index, (tool_name, args)) in parsed_tool_calls(&input).iter().enumerate() {
            walk_strings(args, "args", &mut |path, value| {
                let Some(verdict) = classify_url(value) else {
                    return;
                };
                let key = format!("ssrf:{index}:{path}");
                findings.push(
                    Finding::new(
                        FindingKind::Detect,
                        "tool_args_ssrf",
                        &input.request_id,
                        &key,
                        0.85,
                        RiskLevel::High,
                        format!("tool \"{tool_name}\" targets {}", verdict.reason),
                        FindingTarget::prompt(ViewName::Raw),
                    )
                    .with_tag("ssrf")
                    .with_tag("tool_abuse")
                    .with_evidence("toolName", tool_name.clone())
                    .with_evidence("argPath", path)
                    .with_evidence("url", truncate(value, 200))
                    .with_evidence("host", verdict.host)
                    .with_evidence("reason", verdict.reason),
                );
            });
        }

        Ok(ScannerOutput { input, findings })
    }
}

struct SsrfVerdict {
    host: String,
    reason: String,
}

fn classify_url(value: &str) -> Option<SsrfVerdict> {
    let lower = value.trim_start().to_lowercase();
    let scheme = URL_SCHEMES
        .iter()
        .find(|s| lower.starts_with(&format!("{s}:")))?;

    if DANGEROUS_SCHEMES.contains(scheme) {
        return Some(SsrfVerdict {
            host: String::new(),
            reason: format!("dangerous URL scheme \"{scheme}:\""),
        });
    }

    let url = Url::parse(value.trim()).ok()?;
    match url.host()? {
        url::Host::Ipv4(addr) => classify_ipv4(addr).map(|reason| SsrfVerdict {
            host: addr.to_string(),
            reason,
        }),
        url::Host::Ipv6(addr) => classify_ipv6(addr).map(|reason| SsrfVerdict {
            host: addr.to_string(),
            reason,
        }),
        url::Host::Domain(domain) => {
            let domain = domain.to_lowercase();
            classify_hostname(&domain).map(|reason| SsrfVerdict {
                host: domain,
                reason,
            })
        }
    }
}

fn classify_ipv4(addr: Ipv4Addr) -> Option<String> {
    if addr == Ipv4Addr::new(169, 254, 169, 254) {
        return Some("cloud metadata endpoint 169.254.169.254".to_string());
    }
    if addr.is_loopback() {
        return Some("loopback address".to_string());
    }
    if addr.is_private() {
        return Some("private network address".to_string());
    }
    if addr.is_link_local() {
        return Some("link-local address".to_string());
    }
    if addr.is_unspecified() {
        return Some("unspecified address".to_string());
    }
    let octets = addr.octets();
    if octets[0] == 100 && (64..=127).contains(&octets[1]) {
        return Some("carrier-grade NAT address".to_string());
    }
    None
}

fn classify_ipv6(addr: Ipv6Addr) -> Option<String> {
    if addr.is_loopback() {
        return Some("loopback address".to_string());
    }
    let segments = addr.segments();
    if segments[0] & 0xfe00 == 0xfc00 {
        return Some("unique-local address".to_string());
    }
    if segments[0] & 0xffc0 == 0xfe80 {
        return Some("link-local address".to_string());
    }
    if let Some(v4) = addr.to_ipv4_mapped() {
        return classify_ipv4(v4);
    }
    None
}

fn classify_hostname(host: &str) -> Option<String> {
    if host == "localhost" || host.ends_with(".localhost") {
        return Some("localhost".to_string());
    }
    if host.ends_with(".local") {
        return Some("mDNS .local hostname".to_string());
    }
    if host == "metadata.google.internal" {
        return Some("cloud metadata hostname".to_string());
    }
    None
}

// ---------------------------------------------------------------------------
// Path traversal
// ---------------------------------------------------------------------------

pub struct ToolArgsPathTraversal;

#[async_trait]
impl Scanner for ToolArgsPathTraversal {
    fn name(&self) -> &'static str {
        "tool_args_path_traversal"
    }

    fn kind(&self) -> ScannerKind {
        ScannerKind::Detect
    }

    async fn run(&self, input: NormalizedInput) -> Result<ScannerOutput, AuditError> {
        let dotdot = Regex::new(r"(^|/)\.\.(/|$)").expect("static traversal regex");
        let mut findings = Vec::new();

        for (index, (tool_name, args)) in parsed_tool_calls(&input).iter().enumerate() {
            walk_strings(args, "args", &mut |path, value| {
                if !looks_like_path(value) {
                    return;
                }

                let normalized = normalize_path(value);
                let lower_original = value.to_lowercase();

                let sensitive = SENSITIVE_PATH_PREFIXES
                    .iter()
                    .find(|p| normalized.contains(*p));
                let traversal = dotdot.is_match(&normalized);
                let encoded = lower_original.contains("%2e%2e")
                    || lower_original.contains("%2f")
                    || lower_original.contains("%5c");

                let (risk, score, reason) = if let Some(prefix) = sensitive {
                    (
                        RiskLevel::High,
                        0.8,
                        format!("sensitive path \"{prefix}\""),
                    )
                } else if traversal {
                    (RiskLevel::Medium, 0.5, "parent directory traversal".to_string())
                } else if encoded {
                    (
                        RiskLevel::Medium,
                        0.5,
                        "URL-encoded path separators".to_string(),
                    )
                } else {
                    return;
                };

                let key = format!("traversal:{index}:{path}");
                findings.push(
                    Finding::new(
                        FindingKind::Detect,
                        "tool_args_path_traversal",
                        &input.request_id,
                        &key,
                        score,
                        risk,
                        format!("tool \"{tool_name}\" path argument: {reason}"),
                        FindingTarget::prompt(ViewName::Raw),
                    )
                    .with_tag("path_traversal")
                    .with_tag("tool_abuse")
                    .with_evidence("toolName", tool_name.clone())
                    .with_evidence("argPath", path)
                    .with_evidence("path", truncate(value, 200))
                    .with_evidence("normalized", truncate(&normalized, 200))
                    .with_evidence("reason", reason),
                );
            });
        }

        Ok(ScannerOutput { input, findings })
    }
}

fn looks_like_path(value: &str) -> bool {
    let lower = value.to_lowercase();
    value.contains('/')
        || value.contains('\\')
        || lower.contains("%2e")
        || lower.contains("%2f")
        || lower.contains("%5c")
        || value.contains("..")
}

/// Double URL-decode, unify separators, lowercase.
fn normalize_path(value: &str) -> String {
    let decoded = percent_decode(&percent_decode(value));
    decoded.replace('\\', "/").to_lowercase()
}

fn percent_decode(value: &str) -> String {
    let bytes = value.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            if let (Some(hi), Some(lo)) = (
                bytes.get(i + 1).and_then(|b| (*b as char).to_digit(16)),
                bytes.get(i + 2).and_then(|b| (*b as char).to_digit(16)),
            ) {
                out.push((hi * 16 + lo) as u8);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn truncate(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        value.to_string()
    } else {
        value.chars().take(max_chars).collect()
    }
}
