// Copyright 2026 The Schnabel Project
// SPDX-License-Identifier: Apache-2.0

// Session history -- append-only per-session turn log.
//
// The policy escalator and the cross-turn detectors consult recent turns;
// findings themselves stay self-contained. Storage is behind a trait so
// persistent backends can replace the in-memory default.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::policy::PolicyAction;
use crate::scanner::RiskLevel;

/// Retention bound for the in-memory store.
pub const DEFAULT_MAX_TURNS: usize = 200;

/// Compressed record of one audited turn, appended after the decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryTurn {
    pub request_id: String,
    pub created_at_ms: i64,
    pub action: PolicyAction,
    pub risk: RiskLevel,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub succeeded_tools: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failed_tools: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_snippet: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rule_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub categories: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub detect_scanners: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub detect_tags: Vec<String>,
}

/// Per-session turn log.
///
/// Implementations must serialize `append`/`get_recent` per session and be
/// `Send + Sync`; the engine shares one store across concurrent requests.
pub trait HistoryStore: Send + Sync {
    /// The most recent `limit` turns, ordered oldest → newest.
    fn get_recent(&self, session_id: &str, limit: usize) -> Vec<HistoryTurn>;

    fn append(&self, session_id: &str, turn: HistoryTurn);
}

/// In-memory store backed by `DashMap`; per-session entry locking gives the
/// required append/read serialization. Suitable for single-instance use.
pub struct InMemoryHistoryStore {
    sessions: DashMap<String, Vec<HistoryTurn>>,
    max_turns: usize,
}

impl InMemoryHistoryStore {
    pub fn new(max_turns: usize) -> Self {
        Self {
            sessions: DashMap::new(),
            max_turns,
        }
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}

impl Default for InMemoryHistoryStore {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_TURNS)
    }
}

impl HistoryStore for InMemoryHistoryStore {
    fn get_recent(&self, session_id: &str, limit: usize) -> Vec<HistoryTurn> {
        let Some(turns) = self.sessions.get(session_id) else {
            return Vec::new();
        };
        let start = turns.len().saturating_sub(limit);
        turns[start..].to_vec()
    }

    fn append(&self, session_id: &str, turn: HistoryTurn) {
        if self.max_turns == 0 {
            return;
        }
        let mut entry = self.sessions.entry(session_id.to_string()).or_default();
        entry.push(turn);
        if entry.len() > self.max_turns {
            let excess = entry.len() - self.max_turns;
            entry.drain(..excess);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn turn(id: &str) -> HistoryTurn {
        HistoryTurn {
            request_id: id.to_string(),
            created_at_ms: 0,
            action: PolicyAction::Allow,
            risk: RiskLevel::None,
            succeeded_tools: Vec::new(),
            failed_tools: Vec::new(),
            response_snippet: None,
            rule_ids: Vec::new(),
            categories: Vec::new(),
            detect_scanners: Vec::new(),
            detect_tags: Vec::new(),
        }
    }

    #[test]
    fn get_recent_returns_oldest_to_newest() {
        let store = InMemoryHistoryStore::default();
        store.append("s", turn("a"));
        store.append("s", turn("b"));
        store.append("s", turn("c"));

        let recent = store.get_recent("s", 2);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].request_id, "b");
        assert_eq!(recent[1].request_id, "c");
    }

    #[test]
    fn sessions_are_isolated() {
        let store = InMemoryHistoryStore::default();
        store.append("s1", turn("a"));
        store.append("s2", turn("b"));
        assert_eq!(store.get_recent("s1", 10).len(), 1);
        assert_eq!(store.get_recent("s2", 10)[0].request_id, "b");
        assert!(store.get_recent("s3", 10).is_empty());
    }

    #[test]
    fn retention_drops_oldest_turns() {
        let store = InMemoryHistoryStore::new(2);
        store.append("s", turn("a"));
        store.append("s", turn("b"));
        store.append("s", turn("c"));

        let recent = store.get_recent("s", 10);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].request_id, "b");
    }

    #[test]
    fn zero_max_turns_yields_empty_reads() {
        let store = InMemoryHistoryStore::new(0);
        store.append("s", turn("a"));
        assert!(store.get_recent("s", 10).is_empty());
    }

    #[test]
    fn turn_serializes_camel_case() {
        let mut t = turn("req");
        t.detect_scanners.push("history_flipflop".to_string());
        let v = serde_json::to_value(&t).unwrap();
        assert_eq!(v["requestId"], "req");
        assert_eq!(v["detectScanners"][0], "history_flipflop");
        assert_eq!(v["action"], "allow");
    }
}
