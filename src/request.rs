// Copyright 2026 The Schnabel Project
// SPDX-License-Identifier: Apache-2.0

// Audit request envelope.
//
// These are the wire types every adapter produces and the whole pipeline
// consumes. The envelope is immutable after construction: the normalizer
// keeps an `Arc` back-reference to it and nothing downstream mutates it.

use serde::{Deserialize, Serialize};

/// Origin class of a prompt fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkSource {
    User,
    System,
    Developer,
    Retrieval,
    Tool,
    Assistant,
    Unknown,
}

impl ChunkSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkSource::User => "user",
            ChunkSource::System => "system",
            ChunkSource::Developer => "developer",
            ChunkSource::Retrieval => "retrieval",
            ChunkSource::Tool => "tool",
            ChunkSource::Assistant => "assistant",
            ChunkSource::Unknown => "unknown",
        }
    }
}

/// A provenance-tagged fragment of the prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptChunk {
    pub source: ChunkSource,
    pub text: String,
}

/// The actor behind a request, when the caller knows it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Actor {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
}

/// A tool invocation requested during the turn. `args` is untyped wire JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCall {
    pub tool_name: String,
    #[serde(default)]
    pub args: serde_json::Value,
}

/// The outcome of a tool invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResult {
    pub tool_name: String,
    pub ok: bool,
    #[serde(default)]
    pub result: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<f64>,
}

/// One audited turn: prompt, provenance chunks, tool activity, response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditRequest {
    pub request_id: String,
    /// Epoch milliseconds. Must be finite and non-negative.
    pub timestamp: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor: Option<Actor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default)]
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_chunks: Option<Vec<PromptChunk>>,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default)]
    pub tool_results: Vec<ToolResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_text: Option<String>,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl AuditRequest {
    /// Minimal request with required fields only.
    pub fn new(request_id: impl Into<String>, timestamp: f64, prompt: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            timestamp,
            actor: None,
            model: None,
            prompt: prompt.into(),
            prompt_chunks: None,
            tool_calls: Vec::new(),
            tool_results: Vec::new(),
            response_text: None,
            metadata: serde_json::Map::new(),
        }
    }

    /// The session id, when the caller attached an actor with one.
    pub fn session_id(&self) -> Option<&str> {
        self.actor.as_ref()?.session_id.as_deref()
    }
}
