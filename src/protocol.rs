//! Wire types shared by the WebSocket session and the REST API.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;

/// Event kinds the backend streams over the session channel.
pub const EVENT_KINDS: &[&str] = &[
    "connected",
    "thinking",
    "tool_call",
    "approval_required",
    "tool_result",
    "message_chunk",
    "done",
    "error",
];

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("frame is not valid JSON: {0}")]
    InvalidJson(#[source] serde_json::Error),
    #[error("frame has no string `type` field")]
    MissingType,
    #[error("unknown event type `{0}`")]
    UnknownKind(String),
    #[error("malformed `{kind}` event: {source}")]
    Malformed {
        kind: String,
        #[source]
        source: serde_json::Error,
    },
}

// ---------------------------------------------------------------------------
// Server → client
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    Connected {
        #[serde(default)]
        conversation_id: Option<String>,
        #[serde(default)]
        message: Option<String>,
    },
    Thinking {
        #[serde(default)]
        message: Option<String>,
        /// Reasoning text shown as a collapsible note.
        #[serde(default)]
        content: Option<String>,
    },
    ToolCall {
        tool: String,
        #[serde(default)]
        arguments: Value,
        #[serde(default)]
        tool_call_id: Option<String>,
    },
    ApprovalRequired {
        tool: String,
        #[serde(default)]
        arguments: Value,
        #[serde(default)]
        message: Option<String>,
        #[serde(default, alias = "tool_id")]
        tool_call_id: Option<String>,
    },
    ToolResult {
        #[serde(default)]
        tool: Option<String>,
        #[serde(default = "default_success")]
        success: bool,
        #[serde(default)]
        result: Option<Value>,
        #[serde(default)]
        error: Option<String>,
        #[serde(default)]
        tool_call_id: Option<String>,
    },
    MessageChunk {
        content: String,
    },
    Done {
        #[serde(default)]
        iterations: Option<u32>,
    },
    Error {
        #[serde(default)]
        error: Option<String>,
        #[serde(default)]
        message: Option<String>,
    },
}

fn default_success() -> bool {
    true
}

impl SessionEvent {
    /// Parse one channel frame. Unknown kinds and missing required fields
    /// are distinguished so callers can log them precisely.
    pub fn parse(frame: &str) -> Result<Self, ProtocolError> {
        let value: Value = serde_json::from_str(frame).map_err(ProtocolError::InvalidJson)?;
        Self::from_value(value)
    }

    pub fn from_value(value: Value) -> Result<Self, ProtocolError> {
        let kind = value
            .get("type")
            .and_then(|v| v.as_str())
            .ok_or(ProtocolError::MissingType)?
            .to_string();
        if !EVENT_KINDS.contains(&kind.as_str()) {
            return Err(ProtocolError::UnknownKind(kind));
        }
        serde_json::from_value(value).map_err(|source| ProtocolError::Malformed { kind, source })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            SessionEvent::Connected { .. } => "connected",
            SessionEvent::Thinking { .. } => "thinking",
            SessionEvent::ToolCall { .. } => "tool_call",
            SessionEvent::ApprovalRequired { .. } => "approval_required",
            SessionEvent::ToolResult { .. } => "tool_result",
            SessionEvent::MessageChunk { .. } => "message_chunk",
            SessionEvent::Done { .. } => "done",
            SessionEvent::Error { .. } => "error",
        }
    }
}

// ---------------------------------------------------------------------------
// Client → server
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ClientMessage {
    UserMessage { message: String },
    ApprovalResponse {
        #[serde(rename = "type")]
        kind: ApprovalResponseTag,
        approved: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalResponseTag {
    ApprovalResponse,
}

impl ClientMessage {
    pub fn user(message: impl Into<String>) -> Self {
        ClientMessage::UserMessage {
            message: message.into(),
        }
    }

    pub fn approval(approved: bool) -> Self {
        ClientMessage::ApprovalResponse {
            kind: ApprovalResponseTag::ApprovalResponse,
            approved,
        }
    }

    pub fn to_json(&self) -> String {
        // Plain strings and bools only; serialization cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }
}

// ---------------------------------------------------------------------------
// REST payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ConversationSummary {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub message_count: u64,
    pub updated_at: String,
    #[serde(default)]
    pub created_at: Option<String>,
}

impl ConversationSummary {
    pub fn display_title(&self) -> &str {
        match self.title.as_deref() {
            Some(t) if !t.trim().is_empty() => t,
            _ => &self.id,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Default)]
pub struct ConversationList {
    #[serde(default)]
    pub conversations: Vec<ConversationSummary>,
    #[serde(default)]
    pub total: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct HistoryMessage {
    pub role: String,
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Default)]
pub struct History {
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub messages: Vec<HistoryMessage>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AutonomyLevel {
    Full,
    Semi,
}

impl std::str::FromStr for AutonomyLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "full" => Ok(AutonomyLevel::Full),
            "semi" => Ok(AutonomyLevel::Semi),
            other => Err(format!("unknown autonomy level '{other}' (expected full|semi)")),
        }
    }
}

/// Agent configuration as reported by `GET /api/config/`.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct AgentConfig {
    pub llm_provider: String,
    pub model: String,
    /// Kept as text: the backend may report levels this client cannot set.
    pub autonomy_level: String,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub max_tokens: Option<u64>,
    #[serde(default)]
    pub tools_count: Option<u64>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Default)]
pub struct ConfigUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub llm_provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub autonomy_level: Option<AutonomyLevel>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub api_keys: BTreeMap<String, String>,
}

impl ConfigUpdate {
    pub fn is_empty(&self) -> bool {
        self.llm_provider.is_none()
            && self.model.is_none()
            && self.autonomy_level.is_none()
            && self.api_keys.is_empty()
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ToolCallInfo {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

/// `POST /api/chat` response, used when the session channel is down.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ChatResponse {
    pub conversation_id: String,
    pub message: String,
    #[serde(default)]
    pub tool_calls: Option<Vec<ToolCallInfo>>,
    #[serde(default)]
    pub iterations: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct HealthResponse {
    pub status: String,
    #[serde(default)]
    pub service: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Default)]
pub struct ModelList {
    #[serde(default)]
    pub models: Vec<String>,
}
