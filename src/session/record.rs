use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// One executed tool call, in session execution order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionRecord {
    pub tool_name: String,
    pub arguments: Map<String, Value>,
    pub timestamp: DateTime<Utc>,
    pub result_summary: String,
}

impl ActionRecord {
    pub fn new(tool_name: &str, arguments: Map<String, Value>, result_summary: String) -> Self {
        Self {
            tool_name: tool_name.to_string(),
            arguments,
            timestamp: Utc::now(),
            result_summary,
        }
    }
}

/// Stable reference to something a session produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ArtifactRef {
    /// Path or storage key owned by the backend
    Path { path: String },
    /// Small payload kept in memory, base64-encoded
    Inline { mime_type: String, data: String },
}

impl ArtifactRef {
    pub fn path(path: impl Into<String>) -> Self {
        ArtifactRef::Path { path: path.into() }
    }

    pub fn inline(mime_type: &str, bytes: &[u8]) -> Self {
        use base64::Engine;
        ArtifactRef::Inline {
            mime_type: mime_type.to_string(),
            data: base64::engine::general_purpose::STANDARD.encode(bytes),
        }
    }

    /// Wraps data that is already base64-encoded.
    pub fn inline_base64(mime_type: &str, data: String) -> Self {
        ArtifactRef::Inline {
            mime_type: mime_type.to_string(),
            data,
        }
    }

    pub fn decode_inline(&self) -> Option<Vec<u8>> {
        use base64::Engine;
        match self {
            ArtifactRef::Inline { data, .. } => {
                base64::engine::general_purpose::STANDARD.decode(data).ok()
            }
            ArtifactRef::Path { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Active,
    Closed,
}

/// Point-in-time copy of a session, safe to hand to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub state: SessionState,
    pub actions: Vec<ActionRecord>,
    pub artifacts: BTreeMap<String, ArtifactRef>,
}

/// Listing entry without the action log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub state: SessionState,
    pub action_count: usize,
    pub artifact_count: usize,
}

impl From<&SessionSnapshot> for SessionSummary {
    fn from(snapshot: &SessionSnapshot) -> Self {
        Self {
            session_id: snapshot.session_id.clone(),
            created_at: snapshot.created_at,
            last_activity: snapshot.last_activity,
            state: snapshot.state,
            action_count: snapshot.actions.len(),
            artifact_count: snapshot.artifacts.len(),
        }
    }
}
