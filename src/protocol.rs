use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A correlation id for an outgoing command. Unique within one browser
/// session's lifetime, monotonically increasing.
pub type CallId = u64;

/// An outgoing request frame: `{id, method, params[, sessionId]}`.
#[derive(Debug, Clone, Serialize)]
pub struct Command {
    pub id: CallId,
    pub method: String,
    pub params: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(rename = "sessionId")]
    pub session_id: Option<String>,
}

/// An incoming response frame, successful or not.
#[derive(Debug, Clone, Deserialize)]
pub struct Response {
    pub id: CallId,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<ProtocolErrorBody>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProtocolErrorBody {
    pub code: Option<i64>,
    #[serde(default)]
    pub message: String,
}

/// An incoming event frame.
#[derive(Debug, Clone, Deserialize)]
pub struct Event {
    pub method: String,
    #[serde(default)]
    pub params: Value,
    #[serde(default)]
    #[serde(rename = "sessionId")]
    pub session_id: Option<String>,
}

/// Frames arriving on the duplex channel are either a response to a
/// previously-sent command (keyed by `id`) or an unsolicited event (keyed
/// by `method`). Matches chromeoxid_types's untagged `Message<T>` split.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Message {
    Response(Response),
    Event(Event),
}

/// Events that are expected but uninteresting, or only mean "this session
/// is going away" — dropped silently rather than logged as unmatched.
pub fn is_benign_unmatched_event(method: &str) -> bool {
    matches!(method, "Inspector.detached" | "Page.frameDetached")
}
