//! Wire types for the agent session protocol

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Event type signalling that a session finished its turn
pub const EVENT_SESSION_IDLE: &str = "session.idle";
/// Event type carrying a session status change
pub const EVENT_SESSION_STATUS: &str = "session.status";
/// Event type reporting a session-level failure
pub const EVENT_SESSION_ERROR: &str = "session.error";
/// Event types asking the operator to authorize an action
pub const EVENT_PERMISSION_TYPES: [&str; 2] = ["permission.updated", "permission.asked"];

// ============================================================================
// SessionEvent
// ============================================================================

/// One decoded SSE frame
///
/// `event_type` comes from the frame's `event:` field, falling back to the
/// payload's own `type` field. `data` is the decoded JSON payload, untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: Value,
}

impl SessionEvent {
    pub fn new(event_type: impl Into<String>, data: Value) -> Self {
        Self {
            event_type: event_type.into(),
            data,
        }
    }

    /// The `properties` object when the payload wraps one, else the payload
    pub fn properties(&self) -> &Value {
        match self.data.get("properties") {
            Some(props) if props.is_object() => props,
            _ => &self.data,
        }
    }

    /// Look a field up at the top level, then under `properties`
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.data
            .get(key)
            .or_else(|| self.data.get("properties").and_then(|p| p.get(key)))
    }

    /// Session this event belongs to, if it names one
    pub fn session_id(&self) -> Option<&str> {
        self.field("sessionID")
            .or_else(|| self.field("sessionId"))
            .and_then(Value::as_str)
            .or_else(|| {
                self.properties()
                    .get("part")
                    .and_then(|part| part.get("sessionID"))
                    .and_then(Value::as_str)
            })
    }

    /// Whether the event concerns `session_id` (events naming no session match)
    pub fn concerns(&self, session_id: &str) -> bool {
        self.session_id().map_or(true, |id| id == session_id)
    }

    /// `status.type` of a `session.status` event
    pub fn status(&self) -> Option<SessionStatusKind> {
        self.field("status")
            .and_then(|status| status.get("type"))
            .and_then(Value::as_str)
            .map(SessionStatusKind::from)
    }

    pub fn is_idle(&self) -> bool {
        self.event_type == EVENT_SESSION_IDLE
    }

    pub fn is_status(&self) -> bool {
        self.event_type == EVENT_SESSION_STATUS
    }

    pub fn is_error(&self) -> bool {
        self.event_type == EVENT_SESSION_ERROR
    }

    pub fn is_permission_request(&self) -> bool {
        EVENT_PERMISSION_TYPES.contains(&self.event_type.as_str())
    }

    /// Human-readable message of a `session.error` event
    pub fn error_message(&self) -> Option<String> {
        let error = self.field("error")?;
        if let Some(text) = error.as_str() {
            return Some(text.to_string());
        }
        error
            .get("data")
            .and_then(|d| d.get("message"))
            .or_else(|| error.get("message"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| error.get("name").and_then(Value::as_str).map(str::to_string))
    }

    /// Decode a permission prompt carried by this event
    pub fn permission_request(&self) -> Option<PermissionRequest> {
        if !self.is_permission_request() {
            return None;
        }
        let props = self.properties();
        let id = props.get("id").and_then(Value::as_str)?.to_string();
        let text = |key: &str| props.get(key).and_then(Value::as_str).map(str::to_string);

        Some(PermissionRequest {
            id,
            session_id: self.session_id().map(str::to_string),
            kind: text("type").or_else(|| text("permission")),
            title: text("title"),
            raw: props.clone(),
        })
    }
}

// ============================================================================
// SessionStatusKind
// ============================================================================

/// Status reported in `session.status` events
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionStatusKind {
    Idle,
    Busy,
    Running,
    Retry,
    Other(String),
}

impl SessionStatusKind {
    /// The session is actively working on a prompt
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Busy | Self::Running | Self::Retry)
    }
}

impl From<&str> for SessionStatusKind {
    fn from(s: &str) -> Self {
        match s {
            "idle" => Self::Idle,
            "busy" => Self::Busy,
            "running" => Self::Running,
            "retry" => Self::Retry,
            other => Self::Other(other.to_string()),
        }
    }
}

// ============================================================================
// Permissions
// ============================================================================

/// A permission prompt raised by the agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PermissionRequest {
    pub id: String,
    pub session_id: Option<String>,
    pub kind: Option<String>,
    pub title: Option<String>,
    /// Full event properties, for policies that need more detail
    pub raw: Value,
}

/// Answer to a permission prompt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionResponse {
    /// Allow this one request
    Once,
    /// Allow this and matching future requests
    Always,
    /// Deny the request
    Reject,
}

impl PermissionResponse {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Once => "once",
            Self::Always => "always",
            Self::Reject => "reject",
        }
    }
}

impl fmt::Display for PermissionResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PermissionResponse {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "once" => Ok(Self::Once),
            "always" => Ok(Self::Always),
            "reject" => Ok(Self::Reject),
            other => Err(format!("unknown permission response: {}", other)),
        }
    }
}

// ============================================================================
// Prompt parts
// ============================================================================

/// One part of a prompt sent to the agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PromptPart {
    Text { text: String },
}

impl PromptPart {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_session_id_lookup() {
        let flat = SessionEvent::new("session.status", json!({"sessionID": "s1"}));
        assert_eq!(flat.session_id(), Some("s1"));

        let wrapped = SessionEvent::new(
            "message.part.updated",
            json!({"properties": {"part": {"sessionID": "s2"}}}),
        );
        assert_eq!(wrapped.session_id(), Some("s2"));

        let none = SessionEvent::new("server.connected", json!({}));
        assert_eq!(none.session_id(), None);
        assert!(none.concerns("anything"));
        assert!(!flat.concerns("other"));
    }

    #[test]
    fn test_status_kind() {
        let event = SessionEvent::new(
            "session.status",
            json!({"properties": {"sessionID": "s1", "status": {"type": "busy"}}}),
        );
        assert_eq!(event.status(), Some(SessionStatusKind::Busy));
        assert!(event.status().unwrap().is_active());
        assert!(!SessionStatusKind::Idle.is_active());
    }

    #[test]
    fn test_error_message_variants() {
        let nested = SessionEvent::new(
            "session.error",
            json!({"properties": {"error": {"name": "APIError", "data": {"message": "quota"}}}}),
        );
        assert_eq!(nested.error_message().as_deref(), Some("quota"));

        let named = SessionEvent::new("session.error", json!({"error": {"name": "Aborted"}}));
        assert_eq!(named.error_message().as_deref(), Some("Aborted"));
    }

    #[test]
    fn test_permission_request_decoding() {
        let event = SessionEvent::new(
            "permission.updated",
            json!({"properties": {"id": "p1", "sessionID": "s1", "type": "bash", "title": "run ls"}}),
        );
        let request = event.permission_request().unwrap();
        assert_eq!(request.id, "p1");
        assert_eq!(request.session_id.as_deref(), Some("s1"));
        assert_eq!(request.kind.as_deref(), Some("bash"));

        let other = SessionEvent::new("session.idle", json!({"properties": {"id": "x"}}));
        assert!(other.permission_request().is_none());
    }

    #[test]
    fn test_wire_shapes() {
        assert_eq!(
            serde_json::to_value(PromptPart::text("hi")).unwrap(),
            json!({"type": "text", "text": "hi"})
        );
        assert_eq!(
            serde_json::to_value(PermissionResponse::Always).unwrap(),
            json!("always")
        );
        assert_eq!("Reject".parse::<PermissionResponse>(), Ok(PermissionResponse::Reject));
    }
}
