//! Human-readable event output

use agentbox_session::{PermissionRequest, SessionEvent};
use agentbox_task::{Task, TaskEvent};
use serde_json::Value;

pub fn print_event(event: &TaskEvent) {
    match event {
        TaskEvent::Status { status, error } => match error {
            Some(error) => println!("{} {} ({})", status.symbol(), status, error),
            None => println!("{} {}", status.symbol(), status),
        },
        TaskEvent::Session { event } => {
            if let Some(line) = describe(event) {
                println!("  {}", line);
            }
        }
    }
}

/// One line for the agent events worth showing; `None` for the rest
fn describe(event: &SessionEvent) -> Option<String> {
    match event.event_type.as_str() {
        "message.part.updated" => {
            let part = event.properties().get("part")?;
            match part.get("type").and_then(Value::as_str)? {
                "text" => None,
                "tool" => {
                    let tool = part.get("tool").and_then(Value::as_str).unwrap_or("tool");
                    let state = part
                        .get("state")
                        .and_then(|s| s.get("status"))
                        .and_then(Value::as_str)
                        .unwrap_or("running");
                    Some(format!("[{}] {}", tool, state))
                }
                other => Some(format!("[{}]", other)),
            }
        }
        "message.updated" => None,
        "session.status" => event
            .status()
            .map(|status| format!("session {:?}", status).to_lowercase()),
        "session.idle" => Some("session idle".to_string()),
        "session.error" => Some(format!(
            "error: {}",
            event.error_message().unwrap_or_else(|| "unknown".to_string())
        )),
        other if event.is_permission_request() => Some(format!("{} requested", other)),
        other => Some(other.to_string()),
    }
}

pub fn permission_prompt(request: &PermissionRequest) -> String {
    format!(
        "  ? {} [{}] allow? y = once, a = always, anything else rejects",
        truncate(request.title.as_deref().unwrap_or(&request.id), 80),
        request.kind.as_deref().unwrap_or("permission"),
    )
}

pub fn summary(task: &Task) -> String {
    let duration = task
        .duration()
        .map(|d| format!(" in {:.1}s", d.as_secs_f64()))
        .unwrap_or_default();

    match &task.error {
        Some(error) => format!("Task {} {}{}: {}", task.id.short(), task.status, duration, error),
        None => format!("Task {} {}{}", task.id.short(), task.status, duration),
    }
}

/// Truncate a string for display
fn truncate(s: &str, max_len: usize) -> String {
    let s = s.replace('\n', " ");
    if s.chars().count() <= max_len {
        s
    } else {
        let cut: String = s.chars().take(max_len).collect();
        format!("{}...", cut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_describe_tool_part() {
        let event = SessionEvent::new(
            "message.part.updated",
            json!({"properties": {"part": {"type": "tool", "tool": "bash", "state": {"status": "completed"}}}}),
        );
        assert_eq!(describe(&event).as_deref(), Some("[bash] completed"));
    }

    #[test]
    fn test_describe_skips_text_deltas() {
        let event = SessionEvent::new(
            "message.part.updated",
            json!({"properties": {"part": {"type": "text", "text": "hello"}}}),
        );
        assert_eq!(describe(&event), None);
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("line\nbreak", 20), "line break");
        assert_eq!(truncate("abcdefghij", 4), "abcd...");
    }
}
