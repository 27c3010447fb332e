//! Run a single task and follow it until it is terminal

use crate::render;
use agentbox_foundation::AgentboxConfig;
use agentbox_session::PermissionResponse;
use agentbox_task::{
    AutoApprove, EventBus, PermissionPolicy, SurfaceToOperator, Task, TaskEvent, TaskManager,
};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{broadcast::error::RecvError, mpsc};
use tracing::warn;

pub struct RunOptions {
    pub instruction: String,
    pub owner: String,
    pub auto_approve: bool,
    pub json: bool,
}

/// Admit the instruction, stream its events and return the final task
pub async fn run_task(config: &AgentboxConfig, options: RunOptions) -> anyhow::Result<Task> {
    let bus = Arc::new(EventBus::new());
    let mut events = bus.subscribe();

    let permissions: Arc<dyn PermissionPolicy> = if options.auto_approve {
        Arc::new(AutoApprove::default())
    } else {
        Arc::new(SurfaceToOperator)
    };
    let manager = TaskManager::from_config(config, permissions, bus.clone())?;

    let task = manager
        .create_task(&options.instruction, &options.owner)
        .await?;
    if !options.json {
        println!("Task {} admitted ({})\n", task.id.short(), config.container.image);
    }

    // Operator answers to permission prompts, one line each
    let interactive = !options.auto_approve && !options.json;
    let mut answers = if interactive {
        spawn_stdin_reader()
    } else {
        mpsc::unbounded_channel().1
    };
    let mut pending: VecDeque<String> = VecDeque::new();

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut cancelling = false;

    loop {
        tokio::select! {
            received = events.recv() => match received {
                Ok(envelope) if envelope.task_id == task.id => {
                    if options.json {
                        println!("{}", serde_json::to_string(&envelope)?);
                    } else {
                        render::print_event(&envelope.event);
                    }

                    if let TaskEvent::Session { event } = &envelope.event {
                        if let (true, Some(request)) = (interactive, event.permission_request()) {
                            println!("{}", render::permission_prompt(&request));
                            pending.push_back(request.id);
                        }
                    }

                    if envelope.event.terminal_status().is_some() {
                        break;
                    }
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Skipped {} events", skipped);
                    // The terminal status may have been among them
                    let current = manager.get_task(task.id, &options.owner).await;
                    if finished_after_lag(&current) {
                        break;
                    }
                }
                Err(RecvError::Closed) => break,
            },
            Some(line) = answers.recv() => {
                if let Some(permission_id) = pending.pop_front() {
                    let response = parse_answer(&line);
                    if let Err(e) = manager
                        .reply_permission(task.id, &options.owner, &permission_id, response)
                        .await
                    {
                        warn!("Could not answer {}: {}", permission_id, e);
                    }
                }
            },
            _ = &mut ctrl_c, if !cancelling => {
                cancelling = true;
                eprintln!("\nCancelling task {}...", task.id.short());
                if let Err(e) = manager.cancel_task(task.id, &options.owner).await {
                    warn!("Cancel failed: {}", e);
                }
            },
        }
    }

    let finished = manager.get_task(task.id, &options.owner).await?;
    if !options.json {
        println!("\n{}", render::summary(&finished));
    }
    Ok(finished)
}

fn spawn_stdin_reader() -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if tx.send(line).is_err() {
                break;
            }
        }
    });

    rx
}

/// Whether a task looked up after missed events has already ended
fn finished_after_lag(current: &agentbox_foundation::Result<Task>) -> bool {
    match current {
        Ok(task) => task.is_terminal(),
        Err(e) => {
            warn!("Could not refresh task after missed events: {}", e);
            false
        }
    }
}

/// `y` once, `a` always, anything else rejects
fn parse_answer(line: &str) -> PermissionResponse {
    match line.trim().to_ascii_lowercase().as_str() {
        "y" | "yes" | "once" => PermissionResponse::Once,
        "a" | "always" => PermissionResponse::Always,
        _ => PermissionResponse::Reject,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentbox_foundation::Error;
    use agentbox_task::TaskStatus;

    #[test]
    fn test_missed_terminal_status_ends_the_wait() {
        let mut task = Task::new("refactor", "local");
        task.status = TaskStatus::Running;
        assert!(!finished_after_lag(&Ok(task.clone())));

        for status in [TaskStatus::Completed, TaskStatus::Failed, TaskStatus::Cancelled] {
            task.status = status;
            assert!(finished_after_lag(&Ok(task.clone())), "{}", status);
        }

        let missing: agentbox_foundation::Result<Task> =
            Err(Error::NotFound("Task gone".to_string()));
        assert!(!finished_after_lag(&missing));
    }

    #[test]
    fn test_parse_answer() {
        assert_eq!(parse_answer("y"), PermissionResponse::Once);
        assert_eq!(parse_answer(" Yes \n"), PermissionResponse::Once);
        assert_eq!(parse_answer("a"), PermissionResponse::Always);
        assert_eq!(parse_answer(""), PermissionResponse::Reject);
        assert_eq!(parse_answer("no"), PermissionResponse::Reject);
    }
}
