//! Session protocol client
//!
//! Talks to the coding agent server published by a task container:
//!
//! | Call | Request | Accepted |
//! |------|---------|----------|
//! | `health` | `GET /global/health` | any 2xx |
//! | `create_session` | `POST /session` | any 2xx, body `{"id": ...}` |
//! | `send_prompt_async` | `POST /session/{id}/prompt_async` | 200, 202, 204 |
//! | `abort_session` | `POST /session/{id}/abort` | any 2xx, body `bool` |
//! | `reply_permission` | `POST /session/{id}/permissions/{pid}` | 200, 204 |
//! | `subscribe_events` | `GET /event` (SSE) | any 2xx |
//!
//! The upstream server has answered prompt dispatch and permission replies
//! with different codes across versions, so those accept every code it has
//! been seen to use.

use crate::error::{SessionError, SessionResult};
use crate::reader::{forward_stream, EventReader, EventSender};
use crate::types::{PermissionResponse, PromptPart};
use async_trait::async_trait;
use reqwest::header::ACCEPT;
use reqwest::{Client, Response};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, info, warn};

const PROMPT_ACCEPTED: &[u16] = &[200, 202, 204];
const PERMISSION_ACCEPTED: &[u16] = &[200, 204];

// ============================================================================
// SessionClient trait
// ============================================================================

/// Client for the in-container agent API
#[async_trait]
pub trait SessionClient: Send + Sync {
    /// Single readiness check
    async fn health(&self, base_url: &str) -> SessionResult<()>;

    /// Create a session, returning its id
    async fn create_session(&self, base_url: &str) -> SessionResult<String>;

    /// Dispatch a prompt without waiting for the agent to finish
    async fn send_prompt_async(
        &self,
        base_url: &str,
        session_id: &str,
        parts: &[PromptPart],
    ) -> SessionResult<()>;

    /// Ask the agent to stop working on the session
    async fn abort_session(&self, base_url: &str, session_id: &str) -> SessionResult<bool>;

    /// Answer a permission prompt
    async fn reply_permission(
        &self,
        base_url: &str,
        session_id: &str,
        permission_id: &str,
        response: PermissionResponse,
    ) -> SessionResult<()>;

    /// Open the event stream on a dedicated task, delivering into `sink`
    fn subscribe_events(&self, base_url: &str, sink: EventSender) -> EventReader;
}

// ============================================================================
// HttpSessionClient
// ============================================================================

/// Settings for `HttpSessionClient`
#[derive(Debug, Clone)]
pub struct HttpSessionClientConfig {
    /// Timeout for every non-streaming call
    pub request_timeout: Duration,
    /// Timeout for establishing a connection (streaming included)
    pub connect_timeout: Duration,
    /// Path of the readiness endpoint
    pub health_path: String,
}

impl Default for HttpSessionClientConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(5),
            health_path: "/global/health".to_string(),
        }
    }
}

impl HttpSessionClientConfig {
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_health_path(mut self, path: impl Into<String>) -> Self {
        self.health_path = path.into();
        self
    }
}

/// `reqwest`-backed session client
#[derive(Debug, Clone)]
pub struct HttpSessionClient {
    client: Client,
    config: HttpSessionClientConfig,
}

#[derive(Debug, Deserialize)]
struct CreatedSession {
    id: String,
}

impl HttpSessionClient {
    pub fn new(config: HttpSessionClientConfig) -> SessionResult<Self> {
        // No client-wide timeout: it would cut the event stream short
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| SessionError::Transport(e.to_string()))?;

        Ok(Self { client, config })
    }

    fn url(base_url: &str, path: &str) -> String {
        format!("{}{}", base_url.trim_end_matches('/'), path)
    }

    async fn post(&self, url: String, body: serde_json::Value) -> SessionResult<Response> {
        Ok(self
            .client
            .post(url)
            .timeout(self.config.request_timeout)
            .json(&body)
            .send()
            .await?)
    }
}

/// Pass the response through if its status is accepted
async fn accept(
    response: Response,
    endpoint: &'static str,
    accepted: Option<&[u16]>,
) -> SessionResult<Response> {
    let status = response.status();
    let ok = match accepted {
        Some(codes) => codes.contains(&status.as_u16()),
        None => status.is_success(),
    };

    if ok {
        Ok(response)
    } else {
        let body = response.text().await.unwrap_or_default();
        Err(SessionError::status(endpoint, status.as_u16(), body))
    }
}

#[async_trait]
impl SessionClient for HttpSessionClient {
    async fn health(&self, base_url: &str) -> SessionResult<()> {
        let response = self
            .client
            .get(Self::url(base_url, &self.config.health_path))
            .timeout(self.config.request_timeout)
            .send()
            .await?;

        accept(response, "health", None).await?;
        Ok(())
    }

    async fn create_session(&self, base_url: &str) -> SessionResult<String> {
        let response = self.post(Self::url(base_url, "/session"), json!({})).await?;
        let response = accept(response, "session", None).await?;

        let created: CreatedSession = response
            .json()
            .await
            .map_err(|e| SessionError::invalid("session", e.to_string()))?;

        debug!("Created session {}", created.id);
        Ok(created.id)
    }

    async fn send_prompt_async(
        &self,
        base_url: &str,
        session_id: &str,
        parts: &[PromptPart],
    ) -> SessionResult<()> {
        let url = Self::url(base_url, &format!("/session/{}/prompt_async", session_id));
        let response = self.post(url, json!({ "parts": parts })).await?;
        accept(response, "prompt_async", Some(PROMPT_ACCEPTED)).await?;

        debug!("Prompt dispatched to session {}", session_id);
        Ok(())
    }

    async fn abort_session(&self, base_url: &str, session_id: &str) -> SessionResult<bool> {
        let url = Self::url(base_url, &format!("/session/{}/abort", session_id));
        let response = self.post(url, json!({})).await?;
        let response = accept(response, "abort", None).await?;

        let body = response.text().await?;
        if body.trim().is_empty() {
            return Ok(true);
        }
        serde_json::from_str::<bool>(body.trim())
            .map_err(|e| SessionError::invalid("abort", e.to_string()))
    }

    async fn reply_permission(
        &self,
        base_url: &str,
        session_id: &str,
        permission_id: &str,
        response: PermissionResponse,
    ) -> SessionResult<()> {
        let url = Self::url(
            base_url,
            &format!("/session/{}/permissions/{}", session_id, permission_id),
        );
        let reply = self.post(url, json!({ "response": response })).await?;
        accept(reply, "permissions", Some(PERMISSION_ACCEPTED)).await?;

        debug!(
            "Replied {} to permission {} on session {}",
            response, permission_id, session_id
        );
        Ok(())
    }

    fn subscribe_events(&self, base_url: &str, sink: EventSender) -> EventReader {
        let client = self.client.clone();
        let url = Self::url(base_url, "/event");

        EventReader::spawn(async move {
            let response = match client
                .get(&url)
                .header(ACCEPT, "text/event-stream")
                .send()
                .await
            {
                Ok(response) => response,
                Err(e) => {
                    warn!("Event subscription to {} failed: {}", url, e);
                    return;
                }
            };

            if !response.status().is_success() {
                warn!(
                    "Event subscription to {} rejected with {}",
                    url,
                    response.status()
                );
                return;
            }

            info!("Event stream opened: {}", url);
            match forward_stream(response.bytes_stream(), &sink).await {
                Ok(forwarded) => info!("Event stream closed after {} events: {}", forwarded, url),
                Err(e) => warn!("Event stream ended early: {}: {}", url, e),
            }
        })
    }
}
