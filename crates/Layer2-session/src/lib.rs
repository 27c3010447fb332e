//! # agentbox-session
//!
//! Client for the coding agent server running inside a task container.
//!
//! ## Features
//!
//! - `SessionClient` trait with a `reqwest` implementation (`HttpSessionClient`)
//! - Permissive status handling for prompt dispatch and permission replies
//! - Incremental SSE decoder (`SseDecoder`) with a cap on unterminated frames
//! - Background event reader delivering decoded events in wire order

pub mod client;
pub mod error;
pub mod reader;
pub mod sse;
pub mod types;

pub use client::{HttpSessionClient, HttpSessionClientConfig, SessionClient};
pub use error::{SessionError, SessionResult};
pub use reader::{forward_stream, forward_stream_with_limit, EventReader, EventSender};
pub use sse::{parse_sse_chunk, SseDecoder, MAX_PENDING_FRAME_BYTES};
pub use types::{PermissionRequest, PermissionResponse, PromptPart, SessionEvent, SessionStatusKind};
