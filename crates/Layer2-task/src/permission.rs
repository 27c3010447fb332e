//! Permission prompt handling
//!
//! The agent asks before running tools it considers sensitive. A runner
//! consults its `PermissionPolicy` for every prompt: either answer it
//! immediately or leave it for the operator, who can answer later through
//! `TaskManager::reply_permission`.

use agentbox_session::{PermissionRequest, PermissionResponse};

/// What to do with a permission prompt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionDecision {
    /// Answer right away
    Reply(PermissionResponse),
    /// Leave unanswered for the operator
    Surface,
}

pub trait PermissionPolicy: Send + Sync {
    fn decide(&self, request: &PermissionRequest) -> PermissionDecision;
}

/// Approve every prompt with a fixed response
#[derive(Debug, Clone, Copy)]
pub struct AutoApprove {
    response: PermissionResponse,
}

impl AutoApprove {
    pub fn new(response: PermissionResponse) -> Self {
        Self { response }
    }
}

impl Default for AutoApprove {
    fn default() -> Self {
        Self::new(PermissionResponse::Once)
    }
}

impl PermissionPolicy for AutoApprove {
    fn decide(&self, _request: &PermissionRequest) -> PermissionDecision {
        PermissionDecision::Reply(self.response)
    }
}

/// Never answer; every prompt waits for the operator
#[derive(Debug, Clone, Copy, Default)]
pub struct SurfaceToOperator;

impl PermissionPolicy for SurfaceToOperator {
    fn decide(&self, _request: &PermissionRequest) -> PermissionDecision {
        PermissionDecision::Surface
    }
}

impl<F> PermissionPolicy for F
where
    F: Fn(&PermissionRequest) -> PermissionDecision + Send + Sync,
{
    fn decide(&self, request: &PermissionRequest) -> PermissionDecision {
        self(request)
    }
}
