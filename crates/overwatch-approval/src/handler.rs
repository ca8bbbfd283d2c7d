//! The approval handler contract.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use overwatch_core::RiskLevel;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::ApprovalResult;

/// A pending approval, serialized verbatim as the webhook body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRequest {
    /// 128-bit random id, lowercase hex.
    pub id: String,
    /// When the request was raised (ISO-8601 on the wire).
    pub timestamp: DateTime<Utc>,
    /// Upstream server name, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server: Option<String>,
    /// The tool awaiting approval.
    pub tool: String,
    /// The invocation arguments.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub args: Option<Value>,
    /// Risk classification from the policy decision.
    pub risk_level: RiskLevel,
    /// Why the call needs approval.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl ApprovalRequest {
    /// Start a request for a tool at a risk level.
    #[must_use]
    pub fn new(tool: impl Into<String>, risk_level: RiskLevel) -> Self {
        Self {
            id: Uuid::new_v4().simple().to_string(),
            timestamp: Utc::now(),
            server: None,
            tool: tool.into(),
            args: None,
            risk_level,
            reason: None,
        }
    }

    /// Attach the server name.
    #[must_use]
    pub fn server(mut self, server: impl Into<String>) -> Self {
        self.server = Some(server.into());
        self
    }

    /// Attach the invocation arguments.
    #[must_use]
    pub fn args(mut self, args: Value) -> Self {
        self.args = Some(args);
        self
    }

    /// Attach the reason.
    #[must_use]
    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

/// How long an approval should keep matching future calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionDuration {
    /// Only this call.
    #[serde(rename = "once")]
    Once,
    /// Five minutes.
    #[serde(rename = "5min")]
    FiveMin,
    /// Fifteen minutes.
    #[serde(rename = "15min")]
    FifteenMin,
    /// The rest of the session.
    #[serde(rename = "session")]
    Session,
}

/// The approver's decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalResponse {
    /// Whether the call may proceed.
    pub approved: bool,
    /// When present, a session grant of this duration is created so
    /// matching calls skip the prompt.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_duration: Option<SessionDuration>,
    /// Free-form explanation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl ApprovalResponse {
    /// A plain approval.
    #[must_use]
    pub fn approved() -> Self {
        Self {
            approved: true,
            session_duration: None,
            reason: None,
        }
    }

    /// A denial with a reason.
    #[must_use]
    pub fn denied(reason: impl Into<String>) -> Self {
        Self {
            approved: false,
            session_duration: None,
            reason: Some(reason.into()),
        }
    }
}

/// Async request/response approval contract.
#[async_trait]
pub trait ApprovalHandler: Send + Sync {
    /// Ask for a decision on one call.
    ///
    /// # Errors
    ///
    /// Implementations may raise on transport failure; the proxy then
    /// falls back to its fail mode. The webhook implementation fails
    /// closed instead.
    async fn request_approval(&self, request: &ApprovalRequest) -> ApprovalResult<ApprovalResponse>;

    /// Release any held resources. Idempotent.
    async fn close(&self);
}

/// Test approver that always answers the same way.
#[derive(Debug, Clone)]
pub struct StaticApprover {
    response: ApprovalResponse,
}

impl StaticApprover {
    /// An approver that approves everything.
    #[must_use]
    pub fn approve_all() -> Self {
        Self {
            response: ApprovalResponse::approved(),
        }
    }

    /// An approver that approves everything and asks for a session
    /// grant of the given duration.
    #[must_use]
    pub fn approve_with_session(duration: SessionDuration) -> Self {
        Self {
            response: ApprovalResponse {
                approved: true,
                session_duration: Some(duration),
                reason: None,
            },
        }
    }

    /// An approver that denies everything.
    #[must_use]
    pub fn deny_all() -> Self {
        Self {
            response: ApprovalResponse::denied("denied by static approver"),
        }
    }
}

#[async_trait]
impl ApprovalHandler for StaticApprover {
    async fn request_approval(
        &self,
        _request: &ApprovalRequest,
    ) -> ApprovalResult<ApprovalResponse> {
        Ok(self.response.clone())
    }

    async fn close(&self) {}
}
