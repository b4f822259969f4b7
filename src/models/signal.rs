//! Records owned by collaborating stores.
//!
//! The engine reads these to evaluate phase gates. They are written by
//! upstream systems (requirements authoring, test runners, handoff tooling).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================
// Requirements documents
// ============================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RequirementsDoc {
    pub id: Uuid,
    pub directive_id: Uuid,
    pub status: PrdStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PrdStatus {
    Draft,
    Planning,
    InProgress,
    Accepted,
    Approved,
    Rejected,
}

impl PrdStatus {
    /// Statuses that satisfy the PLAN requirements gate.
    pub const ACCEPTABLE: [PrdStatus; 3] = [Self::Accepted, Self::InProgress, Self::Approved];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Planning => "planning",
            Self::InProgress => "in_progress",
            Self::Accepted => "accepted",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(Self::Draft),
            "planning" => Some(Self::Planning),
            "in_progress" => Some(Self::InProgress),
            "accepted" => Some(Self::Accepted),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateRequirementsDocInput {
    pub status: PrdStatus,
}

// ============================================================
// Deliverables
// ============================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Deliverable {
    pub id: Uuid,
    pub directive_id: Uuid,
    pub name: String,
    pub priority: DeliverablePriority,
    pub completion_status: CompletionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Deliverable {
    /// Required and high-priority deliverables block the EXEC gate.
    pub fn is_blocking(&self) -> bool {
        matches!(
            self.priority,
            DeliverablePriority::Required | DeliverablePriority::High
        ) && self.completion_status != CompletionStatus::Completed
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DeliverablePriority {
    Required,
    High,
    Medium,
    Low,
}

impl DeliverablePriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Required => "required",
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "required" => Some(Self::Required),
            "high" => Some(Self::High),
            "medium" => Some(Self::Medium),
            "low" => Some(Self::Low),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CompletionStatus {
    NotStarted,
    InProgress,
    Completed,
    Blocked,
}

impl CompletionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Blocked => "blocked",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "not_started" => Some(Self::NotStarted),
            "in_progress" => Some(Self::InProgress),
            "completed" => Some(Self::Completed),
            "blocked" => Some(Self::Blocked),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateDeliverableInput {
    pub name: String,
    pub priority: DeliverablePriority,
    /// Defaults to `NotStarted`.
    pub completion_status: Option<CompletionStatus>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateDeliverableInput {
    pub completion_status: CompletionStatus,
}

// ============================================================
// User stories
// ============================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserStory {
    pub id: Uuid,
    pub directive_id: Uuid,
    pub title: String,
    pub validation_status: ValidationStatus,
    pub e2e_test_status: E2eTestStatus,
    pub created_at: DateTime<Utc>,
}

impl UserStory {
    pub fn is_verified(&self) -> bool {
        self.validation_status == ValidationStatus::Validated
            || self.e2e_test_status == E2eTestStatus::Passing
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStatus {
    Pending,
    Validated,
    Failed,
}

impl ValidationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Validated => "validated",
            Self::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "validated" => Some(Self::Validated),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum E2eTestStatus {
    NotRun,
    Passing,
    Failing,
}

impl E2eTestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotRun => "not_run",
            Self::Passing => "passing",
            Self::Failing => "failing",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "not_run" => Some(Self::NotRun),
            "passing" => Some(Self::Passing),
            "failing" => Some(Self::Failing),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateUserStoryInput {
    pub title: String,
    pub validation_status: Option<ValidationStatus>,
    pub e2e_test_status: Option<E2eTestStatus>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateUserStoryInput {
    pub validation_status: Option<ValidationStatus>,
    pub e2e_test_status: Option<E2eTestStatus>,
}

// ============================================================
// Handoffs
// ============================================================

/// A recorded transfer of a directive between lifecycle roles.
///
/// Only `Accepted` handoffs count toward a profile's `min_handoffs`, and each
/// `(from_phase, to_phase)` pair counts once.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Handoff {
    pub id: Uuid,
    pub directive_id: Uuid,
    pub from_phase: HandoffPhase,
    pub to_phase: HandoffPhase,
    pub status: HandoffStatus,
    pub created_at: DateTime<Utc>,
}

impl Handoff {
    /// Handoff type label, e.g. `LEAD-TO-PLAN`.
    pub fn handoff_type(&self) -> String {
        format!(
            "{}-TO-{}",
            self.from_phase.as_str().to_uppercase(),
            self.to_phase.as_str().to_uppercase()
        )
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HandoffPhase {
    Lead,
    Plan,
    Exec,
}

impl HandoffPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Lead => "lead",
            Self::Plan => "plan",
            Self::Exec => "exec",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "lead" => Some(Self::Lead),
            "plan" => Some(Self::Plan),
            "exec" => Some(Self::Exec),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HandoffStatus {
    PendingAcceptance,
    Accepted,
}

impl HandoffStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PendingAcceptance => "pending_acceptance",
            Self::Accepted => "accepted",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending_acceptance" => Some(Self::PendingAcceptance),
            "accepted" => Some(Self::Accepted),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateHandoffInput {
    pub from_phase: HandoffPhase,
    pub to_phase: HandoffPhase,
    /// Defaults to `PendingAcceptance`.
    pub status: Option<HandoffStatus>,
}

// ============================================================
// Retrospectives and sub-agent verdicts
// ============================================================

/// Existence marker for a directive's retrospective.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Retrospective {
    pub directive_id: Uuid,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubAgentVerdict {
    pub id: Uuid,
    pub directive_id: Uuid,
    /// Sub-agent identifier, e.g. `TESTING` or `SECURITY`.
    pub agent_code: String,
    pub verdict: Verdict,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Pass,
    ConditionalPass,
    Fail,
    Blocked,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pass => "pass",
            Self::ConditionalPass => "conditional_pass",
            Self::Fail => "fail",
            Self::Blocked => "blocked",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pass" => Some(Self::Pass),
            "conditional_pass" => Some(Self::ConditionalPass),
            "fail" => Some(Self::Fail),
            "blocked" => Some(Self::Blocked),
            _ => None,
        }
    }

    pub fn is_passing(&self) -> bool {
        matches!(self, Self::Pass | Self::ConditionalPass)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateVerdictInput {
    pub agent_code: String,
    pub verdict: Verdict,
}
