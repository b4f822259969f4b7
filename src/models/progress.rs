use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::DirectiveStatus;

/// The five weighted lifecycle phases, in evaluation order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Phase {
    #[serde(rename = "LEAD_approval")]
    LeadApproval,
    #[serde(rename = "PLAN_prd")]
    PlanPrd,
    #[serde(rename = "EXEC_implementation")]
    ExecImplementation,
    #[serde(rename = "PLAN_verification")]
    PlanVerification,
    #[serde(rename = "LEAD_final_approval")]
    LeadFinalApproval,
}

impl Phase {
    pub const ALL: [Phase; 5] = [
        Self::LeadApproval,
        Self::PlanPrd,
        Self::ExecImplementation,
        Self::PlanVerification,
        Self::LeadFinalApproval,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LeadApproval => "LEAD_approval",
            Self::PlanPrd => "PLAN_prd",
            Self::ExecImplementation => "EXEC_implementation",
            Self::PlanVerification => "PLAN_verification",
            Self::LeadFinalApproval => "LEAD_final_approval",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Evaluation of a single phase gate.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PhaseResult {
    pub name: Phase,
    pub weight: u8,
    pub satisfied: bool,
    /// The collaborator readings the gate was decided on.
    pub raw_signals: serde_json::Value,
}

/// Authoritative evaluation of a directive.
///
/// `total` is the sum of the weights of satisfied phases. Every other
/// progress number in the system is a projection of this value.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PhaseBreakdown {
    pub directive_id: Uuid,
    /// Profile type actually applied after prefix override and fallback.
    pub profile: String,
    /// True when the declared type had no registered profile.
    pub profile_fallback: bool,
    pub phases: Vec<PhaseResult>,
    pub total: u8,
    /// Degradations applied during evaluation (e.g. verifier failed open).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl PhaseBreakdown {
    pub fn missing_phases(&self) -> Vec<Phase> {
        self.phases
            .iter()
            .filter(|p| !p.satisfied && p.weight > 0)
            .map(|p| p.name)
            .collect()
    }
}

/// Result of evaluating whether a directive may be completed right now.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CompletionCheck {
    pub directive_id: Uuid,
    pub can_complete: bool,
    pub calculated: u8,
    pub missing_phases: Vec<Phase>,
    /// Unfinished predecessor, for a child whose chain position is not yet reached.
    pub blocking_predecessor: Option<Uuid>,
    pub incomplete_children: Vec<Uuid>,
    pub already_completed: bool,
}

/// Response of `GET /progress/{id}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProgressReport {
    pub directive_id: Uuid,
    pub status: DirectiveStatus,
    /// Displayed progress: the child aggregate for a parent, `calculate()` otherwise.
    pub total: u8,
    pub can_complete: bool,
}

/// Error payload returned by the HTTP API.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorResponse {
    /// Machine-readable error kind, e.g. `incomplete_gate`.
    pub error: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub missing_phases: Option<Vec<Phase>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub incomplete_children: Option<Vec<Uuid>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub predecessor_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub predecessor_status: Option<DirectiveStatus>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
            missing_phases: None,
            incomplete_children: None,
            predecessor_id: None,
            predecessor_status: None,
        }
    }
}
