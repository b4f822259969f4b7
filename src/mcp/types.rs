//! Request and response types for MCP tools.

use rmcp::schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::models::Directive;

// ============================================================
// Request Types
// ============================================================

#[derive(Debug, Deserialize, JsonSchema)]
pub struct DirectiveRequest {
    #[schemars(description = "The UUID of the directive")]
    pub directive_id: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct TransitionRequest {
    #[schemars(description = "The UUID of the directive to transition")]
    pub directive_id: String,
    #[schemars(
        description = "Target status: 'active', 'in_progress', 'pending_approval' or 'review'. Use complete_directive to reach 'completed'."
    )]
    pub target_status: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ListDirectivesRequest {
    #[schemars(description = "Optional status filter, e.g. 'draft' or 'in_progress'")]
    pub status: Option<String>,
}

// ============================================================
// Response Types
// ============================================================

/// Compact directive view for listings.
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct DirectiveSummary {
    pub id: String,
    pub key: String,
    pub title: String,
    pub status: String,
    pub priority: String,
    pub relationship_type: String,
    pub depends_on: Option<String>,
    pub progress: u8,
}

impl From<&Directive> for DirectiveSummary {
    fn from(d: &Directive) -> Self {
        Self {
            id: d.id.to_string(),
            key: d.key.clone(),
            title: d.title.clone(),
            status: d.status.as_str().to_string(),
            priority: d.priority.as_str().to_string(),
            relationship_type: d.relationship_type.as_str().to_string(),
            depends_on: d.depends_on.map(|id| id.to_string()),
            progress: d.progress_cache,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DirectiveListResponse {
    pub directives: Vec<DirectiveSummary>,
}
