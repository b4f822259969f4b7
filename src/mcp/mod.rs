//! MCP server exposing directive progress and lifecycle tools to agents.

mod types;

pub use types::*;

use rmcp::{
    handler::server::{tool::ToolRouter, wrapper::Parameters},
    model::{CallToolResult, Content, ServerInfo},
    tool, tool_handler, tool_router, ErrorData as McpError, ServerHandler, ServiceExt,
};
use serde::Serialize;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::db::Database;
use crate::engine::{EngineError, ProgressEngine};
use crate::models::*;

#[derive(Clone)]
pub struct McpServer {
    db: Database,
    engine: ProgressEngine,
    tool_router: ToolRouter<Self>,
}

impl McpServer {
    pub fn new(db: Database, config: &EngineConfig) -> Self {
        let engine = ProgressEngine::new(db.clone(), config);
        Self {
            db,
            engine,
            tool_router: Self::tool_router(),
        }
    }

    fn parse_uuid(s: &str) -> Result<Uuid, McpError> {
        Uuid::parse_str(s)
            .map_err(|e| McpError::invalid_params(format!("Invalid UUID: {}", e), None))
    }

    fn parse_status(s: &str) -> Result<DirectiveStatus, McpError> {
        DirectiveStatus::from_str(s)
            .ok_or_else(|| McpError::invalid_params(format!("Unknown status '{}'", s), None))
    }

    fn to_json<T: Serialize>(value: &T) -> Result<CallToolResult, McpError> {
        let json = serde_json::to_string_pretty(value)
            .map_err(|e| McpError::internal_error(e.to_string(), None))?;
        Ok(CallToolResult::success(vec![Content::text(json)]))
    }

    /// Run an engine call on the blocking pool; evaluation may wait on the
    /// sub-agent verifier.
    async fn run<T, F>(&self, f: F) -> Result<T, McpError>
    where
        T: Send + 'static,
        F: FnOnce(&ProgressEngine) -> Result<T, EngineError> + Send + 'static,
    {
        let engine = self.engine.clone();
        tokio::task::spawn_blocking(move || f(&engine))
            .await
            .map_err(|e| McpError::internal_error(e.to_string(), None))?
            .map_err(engine_error)
    }

    // ============================================================
    // Tool logic, shared with tests
    // ============================================================

    pub async fn progress(&self, directive_id: &str) -> Result<ProgressReport, McpError> {
        let id = Self::parse_uuid(directive_id)?;
        self.run(move |engine| engine.progress(id)).await
    }

    pub async fn breakdown(&self, directive_id: &str) -> Result<PhaseBreakdown, McpError> {
        let id = Self::parse_uuid(directive_id)?;
        self.run(move |engine| engine.breakdown(id)).await
    }

    pub async fn transition(
        &self,
        directive_id: &str,
        target_status: &str,
    ) -> Result<DirectiveSummary, McpError> {
        let id = Self::parse_uuid(directive_id)?;
        let target = Self::parse_status(target_status)?;
        let directive = self.run(move |engine| engine.transition(id, target)).await?;
        Ok(DirectiveSummary::from(&directive))
    }

    pub async fn complete(&self, directive_id: &str) -> Result<DirectiveSummary, McpError> {
        let id = Self::parse_uuid(directive_id)?;
        let directive = self.run(move |engine| engine.mark_complete(id)).await?;
        Ok(DirectiveSummary::from(&directive))
    }

    pub async fn children(&self, directive_id: &str) -> Result<DirectiveListResponse, McpError> {
        let id = Self::parse_uuid(directive_id)?;
        let children = self.run(move |engine| engine.children(id)).await?;
        Ok(DirectiveListResponse {
            directives: children.iter().map(DirectiveSummary::from).collect(),
        })
    }

    pub fn directives(&self, status: Option<&str>) -> Result<DirectiveListResponse, McpError> {
        let status = status.map(Self::parse_status).transpose()?;
        let directives = self
            .db
            .list_directives()
            .map_err(|e| McpError::internal_error(e.to_string(), None))?;

        Ok(DirectiveListResponse {
            directives: directives
                .iter()
                .filter(|d| status.map_or(true, |s| d.status == s))
                .map(DirectiveSummary::from)
                .collect(),
        })
    }
}

fn engine_error(e: EngineError) -> McpError {
    let message = e.to_string();
    match e {
        EngineError::Storage(_) => {
            tracing::error!("Internal error: {}", message);
            McpError::internal_error("Internal error", None)
        }
        EngineError::IncompleteGate {
            missing_phases,
            incomplete_children,
        } => McpError::invalid_params(
            message,
            Some(serde_json::json!({
                "missing_phases": missing_phases,
                "incomplete_children": incomplete_children,
            })),
        ),
        EngineError::DependencyNotSatisfied {
            predecessor_id,
            predecessor_status,
            ..
        } => McpError::invalid_params(
            message,
            Some(serde_json::json!({
                "predecessor_id": predecessor_id,
                "predecessor_status": predecessor_status,
            })),
        ),
        _ => McpError::invalid_params(message, None),
    }
}

#[tool_router]
impl McpServer {
    #[tool(
        description = "Get a directive's displayed progress (0-100) and whether it can be completed right now. For a parent this is the priority-weighted aggregate of its children. Refreshes the cached progress value."
    )]
    async fn get_progress(
        &self,
        params: Parameters<DirectiveRequest>,
    ) -> Result<CallToolResult, McpError> {
        let report = self.progress(&params.0.directive_id).await?;
        Self::to_json(&report)
    }

    #[tool(
        description = "Get the per-phase breakdown of a directive's progress: the profile applied, each phase's weight, whether its gate is satisfied, and the raw signals the gate was decided on. Warnings list any degraded checks (e.g. the sub-agent verifier failed open)."
    )]
    async fn get_breakdown(
        &self,
        params: Parameters<DirectiveRequest>,
    ) -> Result<CallToolResult, McpError> {
        let breakdown = self.breakdown(&params.0.directive_id).await?;
        Self::to_json(&breakdown)
    }

    #[tool(
        description = "Move a directive to a working status. A child directive can only leave 'draft' once its predecessor in the chain is completed; otherwise the call fails and nothing changes. Cannot be used to complete a directive."
    )]
    async fn transition_directive(
        &self,
        params: Parameters<TransitionRequest>,
    ) -> Result<CallToolResult, McpError> {
        let req = params.0;
        let directive = self.transition(&req.directive_id, &req.target_status).await?;
        Self::to_json(&directive)
    }

    #[tool(
        description = "Mark a directive completed. Succeeds only when its progress is 100, its predecessor (if any) is completed and all of its children (if any) are completed. On failure the error lists the missing phases. Completing the last child of a parent completes the parent too."
    )]
    async fn complete_directive(
        &self,
        params: Parameters<DirectiveRequest>,
    ) -> Result<CallToolResult, McpError> {
        let directive = self.complete(&params.0.directive_id).await?;
        Self::to_json(&directive)
    }

    #[tool(description = "List a parent directive's children in chain order.")]
    async fn list_children(
        &self,
        params: Parameters<DirectiveRequest>,
    ) -> Result<CallToolResult, McpError> {
        let children = self.children(&params.0.directive_id).await?;
        Self::to_json(&children)
    }

    #[tool(description = "List top-level directives, optionally filtered by status.")]
    async fn list_directives(
        &self,
        params: Parameters<ListDirectivesRequest>,
    ) -> Result<CallToolResult, McpError> {
        let list = self.directives(params.0.status.as_deref())?;
        Self::to_json(&list)
    }
}

#[tool_handler]
impl ServerHandler for McpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            server_info: rmcp::model::Implementation {
                name: "directive-engine".into(),
                version: env!("CARGO_PKG_VERSION").into(),
                title: None,
                icons: None,
                website_url: None,
            },
            capabilities: rmcp::model::ServerCapabilities::builder()
                .enable_tools()
                .build(),
            instructions: Some(
                r#"Directive engine: progress and ordering for directives moving through LEAD -> PLAN -> EXEC.

PROGRESS:
- Progress is derived, never accumulated. get_breakdown shows which phase gates pass.
- Phase weights come from the directive type's validation profile. Keys starting with the
  quick-fix prefix always use the quick-fix profile.

ORDERING:
- Children of a parent run one after another. Use list_children to see the chain.
- transition_directive on a child fails while its predecessor is not completed.

COMPLETION:
- complete_directive is the only way to reach 'completed'.
- It fails with the list of missing phases while progress is below 100."#
                    .into(),
            ),
            ..Default::default()
        }
    }
}

pub async fn run_stdio_server(db: Database, config: EngineConfig) -> anyhow::Result<()> {
    use tokio::io::{stdin, stdout};

    tracing::info!("Starting MCP server via stdio");

    let service = McpServer::new(db, &config);
    let server = service.serve((stdin(), stdout())).await?;

    let quit_reason = server.waiting().await?;
    tracing::info!("MCP server stopped: {:?}", quit_reason);

    Ok(())
}
