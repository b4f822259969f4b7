//! The only path that flips a directive to `completed`.

use std::sync::Arc;

use uuid::Uuid;

use super::evaluator::ProgressEvaluator;
use super::hierarchy::{DirectiveStore, HierarchyScheduler};
use super::EngineError;
use crate::models::*;

#[derive(Clone)]
pub struct CompletionGuard {
    directives: Arc<dyn DirectiveStore>,
    evaluator: ProgressEvaluator,
    scheduler: HierarchyScheduler,
}

impl CompletionGuard {
    pub fn new(
        directives: Arc<dyn DirectiveStore>,
        evaluator: ProgressEvaluator,
        scheduler: HierarchyScheduler,
    ) -> Self {
        Self {
            directives,
            evaluator,
            scheduler,
        }
    }

    fn load(&self, id: Uuid) -> Result<Directive, EngineError> {
        self.directives.get(id)?.ok_or(EngineError::NotFound(id))
    }

    pub fn check(&self, id: Uuid) -> Result<CompletionCheck, EngineError> {
        let directive = self.load(id)?;
        self.check_for(&directive)
    }

    pub(crate) fn check_for(&self, directive: &Directive) -> Result<CompletionCheck, EngineError> {
        let breakdown = self.evaluator.breakdown_for(directive)?;
        let blocking_predecessor = self.scheduler.blocking_predecessor(directive)?;
        let incomplete_children = self.scheduler.incomplete_children(directive.id)?;
        let already_completed = directive.status == DirectiveStatus::Completed;

        let can_complete = directive.status.is_working()
            && breakdown.total == 100
            && blocking_predecessor.is_none()
            && incomplete_children.is_empty();

        Ok(CompletionCheck {
            directive_id: directive.id,
            can_complete,
            calculated: breakdown.total,
            missing_phases: breakdown.missing_phases(),
            blocking_predecessor,
            incomplete_children,
            already_completed,
        })
    }

    /// Complete a directive whose gates all pass.
    ///
    /// The final write re-checks the predecessor and the children inside the
    /// same conditional update, so a concurrent change cannot slip through
    /// between the check and the write.
    pub fn mark_complete(&self, id: Uuid) -> Result<Directive, EngineError> {
        let directive = self.load(id)?;
        let check = self.check_for(&directive)?;

        if check.already_completed {
            return Err(EngineError::InvalidTransition(format!(
                "{} is already completed",
                directive.key
            )));
        }
        if let Some(predecessor_id) = check.blocking_predecessor {
            let predecessor = self.load(predecessor_id)?;
            return Err(EngineError::DependencyNotSatisfied {
                directive_id: id,
                predecessor_id,
                predecessor_status: predecessor.status,
            });
        }
        if !directive.status.is_working() {
            return Err(EngineError::InvalidTransition(format!(
                "{} must leave {} before it can complete",
                directive.key, directive.status
            )));
        }
        if !check.can_complete {
            tracing::info!(
                event = "gate_rejected",
                directive_id = %id,
                calculated = check.calculated,
                missing_phases = ?check.missing_phases,
                incomplete_children = check.incomplete_children.len(),
                "Completion refused"
            );
            return Err(EngineError::IncompleteGate {
                missing_phases: check.missing_phases,
                incomplete_children: check.incomplete_children,
            });
        }

        let update = StatusUpdate {
            id,
            expected: directive.status,
            target: DirectiveStatus::Completed,
            require_children_complete: true,
        };
        if !self.directives.compare_and_set_status(&update)? {
            return Err(self.scheduler.explain_rejection(&directive)?);
        }

        tracing::info!(directive_id = %id, key = %directive.key, "Directive completed");

        let completed = self.load(id)?;
        if let Some(parent_id) = completed.parent_id {
            self.scheduler.recompute_parent(parent_id)?;
        }
        Ok(completed)
    }
}
