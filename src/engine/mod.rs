//! Directive progress and scheduling engine.
//!
//! Components, leaves first:
//!
//! - [`ProfileRegistry`]: resolves the validation policy for a directive.
//! - [`SignalAdapters`]: the five phase gates over collaborator stores.
//! - [`ProgressEvaluator`]: combines the two into a [`PhaseBreakdown`].
//! - [`HierarchyScheduler`]: chain ordering, parent aggregation, auto-completion.
//! - [`CompletionGuard`]: the only mutation that sets `completed`.
//!
//! [`ProgressEngine`] wires them together over a single set of stores.

mod evaluator;
mod guard;
mod hierarchy;
mod profiles;
mod signals;

use std::sync::Arc;

use thiserror::Error;
use uuid::Uuid;

pub use evaluator::ProgressEvaluator;
pub use guard::CompletionGuard;
pub use hierarchy::{
    aggregate_progress, ChainEdge, ChainError, ChildChain, DirectiveStore, HierarchyScheduler,
};
pub use profiles::{validate_profile, ProfileRegistry, ProfileStore, ResolvedProfile, QUICK_FIX_TYPE};
pub use signals::{
    BoundedVerifier, DeliverableStore, GateReading, HandoffStore, RequirementsDocStore,
    RetrospectiveStore, SignalAdapters, SubAgentVerifier, UserStoryStore, VerifierError,
};

use crate::config::EngineConfig;
use crate::db::Database;
use crate::models::*;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("directive {0} not found")]
    NotFound(Uuid),

    #[error("invalid profile: {0}")]
    InvalidProfile(String),

    #[error("profile '{0}' is referenced by existing directives and cannot be replaced")]
    ProfileInUse(String),

    #[error("directive {directive_id} depends on {predecessor_id}, which is {predecessor_status}")]
    DependencyNotSatisfied {
        directive_id: Uuid,
        predecessor_id: Uuid,
        predecessor_status: DirectiveStatus,
    },

    #[error("completion gate not satisfied: missing phases {missing_phases:?}, incomplete children {incomplete_children:?}")]
    IncompleteGate {
        missing_phases: Vec<Phase>,
        incomplete_children: Vec<Uuid>,
    },

    #[error("invalid transition: {0}")]
    InvalidTransition(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invalid child chain: {0}")]
    ChainViolation(#[from] ChainError),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

/// Facade over the engine components, sharing one set of stores.
#[derive(Clone)]
pub struct ProgressEngine {
    directives: Arc<dyn DirectiveStore>,
    profiles: ProfileRegistry,
    evaluator: ProgressEvaluator,
    scheduler: HierarchyScheduler,
    guard: CompletionGuard,
}

impl ProgressEngine {
    /// Engine backed entirely by `db`, with the sub-agent verifier bounded by
    /// the configured timeout.
    pub fn new(db: Database, config: &EngineConfig) -> Self {
        let verifier = BoundedVerifier::new(
            Arc::new(db.clone()),
            config.verifier_timeout,
            config.verifier_max_in_flight,
        );
        let signals = SignalAdapters {
            requirements: Arc::new(db.clone()),
            deliverables: Arc::new(db.clone()),
            stories: Arc::new(db.clone()),
            verifier: Arc::new(verifier),
            retrospectives: Arc::new(db.clone()),
            handoffs: Arc::new(db.clone()),
        };
        Self::from_parts(Arc::new(db.clone()), Arc::new(db), signals, config)
    }

    pub fn from_parts(
        directives: Arc<dyn DirectiveStore>,
        profile_store: Arc<dyn ProfileStore>,
        signals: SignalAdapters,
        config: &EngineConfig,
    ) -> Self {
        let profiles = ProfileRegistry::new(
            profile_store,
            config.quick_fix_prefix.clone(),
            config.fallback_type.clone(),
        );
        let evaluator = ProgressEvaluator::new(directives.clone(), profiles.clone(), signals);
        let scheduler = HierarchyScheduler::new(directives.clone(), evaluator.clone());
        let guard = CompletionGuard::new(directives.clone(), evaluator.clone(), scheduler.clone());

        Self {
            directives,
            profiles,
            evaluator,
            scheduler,
            guard,
        }
    }

    pub fn profiles(&self) -> &ProfileRegistry {
        &self.profiles
    }

    pub fn evaluator(&self) -> &ProgressEvaluator {
        &self.evaluator
    }

    pub fn scheduler(&self) -> &HierarchyScheduler {
        &self.scheduler
    }

    pub fn guard(&self) -> &CompletionGuard {
        &self.guard
    }

    pub fn get_directive(&self, id: Uuid) -> Result<Directive, EngineError> {
        self.directives.get(id)?.ok_or(EngineError::NotFound(id))
    }

    pub fn breakdown(&self, id: Uuid) -> Result<PhaseBreakdown, EngineError> {
        self.evaluator.breakdown(id)
    }

    pub fn calculate(&self, id: Uuid) -> Result<u8, EngineError> {
        self.evaluator.calculate(id)
    }

    /// Displayed progress plus completion readiness. Refreshes `progress_cache`.
    pub fn progress(&self, id: Uuid) -> Result<ProgressReport, EngineError> {
        let directive = self.get_directive(id)?;
        let total = self.scheduler.on_directive_changed(&directive)?;
        let check = self.guard.check_for(&directive)?;

        Ok(ProgressReport {
            directive_id: id,
            status: directive.status,
            total,
            can_complete: check.can_complete,
        })
    }

    /// Re-derive cached progress after a collaborator signal changed.
    pub fn refresh(&self, id: Uuid) -> Result<u8, EngineError> {
        let directive = self.get_directive(id)?;
        self.scheduler.on_directive_changed(&directive)
    }

    pub fn transition(&self, id: Uuid, target: DirectiveStatus) -> Result<Directive, EngineError> {
        self.scheduler.transition(id, target)
    }

    pub fn check_completion(&self, id: Uuid) -> Result<CompletionCheck, EngineError> {
        self.guard.check(id)
    }

    pub fn mark_complete(&self, id: Uuid) -> Result<Directive, EngineError> {
        self.guard.mark_complete(id)
    }

    /// Create a directive in `draft`. With a `parent_id` it is appended to
    /// the end of that parent's chain.
    pub fn create_directive(&self, input: CreateDirectiveInput) -> Result<Directive, EngineError> {
        if let Some(parent_id) = input.parent_id {
            let key = input.key.clone();
            let child = CreateChildInput {
                key: input.key,
                title: input.title,
                declared_type: Some(input.declared_type),
                priority: input.priority,
            };
            return self
                .scheduler
                .append_children(parent_id, vec![child])?
                .pop()
                .ok_or_else(|| EngineError::Conflict(format!("child {} was not created", key)));
        }

        if self.directives.get_by_key(&input.key)?.is_some() {
            return Err(EngineError::Conflict(format!(
                "directive key {} already exists",
                input.key
            )));
        }

        let directive = self.directives.insert_standalone(&input)?;
        tracing::info!(directive_id = %directive.id, key = %directive.key, "Created directive");
        Ok(directive)
    }

    pub fn children(&self, parent_id: Uuid) -> Result<Vec<Directive>, EngineError> {
        self.scheduler.ordered_children(parent_id)
    }

    pub fn create_children(
        &self,
        parent_id: Uuid,
        input: CreateChildrenInput,
    ) -> Result<Vec<Directive>, EngineError> {
        self.scheduler.append_children(parent_id, input.children)
    }

    pub fn register_profile(&self, input: CreateProfileInput) -> Result<ValidationProfile, EngineError> {
        self.profiles.register(input)
    }
}
