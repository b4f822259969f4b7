//! Phase gates and the collaborator interfaces they read.
//!
//! Each gate is a read-only predicate over one directive. "No applicable
//! records" counts as satisfied unless the gate says otherwise. Storage
//! failures propagate, with one exception: the sub-agent verifier fails open.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

use crate::models::*;

// ============================================================
// Collaborator interfaces
// ============================================================

pub trait RequirementsDocStore: Send + Sync {
    fn exists(&self, directive_id: Uuid, acceptable: &[PrdStatus]) -> anyhow::Result<bool>;
}

pub trait DeliverableStore: Send + Sync {
    fn list(&self, directive_id: Uuid) -> anyhow::Result<Vec<Deliverable>>;
}

pub trait UserStoryStore: Send + Sync {
    fn list(&self, directive_id: Uuid) -> anyhow::Result<Vec<UserStory>>;
}

/// Reads recorded sub-agent verdicts. Implementations may be remote and may
/// fail or stall; callers bound them with [`BoundedVerifier`].
pub trait SubAgentVerifier: Send + Sync {
    fn all_verified(&self, directive_id: Uuid) -> Result<bool, VerifierError>;
}

pub trait RetrospectiveStore: Send + Sync {
    fn exists(&self, directive_id: Uuid) -> anyhow::Result<bool>;
}

pub trait HandoffStore: Send + Sync {
    /// Number of distinct `(from, to)` handoff types with status `accepted`.
    fn count_accepted_distinct_types(&self, directive_id: Uuid) -> anyhow::Result<u32>;
}

#[derive(Debug, Error)]
pub enum VerifierError {
    #[error("sub-agent verifier timed out after {0:?}")]
    Timeout(Duration),

    #[error("sub-agent verifier unavailable: {0}")]
    Unavailable(String),

    #[error("sub-agent verifier busy: {0} calls already in flight")]
    Saturated(usize),
}

/// Runs the wrapped verifier on its own thread and gives up after `timeout`.
///
/// Every call costs one OS thread, and a parent recompute evaluates each
/// child, so one request can make several calls. A timed-out call keeps its
/// thread until the inner verifier returns. At most `max_in_flight` threads
/// exist at once, counting stalled ones; beyond that, calls fail fast with
/// [`VerifierError::Saturated`] instead of spawning.
pub struct BoundedVerifier {
    inner: Arc<dyn SubAgentVerifier>,
    timeout: Duration,
    max_in_flight: usize,
    in_flight: Arc<AtomicUsize>,
}

impl BoundedVerifier {
    pub fn new(inner: Arc<dyn SubAgentVerifier>, timeout: Duration, max_in_flight: usize) -> Self {
        Self {
            inner,
            timeout,
            max_in_flight: max_in_flight.max(1),
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Verifier threads currently running, including timed-out ones.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    fn acquire(&self) -> Result<InFlight, VerifierError> {
        self.in_flight
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < self.max_in_flight).then_some(n + 1)
            })
            .map_err(VerifierError::Saturated)?;
        Ok(InFlight(Arc::clone(&self.in_flight)))
    }
}

/// Releases one in-flight slot when the verifier thread ends.
struct InFlight(Arc<AtomicUsize>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl SubAgentVerifier for BoundedVerifier {
    fn all_verified(&self, directive_id: Uuid) -> Result<bool, VerifierError> {
        let slot = self.acquire()?;
        let (tx, rx) = mpsc::channel();
        let inner = Arc::clone(&self.inner);

        std::thread::Builder::new()
            .name("subagent-verifier".into())
            .spawn(move || {
                let result = inner.all_verified(directive_id);
                drop(slot);
                let _ = tx.send(result);
            })
            .map_err(|e| VerifierError::Unavailable(e.to_string()))?;

        match rx.recv_timeout(self.timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(VerifierError::Timeout(self.timeout)),
            Err(RecvTimeoutError::Disconnected) => Err(VerifierError::Unavailable(
                "verifier exited without a result".to_string(),
            )),
        }
    }
}

// ============================================================
// Gates
// ============================================================

/// Outcome of one gate.
#[derive(Debug, Clone)]
pub struct GateReading {
    pub satisfied: bool,
    pub raw: serde_json::Value,
    /// Set when the gate degraded instead of failing.
    pub warning: Option<String>,
}

impl GateReading {
    fn new(satisfied: bool, raw: serde_json::Value) -> Self {
        Self {
            satisfied,
            raw,
            warning: None,
        }
    }
}

/// The five signal adapters, one per phase.
#[derive(Clone)]
pub struct SignalAdapters {
    pub requirements: Arc<dyn RequirementsDocStore>,
    pub deliverables: Arc<dyn DeliverableStore>,
    pub stories: Arc<dyn UserStoryStore>,
    pub verifier: Arc<dyn SubAgentVerifier>,
    pub retrospectives: Arc<dyn RetrospectiveStore>,
    pub handoffs: Arc<dyn HandoffStore>,
}

impl SignalAdapters {
    pub fn read(
        &self,
        phase: Phase,
        directive: &Directive,
        profile: &ValidationProfile,
    ) -> anyhow::Result<GateReading> {
        match phase {
            Phase::LeadApproval => Ok(lead_approval(directive)),
            Phase::PlanPrd => self.plan_prd(directive, profile),
            Phase::ExecImplementation => self.exec_implementation(directive, profile),
            Phase::PlanVerification => self.plan_verification(directive, profile),
            Phase::LeadFinalApproval => self.lead_final_approval(directive, profile),
        }
    }

    fn plan_prd(
        &self,
        directive: &Directive,
        profile: &ValidationProfile,
    ) -> anyhow::Result<GateReading> {
        if !profile.requires_prd {
            return Ok(GateReading::new(true, json!({ "required": false })));
        }

        let exists = self
            .requirements
            .exists(directive.id, &PrdStatus::ACCEPTABLE)?;
        Ok(GateReading::new(
            exists,
            json!({ "required": true, "prd_exists": exists }),
        ))
    }

    fn exec_implementation(
        &self,
        directive: &Directive,
        profile: &ValidationProfile,
    ) -> anyhow::Result<GateReading> {
        if !profile.requires_deliverables {
            return Ok(GateReading::new(true, json!({ "required": false })));
        }

        let deliverables = self.deliverables.list(directive.id)?;
        let blocking: Vec<&str> = deliverables
            .iter()
            .filter(|d| d.is_blocking())
            .map(|d| d.name.as_str())
            .collect();

        Ok(GateReading::new(
            blocking.is_empty(),
            json!({
                "required": true,
                "deliverables": deliverables.len(),
                "blocking": blocking,
            }),
        ))
    }

    fn plan_verification(
        &self,
        directive: &Directive,
        profile: &ValidationProfile,
    ) -> anyhow::Result<GateReading> {
        if !profile.requires_e2e_tests {
            return Ok(GateReading::new(true, json!({ "required": false })));
        }

        let stories = self.stories.list(directive.id)?;
        let unverified = stories.iter().filter(|s| !s.is_verified()).count();
        let stories_ok = unverified == 0;

        if !profile.requires_sub_agents {
            return Ok(GateReading::new(
                stories_ok,
                json!({
                    "required": true,
                    "stories": stories.len(),
                    "unverified_stories": unverified,
                }),
            ));
        }

        let (verified, verifier_state, warning) = match self.verifier.all_verified(directive.id) {
            Ok(verified) => (verified, "ok", None),
            Err(e) => {
                tracing::warn!(
                    event = "verifier_fail_open",
                    directive_id = %directive.id,
                    error = %e,
                    "Sub-agent verification unavailable, passing gate"
                );
                (true, "fail_open", Some(format!("{}: {}", Phase::PlanVerification, e)))
            }
        };

        Ok(GateReading {
            satisfied: stories_ok && verified,
            raw: json!({
                "required": true,
                "stories": stories.len(),
                "unverified_stories": unverified,
                "sub_agents_verified": verified,
                "verifier": verifier_state,
            }),
            warning,
        })
    }

    fn lead_final_approval(
        &self,
        directive: &Directive,
        profile: &ValidationProfile,
    ) -> anyhow::Result<GateReading> {
        let retrospective_ok = if profile.requires_retrospective {
            self.retrospectives.exists(directive.id)?
        } else {
            true
        };

        // Skip the handoff query when nothing is required.
        let handoffs = if profile.min_handoffs > 0 {
            self.handoffs.count_accepted_distinct_types(directive.id)?
        } else {
            0
        };
        let handoffs_ok = handoffs >= profile.min_handoffs;

        Ok(GateReading::new(
            retrospective_ok && handoffs_ok,
            json!({
                "retrospective_required": profile.requires_retrospective,
                "retrospective_ok": retrospective_ok,
                "accepted_handoff_types": handoffs,
                "min_handoffs": profile.min_handoffs,
            }),
        ))
    }
}

fn lead_approval(directive: &Directive) -> GateReading {
    GateReading::new(
        directive.status != DirectiveStatus::Draft,
        json!({ "status": directive.status.as_str() }),
    )
}
