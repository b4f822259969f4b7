//! Progress evaluation.
//!
//! [`ProgressEvaluator::breakdown`] is the only place phase gates are combined
//! with weights. [`ProgressEvaluator::calculate`] projects its total, so the
//! two can never disagree.

use std::sync::Arc;

use uuid::Uuid;

use super::hierarchy::DirectiveStore;
use super::profiles::ProfileRegistry;
use super::signals::SignalAdapters;
use super::EngineError;
use crate::models::*;

#[derive(Clone)]
pub struct ProgressEvaluator {
    directives: Arc<dyn DirectiveStore>,
    profiles: ProfileRegistry,
    signals: SignalAdapters,
}

impl ProgressEvaluator {
    pub fn new(
        directives: Arc<dyn DirectiveStore>,
        profiles: ProfileRegistry,
        signals: SignalAdapters,
    ) -> Self {
        Self {
            directives,
            profiles,
            signals,
        }
    }

    pub fn breakdown(&self, directive_id: Uuid) -> Result<PhaseBreakdown, EngineError> {
        let directive = self
            .directives
            .get(directive_id)?
            .ok_or(EngineError::NotFound(directive_id))?;
        self.breakdown_for(&directive)
    }

    /// Evaluate an already-loaded directive. Reads collaborator state only;
    /// never writes `progress_cache`.
    pub fn breakdown_for(&self, directive: &Directive) -> Result<PhaseBreakdown, EngineError> {
        let resolved = self.profiles.resolve(directive)?;
        let profile = &resolved.profile;

        let mut phases = Vec::with_capacity(Phase::ALL.len());
        let mut warnings = Vec::new();
        if resolved.fallback {
            warnings.push(format!(
                "no profile registered for '{}', evaluated as '{}'",
                self.profiles.effective_type(directive),
                profile.sd_type
            ));
        }

        for phase in Phase::ALL {
            let reading = self.signals.read(phase, directive, profile)?;
            if let Some(warning) = reading.warning {
                warnings.push(warning);
            }
            phases.push(PhaseResult {
                name: phase,
                weight: weight_of(profile, phase),
                satisfied: reading.satisfied,
                raw_signals: reading.raw,
            });
        }

        let total = phases
            .iter()
            .filter(|p| p.satisfied)
            .map(|p| u32::from(p.weight))
            .sum::<u32>()
            .min(100) as u8;

        Ok(PhaseBreakdown {
            directive_id: directive.id,
            profile: profile.sd_type.clone(),
            profile_fallback: resolved.fallback,
            phases,
            total,
            warnings,
        })
    }

    pub fn calculate(&self, directive_id: Uuid) -> Result<u8, EngineError> {
        Ok(self.breakdown(directive_id)?.total)
    }

    pub fn calculate_for(&self, directive: &Directive) -> Result<u8, EngineError> {
        Ok(self.breakdown_for(directive)?.total)
    }
}

fn weight_of(profile: &ValidationProfile, phase: Phase) -> u8 {
    match phase {
        Phase::LeadApproval => profile.lead_weight,
        Phase::PlanPrd => profile.plan_weight,
        Phase::ExecImplementation => profile.exec_weight,
        Phase::PlanVerification => profile.verify_weight,
        Phase::LeadFinalApproval => profile.final_weight,
    }
}
