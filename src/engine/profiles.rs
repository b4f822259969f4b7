//! Profile resolution: which validation policy applies to a directive.

use std::sync::Arc;

use super::EngineError;
use crate::models::*;

/// Profile type forced by the fast-path key prefix.
pub const QUICK_FIX_TYPE: &str = "quick_fix";

pub trait ProfileStore: Send + Sync {
    fn get_profile(&self, sd_type: &str) -> anyhow::Result<Option<ValidationProfile>>;

    fn list_profiles(&self) -> anyhow::Result<Vec<ValidationProfile>>;

    /// Insert or replace a profile, unless some directive already evaluates
    /// against that type. Returns `None` when the write was refused.
    fn put_profile_if_unreferenced(
        &self,
        input: &CreateProfileInput,
        usage: ProfileUsage<'_>,
    ) -> anyhow::Result<Option<ValidationProfile>>;
}

/// A profile together with how it was chosen.
#[derive(Debug, Clone)]
pub struct ResolvedProfile {
    pub profile: ValidationProfile,
    pub fallback: bool,
}

#[derive(Clone)]
pub struct ProfileRegistry {
    store: Arc<dyn ProfileStore>,
    quick_fix_prefix: String,
    fallback_type: String,
}

impl ProfileRegistry {
    pub fn new(
        store: Arc<dyn ProfileStore>,
        quick_fix_prefix: impl Into<String>,
        fallback_type: impl Into<String>,
    ) -> Self {
        Self {
            store,
            quick_fix_prefix: quick_fix_prefix.into(),
            fallback_type: fallback_type.into(),
        }
    }

    /// The type a directive is evaluated as, before any fallback.
    pub fn effective_type<'a>(&self, directive: &'a Directive) -> &'a str {
        if self.is_quick_fix_key(&directive.key) {
            QUICK_FIX_TYPE
        } else {
            &directive.declared_type
        }
    }

    pub fn is_quick_fix_key(&self, key: &str) -> bool {
        !self.quick_fix_prefix.is_empty() && key.starts_with(&self.quick_fix_prefix)
    }

    /// Resolve the profile for a directive. Never fails for a missing profile:
    /// unknown types fall back to the fallback type, and if even that is
    /// unregistered, to the built-in feature profile.
    pub fn resolve(&self, directive: &Directive) -> Result<ResolvedProfile, EngineError> {
        let effective = self.effective_type(directive);
        if effective != directive.declared_type {
            tracing::debug!(
                event = "quick_fix_override",
                directive_id = %directive.id,
                key = %directive.key,
                declared_type = %directive.declared_type,
                "Key prefix selects the quick-fix profile"
            );
        }

        if let Some(profile) = self.store.get_profile(effective)? {
            return Ok(ResolvedProfile {
                profile,
                fallback: false,
            });
        }

        tracing::warn!(
            event = "profile_fallback",
            directive_id = %directive.id,
            requested_type = %effective,
            fallback_type = %self.fallback_type,
            "No validation profile registered, falling back"
        );

        let profile = self
            .store
            .get_profile(&self.fallback_type)?
            .unwrap_or_else(ValidationProfile::builtin_feature);

        Ok(ResolvedProfile {
            profile,
            fallback: true,
        })
    }

    pub fn get(&self, sd_type: &str) -> Result<Option<ValidationProfile>, EngineError> {
        Ok(self.store.get_profile(sd_type)?)
    }

    pub fn list(&self) -> Result<Vec<ValidationProfile>, EngineError> {
        Ok(self.store.list_profiles()?)
    }

    /// Register a profile. Weight sums other than 100 are rejected here, at
    /// authoring time, so evaluation never sees a malformed policy.
    pub fn register(&self, input: CreateProfileInput) -> Result<ValidationProfile, EngineError> {
        validate_profile(&input)?;

        let usage = ProfileUsage {
            quick_fix_prefix: &self.quick_fix_prefix,
            quick_fix_type: QUICK_FIX_TYPE,
            is_fallback: input.sd_type == self.fallback_type,
        };

        match self.store.put_profile_if_unreferenced(&input, usage)? {
            Some(profile) => {
                tracing::info!(sd_type = %profile.sd_type, "Registered validation profile");
                Ok(profile)
            }
            None => Err(EngineError::ProfileInUse(input.sd_type)),
        }
    }
}

pub fn validate_profile(input: &CreateProfileInput) -> Result<(), EngineError> {
    if input.sd_type.trim().is_empty() {
        return Err(EngineError::InvalidProfile(
            "profile type must not be empty".to_string(),
        ));
    }

    let sum = input.weight_sum();
    if sum != 100 {
        return Err(EngineError::InvalidProfile(format!(
            "weights for '{}' sum to {}, expected 100",
            input.sd_type, sum
        )));
    }

    Ok(())
}
