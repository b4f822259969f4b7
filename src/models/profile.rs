use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Validation policy for one directive type.
///
/// The five weights always sum to 100. Profiles are written by policy authors
/// and never modified once a directive references their type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ValidationProfile {
    pub sd_type: String,
    pub lead_weight: u8,
    pub plan_weight: u8,
    pub exec_weight: u8,
    pub verify_weight: u8,
    pub final_weight: u8,
    pub requires_prd: bool,
    pub requires_deliverables: bool,
    pub requires_e2e_tests: bool,
    pub requires_sub_agents: bool,
    pub requires_retrospective: bool,
    pub min_handoffs: u32,
    pub created_at: DateTime<Utc>,
}

impl ValidationProfile {
    pub fn weight_sum(&self) -> u32 {
        [
            self.lead_weight,
            self.plan_weight,
            self.exec_weight,
            self.verify_weight,
            self.final_weight,
        ]
        .iter()
        .map(|w| u32::from(*w))
        .sum()
    }

    /// The profile used when neither the declared type nor the fallback type is registered.
    pub fn builtin_feature() -> Self {
        Self {
            sd_type: "feature".to_string(),
            lead_weight: 20,
            plan_weight: 20,
            exec_weight: 30,
            verify_weight: 15,
            final_weight: 15,
            requires_prd: true,
            requires_deliverables: true,
            requires_e2e_tests: true,
            requires_sub_agents: true,
            requires_retrospective: true,
            min_handoffs: 3,
            created_at: DateTime::<Utc>::default(),
        }
    }
}

/// Which directives evaluate against a profile that is about to be written.
///
/// A directive always references its declared type. Keys starting with
/// `quick_fix_prefix` evaluate as `quick_fix_type` instead, and when
/// `is_fallback` is set the profile also backs every directive whose
/// effective type has no profile row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProfileUsage<'a> {
    pub quick_fix_prefix: &'a str,
    pub quick_fix_type: &'a str,
    pub is_fallback: bool,
}

/// Input for registering a validation profile.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateProfileInput {
    pub sd_type: String,
    pub lead_weight: u8,
    pub plan_weight: u8,
    pub exec_weight: u8,
    pub verify_weight: u8,
    pub final_weight: u8,
    #[serde(default)]
    pub requires_prd: bool,
    #[serde(default)]
    pub requires_deliverables: bool,
    #[serde(default)]
    pub requires_e2e_tests: bool,
    #[serde(default)]
    pub requires_sub_agents: bool,
    #[serde(default)]
    pub requires_retrospective: bool,
    #[serde(default)]
    pub min_handoffs: u32,
}

impl CreateProfileInput {
    pub fn weight_sum(&self) -> u32 {
        [
            self.lead_weight,
            self.plan_weight,
            self.exec_weight,
            self.verify_weight,
            self.final_weight,
        ]
        .iter()
        .map(|w| u32::from(*w))
        .sum()
    }
}
