//! Domain models for the directive engine.
//!
//! # Core Concepts
//!
//! ## Engine-owned state
//!
//! - [`Directive`]: A unit of work tracked through five lifecycle phases. The engine owns
//!   its `status` and `progress_cache`; everything else is written by upstream authoring.
//! - [`ValidationProfile`]: Per-type policy bundling phase weights and requirement flags.
//!
//! ## Collaborator records
//!
//! Read-only signals the engine evaluates but never derives:
//!
//! - [`RequirementsDoc`], [`Deliverable`], [`UserStory`], [`Handoff`],
//!   [`Retrospective`], [`SubAgentVerdict`].
//!
//! ## Derived values
//!
//! - [`PhaseBreakdown`]: The single authoritative evaluation of a directive.
//! - [`ProgressReport`]: Display projection of a breakdown (plus hierarchy aggregation).

mod directive;
mod profile;
mod progress;
mod signal;

pub use directive::*;
pub use profile::*;
pub use progress::*;
pub use signal::*;
