//! Engine collaborator interfaces backed by the local database.

use uuid::Uuid;

use super::Database;
use crate::engine::{
    DeliverableStore, DirectiveStore, HandoffStore, ProfileStore, RequirementsDocStore,
    RetrospectiveStore, SubAgentVerifier, UserStoryStore, VerifierError,
};
use crate::models::*;

impl DirectiveStore for Database {
    fn get(&self, id: Uuid) -> anyhow::Result<Option<Directive>> {
        self.get_directive(id)
    }

    fn get_by_key(&self, key: &str) -> anyhow::Result<Option<Directive>> {
        self.get_directive_by_key(key)
    }

    fn insert_standalone(&self, input: &CreateDirectiveInput) -> anyhow::Result<Directive> {
        self.create_directive(input)
    }

    fn children(&self, parent_id: Uuid) -> anyhow::Result<Vec<Directive>> {
        self.get_children(parent_id)
    }

    fn compare_and_set_status(&self, update: &StatusUpdate) -> anyhow::Result<bool> {
        Database::compare_and_set_status(self, update)
    }

    fn set_progress_cache(&self, id: Uuid, progress: u8) -> anyhow::Result<()> {
        Database::set_progress_cache(self, id, progress)
    }

    fn append_children(&self, parent_id: Uuid, children: &[NewChild]) -> anyhow::Result<bool> {
        Database::append_children(self, parent_id, children)
    }
}

impl ProfileStore for Database {
    fn get_profile(&self, sd_type: &str) -> anyhow::Result<Option<ValidationProfile>> {
        Database::get_profile(self, sd_type)
    }

    fn list_profiles(&self) -> anyhow::Result<Vec<ValidationProfile>> {
        Database::list_profiles(self)
    }

    fn put_profile_if_unreferenced(
        &self,
        input: &CreateProfileInput,
        usage: ProfileUsage<'_>,
    ) -> anyhow::Result<Option<ValidationProfile>> {
        Database::put_profile_if_unreferenced(self, input, usage)
    }
}

impl RequirementsDocStore for Database {
    fn exists(&self, directive_id: Uuid, acceptable: &[PrdStatus]) -> anyhow::Result<bool> {
        self.requirements_doc_exists(directive_id, acceptable)
    }
}

impl DeliverableStore for Database {
    fn list(&self, directive_id: Uuid) -> anyhow::Result<Vec<Deliverable>> {
        self.list_deliverables(directive_id)
    }
}

impl UserStoryStore for Database {
    fn list(&self, directive_id: Uuid) -> anyhow::Result<Vec<UserStory>> {
        self.list_user_stories(directive_id)
    }
}

/// Verdicts recorded locally: the latest verdict per agent must pass.
/// No verdicts at all counts as verified.
impl SubAgentVerifier for Database {
    fn all_verified(&self, directive_id: Uuid) -> Result<bool, VerifierError> {
        let verdicts = self
            .latest_verdicts(directive_id)
            .map_err(|e| VerifierError::Unavailable(e.to_string()))?;
        Ok(verdicts.iter().all(|v| v.verdict.is_passing()))
    }
}

impl RetrospectiveStore for Database {
    fn exists(&self, directive_id: Uuid) -> anyhow::Result<bool> {
        self.retrospective_exists(directive_id)
    }
}

impl HandoffStore for Database {
    fn count_accepted_distinct_types(&self, directive_id: Uuid) -> anyhow::Result<u32> {
        self.count_accepted_handoff_types(directive_id)
    }
}
