use anyhow::Result;
use chrono::Utc;
use rusqlite::params_from_iter;
use uuid::Uuid;

use super::{parse_datetime, parse_uuid, Database};
use crate::models::*;

impl Database {
    // ============================================================
    // Requirements documents
    // ============================================================

    pub fn create_requirements_doc(
        &self,
        directive_id: Uuid,
        input: CreateRequirementsDocInput,
    ) -> Result<RequirementsDoc> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let id = Uuid::new_v4();
        let now = Utc::now();

        conn.execute(
            "INSERT INTO requirements_docs (id, directive_id, status, created_at) VALUES (?, ?, ?, ?)",
            (
                id.to_string(),
                directive_id.to_string(),
                input.status.as_str(),
                now.to_rfc3339(),
            ),
        )?;

        Ok(RequirementsDoc {
            id,
            directive_id,
            status: input.status,
            created_at: now,
        })
    }

    pub fn requirements_doc_exists(
        &self,
        directive_id: Uuid,
        acceptable: &[PrdStatus],
    ) -> Result<bool> {
        if acceptable.is_empty() {
            return Ok(false);
        }

        let conn = self.conn.lock().expect("database lock poisoned");
        let placeholders = vec!["?"; acceptable.len()].join(", ");
        let sql = format!(
            "SELECT EXISTS (SELECT 1 FROM requirements_docs WHERE directive_id = ? AND status IN ({}))",
            placeholders
        );

        let params = std::iter::once(directive_id.to_string())
            .chain(acceptable.iter().map(|s| s.as_str().to_string()));
        let exists: bool = conn.query_row(&sql, params_from_iter(params), |row| row.get(0))?;
        Ok(exists)
    }

    // ============================================================
    // Deliverables
    // ============================================================

    pub fn list_deliverables(&self, directive_id: Uuid) -> Result<Vec<Deliverable>> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let mut stmt = conn.prepare(
            "SELECT id, directive_id, name, priority, completion_status, created_at, updated_at
             FROM deliverables WHERE directive_id = ? ORDER BY created_at",
        )?;

        let deliverables = stmt
            .query_map([directive_id.to_string()], |row| {
                Ok(Deliverable {
                    id: parse_uuid(row.get::<_, String>(0)?),
                    directive_id: parse_uuid(row.get::<_, String>(1)?),
                    name: row.get(2)?,
                    priority: DeliverablePriority::from_str(&row.get::<_, String>(3)?)
                        .unwrap_or(DeliverablePriority::Required),
                    completion_status: CompletionStatus::from_str(&row.get::<_, String>(4)?)
                        .unwrap_or(CompletionStatus::NotStarted),
                    created_at: parse_datetime(row.get::<_, String>(5)?),
                    updated_at: parse_datetime(row.get::<_, String>(6)?),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(deliverables)
    }

    pub fn create_deliverable(
        &self,
        directive_id: Uuid,
        input: CreateDeliverableInput,
    ) -> Result<Deliverable> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let id = Uuid::new_v4();
        let now = Utc::now();
        let completion_status = input.completion_status.unwrap_or(CompletionStatus::NotStarted);

        conn.execute(
            "INSERT INTO deliverables (id, directive_id, name, priority, completion_status, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
            (
                id.to_string(),
                directive_id.to_string(),
                &input.name,
                input.priority.as_str(),
                completion_status.as_str(),
                now.to_rfc3339(),
                now.to_rfc3339(),
            ),
        )?;

        Ok(Deliverable {
            id,
            directive_id,
            name: input.name,
            priority: input.priority,
            completion_status,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn update_deliverable(
        &self,
        id: Uuid,
        input: UpdateDeliverableInput,
    ) -> Result<Option<Deliverable>> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let now = Utc::now();

        let rows = conn.execute(
            "UPDATE deliverables SET completion_status = ?, updated_at = ? WHERE id = ?",
            (
                input.completion_status.as_str(),
                now.to_rfc3339(),
                id.to_string(),
            ),
        )?;
        if rows == 0 {
            return Ok(None);
        }

        let mut stmt = conn.prepare(
            "SELECT directive_id, name, priority, created_at FROM deliverables WHERE id = ?",
        )?;
        let mut rows = stmt.query([id.to_string()])?;
        let Some(row) = rows.next()? else {
            return Ok(None);
        };

        Ok(Some(Deliverable {
            id,
            directive_id: parse_uuid(row.get::<_, String>(0)?),
            name: row.get(1)?,
            priority: DeliverablePriority::from_str(&row.get::<_, String>(2)?)
                .unwrap_or(DeliverablePriority::Required),
            completion_status: input.completion_status,
            created_at: parse_datetime(row.get::<_, String>(3)?),
            updated_at: now,
        }))
    }

    // ============================================================
    // User stories
    // ============================================================

    pub fn list_user_stories(&self, directive_id: Uuid) -> Result<Vec<UserStory>> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let mut stmt = conn.prepare(
            "SELECT id, directive_id, title, validation_status, e2e_test_status, created_at
             FROM user_stories WHERE directive_id = ? ORDER BY created_at",
        )?;

        let stories = stmt
            .query_map([directive_id.to_string()], |row| {
                Ok(UserStory {
                    id: parse_uuid(row.get::<_, String>(0)?),
                    directive_id: parse_uuid(row.get::<_, String>(1)?),
                    title: row.get(2)?,
                    validation_status: ValidationStatus::from_str(&row.get::<_, String>(3)?)
                        .unwrap_or(ValidationStatus::Pending),
                    e2e_test_status: E2eTestStatus::from_str(&row.get::<_, String>(4)?)
                        .unwrap_or(E2eTestStatus::NotRun),
                    created_at: parse_datetime(row.get::<_, String>(5)?),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(stories)
    }

    pub fn create_user_story(
        &self,
        directive_id: Uuid,
        input: CreateUserStoryInput,
    ) -> Result<UserStory> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let id = Uuid::new_v4();
        let now = Utc::now();
        let validation_status = input.validation_status.unwrap_or(ValidationStatus::Pending);
        let e2e_test_status = input.e2e_test_status.unwrap_or(E2eTestStatus::NotRun);

        conn.execute(
            "INSERT INTO user_stories (id, directive_id, title, validation_status, e2e_test_status, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
            (
                id.to_string(),
                directive_id.to_string(),
                &input.title,
                validation_status.as_str(),
                e2e_test_status.as_str(),
                now.to_rfc3339(),
            ),
        )?;

        Ok(UserStory {
            id,
            directive_id,
            title: input.title,
            validation_status,
            e2e_test_status,
            created_at: now,
        })
    }

    pub fn update_user_story(
        &self,
        id: Uuid,
        input: UpdateUserStoryInput,
    ) -> Result<Option<UserStory>> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let mut stmt = conn.prepare(
            "SELECT directive_id, title, validation_status, e2e_test_status, created_at
             FROM user_stories WHERE id = ?",
        )?;
        let mut rows = stmt.query([id.to_string()])?;
        let Some(row) = rows.next()? else {
            return Ok(None);
        };

        let existing = UserStory {
            id,
            directive_id: parse_uuid(row.get::<_, String>(0)?),
            title: row.get(1)?,
            validation_status: ValidationStatus::from_str(&row.get::<_, String>(2)?)
                .unwrap_or(ValidationStatus::Pending),
            e2e_test_status: E2eTestStatus::from_str(&row.get::<_, String>(3)?)
                .unwrap_or(E2eTestStatus::NotRun),
            created_at: parse_datetime(row.get::<_, String>(4)?),
        };
        drop(rows);
        drop(stmt);

        let validation_status = input
            .validation_status
            .unwrap_or(existing.validation_status);
        let e2e_test_status = input.e2e_test_status.unwrap_or(existing.e2e_test_status);

        conn.execute(
            "UPDATE user_stories SET validation_status = ?, e2e_test_status = ? WHERE id = ?",
            (
                validation_status.as_str(),
                e2e_test_status.as_str(),
                id.to_string(),
            ),
        )?;

        Ok(Some(UserStory {
            validation_status,
            e2e_test_status,
            ..existing
        }))
    }

    // ============================================================
    // Handoffs
    // ============================================================

    pub fn list_handoffs(&self, directive_id: Uuid) -> Result<Vec<Handoff>> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let mut stmt = conn.prepare(
            "SELECT id, directive_id, from_phase, to_phase, status, created_at
             FROM handoffs WHERE directive_id = ? ORDER BY created_at",
        )?;

        let handoffs = stmt
            .query_map([directive_id.to_string()], |row| {
                Ok(Handoff {
                    id: parse_uuid(row.get::<_, String>(0)?),
                    directive_id: parse_uuid(row.get::<_, String>(1)?),
                    from_phase: HandoffPhase::from_str(&row.get::<_, String>(2)?)
                        .unwrap_or(HandoffPhase::Lead),
                    to_phase: HandoffPhase::from_str(&row.get::<_, String>(3)?)
                        .unwrap_or(HandoffPhase::Plan),
                    status: HandoffStatus::from_str(&row.get::<_, String>(4)?)
                        .unwrap_or(HandoffStatus::PendingAcceptance),
                    created_at: parse_datetime(row.get::<_, String>(5)?),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(handoffs)
    }

    pub fn create_handoff(&self, directive_id: Uuid, input: CreateHandoffInput) -> Result<Handoff> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let id = Uuid::new_v4();
        let now = Utc::now();
        let status = input.status.unwrap_or(HandoffStatus::PendingAcceptance);

        conn.execute(
            "INSERT INTO handoffs (id, directive_id, from_phase, to_phase, status, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
            (
                id.to_string(),
                directive_id.to_string(),
                input.from_phase.as_str(),
                input.to_phase.as_str(),
                status.as_str(),
                now.to_rfc3339(),
            ),
        )?;

        Ok(Handoff {
            id,
            directive_id,
            from_phase: input.from_phase,
            to_phase: input.to_phase,
            status,
            created_at: now,
        })
    }

    /// Mark a handoff accepted. Returns the directive it belongs to.
    pub fn accept_handoff(&self, id: Uuid) -> Result<Option<Uuid>> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let rows = conn.execute(
            "UPDATE handoffs SET status = 'accepted' WHERE id = ?",
            [id.to_string()],
        )?;
        if rows == 0 {
            return Ok(None);
        }

        let directive_id: String = conn.query_row(
            "SELECT directive_id FROM handoffs WHERE id = ?",
            [id.to_string()],
            |row| row.get(0),
        )?;
        Ok(Some(parse_uuid(directive_id)))
    }

    /// Distinct `(from, to)` pairs among accepted handoffs.
    pub fn count_accepted_handoff_types(&self, directive_id: Uuid) -> Result<u32> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let count: u32 = conn.query_row(
            "SELECT COUNT(DISTINCT from_phase || '-' || to_phase)
             FROM handoffs WHERE directive_id = ? AND status = 'accepted'",
            [directive_id.to_string()],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    // ============================================================
    // Retrospectives
    // ============================================================

    /// Record that a retrospective exists. Recording twice keeps the first.
    pub fn record_retrospective(&self, directive_id: Uuid) -> Result<Retrospective> {
        let conn = self.conn.lock().expect("database lock poisoned");
        conn.execute(
            "INSERT OR IGNORE INTO retrospectives (directive_id, created_at) VALUES (?, ?)",
            (directive_id.to_string(), Utc::now().to_rfc3339()),
        )?;

        let created_at: String = conn.query_row(
            "SELECT created_at FROM retrospectives WHERE directive_id = ?",
            [directive_id.to_string()],
            |row| row.get(0),
        )?;

        Ok(Retrospective {
            directive_id,
            created_at: parse_datetime(created_at),
        })
    }

    pub fn retrospective_exists(&self, directive_id: Uuid) -> Result<bool> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let exists: bool = conn.query_row(
            "SELECT EXISTS (SELECT 1 FROM retrospectives WHERE directive_id = ?)",
            [directive_id.to_string()],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    // ============================================================
    // Sub-agent verdicts
    // ============================================================

    pub fn record_verdict(
        &self,
        directive_id: Uuid,
        input: CreateVerdictInput,
    ) -> Result<SubAgentVerdict> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let id = Uuid::new_v4();
        let now = Utc::now();

        conn.execute(
            "INSERT INTO subagent_verdicts (id, directive_id, agent_code, verdict, created_at)
             VALUES (?, ?, ?, ?, ?)",
            (
                id.to_string(),
                directive_id.to_string(),
                &input.agent_code,
                input.verdict.as_str(),
                now.to_rfc3339(),
            ),
        )?;

        Ok(SubAgentVerdict {
            id,
            directive_id,
            agent_code: input.agent_code,
            verdict: input.verdict,
            created_at: now,
        })
    }

    /// Most recent verdict per agent code.
    pub fn latest_verdicts(&self, directive_id: Uuid) -> Result<Vec<SubAgentVerdict>> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let mut stmt = conn.prepare(
            "SELECT v.id, v.directive_id, v.agent_code, v.verdict, v.created_at
             FROM subagent_verdicts v
             WHERE v.directive_id = ?1
               AND v.rowid = (
                   SELECT MAX(w.rowid) FROM subagent_verdicts w
                   WHERE w.directive_id = v.directive_id AND w.agent_code = v.agent_code
               )
             ORDER BY v.agent_code",
        )?;

        let verdicts = stmt
            .query_map([directive_id.to_string()], |row| {
                Ok(SubAgentVerdict {
                    id: parse_uuid(row.get::<_, String>(0)?),
                    directive_id: parse_uuid(row.get::<_, String>(1)?),
                    agent_code: row.get(2)?,
                    verdict: Verdict::from_str(&row.get::<_, String>(3)?)
                        .unwrap_or(Verdict::Blocked),
                    created_at: parse_datetime(row.get::<_, String>(4)?),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(verdicts)
    }
}
