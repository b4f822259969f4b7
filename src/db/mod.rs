mod schema;
mod signals;
mod stores;

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{Connection, Row};
use uuid::Uuid;

use crate::models::*;

pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

const DIRECTIVE_COLUMNS: &str = "id, key, title, declared_type, status, parent_id, relationship_type,
     priority, depends_on, progress_cache, created_at, updated_at, completed_at";

const PROFILE_COLUMNS: &str = "sd_type, lead_weight, plan_weight, exec_weight, verify_weight,
     final_weight, requires_prd, requires_deliverables, requires_e2e_tests, requires_sub_agents,
     requires_retrospective, min_handoffs, created_at";

impl Database {
    pub fn open(path: PathBuf) -> Result<Self> {
        let parent = path
            .parent()
            .ok_or_else(|| anyhow::anyhow!("Database path has no parent directory"))?;
        std::fs::create_dir_all(parent)?;
        let conn = Connection::open(&path)
            .with_context(|| format!("Failed to open database at {}", path.display()))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_default() -> Result<Self> {
        let dirs = directories::ProjectDirs::from("", "", "directive-engine")
            .ok_or_else(|| anyhow::anyhow!("Could not determine data directory"))?;
        let db_path = dirs.data_dir().join("directive-engine.db");
        Self::open(db_path)
    }

    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn migrate(&self) -> Result<()> {
        let conn = self.conn.lock().expect("database lock poisoned");
        schema::run_migrations(&conn)
    }

    // ============================================================
    // Directive operations
    // ============================================================

    pub fn get_directive(&self, id: Uuid) -> Result<Option<Directive>> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let mut stmt = conn.prepare(&format!(
            "SELECT {DIRECTIVE_COLUMNS} FROM directives WHERE id = ?"
        ))?;

        let mut rows = stmt.query([id.to_string()])?;
        if let Some(row) = rows.next()? {
            Ok(Some(row_to_directive(row)?))
        } else {
            Ok(None)
        }
    }

    pub fn get_directive_by_key(&self, key: &str) -> Result<Option<Directive>> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let mut stmt = conn.prepare(&format!(
            "SELECT {DIRECTIVE_COLUMNS} FROM directives WHERE key = ?"
        ))?;

        let mut rows = stmt.query([key])?;
        if let Some(row) = rows.next()? {
            Ok(Some(row_to_directive(row)?))
        } else {
            Ok(None)
        }
    }

    /// Top-level directives (standalone and parents).
    pub fn list_directives(&self) -> Result<Vec<Directive>> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let mut stmt = conn.prepare(&format!(
            "SELECT {DIRECTIVE_COLUMNS} FROM directives WHERE parent_id IS NULL ORDER BY key"
        ))?;

        let directives = stmt
            .query_map([], row_to_directive)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(directives)
    }

    /// Children of a parent, unordered. Chain order is derived by the scheduler.
    pub fn get_children(&self, parent_id: Uuid) -> Result<Vec<Directive>> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let mut stmt = conn.prepare(&format!(
            "SELECT {DIRECTIVE_COLUMNS} FROM directives WHERE parent_id = ? ORDER BY created_at, rowid"
        ))?;

        let children = stmt
            .query_map([parent_id.to_string()], row_to_directive)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(children)
    }

    pub fn create_directive(&self, input: &CreateDirectiveInput) -> Result<Directive> {
        if input.parent_id.is_some() {
            anyhow::bail!("Child directives are created by appending to the parent's chain");
        }

        let conn = self.conn.lock().expect("database lock poisoned");
        let id = Uuid::new_v4();
        let now = Utc::now();
        let priority = input.priority.unwrap_or(Priority::Medium);

        conn.execute(
            "INSERT INTO directives (id, key, title, declared_type, status, relationship_type,
                priority, progress_cache, created_at, updated_at)
             VALUES (?, ?, ?, ?, 'draft', 'standalone', ?, 0, ?, ?)",
            (
                id.to_string(),
                &input.key,
                &input.title,
                &input.declared_type,
                priority.as_str(),
                now.to_rfc3339(),
                now.to_rfc3339(),
            ),
        )
        .with_context(|| format!("Failed to create directive {}", input.key))?;

        Ok(Directive {
            id,
            key: input.key.clone(),
            title: input.title.clone(),
            declared_type: input.declared_type.clone(),
            status: DirectiveStatus::Draft,
            parent_id: None,
            relationship_type: RelationshipType::Standalone,
            priority,
            depends_on: None,
            progress_cache: 0,
            created_at: now,
            updated_at: now,
            completed_at: None,
        })
    }

    /// Insert `children` after the current chain tail in one transaction.
    ///
    /// Each row is inserted only if its `depends_on` is still the tail: a head
    /// only when the parent has no children, otherwise a sibling that nothing
    /// depends on yet. Returns false, with nothing written, if any row fails
    /// that condition or the parent is gone, completed, or itself a child.
    pub fn append_children(&self, parent_id: Uuid, children: &[NewChild]) -> Result<bool> {
        let mut conn = self.conn.lock().expect("database lock poisoned");
        let tx = conn.transaction()?;
        let now = Utc::now().to_rfc3339();
        let parent = parent_id.to_string();

        for child in children {
            let inserted = tx.execute(
                "INSERT INTO directives (id, key, title, declared_type, status, parent_id,
                    relationship_type, priority, depends_on, progress_cache, created_at, updated_at)
                 SELECT ?1, ?2, ?3, ?4, 'draft', ?5, 'child', ?6, ?7, 0, ?8, ?8
                 WHERE EXISTS (
                         SELECT 1 FROM directives
                         WHERE id = ?5 AND status != 'completed' AND relationship_type != 'child'
                       )
                   AND (
                         (?7 IS NULL AND NOT EXISTS (SELECT 1 FROM directives WHERE parent_id = ?5))
                         OR (?7 IS NOT NULL
                             AND EXISTS (SELECT 1 FROM directives WHERE id = ?7 AND parent_id = ?5)
                             AND NOT EXISTS (
                                 SELECT 1 FROM directives WHERE parent_id = ?5 AND depends_on = ?7
                             ))
                       )",
                (
                    child.id.to_string(),
                    &child.key,
                    &child.title,
                    &child.declared_type,
                    &parent,
                    child.priority.as_str(),
                    child.depends_on.map(|u| u.to_string()),
                    &now,
                ),
            )?;

            if inserted == 0 {
                // Dropping the transaction rolls back earlier inserts.
                return Ok(false);
            }
        }

        tx.execute(
            "UPDATE directives SET relationship_type = 'parent', updated_at = ?
             WHERE id = ? AND relationship_type = 'standalone'",
            (&now, &parent),
        )?;
        tx.commit()?;

        Ok(true)
    }

    /// Conditional status write; see [`StatusUpdate`].
    ///
    /// Completion only applies from a working status, and also stamps
    /// `completed_at` and snaps `progress_cache` to 100.
    pub fn compare_and_set_status(&self, update: &StatusUpdate) -> Result<bool> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let now = Utc::now().to_rfc3339();

        let rows = conn.execute(
            "UPDATE directives
             SET status = ?1,
                 updated_at = ?2,
                 completed_at = CASE WHEN ?1 = 'completed' THEN ?2 ELSE completed_at END,
                 progress_cache = CASE WHEN ?1 = 'completed' THEN 100 ELSE progress_cache END
             WHERE id = ?3
               AND status = ?4
               AND (?1 != 'completed'
                    OR status IN ('active', 'in_progress', 'pending_approval', 'review'))
               AND (depends_on IS NULL OR EXISTS (
                     SELECT 1 FROM directives p
                     WHERE p.id = directives.depends_on AND p.status = 'completed'))
               AND (?5 = 0 OR NOT EXISTS (
                     SELECT 1 FROM directives c
                     WHERE c.parent_id = directives.id AND c.status != 'completed'))",
            (
                update.target.as_str(),
                &now,
                update.id.to_string(),
                update.expected.as_str(),
                update.require_children_complete,
            ),
        )?;

        Ok(rows > 0)
    }

    pub fn set_progress_cache(&self, id: Uuid, progress: u8) -> Result<()> {
        let conn = self.conn.lock().expect("database lock poisoned");
        conn.execute(
            "UPDATE directives SET progress_cache = ? WHERE id = ?",
            (progress.min(100), id.to_string()),
        )?;
        Ok(())
    }

    // ============================================================
    // Profile operations
    // ============================================================

    pub fn get_profile(&self, sd_type: &str) -> Result<Option<ValidationProfile>> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let mut stmt = conn.prepare(&format!(
            "SELECT {PROFILE_COLUMNS} FROM validation_profiles WHERE sd_type = ?"
        ))?;

        let mut rows = stmt.query([sd_type])?;
        if let Some(row) = rows.next()? {
            Ok(Some(row_to_profile(row)?))
        } else {
            Ok(None)
        }
    }

    pub fn list_profiles(&self) -> Result<Vec<ValidationProfile>> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let mut stmt = conn.prepare(&format!(
            "SELECT {PROFILE_COLUMNS} FROM validation_profiles ORDER BY sd_type"
        ))?;

        let profiles = stmt
            .query_map([], row_to_profile)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(profiles)
    }

    /// Insert a profile, or replace it if no directive evaluates against it.
    ///
    /// See [`ProfileUsage`] for what counts as evaluating against it.
    /// Returns `None` when the replacement was refused.
    pub fn put_profile_if_unreferenced(
        &self,
        input: &CreateProfileInput,
        usage: ProfileUsage<'_>,
    ) -> Result<Option<ValidationProfile>> {
        let changed = {
            let conn = self.conn.lock().expect("database lock poisoned");
            let now = Utc::now().to_rfc3339();

            conn.execute(
                "INSERT INTO validation_profiles (sd_type, lead_weight, plan_weight, exec_weight,
                    verify_weight, final_weight, requires_prd, requires_deliverables,
                    requires_e2e_tests, requires_sub_agents, requires_retrospective,
                    min_handoffs, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
                 ON CONFLICT(sd_type) DO UPDATE SET
                    lead_weight = excluded.lead_weight,
                    plan_weight = excluded.plan_weight,
                    exec_weight = excluded.exec_weight,
                    verify_weight = excluded.verify_weight,
                    final_weight = excluded.final_weight,
                    requires_prd = excluded.requires_prd,
                    requires_deliverables = excluded.requires_deliverables,
                    requires_e2e_tests = excluded.requires_e2e_tests,
                    requires_sub_agents = excluded.requires_sub_agents,
                    requires_retrospective = excluded.requires_retrospective,
                    min_handoffs = excluded.min_handoffs,
                    created_at = excluded.created_at
                 WHERE NOT EXISTS (
                    SELECT 1 FROM directives d
                    WHERE d.declared_type = excluded.sd_type
                       OR (excluded.sd_type = ?15
                           AND ?14 != '' AND substr(d.key, 1, length(?14)) = ?14)
                       OR (?16 AND NOT EXISTS (
                             SELECT 1 FROM validation_profiles v
                             WHERE v.sd_type = CASE
                                 WHEN ?14 != '' AND substr(d.key, 1, length(?14)) = ?14 THEN ?15
                                 ELSE d.declared_type
                             END))
                 )",
                (
                    &input.sd_type,
                    input.lead_weight,
                    input.plan_weight,
                    input.exec_weight,
                    input.verify_weight,
                    input.final_weight,
                    input.requires_prd,
                    input.requires_deliverables,
                    input.requires_e2e_tests,
                    input.requires_sub_agents,
                    input.requires_retrospective,
                    input.min_handoffs,
                    &now,
                    usage.quick_fix_prefix,
                    usage.quick_fix_type,
                    usage.is_fallback,
                ),
            )
            .with_context(|| format!("Failed to store profile {}", input.sd_type))?
        };

        if changed == 0 {
            return Ok(None);
        }
        self.get_profile(&input.sd_type)
    }
}

impl Clone for Database {
    fn clone(&self) -> Self {
        Self {
            conn: self.conn.clone(),
        }
    }
}

fn row_to_directive(row: &Row<'_>) -> rusqlite::Result<Directive> {
    Ok(Directive {
        id: parse_uuid(row.get::<_, String>(0)?),
        key: row.get(1)?,
        title: row.get(2)?,
        declared_type: row.get(3)?,
        status: DirectiveStatus::from_str(&row.get::<_, String>(4)?)
            .unwrap_or(DirectiveStatus::Draft),
        parent_id: row.get::<_, Option<String>>(5)?.map(parse_uuid),
        relationship_type: RelationshipType::from_str(&row.get::<_, String>(6)?)
            .unwrap_or(RelationshipType::Standalone),
        priority: Priority::from_str(&row.get::<_, String>(7)?).unwrap_or(Priority::Medium),
        depends_on: row.get::<_, Option<String>>(8)?.map(parse_uuid),
        progress_cache: row.get(9)?,
        created_at: parse_datetime(row.get::<_, String>(10)?),
        updated_at: parse_datetime(row.get::<_, String>(11)?),
        completed_at: row.get::<_, Option<String>>(12)?.map(parse_datetime),
    })
}

fn row_to_profile(row: &Row<'_>) -> rusqlite::Result<ValidationProfile> {
    Ok(ValidationProfile {
        sd_type: row.get(0)?,
        lead_weight: row.get(1)?,
        plan_weight: row.get(2)?,
        exec_weight: row.get(3)?,
        verify_weight: row.get(4)?,
        final_weight: row.get(5)?,
        requires_prd: row.get::<_, i32>(6)? != 0,
        requires_deliverables: row.get::<_, i32>(7)? != 0,
        requires_e2e_tests: row.get::<_, i32>(8)? != 0,
        requires_sub_agents: row.get::<_, i32>(9)? != 0,
        requires_retrospective: row.get::<_, i32>(10)? != 0,
        min_handoffs: row.get(11)?,
        created_at: parse_datetime(row.get::<_, String>(12)?),
    })
}

fn parse_uuid(s: String) -> Uuid {
    Uuid::parse_str(&s).unwrap_or_else(|_| Uuid::nil())
}

fn parse_datetime(s: String) -> chrono::DateTime<Utc> {
    chrono::DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
