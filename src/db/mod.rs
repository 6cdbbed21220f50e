mod schema;

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use uuid::Uuid;

use crate::models::*;

/// Outcome of a guarded session state transition.
///
/// The compare-and-set runs under a single connection lock, so two callers
/// racing to transition the same session cannot both observe the old state.
#[derive(Debug)]
pub enum SessionTransition {
    Updated(Session),
    /// The session exists but is not in a state the transition allows.
    WrongState(Session),
    NotFound,
}

pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    pub fn open(path: PathBuf) -> Result<Self> {
        let parent = path
            .parent()
            .ok_or_else(|| anyhow::anyhow!("Database path has no parent directory"))?;
        std::fs::create_dir_all(parent)?;
        let conn = Connection::open(&path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_default() -> Result<Self> {
        let dirs = directories::ProjectDirs::from("", "", "warden")
            .ok_or_else(|| anyhow::anyhow!("Could not determine data directory"))?;
        let db_path = dirs.data_dir().join("warden.db");
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
    // Lock journal operations
    // ============================================================

    /// Insert an open journal row for a freshly granted lease.
    ///
    /// Callers insert *before* handing the lease out, so a crash between this
    /// write and the in-memory bookkeeping leaves a row recovery can reconcile.
    pub fn insert_lease(&self, record: &LeaseRecord) -> Result<()> {
        let conn = self.conn.lock().expect("database lock poisoned");
        conn.execute(
            "INSERT INTO resource_locks (id, project_id, resource_type, resource_name, agent_id, acquired_at, expires_at, released_at, release_reason)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            (
                record.id.to_string(),
                record.key.project_id.to_string(),
                record.key.resource_type.as_str(),
                &record.key.resource_name,
                record.agent_id.to_string(),
                record.acquired_at.to_rfc3339(),
                record.expires_at.map(|at| at.to_rfc3339()),
                record.released_at.map(|at| at.to_rfc3339()),
                record.release_reason.map(|r| r.as_str()),
            ),
        )?;
        Ok(())
    }

    /// Stamp a journal row released. Returns `false` if the row was already
    /// closed (or never existed), making close-out idempotent at the store.
    pub fn close_lease(
        &self,
        lease_id: Uuid,
        released_at: DateTime<Utc>,
        reason: ReleaseReason,
    ) -> Result<bool> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let rows = conn.execute(
            "UPDATE resource_locks SET released_at = ?, release_reason = ?
             WHERE id = ? AND released_at IS NULL",
            (
                released_at.to_rfc3339(),
                reason.as_str(),
                lease_id.to_string(),
            ),
        )?;
        Ok(rows > 0)
    }

    pub fn get_lease(&self, lease_id: Uuid) -> Result<Option<LeaseRecord>> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let mut stmt = conn.prepare(
            "SELECT id, project_id, resource_type, resource_name, agent_id, acquired_at, expires_at, released_at, release_reason
             FROM resource_locks WHERE id = ?",
        )?;

        let mut rows = stmt.query([lease_id.to_string()])?;
        if let Some(row) = rows.next()? {
            Ok(Some(lease_from_row(row)?))
        } else {
            Ok(None)
        }
    }

    /// All journal rows not yet closed, oldest first.
    pub fn open_leases(&self) -> Result<Vec<LeaseRecord>> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let mut stmt = conn.prepare(
            "SELECT id, project_id, resource_type, resource_name, agent_id, acquired_at, expires_at, released_at, release_reason
             FROM resource_locks WHERE released_at IS NULL ORDER BY acquired_at",
        )?;

        let leases = stmt
            .query_map([], lease_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(leases)
    }

    /// Open journal rows acquired before `cutoff`, oldest first.
    pub fn open_leases_older_than(&self, cutoff: DateTime<Utc>) -> Result<Vec<LeaseRecord>> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let mut stmt = conn.prepare(
            "SELECT id, project_id, resource_type, resource_name, agent_id, acquired_at, expires_at, released_at, release_reason
             FROM resource_locks WHERE released_at IS NULL AND acquired_at < ? ORDER BY acquired_at",
        )?;

        let leases = stmt
            .query_map([cutoff.to_rfc3339()], lease_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(leases)
    }

    // ============================================================
    // Session operations
    // ============================================================

    pub fn create_session(&self) -> Result<Session> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let id = Uuid::new_v4();
        let now = Utc::now();

        conn.execute(
            "INSERT INTO sessions (id, status, current_project_id, active_project_ids, started_at)
             VALUES (?, 'active', NULL, '[]', ?)",
            (id.to_string(), now.to_rfc3339()),
        )?;

        Ok(Session {
            id,
            status: SessionStatus::Active,
            current_project_id: None,
            active_project_ids: Vec::new(),
            started_at: now,
            paused_at: None,
            resumed_at: None,
            completed_at: None,
        })
    }

    pub fn get_session(&self, id: Uuid) -> Result<Option<Session>> {
        let conn = self.conn.lock().expect("database lock poisoned");
        get_session_locked(&conn, id)
    }

    /// Sessions not yet completed, most recently started first.
    pub fn active_sessions(&self) -> Result<Vec<Session>> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let mut stmt = conn.prepare(
            "SELECT id, status, current_project_id, active_project_ids, started_at, paused_at, resumed_at, completed_at
             FROM sessions WHERE status != 'completed' ORDER BY started_at DESC",
        )?;

        let sessions = stmt
            .query_map([], session_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(sessions)
    }

    /// Move `project_id` to the front of the MRU list and make it current.
    ///
    /// The read-modify-write runs under one connection lock so two callers
    /// racing on the same session cannot lose an update.
    pub fn switch_project(&self, id: Uuid, project_id: Uuid) -> Result<Option<Session>> {
        let conn = self.conn.lock().expect("database lock poisoned");

        let Some(mut session) = get_session_locked(&conn, id)? else {
            return Ok(None);
        };

        session.active_project_ids.retain(|p| *p != project_id);
        session.active_project_ids.insert(0, project_id);
        session.current_project_id = Some(project_id);

        conn.execute(
            "UPDATE sessions SET current_project_id = ?, active_project_ids = ? WHERE id = ?",
            (
                project_id.to_string(),
                serde_json::to_string(&session.active_project_ids)?,
                id.to_string(),
            ),
        )?;

        Ok(Some(session))
    }

    /// Compare-and-set a session's status. Only sessions currently in one of
    /// `allowed_from` are updated; the timestamp column matching `to` is
    /// stamped alongside.
    pub fn transition_session(
        &self,
        id: Uuid,
        allowed_from: &[SessionStatus],
        to: SessionStatus,
    ) -> Result<SessionTransition> {
        let conn = self.conn.lock().expect("database lock poisoned");

        let Some(mut session) = get_session_locked(&conn, id)? else {
            return Ok(SessionTransition::NotFound);
        };

        if !allowed_from.contains(&session.status) {
            return Ok(SessionTransition::WrongState(session));
        }

        let now = Utc::now();
        let stamp_column = match to {
            SessionStatus::Active => "resumed_at",
            SessionStatus::Paused => "paused_at",
            SessionStatus::Completed => "completed_at",
        };

        conn.execute(
            &format!(
                "UPDATE sessions SET status = ?, {} = ? WHERE id = ?",
                stamp_column
            ),
            (to.as_str(), now.to_rfc3339(), id.to_string()),
        )?;

        session.status = to;
        match to {
            SessionStatus::Active => session.resumed_at = Some(now),
            SessionStatus::Paused => session.paused_at = Some(now),
            SessionStatus::Completed => session.completed_at = Some(now),
        }

        Ok(SessionTransition::Updated(session))
    }

    // ============================================================
    // Agent operations
    // ============================================================

    pub fn insert_agent(&self, agent: &Agent) -> Result<()> {
        let conn = self.conn.lock().expect("database lock poisoned");
        conn.execute(
            "INSERT INTO agents (id, agent_type, parent_id, project_id, feature_id, status, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            (
                agent.id.to_string(),
                agent.agent_type.as_str(),
                agent.parent_id.map(|u| u.to_string()),
                agent.project_id.to_string(),
                agent.feature_id.map(|u| u.to_string()),
                agent.status.as_str(),
                agent.created_at.to_rfc3339(),
                agent.updated_at.to_rfc3339(),
            ),
        )?;
        Ok(())
    }

    pub fn get_agent(&self, id: Uuid) -> Result<Option<Agent>> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let mut stmt = conn.prepare(
            "SELECT id, agent_type, parent_id, project_id, feature_id, status, created_at, updated_at
             FROM agents WHERE id = ?",
        )?;

        let mut rows = stmt.query([id.to_string()])?;
        if let Some(row) = rows.next()? {
            Ok(Some(agent_from_row(row)?))
        } else {
            Ok(None)
        }
    }

    pub fn update_agent_status(&self, id: Uuid, status: AgentStatus) -> Result<Option<Agent>> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let now = Utc::now();
        let rows = conn.execute(
            "UPDATE agents SET status = ?, updated_at = ? WHERE id = ?",
            (status.as_str(), now.to_rfc3339(), id.to_string()),
        )?;
        if rows == 0 {
            return Ok(None);
        }
        get_agent_locked(&conn, id)
    }

    pub fn get_agent_children(&self, parent_id: Uuid) -> Result<Vec<Agent>> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let mut stmt = conn.prepare(
            "SELECT id, agent_type, parent_id, project_id, feature_id, status, created_at, updated_at
             FROM agents WHERE parent_id = ? ORDER BY created_at",
        )?;

        let agents = stmt
            .query_map([parent_id.to_string()], agent_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(agents)
    }

    pub fn get_agents_by_project(&self, project_id: Uuid) -> Result<Vec<Agent>> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let mut stmt = conn.prepare(
            "SELECT id, agent_type, parent_id, project_id, feature_id, status, created_at, updated_at
             FROM agents WHERE project_id = ? ORDER BY created_at",
        )?;

        let agents = stmt
            .query_map([project_id.to_string()], agent_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(agents)
    }

    // ============================================================
    // Budget ledger operations
    // ============================================================

    pub fn insert_budget_entry(&self, entry: &BudgetEntry) -> Result<()> {
        let conn = self.conn.lock().expect("database lock poisoned");
        conn.execute(
            "INSERT INTO budget_entries (id, project_id, amount_usd, recorded_at)
             VALUES (?, ?, ?, ?)",
            (
                entry.id.to_string(),
                entry.project_id.to_string(),
                entry.amount_usd,
                entry.recorded_at.to_rfc3339(),
            ),
        )?;
        Ok(())
    }

    /// Sum of ledger entries for a project in `[from, to)`.
    pub fn spend_in_range(
        &self,
        project_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<f64> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let spent: f64 = conn.query_row(
            "SELECT COALESCE(SUM(amount_usd), 0.0) FROM budget_entries
             WHERE project_id = ? AND recorded_at >= ? AND recorded_at < ?",
            (
                project_id.to_string(),
                from.to_rfc3339(),
                to.to_rfc3339(),
            ),
            |row| row.get(0),
        )?;
        Ok(spent)
    }

    pub fn set_project_budget(&self, budget: &ProjectBudget) -> Result<()> {
        let conn = self.conn.lock().expect("database lock poisoned");
        conn.execute(
            "INSERT INTO project_budgets (project_id, daily_limit_usd, alert_threshold)
             VALUES (?, ?, ?)
             ON CONFLICT(project_id) DO UPDATE SET daily_limit_usd = excluded.daily_limit_usd, alert_threshold = excluded.alert_threshold",
            (
                budget.project_id.to_string(),
                budget.daily_limit_usd,
                budget.alert_threshold,
            ),
        )?;
        Ok(())
    }

    pub fn get_project_budget(&self, project_id: Uuid) -> Result<Option<ProjectBudget>> {
        let conn = self.conn.lock().expect("database lock poisoned");
        let mut stmt = conn.prepare(
            "SELECT project_id, daily_limit_usd, alert_threshold FROM project_budgets WHERE project_id = ?",
        )?;

        let mut rows = stmt.query([project_id.to_string()])?;
        if let Some(row) = rows.next()? {
            Ok(Some(ProjectBudget {
                project_id: parse_uuid(row.get::<_, String>(0)?),
                daily_limit_usd: row.get(1)?,
                alert_threshold: row.get(2)?,
            }))
        } else {
            Ok(None)
        }
    }
}

impl Clone for Database {
    fn clone(&self) -> Self {
        Self {
            conn: self.conn.clone(),
        }
    }
}

fn get_session_locked(conn: &Connection, id: Uuid) -> Result<Option<Session>> {
    let mut stmt = conn.prepare(
        "SELECT id, status, current_project_id, active_project_ids, started_at, paused_at, resumed_at, completed_at
         FROM sessions WHERE id = ?",
    )?;

    let mut rows = stmt.query([id.to_string()])?;
    if let Some(row) = rows.next()? {
        Ok(Some(session_from_row(row)?))
    } else {
        Ok(None)
    }
}

fn get_agent_locked(conn: &Connection, id: Uuid) -> Result<Option<Agent>> {
    let mut stmt = conn.prepare(
        "SELECT id, agent_type, parent_id, project_id, feature_id, status, created_at, updated_at
         FROM agents WHERE id = ?",
    )?;

    let mut rows = stmt.query([id.to_string()])?;
    if let Some(row) = rows.next()? {
        Ok(Some(agent_from_row(row)?))
    } else {
        Ok(None)
    }
}

fn lease_from_row(row: &rusqlite::Row) -> rusqlite::Result<LeaseRecord> {
    let type_str: String = row.get(2)?;
    let resource_type = ResourceType::from_str(&type_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            2,
            rusqlite::types::Type::Text,
            format!("unknown resource type: {}", type_str).into(),
        )
    })?;

    Ok(LeaseRecord {
        id: parse_uuid(row.get::<_, String>(0)?),
        key: ResourceKey {
            project_id: parse_uuid(row.get::<_, String>(1)?),
            resource_type,
            resource_name: row.get(3)?,
        },
        agent_id: parse_uuid(row.get::<_, String>(4)?),
        acquired_at: parse_datetime(row.get::<_, String>(5)?),
        expires_at: row.get::<_, Option<String>>(6)?.map(parse_datetime),
        released_at: row.get::<_, Option<String>>(7)?.map(parse_datetime),
        release_reason: row
            .get::<_, Option<String>>(8)?
            .and_then(|s| ReleaseReason::from_str(&s)),
    })
}

fn session_from_row(row: &rusqlite::Row) -> rusqlite::Result<Session> {
    let project_ids_json: String = row.get(3)?;
    let active_project_ids: Vec<Uuid> =
        serde_json::from_str(&project_ids_json).unwrap_or_default();

    Ok(Session {
        id: parse_uuid(row.get::<_, String>(0)?),
        status: SessionStatus::from_str(&row.get::<_, String>(1)?)
            .unwrap_or(SessionStatus::Active),
        current_project_id: row.get::<_, Option<String>>(2)?.map(parse_uuid),
        active_project_ids,
        started_at: parse_datetime(row.get::<_, String>(4)?),
        paused_at: row.get::<_, Option<String>>(5)?.map(parse_datetime),
        resumed_at: row.get::<_, Option<String>>(6)?.map(parse_datetime),
        completed_at: row.get::<_, Option<String>>(7)?.map(parse_datetime),
    })
}

fn agent_from_row(row: &rusqlite::Row) -> rusqlite::Result<Agent> {
    Ok(Agent {
        id: parse_uuid(row.get::<_, String>(0)?),
        agent_type: AgentType::from_str(&row.get::<_, String>(1)?).unwrap_or(AgentType::Coder),
        parent_id: row.get::<_, Option<String>>(2)?.map(parse_uuid),
        project_id: parse_uuid(row.get::<_, String>(3)?),
        feature_id: row.get::<_, Option<String>>(4)?.map(parse_uuid),
        status: AgentStatus::from_str(&row.get::<_, String>(5)?).unwrap_or(AgentStatus::Pending),
        created_at: parse_datetime(row.get::<_, String>(6)?),
        updated_at: parse_datetime(row.get::<_, String>(7)?),
    })
}

fn parse_uuid(s: String) -> Uuid {
    Uuid::parse_str(&s).unwrap_or_else(|_| Uuid::nil())
}

fn parse_datetime(s: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
