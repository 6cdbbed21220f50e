//! Session Store.
//!
//! Durable bookkeeping of work sessions and their lifecycle state. Sessions
//! are owned exclusively by this store and mutated only through its API; the
//! underlying rows survive restarts, so any previously created session can be
//! recovered.

use uuid::Uuid;

use crate::db::{Database, SessionTransition};
use crate::error::{Error, Result};
use crate::models::{Session, SessionStatus};

#[derive(Clone)]
pub struct SessionStore {
    db: Database,
}

impl SessionStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Begin a new unit of work: status `Active`, no projects yet.
    pub fn create_session(&self) -> Result<Session> {
        let session = self.db.create_session()?;
        tracing::info!(session = %session.id, "session created");
        Ok(session)
    }

    /// Make `project_id` the session's current project, moving it to the
    /// front of the most-recently-used list (deduplicated). Atomic per
    /// session: two racing switches cannot lose an update.
    pub fn switch_project(&self, session_id: Uuid, project_id: Uuid) -> Result<Session> {
        self.db
            .switch_project(session_id, project_id)?
            .ok_or(Error::SessionNotFound(session_id))
    }

    /// `Active -> Paused`. Pausing a paused or completed session is rejected.
    pub fn pause(&self, session_id: Uuid) -> Result<Session> {
        match self
            .db
            .transition_session(session_id, &[SessionStatus::Active], SessionStatus::Paused)?
        {
            SessionTransition::Updated(session) => {
                tracing::info!(session = %session.id, "session paused");
                Ok(session)
            }
            SessionTransition::WrongState(session) => Err(Error::InvalidInput(format!(
                "cannot pause a {} session",
                session.status.as_str()
            ))),
            SessionTransition::NotFound => Err(Error::SessionNotFound(session_id)),
        }
    }

    /// `Paused -> Active`. Resuming a session that is already active is a
    /// no-op; resuming a completed session is rejected.
    pub fn resume(&self, session_id: Uuid) -> Result<Session> {
        match self
            .db
            .transition_session(session_id, &[SessionStatus::Paused], SessionStatus::Active)?
        {
            SessionTransition::Updated(session) => {
                tracing::info!(session = %session.id, "session resumed");
                Ok(session)
            }
            SessionTransition::WrongState(session) if session.status == SessionStatus::Active => {
                Ok(session)
            }
            SessionTransition::WrongState(session) => Err(Error::InvalidInput(format!(
                "cannot resume a {} session",
                session.status.as_str()
            ))),
            SessionTransition::NotFound => Err(Error::SessionNotFound(session_id)),
        }
    }

    /// Terminal transition from `Active` or `Paused`. Nothing leaves
    /// `Completed`.
    pub fn complete(&self, session_id: Uuid) -> Result<Session> {
        match self.db.transition_session(
            session_id,
            &[SessionStatus::Active, SessionStatus::Paused],
            SessionStatus::Completed,
        )? {
            SessionTransition::Updated(session) => {
                tracing::info!(session = %session.id, "session completed");
                Ok(session)
            }
            SessionTransition::WrongState(session) => Err(Error::InvalidInput(format!(
                "cannot complete a {} session",
                session.status.as_str()
            ))),
            SessionTransition::NotFound => Err(Error::SessionNotFound(session_id)),
        }
    }

    /// Reconstruct a session from durable storage, e.g. after a restart.
    /// Succeeds for any session previously created.
    pub fn recover(&self, session_id: Uuid) -> Result<Session> {
        self.db
            .get_session(session_id)?
            .ok_or(Error::SessionNotFound(session_id))
    }

    /// Sessions not yet completed, for the dashboard layer.
    pub fn active_sessions(&self) -> Result<Vec<Session>> {
        Ok(self.db.active_sessions()?)
    }
}
