use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One continuous unit of user-initiated work.
///
/// A session tracks which projects the user is working across and survives
/// process restarts: the session store can [`recover`](crate::sessions::SessionStore::recover)
/// any previously created session from durable storage.
///
/// `active_project_ids` is kept in most-recently-used order, deduplicated;
/// `current_project_id` always mirrors its front entry once a project has
/// been switched to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub status: SessionStatus,
    pub current_project_id: Option<Uuid>,
    /// Most-recently-used first.
    pub active_project_ids: Vec<Uuid>,
    pub started_at: DateTime<Utc>,
    pub paused_at: Option<DateTime<Utc>>,
    pub resumed_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// The lifecycle state of a session.
///
/// `Active ↔ Paused` is the normal cycle; `Completed` is terminal — no
/// transition leaves it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Paused,
    Completed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Completed => "completed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "paused" => Some(Self::Paused),
            "completed" => Some(Self::Completed),
            _ => None,
        }
    }
}
