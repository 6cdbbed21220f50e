use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::resource::ResourceKey;

/// An exclusive grant of a resource to one agent.
///
/// Leases are **grants, not mutexes**: a lease with an `expires_at` can lapse
/// without being released, at which point the resource becomes available to
/// waiters while the original holder keeps its (now invalid) handle. Holders
/// of timed leases are expected to check [`LockLease::is_expired`] before
/// continuing protected work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockLease {
    pub id: Uuid,
    pub key: ResourceKey,
    /// The agent the resource is granted to.
    pub agent_id: Uuid,
    pub acquired_at: DateTime<Utc>,
    /// `None` means held until explicit release or holder termination.
    pub expires_at: Option<DateTime<Utc>>,
}

impl LockLease {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|at| at <= now).unwrap_or(false)
    }
}

/// Why a journal row was closed. Kept in the journal as an audit trail.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseReason {
    /// Explicitly released by the holder.
    Released,
    /// The lease's `expires_at` passed while still held.
    Expired,
    /// Presumed lost to a process crash and reclaimed by recovery or sweep.
    Abandoned,
}

impl ReleaseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Released => "released",
            Self::Expired => "expired",
            Self::Abandoned => "abandoned",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "released" => Some(Self::Released),
            "expired" => Some(Self::Expired),
            "abandoned" => Some(Self::Abandoned),
            _ => None,
        }
    }
}

/// One row of the lock journal: a lease plus its close-out state.
///
/// Rows are inserted *before* the corresponding lease is handed to a caller,
/// so a crash between the insert and the grant leaves a row that recovery can
/// reconcile. Closed rows are never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaseRecord {
    pub id: Uuid,
    pub key: ResourceKey,
    pub agent_id: Uuid,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub released_at: Option<DateTime<Utc>>,
    pub release_reason: Option<ReleaseReason>,
}

impl LeaseRecord {
    pub fn is_open(&self) -> bool {
        self.released_at.is_none()
    }
}

impl From<LeaseRecord> for LockLease {
    fn from(record: LeaseRecord) -> Self {
        Self {
            id: record.id,
            key: record.key,
            agent_id: record.agent_id,
            acquired_at: record.acquired_at,
            expires_at: record.expires_at,
        }
    }
}
