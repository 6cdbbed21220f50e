use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A node in the hierarchical execution tree.
///
/// Agents form an acyclic tree rooted at exactly one orchestrator per
/// top-level request. The parent link is a foreign key rather than an
/// in-memory pointer, so the tree can be reconstructed from durable storage
/// after a crash. Lifecycle ownership belongs to the parent's spawn call,
/// not to the back-reference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: Uuid,
    pub agent_type: AgentType,
    pub parent_id: Option<Uuid>,
    pub project_id: Uuid,
    /// The feature this agent is working on, if bound to one.
    pub feature_id: Option<Uuid>,
    pub status: AgentStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Agent {
    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }
}

/// The role an agent plays in the tree.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AgentType {
    /// Tree root. Owns the session-level plan; one per top-level request.
    Orchestrator,
    Planner,
    Coder,
    Reviewer,
    Tester,
}

impl AgentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Orchestrator => "orchestrator",
            Self::Planner => "planner",
            Self::Coder => "coder",
            Self::Reviewer => "reviewer",
            Self::Tester => "tester",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "orchestrator" => Some(Self::Orchestrator),
            "planner" => Some(Self::Planner),
            "coder" => Some(Self::Coder),
            "reviewer" => Some(Self::Reviewer),
            "tester" => Some(Self::Tester),
            _ => None,
        }
    }
}

/// The execution status of an agent.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Pending,
    Running,
    Success,
    Failed,
    Cancelled,
}

impl AgentStatus {
    /// Terminal statuses admit no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failed | Self::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "success" => Some(Self::Success),
            "failed" => Some(Self::Failed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}
