//! Agent Execution Tree.
//!
//! The hierarchical task-decomposition layer that consumes the lock manager
//! and budget controller. The tree itself is thin: agents are rows linked by
//! parent-id foreign keys (so a tree can be rebuilt from storage after a
//! crash), rooted at exactly one orchestrator per top-level request.

use chrono::Utc;
use uuid::Uuid;

use crate::db::Database;
use crate::error::{Error, Result};
use crate::models::{Agent, AgentStatus, AgentType};

#[derive(Clone)]
pub struct AgentTree {
    db: Database,
}

impl AgentTree {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Start a new execution tree for a top-level request.
    pub fn spawn_orchestrator(&self, project_id: Uuid) -> Result<Agent> {
        let agent = new_agent(AgentType::Orchestrator, None, project_id, None);
        self.db.insert_agent(&agent)?;
        tracing::info!(agent = %agent.id, project = %project_id, "orchestrator spawned");
        Ok(agent)
    }

    /// Spawn a worker under a live parent. The child inherits the parent's
    /// project; orchestrators can only be tree roots.
    pub fn spawn_child(
        &self,
        parent_id: Uuid,
        agent_type: AgentType,
        feature_id: Option<Uuid>,
    ) -> Result<Agent> {
        if agent_type == AgentType::Orchestrator {
            return Err(Error::InvalidInput(
                "an orchestrator must be the root of its tree".to_string(),
            ));
        }

        let parent = self
            .db
            .get_agent(parent_id)?
            .ok_or(Error::AgentNotFound(parent_id))?;
        if parent.status.is_terminal() {
            return Err(Error::InvalidInput(format!(
                "cannot spawn under a {} parent",
                parent.status.as_str()
            )));
        }

        let agent = new_agent(agent_type, Some(parent_id), parent.project_id, feature_id);
        self.db.insert_agent(&agent)?;
        tracing::info!(
            agent = %agent.id,
            parent = %parent_id,
            kind = agent_type.as_str(),
            "agent spawned"
        );
        Ok(agent)
    }

    /// `Pending -> Running`.
    pub fn mark_running(&self, agent_id: Uuid) -> Result<Agent> {
        self.transition(agent_id, &[AgentStatus::Pending], AgentStatus::Running)
    }

    /// `Running -> Success | Failed`.
    pub fn mark_finished(&self, agent_id: Uuid, success: bool) -> Result<Agent> {
        let to = if success {
            AgentStatus::Success
        } else {
            AgentStatus::Failed
        };
        self.transition(agent_id, &[AgentStatus::Running], to)
    }

    /// Cancel an agent and every non-terminal descendant. Returns the number
    /// of agents cancelled.
    pub fn cancel(&self, agent_id: Uuid) -> Result<usize> {
        let root = self
            .db
            .get_agent(agent_id)?
            .ok_or(Error::AgentNotFound(agent_id))?;

        let mut cancelled = 0;
        let mut to_visit = vec![root];
        while let Some(agent) = to_visit.pop() {
            if !agent.status.is_terminal() {
                self.db.update_agent_status(agent.id, AgentStatus::Cancelled)?;
                cancelled += 1;
            }
            to_visit.extend(self.db.get_agent_children(agent.id)?);
        }

        tracing::info!(agent = %agent_id, cancelled, "agent subtree cancelled");
        Ok(cancelled)
    }

    pub fn get(&self, agent_id: Uuid) -> Result<Agent> {
        self.db
            .get_agent(agent_id)?
            .ok_or(Error::AgentNotFound(agent_id))
    }

    pub fn children(&self, agent_id: Uuid) -> Result<Vec<Agent>> {
        Ok(self.db.get_agent_children(agent_id)?)
    }

    /// Agents associated with a project, for session-level views.
    pub fn agents_for_project(&self, project_id: Uuid) -> Result<Vec<Agent>> {
        Ok(self.db.get_agents_by_project(project_id)?)
    }

    fn transition(
        &self,
        agent_id: Uuid,
        allowed_from: &[AgentStatus],
        to: AgentStatus,
    ) -> Result<Agent> {
        let agent = self
            .db
            .get_agent(agent_id)?
            .ok_or(Error::AgentNotFound(agent_id))?;
        if !allowed_from.contains(&agent.status) {
            return Err(Error::InvalidInput(format!(
                "cannot move a {} agent to {}",
                agent.status.as_str(),
                to.as_str()
            )));
        }
        self.db
            .update_agent_status(agent_id, to)?
            .ok_or(Error::AgentNotFound(agent_id))
    }
}

fn new_agent(
    agent_type: AgentType,
    parent_id: Option<Uuid>,
    project_id: Uuid,
    feature_id: Option<Uuid>,
) -> Agent {
    let now = Utc::now();
    Agent {
        id: Uuid::new_v4(),
        agent_type,
        parent_id,
        project_id,
        feature_id,
        status: AgentStatus::Pending,
        created_at: now,
        updated_at: now,
    }
}
