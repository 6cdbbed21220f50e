use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The kind of shared resource a lease protects.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    /// A file path within a project workspace.
    File,
    /// A single row in the backing store.
    DatabaseRow,
    /// A project's LLM rate/spend budget.
    LlmBudget,
    /// A feature record.
    Feature,
}

impl ResourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::File => "file",
            Self::DatabaseRow => "database_row",
            Self::LlmBudget => "llm_budget",
            Self::Feature => "feature",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "file" => Some(Self::File),
            "database_row" => Some(Self::DatabaseRow),
            "llm_budget" => Some(Self::LlmBudget),
            "feature" => Some(Self::Feature),
            _ => None,
        }
    }
}

/// Identity of a lockable resource.
///
/// Keys compare structurally: two agents that name the same
/// `(project, type, name)` triple contend on the same gate, regardless of how
/// the key was constructed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ResourceKey {
    pub project_id: Uuid,
    pub resource_type: ResourceType,
    pub resource_name: String,
}

impl ResourceKey {
    pub fn new(
        project_id: Uuid,
        resource_type: ResourceType,
        resource_name: impl Into<String>,
    ) -> Self {
        Self {
            project_id,
            resource_type,
            resource_name: resource_name.into(),
        }
    }

    /// Key for a file path within a project workspace.
    pub fn file(project_id: Uuid, path: impl Into<String>) -> Self {
        Self::new(project_id, ResourceType::File, path)
    }

    /// Key for a single row, named `table/row_id`.
    pub fn database_row(project_id: Uuid, table: &str, row_id: Uuid) -> Self {
        Self::new(
            project_id,
            ResourceType::DatabaseRow,
            format!("{}/{}", table, row_id),
        )
    }

    /// Key for a project's LLM budget ledger. One per project.
    pub fn llm_budget(project_id: Uuid) -> Self {
        Self::new(project_id, ResourceType::LlmBudget, "daily")
    }

    /// Key for a feature record.
    pub fn feature(project_id: Uuid, feature_id: Uuid) -> Self {
        Self::new(project_id, ResourceType::Feature, feature_id.to_string())
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.project_id,
            self.resource_type.as_str(),
            self.resource_name
        )
    }
}
