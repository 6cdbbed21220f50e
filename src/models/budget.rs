use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One recorded unit of spend. Append-only; spend is attributed to the
/// project, not to the agent that incurred it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetEntry {
    pub id: Uuid,
    pub project_id: Uuid,
    pub amount_usd: f64,
    pub recorded_at: DateTime<Utc>,
}

impl BudgetEntry {
    pub fn new(project_id: Uuid, amount_usd: f64) -> Self {
        Self {
            id: Uuid::new_v4(),
            project_id,
            amount_usd,
            recorded_at: Utc::now(),
        }
    }
}

/// A project's daily spend ceiling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectBudget {
    pub project_id: Uuid,
    pub daily_limit_usd: f64,
    /// Fraction of the limit at which checks start reporting `Warning`
    /// (e.g. `0.8`).
    pub alert_threshold: f64,
}

/// Where today's spend stands against the project's ceiling.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum BudgetStatus {
    Ok {
        spent: f64,
        limit: f64,
    },
    /// Spend has crossed `threshold × limit` but not the limit itself.
    Warning {
        spent: f64,
        limit: f64,
        threshold: f64,
    },
    Exceeded {
        spent: f64,
        limit: f64,
    },
}

/// Pre-flight admission decision for a unit of paid work.
///
/// These are ordinary outcomes, not errors: the caller decides whether a
/// denial blocks the action.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case", tag = "decision")]
pub enum AdmissionDecision {
    Allowed {
        estimated_cost: f64,
    },
    /// Admitting the estimated cost would push today's spend past the limit.
    WouldExceed {
        current: f64,
        estimated: f64,
        limit: f64,
    },
    /// Spend has already crossed the limit; carries the user-facing reason.
    Blocked {
        reason: String,
    },
}

impl AdmissionDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed { .. })
    }
}

/// Cost of one unit of the opaque completion service.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct UnitPricing {
    pub usd_per_unit: f64,
}

impl UnitPricing {
    pub fn new(usd_per_unit: f64) -> Self {
        Self { usd_per_unit }
    }

    /// Convenience for token-priced models quoted per million tokens.
    pub fn per_million_tokens(usd_per_million: f64) -> Self {
        Self {
            usd_per_unit: usd_per_million / 1_000_000.0,
        }
    }

    pub fn cost_of(&self, units: u64) -> f64 {
        self.usd_per_unit * units as f64
    }
}
