//! Budget Admission Controller.
//!
//! Gates paid work against a per-project daily spend ceiling. The check is
//! advisory before the fact and authoritative after it: an in-flight call may
//! finish over the limit (its cost is only known on completion), but the next
//! pre-flight check then reports the overrun and blocks further admission.

use chrono::{DateTime, NaiveTime, Utc};
use uuid::Uuid;

use crate::config::WardenConfig;
use crate::db::Database;
use crate::error::Result;
use crate::models::{AdmissionDecision, BudgetEntry, BudgetStatus, ProjectBudget, UnitPricing};

#[derive(Clone)]
pub struct BudgetController {
    db: Database,
    default_daily_limit_usd: f64,
    default_alert_threshold: f64,
}

impl BudgetController {
    pub fn new(db: Database, config: &WardenConfig) -> Self {
        Self {
            db,
            default_daily_limit_usd: config.default_daily_limit_usd,
            default_alert_threshold: config.default_alert_threshold,
        }
    }

    /// Where today's spend stands for `project_id`: `Ok`, `Warning` past
    /// `threshold × limit`, `Exceeded` past the limit itself.
    pub fn check_daily(&self, project_id: Uuid) -> Result<BudgetStatus> {
        let budget = self.project_budget(project_id)?;
        let spent = self.spent_today(project_id)?;

        let status = if spent >= budget.daily_limit_usd {
            BudgetStatus::Exceeded {
                spent,
                limit: budget.daily_limit_usd,
            }
        } else if spent >= budget.daily_limit_usd * budget.alert_threshold {
            BudgetStatus::Warning {
                spent,
                limit: budget.daily_limit_usd,
                threshold: budget.alert_threshold,
            }
        } else {
            BudgetStatus::Ok {
                spent,
                limit: budget.daily_limit_usd,
            }
        };
        Ok(status)
    }

    /// Pre-flight gate for a unit of paid work. Never admits spend past the
    /// limit; there is no override path.
    pub fn estimate_and_check(
        &self,
        project_id: Uuid,
        estimated_units: u64,
        pricing: &UnitPricing,
    ) -> Result<AdmissionDecision> {
        let budget = self.project_budget(project_id)?;
        let spent = self.spent_today(project_id)?;
        let estimated_cost = pricing.cost_of(estimated_units);

        let decision = if spent >= budget.daily_limit_usd {
            AdmissionDecision::Blocked {
                reason: "daily budget exceeded, raise your limit".to_string(),
            }
        } else if spent + estimated_cost > budget.daily_limit_usd {
            AdmissionDecision::WouldExceed {
                current: spent,
                estimated: estimated_cost,
                limit: budget.daily_limit_usd,
            }
        } else {
            AdmissionDecision::Allowed { estimated_cost }
        };

        if !decision.is_allowed() {
            tracing::warn!(
                project = %project_id,
                spent,
                limit = budget.daily_limit_usd,
                estimated = estimated_cost,
                "paid work denied by budget admission"
            );
        }
        Ok(decision)
    }

    /// Append a realized cost to the ledger.
    pub fn record_usage(&self, entry: BudgetEntry) -> Result<()> {
        tracing::debug!(
            project = %entry.project_id,
            amount = entry.amount_usd,
            "usage recorded"
        );
        self.db.insert_budget_entry(&entry)?;
        Ok(())
    }

    /// The project's configured ceiling, or the instance defaults when none
    /// is set.
    pub fn project_budget(&self, project_id: Uuid) -> Result<ProjectBudget> {
        let budget = self
            .db
            .get_project_budget(project_id)?
            .unwrap_or(ProjectBudget {
                project_id,
                daily_limit_usd: self.default_daily_limit_usd,
                alert_threshold: self.default_alert_threshold,
            });
        Ok(budget)
    }

    pub fn set_project_budget(&self, budget: &ProjectBudget) -> Result<()> {
        self.db.set_project_budget(budget)?;
        Ok(())
    }

    fn spent_today(&self, project_id: Uuid) -> Result<f64> {
        let (day_start, day_end) = utc_day_bounds(Utc::now());
        Ok(self.db.spend_in_range(project_id, day_start, day_end)?)
    }
}

/// `[midnight, next midnight)` of the UTC calendar day containing `at`.
fn utc_day_bounds(at: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    let day_start = at.date_naive().and_time(NaiveTime::MIN).and_utc();
    (day_start, day_start + chrono::Duration::days(1))
}
