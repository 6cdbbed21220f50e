//! Coordinator facade.
//!
//! Wires the four components over one database, replays the lock journal on
//! open, and exposes the call contract the execution layer is expected to
//! follow: lock before touching a shared resource, release on every exit
//! path, admission-check before paid work, record the realized cost after.

use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use uuid::Uuid;

use crate::agents::AgentTree;
use crate::budget::BudgetController;
use crate::config::WardenConfig;
use crate::db::Database;
use crate::error::Result;
use crate::lock::LockManager;
use crate::models::{AdmissionDecision, BudgetEntry, LockLease, ResourceKey, UnitPricing};
use crate::sessions::SessionStore;

/// Outcome of a budget-gated call.
#[derive(Debug)]
pub enum PaidOutcome<T> {
    /// The call ran; its realized cost has been recorded.
    Completed { value: T, cost_usd: f64 },
    /// Admission was denied; the call was never started.
    Denied(AdmissionDecision),
}

impl<T> PaidOutcome<T> {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }
}

pub struct Coordinator {
    locks: LockManager,
    sessions: SessionStore,
    budget: BudgetController,
    agents: AgentTree,
}

impl Coordinator {
    pub fn open(path: PathBuf, config: WardenConfig) -> Result<Self> {
        Self::from_database(Database::open(path)?, config)
    }

    pub fn open_default(config: WardenConfig) -> Result<Self> {
        Self::from_database(Database::open_default()?, config)
    }

    pub fn open_memory(config: WardenConfig) -> Result<Self> {
        Self::from_database(Database::open_memory()?, config)
    }

    /// Build over an existing database handle: migrate, then replay the lock
    /// journal so state abandoned by an unclean shutdown is reconciled before
    /// any new work is admitted.
    pub fn from_database(db: Database, config: WardenConfig) -> Result<Self> {
        db.migrate()?;

        let locks = LockManager::new(db.clone(), config.crash_recovery_threshold());
        let report = locks.recover()?;
        if report.reclaimed > 0 || report.restored > 0 {
            tracing::info!(
                reclaimed = report.reclaimed,
                restored = report.restored,
                "lock journal replayed"
            );
        }

        Ok(Self {
            locks,
            sessions: SessionStore::new(db.clone()),
            budget: BudgetController::new(db.clone(), &config),
            agents: AgentTree::new(db),
        })
    }

    pub fn locks(&self) -> &LockManager {
        &self.locks
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub fn budget(&self) -> &BudgetController {
        &self.budget
    }

    pub fn agents(&self) -> &AgentTree {
        &self.agents
    }

    /// Run `work` while holding an exclusive lease on `key`.
    ///
    /// The lease is released on every exit path: after `work` completes,
    /// when it errors, and (via the guard) if it panics.
    pub async fn run_guarded<T, F, Fut>(
        &self,
        agent_id: Uuid,
        key: &ResourceKey,
        timeout: Duration,
        work: F,
    ) -> Result<T>
    where
        F: FnOnce(LockLease) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let guard = self.locks.acquire_scoped(agent_id, key, timeout).await?;
        let lease = guard.lease().clone();
        let outcome = work(lease).await;
        guard.release()?;
        outcome
    }

    /// Run a unit of paid work behind the budget admission gate.
    ///
    /// `call` is only invoked when admission is granted; it reports its
    /// realized cost, which is recorded to the ledger before returning.
    pub async fn paid_call<T, F, Fut>(
        &self,
        project_id: Uuid,
        estimated_units: u64,
        pricing: &UnitPricing,
        call: F,
    ) -> Result<PaidOutcome<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(T, f64)>>,
    {
        match self
            .budget
            .estimate_and_check(project_id, estimated_units, pricing)?
        {
            AdmissionDecision::Allowed { .. } => {
                let (value, cost_usd) = call().await?;
                self.budget
                    .record_usage(BudgetEntry::new(project_id, cost_usd))?;
                Ok(PaidOutcome::Completed { value, cost_usd })
            }
            denied => Ok(PaidOutcome::Denied(denied)),
        }
    }
}
