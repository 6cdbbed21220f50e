//! Resource Lock Manager.
//!
//! Serializes access to named resources across concurrently running agents.
//! Each [`ResourceKey`] maps to a gate holding the current lease and a FIFO
//! queue of waiters; grants are journaled to the database *before* the lease
//! is handed to the caller, so an unclean shutdown can always be reconciled
//! from the journal on the next start.
//!
//! Locking is per key: the keyed table is only locked long enough to fetch a
//! gate, and all grant/release work happens under that gate's own lock.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::db::Database;
use crate::error::{Error, Result};
use crate::models::{LeaseRecord, LockLease, ReleaseReason, ResourceKey};

/// Counts from a journal replay at startup.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecoveryReport {
    /// Stale leases closed as abandoned, with an audit record.
    pub reclaimed: usize,
    /// Recent leases restored as in-memory holders.
    pub restored: usize,
}

struct Waiter {
    id: Uuid,
    agent_id: Uuid,
    ttl: Option<Duration>,
    tx: oneshot::Sender<LockLease>,
}

#[derive(Default)]
struct Gate {
    holder: Option<LockLease>,
    /// True when the holder was rebuilt from the journal rather than granted
    /// to a live caller; such holders may be reclaimed by the sweep once they
    /// age past the recovery threshold.
    holder_restored: bool,
    waiters: VecDeque<Waiter>,
}

/// Grants mutually exclusive, possibly time-bounded leases over named
/// resources, with FIFO fairness among waiters and a durable journal for
/// crash recovery.
#[derive(Clone)]
pub struct LockManager {
    db: Database,
    recovery_threshold: chrono::Duration,
    gates: Arc<Mutex<HashMap<ResourceKey, Arc<Mutex<Gate>>>>>,
}

impl LockManager {
    pub fn new(db: Database, recovery_threshold: chrono::Duration) -> Self {
        Self {
            db,
            recovery_threshold,
            gates: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Acquire an exclusive lease on `key`, waiting up to `timeout` for it to
    /// become free. Waiters are granted in arrival order.
    pub async fn acquire(
        &self,
        agent_id: Uuid,
        key: &ResourceKey,
        timeout: Duration,
    ) -> Result<LockLease> {
        self.acquire_inner(agent_id, key, timeout, None).await
    }

    /// Like [`acquire`](Self::acquire), but the granted lease lapses after
    /// `ttl`. The holder is not interrupted on expiry; it is expected to
    /// check [`LockManager::is_held`] before continuing protected work.
    pub async fn acquire_with_ttl(
        &self,
        agent_id: Uuid,
        key: &ResourceKey,
        timeout: Duration,
        ttl: Duration,
    ) -> Result<LockLease> {
        self.acquire_inner(agent_id, key, timeout, Some(ttl)).await
    }

    /// Acquire and wrap the lease in a [`LeaseGuard`] that releases on every
    /// exit path.
    pub async fn acquire_scoped(
        &self,
        agent_id: Uuid,
        key: &ResourceKey,
        timeout: Duration,
    ) -> Result<LeaseGuard> {
        let lease = self.acquire(agent_id, key, timeout).await?;
        Ok(LeaseGuard {
            manager: self.clone(),
            lease: Some(lease),
        })
    }

    async fn acquire_inner(
        &self,
        agent_id: Uuid,
        key: &ResourceKey,
        timeout: Duration,
        ttl: Option<Duration>,
    ) -> Result<LockLease> {
        let gate = self.gate(key);
        let waiter_id = Uuid::new_v4();
        let mut rx = {
            let mut state = gate.lock().expect("lock gate poisoned");
            self.reap_if_expired(key, &mut state)?;

            if state.holder.is_none() && state.waiters.is_empty() {
                let lease = self.grant(key, agent_id, ttl)?;
                state.holder = Some(lease.clone());
                state.holder_restored = false;
                return Ok(lease);
            }

            let (tx, rx) = oneshot::channel();
            state.waiters.push_back(Waiter {
                id: waiter_id,
                agent_id,
                ttl,
                tx,
            });
            rx
        };

        match tokio::time::timeout(timeout, &mut rx).await {
            Ok(Ok(lease)) => Ok(lease),
            Ok(Err(_)) => Err(Error::LockTimeout(key.clone())),
            Err(_) => {
                let mut state = gate.lock().expect("lock gate poisoned");
                // A grant can land right at the deadline; prefer it over
                // failing. Under the gate lock the queue cannot move, so the
                // waiter either holds a lease or is still queued, never both.
                match rx.try_recv() {
                    Ok(lease) => Ok(lease),
                    Err(_) => {
                        state.waiters.retain(|w| w.id != waiter_id);
                        Err(Error::LockTimeout(key.clone()))
                    }
                }
            }
        }
    }

    /// Release a lease and wake the next waiter, if any.
    ///
    /// Idempotent: releasing a lease that was already released, expired, or
    /// reclaimed is a no-op, and never wakes a second waiter.
    pub fn release(&self, lease: &LockLease) -> Result<()> {
        let gate = self.gate(&lease.key);
        let mut state = gate.lock().expect("lock gate poisoned");

        let held = state
            .holder
            .as_ref()
            .map(|h| h.id == lease.id)
            .unwrap_or(false);
        if !held {
            return Ok(());
        }

        self.db
            .close_lease(lease.id, Utc::now(), ReleaseReason::Released)?;
        state.holder = None;
        state.holder_restored = false;
        self.promote_next(&lease.key, &mut state)
    }

    /// Whether `lease` is still the active, unexpired holder of its key.
    pub fn is_held(&self, lease: &LockLease) -> bool {
        let gate = self.gate(&lease.key);
        let state = gate.lock().expect("lock gate poisoned");
        state
            .holder
            .as_ref()
            .map(|h| h.id == lease.id && !h.is_expired(Utc::now()))
            .unwrap_or(false)
    }

    /// Replay the journal after a process start.
    ///
    /// Open rows older than the crash-recovery threshold are presumed lost to
    /// an unclean shutdown: they are closed as abandoned and logged as audit
    /// events. Younger rows are restored as in-memory holders so new
    /// acquirers keep waiting for them until release, expiry, or sweep.
    pub fn recover(&self) -> Result<RecoveryReport> {
        let now = Utc::now();
        let cutoff = now - self.recovery_threshold;
        let mut report = RecoveryReport::default();

        for record in self.db.open_leases()? {
            if record.acquired_at < cutoff {
                self.db
                    .close_lease(record.id, now, ReleaseReason::Abandoned)?;
                tracing::warn!(
                    lease = %record.id,
                    agent = %record.agent_id,
                    key = %record.key,
                    acquired_at = %record.acquired_at,
                    "reclaimed abandoned lease during recovery"
                );
                report.reclaimed += 1;
            } else {
                let gate = self.gate(&record.key);
                let mut state = gate.lock().expect("lock gate poisoned");
                if state.holder.is_none() {
                    let lease = LockLease::from(record);
                    if let Some(expires_at) = lease.expires_at {
                        self.schedule_expiry(lease.key.clone(), lease.id, expires_at);
                    }
                    state.holder = Some(lease);
                    state.holder_restored = true;
                    report.restored += 1;
                }
            }
        }

        Ok(report)
    }

    /// Supervisory sweep for leases lost without a clean release while this
    /// process keeps running: journal rows past the recovery threshold with
    /// no live holder, restored holders that aged out, and expired TTL
    /// holders. Returns the number of leases reclaimed.
    pub fn sweep_abandoned(&self) -> Result<usize> {
        let now = Utc::now();
        let cutoff = now - self.recovery_threshold;
        let mut reclaimed = 0;

        for record in self.db.open_leases_older_than(cutoff)? {
            let gate = self.gate(&record.key);
            let mut state = gate.lock().expect("lock gate poisoned");

            let is_current = state
                .holder
                .as_ref()
                .map(|h| h.id == record.id)
                .unwrap_or(false);

            if is_current {
                let expired = state
                    .holder
                    .as_ref()
                    .map(|h| h.is_expired(now))
                    .unwrap_or(false);
                // A live caller past the threshold keeps its lease; only
                // expired or journal-restored holders are reclaimable here.
                if !expired && !state.holder_restored {
                    continue;
                }
                let reason = if expired {
                    ReleaseReason::Expired
                } else {
                    ReleaseReason::Abandoned
                };
                self.db.close_lease(record.id, now, reason)?;
                tracing::warn!(
                    lease = %record.id,
                    agent = %record.agent_id,
                    key = %record.key,
                    reason = reason.as_str(),
                    "reclaimed lease during sweep"
                );
                state.holder = None;
                state.holder_restored = false;
                self.promote_next(&record.key, &mut state)?;
                reclaimed += 1;
            } else if self.db.close_lease(record.id, now, ReleaseReason::Abandoned)? {
                tracing::warn!(
                    lease = %record.id,
                    agent = %record.agent_id,
                    key = %record.key,
                    "reclaimed abandoned lease during sweep"
                );
                reclaimed += 1;
            }
        }

        Ok(reclaimed)
    }

    fn gate(&self, key: &ResourceKey) -> Arc<Mutex<Gate>> {
        let mut gates = self.gates.lock().expect("lock table poisoned");
        gates.entry(key.clone()).or_default().clone()
    }

    /// Journal a new grant and build the lease. The insert happens before the
    /// lease exists anywhere else (write-ahead discipline); an insert failure
    /// is fatal to the operation.
    fn grant(&self, key: &ResourceKey, agent_id: Uuid, ttl: Option<Duration>) -> Result<LockLease> {
        let now = Utc::now();
        let expires_at = ttl
            .and_then(|d| chrono::Duration::from_std(d).ok())
            .map(|d| now + d);

        let record = LeaseRecord {
            id: Uuid::new_v4(),
            key: key.clone(),
            agent_id,
            acquired_at: now,
            expires_at,
            released_at: None,
            release_reason: None,
        };
        self.db.insert_lease(&record)?;

        let lease = LockLease::from(record);
        tracing::debug!(lease = %lease.id, agent = %agent_id, key = %key, "lease granted");
        if let Some(expires_at) = lease.expires_at {
            self.schedule_expiry(lease.key.clone(), lease.id, expires_at);
        }
        Ok(lease)
    }

    /// Hand the key to the next waiter still listening. A waiter that gave up
    /// (dropped its receiver) has its just-journaled grant closed immediately
    /// and the next one is tried, so nobody is woken twice.
    fn promote_next(&self, key: &ResourceKey, state: &mut Gate) -> Result<()> {
        while let Some(waiter) = state.waiters.pop_front() {
            let lease = self.grant(key, waiter.agent_id, waiter.ttl)?;
            state.holder = Some(lease.clone());
            state.holder_restored = false;
            match waiter.tx.send(lease) {
                Ok(()) => break,
                Err(unclaimed) => {
                    self.db
                        .close_lease(unclaimed.id, Utc::now(), ReleaseReason::Released)?;
                    state.holder = None;
                }
            }
        }
        Ok(())
    }

    /// Lazily reclaim an expired holder at acquisition time.
    fn reap_if_expired(&self, key: &ResourceKey, state: &mut Gate) -> Result<()> {
        let now = Utc::now();
        let expired = state
            .holder
            .as_ref()
            .map(|h| h.is_expired(now))
            .unwrap_or(false);
        if !expired {
            return Ok(());
        }
        if let Some(holder) = state.holder.take() {
            self.db
                .close_lease(holder.id, now, ReleaseReason::Expired)?;
            tracing::warn!(
                lease = %holder.id,
                agent = %holder.agent_id,
                key = %key,
                "lease expired while held; reclaiming"
            );
        }
        state.holder_restored = false;
        self.promote_next(key, state)
    }

    /// Promote queued waiters when a TTL lease lapses. Outside a runtime the
    /// expired holder is still reaped lazily on the next acquire or sweep.
    fn schedule_expiry(&self, key: ResourceKey, lease_id: Uuid, expires_at: DateTime<Utc>) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let manager = self.clone();
        handle.spawn(async move {
            let wait = (expires_at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
            tokio::time::sleep(wait).await;
            if let Err(err) = manager.expire_if_current(&key, lease_id) {
                tracing::error!(key = %key, error = %err, "failed to expire lease");
            }
        });
    }

    fn expire_if_current(&self, key: &ResourceKey, lease_id: Uuid) -> Result<()> {
        let gate = self.gate(key);
        let mut state = gate.lock().expect("lock gate poisoned");
        let now = Utc::now();

        match &state.holder {
            Some(h) if h.id == lease_id => {
                if !h.is_expired(now) {
                    // The timer can wake marginally ahead of the wall clock;
                    // re-arm for the real deadline instead of giving up.
                    if let Some(expires_at) = h.expires_at {
                        self.schedule_expiry(key.clone(), lease_id, expires_at);
                    }
                    return Ok(());
                }
            }
            _ => return Ok(()),
        }
        if let Some(holder) = state.holder.take() {
            self.db
                .close_lease(holder.id, now, ReleaseReason::Expired)?;
            tracing::warn!(
                lease = %holder.id,
                agent = %holder.agent_id,
                key = %key,
                "lease expired; granting to next waiter"
            );
        }
        state.holder_restored = false;
        self.promote_next(key, &mut state)
    }
}

/// Scoped holder of a [`LockLease`] that guarantees release on every exit
/// path.
///
/// [`LeaseGuard::release`] is the checked path and should be preferred;
/// dropping the guard performs the same synchronous release but can only log
/// a journal failure. A lease abandoned by a hard process crash (where no
/// drop runs) is reclaimed by [`LockManager::recover`] or
/// [`LockManager::sweep_abandoned`].
pub struct LeaseGuard {
    manager: LockManager,
    lease: Option<LockLease>,
}

impl LeaseGuard {
    pub fn lease(&self) -> &LockLease {
        self.lease
            .as_ref()
            .expect("guard holds a lease until released")
    }

    /// Whether the underlying lease is still valid to act on.
    pub fn is_valid(&self) -> bool {
        self.lease
            .as_ref()
            .map(|l| self.manager.is_held(l))
            .unwrap_or(false)
    }

    /// Release explicitly, surfacing journal failures to the caller.
    pub fn release(mut self) -> Result<()> {
        match self.lease.take() {
            Some(lease) => self.manager.release(&lease),
            None => Ok(()),
        }
    }
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        if let Some(lease) = self.lease.take() {
            if let Err(err) = self.manager.release(&lease) {
                tracing::error!(
                    lease = %lease.id,
                    key = %lease.key,
                    error = %err,
                    "failed to release lease on drop"
                );
            }
        }
    }
}
