//! Domain models for Warden.
//!
//! # Core Concepts
//!
//! ## Coordination Entities
//!
//! - [`ResourceKey`]: Structural identity of a lockable resource within a project.
//! - [`LockLease`]: An exclusive, possibly time-bounded grant of a resource to one
//!   agent. Unlike a mutex, a lease can expire without being explicitly released.
//! - [`LeaseRecord`]: The durable journal row behind a lease — one row per grant,
//!   inserted before the lease is handed out and closed on release.
//!
//! ## Work Entities
//!
//! - [`Session`]: One continuous unit of user-initiated work, with multi-project
//!   context switching. Survives restarts; recovered from durable storage.
//! - [`Agent`]: A node in the hierarchical execution tree (orchestrator at the
//!   root, planner/coder/reviewer/tester below). Parent links are foreign keys,
//!   so the tree can be reconstructed after a crash.
//!
//! ## Spend Entities
//!
//! - [`BudgetEntry`]: One recorded unit of spend, append-only, aggregated per
//!   project per calendar day.
//! - [`ProjectBudget`]: A project's daily ceiling and alert threshold.

mod agent;
mod budget;
mod lease;
mod resource;
mod session;

pub use agent::*;
pub use budget::*;
pub use lease::*;
pub use resource::*;
pub use session::*;
