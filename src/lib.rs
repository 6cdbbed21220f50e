//! Warden — the coordination core for concurrent AI coding agents.
//!
//! Arbitrates access to shared project resources across a tree of
//! cooperating agents: a per-resource lock manager with a durable journal
//! and crash recovery, a recoverable session store with multi-project
//! context switching, and a budget admission controller gating paid work
//! against per-project daily ceilings.
//!
//! This is an in-process, single-node library: embedders construct a
//! [`Coordinator`] (or the individual components over a shared
//! [`db::Database`]) and call the component APIs directly.

pub mod agents;
pub mod budget;
pub mod config;
pub mod coordinator;
pub mod db;
pub mod error;
pub mod lock;
pub mod models;
pub mod sessions;

pub use config::WardenConfig;
pub use coordinator::{Coordinator, PaidOutcome};
pub use error::{Error, Result};
