//! trackcore - Project Tracking Core Library
//!
//! This library provides the storage-backed core of a multi-tenant project
//! tracker: workspaces, teams, trackers, milestones, sub-tasks, comments,
//! invitations and role grants, plus the derived-status machinery that keeps
//! them consistent.
//!
//! # Core Concepts
//!
//! - **Workspaces**: Multi-tenant roots referencing teams and trackers
//! - **Trackers**: Dated work containers typed as milestone, task, or both
//! - **Reference Synchronization**: Parent reference lists kept in step with
//!   child creation and deletion, with cascade failures reported not rolled
//!   back
//! - **Status Aggregation**: Days-left, done-percentage and health colors
//!   recomputed from live descendants on every read
//! - **Span Allocation**: A tracker's 0-100% budget distributed across its
//!   milestones by day span
//!
//! # Module Organization
//!
//! - `config`: Configuration loading from `trackcore.toml`
//! - `error`: Error types and result aliases
//! - `model`: Entity records and denormalized snapshots
//! - `store`: Document store trait, filters, pagination, memory and JSON
//!   backends
//! - `lock`: File locking and atomic operations for concurrency safety
//! - `identity`: Token verification and actor resolution
//! - `refsync`: Reference list synchronization and cascades
//! - `status`: Derived status-bar computation
//! - `span`: Milestone span allocation
//! - `workspace`, `team`, `tracker`, `milestone`, `subtask`, `comment`,
//!   `invitation`, `role`: entity services
//! - `mailer`: Outbound notification trait

pub mod comment;
pub mod config;
pub mod error;
pub mod identity;
pub mod invitation;
pub mod lock;
pub mod mailer;
pub mod milestone;
pub mod model;
pub mod refsync;
pub mod role;
pub mod span;
pub mod status;
pub mod store;
pub mod subtask;
pub mod team;
pub mod tracker;
pub mod workspace;

pub use error::{Error, Result};
