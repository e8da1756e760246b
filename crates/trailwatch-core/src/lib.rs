//! # trailwatch-core
//!
//! The runtime scaffolding shared by every stage of a trailwatch audit.
//!
//! This crate provides:
//! - The collaborator traits (`ObjectStore`, `TrailService`)
//! - Pagination-following listing and signature metadata helpers
//! - The weighted progress model (`Task`, `AuditTask`)
//! - Gateable worker pools (`WorkerPool`)
//!
//! ## Usage
//!
//! ```rust,ignore
//! use trailwatch_core::{WorkerPool, progress::{AuditTask, Task, TaskKind}};
//! ```

pub mod pool;
pub mod progress;
pub mod store;
pub mod traits;

pub use pool::WorkerPool;
pub use progress::{AuditTask, Task, TaskKind};
pub use traits::{ListPage, ObjectStore, ObjectSummary, TrailService};

// ── Tests ─────────────────────────────────────────────────────────────────────
