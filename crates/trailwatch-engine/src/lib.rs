//! # trailwatch-engine
//!
//! Runs a complete CloudTrail audit over a time window.
//!
//! The engine pulls the window's trail into a local directory (or reads one
//! already there), walks each region's digest chain from its newest digest
//! back to the window start verifying RSA signatures and log hashes, then
//! scans every verified log through the rule engine.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use trailwatch_engine::{AuditEngine, EngineConfig, FsObjectStore};
//!
//! let config = EngineConfig::from_file(Path::new("trailwatch.toml"))?;
//! let engine = AuditEngine::new(config, Arc::new(store), Arc::new(trail));
//! let report = engine.begin_audit(start, end, Some(root), || {}, |_| {}).await;
//! for v in &report.violations {
//!     println!("{}: {:?}", v.kind, v.file_path);
//! }
//! ```

pub mod config;
pub mod context;
pub mod engine;
pub mod fetch;
pub mod layout;
pub mod scanner;
pub mod session;
pub mod store;
pub mod sync;
pub mod walker;

#[cfg(test)]
mod testkit;

pub use config::EngineConfig;
pub use engine::{AuditEngine, AuditReport};
pub use session::{AuditOutcome, AuditPhase};
pub use store::FsObjectStore;

// ── Tests ─────────────────────────────────────────────────────────────────────
