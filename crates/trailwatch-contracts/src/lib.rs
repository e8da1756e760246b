//! # trailwatch-contracts
//!
//! Shared types, wire shapes, and error contracts for the trailwatch
//! CloudTrail auditor.
//!
//! All crates in the workspace import from here. No audit logic lives in
//! this crate: only data definitions, their decoding rules, and error types.

pub mod digest;
pub mod error;
pub mod keys;
pub mod record;
pub mod region;
pub mod violation;
