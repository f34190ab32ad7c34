//! Degraded-mode tracking: failure windows and notification dedup.

pub mod dedup;
pub mod tracker;

pub use dedup::DedupGuard;
pub use tracker::{FailureOutcome, HealthSnapshot, HealthTracker};
