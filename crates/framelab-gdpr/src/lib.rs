//! GDPR staged account deletion for framelab.
//!
//! Accounts move through requested → soft_deleted → anonymized →
//! hard_deleted, with a 30-day cancellation window covering the first two
//! stages. The delayed stages run as background jobs; every stage is a
//! single transaction guarded by the expected current stage.

pub mod service;

pub use service::{AccountDeletionService, DeletionStatus, StageOutcome};
