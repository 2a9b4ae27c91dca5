//! Proof-of-stake bookkeeping
//!
//! Accounts lock native currency as stake; one validator is drawn with
//! probability proportional to its stake.

pub mod record;
pub mod registry;

pub use record::StakeRecord;
pub use registry::{pick_weighted, StakeRegistry};
