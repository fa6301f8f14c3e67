//! Candidate screening pipeline: automated scoring and shortlisting, message moderation, job
//! risk assessment and approval, all recorded in an append-only audit trail.

pub mod config;
pub mod error;
pub mod telemetry;
pub mod workflows;
