//! Per-service job tables and the job state machine.

pub mod job;
pub mod table;

pub use job::{Job, JobSnapshot, JobState, Progress};
pub use table::{JobTable, StatusReport};
