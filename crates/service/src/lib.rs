//! Training job orchestration layer.
//! - `registry` owns named services bound to a training backend.
//! - `jobs` holds the per-service job tables and the long-poll primitive.
//! - `orchestrator` runs training synchronously or on background workers.
//! - `api` turns request messages into orchestrator calls and renders envelopes.

pub mod errors;
pub mod backend;
pub mod jobs;
pub mod registry;
pub mod orchestrator;
pub mod api;
pub mod metrics;
pub mod runtime;
