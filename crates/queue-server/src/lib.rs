//! HTTP surface for the project-generation job queue.
//!
//! A thin translation layer in front of `queue_core`'s `AdmissionController`,
//! `QueueManager`, and `StatsEstimator` — it owns no queue state of its own.
//! Exposed as a library too so integration tests can build the router
//! directly against an in-memory store without going through `main`.

pub mod error;
pub mod handlers;
pub mod routes;
pub mod settings;
pub mod state;
