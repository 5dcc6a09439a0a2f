//! # haven-memory
//!
//! Persistent state for Haven (SQLite-backed).

pub mod audit;
pub mod store;

pub use audit::AuditLogger;
pub use store::{InboundReceipt, InsertedAlert, Job, JobStatus, NewJob, Store};
