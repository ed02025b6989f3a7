//! Durable job and stage-result store
//!
//! A single-writer transactional store over sqlite. Every mutation is one
//! transaction; a partially written stage never occurs. The store is the
//! single point of linearization between the HTTP intake path, the cancel
//! path, and the worker.

mod error;
mod store;

pub use error::StoreError;
pub use store::{JobFilter, JobPage, JobStore, StageUpdate};
