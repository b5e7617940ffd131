//! # Repository Layer
//!
//! SeaORM implementations of the [`crate::store`] seams: encrypted
//! credential persistence and the sync job queue.

pub mod credential;
pub mod sync_job;

pub use credential::CredentialRepository;
pub use sync_job::SyncJobRepository;
