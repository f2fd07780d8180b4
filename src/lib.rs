//! Interaction-signal-tagging (IST) events for an AI tutor: message analysis,
//! pluggable event storage, and privacy-preserving class reports.

pub mod analysis;
pub mod config;
pub mod error;
pub mod import;
pub mod models;
pub mod report;
pub mod skills;
pub mod store;

pub use error::{ClassifierError, IstError, StorageError};
