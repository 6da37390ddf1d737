// src/models/mod.rs

//! Domain models for the harvester.
//!
//! This module contains all data structures used throughout the application,
//! organized by their primary purpose.

mod config;
mod listing;
pub mod regions;
mod run;
mod scope;

// Re-export all public types
pub use config::{
    BackendConfig, Config, DefaultsConfig, HttpConfig, LoggingConfig, PathsConfig, QueueConfig,
    RunConfig,
};
pub use listing::{CandidateItem, Listing};
pub use run::{FailureRecord, RunSummary, ScopeReport, ScopeStats};
pub use scope::{COUNTRY_KEY, Scope, ScopeKind, Source, recency_bucket};
