// src/lib.rs

//! Harvester Library
//!
//! Resumable, rate-limited live crawling of real-estate listing portals with
//! per-scope checkpoints, bounded retries and backend delivery.

pub mod error;
pub mod models;
pub mod pipeline;
pub mod services;
pub mod storage;
pub mod utils;
