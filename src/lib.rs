//! # upchain
//!
//! Publishes files as immutable on-chain records and makes sure the writes
//! land on the network.
//!
//! This library provides:
//! - A typed task graph for interdependent data transactions
//! - Coin allocation through chained funding-split transactions
//! - Dependency resolution, signing and pre-broadcast verification
//! - A resumable, failure-classifying broadcast driver over a persistent store
//!
//! ## Upload Flow
//! 1. Plan: compare files against on-chain content and pointer records
//! 2. Build: expand the plan into tasks and fund them
//! 3. Resolve: sign tasks in dependency order, then verify the whole set
//! 4. Broadcast: submit in order, persist whatever is left for the next pass
//!
//! ## Modules
//! - `task`: task model, plan expansion, resolver and verifier
//! - `funding`: fee policy and funding-split allocation
//! - `backend`: chain providers behind a ranked fallback directory
//! - `store`: persistent record namespaces
//! - `broadcast`: one classified broadcast pass
//! - `engine`: caller-facing facade over all of the above

pub mod backend;
pub mod broadcast;
pub mod config;
pub mod engine;
pub mod error;
pub mod funding;
pub mod planner;
pub mod protocol;
pub mod store;
pub mod task;
pub mod tx;
pub mod util;

#[cfg(test)]
mod testing;

pub use broadcast::{BroadcastDriver, BroadcastOutcome, BroadcastReport};
pub use config::Config;
pub use engine::UploadEngine;
pub use error::{UploadError, VerificationError};
